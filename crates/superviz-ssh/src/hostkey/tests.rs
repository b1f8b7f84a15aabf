//! Unit tests for known-hosts handling and trust decisions

use super::*;
use crate::wire::encode_string;
use std::sync::Mutex as StdMutex;
use tempfile::TempDir;
use zeroize::Zeroizing;

struct AnsweringPrompter {
    answer: String,
    questions: StdMutex<Vec<String>>,
    notices: StdMutex<Vec<String>>,
}

impl AnsweringPrompter {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            questions: StdMutex::new(Vec::new()),
            notices: StdMutex::new(Vec::new()),
        })
    }

    fn questions(&self) -> usize {
        self.questions.lock().unwrap().len()
    }

    fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

impl Prompter for AnsweringPrompter {
    fn password(&self, _prompt: &str) -> io::Result<Zeroizing<String>> {
        Err(io::Error::new(io::ErrorKind::Other, "no password in this test"))
    }

    fn ask(&self, prompt: &str) -> io::Result<String> {
        self.questions.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }

    fn notice(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

fn ed25519_key(seed: u8) -> HostKey {
    let mut blob = Vec::new();
    encode_string(&mut blob, b"ssh-ed25519");
    encode_string(&mut blob, &[seed; 32]);
    HostKey::from_blob(blob).unwrap()
}

fn store_in(dir: &TempDir) -> Arc<KnownHostsStore> {
    Arc::new(KnownHostsStore::new(dir.path().join("ssh").join("known_hosts")))
}

#[test]
fn test_host_key_metadata() {
    let key = ed25519_key(1);
    assert_eq!(key.algorithm(), "ssh-ed25519");
    assert_eq!(key.key_type(), HostKeyType::Ed25519);
    assert_eq!(key.key_type().to_string(), "ED25519");

    let fingerprint = key.fingerprint();
    assert!(fingerprint.starts_with("SHA256:"));
    assert!(!fingerprint.ends_with('='));
    // 32-byte digest without padding
    assert_eq!(fingerprint.len(), "SHA256:".len() + 43);

    let decoded = HostKey::from_base64(&key.to_base64()).unwrap();
    assert_eq!(decoded, key);
}

#[test]
fn test_key_type_names() {
    assert_eq!(HostKeyType::from_algorithm("ssh-rsa").display_name(), "RSA");
    assert_eq!(HostKeyType::from_algorithm("ecdsa-sha2-nistp256").display_name(), "ECDSA");
    assert_eq!(HostKeyType::from_algorithm("ssh-dss").display_name(), "DSA");
    assert_eq!(HostKeyType::from_algorithm("sk-ssh-ed25519@openssh.com"), HostKeyType::Unknown);
}

#[test]
fn test_malformed_blob_rejected() {
    let err = HostKey::from_blob(vec![0, 0, 0, 40, 1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostKeyRejected);
}

#[test]
fn test_host_pattern_brackets_custom_port() {
    assert_eq!(KnownHostsStore::host_pattern("example.com", 22), "example.com");
    assert_eq!(KnownHostsStore::host_pattern("example.com", 2222), "[example.com]:2222");
}

#[test]
fn test_append_then_lookup() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = store_in(&dir);
    let key = ed25519_key(1);

    assert_eq!(store.lookup("example.com", 22, &key)?, KeyMatch::Unknown);
    store.append("example.com", 22, &key)?;
    assert_eq!(store.lookup("example.com", 22, &key)?, KeyMatch::Found);
    assert_eq!(store.lookup("example.com", 2222, &key)?, KeyMatch::Unknown);
    assert_eq!(store.lookup("example.com", 22, &ed25519_key(2))?, KeyMatch::Changed);

    let contents = std::fs::read_to_string(store.path())?;
    assert_eq!(contents, format!("example.com ssh-ed25519 {}\n", key.to_base64()));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_append_creates_private_files() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.append("example.com", 22, &ed25519_key(1)).unwrap();

    let file_mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
    let dir_mode = std::fs::metadata(store.path().parent().unwrap())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(file_mode & 0o777, 0o600);
    assert_eq!(dir_mode & 0o777, 0o700);
}

#[test]
fn test_append_preserves_existing_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("known_hosts");
    let existing = ed25519_key(9);
    // No trailing newline on purpose
    std::fs::write(&path, format!("other.host ssh-ed25519 {}", existing.to_base64())).unwrap();

    let store = KnownHostsStore::new(&path);
    store.append("example.com", 2222, &ed25519_key(1)).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("other.host "));
    assert!(lines[1].starts_with("[example.com]:2222 ssh-ed25519 "));
    assert_eq!(store.lookup("other.host", 22, &existing).unwrap(), KeyMatch::Found);
}

#[test]
fn test_lookup_skips_comments_markers_and_hashed_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("known_hosts");
    let key = ed25519_key(3);
    let encoded = key.to_base64();
    std::fs::write(
        &path,
        format!(
            "# example.com ssh-ed25519 {k}\n\
             @revoked example.com ssh-ed25519 {k}\n\
             |1|c2FsdA==|aGFzaA== ssh-ed25519 {k}\n\
             \n\
             alias,example.com,10.0.0.1 ssh-ed25519 {k} comment\n",
            k = encoded
        ),
    )
    .unwrap();

    let store = KnownHostsStore::new(&path);
    assert_eq!(store.lookup("example.com", 22, &key).unwrap(), KeyMatch::Found);
    assert_eq!(store.lookup("10.0.0.1", 22, &key).unwrap(), KeyMatch::Found);
    assert_eq!(store.lookup("c2FsdA==", 22, &key).unwrap(), KeyMatch::Unknown);
}

#[tokio::test]
async fn test_known_key_verifies_without_prompt() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let key = ed25519_key(1);
    store.append("example.com", 22, &key).unwrap();

    let prompter = AnsweringPrompter::new("no");
    let callback = HostKeyCallback::tofu("example.com", 22, store, false, prompter.clone());

    assert_eq!(callback.verify(&key).await.unwrap(), TrustDecision::Verified);
    assert_eq!(prompter.questions(), 0);
}

#[tokio::test]
async fn test_auto_accept_pins_unknown_key() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let key = ed25519_key(1);
    let prompter = AnsweringPrompter::new("no");
    let callback = HostKeyCallback::tofu("example.com", 22, Arc::clone(&store), true, prompter.clone());

    assert_eq!(callback.verify(&key).await.unwrap(), TrustDecision::AutoAccepted);
    assert_eq!(prompter.questions(), 0);
    assert!(prompter
        .notices()
        .iter()
        .any(|n| n.contains("Permanently added 'example.com' (ED25519)")));
    assert_eq!(store.lookup("example.com", 22, &key).unwrap(), KeyMatch::Found);
}

#[tokio::test]
async fn test_auto_accept_does_not_cover_changed_key() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.append("example.com", 22, &ed25519_key(1)).unwrap();

    let prompter = AnsweringPrompter::new("no");
    let callback = HostKeyCallback::tofu("example.com", 22, store, true, prompter.clone());

    let err = callback.verify(&ed25519_key(2)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostKeyRejected);
    assert_eq!(prompter.questions(), 1);
}

#[tokio::test]
async fn test_user_accepts_with_short_answer() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let key = ed25519_key(4);
    let prompter = AnsweringPrompter::new("  Y ");
    let callback = HostKeyCallback::tofu("example.com", 2222, Arc::clone(&store), false, prompter.clone());

    assert_eq!(callback.verify(&key).await.unwrap(), TrustDecision::UserAccepted);
    assert!(prompter.notices().iter().any(|n| n.contains(&key.fingerprint())));
    assert_eq!(store.lookup("example.com", 2222, &key).unwrap(), KeyMatch::Found);

    let reconnect = HostKeyCallback::tofu("example.com", 2222, Arc::clone(&store), false, prompter.clone());
    assert_eq!(reconnect.verify(&key).await.unwrap(), TrustDecision::Verified);
    assert_eq!(prompter.questions(), 1);
}

#[tokio::test]
async fn test_unreadable_store_names_its_path() {
    let dir = TempDir::new().unwrap();
    // A directory where the file should be cannot be read as text
    let path = dir.path().join("known_hosts");
    std::fs::create_dir(&path).unwrap();
    let store = Arc::new(KnownHostsStore::new(path.clone()));
    let prompter = AnsweringPrompter::new("yes");
    let callback = HostKeyCallback::tofu("example.com", 22, store, false, prompter.clone());

    let err = callback.verify(&ed25519_key(6)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostKeyRejected);
    assert_eq!(err.context("known_hosts"), Some(path.display().to_string().as_str()));
    assert_eq!(prompter.questions(), 0);
}

#[tokio::test]
async fn test_user_rejection_leaves_store_untouched() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let key = ed25519_key(5);
    let prompter = AnsweringPrompter::new("maybe");
    let callback = HostKeyCallback::tofu("example.com", 22, Arc::clone(&store), false, prompter);

    let err = callback.verify(&key).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostKeyRejected);
    assert_eq!(err.message(), "host key rejected by user");
    assert!(!store.path().exists());
}

#[tokio::test]
async fn test_decision_is_taken_once() {
    let dir = TempDir::new().unwrap();
    let prompter = AnsweringPrompter::new("yes");
    let callback = HostKeyCallback::tofu("example.com", 22, store_in(&dir), false, prompter.clone());
    let key = ed25519_key(6);

    assert!(callback.decision().is_none());
    let first = callback.verify(&key).await.unwrap();
    let second = callback.clone().verify(&key).await.unwrap();

    assert_eq!(first, TrustDecision::UserAccepted);
    assert_eq!(second, TrustDecision::UserAccepted);
    assert_eq!(prompter.questions(), 1);
    assert!(matches!(callback.decision(), Some(Ok(TrustDecision::UserAccepted))));
}

#[tokio::test]
async fn test_persist_failure_is_an_error() {
    let dir = TempDir::new().unwrap();
    // A directory where the file should be makes the append fail
    let path = dir.path().join("known_hosts");
    std::fs::create_dir(&path).unwrap();
    let store = Arc::new(KnownHostsStore::new(&path));

    let callback = HostKeyCallback::tofu("example.com", 22, store, true, AnsweringPrompter::new("yes"));
    let err = callback.verify(&ed25519_key(7)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostKeyRejected);
}

#[tokio::test]
async fn test_skip_warns_and_accepts() {
    let prompter = AnsweringPrompter::new("no");
    let manager = TofuHostKeyManager::new(
        Arc::new(KnownHostsStore::new("/nonexistent/known_hosts")),
        prompter.clone(),
    );
    let config = ConnectionConfig::new("example.com", "deploy").with_skip_host_key_check(true);

    let callback = manager.callback(&config).unwrap();
    assert_eq!(callback.verify(&ed25519_key(1)).await.unwrap(), TrustDecision::Skipped);
    assert_eq!(prompter.questions(), 0);
    assert!(prompter.notices()[0].contains("verification is disabled"));
}

#[tokio::test]
async fn test_manager_honours_known_hosts_override() {
    let dir = TempDir::new().unwrap();
    let override_path = dir.path().join("custom_known_hosts");
    let manager = TofuHostKeyManager::new(store_in(&dir), AnsweringPrompter::new("no"));
    let config = ConnectionConfig::new("example.com", "deploy")
        .with_known_hosts(&override_path)
        .with_auto_accept(true);

    let callback = manager.callback(&config).unwrap();
    callback.verify(&ed25519_key(8)).await.unwrap();

    assert!(override_path.exists());
    assert!(!manager.store().path().exists());
}
