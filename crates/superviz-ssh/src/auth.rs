//! Credential resolution
//!
//! Turns a [`ConnectionConfig`] into the list of authentication methods the
//! dialer should try. An explicitly configured private key is authoritative:
//! if it cannot be read or parsed the connection fails with
//! [`ErrorKind::AuthFailed`] unless the caller opted into a password fallback.

use crate::config::ConnectionConfig;
use crate::error::{ErrorKind, SshError};
use crate::prompt::Prompter;
use crate::wire::WireReader;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};
use zeroize::Zeroizing;

const OPENSSH_MAGIC: &[u8] = b"openssh-key-v1\0";

/// Resolves credentials into authentication methods
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Methods to try, in order
    async fn resolve(&self, config: &ConnectionConfig) -> Result<Vec<AuthMethod>, SshError>;
}

/// One way of proving identity to the server
#[derive(Clone)]
pub enum AuthMethod {
    /// Public key authentication with a parsed private key
    PublicKey(Arc<PrivateKey>),
    /// Password authentication
    Password(Zeroizing<String>),
}

impl AuthMethod {
    /// SSH method name (`publickey` / `password`)
    pub fn name(&self) -> &'static str {
        match self {
            Self::PublicKey(_) => "publickey",
            Self::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublicKey(key) => f.debug_tuple("PublicKey").field(key).finish(),
            Self::Password(_) => f.write_str("Password(***)"),
        }
    }
}

/// A private key loaded from disk and checked for usability
pub struct PrivateKey {
    path: PathBuf,
    algorithm: String,
    pem: Zeroizing<String>,
}

impl PrivateKey {
    /// Read and parse a private key file
    ///
    /// The raw file contents live in a zeroizing buffer and are wiped before
    /// this function returns, whether parsing succeeded or not.
    pub fn load(path: &Path) -> Result<Self, SshError> {
        let raw = Zeroizing::new(std::fs::read(path).map_err(|e| {
            SshError::wrap(ErrorKind::AuthFailed, "failed to read private key", e)
                .with_context("key_path", path.display())
        })?);

        Self::parse(&raw, path).map_err(|e| e.with_context("key_path", path.display()))
    }

    /// Parse PEM-armoured key material
    pub fn parse(raw: &[u8], path: &Path) -> Result<Self, SshError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| SshError::new(ErrorKind::AuthFailed, "private key is not PEM text"))?;

        let armor = PemArmor::find(text)
            .ok_or_else(|| SshError::new(ErrorKind::AuthFailed, "no PEM private key block found"))?;

        if armor.encrypted_header {
            return Err(encrypted_key_error());
        }

        let body = Zeroizing::new(STANDARD.decode(armor.body.as_bytes()).map_err(|e| {
            SshError::wrap(ErrorKind::AuthFailed, "private key body is not valid base64", e)
        })?);

        let algorithm = match armor.label.as_str() {
            "OPENSSH PRIVATE KEY" => openssh_algorithm(&body)?,
            "RSA PRIVATE KEY" => "ssh-rsa".to_string(),
            "DSA PRIVATE KEY" => "ssh-dss".to_string(),
            "EC PRIVATE KEY" => "ecdsa".to_string(),
            "PRIVATE KEY" => pkcs8_algorithm(&body).to_string(),
            "ENCRYPTED PRIVATE KEY" => return Err(encrypted_key_error()),
            other => {
                return Err(SshError::new(ErrorKind::AuthFailed, "unsupported private key type")
                    .with_context("pem_label", other))
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            algorithm,
            pem: Zeroizing::new(armor.block.to_string()),
        })
    }

    /// File the key was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key algorithm as far as it can be told from the container
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// PEM text, for transports that load keys from memory
    pub fn pem(&self) -> &str {
        &self.pem
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("path", &self.path)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn encrypted_key_error() -> SshError {
    SshError::new(
        ErrorKind::AuthFailed,
        "passphrase-protected private keys are not supported",
    )
}

/// A located `-----BEGIN ...-----` block
struct PemArmor<'a> {
    label: String,
    block: &'a str,
    body: Zeroizing<String>,
    encrypted_header: bool,
}

impl<'a> PemArmor<'a> {
    fn find(text: &'a str) -> Option<Self> {
        let begin = text.find("-----BEGIN ")?;
        let rest = &text[begin + "-----BEGIN ".len()..];
        let label_end = rest.find("-----")?;
        let label = rest[..label_end].trim().to_string();

        let end_marker = format!("-----END {}-----", label);
        let end = text[begin..].find(&end_marker)? + begin + end_marker.len();
        let block = &text[begin..end];

        let mut body = Zeroizing::new(String::new());
        let mut encrypted_header = false;
        for line in block.lines().skip(1) {
            let line = line.trim();
            if line.starts_with("-----END") {
                break;
            }
            if line.contains(':') {
                if line.starts_with("Proc-Type:") && line.contains("ENCRYPTED") {
                    encrypted_header = true;
                }
                continue;
            }
            body.push_str(line);
        }

        Some(Self {
            label,
            block,
            body,
            encrypted_header,
        })
    }
}

fn openssh_algorithm(body: &[u8]) -> Result<String, SshError> {
    let malformed = || SshError::new(ErrorKind::AuthFailed, "malformed OpenSSH private key");

    let mut reader = WireReader::new(body);
    if !reader.expect_prefix(OPENSSH_MAGIC) {
        return Err(malformed());
    }
    let cipher = reader.read_utf8().ok_or_else(malformed)?;
    let _kdf_name = reader.read_string().ok_or_else(malformed)?;
    let _kdf_options = reader.read_string().ok_or_else(malformed)?;
    if cipher != "none" {
        return Err(encrypted_key_error().with_context("cipher", cipher));
    }

    let key_count = reader.read_u32().ok_or_else(malformed)?;
    if key_count != 1 {
        return Err(malformed().with_context("keys", key_count));
    }

    let public_blob = reader.read_string().ok_or_else(malformed)?;
    let algorithm = WireReader::new(public_blob)
        .read_utf8()
        .ok_or_else(malformed)?;
    Ok(algorithm.to_string())
}

fn pkcs8_algorithm(body: &[u8]) -> &'static str {
    const RSA_OID: &[u8] = &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
    const EC_OID: &[u8] = &[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
    const ED25519_OID: &[u8] = &[0x06, 0x03, 0x2b, 0x65, 0x70];

    let contains = |needle: &[u8]| body.windows(needle.len()).any(|w| w == needle);
    if contains(RSA_OID) {
        "ssh-rsa"
    } else if contains(EC_OID) {
        "ecdsa"
    } else if contains(ED25519_OID) {
        "ssh-ed25519"
    } else {
        "unknown"
    }
}

type KeySlot = Arc<OnceCell<Arc<PrivateKey>>>;

/// Default authenticator: private key when configured, otherwise a password
/// prompt
pub struct KeyAuthenticator {
    /// Interactive input for passwords and warnings
    prompter: Arc<dyn Prompter>,
    /// Parsed keys by path; each slot initialises at most once
    keys: RwLock<HashMap<PathBuf, KeySlot>>,
}

impl KeyAuthenticator {
    /// Create an authenticator using the given prompter
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            prompter,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Number of keys currently cached
    pub async fn cached_keys(&self) -> usize {
        self.keys
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    async fn key_slot(&self, path: &Path) -> KeySlot {
        if let Some(slot) = self.keys.read().await.get(path) {
            return Arc::clone(slot);
        }
        let mut keys = self.keys.write().await;
        Arc::clone(keys.entry(path.to_path_buf()).or_default())
    }

    /// Load a key, reusing the cached copy for a path seen before
    pub async fn load_key(&self, path: &Path) -> Result<Arc<PrivateKey>, SshError> {
        let slot = self.key_slot(path).await;
        let key = slot
            .get_or_try_init(|| async {
                debug!("Loading private key from {}", path.display());
                let owned = path.to_path_buf();
                tokio::task::spawn_blocking(move || PrivateKey::load(&owned))
                    .await
                    .map_err(|e| {
                        SshError::wrap(ErrorKind::AuthFailed, "private key loader panicked", e)
                            .with_context("key_path", path.display())
                    })?
                    .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(key))
    }

    async fn prompt_password(&self, config: &ConnectionConfig) -> Result<Zeroizing<String>, SshError> {
        let prompter = Arc::clone(&self.prompter);
        let prompt = format!("{}@{}'s password", config.user, config.host);
        tokio::task::spawn_blocking(move || prompter.password(&prompt))
            .await
            .map_err(|e| SshError::wrap(ErrorKind::AuthFailed, "password prompt panicked", e))?
            .map_err(|e| SshError::wrap(ErrorKind::AuthFailed, "failed to read password", e))
    }
}

#[async_trait]
impl Authenticator for KeyAuthenticator {
    async fn resolve(&self, config: &ConnectionConfig) -> Result<Vec<AuthMethod>, SshError> {
        if let Some(path) = &config.key_path {
            match self.load_key(path).await {
                Ok(key) => return Ok(vec![AuthMethod::PublicKey(key)]),
                Err(err) if config.password_fallback => {
                    warn!("Private key unusable, falling back to password: {}", err);
                    self.prompter.notice(&format!(
                        "Warning: could not use key {} ({}); falling back to password authentication",
                        path.display(),
                        err.message()
                    ));
                }
                Err(err) => return Err(err),
            }
        }

        let password = self.prompt_password(config).await?;
        Ok(vec![AuthMethod::Password(password)])
    }
}
