//! Interactive input for passwords and host key decisions

use std::io;
use zeroize::Zeroizing;

/// Source of interactive answers
///
/// Implementations block; async callers run them on a blocking thread.
pub trait Prompter: Send + Sync {
    /// Read a secret with echo disabled
    fn password(&self, prompt: &str) -> io::Result<Zeroizing<String>>;

    /// Read a free-form answer to a question
    fn ask(&self, prompt: &str) -> io::Result<String>;

    /// Show a warning the user must see
    fn notice(&self, message: &str);
}

/// Prompter backed by the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn password(&self, prompt: &str) -> io::Result<Zeroizing<String>> {
        dialoguer::Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map(Zeroizing::new)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    fn ask(&self, prompt: &str) -> io::Result<String> {
        dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    fn notice(&self, message: &str) {
        eprintln!("{}", message);
    }
}
