//! Passwords and passphrases that are wiped from memory when dropped.

use zeroize::{Zeroize, Zeroizing};

/// A password held in a buffer that is overwritten with zeros on drop.
///
/// The wrapped bytes are never printed by `Debug`. Copies made by the OS
/// (swap, core dumps) are not cleared.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    /// Wrap a password.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Borrow the password for exactly one use.
    pub fn expose_secret(&self) -> &str {
        self.0.as_str()
    }

    /// Whether no password was supplied.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Zeroize for SecretString {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("SecretString(<empty>)")
        } else {
            f.write_str("SecretString([REDACTED])")
        }
    }
}
