//! Configuration for signing and signature validation.

use std::path::PathBuf;
use std::time::Duration;

use crate::signatures::backend::BackendKind;

/// Environment variable selecting the signature backend (`NSS`, `KEYSTORE` or `GPG`).
pub const SIGNATURE_BACKEND_ENV: &str = "PDF_OXIDE_SIGNATURE_BACKEND";

/// Environment variable overriding the keystore directory.
pub const KEYSTORE_DIR_ENV: &str = "PDF_OXIDE_KEYSTORE_DIR";

/// Bytes reserved for the DER or OpenPGP signature in `/Contents`.
pub const DEFAULT_MAX_SIGNATURE_SIZE: usize = 10_000;

/// Signature subsystem configuration.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    /// Directory holding certificates, keys, CRLs and `trusted/` anchors.
    pub keystore_dir: PathBuf,

    /// Backend used when neither an explicit selection nor the
    /// environment names one.
    pub default_backend: BackendKind,

    /// Accept and create OpenPGP signatures.
    pub pgp_signatures_allowed: bool,

    /// Name or path of the `gpg` executable.
    pub gpg_binary: PathBuf,

    /// GnuPG home directory (`--homedir`), the gpg default when `None`.
    pub gpg_home: Option<PathBuf>,

    /// Threads in the pool that runs asynchronous validation and signing.
    pub worker_threads: usize,

    /// Bytes reserved for the signature value.
    pub max_signature_size: usize,

    /// Timeout for OCSP and AIA requests.
    pub network_timeout: Duration,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            keystore_dir: default_keystore_dir(),
            default_backend: BackendKind::Keystore,
            pgp_signatures_allowed: false,
            gpg_binary: PathBuf::from("gpg"),
            gpg_home: None,
            worker_threads: 2,
            max_signature_size: DEFAULT_MAX_SIGNATURE_SIZE,
            network_timeout: Duration::from_secs(10),
        }
    }

    /// Defaults, with the keystore directory taken from
    /// `PDF_OXIDE_KEYSTORE_DIR` when set.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(dir) = std::env::var_os(KEYSTORE_DIR_ENV).filter(|d| !d.is_empty()) {
            config.keystore_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn with_keystore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keystore_dir = dir.into();
        self
    }

    pub fn with_default_backend(mut self, backend: BackendKind) -> Self {
        self.default_backend = backend;
        self
    }

    pub fn with_pgp_signatures(mut self, allowed: bool) -> Self {
        self.pgp_signatures_allowed = allowed;
        self
    }

    pub fn with_gpg_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.gpg_binary = binary.into();
        self
    }

    pub fn with_gpg_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.gpg_home = Some(home.into());
        self
    }

    /// At least one worker is always kept.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_max_signature_size(mut self, size: usize) -> Self {
        self.max_signature_size = size;
        self
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }
}

/// `~/.pki/pdf_oxide`, or `.pki/pdf_oxide` when no home directory is known.
fn default_keystore_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".pki")
        .join("pdf_oxide")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = SignatureConfig::new()
            .with_keystore_dir("/tmp/keys")
            .with_default_backend(BackendKind::Gpg)
            .with_pgp_signatures(true)
            .with_worker_threads(0);
        assert_eq!(config.keystore_dir, PathBuf::from("/tmp/keys"));
        assert_eq!(config.default_backend, BackendKind::Gpg);
        assert!(config.pgp_signatures_allowed);
        assert_eq!(config.worker_threads, 1);
    }

    #[test]
    fn test_defaults() {
        let config = SignatureConfig::default();
        assert_eq!(config.default_backend, BackendKind::Keystore);
        assert!(!config.pgp_signatures_allowed);
        assert_eq!(config.max_signature_size, DEFAULT_MAX_SIGNATURE_SIZE);
        assert!(config.keystore_dir.ends_with(".pki/pdf_oxide"));
    }
}
