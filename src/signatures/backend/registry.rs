//! Backend registry and the process-wide active backend.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;

use super::{Backend, BackendKind, GpgBackend, KeystoreBackend, VerificationHandle};
use crate::config::{SignatureConfig, SIGNATURE_BACKEND_ENV};
use crate::signatures::certificate::CertificateInfo;
use crate::signatures::ocsp::OcspClient;
use crate::signatures::secret::SecretString;
use crate::signatures::types::{BackendFeature, SignatureType};

/// Supplies the password for a key nickname; `None` cancels signing.
pub type PasswordCallback = Arc<dyn Fn(&str) -> Option<SecretString> + Send + Sync>;

/// Outcome of running `gpg --version` for one binary and home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GpgCheck {
    binary: PathBuf,
    home: Option<PathBuf>,
    available: bool,
}

lazy_static! {
    static ref GLOBAL_BACKENDS: RwLock<Option<Arc<Backends>>> = RwLock::new(None);
}

/// The set of backends, the selected one and their configuration.
///
/// One instance is installed process-wide with [`Backends::init`] and read
/// everywhere else through [`Backends::global`]. Tests build their own
/// instances with [`Backends::new`].
pub struct Backends {
    config: RwLock<SignatureConfig>,
    selected: RwLock<Option<BackendKind>>,
    password_callback: RwLock<Option<PasswordCallback>>,
    gpg_check: RwLock<Option<GpgCheck>>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("config", &self.config())
            .field("selected", &*self.selected.read().unwrap_or_else(PoisonError::into_inner))
            .finish()
    }
}

impl Backends {
    pub fn new(config: SignatureConfig) -> Self {
        Self {
            config: RwLock::new(config),
            selected: RwLock::new(None),
            password_callback: RwLock::new(None),
            gpg_check: RwLock::new(None),
        }
    }

    /// Install the process-wide registry, replacing any previous one.
    pub fn init(config: SignatureConfig) -> Arc<Self> {
        let backends = Arc::new(Self::new(config));
        *GLOBAL_BACKENDS.write().unwrap_or_else(PoisonError::into_inner) = Some(backends.clone());
        log::debug!("Signature backends initialised");
        backends
    }

    /// The process-wide registry, created from the environment on first use.
    pub fn global() -> Arc<Self> {
        {
            let global = GLOBAL_BACKENDS.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(backends) = global.as_ref() {
                return backends.clone();
            }
        }
        let mut global = GLOBAL_BACKENDS.write().unwrap_or_else(PoisonError::into_inner);
        global
            .get_or_insert_with(|| Arc::new(Self::new(SignatureConfig::from_env())))
            .clone()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> SignatureConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn available(&self) -> Vec<BackendKind> {
        let mut kinds = vec![BackendKind::Keystore];
        if self.gpg_available() {
            kinds.push(BackendKind::Gpg);
        }
        kinds
    }

    /// The selected backend, else the one named by the environment, else
    /// the configured default. `None` when that backend is not available.
    pub fn active(&self) -> Option<BackendKind> {
        let selected = *self.selected.read().unwrap_or_else(PoisonError::into_inner);
        let kind = selected
            .or_else(|| {
                std::env::var(SIGNATURE_BACKEND_ENV)
                    .ok()
                    .and_then(|name| BackendKind::from_name(&name))
            })
            .unwrap_or(self.config().default_backend);
        self.available().contains(&kind).then_some(kind)
    }

    /// Select `kind`. Fails without changing anything when it is not
    /// available; otherwise reports whether the selection took effect.
    pub fn set_active(&self, kind: BackendKind) -> bool {
        if !self.available().contains(&kind) {
            log::warn!("Signature backend {} is not available", kind);
            return false;
        }
        *self.selected.write().unwrap_or_else(PoisonError::into_inner) = Some(kind);
        log::info!("Active signature backend set to {}", kind);
        self.active() == Some(kind)
    }

    pub fn active_backend(&self) -> Option<Backend> {
        self.active().map(|kind| self.backend(kind))
    }

    pub fn backend(&self, kind: BackendKind) -> Backend {
        match kind {
            BackendKind::Keystore => Backend::Keystore(self.keystore()),
            BackendKind::Gpg => Backend::Gpg(self.gpg()),
        }
    }

    /// Certificates the active backend can sign with.
    pub fn signing_certificates(&self) -> Vec<CertificateInfo> {
        self.active()
            .map(|kind| self.signing_certificates_for(kind))
            .unwrap_or_default()
    }

    pub fn signing_certificates_for(&self, kind: BackendKind) -> Vec<CertificateInfo> {
        if kind == BackendKind::Gpg && !self.pgp_signatures_allowed() {
            log::debug!("OpenPGP signatures are disabled, not listing gpg keys");
            return Vec::new();
        }
        self.backend(kind).signing_certificates()
    }

    pub fn has_feature(&self, kind: BackendKind, feature: BackendFeature) -> bool {
        self.backend(kind).has_feature(feature)
    }

    /// Ignored for an empty path.
    pub fn set_keystore_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return;
        }
        self.config.write().unwrap_or_else(PoisonError::into_inner).keystore_dir = dir;
    }

    pub fn keystore_dir(&self) -> PathBuf {
        self.config().keystore_dir
    }

    pub fn set_pgp_signatures_allowed(&self, allowed: bool) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        config.pgp_signatures_allowed = allowed;
    }

    pub fn pgp_signatures_allowed(&self) -> bool {
        self.config().pgp_signatures_allowed
    }

    pub fn set_password_callback<F>(&self, callback: F)
    where
        F: Fn(&str) -> Option<SecretString> + Send + Sync + 'static,
    {
        let mut slot = self.password_callback.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(callback));
    }

    pub fn clear_password_callback(&self) {
        *self.password_callback.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// A handle for an embedded signature, whichever backend is active.
    ///
    /// CMS signatures are checked by the keystore, OpenPGP ones by gpg when
    /// it is installed and OpenPGP signatures are allowed.
    pub fn create_verification_handle(
        &self,
        signature: Vec<u8>,
        signature_type: SignatureType,
    ) -> Option<VerificationHandle> {
        if signature_type.is_cms() {
            return self
                .backend(BackendKind::Keystore)
                .create_verification_handle(signature, signature_type);
        }
        if signature_type == SignatureType::G10cPgpSignatureDetached {
            if !self.pgp_signatures_allowed() {
                log::warn!("OpenPGP signature found but OpenPGP signatures are disabled");
                return None;
            }
            if !self.gpg_available() {
                log::warn!("OpenPGP signature found but gpg is not available");
                return None;
            }
            return Backend::Gpg(self.gpg()).create_verification_handle(signature, signature_type);
        }
        None
    }

    pub fn ocsp_client(&self) -> OcspClient {
        OcspClient::new(self.config().network_timeout)
    }

    fn keystore(&self) -> KeystoreBackend {
        let callback = self
            .password_callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        KeystoreBackend::new(self.keystore_dir(), callback, self.ocsp_client())
    }

    fn gpg(&self) -> GpgBackend {
        let config = self.config();
        GpgBackend::new(config.gpg_binary, config.gpg_home)
    }

    /// Whether the configured gpg is usable. The binary is run once per
    /// binary and home directory; the answer is reused until either changes.
    fn gpg_available(&self) -> bool {
        let config = self.config();
        {
            let check = self.gpg_check.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(check) = check.as_ref() {
                if check.binary == config.gpg_binary && check.home == config.gpg_home {
                    return check.available;
                }
            }
        }
        let available =
            GpgBackend::new(config.gpg_binary.clone(), config.gpg_home.clone()).is_available();
        log::debug!("gpg at {} available: {}", config.gpg_binary.display(), available);
        *self.gpg_check.write().unwrap_or_else(PoisonError::into_inner) = Some(GpgCheck {
            binary: config.gpg_binary,
            home: config.gpg_home,
            available,
        });
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_config() -> SignatureConfig {
        SignatureConfig::new()
            .with_keystore_dir(format!("{}/tests/fixtures/keystore", env!("CARGO_MANIFEST_DIR")))
            .with_gpg_binary("/nonexistent/gpg-binary")
    }

    #[test]
    fn test_keystore_always_available() {
        let backends = Backends::new(fixture_config());
        assert_eq!(backends.available(), vec![BackendKind::Keystore]);
    }

    #[cfg(unix)]
    #[test]
    fn test_gpg_checked_once_per_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("calls");
        let script = dir.path().join("gpg");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho run >> '{}'\necho 'gpg (GnuPG) 2.4.3'\n", calls.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backends = Backends::new(fixture_config().with_gpg_binary(&script));
        for _ in 0..3 {
            assert_eq!(backends.available(), vec![BackendKind::Keystore, BackendKind::Gpg]);
        }
        assert!(backends.set_active(BackendKind::Gpg));
        let runs = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(runs.lines().count(), 1);

        // a different home directory is checked again
        backends.config.write().unwrap().gpg_home = Some(dir.path().to_path_buf());
        assert!(backends.available().contains(&BackendKind::Gpg));
        let runs = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(runs.lines().count(), 2);
    }

    #[test]
    fn test_set_active_verifies_write() {
        let backends = Backends::new(fixture_config());
        assert!(backends.set_active(BackendKind::Keystore));
        assert_eq!(backends.active(), Some(BackendKind::Keystore));

        // gpg is missing, so the selection must not change
        assert!(!backends.set_active(BackendKind::Gpg));
        assert_eq!(backends.active(), Some(BackendKind::Keystore));
    }

    #[test]
    fn test_unavailable_default_is_not_active() {
        let backends = Backends::new(fixture_config().with_default_backend(BackendKind::Gpg));
        if std::env::var(SIGNATURE_BACKEND_ENV).is_err() {
            assert_eq!(backends.active(), None);
            assert!(backends.signing_certificates().is_empty());
        }
    }

    #[test]
    fn test_keystore_dir_ignores_empty() {
        let backends = Backends::new(fixture_config());
        let before = backends.keystore_dir();
        backends.set_keystore_dir("");
        assert_eq!(backends.keystore_dir(), before);
        backends.set_keystore_dir("/tmp/other");
        assert_eq!(backends.keystore_dir(), PathBuf::from("/tmp/other"));
    }

    #[test]
    fn test_features() {
        let backends = Backends::new(fixture_config());
        assert!(!backends.has_feature(BackendKind::Keystore, BackendFeature::AsksPassphrase));
        assert!(backends.has_feature(BackendKind::Gpg, BackendFeature::AsksPassphrase));
    }

    #[test]
    fn test_pgp_verification_requires_permission() {
        let backends = Backends::new(fixture_config());
        assert!(backends
            .create_verification_handle(vec![0x89], SignatureType::G10cPgpSignatureDetached)
            .is_none());
        assert!(backends
            .create_verification_handle(vec![0x30], SignatureType::AdbePkcs7Detached)
            .is_some());
        assert!(backends
            .create_verification_handle(vec![0x30], SignatureType::UnknownSignatureType)
            .is_none());
    }

    #[test]
    fn test_signing_certificates_from_keystore() {
        let backends = Backends::new(fixture_config());
        assert!(backends.set_active(BackendKind::Keystore));
        assert_eq!(backends.signing_certificates().len(), 4);
        assert!(backends.signing_certificates_for(BackendKind::Gpg).is_empty());
    }
}
