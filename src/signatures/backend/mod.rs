//! Cryptographic backends.
//!
//! Two backends exist: a file keystore for X.509 certificates and PKCS#8
//! keys, and GnuPG for OpenPGP keys. Both produce signing and
//! verification handles with the same shape, so the validator and the
//! signer never look at which one they are using.

mod gpg;
mod keystore;
mod registry;

use std::fmt;

use chrono::{DateTime, Utc};

pub use self::gpg::{pad_pgp_signature, GpgBackend};
pub use self::keystore::KeystoreBackend;
pub use self::registry::{Backends, PasswordCallback};
pub use super::trust::CertificateCheck;

use self::gpg::{GpgSigningHandle, GpgVerificationHandle};
use self::keystore::{CmsVerificationHandle, KeystoreSigningHandle};
use super::certificate::CertificateInfo;
use super::result::SigningError;
use super::secret::SecretString;
use super::types::{
    BackendFeature, CertificateStatus, HashAlgorithm, SignatureStatus, SignatureType,
};

/// The backends that can be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// X.509 certificates and keys in a directory
    Keystore,
    /// OpenPGP keys through the `gpg` executable
    Gpg,
}

impl BackendKind {
    /// Parse a backend name as used in `PDF_OXIDE_SIGNATURE_BACKEND`.
    ///
    /// `NSS` is accepted as a synonym for the keystore.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "KEYSTORE" | "NSS" | "NSS3" => Some(BackendKind::Keystore),
            "GPG" | "GPGME" => Some(BackendKind::Gpg),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Keystore => "KEYSTORE",
            BackendKind::Gpg => "GPG",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A configured backend.
#[derive(Debug, Clone)]
pub enum Backend {
    Keystore(KeystoreBackend),
    Gpg(GpgBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Keystore(_) => BackendKind::Keystore,
            Backend::Gpg(_) => BackendKind::Gpg,
        }
    }

    /// Certificates with a usable private key. Failures yield an empty list.
    pub fn signing_certificates(&self) -> Vec<CertificateInfo> {
        match self {
            Backend::Keystore(b) => b.signing_certificates(),
            Backend::Gpg(b) => b.signing_certificates(),
        }
    }

    pub fn create_signing_handle(
        &self,
        certificate_id: &str,
        hash: HashAlgorithm,
    ) -> std::result::Result<SigningHandle, SigningError> {
        match self {
            Backend::Keystore(b) => b
                .create_signing_handle(certificate_id, hash)
                .map(SigningHandle::Keystore),
            Backend::Gpg(b) => b
                .create_signing_handle(certificate_id, hash)
                .map(SigningHandle::Gpg),
        }
    }

    /// A handle able to check `signature`, or `None` when this backend does
    /// not understand the sub-filter.
    pub fn create_verification_handle(
        &self,
        signature: Vec<u8>,
        signature_type: SignatureType,
    ) -> Option<VerificationHandle> {
        match self {
            Backend::Keystore(b) if signature_type.is_cms() => {
                let handle = b.create_verification_handle(signature, signature_type);
                Some(VerificationHandle::Cms(handle))
            },
            Backend::Gpg(b) if signature_type == SignatureType::G10cPgpSignatureDetached => {
                Some(VerificationHandle::Gpg(b.create_verification_handle(signature)))
            },
            _ => None,
        }
    }

    pub fn has_feature(&self, feature: BackendFeature) -> bool {
        match (self, feature) {
            (Backend::Keystore(_), BackendFeature::AsksPassphrase) => false,
            (Backend::Gpg(_), BackendFeature::AsksPassphrase) => true,
        }
    }

    /// Sub-filter written when signing with this backend.
    pub fn signature_type(&self) -> SignatureType {
        match self {
            Backend::Keystore(_) => SignatureType::AdbePkcs7Detached,
            Backend::Gpg(_) => SignatureType::G10cPgpSignatureDetached,
        }
    }
}

/// Accumulates the covered bytes and produces a detached signature.
pub enum SigningHandle {
    Keystore(KeystoreSigningHandle),
    Gpg(GpgSigningHandle),
}

impl SigningHandle {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            SigningHandle::Keystore(h) => h.update(data),
            SigningHandle::Gpg(h) => h.update(data),
        }
    }

    /// Produce the signature. An empty `password` lets the backend obtain
    /// one itself (password callback or gpg-agent).
    pub fn sign_detached(
        &mut self,
        password: &SecretString,
    ) -> std::result::Result<Vec<u8>, SigningError> {
        match self {
            SigningHandle::Keystore(h) => h.sign_detached(password),
            SigningHandle::Gpg(h) => h.sign_detached(password),
        }
    }

    /// The certificate the handle signs with.
    pub fn certificate(&self) -> &CertificateInfo {
        match self {
            SigningHandle::Keystore(h) => h.certificate(),
            SigningHandle::Gpg(h) => h.certificate(),
        }
    }
}

/// Accumulates the covered bytes and checks one embedded signature.
pub enum VerificationHandle {
    Cms(CmsVerificationHandle),
    Gpg(GpgVerificationHandle),
}

impl VerificationHandle {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            VerificationHandle::Cms(h) => h.update(data),
            VerificationHandle::Gpg(h) => h.update(data),
        }
    }

    /// Check the signature over everything passed to [`update`].
    ///
    /// [`update`]: VerificationHandle::update
    pub fn validate_signature(&mut self) -> SignatureStatus {
        match self {
            VerificationHandle::Cms(h) => h.validate_signature(),
            VerificationHandle::Gpg(h) => h.validate_signature(),
        }
    }

    pub fn signer_name(&self) -> Option<String> {
        match self {
            VerificationHandle::Cms(h) => h.signer_name(),
            VerificationHandle::Gpg(h) => h.signer_name(),
        }
    }

    pub fn signer_subject_dn(&self) -> Option<String> {
        match self {
            VerificationHandle::Cms(h) => h.signer_subject_dn(),
            VerificationHandle::Gpg(h) => h.signer_subject_dn(),
        }
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        match self {
            VerificationHandle::Cms(h) => h.signing_time(),
            VerificationHandle::Gpg(h) => h.signing_time(),
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            VerificationHandle::Cms(h) => h.hash_algorithm(),
            VerificationHandle::Gpg(h) => h.hash_algorithm(),
        }
    }

    /// The signer certificate, [`CertificateInfo::null`] when unknown.
    pub fn certificate_info(&self) -> CertificateInfo {
        match self {
            VerificationHandle::Cms(h) => h.certificate_info(),
            VerificationHandle::Gpg(h) => h.certificate_info(),
        }
    }

    /// Evaluate trust in the signer certificate.
    pub fn validate_certificate(&self, check: &CertificateCheck) -> CertificateStatus {
        match self {
            VerificationHandle::Cms(h) => h.validate_certificate(check),
            VerificationHandle::Gpg(h) => h.validate_certificate(check),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendKind::from_name("NSS"), Some(BackendKind::Keystore));
        assert_eq!(BackendKind::from_name("keystore"), Some(BackendKind::Keystore));
        assert_eq!(BackendKind::from_name(" GPG "), Some(BackendKind::Gpg));
        assert_eq!(BackendKind::from_name("openssl"), None);
        assert_eq!(BackendKind::Gpg.to_string(), "GPG");
    }
}
