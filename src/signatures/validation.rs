//! The result of validating one signature field.

use chrono::{DateTime, Utc};

use super::byterange;
use super::certificate::CertificateInfo;
use super::types::{
    CertificateState, CertificateStatus, HashAlgorithm, SignatureStatus, SignatureType,
};

/// Everything known about a signature after validation.
///
/// The signature status is final once the value is returned. The certificate
/// verdict is two-phase: [`certificate_status`] returns `None` while trust
/// evaluation has not completed.
///
/// [`certificate_status`]: SignatureValidationInfo::certificate_status
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureValidationInfo {
    pub(crate) signature_status: SignatureStatus,
    pub(crate) certificate_state: CertificateState,
    pub(crate) signature_type: SignatureType,
    pub(crate) signer_name: Option<String>,
    pub(crate) signer_subject_dn: Option<String>,
    pub(crate) location: Option<String>,
    pub(crate) reason: Option<String>,
    pub(crate) hash_algorithm: HashAlgorithm,
    pub(crate) signing_time: Option<DateTime<Utc>>,
    pub(crate) certificate_info: CertificateInfo,
    pub(crate) signature: Vec<u8>,
    pub(crate) byte_range_boundaries: Vec<i64>,
    pub(crate) document_length: i64,
}

impl SignatureValidationInfo {
    /// A result for a field that carries no signature.
    pub fn not_found() -> Self {
        Self {
            signature_status: SignatureStatus::NotFound,
            certificate_state: CertificateState::Resolved(CertificateStatus::NotVerified),
            signature_type: SignatureType::UnsignedSignatureField,
            ..Self::default()
        }
    }

    pub fn signature_status(&self) -> SignatureStatus {
        self.signature_status
    }

    /// Terminal certificate verdict, `None` while still pending.
    pub fn certificate_status(&self) -> Option<CertificateStatus> {
        self.certificate_state.status()
    }

    pub fn certificate_state(&self) -> CertificateState {
        self.certificate_state
    }

    pub fn signature_type(&self) -> SignatureType {
        self.signature_type
    }

    /// Common name of the signer, falling back to the `/Name` entry.
    pub fn signer_name(&self) -> Option<&str> {
        self.signer_name.as_deref()
    }

    pub fn signer_subject_dn(&self) -> Option<&str> {
        self.signer_subject_dn.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.signing_time
    }

    /// The signer certificate; [`CertificateInfo::is_null`] when none was found.
    pub fn certificate_info(&self) -> &CertificateInfo {
        &self.certificate_info
    }

    /// The signature bytes read from the gap between the covered ranges.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// `[pre_start, pre_end, post_start, post_end]` of the `/ByteRange`.
    pub fn byte_range_boundaries(&self) -> &[i64] {
        &self.byte_range_boundaries
    }

    /// Document length at validation time.
    pub fn document_length(&self) -> i64 {
        self.document_length
    }

    /// True when the signature covers every byte except its own value.
    pub fn signs_total_document(&self) -> bool {
        byterange::signs_total_document(
            &self.byte_range_boundaries,
            self.document_length,
            &self.signature,
        )
    }
}

impl Default for SignatureValidationInfo {
    fn default() -> Self {
        Self {
            signature_status: SignatureStatus::NotVerified,
            certificate_state: CertificateState::Pending,
            signature_type: SignatureType::UnknownSignatureType,
            signer_name: None,
            signer_subject_dn: None,
            location: None,
            reason: None,
            hash_algorithm: HashAlgorithm::Unknown,
            signing_time: None,
            certificate_info: CertificateInfo::null(),
            signature: Vec::new(),
            byte_range_boundaries: Vec::new(),
            document_length: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found() {
        let info = SignatureValidationInfo::not_found();
        assert_eq!(info.signature_status(), SignatureStatus::NotFound);
        assert_eq!(info.certificate_status(), Some(CertificateStatus::NotVerified));
        assert!(info.certificate_info().is_null());
        assert!(!info.signs_total_document());
    }

    #[test]
    fn test_pending_certificate() {
        let info = SignatureValidationInfo::default();
        assert!(info.certificate_state().is_pending());
        assert_eq!(info.certificate_status(), None);
    }

    #[test]
    fn test_total_document_follows_length() {
        let mut info = SignatureValidationInfo {
            signature: vec![0x30, 0x82],
            byte_range_boundaries: vec![0, 100, 200, 300],
            document_length: 300,
            ..SignatureValidationInfo::default()
        };
        assert!(info.signs_total_document());
        info.document_length = 301;
        assert!(!info.signs_total_document());
    }
}
