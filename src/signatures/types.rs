//! Digital signature types and data structures.
//!
//! This module defines the core enums and value types shared by the validator,
//! the signer and the crypto backends.

use bitflags::bitflags;
use der::asn1::ObjectIdentifier;

/// Hash algorithm recorded in, or requested for, a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// Algorithm not recognized
    #[default]
    Unknown,
    /// MD2 (recognized, never computed)
    Md2,
    /// MD5 (legacy)
    Md5,
    /// SHA-1 (deprecated, but still common in legacy PDFs)
    Sha1,
    /// SHA-224
    Sha224,
    /// SHA-256 (recommended)
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

pub(crate) const OID_MD2: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.2.2");
pub(crate) const OID_MD5: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.2.5");
pub(crate) const OID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
pub(crate) const OID_SHA224: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.4");
pub(crate) const OID_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
pub(crate) const OID_SHA384: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
pub(crate) const OID_SHA512: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

impl HashAlgorithm {
    /// Get the OID for this digest algorithm.
    pub fn oid(&self) -> Option<ObjectIdentifier> {
        match self {
            HashAlgorithm::Unknown => None,
            HashAlgorithm::Md2 => Some(OID_MD2),
            HashAlgorithm::Md5 => Some(OID_MD5),
            HashAlgorithm::Sha1 => Some(OID_SHA1),
            HashAlgorithm::Sha224 => Some(OID_SHA224),
            HashAlgorithm::Sha256 => Some(OID_SHA256),
            HashAlgorithm::Sha384 => Some(OID_SHA384),
            HashAlgorithm::Sha512 => Some(OID_SHA512),
        }
    }

    /// Map a digest algorithm OID back to the enum.
    pub fn from_oid(oid: &ObjectIdentifier) -> Self {
        [
            HashAlgorithm::Md2,
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha224,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ]
        .into_iter()
        .find(|alg| alg.oid().as_ref() == Some(oid))
        .unwrap_or(HashAlgorithm::Unknown)
    }

    /// Map an OpenPGP hash algorithm id (RFC 4880, 9.4).
    pub fn from_openpgp_id(id: u8) -> Self {
        match id {
            1 => HashAlgorithm::Md5,
            2 => HashAlgorithm::Sha1,
            8 => HashAlgorithm::Sha256,
            9 => HashAlgorithm::Sha384,
            10 => HashAlgorithm::Sha512,
            11 => HashAlgorithm::Sha224,
            _ => HashAlgorithm::Unknown,
        }
    }

    /// Parse a digest name such as `SHA256`, `sha-384` or `MD5`.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "MD2" => Some(HashAlgorithm::Md2),
            "MD5" => Some(HashAlgorithm::Md5),
            "SHA1" => Some(HashAlgorithm::Sha1),
            "SHA224" => Some(HashAlgorithm::Sha224),
            "SHA256" => Some(HashAlgorithm::Sha256),
            "SHA384" => Some(HashAlgorithm::Sha384),
            "SHA512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Unknown => "unknown",
            HashAlgorithm::Md2 => "MD2",
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha224 => "SHA-224",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature format, as named by the `/SubFilter` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    /// adbe.pkcs7.sha1 - PKCS#7 wrapping a SHA-1 digest of the ranges
    AdbePkcs7Sha1,
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    AdbePkcs7Detached,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    EtsiCadesDetached,
    /// g10c.pgp.signature.detached - detached OpenPGP signature
    G10cPgpSignatureDetached,
    /// A sub-filter this library does not understand
    UnknownSignatureType,
    /// A signature field without a value
    UnsignedSignatureField,
}

impl SignatureType {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> Option<&'static str> {
        match self {
            SignatureType::AdbePkcs7Sha1 => Some("adbe.pkcs7.sha1"),
            SignatureType::AdbePkcs7Detached => Some("adbe.pkcs7.detached"),
            SignatureType::EtsiCadesDetached => Some("ETSI.CAdES.detached"),
            SignatureType::G10cPgpSignatureDetached => Some("g10c.pgp.signature.detached"),
            SignatureType::UnknownSignatureType | SignatureType::UnsignedSignatureField => None,
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Self {
        match name {
            "adbe.pkcs7.sha1" => SignatureType::AdbePkcs7Sha1,
            "adbe.pkcs7.detached" => SignatureType::AdbePkcs7Detached,
            "ETSI.CAdES.detached" => SignatureType::EtsiCadesDetached,
            "g10c.pgp.signature.detached" => SignatureType::G10cPgpSignatureDetached,
            _ => SignatureType::UnknownSignatureType,
        }
    }

    /// Whether the signature is a CMS/PKCS#7 structure.
    pub fn is_cms(&self) -> bool {
        matches!(
            self,
            SignatureType::AdbePkcs7Sha1
                | SignatureType::AdbePkcs7Detached
                | SignatureType::EtsiCadesDetached
        )
    }
}

/// Outcome of the digest and signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureStatus {
    /// Signature matches the covered bytes
    Valid,
    /// Signature does not verify against the signer key
    Invalid,
    /// The covered bytes do not match the signed digest
    DigestMismatch,
    /// Signature bytes could not be decoded
    DecodingError,
    /// Any other failure
    GenericError,
    /// The field carries no signature
    NotFound,
    /// Verification was not performed
    NotVerified,
}

/// Outcome of the certificate trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateStatus {
    /// Chain ends in a trust anchor and no check failed
    Trusted,
    /// Chain ends in a certificate that is not a trust anchor
    UntrustedIssuer,
    /// The issuer could not be found
    UnknownIssuer,
    /// A certificate in the chain has been revoked
    Revoked,
    /// A certificate in the chain is outside its validity window
    Expired,
    /// Any other failure
    GenericError,
    /// Trust evaluation was not requested
    NotVerified,
}

/// Two-phase certificate verdict: pending until the trust step finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CertificateState {
    /// Trust evaluation has not completed
    #[default]
    Pending,
    /// Terminal verdict
    Resolved(CertificateStatus),
}

impl CertificateState {
    /// The terminal status, if resolved.
    pub fn status(&self) -> Option<CertificateStatus> {
        match self {
            CertificateState::Pending => None,
            CertificateState::Resolved(status) => Some(*status),
        }
    }

    /// Whether trust evaluation is still in progress.
    pub fn is_pending(&self) -> bool {
        matches!(self, CertificateState::Pending)
    }
}

/// Annotation color, as used for signature text, borders and backgrounds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AnnotationColor {
    /// No color (transparent)
    #[default]
    None,
    /// Grayscale (1 component)
    Gray(f32),
    /// RGB color (3 components)
    Rgb(f32, f32, f32),
    /// CMYK color (4 components)
    Cmyk(f32, f32, f32, f32),
}

impl AnnotationColor {
    /// Create black color.
    pub fn black() -> Self {
        Self::Gray(0.0)
    }

    /// Create white color.
    pub fn white() -> Self {
        Self::Gray(1.0)
    }

    /// Components as a PDF array (`/MK` entries), empty for no color.
    pub fn components(&self) -> Vec<f32> {
        match *self {
            AnnotationColor::None => Vec::new(),
            AnnotationColor::Gray(g) => vec![g],
            AnnotationColor::Rgb(r, g, b) => vec![r, g, b],
            AnnotationColor::Cmyk(c, m, y, k) => vec![c, m, y, k],
        }
    }
}

bitflags! {
    /// Options controlling signature validation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValidateOptions: u32 {
        /// Evaluate the signer certificate's trust chain
        const VERIFY_CERTIFICATE = 0x01;
        /// Ignore a cached result for the field
        const FORCE_REVALIDATION = 0x02;
        /// Skip online OCSP revocation checks
        const WITHOUT_OCSP_REVOCATION_CHECK = 0x04;
        /// Fetch missing issuers from the authority information access extension
        const USE_AIA_CERT_FETCH = 0x08;
    }
}

impl Default for ValidateOptions {
    fn default() -> Self {
        ValidateOptions::VERIFY_CERTIFICATE
    }
}

/// Capabilities a backend may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFeature {
    /// The backend prompts for the key passphrase itself
    AsksPassphrase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_algorithm_from_name() {
        assert_eq!(HashAlgorithm::from_name("SHA256"), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::from_name("sha-384"), Some(HashAlgorithm::Sha384));
        assert_eq!(HashAlgorithm::from_name(" md5 "), Some(HashAlgorithm::Md5));
        let sha512 = HashAlgorithm::Sha512;
        assert_eq!(HashAlgorithm::from_name(sha512.name()), Some(sha512));
        assert_eq!(HashAlgorithm::from_name("whirlpool"), None);
    }

    #[test]
    fn test_hash_algorithm_oid_round_trip() {
        for alg in [
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha224,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            let oid = alg.oid().unwrap();
            assert_eq!(HashAlgorithm::from_oid(&oid), alg);
        }
        assert_eq!(HashAlgorithm::Unknown.oid(), None);
    }

    #[test]
    fn test_openpgp_hash_ids() {
        assert_eq!(HashAlgorithm::from_openpgp_id(8), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::from_openpgp_id(2), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::from_openpgp_id(99), HashAlgorithm::Unknown);
    }

    #[test]
    fn test_sub_filter_names() {
        assert_eq!(SignatureType::AdbePkcs7Detached.as_pdf_name(), Some("adbe.pkcs7.detached"));
        assert_eq!(
            SignatureType::from_pdf_name("ETSI.CAdES.detached"),
            SignatureType::EtsiCadesDetached
        );
        assert_eq!(
            SignatureType::from_pdf_name("adbe.x509.rsa_sha1"),
            SignatureType::UnknownSignatureType
        );
        assert!(!SignatureType::G10cPgpSignatureDetached.is_cms());
    }

    #[test]
    fn test_certificate_state() {
        let state = CertificateState::default();
        assert!(state.is_pending());
        assert_eq!(state.status(), None);
        let resolved = CertificateState::Resolved(CertificateStatus::Revoked);
        assert_eq!(resolved.status(), Some(CertificateStatus::Revoked));
    }

    #[test]
    fn test_validate_options_default() {
        let opts = ValidateOptions::default();
        assert!(opts.contains(ValidateOptions::VERIFY_CERTIFICATE));
        assert!(!opts.contains(ValidateOptions::FORCE_REVALIDATION));
    }

    #[test]
    fn test_color_components() {
        assert!(AnnotationColor::None.components().is_empty());
        assert_eq!(AnnotationColor::Rgb(1.0, 0.0, 0.5).components(), vec![1.0, 0.0, 0.5]);
    }
}
