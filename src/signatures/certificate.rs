//! Certificate model.
//!
//! [`CertificateInfo`] is an immutable snapshot of one certificate's public
//! facts, built either from an X.509 DER certificate or from an OpenPGP key
//! listing. An instance is either fully populated or the null sentinel.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use super::backend::Backends;
use super::secret::SecretString;
use super::types::HashAlgorithm;
use crate::error::{Error, Result};

/// Kind of certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CertificateType {
    /// X.509 certificate
    #[default]
    X509,
    /// OpenPGP key
    Pgp,
}

/// Where the private key of a signing certificate lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyLocation {
    /// Not known (certificates extracted from signatures)
    #[default]
    Unknown,
    /// Somewhere else, e.g. a key stub without secret material
    Other,
    /// Stored on this computer
    Computer,
    /// Stored on a smart card or similar token
    HardwareToken,
}

/// Public key algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PublicKeyType {
    /// RSA
    Rsa,
    /// DSA
    Dsa,
    /// Elliptic curve (ECDSA, EdDSA)
    Ec,
    /// Anything else
    #[default]
    Other,
}

bitflags! {
    /// X.509 key usage bits, in the byte layout of the extension.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyUsage: u32 {
        const DIGITAL_SIGNATURE = 0x80;
        const NON_REPUDIATION = 0x40;
        const KEY_ENCIPHERMENT = 0x20;
        const DATA_ENCIPHERMENT = 0x10;
        const KEY_AGREEMENT = 0x08;
        const KEY_CERT_SIGN = 0x04;
        const CRL_SIGN = 0x02;
        const ENCIPHER_ONLY = 0x01;
    }
}

/// Identity fields of a subject or issuer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityInfo {
    /// Common name (CN)
    pub common_name: Option<String>,
    /// Organization (O)
    pub organization: Option<String>,
    /// E-mail address
    pub email: Option<String>,
    /// Full distinguished name
    pub distinguished_name: Option<String>,
}

/// Validity window of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Validity {
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
}

impl Validity {
    /// Whether `at` lies inside the window (both ends inclusive).
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Public key facts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublicKeyInfo {
    /// Algorithm family
    pub key_type: PublicKeyType,
    /// Key strength in bits
    pub strength_bits: u32,
    /// Raw public key bytes
    pub public_key: Vec<u8>,
}

/// Immutable snapshot of one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateInfo {
    nickname: String,
    certificate_type: CertificateType,
    key_location: KeyLocation,
    version: u32,
    subject: EntityInfo,
    issuer: EntityInfo,
    serial_number: Vec<u8>,
    validity: Validity,
    public_key: PublicKeyInfo,
    certificate_der: Vec<u8>,
    key_usage: KeyUsage,
    self_signed: bool,
    qualified: bool,
    is_null: bool,
}

const OID_QC_STATEMENTS: &str = "1.3.6.1.5.5.7.1.3";
/// DER encoding of the ETSI QcCompliance statement id 0.4.0.1862.1.1.
const QC_COMPLIANCE_DER: [u8; 8] = [0x06, 0x06, 0x04, 0x00, 0x8E, 0x46, 0x01, 0x01];

impl CertificateInfo {
    /// The null sentinel: no certificate.
    pub fn null() -> Self {
        Self {
            is_null: true,
            ..Default::default()
        }
    }

    /// Build from a DER-encoded X.509 certificate.
    ///
    /// Either every field is populated or an error is returned.
    pub fn from_der(nickname: impl Into<String>, der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)?;

        let spki = cert.public_key();
        let (key_type, strength_bits) = match spki.parsed() {
            Ok(PublicKey::RSA(rsa)) => (PublicKeyType::Rsa, rsa.key_size() as u32),
            Ok(PublicKey::EC(point)) => (PublicKeyType::Ec, point.key_size() as u32),
            Ok(PublicKey::DSA(y)) => (PublicKeyType::Dsa, (y.len() * 8) as u32),
            _ => (PublicKeyType::Other, (spki.subject_public_key.data.len() * 8) as u32),
        };

        let mut subject = entity_info(cert.subject());
        if subject.email.is_none() {
            subject.email = alternative_name_email(&cert);
        }

        let key_usage = match cert.key_usage() {
            Ok(Some(ext)) => key_usage_flags(ext.value),
            _ => KeyUsage::empty(),
        };

        let qualified = cert.extensions().iter().any(|ext| {
            ext.oid.to_id_string() == OID_QC_STATEMENTS
                && ext
                    .value
                    .windows(QC_COMPLIANCE_DER.len())
                    .any(|w| w == QC_COMPLIANCE_DER)
        });

        Ok(Self {
            nickname: nickname.into(),
            certificate_type: CertificateType::X509,
            key_location: KeyLocation::Unknown,
            version: cert.version().0 + 1,
            subject,
            issuer: entity_info(cert.issuer()),
            serial_number: cert.raw_serial().to_vec(),
            validity: Validity {
                not_before: asn1_time(cert.validity().not_before)?,
                not_after: asn1_time(cert.validity().not_after)?,
            },
            public_key: PublicKeyInfo {
                key_type,
                strength_bits,
                public_key: spki.subject_public_key.data.to_vec(),
            },
            certificate_der: der.to_vec(),
            key_usage,
            self_signed: cert.subject().as_raw() == cert.issuer().as_raw(),
            qualified,
            is_null: false,
        })
    }

    /// Build from an OpenPGP key description.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_pgp(
        fingerprint: String,
        user_id: &str,
        key_location: KeyLocation,
        validity: Validity,
        public_key: PublicKeyInfo,
        exported_key: Vec<u8>,
        key_usage: KeyUsage,
        qualified: bool,
    ) -> Self {
        let (name, email) = split_user_id(user_id);
        let subject = EntityInfo {
            common_name: name,
            organization: None,
            email,
            distinguished_name: Some(user_id.to_string()),
        };
        Self {
            serial_number: fingerprint.as_bytes().to_vec(),
            nickname: fingerprint,
            certificate_type: CertificateType::Pgp,
            key_location,
            version: 4,
            issuer: subject.clone(),
            subject,
            validity,
            public_key,
            certificate_der: exported_key,
            key_usage,
            self_signed: true,
            qualified,
            is_null: false,
        }
    }

    /// Same certificate with the key location a backend reported for it.
    pub(crate) fn with_key_location(mut self, location: KeyLocation) -> Self {
        self.key_location = location;
        self
    }

    /// Nickname (keystore) or fingerprint (OpenPGP) identifying the certificate.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn certificate_type(&self) -> CertificateType {
        self.certificate_type
    }

    pub fn key_location(&self) -> KeyLocation {
        self.key_location
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn subject_info(&self) -> &EntityInfo {
        &self.subject
    }

    pub fn issuer_info(&self) -> &EntityInfo {
        &self.issuer
    }

    pub fn serial_number(&self) -> &[u8] {
        &self.serial_number
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn public_key_info(&self) -> &PublicKeyInfo {
        &self.public_key
    }

    /// DER certificate (X.509) or exported key (OpenPGP).
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn key_usage(&self) -> KeyUsage {
        self.key_usage
    }

    pub fn is_self_signed(&self) -> bool {
        self.self_signed
    }

    pub fn is_qualified(&self) -> bool {
        self.qualified
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// Check a passphrase by producing a throw-away signature with the
    /// active backend.
    pub fn check_password(&self, backends: &Backends, password: &SecretString) -> bool {
        if self.is_null {
            return false;
        }
        let Some(backend) = backends.active_backend() else {
            return false;
        };
        let handle = backend.create_signing_handle(&self.nickname, HashAlgorithm::Sha256);
        let mut handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                log::debug!("check_password: no signing handle for {}: {}", self.nickname, e);
                return false;
            },
        };
        handle.update(b"test");
        handle.sign_detached(password).is_ok()
    }
}

fn asn1_time(time: ASN1Time) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| Error::Certificate(format!("timestamp out of range: {}", time)))
}

fn first_attr<'a>(mut iter: impl Iterator<Item = &'a AttributeTypeAndValue<'a>>) -> Option<String> {
    iter.next().and_then(|attr| attr.as_str().ok()).map(str::to_string)
}

pub(crate) fn entity_info(name: &X509Name<'_>) -> EntityInfo {
    EntityInfo {
        common_name: first_attr(name.iter_common_name()),
        organization: first_attr(name.iter_organization()),
        email: first_attr(name.iter_email()),
        distinguished_name: Some(name.to_string()),
    }
}

fn alternative_name_email(cert: &X509Certificate<'_>) -> Option<String> {
    let ext = cert.subject_alternative_name().ok().flatten()?;
    ext.value.general_names.iter().find_map(|name| match name {
        GeneralName::RFC822Name(email) => Some(email.to_string()),
        _ => None,
    })
}

fn key_usage_flags(ku: &x509_parser::extensions::KeyUsage) -> KeyUsage {
    let mut flags = KeyUsage::empty();
    flags.set(KeyUsage::DIGITAL_SIGNATURE, ku.digital_signature());
    flags.set(KeyUsage::NON_REPUDIATION, ku.non_repudiation());
    flags.set(KeyUsage::KEY_ENCIPHERMENT, ku.key_encipherment());
    flags.set(KeyUsage::DATA_ENCIPHERMENT, ku.data_encipherment());
    flags.set(KeyUsage::KEY_AGREEMENT, ku.key_agreement());
    flags.set(KeyUsage::KEY_CERT_SIGN, ku.key_cert_sign());
    flags.set(KeyUsage::CRL_SIGN, ku.crl_sign());
    flags.set(KeyUsage::ENCIPHER_ONLY, ku.encipher_only());
    flags
}

/// Split `Name (comment) <email>` into its name and e-mail parts.
fn split_user_id(user_id: &str) -> (Option<String>, Option<String>) {
    let email = match (user_id.rfind('<'), user_id.rfind('>')) {
        (Some(start), Some(end)) if start < end => Some(user_id[start + 1..end].to_string()),
        _ => None,
    };
    let name_end = user_id.find(['<', '(']).unwrap_or(user_id.len());
    let name = user_id[..name_end].trim();
    let name = (!name.is_empty()).then(|| name.to_string());
    (name, email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> Vec<u8> {
        let path = format!("{}/tests/fixtures/keystore/{}", env!("CARGO_MANIFEST_DIR"), name);
        let pem = std::fs::read(path).unwrap();
        let (_, pem) = x509_parser::pem::parse_x509_pem(&pem).unwrap();
        pem.contents
    }

    #[test]
    fn test_null_certificate() {
        let cert = CertificateInfo::null();
        assert!(cert.is_null());
        assert!(cert.nickname().is_empty());
        assert_eq!(cert.key_usage(), KeyUsage::empty());
    }

    #[test]
    fn test_from_der_populates_everything() {
        let der = fixture("alice.crt");
        let cert = CertificateInfo::from_der("alice", &der).unwrap();
        assert!(!cert.is_null());
        assert_eq!(cert.nickname(), "alice");
        assert_eq!(cert.version(), 3);
        assert_eq!(cert.subject_info().common_name.as_deref(), Some("Alice Signer"));
        assert_eq!(cert.subject_info().email.as_deref(), Some("alice@example.org"));
        assert_eq!(cert.issuer_info().common_name.as_deref(), Some("Oxide Test Root CA"));
        assert_eq!(cert.public_key_info().key_type, PublicKeyType::Rsa);
        assert_eq!(cert.public_key_info().strength_bits, 2048);
        assert!(cert.key_usage().contains(KeyUsage::DIGITAL_SIGNATURE | KeyUsage::NON_REPUDIATION));
        assert!(!cert.is_self_signed());
        assert_eq!(cert.certificate_der(), der.as_slice());
    }

    #[test]
    fn test_self_signed_detection() {
        let cert = CertificateInfo::from_der("mallory", &fixture("mallory.crt")).unwrap();
        assert!(cert.is_self_signed());
    }

    #[test]
    fn test_copy_is_equal_and_independent() {
        let cert = CertificateInfo::from_der("alice", &fixture("alice.crt")).unwrap();
        let copy = cert.clone();
        assert_eq!(copy, cert);
        let relocated = copy.with_key_location(KeyLocation::HardwareToken);
        assert_eq!(cert.key_location(), KeyLocation::Unknown);
        assert_eq!(relocated.key_location(), KeyLocation::HardwareToken);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(CertificateInfo::from_der("x", b"not a certificate").is_err());
    }

    #[test]
    fn test_validity_contains() {
        let cert = CertificateInfo::from_der("alice", &fixture("alice.crt")).unwrap();
        let validity = cert.validity();
        assert!(validity.contains(validity.not_before));
        assert!(!validity.contains(validity.not_after + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_split_user_id() {
        assert_eq!(
            split_user_id("Alice Example (work) <alice@example.org>"),
            (Some("Alice Example".to_string()), Some("alice@example.org".to_string()))
        );
        assert_eq!(split_user_id("<only@mail>"), (None, Some("only@mail".to_string())));
    }
}
