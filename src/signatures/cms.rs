//! CMS (PKCS#7) SignedData for PDF signatures.
//!
//! Builds detached SignedData with `contentType`, `signingTime`,
//! `messageDigest` and `signingCertificateV2` signed attributes, and parses
//! the structures found in `/Contents`, which are padded with trailing zeros.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use der::asn1::{Any, GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Decode, Encode, SliceReader, Tag};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

use super::digest::digest;
use super::raw_signature::{self, KeyAlgorithm, SigningKey, OID_RSASSA_PSS};
use super::types::{HashAlgorithm, SignatureStatus};
use crate::error::{Error, Result};

pub const OID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
pub const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const OID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
const OID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const OID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
const OID_SIGNING_CERTIFICATE_V2: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
const OID_SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// Inputs for building a detached SignedData.
pub struct CmsSigner<'a> {
    /// DER of the signer certificate
    pub certificate: &'a [u8],
    /// Additional certificates to embed (intermediates, root)
    pub chain: &'a [Vec<u8>],
    pub digest_algorithm: HashAlgorithm,
    pub signing_time: DateTime<Utc>,
}

impl<'a> CmsSigner<'a> {
    /// Sign `content_digest` (the digest of the covered byte ranges) and
    /// return the DER encoded ContentInfo.
    pub fn sign(&self, content_digest: &[u8], key: &SigningKey) -> Result<Vec<u8>> {
        let cert = Certificate::from_der(self.certificate)?;
        let digest_oid = self.digest_algorithm.oid().ok_or_else(|| {
            Error::Unsupported(format!("digest algorithm {}", self.digest_algorithm))
        })?;
        let digest_alg = AlgorithmIdentifierOwned {
            oid: digest_oid,
            parameters: None,
        };

        let signed_attrs = self.signed_attributes(content_digest)?;
        let tbs = signed_attrs.to_der()?;
        let tbs_digest = digest(self.digest_algorithm, &tbs).ok_or_else(|| {
            Error::Unsupported(format!("digest algorithm {}", self.digest_algorithm))
        })?;
        let signature = key.sign_prehashed(self.digest_algorithm, &tbs_digest)?;

        let parameters = match key.algorithm() {
            KeyAlgorithm::Rsa => Some(Any::new(Tag::Null, Vec::<u8>::new())?),
            KeyAlgorithm::EcdsaP256 => None,
        };
        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: cert.tbs_certificate.issuer.clone(),
                serial_number: cert.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_alg.clone(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: key.signature_algorithm_oid(self.digest_algorithm)?,
                parameters,
            },
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        let mut certificates = vec![CertificateChoices::Certificate(cert)];
        for der in self.chain {
            if der.as_slice() == self.certificate {
                continue;
            }
            certificates.push(CertificateChoices::Certificate(Certificate::from_der(der)?));
        }

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(vec![digest_alg])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: OID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
        };
        let content_info = ContentInfo {
            content_type: OID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };
        log::debug!(
            "Built SignedData with {} ({} embedded certificates)",
            self.digest_algorithm,
            self.chain.len() + 1
        );
        Ok(content_info.to_der()?)
    }

    fn signed_attributes(&self, content_digest: &[u8]) -> Result<SetOfVec<Attribute>> {
        let cert_hash = digest(HashAlgorithm::Sha256, self.certificate)
            .ok_or_else(|| Error::Unsupported("SHA-256".to_string()))?;
        // SigningCertificateV2 { certs SEQUENCE OF ESSCertIDv2 { certHash } }
        let ess_cert_id = Any::new(Tag::Sequence, OctetString::new(cert_hash)?.to_der()?)?;
        let certs = Any::new(Tag::Sequence, ess_cert_id.to_der()?)?;
        let signing_certificate = Any::new(Tag::Sequence, certs.to_der()?)?;

        let attributes = vec![
            attribute(OID_CONTENT_TYPE, Any::encode_from(&OID_DATA)?)?,
            attribute(OID_SIGNING_TIME, encode_time(&self.signing_time)?)?,
            attribute(OID_MESSAGE_DIGEST, Any::new(Tag::OctetString, content_digest.to_vec())?)?,
            attribute(OID_SIGNING_CERTIFICATE_V2, signing_certificate)?,
        ];
        Ok(SetOfVec::try_from(attributes)?)
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn encode_time(time: &DateTime<Utc>) -> Result<Any> {
    let since_epoch = std::time::Duration::from_secs(time.timestamp().max(0) as u64);
    // UTCTime covers 1950-2049; later dates need GeneralizedTime.
    if time.year() < 2050 {
        Ok(Any::encode_from(&UtcTime::from_unix_duration(since_epoch)?)?)
    } else {
        Ok(Any::encode_from(&GeneralizedTime::from_unix_duration(since_epoch)?)?)
    }
}

/// The parts of a parsed SignedData the validator needs.
#[derive(Debug, Clone)]
pub struct SignedDataInfo {
    certificates: Vec<Vec<u8>>,
    signer_certificate: Option<Vec<u8>>,
    digest_algorithm: HashAlgorithm,
    signature_algorithm: ObjectIdentifier,
    signature: Vec<u8>,
    signed_attributes: Option<Vec<u8>>,
    message_digest: Option<Vec<u8>>,
    content_type: Option<ObjectIdentifier>,
    econtent_type: ObjectIdentifier,
    signing_time: Option<DateTime<Utc>>,
    encapsulated_content: Option<Vec<u8>>,
}

impl SignedDataInfo {
    /// Parse a ContentInfo wrapping SignedData. Bytes after the outer
    /// structure (the zero padding of the placeholder) are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes)?;
        let content_info = ContentInfo::decode(&mut reader)?;
        if content_info.content_type != OID_SIGNED_DATA {
            return Err(Error::Asn1(format!(
                "expected signedData, found content type {}",
                content_info.content_type
            )));
        }
        let signed_data = SignedData::from_der(&content_info.content.to_der()?)?;

        let embedded: Vec<Certificate> = signed_data
            .certificates
            .as_ref()
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|choice| match choice {
                        CertificateChoices::Certificate(cert) => Some(cert.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let signer = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::Asn1("SignedData has no SignerInfo".to_string()))?;

        let signer_certificate = embedded
            .iter()
            .find(|cert| matches_signer(cert, &signer.sid))
            .map(|cert| cert.to_der())
            .transpose()?;
        let certificates = embedded
            .iter()
            .map(|cert| cert.to_der())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut info = SignedDataInfo {
            certificates,
            signer_certificate,
            digest_algorithm: HashAlgorithm::from_oid(&signer.digest_alg.oid),
            signature_algorithm: signer.signature_algorithm.oid,
            signature: signer.signature.as_bytes().to_vec(),
            signed_attributes: None,
            message_digest: None,
            content_type: None,
            econtent_type: signed_data.encap_content_info.econtent_type,
            signing_time: None,
            encapsulated_content: None,
        };

        if let Some(econtent) = &signed_data.encap_content_info.econtent {
            let octets = OctetString::from_der(&econtent.to_der()?)?;
            info.encapsulated_content = Some(octets.as_bytes().to_vec());
        }

        if let Some(attrs) = &signer.signed_attrs {
            info.signed_attributes = Some(attrs.to_der()?);
            for attr in attrs.iter() {
                let Some(value) = attr.values.iter().next() else {
                    continue;
                };
                if attr.oid == OID_MESSAGE_DIGEST {
                    let digest = OctetString::from_der(&value.to_der()?)?;
                    info.message_digest = Some(digest.as_bytes().to_vec());
                } else if attr.oid == OID_CONTENT_TYPE {
                    info.content_type = Some(ObjectIdentifier::from_der(&value.to_der()?)?);
                } else if attr.oid == OID_SIGNING_TIME {
                    let time = Time::from_der(&value.to_der()?)?;
                    info.signing_time = Utc
                        .timestamp_opt(time.to_unix_duration().as_secs() as i64, 0)
                        .single();
                }
            }
        }

        Ok(info)
    }

    /// Check the signature against the digest of the signed content.
    ///
    /// With signed attributes, the `messageDigest` attribute must equal
    /// `content_digest` and the signature covers the attributes; without
    /// them, the signature covers `content_digest` directly.
    pub fn verify(&self, content_digest: &[u8]) -> SignatureStatus {
        let Some(cert_der) = &self.signer_certificate else {
            log::warn!("Signer certificate not embedded in SignedData");
            return SignatureStatus::GenericError;
        };
        if self.signature_algorithm == OID_RSASSA_PSS {
            log::warn!("RSASSA-PSS signatures are not supported");
            return SignatureStatus::GenericError;
        }
        let (spki, key_algorithm) = match signer_public_key(cert_der) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Unusable signer public key: {}", e);
                return SignatureStatus::GenericError;
            },
        };

        let signed_digest = match &self.signed_attributes {
            Some(attrs) => {
                if self.content_type.is_some_and(|oid| oid != self.econtent_type) {
                    log::debug!("contentType attribute does not match encapsulated content type");
                    return SignatureStatus::Invalid;
                }
                if self.message_digest.as_deref() != Some(content_digest) {
                    return SignatureStatus::DigestMismatch;
                }
                match digest(self.digest_algorithm, attrs) {
                    Some(d) => d,
                    None => return SignatureStatus::GenericError,
                }
            },
            None => content_digest.to_vec(),
        };

        match raw_signature::verify_prehashed(
            &spki,
            key_algorithm,
            self.digest_algorithm,
            &signed_digest,
            &self.signature,
        ) {
            Ok(true) => SignatureStatus::Valid,
            Ok(false) => SignatureStatus::Invalid,
            Err(Error::Unsupported(msg)) => {
                log::warn!("Unsupported signature: {}", msg);
                SignatureStatus::GenericError
            },
            Err(e) => {
                log::debug!("Signature could not be decoded: {}", e);
                SignatureStatus::DecodingError
            },
        }
    }

    /// All certificates embedded in the SignedData, DER encoded.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    /// DER of the certificate identified by the SignerInfo.
    pub fn signer_certificate(&self) -> Option<&[u8]> {
        self.signer_certificate.as_deref()
    }

    pub fn digest_algorithm(&self) -> HashAlgorithm {
        self.digest_algorithm
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.signing_time
    }

    /// Encapsulated content, present for `adbe.pkcs7.sha1` signatures.
    pub fn encapsulated_content(&self) -> Option<&[u8]> {
        self.encapsulated_content.as_deref()
    }
}

fn matches_signer(cert: &Certificate, sid: &SignerIdentifier) -> bool {
    match sid {
        SignerIdentifier::IssuerAndSerialNumber(isn) => {
            isn.issuer == cert.tbs_certificate.issuer
                && isn.serial_number == cert.tbs_certificate.serial_number
        },
        SignerIdentifier::SubjectKeyIdentifier(ski) => cert
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .filter(|ext| ext.extn_id == OID_SUBJECT_KEY_IDENTIFIER)
            .filter_map(|ext| OctetString::from_der(ext.extn_value.as_bytes()).ok())
            .any(|key_id| key_id.as_bytes() == ski.0.as_bytes()),
    }
}

fn signer_public_key(cert_der: &[u8]) -> Result<(Vec<u8>, KeyAlgorithm)> {
    let cert = Certificate::from_der(cert_der)?;
    let spki = &cert.tbs_certificate.subject_public_key_info;
    let curve = spki
        .algorithm
        .parameters
        .as_ref()
        .and_then(|p| p.decode_as::<ObjectIdentifier>().ok());
    let algorithm = KeyAlgorithm::from_oid(&spki.algorithm.oid, curve)
        .ok_or_else(|| Error::Unsupported(format!("public key algorithm {}", spki.algorithm.oid)))?;
    Ok((spki.to_der()?, algorithm))
}
