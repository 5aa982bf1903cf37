//! Raw signature primitives: RSA PKCS#1 v1.5 and ECDSA P-256 over a precomputed digest.

use der::asn1::ObjectIdentifier;
use md5::Md5;
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use zeroize::Zeroizing;

use super::types::HashAlgorithm;
use crate::error::{Error, Result};

pub(crate) const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
pub(crate) const OID_RSASSA_PSS: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.10");
pub(crate) const OID_EC_PUBLIC_KEY: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
/// Named curve prime256v1 (secp256r1).
const OID_PRIME256V1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const OID_ECDSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");

/// Key algorithm family, taken from a SubjectPublicKeyInfo or PrivateKeyInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    EcdsaP256,
}

impl KeyAlgorithm {
    /// Classify a key from its algorithm OID and, for EC keys, the named
    /// curve carried in the algorithm parameters. Curves other than P-256
    /// are not supported.
    pub fn from_oid(oid: &ObjectIdentifier, curve: Option<ObjectIdentifier>) -> Option<Self> {
        if *oid == OID_RSA_ENCRYPTION {
            Some(KeyAlgorithm::Rsa)
        } else if *oid == OID_EC_PUBLIC_KEY && curve == Some(OID_PRIME256V1) {
            Some(KeyAlgorithm::EcdsaP256)
        } else {
            None
        }
    }
}

fn pkcs1v15_scheme(hash: HashAlgorithm) -> Result<Pkcs1v15Sign> {
    Ok(match hash {
        HashAlgorithm::Md5 => Pkcs1v15Sign::new::<Md5>(),
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        HashAlgorithm::Sha224 => Pkcs1v15Sign::new::<Sha224>(),
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        other => return Err(Error::Unsupported(format!("RSA signatures with {}", other))),
    })
}

/// Verify `signature` over the precomputed `digest` with the key in `spki_der`.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify and
/// an error when the key or signature cannot be decoded.
pub fn verify_prehashed(
    spki_der: &[u8],
    key_algorithm: KeyAlgorithm,
    hash: HashAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool> {
    match key_algorithm {
        KeyAlgorithm::Rsa => {
            let key = RsaPublicKey::from_public_key_der(spki_der)
                .map_err(|e| Error::Key(format!("invalid RSA public key: {}", e)))?;
            Ok(key.verify(pkcs1v15_scheme(hash)?, digest, signature).is_ok())
        },
        KeyAlgorithm::EcdsaP256 => {
            let key = p256::ecdsa::VerifyingKey::from_public_key_der(spki_der)
                .map_err(|e| Error::Key(format!("invalid P-256 public key: {}", e)))?;
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|e| Error::Asn1(format!("invalid ECDSA signature: {}", e)))?;
            Ok(key.verify_prehash(digest, &sig).is_ok())
        },
    }
}

/// Key and digest algorithms named by a signature algorithm OID, as used
/// in certificates, CRLs and OCSP responses.
pub fn signature_algorithms(oid: &ObjectIdentifier) -> Option<(KeyAlgorithm, HashAlgorithm)> {
    let (key, hash) = match oid.to_string().as_str() {
        "1.2.840.113549.1.1.4" => (KeyAlgorithm::Rsa, HashAlgorithm::Md5),
        "1.2.840.113549.1.1.5" => (KeyAlgorithm::Rsa, HashAlgorithm::Sha1),
        "1.2.840.113549.1.1.14" => (KeyAlgorithm::Rsa, HashAlgorithm::Sha224),
        "1.2.840.113549.1.1.11" => (KeyAlgorithm::Rsa, HashAlgorithm::Sha256),
        "1.2.840.113549.1.1.12" => (KeyAlgorithm::Rsa, HashAlgorithm::Sha384),
        "1.2.840.113549.1.1.13" => (KeyAlgorithm::Rsa, HashAlgorithm::Sha512),
        "1.2.840.10045.4.1" => (KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha1),
        "1.2.840.10045.4.3.1" => (KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha224),
        "1.2.840.10045.4.3.2" => (KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha256),
        "1.2.840.10045.4.3.3" => (KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha384),
        "1.2.840.10045.4.3.4" => (KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha512),
        _ => return None,
    };
    Some((key, hash))
}

/// Verify `signature` over `message` (e.g. a TBSCertificate) with the
/// algorithm named by the dotted `signature_oid`.
pub fn verify_signed_data(
    spki_der: &[u8],
    signature_oid: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let oid = ObjectIdentifier::new(signature_oid)
        .map_err(|e| Error::Asn1(format!("bad signature algorithm {}: {}", signature_oid, e)))?;
    let (key_algorithm, hash) = signature_algorithms(&oid)
        .ok_or_else(|| Error::Unsupported(format!("signature algorithm {}", signature_oid)))?;
    let digest = super::digest::digest(hash, message)
        .ok_or_else(|| Error::Unsupported(format!("digest {}", hash)))?;
    verify_prehashed(spki_der, key_algorithm, hash, &digest, signature)
}

/// A private signing key loaded from PKCS#8.
pub enum SigningKey {
    Rsa(Box<RsaPrivateKey>),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl SigningKey {
    /// Decode an unencrypted PKCS#8 `PrivateKeyInfo`.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = pkcs8::PrivateKeyInfo::try_from(der)
            .map_err(|e| Error::Key(format!("invalid PKCS#8 key: {}", e)))?;
        let curve = info.algorithm.parameters.and_then(|p| p.decode_as::<ObjectIdentifier>().ok());
        match KeyAlgorithm::from_oid(&info.algorithm.oid, curve) {
            Some(KeyAlgorithm::Rsa) => {
                let key = RsaPrivateKey::from_pkcs8_der(der)
                    .map_err(|e| Error::Key(format!("invalid RSA key: {}", e)))?;
                Ok(SigningKey::Rsa(Box::new(key)))
            },
            Some(KeyAlgorithm::EcdsaP256) => {
                let key = p256::ecdsa::SigningKey::from_pkcs8_der(der)
                    .map_err(|e| Error::Key(format!("invalid P-256 key: {}", e)))?;
                Ok(SigningKey::EcdsaP256(key))
            },
            None => Err(Error::Unsupported(format!(
                "private key algorithm {}{}",
                info.algorithm.oid,
                curve.map(|c| format!(" on curve {}", c)).unwrap_or_default()
            ))),
        }
    }

    /// Decrypt an `EncryptedPrivateKeyInfo`.
    ///
    /// A decryption failure is reported as [`KeyDecryptError::BadPassword`]
    /// so callers can tell a wrong passphrase from a corrupt file.
    pub fn from_encrypted_pkcs8_der(
        der: &[u8],
        password: &[u8],
    ) -> std::result::Result<Self, KeyDecryptError> {
        let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(der)
            .map_err(|e| KeyDecryptError::Malformed(e.to_string()))?;
        let document = encrypted
            .decrypt(password)
            .map_err(|_| KeyDecryptError::BadPassword)?;
        let plain = Zeroizing::new(document.as_bytes().to_vec());
        Self::from_pkcs8_der(&plain).map_err(|e| KeyDecryptError::Malformed(e.to_string()))
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            SigningKey::Rsa(_) => KeyAlgorithm::Rsa,
            SigningKey::EcdsaP256(_) => KeyAlgorithm::EcdsaP256,
        }
    }

    /// Sign a precomputed digest; ECDSA output is DER encoded.
    pub fn sign_prehashed(&self, hash: HashAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        match self {
            SigningKey::Rsa(key) => key
                .sign(pkcs1v15_scheme(hash)?, digest)
                .map_err(|e| Error::Key(format!("RSA signing failed: {}", e))),
            SigningKey::EcdsaP256(key) => {
                let sig: p256::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| Error::Key(format!("ECDSA signing failed: {}", e)))?;
                Ok(sig.to_der().as_bytes().to_vec())
            },
        }
    }

    /// The CMS `signatureAlgorithm` identifier for this key and digest.
    pub fn signature_algorithm_oid(&self, hash: HashAlgorithm) -> Result<ObjectIdentifier> {
        match self {
            SigningKey::Rsa(_) => Ok(OID_RSA_ENCRYPTION),
            SigningKey::EcdsaP256(_) => match hash {
                HashAlgorithm::Sha256 => Ok(OID_ECDSA_SHA256),
                HashAlgorithm::Sha384 => Ok(OID_ECDSA_SHA384),
                HashAlgorithm::Sha512 => Ok(OID_ECDSA_SHA512),
                other => Err(Error::Unsupported(format!("ECDSA with {}", other))),
            },
        }
    }
}

/// Why an encrypted private key could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum KeyDecryptError {
    #[error("wrong password")]
    BadPassword,
    #[error("malformed encrypted key: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::digest::digest;

    fn key_der(name: &str) -> Vec<u8> {
        let path = format!("{}/tests/fixtures/keystore/{}", env!("CARGO_MANIFEST_DIR"), name);
        let pem = std::fs::read(path).unwrap();
        der::pem::decode_vec(&pem).unwrap().1
    }

    fn spki_of(cert: &str) -> Vec<u8> {
        use x509_parser::prelude::*;
        let path = format!("{}/tests/fixtures/keystore/{}", env!("CARGO_MANIFEST_DIR"), cert);
        let pem = std::fs::read(path).unwrap();
        let (_, pem) = x509_parser::pem::parse_x509_pem(&pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&pem.contents).unwrap();
        cert.public_key().raw.to_vec()
    }

    #[test]
    fn test_key_algorithm_needs_p256_curve() {
        let secp384r1 = ObjectIdentifier::new_unwrap("1.3.132.0.34");
        assert_eq!(KeyAlgorithm::from_oid(&OID_RSA_ENCRYPTION, None), Some(KeyAlgorithm::Rsa));
        assert_eq!(
            KeyAlgorithm::from_oid(&OID_EC_PUBLIC_KEY, Some(OID_PRIME256V1)),
            Some(KeyAlgorithm::EcdsaP256)
        );
        assert_eq!(KeyAlgorithm::from_oid(&OID_EC_PUBLIC_KEY, Some(secp384r1)), None);
        assert_eq!(KeyAlgorithm::from_oid(&OID_EC_PUBLIC_KEY, None), None);
        assert_eq!(KeyAlgorithm::from_oid(&OID_RSASSA_PSS, None), None);
    }

    #[test]
    fn test_rsa_sign_and_verify() {
        let key = SigningKey::from_pkcs8_der(&key_der("bob.key")).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::Rsa);
        let hash = digest(HashAlgorithm::Sha256, b"covered bytes").unwrap();
        let sig = key.sign_prehashed(HashAlgorithm::Sha256, &hash).unwrap();
        let spki = spki_of("bob.crt");
        let rsa = KeyAlgorithm::Rsa;
        assert!(verify_prehashed(&spki, rsa, HashAlgorithm::Sha256, &hash, &sig).unwrap());

        let other = digest(HashAlgorithm::Sha256, b"other bytes").unwrap();
        assert!(!verify_prehashed(&spki, rsa, HashAlgorithm::Sha256, &other, &sig).unwrap());
    }

    #[test]
    fn test_certificate_signature_verifies_with_issuer_key() {
        use x509_parser::prelude::*;
        let path = format!("{}/tests/fixtures/keystore/alice.crt", env!("CARGO_MANIFEST_DIR"));
        let pem = std::fs::read(path).unwrap();
        let (_, pem) = x509_parser::pem::parse_x509_pem(&pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&pem.contents).unwrap();
        let oid = cert.signature_algorithm.algorithm.to_id_string();
        let root_spki = spki_of("trusted/root-ca.crt");
        let ok = verify_signed_data(
            &root_spki,
            &oid,
            cert.tbs_certificate.as_ref(),
            &cert.signature_value.data,
        )
        .unwrap();
        assert!(ok);
        let wrong = verify_signed_data(
            &spki_of("bob.crt"),
            &oid,
            cert.tbs_certificate.as_ref(),
            &cert.signature_value.data,
        )
        .unwrap();
        assert!(!wrong);
    }

    #[test]
    fn test_encrypted_key_password() {
        let der = key_der("alice.key");
        assert!(matches!(
            SigningKey::from_encrypted_pkcs8_der(&der, b"wrong"),
            Err(KeyDecryptError::BadPassword)
        ));
        assert!(SigningKey::from_encrypted_pkcs8_der(&der, b"alice-secret").is_ok());
    }

    #[test]
    fn test_ecdsa_round_trip() {
        use pkcs8::EncodePublicKey;
        let secret = p256::ecdsa::SigningKey::from_slice(&[0x11; 32]).unwrap();
        let spki = secret.verifying_key().to_public_key_der().unwrap();
        let key = SigningKey::EcdsaP256(secret);
        let hash = digest(HashAlgorithm::Sha256, b"payload").unwrap();
        let sig = key.sign_prehashed(HashAlgorithm::Sha256, &hash).unwrap();
        assert!(verify_prehashed(
            spki.as_bytes(),
            KeyAlgorithm::EcdsaP256,
            HashAlgorithm::Sha256,
            &hash,
            &sig
        )
        .unwrap());
        assert_eq!(
            key.signature_algorithm_oid(HashAlgorithm::Sha256).unwrap(),
            OID_ECDSA_SHA256
        );
    }
}
