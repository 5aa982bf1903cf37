//! X.509 keystore backend.
//!
//! The keystore is a directory:
//!
//! ```text
//! keystore/
//!   alice.crt        signer certificate (PEM or DER, may carry intermediates)
//!   alice.key        PKCS#8 private key, optionally encrypted
//!   ca-2024.crl      certificate revocation lists
//!   trusted/         trust anchors
//! ```
//!
//! A certificate is offered for signing when a `.key` file with the same
//! stem exists; the stem is the certificate's nickname.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use super::registry::PasswordCallback;
use super::CertificateCheck;
use crate::error::{Error, Result};
use crate::signatures::certificate::{CertificateInfo, KeyLocation};
use crate::signatures::cms::{CmsSigner, SignedDataInfo};
use crate::signatures::digest::{digest, DigestContext};
use crate::signatures::ocsp::{certificates_from_bytes, OcspClient};
use crate::signatures::raw_signature::{KeyDecryptError, SigningKey};
use crate::signatures::result::SigningError;
use crate::signatures::secret::SecretString;
use crate::signatures::trust::TrustStore;
use crate::signatures::types::{CertificateStatus, HashAlgorithm, SignatureStatus, SignatureType};

const CERTIFICATE_EXTENSIONS: &[&str] = &["crt", "pem", "cer", "der"];

/// File keystore backend.
#[derive(Clone)]
pub struct KeystoreBackend {
    dir: PathBuf,
    password_callback: Option<PasswordCallback>,
    client: OcspClient,
}

impl fmt::Debug for KeystoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreBackend")
            .field("dir", &self.dir)
            .field("password_callback", &self.password_callback.is_some())
            .finish()
    }
}

/// A certificate file and its optional key.
struct Entry {
    nickname: String,
    certificate: Vec<u8>,
    chain: Vec<Vec<u8>>,
    key_path: Option<PathBuf>,
}

impl KeystoreBackend {
    pub fn new(
        dir: impl Into<PathBuf>,
        password_callback: Option<PasswordCallback>,
        client: OcspClient,
    ) -> Self {
        Self {
            dir: dir.into(),
            password_callback,
            client,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn signing_certificates(&self) -> Vec<CertificateInfo> {
        let entries = match self.entries() {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot read keystore {}: {}", self.dir.display(), e);
                return Vec::new();
            },
        };
        entries
            .into_iter()
            .filter(|entry| entry.key_path.is_some())
            .filter_map(|entry| {
                match CertificateInfo::from_der(entry.nickname.as_str(), &entry.certificate) {
                    Ok(info) => Some(info.with_key_location(KeyLocation::Computer)),
                    Err(e) => {
                        log::warn!("Skipping certificate {}: {}", entry.nickname, e);
                        None
                    },
                }
            })
            .collect()
    }

    /// Anchors from `trusted/`, intermediates and CRLs from the top level.
    pub fn trust_store(&self) -> TrustStore {
        let mut store = TrustStore::new();
        for path in list_files(&self.dir.join("trusted")) {
            if has_extension(&path, CERTIFICATE_EXTENSIONS) {
                if let Ok(bytes) = std::fs::read(&path) {
                    certificates_from_bytes(&bytes).into_iter().for_each(|c| store.add_anchor(c));
                }
            }
        }
        for path in list_files(&self.dir) {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            if has_extension(&path, CERTIFICATE_EXTENSIONS) {
                certificates_from_bytes(&bytes).into_iter().for_each(|c| store.add_intermediate(c));
            } else if has_extension(&path, &["crl"]) {
                match crl_der(&bytes) {
                    Some(der) => store.add_crl(der),
                    None => log::warn!("Unreadable CRL {}", path.display()),
                }
            }
        }
        store
    }

    pub fn create_signing_handle(
        &self,
        certificate_id: &str,
        hash: HashAlgorithm,
    ) -> std::result::Result<KeystoreSigningHandle, SigningError> {
        let entries = self.entries().map_err(|e| SigningError::Generic(e.to_string()))?;
        let entry = entries
            .into_iter()
            .find(|entry| entry.nickname == certificate_id && entry.key_path.is_some())
            .ok_or_else(|| SigningError::KeyMissing(certificate_id.to_string()))?;
        let certificate = CertificateInfo::from_der(entry.nickname.as_str(), &entry.certificate)
            .map_err(|e| SigningError::Internal(e.to_string()))?
            .with_key_location(KeyLocation::Computer);
        let digest = DigestContext::new(hash)
            .ok_or_else(|| {
                SigningError::Generic(format!("unsupported digest algorithm {}", hash))
            })?;
        let key_path = entry
            .key_path
            .ok_or_else(|| SigningError::KeyMissing(certificate_id.to_string()))?;

        log::debug!("Keystore signing handle for {} ({})", certificate_id, hash);
        Ok(KeystoreSigningHandle {
            certificate,
            chain: entry.chain,
            key_path,
            digest,
            password_callback: self.password_callback.clone(),
        })
    }

    pub fn create_verification_handle(
        &self,
        signature: Vec<u8>,
        signature_type: SignatureType,
    ) -> CmsVerificationHandle {
        CmsVerificationHandle::new(
            &signature,
            signature_type,
            self.trust_store(),
            self.client.clone(),
        )
    }

    fn entries(&self) -> Result<Vec<Entry>> {
        if !self.dir.is_dir() {
            return Err(Error::Keystore(format!("{} is not a directory", self.dir.display())));
        }
        let mut entries = Vec::new();
        for path in list_files(&self.dir) {
            if !has_extension(&path, CERTIFICATE_EXTENSIONS) {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str());
            let Some(nickname) = stem.map(str::to_string) else {
                continue;
            };
            let mut certs = certificates_from_bytes(&std::fs::read(&path)?);
            if certs.is_empty() {
                log::debug!("No certificate in {}", path.display());
                continue;
            }
            let certificate = certs.remove(0);
            let key_path = path.with_extension("key");
            entries.push(Entry {
                nickname,
                certificate,
                chain: certs,
                key_path: key_path.is_file().then_some(key_path),
            });
        }
        Ok(entries)
    }
}

/// Regular files of `dir`, sorted by name; empty when unreadable.
fn list_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = read
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn crl_der(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.starts_with(b"-----BEGIN") {
        let (label, der) = der::pem::decode_vec(bytes).ok()?;
        return (label == "X509 CRL").then_some(der);
    }
    Some(bytes.to_vec())
}

/// Private key material as stored on disk.
enum StoredKey {
    Plain(Zeroizing<Vec<u8>>),
    Encrypted(Vec<u8>),
}

fn read_key(path: &Path) -> Result<StoredKey> {
    let bytes = Zeroizing::new(std::fs::read(path)?);
    if bytes.starts_with(b"-----BEGIN") {
        let (label, der) = der::pem::decode_vec(&bytes)
            .map_err(|e| Error::Key(format!("{}: {}", path.display(), e)))?;
        return match label {
            "ENCRYPTED PRIVATE KEY" => Ok(StoredKey::Encrypted(der)),
            "PRIVATE KEY" => Ok(StoredKey::Plain(Zeroizing::new(der))),
            other => Err(Error::Key(format!(
                "{}: unsupported PEM label {}",
                path.display(),
                other
            ))),
        };
    }
    if pkcs8::PrivateKeyInfo::try_from(bytes.as_slice()).is_ok() {
        Ok(StoredKey::Plain(bytes))
    } else {
        Ok(StoredKey::Encrypted(bytes.to_vec()))
    }
}

/// Signs the covered bytes with a keystore key into detached CMS.
pub struct KeystoreSigningHandle {
    certificate: CertificateInfo,
    chain: Vec<Vec<u8>>,
    key_path: PathBuf,
    digest: DigestContext,
    password_callback: Option<PasswordCallback>,
}

impl KeystoreSigningHandle {
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn certificate(&self) -> &CertificateInfo {
        &self.certificate
    }

    pub fn sign_detached(
        &mut self,
        password: &SecretString,
    ) -> std::result::Result<Vec<u8>, SigningError> {
        let key = match read_key(&self.key_path)? {
            StoredKey::Plain(der) => SigningKey::from_pkcs8_der(&der)?,
            StoredKey::Encrypted(der) => {
                let password = if password.is_empty() {
                    let callback =
                        self.password_callback.as_ref().ok_or(SigningError::UserCancelled)?;
                    (**callback)(self.certificate.nickname()).ok_or(SigningError::UserCancelled)?
                } else {
                    password.clone()
                };
                SigningKey::from_encrypted_pkcs8_der(&der, password.expose_secret().as_bytes())
                    .map_err(|e| match e {
                        KeyDecryptError::BadPassword => SigningError::BadPassphrase,
                        KeyDecryptError::Malformed(msg) => SigningError::Internal(msg),
                    })?
            },
        };

        let algorithm = self.digest.algorithm();
        let content_digest = self.digest.clone().finalize();
        let signer = CmsSigner {
            certificate: self.certificate.certificate_der(),
            chain: &self.chain,
            digest_algorithm: algorithm,
            signing_time: Utc::now(),
        };
        let signature = signer.sign(&content_digest, &key)?;
        log::info!(
            "Created {} byte CMS signature with {}",
            signature.len(),
            self.certificate.nickname()
        );
        Ok(signature)
    }
}

/// Checks a CMS signature and evaluates its signer against the keystore.
pub struct CmsVerificationHandle {
    signature_type: SignatureType,
    parsed: std::result::Result<SignedDataInfo, String>,
    digest: Option<DigestContext>,
    status: Option<SignatureStatus>,
    store: TrustStore,
    client: OcspClient,
}

impl CmsVerificationHandle {
    fn new(
        signature: &[u8],
        signature_type: SignatureType,
        store: TrustStore,
        client: OcspClient,
    ) -> Self {
        let parsed = SignedDataInfo::parse(signature).map_err(|e| e.to_string());
        let digest = match (&parsed, signature_type) {
            (Ok(_), SignatureType::AdbePkcs7Sha1) => DigestContext::new(HashAlgorithm::Sha1),
            (Ok(info), _) => DigestContext::new(info.digest_algorithm()),
            (Err(_), _) => None,
        };
        Self {
            signature_type,
            parsed,
            digest,
            status: None,
            store,
            client,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(digest) = self.digest.as_mut() {
            digest.update(data);
        }
    }

    pub fn validate_signature(&mut self) -> SignatureStatus {
        if let Some(status) = self.status {
            return status;
        }
        let status = self.compute_status();
        self.status = Some(status);
        status
    }

    fn compute_status(&mut self) -> SignatureStatus {
        let info = match &self.parsed {
            Ok(info) => info,
            Err(e) => {
                log::debug!("CMS signature could not be decoded: {}", e);
                return SignatureStatus::DecodingError;
            },
        };
        let Some(ctx) = self.digest.take() else {
            log::warn!("Unsupported digest algorithm {}", info.digest_algorithm());
            return SignatureStatus::GenericError;
        };
        let covered = ctx.finalize();

        let content_digest = if self.signature_type == SignatureType::AdbePkcs7Sha1 {
            let Some(content) = info.encapsulated_content() else {
                return SignatureStatus::DecodingError;
            };
            if content != covered.as_slice() {
                return SignatureStatus::DigestMismatch;
            }
            match digest(info.digest_algorithm(), content) {
                Some(d) => d,
                None => return SignatureStatus::GenericError,
            }
        } else {
            covered
        };
        info.verify(&content_digest)
    }

    pub fn signer_name(&self) -> Option<String> {
        self.certificate_info().subject_info().common_name.clone()
    }

    pub fn signer_subject_dn(&self) -> Option<String> {
        self.certificate_info().subject_info().distinguished_name.clone()
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.parsed.as_ref().ok().and_then(|info| info.signing_time())
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.parsed
            .as_ref()
            .map(|info| info.digest_algorithm())
            .unwrap_or_default()
    }

    pub fn certificate_info(&self) -> CertificateInfo {
        self.parsed
            .as_ref()
            .ok()
            .and_then(|info| info.signer_certificate())
            .and_then(|der| CertificateInfo::from_der("", der).ok())
            .unwrap_or_else(CertificateInfo::null)
    }

    pub fn validate_certificate(&self, check: &CertificateCheck) -> CertificateStatus {
        let Ok(info) = &self.parsed else {
            return CertificateStatus::GenericError;
        };
        let Some(leaf) = info.signer_certificate() else {
            return CertificateStatus::GenericError;
        };
        self.store.evaluate(leaf, info.certificates(), check, &self.client)
    }
}
