//! Signature validation.
//!
//! Validation streams the two covered spans of the document into a
//! verification handle of the matching backend, then optionally evaluates
//! trust in the signer certificate. Results are cached per document and
//! field until a forced revalidation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::backend::{Backends, CertificateCheck};
use super::byterange::{checked_signature, ByteRange};
use super::task::{Task, WorkerPool};
use super::types::{
    CertificateState, CertificateStatus, SignatureStatus, SignatureType, ValidateOptions,
};
use super::validation::SignatureValidationInfo;
use crate::document::{SignatureDocument, SignatureField};
use crate::error::Result;
use crate::object::{parse_pdf_date, Object};

/// Covered bytes are handed to the backend in pieces of this size.
const READ_CHUNK: usize = 64 * 1024;

type CacheKey = (String, String);

/// Validates signature fields and remembers the results.
#[derive(Debug)]
pub struct SignatureValidator {
    backends: Arc<Backends>,
    pool: WorkerPool,
    cache: RwLock<HashMap<CacheKey, SignatureValidationInfo>>,
}

impl SignatureValidator {
    /// A validator with its own worker pool sized from the configuration.
    pub fn new(backends: Arc<Backends>) -> Result<Self> {
        let pool = WorkerPool::new(backends.config().worker_threads)?;
        Ok(Self::with_pool(backends, pool))
    }

    pub fn with_pool(backends: Arc<Backends>, pool: WorkerPool) -> Self {
        Self {
            backends,
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn backends(&self) -> &Arc<Backends> {
        &self.backends
    }

    /// Validate `field` with certificates checked at the current time.
    pub fn validate(
        &self,
        doc: &dyn SignatureDocument,
        field: &SignatureField,
        options: ValidateOptions,
    ) -> SignatureValidationInfo {
        self.validate_at(doc, field, options, Utc::now())
    }

    /// Validate `field`, checking certificate validity at `validation_time`.
    ///
    /// A cached result is returned unless `options` contains
    /// [`ValidateOptions::FORCE_REVALIDATION`].
    pub fn validate_at(
        &self,
        doc: &dyn SignatureDocument,
        field: &SignatureField,
        options: ValidateOptions,
        validation_time: DateTime<Utc>,
    ) -> SignatureValidationInfo {
        let key = (doc.id(), field.id());
        if !options.contains(ValidateOptions::FORCE_REVALIDATION) {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.get(&key) {
                log::debug!("Using cached validation of field '{}'", field.name());
                return cached.clone();
            }
        }

        let info = self.run(doc, field, options, validation_time);
        log::info!(
            "Field '{}': signature {:?}, certificate {:?}",
            field.name(),
            info.signature_status(),
            info.certificate_status()
        );
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, info.clone());
        info
    }

    /// Validate on the worker pool.
    pub fn validate_async(
        self: &Arc<Self>,
        doc: Arc<dyn SignatureDocument>,
        field: SignatureField,
        options: ValidateOptions,
    ) -> Task<SignatureValidationInfo> {
        let validator = Arc::clone(self);
        self.pool.spawn(move || validator.validate(doc.as_ref(), &field, options))
    }

    /// Validate every signature field of `doc`.
    pub fn validate_fields(
        &self,
        doc: &dyn SignatureDocument,
        options: ValidateOptions,
    ) -> Result<Vec<(SignatureField, SignatureValidationInfo)>> {
        Ok(doc
            .fields()?
            .into_iter()
            .map(|field| {
                let info = self.validate(doc, &field, options);
                (field, info)
            })
            .collect())
    }

    /// The cached result for `field`, if any.
    pub fn cached(
        &self,
        doc: &dyn SignatureDocument,
        field: &SignatureField,
    ) -> Option<SignatureValidationInfo> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(doc.id(), field.id()))
            .cloned()
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn run(
        &self,
        doc: &dyn SignatureDocument,
        field: &SignatureField,
        options: ValidateOptions,
        validation_time: DateTime<Utc>,
    ) -> SignatureValidationInfo {
        let Some(value) = field.value() else {
            log::debug!("Field '{}' is not signed", field.name());
            return SignatureValidationInfo::not_found();
        };
        let Some(contents) = value.get("Contents").and_then(Object::as_string) else {
            log::debug!("Field '{}' has no /Contents", field.name());
            return SignatureValidationInfo::not_found();
        };

        let mut info = SignatureValidationInfo {
            signature_type: field.signature_type(),
            signer_name: text_entry(value, "Name"),
            reason: text_entry(value, "Reason"),
            location: text_entry(value, "Location"),
            signing_time: text_entry(value, "M").as_deref().and_then(parse_pdf_date),
            document_length: doc.len() as i64,
            ..SignatureValidationInfo::default()
        };
        let fail = |mut info: SignatureValidationInfo, status| {
            info.signature_status = status;
            info.certificate_state = CertificateState::Resolved(CertificateStatus::NotVerified);
            info
        };

        let range = value
            .get("ByteRange")
            .and_then(|r| doc.resolve(r).ok())
            .and_then(|r| ByteRange::from_object(&r));
        let Some(range) = range else {
            log::warn!("Field '{}' has no usable /ByteRange", field.name());
            return fail(info, SignatureStatus::GenericError);
        };
        if let Err(e) = range.check(doc.len()) {
            log::warn!("Field '{}': {}", field.name(), e);
            return fail(info, SignatureStatus::GenericError);
        }
        info.byte_range_boundaries = range.boundaries();
        let (gap_offset, gap_len) = range.gap();
        info.signature = doc
            .read_bytes(gap_offset, gap_len)
            .map(|gap| checked_signature(&gap))
            .unwrap_or_default();

        if info.signature_type == SignatureType::UnknownSignatureType {
            log::warn!("Field '{}' uses an unsupported sub-filter", field.name());
            return fail(info, SignatureStatus::GenericError);
        }
        let Some(mut handle) = self
            .backends
            .create_verification_handle(contents.to_vec(), info.signature_type)
        else {
            log::warn!(
                "No backend can verify field '{}' ({:?})",
                field.name(),
                info.signature_type
            );
            return fail(info, SignatureStatus::GenericError);
        };

        for (offset, len) in range.spans() {
            let mut pos = offset;
            while pos < offset + len {
                let chunk = READ_CHUNK.min(offset + len - pos);
                match doc.read_bytes(pos, chunk) {
                    Ok(bytes) => handle.update(&bytes),
                    Err(e) => {
                        log::warn!("Field '{}': {}", field.name(), e);
                        return fail(info, SignatureStatus::GenericError);
                    },
                }
                pos += chunk;
            }
        }

        info.signature_status = handle.validate_signature();
        info.hash_algorithm = handle.hash_algorithm();
        info.certificate_info = handle.certificate_info();
        if let Some(name) = handle.signer_name() {
            info.signer_name = Some(name);
        }
        info.signer_subject_dn = handle.signer_subject_dn();
        if let Some(time) = handle.signing_time() {
            info.signing_time = Some(time);
        }

        let certificate_status = if !options.contains(ValidateOptions::VERIFY_CERTIFICATE) {
            CertificateStatus::NotVerified
        } else if info.certificate_info.is_null() {
            CertificateStatus::GenericError
        } else {
            let check = CertificateCheck {
                validation_time,
                ocsp: !options.contains(ValidateOptions::WITHOUT_OCSP_REVOCATION_CHECK),
                aia_fetch: options.contains(ValidateOptions::USE_AIA_CERT_FETCH),
            };
            handle.validate_certificate(&check)
        };
        info.certificate_state = CertificateState::Resolved(certificate_status);
        info
    }
}

fn text_entry(dict: &HashMap<String, Object>, key: &str) -> Option<String> {
    dict.get(key).and_then(Object::as_text).filter(|s| !s.is_empty())
}
