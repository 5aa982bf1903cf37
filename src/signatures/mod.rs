//! PDF Digital Signatures module.
//!
//! This module validates existing PDF signatures and signs unsigned
//! signature fields according to the PDF specification and PAdES (PDF
//! Advanced Electronic Signatures) standards.
//!
//! ## Features
//!
//! - **Signature Validation**: Cryptographic check of the covered byte ranges
//! - **Certificate Trust**: Chain building, expiry, CRL and OCSP revocation
//! - **Signing**: Incremental update with appearance, byte range and detached signature
//! - **Backends**: X.509 keystore directory or GnuPG, selected at runtime
//! - **Background Work**: Validation and signing on a worker pool
//!
//! ## Signature Types Supported
//!
//! - PKCS#7 detached signatures (adbe.pkcs7.detached)
//! - PKCS#7 SHA-1 signatures (adbe.pkcs7.sha1), validation only
//! - PAdES signatures (ETSI.CAdES.detached)
//! - OpenPGP detached signatures (g10c.pgp.signature.detached)
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pdf_oxide_sign::config::SignatureConfig;
//! use pdf_oxide_sign::document::{MemoryDocument, SignatureDocument};
//! use pdf_oxide_sign::signatures::{Backends, PdfSigner, SigningData, SigningResult};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backends = Backends::init(SignatureConfig::new().with_keystore_dir("keys"));
//! let doc = MemoryDocument::open("form.pdf")?;
//! let field = doc.field(0, "Signature1")?.ok_or("no such field")?;
//!
//! let signer = PdfSigner::new(Arc::clone(&backends))?;
//! let mut data = SigningData::new("signed.pdf", "alice").with_password("alice-secret");
//! assert_eq!(signer.sign(&doc, &field, &mut data), SigningResult::Success);
//! # Ok(())
//! # }
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-2:2020 Section 12.8 - Digital Signatures
//! - ETSI TS 102 778 - PAdES

pub mod backend;
pub mod byterange;
pub mod certificate;
pub mod cms;
pub mod digest;
pub mod ocsp;
pub mod raw_signature;
mod result;
pub mod secret;
mod signer;
mod task;
pub mod trust;
pub mod types;
mod validation;
mod verifier;

pub use backend::{Backend, BackendKind, Backends, PasswordCallback};
pub use byterange::{signs_total_document, ByteRange};
pub use certificate::{
    CertificateInfo, CertificateType, EntityInfo, KeyLocation, KeyUsage, PublicKeyInfo,
    PublicKeyType, Validity,
};
pub use result::{SigningData, SigningError, SigningResult};
pub use secret::SecretString;
pub use signer::PdfSigner;
pub use task::{Task, WorkerPool};
pub use types::{
    AnnotationColor, BackendFeature, CertificateState, CertificateStatus, HashAlgorithm,
    SignatureStatus, SignatureType, ValidateOptions,
};
pub use validation::SignatureValidationInfo;
pub use verifier::SignatureValidator;
