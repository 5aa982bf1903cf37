// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::len_without_is_empty)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]
#![cfg_attr(test, allow(unused_variables))]

//! # PDF Oxide Sign
//!
//! Digital signatures for PDF documents: validation of embedded signatures,
//! trust evaluation of signer certificates and signing of signature fields.
//!
//! ## Core Features
//!
//! ### Validation
//! - **Byte Ranges**: Checks that a signature covers the whole document except its own value
//! - **CMS / PKCS#7**: `adbe.pkcs7.detached`, `adbe.pkcs7.sha1`, `ETSI.CAdES.detached`
//! - **OpenPGP**: `g10c.pgp.signature.detached` through GnuPG
//! - **Certificate Trust**: Chain building against keystore anchors, expiry, CRL and OCSP
//! - **Caching**: Per-field results, reused until a forced revalidation
//!
//! ### Signing
//! - **Incremental Updates**: Original bytes are never rewritten
//! - **Appearance**: Captions, colors, border and background image for the widget
//! - **New Fields**: Create and sign a field on any page
//!
//! ## Architecture
//! - **Backends**: X.509 keystore directory or GnuPG, chosen at runtime
//! - **Document Layer**: [`document::SignatureDocument`] trait with an in-memory implementation
//! - **Background Work**: [`signatures::Task`] futures on a worker pool
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pdf_oxide_sign::config::SignatureConfig;
//! use pdf_oxide_sign::document::{MemoryDocument, SignatureDocument};
//! use pdf_oxide_sign::signatures::{Backends, SignatureValidator, ValidateOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backends = Backends::init(SignatureConfig::from_env());
//! let validator = SignatureValidator::new(Arc::clone(&backends))?;
//!
//! let doc = MemoryDocument::open("signed.pdf")?;
//! for field in doc.fields()? {
//!     let info = validator.validate(&doc, &field, ValidateOptions::default());
//!     println!(
//!         "{}: {:?} / {:?}, covers whole document: {}",
//!         field.name(),
//!         info.signature_status(),
//!         info.certificate_status(),
//!         info.signs_total_document()
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or
//!   <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod object;
pub mod parser;

// Geometry
pub mod geometry;

// PDF writing (incremental updates, appearances)
pub mod writer;

// Digital signatures
pub mod signatures;

// Configuration
pub mod config;

// Re-export main types for convenience
pub use document::{MemoryDocument, SignatureDocument, SignatureField};
pub use error::{Error, Result};
