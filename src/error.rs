//! Error types for the signature library.
//!
//! This module defines the error types used below the validator and signer
//! boundary: document access, DER/PEM decoding, keystore and backend failures.
//! Validation outcomes and signing results are reported as enums, not errors.

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading documents or talking to backends.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Byte range that does not fit the document
    #[error("Invalid byte range {range:?} for document of {len} bytes")]
    InvalidByteRange {
        /// The offending `[offset1 length1 offset2 length2]` values
        range: Vec<i64>,
        /// Document length
        len: usize,
    },

    /// Certificate could not be decoded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// DER/ASN.1 encoding or decoding failure
    #[error("ASN.1 error: {0}")]
    Asn1(String),

    /// Private key could not be loaded or used
    #[error("Key error: {0}")]
    Key(String),

    /// Keystore directory problem
    #[error("Keystore error: {0}")]
    Keystore(String),

    /// Image error
    #[error("Image error: {0}")]
    Image(String),
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Asn1(err.to_string())
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for Error {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        Error::Certificate(err.to_string())
    }
}
