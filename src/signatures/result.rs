//! Signing requests and their outcomes.

use std::path::{Path, PathBuf};

use thiserror::Error;
use zeroize::Zeroize;

use super::secret::SecretString;
use super::types::{AnnotationColor, HashAlgorithm, SignatureType};
use crate::geometry::Rect;

/// Outcome of a signing request, as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningResult {
    Success,
    FieldAlreadySigned,
    GenericSigningError,
    InternalError,
    KeyMissing,
    WriteFailed,
    UserCancelled,
    BadPassphrase,
}

/// Internal signing failure; the message becomes the host-visible
/// error details.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("field is already signed")]
    FieldAlreadySigned,

    #[error("{0}")]
    Generic(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("signing key not found: {0}")]
    KeyMissing(String),

    #[error("failed to write signed document: {0}")]
    WriteFailed(String),

    #[error("signing cancelled by the user")]
    UserCancelled,

    #[error("wrong passphrase for the signing key")]
    BadPassphrase,
}

impl SigningError {
    /// The host-facing result code for this failure.
    pub fn result(&self) -> SigningResult {
        match self {
            SigningError::FieldAlreadySigned => SigningResult::FieldAlreadySigned,
            SigningError::Generic(_) => SigningResult::GenericSigningError,
            SigningError::Internal(_) => SigningResult::InternalError,
            SigningError::KeyMissing(_) => SigningResult::KeyMissing,
            SigningError::WriteFailed(_) => SigningResult::WriteFailed,
            SigningError::UserCancelled => SigningResult::UserCancelled,
            SigningError::BadPassphrase => SigningResult::BadPassphrase,
        }
    }
}

impl From<crate::error::Error> for SigningError {
    fn from(e: crate::error::Error) -> Self {
        match e {
            crate::error::Error::Io(io) => SigningError::WriteFailed(io.to_string()),
            other => SigningError::Internal(other.to_string()),
        }
    }
}

/// Everything needed to sign one unsigned signature field.
///
/// # Example
///
/// ```
/// use pdf_oxide_sign::geometry::Rect;
/// use pdf_oxide_sign::signatures::SigningData;
///
/// let data = SigningData::new("signed.pdf", "alice")
///     .with_rect(Rect::new(50.0, 50.0, 200.0, 60.0))
///     .with_signature_text("Signed by Alice")
///     .with_reason("Approved")
///     .with_password("alice-secret");
/// assert_eq!(data.certificate_id(), "alice");
/// ```
#[derive(Debug, Clone)]
pub struct SigningData {
    destination: PathBuf,
    certificate_id: String,
    page: usize,
    rect: Rect,
    signature_text: String,
    signature_left_text: String,
    font_size: f32,
    left_font_size: f32,
    font_color: AnnotationColor,
    border_color: AnnotationColor,
    border_width: f32,
    background_color: AnnotationColor,
    field_partial_name: String,
    reason: Option<String>,
    location: Option<String>,
    image_path: Option<PathBuf>,
    password: SecretString,
    document_owner_password: Option<SecretString>,
    document_user_password: Option<SecretString>,
    hash_algorithm: HashAlgorithm,
    signature_type: Option<SignatureType>,
}

impl SigningData {
    pub fn new(destination: impl Into<PathBuf>, certificate_id: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            certificate_id: certificate_id.into(),
            page: 0,
            rect: Rect::default(),
            signature_text: String::new(),
            signature_left_text: String::new(),
            font_size: 10.0,
            left_font_size: 20.0,
            font_color: AnnotationColor::Rgb(1.0, 0.0, 0.0),
            border_color: AnnotationColor::Rgb(1.0, 0.0, 0.0),
            border_width: 1.5,
            background_color: AnnotationColor::Rgb(240.0 / 255.0, 240.0 / 255.0, 240.0 / 255.0),
            field_partial_name: String::new(),
            reason: None,
            location: None,
            image_path: None,
            password: SecretString::default(),
            document_owner_password: None,
            document_user_password: None,
            hash_algorithm: HashAlgorithm::Sha256,
            signature_type: None,
        }
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_signature_text(mut self, text: impl Into<String>) -> Self {
        self.signature_text = text.into();
        self
    }

    pub fn with_signature_left_text(mut self, text: impl Into<String>) -> Self {
        self.signature_left_text = text.into();
        self
    }

    pub fn with_font_size(mut self, size: f32) -> Self {
        self.font_size = size;
        self
    }

    pub fn with_left_font_size(mut self, size: f32) -> Self {
        self.left_font_size = size;
        self
    }

    pub fn with_font_color(mut self, color: AnnotationColor) -> Self {
        self.font_color = color;
        self
    }

    pub fn with_border_color(mut self, color: AnnotationColor) -> Self {
        self.border_color = color;
        self
    }

    pub fn with_border_width(mut self, width: f32) -> Self {
        self.border_width = width;
        self
    }

    pub fn with_background_color(mut self, color: AnnotationColor) -> Self {
        self.background_color = color;
        self
    }

    pub fn with_field_partial_name(mut self, name: impl Into<String>) -> Self {
        self.field_partial_name = name.into();
        self
    }

    /// Empty strings leave the entry out of the signature dictionary.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into()).filter(|r: &String| !r.is_empty());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into()).filter(|l: &String| !l.is_empty());
        self
    }

    /// Background image drawn behind the captions.
    pub fn with_image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    /// Passphrase of the signing key.
    pub fn with_password(mut self, password: impl Into<SecretString>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_document_owner_password(mut self, password: impl Into<SecretString>) -> Self {
        self.document_owner_password = Some(password.into());
        self
    }

    pub fn with_document_user_password(mut self, password: impl Into<SecretString>) -> Self {
        self.document_user_password = Some(password.into());
        self
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Override the sub-filter chosen from the backend.
    pub fn with_signature_type(mut self, signature_type: SignatureType) -> Self {
        self.signature_type = Some(signature_type);
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn certificate_id(&self) -> &str {
        &self.certificate_id
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn signature_text(&self) -> &str {
        &self.signature_text
    }

    pub fn signature_left_text(&self) -> &str {
        &self.signature_left_text
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    pub fn left_font_size(&self) -> f32 {
        self.left_font_size
    }

    pub fn font_color(&self) -> AnnotationColor {
        self.font_color
    }

    pub fn border_color(&self) -> AnnotationColor {
        self.border_color
    }

    pub fn border_width(&self) -> f32 {
        self.border_width
    }

    pub fn background_color(&self) -> AnnotationColor {
        self.background_color
    }

    pub fn field_partial_name(&self) -> &str {
        &self.field_partial_name
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    pub fn document_owner_password(&self) -> Option<&SecretString> {
        self.document_owner_password.as_ref()
    }

    pub fn document_user_password(&self) -> Option<&SecretString> {
        self.document_user_password.as_ref()
    }

    /// Overwrite the key passphrase and document passwords with zeros.
    pub fn wipe_passwords(&mut self) {
        self.password.zeroize();
        if let Some(mut owner) = self.document_owner_password.take() {
            owner.zeroize();
        }
        if let Some(mut user) = self.document_user_password.take() {
            user.zeroize();
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn signature_type(&self) -> Option<SignatureType> {
        self.signature_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SigningError::BadPassphrase.result(), SigningResult::BadPassphrase);
        assert_eq!(
            SigningError::KeyMissing("bob".into()).result(),
            SigningResult::KeyMissing
        );
        let disk_full = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let io = crate::error::Error::Io(disk_full);
        let mapped = SigningError::from(io);
        assert_eq!(mapped.result(), SigningResult::WriteFailed);
        assert!(mapped.to_string().contains("disk full"));
    }

    #[test]
    fn test_defaults() {
        let data = SigningData::new("out.pdf", "alice");
        assert_eq!(data.font_size(), 10.0);
        assert_eq!(data.left_font_size(), 20.0);
        assert_eq!(data.border_width(), 1.5);
        assert_eq!(data.hash_algorithm(), HashAlgorithm::Sha256);
        assert!(data.password().is_empty());
        assert!(data.signature_type().is_none());
    }

    #[test]
    fn test_empty_reason_is_dropped() {
        let data = SigningData::new("out.pdf", "alice").with_reason("").with_location("Berlin");
        assert_eq!(data.reason(), None);
        assert_eq!(data.location(), Some("Berlin"));
    }
}
