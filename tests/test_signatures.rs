//! Integration tests for signing and validating signature fields.
//!
//! Tests the complete workflow:
//! - Signing an unsigned field with keystore certificates
//! - Validating the result, including certificate trust
//! - Tamper and append detection through the byte range
//! - Signing failures and their error details

mod common;

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pdf_oxide_sign::geometry::Rect;
use pdf_oxide_sign::signatures::{
    AnnotationColor, CertificateStatus, HashAlgorithm, PdfSigner, SignatureStatus, SignatureType,
    SignatureValidationInfo, SignatureValidator, SigningData, SigningResult, ValidateOptions,
};
use pdf_oxide_sign::{MemoryDocument, SignatureDocument};

use common::{keystore_backends, plain_page, unsigned_form, within_validity};

/// Offline validation at a fixed time inside the fixtures' validity.
const OFFLINE: ValidateOptions =
    ValidateOptions::VERIFY_CERTIFICATE.union(ValidateOptions::WITHOUT_OCSP_REVOCATION_CHECK);

fn sign_form(out: &Path, certificate: &str, password: &str) -> (PdfSigner, SigningResult) {
    let doc = MemoryDocument::from_bytes(unsigned_form()).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let signer = PdfSigner::new(keystore_backends()).unwrap();
    let mut data = SigningData::new(out, certificate)
        .with_signature_text("Digitally signed\nfor testing")
        .with_signature_left_text(certificate)
        .with_reason("Approval")
        .with_location("Berlin")
        .with_password(password);
    let result = signer.sign(&doc, &field, &mut data);
    (signer, result)
}

fn validate_file(path: &Path, options: ValidateOptions) -> SignatureValidationInfo {
    validate_bytes(std::fs::read(path).unwrap(), options)
}

fn validate_bytes(bytes: Vec<u8>, options: ValidateOptions) -> SignatureValidationInfo {
    let doc = MemoryDocument::from_bytes(bytes).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let validator = SignatureValidator::new(keystore_backends()).unwrap();
    validator.validate_at(&doc, &field, options, within_validity())
}

#[test]
fn test_sign_and_validate_trusted_signature() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("alice.pdf");
    let (signer, result) = sign_form(&out, "alice", "alice-secret");
    assert_eq!(result, SigningResult::Success);
    assert_eq!(signer.last_signing_error_details(), None);

    let info = validate_file(&out, OFFLINE);
    assert_eq!(info.signature_status(), SignatureStatus::Valid);
    assert_eq!(info.certificate_status(), Some(CertificateStatus::Trusted));
    assert_eq!(info.signature_type(), SignatureType::AdbePkcs7Detached);
    assert_eq!(info.signer_name(), Some("Alice Signer"));
    assert_eq!(info.reason(), Some("Approval"));
    assert_eq!(info.location(), Some("Berlin"));
    assert_eq!(info.hash_algorithm(), HashAlgorithm::Sha256);
    assert!(info.signing_time().is_some());
    assert!(!info.certificate_info().is_null());
    assert!(info.signs_total_document());

    let boundaries = info.byte_range_boundaries();
    assert_eq!(boundaries[0], 0);
    assert_eq!(boundaries[3], info.document_length());
}

#[test]
fn test_signed_file_keeps_original_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("bob.pdf");
    assert_eq!(sign_form(&out, "bob", "").1, SigningResult::Success);

    let signed = std::fs::read(&out).unwrap();
    assert!(signed.starts_with(&unsigned_form()));
    let text = String::from_utf8_lossy(&signed);
    assert!(text.contains("/SigFlags 3"));
    assert!(text.contains("/SubFilter /adbe.pkcs7.detached"));
    assert!(!text.contains("9999999999"));
}

#[test]
fn test_tampered_document_fails_digest() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("signed.pdf");
    assert_eq!(sign_form(&out, "bob", "").1, SigningResult::Success);

    let mut bytes = std::fs::read(&out).unwrap();
    let pos = bytes.windows(3).position(|w| w == b"612").unwrap();
    bytes[pos + 2] = b'3';

    let info = validate_bytes(bytes, ValidateOptions::empty());
    assert_eq!(info.signature_status(), SignatureStatus::DigestMismatch);
    assert_eq!(info.certificate_status(), Some(CertificateStatus::NotVerified));
    // the byte range itself still spans the file
    assert!(info.signs_total_document());
}

#[test]
fn test_tampered_document_keeps_certificate_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("alice.pdf");
    assert_eq!(sign_form(&out, "alice", "alice-secret").1, SigningResult::Success);

    let mut bytes = std::fs::read(&out).unwrap();
    let pos = bytes.windows(3).position(|w| w == b"612").unwrap();
    bytes[pos + 2] = b'3';

    let info = validate_bytes(bytes, OFFLINE);
    assert_eq!(info.signature_status(), SignatureStatus::DigestMismatch);
    // the signer certificate is judged on its own
    assert_eq!(info.certificate_status(), Some(CertificateStatus::Trusted));
    assert_eq!(info.signer_name(), Some("Alice Signer"));
}

#[test]
fn test_appended_byte_is_not_total_document() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("signed.pdf");
    assert_eq!(sign_form(&out, "bob", "").1, SigningResult::Success);

    let mut bytes = std::fs::read(&out).unwrap();
    bytes.push(b'\n');

    let info = validate_bytes(bytes, ValidateOptions::empty());
    assert_eq!(info.signature_status(), SignatureStatus::Valid);
    assert!(!info.signs_total_document());
}

#[test]
fn test_certificate_verdicts() {
    let dir = tempfile::tempdir().unwrap();
    let cases = [
        ("bob", CertificateStatus::Revoked),
        ("mallory", CertificateStatus::UntrustedIssuer),
        ("orphan", CertificateStatus::UnknownIssuer),
    ];
    for (certificate, expected) in cases {
        let out = dir.path().join(format!("{}.pdf", certificate));
        assert_eq!(sign_form(&out, certificate, "").1, SigningResult::Success, "{}", certificate);
        let info = validate_file(&out, OFFLINE);
        assert_eq!(info.signature_status(), SignatureStatus::Valid, "{}", certificate);
        assert_eq!(info.certificate_status(), Some(expected), "{}", certificate);
    }
}

#[test]
fn test_expired_at_validation_time() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("alice.pdf");
    assert_eq!(sign_form(&out, "alice", "alice-secret").1, SigningResult::Success);

    let doc = MemoryDocument::open(&out).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let validator = SignatureValidator::new(keystore_backends()).unwrap();
    let late = Utc.with_ymd_and_hms(2046, 1, 1, 0, 0, 0).unwrap();
    let info = validator.validate_at(&doc, &field, OFFLINE, late);
    assert_eq!(info.certificate_status(), Some(CertificateStatus::Expired));
}

#[test]
fn test_without_certificate_check() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("mallory.pdf");
    assert_eq!(sign_form(&out, "mallory", "").1, SigningResult::Success);
    let info = validate_file(&out, ValidateOptions::empty());
    assert_eq!(info.signature_status(), SignatureStatus::Valid);
    assert_eq!(info.certificate_status(), Some(CertificateStatus::NotVerified));
}

#[test]
fn test_signed_field_cannot_be_signed_again() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.pdf");
    assert_eq!(sign_form(&first, "bob", "").1, SigningResult::Success);

    let doc = MemoryDocument::open(&first).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let signer = PdfSigner::new(keystore_backends()).unwrap();
    let second = dir.path().join("second.pdf");
    let result = signer.sign(&doc, &field, &mut SigningData::new(&second, "bob"));
    assert_eq!(result, SigningResult::FieldAlreadySigned);
    assert!(signer.last_signing_error_details().is_some());
    assert!(!second.exists());
}

#[test]
fn test_signing_failures() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.pdf");

    let (signer, result) = sign_form(&out, "alice", "wrong");
    assert_eq!(result, SigningResult::BadPassphrase);
    assert!(signer.last_signing_error_details().unwrap().contains("passphrase"));

    // encrypted key, no password and no callback
    assert_eq!(sign_form(&out, "alice", "").1, SigningResult::UserCancelled);

    // certificate without a private key
    assert_eq!(sign_form(&out, "root-ca", "").1, SigningResult::KeyMissing);
    assert_eq!(sign_form(&out, "nobody", "").1, SigningResult::KeyMissing);
    assert!(!out.exists());
}

#[test]
fn test_error_details_cleared_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let doc = MemoryDocument::from_bytes(unsigned_form()).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let signer = PdfSigner::new(keystore_backends()).unwrap();

    let out = dir.path().join("out.pdf");
    let mut failing = SigningData::new(&out, "alice").with_password("nope");
    assert_eq!(signer.sign(&doc, &field, &mut failing), SigningResult::BadPassphrase);
    assert!(signer.last_signing_error_details().is_some());

    let mut working = SigningData::new(&out, "alice").with_password("alice-secret");
    assert_eq!(signer.sign(&doc, &field, &mut working), SigningResult::Success);
    assert_eq!(signer.last_signing_error_details(), None);
}

#[test]
fn test_passwords_wiped_after_signing() {
    let dir = tempfile::tempdir().unwrap();
    let doc = MemoryDocument::from_bytes(unsigned_form()).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let signer = PdfSigner::new(keystore_backends()).unwrap();
    let out = dir.path().join("out.pdf");

    let mut failing = SigningData::new(&out, "alice")
        .with_password("wrong")
        .with_document_user_password("user");
    assert_eq!(signer.sign(&doc, &field, &mut failing), SigningResult::BadPassphrase);
    assert!(failing.password().is_empty());
    assert!(failing.document_user_password().is_none());

    let mut working = SigningData::new(&out, "alice").with_password("alice-secret");
    assert_eq!(signer.sign(&doc, &field, &mut working), SigningResult::Success);
    assert!(working.password().is_empty());
    assert_eq!(format!("{:?}", working.password()), "SecretString(<empty>)");
}

#[test]
fn test_password_callback_supplies_passphrase() {
    let dir = tempfile::tempdir().unwrap();
    let backends = keystore_backends();
    backends.set_password_callback(|nickname| (nickname == "alice").then(|| "alice-secret".into()));

    let doc = MemoryDocument::from_bytes(unsigned_form()).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let signer = PdfSigner::new(backends).unwrap();
    let out = dir.path().join("out.pdf");
    let mut data = SigningData::new(&out, "alice");
    assert_eq!(signer.sign(&doc, &field, &mut data), SigningResult::Success);
}

#[test]
fn test_unwritable_destination() {
    let doc = MemoryDocument::from_bytes(unsigned_form()).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let signer = PdfSigner::new(keystore_backends()).unwrap();
    let mut data = SigningData::new("/nonexistent-dir/out.pdf", "bob");
    assert_eq!(signer.sign(&doc, &field, &mut data), SigningResult::WriteFailed);
}

#[test]
fn test_sign_new_field_with_image() {
    let dir = tempfile::tempdir().unwrap();
    let stamp = dir.path().join("stamp.png");
    image::RgbaImage::from_pixel(8, 8, image::Rgba([0, 0, 255, 200]))
        .save(&stamp)
        .unwrap();

    let doc = MemoryDocument::from_bytes(plain_page()).unwrap();
    assert!(doc.fields().unwrap().is_empty());

    let signer = PdfSigner::new(keystore_backends()).unwrap();
    let out = dir.path().join("new-field.pdf");
    let mut data = SigningData::new(&out, "bob")
        .with_page(0)
        .with_rect(Rect::new(100.0, 100.0, 180.0, 60.0))
        .with_field_partial_name("Approval")
        .with_signature_text("Bob")
        .with_font_size(0.0)
        .with_border_color(AnnotationColor::None)
        .with_image_path(&stamp);
    assert_eq!(signer.sign_new_field(&doc, &mut data), SigningResult::Success);

    let signed = MemoryDocument::open(&out).unwrap();
    let fields = signed.fields().unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name(), "Approval");
    assert_eq!(fields[0].rect(), Rect::new(100.0, 100.0, 180.0, 60.0));

    let validator = SignatureValidator::new(keystore_backends()).unwrap();
    let info = validator.validate(&signed, &fields[0], ValidateOptions::empty());
    assert_eq!(info.signature_status(), SignatureStatus::Valid);
    assert!(info.signs_total_document());
}

#[test]
fn test_second_signature_on_new_field() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.pdf");
    assert_eq!(sign_form(&first, "bob", "").1, SigningResult::Success);

    let doc = MemoryDocument::open(&first).unwrap();
    let signer = PdfSigner::new(keystore_backends()).unwrap();
    let second = dir.path().join("second.pdf");
    let mut data =
        SigningData::new(&second, "orphan").with_rect(Rect::new(300.0, 72.0, 200.0, 50.0));
    assert_eq!(signer.sign_new_field(&doc, &mut data), SigningResult::Success);

    let signed = MemoryDocument::open(&second).unwrap();
    let validator = SignatureValidator::new(keystore_backends()).unwrap();
    let results = validator.validate_fields(&signed, ValidateOptions::empty()).unwrap();
    assert_eq!(results.len(), 2);
    let by_name = |name: &str| {
        results
            .iter()
            .find(|(field, _)| field.name() == name)
            .map(|(_, info)| info.clone())
            .unwrap()
    };
    let first_info = by_name("Signature1");
    let second_info = by_name("Signature2");
    assert_eq!(first_info.signature_status(), SignatureStatus::Valid);
    assert!(!first_info.signs_total_document());
    assert_eq!(second_info.signature_status(), SignatureStatus::Valid);
    assert!(second_info.signs_total_document());
}

#[test]
fn test_async_validation_and_signing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("async.pdf");
    let backends = keystore_backends();

    let doc: Arc<dyn SignatureDocument> =
        Arc::new(MemoryDocument::from_bytes(unsigned_form()).unwrap());
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let signer = Arc::new(PdfSigner::new(backends.clone()).unwrap());
    let task = signer.sign_async(doc, field, SigningData::new(&out, "bob"));
    assert_eq!(task.wait(), Some(SigningResult::Success));
    // the file is complete by the time the result is delivered
    assert!(out.exists());

    let signed: Arc<dyn SignatureDocument> = Arc::new(MemoryDocument::open(&out).unwrap());
    let field = signed.field(0, "Signature1").unwrap().unwrap();
    let validator = Arc::new(SignatureValidator::new(backends).unwrap());
    let task = validator.validate_async(signed.clone(), field.clone(), ValidateOptions::empty());
    let info = futures::executor::block_on(task).unwrap();
    assert_eq!(info.signature_status(), SignatureStatus::Valid);
    assert_eq!(validator.cached(signed.as_ref(), &field), Some(info));
}

#[test]
fn test_concurrent_forced_revalidation() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("signed.pdf");
    assert_eq!(sign_form(&out, "bob", "").1, SigningResult::Success);

    let doc: Arc<dyn SignatureDocument> = Arc::new(MemoryDocument::open(&out).unwrap());
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let validator = Arc::new(SignatureValidator::new(keystore_backends()).unwrap());

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            validator.validate_async(
                doc.clone(),
                field.clone(),
                ValidateOptions::FORCE_REVALIDATION,
            )
        })
        .collect();
    let results: Vec<_> = tasks.into_iter().map(|t| t.wait().unwrap()).collect();
    assert!(results.iter().all(|info| info.signature_status() == SignatureStatus::Valid));

    // whichever write landed last, the cache holds a complete result
    let cached = validator.cached(doc.as_ref(), &field).unwrap();
    assert_eq!(cached.signature_status(), SignatureStatus::Valid);
    assert!(cached.signs_total_document());
}

#[test]
fn test_unsigned_field_reports_not_found() {
    let doc = MemoryDocument::from_bytes(unsigned_form()).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let validator = SignatureValidator::new(keystore_backends()).unwrap();
    let info = validator.validate(&doc, &field, ValidateOptions::default());
    assert_eq!(info.signature_status(), SignatureStatus::NotFound);
    assert!(!info.signs_total_document());
}
