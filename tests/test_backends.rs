//! Integration tests for backend selection and the keystore backend.

mod common;

use pdf_oxide_sign::config::SignatureConfig;
use pdf_oxide_sign::signatures::{
    BackendFeature, BackendKind, Backends, KeyLocation, PdfSigner, SecretString, SignatureType,
    SigningData, SigningResult,
};
use pdf_oxide_sign::{MemoryDocument, SignatureDocument};

use common::{keystore_backends, keystore_dir, unsigned_form, within_validity};

fn without_gpg() -> Backends {
    common::init_logging();
    Backends::new(
        SignatureConfig::new()
            .with_keystore_dir(keystore_dir())
            .with_gpg_binary("/nonexistent/gpg-binary"),
    )
}

#[test]
fn test_missing_gpg_is_not_available() {
    let backends = without_gpg();
    assert_eq!(backends.available(), vec![BackendKind::Keystore]);
    assert!(!backends.set_active(BackendKind::Gpg));
    assert!(backends.set_active(BackendKind::Keystore));
    assert_eq!(backends.active(), Some(BackendKind::Keystore));
    // a failed selection leaves the previous one in place
    assert!(!backends.set_active(BackendKind::Gpg));
    assert_eq!(backends.active(), Some(BackendKind::Keystore));
}

#[test]
fn test_unavailable_default_backend() {
    let backends = Backends::new(
        SignatureConfig::new()
            .with_keystore_dir(keystore_dir())
            .with_gpg_binary("/nonexistent/gpg-binary")
            .with_default_backend(BackendKind::Gpg),
    );
    if std::env::var_os("PDF_OXIDE_SIGNATURE_BACKEND").is_none() {
        assert_eq!(backends.active(), None);
        assert!(backends.signing_certificates().is_empty());
    }
}

#[test]
fn test_backend_names() {
    assert_eq!(BackendKind::from_name("nss3"), Some(BackendKind::Keystore));
    assert_eq!(BackendKind::from_name(" gpg "), Some(BackendKind::Gpg));
    assert_eq!(BackendKind::from_name("GPGME"), Some(BackendKind::Gpg));
    assert_eq!(BackendKind::from_name("openssl"), None);
    assert_eq!(BackendKind::Keystore.to_string(), "KEYSTORE");
}

#[test]
fn test_features() {
    let backends = without_gpg();
    assert!(!backends.has_feature(BackendKind::Keystore, BackendFeature::AsksPassphrase));
    assert!(backends.has_feature(BackendKind::Gpg, BackendFeature::AsksPassphrase));
}

#[test]
fn test_signing_certificates() {
    let backends = keystore_backends();
    let certs = backends.signing_certificates();
    let names: Vec<&str> = certs.iter().map(|c| c.nickname()).collect();
    assert_eq!(names, vec!["alice", "bob", "mallory", "orphan"]);

    let alice = &certs[0];
    assert_eq!(alice.subject_info().common_name.as_deref(), Some("Alice Signer"));
    assert_eq!(alice.key_location(), KeyLocation::Computer);
    assert!(!alice.is_self_signed());
    assert!(alice.validity().contains(within_validity()));

    let mallory = &certs[2];
    assert!(mallory.is_self_signed());

    // OpenPGP keys are never listed while OpenPGP signatures are disabled
    assert!(backends.signing_certificates_for(BackendKind::Gpg).is_empty());
}

#[test]
fn test_check_password() {
    let backends = keystore_backends();
    let certs = backends.signing_certificates();
    let alice = certs.iter().find(|c| c.nickname() == "alice").unwrap();
    assert!(alice.check_password(&backends, &SecretString::from("alice-secret")));
    assert!(!alice.check_password(&backends, &SecretString::from("guess")));

    let bob = certs.iter().find(|c| c.nickname() == "bob").unwrap();
    assert!(bob.check_password(&backends, &SecretString::default()));
}

#[test]
fn test_keystore_dir_updates() {
    let backends = keystore_backends();
    backends.set_keystore_dir("");
    assert_eq!(backends.keystore_dir(), keystore_dir());

    let empty = tempfile::tempdir().unwrap();
    backends.set_keystore_dir(empty.path());
    assert!(backends.signing_certificates().is_empty());
}

#[test]
fn test_pgp_signing_needs_permission() {
    let backends = keystore_backends();
    assert!(!backends.pgp_signatures_allowed());

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("pgp.pdf");
    let doc = MemoryDocument::from_bytes(unsigned_form()).unwrap();
    let field = doc.field(0, "Signature1").unwrap().unwrap();
    let signer = PdfSigner::new(backends).unwrap();
    let mut data = SigningData::new(&out, "bob")
        .with_signature_type(SignatureType::G10cPgpSignatureDetached);
    assert_eq!(signer.sign(&doc, &field, &mut data), SigningResult::GenericSigningError);
    assert!(!out.exists());
}
