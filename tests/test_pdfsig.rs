//! End-to-end runs of the `pdfsig` binary against the fixture keystore.

mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::{keystore_dir, plain_page, unsigned_form};

fn pdfsig(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pdfsig"))
        .arg("-keystore")
        .arg(keystore_dir())
        .args(args)
        .current_dir(dir)
        .env("PDF_OXIDE_SIGNATURE_BACKEND", "KEYSTORE")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_form(dir: &Path) {
    std::fs::write(dir.join("form.pdf"), unsigned_form()).unwrap();
}

#[test]
fn test_sign_then_verify() {
    let dir = tempfile::tempdir().unwrap();
    write_form(dir.path());

    let signed = pdfsig(
        dir.path(),
        &[
            "-sign",
            "Signature1",
            "-nick",
            "alice",
            "-kpw",
            "alice-secret",
            "-reason",
            "Approval",
            "form.pdf",
            "signed.pdf",
        ],
    );
    assert_eq!(signed.status.code(), Some(0), "{}", stdout(&signed));
    assert!(dir.path().join("signed.pdf").exists());

    let verified = pdfsig(dir.path(), &["-no-ocsp", "signed.pdf"]);
    let text = stdout(&verified);
    assert_eq!(verified.status.code(), Some(0), "{}", text);
    assert!(text.contains("Digital Signature Info of: signed.pdf"));
    assert!(text.contains("  - Signature Field Name: Signature1"));
    assert!(text.contains("  - Signer Certificate Common Name: Alice Signer"));
    assert!(text.contains("  - Signing Hash Algorithm: SHA-256"));
    assert!(text.contains("  - Signature Type: adbe.pkcs7.detached"));
    assert!(text.contains("  - Total document signed"));
    assert!(text.contains("  - Signature Validation: Signature is Valid."));
    assert!(text.contains("  - Certificate Validation: Certificate is Trusted."));

    let unchecked = pdfsig(dir.path(), &["-nocert", "signed.pdf"]);
    assert!(!stdout(&unchecked).contains("Certificate Validation"));
}

#[test]
fn test_tampered_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_form(dir.path());
    let signed = pdfsig(
        dir.path(),
        &["-sign", "1", "-nick", "bob", "-etsi", "form.pdf", "signed.pdf"],
    );
    assert_eq!(signed.status.code(), Some(0));

    let path = dir.path().join("signed.pdf");
    let mut bytes = std::fs::read(&path).unwrap();
    let pos = bytes.windows(3).position(|w| w == b"612").unwrap();
    bytes[pos + 2] = b'3';
    std::fs::write(&path, bytes).unwrap();

    let verified = pdfsig(dir.path(), &["-no-ocsp", "signed.pdf"]);
    let text = stdout(&verified);
    assert_eq!(verified.status.code(), Some(1), "{}", text);
    assert!(text.contains("  - Signature Type: ETSI.CAdES.detached"));
    assert!(text.contains("  - Signature Validation: Digest Mismatch."));
}

#[test]
fn test_add_signature_and_dump() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("page.pdf"), plain_page()).unwrap();

    let added = pdfsig(
        dir.path(),
        &[
            "-add-signature",
            "-new-signature-field-name",
            "Approval",
            "-nick",
            "bob",
            "-digest",
            "SHA384",
            "page.pdf",
            "added.pdf",
        ],
    );
    assert_eq!(added.status.code(), Some(0), "{}", stdout(&added));

    let verified = pdfsig(dir.path(), &["-nocert", "added.pdf"]);
    let text = stdout(&verified);
    assert!(text.contains("  - Signature Field Name: Approval"));
    assert!(text.contains("  - Signing Hash Algorithm: SHA-384"));

    let dumped = pdfsig(dir.path(), &["-dump", "added.pdf"]);
    assert_eq!(dumped.status.code(), Some(0));
    assert!(stdout(&dumped).contains("Dumping Signatures: 1"));
    let signature = std::fs::read(dir.path().join("added.pdf.sig0")).unwrap();
    // DER SEQUENCE of a CMS ContentInfo
    assert_eq!(signature.first(), Some(&0x30));
}

#[test]
fn test_unsigned_field_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write_form(dir.path());
    let verified = pdfsig(dir.path(), &["form.pdf"]);
    assert_eq!(verified.status.code(), Some(0));
    assert!(stdout(&verified).contains("  The signature form field is not signed."));

    std::fs::write(dir.path().join("page.pdf"), plain_page()).unwrap();
    let empty = pdfsig(dir.path(), &["page.pdf"]);
    assert_eq!(empty.status.code(), Some(2));
    assert!(stdout(&empty).contains("does not contain any signatures"));
}

#[test]
fn test_listing() {
    let dir = tempfile::tempdir().unwrap();
    let nicks = pdfsig(dir.path(), &["-list-nicks"]);
    let text = stdout(&nicks);
    assert_eq!(nicks.status.code(), Some(0));
    assert!(text.starts_with("Certificate nicknames available:\n"));
    let alice = text.lines().find(|line| line.starts_with("alice ")).unwrap();
    assert!(alice.contains("(Computer)"));

    let backends = pdfsig(dir.path(), &["-list-backends"]);
    assert!(stdout(&backends).contains("KEYSTORE (active)"));
}

#[test]
fn test_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    write_form(dir.path());

    let no_file = pdfsig(dir.path(), &[]);
    assert_eq!(no_file.status.code(), Some(99));
    let bad_backend = pdfsig(dir.path(), &["-backend", "openssl", "form.pdf"]);
    assert_eq!(bad_backend.status.code(), Some(98));
    let no_field = pdfsig(
        dir.path(),
        &["-sign", "Missing", "-nick", "bob", "form.pdf", "out.pdf"],
    );
    assert_eq!(no_field.status.code(), Some(2));
    let no_nick = pdfsig(dir.path(), &["-sign", "1", "form.pdf", "out.pdf"]);
    assert_eq!(no_nick.status.code(), Some(2));
    let no_output = pdfsig(dir.path(), &["-sign", "1", "-nick", "bob", "form.pdf"]);
    assert_eq!(no_output.status.code(), Some(2));

    let wrong_password = pdfsig(
        dir.path(),
        &["-sign", "1", "-nick", "alice", "-kpw", "nope", "form.pdf", "out.pdf"],
    );
    assert_eq!(wrong_password.status.code(), Some(3));
    assert!(stdout(&wrong_password).contains("BadPassphrase"));
    assert!(!dir.path().join("out.pdf").exists());
}
