//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use pdf_oxide_sign::config::SignatureConfig;
use pdf_oxide_sign::signatures::{BackendKind, Backends};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn keystore_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/keystore")
}

/// Backends over the fixture keystore, with the keystore selected.
pub fn keystore_backends() -> Arc<Backends> {
    init_logging();
    let config = SignatureConfig::new()
        .with_keystore_dir(keystore_dir())
        .with_gpg_binary("/nonexistent/gpg-binary")
        .with_worker_threads(2);
    let backends = Arc::new(Backends::new(config));
    assert!(backends.set_active(BackendKind::Keystore));
    backends
}

/// A point in time inside every fixture certificate's validity window.
pub fn within_validity() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
}

/// Assemble a PDF from object bodies numbered from 1, with a classic xref
/// table and `/Root 1 0 R`.
pub fn build_pdf(objects: &[&str]) -> Vec<u8> {
    let mut pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref = pdf.len();
    let header = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    pdf.extend_from_slice(header.as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf
}

/// One page with one unsigned signature field named `Signature1`.
pub fn unsigned_form() -> Vec<u8> {
    build_pdf(&[
        "<< /Type /Catalog /Pages 2 0 R /AcroForm 5 0 R >>",
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [4 0 R] >>",
        "<< /FT /Sig /T (Signature1) /Type /Annot /Subtype /Widget \
         /Rect [72 72 272 122] /P 3 0 R /F 4 >>",
        "<< /Fields [4 0 R] >>",
    ])
}

/// One page and no form at all.
pub fn plain_page() -> Vec<u8> {
    build_pdf(&[
        "<< /Type /Catalog /Pages 2 0 R >>",
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
    ])
}
