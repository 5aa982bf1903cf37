//! pdfsig: verify, list and create PDF digital signatures
//!
//! Usage:
//!   pdfsig [options] <PDF-file> [<output-file>]
//!
//! Without signing options every signature of the file is validated and
//! reported. `-sign <field>` signs an existing unsigned field and
//! `-add-signature` creates a new one; both write `<output-file>`.
//!
//! The keystore directory defaults to `PDF_OXIDE_KEYSTORE_DIR` and the
//! backend to `PDF_OXIDE_SIGNATURE_BACKEND`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use pdf_oxide_sign::config::SignatureConfig;
use pdf_oxide_sign::signatures::{
    AnnotationColor, BackendKind, Backends, CertificateStatus, CertificateType, HashAlgorithm,
    KeyLocation, PdfSigner, SecretString, SignatureStatus, SignatureType, SignatureValidationInfo,
    SignatureValidator, SigningData, SigningResult, ValidateOptions,
};
use pdf_oxide_sign::geometry::Rect;
use pdf_oxide_sign::{MemoryDocument, SignatureDocument, SignatureField};

/// Where `-add-signature` places the new field on the first page.
const NEW_FIELD_RECT: Rect = Rect {
    x: 36.0,
    y: 36.0,
    width: 200.0,
    height: 50.0,
};

const EXIT_INVALID: i32 = 1;
const EXIT_ERROR: i32 = 2;
const EXIT_SIGNING_FAILED: i32 = 3;
const EXIT_BAD_BACKEND: i32 = 98;
const EXIT_USAGE: i32 = 99;

const USAGE: &str = "\
Usage: pdfsig [options] <PDF-file> [<output-file>]
  -keystore <dir>                 keystore directory (alias -nssdir)
  -nocert                         don't perform certificate validation
  -no-ocsp                        don't perform online OCSP certificate revocation check
  -no-appearance                  don't add appearance information when signing existing fields
  -aia                            fetch missing issuers through Authority Information Access
  -assert-signer <fpr_or_file>    require that the signature covering the full document was
                                  made with the given key (GnuPG backend only)
  -dump                           dump all signatures into the current directory
  -add-signature                  add a new signature to the document
  -new-signature-field-name <n>   field name used for the newly added signature
  -sign <field>                   sign the given signature field (by name or number)
  -etsi                           create an ETSI.CAdES.detached signature
  -backend <name>                 use the given backend for signing and verification
  -enable-pgp                     enable OpenPGP signatures in the GnuPG backend
  -nick <nickname>                certificate nickname or fingerprint used for signing
  -kpw <password>                 password for the signing key
  -digest <name>                  digest algorithm (default: SHA256)
  -reason <text>                  reason for signing
  -list-nicks                     list available signing certificates
  -list-backends                  print signature backends
  -opw <password>                 owner password (for encrypted files)
  -upw <password>                 user password (for encrypted files)
  -v                              print version info
  -h, -help, --help               print usage information";

#[derive(Debug, Default)]
struct Options {
    keystore_dir: Option<PathBuf>,
    no_cert: bool,
    no_ocsp: bool,
    no_appearance: bool,
    aia: bool,
    assert_signer: Option<String>,
    dump: bool,
    add_signature: bool,
    new_field_name: Option<String>,
    sign_field: Option<String>,
    etsi: bool,
    backend: Option<String>,
    enable_pgp: bool,
    nickname: Option<String>,
    key_password: SecretString,
    digest: Option<String>,
    reason: Option<String>,
    list_nicks: bool,
    list_backends: bool,
    owner_password: Option<SecretString>,
    user_password: Option<SecretString>,
    version: bool,
    help: bool,
    files: Vec<PathBuf>,
}

impl Options {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut options = Options::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = || args.next().ok_or_else(|| format!("{} needs a value", arg));
            match arg.as_str() {
                "-keystore" | "-nssdir" => options.keystore_dir = Some(PathBuf::from(value()?)),
                "-nocert" => options.no_cert = true,
                "-no-ocsp" => options.no_ocsp = true,
                "-no-appearance" => options.no_appearance = true,
                "-aia" => options.aia = true,
                "-assert-signer" => options.assert_signer = Some(value()?),
                "-dump" => options.dump = true,
                "-add-signature" => options.add_signature = true,
                "-new-signature-field-name" => options.new_field_name = Some(value()?),
                "-sign" => options.sign_field = Some(value()?),
                "-etsi" => options.etsi = true,
                "-backend" => options.backend = Some(value()?),
                "-enable-pgp" => options.enable_pgp = true,
                "-nick" => options.nickname = Some(value()?),
                "-kpw" => options.key_password = SecretString::from(value()?),
                "-digest" => options.digest = Some(value()?),
                "-reason" => options.reason = Some(value()?),
                "-list-nicks" => options.list_nicks = true,
                "-list-backends" => options.list_backends = true,
                "-opw" => options.owner_password = Some(SecretString::from(value()?)),
                "-upw" => options.user_password = Some(SecretString::from(value()?)),
                "-v" => options.version = true,
                "-h" | "-help" | "--help" | "-?" => options.help = true,
                flag if flag.starts_with('-') && flag.len() > 1 => {
                    return Err(format!("unknown option {}", flag));
                },
                file => options.files.push(PathBuf::from(file)),
            }
        }
        if options.add_signature && options.sign_field.is_some() {
            return Err("-add-signature and -sign cannot be combined".to_string());
        }
        Ok(options)
    }

    fn validate_options(&self) -> ValidateOptions {
        let mut flags = ValidateOptions::empty();
        flags.set(ValidateOptions::VERIFY_CERTIFICATE, !self.no_cert);
        flags.set(ValidateOptions::WITHOUT_OCSP_REVOCATION_CHECK, self.no_ocsp);
        flags.set(ValidateOptions::USE_AIA_CERT_FETCH, self.aia);
        flags
    }

    fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        match &self.digest {
            Some(name) => HashAlgorithm::from_name(name),
            None => Some(HashAlgorithm::Sha256),
        }
    }
}

fn main() {
    env_logger::init();

    let options = match Options::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("pdfsig: {}", e);
            eprintln!("{}", USAGE);
            std::process::exit(EXIT_USAGE);
        },
    };

    let mut config = SignatureConfig::from_env().with_pgp_signatures(options.enable_pgp);
    if let Some(dir) = &options.keystore_dir {
        config = config.with_keystore_dir(dir);
    }
    let backends = Backends::init(config);

    let stdout = io::stdout();
    let code = match run(options, backends, &mut stdout.lock()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pdfsig: {}", e);
            EXIT_ERROR
        },
    };
    std::process::exit(code);
}

fn run(mut options: Options, backends: Arc<Backends>, out: &mut dyn Write) -> io::Result<i32> {
    if options.version || options.help {
        eprintln!("pdfsig version {}", env!("CARGO_PKG_VERSION"));
        if options.help {
            eprintln!("{}", USAGE);
        }
        return Ok(0);
    }

    if let Some(name) = &options.backend {
        let selected = BackendKind::from_name(name).is_some_and(|kind| backends.set_active(kind));
        if !selected {
            eprintln!("Unsupported backend");
            return Ok(EXIT_BAD_BACKEND);
        }
    }

    if options.list_backends {
        print_backends(&backends, out)?;
        return Ok(0);
    }

    if options.list_nicks {
        return list_nicknames(&backends, options.enable_pgp, out);
    }

    let Some(file) = options.files.first().cloned() else {
        eprintln!("{}", USAGE);
        return Ok(EXIT_USAGE);
    };
    let output = options.files.get(1).cloned();

    let doc = match MemoryDocument::open(&file) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Error opening {}: {}", file.display(), e);
            return Ok(EXIT_INVALID);
        },
    };
    if doc.is_encrypted()
        && !doc.authenticate(options.owner_password.as_ref(), options.user_password.as_ref())
    {
        eprintln!("Could not open encrypted file {}", file.display());
        return Ok(EXIT_INVALID);
    }

    if options.add_signature {
        return add_signature(&mut options, &backends, &doc, output.as_deref(), out);
    }
    if options.sign_field.is_some() {
        return sign_field(&mut options, &backends, &doc, &file, output.as_deref(), out);
    }
    if output.is_some() {
        eprintln!("{}", USAGE);
        return Ok(EXIT_USAGE);
    }

    verify(&options, backends, doc, &file, out)
}

fn print_backends(backends: &Backends, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "pdfsig backends:")?;
    let active = backends.active();
    for kind in backends.available() {
        if Some(kind) == active {
            writeln!(out, "{} (active)", kind)?;
        } else {
            writeln!(out, "{}", kind)?;
        }
    }
    Ok(())
}

fn list_nicknames(backends: &Backends, show_type: bool, out: &mut dyn Write) -> io::Result<i32> {
    if backends.active().is_none() {
        writeln!(out, "No backends for cryptographic signatures available")?;
        return Ok(EXIT_ERROR);
    }
    let certificates = backends.signing_certificates();
    if certificates.is_empty() {
        writeln!(out, "There are no certificates available.")?;
        return Ok(0);
    }
    writeln!(out, "Certificate nicknames available:")?;
    for cert in certificates {
        let location = match cert.key_location() {
            KeyLocation::Unknown => "",
            KeyLocation::Other => "(Other)",
            KeyLocation::Computer => "(Computer)",
            KeyLocation::HardwareToken => "(Hardware Token)",
        };
        let kind = match (show_type, cert.certificate_type()) {
            (false, _) => "",
            (true, CertificateType::Pgp) => "PGP",
            (true, CertificateType::X509) => "S/Mime",
        };
        let qualified = if cert.is_qualified() { "(*)" } else { "   " };
        writeln!(out, "{} {} {} {}", cert.nickname(), qualified, location, kind)?;
    }
    Ok(0)
}

/// Checks shared by both signing modes; `Err` carries the exit code.
fn signing_request(
    options: &mut Options,
    backends: &Backends,
    output: Option<&Path>,
) -> Result<SigningData, i32> {
    let Some(output) = output else {
        eprintln!("An output filename for the signed document must be given");
        return Err(EXIT_ERROR);
    };
    let Some(nickname) = options.nickname.clone() else {
        eprintln!("A nickname of the signing certificate must be given");
        return Err(EXIT_ERROR);
    };
    let Some(hash) = options.hash_algorithm() else {
        eprintln!("Unknown digest algorithm {}", options.digest.as_deref().unwrap_or_default());
        return Err(EXIT_ERROR);
    };
    if backends.active().is_none() {
        eprintln!("No backends for cryptographic signatures available");
        return Err(EXIT_ERROR);
    }

    let mut data = SigningData::new(output, nickname)
        .with_hash_algorithm(hash)
        .with_password(std::mem::take(&mut options.key_password));
    if let Some(reason) = &options.reason {
        data = data.with_reason(reason.as_str());
    }
    if options.etsi {
        data = data.with_signature_type(SignatureType::EtsiCadesDetached);
    }
    if let Some(password) = options.owner_password.take() {
        data = data.with_document_owner_password(password);
    }
    if let Some(password) = options.user_password.take() {
        data = data.with_document_user_password(password);
    }
    Ok(data)
}

fn signer_common_name(backends: &Backends, nickname: &str) -> String {
    backends
        .signing_certificates()
        .into_iter()
        .find(|cert| cert.nickname() == nickname)
        .and_then(|cert| cert.subject_info().common_name.clone())
        .unwrap_or_else(|| nickname.to_string())
}

fn with_appearance(data: SigningData, signer_name: &str) -> SigningData {
    let timestamp = Local::now().format("%Y.%m.%d %H:%M:%S %z");
    data.with_signature_text(format!("Digitally signed by {}\nDate: {}", signer_name, timestamp))
        .with_signature_left_text(signer_name)
        .with_font_color(AnnotationColor::black())
}

fn finish_signing(
    result: SigningResult,
    signer: &PdfSigner,
    out: &mut dyn Write,
) -> io::Result<i32> {
    if result == SigningResult::Success {
        return Ok(0);
    }
    let details = signer.last_signing_error_details().unwrap_or_default();
    writeln!(out, "Signing failed: {:?} {}", result, details)?;
    Ok(EXIT_SIGNING_FAILED)
}

fn add_signature(
    options: &mut Options,
    backends: &Arc<Backends>,
    doc: &MemoryDocument,
    output: Option<&Path>,
    out: &mut dyn Write,
) -> io::Result<i32> {
    let mut data = match signing_request(options, backends, output) {
        Ok(data) => data,
        Err(code) => return Ok(code),
    };
    let signer_name = signer_common_name(backends, data.certificate_id());
    data = with_appearance(data, &signer_name)
        .with_page(0)
        .with_rect(NEW_FIELD_RECT);
    if let Some(name) = &options.new_field_name {
        data = data.with_field_partial_name(name.as_str());
    }

    let signer = PdfSigner::new(Arc::clone(backends)).map_err(other_error)?;
    let result = signer.sign_new_field(doc, &mut data);
    finish_signing(result, &signer, out)
}

fn sign_field(
    options: &mut Options,
    backends: &Arc<Backends>,
    doc: &MemoryDocument,
    file: &Path,
    output: Option<&Path>,
    out: &mut dyn Write,
) -> io::Result<i32> {
    let fields = doc.fields().map_err(other_error)?;
    let requested = options.sign_field.clone().unwrap_or_default();
    let number = match requested.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => match fields.iter().position(|f| f.name() == requested) {
            Some(index) => index + 1,
            None => {
                eprintln!("Did not find signature field with name: {}", requested);
                return Ok(EXIT_ERROR);
            },
        },
    };

    let mut data = match signing_request(options, backends, output) {
        Ok(data) => data,
        Err(code) => return Ok(code),
    };
    let Some(field) = fields.get(number - 1) else {
        writeln!(
            out,
            "File '{}' does not contain a signature with number {}",
            file.display(),
            number
        )?;
        return Ok(EXIT_ERROR);
    };
    if field.signature_type() != SignatureType::UnsignedSignatureField {
        writeln!(out, "Signature number {} is already signed", number)?;
        return Ok(EXIT_ERROR);
    }

    if !options.no_appearance {
        let signer_name = signer_common_name(backends, data.certificate_id());
        data = with_appearance(data, &signer_name);
    }
    let signer = PdfSigner::new(Arc::clone(backends)).map_err(other_error)?;
    let result = signer.sign(doc, field, &mut data);
    finish_signing(result, &signer, out)
}

fn verify(
    options: &Options,
    backends: Arc<Backends>,
    doc: MemoryDocument,
    file: &Path,
    out: &mut dyn Write,
) -> io::Result<i32> {
    let doc: Arc<dyn SignatureDocument> = Arc::new(doc);
    let fields = doc.fields().map_err(other_error)?;
    if fields.is_empty() {
        writeln!(out, "File '{}' does not contain any signatures", file.display())?;
        return Ok(EXIT_ERROR);
    }

    let validator = Arc::new(SignatureValidator::new(Arc::clone(&backends)).map_err(other_error)?);
    if options.dump {
        return dump_signatures(&validator, doc.as_ref(), &fields, file, out);
    }
    writeln!(out, "Digital Signature Info of: {}", file.display())?;

    // start every check before reporting any of them
    let flags = options.validate_options();
    let tasks: Vec<_> = fields
        .iter()
        .map(|field| {
            (field.signature_type() != SignatureType::UnsignedSignatureField)
                .then(|| validator.validate_async(Arc::clone(&doc), field.clone(), flags))
        })
        .collect();

    let gpg_active = backends.active() == Some(BackendKind::Gpg);
    let mut total_document_nick = None;
    let mut one_invalid = false;
    for (number, (field, task)) in fields.iter().zip(tasks).enumerate() {
        writeln!(out, "Signature #{}:", number + 1)?;
        writeln!(out, "  - Signature Field Name: {}", field.name())?;
        let Some(task) = task else {
            writeln!(out, "  The signature form field is not signed.")?;
            continue;
        };
        let info = task.wait().unwrap_or_else(SignatureValidationInfo::not_found);
        if info.signature_status() == SignatureStatus::DecodingError {
            writeln!(out, "  - Decoding failed")?;
            one_invalid = true;
            continue;
        }
        report_signature(&info, field, gpg_active, out)?;

        if info.byte_range_boundaries().len() == 4 {
            if info.signs_total_document() {
                if total_document_nick.is_some() {
                    writeln!(out, "multiple signatures is covering entire document. Impossible")?;
                    return Ok(EXIT_ERROR);
                }
                total_document_nick = Some(info.certificate_info().nickname().to_string());
                writeln!(out, "  - Total document signed")?;
            } else {
                writeln!(out, "  - Not total document signed")?;
            }
        }
        writeln!(out, "  - Signature Validation: {}", signature_state(info.signature_status()))?;
        if info.signature_status() != SignatureStatus::Valid {
            one_invalid = true;
            continue;
        }
        if !options.no_cert {
            let state = info.certificate_status().map(certificate_state).unwrap_or("Pending.");
            writeln!(out, "  - Certificate Validation: {}", state)?;
        }
    }

    if one_invalid {
        return Ok(EXIT_INVALID);
    }
    match &options.assert_signer {
        Some(assert) if gpg_active => {
            let Some(nick) = total_document_nick else {
                writeln!(out, "  - Assert signer: Total document not signed")?;
                return Ok(EXIT_INVALID);
            };
            if !assert_signer_keys(assert).contains(&nick) {
                writeln!(out, "  - Assert signer: Key not in list")?;
                return Ok(EXIT_INVALID);
            }
            Ok(0)
        },
        _ => Ok(0),
    }
}

fn report_signature(
    info: &SignatureValidationInfo,
    field: &SignatureField,
    gpg_active: bool,
    out: &mut dyn Write,
) -> io::Result<()> {
    let common_name = info.signer_name().unwrap_or_default();
    writeln!(out, "  - Signer Certificate Common Name: {}", common_name)?;
    if gpg_active {
        writeln!(out, "  - Signer fingerprint: {}", info.certificate_info().nickname())?;
    }
    let subject = info.signer_subject_dn().unwrap_or_default();
    writeln!(out, "  - Signer full Distinguished Name: {}", subject)?;
    let time = info
        .signing_time()
        .map(|t| t.with_timezone(&Local).format("%b %d %Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    writeln!(out, "  - Signing Time: {}", time)?;
    let hash = match info.hash_algorithm() {
        HashAlgorithm::Sha1 => "SHA1",
        other => other.name(),
    };
    writeln!(out, "  - Signing Hash Algorithm: {}", hash)?;
    writeln!(
        out,
        "  - Signature Type: {}",
        field.signature_type().as_pdf_name().unwrap_or("unknown")
    )?;
    if let [a, b, c, d] = info.byte_range_boundaries() {
        writeln!(out, "  - Signed Ranges: [{} - {}], [{} - {}]", a, b, c, d)?;
    }
    Ok(())
}

fn dump_signatures(
    validator: &SignatureValidator,
    doc: &dyn SignatureDocument,
    fields: &[SignatureField],
    file: &Path,
    out: &mut dyn Write,
) -> io::Result<i32> {
    writeln!(out, "Dumping Signatures: {}", fields.len())?;
    let base = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    for (index, field) in fields.iter().enumerate() {
        let info = validator.validate(doc, field, ValidateOptions::empty());
        if info.signature().is_empty() {
            writeln!(out, "Cannot dump signature #{}", index)?;
            continue;
        }
        let path = format!("{}.sig{}", base, index);
        writeln!(out, "Signature #{} ({} bytes) => {}", index, info.signature().len(), path)?;
        std::fs::write(&path, info.signature())?;
    }
    Ok(0)
}

fn other_error(e: pdf_oxide_sign::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// Fingerprints from `-assert-signer`: a file of fingerprints, one per line
/// with `#` comments, or a single fingerprint.
fn assert_signer_keys(input: &str) -> Vec<String> {
    match std::fs::read_to_string(input) {
        Ok(contents) => contents
            .lines()
            .filter(|line| !line.starts_with('#'))
            .map(|line| line.trim_matches(|c| c == ' ' || c == '\t'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => vec![input.to_string()],
    }
}

fn signature_state(status: SignatureStatus) -> &'static str {
    match status {
        SignatureStatus::Valid => "Signature is Valid.",
        SignatureStatus::Invalid => "Signature is Invalid.",
        SignatureStatus::DigestMismatch => "Digest Mismatch.",
        SignatureStatus::DecodingError => "Document isn't signed or corrupted data.",
        SignatureStatus::NotVerified => "Signature has not yet been verified.",
        SignatureStatus::NotFound => "Signature not found.",
        SignatureStatus::GenericError => "Unknown Validation Failure.",
    }
}

fn certificate_state(status: CertificateStatus) -> &'static str {
    match status {
        CertificateStatus::Trusted => "Certificate is Trusted.",
        CertificateStatus::UntrustedIssuer => "Certificate issuer isn't Trusted.",
        CertificateStatus::UnknownIssuer => "Certificate issuer is unknown.",
        CertificateStatus::Revoked => "Certificate has been Revoked.",
        CertificateStatus::Expired => "Certificate has Expired",
        CertificateStatus::NotVerified => "Certificate has not yet been verified.",
        CertificateStatus::GenericError => "Unknown issue with Certificate or corrupted data.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, String> {
        Options::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_parse_signing_options() {
        let options = parse(&[
            "-sign",
            "Signature1",
            "-nick",
            "alice",
            "-kpw",
            "pw",
            "-digest",
            "sha384",
            "-etsi",
            "in.pdf",
            "out.pdf",
        ])
        .unwrap();
        assert_eq!(options.sign_field.as_deref(), Some("Signature1"));
        assert_eq!(options.nickname.as_deref(), Some("alice"));
        assert_eq!(options.key_password.expose_secret(), "pw");
        assert_eq!(options.hash_algorithm(), Some(HashAlgorithm::Sha384));
        assert!(options.etsi);
        assert_eq!(options.files, vec![PathBuf::from("in.pdf"), PathBuf::from("out.pdf")]);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse(&["-sign"]).is_err());
        assert!(parse(&["-frobnicate", "in.pdf"]).is_err());
        assert!(parse(&["-sign", "1", "-add-signature", "in.pdf", "out.pdf"]).is_err());
    }

    #[test]
    fn test_validate_flags() {
        let options = parse(&["-no-ocsp", "-aia", "in.pdf"]).unwrap();
        let flags = options.validate_options();
        assert!(flags.contains(ValidateOptions::VERIFY_CERTIFICATE));
        assert!(flags.contains(ValidateOptions::WITHOUT_OCSP_REVOCATION_CHECK));
        assert!(flags.contains(ValidateOptions::USE_AIA_CERT_FETCH));

        let options = parse(&["-nocert", "in.pdf"]).unwrap();
        assert!(!options.validate_options().contains(ValidateOptions::VERIFY_CERTIFICATE));
        assert_eq!(options.hash_algorithm(), Some(HashAlgorithm::Sha256));
    }

    #[test]
    fn test_assert_signer_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("keys.txt");
        std::fs::write(&list, "# trusted signers\nABCD1234\n\n  EF567890\t\n").unwrap();
        assert_eq!(
            assert_signer_keys(list.to_str().unwrap()),
            vec!["ABCD1234".to_string(), "EF567890".to_string()]
        );
        assert_eq!(assert_signer_keys("0123ABCD"), vec!["0123ABCD".to_string()]);
    }
}
