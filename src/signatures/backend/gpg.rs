//! OpenPGP backend driving the `gpg` executable.
//!
//! Keys are listed with `--with-colons`, signatures are made and checked
//! through `--status-fd` so that results come from gpg's machine readable
//! status lines rather than from localized messages.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use chrono::{DateTime, Utc};

use super::CertificateCheck;
use crate::signatures::certificate::{
    CertificateInfo, KeyLocation, KeyUsage, PublicKeyInfo, PublicKeyType, Validity,
};
use crate::signatures::result::SigningError;
use crate::signatures::secret::SecretString;
use crate::signatures::types::{CertificateStatus, HashAlgorithm, SignatureStatus};

/// Oldest gpg with loopback pinentry and `--with-colons` fingerprints.
const MINIMUM_VERSION: (u32, u32, u32) = (2, 1, 0);

/// Bytes of the comment packet header used for padding.
const PGP_PADDING_HEADER: usize = 6;

/// GnuPG backend.
#[derive(Debug, Clone)]
pub struct GpgBackend {
    binary: PathBuf,
    home: Option<PathBuf>,
}

impl GpgBackend {
    pub fn new(binary: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            home,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(home) = &self.home {
            command.arg("--homedir").arg(home);
        }
        command.env("LC_ALL", "C").stdin(Stdio::null());
        command
    }

    /// Version reported by `gpg --version`.
    pub fn version(&self) -> Option<(u32, u32, u32)> {
        let output = self.command().arg("--version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        parse_version(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn is_available(&self) -> bool {
        self.version().is_some_and(|v| v >= MINIMUM_VERSION)
    }

    /// Secret keys that can sign.
    pub fn signing_certificates(&self) -> Vec<CertificateInfo> {
        self.list_keys(true, None)
            .into_iter()
            .filter(|record| record.can_sign())
            .map(|record| {
                let exported = self.export_key(&record.fingerprint);
                record.into_certificate(exported)
            })
            .collect()
    }

    fn list_keys(&self, secret: bool, pattern: Option<&str>) -> Vec<KeyRecord> {
        let mut command = self.command();
        command.args(["--batch", "--with-colons", "--fixed-list-mode"]);
        command.arg(if secret { "--list-secret-keys" } else { "--list-keys" });
        if let Some(pattern) = pattern {
            command.arg(pattern);
        }
        match command.output() {
            Ok(output) if output.status.success() => {
                parse_key_listing(&String::from_utf8_lossy(&output.stdout))
            },
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                log::debug!("gpg key listing failed: {}", stderr.trim());
                Vec::new()
            },
            Err(e) => {
                log::warn!("Cannot run {}: {}", self.binary.display(), e);
                Vec::new()
            },
        }
    }

    fn export_key(&self, fingerprint: &str) -> Vec<u8> {
        match self.command().args(["--batch", "--export", fingerprint]).output() {
            Ok(output) if output.status.success() => output.stdout,
            _ => Vec::new(),
        }
    }

    pub fn create_signing_handle(
        &self,
        certificate_id: &str,
        hash: HashAlgorithm,
    ) -> std::result::Result<GpgSigningHandle, SigningError> {
        let record = self
            .list_keys(true, Some(certificate_id))
            .into_iter()
            .find(|record| record.matches(certificate_id) && record.can_sign())
            .ok_or_else(|| SigningError::KeyMissing(certificate_id.to_string()))?;
        let exported = self.export_key(&record.fingerprint);
        Ok(GpgSigningHandle {
            backend: self.clone(),
            certificate: record.into_certificate(exported),
            hash,
            data: Vec::new(),
        })
    }

    pub fn create_verification_handle(&self, signature: Vec<u8>) -> GpgVerificationHandle {
        GpgVerificationHandle {
            backend: self.clone(),
            signature,
            data: Vec::new(),
            status_lines: None,
            certificate: CertificateInfo::null(),
        }
    }
}

/// Append an OpenPGP comment packet so the signature fills `max_size` bytes.
///
/// The packet is tag 61 with a four byte length, so readers skip the
/// zero filler that `/Contents` carries after the real signature. `None`
/// when the signature leaves no room for the packet header.
pub fn pad_pgp_signature(signature: &[u8], max_size: usize) -> Option<Vec<u8>> {
    if signature.len() + PGP_PADDING_HEADER >= max_size {
        return None;
    }
    let filler = u32::try_from(max_size - PGP_PADDING_HEADER - signature.len()).ok()?;
    let mut padded = Vec::with_capacity(max_size);
    padded.extend_from_slice(signature);
    padded.extend_from_slice(&[0xFD, 0xFF]);
    padded.extend_from_slice(&filler.to_be_bytes());
    padded.resize(max_size, 0);
    Some(padded)
}

/// Signs with `gpg --detach-sign`.
pub struct GpgSigningHandle {
    backend: GpgBackend,
    certificate: CertificateInfo,
    hash: HashAlgorithm,
    data: Vec<u8>,
}

impl GpgSigningHandle {
    pub fn update(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn certificate(&self) -> &CertificateInfo {
        &self.certificate
    }

    /// Sign the collected data. An empty password leaves the prompt to
    /// gpg-agent, anything else is passed through loopback pinentry.
    pub fn sign_detached(
        &mut self,
        password: &SecretString,
    ) -> std::result::Result<Vec<u8>, SigningError> {
        let mut input =
            tempfile::NamedTempFile::new().map_err(|e| SigningError::Internal(e.to_string()))?;
        input
            .write_all(&self.data)
            .map_err(|e| SigningError::Internal(e.to_string()))?;

        let mut command = self.backend.command();
        command.args(["--batch", "--no-tty", "--status-fd", "2", "--detach-sign"]);
        command.args(["--local-user", self.certificate.nickname()]);
        if let Some(name) = gpg_digest_name(self.hash) {
            command.args(["--digest-algo", name]);
        }
        if !password.is_empty() {
            command.args(["--pinentry-mode", "loopback", "--passphrase-fd", "0"]);
            command.stdin(Stdio::piped());
        }
        command.args(["--output", "-"]).arg(input.path());
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let passphrase = (!password.is_empty()).then(|| password.expose_secret());
        let output = run_with_input(command, passphrase)
            .map_err(|e| SigningError::Generic(format!("cannot run gpg: {}", e)))?;
        let status = parse_status_lines(&String::from_utf8_lossy(&output.stderr));
        if output.status.success() && !output.stdout.is_empty() {
            log::info!(
                "Created {} byte OpenPGP signature with {}",
                output.stdout.len(),
                self.certificate.nickname()
            );
            return Ok(output.stdout);
        }
        Err(signing_error(&status))
    }
}

fn run_with_input(mut command: Command, input: Option<&str>) -> std::io::Result<Output> {
    let mut child = command.spawn()?;
    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(input.as_bytes())?;
        stdin.write_all(b"\n")?;
    }
    child.wait_with_output()
}

fn gpg_digest_name(hash: HashAlgorithm) -> Option<&'static str> {
    match hash {
        HashAlgorithm::Md5 => Some("MD5"),
        HashAlgorithm::Sha1 => Some("SHA1"),
        HashAlgorithm::Sha224 => Some("SHA224"),
        HashAlgorithm::Sha256 => Some("SHA256"),
        HashAlgorithm::Sha384 => Some("SHA384"),
        HashAlgorithm::Sha512 => Some("SHA512"),
        HashAlgorithm::Unknown | HashAlgorithm::Md2 => None,
    }
}

/// Checks a detached OpenPGP signature with `gpg --verify`.
pub struct GpgVerificationHandle {
    backend: GpgBackend,
    signature: Vec<u8>,
    data: Vec<u8>,
    status_lines: Option<Vec<StatusLine>>,
    certificate: CertificateInfo,
}

impl GpgVerificationHandle {
    pub fn update(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn validate_signature(&mut self) -> SignatureStatus {
        if self.status_lines.is_none() {
            let lines = match self.run_verify() {
                Ok(lines) => lines,
                Err(e) => {
                    log::warn!("gpg verification failed to run: {}", e);
                    return SignatureStatus::GenericError;
                },
            };
            self.certificate = valid_signature_fingerprint(&lines)
                .and_then(|fpr| {
                    self.backend
                        .list_keys(false, Some(fpr))
                        .into_iter()
                        .find(|record| record.matches(fpr))
                })
                .map(|record| {
                    let exported = self.backend.export_key(&record.fingerprint);
                    record.into_certificate(exported)
                })
                .unwrap_or_else(CertificateInfo::null);
            self.status_lines = Some(lines);
        }
        signature_status(self.status_lines.as_deref().unwrap_or_default())
    }

    fn run_verify(&self) -> std::io::Result<Vec<StatusLine>> {
        let mut signature = tempfile::NamedTempFile::new()?;
        signature.write_all(&self.signature)?;
        let mut data = tempfile::NamedTempFile::new()?;
        data.write_all(&self.data)?;

        let output = self
            .backend
            .command()
            .args(["--batch", "--no-tty", "--status-fd", "1", "--verify"])
            .arg(signature.path())
            .arg(data.path())
            .output()?;
        Ok(parse_status_lines(&String::from_utf8_lossy(&output.stdout)))
    }

    fn lines(&self) -> &[StatusLine] {
        self.status_lines.as_deref().unwrap_or_default()
    }

    pub fn signer_name(&self) -> Option<String> {
        self.certificate
            .subject_info()
            .common_name
            .clone()
            .or_else(|| signer_user_id(self.lines()))
    }

    pub fn signer_subject_dn(&self) -> Option<String> {
        self.certificate
            .subject_info()
            .distinguished_name
            .clone()
            .or_else(|| signer_user_id(self.lines()))
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        let line = find_status(self.lines(), "VALIDSIG")?;
        let timestamp = line.args.get(2)?.parse::<i64>().ok()?;
        DateTime::<Utc>::from_timestamp(timestamp, 0)
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        find_status(self.lines(), "VALIDSIG")
            .and_then(|line| line.args.get(7))
            .and_then(|id| id.parse::<u8>().ok())
            .map(HashAlgorithm::from_openpgp_id)
            .unwrap_or_default()
    }

    pub fn certificate_info(&self) -> CertificateInfo {
        self.certificate.clone()
    }

    /// Trust as judged by gpg's own trust model. The check parameters do
    /// not apply: gpg evaluates keys at the current time, offline.
    pub fn validate_certificate(&self, _check: &CertificateCheck) -> CertificateStatus {
        match &self.status_lines {
            Some(lines) => certificate_status(lines),
            None => CertificateStatus::NotVerified,
        }
    }
}

/// One `[GNUPG:]` status line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StatusLine {
    keyword: String,
    args: Vec<String>,
}

fn parse_status_lines(output: &str) -> Vec<StatusLine> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("[GNUPG:] "))
        .filter_map(|rest| {
            let mut parts = rest.split(' ');
            let keyword = parts.next()?.to_string();
            Some(StatusLine {
                keyword,
                args: parts.map(str::to_string).collect(),
            })
        })
        .collect()
}

fn find_status<'a>(lines: &'a [StatusLine], keyword: &str) -> Option<&'a StatusLine> {
    lines.iter().find(|line| line.keyword == keyword)
}

fn has_status(lines: &[StatusLine], keyword: &str) -> bool {
    find_status(lines, keyword).is_some()
}

/// User id from the GOODSIG family of lines (key id first, then the uid).
fn signer_user_id(lines: &[StatusLine]) -> Option<String> {
    lines
        .iter()
        .find(|line| {
            matches!(
                line.keyword.as_str(),
                "GOODSIG" | "EXPSIG" | "EXPKEYSIG" | "REVKEYSIG" | "BADSIG"
            )
        })
        .filter(|line| line.args.len() > 1)
        .map(|line| line.args[1..].join(" "))
}

/// Primary key fingerprint from VALIDSIG, falling back to the signing key.
fn valid_signature_fingerprint(lines: &[StatusLine]) -> Option<&str> {
    let line = find_status(lines, "VALIDSIG")?;
    line.args.get(9).or_else(|| line.args.first()).map(String::as_str)
}

fn signature_status(lines: &[StatusLine]) -> SignatureStatus {
    if ["GOODSIG", "EXPSIG", "EXPKEYSIG", "REVKEYSIG"]
        .iter()
        .any(|k| has_status(lines, k))
    {
        SignatureStatus::Valid
    } else if has_status(lines, "BADSIG") {
        SignatureStatus::Invalid
    } else if has_status(lines, "ERRSIG") {
        SignatureStatus::GenericError
    } else {
        SignatureStatus::DecodingError
    }
}

fn certificate_status(lines: &[StatusLine]) -> CertificateStatus {
    if has_status(lines, "EXPKEYSIG") {
        CertificateStatus::Expired
    } else if has_status(lines, "REVKEYSIG") {
        CertificateStatus::Revoked
    } else if has_status(lines, "ERRSIG") || has_status(lines, "NO_PUBKEY") {
        CertificateStatus::GenericError
    } else if has_status(lines, "TRUST_NEVER") {
        CertificateStatus::UntrustedIssuer
    } else if has_status(lines, "GOODSIG") || has_status(lines, "EXPSIG") {
        CertificateStatus::Trusted
    } else {
        CertificateStatus::GenericError
    }
}

/// Map the status lines of a failed `--detach-sign` run.
fn signing_error(lines: &[StatusLine]) -> SigningError {
    if has_status(lines, "BAD_PASSPHRASE") {
        return SigningError::BadPassphrase;
    }
    if let Some(line) = find_status(lines, "INV_SGNR").or_else(|| find_status(lines, "NO_SECKEY")) {
        return SigningError::KeyMissing(line.args.last().cloned().unwrap_or_default());
    }
    if let Some(line) = find_status(lines, "FAILURE") {
        let code = line.args.get(1).and_then(|c| c.parse::<u32>().ok()).unwrap_or(0) & 0xFFFF;
        return match code {
            // GPG_ERR_CANCELED, GPG_ERR_NO_PASSPHRASE
            99 | 177 => SigningError::UserCancelled,
            // GPG_ERR_BAD_PASSPHRASE
            11 => SigningError::BadPassphrase,
            _ => SigningError::Generic(format!("gpg failed in {}", line.args.join(" "))),
        };
    }
    SigningError::Generic("gpg produced no signature".to_string())
}

/// `(major, minor, patch)` from the first line of `gpg --version`.
fn parse_version(output: &str) -> Option<(u32, u32, u32)> {
    let first = output.lines().next()?;
    let version = first.split_whitespace().last()?;
    let mut parts = version.split('.').map(|p| {
        p.chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse::<u32>()
            .ok()
    });
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

/// A primary key from a `--with-colons` listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct KeyRecord {
    key_id: String,
    fingerprint: String,
    user_id: String,
    validity: String,
    length: u32,
    algorithm: u32,
    created: i64,
    expires: Option<i64>,
    capabilities: String,
    token: String,
}

impl KeyRecord {
    /// Usable for signing and not revoked, expired, disabled or invalid.
    fn can_sign(&self) -> bool {
        self.capabilities.contains('S') && !matches!(self.validity.as_str(), "r" | "e" | "d" | "i")
    }

    fn matches(&self, id: &str) -> bool {
        let id = id.trim_start_matches("0x");
        self.fingerprint.eq_ignore_ascii_case(id)
            || (!id.is_empty() && self.key_id.eq_ignore_ascii_case(id))
    }

    fn key_location(&self) -> KeyLocation {
        match self.token.as_str() {
            "" => KeyLocation::Unknown,
            "+" => KeyLocation::Computer,
            "#" => KeyLocation::Other,
            _ => KeyLocation::HardwareToken,
        }
    }

    fn into_certificate(self, exported: Vec<u8>) -> CertificateInfo {
        let key_type = match self.algorithm {
            1..=3 => PublicKeyType::Rsa,
            17 => PublicKeyType::Dsa,
            18 | 19 | 22 => PublicKeyType::Ec,
            _ => PublicKeyType::Other,
        };
        let mut usage = KeyUsage::empty();
        if self.capabilities.contains('S') {
            usage |= KeyUsage::DIGITAL_SIGNATURE | KeyUsage::NON_REPUDIATION;
        }
        if self.capabilities.contains('E') {
            usage |= KeyUsage::KEY_ENCIPHERMENT | KeyUsage::DATA_ENCIPHERMENT;
        }
        if self.capabilities.contains('C') {
            usage |= KeyUsage::KEY_CERT_SIGN;
        }
        let validity = Validity {
            not_before: DateTime::<Utc>::from_timestamp(self.created, 0).unwrap_or_default(),
            not_after: self
                .expires
                .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let location = self.key_location();
        CertificateInfo::from_pgp(
            self.fingerprint,
            &self.user_id,
            location,
            validity,
            PublicKeyInfo {
                key_type,
                strength_bits: self.length,
                public_key: Vec::new(),
            },
            exported,
            usage,
            false,
        )
    }
}

/// Undo the `\xNN` escaping gpg applies to colon-listing fields.
fn unescape_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).unwrap_or_default();
            if let Ok(b) = u8::from_str_radix(hex, 16) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_key_listing(listing: &str) -> Vec<KeyRecord> {
    let mut records: Vec<KeyRecord> = Vec::new();
    // Subkey records carry their own fpr lines, which must not overwrite the primary's.
    let mut in_primary = false;
    for line in listing.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or_default();
        match field(0) {
            "sec" | "pub" => {
                records.push(KeyRecord {
                    validity: field(1).to_string(),
                    length: field(2).parse().unwrap_or(0),
                    algorithm: field(3).parse().unwrap_or(0),
                    key_id: field(4).to_string(),
                    created: field(5).parse().unwrap_or(0),
                    expires: field(6).parse().ok(),
                    capabilities: field(11).to_string(),
                    token: field(14).to_string(),
                    ..Default::default()
                });
                in_primary = true;
            },
            "ssb" | "sub" => in_primary = false,
            "fpr" if in_primary => {
                if let Some(record) = records.last_mut() {
                    if record.fingerprint.is_empty() {
                        record.fingerprint = field(9).to_string();
                    }
                }
            },
            "uid" => {
                if let Some(record) = records.last_mut() {
                    if record.user_id.is_empty() {
                        record.user_id = unescape_field(field(9));
                    }
                }
            },
            _ => {},
        }
    }
    records
}
