//! Online revocation checks (OCSP) and issuer retrieval through the
//! authority information access extension.

use std::io::Read;
use std::time::Duration;

use rasn::prelude::*;
use rasn_ocsp::{BasicOcspResponse, CertStatus, OcspResponseStatus};
use x509_parser::der_parser::{oid, Oid};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;

use super::digest::digest;
use super::raw_signature;
use super::trust::signed_by;
use super::types::HashAlgorithm;

const AUTHORITY_INFO_ACCESS_OID: Oid<'static> = oid!(1.3.6 .1 .5 .5 .7 .1 .1);
const AD_OCSP_OID: Oid<'static> = oid!(1.3.6 .1 .5 .5 .7 .48 .1);
const AD_CA_ISSUERS_OID: Oid<'static> = oid!(1.3.6 .1 .5 .5 .7 .48 .2);

/// Largest response body read from a responder or issuer URL.
const MAX_RESPONSE_SIZE: u64 = 1_000_000;

/// Longer GET URLs are sent as POST instead (RFC 6960 appendix A.1).
const MAX_GET_URL_LEN: usize = 255;

/// Revocation state reported by a responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspStatus {
    Good,
    Revoked,
    Unknown,
}

/// Blocking HTTP client for OCSP and AIA lookups.
#[derive(Debug, Clone)]
pub struct OcspClient {
    agent: ureq::Agent,
}

impl OcspClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Ask the responders named in `subject` about its status.
    ///
    /// `None` when the certificate names no responder, the request cannot be
    /// built, or no responder gave a usable, correctly signed answer.
    pub fn check(&self, subject_der: &[u8], issuer_der: &[u8]) -> Option<OcspStatus> {
        let (_, subject) = X509Certificate::from_der(subject_der).ok()?;
        let responders = access_locations(&subject, &AD_OCSP_OID);
        if responders.is_empty() {
            log::debug!("No OCSP responder for {}", subject.subject());
            return None;
        }
        let cert_id = make_cert_id(subject_der, issuer_der)?;
        let request = make_request(&cert_id)?;

        for responder in responders {
            let body = match request_url(&responder, &request) {
                Some(url) if url.as_str().len() <= MAX_GET_URL_LEN => {
                    log::debug!("OCSP GET request to {}", responder);
                    self.get(&url)
                },
                _ => {
                    let Ok(url) = url::Url::parse(&responder) else {
                        continue;
                    };
                    log::debug!("OCSP POST request to {}", responder);
                    self.post_ocsp(&url, &request)
                },
            };
            let Some(body) = body else {
                continue;
            };
            if let Some(status) = parse_response(&body, &cert_id, issuer_der) {
                log::info!("OCSP status from {}: {:?}", responder, status);
                return Some(status);
            }
        }
        None
    }

    /// Download the issuer of `subject` from its caIssuers URLs.
    pub fn fetch_issuer(&self, subject: &X509Certificate<'_>) -> Vec<Vec<u8>> {
        let mut issuers = Vec::new();
        for location in access_locations(subject, &AD_CA_ISSUERS_OID) {
            let Ok(url) = url::Url::parse(&location) else {
                continue;
            };
            log::debug!("Fetching issuer certificate from {}", location);
            if let Some(body) = self.get(&url) {
                issuers.extend(certificates_from_bytes(&body));
            }
        }
        issuers
    }

    fn get(&self, url: &url::Url) -> Option<Vec<u8>> {
        send(url, self.agent.get(url.as_str()), None)
    }

    fn post_ocsp(&self, url: &url::Url, request_der: &[u8]) -> Option<Vec<u8>> {
        let request = self
            .agent
            .post(url.as_str())
            .set("Content-Type", "application/ocsp-request");
        send(url, request, Some(request_der))
    }
}

fn send(url: &url::Url, request: ureq::Request, body: Option<&[u8]>) -> Option<Vec<u8>> {
    // for responders that don't support http 1.0
    let request = match url.host() {
        Some(host) => request.set("Host", &host.to_string()),
        None => request,
    };
    let sent = match body {
        Some(bytes) => request.send_bytes(bytes),
        None => request.call(),
    };
    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            log::warn!("HTTP request to {} failed: {}", url, e);
            return None;
        },
    };
    if response.status() != 200 {
        return None;
    }
    let mut data = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_SIZE)
        .read_to_end(&mut data)
        .ok()?;
    Some(data)
}

/// The GET form of an OCSP request: the base64 of `request_der`,
/// percent-encoded, appended as one path segment to the responder URL.
fn request_url(responder: &str, request_der: &[u8]) -> Option<url::Url> {
    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::STANDARD.encode(request_der);
    let segment: String = url::form_urlencoded::byte_serialize(b64.as_bytes()).collect();
    url::Url::parse(&format!("{}/{}", responder.trim_end_matches('/'), segment)).ok()
}

impl Default for OcspClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// URIs of the given access method in the AIA extension.
pub(crate) fn access_locations(cert: &X509Certificate<'_>, method: &Oid<'_>) -> Vec<String> {
    let Ok(extensions) = cert.extensions_map() else {
        return Vec::new();
    };
    let Some(aia) = extensions.get(&AUTHORITY_INFO_ACCESS_OID) else {
        return Vec::new();
    };
    let ParsedExtension::AuthorityInfoAccess(aia) = aia.parsed_extension() else {
        return Vec::new();
    };
    aia.accessdescs
        .iter()
        .filter(|ad| ad.access_method == *method)
        .filter_map(|ad| match ad.access_location {
            GeneralName::URI(uri) => Some(uri.to_string()),
            _ => None,
        })
        .collect()
}

/// DER certificates in a body that is either DER or a PEM bundle.
pub(crate) fn certificates_from_bytes(body: &[u8]) -> Vec<Vec<u8>> {
    if X509Certificate::from_der(body).is_ok() {
        return vec![body.to_vec()];
    }
    x509_parser::pem::Pem::iter_from_buffer(body)
        .filter_map(|pem| pem.ok())
        .filter(|pem| pem.label == "CERTIFICATE")
        .map(|pem| pem.contents)
        .collect()
}

fn make_cert_id(subject_der: &[u8], issuer_der: &[u8]) -> Option<rasn_ocsp::CertId> {
    let subject: rasn_pkix::Certificate = rasn::der::decode(subject_der).ok()?;
    let issuer: rasn_pkix::Certificate = rasn::der::decode(issuer_der).ok()?;

    let issuer_name_raw = rasn::der::encode(&issuer.tbs_certificate.subject).ok()?;
    let issuer_key_raw = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_raw_slice();

    let sha1_oid = rasn::types::Oid::new(&[1, 3, 14, 3, 2, 26])?;
    Some(rasn_ocsp::CertId {
        hash_algorithm: rasn_pkix::AlgorithmIdentifier {
            algorithm: rasn::types::ObjectIdentifier::from(sha1_oid),
            // Many OCSP responders expect this to be NULL not None.
            parameters: Some(Any::new(rasn::der::encode(&()).ok()?)),
        },
        issuer_name_hash: OctetString::from(digest(HashAlgorithm::Sha1, &issuer_name_raw)?),
        issuer_key_hash: OctetString::from(digest(HashAlgorithm::Sha1, issuer_key_raw)?),
        serial_number: subject.tbs_certificate.serial_number,
    })
}

fn make_request(cert_id: &rasn_ocsp::CertId) -> Option<Vec<u8>> {
    let request = rasn_ocsp::OcspRequest {
        tbs_request: rasn_ocsp::TbsRequest {
            version: rasn_ocsp::Version::from(0u8),
            requestor_name: None,
            request_list: vec![rasn_ocsp::Request {
                req_cert: cert_id.clone(),
                single_request_extensions: None,
            }],
            request_extensions: None,
        },
        optional_signature: None,
    };
    rasn::der::encode(&request).ok()
}

/// Public keys allowed to sign a response about certificates of `issuer_der`:
/// the issuer's own and those of authorized responders embedded in `basic`.
fn responder_keys(basic: &BasicOcspResponse, issuer_der: &[u8]) -> Vec<Vec<u8>> {
    let Ok((_, issuer)) = X509Certificate::from_der(issuer_der) else {
        return Vec::new();
    };
    let mut keys = vec![issuer.public_key().raw.to_vec()];
    for cert in basic.certs.iter().flatten() {
        let Ok(der) = rasn::der::encode(cert) else {
            continue;
        };
        let Ok((_, responder)) = X509Certificate::from_der(&der) else {
            continue;
        };
        if authorized_responder(&responder, &issuer) {
            keys.push(responder.public_key().raw.to_vec());
        } else {
            log::debug!("Ignoring unauthorized OCSP responder {}", responder.subject());
        }
    }
    keys
}

fn same_cert(a: &rasn_ocsp::CertId, b: &rasn_ocsp::CertId) -> bool {
    a.issuer_name_hash == b.issuer_name_hash
        && a.issuer_key_hash == b.issuer_key_hash
        && a.serial_number == b.serial_number
}

/// A delegated responder must be certified by the issuer for OCSP signing.
fn authorized_responder(responder: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    let ocsp_signing = matches!(
        responder.extended_key_usage(),
        Ok(Some(eku)) if eku.value.ocsp_signing
    );
    ocsp_signing
        && responder.issuer().as_raw() == issuer.subject().as_raw()
        && signed_by(responder, issuer)
}

/// Decode a response, check its signature against the issuer or an
/// authorized responder certificate, and pick the answer for `cert_id`.
fn parse_response(
    der: &[u8],
    cert_id: &rasn_ocsp::CertId,
    issuer_der: &[u8],
) -> Option<OcspStatus> {
    let response = rasn::der::decode::<rasn_ocsp::OcspResponse>(der).ok()?;
    if response.status != OcspResponseStatus::Successful {
        log::debug!("OCSP responder answered {:?}", response.status);
        return None;
    }
    let basic = rasn::der::decode::<BasicOcspResponse>(&response.bytes?.response).ok()?;
    let tbs = rasn::der::encode(&basic.tbs_response_data).ok()?;
    let signature_oid = basic.signature_algorithm.algorithm.to_string();
    let signature = basic.signature.as_raw_slice();

    let signed = responder_keys(&basic, issuer_der).iter().any(|key| {
        raw_signature::verify_signed_data(key, &signature_oid, &tbs, signature).unwrap_or(false)
    });
    if !signed {
        log::warn!("Ignoring OCSP response with an unverifiable signature");
        return None;
    }

    basic
        .tbs_response_data
        .responses
        .iter()
        .find(|single| same_cert(&single.cert_id, cert_id))
        .map(|single| match single.cert_status {
            CertStatus::Good => OcspStatus::Good,
            CertStatus::Revoked(_) => OcspStatus::Revoked,
            CertStatus::Unknown(_) => OcspStatus::Unknown,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_der(name: &str) -> Vec<u8> {
        let path = format!("{}/tests/fixtures/keystore/{}", env!("CARGO_MANIFEST_DIR"), name);
        certificates_from_bytes(&std::fs::read(path).unwrap()).remove(0)
    }

    #[test]
    fn test_cert_id_hashes() {
        let subject = fixture_der("alice.crt");
        let issuer = fixture_der("trusted/root-ca.crt");
        let id = make_cert_id(&subject, &issuer).unwrap();
        assert_eq!(id.issuer_name_hash.len(), 20);
        assert_eq!(id.issuer_key_hash.len(), 20);
        assert!(make_request(&id).is_some());
    }

    #[test]
    fn test_request_url_keeps_responder_path() {
        let der = [0xfb, 0xff, 0xfe, 0x00];
        let url = request_url("http://ocsp.example.com/ocsp", &der).unwrap();
        // base64 "+//+AA==" with every reserved character escaped
        assert_eq!(url.as_str(), "http://ocsp.example.com/ocsp/%2B%2F%2F%2BAA%3D%3D");

        let url = request_url("http://ocsp.example.com/ca/ocsp/", &der).unwrap();
        assert_eq!(url.path(), "/ca/ocsp/%2B%2F%2F%2BAA%3D%3D");

        let url = request_url("http://ocsp.example.com", &der).unwrap();
        assert_eq!(url.path(), "/%2B%2F%2F%2BAA%3D%3D");
        assert!(request_url("not a url", &der).is_none());
    }

    #[test]
    fn test_delegated_responder_must_be_authorized() {
        let root = fixture_der("trusted/root-ca.crt");
        let (_, root) = X509Certificate::from_der(&root).unwrap();
        for name in ["mallory.crt", "orphan.crt", "alice.crt"] {
            let der = fixture_der(name);
            let (_, cert) = X509Certificate::from_der(&der).unwrap();
            assert!(!authorized_responder(&cert, &root), "{}", name);
        }
    }

    #[test]
    fn test_no_responder_means_no_answer() {
        let client = OcspClient::new(Duration::from_secs(1));
        let subject = fixture_der("alice.crt");
        let issuer = fixture_der("trusted/root-ca.crt");
        assert_eq!(client.check(&subject, &issuer), None);
    }

    #[test]
    fn test_certificates_from_pem_bundle() {
        let path = format!("{}/tests/fixtures/keystore/alice.crt", env!("CARGO_MANIFEST_DIR"));
        let mut bundle = std::fs::read(&path).unwrap();
        bundle.extend(
            std::fs::read(format!(
                "{}/tests/fixtures/keystore/trusted/root-ca.crt",
                env!("CARGO_MANIFEST_DIR")
            ))
            .unwrap(),
        );
        let certs = certificates_from_bytes(&bundle);
        assert_eq!(certs.len(), 2);
        assert_eq!(certificates_from_bytes(&certs[0]).len(), 1);
    }
}
