//! Certificate trust evaluation for X.509 signers.
//!
//! The chain is built from the signer certificate towards a trust anchor
//! using the certificates embedded in the signature, the keystore's
//! intermediates and, when enabled, issuers fetched from the AIA extension.
//! Every link must be signed by the next certificate. After the chain is
//! complete, validity windows are checked at the validation time, then
//! revocation through local CRLs and, when enabled, OCSP.

use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

use super::ocsp::{OcspClient, OcspStatus};
use super::raw_signature;
use super::types::CertificateStatus;

/// Longest chain followed before giving up.
const MAX_CHAIN_DEPTH: usize = 10;

/// Parameters of one certificate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateCheck {
    /// Instant at which validity windows are checked
    pub validation_time: DateTime<Utc>,
    /// Query OCSP responders
    pub ocsp: bool,
    /// Download missing issuers from caIssuers URLs
    pub aia_fetch: bool,
}

impl Default for CertificateCheck {
    fn default() -> Self {
        Self {
            validation_time: Utc::now(),
            ocsp: true,
            aia_fetch: false,
        }
    }
}

/// Trust anchors, known intermediates and CRLs, all DER encoded.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    anchors: Vec<Vec<u8>>,
    intermediates: Vec<Vec<u8>>,
    crls: Vec<Vec<u8>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_anchor(&mut self, der: Vec<u8>) {
        if !self.anchors.contains(&der) {
            self.anchors.push(der);
        }
    }

    pub fn add_intermediate(&mut self, der: Vec<u8>) {
        if !self.intermediates.contains(&der) {
            self.intermediates.push(der);
        }
    }

    pub fn add_crl(&mut self, der: Vec<u8>) {
        self.crls.push(der);
    }

    pub fn anchors(&self) -> &[Vec<u8>] {
        &self.anchors
    }

    pub fn is_anchor(&self, der: &[u8]) -> bool {
        self.anchors.iter().any(|a| a == der)
    }

    /// Evaluate the signer certificate `leaf` with the extra certificates
    /// shipped in the signature.
    pub fn evaluate(
        &self,
        leaf: &[u8],
        embedded: &[Vec<u8>],
        check: &CertificateCheck,
        client: &OcspClient,
    ) -> CertificateStatus {
        let chain = match self.build_chain(leaf, embedded, check, client) {
            Ok(chain) => chain,
            Err(status) => return status,
        };

        for der in &chain {
            let Ok((_, cert)) = X509Certificate::from_der(der) else {
                return CertificateStatus::GenericError;
            };
            let at = check.validation_time.timestamp();
            let validity = cert.validity();
            if at < validity.not_before.timestamp() || at > validity.not_after.timestamp() {
                log::info!("Certificate {} is outside its validity window", cert.subject());
                return CertificateStatus::Expired;
            }
        }

        for pair in chain.windows(2) {
            let (subject, issuer) = (&pair[0], &pair[1]);
            if self.revoked_by_crl(subject, issuer) {
                return CertificateStatus::Revoked;
            }
            if check.ocsp && client.check(subject, issuer) == Some(OcspStatus::Revoked) {
                return CertificateStatus::Revoked;
            }
        }

        CertificateStatus::Trusted
    }

    /// Chain from `leaf` to an anchor, leaf first.
    fn build_chain(
        &self,
        leaf: &[u8],
        embedded: &[Vec<u8>],
        check: &CertificateCheck,
        client: &OcspClient,
    ) -> std::result::Result<Vec<Vec<u8>>, CertificateStatus> {
        let mut chain = vec![leaf.to_vec()];
        let mut pool: Vec<Vec<u8>> = embedded.iter().chain(&self.intermediates).cloned().collect();

        loop {
            let current = chain.last().cloned().unwrap_or_default();
            if self.is_anchor(&current) {
                return Ok(chain);
            }
            if chain.len() > MAX_CHAIN_DEPTH {
                log::warn!("Certificate chain longer than {} certificates", MAX_CHAIN_DEPTH);
                return Err(CertificateStatus::GenericError);
            }
            let Ok((_, cert)) = X509Certificate::from_der(&current) else {
                return Err(CertificateStatus::GenericError);
            };
            if is_self_issued(&cert) && signed_by(&cert, &cert) {
                log::info!("Self-signed certificate {} is not a trust anchor", cert.subject());
                return Err(CertificateStatus::UntrustedIssuer);
            }

            if let Some(anchor) = find_issuer(&cert, &self.anchors) {
                chain.push(anchor);
                return Ok(chain);
            }
            if let Some(next) = find_issuer(&cert, &pool) {
                pool.retain(|c| c != &next);
                chain.push(next);
                continue;
            }
            if check.aia_fetch {
                let fetched = client.fetch_issuer(&cert);
                if let Some(next) = find_issuer(&cert, &fetched) {
                    chain.push(next);
                    continue;
                }
            }
            log::info!("Issuer of {} not found", cert.subject());
            return Err(CertificateStatus::UnknownIssuer);
        }
    }

    fn revoked_by_crl(&self, subject_der: &[u8], issuer_der: &[u8]) -> bool {
        let (Ok((_, subject)), Ok((_, issuer))) = (
            X509Certificate::from_der(subject_der),
            X509Certificate::from_der(issuer_der),
        ) else {
            return false;
        };
        for crl_der in &self.crls {
            let Ok((_, crl)) = CertificateRevocationList::from_der(crl_der) else {
                log::warn!("Skipping unparsable CRL");
                continue;
            };
            if crl.issuer().as_raw() != issuer.subject().as_raw() {
                continue;
            }
            let signed = raw_signature::verify_signed_data(
                issuer.public_key().raw,
                &crl.signature_algorithm.algorithm.to_id_string(),
                crl.tbs_cert_list.as_ref(),
                &crl.signature_value.data,
            )
            .unwrap_or(false);
            if !signed {
                log::warn!("Ignoring CRL from {} with a bad signature", crl.issuer());
                continue;
            }
            if crl
                .iter_revoked_certificates()
                .any(|revoked| revoked.raw_serial() == subject.raw_serial())
            {
                log::info!("Certificate {} is revoked by CRL", subject.subject());
                return true;
            }
        }
        false
    }
}

fn is_self_issued(cert: &X509Certificate<'_>) -> bool {
    cert.subject().as_raw() == cert.issuer().as_raw()
}

/// Whether `cert` carries a valid signature made with `issuer`'s key.
pub(crate) fn signed_by(cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    raw_signature::verify_signed_data(
        issuer.public_key().raw,
        &cert.signature_algorithm.algorithm.to_id_string(),
        cert.tbs_certificate.as_ref(),
        &cert.signature_value.data,
    )
    .unwrap_or(false)
}

fn find_issuer(cert: &X509Certificate<'_>, candidates: &[Vec<u8>]) -> Option<Vec<u8>> {
    candidates
        .iter()
        .find(|der| match X509Certificate::from_der(der) {
            Ok((_, candidate)) => {
                candidate.subject().as_raw() == cert.issuer().as_raw()
                    && signed_by(cert, &candidate)
            },
            Err(_) => false,
        })
        .cloned()
}
