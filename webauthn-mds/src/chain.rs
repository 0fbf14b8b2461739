//! X.509 certificate chain validation, and normalisation of the many shapes in which
//! certificates are published (PEM, bare base64 DER, raw DER).

use crate::error::{MdsError, MdsResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::stack;
use openssl::x509::{self, store, verify, X509};
use std::fmt;

const PEM_HEADER: &str = "-----BEGIN CERTIFICATE-----";
const PEM_FOOTER: &str = "-----END CERTIFICATE-----";

/// Rewrite a certificate into a canonical PEM document. The input may already be PEM, or a
/// bare base64 DER value possibly wrapped or padded with whitespace, as found in metadata
/// statements.
pub fn fix_pem_structure(certificate: &str) -> String {
    let body: String = certificate
        .replace(PEM_HEADER, "")
        .replace(PEM_FOOTER, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let mut pem = String::with_capacity(body.len() + body.len() / 64 + 64);
    pem.push_str(PEM_HEADER);
    pem.push('\n');
    // base64 is ascii, so splitting on bytes is safe.
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(PEM_FOOTER);
    pem.push('\n');
    pem
}

/// Normalise a list of certificates with [fix_pem_structure].
pub fn fix_pem_structures(certificates: &[String]) -> Vec<String> {
    certificates.iter().map(|c| fix_pem_structure(c)).collect()
}

/// Encode a DER certificate as PEM.
pub fn convert_der_to_pem(der: &[u8]) -> String {
    fix_pem_structure(&STANDARD.encode(der))
}

/// Load a certificate from bytes that are either PEM text, bare base64 DER text, or raw DER.
pub fn load_certificate(data: &[u8]) -> MdsResult<X509> {
    match std::str::from_utf8(data) {
        Ok(text) if !text.trim().is_empty() => {
            X509::from_pem(fix_pem_structure(text).as_bytes()).or_else(|_| {
                X509::from_der(data).map_err(|e| {
                    debug!(?e, "unable to parse certificate");
                    MdsError::CertificateParse
                })
            })
        }
        _ => X509::from_der(data).map_err(|e| {
            debug!(?e, "unable to parse certificate");
            MdsError::CertificateParse
        }),
    }
}

fn parse_pem_list(certificates: &[String]) -> MdsResult<Vec<X509>> {
    certificates
        .iter()
        .map(|c| load_certificate(c.as_bytes()))
        .collect()
}

/// Validates that an untrusted certificate chain terminates at a trusted certificate.
pub trait CertificateChainValidator: fmt::Debug + Send + Sync {
    /// Check the leaf-first `untrusted_certificates` against `trusted_certificates`. Both
    /// lists contain PEM or bare base64 DER certificates.
    fn check(
        &self,
        untrusted_certificates: &[String],
        trusted_certificates: &[String],
    ) -> MdsResult<()>;
}

/// A [CertificateChainValidator] backed by the OpenSSL verifier.
///
/// Every signature is checked against its issuer, including the self-signature of a
/// trusted root. Validity windows are enforced, and intermediates must be CAs. Following
/// metadata statement semantics, a trust anchor does not have to be self-signed: an
/// intermediate or the leaf itself may be trusted directly.
#[derive(Debug, Default, Clone)]
pub struct OpenSSLChainValidator {
    danger_disable_time_checks: bool,
}

impl OpenSSLChainValidator {
    /// Create a validator that enforces certificate validity windows.
    pub fn new() -> Self {
        OpenSSLChainValidator::default()
    }

    /// ⚠️  Disable checks of certificate validity windows. Only for fixtures whose
    /// certificates have long expired.
    pub fn danger_disable_time_checks(mut self) -> Self {
        self.danger_disable_time_checks = true;
        self
    }

    /// Check a parsed chain against parsed trust anchors.
    pub fn check_x509(&self, untrusted: &[X509], trusted: &[X509]) -> MdsResult<()> {
        verify_chain(untrusted, trusted, self.danger_disable_time_checks)
    }
}

impl CertificateChainValidator for OpenSSLChainValidator {
    fn check(
        &self,
        untrusted_certificates: &[String],
        trusted_certificates: &[String],
    ) -> MdsResult<()> {
        let untrusted = parse_pem_list(untrusted_certificates)?;
        let trusted = parse_pem_list(trusted_certificates)?;
        self.check_x509(&untrusted, &trusted)
    }
}

/// Verify that the leaf-first `chain` builds to one of `trusted`.
pub fn verify_chain(
    chain: &[X509],
    trusted: &[X509],
    danger_disable_time_checks: bool,
) -> MdsResult<()> {
    let (leaf, intermediates) = chain.split_first().ok_or(MdsError::EmptyChain)?;

    if trusted.is_empty() {
        debug!("no trust anchors were supplied");
        return Err(MdsError::UntrustedChain);
    }

    let mut chain_stack = stack::Stack::new()?;
    for crt in intermediates {
        chain_stack.push(crt.clone())?;
    }

    let mut ca_store = store::X509StoreBuilder::new()?;

    let mut flags = verify::X509VerifyFlags::PARTIAL_CHAIN
        | verify::X509VerifyFlags::CHECK_SS_SIGNATURE;
    if danger_disable_time_checks {
        flags |= verify::X509VerifyFlags::NO_CHECK_TIME;
    }
    ca_store.set_flags(flags)?;

    let mut seen: Vec<Vec<u8>> = Vec::with_capacity(trusted.len());
    for ca_crt in trusted {
        let der = ca_crt.to_der()?;
        if seen.contains(&der) {
            continue;
        }
        seen.push(der);
        ca_store.add_cert(ca_crt.clone())?;
    }

    let ca_store = ca_store.build();

    let mut ca_ctx = x509::X509StoreContext::new()?;
    let res = ca_ctx.init(&ca_store, leaf, &chain_stack, |ca_ctx_ref| {
        ca_ctx_ref.verify_cert().map(|_| ca_ctx_ref.error())
    })?;

    if res == x509::X509VerifyResult::OK {
        trace!("certificate chain verified");
        return Ok(());
    }

    debug!(?res, "certificate chain verification failed");
    match res.as_raw() {
        openssl_sys::X509_V_ERR_CERT_HAS_EXPIRED | openssl_sys::X509_V_ERR_CERT_NOT_YET_VALID => {
            Err(MdsError::ExpiredCertificate)
        }
        _ => Err(MdsError::UntrustedChain),
    }
}
