//! Runtime generated certificates and signed BLOBs for tests.

use crate::chain::convert_der_to_pem;
use crate::http::{HttpClient, HttpResponse};
use crate::error::{MdsError, MdsResult};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use openssl::{
    asn1, bn, ec, ecdsa, hash, nid, pkey, rsa, sign,
    x509::{
        extension::{AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier},
        X509NameBuilder, X509Ref, X509,
    },
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub type PrivateKey = pkey::PKey<pkey::Private>;

fn ec_key() -> Result<PrivateKey, openssl::error::ErrorStack> {
    let group = ec::EcGroup::from_curve_name(nid::Nid::X9_62_PRIME256V1)?;
    let eckey = ec::EcKey::generate(&group)?;
    pkey::PKey::from_ec_key(eckey)
}

fn time_from_days(days: i64) -> Result<asn1::Asn1Time, openssl::error::ErrorStack> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    asn1::Asn1Time::from_unix(now + days * 86400)
}

fn name(cn: &str) -> Result<openssl::x509::X509Name, openssl::error::ErrorStack> {
    let mut x509_name = X509NameBuilder::new()?;
    x509_name.append_entry_by_text("C", "AU")?;
    x509_name.append_entry_by_text("ST", "QLD")?;
    x509_name.append_entry_by_text("O", "Webauthn MDS Test")?;
    x509_name.append_entry_by_text("CN", cn)?;
    Ok(x509_name.build())
}

pub fn build_ca(unique: &str) -> Result<(PrivateKey, X509), openssl::error::ErrorStack> {
    let ca_key = ec_key()?;
    let x509_name = name(&format!("Test Root CA {}", unique))?;

    let mut cert_builder = X509::builder()?;
    cert_builder.set_version(2)?;
    let serial_number = bn::BigNum::from_u32(1).and_then(|serial| serial.to_asn1_integer())?;
    cert_builder.set_serial_number(&serial_number)?;
    cert_builder.set_subject_name(&x509_name)?;
    cert_builder.set_issuer_name(&x509_name)?;
    cert_builder.set_not_before(&*time_from_days(-1)?)?;
    cert_builder.set_not_after(&*time_from_days(30)?)?;
    cert_builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    cert_builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .build()?,
    )?;
    let ski = SubjectKeyIdentifier::new().build(&cert_builder.x509v3_context(None, None))?;
    cert_builder.append_extension(ski)?;
    cert_builder.set_pubkey(&ca_key)?;
    cert_builder.sign(&ca_key, hash::MessageDigest::sha256())?;

    Ok((ca_key, cert_builder.build()))
}

fn build_issued(
    ca_key: &pkey::PKeyRef<pkey::Private>,
    ca_cert: &X509Ref,
    key: &PrivateKey,
    cn: &str,
    serial: u32,
    validity: (i64, i64),
    is_ca: bool,
) -> Result<X509, openssl::error::ErrorStack> {
    let mut cert_builder = X509::builder()?;
    cert_builder.set_version(2)?;
    let serial_number = bn::BigNum::from_u32(serial).and_then(|serial| serial.to_asn1_integer())?;
    cert_builder.set_serial_number(&serial_number)?;
    cert_builder.set_subject_name(&*name(cn)?)?;
    cert_builder.set_issuer_name(ca_cert.subject_name())?;
    cert_builder.set_not_before(&*time_from_days(validity.0)?)?;
    cert_builder.set_not_after(&*time_from_days(validity.1)?)?;

    if is_ca {
        cert_builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        cert_builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()?,
        )?;
    } else {
        cert_builder.append_extension(BasicConstraints::new().build()?)?;
        cert_builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
    }

    let ski = SubjectKeyIdentifier::new().build(&cert_builder.x509v3_context(Some(ca_cert), None))?;
    cert_builder.append_extension(ski)?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(false)
        .issuer(false)
        .build(&cert_builder.x509v3_context(Some(ca_cert), None))?;
    cert_builder.append_extension(aki)?;

    cert_builder.set_pubkey(key)?;
    cert_builder.sign(ca_key, hash::MessageDigest::sha256())?;
    Ok(cert_builder.build())
}

pub fn build_intermediate(
    ca_key: &pkey::PKeyRef<pkey::Private>,
    ca_cert: &X509Ref,
    cn: &str,
) -> Result<(PrivateKey, X509), openssl::error::ErrorStack> {
    let key = ec_key()?;
    let cert = build_issued(ca_key, ca_cert, &key, cn, 2, (-1, 30), true)?;
    Ok((key, cert))
}

/// A non-CA certificate valid from `not_before` to `not_after` days relative to now.
pub fn build_leaf(
    ca_key: &pkey::PKeyRef<pkey::Private>,
    ca_cert: &X509Ref,
    cn: &str,
    serial: u32,
    not_before: i64,
    not_after: i64,
) -> Result<(PrivateKey, X509), openssl::error::ErrorStack> {
    let key = ec_key()?;
    let cert = build_issued(ca_key, ca_cert, &key, cn, serial, (not_before, not_after), false)?;
    Ok((key, cert))
}

/// A self signed RSA certificate for RS256 envelopes.
pub fn build_rsa_self_signed() -> Result<(PrivateKey, X509), openssl::error::ErrorStack> {
    let key = pkey::PKey::from_rsa(rsa::Rsa::generate(2048)?)?;
    let x509_name = name("Test RSA Signer")?;
    let mut cert_builder = X509::builder()?;
    cert_builder.set_version(2)?;
    let serial_number = bn::BigNum::from_u32(7).and_then(|serial| serial.to_asn1_integer())?;
    cert_builder.set_serial_number(&serial_number)?;
    cert_builder.set_subject_name(&x509_name)?;
    cert_builder.set_issuer_name(&x509_name)?;
    cert_builder.set_not_before(&*time_from_days(-1)?)?;
    cert_builder.set_not_after(&*time_from_days(30)?)?;
    cert_builder.set_pubkey(&key)?;
    cert_builder.sign(&key, hash::MessageDigest::sha256())?;
    Ok((key, cert_builder.build()))
}

/// A root, an intermediate, and a leaf suitable for signing metadata BLOBs.
pub struct ChainFixture {
    pub root: X509,
    pub intermediate: X509,
    pub leaf_key: PrivateKey,
    pub leaf: X509,
}

impl ChainFixture {
    pub fn new(unique: &str) -> Result<Self, openssl::error::ErrorStack> {
        let (root_key, root) = build_ca(unique)?;
        let (int_key, intermediate) =
            build_intermediate(&root_key, &root, &format!("Test Intermediate {}", unique))?;
        let (leaf_key, leaf) = build_leaf(
            &int_key,
            &intermediate,
            &format!("Test BLOB Signer {}", unique),
            3,
            -1,
            30,
        )?;
        Ok(ChainFixture {
            root,
            intermediate,
            leaf_key,
            leaf,
        })
    }

    pub fn untrusted_pem(&self) -> Vec<String> {
        vec![
            convert_der_to_pem(&self.leaf.to_der().unwrap_or_default()),
            convert_der_to_pem(&self.intermediate.to_der().unwrap_or_default()),
        ]
    }

    pub fn x5c(&self) -> Vec<String> {
        vec![
            STANDARD.encode(self.leaf.to_der().unwrap_or_default()),
            STANDARD.encode(self.intermediate.to_der().unwrap_or_default()),
        ]
    }

    pub fn root_der(&self) -> Vec<u8> {
        self.root.to_der().unwrap_or_default()
    }

    pub fn sign_es256(&self, payload: &[u8]) -> String {
        sign_jws(
            &serde_json::json!({ "alg": "ES256", "typ": "JWT", "x5c": self.x5c() }),
            payload,
            &self.leaf_key,
        )
        .unwrap_or_default()
    }
}

/// Produce a compact JWS. The algorithm is taken from the header.
pub fn sign_jws(
    header: &serde_json::Value,
    payload: &[u8],
    key: &PrivateKey,
) -> Result<String, openssl::error::ErrorStack> {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap_or_default());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let signing_input = format!("{}.{}", header_b64, payload_b64);

    let mut signer = sign::Signer::new(hash::MessageDigest::sha256(), key)?;
    signer.update(signing_input.as_bytes())?;
    let der_sig = signer.sign_to_vec()?;

    let sig = if header["alg"] == "ES256" {
        let sig = ecdsa::EcdsaSig::from_der(&der_sig)?;
        let mut raw = sig.r().to_vec_padded(32)?;
        raw.extend(sig.s().to_vec_padded(32)?);
        raw
    } else {
        der_sig
    };

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(sig)))
}

/// An [HttpClient] serving canned responses, counting each request.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    responses: BTreeMap<String, (u16, Vec<u8>)>,
    pub requests: AtomicUsize,
    pub seen_headers: Mutex<Vec<Vec<(String, String)>>>,
    pub delay: Option<std::time::Duration>,
}

impl MockHttpClient {
    pub fn with(mut self, uri: &str, status: u16, body: Vec<u8>) -> Self {
        self.responses.insert(uri.to_string(), (status, body));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl HttpClient for MockHttpClient {
    fn get(&self, uri: &url::Url, headers: &[(String, String)]) -> MdsResult<HttpResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_headers.lock() {
            seen.push(headers.to_vec());
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.responses
            .get(uri.as_str())
            .map(|(status, body)| HttpResponse {
                status: *status,
                body: body.clone(),
            })
            .ok_or_else(|| MdsError::Transport(format!("connection refused: {}", uri)))
    }
}
