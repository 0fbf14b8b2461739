//! Verification of compact JWS envelopes whose signing key is carried in the `x5c` header,
//! as used by the metadata BLOB and by SafetyNet attestations.
//!
//! Verifying the envelope only proves that the payload was signed by the key of the first
//! `x5c` certificate. The chain itself is untrusted until it has been checked with a
//! [crate::chain::CertificateChainValidator].

use crate::chain::convert_der_to_pem;
use crate::error::{MdsError, MdsResult};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use openssl::{bn, ecdsa, hash, nid, pkey, sign, x509::X509};
use serde_json::{Map, Value};

/// The signature algorithms accepted for an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsAlgorithm {
    /// ECDSA P-256 with SHA-256
    ES256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256,
}

impl TryFrom<&str> for JwsAlgorithm {
    type Error = MdsError;

    fn try_from(alg: &str) -> Result<Self, Self::Error> {
        match alg {
            "ES256" => Ok(JwsAlgorithm::ES256),
            "RS256" => Ok(JwsAlgorithm::RS256),
            _ => {
                debug!(%alg, "rejecting jws algorithm");
                Err(MdsError::UnsupportedAlgorithm)
            }
        }
    }
}

/// The protected header fields that are used. A field of the wrong shape counts as missing.
#[derive(Debug)]
struct Header {
    alg: String,
    x5c: Vec<Vec<u8>>,
    typ: Option<String>,
}

impl Header {
    fn parse(raw: &[u8]) -> MdsResult<Self> {
        let fields: Map<String, Value> = serde_json::from_slice(raw)
            .map_err(|_| MdsError::MalformedToken("header is not a json object"))?;

        let alg = fields
            .get("alg")
            .and_then(Value::as_str)
            .ok_or(MdsError::MissingHeaderParameter("alg"))?
            .to_string();

        let x5c = fields
            .get("x5c")
            .and_then(Value::as_array)
            .filter(|chain| !chain.is_empty())
            .ok_or(MdsError::MissingHeaderParameter("x5c"))?
            .iter()
            .map(|c| {
                c.as_str()
                    .and_then(|c| STANDARD.decode(c.trim()).ok())
                    .ok_or(MdsError::MissingHeaderParameter("x5c"))
            })
            .collect::<MdsResult<Vec<_>>>()?;

        let typ = fields.get("typ").and_then(Value::as_str).map(str::to_string);

        Ok(Header { alg, x5c, typ })
    }
}

/// A JWS whose signature has been verified with the key of its first `x5c` certificate.
#[derive(Debug, Clone)]
pub struct VerifiedJws {
    /// The algorithm that signed the envelope.
    pub alg: JwsAlgorithm,
    /// The `typ` header, if any.
    pub typ: Option<String>,
    /// The decoded payload.
    pub payload: Vec<u8>,
    /// The DER certificates of the `x5c` header, leaf first. These are not yet trusted.
    pub x5c: Vec<Vec<u8>>,
}

impl VerifiedJws {
    /// The `x5c` certificates as PEM documents, leaf first.
    pub fn x5c_pem(&self) -> Vec<String> {
        self.x5c.iter().map(|der| convert_der_to_pem(der)).collect()
    }

    /// The `x5c` certificates, leaf first.
    pub fn x5c_chain(&self) -> MdsResult<Vec<X509>> {
        self.x5c
            .iter()
            .map(|der| X509::from_der(der).map_err(|_| MdsError::CertificateParse))
            .collect()
    }
}

fn decode_segment(segment: &str) -> MdsResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| MdsError::MalformedToken("segment is not base64url"))
}

/// Parse and verify a compact JWS.
pub fn verify_compact(token: &str) -> MdsResult<VerifiedJws> {
    let token = token.trim();
    let segments: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
        debug!(segments = segments.len(), "jws must have exactly three segments");
        return Err(MdsError::MalformedToken("expected exactly one signature"));
    };

    let header = Header::parse(&decode_segment(header_b64)?)?;
    let payload = decode_segment(payload_b64)?;
    let signature = decode_segment(signature_b64)?;

    let alg = JwsAlgorithm::try_from(header.alg.as_str())?;
    let x5c = header.x5c;

    let leaf = x5c
        .first()
        .ok_or(MdsError::MissingHeaderParameter("x5c"))
        .and_then(|der| X509::from_der(der).map_err(|_| MdsError::CertificateParse))?;
    let key = leaf.public_key()?;

    let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
    verify_signature(alg, &key, signing_input.as_bytes(), &signature)?;

    trace!(?alg, "jws signature verified");
    Ok(VerifiedJws {
        alg,
        typ: header.typ,
        payload,
        x5c,
    })
}

fn verify_signature(
    alg: JwsAlgorithm,
    key: &pkey::PKeyRef<pkey::Public>,
    signing_input: &[u8],
    signature: &[u8],
) -> MdsResult<()> {
    let der_signature = match alg {
        JwsAlgorithm::ES256 => {
            let is_p256 = key
                .ec_key()
                .ok()
                .and_then(|ec| ec.group().curve_name())
                .map(|curve| curve == nid::Nid::X9_62_PRIME256V1)
                .unwrap_or(false);
            if !is_p256 || signature.len() != 64 {
                return Err(MdsError::InvalidSignature);
            }
            let (r, s) = signature.split_at(32);
            ecdsa::EcdsaSig::from_private_components(
                bn::BigNum::from_slice(r)?,
                bn::BigNum::from_slice(s)?,
            )?
            .to_der()?
        }
        JwsAlgorithm::RS256 => {
            if key.id() != pkey::Id::RSA {
                return Err(MdsError::InvalidSignature);
            }
            signature.to_vec()
        }
    };

    let mut verifier = sign::Verifier::new(hash::MessageDigest::sha256(), key)?;
    verifier.update(signing_input)?;
    match verifier.verify(&der_signature) {
        Ok(true) => Ok(()),
        Ok(false) => Err(MdsError::InvalidSignature),
        Err(e) => {
            debug!(?e, "signature verification error");
            Err(MdsError::InvalidSignature)
        }
    }
}
