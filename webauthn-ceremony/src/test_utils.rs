//! A software authenticator and certificate builders for tests.

use crate::crypto::compute_sha256;
use crate::error::WebauthnResult;
use crate::proto::*;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::error::ErrorStack;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Extension, X509NameBuilder, X509Ref, X509};
use openssl::{bn, ec, ecdsa, hash, nid, pkey, rand, sign};
use serde_cbor_2::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

static SERIAL: AtomicU32 = AtomicU32::new(1);

fn next_serial() -> Result<openssl::asn1::Asn1Integer, ErrorStack> {
    bn::BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed))
        .and_then(|serial| serial.to_asn1_integer())
}

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub(crate) fn ec_key() -> Result<pkey::PKey<pkey::Private>, ErrorStack> {
    let group = ec::EcGroup::from_curve_name(nid::Nid::X9_62_PRIME256V1)?;
    let eckey = ec::EcKey::generate(&group)?;
    pkey::PKey::from_ec_key(eckey)
}

pub(crate) fn cose_key_for(key: &pkey::PKeyRef<pkey::Private>) -> WebauthnResult<COSEKey> {
    let ec_key = key.ec_key()?;
    let mut ctx = bn::BigNumContext::new()?;
    let mut x = bn::BigNum::new()?;
    let mut y = bn::BigNum::new()?;
    ec_key
        .public_key()
        .affine_coordinates(ec_key.group(), &mut x, &mut y, &mut ctx)?;

    Ok(COSEKey {
        type_: COSEAlgorithm::ES256,
        key: COSEKeyType::EC_EC2(COSEEC2Key {
            curve: ECDSACurve::SECP256R1,
            x: x.to_vec_padded(32)?.into(),
            y: y.to_vec_padded(32)?.into(),
        }),
    })
}

pub(crate) fn cose_key_cbor(key: &pkey::PKeyRef<pkey::Private>) -> WebauthnResult<Value> {
    let cose = cose_key_for(key)?;
    let (x, y) = match cose.key {
        COSEKeyType::EC_EC2(ec2) => (ec2.x.0, ec2.y.0),
        _ => return Err(crate::error::WebauthnError::COSEKeyInvalidType),
    };
    let map = BTreeMap::from([
        (Value::Integer(1), Value::Integer(2)),
        (Value::Integer(3), Value::Integer(-7)),
        (Value::Integer(-1), Value::Integer(1)),
        (Value::Integer(-2), Value::Bytes(x)),
        (Value::Integer(-3), Value::Bytes(y)),
    ]);
    Ok(Value::Map(map))
}

pub(crate) fn sign_es256(
    key: &pkey::PKeyRef<pkey::Private>,
    data: &[u8],
) -> Result<Vec<u8>, ErrorStack> {
    let mut signer = sign::Signer::new(hash::MessageDigest::sha256(), key)?;
    signer.update(data)?;
    signer.sign_to_vec()
}

pub(crate) fn build_ca() -> Result<(pkey::PKey<pkey::Private>, X509), ErrorStack> {
    let ca_key = ec_key()?;
    let serial = next_serial()?;

    let mut x509_name = X509NameBuilder::new()?;
    x509_name.append_entry_by_text("C", "AU")?;
    x509_name.append_entry_by_text("ST", "QLD")?;
    x509_name.append_entry_by_text("O", "Webauthn Ceremony")?;
    // The subject must be unique for store based verification to pick the right issuer.
    let cn = format!("Test Attestation CA {}", serial.to_bn()?);
    x509_name.append_entry_by_text("CN", &cn)?;
    let x509_name = x509_name.build();

    let mut cert_builder = X509::builder()?;
    cert_builder.set_version(2)?;
    cert_builder.set_serial_number(&serial)?;
    cert_builder.set_subject_name(&x509_name)?;
    cert_builder.set_issuer_name(&x509_name)?;
    cert_builder.set_not_before(Asn1Time::days_from_now(0)?.as_ref())?;
    cert_builder.set_not_after(Asn1Time::days_from_now(1)?.as_ref())?;

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

fn build_leaf(
    ca_key: &pkey::PKeyRef<pkey::Private>,
    ca_cert: &X509Ref,
    key: &pkey::PKeyRef<pkey::Private>,
    cn: &str,
    extensions: Vec<X509Extension>,
) -> Result<X509, ErrorStack> {
    let mut x509_name = X509NameBuilder::new()?;
    x509_name.append_entry_by_text("C", "AU")?;
    x509_name.append_entry_by_text("ST", "QLD")?;
    x509_name.append_entry_by_text("O", "Webauthn Ceremony")?;
    x509_name.append_entry_by_text("CN", cn)?;
    x509_name.append_entry_by_text("OU", "Authenticator Attestation")?;
    let x509_name = x509_name.build();

    let mut cert_builder = X509::builder()?;
    cert_builder.set_version(2)?;
    let serial = next_serial()?;
    cert_builder.set_serial_number(&serial)?;
    cert_builder.set_pubkey(key)?;
    cert_builder.set_subject_name(&x509_name)?;
    cert_builder.set_issuer_name(ca_cert.subject_name())?;
    cert_builder.set_not_before(Asn1Time::days_from_now(0)?.as_ref())?;
    cert_builder.set_not_after(Asn1Time::days_from_now(1)?.as_ref())?;

    cert_builder.append_extension(BasicConstraints::new().build()?)?;
    cert_builder.append_extension(
        KeyUsage::new()
            .critical()
            .non_repudiation()
            .digital_signature()
            .build()?,
    )?;
    let ski =
        SubjectKeyIdentifier::new().build(&cert_builder.x509v3_context(Some(ca_cert), None))?;
    cert_builder.append_extension(ski)?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(false)
        .issuer(false)
        .build(&cert_builder.x509v3_context(Some(ca_cert), None))?;
    cert_builder.append_extension(aki)?;

    for ext in extensions {
        cert_builder.append_extension(ext)?;
    }

    cert_builder.sign(ca_key, hash::MessageDigest::sha256())?;
    Ok(cert_builder.build())
}

fn der_extension(oid: &str, der: &[u8]) -> Result<X509Extension, ErrorStack> {
    let oid = Asn1Object::from_str(oid)?;
    let value = Asn1OctetString::new_from_bytes(der)?;
    X509Extension::new_from_der(&oid, false, &value)
}

/// A packed attestation certificate for `key`, optionally carrying an AAGUID extension.
pub(crate) fn build_attestation_cert(
    ca_key: &pkey::PKeyRef<pkey::Private>,
    ca_cert: &X509Ref,
    key: &pkey::PKeyRef<pkey::Private>,
    aaguid: Option<Aaguid>,
) -> Result<X509, ErrorStack> {
    let extensions = match aaguid {
        Some(aaguid) => {
            let mut der = vec![0x04, 0x10];
            der.extend_from_slice(&aaguid);
            vec![der_extension("1.3.6.1.4.1.45724.1.1.4", &der)?]
        }
        None => Vec::new(),
    };
    build_leaf(ca_key, ca_cert, key, "Test Attestation Leaf", extensions)
}

/// A credential certificate carrying the apple anonymous attestation nonce.
pub(crate) fn build_apple_cert(
    ca_key: &pkey::PKeyRef<pkey::Private>,
    ca_cert: &X509Ref,
    key: &pkey::PKeyRef<pkey::Private>,
    nonce: &[u8; 32],
) -> Result<X509, ErrorStack> {
    // SEQUENCE { [1] EXPLICIT OCTET STRING nonce }
    let mut der = vec![0x30, 0x24, 0xa1, 0x22, 0x04, 0x20];
    der.extend_from_slice(nonce);
    let ext = der_extension("1.2.840.113635.100.8.2", &der)?;
    build_leaf(ca_key, ca_cert, key, "Test Attestation Leaf", vec![ext])
}

/// A KeyDescription for a TEE held signing key generated on the device.
pub(crate) fn android_key_description(challenge: &[u8]) -> Vec<u8> {
    // [1] EXPLICIT SET OF INTEGER { 2 } purpose, [702] EXPLICIT INTEGER 0 origin
    let tee_enforced = [
        0xa1, 0x05, 0x31, 0x03, 0x02, 0x01, 0x02, 0xbf, 0x85, 0x3e, 0x03, 0x02, 0x01, 0x00,
    ];
    let mut body = vec![
        0x02, 0x01, 0x03, // attestationVersion
        0x0a, 0x01, 0x01, // attestationSecurityLevel
        0x02, 0x01, 0x04, // keymasterVersion
        0x0a, 0x01, 0x01, // keymasterSecurityLevel
        0x04,
        challenge.len() as u8,
    ];
    body.extend_from_slice(challenge);
    body.extend_from_slice(&[0x04, 0x00, 0x30, 0x00, 0x30, tee_enforced.len() as u8]);
    body.extend_from_slice(&tee_enforced);

    let mut der = vec![0x30, body.len() as u8];
    der.extend_from_slice(&body);
    der
}

/// A credential certificate whose KeyDescription carries `challenge`.
pub(crate) fn build_android_key_cert(
    ca_key: &pkey::PKeyRef<pkey::Private>,
    ca_cert: &X509Ref,
    key: &pkey::PKeyRef<pkey::Private>,
    challenge: &[u8],
) -> Result<X509, ErrorStack> {
    let ext = der_extension(
        "1.3.6.1.4.1.11129.2.1.17",
        &android_key_description(challenge),
    )?;
    build_leaf(ca_key, ca_cert, key, "Android Keystore Key", vec![ext])
}

/// A compact ES256 JWS carrying `x5c` in its header.
pub(crate) fn sign_jws_es256(
    key: &pkey::PKeyRef<pkey::Private>,
    x5c: &[&X509Ref],
    payload: &[u8],
) -> Result<String, ErrorStack> {
    let x5c = x5c
        .iter()
        .map(|c| c.to_der().map(|der| STANDARD.encode(der)))
        .collect::<Result<Vec<_>, _>>()?;
    let header = serde_json::json!({ "alg": "ES256", "x5c": x5c });
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload)
    );

    let der_sig = ecdsa::EcdsaSig::from_der(&sign_es256(key, signing_input.as_bytes())?)?;
    let mut raw = der_sig.r().to_vec_padded(32)?;
    raw.extend(der_sig.s().to_vec_padded(32)?);
    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(raw)))
}

pub(crate) fn client_data_json(type_: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": type_,
        "challenge": URL_SAFE_NO_PAD.encode(challenge),
        "origin": origin,
        "crossOrigin": false,
    }))
    .unwrap_or_default()
}

/// How a [SoftAuthenticator] attests new credentials.
pub(crate) enum SoftAttestation {
    None,
    PackedSelf,
    PackedBasic {
        key: pkey::PKey<pkey::Private>,
        cert: X509,
    },
    FidoU2f {
        key: pkey::PKey<pkey::Private>,
        cert: X509,
    },
    Apple {
        ca_key: pkey::PKey<pkey::Private>,
        ca_cert: X509,
    },
    AndroidKey {
        ca_key: pkey::PKey<pkey::Private>,
        ca_cert: X509,
    },
    SafetyNet {
        key: pkey::PKey<pkey::Private>,
        cert: X509,
        ca_cert: X509,
        cts_profile_match: bool,
    },
}

/// An authenticator holding a single ES256 credential.
pub(crate) struct SoftAuthenticator {
    pub aaguid: Aaguid,
    pub key: pkey::PKey<pkey::Private>,
    pub credential_id: Vec<u8>,
    pub counter: u32,
    pub user_verified: bool,
    pub attestation: SoftAttestation,
}

impl SoftAuthenticator {
    pub fn new(aaguid: Aaguid, attestation: SoftAttestation) -> Result<Self, ErrorStack> {
        let mut credential_id = vec![0; 32];
        rand::rand_bytes(&mut credential_id)?;
        Ok(SoftAuthenticator {
            aaguid,
            key: ec_key()?,
            credential_id,
            counter: 0,
            user_verified: true,
            attestation,
        })
    }

    /// An authenticator attesting with a fresh certificate issued by `ca`, carrying the
    /// AAGUID extension.
    pub fn packed_basic(
        aaguid: Aaguid,
        ca_key: &pkey::PKeyRef<pkey::Private>,
        ca_cert: &X509Ref,
    ) -> Result<Self, ErrorStack> {
        let key = ec_key()?;
        let cert = build_attestation_cert(ca_key, ca_cert, &key, Some(aaguid))?;
        SoftAuthenticator::new(aaguid, SoftAttestation::PackedBasic { key, cert })
    }

    /// An authenticator attesting through a SafetyNet response signed by a certificate for
    /// `attest.android.com` issued by `ca`.
    pub fn safetynet(
        ca_key: &pkey::PKeyRef<pkey::Private>,
        ca_cert: &X509Ref,
        cts_profile_match: bool,
    ) -> Result<Self, ErrorStack> {
        let key = ec_key()?;
        let cert = build_leaf(ca_key, ca_cert, &key, "attest.android.com", Vec::new())?;
        SoftAuthenticator::new(
            [0; 16],
            SoftAttestation::SafetyNet {
                key,
                cert,
                ca_cert: ca_cert.to_owned(),
                cts_profile_match,
            },
        )
    }

    fn flags(&self, with_acd: bool) -> u8 {
        let mut flags = 0b0000_0001;
        if self.user_verified {
            flags |= 0b0000_0100;
        }
        if with_acd {
            flags |= 0b0100_0000;
        }
        flags
    }

    pub fn auth_data(&self, rp_id: &str, with_acd: bool) -> WebauthnResult<Vec<u8>> {
        let mut data = compute_sha256(rp_id.as_bytes()).to_vec();
        data.push(self.flags(with_acd));
        data.extend_from_slice(&self.counter.to_be_bytes());
        if with_acd {
            data.extend_from_slice(&self.aaguid);
            data.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
            data.extend_from_slice(&self.credential_id);
            let pk = serde_cbor_2::to_vec(&cose_key_cbor(&self.key)?)?;
            data.extend_from_slice(&pk);
        }
        Ok(data)
    }

    fn att_stmt(&self, auth_data: &[u8], client_data_hash: &[u8]) -> WebauthnResult<Value> {
        let text = |s: &str| Value::Text(s.to_string());
        let signed: Vec<u8> = auth_data
            .iter()
            .chain(client_data_hash.iter())
            .copied()
            .collect();

        let stmt = match &self.attestation {
            SoftAttestation::None => BTreeMap::new(),
            SoftAttestation::PackedSelf => BTreeMap::from([
                (text("alg"), Value::Integer(-7)),
                (text("sig"), Value::Bytes(sign_es256(&self.key, &signed)?)),
            ]),
            SoftAttestation::PackedBasic { key, cert } => BTreeMap::from([
                (text("alg"), Value::Integer(-7)),
                (text("sig"), Value::Bytes(sign_es256(key, &signed)?)),
                (text("x5c"), Value::Array(vec![Value::Bytes(cert.to_der()?)])),
            ]),
            SoftAttestation::FidoU2f { key, cert } => {
                let public_key_u2f = cose_key_for(&self.key)?.get_alg_key_ecc_x962_raw()?;
                let u2f_signed: Vec<u8> = [0x00]
                    .iter()
                    .chain(auth_data[..32].iter())
                    .chain(client_data_hash.iter())
                    .chain(self.credential_id.iter())
                    .chain(public_key_u2f.iter())
                    .copied()
                    .collect();
                BTreeMap::from([
                    (text("sig"), Value::Bytes(sign_es256(key, &u2f_signed)?)),
                    (text("x5c"), Value::Array(vec![Value::Bytes(cert.to_der()?)])),
                ])
            }
            SoftAttestation::AndroidKey { ca_key, ca_cert } => {
                let cert = build_android_key_cert(ca_key, ca_cert, &self.key, client_data_hash)?;
                BTreeMap::from([
                    (text("alg"), Value::Integer(-7)),
                    (text("sig"), Value::Bytes(sign_es256(&self.key, &signed)?)),
                    (
                        text("x5c"),
                        Value::Array(vec![
                            Value::Bytes(cert.to_der()?),
                            Value::Bytes(ca_cert.to_der()?),
                        ]),
                    ),
                ])
            }
            SoftAttestation::SafetyNet {
                key,
                cert,
                ca_cert,
                cts_profile_match,
            } => {
                let timestamp_ms = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default();
                let claims = serde_json::json!({
                    "nonce": STANDARD.encode(compute_sha256(&signed)),
                    "timestampMs": timestamp_ms,
                    "apkPackageName": "com.google.android.gms",
                    "apkCertificateDigestSha256": [STANDARD.encode([0x5a; 32])],
                    "ctsProfileMatch": cts_profile_match,
                    "basicIntegrity": true,
                    "evaluationType": "BASIC",
                });
                let response =
                    sign_jws_es256(key, &[&**cert, &**ca_cert], claims.to_string().as_bytes())?;
                BTreeMap::from([
                    (text("ver"), text("201516037")),
                    (text("response"), Value::Bytes(response.into_bytes())),
                ])
            }
            SoftAttestation::Apple { ca_key, ca_cert } => {
                let nonce = compute_sha256(&signed);
                let cert = build_apple_cert(ca_key, ca_cert, &self.key, &nonce)?;
                BTreeMap::from([(
                    text("x5c"),
                    Value::Array(vec![
                        Value::Bytes(cert.to_der()?),
                        Value::Bytes(ca_cert.to_der()?),
                    ]),
                )])
            }
        };
        Ok(Value::Map(stmt))
    }

    pub fn fmt(&self) -> &'static str {
        match self.attestation {
            SoftAttestation::None => "none",
            SoftAttestation::PackedSelf | SoftAttestation::PackedBasic { .. } => "packed",
            SoftAttestation::FidoU2f { .. } => "fido-u2f",
            SoftAttestation::Apple { .. } => "apple",
            SoftAttestation::AndroidKey { .. } => "android-key",
            SoftAttestation::SafetyNet { .. } => "android-safetynet",
        }
    }

    pub fn attestation_object(
        &self,
        rp_id: &str,
        client_data_hash: &[u8],
    ) -> WebauthnResult<Vec<u8>> {
        let auth_data = self.auth_data(rp_id, true)?;
        let att_stmt = self.att_stmt(&auth_data, client_data_hash)?;
        let text = |s: &str| Value::Text(s.to_string());
        let ao = Value::Map(BTreeMap::from([
            (text("fmt"), text(self.fmt())),
            (text("attStmt"), att_stmt),
            (text("authData"), Value::Bytes(auth_data)),
        ]));
        Ok(serde_cbor_2::to_vec(&ao)?)
    }

    pub fn register(
        &self,
        rp_id: &str,
        challenge: &[u8],
        origin: &str,
    ) -> WebauthnResult<RegisterPublicKeyCredential> {
        let client_data = client_data_json("webauthn.create", challenge, origin);
        let attestation_object =
            self.attestation_object(rp_id, &compute_sha256(&client_data))?;

        Ok(RegisterPublicKeyCredential {
            id: URL_SAFE_NO_PAD.encode(&self.credential_id),
            raw_id: self.credential_id.clone().into(),
            response: AuthenticatorAttestationResponseRaw {
                attestation_object: attestation_object.into(),
                client_data_json: client_data.into(),
                transports: Some(vec![AuthenticatorTransport::Usb]),
            },
            type_: "public-key".to_string(),
        })
    }

    /// Sign an assertion after advancing the counter.
    pub fn authenticate(
        &mut self,
        rp_id: &str,
        challenge: &[u8],
        origin: &str,
        user_handle: Option<&[u8]>,
    ) -> WebauthnResult<PublicKeyCredential> {
        self.counter += 1;
        self.assertion_with_counter(rp_id, challenge, origin, user_handle)
    }

    pub fn assertion_with_counter(
        &self,
        rp_id: &str,
        challenge: &[u8],
        origin: &str,
        user_handle: Option<&[u8]>,
    ) -> WebauthnResult<PublicKeyCredential> {
        let client_data = client_data_json("webauthn.get", challenge, origin);
        let auth_data = self.auth_data(rp_id, false)?;
        let signed: Vec<u8> = auth_data
            .iter()
            .chain(compute_sha256(&client_data).iter())
            .copied()
            .collect();
        let signature = sign_es256(&self.key, &signed)?;

        Ok(PublicKeyCredential {
            id: URL_SAFE_NO_PAD.encode(&self.credential_id),
            raw_id: self.credential_id.clone().into(),
            response: AuthenticatorAssertionResponseRaw {
                authenticator_data: auth_data.into(),
                client_data_json: client_data.into(),
                signature: signature.into(),
                user_handle: user_handle.map(|uh| uh.to_vec().into()),
            },
            type_: "public-key".to_string(),
        })
    }
}
