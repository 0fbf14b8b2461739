//! COSE keys, signature checks and attestation certificate requirements, all backed by
//! OpenSSL. Certificate extensions that OpenSSL does not expose are read with x509-parser.

#![allow(non_camel_case_types)]

use crate::error::*;
use crate::proto::*;
use openssl::{bn, ec, hash, nid, pkey, rsa, sign, x509};
use x509_parser::der_parser::oid;
use x509_parser::oid_registry::Oid;
use x509_parser::prelude::{GeneralName, X509Certificate, X509Name, X509Version};

pub(crate) const TCG_AT_TPM_MANUFACTURER: Oid<'static> = oid!(2.23.133 .2 .1);
pub(crate) const TCG_AT_TPM_MODEL: Oid<'static> = oid!(2.23.133 .2 .2);
pub(crate) const TCG_AT_TPM_VERSION: Oid<'static> = oid!(2.23.133 .2 .3);
pub(crate) const TCG_KP_AIK_CERTIFICATE: Oid<'static> = oid!(2.23.133 .8 .3);

/// The TPM that an AIK certificate was issued to, named in its subject alternative name.
#[derive(Debug)]
struct TpmDevice<'a> {
    manufacturer: &'a str,
    model: &'a str,
    version: &'a str,
}

impl<'a> TpmDevice<'a> {
    // All three attributes must be present.
    fn from_directory_name(name: &'a X509Name<'a>) -> Option<Self> {
        let attribute = |oid: &Oid<'static>| {
            name.iter_attributes()
                .find(|attr| attr.attr_type() == oid)
                .and_then(|attr| attr.as_str().ok())
        };
        Some(TpmDevice {
            manufacturer: attribute(&TCG_AT_TPM_MANUFACTURER)?,
            model: attribute(&TCG_AT_TPM_MODEL)?,
            version: attribute(&TCG_AT_TPM_VERSION)?,
        })
    }
}

impl ECDSACurve {
    fn to_openssl_nid(self) -> nid::Nid {
        match self {
            ECDSACurve::SECP256R1 => nid::Nid::X9_62_PRIME256V1,
            ECDSACurve::SECP384R1 => nid::Nid::SECP384R1,
            ECDSACurve::SECP521R1 => nid::Nid::SECP521R1,
        }
    }

    fn from_openssl_nid(n: nid::Nid) -> Result<Self, WebauthnError> {
        match n {
            nid::Nid::X9_62_PRIME256V1 => Ok(ECDSACurve::SECP256R1),
            nid::Nid::SECP384R1 => Ok(ECDSACurve::SECP384R1),
            nid::Nid::SECP521R1 => Ok(ECDSACurve::SECP521R1),
            _ => Err(WebauthnError::COSEKeyECDSAInvalidCurve),
        }
    }
}

impl EDDSACurve {
    fn to_openssl_id(self) -> pkey::Id {
        match self {
            EDDSACurve::ED25519 => pkey::Id::ED25519,
            EDDSACurve::ED448 => pkey::Id::ED448,
        }
    }
}

/// The digest an algorithm signs with. EdDSA signs the message itself.
fn digest_for(alg: COSEAlgorithm) -> Result<Option<hash::MessageDigest>, WebauthnError> {
    match alg {
        COSEAlgorithm::ES256 | COSEAlgorithm::RS256 | COSEAlgorithm::PS256 => {
            Ok(Some(hash::MessageDigest::sha256()))
        }
        COSEAlgorithm::ES384 | COSEAlgorithm::RS384 | COSEAlgorithm::PS384 => {
            Ok(Some(hash::MessageDigest::sha384()))
        }
        COSEAlgorithm::ES521 | COSEAlgorithm::RS512 | COSEAlgorithm::PS512 => {
            Ok(Some(hash::MessageDigest::sha512()))
        }
        COSEAlgorithm::EDDSA => Ok(None),
        COSEAlgorithm::INSECURE_RS1 => {
            warn!("INSECURE SHA1 USAGE DETECTED");
            Err(WebauthnError::CredentialInsecureCryptography)
        }
    }
}

/// Hash `input` with the digest of `alg`.
pub(crate) fn only_hash_from_type(alg: COSEAlgorithm, input: &[u8]) -> WebauthnResult<Vec<u8>> {
    match digest_for(alg)? {
        Some(md) => hash::hash(md, input)
            .map(|d| d.to_vec())
            .map_err(WebauthnError::OpenSSLError),
        None => {
            debug!(?alg, "algorithm does not define a digest");
            Err(WebauthnError::COSEKeyInvalidType)
        }
    }
}

fn verify_with_pkey(
    alg: COSEAlgorithm,
    pkey: &pkey::PKeyRef<pkey::Public>,
    signature: &[u8],
    verification_data: &[u8],
) -> WebauthnResult<bool> {
    let result = match digest_for(alg)? {
        Some(md) => {
            let mut verifier = sign::Verifier::new(md, pkey)?;
            if matches!(
                alg,
                COSEAlgorithm::PS256 | COSEAlgorithm::PS384 | COSEAlgorithm::PS512
            ) {
                verifier.set_rsa_padding(rsa::Padding::PKCS1_PSS)?;
                verifier.set_rsa_pss_saltlen(sign::RsaPssSaltlen::DIGEST_LENGTH)?;
            }
            verifier
                .update(verification_data)
                .and_then(|_| verifier.verify(signature))
        }
        None => sign::Verifier::new_without_digest(pkey)
            .and_then(|mut verifier| verifier.verify_oneshot(signature, verification_data)),
    };

    // Malformed signatures surface as errors from openssl, they are simply invalid here.
    Ok(result.unwrap_or_else(|e| {
        debug!(?e, "signature could not be checked");
        false
    }))
}

/// Validate an x509 signature is valid for the supplied data
pub(crate) fn verify_signature(
    alg: COSEAlgorithm,
    certificate: &x509::X509Ref,
    signature: &[u8],
    verification_data: &[u8],
) -> WebauthnResult<bool> {
    let pkey = certificate.public_key()?;
    verify_with_pkey(alg, &pkey, signature, verification_data)
}

fn parse_x509_der(der: &[u8]) -> WebauthnResult<X509Certificate<'_>> {
    x509_parser::parse_x509_certificate(der)
        .map(|(_, cert)| cert)
        .map_err(|e| {
            debug!(?e, "unable to parse certificate");
            WebauthnError::AttestationStatementX5CInvalid
        })
}

fn assert_not_ca(cert: &X509Certificate<'_>, required: bool) -> WebauthnResult<()> {
    match cert.basic_constraints() {
        Ok(Some(bc)) if !bc.value.ca => Ok(()),
        Ok(None) if !required => Ok(()),
        _ => Err(WebauthnError::AttestationCertificateRequirementsNotMet),
    }
}

/// Verify that attestnCert meets the requirements in § 8.2.1 Packed Attestation
/// Statement Certificate Requirements.
/// <https://w3c.github.io/webauthn/#sctn-packed-attestation-cert-requirements>
pub(crate) fn assert_packed_attest_req(pubk: &x509::X509Ref) -> WebauthnResult<()> {
    // Version MUST be set to 3 (which is indicated by an ASN.1 INTEGER with value 2).
    if pubk.version() != 2 {
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    // Subject-C, Subject-O, Subject-OU "Authenticator Attestation", Subject-CN
    let subject_name_ref = pubk.subject_name();

    let has = |n: nid::Nid| subject_name_ref.entries_by_nid(n).next().is_some();
    if !has(nid::Nid::COUNTRYNAME) || !has(nid::Nid::ORGANIZATIONNAME) || !has(nid::Nid::COMMONNAME)
    {
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    let ou = subject_name_ref
        .entries_by_nid(nid::Nid::ORGANIZATIONALUNITNAME)
        .next()
        .ok_or(WebauthnError::AttestationCertificateRequirementsNotMet)?;
    let ou = ou
        .data()
        .as_utf8()
        .map_err(|_| WebauthnError::AttestationCertificateRequirementsNotMet)?;
    if ou.to_string() != "Authenticator Attestation" {
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    // The Basic Constraints extension MUST have the CA component set to false.
    let der = pubk.to_der()?;
    let cert = parse_x509_der(&der)?;
    assert_not_ca(&cert, false)
}

/// Verify that aik_cert meets the requirements in § 8.3.1 TPM Attestation Statement
/// Certificate Requirements.
pub(crate) fn assert_tpm_attest_req(pubk: &x509::X509Ref) -> WebauthnResult<()> {
    let der = pubk.to_der()?;
    let cert = parse_x509_der(&der)?;

    if cert.version() != X509Version::V3 {
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    // Subject field MUST be set to empty.
    if cert.subject().iter_attributes().next().is_some() {
        debug!("tpm attestation certificate subject is not empty");
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    // The Subject Alternative Name extension MUST be set as defined in
    // [TPMv2-EK-Profile] section 3.2.9.
    let san = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .ok_or(WebauthnError::AttestationCertificateRequirementsNotMet)?;

    let device = san
        .value
        .general_names
        .iter()
        .find_map(|name| match name {
            GeneralName::DirectoryName(dn) => TpmDevice::from_directory_name(dn),
            _ => None,
        })
        .ok_or(WebauthnError::AttestationCertificateRequirementsNotMet)?;
    trace!(
        manufacturer = %device.manufacturer,
        model = %device.model,
        version = %device.version,
        "tpm attestation certificate"
    );

    // The Extended Key Usage extension MUST contain the OID 2.23.133.8.3
    let eku = cert
        .extended_key_usage()
        .ok()
        .flatten()
        .ok_or(WebauthnError::AttestationCertificateRequirementsNotMet)?;
    if !eku.value.other.contains(&TCG_KP_AIK_CERTIFICATE) {
        return Err(WebauthnError::AttestationCertificateRequirementsNotMet);
    }

    // The Basic Constraints extension MUST have the CA component set to false.
    assert_not_ca(&cert, true)
}

impl TryFrom<&serde_cbor_2::Value> for COSEKey {
    type Error = WebauthnError;
    fn try_from(d: &serde_cbor_2::Value) -> Result<COSEKey, Self::Error> {
        let m = cbor_try_map!(d)?;

        // See also https://tools.ietf.org/html/rfc8152#section-3.1
        // 1 is the key type, 3 the algorithm, and negative labels are specific to the
        // key type.
        let key_type_value = m
            .get(&serde_cbor_2::Value::Integer(1))
            .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
        let key_type = cbor_try_i128!(key_type_value)?;

        let content_type_value = m
            .get(&serde_cbor_2::Value::Integer(3))
            .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
        let content_type = cbor_try_i128!(content_type_value)?;

        let type_ = COSEAlgorithm::try_from(content_type)
            .map_err(|_| WebauthnError::COSEKeyInvalidAlgorithm)?;

        // https://www.iana.org/assignments/cose/cose.xhtml
        // https://www.w3.org/TR/webauthn/#sctn-encoded-credPubKey-examples
        if key_type == (COSEKeyTypeId::EC_EC2 as i128)
            && matches!(
                type_,
                COSEAlgorithm::ES256 | COSEAlgorithm::ES384 | COSEAlgorithm::ES521
            )
        {
            // crv (-1), x (-2) and y (-3)
            let curve_type_value = m
                .get(&serde_cbor_2::Value::Integer(-1))
                .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
            let curve = cbor_try_i128!(curve_type_value).and_then(ECDSACurve::try_from)?;

            let x_value = m
                .get(&serde_cbor_2::Value::Integer(-2))
                .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
            let x = cbor_try_bytes!(x_value)?;

            let y_value = m
                .get(&serde_cbor_2::Value::Integer(-3))
                .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
            let y = cbor_try_bytes!(y_value)?;

            let coord_len = curve.coordinate_size();
            if x.len() != coord_len || y.len() != coord_len {
                return Err(WebauthnError::COSEKeyECDSAXYInvalid);
            }

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::EC_EC2(COSEEC2Key {
                    curve,
                    x: x.to_vec().into(),
                    y: y.to_vec().into(),
                }),
            };

            // The rfc additionally states:
            //   "   Applications MUST check that the curve and the key type are
            //     consistent and reject a key if they are not."
            // this means feeding the values to openssl to validate them for us!
            cose_key.validate()?;
            Ok(cose_key)
        } else if key_type == (COSEKeyTypeId::EC_RSA as i128)
            && matches!(
                type_,
                COSEAlgorithm::RS256
                    | COSEAlgorithm::RS384
                    | COSEAlgorithm::RS512
                    | COSEAlgorithm::PS256
                    | COSEAlgorithm::PS384
                    | COSEAlgorithm::PS512
                    | COSEAlgorithm::INSECURE_RS1
            )
        {
            // -1 -> n, -2 -> e
            let n_value = m
                .get(&serde_cbor_2::Value::Integer(-1))
                .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
            let n = cbor_try_bytes!(n_value)?;

            let e_value = m
                .get(&serde_cbor_2::Value::Integer(-2))
                .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
            let e = cbor_try_bytes!(e_value)?;

            // 2048 bit keys or larger only.
            if n.len() < 256 || n.len() > 512 || e.len() != 3 {
                return Err(WebauthnError::COSEKeyRSANEInvalid);
            }

            let mut e_temp = [0; 3];
            e_temp.copy_from_slice(e.as_slice());

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::RSA(COSERSAKey {
                    n: n.to_vec().into(),
                    e: e_temp,
                }),
            };

            cose_key.validate()?;
            Ok(cose_key)
        } else if key_type == (COSEKeyTypeId::EC_OKP as i128) && (type_ == COSEAlgorithm::EDDSA) {
            // https://datatracker.ietf.org/doc/html/rfc8152#section-13.2
            let curve_type_value = m
                .get(&serde_cbor_2::Value::Integer(-1))
                .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
            let curve = cbor_try_i128!(curve_type_value).and_then(EDDSACurve::try_from)?;

            let x_value = m
                .get(&serde_cbor_2::Value::Integer(-2))
                .ok_or(WebauthnError::COSEKeyInvalidCBORValue)?;
            let x = cbor_try_bytes!(x_value)?;

            if x.len() != curve.coordinate_size() {
                return Err(WebauthnError::COSEKeyEDDSAXInvalid);
            }

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::EC_OKP(COSEOKPKey {
                    curve,
                    x: x.to_vec().into(),
                }),
            };

            cose_key.validate()?;
            Ok(cose_key)
        } else {
            debug!(?key_type, ?type_, "WebauthnError::COSEKeyInvalidType");
            Err(WebauthnError::COSEKeyInvalidType)
        }
    }
}

impl TryFrom<(COSEAlgorithm, &x509::X509Ref)> for COSEKey {
    type Error = WebauthnError;

    fn try_from((alg, pubk): (COSEAlgorithm, &x509::X509Ref)) -> Result<COSEKey, Self::Error> {
        let pkey = pubk.public_key()?;

        let key = match alg {
            COSEAlgorithm::ES256 | COSEAlgorithm::ES384 | COSEAlgorithm::ES521 => {
                let ec_key = pkey
                    .ec_key()
                    .map_err(|_| WebauthnError::CertificatePublicKeyAlgorithmMismatch)?;
                let group = ec_key.group();
                let curve = group
                    .curve_name()
                    .ok_or(WebauthnError::COSEKeyECDSAInvalidCurve)
                    .and_then(ECDSACurve::from_openssl_nid)?;

                let mut ctx = bn::BigNumContext::new()?;
                let mut xbn = bn::BigNum::new()?;
                let mut ybn = bn::BigNum::new()?;
                ec_key
                    .public_key()
                    .affine_coordinates(group, &mut xbn, &mut ybn, &mut ctx)?;

                let coord_len = curve.coordinate_size() as i32;
                COSEKeyType::EC_EC2(COSEEC2Key {
                    curve,
                    x: xbn.to_vec_padded(coord_len)?.into(),
                    y: ybn.to_vec_padded(coord_len)?.into(),
                })
            }
            COSEAlgorithm::RS256
            | COSEAlgorithm::RS384
            | COSEAlgorithm::RS512
            | COSEAlgorithm::PS256
            | COSEAlgorithm::PS384
            | COSEAlgorithm::PS512 => {
                let rsa_key = pkey
                    .rsa()
                    .map_err(|_| WebauthnError::CertificatePublicKeyAlgorithmMismatch)?;
                let e = rsa_key.e().to_vec_padded(3)?;
                let mut e_temp = [0; 3];
                if e.len() != 3 {
                    return Err(WebauthnError::COSEKeyRSANEInvalid);
                }
                e_temp.copy_from_slice(&e);
                COSEKeyType::RSA(COSERSAKey {
                    n: rsa_key.n().to_vec().into(),
                    e: e_temp,
                })
            }
            COSEAlgorithm::EDDSA => {
                let curve = match pkey.id() {
                    pkey::Id::ED25519 => EDDSACurve::ED25519,
                    pkey::Id::ED448 => EDDSACurve::ED448,
                    _ => return Err(WebauthnError::CertificatePublicKeyAlgorithmMismatch),
                };
                COSEKeyType::EC_OKP(COSEOKPKey {
                    curve,
                    x: pkey.raw_public_key()?.into(),
                })
            }
            COSEAlgorithm::INSECURE_RS1 => {
                return Err(WebauthnError::CredentialInsecureCryptography);
            }
        };

        Ok(COSEKey { type_: alg, key })
    }
}

impl COSEKey {
    pub(crate) fn get_alg_key_ecc_x962_raw(&self) -> WebauthnResult<Vec<u8>> {
        // Let publicKeyU2F be the concatenation 0x04 || x || y.
        // Note: This signifies uncompressed ECC key format.
        match &self.key {
            COSEKeyType::EC_EC2(ecpk) => {
                let r: [u8; 1] = [0x04];
                Ok(r.iter()
                    .chain(ecpk.x.0.iter())
                    .chain(ecpk.y.0.iter())
                    .copied()
                    .collect())
            }
            _ => {
                debug!("get_alg_key_ecc_x962_raw");
                Err(WebauthnError::COSEKeyInvalidType)
            }
        }
    }

    pub(crate) fn validate(&self) -> WebauthnResult<()> {
        self.get_openssl_pkey().map(|_| ())
    }

    /// Retrieve the public key of this COSEKey as an OpenSSL structure
    pub fn get_openssl_pkey(&self) -> WebauthnResult<pkey::PKey<pkey::Public>> {
        match &self.key {
            COSEKeyType::EC_EC2(ec2k) => {
                let group = ec::EcGroup::from_curve_name(ec2k.curve.to_openssl_nid())?;
                let xbn = bn::BigNum::from_slice(ec2k.x.as_ref())?;
                let ybn = bn::BigNum::from_slice(ec2k.y.as_ref())?;

                let ec_key = ec::EcKey::from_public_key_affine_coordinates(&group, &xbn, &ybn)
                    .map_err(|e| {
                        debug!(?e, "invalid ec point");
                        WebauthnError::COSEKeyECDSAXYInvalid
                    })?;

                ec_key.check_key().map_err(|e| {
                    debug!(?e, "ec key is not on the curve");
                    WebauthnError::COSEKeyECDSAXYInvalid
                })?;

                pkey::PKey::from_ec_key(ec_key).map_err(WebauthnError::OpenSSLError)
            }
            COSEKeyType::RSA(rsak) => {
                let nbn = bn::BigNum::from_slice(rsak.n.as_ref())?;
                let ebn = bn::BigNum::from_slice(&rsak.e)?;

                let rsa_key = rsa::Rsa::from_public_components(nbn, ebn)
                    .map_err(|_| WebauthnError::COSEKeyRSANEInvalid)?;

                pkey::PKey::from_rsa(rsa_key).map_err(WebauthnError::OpenSSLError)
            }
            COSEKeyType::EC_OKP(edk) => {
                pkey::PKey::public_key_from_raw_bytes(edk.x.as_ref(), edk.curve.to_openssl_id())
                    .map_err(|e| {
                        debug!(?e, "invalid eddsa key");
                        WebauthnError::COSEKeyEDDSAXInvalid
                    })
            }
        }
    }

    /// Verifies data was signed with this [COSEKey].
    pub fn verify_signature(
        &self,
        signature: &[u8],
        verification_data: &[u8],
    ) -> WebauthnResult<bool> {
        let pkey = self.get_openssl_pkey()?;
        verify_with_pkey(self.type_, &pkey, signature, verification_data)
    }
}

/// Compute the sha256 of a slice of data.
pub fn compute_sha256(data: &[u8]) -> [u8; 32] {
    openssl::sha::sha256(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use hex_literal::hex;
    use serde_cbor_2::Value;
    use std::collections::BTreeMap;

    // A COSE EC2 key in CBOR, and the openssl key it encodes.
    fn ec2_cbor(curve: nid::Nid, alg: i128, crv: i128) -> (pkey::PKey<pkey::Private>, Value) {
        let group = ec::EcGroup::from_curve_name(curve).unwrap();
        let ec_key = ec::EcKey::generate(&group).unwrap();
        let mut ctx = bn::BigNumContext::new().unwrap();
        let mut x = bn::BigNum::new().unwrap();
        let mut y = bn::BigNum::new().unwrap();
        ec_key
            .public_key()
            .affine_coordinates(&group, &mut x, &mut y, &mut ctx)
            .unwrap();
        let len = ((group.degree() + 7) / 8) as i32;
        let map = BTreeMap::from([
            (Value::Integer(1), Value::Integer(2)),
            (Value::Integer(3), Value::Integer(alg)),
            (Value::Integer(-1), Value::Integer(crv)),
            (Value::Integer(-2), Value::Bytes(x.to_vec_padded(len).unwrap())),
            (Value::Integer(-3), Value::Bytes(y.to_vec_padded(len).unwrap())),
        ]);
        (pkey::PKey::from_ec_key(ec_key).unwrap(), Value::Map(map))
    }

    #[test]
    fn cbor_ec2_keys() {
        for (curve, alg, crv, type_, expected_curve) in [
            (nid::Nid::X9_62_PRIME256V1, -7, 1, COSEAlgorithm::ES256, ECDSACurve::SECP256R1),
            (nid::Nid::SECP384R1, -35, 2, COSEAlgorithm::ES384, ECDSACurve::SECP384R1),
            (nid::Nid::SECP521R1, -36, 3, COSEAlgorithm::ES521, ECDSACurve::SECP521R1),
        ] {
            let (key, cbor) = ec2_cbor(curve, alg, crv);
            let cose = COSEKey::try_from(&cbor).unwrap();
            assert_eq!(cose.type_, type_);
            assert!(
                matches!(&cose.key, COSEKeyType::EC_EC2(ec2) if ec2.curve == expected_curve)
            );
            assert!(cose.get_openssl_pkey().unwrap().public_eq(&key));
        }

        // The soft authenticator encoding parses to the same key.
        let key = ec_key().unwrap();
        let cose = COSEKey::try_from(&cose_key_cbor(&key).unwrap()).unwrap();
        assert_eq!(cose, cose_key_for(&key).unwrap());
    }

    #[test]
    fn cbor_ec2_key_checks() {
        // A curve that does not match the coordinate size.
        let (_, mut cbor) = ec2_cbor(nid::Nid::X9_62_PRIME256V1, -7, 2);
        assert!(matches!(
            COSEKey::try_from(&cbor),
            Err(WebauthnError::COSEKeyECDSAXYInvalid)
        ));

        // A point that is not on the curve.
        if let Value::Map(map) = &mut cbor {
            map.insert(Value::Integer(-1), Value::Integer(1));
            if let Some(Value::Bytes(y)) = map.get_mut(&Value::Integer(-3)) {
                y[31] ^= 0x01;
            }
        }
        assert!(matches!(
            COSEKey::try_from(&cbor),
            Err(WebauthnError::COSEKeyECDSAXYInvalid)
        ));
    }

    #[test]
    fn cbor_unsupported_key_type() {
        let hex_data = hex!(
                "A3"
                "01 04"      // kty: symmetric
                "03 26"
                "20 01"
        );
        let val: Value = serde_cbor_2::from_slice(&hex_data).unwrap();
        assert!(matches!(
            COSEKey::try_from(&val),
            Err(WebauthnError::COSEKeyInvalidType)
        ));
    }

    #[test]
    fn es256_signatures_verify() {
        let key = ec_key().unwrap();
        let cose = cose_key_for(&key).unwrap();
        let data = b"authenticator data and client data hash";

        let sig = sign_es256(&key, data).unwrap();
        assert!(cose.verify_signature(&sig, data).unwrap());
        assert!(!cose.verify_signature(&sig, b"other data").unwrap());
        assert!(!cose.verify_signature(b"not a der signature", data).unwrap());
    }

    #[test]
    fn rsa_pss_signatures_verify() {
        let rsa_key = rsa::Rsa::generate(2048).unwrap();
        let key = pkey::PKey::from_rsa(rsa_key).unwrap();
        let pubkey = key.rsa().unwrap();
        let cose = COSEKey {
            type_: COSEAlgorithm::PS256,
            key: COSEKeyType::RSA(COSERSAKey {
                n: pubkey.n().to_vec().into(),
                e: [1, 0, 1],
            }),
        };

        let data = b"some data";
        let mut signer = sign::Signer::new(hash::MessageDigest::sha256(), &key).unwrap();
        signer.set_rsa_padding(rsa::Padding::PKCS1_PSS).unwrap();
        signer
            .set_rsa_pss_saltlen(sign::RsaPssSaltlen::DIGEST_LENGTH)
            .unwrap();
        signer.update(data).unwrap();
        let sig = signer.sign_to_vec().unwrap();

        assert!(cose.verify_signature(&sig, data).unwrap());

        let rs256 = COSEKey {
            type_: COSEAlgorithm::RS256,
            ..cose
        };
        assert!(!rs256.verify_signature(&sig, data).unwrap());
    }

    #[test]
    fn insecure_rs1_is_refused() {
        assert!(matches!(
            only_hash_from_type(COSEAlgorithm::INSECURE_RS1, b"data"),
            Err(WebauthnError::CredentialInsecureCryptography)
        ));
        assert_eq!(
            only_hash_from_type(COSEAlgorithm::RS256, b"data").unwrap(),
            compute_sha256(b"data").to_vec()
        );
    }

    #[test]
    fn certificate_key_matches_cose_key() {
        let (ca_key, ca_cert) = build_ca().unwrap();
        let key = ec_key().unwrap();
        let cert = build_attestation_cert(&ca_key, &ca_cert, &key, None).unwrap();

        let from_cert = COSEKey::try_from((COSEAlgorithm::ES256, &*cert)).unwrap();
        assert_eq!(from_cert, cose_key_for(&key).unwrap());

        assert!(matches!(
            COSEKey::try_from((COSEAlgorithm::RS256, &*cert)),
            Err(WebauthnError::CertificatePublicKeyAlgorithmMismatch)
        ));
    }

    #[test]
    fn packed_certificate_requirements() {
        let (ca_key, ca_cert) = build_ca().unwrap();
        let key = ec_key().unwrap();
        let cert = build_attestation_cert(&ca_key, &ca_cert, &key, None).unwrap();
        assert!(assert_packed_attest_req(&cert).is_ok());

        // A CA certificate has the wrong subject and is a CA.
        assert!(matches!(
            assert_packed_attest_req(&ca_cert),
            Err(WebauthnError::AttestationCertificateRequirementsNotMet)
        ));
        assert!(assert_tpm_attest_req(&cert).is_err());
    }
}
