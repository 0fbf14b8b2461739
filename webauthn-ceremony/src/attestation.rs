//! Attestation information and verifications procedures.
//!
//! Each attestation statement format has a verification procedure that proves the new
//! credential was created by an authenticator holding the attestation key. The result
//! is the attestation type that was used, and the trust path that should chain to a
//! trust anchor for that authenticator model.

use crate::constants::{SAFETYNET_HOSTNAME, TIMESTAMP_LEEWAY_SECONDS};
use crate::crypto::{
    assert_packed_attest_req, assert_tpm_attest_req, compute_sha256, only_hash_from_type,
    verify_signature,
};
use crate::error::*;
use crate::internals::*;
use crate::proto::*;
use base64urlsafedata::Base64UrlSafeData;
use openssl::x509;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;
use webauthn_mds::AttestationType;
use x509_parser::oid_registry::Oid;

/// Values extracted from an attestation that are not needed to trust it, but may be
/// useful to an application's policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationMetadata {
    /// No metadata.
    None,
    /// A packed attestation of an authenticator model.
    Packed {
        /// The model of the authenticator.
        aaguid: Uuid,
    },
    /// A TPM attestation.
    Tpm {
        /// The model of the authenticator.
        aaguid: Uuid,
        /// The firmware version of the TPM.
        firmware_version: u64,
    },
    /// An android hardware key attestation.
    AndroidKey {
        /// If the key master runs in a trusted execution environment.
        is_km_tee: bool,
        /// If the attestation was made in a trusted execution environment.
        is_attest_tee: bool,
    },
    /// An android safetynet attestation.
    AndroidSafetyNet {
        /// The package that requested the credential.
        apk_package_name: String,
        /// Digests of the certificates that signed the package.
        apk_certificate_digest_sha256: Vec<Base64UrlSafeData>,
        /// If the device matches a compatibility tested profile.
        cts_profile_match: bool,
        /// If the device passed basic integrity checks.
        basic_integrity: bool,
        /// How the integrity was evaluated.
        evaluation_type: Option<String>,
    },
}

/// A certificate extension whose value an attestation format compares with a value derived
/// from the registration.
pub(crate) trait AttestationX509Extension {
    /// The value compared.
    type Output: Eq;

    const OID: Oid<'static>;

    /// Decode the extension value, along with any metadata it carries.
    fn parse(i: &[u8]) -> der_parser::error::BerResult<(Self::Output, AttestationMetadata)>;

    /// A certificate without the extension is rejected.
    const IS_REQUIRED: bool;

    /// Returned when the values differ.
    const VALIDATION_ERROR: WebauthnError;
}

pub(crate) struct FidoGenCeAaguid;
pub(crate) struct AppleAnonymousNonce;
pub(crate) struct AndroidKeyAttestationExtensionData;

impl AttestationX509Extension for FidoGenCeAaguid {
    // id-fido-gen-ce-aaguid
    const OID: Oid<'static> = der_parser::oid!(1.3.6 .1 .4 .1 .45724 .1 .1 .4);

    type Output = Aaguid;

    fn parse(i: &[u8]) -> der_parser::error::BerResult<(Self::Output, AttestationMetadata)> {
        let (rem, aaguid) = der_parser::der::parse_der_octetstring(i)?;
        let aaguid: Aaguid = aaguid
            .as_slice()?
            .try_into()
            .map_err(|_| der_parser::error::BerError::InvalidLength)?;

        Ok((rem, (aaguid, AttestationMetadata::None)))
    }

    const IS_REQUIRED: bool = false;

    const VALIDATION_ERROR: WebauthnError = WebauthnError::AttestationCertificateAAGUIDMismatch;
}

pub(crate) mod android_key_attestation {
    use super::AttestationMetadata;
    use der_parser::ber::BerObjectContent;

    #[derive(Clone, PartialEq, Eq, Copy)]
    pub struct AuthorizationList {
        pub all_applications: bool,
        pub origin: Option<u32>,
        pub purpose: Option<u32>,
    }

    pub const KM_ORIGIN_GENERATED: u32 = 0;
    pub const KM_PURPOSE_SIGN: u32 = 2;

    #[derive(Clone, Copy, PartialEq, Eq)]
    pub enum EnforcementType {
        Software,
        Tee,
    }

    const TAG_PURPOSE: u32 = 1;
    const TAG_ALL_APPLICATIONS: u32 = 600;
    const TAG_ORIGIN: u32 = 702;

    impl AuthorizationList {
        pub fn parse(i: &[u8]) -> der_parser::error::BerResult<Self> {
            use der_parser::{der::*, error::BerError};
            parse_der_container(|mut rest: &[u8], hdr: Header| {
                if hdr.tag() != Tag::Sequence {
                    return Err(nom::Err::Error(BerError::BerTypeError));
                }

                let mut list = AuthorizationList {
                    all_applications: false,
                    origin: None,
                    purpose: None,
                };

                // Entries are explicitly tagged. Those not checked here are skipped.
                while !rest.is_empty() {
                    let (next, entry) = parse_der(rest)?;
                    rest = next;
                    match (entry.tag().0, &entry.content) {
                        (TAG_ALL_APPLICATIONS, _) => list.all_applications = true,
                        (TAG_ORIGIN, BerObjectContent::Unknown(any)) => {
                            let (_, origin) = parse_der_integer(any.data)?;
                            list.origin = Some(origin.as_u32()?);
                        }
                        // SET OF INTEGER, of which the first is used.
                        (TAG_PURPOSE, BerObjectContent::Unknown(any)) => {
                            let (_, purpose) =
                                parse_der_container(|i, _| parse_der_integer(i))(any.data)?;
                            list.purpose = Some(purpose.as_u32()?);
                        }
                        _ => {}
                    }
                }

                Ok((rest, list))
            })(i)
        }

        // Keys must be generated in the device, and only usable for signing.
        fn is_set(&self, msg: &str) -> Result<bool, der_parser::error::BerError> {
            match (self.origin, self.purpose) {
                (Some(KM_ORIGIN_GENERATED), Some(KM_PURPOSE_SIGN)) => Ok(true),
                (None, None) => Ok(false),
                _ => Err(der_parser::error::BerError::InvalidValue {
                    tag: der_parser::der::Tag(701),
                    msg: msg.to_string(),
                }),
            }
        }
    }

    fn enforcement(level: u32) -> Result<EnforcementType, der_parser::error::BerError> {
        match level {
            0 => Ok(EnforcementType::Software),
            // StrongBox is a stronger TEE.
            1 | 2 => Ok(EnforcementType::Tee),
            _ => Err(der_parser::error::BerError::InvalidTag),
        }
    }

    /// Parse the KeyDescription, yielding the attestation challenge.
    pub fn parse(i: &[u8]) -> der_parser::error::BerResult<(Vec<u8>, AttestationMetadata)> {
        use der_parser::{der::*, error::BerError};
        parse_der_container(|i: &[u8], hdr: Header| {
            if hdr.tag() != Tag::Sequence {
                return Err(nom::Err::Error(BerError::BerTypeError));
            }
            let (i, attestation_version) = parse_der_integer(i)?;
            let _attestation_version = attestation_version.as_i64()?;

            let (i, attest_sec_level) = parse_der_enum(i)?;
            let attest_enforcement = enforcement(attest_sec_level.as_u32()?)?;
            let (i, _km_version) = parse_der_integer(i)?;
            let (i, km_sec_level) = parse_der_enum(i)?;
            let km_enforcement = enforcement(km_sec_level.as_u32()?)?;

            let (i, attestation_challenge) = parse_der_octetstring(i)?;
            let attestation_challenge = attestation_challenge.as_slice()?.to_vec();

            let (i, _unique_id) = parse_der_octetstring(i)?;

            let (i, software_enforced) = AuthorizationList::parse(i)?;
            let (i, tee_enforced) = AuthorizationList::parse(i)?;

            // The credential must be scoped to the relying party.
            if software_enforced.all_applications || tee_enforced.all_applications {
                return Err(BerError::InvalidValue {
                    tag: Tag(600),
                    msg: "all_applications must not be set".to_string(),
                })?;
            }

            let software_set = software_enforced.is_set("invalid key master values (software)")?;
            let tee_set = tee_enforced.is_set("invalid key master values (tee)")?;

            if !tee_set && !software_set {
                return Err(BerError::InvalidValue {
                    tag: Tag(701),
                    msg: "both software and tee not set (keymaster values)".to_string(),
                })?;
            }

            let metadata = AttestationMetadata::AndroidKey {
                is_km_tee: km_enforcement == EnforcementType::Tee,
                is_attest_tee: attest_enforcement == EnforcementType::Tee,
            };

            Ok((i, (attestation_challenge, metadata)))
        })(i)
    }
}

impl AttestationX509Extension for AndroidKeyAttestationExtensionData {
    // android key attestation KeyDescription
    const OID: Oid<'static> = der_parser::oid!(1.3.6 .1 .4 .1 .11129 .2 .1 .17);

    // the attestation challenge, which must equal the client data hash
    type Output = Vec<u8>;

    fn parse(i: &[u8]) -> der_parser::error::BerResult<(Self::Output, AttestationMetadata)> {
        android_key_attestation::parse(i)
    }

    const IS_REQUIRED: bool = true;

    const VALIDATION_ERROR: WebauthnError = WebauthnError::AttestationCertificateNonceMismatch;
}

impl AttestationX509Extension for AppleAnonymousNonce {
    type Output = [u8; 32];

    // The nonce proves that the attestation is live, and protects the integrity of the
    // authenticatorData and the client data.
    const OID: Oid<'static> = der_parser::oid!(1.2.840 .113635 .100 .8 .2);

    fn parse(i: &[u8]) -> der_parser::error::BerResult<(Self::Output, AttestationMetadata)> {
        use der_parser::{der::*, error::BerError};
        parse_der_container(|i: &[u8], hdr: Header| {
            if hdr.tag() != Tag::Sequence {
                return Err(nom::Err::Error(BerError::BerTypeError));
            }
            let (i, tagged_nonce) = parse_der_tagged_explicit(1, parse_der_octetstring)(i)?;
            let (class, _tag, nonce) = tagged_nonce.as_tagged()?;
            if class != Class::ContextSpecific {
                return Err(nom::Err::Error(BerError::BerTypeError));
            }
            let nonce = nonce
                .as_slice()?
                .try_into()
                .map_err(|_| BerError::InvalidLength)?;
            Ok((i, (nonce, AttestationMetadata::None)))
        })(i)
    }

    const IS_REQUIRED: bool = true;

    const VALIDATION_ERROR: WebauthnError = WebauthnError::AttestationCertificateNonceMismatch;
}

/// Validate an x509 extension is present in an x509 certificate, and holds `data`.
pub(crate) fn validate_extension<T>(
    x509: &x509::X509Ref,
    data: &<T as AttestationX509Extension>::Output,
) -> WebauthnResult<AttestationMetadata>
where
    T: AttestationX509Extension,
{
    let der_bytes = x509.to_der()?;
    x509_parser::parse_x509_certificate(&der_bytes)
        .map_err(|_| WebauthnError::AttestationStatementX5CInvalid)?
        .1
        .extensions()
        .iter()
        .find_map(|extension| {
            (extension.oid == T::OID).then(|| {
                T::parse(extension.value)
                    .map_err(|e| {
                        debug!(?e, oid = %T::OID, "unable to parse extension");
                        WebauthnError::AttestationStatementX5CInvalid
                    })
                    .and_then(|(_, (output, metadata))| {
                        if &output == data {
                            Ok(metadata)
                        } else {
                            Err(T::VALIDATION_ERROR)
                        }
                    })
            })
        })
        .unwrap_or(if T::IS_REQUIRED {
            Err(WebauthnError::AttestationStatementMissingExtension)
        } else {
            Ok(AttestationMetadata::None)
        })
}

/// The outcome of an attestation statement verification procedure: the attestation type
/// that was used, and its trust path.
#[derive(Debug, Clone)]
pub enum ParsedAttestationData {
    /// The credential is authenticated by a signing X509 Certificate
    /// from a vendor or provider.
    Basic(Vec<x509::X509>),
    /// The credential is authenticated using surrogate basic attestation
    /// it uses the credential private key to create the attestation signature
    Self_,
    /// The credential is authenticated using a CA, and may provide a
    /// ca chain to validate to it's root.
    AttCa(Vec<x509::X509>),
    /// The credential is authenticated using an anonymization CA, and may provide a ca chain to
    /// validate to it's root.
    AnonCa(Vec<x509::X509>),
    /// No Attestation type was provided with this Credential.
    None,
}

impl ParsedAttestationData {
    /// The attestation type, as named by authenticator metadata.
    pub fn attestation_type(&self) -> AttestationType {
        match self {
            ParsedAttestationData::Basic(_) => AttestationType::BasicFull,
            ParsedAttestationData::Self_ => AttestationType::BasicSurrogate,
            ParsedAttestationData::AttCa(_) => AttestationType::AttCa,
            ParsedAttestationData::AnonCa(_) => AttestationType::AnonCa,
            ParsedAttestationData::None => AttestationType::None,
        }
    }

    /// The certificates of the attestation, leaf first. Empty when there is nothing to
    /// chain to a trust anchor.
    pub fn trust_path(&self) -> &[x509::X509] {
        match self {
            ParsedAttestationData::Basic(chain)
            | ParsedAttestationData::AttCa(chain)
            | ParsedAttestationData::AnonCa(chain) => chain.as_slice(),
            ParsedAttestationData::Self_ | ParsedAttestationData::None => &[],
        }
    }

    /// The trust path as PEM documents.
    pub fn trust_path_pem(&self) -> WebauthnResult<Vec<String>> {
        self.trust_path()
            .iter()
            .map(|crt| {
                crt.to_pem()
                    .map_err(WebauthnError::OpenSSLError)
                    .and_then(|pem| {
                        String::from_utf8(pem)
                            .map_err(|_| WebauthnError::AttestationStatementX5CInvalid)
                    })
            })
            .collect()
    }
}

/// The attestation statement formats that can be verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttestationFormat {
    /// `packed`, the format of most security keys.
    Packed,
    /// `tpm`, used by platform authenticators backed by a TPM, such as Windows Hello.
    Tpm,
    /// `android-key`, attested by the Android keystore.
    AndroidKey,
    /// `android-safetynet`, attested by a SafetyNet response. Superseded by `android-key`.
    AndroidSafetyNet,
    /// `fido-u2f`, produced by U2F security keys.
    FIDOU2F,
    /// `apple`, the anonymous attestation of Apple platforms.
    AppleAnonymous,
    /// `none`
    None,
}

const ALL_FORMATS: [AttestationFormat; 7] = [
    AttestationFormat::Packed,
    AttestationFormat::Tpm,
    AttestationFormat::AndroidKey,
    AttestationFormat::AndroidSafetyNet,
    AttestationFormat::FIDOU2F,
    AttestationFormat::AppleAnonymous,
    AttestationFormat::None,
];

fn formats() -> &'static BTreeMap<&'static str, AttestationFormat> {
    static FORMATS: OnceLock<BTreeMap<&'static str, AttestationFormat>> = OnceLock::new();
    FORMATS.get_or_init(|| ALL_FORMATS.iter().map(|f| (f.as_str(), *f)).collect())
}

impl AttestationFormat {
    /// The identifier of this format in an attestation object.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttestationFormat::Packed => "packed",
            AttestationFormat::Tpm => "tpm",
            AttestationFormat::AndroidKey => "android-key",
            AttestationFormat::AndroidSafetyNet => "android-safetynet",
            AttestationFormat::FIDOU2F => "fido-u2f",
            AttestationFormat::AppleAnonymous => "apple",
            AttestationFormat::None => "none",
        }
    }

    /// Run the verification procedure of this format over a new credential.
    pub(crate) fn verify(
        self,
        acd: &AttestedCredentialData,
        att_obj: &AttestationObject,
        client_data_hash: &[u8],
        danger_disable_time_checks: bool,
    ) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
        match self {
            AttestationFormat::Packed => verify_packed_attestation(acd, att_obj, client_data_hash),
            AttestationFormat::Tpm => verify_tpm_attestation(acd, att_obj, client_data_hash),
            AttestationFormat::AndroidKey => {
                verify_android_key_attestation(acd, att_obj, client_data_hash)
            }
            AttestationFormat::AndroidSafetyNet => verify_android_safetynet_attestation(
                att_obj,
                client_data_hash,
                danger_disable_time_checks,
            ),
            AttestationFormat::FIDOU2F => verify_fidou2f_attestation(acd, att_obj, client_data_hash)
                .map(|data| (data, AttestationMetadata::None)),
            AttestationFormat::AppleAnonymous => {
                verify_apple_anonymous_attestation(acd, att_obj, client_data_hash)
            }
            AttestationFormat::None => verify_none_attestation(att_obj),
        }
    }
}

impl fmt::Display for AttestationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for AttestationFormat {
    type Error = WebauthnError;

    fn try_from(a: &str) -> Result<AttestationFormat, Self::Error> {
        formats().get(a).copied().ok_or_else(|| {
            debug!(fmt = %a, "unsupported attestation format");
            WebauthnError::AttestationNotSupported
        })
    }
}

fn att_stmt_get<'a>(
    att_stmt_map: &'a BTreeMap<serde_cbor_2::Value, serde_cbor_2::Value>,
    key: &str,
) -> Option<&'a serde_cbor_2::Value> {
    att_stmt_map.get(&serde_cbor_2::Value::Text(key.to_string()))
}

fn att_stmt_alg(
    att_stmt_map: &BTreeMap<serde_cbor_2::Value, serde_cbor_2::Value>,
) -> WebauthnResult<COSEAlgorithm> {
    let alg_value =
        att_stmt_get(att_stmt_map, "alg").ok_or(WebauthnError::AttestationStatementAlgMissing)?;

    cbor_try_i128!(alg_value)
        .map_err(|_| WebauthnError::AttestationStatementAlgInvalid)
        .and_then(|v| {
            COSEAlgorithm::try_from(v).map_err(|_| WebauthnError::COSEKeyInvalidAlgorithm)
        })
}

fn att_stmt_sig(
    att_stmt_map: &BTreeMap<serde_cbor_2::Value, serde_cbor_2::Value>,
) -> WebauthnResult<&Vec<u8>> {
    let sig_value =
        att_stmt_get(att_stmt_map, "sig").ok_or(WebauthnError::AttestationStatementSigMissing)?;
    cbor_try_bytes!(sig_value).map_err(|_| WebauthnError::AttestationStatementSigMissing)
}

// x5c: [ attestnCert: bytes, * (caCert: bytes) ]
fn x5c_to_x509(x5c: &serde_cbor_2::Value) -> WebauthnResult<Vec<x509::X509>> {
    let x5c_array_ref =
        cbor_try_array!(x5c).map_err(|_| WebauthnError::AttestationStatementX5CInvalid)?;

    x5c_array_ref
        .iter()
        .map(|values| {
            cbor_try_bytes!(values)
                .map_err(|_| WebauthnError::AttestationStatementX5CInvalid)
                .and_then(|b| x509::X509::from_der(b).map_err(WebauthnError::OpenSSLError))
        })
        .collect()
}

fn signed_data(auth_data_bytes: &[u8], client_data_hash: &[u8]) -> Vec<u8> {
    auth_data_bytes
        .iter()
        .chain(client_data_hash.iter())
        .copied()
        .collect()
}

// https://w3c.github.io/webauthn/#sctn-none-attestation
fn verify_none_attestation(
    att_obj: &AttestationObject,
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let att_stmt_map =
        cbor_try_map!(&att_obj.att_stmt).map_err(|_| WebauthnError::AttestationStatementMapInvalid)?;
    if !att_stmt_map.is_empty() {
        return Err(WebauthnError::AttestationStatementMapInvalid);
    }
    Ok((ParsedAttestationData::None, AttestationMetadata::None))
}

// Perform the Verification procedure for 8.2. Packed Attestation Statement Format
// https://w3c.github.io/webauthn/#sctn-packed-attestation
fn verify_packed_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let att_stmt_map = cbor_try_map!(&att_obj.att_stmt)
        .map_err(|_| WebauthnError::AttestationStatementMapInvalid)?;

    let alg = att_stmt_alg(att_stmt_map)?;
    let verification_data = signed_data(&att_obj.auth_data_bytes, client_data_hash);

    match (
        att_stmt_get(att_stmt_map, "x5c"),
        att_stmt_get(att_stmt_map, "ecdaaKeyId"),
    ) {
        (Some(x5c), _) => {
            let arr_x509 = x5c_to_x509(x5c)?;

            // The attestation certificate attestnCert MUST be the first element in the array.
            let attestn_cert = arr_x509
                .first()
                .ok_or(WebauthnError::AttestationStatementX5CInvalid)?;

            // Verify that sig is a valid signature over the concatenation of authenticatorData
            // and clientDataHash using the attestation public key in attestnCert with the
            // algorithm specified in alg.
            let sig = att_stmt_sig(att_stmt_map)?;
            if !verify_signature(alg, attestn_cert, sig, &verification_data)? {
                trace!("packed x509 signature invalid");
                return Err(WebauthnError::AttestationStatementSigInvalid);
            }

            assert_packed_attest_req(attestn_cert)?;

            // If attestnCert contains id-fido-gen-ce-aaguid verify that the value of this
            // extension matches the aaguid in authenticatorData.
            validate_extension::<FidoGenCeAaguid>(attestn_cert, &acd.aaguid)?;

            Ok((
                ParsedAttestationData::Basic(arr_x509),
                AttestationMetadata::Packed {
                    aaguid: Uuid::from_bytes(acd.aaguid),
                },
            ))
        }
        (None, Some(_ecdaa_key_id)) => {
            debug!("ecdaa attestation is not supported");
            Err(WebauthnError::AttestationNotSupported)
        }
        (None, None) => {
            // Self attestation is in use.
            let credential_public_key = COSEKey::try_from(&acd.credential_pk)?;

            // Validate that alg matches the algorithm of the credentialPublicKey in authenticatorData.
            if alg != credential_public_key.type_ {
                return Err(WebauthnError::AttestationStatementAlgMismatch);
            }

            let sig = att_stmt_sig(att_stmt_map)?;
            if !credential_public_key.verify_signature(sig, &verification_data)? {
                trace!("Invalid Self Attestation Signature");
                return Err(WebauthnError::AttestationStatementSigInvalid);
            }

            Ok((ParsedAttestationData::Self_, AttestationMetadata::None))
        }
    }
}

// https://w3c.github.io/webauthn/#fido-u2f-attestation
fn verify_fidou2f_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<ParsedAttestationData> {
    let att_stmt_map = cbor_try_map!(&att_obj.att_stmt)
        .map_err(|_| WebauthnError::AttestationStatementMapInvalid)?;

    let x5c =
        att_stmt_get(att_stmt_map, "x5c").ok_or(WebauthnError::AttestationStatementX5CMissing)?;
    let sig = att_stmt_sig(att_stmt_map)?;

    // Check that x5c has exactly one element and let att_cert be that element.
    let arr_x509 = x5c_to_x509(x5c)?;
    let certificate_public_key = match arr_x509.as_slice() {
        [att_cert] => att_cert,
        _ => return Err(WebauthnError::AttestationStatementX5CInvalid),
    };

    // The certificate key must be P-256, which verifying as ES256 asserts.
    let alg = COSEAlgorithm::ES256;

    // Convert the COSE_KEY formatted credentialPublicKey to Raw ANSI X9.62 public key format.
    let credential_public_key = COSEKey::try_from(&acd.credential_pk)?;
    let public_key_u2f = credential_public_key.get_alg_key_ecc_x962_raw()?;

    // verificationData = 0x00 || rpIdHash || clientDataHash || credentialId || publicKeyU2F
    let r: [u8; 1] = [0x00];
    let verification_data: Vec<u8> = r
        .iter()
        .chain(att_obj.auth_data.rp_id_hash.iter())
        .chain(client_data_hash.iter())
        .chain(acd.credential_id.0.iter())
        .chain(public_key_u2f.iter())
        .copied()
        .collect();

    if !verify_signature(alg, certificate_public_key, sig, &verification_data)? {
        error!("fido-u2f signature verification failed!");
        return Err(WebauthnError::AttestationStatementSigInvalid);
    }

    Ok(ParsedAttestationData::Basic(arr_x509))
}

// https://w3c.github.io/webauthn/#sctn-tpm-attestation
fn verify_tpm_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    debug!("begin verify_tpm_attest");

    let att_stmt_map = cbor_try_map!(&att_obj.att_stmt)
        .map_err(|_| WebauthnError::AttestationStatementMapInvalid)?;

    let ver_value =
        att_stmt_get(att_stmt_map, "ver").ok_or(WebauthnError::AttestationStatementVerMissing)?;
    let ver =
        cbor_try_string!(ver_value).map_err(|_| WebauthnError::AttestationStatementVerInvalid)?;
    if ver != "2.0" {
        return Err(WebauthnError::AttestationStatementVerUnsupported);
    }

    let alg = att_stmt_alg(att_stmt_map)?;

    let certinfo_value = att_stmt_get(att_stmt_map, "certInfo")
        .ok_or(WebauthnError::AttestationStatementCertInfoMissing)?;
    let certinfo_bytes = cbor_try_bytes!(certinfo_value)
        .map_err(|_| WebauthnError::AttestationStatementCertInfoMissing)?;
    let certinfo = TpmsAttest::try_from(certinfo_bytes.as_slice())?;

    let pubarea_value = att_stmt_get(att_stmt_map, "pubArea")
        .ok_or(WebauthnError::AttestationStatementPubAreaMissing)?;
    let pubarea_bytes = cbor_try_bytes!(pubarea_value)
        .map_err(|_| WebauthnError::AttestationStatementPubAreaMissing)?;
    let pubarea = TpmtPublic::try_from(pubarea_bytes.as_slice())?;

    let sig = TpmtSignature::try_from(att_stmt_sig(att_stmt_map)?.as_slice())?;

    let x5c_value =
        att_stmt_get(att_stmt_map, "x5c").ok_or(WebauthnError::AttestationStatementX5CMissing)?;
    let arr_x509 = x5c_to_x509(x5c_value)?;
    let aik_cert = arr_x509
        .first()
        .ok_or(WebauthnError::AttestationStatementX5CInvalid)?;

    // Verify that the public key specified by the parameters and unique fields of pubArea is
    // identical to the credentialPublicKey in the attestedCredentialData in authenticatorData.
    let credential_public_key = COSEKey::try_from(&acd.credential_pk)?;

    match (
        &credential_public_key.key,
        &pubarea.parameters,
        &pubarea.unique,
    ) {
        (
            COSEKeyType::RSA(cose_rsa),
            TpmuPublicParms::Rsa(_tpm_parms),
            TpmuPublicId::Rsa(tpm_modulus),
        ) => {
            if cose_rsa.n.0 != *tpm_modulus {
                return Err(WebauthnError::AttestationTpmPubAreaMismatch);
            }
        }
        (
            COSEKeyType::EC_EC2(COSEEC2Key { curve, x, y }),
            TpmuPublicParms::Ecc(ecc_parms),
            TpmuPublicId::Ecc(ecc_points),
        ) => {
            match (curve, ecc_parms.curve_id) {
                (ECDSACurve::SECP256R1, TpmiEccCurve::NistP256)
                | (ECDSACurve::SECP384R1, TpmiEccCurve::NistP384)
                | (ECDSACurve::SECP521R1, TpmiEccCurve::NistP521) => {}
                c_mismatch => {
                    debug!(?c_mismatch, "TpmiEccCurve ID mismatch");
                    return Err(WebauthnError::AttestationTpmPubAreaMismatch);
                }
            }

            if x.0 != ecc_points.x || y.0 != ecc_points.y {
                debug!("Invalid X or Y coords in TpmuPublicId");
                return Err(WebauthnError::AttestationTpmPubAreaMismatch);
            }
        }
        ex => {
            debug!(?ex, "Unrecognised combination");
            return Err(WebauthnError::AttestationTpmPubAreaMismatch);
        }
    }

    // Magic is checked while parsing.
    if certinfo.type_ != TpmSt::AttestCertify {
        return Err(WebauthnError::AttestationTpmStInvalid);
    }

    // Verify that extraData is set to the hash of attToBeSigned using the hash algorithm
    // employed in "alg".
    let extra_data_hash = certinfo
        .extra_data
        .as_ref()
        .ok_or(WebauthnError::AttestationTpmExtraDataInvalid)?;
    let att_to_be_signed = signed_data(&att_obj.auth_data_bytes, client_data_hash);
    if &only_hash_from_type(alg, &att_to_be_signed)? != extra_data_hash {
        return Err(WebauthnError::AttestationTpmExtraDataMismatch);
    }

    // The attested name must be a valid Name for pubArea, computed with its nameAlg. The
    // name carries the algorithm id in its first two bytes.
    match &certinfo.typeattested {
        TpmuAttest::AttestCertify(Tpm2bName::Digest(name), _qname) => {
            let digest = match pubarea.name_alg {
                TpmAlgId::Sha256 => openssl::sha::sha256(pubarea_bytes).to_vec(),
                TpmAlgId::Sha384 => openssl::sha::sha384(pubarea_bytes).to_vec(),
                TpmAlgId::Sha512 => openssl::sha::sha512(pubarea_bytes).to_vec(),
                _ => return Err(WebauthnError::AttestationTpmPubAreaHashUnknown),
            };
            let hname: Vec<u8> = (pubarea.name_alg as u16)
                .to_be_bytes()
                .iter()
                .chain(digest.iter())
                .copied()
                .collect();
            if &hname != name {
                return Err(WebauthnError::AttestationTpmPubAreaHashInvalid);
            }
        }
        TpmuAttest::AttestCertify(_, _) => {
            return Err(WebauthnError::AttestationTpmPubAreaHashInvalid)
        }
        TpmuAttest::Invalid => return Err(WebauthnError::AttestationTpmAttestCertifyInvalid),
    }

    // qualifiedSigner, clockInfo and firmwareVersion are informational only.
    trace!(
        signer = ?certinfo.qualified_signer,
        clock = ?certinfo.clock_info,
        magic = certinfo.magic,
        "tpm certify info"
    );

    let sig_valid = match sig {
        TpmtSignature::RawSignature(dsig) => {
            verify_signature(alg, aik_cert, &dsig, certinfo_bytes)?
        }
    };

    if !sig_valid {
        return Err(WebauthnError::AttestationStatementSigInvalid);
    }

    assert_tpm_attest_req(aik_cert)?;

    validate_extension::<FidoGenCeAaguid>(aik_cert, &acd.aaguid)?;

    Ok((
        ParsedAttestationData::AttCa(arr_x509),
        AttestationMetadata::Tpm {
            aaguid: Uuid::from_bytes(acd.aaguid),
            firmware_version: certinfo.firmware_version,
        },
    ))
}

// https://www.w3.org/TR/webauthn/#sctn-apple-anonymous-attestation
fn verify_apple_anonymous_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let att_stmt_map = cbor_try_map!(&att_obj.att_stmt)
        .map_err(|_| WebauthnError::AttestationStatementMapInvalid)?;

    let x5c_value =
        att_stmt_get(att_stmt_map, "x5c").ok_or(WebauthnError::AttestationStatementX5CMissing)?;

    let credential_public_key = COSEKey::try_from(&acd.credential_pk)?;
    let alg = credential_public_key.type_;

    let arr_x509 = x5c_to_x509(x5c_value)?;
    let attestn_cert = arr_x509
        .first()
        .ok_or(WebauthnError::AttestationStatementX5CInvalid)?;

    // nonce = SHA-256(authenticatorData || clientDataHash)
    let nonce = compute_sha256(&signed_data(&att_obj.auth_data_bytes, client_data_hash));

    validate_extension::<AppleAnonymousNonce>(attestn_cert, &nonce)?;

    // Verify credential public key matches the Subject Public Key of credCert.
    let subject_public_key = COSEKey::try_from((alg, &**attestn_cert))?;

    if credential_public_key != subject_public_key {
        return Err(WebauthnError::AttestationCredentialSubjectKeyMismatch);
    }

    Ok((
        ParsedAttestationData::AnonCa(arr_x509),
        AttestationMetadata::None,
    ))
}

/// <https://www.w3.org/TR/webauthn-3/#sctn-android-key-attestation>
fn verify_android_key_attestation(
    acd: &AttestedCredentialData,
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let att_stmt_map = cbor_try_map!(&att_obj.att_stmt)
        .map_err(|_| WebauthnError::AttestationStatementMapInvalid)?;

    let alg = att_stmt_alg(att_stmt_map)?;
    let sig = att_stmt_sig(att_stmt_map)?;
    let x5c_value =
        att_stmt_get(att_stmt_map, "x5c").ok_or(WebauthnError::AttestationStatementX5CMissing)?;
    let arr_x509 = x5c_to_x509(x5c_value)?;

    let attestn_cert = arr_x509
        .first()
        .ok_or(WebauthnError::AttestationStatementX5CInvalid)?;

    let data_to_verify = signed_data(&att_obj.auth_data_bytes, client_data_hash);
    if !verify_signature(alg, attestn_cert, sig, &data_to_verify)? {
        error!("android-key signature verification failed!");
        return Err(WebauthnError::AttestationStatementSigInvalid);
    }

    // The public key in the first certificate must be the credential public key.
    let credential_public_key = COSEKey::try_from(&acd.credential_pk)?;
    let subject_public_key =
        COSEKey::try_from((credential_public_key.type_, &**attestn_cert))?;

    if credential_public_key != subject_public_key {
        return Err(WebauthnError::AttestationCredentialSubjectKeyMismatch);
    }

    // The attestationChallenge in the key description must be the clientDataHash.
    let meta = validate_extension::<AndroidKeyAttestationExtensionData>(
        attestn_cert,
        &client_data_hash.to_vec(),
    )?;

    Ok((ParsedAttestationData::Basic(arr_x509), meta))
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyNetAttestResponse {
    timestamp_ms: u64,
    nonce: Base64UrlSafeData,
    apk_package_name: String,
    apk_certificate_digest_sha256: Vec<Base64UrlSafeData>,
    cts_profile_match: bool,
    basic_integrity: bool,
    evaluation_type: Option<String>,
}

/// <https://www.w3.org/TR/webauthn/#sctn-android-safetynet-attestation>
fn verify_android_safetynet_attestation(
    att_obj: &AttestationObject,
    client_data_hash: &[u8],
    danger_ignore_timestamp: bool,
) -> WebauthnResult<(ParsedAttestationData, AttestationMetadata)> {
    let att_stmt_map = cbor_try_map!(&att_obj.att_stmt)
        .map_err(|_| WebauthnError::AttestationStatementMapInvalid)?;

    // there's only 1 version now
    let ver =
        att_stmt_get(att_stmt_map, "ver").ok_or(WebauthnError::AttestationStatementVerMissing)?;
    let _ver = cbor_try_string!(ver).map_err(|_| WebauthnError::AttestationStatementVerInvalid)?;

    let response = att_stmt_get(att_stmt_map, "response")
        .ok_or(WebauthnError::AttestationStatementResponseMissing)?;
    let response =
        cbor_try_bytes!(response).map_err(|_| WebauthnError::AttestationStatementResponseMissing)?;

    let response_str = std::str::from_utf8(response.as_slice())
        .map_err(|_| WebauthnError::AttestationStatementResponseInvalid)?;

    // Verify with the embedded leaf certificate. The chain is checked against trust anchors
    // by the caller.
    let jws = webauthn_mds::jws::verify_compact(response_str).map_err(|e| {
        error!(?e, "safetynet response is not a valid jws");
        WebauthnError::AttestationStatementResponseInvalid
    })?;
    let certs = jws.x5c_chain()?;
    let leaf_cert = certs
        .first()
        .ok_or(WebauthnError::AttestationStatementX5CMissing)?;

    let claims: SafetyNetAttestResponse = serde_json::from_slice(&jws.payload).map_err(|e| {
        error!(?e, "safetynet response claims are invalid");
        WebauthnError::AttestationStatementResponseInvalid
    })?;

    // The nonce is the base64 of SHA-256(authenticatorData || clientDataHash).
    let expected_nonce = compute_sha256(&signed_data(&att_obj.auth_data_bytes, client_data_hash));
    if claims.nonce.0.as_slice() != expected_nonce.as_slice() {
        debug!("safetynet nonce mismatch");
        return Err(WebauthnError::AttestationCertificateNonceMismatch);
    }

    // The attestation certificate must be issued to attest.android.com
    let common_name = leaf_cert
        .subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .ok_or(WebauthnError::AttestationStatementResponseInvalid)?
        .data()
        .as_utf8()?
        .to_string();
    if common_name != SAFETYNET_HOSTNAME {
        debug!(%common_name, "safetynet certificate hostname invalid");
        return Err(WebauthnError::AttestationStatementResponseInvalid);
    }

    if !claims.cts_profile_match {
        debug!("safetynet cts profile does not match");
        return Err(WebauthnError::AttestationStatementResponseInvalid);
    }

    if !danger_ignore_timestamp {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| WebauthnError::AttestationStatementResponseInvalid)?;
        let latest = now + std::time::Duration::from_secs(TIMESTAMP_LEEWAY_SECONDS);
        if u128::from(claims.timestamp_ms) > latest.as_millis() {
            debug!(timestamp_ms = claims.timestamp_ms, "safetynet timestamp in the future");
            return Err(WebauthnError::AttestationStatementResponseInvalid);
        }
    }

    let SafetyNetAttestResponse {
        apk_package_name,
        apk_certificate_digest_sha256,
        cts_profile_match,
        basic_integrity,
        evaluation_type,
        ..
    } = claims;

    let metadata = AttestationMetadata::AndroidSafetyNet {
        apk_package_name,
        apk_certificate_digest_sha256,
        cts_profile_match,
        basic_integrity,
        evaluation_type,
    };

    Ok((ParsedAttestationData::Basic(certs), metadata))
}
