//! Binary structures sent by authenticators, and their parsers.

use crate::error::*;
use crate::proto::*;
use nom::bytes::complete::take;
use nom::combinator::{cond, verify};
use nom::number::complete::{be_u16, be_u32, be_u64, be_u8};
use serde::Deserialize;

const FLAG_USER_PRESENT: u8 = 1 << 0;
const FLAG_USER_VERIFIED: u8 = 1 << 2;
const FLAG_BACKUP_ELIGIBLE: u8 = 1 << 3;
const FLAG_BACKUP_STATE: u8 = 1 << 4;
const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 1 << 6;
const FLAG_EXTENSION_DATA: u8 = 1 << 7;

/// Attested Credential Data
#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    /// The guid of the authenticator. May indicate manufacturer.
    pub aaguid: Aaguid,
    /// The credential ID.
    pub credential_id: CredentialID,
    /// The credentials public Key.
    pub credential_pk: serde_cbor_2::Value,
}

/// Data returned by this authenticator during registration or authentication.
/// <https://w3c.github.io/webauthn/#sctn-authenticator-data>
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    /// Hash of the relying party id.
    pub rp_id_hash: [u8; 32],
    /// The counter of this credentials activations.
    pub counter: u32,
    /// Flag if the user was present.
    pub user_present: bool,
    /// Flag is the user verified to the device. Implies presence.
    pub user_verified: bool,
    /// Flag if this credential may be backed up to another device.
    pub backup_eligible: bool,
    /// Flag if this credential is currently backed up.
    pub backup_state: bool,
    /// The attested credential data, only present during registration.
    pub acd: Option<AttestedCredentialData>,
    /// Extensions supplied by the device.
    pub extensions: Option<serde_cbor_2::Value>,
}

fn parse_failure(i: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Failure(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
}

// CBOR is self describing, so the decoder tells us how far into the input the value ended.
fn cbor_parser(i: &[u8]) -> nom::IResult<&[u8], serde_cbor_2::Value> {
    let mut deserializer = serde_cbor_2::Deserializer::from_slice(i);
    let v = serde_cbor_2::Value::deserialize(&mut deserializer).map_err(|e| {
        debug!(?e, "invalid cbor in authenticator data");
        parse_failure(i)
    })?;
    let len = deserializer.byte_offset();
    let (i, _) = take(len)(i)?;
    Ok((i, v))
}

fn aaguid_parser(i: &[u8]) -> nom::IResult<&[u8], Aaguid> {
    let (i, bytes) = take(16usize)(i)?;
    let mut aaguid = [0; 16];
    aaguid.copy_from_slice(bytes);
    Ok((i, aaguid))
}

fn acd_parser(i: &[u8]) -> nom::IResult<&[u8], AttestedCredentialData> {
    let (i, aaguid) = aaguid_parser(i)?;
    let (i, cred_id_len) = be_u16(i)?;
    let (i, cred_id) = take(cred_id_len as usize)(i)?;
    let (i, cred_pk) = cbor_parser(i)?;
    Ok((
        i,
        AttestedCredentialData {
            aaguid,
            credential_id: cred_id.to_vec().into(),
            credential_pk: cred_pk,
        },
    ))
}

fn authenticator_data_parser(i: &[u8]) -> nom::IResult<&[u8], AuthenticatorData> {
    let (i, rp_id_hash) = take(32usize)(i)?;
    let (i, flags) = be_u8(i)?;
    let (i, counter) = be_u32(i)?;

    let (i, acd) = cond(flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0, acd_parser)(i)?;
    let (i, extensions) = cond(flags & FLAG_EXTENSION_DATA != 0, cbor_parser)(i)?;

    let mut hash = [0; 32];
    hash.copy_from_slice(rp_id_hash);

    Ok((
        i,
        AuthenticatorData {
            rp_id_hash: hash,
            counter,
            user_present: flags & FLAG_USER_PRESENT != 0,
            user_verified: flags & FLAG_USER_VERIFIED != 0,
            backup_eligible: flags & FLAG_BACKUP_ELIGIBLE != 0,
            backup_state: flags & FLAG_BACKUP_STATE != 0,
            acd,
            extensions,
        },
    ))
}

impl TryFrom<&[u8]> for AuthenticatorData {
    type Error = WebauthnError;
    fn try_from(auth_data_bytes: &[u8]) -> Result<Self, Self::Error> {
        let (rem, ad) = authenticator_data_parser(auth_data_bytes).map_err(|e| {
            debug!(?e, "authenticator data parser");
            match e {
                nom::Err::Incomplete(_) => WebauthnError::ParseInsufficientBytesAvailable,
                _ => WebauthnError::ParseNOMFailure,
            }
        })?;

        // Trailing data only occurs when the flags lie about what is present.
        if !rem.is_empty() {
            debug!(remaining = rem.len(), "trailing bytes after authenticator data");
            return Err(WebauthnError::ParseNOMFailure);
        }
        Ok(ad)
    }
}

#[derive(Debug, Deserialize)]
struct AttestationObjectInner<'a> {
    #[serde(rename = "authData")]
    auth_data: &'a [u8],
    fmt: String,
    #[serde(rename = "attStmt")]
    att_stmt: serde_cbor_2::Value,
}

/// Attestation Object
/// <https://w3c.github.io/webauthn/#generating-an-attestation-object>
#[derive(Debug, Clone)]
pub struct AttestationObject {
    /// The parsed authenticator data.
    pub auth_data: AuthenticatorData,
    /// The raw authenticator data, which attestation statements sign over.
    pub auth_data_bytes: Vec<u8>,
    /// The attestation statement format identifier.
    pub fmt: String,
    /// The format specific attestation statement.
    pub att_stmt: serde_cbor_2::Value,
}

impl TryFrom<&[u8]> for AttestationObject {
    type Error = WebauthnError;

    fn try_from(data: &[u8]) -> Result<AttestationObject, WebauthnError> {
        let aoi: AttestationObjectInner = serde_cbor_2::from_slice(data)?;
        let auth_data_bytes = aoi.auth_data.to_vec();

        Ok(AttestationObject {
            auth_data: AuthenticatorData::try_from(aoi.auth_data)?,
            auth_data_bytes,
            fmt: aoi.fmt,
            att_stmt: aoi.att_stmt,
        })
    }
}

/// The TPM_GENERATED_VALUE magic that prefixes every structure a TPM signs.
pub(crate) const TPM_GENERATED_VALUE: u32 = 0xff54_4347;

/// TPM_ST: the structure tags of attestation data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum TpmSt {
    AttestCertify = 0x8017,
    AttestQuote = 0x8018,
    AttestSessionAudit = 0x8016,
    AttestCommandAudit = 0x8015,
    AttestTime = 0x8019,
    AttestCreation = 0x801a,
    AttestNv = 0x8014,
}

impl TpmSt {
    fn new(v: u16) -> Option<Self> {
        match v {
            0x8017 => Some(TpmSt::AttestCertify),
            0x8018 => Some(TpmSt::AttestQuote),
            0x8016 => Some(TpmSt::AttestSessionAudit),
            0x8015 => Some(TpmSt::AttestCommandAudit),
            0x8019 => Some(TpmSt::AttestTime),
            0x801a => Some(TpmSt::AttestCreation),
            0x8014 => Some(TpmSt::AttestNv),
            _ => None,
        }
    }
}

/// TPM_ALG_ID, limited to the algorithms that appear in attestations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum TpmAlgId {
    Rsa = 0x0001,
    Sha1 = 0x0004,
    Sha256 = 0x000b,
    Sha384 = 0x000c,
    Sha512 = 0x000d,
    Null = 0x0010,
    Ecc = 0x0023,
}

impl TpmAlgId {
    fn new(v: u16) -> Option<Self> {
        match v {
            0x0001 => Some(TpmAlgId::Rsa),
            0x0004 => Some(TpmAlgId::Sha1),
            0x000b => Some(TpmAlgId::Sha256),
            0x000c => Some(TpmAlgId::Sha384),
            0x000d => Some(TpmAlgId::Sha512),
            0x0010 => Some(TpmAlgId::Null),
            0x0023 => Some(TpmAlgId::Ecc),
            _ => None,
        }
    }
}

/// TPM_ECC_CURVE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum TpmiEccCurve {
    NistP256 = 0x0003,
    NistP384 = 0x0004,
    NistP521 = 0x0005,
}

impl TpmiEccCurve {
    fn new(v: u16) -> Option<Self> {
        match v {
            0x0003 => Some(TpmiEccCurve::NistP256),
            0x0004 => Some(TpmiEccCurve::NistP384),
            0x0005 => Some(TpmiEccCurve::NistP521),
            _ => None,
        }
    }
}

/// TPM2B_NAME. A name is empty, a handle, or a digest prefixed by its algorithm id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tpm2bName {
    None,
    Handle(u32),
    Digest(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TpmuAttest {
    AttestCertify(Tpm2bName, Tpm2bName),
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: bool,
}

/// TPMS_ATTEST, the structure a TPM signs when it certifies a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsAttest {
    pub magic: u32,
    pub type_: TpmSt,
    pub qualified_signer: Tpm2bName,
    pub extra_data: Option<Vec<u8>>,
    pub clock_info: TpmsClockInfo,
    pub firmware_version: u64,
    pub typeattested: TpmuAttest,
}

fn tpm2b_parser(i: &[u8]) -> nom::IResult<&[u8], &[u8]> {
    let (i, size) = be_u16(i)?;
    take(size as usize)(i)
}

fn tpm2b_name_parser(i: &[u8]) -> nom::IResult<&[u8], Tpm2bName> {
    let (i, data) = tpm2b_parser(i)?;
    let name = match data.len() {
        0 => Tpm2bName::None,
        4 => {
            let (_, handle) = be_u32(data)?;
            Tpm2bName::Handle(handle)
        }
        _ => Tpm2bName::Digest(data.to_vec()),
    };
    Ok((i, name))
}

fn tpms_clock_info_parser(i: &[u8]) -> nom::IResult<&[u8], TpmsClockInfo> {
    let (i, clock) = be_u64(i)?;
    let (i, reset_count) = be_u32(i)?;
    let (i, restart_count) = be_u32(i)?;
    let (i, safe) = be_u8(i)?;
    Ok((
        i,
        TpmsClockInfo {
            clock,
            reset_count,
            restart_count,
            safe: safe == 1,
        },
    ))
}

fn tpms_attest_parser(i: &[u8]) -> nom::IResult<&[u8], TpmsAttest> {
    let (i, magic) = verify(be_u32, |m: &u32| *m == TPM_GENERATED_VALUE)(i)?;
    let (i, type_raw) = be_u16(i)?;
    let type_ = TpmSt::new(type_raw).ok_or_else(|| parse_failure(i))?;
    let (i, qualified_signer) = tpm2b_name_parser(i)?;
    let (i, extra_data) = tpm2b_parser(i)?;
    let (i, clock_info) = tpms_clock_info_parser(i)?;
    let (i, firmware_version) = be_u64(i)?;

    let (i, typeattested) = match type_ {
        TpmSt::AttestCertify => {
            let (i, name) = tpm2b_name_parser(i)?;
            let (i, qualified_name) = tpm2b_name_parser(i)?;
            (i, TpmuAttest::AttestCertify(name, qualified_name))
        }
        _ => (i, TpmuAttest::Invalid),
    };

    Ok((
        i,
        TpmsAttest {
            magic,
            type_,
            qualified_signer,
            extra_data: (!extra_data.is_empty()).then(|| extra_data.to_vec()),
            clock_info,
            firmware_version,
            typeattested,
        },
    ))
}

impl TryFrom<&[u8]> for TpmsAttest {
    type Error = WebauthnError;

    fn try_from(data: &[u8]) -> Result<TpmsAttest, WebauthnError> {
        tpms_attest_parser(data)
            .map_err(|e| {
                debug!(?e, "tpms_attest_parser");
                WebauthnError::ParseNOMFailure
            })
            // Discard the remaining bytes.
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsRsaParms {
    pub key_bits: u16,
    /// Zero means the default exponent of 65537.
    pub exponent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsEccParms {
    pub curve_id: TpmiEccCurve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TpmuPublicParms {
    Rsa(TpmsRsaParms),
    Ecc(TpmsEccParms),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmsEccPoint {
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TpmuPublicId {
    Rsa(Vec<u8>),
    Ecc(TpmsEccPoint),
}

/// TPMT_PUBLIC, the TPM's description of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TpmtPublic {
    pub type_: TpmAlgId,
    pub name_alg: TpmAlgId,
    pub object_attributes: u32,
    pub auth_policy: Option<Vec<u8>>,
    pub parameters: TpmuPublicParms,
    pub unique: TpmuPublicId,
}

fn tpm_alg_id_parser(i: &[u8]) -> nom::IResult<&[u8], TpmAlgId> {
    let (i, v) = be_u16(i)?;
    let alg = TpmAlgId::new(v).ok_or_else(|| parse_failure(i))?;
    Ok((i, alg))
}

// A scheme or symmetric definition carries details unless it is TPM_ALG_NULL.
fn tpm_alg_with_details_parser<'a>(
    details_len: usize,
) -> impl FnMut(&'a [u8]) -> nom::IResult<&'a [u8], u16> {
    move |i: &'a [u8]| {
        let (i, alg) = be_u16(i)?;
        let (i, _) = cond(alg != TpmAlgId::Null as u16, take(details_len))(i)?;
        Ok((i, alg))
    }
}

fn tpms_rsa_parms_parser(i: &[u8]) -> nom::IResult<&[u8], TpmsRsaParms> {
    // symmetric: keyBits and mode
    let (i, _symmetric) = tpm_alg_with_details_parser(4)(i)?;
    // scheme: hashAlg
    let (i, _scheme) = tpm_alg_with_details_parser(2)(i)?;
    let (i, key_bits) = be_u16(i)?;
    let (i, exponent) = be_u32(i)?;
    Ok((i, TpmsRsaParms { key_bits, exponent }))
}

fn tpms_ecc_parms_parser(i: &[u8]) -> nom::IResult<&[u8], TpmsEccParms> {
    let (i, _symmetric) = tpm_alg_with_details_parser(4)(i)?;
    let (i, _scheme) = tpm_alg_with_details_parser(2)(i)?;
    let (i, curve_raw) = be_u16(i)?;
    let curve_id = TpmiEccCurve::new(curve_raw).ok_or_else(|| parse_failure(i))?;
    let (i, _kdf) = tpm_alg_with_details_parser(2)(i)?;
    Ok((i, TpmsEccParms { curve_id }))
}

fn tpmt_public_parser(i: &[u8]) -> nom::IResult<&[u8], TpmtPublic> {
    let (i, type_) = tpm_alg_id_parser(i)?;
    let (i, name_alg) = tpm_alg_id_parser(i)?;
    let (i, object_attributes) = be_u32(i)?;
    let (i, auth_policy) = tpm2b_parser(i)?;

    let (i, parameters, unique) = match type_ {
        TpmAlgId::Rsa => {
            let (i, parms) = tpms_rsa_parms_parser(i)?;
            let (i, modulus) = tpm2b_parser(i)?;
            (
                i,
                TpmuPublicParms::Rsa(parms),
                TpmuPublicId::Rsa(modulus.to_vec()),
            )
        }
        TpmAlgId::Ecc => {
            let (i, parms) = tpms_ecc_parms_parser(i)?;
            let (i, x) = tpm2b_parser(i)?;
            let (i, y) = tpm2b_parser(i)?;
            (
                i,
                TpmuPublicParms::Ecc(parms),
                TpmuPublicId::Ecc(TpmsEccPoint {
                    x: x.to_vec(),
                    y: y.to_vec(),
                }),
            )
        }
        _ => return Err(parse_failure(i)),
    };

    Ok((
        i,
        TpmtPublic {
            type_,
            name_alg,
            object_attributes,
            auth_policy: (!auth_policy.is_empty()).then(|| auth_policy.to_vec()),
            parameters,
            unique,
        },
    ))
}

impl TryFrom<&[u8]> for TpmtPublic {
    type Error = WebauthnError;

    fn try_from(data: &[u8]) -> Result<TpmtPublic, WebauthnError> {
        tpmt_public_parser(data)
            .map_err(|e| {
                debug!(?e, "tpmt_public_parser");
                WebauthnError::ParseNOMFailure
            })
            .map(|(_, v)| v)
    }
}

/// TPMT_SIGNATURE as sent by authenticators: the raw signature bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TpmtSignature {
    RawSignature(Vec<u8>),
}

impl TryFrom<&[u8]> for TpmtSignature {
    type Error = WebauthnError;

    fn try_from(data: &[u8]) -> Result<TpmtSignature, WebauthnError> {
        if data.is_empty() {
            return Err(WebauthnError::AttestationStatementSigMissing);
        }
        Ok(TpmtSignature::RawSignature(data.to_vec()))
    }
}
