//! Types of the FIDO metadata service as defined by
//! <https://fidoalliance.org/specs/mds/fido-metadata-service-v3.0-ps-20210518.html>
//! and the metadata statement format
//! <https://fidoalliance.org/specs/mds/fido-metadata-statement-v3.0-ps-20210518.html>
//!
//! Unknown fields are ignored so that additions to the published feed do not break
//! ingestion. The deprecated ECDAA trust anchors are not modelled.

use crate::chain::fix_pem_structure;
use crate::error::{MdsError, MdsResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn assume_true() -> bool {
    true
}

fn non_negative_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f32>::deserialize(deserializer)?;
    match value {
        Some(v) if v.is_nan() || v < 0.0 => Err(serde::de::Error::custom(
            "accuracy values must be non-negative",
        )),
        v => Ok(v),
    }
}

fn non_negative_number<'de, D>(deserializer: D) -> Result<serde_json::Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value.as_f64() {
        Some(v) if v < 0.0 => Err(serde::de::Error::custom(
            "accuracy values must be non-negative",
        )),
        _ => Ok(value),
    }
}

/// How an authenticator model is identified. Exactly one identifier is present on any
/// statement or BLOB entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdentifierFields", into = "IdentifierFields")]
pub enum AuthenticatorIdentifier {
    /// A FIDO UAF authenticator attestation id.
    Aaid(String),
    /// A FIDO2 authenticator attestation GUID.
    Aaguid(String),
    /// The hex encoded key identifiers of the attestation certificates of a U2F model.
    KeyIdentifiers(Vec<String>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifierFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aaid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aaguid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attestation_certificate_key_identifiers: Option<Vec<String>>,
}

impl TryFrom<IdentifierFields> for AuthenticatorIdentifier {
    type Error = MdsError;

    fn try_from(fields: IdentifierFields) -> Result<Self, Self::Error> {
        match (
            fields.aaid,
            fields.aaguid,
            fields.attestation_certificate_key_identifiers,
        ) {
            (Some(_), Some(_), _) => Err(MdsError::InvalidIdentifier(
                "aaid and aaguid are mutually exclusive",
            )),
            (Some(aaid), None, _) => Ok(AuthenticatorIdentifier::Aaid(aaid)),
            (None, Some(aaguid), _) => Ok(AuthenticatorIdentifier::Aaguid(aaguid)),
            (None, None, Some(ids)) if !ids.is_empty() => {
                Ok(AuthenticatorIdentifier::KeyIdentifiers(ids))
            }
            (None, None, _) => Err(MdsError::InvalidIdentifier(
                "one of aaid, aaguid or attestationCertificateKeyIdentifiers must be set",
            )),
        }
    }
}

impl From<AuthenticatorIdentifier> for IdentifierFields {
    fn from(id: AuthenticatorIdentifier) -> Self {
        match id {
            AuthenticatorIdentifier::Aaid(aaid) => IdentifierFields {
                aaid: Some(aaid),
                ..Default::default()
            },
            AuthenticatorIdentifier::Aaguid(aaguid) => IdentifierFields {
                aaguid: Some(aaguid),
                ..Default::default()
            },
            AuthenticatorIdentifier::KeyIdentifiers(ids) => IdentifierFields {
                attestation_certificate_key_identifiers: Some(ids),
                ..Default::default()
            },
        }
    }
}

impl AuthenticatorIdentifier {
    /// The AAGUID if this authenticator is identified by one.
    pub fn aaguid(&self) -> Option<&str> {
        match self {
            AuthenticatorIdentifier::Aaguid(aaguid) => Some(aaguid.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A protocol version supported by the authenticator.
pub struct Upv {
    /// Major
    pub major: u16,
    /// Minor
    pub minor: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Accuracy and complexity of a passcode user verification method.
pub struct CodeAccuracyDescriptor {
    /// The numeric radix of the code, e.g. 10 for decimal digits.
    pub base: u16,
    /// The minimum number of digits of the given base.
    pub min_length: u16,
    /// False attempts before the method blocks. 0 means it never blocks.
    pub max_retries: Option<u16>,
    /// Seconds to wait after blocking. 0 means blocked until an alternative method succeeds.
    pub block_slowdown: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Accuracy of a biometric user verification method.
pub struct BiometricAccuracyDescriptor {
    /// Self attested false rejection rate for a single template, e.g. 10% is 0.1.
    #[serde(
        rename = "selfAttestedFRR",
        default,
        deserialize_with = "non_negative_f32"
    )]
    pub self_attested_frr: Option<f32>,
    /// Self attested false acceptance rate for a single template, e.g. 0.002% is 0.00002.
    #[serde(
        rename = "selfAttestedFAR",
        default,
        deserialize_with = "non_negative_f32"
    )]
    pub self_attested_far: Option<f32>,
    /// Maximum number of alternative templates, e.g. enrolled fingers.
    pub max_templates: Option<u16>,
    /// False attempts before the method blocks. 0 means it never blocks.
    pub max_retries: Option<u16>,
    /// Seconds to wait after blocking.
    pub block_slowdown: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Accuracy of a pattern based user verification method.
pub struct PatternAccuracyDescriptor {
    /// Number of possible patterns of minimum length. Published values exceed the range of
    /// every fixed width integer, so the raw number is retained.
    #[serde(deserialize_with = "non_negative_number")]
    pub min_complexity: serde_json::Value,
    /// False attempts before the method blocks. 0 means it never blocks.
    pub max_retries: Option<u16>,
    /// Seconds to wait after blocking.
    pub block_slowdown: Option<u16>,
}

/// User verification methods from the FIDO registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum UserVerificationMethod {
    None,
    /// Must not appear in any statement.
    All,
    PresenceInternal,
    PasscodeInternal,
    PasscodeExternal,
    FingerprintInternal,
    HandprintInternal,
    EyeprintInternal,
    PatternInternal,
    VoiceprintInternal,
    LocationInternal,
    FaceprintInternal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One user verification method, with optional accuracy details.
pub struct VerificationMethodDescriptor {
    /// The verification method.
    pub user_verification_method: UserVerificationMethod,
    /// Passcode accuracy.
    pub ca_desc: Option<CodeAccuracyDescriptor>,
    /// Biometric accuracy.
    pub ba_desc: Option<BiometricAccuracyDescriptor>,
    /// Pattern accuracy.
    pub pa_desc: Option<PatternAccuracyDescriptor>,
}

/// An extension supported by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescriptor {
    /// Identifies the extension.
    pub id: String,
    /// The TAG of the extension if one was assigned.
    pub tag: Option<u16>,
    /// Arbitrary data describing the extension.
    pub data: Option<String>,
    /// If unknown extensions must result in an error.
    pub fail_if_unknown: bool,
}

/// The family of protocols this authenticator implements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// Uaf. Assumed when the field is absent.
    #[default]
    Uaf,
    /// Universal Second Factor
    U2f,
    /// Fido 2
    Fido2,
}

/// Authentication algorithms from the FIDO registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum AuthenticationAlgorithm {
    Secp256r1EcdsaSha256Raw,
    Secp256r1EcdsaSha256Der,
    RsassaPssSha256Raw,
    RsassaPssSha256Der,
    Secp256k1EcdsaSha256Raw,
    Secp256k1EcdsaSha256Der,
    Sm2Sm3Raw,
    RsaEmsaPkcs1Sha256Raw,
    RsaEmsaPkcs1Sha256Der,
    RsassaPssSha384Raw,
    RsassaPssSha512Raw,
    RsassaPkcsv15Sha256Raw,
    RsassaPkcsv15Sha384Raw,
    RsassaPkcsv15Sha512Raw,
    RsassaPkcsv15Sha1Raw,
    Secp384r1EcdsaSha384Raw,
    Secp521r1EcdsaSha512Raw,
    Ed25519EddsaSha512Raw,
    Ed448EddsaSha512Raw,
}

/// Public key encodings used during registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum PublicKeyAlg {
    EccX962Raw,
    EccX962Der,
    Rsa2048Raw,
    Rsa2048Der,
    Cose,
}

/// An attestation type an authenticator may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationType {
    /// The attestation key is shared by a batch of authenticators.
    BasicFull,
    /// The credential key signs its own attestation.
    BasicSurrogate,
    /// An attestation CA issued a per-credential certificate.
    #[serde(rename = "attca")]
    AttCa,
    /// An anonymisation CA issued a per-credential certificate.
    #[serde(rename = "anonca")]
    AnonCa,
    /// No attestation.
    None,
}

impl fmt::Display for AttestationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttestationType::BasicFull => "basic_full",
            AttestationType::BasicSurrogate => "basic_surrogate",
            AttestationType::AttCa => "attca",
            AttestationType::AnonCa => "anonca",
            AttestationType::None => "none",
        };
        f.write_str(s)
    }
}

/// The class of key protection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum KeyProtection {
    Software,
    Hardware,
    Tee,
    SecureElement,
    RemoteHandle,
}

/// Where the matcher runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum MatcherProtection {
    Software,
    Tee,
    OnChip,
}

/// How the authenticator communicates with the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum AttachmentHint {
    Internal,
    External,
    Wired,
    Wireless,
    Nfc,
    Bluetooth,
    Network,
    Ready,
    WifiDirect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A statement describing an authenticator model and its trust anchors.
pub struct MetadataStatement {
    /// Legal Header
    pub legal_header: Option<String>,
    /// The identifier of this authenticator model.
    #[serde(flatten)]
    pub identifier: AuthenticatorIdentifier,
    /// A short description of the authenticator, in English.
    pub description: String,
    /// Descriptions in other languages keyed by IETF language code.
    #[serde(default)]
    pub alternative_descriptions: BTreeMap<String, String>,
    /// Earliest trustworthy firmware version meeting the claims of this statement.
    pub authenticator_version: u32,
    /// The FIDO protocol family.
    #[serde(default)]
    pub protocol_family: ProtocolFamily,
    /// Version of this structure.
    pub schema: u16,
    /// The supported protocol versions.
    pub upv: Vec<Upv>,
    /// Supported authentication algorithms.
    #[serde(default)]
    pub authentication_algorithms: Vec<AuthenticationAlgorithm>,
    /// Supported public key encodings.
    #[serde(default)]
    pub public_key_alg_and_encodings: Vec<PublicKeyAlg>,
    /// The attestation types this model may produce.
    pub attestation_types: Vec<AttestationType>,
    /// An OR over AND combinations of user verification methods.
    pub user_verification_details: Vec<Vec<VerificationMethodDescriptor>>,
    /// The key protection types supported.
    pub key_protection: Vec<KeyProtection>,
    /// If the credential key is restricted to signing valid assertions.
    #[serde(default = "assume_true")]
    pub is_key_restricted: bool,
    /// If credential key use always requires fresh user verification.
    #[serde(default = "assume_true")]
    pub is_fresh_user_verification_required: bool,
    /// Where the matcher runs.
    pub matcher_protection: Vec<MatcherProtection>,
    /// Claimed cryptographic strength in bits.
    pub crypto_strength: Option<u16>,
    /// Attachment hints for this model.
    #[serde(default)]
    pub attachment_hint: Vec<AttachmentHint>,
    /// Transaction confirmation display capabilities.
    #[serde(default)]
    pub tc_display: Vec<String>,
    /// MIME type of the transaction confirmation display.
    pub tc_display_content_type: Option<String>,
    /// PNG characteristics of the transaction confirmation display.
    #[serde(rename = "tcDisplayPNGCharacteristics")]
    pub tc_display_png_characteristics: Option<serde_json::Value>,
    /// Base64 DER certificates that are trust anchors for this model. A trust anchor may be
    /// a root, an intermediate or the attestation certificate itself. Published values may
    /// carry stray whitespace.
    pub attestation_root_certificates: Vec<String>,
    /// A data url icon.
    pub icon: Option<String>,
    /// Supported extensions.
    #[serde(default)]
    pub supported_extensions: Vec<ExtensionDescriptor>,
    /// The authenticatorGetInfo response of this model.
    pub authenticator_get_info: Option<serde_json::Value>,
}

impl MetadataStatement {
    /// The AAGUID of this statement, if it is identified by one.
    pub fn aaguid(&self) -> Option<&str> {
        self.identifier.aaguid()
    }

    /// The attestation trust anchors as normalised PEM documents.
    pub fn attestation_root_certificates_pem(&self) -> Vec<String> {
        self.attestation_root_certificates
            .iter()
            .map(|c| fix_pem_structure(c))
            .collect()
    }
}

impl fmt::Display for MetadataStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Biometric certification state of a component of the authenticator.
pub struct BiometricsStatusReport {
    /// Achieved level of biometric certification.
    pub cert_level: u16,
    /// The biometric modality, e.g. `fingerprint_internal`.
    pub modality: Option<String>,
    /// ISO-8601 date since when the level was achieved.
    pub effective_date: Option<String>,
    /// Externally visible aspects of the evaluation.
    pub certification_descriptor: Option<String>,
    /// Identifier of the issued certification.
    pub certificate_number: Option<String>,
    /// Certification policy version.
    pub certification_policy_version: Option<String>,
    /// Biometric requirements version.
    pub certification_requirements_version: Option<String>,
}

/// The certification or security status of an authenticator model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticatorStatus {
    /// Not certified.
    NotFidoCertified,
    /// Certified. Superseded by the levelled statuses.
    FidoCertified,
    /// Malware can bypass user verification.
    UserVerificationBypass,
    /// An attestation key is known to be compromised.
    AttestationKeyCompromise,
    /// Registered keys can be compromised remotely.
    UserKeyRemoteCompromise,
    /// Registered keys can be extracted with physical access.
    UserKeyPhysicalCompromise,
    /// A firmware update is available.
    UpdateAvailable,
    /// This model should not be trusted for any reason.
    Revoked,
    /// The vendor submitted the self-certification checklist.
    SelfAssertionSubmitted,
    /// Certified at level 1
    #[serde(rename = "FIDO_CERTIFIED_L1")]
    FidoCertifiedL1,
    /// Certified at level 1 plus
    #[serde(rename = "FIDO_CERTIFIED_L1plus")]
    FidoCertifiedL1Plus,
    /// Certified at level 2
    #[serde(rename = "FIDO_CERTIFIED_L2")]
    FidoCertifiedL2,
    /// Certified at level 2 plus
    #[serde(rename = "FIDO_CERTIFIED_L2plus")]
    FidoCertifiedL2Plus,
    /// Certified at level 3
    #[serde(rename = "FIDO_CERTIFIED_L3")]
    FidoCertifiedL3,
    /// Certified at level 3 plus
    #[serde(rename = "FIDO_CERTIFIED_L3plus")]
    FidoCertifiedL3Plus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// An [AuthenticatorStatus] and the data associated with it. The last report of an entry
/// reflects the current status.
pub struct StatusReport {
    /// The status of the authenticator.
    pub status: AuthenticatorStatus,
    /// ISO-8601 date since when the status applies.
    pub effective_date: Option<String>,
    /// The firmware version this report relates to.
    pub authenticator_version: Option<u32>,
    /// Base64 DER certificate related to this status.
    pub certificate: Option<String>,
    /// Where more information about this status is available.
    pub url: Option<String>,
    /// Externally visible aspects of the certification.
    pub certification_descriptor: Option<String>,
    /// Identifier of the issued certification.
    pub certificate_number: Option<String>,
    /// Certification policy version.
    pub certification_policy_version: Option<String>,
    /// Security requirements version.
    pub certification_requirements_version: Option<String>,
}

impl StatusReport {
    /// If this status means that credentials of this authenticator must not be trusted.
    pub fn is_compromised(&self) -> bool {
        matches!(
            self.status,
            AuthenticatorStatus::UserVerificationBypass
                | AuthenticatorStatus::AttestationKeyCompromise
                | AuthenticatorStatus::UserKeyRemoteCompromise
                | AuthenticatorStatus::UserKeyPhysicalCompromise
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One authenticator model listed in the metadata BLOB.
pub struct MetadataBLOBPayloadEntry {
    /// The identifier of this authenticator model.
    #[serde(flatten)]
    pub identifier: AuthenticatorIdentifier,
    /// The statement describing this model.
    pub metadata_statement: Option<MetadataStatement>,
    /// Biometric certification of components of this model.
    #[serde(default)]
    pub biometric_status_reports: Vec<BiometricsStatusReport>,
    /// Status reports of this model, the last one being current.
    pub status_reports: Vec<StatusReport>,
    /// ISO-8601 date since when the status reports were set.
    pub time_of_last_status_change: Option<String>,
    /// URL of a list of rogue individual authenticators.
    #[serde(rename = "rogueListURL")]
    pub rogue_list_url: Option<String>,
    /// Hash of the rogue list. Present whenever the URL is.
    pub rogue_list_hash: Option<String>,
}

impl MetadataBLOBPayloadEntry {
    fn validate(&self) -> MdsResult<()> {
        if self.rogue_list_url.is_some() && self.rogue_list_hash.is_none() {
            return Err(MdsError::InvalidIdentifier(
                "rogueListHash must be present with rogueListURL",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The verified payload of a metadata BLOB.
pub struct MetadataBLOBPayload {
    /// Legal header
    pub legal_header: Option<String>,
    /// Serial number of this BLOB. Successors increment it by exactly one.
    pub no: u32,
    /// ISO-8601 date when the next BLOB will be provided at latest.
    pub next_update: String,
    /// The listed authenticator models.
    pub entries: Vec<MetadataBLOBPayloadEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LenientPayload {
    legal_header: Option<String>,
    no: u32,
    next_update: String,
    entries: Vec<serde_json::Value>,
}

/// An entry of a BLOB that could not be decoded and was left out of the payload.
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    /// Position of the entry in the BLOB.
    pub index: usize,
    /// Why the entry was rejected.
    pub reason: String,
}

impl MetadataBLOBPayload {
    /// Decode a payload, leaving out entries that are malformed rather than rejecting the
    /// whole BLOB. The published feed has historically contained entries that violate its
    /// own schema, and one such entry must not deny service for every other authenticator.
    pub fn from_json_lenient(data: &[u8]) -> MdsResult<(Self, Vec<SkippedEntry>)> {
        let raw: LenientPayload = serde_json::from_slice(data)?;
        let mut skipped = Vec::new();
        let mut entries = Vec::with_capacity(raw.entries.len());

        for (index, value) in raw.entries.into_iter().enumerate() {
            match serde_json::from_value::<MetadataBLOBPayloadEntry>(value)
                .map_err(MdsError::from)
                .and_then(|entry| entry.validate().map(|_| entry))
            {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(?index, ?e, "skipping malformed metadata entry");
                    skipped.push(SkippedEntry {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok((
            MetadataBLOBPayload {
                legal_header: raw.legal_header,
                no: raw.no,
                next_update: raw.next_update,
                entries,
            },
            skipped,
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn statement_json(aaguid: &str) -> serde_json::Value {
        json!({
            "legalHeader": "https://fidoalliance.org/metadata/metadata-statement-legal-header/",
            "aaguid": aaguid,
            "description": "Test Security Key",
            "authenticatorVersion": 2,
            "protocolFamily": "fido2",
            "schema": 3,
            "upv": [{ "major": 1, "minor": 0 }],
            "authenticationAlgorithms": ["secp256r1_ecdsa_sha256_raw"],
            "publicKeyAlgAndEncodings": ["cose"],
            "attestationTypes": ["basic_full"],
            "userVerificationDetails": [[
                { "userVerificationMethod": "presence_internal" }
            ], [
                {
                    "userVerificationMethod": "fingerprint_internal",
                    "baDesc": { "selfAttestedFRR": 0.01, "selfAttestedFAR": 0.00002, "maxRetries": 5 }
                }
            ]],
            "keyProtection": ["hardware", "secure_element"],
            "matcherProtection": ["on_chip"],
            "cryptoStrength": 128,
            "attachmentHint": ["external", "wired"],
            "tcDisplay": [],
            "attestationRootCertificates": [],
            "supportedExtensions": [{ "id": "hmac-secret", "failIfUnknown": false }]
        })
    }

    #[test]
    fn statement_with_aaguid_decodes() {
        let stmt: MetadataStatement =
            serde_json::from_value(statement_json("existing-aaguid")).expect("decode");
        assert_eq!(stmt.aaguid(), Some("existing-aaguid"));
        assert_eq!(stmt.attestation_types, vec![AttestationType::BasicFull]);
        assert!(stmt.is_key_restricted);
        assert_eq!(stmt.protocol_family, ProtocolFamily::Fido2);
    }

    #[test]
    fn identifier_exclusivity() {
        // Both aaid and aaguid
        let mut both = statement_json("existing-aaguid");
        both["aaid"] = json!("4e4e#4005");
        assert!(serde_json::from_value::<MetadataStatement>(both).is_err());

        // Neither, and no key identifiers
        let mut neither = statement_json("x");
        neither.as_object_mut().map(|o| o.remove("aaguid"));
        assert!(serde_json::from_value::<MetadataStatement>(neither.clone()).is_err());

        // Neither, with an empty key identifier list
        neither["attestationCertificateKeyIdentifiers"] = json!([]);
        assert!(serde_json::from_value::<MetadataStatement>(neither.clone()).is_err());

        // Exactly one of each kind
        neither["attestationCertificateKeyIdentifiers"] =
            json!(["923881fe2f214ee465484371aeb72e97f5a58e0a"]);
        let stmt: MetadataStatement = serde_json::from_value(neither).expect("key ids");
        assert!(matches!(
            stmt.identifier,
            AuthenticatorIdentifier::KeyIdentifiers(ref ids) if ids.len() == 1
        ));

        let mut aaid = statement_json("x");
        aaid.as_object_mut().map(|o| o.remove("aaguid"));
        aaid["aaid"] = json!("4e4e#4005");
        let stmt: MetadataStatement = serde_json::from_value(aaid).expect("aaid");
        assert_eq!(
            stmt.identifier,
            AuthenticatorIdentifier::Aaid("4e4e#4005".to_string())
        );
        assert_eq!(stmt.aaguid(), None);
    }

    #[test]
    fn negative_accuracy_is_rejected() {
        let mut stmt = statement_json("existing-aaguid");
        stmt["userVerificationDetails"][1][0]["baDesc"]["selfAttestedFAR"] = json!(-0.5);
        assert!(serde_json::from_value::<MetadataStatement>(stmt).is_err());

        let mut stmt = statement_json("existing-aaguid");
        stmt["userVerificationDetails"][0][0]["caDesc"] =
            json!({ "base": 10, "minLength": -4 });
        assert!(serde_json::from_value::<MetadataStatement>(stmt).is_err());

        let mut stmt = statement_json("existing-aaguid");
        stmt["userVerificationDetails"][0][0]["paDesc"] = json!({ "minComplexity": -1 });
        assert!(serde_json::from_value::<MetadataStatement>(stmt).is_err());
    }

    #[test]
    fn statement_serialises_identifier_flat() {
        let stmt: MetadataStatement =
            serde_json::from_value(statement_json("existing-aaguid")).expect("decode");
        let v = serde_json::to_value(&stmt).expect("encode");
        assert_eq!(v["aaguid"], json!("existing-aaguid"));
        assert!(v.get("aaid").is_none());
        let again: MetadataStatement = serde_json::from_value(v).expect("decode again");
        assert_eq!(again, stmt);
    }

    #[test]
    fn compromised_statuses() {
        let report = |status| StatusReport {
            status,
            effective_date: None,
            authenticator_version: None,
            certificate: None,
            url: None,
            certification_descriptor: None,
            certificate_number: None,
            certification_policy_version: None,
            certification_requirements_version: None,
        };
        assert!(report(AuthenticatorStatus::AttestationKeyCompromise).is_compromised());
        assert!(report(AuthenticatorStatus::UserVerificationBypass).is_compromised());
        assert!(report(AuthenticatorStatus::UserKeyRemoteCompromise).is_compromised());
        assert!(report(AuthenticatorStatus::UserKeyPhysicalCompromise).is_compromised());
        assert!(!report(AuthenticatorStatus::Revoked).is_compromised());
        assert!(!report(AuthenticatorStatus::FidoCertifiedL1).is_compromised());

        let decoded: StatusReport =
            serde_json::from_value(json!({ "status": "FIDO_CERTIFIED_L1plus" })).expect("decode");
        assert_eq!(decoded.status, AuthenticatorStatus::FidoCertifiedL1Plus);
    }

    #[test]
    fn lenient_payload_skips_bad_entries() {
        let payload = json!({
            "legalHeader": "Retrieval and use of this BLOB indicates acceptance.",
            "no": 42,
            "nextUpdate": "2026-11-01",
            "entries": [
                {
                    "aaguid": "existing-aaguid",
                    "metadataStatement": statement_json("existing-aaguid"),
                    "statusReports": [{ "status": "FIDO_CERTIFIED_L1" }],
                    "timeOfLastStatusChange": "2026-01-01"
                },
                {
                    "aaid": "4e4e#4005",
                    "aaguid": "both-set",
                    "statusReports": []
                },
                {
                    "aaguid": "rogue",
                    "statusReports": [],
                    "rogueListURL": "https://example.com/rogue"
                },
                {
                    "attestationCertificateKeyIdentifiers": ["bf7cb0e4b3e4c4a5c4bd46d6e24b8e8f28a1e8c2"],
                    "statusReports": [{ "status": "NOT_FIDO_CERTIFIED" }]
                }
            ]
        });
        let data = serde_json::to_vec(&payload).expect("encode");
        let (decoded, skipped) = MetadataBLOBPayload::from_json_lenient(&data).expect("decode");
        assert_eq!(decoded.no, 42);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].index, 1);
        assert_eq!(skipped[1].index, 2);
        assert_eq!(decoded.entries[0].identifier.aaguid(), Some("existing-aaguid"));
    }

    #[test]
    fn lenient_payload_requires_envelope_fields() {
        let data = br#"{"entries": []}"#;
        assert!(MetadataBLOBPayload::from_json_lenient(data).is_err());
    }
}
