//! Possible errors that may occur during Webauthn Operation processing.

use thiserror::Error;
use webauthn_mds::{AttestationType, ErrorKind, MdsError};

/// Possible errors that may occur during Webauthn Operation processing.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum WebauthnError {
    #[error("The configuration was invalid: {0}")]
    Configuration(&'static str),

    #[error("The JSON from the client did not indicate webauthn.<method> correctly")]
    InvalidClientDataType,

    #[error("The client response challenge differs from the latest challenge issued to the userId")]
    MismatchedChallenge,

    #[error("There are no challenges associated to the UserId")]
    ChallengeNotFound,

    #[error("The clients relying party origin does not match our servers information")]
    InvalidRPOrigin,

    #[error("The clients relying party id hash does not match the hash of our relying party id")]
    InvalidRPIDHash,

    #[error("The user present bit is not set, and required")]
    UserNotPresent,

    #[error("The user verified bit is not set, and required by policy")]
    UserNotVerified,

    #[error("The extensions are unknown to this server")]
    InvalidExtensions,

    #[error("The required attestation data is not present in the response")]
    MissingAttestationCredentialData,

    #[error("The attestation format requested is not able to be processed by this server - please report an issue to add the attestation format")]
    AttestationNotSupported,

    #[error("The attestation statement map is not valid")]
    AttestationStatementMapInvalid,

    #[error("The attestation statement response is not present")]
    AttestationStatementResponseMissing,

    #[error("The attestation statement response is not valid")]
    AttestationStatementResponseInvalid,

    #[error("The attestation statement signature is not present")]
    AttestationStatementSigMissing,

    #[error("The attestation statement signature is not valid")]
    AttestationStatementSigInvalid,

    #[error("The attestation statement version is not present")]
    AttestationStatementVerMissing,

    #[error("The attestation statement version is not valid")]
    AttestationStatementVerInvalid,

    #[error("The attestation statement version not supported")]
    AttestationStatementVerUnsupported,

    #[error("The attestation statement x5c (trust root) is not present")]
    AttestationStatementX5CMissing,

    #[error("The attestation statement x5c (trust root) is not valid")]
    AttestationStatementX5CInvalid,

    #[error("The attestation statement algorithmm is not present")]
    AttestationStatementAlgMissing,

    #[error("The attestation statement algorithmm is not valid")]
    AttestationStatementAlgInvalid,

    #[error("The attestation statement algorithmm does not match")]
    AttestationStatementAlgMismatch,

    #[error("The attestation statement certInfo is not present")]
    AttestationStatementCertInfoMissing,

    #[error("The attestation statement pubArea is not present")]
    AttestationStatementPubAreaMissing,

    #[error("The attestation statement is missing a required extension")]
    AttestationStatementMissingExtension,

    #[error("The attestation certificate requirements were not met")]
    AttestationCertificateRequirementsNotMet,

    #[error("The attestation certificate AAGUID extension does not match the credential")]
    AttestationCertificateAAGUIDMismatch,

    #[error("The attestation certificate nonce does not match the ceremony")]
    AttestationCertificateNonceMismatch,

    #[error("The attestation certificate key does not match the credential key")]
    AttestationCredentialSubjectKeyMismatch,

    #[error("The TPM attestation type is not ATTEST_CERTIFY")]
    AttestationTpmStInvalid,

    #[error("The TPM attestation and key algorithms do not match")]
    AttestationTpmPubAreaMismatch,

    #[error("The TPM attestation extraData is missing or invalid")]
    AttestationTpmExtraDataInvalid,

    #[error("The TPM attestation extraData is not the hash of the attested data")]
    AttestationTpmExtraDataMismatch,

    #[error("The TPM attested name does not name the pubArea")]
    AttestationTpmPubAreaHashInvalid,

    #[error("The TPM pubArea name algorithm is not supported")]
    AttestationTpmPubAreaHashUnknown,

    #[error("The TPM attestation does not certify a key")]
    AttestationTpmAttestCertifyInvalid,

    #[error("The attestation type {0} is not declared by the authenticator metadata")]
    InvalidAttestationType(AttestationType),

    #[error("The authenticator model is reported as compromised")]
    AuthenticatorCompromised,

    #[error("The attestation trust path could not be established")]
    AttestationTrustFailure,

    #[error("The credential public key algorithm was not requested")]
    CredentialAlteredAlgFromRequest,

    #[error("The credential id is already registered")]
    CredentialAlreadyExists,

    #[error("The credential requested could not be found")]
    CredentialNotFound,

    #[error("The credential was not offered in the request options")]
    CredentialNotAllowed,

    #[error("The user handle does not match the credential owner")]
    UserHandleMismatch,

    #[error("The user could not be found")]
    UserNotFound,

    #[error("The supplied username is invalid")]
    InvalidUsername,

    #[error("The signature is invalid")]
    AuthenticationFailure,

    #[error("The signature counter regressed from {stored} to {received}")]
    CounterRegression { stored: u32, received: u32 },

    #[error("The signature counter was concurrently updated")]
    CounterUpdateConflict,

    #[error("The ceremony has already completed")]
    CeremonyAlreadyCompleted,

    #[error("The COSEKey contains invalid CBOR which can not be processed")]
    COSEKeyInvalidCBORValue,

    #[error("The COSEKey type is not supported by this implementation")]
    COSEKeyInvalidType,

    #[error("The COSEKey algorithm is not supported")]
    COSEKeyInvalidAlgorithm,

    #[error("The COSEKey contains invalid ECDSA X/Y coordinate data")]
    COSEKeyECDSAXYInvalid,

    #[error("The COSEKey uses a curve that is not supported by this implementation")]
    COSEKeyECDSAInvalidCurve,

    #[error("The COSEKey contains invalid RSA modulus/exponent data")]
    COSEKeyRSANEInvalid,

    #[error("The COSEKey uses a curve that is not supported by this implementation")]
    COSEKeyEDDSAInvalidCurve,

    #[error("The COSEKey contains invalid EDDSA X coordinate data")]
    COSEKeyEDDSAXInvalid,

    #[error("The credential uses insecure cryptography")]
    CredentialInsecureCryptography,

    #[error("The certificate public key does not match the algorithm")]
    CertificatePublicKeyAlgorithmMismatch,

    #[error("The binary data could not be parsed")]
    ParseNOMFailure,

    #[error("Not enough bytes were available to parse")]
    ParseInsufficientBytesAvailable,

    #[error("The base64 content is invalid")]
    ParseBase64Failure(#[from] base64::DecodeError),

    #[error("The CBOR content is invalid")]
    ParseCBORFailure(#[from] serde_cbor_2::Error),

    #[error("The JSON content is invalid")]
    ParseJSONFailure(#[from] serde_json::Error),

    #[error("An OpenSSL Error occured")]
    OpenSSLError(#[from] openssl::error::ErrorStack),

    #[error("The metadata service failed: {0}")]
    Metadata(#[from] MdsError),
}

impl WebauthnError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WebauthnError::Metadata(e) => e.kind(),
            WebauthnError::AttestationTrustFailure => ErrorKind::UntrustedChain,
            WebauthnError::InvalidAttestationType(_) => ErrorKind::InvalidAttestationType,
            WebauthnError::CounterRegression { .. } => ErrorKind::CounterRegression,
            WebauthnError::ChallengeNotFound
            | WebauthnError::CredentialNotFound
            | WebauthnError::UserNotFound => ErrorKind::NotFound,
            WebauthnError::AttestationStatementSigInvalid | WebauthnError::AuthenticationFailure => {
                ErrorKind::InvalidSignature
            }
            _ => ErrorKind::ValidationFailure,
        }
    }

    /// If this error means the client supplied something that could not be understood, as
    /// opposed to a well formed response that was rejected.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            WebauthnError::InvalidClientDataType
                | WebauthnError::MissingAttestationCredentialData
                | WebauthnError::AttestationStatementMapInvalid
                | WebauthnError::AttestationStatementResponseMissing
                | WebauthnError::AttestationStatementSigMissing
                | WebauthnError::AttestationStatementVerMissing
                | WebauthnError::AttestationStatementVerInvalid
                | WebauthnError::AttestationStatementX5CMissing
                | WebauthnError::AttestationStatementX5CInvalid
                | WebauthnError::AttestationStatementAlgMissing
                | WebauthnError::AttestationStatementAlgInvalid
                | WebauthnError::AttestationStatementCertInfoMissing
                | WebauthnError::AttestationStatementPubAreaMissing
                | WebauthnError::InvalidUsername
                | WebauthnError::COSEKeyInvalidCBORValue
                | WebauthnError::ParseNOMFailure
                | WebauthnError::ParseInsufficientBytesAvailable
                | WebauthnError::ParseBase64Failure(_)
                | WebauthnError::ParseCBORFailure(_)
                | WebauthnError::ParseJSONFailure(_)
        )
    }
}

/// Result alias for ceremony operations.
pub type WebauthnResult<T> = Result<T, WebauthnError>;
