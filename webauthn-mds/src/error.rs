//! Possible errors that may occur while verifying or loading metadata.

use thiserror::Error;

/// The broad category of a failure. Both this crate and the ceremony crate map their
/// detailed errors onto these kinds so that callers can make policy decisions without
/// matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The token could not be parsed.
    MalformedToken,
    /// A required JWS header parameter was absent.
    MissingHeaderParameter,
    /// A signature was invalid, or made with an algorithm we will not accept.
    InvalidSignature,
    /// The certificate chain could not be built to a trusted root.
    UntrustedChain,
    /// A certificate in the chain is outside of its validity window.
    ExpiredCertificate,
    /// The requested item does not exist.
    NotFound,
    /// Fetching or decoding a metadata source failed.
    MetadataLoadFailure,
    /// The attestation type is not declared by the authenticator metadata.
    InvalidAttestationType,
    /// The signature counter did not advance.
    CounterRegression,
    /// Any other validation failure of a ceremony response.
    ValidationFailure,
}

/// Errors raised by the metadata verification and loading layer.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum MdsError {
    #[error("The token is malformed: {0}")]
    MalformedToken(&'static str),
    #[error("The JWS header is missing the parameter {0}")]
    MissingHeaderParameter(&'static str),
    #[error("The JWS algorithm is not supported")]
    UnsupportedAlgorithm,
    #[error("The signature is invalid")]
    InvalidSignature,
    #[error("The certificate chain is not trusted")]
    UntrustedChain,
    #[error("The certificate chain is empty")]
    EmptyChain,
    #[error("The certificate expired")]
    ExpiredCertificate,
    #[error("The certificate could not be parsed")]
    CertificateParse,
    #[error("No metadata statement exists for {0}")]
    NotFound(String),
    #[error("The metadata request returned status {0}")]
    HttpStatus(u16),
    #[error("The metadata response body is empty")]
    EmptyBody,
    #[error("The metadata request failed: {0}")]
    Transport(String),
    #[error("The metadata statement identifier is invalid: {0}")]
    InvalidIdentifier(&'static str),
    #[error("A previous load of this metadata source failed: {0}")]
    PreviousLoadFailed(String),
    #[error("Base64 decoding failed")]
    Base64(#[from] base64::DecodeError),
    #[error("JSON processing failed")]
    Json(#[from] serde_json::Error),
    #[error("I/O failure")]
    Io(#[from] std::io::Error),
    #[error("OpenSSL operation failed")]
    OpenSSL(#[from] openssl::error::ErrorStack),
}

impl MdsError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MdsError::MalformedToken(_) | MdsError::Base64(_) => ErrorKind::MalformedToken,
            MdsError::MissingHeaderParameter(_) => ErrorKind::MissingHeaderParameter,
            MdsError::UnsupportedAlgorithm | MdsError::InvalidSignature => {
                ErrorKind::InvalidSignature
            }
            MdsError::UntrustedChain
            | MdsError::EmptyChain
            | MdsError::CertificateParse
            | MdsError::OpenSSL(_) => ErrorKind::UntrustedChain,
            MdsError::ExpiredCertificate => ErrorKind::ExpiredCertificate,
            MdsError::NotFound(_) => ErrorKind::NotFound,
            MdsError::HttpStatus(_)
            | MdsError::EmptyBody
            | MdsError::Transport(_)
            | MdsError::InvalidIdentifier(_)
            | MdsError::PreviousLoadFailed(_)
            | MdsError::Json(_)
            | MdsError::Io(_) => ErrorKind::MetadataLoadFailure,
        }
    }
}

/// Result alias for metadata operations.
pub type MdsResult<T> = Result<T, MdsError>;
