//! Webauthn Ceremony - validation of registration and authentication ceremonies.
//!
//! A relying party issues options containing a random challenge, the client's authenticator
//! answers them, and the relying party must prove that the answer is genuine before it
//! registers a credential or accepts a login. This crate performs that proof:
//!
//! * Registration responses are checked by the [AttestationResponseValidator], which
//!   verifies the attestation statement of every standard format, and optionally checks the
//!   authenticator model against FIDO metadata through [webauthn_mds].
//! * Authentication responses are checked by the [AssertionResponseValidator], which
//!   verifies the signature with the stored public key and applies a [CounterChecker] to
//!   detect cloned authenticators.
//!
//! Most applications should use the [Webauthn] facade, which also generates challenges and
//! keeps the issued options in an [OptionsStorage] until they are answered. Credentials and
//! accounts are persisted by the application through the [CredentialSourceRepository] and
//! [UserEntityRepository] traits.
//!
//! ```
//! use std::sync::Arc;
//! use webauthn_ceremony::prelude::*;
//!
//! let config = CeremonyConfigBuilder::new("example.com")
//!     .expect("Invalid rp id")
//!     .build()
//!     .expect("Invalid configuration");
//!
//! let webauthn = WebauthnBuilder::new(
//!     config,
//!     Arc::new(EphemeralCredentialSourceRepository::new()),
//!     Arc::new(EphemeralUserEntityRepository::new()),
//!     Arc::new(EphemeralOptionsStorage::new()),
//! )
//! .build();
//!
//! let ccr = webauthn
//!     .start_registration("session-id", "claire", "Claire")
//!     .expect("Failed to start registration");
//! // Send ccr to the browser, then pass its response to finish_registration.
//! # let _ = ccr;
//! ```

#![warn(unused_extern_crates)]
#![warn(missing_docs)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

pub mod attestation;
mod constants;
pub mod core;
pub mod crypto;
pub mod ephemeral;
pub mod error;
pub mod interface;
pub mod internals;
pub mod proto;

#[cfg(test)]
mod test_utils;

pub use crate::attestation::{AttestationFormat, AttestationMetadata, ParsedAttestationData};
pub use crate::core::*;
pub use crate::crypto::compute_sha256;
pub use crate::error::{WebauthnError, WebauthnResult};
pub use crate::interface::*;

/// The types needed by most relying parties.
pub mod prelude {
    pub use crate::core::{
        AssertionResponseValidator, AttestationResponseValidator, CeremonyConfig,
        CeremonyConfigBuilder, Webauthn, WebauthnBuilder,
    };
    pub use crate::ephemeral::{
        EphemeralCredentialSourceRepository, EphemeralOptionsStorage,
        EphemeralUserEntityRepository,
    };
    pub use crate::error::{WebauthnError, WebauthnResult};
    pub use crate::interface::*;
    pub use crate::proto::{
        AttestationConveyancePreference, AuthenticatorAttachment, COSEAlgorithm,
        CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential,
        RequestChallengeResponse, UserVerificationPolicy,
    };
    pub use base64urlsafedata::Base64UrlSafeData;
    pub use url::Url;
    pub use uuid::Uuid;
    pub use webauthn_mds::{
        AttestationType, CertificateChainValidator, ErrorKind, EventDispatcher, MetadataService,
    };
}
