//! Webauthn MDS - FIDO Metadata Service verification and statement stores.
//!
//! The FIDO Alliance publishes a signed BLOB describing every certified authenticator model,
//! identified by AAGUID. Each description (a *metadata statement*) names the roots that the
//! model's attestation certificates chain to, and the BLOB carries status reports that
//! record certification and compromise of that model.
//!
//! This crate verifies the BLOB envelope and its certificate chain, decodes the statements,
//! and serves them through the [MetadataService] trait. Other sources, such as files,
//! folders or fixed URLs, can be combined with the BLOB using a [ChainedMetadataService].
//!
//! ```no_run
//! use std::sync::Arc;
//! use url::Url;
//! use webauthn_mds::{
//!     FidoAllianceCompliantMetadataService, MetadataService, OpenSSLChainValidator,
//!     FIDO_MDS_ROOT_CERTIFICATE_URL, FIDO_MDS_URL,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = FidoAllianceCompliantMetadataService::builder(Url::parse(FIDO_MDS_URL)?)
//!     .root_certificate_uri(Url::parse(FIDO_MDS_ROOT_CERTIFICATE_URL)?)
//!     .chain_validator(Arc::new(OpenSSLChainValidator::new()))
//!     .build()?;
//!
//! let statement = service.get("ee882879-721c-4913-9775-3dfcce97072a")?;
//! println!("{}", statement);
//! # Ok(())
//! # }
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

pub mod cache;
pub mod chain;
pub mod error;
pub mod events;
pub mod http;
pub mod jws;
pub mod model;
pub mod service;

#[cfg(test)]
mod test_utils;

pub use crate::cache::CacheStatus;
pub use crate::chain::{CertificateChainValidator, OpenSSLChainValidator};
pub use crate::error::{ErrorKind, MdsError, MdsResult};
pub use crate::events::{EventDispatcher, MetadataEvent, NullEventDispatcher};
pub use crate::http::{HttpClient, ReqwestHttpClient};
pub use crate::model::{AttestationType, AuthenticatorStatus, MetadataStatement, StatusReport};
pub use crate::service::*;
