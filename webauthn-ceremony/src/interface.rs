//! The types a relying party persists, and the storage seams the ceremonies depend on.

use crate::error::*;
use crate::proto::*;
use base64urlsafedata::Base64UrlSafeData;
use openssl::rand::rand_bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use webauthn_mds::{AttestationType, ErrorKind};

/// Length of generated user handles.
const USER_HANDLE_SIZE_BYTES: usize = 32;

/// A registered credential, as the relying party stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSource {
    /// The ID of this credential.
    pub credential_id: CredentialID,
    /// The user handle of the owner of this credential.
    pub user_handle: Base64UrlSafeData,
    /// The public key of this credential
    pub public_key: COSEKey,
    /// The last signature counter this credential presented.
    pub counter: u32,
    /// The authenticator model. Nil when the attestation was not requested or not provided.
    pub aaguid: Uuid,
    /// The attestation type that was verified at registration.
    pub attestation_type: AttestationType,
    /// The attestation trust path, leaf first, as PEM.
    pub trust_path: Vec<String>,
    /// Transports reported by the client at registration. This is a hint only.
    pub transports: Option<Vec<AuthenticatorTransport>>,
    /// If the user was verified during registration.
    pub user_verified: bool,
    /// If this credential may be backed up to other devices.
    pub backup_eligible: bool,
    /// If this credential was backed up when last used.
    pub backup_state: bool,
}

/// An account that credentials are registered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntity {
    /// The opaque and stable user handle.
    pub id: Base64UrlSafeData,
    /// The unique account name, such as an email address.
    pub name: String,
    /// The name to show for the account.
    pub display_name: String,
}

impl UserEntity {
    /// A new account with a random user handle.
    pub fn new(name: &str, display_name: &str) -> WebauthnResult<Self> {
        if name.is_empty() {
            return Err(WebauthnError::InvalidUsername);
        }
        let mut id = vec![0; USER_HANDLE_SIZE_BYTES];
        rand_bytes(&mut id)?;
        Ok(UserEntity {
            id: id.into(),
            name: name.to_string(),
            display_name: display_name.to_string(),
        })
    }
}

impl From<&UserEntity> for User {
    fn from(u: &UserEntity) -> Self {
        User {
            id: u.id.clone(),
            name: u.name.clone(),
            display_name: u.display_name.clone(),
        }
    }
}

/// Storage of registered credentials.
pub trait CredentialSourceRepository: fmt::Debug + Send + Sync {
    /// All credentials registered to `user`.
    fn find_all_for_user_entity(&self, user: &UserEntity) -> WebauthnResult<Vec<CredentialSource>>;

    /// The credential with the id `credential_id`, if registered.
    fn find_one_by_credential_id(
        &self,
        credential_id: &[u8],
    ) -> WebauthnResult<Option<CredentialSource>>;

    /// Insert or replace a credential.
    fn save_credential_source(&self, source: CredentialSource) -> WebauthnResult<()>;

    /// Atomically replace the counter of `credential_id` with `new`, only if it is still
    /// `expected`. Returns if the counter was replaced.
    fn update_counter(&self, credential_id: &[u8], expected: u32, new: u32)
        -> WebauthnResult<bool>;
}

/// Storage of accounts.
pub trait UserEntityRepository: fmt::Debug + Send + Sync {
    /// The account named `name`.
    fn find_one_by_username(&self, name: &str) -> WebauthnResult<Option<UserEntity>>;

    /// The account with the user handle `user_handle`.
    fn find_one_by_user_handle(&self, user_handle: &[u8]) -> WebauthnResult<Option<UserEntity>>;

    /// Create, but do not persist, a new account.
    fn create_user_entity(&self, name: &str, display_name: &str) -> WebauthnResult<UserEntity> {
        UserEntity::new(name, display_name)
    }

    /// Insert or replace an account.
    fn save_user_entity(&self, user: UserEntity) -> WebauthnResult<()>;
}

/// Options that were issued to a client, kept until its response arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CeremonyOptions {
    /// A registration was started.
    Registration(PublicKeyCredentialCreationOptions),
    /// An authentication was started.
    Authentication {
        /// The issued options.
        options: PublicKeyCredentialRequestOptions,
        /// The account being authenticated, when it was identified up front.
        user_handle: Option<Base64UrlSafeData>,
    },
}

impl CeremonyOptions {
    /// Which ceremony these options belong to.
    pub fn kind(&self) -> CeremonyKind {
        match self {
            CeremonyOptions::Registration(_) => CeremonyKind::Registration,
            CeremonyOptions::Authentication { .. } => CeremonyKind::Authentication,
        }
    }
}

/// Storage for in-flight ceremony options, keyed by an identifier the application chooses
/// (such as a session id).
pub trait OptionsStorage: fmt::Debug + Send + Sync {
    /// Store `options` under `key`, replacing anything there.
    fn store(&self, key: &str, options: CeremonyOptions) -> WebauthnResult<()>;

    /// Take the options stored under `key`. They are removed, so each issued challenge can
    /// be answered at most once. Returns [WebauthnError::ChallengeNotFound] when absent.
    fn get(&self, key: &str) -> WebauthnResult<CeremonyOptions>;

    /// Discard the options stored under `key`, if any.
    fn remove(&self, key: &str) -> WebauthnResult<()>;
}

/// Policy applied to the signature counter an authenticator presents.
pub trait CounterChecker: fmt::Debug + Send + Sync {
    /// Decide if `received` is acceptable for `credential`.
    fn check(&self, credential: &CredentialSource, received: u32) -> WebauthnResult<()>;
}

/// Rejects any counter that did not advance. Authenticators without a counter always
/// present 0, which is accepted while the stored counter is also 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictCounterChecker;

impl CounterChecker for StrictCounterChecker {
    fn check(&self, credential: &CredentialSource, received: u32) -> WebauthnResult<()> {
        let stored = credential.counter;
        if (received > 0 || stored > 0) && received <= stored {
            warn!(
                credential_id = %credential.credential_id,
                stored,
                received,
                "counter regression, the authenticator may be cloned"
            );
            return Err(WebauthnError::CounterRegression { stored, received });
        }
        Ok(())
    }
}

/// Logs counter regressions, but accepts them.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveCounterChecker;

impl CounterChecker for PermissiveCounterChecker {
    fn check(&self, credential: &CredentialSource, received: u32) -> WebauthnResult<()> {
        if (received > 0 || credential.counter > 0) && received <= credential.counter {
            warn!(
                credential_id = %credential.credential_id,
                stored = credential.counter,
                received,
                "counter regression accepted"
            );
        }
        Ok(())
    }
}

/// The two ceremonies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CeremonyKind {
    /// Creating a new credential.
    Registration,
    /// Proving possession of a credential.
    Authentication,
}

/// The progress of a ceremony. `Verified` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CeremonyState {
    /// Options were sent to the client.
    OptionsIssued,
    /// The client responded to the options.
    ResponseReceived,
    /// The response was valid.
    Verified,
    /// The response was rejected.
    Rejected,
}

impl CeremonyState {
    /// If no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, CeremonyState::Verified | CeremonyState::Rejected)
    }

    /// Move to `next`, if that is a valid step from this state.
    pub fn transition(self, next: CeremonyState) -> WebauthnResult<CeremonyState> {
        match (self, next) {
            (CeremonyState::OptionsIssued, CeremonyState::ResponseReceived)
            | (CeremonyState::OptionsIssued, CeremonyState::Rejected)
            | (CeremonyState::ResponseReceived, CeremonyState::Verified)
            | (CeremonyState::ResponseReceived, CeremonyState::Rejected) => Ok(next),
            (current, _) if current.is_terminal() => Err(WebauthnError::CeremonyAlreadyCompleted),
            (current, next) => {
                debug!(?current, ?next, "invalid ceremony transition");
                Err(WebauthnError::Configuration("invalid ceremony transition"))
            }
        }
    }
}

/// Events emitted while ceremonies progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeremonyEvent {
    /// A ceremony changed state.
    StateChanged {
        /// The ceremony.
        kind: CeremonyKind,
        /// The options key of the ceremony.
        key: String,
        /// The state that was entered.
        state: CeremonyState,
    },
    /// A credential was registered.
    CredentialRegistered {
        /// The new credential.
        credential_id: CredentialID,
        /// The authenticator model.
        aaguid: Uuid,
        /// The verified attestation type.
        attestation_type: AttestationType,
    },
    /// A credential was used.
    CredentialAsserted {
        /// The credential.
        credential_id: CredentialID,
        /// The counter that was presented.
        counter: u32,
    },
    /// A response was rejected.
    ResponseRejected {
        /// The ceremony.
        kind: CeremonyKind,
        /// Why it was rejected.
        reason: ErrorKind,
    },
}
