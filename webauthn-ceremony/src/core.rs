//! The relying party side of the registration and authentication ceremonies.
//!
//! [Webauthn] provides the four operations most applications need:
//!
//! * [Webauthn::start_registration]
//! * [Webauthn::finish_registration]
//! * [Webauthn::start_authentication]
//! * [Webauthn::finish_authentication]
//!
//! The start operations return options that are sent to the client, and store them until
//! the client's response arrives. The finish operations consume the stored options, so
//! every challenge can be answered exactly once.
//!
//! The checks themselves are performed by the [AttestationResponseValidator] and the
//! [AssertionResponseValidator], which can also be used directly when an application
//! manages challenges itself.

use crate::attestation::{AttestationFormat, ParsedAttestationData};
use crate::constants::{AUTHENTICATOR_TIMEOUT, CHALLENGE_SIZE_BYTES};
use crate::crypto::compute_sha256;
use crate::error::*;
use crate::interface::*;
use crate::internals::{AttestationObject, AuthenticatorData};
use crate::proto::*;
use base64urlsafedata::Base64UrlSafeData;
use openssl::rand::rand_bytes;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;
use webauthn_mds::{
    CertificateChainValidator, EventDispatcher, MetadataService, NullEventDispatcher,
    OpenSSLChainValidator,
};

const CLIENT_DATA_TYPE_CREATE: &str = "webauthn.create";
const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";

/// The relying party settings shared by both ceremonies. Create one with a
/// [CeremonyConfigBuilder].
#[derive(Debug, Clone)]
pub struct CeremonyConfig {
    rp: RelyingParty,
    secured_rp_ids: Vec<String>,
    allowed_origins: Vec<Url>,
    algorithms: Vec<COSEAlgorithm>,
    timeout: u32,
    attestation: AttestationConveyancePreference,
    attachment: Option<AuthenticatorAttachment>,
    user_verification: UserVerificationPolicy,
    danger_disable_time_checks: bool,
}

impl CeremonyConfig {
    /// The relying party id that credentials are scoped to.
    pub fn rp_id(&self) -> &str {
        &self.rp.id
    }

    /// Check that `origin` may act for `rp_id`.
    ///
    /// An origin listed with [CeremonyConfigBuilder::allowed_origin] is always accepted.
    /// Otherwise its host must be `rp_id` or a subdomain of it, and it must use https unless
    /// `rp_id` was declared with [CeremonyConfigBuilder::secured_rp_id].
    pub fn check_origin(&self, rp_id: &str, origin: &Url) -> WebauthnResult<()> {
        if self
            .allowed_origins
            .iter()
            .any(|allowed| allowed.origin() == origin.origin())
        {
            return Ok(());
        }

        let host = origin.host_str().ok_or(WebauthnError::InvalidRPOrigin)?;
        // The leading '.' ensures that myexample.com != example.com
        let host_valid = host == rp_id || host.ends_with(&format!(".{rp_id}"));
        if !host_valid {
            debug!(%origin, %rp_id, "origin is not within the rp id");
            return Err(WebauthnError::InvalidRPOrigin);
        }

        let secured = self.secured_rp_ids.iter().any(|id| id == rp_id);
        if origin.scheme() != "https" && !secured {
            debug!(%origin, "origin is not https");
            return Err(WebauthnError::InvalidRPOrigin);
        }

        Ok(())
    }
}

/// A builder for [CeremonyConfig].
///
/// ```
/// use webauthn_ceremony::CeremonyConfigBuilder;
///
/// let config = CeremonyConfigBuilder::new("example.com")
///     .expect("Invalid rp id")
///     .rp_name("Example")
///     .build()
///     .expect("Invalid configuration");
/// assert_eq!(config.rp_id(), "example.com");
/// ```
#[derive(Debug, Clone)]
pub struct CeremonyConfigBuilder<'a> {
    rp_id: &'a str,
    rp_name: Option<&'a str>,
    secured_rp_ids: Vec<String>,
    allowed_origins: Vec<Url>,
    algorithms: Vec<COSEAlgorithm>,
    timeout: u32,
    attestation: AttestationConveyancePreference,
    attachment: Option<AuthenticatorAttachment>,
    user_verification: UserVerificationPolicy,
    danger_disable_time_checks: bool,
}

impl<'a> CeremonyConfigBuilder<'a> {
    /// Initiate a new builder for the relying party id `rp_id`.
    ///
    /// # Safety
    ///
    /// rp_id is what Credentials (Authenticators) bind themself to - rp_id can NOT be changed
    /// without potentially breaking all of your associated credentials in the future!
    ///
    /// # Errors
    ///
    /// rp_id must be a bare domain, without a scheme, port or path.
    pub fn new(rp_id: &'a str) -> WebauthnResult<Self> {
        let valid = !rp_id.is_empty()
            && Url::parse(&format!("https://{rp_id}"))
                .ok()
                .and_then(|u| u.host_str().map(|h| h == rp_id && u.path() == "/"))
                .unwrap_or(false);

        if !valid {
            error!(%rp_id, "rp_id is not a domain");
            return Err(WebauthnError::Configuration("rp_id must be a bare domain"));
        }

        Ok(CeremonyConfigBuilder {
            rp_id,
            rp_name: None,
            secured_rp_ids: Vec::new(),
            allowed_origins: Vec::new(),
            algorithms: COSEAlgorithm::secure_algs(),
            timeout: AUTHENTICATOR_TIMEOUT,
            attestation: AttestationConveyancePreference::None,
            attachment: None,
            user_verification: UserVerificationPolicy::Preferred,
            danger_disable_time_checks: false,
        })
    }

    /// Set the relying party name. This may be shown to the user. If not set, defaults to
    /// rp_id.
    pub fn rp_name(mut self, rp_name: &'a str) -> Self {
        self.rp_name = Some(rp_name);
        self
    }

    /// Accept plain http origins for `rp_id`, such as `localhost` during development.
    pub fn secured_rp_id(mut self, rp_id: &str) -> Self {
        self.secured_rp_ids.push(rp_id.to_string());
        self
    }

    /// Accept responses collected by `origin`, even when it is outside of the rp id. This
    /// is needed for native applications, whose origins are not web origins.
    pub fn allowed_origin(mut self, origin: Url) -> Self {
        self.allowed_origins.push(origin);
        self
    }

    /// The credential algorithms to request, in order of preference.
    pub fn algorithms(mut self, algorithms: Vec<COSEAlgorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Milliseconds a client is given to complete a ceremony.
    pub fn timeout(mut self, timeout: u32) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request attestation from authenticators. Unless this is set to `Direct` or
    /// `Indirect`, registrations are anonymised once metadata has been checked.
    pub fn attestation_preference(mut self, attestation: AttestationConveyancePreference) -> Self {
        self.attestation = attestation;
        self
    }

    /// Hint which kind of authenticator should be used. This is not enforced.
    pub fn authenticator_attachment(mut self, attachment: AuthenticatorAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// The user verification policy of both ceremonies.
    pub fn user_verification(mut self, policy: UserVerificationPolicy) -> Self {
        self.user_verification = policy;
        self
    }

    /// ⚠️  Disable checks of certificate validity windows and attestation timestamps. Only
    /// for test fixtures.
    pub fn danger_disable_time_checks(mut self, disable: bool) -> Self {
        self.danger_disable_time_checks = disable;
        self
    }

    /// Complete the construction of the [CeremonyConfig].
    pub fn build(self) -> WebauthnResult<CeremonyConfig> {
        if self.algorithms.is_empty() {
            return Err(WebauthnError::Configuration(
                "at least one algorithm is required",
            ));
        }
        if self.algorithms.contains(&COSEAlgorithm::INSECURE_RS1) {
            return Err(WebauthnError::CredentialInsecureCryptography);
        }

        Ok(CeremonyConfig {
            rp: RelyingParty {
                name: self.rp_name.unwrap_or(self.rp_id).to_string(),
                id: self.rp_id.to_string(),
            },
            secured_rp_ids: self.secured_rp_ids,
            allowed_origins: self.allowed_origins,
            algorithms: self.algorithms,
            timeout: self.timeout,
            attestation: self.attestation,
            attachment: self.attachment,
            user_verification: self.user_verification,
            danger_disable_time_checks: self.danger_disable_time_checks,
        })
    }
}

fn check_client_data(
    config: &CeremonyConfig,
    client_data: &CollectedClientData,
    expected_type: &str,
    challenge: &Base64UrlSafeData,
    rp_id: &str,
) -> WebauthnResult<()> {
    if client_data.type_ != expected_type {
        return Err(WebauthnError::InvalidClientDataType);
    }

    // Compared as bytes, so differences of base64 text such as padding do not matter.
    if client_data.challenge != *challenge {
        return Err(WebauthnError::MismatchedChallenge);
    }

    config.check_origin(rp_id, &client_data.origin)
}

fn check_authenticator_data(
    auth_data: &AuthenticatorData,
    rp_id: &str,
    policy: UserVerificationPolicy,
) -> WebauthnResult<()> {
    // Remember that the RP ID is NOT THE SAME as the RP name.
    if auth_data.rp_id_hash != compute_sha256(rp_id.as_bytes()) {
        return Err(WebauthnError::InvalidRPIDHash);
    }

    if !auth_data.user_present {
        return Err(WebauthnError::UserNotPresent);
    }

    if policy == UserVerificationPolicy::Required && !auth_data.user_verified {
        return Err(WebauthnError::UserNotVerified);
    }

    if let Some(ext) = &auth_data.extensions {
        trace!(?ext, "authenticator extensions");
    }

    Ok(())
}

/// Validates responses to registration options.
#[derive(Debug, Clone)]
pub struct AttestationResponseValidator {
    config: Arc<CeremonyConfig>,
    credentials: Arc<dyn CredentialSourceRepository>,
    metadata: Option<Arc<dyn MetadataService>>,
    chain_validator: Arc<dyn CertificateChainValidator>,
    events: Arc<dyn EventDispatcher<CeremonyEvent>>,
}

impl AttestationResponseValidator {
    /// Create a validator that does not consult authenticator metadata.
    pub fn new(
        config: Arc<CeremonyConfig>,
        credentials: Arc<dyn CredentialSourceRepository>,
    ) -> Self {
        let chain_validator = if config.danger_disable_time_checks {
            OpenSSLChainValidator::new().danger_disable_time_checks()
        } else {
            OpenSSLChainValidator::new()
        };
        AttestationResponseValidator {
            config,
            credentials,
            metadata: None,
            chain_validator: Arc::new(chain_validator),
            events: Arc::new(NullEventDispatcher),
        }
    }

    /// Check attestations against the statements of `metadata`.
    pub fn with_metadata_service(mut self, metadata: Arc<dyn MetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Replace how attestation trust paths are checked against metadata trust anchors.
    pub fn with_chain_validator(mut self, validator: Arc<dyn CertificateChainValidator>) -> Self {
        self.chain_validator = validator;
        self
    }

    /// Deliver events to `events`.
    pub fn with_event_dispatcher(mut self, events: Arc<dyn EventDispatcher<CeremonyEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Validate `response` against the `options` that were issued, yielding the credential
    /// to register. The credential is not saved.
    ///
    /// <https://w3c.github.io/webauthn/#sctn-registering-a-new-credential>
    pub fn check(
        &self,
        response: &RegisterPublicKeyCredential,
        options: &PublicKeyCredentialCreationOptions,
    ) -> WebauthnResult<CredentialSource> {
        let client_data_bytes = response.response.client_data_json.0.as_slice();
        let client_data = CollectedClientData::try_from(client_data_bytes)?;
        check_client_data(
            &self.config,
            &client_data,
            CLIENT_DATA_TYPE_CREATE,
            &options.challenge,
            &options.rp.id,
        )?;

        let client_data_hash = compute_sha256(client_data_bytes);

        let att_obj =
            AttestationObject::try_from(response.response.attestation_object.0.as_slice())?;
        let auth_data = &att_obj.auth_data;
        check_authenticator_data(auth_data, &options.rp.id, options.user_verification())?;

        let acd = auth_data
            .acd
            .as_ref()
            .ok_or(WebauthnError::MissingAttestationCredentialData)?;

        // Verify that the "alg" parameter in the credential public key in authData matches the
        // alg attribute of one of the items in options.pubKeyCredParams.
        let public_key = COSEKey::try_from(&acd.credential_pk)?;
        let alg = i64::from(public_key.type_);
        if !options.pub_key_cred_params.iter().any(|p| p.alg == alg) {
            debug!(alg = ?public_key.type_, "credential algorithm was not requested");
            return Err(WebauthnError::CredentialAlteredAlgFromRequest);
        }

        let excluded = options
            .exclude_credentials
            .iter()
            .flatten()
            .any(|d| d.id == acd.credential_id);
        if excluded
            || self
                .credentials
                .find_one_by_credential_id(&acd.credential_id.0)?
                .is_some()
        {
            return Err(WebauthnError::CredentialAlreadyExists);
        }

        let format = AttestationFormat::try_from(att_obj.fmt.as_str())?;
        let (attested, metadata) = format.verify(
            acd,
            &att_obj,
            &client_data_hash,
            self.config.danger_disable_time_checks,
        )?;
        debug!(%format, ?metadata, "attestation statement verified");

        // Metadata applies to the authenticator that answered, even when the result is
        // anonymised below.
        let aaguid = Uuid::from_bytes(acd.aaguid);
        self.check_metadata(&aaguid, &attested)?;

        let (aaguid, attested) = if options.attestation_declined() {
            // Nothing about the authenticator model is retained.
            (Uuid::nil(), ParsedAttestationData::None)
        } else {
            (aaguid, attested)
        };

        let source = CredentialSource {
            credential_id: acd.credential_id.clone(),
            user_handle: options.user.id.clone(),
            public_key,
            counter: auth_data.counter,
            aaguid,
            attestation_type: attested.attestation_type(),
            trust_path: attested.trust_path_pem()?,
            transports: response.response.transports.clone(),
            user_verified: auth_data.user_verified,
            backup_eligible: auth_data.backup_eligible,
            backup_state: auth_data.backup_state,
        };

        self.events.dispatch(&CeremonyEvent::CredentialRegistered {
            credential_id: source.credential_id.clone(),
            aaguid: source.aaguid,
            attestation_type: source.attestation_type,
        });

        Ok(source)
    }

    fn check_metadata(&self, aaguid: &Uuid, attested: &ParsedAttestationData) -> WebauthnResult<()> {
        let Some(metadata) = &self.metadata else {
            return Ok(());
        };

        if aaguid.is_nil() {
            return Ok(());
        }

        let aaguid = aaguid.to_string();
        // Feed entries may carry status reports without a statement.
        if let Some(report) = metadata.get_status_reports(&aaguid)?.last() {
            if report.is_compromised() {
                warn!(%aaguid, status = ?report.status, "authenticator model is compromised");
                return Err(WebauthnError::AuthenticatorCompromised);
            }
        }

        if matches!(attested, ParsedAttestationData::None) {
            return Ok(());
        }

        if !metadata.has(&aaguid)? {
            debug!(%aaguid, "no metadata statement for authenticator");
            return Ok(());
        }

        let statement = metadata.get(&aaguid)?;

        let trust_path = attested.trust_path_pem()?;
        if !trust_path.is_empty() {
            let roots = statement.attestation_root_certificates_pem();
            if roots.is_empty() {
                debug!(%aaguid, "metadata statement has no trust anchors");
                return Err(WebauthnError::AttestationTrustFailure);
            }
            self.chain_validator
                .check(&trust_path, &roots)
                .map_err(|e| {
                    warn!(?e, %aaguid, "attestation does not chain to the metadata roots");
                    WebauthnError::Metadata(e)
                })?;
        }

        let attestation_type = attested.attestation_type();
        if !statement.attestation_types.contains(&attestation_type) {
            debug!(%aaguid, %attestation_type, "attestation type not declared by metadata");
            return Err(WebauthnError::InvalidAttestationType(attestation_type));
        }

        Ok(())
    }
}

/// Validates responses to authentication options.
#[derive(Debug, Clone)]
pub struct AssertionResponseValidator {
    config: Arc<CeremonyConfig>,
    credentials: Arc<dyn CredentialSourceRepository>,
    counter_checker: Arc<dyn CounterChecker>,
    events: Arc<dyn EventDispatcher<CeremonyEvent>>,
}

impl AssertionResponseValidator {
    /// Create a validator that applies the [StrictCounterChecker].
    pub fn new(
        config: Arc<CeremonyConfig>,
        credentials: Arc<dyn CredentialSourceRepository>,
    ) -> Self {
        AssertionResponseValidator {
            config,
            credentials,
            counter_checker: Arc::new(StrictCounterChecker),
            events: Arc::new(NullEventDispatcher),
        }
    }

    /// Replace the signature counter policy.
    pub fn with_counter_checker(mut self, counter_checker: Arc<dyn CounterChecker>) -> Self {
        self.counter_checker = counter_checker;
        self
    }

    /// Deliver events to `events`.
    pub fn with_event_dispatcher(mut self, events: Arc<dyn EventDispatcher<CeremonyEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Validate `response` against the `options` that were issued. `user_handle` is the
    /// account that was identified before the ceremony, if any. When none was, the response
    /// must carry the user handle of the credential owner.
    ///
    /// On success the stored counter has been advanced, and the updated credential is
    /// returned.
    ///
    /// <https://w3c.github.io/webauthn/#sctn-verifying-assertion>
    pub fn check(
        &self,
        response: &PublicKeyCredential,
        options: &PublicKeyCredentialRequestOptions,
        user_handle: Option<&[u8]>,
    ) -> WebauthnResult<CredentialSource> {
        let credential_id = response.raw_id.0.as_slice();

        // If the allowCredentials option was given when this authentication ceremony was
        // initiated, verify that credential.id identifies one of them.
        if !options.allow_credentials.is_empty()
            && !options
                .allow_credentials
                .iter()
                .any(|c| c.id.0 == credential_id)
        {
            return Err(WebauthnError::CredentialNotAllowed);
        }

        let mut source = self
            .credentials
            .find_one_by_credential_id(credential_id)?
            .ok_or(WebauthnError::CredentialNotFound)?;

        // Verify that the user is the owner of the credential.
        let owner = source.user_handle.0.as_slice();
        let presented = response.get_user_handle();
        match (user_handle, presented) {
            (Some(expected), _) if expected != owner => {
                return Err(WebauthnError::UserHandleMismatch)
            }
            (_, Some(presented)) if presented != owner => {
                return Err(WebauthnError::UserHandleMismatch)
            }
            (None, None) => return Err(WebauthnError::UserHandleMismatch),
            _ => {}
        }

        let client_data_bytes = response.response.client_data_json.0.as_slice();
        let client_data = CollectedClientData::try_from(client_data_bytes)?;
        check_client_data(
            &self.config,
            &client_data,
            CLIENT_DATA_TYPE_GET,
            &options.challenge,
            &options.rp_id,
        )?;

        let auth_data_bytes = response.response.authenticator_data.0.as_slice();
        let auth_data = AuthenticatorData::try_from(auth_data_bytes)?;
        check_authenticator_data(&auth_data, &options.rp_id, options.user_verification)?;

        // Verify that sig is a valid signature over the binary concatenation of authData and
        // the hash of cData.
        let client_data_hash = compute_sha256(client_data_bytes);
        let verification_data: Vec<u8> = auth_data_bytes
            .iter()
            .chain(client_data_hash.iter())
            .copied()
            .collect();

        let verified = source
            .public_key
            .verify_signature(&response.response.signature.0, &verification_data)?;
        if !verified {
            return Err(WebauthnError::AuthenticationFailure);
        }

        self.counter_checker.check(&source, auth_data.counter)?;

        if auth_data.counter > source.counter {
            let updated =
                self.credentials
                    .update_counter(credential_id, source.counter, auth_data.counter)?;
            if !updated {
                // Another assertion with this credential won the race.
                return Err(WebauthnError::CounterUpdateConflict);
            }
            source.counter = auth_data.counter;
        }
        source.backup_state = auth_data.backup_state;

        self.events.dispatch(&CeremonyEvent::CredentialAsserted {
            credential_id: source.credential_id.clone(),
            counter: auth_data.counter,
        });

        Ok(source)
    }
}

/// A builder for [Webauthn].
#[derive(Debug)]
pub struct WebauthnBuilder {
    config: Arc<CeremonyConfig>,
    credentials: Arc<dyn CredentialSourceRepository>,
    users: Arc<dyn UserEntityRepository>,
    options: Arc<dyn OptionsStorage>,
    metadata: Option<Arc<dyn MetadataService>>,
    chain_validator: Option<Arc<dyn CertificateChainValidator>>,
    counter_checker: Arc<dyn CounterChecker>,
    events: Arc<dyn EventDispatcher<CeremonyEvent>>,
}

impl WebauthnBuilder {
    /// Initiate a new builder over the application's storage.
    pub fn new(
        config: CeremonyConfig,
        credentials: Arc<dyn CredentialSourceRepository>,
        users: Arc<dyn UserEntityRepository>,
        options: Arc<dyn OptionsStorage>,
    ) -> Self {
        WebauthnBuilder {
            config: Arc::new(config),
            credentials,
            users,
            options,
            metadata: None,
            chain_validator: None,
            counter_checker: Arc::new(StrictCounterChecker),
            events: Arc::new(NullEventDispatcher),
        }
    }

    /// Check attestations against the statements of `metadata`.
    pub fn metadata_service(mut self, metadata: Arc<dyn MetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Replace how attestation trust paths are checked. Defaults to an
    /// [OpenSSLChainValidator].
    pub fn chain_validator(mut self, validator: Arc<dyn CertificateChainValidator>) -> Self {
        self.chain_validator = Some(validator);
        self
    }

    /// Replace the signature counter policy. Defaults to the [StrictCounterChecker].
    pub fn counter_checker(mut self, counter_checker: Arc<dyn CounterChecker>) -> Self {
        self.counter_checker = counter_checker;
        self
    }

    /// Deliver ceremony events to `events`.
    pub fn event_dispatcher(mut self, events: Arc<dyn EventDispatcher<CeremonyEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Complete the construction of the [Webauthn] instance.
    ///
    /// When a metadata service is set, a `None` attestation preference is raised to `Indirect`.
    pub fn build(self) -> Webauthn {
        let mut config = self.config;
        if self.metadata.is_some() && config.attestation == AttestationConveyancePreference::None
        {
            debug!("metadata service configured, requesting indirect attestation");
            Arc::make_mut(&mut config).attestation = AttestationConveyancePreference::Indirect;
        }

        let mut attestation =
            AttestationResponseValidator::new(config.clone(), self.credentials.clone())
                .with_event_dispatcher(self.events.clone());
        if let Some(metadata) = self.metadata {
            attestation = attestation.with_metadata_service(metadata);
        }
        if let Some(validator) = self.chain_validator {
            attestation = attestation.with_chain_validator(validator);
        }

        let assertion = AssertionResponseValidator::new(config.clone(), self.credentials.clone())
            .with_counter_checker(self.counter_checker)
            .with_event_dispatcher(self.events.clone());

        Webauthn {
            config,
            credentials: self.credentials,
            users: self.users,
            options: self.options,
            events: self.events,
            attestation,
            assertion,
        }
    }
}

/// An instance of a Webauthn relying party. This is the main point of interaction for
/// registering and authenticating credentials for users.
#[derive(Debug, Clone)]
pub struct Webauthn {
    config: Arc<CeremonyConfig>,
    credentials: Arc<dyn CredentialSourceRepository>,
    users: Arc<dyn UserEntityRepository>,
    options: Arc<dyn OptionsStorage>,
    events: Arc<dyn EventDispatcher<CeremonyEvent>>,
    attestation: AttestationResponseValidator,
    assertion: AssertionResponseValidator,
}

fn generate_challenge() -> WebauthnResult<Base64UrlSafeData> {
    let mut challenge = vec![0; CHALLENGE_SIZE_BYTES];
    rand_bytes(&mut challenge)?;
    Ok(challenge.into())
}

fn descriptor(source: CredentialSource) -> PublicKeyCredentialDescriptor {
    PublicKeyCredentialDescriptor {
        transports: source.transports,
        ..PublicKeyCredentialDescriptor::public_key(source.credential_id)
    }
}

impl Webauthn {
    /// The relying party configuration.
    pub fn config(&self) -> &CeremonyConfig {
        &self.config
    }

    fn state_changed(&self, kind: CeremonyKind, key: &str, state: CeremonyState) {
        trace!(?kind, %key, ?state, "ceremony state changed");
        self.events.dispatch(&CeremonyEvent::StateChanged {
            kind,
            key: key.to_string(),
            state,
        });
    }

    fn conclude<T>(
        &self,
        kind: CeremonyKind,
        key: &str,
        state: CeremonyState,
        result: WebauthnResult<T>,
    ) -> WebauthnResult<T> {
        match result {
            Ok(value) => {
                let state = state.transition(CeremonyState::Verified)?;
                self.state_changed(kind, key, state);
                Ok(value)
            }
            Err(e) => {
                debug!(?kind, %key, ?e, "ceremony rejected");
                let state = state.transition(CeremonyState::Rejected)?;
                self.events.dispatch(&CeremonyEvent::ResponseRejected {
                    kind,
                    reason: e.kind(),
                });
                self.state_changed(kind, key, state);
                Err(e)
            }
        }
    }

    /// Begin registering a new credential for the account `username`, creating the
    /// account if it does not exist. The options are stored under `key` and must be sent
    /// to the client's `navigator.credentials.create()`.
    ///
    /// Credentials the account already has are excluded, so an authenticator can not be
    /// registered twice.
    pub fn start_registration(
        &self,
        key: &str,
        username: &str,
        display_name: &str,
    ) -> WebauthnResult<CreationChallengeResponse> {
        let user = match self.users.find_one_by_username(username)? {
            Some(user) => user,
            None => {
                let user = self.users.create_user_entity(username, display_name)?;
                self.users.save_user_entity(user.clone())?;
                user
            }
        };

        let exclude_credentials: Vec<_> = self
            .credentials
            .find_all_for_user_entity(&user)?
            .into_iter()
            .map(descriptor)
            .collect();

        let options = PublicKeyCredentialCreationOptions {
            rp: self.config.rp.clone(),
            user: User::from(&user),
            challenge: generate_challenge()?,
            pub_key_cred_params: self
                .config
                .algorithms
                .iter()
                .copied()
                .map(PubKeyCredParams::from)
                .collect(),
            timeout: Some(self.config.timeout),
            exclude_credentials: (!exclude_credentials.is_empty()).then_some(exclude_credentials),
            authenticator_selection: Some(AuthenticatorSelectionCriteria {
                authenticator_attachment: self.config.attachment,
                require_resident_key: false,
                user_verification: self.config.user_verification,
            }),
            attestation: Some(self.config.attestation),
        };

        self.options
            .store(key, CeremonyOptions::Registration(options.clone()))?;
        self.state_changed(CeremonyKind::Registration, key, CeremonyState::OptionsIssued);

        Ok(CreationChallengeResponse {
            public_key: options,
        })
    }

    /// Complete the registration started under `key` with the client's `response`. The
    /// verified credential is saved and returned.
    pub fn finish_registration(
        &self,
        key: &str,
        response: &RegisterPublicKeyCredential,
    ) -> WebauthnResult<CredentialSource> {
        let options = match self.options.get(key)? {
            CeremonyOptions::Registration(options) => options,
            other => {
                debug!(kind = ?other.kind(), "options are for a different ceremony");
                return Err(WebauthnError::ChallengeNotFound);
            }
        };
        let state = CeremonyState::OptionsIssued.transition(CeremonyState::ResponseReceived)?;
        self.state_changed(CeremonyKind::Registration, key, state);

        let result = self
            .attestation
            .check(response, &options)
            .and_then(|source| {
                self.credentials.save_credential_source(source.clone())?;
                Ok(source)
            });

        self.conclude(CeremonyKind::Registration, key, state, result)
    }

    /// Begin authenticating. When `username` is given, only that account's credentials are
    /// allowed. Otherwise any discoverable credential may answer, and the account is found
    /// from the user handle in the response.
    pub fn start_authentication(
        &self,
        key: &str,
        username: Option<&str>,
    ) -> WebauthnResult<RequestChallengeResponse> {
        let (allow_credentials, user_handle) = match username {
            Some(name) => {
                let user = self
                    .users
                    .find_one_by_username(name)?
                    .ok_or(WebauthnError::UserNotFound)?;
                let allow: Vec<_> = self
                    .credentials
                    .find_all_for_user_entity(&user)?
                    .into_iter()
                    .map(descriptor)
                    .collect();
                if allow.is_empty() {
                    debug!(%name, "account has no credentials");
                    return Err(WebauthnError::CredentialNotFound);
                }
                (allow, Some(user.id))
            }
            None => (Vec::new(), None),
        };

        let options = PublicKeyCredentialRequestOptions {
            challenge: generate_challenge()?,
            timeout: Some(self.config.timeout),
            rp_id: self.config.rp.id.clone(),
            allow_credentials,
            user_verification: self.config.user_verification,
        };

        self.options.store(
            key,
            CeremonyOptions::Authentication {
                options: options.clone(),
                user_handle,
            },
        )?;
        self.state_changed(
            CeremonyKind::Authentication,
            key,
            CeremonyState::OptionsIssued,
        );

        Ok(RequestChallengeResponse {
            public_key: options,
        })
    }

    /// Complete the authentication started under `key` with the client's `response`.
    /// Returns the credential that was used, with its advanced counter.
    pub fn finish_authentication(
        &self,
        key: &str,
        response: &PublicKeyCredential,
    ) -> WebauthnResult<CredentialSource> {
        let (options, user_handle) = match self.options.get(key)? {
            CeremonyOptions::Authentication {
                options,
                user_handle,
            } => (options, user_handle),
            other => {
                debug!(kind = ?other.kind(), "options are for a different ceremony");
                return Err(WebauthnError::ChallengeNotFound);
            }
        };
        let state = CeremonyState::OptionsIssued.transition(CeremonyState::ResponseReceived)?;
        self.state_changed(CeremonyKind::Authentication, key, state);

        let result = self.authenticate(response, &options, user_handle.as_ref());
        self.conclude(CeremonyKind::Authentication, key, state, result)
    }

    fn authenticate(
        &self,
        response: &PublicKeyCredential,
        options: &PublicKeyCredentialRequestOptions,
        user_handle: Option<&Base64UrlSafeData>,
    ) -> WebauthnResult<CredentialSource> {
        if user_handle.is_none() {
            let presented = response
                .get_user_handle()
                .ok_or(WebauthnError::UserHandleMismatch)?;
            self.users
                .find_one_by_user_handle(presented)?
                .ok_or(WebauthnError::UserNotFound)?;
        }

        self.assertion
            .check(response, options, user_handle.map(|h| h.0.as_slice()))
    }
}
