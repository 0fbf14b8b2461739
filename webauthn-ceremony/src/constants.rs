// Can this ever change?
pub const CHALLENGE_SIZE_BYTES: usize = 32;
/// Milliseconds a client is given to complete a ceremony.
pub const AUTHENTICATOR_TIMEOUT: u32 = 60000;
/// Leeway applied to timestamps reported by attestation services.
pub const TIMESTAMP_LEEWAY_SECONDS: u64 = 60;
/// Hostname that android safetynet attestations are issued to.
pub const SAFETYNET_HOSTNAME: &str = "attest.android.com";
