//! In-memory implementations of the storage traits. Everything is lost when the process
//! exits, so these are only useful for demonstrations, tests and as a reference for your
//! own implementations.
//!
//! IMPORTANT: DO NOT USE THESE IN PRODUCTION.

use crate::error::*;
use crate::interface::*;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section below leaves the map consistent.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Credentials held in memory, keyed by credential id.
#[derive(Debug, Default)]
pub struct EphemeralCredentialSourceRepository {
    credentials: Mutex<BTreeMap<Vec<u8>, CredentialSource>>,
}

impl EphemeralCredentialSourceRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialSourceRepository for EphemeralCredentialSourceRepository {
    fn find_all_for_user_entity(&self, user: &UserEntity) -> WebauthnResult<Vec<CredentialSource>> {
        Ok(lock(&self.credentials)
            .values()
            .filter(|c| c.user_handle == user.id)
            .cloned()
            .collect())
    }

    fn find_one_by_credential_id(
        &self,
        credential_id: &[u8],
    ) -> WebauthnResult<Option<CredentialSource>> {
        Ok(lock(&self.credentials).get(credential_id).cloned())
    }

    fn save_credential_source(&self, source: CredentialSource) -> WebauthnResult<()> {
        lock(&self.credentials).insert(source.credential_id.0.clone(), source);
        Ok(())
    }

    fn update_counter(
        &self,
        credential_id: &[u8],
        expected: u32,
        new: u32,
    ) -> WebauthnResult<bool> {
        let mut credentials = lock(&self.credentials);
        let source = credentials
            .get_mut(credential_id)
            .ok_or(WebauthnError::CredentialNotFound)?;
        if source.counter != expected {
            return Ok(false);
        }
        source.counter = new;
        Ok(true)
    }
}

/// Accounts held in memory.
#[derive(Debug, Default)]
pub struct EphemeralUserEntityRepository {
    users: Mutex<Vec<UserEntity>>,
}

impl EphemeralUserEntityRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserEntityRepository for EphemeralUserEntityRepository {
    fn find_one_by_username(&self, name: &str) -> WebauthnResult<Option<UserEntity>> {
        Ok(lock(&self.users).iter().find(|u| u.name == name).cloned())
    }

    fn find_one_by_user_handle(&self, user_handle: &[u8]) -> WebauthnResult<Option<UserEntity>> {
        Ok(lock(&self.users)
            .iter()
            .find(|u| u.id.0 == user_handle)
            .cloned())
    }

    fn save_user_entity(&self, user: UserEntity) -> WebauthnResult<()> {
        let mut users = lock(&self.users);
        match users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => users.push(user),
        }
        Ok(())
    }
}

/// In-flight ceremony options held in memory.
#[derive(Debug, Default)]
pub struct EphemeralOptionsStorage {
    options: Mutex<BTreeMap<String, CeremonyOptions>>,
}

impl EphemeralOptionsStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptionsStorage for EphemeralOptionsStorage {
    fn store(&self, key: &str, options: CeremonyOptions) -> WebauthnResult<()> {
        lock(&self.options).insert(key.to_string(), options);
        Ok(())
    }

    fn get(&self, key: &str) -> WebauthnResult<CeremonyOptions> {
        lock(&self.options)
            .remove(key)
            .ok_or(WebauthnError::ChallengeNotFound)
    }

    fn remove(&self, key: &str) -> WebauthnResult<()> {
        lock(&self.options).remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::*;
    use crate::test_utils::*;
    use std::sync::Arc;
    use uuid::Uuid;
    use webauthn_mds::AttestationType;

    fn source(user: &UserEntity, id: u8) -> CredentialSource {
        CredentialSource {
            credential_id: vec![id; 16].into(),
            user_handle: user.id.clone(),
            public_key: cose_key_for(&ec_key().unwrap()).unwrap(),
            counter: 0,
            aaguid: Uuid::nil(),
            attestation_type: AttestationType::None,
            trust_path: vec![],
            transports: None,
            user_verified: true,
            backup_eligible: false,
            backup_state: false,
        }
    }

    #[test]
    fn credentials_by_user() {
        let repo = EphemeralCredentialSourceRepository::new();
        let alice = UserEntity::new("alice", "Alice").unwrap();
        let bob = UserEntity::new("bob", "Bob").unwrap();

        repo.save_credential_source(source(&alice, 1)).unwrap();
        repo.save_credential_source(source(&alice, 2)).unwrap();
        repo.save_credential_source(source(&bob, 3)).unwrap();

        assert_eq!(repo.find_all_for_user_entity(&alice).unwrap().len(), 2);
        assert_eq!(repo.find_all_for_user_entity(&bob).unwrap().len(), 1);
        assert!(repo.find_one_by_credential_id(&[3; 16]).unwrap().is_some());
        assert!(repo.find_one_by_credential_id(&[4; 16]).unwrap().is_none());
    }

    #[test]
    fn counter_compare_and_swap() {
        let repo = Arc::new(EphemeralCredentialSourceRepository::new());
        let alice = UserEntity::new("alice", "Alice").unwrap();
        repo.save_credential_source(source(&alice, 1)).unwrap();

        assert!(repo.update_counter(&[1; 16], 0, 5).unwrap());
        // A stale expectation loses.
        assert!(!repo.update_counter(&[1; 16], 0, 6).unwrap());
        assert_eq!(
            repo.find_one_by_credential_id(&[1; 16])
                .unwrap()
                .unwrap()
                .counter,
            5
        );
        assert!(matches!(
            repo.update_counter(&[9; 16], 0, 1),
            Err(WebauthnError::CredentialNotFound)
        ));

        // Racing writers with the same expectation, exactly one wins.
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = repo.clone();
                std::thread::spawn(move || repo.update_counter(&[1; 16], 5, 10 + i).unwrap())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn users() {
        let repo = EphemeralUserEntityRepository::new();
        let alice = repo.create_user_entity("alice", "Alice").unwrap();
        // Created but not persisted.
        assert!(repo.find_one_by_username("alice").unwrap().is_none());

        repo.save_user_entity(alice.clone()).unwrap();
        assert_eq!(repo.find_one_by_username("alice").unwrap(), Some(alice.clone()));
        assert_eq!(
            repo.find_one_by_user_handle(&alice.id.0).unwrap(),
            Some(alice.clone())
        );

        let renamed = UserEntity {
            display_name: "Alice A.".to_string(),
            ..alice.clone()
        };
        repo.save_user_entity(renamed).unwrap();
        assert_eq!(
            repo.find_one_by_user_handle(&alice.id.0)
                .unwrap()
                .unwrap()
                .display_name,
            "Alice A."
        );
    }

    #[test]
    fn options_are_consumed() {
        let storage = EphemeralOptionsStorage::new();
        let options = CeremonyOptions::Authentication {
            options: PublicKeyCredentialRequestOptions {
                challenge: vec![0; 32].into(),
                timeout: None,
                rp_id: "example.com".to_string(),
                allow_credentials: vec![],
                user_verification: UserVerificationPolicy::Preferred,
            },
            user_handle: None,
        };

        storage.store("session", options.clone()).unwrap();
        assert_eq!(storage.get("session").unwrap(), options);
        assert!(matches!(
            storage.get("session"),
            Err(WebauthnError::ChallengeNotFound)
        ));

        storage.store("session", options).unwrap();
        storage.remove("session").unwrap();
        assert!(storage.get("session").is_err());
    }
}
