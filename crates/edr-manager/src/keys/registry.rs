//! Participant key registry
//!
//! Manages cryptographic keys for:
//! - This participant's signing key for minted access tokens
//! - Public keys of participants allowed to send refresh assertions

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

use edr_core::{ClaimToken, EdrError, KeyPair, PublicKey};

/// Thread-safe key storage for the token issuer
pub struct ParticipantKeyRegistry {
    /// Participant id -> assertion verification key
    participant_keys: RwLock<HashMap<String, PublicKey>>,

    /// Key pair signing access tokens issued here
    signing_key: KeyPair,
}

impl ParticipantKeyRegistry {
    /// Create a registry around the issuer's signing key
    pub fn new(signing_key: KeyPair) -> Self {
        info!(kid = %signing_key.kid(), "Key registry initialized with signing key");
        Self {
            participant_keys: RwLock::new(HashMap::new()),
            signing_key,
        }
    }

    /// Registry with a freshly generated signing key
    pub fn generate(kid: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(kid))
    }

    pub fn signing_kid(&self) -> &str {
        self.signing_key.kid()
    }

    /// Public half of the signing key, for verifying issued tokens
    pub fn signing_public_key(&self) -> PublicKey {
        self.signing_key.public_key()
    }

    /// Trust assertions from `participant_id` signed with `key`
    pub fn register_participant(&self, participant_id: impl Into<String>, key: PublicKey) {
        let participant_id = participant_id.into();
        info!(participant = %participant_id, kid = %key.kid(), "Registered participant key");
        self.participant_keys.write().insert(participant_id, key);
    }

    /// Register a participant key from raw bytes
    pub fn register_participant_bytes(
        &self,
        participant_id: impl Into<String>,
        kid: &str,
        key_bytes: &[u8; 32],
    ) -> Result<(), EdrError> {
        let key = PublicKey::from_bytes(kid, key_bytes)?;
        self.register_participant(participant_id, key);
        Ok(())
    }

    pub fn participant_key(&self, participant_id: &str) -> Option<PublicKey> {
        self.participant_keys.read().get(participant_id).cloned()
    }

    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.participant_keys.read().contains_key(participant_id)
    }

    pub fn unregister_participant(&self, participant_id: &str) -> bool {
        let removed = self.participant_keys.write().remove(participant_id).is_some();
        if removed {
            info!(participant = %participant_id, "Unregistered participant key");
        }
        removed
    }

    pub fn participant_count(&self) -> usize {
        self.participant_keys.read().len()
    }

    /// Sign claims with the issuer key
    pub fn sign(&self, claims: &ClaimToken) -> Result<String, EdrError> {
        self.signing_key.sign_jwt(claims)
    }
}
