//! Public-key directory storage trait.

use std::collections::BTreeMap;

use troof_types::ParticipantId;

use crate::StoreError;

/// participantId → PEM SubjectPublicKeyInfo.
pub type KeyMap = BTreeMap<ParticipantId, String>;

/// Persists registered public keys independently of live connections, so a
/// reconnecting participant does not have to register again.
pub trait KeyStore: Send + Sync {
    /// Load every stored key. A store that was never written is empty.
    fn load_keys(&self) -> Result<KeyMap, StoreError>;

    /// Replace the stored keys with `keys`.
    fn save_keys(&self, keys: &KeyMap) -> Result<(), StoreError>;
}
