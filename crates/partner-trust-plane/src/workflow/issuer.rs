//! API key material issuance
//!
//! Key material never leaves the issuer's vault except through
//! [`ApiKeyIssuer::material`]; requests only carry an opaque reference.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use tracing::{debug, info};

use super::ApiKeyRequest;

/// Default number of random bytes in a key
pub const DEFAULT_KEY_LENGTH: usize = 32;

/// Smallest key length the issuer accepts
pub const MIN_KEY_LENGTH: usize = 16;

/// Opaque reference to issued key material
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMaterialRef(String);

impl KeyMaterialRef {
    fn generate() -> Self {
        Self(format!("apikey-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyMaterialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw API key
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeyMaterial(String);

impl ApiKeyMaterial {
    /// The key as handed to the partner
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKeyMaterial([REDACTED])")
    }
}

/// Outcome of key generation
///
/// `raw_key` is present only on the call that created the material.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub key_ref: KeyMaterialRef,
    pub raw_key: Option<ApiKeyMaterial>,
}

#[derive(Debug)]
struct VaultEntry {
    material: ApiKeyMaterial,
    request_id: String,
    invalidated: bool,
}

/// Generates and holds API key material
#[derive(Debug)]
pub struct ApiKeyIssuer {
    key_length: usize,
    vault: RwLock<HashMap<KeyMaterialRef, VaultEntry>>,
}

impl Default for ApiKeyIssuer {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_LENGTH)
    }
}

impl ApiKeyIssuer {
    /// Create an issuer producing keys of `key_length` random bytes
    /// (raised to [`MIN_KEY_LENGTH`] if smaller)
    pub fn new(key_length: usize) -> Self {
        Self {
            key_length: key_length.max(MIN_KEY_LENGTH),
            vault: RwLock::new(HashMap::new()),
        }
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    /// Generate fresh material for `request`
    pub fn issue(&self, request: &ApiKeyRequest) -> IssuedKey {
        let mut bytes = vec![0u8; self.key_length];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let material = ApiKeyMaterial(URL_SAFE_NO_PAD.encode(&bytes));
        let key_ref = KeyMaterialRef::generate();

        self.vault.write().unwrap().insert(
            key_ref.clone(),
            VaultEntry {
                material: material.clone(),
                request_id: request.request_id.clone(),
                invalidated: false,
            },
        );

        info!(
            request_id = %request.request_id,
            partner_id = %request.partner_id,
            key_ref = %key_ref,
            "Issued API key"
        );

        IssuedKey {
            key_ref,
            raw_key: Some(material),
        }
    }

    /// Material behind a reference, unless it has been invalidated
    pub fn material(&self, key_ref: &KeyMaterialRef) -> Option<ApiKeyMaterial> {
        let vault = self.vault.read().unwrap();
        vault
            .get(key_ref)
            .filter(|entry| !entry.invalidated)
            .map(|entry| entry.material.clone())
    }

    /// Mark material unusable; returns false for unknown references
    pub fn invalidate(&self, key_ref: &KeyMaterialRef) -> bool {
        let mut vault = self.vault.write().unwrap();
        match vault.get_mut(key_ref) {
            Some(entry) => {
                entry.invalidated = true;
                debug!(key_ref = %key_ref, request_id = %entry.request_id, "Invalidated API key");
                true
            }
            None => false,
        }
    }
}
