//! Ed25519 key handling for certificate signing
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair used by a CA (or test fixture) to sign certificates
//! - `PublicKey`: Ed25519 public key used to verify an issued certificate

use crate::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Length of an Ed25519 public key in bytes
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an Ed25519 signature in bytes
pub const SIGNATURE_LENGTH: usize = 64;

/// Ed25519 key pair for signing certificates
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from a 32-byte seed
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.verifying_key,
        }
    }

    /// Get the raw verifying key bytes
    pub fn verifying_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// Sign a message, returning the raw 64-byte signature
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

/// Ed25519 public key for verification
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublicKey")
            .field(&self.verifying_key.as_bytes())
            .finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_LENGTH]) -> Result<Self, CryptoError> {
        let verifying_key = VerifyingKey::from_bytes(bytes)?;
        Ok(Self { verifying_key })
    }

    /// Create a public key from a slice, checking its length
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// Verify a signature over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature_bytes: [u8; SIGNATURE_LENGTH] = signature.try_into().map_err(|_| {
            CryptoError::InvalidSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_LENGTH,
                signature.len()
            ))
        })?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let signature = kp.sign(b"tbs");

        assert_eq!(signature.len(), SIGNATURE_LENGTH);
        assert!(kp.public_key().verify(b"tbs", &signature).is_ok());
    }

    #[test]
    fn test_verification_fails_with_wrong_key() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let signature = kp1.sign(b"tbs");

        assert_eq!(
            kp2.public_key().verify(b"tbs", &signature),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn test_verification_fails_on_tampered_message() {
        let kp = KeyPair::generate();
        let signature = kp.sign(b"original");
        assert!(kp.public_key().verify(b"tampered", &signature).is_err());
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let kp = KeyPair::generate();
        let signature = kp.sign(b"tbs");
        let result = kp.public_key().verify(b"tbs", &signature[..10]);
        assert!(matches!(result, Err(CryptoError::InvalidSignature(_))));
    }

    #[test]
    fn test_keypair_from_bytes_is_deterministic() {
        let seed = [7u8; 32];
        let kp1 = KeyPair::from_bytes(&seed);
        let kp2 = KeyPair::from_bytes(&seed);
        assert_eq!(kp1.verifying_key_bytes(), kp2.verifying_key_bytes());
    }

    #[test]
    fn test_public_key_from_slice_checks_length() {
        assert!(PublicKey::from_slice(&[1u8; 31]).is_err());

        let kp = KeyPair::generate();
        let pk = PublicKey::from_slice(&kp.verifying_key_bytes()).unwrap();
        assert_eq!(pk, kp.public_key());
    }
}
