//! Cryptographic operations
//!
//! Ed25519 key pairs for stand devices and SHA-256 hashing for the
//! tamper-evident entry chain. Signing happens on the device; the server
//! side only ever verifies.

use crate::{Error, Result};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Ed25519 key pair held by an offline-capable device
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create from seed (32 bytes), deterministically
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> crate::types::Signature {
        let signature = self.signing_key.sign(message);
        crate::types::Signature::from_bytes(signature.to_bytes())
    }

    /// Verify a signature made with this key pair
    pub fn verify(&self, message: &[u8], signature: &crate::types::Signature) -> Result<()> {
        let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());
        self.verifying_key
            .verify(message, &dalek_sig)
            .map_err(|e| Error::InvalidRequest(format!("signature verification failed: {e}")))
    }
}

/// Verify a signature with a registered public key
pub fn verify_signature(
    message: &[u8],
    signature: &crate::types::Signature,
    public_key: &[u8; 32],
) -> bool {
    let dalek_sig = DalekSignature::from_bytes(signature.as_bytes());

    let verifying_key = match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };

    verifying_key.verify(message, &dalek_sig).is_ok()
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_seed_is_deterministic() {
        let seed = [42u8; 32];
        let keypair1 = KeyPair::from_seed(&seed);
        let keypair2 = KeyPair::from_seed(&seed);

        assert_eq!(keypair1.public_key(), keypair2.public_key());
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"purchase intent";

        let signature = keypair.sign(message);
        assert!(keypair.verify(message, &signature).is_ok());
        assert!(keypair.verify(b"tampered intent", &signature).is_err());
    }

    #[test]
    fn test_verify_signature_rejects_wrong_key() {
        let keypair = KeyPair::generate();
        let message = b"purchase intent";
        let signature = keypair.sign(message);

        assert!(verify_signature(message, &signature, &keypair.public_key()));

        let other = KeyPair::generate();
        assert!(!verify_signature(message, &signature, &other.public_key()));
    }

    #[test]
    fn test_hash_bytes() {
        let hash1 = hash_bytes(b"data");
        let hash2 = hash_bytes(b"data");
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash_bytes(b"other"));
    }
}
