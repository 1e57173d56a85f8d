//! Signature and integrity verification
//!
//! Two independent checks guard an offline intent:
//!
//! 1. **Origin**: the signature must verify against the registered,
//!    unrevoked key of the uploading device over the canonical preimage.
//! 2. **Freshness**: the device sequence must be strictly above the highest
//!    sequence ever accepted for that device, blocking replay of an old
//!    signed intent even under a fresh idempotency key.
//!
//! Freshness is checked separately from origin so that a re-uploaded batch
//! can still short-circuit through the idempotency store in between.

use crate::error::{Error, Result};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::types::SignedIntent;
use std::sync::Arc;
use uuid::Uuid;
use wallet_core::crypto::verify_signature;
use wallet_core::WalletEngine;

/// Verifies offline intents against the device registry
pub struct IntentVerifier {
    registry: Arc<dyn DeviceRegistry>,
}

impl IntentVerifier {
    /// Create a verifier over a registry
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Check that the intent was produced, unaltered, by the claimed device
    pub fn verify_origin(&self, device_id: Uuid, intent: &SignedIntent) -> Result<DeviceRecord> {
        let device = self
            .registry
            .device(device_id)
            .filter(|record| !record.revoked)
            .ok_or(Error::UnknownDevice(device_id))?;

        if !verify_signature(&intent.signing_bytes(), &intent.signature, &device.public_key) {
            return Err(Error::SignatureMismatch(device_id));
        }

        Ok(device)
    }

    /// Check the device sequence against the accepted watermark
    pub fn ensure_fresh_sequence(
        &self,
        engine: &WalletEngine,
        device_id: Uuid,
        sequence: u64,
    ) -> Result<()> {
        if let Some(last) = engine.device_sequence(device_id)? {
            if sequence <= last {
                return Err(Error::ReplayedSequence {
                    device_id,
                    sequence,
                    last,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use chrono::Utc;
    use wallet_core::crypto::KeyPair;
    use wallet_core::{EntryType, Money, Signature, WalletId};

    fn unsigned_intent() -> SignedIntent {
        SignedIntent {
            wallet_id: WalletId::new(Uuid::new_v4(), Uuid::new_v4()),
            entry_type: EntryType::Purchase,
            amount: Money::from_minor(-300),
            idempotency_key: "k5".to_string(),
            client_created_at: Utc::now(),
            device_sequence: 5,
            stand_id: None,
            operator_id: None,
            signature: Signature::from_bytes([0u8; 64]),
        }
    }

    fn setup() -> (Arc<InMemoryRegistry>, IntentVerifier, Uuid, KeyPair) {
        let registry = Arc::new(InMemoryRegistry::new());
        let verifier = IntentVerifier::new(registry.clone());
        let device_id = Uuid::new_v4();
        let keypair = KeyPair::generate();
        registry.register(device_id, keypair.public_key());
        (registry, verifier, device_id, keypair)
    }

    #[test]
    fn test_valid_signature_passes() {
        let (_registry, verifier, device_id, keypair) = setup();
        let intent = unsigned_intent().signed(&keypair);

        assert!(verifier.verify_origin(device_id, &intent).is_ok());
    }

    #[test]
    fn test_tampered_intent_is_a_mismatch() {
        let (_registry, verifier, device_id, keypair) = setup();
        let mut intent = unsigned_intent().signed(&keypair);
        intent.amount = Money::from_minor(-1);

        assert!(matches!(
            verifier.verify_origin(device_id, &intent),
            Err(Error::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_unregistered_device_is_unknown() {
        let (_registry, verifier, _device_id, keypair) = setup();
        let intent = unsigned_intent().signed(&keypair);

        assert!(matches!(
            verifier.verify_origin(Uuid::new_v4(), &intent),
            Err(Error::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_revoked_device_is_unknown() {
        let (registry, verifier, device_id, keypair) = setup();
        let intent = unsigned_intent().signed(&keypair);
        registry.revoke(device_id);

        assert!(matches!(
            verifier.verify_origin(device_id, &intent),
            Err(Error::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_wrong_key_is_a_mismatch() {
        let (_registry, verifier, device_id, _keypair) = setup();
        let other = KeyPair::generate();
        let intent = unsigned_intent().signed(&other);

        assert!(matches!(
            verifier.verify_origin(device_id, &intent),
            Err(Error::SignatureMismatch(_))
        ));
    }
}
