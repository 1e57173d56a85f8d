//! Device registry interface
//!
//! The registry is an external collaborator: it provisions device key pairs
//! and tracks revocation. The reconciler only ever reads from it, through
//! this trait. The in-memory implementation serves embedded deployments and
//! tests.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Registration state for one offline-capable device
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Device identifier
    pub device_id: Uuid,

    /// Current Ed25519 public key
    pub public_key: [u8; 32],

    /// True once the device may no longer submit intents
    pub revoked: bool,

    /// When the key was provisioned
    pub registered_at: DateTime<Utc>,
}

/// Read access to the device registry
pub trait DeviceRegistry: Send + Sync {
    /// Current record for a device, if registered
    fn device(&self, device_id: Uuid) -> Option<DeviceRecord>;
}

/// In-memory registry for embedded use and tests
#[derive(Default)]
pub struct InMemoryRegistry {
    devices: DashMap<Uuid, DeviceRecord>,
}

impl InMemoryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-key) a device
    pub fn register(&self, device_id: Uuid, public_key: [u8; 32]) {
        self.devices.insert(
            device_id,
            DeviceRecord {
                device_id,
                public_key,
                revoked: false,
                registered_at: Utc::now(),
            },
        );
        tracing::info!(device_id = %device_id, "device registered");
    }

    /// Revoke a device; its queued intents will be rejected
    pub fn revoke(&self, device_id: Uuid) {
        if let Some(mut record) = self.devices.get_mut(&device_id) {
            record.revoked = true;
            tracing::warn!(device_id = %device_id, "device revoked");
        }
    }
}

impl DeviceRegistry for InMemoryRegistry {
    fn device(&self, device_id: Uuid) -> Option<DeviceRecord> {
        self.devices.get(&device_id).map(|record| record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_core::crypto::KeyPair;

    #[test]
    fn test_register_and_lookup() {
        let registry = InMemoryRegistry::new();
        let device_id = Uuid::new_v4();
        let keypair = KeyPair::generate();

        assert!(registry.device(device_id).is_none());

        registry.register(device_id, keypair.public_key());
        let record = registry.device(device_id).unwrap();
        assert_eq!(record.public_key, keypair.public_key());
        assert!(!record.revoked);
    }

    #[test]
    fn test_revocation_sticks() {
        let registry = InMemoryRegistry::new();
        let device_id = Uuid::new_v4();
        registry.register(device_id, KeyPair::generate().public_key());

        registry.revoke(device_id);
        assert!(registry.device(device_id).unwrap().revoked);
    }
}
