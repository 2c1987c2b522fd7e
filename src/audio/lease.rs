// Exclusive device leases
//
// A lease is held for as long as the `DeviceLease` value lives. Dropping it
// returns the device to the registry, so every exit path releases.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{SessionError, SessionResult};

/// Registry of devices currently leased by a session
///
/// Controllers that share a registry can never hold the same device at once.
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an exclusive lease on a device
    pub fn try_acquire(&self, device_id: &str) -> SessionResult<DeviceLease> {
        let mut held = lock(&self.held);
        if !held.insert(device_id.to_string()) {
            return Err(SessionError::DeviceUnavailable(format!(
                "{} is held by another session",
                device_id
            )));
        }

        debug!("Leased device {}", device_id);

        Ok(DeviceLease {
            device_id: device_id.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, device_id: &str) -> bool {
        lock(&self.held).contains(device_id)
    }
}

/// Exclusive hold on one device
#[derive(Debug)]
pub struct DeviceLease {
    device_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl DeviceLease {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.device_id);
        debug!("Released device {}", self.device_id);
    }
}

fn lock(held: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    // The set stays consistent even if a holder panicked mid-update
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
