//! Bounded device session pool.
//!
//! A lease holds one global permit and one permit of the target device.
//! The global permit count is the service-wide backpressure; the per-device
//! count keeps a single box from being hammered by one batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("device pool is closed")]
    Closed,
}

pub struct DevicePool {
    global: Arc<Semaphore>,
    per_device: Mutex<HashMap<String, Arc<Semaphore>>>,
    per_device_limit: usize,
    size: usize,
}

/// Released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    device: String,
    _device_permit: OwnedSemaphorePermit,
    _global_permit: OwnedSemaphorePermit,
}

impl DeviceLease {
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl DevicePool {
    pub fn new(size: usize, per_device_limit: usize) -> Self {
        let size = size.max(1);
        Self {
            global: Arc::new(Semaphore::new(size)),
            per_device: Mutex::new(HashMap::new()),
            per_device_limit: per_device_limit.max(1),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Global permits currently free
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    fn device_semaphore(&self, key: &str) -> Arc<Semaphore> {
        let mut map = self.per_device.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_device_limit)))
            .clone()
    }

    /// Wait for a lease on `device`. The device permit is taken first so a
    /// busy device never holds global capacity while it waits.
    pub async fn acquire(&self, device: &str) -> Result<DeviceLease, PoolError> {
        let key = device.trim().to_ascii_lowercase();
        let device_sem = self.device_semaphore(&key);

        let device_permit = device_sem
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        let global_permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        debug!("Leased {} ({}/{} global permits left)", key, self.available(), self.size);

        Ok(DeviceLease {
            device: key,
            _device_permit: device_permit,
            _global_permit: global_permit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let pool = DevicePool::new(2, 2);
        let lease = pool.acquire("r1").await.unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(lease.device(), "r1");
        drop(lease);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_per_device_limit() {
        let pool = Arc::new(DevicePool::new(8, 1));
        let _first = pool.acquire("sw-42").await.unwrap();

        // Same device (case-insensitive) must wait
        let blocked = tokio::time::timeout(Duration::from_millis(20), pool.acquire("SW-42")).await;
        assert!(blocked.is_err());

        // Another device is fine
        let other = tokio::time::timeout(Duration::from_millis(20), pool.acquire("r1")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_global_limit() {
        let pool = DevicePool::new(1, 4);
        let _held = pool.acquire("r1").await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(20), pool.acquire("r2")).await;
        assert!(blocked.is_err());
    }

    #[test]
    fn test_zero_sizes_clamped() {
        let pool = DevicePool::new(0, 0);
        assert_eq!(pool.size(), 1);
    }
}
