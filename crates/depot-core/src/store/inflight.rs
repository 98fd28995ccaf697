//! Per-path in-flight fill coordination.
//!
//! A fill holds the slot for its destination for the whole fetch-and-rename.
//! Concurrent callers for the same path queue on the slot and, once they get
//! it, re-check the disk before going upstream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub(crate) struct InflightFills {
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl InflightFills {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<PathBuf, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for exclusive ownership of `key`.
    pub(crate) async fn enter(self: &Arc<Self>, key: &Path) -> InflightGuard {
        let slot = {
            let mut slots = self.lock_slots();
            Arc::clone(slots.entry(key.to_path_buf()).or_default())
        };
        let permit = Arc::clone(&slot).lock_owned().await;

        InflightGuard {
            owner: Arc::clone(self),
            key: key.to_path_buf(),
            slot,
            permit: Some(permit),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock_slots().len()
    }
}

/// Exclusive ownership of one destination; releases the slot on drop.
pub(crate) struct InflightGuard {
    owner: Arc<InflightFills>,
    key: PathBuf,
    slot: Slot,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        drop(self.permit.take());

        // New waiters clone the slot under this lock, so the count is stable:
        // one reference in the map, one here, plus one per queued waiter.
        let mut slots = self.owner.lock_slots();
        if Arc::strong_count(&self.slot) <= 2 {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_slot_released_after_use() {
        let fills = Arc::new(InflightFills::default());
        {
            let _guard = fills.enter(Path::new("/cache/a")).await;
            assert_eq!(fills.len(), 1);
        }
        assert_eq!(fills.len(), 0);
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let fills = Arc::new(InflightFills::default());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fills = Arc::clone(&fills);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = fills.enter(Path::new("/cache/same")).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(fills.len(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let fills = Arc::new(InflightFills::default());
        let _a = fills.enter(Path::new("/cache/a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), fills.enter(Path::new("/cache/b")))
            .await;
        assert!(b.is_ok());
        assert_eq!(fills.len(), 2);
    }
}
