//! Single-flight for cache misses.
//!
//! The first request to miss on a key becomes the leader and transcodes.
//! Requests that miss on the same key while the leader is running wait for
//! it to finish and then read the cache. A follower whose leader failed
//! finds nothing there and transcodes on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct Coalescer {
    in_flight: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
}

/// Outcome of [`Coalescer::acquire`].
#[derive(Debug)]
pub enum Slot {
    /// No one else is working on this key. Followers are released when the
    /// guard is dropped.
    Leader(LeaderGuard),
    /// Another request held the key and has finished.
    Follower,
}

impl Slot {
    pub fn is_leader(&self) -> bool {
        matches!(self, Slot::Leader(_))
    }
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> Slot {
        let mut rx = {
            let mut in_flight = self.lock();
            match in_flight.get(key) {
                Some(sender) => sender.subscribe(),
                None => {
                    let (tx, _rx) = watch::channel(false);
                    in_flight.insert(key.to_string(), tx.clone());
                    return Slot::Leader(LeaderGuard {
                        key: key.to_string(),
                        coalescer: self.clone(),
                        sender: tx,
                    });
                }
            }
        };

        // Err means the leader vanished without signalling; either way it is done
        let _ = rx.wait_for(|done| *done).await;
        Slot::Follower
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        // the map stays consistent even if a holder panicked
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Held by the leader for the duration of its transcode.
#[derive(Debug)]
pub struct LeaderGuard {
    key: String,
    coalescer: Coalescer,
    sender: watch::Sender<bool>,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.coalescer.lock().remove(&self.key);
        let _ = self.sender.send(true);
    }
}
