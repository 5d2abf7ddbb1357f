// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker purging expired fallback entries.
//!
//! Capacity eviction only runs when the store is full. Under light load
//! expired entries would otherwise linger, so this worker purges them on a
//! fixed interval regardless of pressure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::fallback_store::MemoryFallbackStore;

/// Default sweep interval (once per minute).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic purge of a shared [`MemoryFallbackStore`].
pub struct FallbackSweeper {
    store: Arc<Mutex<MemoryFallbackStore>>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl FallbackSweeper {
    /// Create a sweeper for `store`.
    pub fn new(store: Arc<Mutex<MemoryFallbackStore>>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Fallback sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Fallback sweeper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {
                    let removed = self.sweep().await;
                    if removed > 0 {
                        debug!(removed, "Fallback sweep complete");
                    }
                }
            }
        }

        info!("Fallback sweeper stopped");
    }

    /// Purge once. Returns the number of removed entries.
    pub async fn sweep(&self) -> usize {
        self.store.lock().await.purge_expired()
    }
}
