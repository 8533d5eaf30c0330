//! Connectivity reporting and the periodic sync loop
//!
//! The platform layer owns actual reachability detection and reports changes
//! through a [`ConnectivityHandle`]; the monitor task reacts to those changes
//! and runs a catch-all periodic drain for anything event-driven triggers
//! missed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sync::engine::SyncEngine;
use crate::sync::transport::RemoteService;

/// How often the periodic drain fires when nothing else triggers one
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Publisher side of the connectivity signal
///
/// Starts online. Cheap to clone and hand to whatever layer observes the
/// network.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }

    /// Report the current reachability; repeated reports of the same state
    /// are absorbed by the channel
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that keeps the engine draining
///
/// Two stimuli: connectivity flips (an offline-to-online transition drains
/// immediately) and a fixed interval as a safety net.
pub struct SyncMonitor<R: RemoteService> {
    engine: Arc<SyncEngine<R>>,
    connectivity: watch::Receiver<bool>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl<R: RemoteService> SyncMonitor<R> {
    pub fn new(
        engine: Arc<SyncEngine<R>>,
        connectivity: watch::Receiver<bool>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            connectivity,
            interval,
            task: None,
        }
    }

    /// Spawn the monitor task; idempotent while running
    pub fn start(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let engine = Arc::clone(&self.engine);
        let mut connectivity = self.connectivity.clone();
        let interval = self.interval;

        engine.set_online(*connectivity.borrow_and_update());
        info!(interval_secs = interval.as_secs(), "Sync monitor started");

        self.task = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            debug!("Connectivity handle dropped, monitor exiting");
                            break;
                        }
                        let online = *connectivity.borrow_and_update();
                        engine.set_online(online);
                        if online {
                            info!("Back online, draining outbox");
                            if let Err(e) = engine.sync_now().await {
                                warn!("Reconnect sync failed: {e}");
                            }
                        } else {
                            info!("Went offline, queuing mutations locally");
                        }
                    }
                    _ = ticker.tick() => {
                        if engine.is_online() {
                            if let Err(e) = engine.sync_now().await {
                                warn!("Periodic sync failed: {e}");
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Stop the monitor task; queued work stays durable
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Sync monitor stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl<R: RemoteService> Drop for SyncMonitor<R> {
    fn drop(&mut self) {
        self.stop();
    }
}
