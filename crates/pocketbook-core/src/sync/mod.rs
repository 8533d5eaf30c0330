//! Sync subsystem: outbox drain, conflict resolution, connectivity

pub mod backoff;
pub mod clock;
pub mod conflict;
pub mod engine;
pub mod monitor;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::Winner;
pub use engine::{SyncConfig, SyncEngine, SyncStats};
pub use monitor::{ConnectivityHandle, SyncMonitor, DEFAULT_SYNC_INTERVAL};
pub use transport::{
    HttpRemoteService, MockRemoteService, MutationOutcome, RemoteExpense, RemoteService,
    TransportError,
};
