//! Offline-first order sync for a multi-tenant point of sale.
//!
//! Orders taken at the till are queued in a local SQLite store and drained
//! to the hosted backend by [`sync::SyncEngine`] whenever the host is online.

pub mod capture;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod model;
pub mod money;
pub mod remote;
pub mod sync;

pub use capture::OrderDraft;
pub use connectivity::ConnectivityMonitor;
pub use db::Store;
pub use error::{CaptureError, RemoteError, StoreError, SyncError};
pub use remote::{BackendHandle, OrderBackend, OrderPayload, SupabaseClient};
pub use sync::{
    CaptureReceipt, DrainOutcome, DrainReport, EngineSettings, SkipReason, Subscription, SyncEngine,
};
