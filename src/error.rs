//! Error taxonomy for the offline store, the remote backend and the engine.
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Initialization never succeeded; nothing can be read or written.
    #[error("offline store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("malformed {kind} record {key}: {detail}")]
    Malformed {
        kind: &'static str,
        key: String,
        detail: String,
    },
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("invalid backend response: {0}")]
    Decode(String),
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
    /// The order cannot be put on the wire; nothing was sent.
    #[error("order {order_id} cannot be encoded: {field} is out of range")]
    Unencodable { order_id: String, field: &'static str },
}

/// Boundary validation failures for orders built by a capture UI.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("order has no items")]
    EmptyOrder,
    #[error("{0} must be non-empty")]
    MissingField(&'static str),
    #[error("item {product_id} has quantity 0")]
    ZeroQuantity { product_id: String },
    #[error("item {product_id} has a negative price")]
    NegativePrice { product_id: String },
    #[error("dine-in orders need a table number")]
    MissingTable,
    #[error("invalid table number: {0}")]
    InvalidTable(String),
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
    #[error("{0} is out of range")]
    AmountOutOfRange(&'static str),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("cannot sync while offline")]
    Offline,
    #[error("backend not configured: {0}")]
    NotConfigured(String),
    #[error("order submission failed: {0}")]
    SubmissionFailed(#[from] RemoteError),
    #[error("invalid order: {0}")]
    Capture(#[from] CaptureError),
    #[error("order {0} not found")]
    NotFound(String),
}
