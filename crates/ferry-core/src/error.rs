//! Error types for the ferry transfer layer
//!
//! Errors are grouped the same way callers are expected to react to them:
//!
//! - **Not found**: the caller holds a stale friend or transfer reference;
//!   drop it.
//! - **State conflict**: the requested transition does not fit the current
//!   transfer state; surfaced verbatim, never corrected.
//! - **Transient**: capacity limits (`SendQueueFull`, `TooMany`); the caller
//!   may retry later. The core itself never retries.
//! - **Fatal**: local storage failures and transport state errors; the
//!   transfer has already moved to `Failed` and must be recreated.
//!
//! # Example
//!
//! ```
//! use ferry_core::TransferError;
//!
//! fn report(err: &TransferError) {
//!     if err.is_transient() {
//!         println!("retry later: {err}");
//!     } else if err.is_fatal() {
//!         println!("transfer lost: {err}");
//!     }
//! }
//! # report(&TransferError::SendQueueFull);
//! ```

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

use crate::hash::TransferId;
use crate::transfer::{PeerId, TransferHandle, TransferState};

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// How a transfer was referenced when it could not be found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRef {
    /// Local handle from the public API
    Handle(TransferHandle),
    /// Wire-level transfer id from an inbound transport event
    Id(TransferId),
}

impl fmt::Display for TransferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(handle) => write!(f, "handle {handle}"),
            Self::Id(id) => write!(f, "id {}", hex::encode(&id.as_bytes()[..8])),
        }
    }
}

/// Errors surfaced by transfer operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    // ============ Not Found ============
    /// The transport does not know this friend
    #[error("Friend not found: {}", hex::encode(&.0[..8]))]
    FriendNotFound(PeerId),

    /// The friend exists but is currently offline
    #[error("Friend not connected: {}", hex::encode(&.0[..8]))]
    FriendNotConnected(PeerId),

    /// No live transfer matches the reference
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferRef),

    // ============ State Conflicts ============
    /// Resume requested but the transfer is not paused by that side
    #[error("Transfer is not paused")]
    NotPaused,

    /// Pause requested but the transfer is already paused
    #[error("Transfer is already paused")]
    AlreadyPaused,

    /// The operation is not permitted in the transfer's current role or state
    #[error("Operation denied: {0}")]
    Denied(Cow<'static, str>),

    /// Chunk traffic for a transfer that is not moving data
    #[error("Transfer is not transferring (state: {0})")]
    NotTransferring(TransferState),

    /// Chunk offset does not match the transfer cursor
    #[error("Wrong position: expected offset {expected}, got {actual}")]
    WrongPosition {
        /// Cursor of the transfer
        expected: u64,
        /// Offset carried by the request or chunk
        actual: u64,
    },

    /// Seek target outside the transfer or at a forbidden time
    #[error("Invalid position {position} (total size {total_size})")]
    InvalidPosition {
        /// Requested offset
        position: u64,
        /// Declared size of the transfer
        total_size: u64,
    },

    /// Chunk would run past the end of the transfer or exceeds the chunk limit
    #[error("Invalid chunk length {length} at offset {offset} (total size {total_size})")]
    InvalidLength {
        /// Offset of the chunk
        offset: u64,
        /// Length of the chunk
        length: u64,
        /// Declared size of the transfer
        total_size: u64,
    },

    /// Filename longer than the protocol allows
    #[error("Filename too long: {0} bytes")]
    NameTooLong(usize),

    // ============ Capacity / Transient ============
    /// The transport's outbound queue is full
    #[error("Transport send queue full")]
    SendQueueFull,

    /// Friend already has the maximum number of concurrent transfers
    #[error("Too many concurrent transfers (limit {0})")]
    TooMany(usize),

    // ============ Fatal ============
    /// Local data source or sink failed
    #[error("File I/O error: {0}")]
    Io(String),

    /// The transport rejected a chunk because its own transfer state disagrees
    #[error("Transport state error: {0}")]
    TransportState(Cow<'static, str>),

    // ============ Configuration ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

impl TransferError {
    /// Returns true if the caller referenced a friend or transfer that does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TransferError::FriendNotFound(_) | TransferError::TransferNotFound(_)
        )
    }

    /// Returns true if the request conflicts with the transfer's current state
    #[must_use]
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            TransferError::NotPaused
                | TransferError::AlreadyPaused
                | TransferError::Denied(_)
                | TransferError::NotTransferring(_)
                | TransferError::WrongPosition { .. }
                | TransferError::InvalidPosition { .. }
        )
    }

    /// Returns true if the same call may succeed later without other changes
    ///
    /// An offline friend counts as transient: the request becomes valid again
    /// once the transport reconnects.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::SendQueueFull
                | TransferError::TooMany(_)
                | TransferError::FriendNotConnected(_)
        )
    }

    /// Returns true if the error forced the transfer into `Failed`
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransferError::Io(_) | TransferError::TransportState(_)
        )
    }

    /// Create a denied error with static context (zero allocation)
    #[must_use]
    pub const fn denied(context: &'static str) -> Self {
        TransferError::Denied(Cow::Borrowed(context))
    }

    /// Create an invalid configuration error with static context
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        TransferError::InvalidConfig(Cow::Borrowed(context))
    }

    /// Map a transport failure for a given friend into a transfer error
    #[must_use]
    pub fn from_transport(err: TransportError, peer: PeerId) -> Self {
        match err {
            TransportError::SendQueueFull => TransferError::SendQueueFull,
            TransportError::PeerNotConnected => TransferError::FriendNotConnected(peer),
            TransportError::WrongState => {
                TransferError::TransportState(Cow::Borrowed("transport rejected chunk"))
            }
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

/// Failures reported by the transport adapter
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Outbound queue is full; try again after it drains
    #[error("send queue full")]
    SendQueueFull,

    /// Friend is offline
    #[error("peer not connected")]
    PeerNotConnected,

    /// Transport has no matching transfer in a sendable state
    #[error("transfer in wrong state")]
    WrongState,
}
