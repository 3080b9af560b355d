//! # ferry Core
//!
//! Peer-to-peer file transfer layer for a friend-to-friend messaging client.
//!
//! The secure peer transport (handshake, encryption, friend connectivity and
//! packet delivery) is an external collaborator reached through the
//! [`Transport`] trait. This crate owns everything that happens on top of it
//! for moving a byte stream of known size between two friends:
//!
//! - Content fingerprints used as transfer ids ([`hash`])
//! - The per-friend transfer registry ([`transfer::registry`])
//! - The transfer state machine ([`transfer::session`])
//! - Receiver-driven chunk flow control ([`transfer::flow`])
//! - Typed observer events ([`event`]) and the transport event bridge
//!   ([`dispatch`])
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        FileTransfers                            │
//! │   (public API + dispatch of inbound transport events)          │
//! ├──────────────────────┬──────────────────────┬───────────────────┤
//! │   TransferRegistry   │   TransferSession    │  FlowController   │
//! │  (peer, handle) map  │   state machine      │  chunk pull/push  │
//! ├──────────────────────┴──────────────────────┴───────────────────┤
//! │                     Transport (external)                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the caller's thread. Inbound transport activity is fed
//! in through [`FileTransfers::dispatch`]; there are no background tasks and
//! no locks around transfer state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod hash;
pub mod io;
pub mod loopback;
pub mod transfer;
pub mod transport;

pub use config::TransferConfig;
pub use dispatch::{FileControl, FileTransfers, OutgoingFile, TransportEvent};
pub use error::{Result, TransferError, TransportError};
pub use event::{ChannelObserver, Observer, TransferEvent};
pub use hash::{Fingerprint, TransferId, hash};
pub use io::{DataSink, DataSource, FileSink, FileSource, MemorySink, MemorySource};
pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use transfer::{
    Direction, FileKind, Filename, PeerId, TransferHandle, TransferInfo, TransferSession,
    TransferState,
};
pub use transport::{Control, Transport};

/// Length of a content fingerprint in bytes
pub const HASH_LENGTH: usize = 32;

/// Length of a transfer id in bytes
pub const TRANSFER_ID_LENGTH: usize = 32;

/// Maximum filename length in bytes (UTF-8)
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Largest chunk the transport can carry in a single data packet
pub const MAX_CHUNK_SIZE: usize = 1371;

/// Default number of concurrent transfers per friend and direction
pub const DEFAULT_MAX_TRANSFERS_PER_PEER: usize = 256;
