//! Typed observer events.
//!
//! Every state change inside [`FileTransfers`](crate::FileTransfers) is
//! reported as one [`TransferEvent`], delivered synchronously to each
//! registered [`Observer`] before the triggering call returns.
//!
//! Two kinds of observers are supported:
//! - plain closures (`FnMut(&TransferEvent)`), called in place
//! - [`ChannelObserver`], which forwards events into a bounded tokio channel
//!   for a consumer loop running elsewhere

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::hash::TransferId;
use crate::transfer::{Direction, FileKind, Filename, PeerId, TransferHandle, TransferState};

/// Event reported to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A transfer entered the registry (local send or friend announcement)
    TransferCreated {
        /// Friend on the other end
        peer: PeerId,
        /// Local handle
        handle: TransferHandle,
        /// Direction
        direction: Direction,
        /// Kind tag
        kind: FileKind,
        /// Declared size
        total_size: u64,
        /// Wire-level id
        transfer_id: TransferId,
        /// Display name
        filename: Filename,
    },

    /// A transfer changed state
    ///
    /// Terminal states are reported here right before the transfer is
    /// removed from the registry.
    StateChanged {
        /// Friend on the other end
        peer: PeerId,
        /// Local handle
        handle: TransferHandle,
        /// State before the change
        previous: TransferState,
        /// State after the change
        state: TransferState,
    },

    /// A chunk of an incoming transfer was accepted
    ChunkReceived {
        /// Friend on the other end
        peer: PeerId,
        /// Local handle
        handle: TransferHandle,
        /// Offset of the chunk
        offset: u64,
        /// Chunk payload
        data: Vec<u8>,
    },

    /// A chunk request of an outgoing transfer was served
    ChunkRequested {
        /// Friend on the other end
        peer: PeerId,
        /// Local handle
        handle: TransferHandle,
        /// Requested offset
        offset: u64,
        /// Requested length (zero marks the end of the transfer)
        length: u64,
    },
}

impl TransferEvent {
    /// Friend the event is about
    #[must_use]
    pub fn peer(&self) -> &PeerId {
        match self {
            Self::TransferCreated { peer, .. }
            | Self::StateChanged { peer, .. }
            | Self::ChunkReceived { peer, .. }
            | Self::ChunkRequested { peer, .. } => peer,
        }
    }

    /// Handle of the transfer the event is about
    #[must_use]
    pub fn handle(&self) -> TransferHandle {
        match self {
            Self::TransferCreated { handle, .. }
            | Self::StateChanged { handle, .. }
            | Self::ChunkReceived { handle, .. }
            | Self::ChunkRequested { handle, .. } => *handle,
        }
    }
}

/// Receiver of transfer events
pub trait Observer {
    /// Handle one event; must not block
    fn on_event(&mut self, event: &TransferEvent);
}

impl<F> Observer for F
where
    F: FnMut(&TransferEvent),
{
    fn on_event(&mut self, event: &TransferEvent) {
        self(event);
    }
}

/// Observer forwarding events into a bounded channel
///
/// Delivery never blocks the reactor: when the channel is full the event is
/// dropped and a warning is logged.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<TransferEvent>,
    dropped: u64,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, dropped: 0 }, rx)
    }

    /// Events dropped because the channel was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Observer for ChannelObserver {
    fn on_event(&mut self, event: &TransferEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped += 1;
                tracing::warn!(
                    "Event channel full, dropping event for transfer {} ({} dropped so far)",
                    event.handle(),
                    self.dropped
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("Event receiver gone, discarding event");
            }
        }
    }
}
