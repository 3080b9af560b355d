//! Receiver-driven chunk flow control.
//!
//! # Transfer Flow
//!
//! ```text
//! Sender                                   Receiver
//!     |-- Announce (kind, size, name) -------->|
//!     |<-------------------------- Resume -----|   (accept)
//!     |<----------- ChunkRequest(0, L) --------|
//!     |-- Chunk(0, L bytes) ------------------>|
//!     |<----------- ChunkRequest(L, L) --------|
//!     |-- Chunk(L, L bytes) ------------------>|
//!     |                 ...                    |
//!     |<----------- ChunkRequest(size, 0) -----|   (end of transfer)
//!     |    [Completed]                         |   [Completed]
//! ```
//!
//! The sender never pushes data on its own: every chunk answers exactly one
//! request, which bounds what is in flight to what the receiver asked for.
//! Requests and chunks are checked against the transfer cursor because the
//! transport does not keep them ordered across a pause. Nothing is buffered
//! out of order; a chunk that does not start at the cursor is rejected.

use std::sync::Arc;

use crate::error::{Result, TransferError, TransportError};
use crate::transfer::session::{TransferSession, Transition};
use crate::transfer::{Direction, TransferState};
use crate::transport::Transport;

/// Serves chunk requests and accepts chunk payloads for one node
pub struct FlowController<T: Transport + ?Sized> {
    transport: Arc<T>,
    max_chunk_size: usize,
}

impl<T: Transport + ?Sized> FlowController<T> {
    /// Create a flow controller sending through `transport`
    pub fn new(transport: Arc<T>, max_chunk_size: usize) -> Self {
        Self {
            transport,
            max_chunk_size,
        }
    }

    /// Largest chunk accepted in either direction
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Answer a friend's request for `length` bytes at `offset`
    ///
    /// Returns the completion transition when the request was the
    /// zero-length end-of-transfer marker.
    ///
    /// On `SendQueueFull` the cursor is left untouched, so re-serving the same
    /// request later is safe. Source read failures and transport state errors
    /// fail the session before the error is returned.
    ///
    /// # Errors
    ///
    /// `NotTransferring`, `InvalidLength`, `WrongPosition`, `SendQueueFull`,
    /// `FriendNotConnected`, `Io`, `TransportState`.
    pub fn serve_request(
        &self,
        session: &mut TransferSession,
        offset: u64,
        length: u64,
    ) -> Result<Option<Transition>> {
        if session.direction != Direction::Outgoing {
            return Err(TransferError::denied("chunk request for an incoming transfer"));
        }
        if session.state() != TransferState::Transferring {
            return Err(TransferError::NotTransferring(session.state()));
        }
        self.check_bounds(session, offset, length)?;

        // A matching request consumes the seek even when it lands on the cursor
        let seeked = session.take_seek(offset);
        if offset != session.cursor() && !seeked {
            return Err(TransferError::WrongPosition {
                expected: session.cursor(),
                actual: offset,
            });
        }

        if length == 0 {
            if session.cursor() == session.total_size {
                tracing::debug!(
                    "Friend confirmed end of transfer {} ({})",
                    session.handle,
                    session.transfer_id.short()
                );
                return Ok(Some(session.complete()));
            }
            return Err(TransferError::WrongPosition {
                expected: session.total_size,
                actual: offset,
            });
        }

        let Some(source) = session.source_mut() else {
            session.fail();
            return Err(TransferError::Io("outgoing transfer has no data source".into()));
        };

        #[allow(clippy::cast_possible_truncation)]
        let mut buf = vec![0u8; length as usize];
        if let Err(e) = source.read_at(offset, &mut buf) {
            tracing::warn!(
                "Reading {} bytes at {} for transfer {} failed: {}",
                length,
                offset,
                session.handle,
                e
            );
            session.fail();
            return Err(e.into());
        }

        match self
            .transport
            .send_chunk(&session.peer_id, &session.transfer_id, offset, &buf)
        {
            Ok(()) => {
                session.advance(length);
                tracing::trace!(
                    "Sent chunk at {} ({} bytes) for transfer {}, {}/{}",
                    offset,
                    length,
                    session.handle,
                    session.cursor(),
                    session.total_size
                );
                Ok(None)
            }
            Err(TransportError::WrongState) => {
                session.fail();
                Err(TransferError::from_transport(
                    TransportError::WrongState,
                    session.peer_id,
                ))
            }
            Err(e) => Err(TransferError::from_transport(e, session.peer_id)),
        }
    }

    /// Write a chunk delivered by the friend
    ///
    /// Chunks already in flight when a pause was issued are still accepted.
    /// Returns the completion transition once the cursor reaches the total
    /// size. Sink failures fail the session before the error is returned.
    ///
    /// # Errors
    ///
    /// `NotTransferring`, `InvalidLength`, `WrongPosition`, `Io`.
    pub fn accept_chunk(
        &self,
        session: &mut TransferSession,
        offset: u64,
        data: &[u8],
    ) -> Result<Option<Transition>> {
        if session.direction != Direction::Incoming {
            return Err(TransferError::denied("chunk payload for an outgoing transfer"));
        }
        if !session.is_active() {
            return Err(TransferError::NotTransferring(session.state()));
        }
        let length = data.len() as u64;
        self.check_bounds(session, offset, length)?;

        if offset != session.cursor() {
            return Err(TransferError::WrongPosition {
                expected: session.cursor(),
                actual: offset,
            });
        }

        if let Some(sink) = session.sink_mut() {
            if let Err(e) = sink.write_at(offset, data) {
                tracing::warn!(
                    "Writing {} bytes at {} for transfer {} failed: {}",
                    length,
                    offset,
                    session.handle,
                    e
                );
                session.fail();
                return Err(e.into());
            }
        }
        session.advance(length);

        tracing::trace!(
            "Received chunk at {} ({} bytes) for transfer {}, {}/{}",
            offset,
            length,
            session.handle,
            session.cursor(),
            session.total_size
        );

        if session.cursor() < session.total_size {
            return Ok(None);
        }

        if let Some(sink) = session.sink_mut() {
            if let Err(e) = sink.finish() {
                session.fail();
                return Err(e.into());
            }
        }
        Ok(Some(session.complete()))
    }

    fn check_bounds(&self, session: &TransferSession, offset: u64, length: u64) -> Result<()> {
        let fits = offset
            .checked_add(length)
            .is_some_and(|end| end <= session.total_size);
        if length > self.max_chunk_size as u64 || !fits {
            return Err(TransferError::InvalidLength {
                offset,
                length,
                total_size: session.total_size,
            });
        }
        Ok(())
    }
}
