//! Transfer session state machine.
//!
//! One [`TransferSession`] tracks a single directional byte stream between
//! this node and a friend. The methods here only validate and apply state
//! transitions; sending the matching control messages is left to the caller
//! so the machine stays testable without a transport.
//!
//! ```text
//!             accept / remote Resume
//!   Pending ───────────────────────────► Transferring ◄──────────┐
//!      │                                  │        │              │
//!      │                      local Pause │        │ remote Pause │ Resume
//!      │                                  ▼        ▼              │
//!      │                         PausedLocal      PausedRemote ───┘
//!      │
//!      └──► Cancelled / Failed (from any non-terminal state)
//!
//!   Transferring ──(cursor == total_size)──► Completed
//! ```

use std::time::Instant;

use crate::error::{Result, TransferError};
use crate::hash::TransferId;
use crate::io::{DataSink, DataSource};
use crate::transfer::{
    Direction, FileKind, Filename, PeerId, TransferHandle, TransferInfo, TransferState,
};

/// Descriptive fields shared by both directions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMeta {
    /// Kind tag
    pub kind: FileKind,
    /// Declared size in bytes
    pub total_size: u64,
    /// Wire-level id
    pub transfer_id: TransferId,
    /// Display name
    pub filename: Filename,
}

/// Result of applying an event to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the event
    pub previous: TransferState,
    /// State after the event
    pub state: TransferState,
}

impl Transition {
    /// Whether the visible state changed
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous != self.state
    }
}

/// Local state captured before a transition whose control message may still
/// be refused by the transport
#[derive(Debug, Clone, Copy)]
pub(crate) struct Checkpoint {
    state: TransferState,
    cursor: u64,
    remote_hold: bool,
}

/// Transfer session
///
/// Owns the transfer's position and state plus the local end of the data:
/// a [`DataSource`] for outgoing transfers and an optional [`DataSink`] for
/// incoming ones.
pub struct TransferSession {
    /// Friend on the other end
    pub peer_id: PeerId,
    /// Local handle
    pub handle: TransferHandle,
    /// Transfer direction
    pub direction: Direction,
    /// Kind tag
    pub kind: FileKind,
    /// Wire-level id
    pub transfer_id: TransferId,
    /// Display name
    pub filename: Filename,
    /// Declared size in bytes
    pub total_size: u64,

    /// Current state
    state: TransferState,
    /// Next byte to send (outgoing) or expected (incoming)
    cursor: u64,
    /// Offset the receiver asked to restart from, validated on arrival
    pending_seek: Option<u64>,
    /// Friend paused as well while we hold `PausedLocal`
    remote_hold: bool,

    source: Option<Box<dyn DataSource>>,
    sink: Option<Box<dyn DataSink>>,

    /// Bytes moved since creation (excludes skipped seek ranges)
    bytes_transferred: u64,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
}

impl TransferSession {
    /// Create a new outgoing session reading from `source`
    #[must_use]
    pub fn new_outgoing(
        peer_id: PeerId,
        handle: TransferHandle,
        meta: TransferMeta,
        source: Box<dyn DataSource>,
    ) -> Self {
        Self::new(peer_id, handle, Direction::Outgoing, meta, Some(source))
    }

    /// Create a new incoming session from a friend's announcement
    #[must_use]
    pub fn new_incoming(peer_id: PeerId, handle: TransferHandle, meta: TransferMeta) -> Self {
        Self::new(peer_id, handle, Direction::Incoming, meta, None)
    }

    fn new(
        peer_id: PeerId,
        handle: TransferHandle,
        direction: Direction,
        meta: TransferMeta,
        source: Option<Box<dyn DataSource>>,
    ) -> Self {
        Self {
            peer_id,
            handle,
            direction,
            kind: meta.kind,
            transfer_id: meta.transfer_id,
            filename: meta.filename,
            total_size: meta.total_size,
            state: TransferState::Pending,
            cursor: 0,
            pending_seek: None,
            remote_hold: false,
            source,
            sink: None,
            bytes_transferred: 0,
            started_at: None,
            completed_at: None,
        }
    }

    // ============ Accessors ============

    /// Get current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Next byte to send or expected
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Pending seek offset on an outgoing transfer
    #[must_use]
    pub fn pending_seek(&self) -> Option<u64> {
        self.pending_seek
    }

    /// Get bytes transferred
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Get transfer progress (0.0 to 1.0)
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return if self.state == TransferState::Completed {
                1.0
            } else {
                0.0
            };
        }
        self.cursor as f64 / self.total_size as f64
    }

    /// Get transfer speed in bytes/sec
    #[must_use]
    pub fn speed(&self) -> Option<f64> {
        self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Instant::now);
            let elapsed = end.duration_since(start).as_secs_f64();
            if elapsed > 0.0 {
                self.bytes_transferred as f64 / elapsed
            } else {
                0.0
            }
        })
    }

    /// Check if transfer is complete
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == TransferState::Completed
    }

    /// Check if transfer is moving data or paused mid-stream
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransferState::Transferring || self.state.is_paused()
    }

    /// Whether an incoming transfer has a sink attached
    #[must_use]
    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Snapshot for observers and callers
    #[must_use]
    pub fn info(&self) -> TransferInfo {
        TransferInfo {
            peer_id: self.peer_id,
            handle: self.handle,
            direction: self.direction,
            kind: self.kind,
            transfer_id: self.transfer_id,
            filename: self.filename.clone(),
            total_size: self.total_size,
            cursor: self.cursor,
            state: self.state,
            progress: self.progress(),
        }
    }

    // ============ Local Controls ============

    /// Pause on behalf of the local user
    ///
    /// # Errors
    ///
    /// `AlreadyPaused` if either side holds a pause, `Denied` before the
    /// transfer was accepted.
    pub fn pause_local(&mut self) -> Result<Transition> {
        match self.state {
            TransferState::Transferring => Ok(self.set_state(TransferState::PausedLocal)),
            TransferState::PausedLocal | TransferState::PausedRemote => {
                Err(TransferError::AlreadyPaused)
            }
            TransferState::Pending => Err(TransferError::denied("transfer not accepted yet")),
            state => Err(TransferError::NotTransferring(state)),
        }
    }

    /// Resume on behalf of the local user
    ///
    /// On a pending incoming transfer this is the acceptance of the
    /// announcement. If the friend paused while we were paused, the transfer
    /// drops back to `PausedRemote` instead of `Transferring`.
    ///
    /// # Errors
    ///
    /// `NotPaused` while transferring, `Denied` when only the friend may
    /// resume (their pause, or our own unaccepted outgoing announcement).
    pub fn resume_local(&mut self) -> Result<Transition> {
        match (self.state, self.direction) {
            (TransferState::Pending, Direction::Incoming) => {
                Ok(self.set_state(TransferState::Transferring))
            }
            (TransferState::Pending, Direction::Outgoing) => {
                Err(TransferError::denied("friend has not accepted the transfer"))
            }
            (TransferState::PausedLocal, _) => {
                if self.remote_hold {
                    self.remote_hold = false;
                    Ok(self.set_state(TransferState::PausedRemote))
                } else {
                    Ok(self.set_state(TransferState::Transferring))
                }
            }
            (TransferState::PausedRemote, _) => {
                Err(TransferError::denied("transfer paused by friend"))
            }
            (TransferState::Transferring, _) => Err(TransferError::NotPaused),
            (state, _) => Err(TransferError::NotTransferring(state)),
        }
    }

    /// Restart an incoming transfer from `offset`
    ///
    /// Only possible before acceptance or while paused; moves the cursor so
    /// the next chunk is expected at `offset`.
    ///
    /// # Errors
    ///
    /// `Denied` on outgoing transfers, `InvalidPosition` past the end or
    /// while data is moving.
    pub fn seek_local(&mut self, offset: u64) -> Result<()> {
        if self.direction == Direction::Outgoing {
            return Err(TransferError::denied("only the receiver can seek"));
        }
        self.check_seek(offset)?;
        self.cursor = offset;
        Ok(())
    }

    // ============ Remote Controls ============

    /// Apply a pause received from the friend
    ///
    /// # Errors
    ///
    /// `AlreadyPaused` if the friend already holds a pause, `Denied` before
    /// acceptance.
    pub fn pause_remote(&mut self) -> Result<Transition> {
        match self.state {
            TransferState::Transferring => Ok(self.set_state(TransferState::PausedRemote)),
            TransferState::PausedLocal if !self.remote_hold => {
                self.remote_hold = true;
                Ok(self.unchanged())
            }
            TransferState::PausedLocal | TransferState::PausedRemote => {
                Err(TransferError::AlreadyPaused)
            }
            TransferState::Pending => Err(TransferError::denied("transfer not accepted yet")),
            state => Err(TransferError::NotTransferring(state)),
        }
    }

    /// Apply a resume received from the friend
    ///
    /// On a pending outgoing transfer this is the friend's acceptance.
    ///
    /// # Errors
    ///
    /// `NotPaused` if the friend holds no pause, `Denied` for a resume of our
    /// own pending incoming transfer.
    pub fn resume_remote(&mut self) -> Result<Transition> {
        match (self.state, self.direction) {
            (TransferState::Pending, Direction::Outgoing) => {
                Ok(self.set_state(TransferState::Transferring))
            }
            (TransferState::Pending, Direction::Incoming) => {
                Err(TransferError::denied("sender cannot accept its own transfer"))
            }
            (TransferState::PausedRemote, _) => Ok(self.set_state(TransferState::Transferring)),
            (TransferState::PausedLocal, _) if self.remote_hold => {
                self.remote_hold = false;
                Ok(self.unchanged())
            }
            (state, _) if state.is_terminal() => Err(TransferError::NotTransferring(state)),
            _ => Err(TransferError::NotPaused),
        }
    }

    /// Validate a seek received from the receiver of an outgoing transfer
    ///
    /// The offset becomes the one out-of-order chunk request the flow
    /// controller will honor.
    ///
    /// # Errors
    ///
    /// `Denied` on incoming transfers, `InvalidPosition` past the end or
    /// while data is moving.
    pub fn seek_remote(&mut self, offset: u64) -> Result<()> {
        if self.direction == Direction::Incoming {
            return Err(TransferError::denied("only the receiver can seek"));
        }
        self.check_seek(offset)?;
        self.pending_seek = Some(offset);
        Ok(())
    }

    // ============ Terminal Transitions ============

    /// Cancel from either side
    ///
    /// # Errors
    ///
    /// `NotTransferring` if the transfer already ended.
    pub fn cancel(&mut self) -> Result<Transition> {
        if self.state.is_terminal() {
            return Err(TransferError::NotTransferring(self.state));
        }
        Ok(self.set_state(TransferState::Cancelled))
    }

    /// Mark transfer as failed
    pub fn fail(&mut self) -> Transition {
        if self.state.is_terminal() {
            return self.unchanged();
        }
        self.set_state(TransferState::Failed)
    }

    /// Mark transfer as completed once every byte is accounted for
    pub(crate) fn complete(&mut self) -> Transition {
        debug_assert_eq!(self.cursor, self.total_size);
        self.completed_at = Some(Instant::now());
        self.set_state(TransferState::Completed)
    }

    // ============ Flow Bookkeeping ============

    /// Take the one-shot seek offset if it matches `offset`
    pub(crate) fn take_seek(&mut self, offset: u64) -> bool {
        if self.pending_seek == Some(offset) {
            self.pending_seek = None;
            self.cursor = offset;
            true
        } else {
            false
        }
    }

    /// Record `len` bytes moved at the cursor
    pub(crate) fn advance(&mut self, len: u64) {
        self.cursor += len;
        self.bytes_transferred += len;
        debug_assert!(self.cursor <= self.total_size);
    }

    pub(crate) fn source_mut(&mut self) -> Option<&mut (dyn DataSource + 'static)> {
        self.source.as_deref_mut()
    }

    pub(crate) fn sink_mut(&mut self) -> Option<&mut (dyn DataSink + 'static)> {
        self.sink.as_deref_mut()
    }

    /// Attach the local destination of an incoming transfer
    pub fn set_sink(&mut self, sink: Box<dyn DataSink>) {
        self.sink = Some(sink);
    }

    /// Take back the sink, e.g. to read what was written
    pub fn take_sink(&mut self) -> Option<Box<dyn DataSink>> {
        self.sink.take()
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state: self.state,
            cursor: self.cursor,
            remote_hold: self.remote_hold,
        }
    }

    /// Undo a local transition the friend never heard about
    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        self.state = checkpoint.state;
        self.cursor = checkpoint.cursor;
        self.remote_hold = checkpoint.remote_hold;
    }

    // ============ Internals ============

    fn check_seek(&self, offset: u64) -> Result<()> {
        let seekable = matches!(
            self.state,
            TransferState::Pending | TransferState::PausedLocal | TransferState::PausedRemote
        );
        if !seekable || offset > self.total_size {
            return Err(TransferError::InvalidPosition {
                position: offset,
                total_size: self.total_size,
            });
        }
        Ok(())
    }

    fn set_state(&mut self, state: TransferState) -> Transition {
        let previous = self.state;
        self.state = state;
        if state == TransferState::Transferring && self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        Transition { previous, state }
    }

    fn unchanged(&self) -> Transition {
        Transition {
            previous: self.state,
            state: self.state,
        }
    }
}
