//! File transfer layer.
//!
//! Per-transfer state machine, the per-friend registry of live transfers,
//! and the receiver-driven flow controller.

pub mod flow;
pub mod registry;
pub mod session;

use std::fmt;

use crate::MAX_FILENAME_LENGTH;
use crate::error::{Result, TransferError};
use crate::hash::TransferId;

pub use flow::FlowController;
pub use registry::TransferRegistry;
pub use session::{TransferSession, Transition};

/// Friend identifier (32-byte public key)
pub type PeerId = [u8; 32];

/// Local handle of a transfer, unique per friend among live transfers
///
/// Outgoing transfers use slot numbers directly; incoming transfers use
/// `(slot + 1) << 16`, so both directions share one key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferHandle(u32);

impl TransferHandle {
    /// Wrap a raw handle value
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw handle value
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn from_slot(direction: Direction, slot: usize) -> Self {
        match direction {
            Direction::Outgoing => Self(slot as u32),
            Direction::Incoming => Self(((slot as u32) + 1) << 16),
        }
    }

    /// Direction encoded in the handle
    #[must_use]
    pub fn direction(self) -> Direction {
        if self.0 >= 1 << 16 {
            Direction::Incoming
        } else {
            Direction::Outgoing
        }
    }

    /// Slot index within the handle's direction
    #[must_use]
    pub fn slot(self) -> usize {
        match self.direction() {
            Direction::Outgoing => self.0 as usize,
            Direction::Incoming => ((self.0 >> 16) - 1) as usize,
        }
    }
}

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transfer direction, from the local point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We are sending
    Outgoing,
    /// We are receiving
    Incoming,
}

impl Direction {
    /// Same transfer seen from the other peer
    #[must_use]
    pub fn flip(self) -> Self {
        match self {
            Self::Outgoing => Self::Incoming,
            Self::Incoming => Self::Outgoing,
        }
    }
}

/// Semantic tag of a transfer; propagated to observers, no behavior attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Arbitrary file data
    Data,
    /// Friend avatar image; the transfer id is the image fingerprint
    Avatar,
}

/// Transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Announced, waiting for the receiver to accept
    Pending,
    /// Data is moving
    Transferring,
    /// Paused by this side
    PausedLocal,
    /// Paused by the friend
    PausedRemote,
    /// All bytes delivered
    Completed,
    /// Cancelled by either side
    Cancelled,
    /// Unrecoverable local or transport failure
    Failed,
}

impl TransferState {
    /// Completed, Cancelled or Failed
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Cancelled | TransferState::Failed
        )
    }

    /// Paused by either side
    #[must_use]
    pub fn is_paused(self) -> bool {
        matches!(self, TransferState::PausedLocal | TransferState::PausedRemote)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Transferring => write!(f, "Transferring"),
            Self::PausedLocal => write!(f, "PausedLocal"),
            Self::PausedRemote => write!(f, "PausedRemote"),
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Display name of a transfer, at most [`MAX_FILENAME_LENGTH`] bytes of UTF-8
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Filename(String);

impl Filename {
    /// Validate and wrap a filename
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NameTooLong`] if the name exceeds the limit.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_FILENAME_LENGTH {
            return Err(TransferError::NameTooLong(name.len()));
        }
        Ok(Self(name))
    }

    /// Build a filename from bytes received from a friend
    ///
    /// Over-long names are cut at a character boundary and invalid UTF-8 is
    /// replaced, since the announcement itself must not be rejected for it.
    #[must_use]
    pub fn from_wire(bytes: &[u8]) -> Self {
        let mut name = String::from_utf8_lossy(bytes).into_owned();
        if name.len() > MAX_FILENAME_LENGTH {
            let mut cut = MAX_FILENAME_LENGTH;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        Self(name)
    }

    /// The name as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only snapshot of a live transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferInfo {
    /// Friend on the other end
    pub peer_id: PeerId,
    /// Local handle
    pub handle: TransferHandle,
    /// Direction
    pub direction: Direction,
    /// Kind tag
    pub kind: FileKind,
    /// Wire-level id
    pub transfer_id: TransferId,
    /// Display name
    pub filename: Filename,
    /// Declared size
    pub total_size: u64,
    /// Next byte to send or expected
    pub cursor: u64,
    /// Current state
    pub state: TransferState,
    /// Progress (0.0 to 1.0)
    pub progress: f64,
}
