//! Contract with the secure peer transport.
//!
//! The transport owns handshakes, encryption, friend connectivity and packet
//! delivery. This layer only needs to ask whether a friend exists and is
//! online, and to push two kinds of messages to a friend: small control
//! messages and data chunks. Inbound traffic comes back as
//! [`TransportEvent`](crate::dispatch::TransportEvent)s.
//!
//! Messages are correlated on both ends by `(transfer_id, direction)`. The
//! `direction` argument is always the transfer's direction as seen by the
//! side that calls the method; a transport delivering the message flips it so
//! the receiver sees its own perspective.

use crate::error::TransportError;
use crate::hash::TransferId;
use crate::transfer::{Direction, FileKind, Filename, PeerId};

/// Control message carried on the reliable per-friend channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// A new outgoing transfer, sent by the data owner
    Announce {
        /// Kind tag
        kind: FileKind,
        /// Declared size
        total_size: u64,
        /// Display name
        filename: Filename,
    },
    /// Accept an announcement, or lift our pause
    Resume,
    /// Stop data for now
    Pause,
    /// Abort the transfer for good
    Cancel,
    /// Receiver restarts from this offset (sent before accepting or while paused)
    Seek(u64),
}

impl Control {
    /// Short name for log lines
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Control::Announce { .. } => "announce",
            Control::Resume => "resume",
            Control::Pause => "pause",
            Control::Cancel => "cancel",
            Control::Seek(_) => "seek",
        }
    }
}

/// Transport adapter consumed by the transfer layer
///
/// Implementations are called from the owning thread only and must not
/// block; a full outbound queue is reported as
/// [`TransportError::SendQueueFull`] rather than waited out.
pub trait Transport {
    /// Whether the friend is known at all
    fn friend_exists(&self, peer: &PeerId) -> bool;

    /// Whether the friend is currently online
    fn is_connected(&self, peer: &PeerId) -> bool;

    /// Send a control message about one transfer
    ///
    /// # Errors
    ///
    /// `SendQueueFull` or `PeerNotConnected`.
    fn send_control(
        &self,
        peer: &PeerId,
        transfer_id: &TransferId,
        direction: Direction,
        control: &Control,
    ) -> Result<(), TransportError>;

    /// Send one data chunk of an outgoing transfer
    ///
    /// # Errors
    ///
    /// `SendQueueFull`, `PeerNotConnected`, or `WrongState` if the transport
    /// has no matching transfer able to carry data.
    fn send_chunk(
        &self,
        peer: &PeerId,
        transfer_id: &TransferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;

    /// Records everything sent; friends are online unless told otherwise
    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub known: RefCell<HashSet<PeerId>>,
        pub offline: RefCell<HashSet<PeerId>>,
        pub controls: RefCell<Vec<(PeerId, TransferId, Direction, Control)>>,
        pub chunks: RefCell<Vec<(PeerId, TransferId, u64, Vec<u8>)>>,
        pub queue_full: Cell<bool>,
        pub wrong_state: Cell<bool>,
    }

    impl MockTransport {
        pub(crate) fn with_friends(friends: &[PeerId]) -> Self {
            let mock = Self::default();
            mock.known.borrow_mut().extend(friends.iter().copied());
            mock
        }

        pub(crate) fn set_online(&self, peer: PeerId, online: bool) {
            if online {
                self.offline.borrow_mut().remove(&peer);
            } else {
                self.offline.borrow_mut().insert(peer);
            }
        }

        pub(crate) fn last_control(&self) -> Option<Control> {
            self.controls.borrow().last().map(|(_, _, _, c)| c.clone())
        }

        pub(crate) fn sent_bytes(&self) -> Vec<u8> {
            self.chunks
                .borrow()
                .iter()
                .flat_map(|(_, _, _, data)| data.iter().copied())
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn friend_exists(&self, peer: &PeerId) -> bool {
            self.known.borrow().contains(peer)
        }

        fn is_connected(&self, peer: &PeerId) -> bool {
            self.friend_exists(peer) && !self.offline.borrow().contains(peer)
        }

        fn send_control(
            &self,
            peer: &PeerId,
            transfer_id: &TransferId,
            direction: Direction,
            control: &Control,
        ) -> Result<(), TransportError> {
            if !self.is_connected(peer) {
                return Err(TransportError::PeerNotConnected);
            }
            if self.queue_full.get() {
                return Err(TransportError::SendQueueFull);
            }
            self.controls
                .borrow_mut()
                .push((*peer, *transfer_id, direction, control.clone()));
            Ok(())
        }

        fn send_chunk(
            &self,
            peer: &PeerId,
            transfer_id: &TransferId,
            offset: u64,
            data: &[u8],
        ) -> Result<(), TransportError> {
            if !self.is_connected(peer) {
                return Err(TransportError::PeerNotConnected);
            }
            if self.queue_full.get() {
                return Err(TransportError::SendQueueFull);
            }
            if self.wrong_state.get() {
                return Err(TransportError::WrongState);
            }
            self.chunks
                .borrow_mut()
                .push((*peer, *transfer_id, offset, data.to_vec()));
            Ok(())
        }
    }
}
