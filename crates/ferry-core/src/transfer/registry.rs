//! Registry of live transfers
//!
//! The registry is the single owner of every [`TransferSession`], keyed by
//! `(peer, handle)`. It enforces the per-friend limits:
//! - at most `max_transfers_per_peer` live transfers per direction
//! - one live transfer per `(peer, direction, transfer_id)`
//! - handles are reused only after the previous holder left the registry
//!
//! Terminal transfers are removed by the caller as soon as they reach
//! `Completed`, `Cancelled` or `Failed`, which is what frees their slot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{Result, TransferError, TransferRef};
use crate::hash::TransferId;
use crate::io::DataSource;
use crate::transfer::session::{TransferMeta, TransferSession};
use crate::transfer::{Direction, PeerId, TransferHandle};
use crate::transport::Transport;

/// Live transfers of one friend, ordered by handle
#[derive(Default)]
struct PeerTransfers {
    transfers: BTreeMap<TransferHandle, TransferSession>,
}

impl PeerTransfers {
    fn count(&self, direction: Direction) -> usize {
        self.transfers
            .keys()
            .filter(|handle| handle.direction() == direction)
            .count()
    }

    fn free_slot(&self, direction: Direction, max: usize) -> Option<usize> {
        (0..max).find(|&slot| {
            !self
                .transfers
                .contains_key(&TransferHandle::from_slot(direction, slot))
        })
    }

    fn find(&self, direction: Direction, transfer_id: &TransferId) -> Option<TransferHandle> {
        self.transfers
            .values()
            .find(|t| t.direction == direction && t.transfer_id == *transfer_id)
            .map(|t| t.handle)
    }
}

/// Transfer registry for one node
///
/// Holds the transport to check friend connectivity before admitting a new
/// outgoing transfer.
pub struct TransferRegistry<T: Transport + ?Sized> {
    transport: Arc<T>,
    peers: HashMap<PeerId, PeerTransfers>,
    max_transfers_per_peer: usize,
}

impl<T: Transport + ?Sized> TransferRegistry<T> {
    /// Create an empty registry
    ///
    /// # Arguments
    ///
    /// * `transport` - Transport used for friend existence/connectivity checks
    /// * `max_transfers_per_peer` - Limit per friend and direction
    pub fn new(transport: Arc<T>, max_transfers_per_peer: usize) -> Self {
        Self {
            transport,
            peers: HashMap::new(),
            max_transfers_per_peer,
        }
    }

    /// Register a new outgoing transfer reading from `source`
    ///
    /// # Errors
    ///
    /// `FriendNotFound`, `FriendNotConnected`, `TooMany`, or `Denied` if the
    /// transfer id is already used by a live outgoing transfer to this friend.
    pub fn create_outgoing(
        &mut self,
        peer: PeerId,
        meta: TransferMeta,
        source: Box<dyn DataSource>,
    ) -> Result<TransferHandle> {
        let handle = self.allocate(peer, Direction::Outgoing, &meta.transfer_id)?;
        let session = TransferSession::new_outgoing(peer, handle, meta, source);
        self.insert(session);
        Ok(handle)
    }

    /// Register a transfer announced by a friend
    ///
    /// # Errors
    ///
    /// `FriendNotFound`, `TooMany`, or `Denied` for a duplicate transfer id.
    pub fn create_incoming(&mut self, peer: PeerId, meta: TransferMeta) -> Result<TransferHandle> {
        let handle = self.allocate(peer, Direction::Incoming, &meta.transfer_id)?;
        let session = TransferSession::new_incoming(peer, handle, meta);
        self.insert(session);
        Ok(handle)
    }

    fn allocate(
        &self,
        peer: PeerId,
        direction: Direction,
        transfer_id: &TransferId,
    ) -> Result<TransferHandle> {
        if !self.transport.friend_exists(&peer) {
            return Err(TransferError::FriendNotFound(peer));
        }
        if direction == Direction::Outgoing && !self.transport.is_connected(&peer) {
            return Err(TransferError::FriendNotConnected(peer));
        }

        let Some(transfers) = self.peers.get(&peer) else {
            return Ok(TransferHandle::from_slot(direction, 0));
        };

        if transfers.find(direction, transfer_id).is_some() {
            return Err(TransferError::denied("transfer id already in use"));
        }
        if transfers.count(direction) >= self.max_transfers_per_peer {
            return Err(TransferError::TooMany(self.max_transfers_per_peer));
        }

        transfers
            .free_slot(direction, self.max_transfers_per_peer)
            .map(|slot| TransferHandle::from_slot(direction, slot))
            .ok_or(TransferError::TooMany(self.max_transfers_per_peer))
    }

    fn insert(&mut self, session: TransferSession) {
        tracing::debug!(
            "Registered {:?} transfer {} in slot {} ({}) with {} ({} bytes)",
            session.direction,
            session.handle,
            session.handle.slot(),
            session.transfer_id.short(),
            hex::encode(&session.peer_id[..8]),
            session.total_size
        );
        self.peers
            .entry(session.peer_id)
            .or_default()
            .transfers
            .insert(session.handle, session);
    }

    /// Get transfer by handle
    ///
    /// # Errors
    ///
    /// `TransferNotFound` if no live transfer has this handle.
    pub fn lookup(&self, peer: &PeerId, handle: TransferHandle) -> Result<&TransferSession> {
        self.peers
            .get(peer)
            .and_then(|p| p.transfers.get(&handle))
            .ok_or(TransferError::TransferNotFound(TransferRef::Handle(handle)))
    }

    /// Get mutable transfer by handle
    ///
    /// # Errors
    ///
    /// `TransferNotFound` if no live transfer has this handle.
    pub fn lookup_mut(
        &mut self,
        peer: &PeerId,
        handle: TransferHandle,
    ) -> Result<&mut TransferSession> {
        self.peers
            .get_mut(peer)
            .and_then(|p| p.transfers.get_mut(&handle))
            .ok_or(TransferError::TransferNotFound(TransferRef::Handle(handle)))
    }

    /// Find the handle of a live transfer by its wire-level id
    ///
    /// # Errors
    ///
    /// `TransferNotFound` if no live transfer matches.
    pub fn find(
        &self,
        peer: &PeerId,
        direction: Direction,
        transfer_id: &TransferId,
    ) -> Result<TransferHandle> {
        self.peers
            .get(peer)
            .and_then(|p| p.find(direction, transfer_id))
            .ok_or(TransferError::TransferNotFound(TransferRef::Id(*transfer_id)))
    }

    /// Remove a transfer, freeing its handle
    pub fn remove(&mut self, peer: &PeerId, handle: TransferHandle) -> Option<TransferSession> {
        let transfers = self.peers.get_mut(peer)?;
        let removed = transfers.transfers.remove(&handle);
        if transfers.transfers.is_empty() {
            self.peers.remove(peer);
        }
        removed
    }

    /// Remove every transfer of a friend
    pub fn remove_peer(&mut self, peer: &PeerId) -> Vec<TransferSession> {
        self.peers
            .remove(peer)
            .map(|p| p.transfers.into_values().collect())
            .unwrap_or_default()
    }

    /// Handles of a friend's live transfers, ascending
    pub fn list_active(&self, peer: &PeerId) -> Vec<TransferHandle> {
        self.peers
            .get(peer)
            .map(|p| p.transfers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Get number of live transfers across all friends
    pub fn transfer_count(&self) -> usize {
        self.peers.values().map(|p| p.transfers.len()).sum()
    }

    /// Limit per friend and direction
    pub fn max_transfers_per_peer(&self) -> usize {
        self.max_transfers_per_peer
    }
}
