//! Event dispatch bridge and public transfer API
//!
//! [`FileTransfers`] owns the registry and the flow controller and is the
//! only entry point for both directions of traffic:
//!
//! ```text
//! local caller ── send / accept / control / seek ──┐
//!                                                  ▼
//!                                            FileTransfers ──► Observer(s)
//!                                                  ▲
//! Transport ── TransportEvent ── dispatch ─────────┘
//!     ▲                                            │
//!     └──────── send_control / send_chunk ─────────┘
//! ```
//!
//! Every call runs to completion on the caller's thread. Terminal transfers
//! are reported with a final `StateChanged` event and removed from the
//! registry before the call returns, so late transport events for them fail
//! with `TransferNotFound`.

use std::path::Path;
use std::sync::Arc;

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::event::{Observer, TransferEvent};
use crate::hash::TransferId;
use crate::io::{DataSink, DataSource, FileSource};
use crate::transfer::session::{TransferMeta, Transition};
use crate::transfer::{
    Direction, FileKind, FlowController, Filename, PeerId, TransferHandle, TransferInfo,
    TransferRegistry, TransferState,
};
use crate::transport::{Control, Transport};

/// Inbound network activity delivered by the transport
///
/// `direction` fields are already seen from the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A friend announced a new transfer towards us
    Announce {
        /// Announcing friend
        peer: PeerId,
        /// Wire-level id chosen by the friend
        transfer_id: TransferId,
        /// Kind tag
        kind: FileKind,
        /// Declared size
        total_size: u64,
        /// Display name
        filename: Filename,
    },
    /// Control message about an existing transfer
    Control {
        /// Sending friend
        peer: PeerId,
        /// Wire-level id
        transfer_id: TransferId,
        /// Direction of the transfer on our side
        direction: Direction,
        /// The message
        control: Control,
    },
    /// The friend asks for data of one of our outgoing transfers
    ChunkRequest {
        /// Requesting friend
        peer: PeerId,
        /// Wire-level id
        transfer_id: TransferId,
        /// Requested offset
        offset: u64,
        /// Requested length; zero marks the end of the transfer
        length: u64,
    },
    /// Data of one of our incoming transfers
    Chunk {
        /// Sending friend
        peer: PeerId,
        /// Wire-level id
        transfer_id: TransferId,
        /// Offset of the payload
        offset: u64,
        /// Payload
        data: Vec<u8>,
    },
    /// Friend connectivity changed
    PeerStatus {
        /// Friend
        peer: PeerId,
        /// Whether the friend is online now
        connected: bool,
    },
}

/// Local control request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileControl {
    /// Accept an incoming transfer or lift our pause
    Resume,
    /// Pause the transfer
    Pause,
    /// Cancel the transfer
    Cancel,
}

/// Description of a file to send
pub struct OutgoingFile {
    /// Kind tag
    pub kind: FileKind,
    /// Declared size
    pub total_size: u64,
    /// Wire-level id; a random one is generated when `None`
    pub transfer_id: Option<TransferId>,
    /// Display name
    pub filename: Filename,
    /// Where the bytes come from
    pub source: Box<dyn DataSource>,
}

impl OutgoingFile {
    /// Describe a data transfer of `total_size` bytes read from `source`
    pub fn new(filename: Filename, total_size: u64, source: impl DataSource + 'static) -> Self {
        Self {
            kind: FileKind::Data,
            total_size,
            transfer_id: None,
            filename,
            source: Box::new(source),
        }
    }

    /// Describe a file on disk, named after its last path component
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be opened, `NameTooLong` for an over-long name.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let filename = Filename::new(name)?;
        let source = FileSource::open(path)?;
        let total_size = source.len();
        Ok(Self::new(filename, total_size, source))
    }

    /// Set the kind tag
    #[must_use]
    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    /// Use a fixed transfer id, e.g. the content fingerprint
    #[must_use]
    pub fn with_transfer_id(mut self, transfer_id: TransferId) -> Self {
        self.transfer_id = Some(transfer_id);
        self
    }
}

/// File transfer service for one node
pub struct FileTransfers<T: Transport + ?Sized> {
    transport: Arc<T>,
    registry: TransferRegistry<T>,
    flow: FlowController<T>,
    observers: Vec<Box<dyn Observer>>,
    config: TransferConfig,
}

impl<T: Transport + ?Sized> FileTransfers<T> {
    /// Create a transfer service on top of `transport`
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(transport: Arc<T>, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: TransferRegistry::new(Arc::clone(&transport), config.max_transfers_per_peer),
            flow: FlowController::new(Arc::clone(&transport), config.max_chunk_size),
            transport,
            observers: Vec::new(),
            config,
        })
    }

    /// Register an observer for all subsequent events
    pub fn subscribe(&mut self, observer: impl Observer + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Active configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    // ============ Local API ============

    /// Start sending a file to a friend
    ///
    /// Registers the transfer as `Pending` and announces it. Data only flows
    /// once the friend accepts and starts requesting chunks.
    ///
    /// # Errors
    ///
    /// `FriendNotFound`, `FriendNotConnected`, `TooMany`, `Denied` for a
    /// transfer id already in use, `SendQueueFull` if the announcement could
    /// not be queued (nothing is registered in that case).
    pub fn send(&mut self, peer: PeerId, file: OutgoingFile) -> Result<TransferHandle> {
        let transfer_id = match file.transfer_id {
            Some(id) => id,
            None => TransferId::random()?,
        };
        let name = file.filename.to_string();
        let announce = Control::Announce {
            kind: file.kind,
            total_size: file.total_size,
            filename: file.filename.clone(),
        };
        let meta = TransferMeta {
            kind: file.kind,
            total_size: file.total_size,
            transfer_id,
            filename: file.filename,
        };
        let handle = self.registry.create_outgoing(peer, meta, file.source)?;

        if let Err(e) =
            self.transport
                .send_control(&peer, &transfer_id, Direction::Outgoing, &announce)
        {
            self.registry.remove(&peer, handle);
            return Err(TransferError::from_transport(e, peer));
        }

        tracing::info!(
            "Announced transfer {} ({}) to {}: {} ({} bytes)",
            handle,
            transfer_id.short(),
            hex::encode(&peer[..8]),
            name,
            file.total_size
        );
        self.emit_created(&peer, handle);
        Ok(handle)
    }

    /// Accept an incoming transfer, writing its data to `sink`
    ///
    /// # Errors
    ///
    /// `FriendNotFound`, `FriendNotConnected`, `TransferNotFound`, `Denied`
    /// if the transfer is outgoing or was already accepted, `SendQueueFull`.
    pub fn accept(
        &mut self,
        peer: PeerId,
        handle: TransferHandle,
        sink: Box<dyn DataSink>,
    ) -> Result<()> {
        self.check_friend(&peer)?;
        let session = self.registry.lookup(&peer, handle)?;
        if session.direction != Direction::Incoming || session.state() != TransferState::Pending {
            return Err(TransferError::denied("only a pending incoming transfer can be accepted"));
        }
        self.control(peer, handle, FileControl::Resume)?;
        self.registry.lookup_mut(&peer, handle)?.set_sink(sink);
        Ok(())
    }

    /// Pause, resume or cancel a transfer
    ///
    /// Resume on a pending incoming transfer accepts it without a sink; the
    /// data is then only reported through `ChunkReceived` events. Cancel is
    /// final even if the Cancel message cannot be delivered.
    ///
    /// # Errors
    ///
    /// `FriendNotFound`, `FriendNotConnected` (pause/resume),
    /// `TransferNotFound`, `AlreadyPaused`, `NotPaused`, `Denied`,
    /// `SendQueueFull` (nothing changes in that case).
    pub fn control(
        &mut self,
        peer: PeerId,
        handle: TransferHandle,
        action: FileControl,
    ) -> Result<()> {
        if action == FileControl::Cancel {
            return self.cancel(peer, handle);
        }
        self.check_friend(&peer)?;

        let session = self.registry.lookup_mut(&peer, handle)?;
        let checkpoint = session.checkpoint();
        let (transition, control) = match action {
            FileControl::Pause => (session.pause_local()?, Control::Pause),
            _ => (session.resume_local()?, Control::Resume),
        };

        if let Err(e) = self.transport.send_control(
            &peer,
            &session.transfer_id,
            session.direction,
            &control,
        ) {
            session.restore(checkpoint);
            return Err(TransferError::from_transport(e, peer));
        }

        tracing::debug!(
            "Local {} on transfer {}: {} -> {}",
            control.name(),
            handle,
            transition.previous,
            transition.state
        );
        self.apply(&peer, handle, transition);
        Ok(())
    }

    fn cancel(&mut self, peer: PeerId, handle: TransferHandle) -> Result<()> {
        if !self.transport.friend_exists(&peer) {
            return Err(TransferError::FriendNotFound(peer));
        }
        let session = self.registry.lookup_mut(&peer, handle)?;
        let transition = session.cancel()?;

        if let Err(e) = self.transport.send_control(
            &peer,
            &session.transfer_id,
            session.direction,
            &Control::Cancel,
        ) {
            tracing::debug!("Cancel for transfer {} not delivered: {}", handle, e);
        }

        tracing::info!("Cancelled transfer {} with {}", handle, hex::encode(&peer[..8]));
        self.apply(&peer, handle, transition);
        Ok(())
    }

    /// Restart an incoming transfer from `offset`
    ///
    /// Allowed before acceptance or while paused. The friend is told through
    /// a Seek message and will serve the next request from there.
    ///
    /// # Errors
    ///
    /// `FriendNotFound`, `FriendNotConnected`, `TransferNotFound`, `Denied`
    /// for outgoing transfers, `InvalidPosition`, `SendQueueFull`.
    pub fn seek(&mut self, peer: PeerId, handle: TransferHandle, offset: u64) -> Result<()> {
        self.check_friend(&peer)?;

        let session = self.registry.lookup_mut(&peer, handle)?;
        let checkpoint = session.checkpoint();
        session.seek_local(offset)?;

        if let Err(e) = self.transport.send_control(
            &peer,
            &session.transfer_id,
            session.direction,
            &Control::Seek(offset),
        ) {
            session.restore(checkpoint);
            return Err(TransferError::from_transport(e, peer));
        }

        tracing::debug!("Transfer {} will resume at offset {}", handle, offset);
        Ok(())
    }

    /// Wire-level id of a live transfer
    ///
    /// # Errors
    ///
    /// `TransferNotFound`.
    pub fn transfer_id(&self, peer: &PeerId, handle: TransferHandle) -> Result<TransferId> {
        Ok(self.registry.lookup(peer, handle)?.transfer_id)
    }

    /// Snapshot of a live transfer
    ///
    /// # Errors
    ///
    /// `TransferNotFound`.
    pub fn info(&self, peer: &PeerId, handle: TransferHandle) -> Result<TransferInfo> {
        Ok(self.registry.lookup(peer, handle)?.info())
    }

    /// Handles of a friend's live transfers, ascending
    pub fn list_active(&self, peer: &PeerId) -> Vec<TransferHandle> {
        self.registry.list_active(peer)
    }

    /// Number of live transfers across all friends
    pub fn transfer_count(&self) -> usize {
        self.registry.transfer_count()
    }

    // ============ Inbound Events ============

    /// Route one transport event to its handler
    ///
    /// # Errors
    ///
    /// Whatever the handler returns; the event has been fully processed (or
    /// rejected without side effects) either way.
    pub fn dispatch(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Announce {
                peer,
                transfer_id,
                kind,
                total_size,
                filename,
            } => self
                .on_announce(peer, transfer_id, kind, total_size, filename)
                .map(|_| ()),
            TransportEvent::Control {
                peer,
                transfer_id,
                direction,
                control,
            } => self.on_control(peer, transfer_id, direction, control),
            TransportEvent::ChunkRequest {
                peer,
                transfer_id,
                offset,
                length,
            } => self.on_chunk_request(peer, transfer_id, offset, length),
            TransportEvent::Chunk {
                peer,
                transfer_id,
                offset,
                data,
            } => self.on_chunk(peer, transfer_id, offset, &data),
            TransportEvent::PeerStatus { peer, connected } => {
                self.on_peer_status(peer, connected);
                Ok(())
            }
        }
    }

    /// Register a transfer announced by a friend as `Pending`
    ///
    /// # Errors
    ///
    /// `FriendNotFound`, `TooMany` (the friend is told with a Cancel),
    /// `Denied` for an id already used by a live incoming transfer.
    pub fn on_announce(
        &mut self,
        peer: PeerId,
        transfer_id: TransferId,
        kind: FileKind,
        total_size: u64,
        filename: Filename,
    ) -> Result<TransferHandle> {
        let meta = TransferMeta {
            kind,
            total_size,
            transfer_id,
            filename,
        };
        let handle = match self.registry.create_incoming(peer, meta) {
            Ok(handle) => handle,
            Err(e @ TransferError::TooMany(_)) => {
                tracing::warn!(
                    "Rejecting transfer {} from {}: {}",
                    transfer_id.short(),
                    hex::encode(&peer[..8]),
                    e
                );
                if let Err(send) = self.transport.send_control(
                    &peer,
                    &transfer_id,
                    Direction::Incoming,
                    &Control::Cancel,
                ) {
                    tracing::debug!(
                        "Cancel for rejected transfer {} not delivered: {}",
                        transfer_id.short(),
                        send
                    );
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Incoming transfer {} ({}) from {} ({} bytes)",
            handle,
            transfer_id.short(),
            hex::encode(&peer[..8]),
            total_size
        );
        self.emit_created(&peer, handle);
        Ok(handle)
    }

    /// Apply a control message from a friend
    ///
    /// # Errors
    ///
    /// `TransferNotFound` for unknown or already removed transfers, plus the
    /// state errors of the matching transition.
    pub fn on_control(
        &mut self,
        peer: PeerId,
        transfer_id: TransferId,
        direction: Direction,
        control: Control,
    ) -> Result<()> {
        if let Control::Announce {
            kind,
            total_size,
            filename,
        } = control
        {
            return self
                .on_announce(peer, transfer_id, kind, total_size, filename)
                .map(|_| ());
        }

        let handle = self.registry.find(&peer, direction, &transfer_id)?;
        let session = self.registry.lookup_mut(&peer, handle)?;
        let transition = match control {
            Control::Resume => session.resume_remote()?,
            Control::Pause => session.pause_remote()?,
            Control::Cancel => session.cancel()?,
            Control::Seek(offset) => {
                session.seek_remote(offset)?;
                tracing::debug!("Friend seeks transfer {} to offset {}", handle, offset);
                return Ok(());
            }
            Control::Announce { .. } => return Ok(()),
        };

        tracing::debug!(
            "Remote {} on transfer {}: {} -> {}",
            control.name(),
            handle,
            transition.previous,
            transition.state
        );
        self.apply(&peer, handle, transition);
        Ok(())
    }

    /// Serve a friend's chunk request for one of our outgoing transfers
    ///
    /// # Errors
    ///
    /// `TransferNotFound`, the flow errors of
    /// [`FlowController::serve_request`]. On `SendQueueFull` the caller may
    /// dispatch the same request again later.
    pub fn on_chunk_request(
        &mut self,
        peer: PeerId,
        transfer_id: TransferId,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        let handle = self.registry.find(&peer, Direction::Outgoing, &transfer_id)?;
        let session = self.registry.lookup_mut(&peer, handle)?;
        let previous = session.state();

        match self.flow.serve_request(session, offset, length) {
            Ok(completed) => {
                self.emit(TransferEvent::ChunkRequested {
                    peer,
                    handle,
                    offset,
                    length,
                });
                if let Some(transition) = completed {
                    self.apply(&peer, handle, transition);
                }
                Ok(())
            }
            Err(e) => {
                self.fail_if_fatal(&peer, handle, previous, &e);
                Err(e)
            }
        }
    }

    /// Accept a chunk of one of our incoming transfers
    ///
    /// # Errors
    ///
    /// `TransferNotFound`, the flow errors of
    /// [`FlowController::accept_chunk`].
    pub fn on_chunk(
        &mut self,
        peer: PeerId,
        transfer_id: TransferId,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let handle = self.registry.find(&peer, Direction::Incoming, &transfer_id)?;
        let session = self.registry.lookup_mut(&peer, handle)?;
        let previous = session.state();

        match self.flow.accept_chunk(session, offset, data) {
            Ok(completed) => {
                self.emit(TransferEvent::ChunkReceived {
                    peer,
                    handle,
                    offset,
                    data: data.to_vec(),
                });
                if let Some(transition) = completed {
                    self.apply(&peer, handle, transition);
                }
                Ok(())
            }
            Err(e) => {
                self.fail_if_fatal(&peer, handle, previous, &e);
                Err(e)
            }
        }
    }

    /// Track friend connectivity
    ///
    /// A friend going offline fails and removes all of its transfers; there is
    /// no automatic resumption when it comes back.
    pub fn on_peer_status(&mut self, peer: PeerId, connected: bool) {
        if connected {
            tracing::debug!("Friend {} online", hex::encode(&peer[..8]));
            return;
        }

        let sessions = self.registry.remove_peer(&peer);
        if !sessions.is_empty() {
            tracing::info!(
                "Friend {} went offline, failing {} transfer(s)",
                hex::encode(&peer[..8]),
                sessions.len()
            );
        }
        for mut session in sessions {
            let transition = session.fail();
            self.emit(TransferEvent::StateChanged {
                peer,
                handle: session.handle,
                previous: transition.previous,
                state: transition.state,
            });
        }
    }

    // ============ Internals ============

    fn check_friend(&self, peer: &PeerId) -> Result<()> {
        if !self.transport.friend_exists(peer) {
            return Err(TransferError::FriendNotFound(*peer));
        }
        if !self.transport.is_connected(peer) {
            return Err(TransferError::FriendNotConnected(*peer));
        }
        Ok(())
    }

    /// Report a transition and drop the transfer once it is terminal
    fn apply(&mut self, peer: &PeerId, handle: TransferHandle, transition: Transition) {
        if transition.changed() {
            self.emit(TransferEvent::StateChanged {
                peer: *peer,
                handle,
                previous: transition.previous,
                state: transition.state,
            });
        }
        if transition.state.is_terminal() {
            if let Some(session) = self.registry.remove(peer, handle) {
                if session.is_complete() {
                    tracing::info!(
                        "Transfer {} ({}) completed: {} bytes{}",
                        handle,
                        session.transfer_id.short(),
                        session.total_size,
                        session
                            .speed()
                            .map(|s| format!(" at {s:.0} B/s"))
                            .unwrap_or_default()
                    );
                }
            }
        }
    }

    fn fail_if_fatal(
        &mut self,
        peer: &PeerId,
        handle: TransferHandle,
        previous: TransferState,
        err: &TransferError,
    ) {
        if !err.is_fatal() {
            return;
        }
        tracing::warn!("Transfer {} failed: {}", handle, err);
        self.apply(
            peer,
            handle,
            Transition {
                previous,
                state: TransferState::Failed,
            },
        );
    }

    fn emit_created(&mut self, peer: &PeerId, handle: TransferHandle) {
        let Ok(session) = self.registry.lookup(peer, handle) else {
            return;
        };
        let event = TransferEvent::TransferCreated {
            peer: *peer,
            handle,
            direction: session.direction,
            kind: session.kind,
            total_size: session.total_size,
            transfer_id: session.transfer_id,
            filename: session.filename.clone(),
        };
        self.emit(event);
    }

    fn emit(&mut self, event: TransferEvent) {
        for observer in &mut self.observers {
            observer.on_event(&event);
        }
    }
}
