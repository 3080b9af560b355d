//! In-process transport connecting two peers
//!
//! [`LoopbackNetwork`] plays the part of the external transport for tests,
//! benches and the CLI demo. Like a real friend-to-friend transport core it:
//!
//! - delivers control messages in order, flipping their direction
//! - tracks each announced stream and generates the receiver's chunk
//!   requests itself, one outstanding request at a time, followed by the
//!   zero-length end-of-transfer request and an empty final chunk
//! - stops requesting while either side holds a pause and restarts from a
//!   seek offset
//! - reports a full per-peer inbox as [`TransportError::SendQueueFull`]
//! - drops every stream when the link goes down
//!
//! Nothing runs in the background: each endpoint collects its pending
//! [`TransportEvent`]s with [`LoopbackTransport::poll`] and feeds them to its
//! own [`FileTransfers`](crate::FileTransfers).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::MAX_CHUNK_SIZE;
use crate::dispatch::TransportEvent;
use crate::error::TransportError;
use crate::hash::TransferId;
use crate::transfer::{Direction, Filename, PeerId};
use crate::transport::{Control, Transport};

/// Transport-side view of one announced transfer
#[derive(Debug)]
struct Stream {
    receiver: PeerId,
    total_size: u64,
    /// Offset of the next request
    next: u64,
    accepted: bool,
    sender_paused: bool,
    receiver_paused: bool,
    /// A request was issued and not yet answered with a chunk
    awaiting: bool,
}

impl Stream {
    fn wants_data(&self) -> bool {
        self.accepted && !self.sender_paused && !self.receiver_paused && !self.awaiting
    }
}

#[derive(Debug)]
struct Link {
    online: bool,
    chunk_size: u64,
    queue_limit: usize,
    inbox: HashMap<PeerId, VecDeque<TransportEvent>>,
    /// Keyed by (sender, transfer id)
    streams: BTreeMap<(PeerId, TransferId), Stream>,
}

impl Link {
    fn push(&mut self, to: PeerId, event: TransportEvent) -> Result<(), TransportError> {
        let inbox = self.inbox.entry(to).or_default();
        if inbox.len() >= self.queue_limit {
            return Err(TransportError::SendQueueFull);
        }
        inbox.push_back(event);
        Ok(())
    }

    /// Chunk requests owed to `sender`, ordered by transfer id
    fn requests_for(&mut self, sender: &PeerId) -> Vec<TransportEvent> {
        let chunk_size = self.chunk_size;
        let mut requests = Vec::new();
        let mut finished = Vec::new();

        for ((from, transfer_id), stream) in &mut self.streams {
            if from != sender || !stream.wants_data() {
                continue;
            }
            let length = (stream.total_size - stream.next).min(chunk_size);
            if length == 0 {
                finished.push((*transfer_id, stream.receiver, stream.total_size));
            } else {
                stream.awaiting = true;
            }
            requests.push(TransportEvent::ChunkRequest {
                peer: stream.receiver,
                transfer_id: *transfer_id,
                offset: stream.next,
                length,
            });
        }

        // The receiver learns about the end through an empty chunk
        for (transfer_id, receiver, total_size) in finished {
            self.streams.remove(&(*sender, transfer_id));
            self.inbox
                .entry(receiver)
                .or_default()
                .push_back(TransportEvent::Chunk {
                    peer: *sender,
                    transfer_id,
                    offset: total_size,
                    data: Vec::new(),
                });
        }
        requests
    }
}

/// A pair of peers joined by an in-memory link
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    link: Arc<Mutex<Link>>,
    a: PeerId,
    b: PeerId,
}

impl LoopbackNetwork {
    /// Link peers `a` and `b`; the link starts online
    pub fn new(a: PeerId, b: PeerId) -> Self {
        Self {
            link: Arc::new(Mutex::new(Link {
                online: true,
                chunk_size: MAX_CHUNK_SIZE as u64,
                queue_limit: usize::MAX,
                inbox: HashMap::new(),
                streams: BTreeMap::new(),
            })),
            a,
            b,
        }
    }

    /// Set the length of generated chunk requests
    #[must_use]
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        self.lock().chunk_size = chunk_size.max(1) as u64;
        self
    }

    /// Bound each peer's inbox; sends beyond it fail with `SendQueueFull`
    #[must_use]
    pub fn with_queue_limit(self, queue_limit: usize) -> Self {
        self.lock().queue_limit = queue_limit;
        self
    }

    /// Transports for `a` and `b`, in that order
    pub fn endpoints(&self) -> (Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
        (
            Arc::new(LoopbackTransport {
                link: Arc::clone(&self.link),
                local: self.a,
                remote: self.b,
            }),
            Arc::new(LoopbackTransport {
                link: Arc::clone(&self.link),
                local: self.b,
                remote: self.a,
            }),
        )
    }

    /// Bring the link up or down
    ///
    /// Both peers get a `PeerStatus` event. Going down discards undelivered
    /// traffic and forgets every stream.
    pub fn set_online(&self, online: bool) {
        let mut link = self.lock();
        if link.online == online {
            return;
        }
        link.online = online;
        if !online {
            link.inbox.clear();
            link.streams.clear();
        }
        tracing::debug!("Loopback link {}", if online { "up" } else { "down" });

        for (to, peer) in [(self.a, self.b), (self.b, self.a)] {
            link.inbox
                .entry(to)
                .or_default()
                .push_back(TransportEvent::PeerStatus {
                    peer,
                    connected: online,
                });
        }
    }

    /// Whether the link is up
    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Whether neither peer has anything left to poll
    pub fn is_idle(&self) -> bool {
        let link = self.lock();
        link.inbox.values().all(VecDeque::is_empty)
            && (!link.online || !link.streams.values().any(Stream::wants_data))
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One peer's end of a [`LoopbackNetwork`]
#[derive(Debug)]
pub struct LoopbackTransport {
    link: Arc<Mutex<Link>>,
    local: PeerId,
    remote: PeerId,
}

impl LoopbackTransport {
    /// Id of this endpoint's peer
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Id of the peer on the other end
    pub fn remote(&self) -> PeerId {
        self.remote
    }

    /// Take everything delivered to this peer
    ///
    /// Queued messages come first, then the chunk requests the transport
    /// generated for this peer's outgoing streams.
    pub fn poll(&self) -> Vec<TransportEvent> {
        let mut link = self.lock();
        let mut events: Vec<TransportEvent> = link
            .inbox
            .get_mut(&self.local)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default();
        if link.online {
            events.extend(link.requests_for(&self.local));
        }
        events
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for LoopbackTransport {
    fn friend_exists(&self, peer: &PeerId) -> bool {
        *peer == self.remote
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        self.friend_exists(peer) && self.lock().online
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
        let mut link = self.lock();

        let event = match control {
            Control::Announce {
                kind,
                total_size,
                filename,
            } => TransportEvent::Announce {
                peer: self.local,
                transfer_id: *transfer_id,
                kind: *kind,
                total_size: *total_size,
                filename: Filename::from_wire(filename.as_str().as_bytes()),
            },
            _ => TransportEvent::Control {
                peer: self.local,
                transfer_id: *transfer_id,
                direction: direction.flip(),
                control: control.clone(),
            },
        };
        link.push(*peer, event)?;

        let from_sender = direction == Direction::Outgoing;
        let sender = if from_sender { self.local } else { *peer };
        let key = (sender, *transfer_id);

        if let Control::Announce { total_size, .. } = control {
            link.streams.insert(
                key,
                Stream {
                    receiver: *peer,
                    total_size: *total_size,
                    next: 0,
                    accepted: false,
                    sender_paused: false,
                    receiver_paused: false,
                    awaiting: false,
                },
            );
            return Ok(());
        }
        if *control == Control::Cancel {
            link.streams.remove(&key);
            return Ok(());
        }

        let Some(stream) = link.streams.get_mut(&key) else {
            return Ok(());
        };
        // An unanswered request does not survive a pause or seek
        stream.awaiting = false;
        match (control, from_sender) {
            (Control::Resume, false) if !stream.accepted => stream.accepted = true,
            (Control::Resume, false) => stream.receiver_paused = false,
            (Control::Resume, true) => stream.sender_paused = false,
            (Control::Pause, false) => stream.receiver_paused = true,
            (Control::Pause, true) => stream.sender_paused = true,
            (Control::Seek(offset), false) => stream.next = (*offset).min(stream.total_size),
            _ => {}
        }
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
        let mut link = self.lock();

        let key = (self.local, *transfer_id);
        match link.streams.get(&key) {
            Some(stream) if stream.accepted && stream.receiver == *peer => {}
            _ => return Err(TransportError::WrongState),
        }

        link.push(
            *peer,
            TransportEvent::Chunk {
                peer: self.local,
                transfer_id: *transfer_id,
                offset,
                data: data.to_vec(),
            },
        )?;

        if let Some(stream) = link.streams.get_mut(&key) {
            stream.next = offset + data.len() as u64;
            stream.awaiting = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{FileKind, Filename};

    const A: PeerId = [0xaa; 32];
    const B: PeerId = [0xbb; 32];

    fn id() -> TransferId {
        TransferId::from_bytes([1u8; 32])
    }

    fn announce(total_size: u64) -> Control {
        Control::Announce {
            kind: FileKind::Data,
            total_size,
            filename: Filename::new("f").unwrap(),
        }
    }

    #[test]
    fn test_friend_queries() {
        let net = LoopbackNetwork::new(A, B);
        let (a, b) = net.endpoints();
        assert!(a.friend_exists(&B));
        assert!(!a.friend_exists(&A));
        assert!(b.is_connected(&A));
        assert_eq!(a.local(), A);
        assert_eq!(a.remote(), B);

        net.set_online(false);
        assert!(!b.is_connected(&A));
        assert!(!net.is_online());
    }

    #[test]
    fn test_control_direction_is_flipped() {
        let net = LoopbackNetwork::new(A, B);
        let (a, b) = net.endpoints();
        a.send_control(&B, &id(), Direction::Outgoing, &announce(10))
            .unwrap();
        b.send_control(&A, &id(), Direction::Incoming, &Control::Pause)
            .unwrap();

        assert!(matches!(
            b.poll().as_slice(),
            [TransportEvent::Announce { total_size: 10, .. }]
        ));
        assert_eq!(
            a.poll(),
            vec![TransportEvent::Control {
                peer: B,
                transfer_id: id(),
                direction: Direction::Outgoing,
                control: Control::Pause,
            }]
        );
    }

    #[test]
    fn test_requests_follow_acceptance_and_chunks() {
        let net = LoopbackNetwork::new(A, B).with_chunk_size(4);
        let (a, b) = net.endpoints();
        a.send_control(&B, &id(), Direction::Outgoing, &announce(6))
            .unwrap();
        assert!(a.poll().is_empty());

        b.send_control(&A, &id(), Direction::Incoming, &Control::Resume)
            .unwrap();
        let events = a.poll();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            TransportEvent::ChunkRequest {
                peer: B,
                transfer_id: id(),
                offset: 0,
                length: 4
            }
        );

        // One outstanding request at a time
        assert!(a.poll().is_empty());
        a.send_chunk(&B, &id(), 0, b"abcd").unwrap();
        assert!(matches!(
            a.poll().as_slice(),
            [TransportEvent::ChunkRequest {
                offset: 4,
                length: 2,
                ..
            }]
        ));
        a.send_chunk(&B, &id(), 4, b"ef").unwrap();
        assert!(matches!(
            a.poll().as_slice(),
            [TransportEvent::ChunkRequest {
                offset: 6,
                length: 0,
                ..
            }]
        ));
        assert!(a.poll().is_empty());

        let delivered = b.poll();
        assert_eq!(delivered.len(), 4);
        assert_eq!(
            delivered[3],
            TransportEvent::Chunk {
                peer: A,
                transfer_id: id(),
                offset: 6,
                data: Vec::new()
            }
        );
        assert!(net.is_idle());
    }

    #[test]
    fn test_pause_stops_requests_and_seek_moves_them() {
        let net = LoopbackNetwork::new(A, B).with_chunk_size(4);
        let (a, b) = net.endpoints();
        a.send_control(&B, &id(), Direction::Outgoing, &announce(100))
            .unwrap();
        b.send_control(&A, &id(), Direction::Incoming, &Control::Resume)
            .unwrap();
        b.send_control(&A, &id(), Direction::Incoming, &Control::Pause)
            .unwrap();
        assert_eq!(a.poll().len(), 2);
        assert!(a.poll().is_empty());

        b.send_control(&A, &id(), Direction::Incoming, &Control::Seek(40))
            .unwrap();
        b.send_control(&A, &id(), Direction::Incoming, &Control::Resume)
            .unwrap();
        let events = a.poll();
        assert!(matches!(
            events.last(),
            Some(TransportEvent::ChunkRequest { offset: 40, .. })
        ));
    }

    #[test]
    fn test_requests_ordered_by_transfer_id() {
        let net = LoopbackNetwork::new(A, B).with_chunk_size(4);
        let (a, b) = net.endpoints();
        let late = TransferId::from_bytes([3u8; 32]);
        for transfer_id in [late, id()] {
            a.send_control(&B, &transfer_id, Direction::Outgoing, &announce(8))
                .unwrap();
        }
        for transfer_id in [late, id()] {
            b.send_control(&A, &transfer_id, Direction::Incoming, &Control::Resume)
                .unwrap();
        }

        let requested: Vec<TransferId> = a
            .poll()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::ChunkRequest { transfer_id, .. } => Some(transfer_id),
                _ => None,
            })
            .collect();
        assert_eq!(requested, vec![id(), late]);

        let names: Vec<String> = b
            .poll()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Announce { filename, .. } => Some(filename.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["f", "f"]);
    }

    #[test]
    fn test_chunk_without_stream_is_wrong_state() {
        let net = LoopbackNetwork::new(A, B);
        let (a, _) = net.endpoints();
        assert_eq!(
            a.send_chunk(&B, &id(), 0, b"x"),
            Err(TransportError::WrongState)
        );

        a.send_control(&B, &id(), Direction::Outgoing, &announce(1))
            .unwrap();
        // Not accepted yet
        assert_eq!(
            a.send_chunk(&B, &id(), 0, b"x"),
            Err(TransportError::WrongState)
        );
    }

    #[test]
    fn test_queue_limit() {
        let net = LoopbackNetwork::new(A, B).with_queue_limit(1);
        let (a, b) = net.endpoints();
        a.send_control(&B, &id(), Direction::Outgoing, &announce(1))
            .unwrap();
        assert_eq!(
            a.send_control(&B, &id(), Direction::Outgoing, &Control::Pause),
            Err(TransportError::SendQueueFull)
        );
        b.poll();
        assert!(
            a.send_control(&B, &id(), Direction::Outgoing, &Control::Cancel)
                .is_ok()
        );
    }

    #[test]
    fn test_link_down_drops_traffic() {
        let net = LoopbackNetwork::new(A, B);
        let (a, b) = net.endpoints();
        a.send_control(&B, &id(), Direction::Outgoing, &announce(1))
            .unwrap();
        net.set_online(false);

        assert_eq!(
            a.send_control(&B, &id(), Direction::Outgoing, &Control::Cancel),
            Err(TransportError::PeerNotConnected)
        );
        assert_eq!(
            b.poll(),
            vec![TransportEvent::PeerStatus {
                peer: A,
                connected: false
            }]
        );
        net.set_online(true);
        assert_eq!(
            a.poll(),
            vec![
                TransportEvent::PeerStatus {
                    peer: B,
                    connected: false
                },
                TransportEvent::PeerStatus {
                    peer: B,
                    connected: true
                }
            ]
        );
    }
}
