//! Two-node test fixture for integration testing
//!
//! Wires two [`FileTransfers`] services to the ends of a [`LoopbackNetwork`]
//! and pumps transport events between them. Each node records the events
//! its observers saw and the errors its dispatch returned. Chunk requests
//! that failed with `SendQueueFull` are dispatched again on the next pump.
//!
//! # Example
//!
//! ```no_run
//! use ferry_integration_tests::fixtures::TwoNodeFixture;
//!
//! let mut fixture = TwoNodeFixture::new();
//! fixture.send_bytes(b"hello", "hello.txt");
//! fixture.step();
//! let (_, sink) = fixture.accept_latest();
//! fixture.run();
//! assert_eq!(sink.contents(), b"hello");
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ferry_core::{
    Direction, FileTransfers, Filename, LoopbackNetwork, LoopbackTransport, MemorySink,
    MemorySource, OutgoingFile, PeerId, TransferConfig, TransferError, TransferEvent,
    TransferHandle, TransferState, TransportEvent,
};

/// Peer id of the first node
pub const ALICE: PeerId = [0xA1; 32];

/// Peer id of the second node
pub const BOB: PeerId = [0xB0; 32];

/// Pump rounds after which a run counts as stuck
const MAX_ROUNDS: usize = 100_000;

/// One side of the fixture
pub struct Node {
    /// This node's peer id
    pub id: PeerId,
    /// The transfer service under test
    pub service: FileTransfers<LoopbackTransport>,
    transport: Arc<LoopbackTransport>,
    events: Rc<RefCell<Vec<TransferEvent>>>,
    errors: Vec<TransferError>,
    retry: Vec<TransportEvent>,
}

impl Node {
    fn new(transport: Arc<LoopbackTransport>, config: TransferConfig) -> Self {
        let mut service =
            FileTransfers::new(Arc::clone(&transport), config).expect("valid transfer config");
        let events = Rc::new(RefCell::new(Vec::new()));
        let recorded = Rc::clone(&events);
        service.subscribe(move |event: &TransferEvent| recorded.borrow_mut().push(event.clone()));

        Self {
            id: transport.local(),
            service,
            transport,
            events,
            errors: Vec::new(),
            retry: Vec::new(),
        }
    }

    /// Dispatch everything delivered to this node
    ///
    /// Returns the number of events handled, retries included.
    pub fn pump(&mut self) -> usize {
        let mut pending = std::mem::take(&mut self.retry);
        pending.extend(self.transport.poll());
        let count = pending.len();

        for event in pending {
            let request = match &event {
                TransportEvent::ChunkRequest { .. } => Some(event.clone()),
                _ => None,
            };
            if let Err(e) = self.service.dispatch(event) {
                if let (TransferError::SendQueueFull, Some(request)) = (&e, request) {
                    tracing::debug!("Requeueing chunk request after full send queue");
                    self.retry.push(request);
                }
                self.errors.push(e);
            }
        }
        count
    }

    /// Every event observed so far
    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.borrow().clone()
    }

    /// Forget the recorded events
    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    /// Errors returned by dispatch so far
    pub fn errors(&self) -> &[TransferError] {
        &self.errors
    }

    /// Dispatch errors other than traffic for already removed transfers
    pub fn unexpected_errors(&self) -> Vec<TransferError> {
        self.errors
            .iter()
            .filter(|e| !e.is_not_found() && **e != TransferError::SendQueueFull)
            .cloned()
            .collect()
    }

    /// States a transfer moved through, in order
    pub fn states(&self, handle: TransferHandle) -> Vec<TransferState> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                TransferEvent::StateChanged { handle: h, state, .. } if *h == handle => {
                    Some(*state)
                }
                _ => None,
            })
            .collect()
    }

    /// Most recent state reported for a transfer
    pub fn last_state(&self, handle: TransferHandle) -> Option<TransferState> {
        self.states(handle).last().copied()
    }

    /// Bytes reported through `ChunkReceived` for a transfer
    pub fn received_bytes(&self, handle: TransferHandle) -> u64 {
        self.events
            .borrow()
            .iter()
            .map(|event| match event {
                TransferEvent::ChunkReceived { handle: h, data, .. } if *h == handle => {
                    data.len() as u64
                }
                _ => 0,
            })
            .sum()
    }

    /// Handle of the newest incoming transfer
    pub fn latest_incoming(&self) -> Option<TransferHandle> {
        self.events.borrow().iter().rev().find_map(|event| match event {
            TransferEvent::TransferCreated {
                handle,
                direction: Direction::Incoming,
                ..
            } => Some(*handle),
            _ => None,
        })
    }

    /// Offer `data` to `peer` as a named in-memory file
    pub fn send_bytes(&mut self, peer: PeerId, data: &[u8], name: &str) -> TransferHandle {
        let filename = Filename::new(name).expect("test filename fits");
        let file = OutgoingFile::new(filename, data.len() as u64, MemorySource::new(data.to_vec()));
        self.service.send(peer, file).expect("send")
    }

    /// Accept the newest incoming transfer from `peer` into a fresh memory sink
    pub fn accept_latest(&mut self, peer: PeerId) -> (TransferHandle, MemorySink) {
        let handle = self.latest_incoming().expect("an incoming transfer");
        let sink = MemorySink::new();
        self.service
            .accept(peer, handle, Box::new(sink.clone()))
            .expect("accept");
        (handle, sink)
    }
}

/// Two-node test fixture
///
/// `alice` and `bob` share one loopback link. Nothing moves until the test
/// calls [`step`](Self::step) or one of the run helpers.
pub struct TwoNodeFixture {
    /// Link between the nodes
    pub network: LoopbackNetwork,
    /// Node with id [`ALICE`]
    pub alice: Node,
    /// Node with id [`BOB`]
    pub bob: Node,
}

impl Default for TwoNodeFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl TwoNodeFixture {
    /// Fixture with default link and transfer settings
    pub fn new() -> Self {
        Self::with_network(LoopbackNetwork::new(ALICE, BOB))
    }

    /// Fixture over a custom link; it must connect [`ALICE`] and [`BOB`]
    pub fn with_network(network: LoopbackNetwork) -> Self {
        Self::with_configs(network, TransferConfig::default(), TransferConfig::default())
    }

    /// Fixture with separate transfer settings per node
    pub fn with_configs(
        network: LoopbackNetwork,
        alice_config: TransferConfig,
        bob_config: TransferConfig,
    ) -> Self {
        let (alice, bob) = network.endpoints();
        Self {
            alice: Node::new(alice, alice_config),
            bob: Node::new(bob, bob_config),
            network,
        }
    }

    /// Pump both nodes once; returns the number of events handled
    pub fn step(&mut self) -> usize {
        self.alice.pump() + self.bob.pump()
    }

    /// Pump until nothing moves any more; returns the rounds taken
    pub fn run(&mut self) -> usize {
        for round in 0..MAX_ROUNDS {
            if self.step() == 0 && self.network.is_idle() {
                return round;
            }
        }
        panic!("link did not settle within {MAX_ROUNDS} rounds");
    }

    /// Pump until `done` holds or the link settles; returns whether `done` held
    pub fn run_until(&mut self, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..MAX_ROUNDS {
            if done(self) {
                return true;
            }
            if self.step() == 0 && self.network.is_idle() {
                return done(self);
            }
        }
        false
    }

    /// Offer `data` from ALICE to BOB
    pub fn send_bytes(&mut self, data: &[u8], name: &str) -> TransferHandle {
        self.alice.send_bytes(BOB, data, name)
    }

    /// Let BOB accept the newest transfer from ALICE
    pub fn accept_latest(&mut self) -> (TransferHandle, MemorySink) {
        self.bob.accept_latest(ALICE)
    }

    /// Announce, accept and run one ALICE to BOB transfer to the end
    pub fn transfer(&mut self, data: &[u8]) -> MemorySink {
        self.send_bytes(data, "payload.bin");
        self.step();
        let (_, sink) = self.accept_latest();
        self.run();
        sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creation() {
        let fixture = TwoNodeFixture::new();
        assert_eq!(fixture.alice.id, ALICE);
        assert_eq!(fixture.bob.id, BOB);
        assert!(fixture.network.is_online());
        assert!(fixture.network.is_idle());
    }

    #[test]
    fn test_fixture_run_on_idle_link() {
        let mut fixture = TwoNodeFixture::new();
        assert_eq!(fixture.run(), 0);
    }

    #[test]
    fn test_fixture_transfer() {
        let mut fixture = TwoNodeFixture::new();
        let sink = fixture.transfer(b"fixture payload");
        assert_eq!(sink.contents(), b"fixture payload");
        assert_eq!(fixture.alice.service.transfer_count(), 0);
        assert_eq!(fixture.bob.service.transfer_count(), 0);
        assert!(fixture.bob.unexpected_errors().is_empty());
    }
}
