//! Reusable test fixtures

mod two_node;

pub use two_node::{ALICE, BOB, Node, TwoNodeFixture};
