//! Shared fixtures for the ferry integration tests.

pub mod fixtures;
