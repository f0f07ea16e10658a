//! Mocks, an in-memory repository and graph fixtures for certflow tests.

pub mod fixtures;
pub mod memory;
pub mod mocks;

pub use memory::MemoryStore;
pub use mocks::*;
