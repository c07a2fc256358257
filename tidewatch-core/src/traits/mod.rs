//! Storage and collaborator traits
//!
//! These traits define the interface between the storage services and
//! the drivers or external services that back them.

pub mod clock;
pub mod memory;

pub use clock::Clock;
pub use memory::{BlockMemory, ByteMemory, MemoryError, WriteEnable};
