//! Utilities for testing code that is built on the datagram protocol. They are used by this
//!  crate's own tests, and they are exported so applications can test against them as well.

pub mod memory_network;
