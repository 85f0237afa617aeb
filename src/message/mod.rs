//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write `send` and
//! `recv_timeout` operations for a given transport layer. Two transports are
//! included: in-process channels for workers running as threads, and a
//! pure-Rust TCP transport for workers running as separate processes.
//!

mod backoff;
pub mod comm;
pub mod local;
pub mod tcp;
pub mod util;

pub use comm::{BinomialTree, Communicator};
pub use local::LocalCommunicator;
pub use tcp::{TcpCommunicator, TcpHost};
