//! # raft-server
//!
//! why: run a raft replica as a long-lived async service
//! relations: drives raft-core's RaftNode, persists term/vote and the log through raft-storage
//! what: RaftServer event loop, RaftHandle, Transport boundary, applier and snapshot hooks

pub mod applier;
pub mod error;
pub mod handle;
pub mod server;
pub mod snapshot;
pub mod transport;

pub use applier::StateMachineApplier;
pub use error::{ProposeError, ServerError, TransportError};
pub use handle::{RaftHandle, Status, INPUT_QUEUE_CAPACITY};
pub use server::RaftServer;
pub use snapshot::{NoSnapshots, SnapshotInstaller};
pub use transport::{InMemoryNetwork, InMemoryTransport, Transport};
