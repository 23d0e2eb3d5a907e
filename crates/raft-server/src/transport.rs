//! # transport
//!
//! why: the network boundary; delivery is at-most-once, unordered, lossy and may duplicate
//! relations: RaftServer sends through a Transport, remote messages come back in via RaftHandle::deliver
//! what: Transport trait, InMemoryNetwork / InMemoryTransport for tests and simulations

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use raft_core::{AppendEntriesRequest, MemberId, RaftMessage, VoteRequest};

use crate::error::TransportError;
use crate::handle::RaftHandle;

/// Outbound side of the network.
///
/// Sending must not block the processing loop; a message that cannot be
/// handed over right away is reported and dropped.
pub trait Transport: Send + 'static {
    fn send(&self, target: MemberId, message: RaftMessage) -> Result<(), TransportError>;

    fn send_request_vote(&self, target: MemberId, request: VoteRequest) -> Result<(), TransportError> {
        self.send(target, RaftMessage::VoteRequest(request))
    }

    fn send_append_entries(&self, target: MemberId, request: AppendEntriesRequest) -> Result<(), TransportError> {
        self.send(target, RaftMessage::AppendEntries(request))
    }
}

#[derive(Default)]
struct NetworkState {
    handles: BTreeMap<MemberId, RaftHandle>,
    isolated: BTreeSet<MemberId>,
}

/// Process-local network connecting replicas through their handles.
///
/// Members can be isolated to simulate partitions.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route messages addressed to `handle.member()` into that replica.
    pub fn register(&self, handle: RaftHandle) {
        self.lock().handles.insert(handle.member(), handle);
    }

    /// Outbound transport for `member`.
    pub fn transport(&self, member: MemberId) -> InMemoryTransport {
        InMemoryTransport {
            from: member,
            network: self.clone(),
        }
    }

    /// Drop every message to or from `member` until [`InMemoryNetwork::heal`].
    pub fn isolate(&self, member: MemberId) {
        tracing::info!(%member, "isolating member");
        self.lock().isolated.insert(member);
    }

    pub fn heal(&self) {
        tracing::info!("healing network");
        self.lock().isolated.clear();
    }

    fn route(&self, from: MemberId, to: MemberId) -> Result<RaftHandle, TransportError> {
        let state = self.lock();
        if state.isolated.contains(&from) || state.isolated.contains(&to) {
            return Err(TransportError::Partitioned { from, to });
        }
        state.handles.get(&to).cloned().ok_or(TransportError::UnknownMember(to))
    }
}

/// One member's view of an [`InMemoryNetwork`].
#[derive(Clone)]
pub struct InMemoryTransport {
    from: MemberId,
    network: InMemoryNetwork,
}

impl Transport for InMemoryTransport {
    fn send(&self, target: MemberId, message: RaftMessage) -> Result<(), TransportError> {
        let handle = self.network.route(self.from, target)?;
        handle.deliver(message)
    }
}
