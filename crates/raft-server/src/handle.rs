//! # handle
//!
//! why: everything outside the processing loop talks to a replica through a cloneable handle
//! relations: created by RaftServer::new, used by transports, snapshot installers and clients
//! what: RaftHandle, Status, the loop's input queue

use raft_core::{LogIndex, MemberId, RaftEvent, RaftMessage, ReplicatedContent, Role, Term};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{ProposeError, ServerError, TransportError};

/// Capacity of a replica's inbound queue; messages beyond it are dropped.
pub const INPUT_QUEUE_CAPACITY: usize = 1024;

pub(crate) type ProposeReply = oneshot::Sender<Result<LogIndex, ProposeError>>;

pub(crate) enum Input {
    Event(RaftEvent),
    Propose { content: ReplicatedContent, reply: ProposeReply },
    Shutdown,
}

/// Externally visible state of a replica, republished after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub member: MemberId,
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub commit_index: LogIndex,
    pub append_index: LogIndex,
    pub participating: bool,
}

impl Status {
    pub(crate) fn initial(member: MemberId) -> Self {
        Self {
            member,
            role: Role::Follower,
            term: 0,
            leader: None,
            commit_index: 0,
            append_index: 0,
            participating: true,
        }
    }
}

/// Cloneable handle to a running [`crate::RaftServer`].
#[derive(Clone)]
pub struct RaftHandle {
    member: MemberId,
    inputs: mpsc::Sender<Input>,
    status: watch::Receiver<Status>,
}

impl RaftHandle {
    pub(crate) fn new(member: MemberId, inputs: mpsc::Sender<Input>, status: watch::Receiver<Status>) -> Self {
        Self { member, inputs, status }
    }

    pub fn member(&self) -> MemberId {
        self.member
    }

    /// Queue an inbound message without waiting. A full queue drops it,
    /// which the protocol tolerates like any other lost message.
    pub fn deliver(&self, message: RaftMessage) -> Result<(), TransportError> {
        self.inputs.try_send(Input::Event(message.into())).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Overloaded(self.member),
            mpsc::error::TrySendError::Closed(_) => TransportError::Disconnected(self.member),
        })
    }

    /// Propose `content` and wait until it commits.
    ///
    /// Resolves with the entry's index. Fails immediately on a non-leader,
    /// and with [`ProposeError::LeadershipLost`] when the entry is truncated
    /// or this replica stops leading first. Callers retry against the new leader.
    pub async fn propose(&self, content: ReplicatedContent) -> Result<LogIndex, ProposeError> {
        let (reply, committed) = oneshot::channel();
        self.inputs
            .send(Input::Propose { content, reply })
            .await
            .map_err(|_| ProposeError::Stopped)?;
        committed.await.map_err(|_| ProposeError::Stopped)?
    }

    /// Convenience for proposing an opaque state-machine command.
    pub async fn propose_command(&self, command: impl Into<Vec<u8>>) -> Result<LogIndex, ProposeError> {
        self.propose(ReplicatedContent::Command(command.into())).await
    }

    /// Report that the state machine now reflects everything up to `(index, term)`.
    pub async fn snapshot_installed(&self, index: LogIndex, term: Term) -> Result<(), ServerError> {
        self.inputs
            .send(Input::Event(RaftEvent::SnapshotInstalled { index, term }))
            .await
            .map_err(|_| ServerError::Stopped)
    }

    /// Let the log drop entries through `index`, which the state machine has
    /// durably captured. Clamped to what is committed and delivered.
    pub async fn prune(&self, index: LogIndex) -> Result<(), ServerError> {
        self.inputs
            .send(Input::Event(RaftEvent::Prune { index }))
            .await
            .map_err(|_| ServerError::Stopped)
    }

    /// Ask the loop to exit after the events already queued.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.inputs.send(Input::Shutdown).await.map_err(|_| ServerError::Stopped)
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Wait until the published status satisfies `condition`.
    ///
    /// Returns the last status seen if the server stops first.
    pub async fn wait_for(&self, mut condition: impl FnMut(&Status) -> bool) -> Status {
        let mut status = self.status.clone();
        loop {
            {
                let current = status.borrow_and_update();
                if condition(&current) {
                    return current.clone();
                }
            }
            if status.changed().await.is_err() {
                return status.borrow().clone();
            }
        }
    }
}
