//! # server
//!
//! why: drive a RaftNode from timers, inbound messages and proposals on a single task
//! relations: owns the node, its durable log and storage; talks to peers through Transport,
//!            to the state machine through StateMachineApplier
//! what: RaftServer and its event loop

use std::collections::BTreeMap;

use raft_core::{
    Applied, LogIndex, RaftEvent, RaftLog, RaftMessage, RaftNode, ReadableRaftLog, ReplicatedContent, Role,
};
use raft_storage::Storage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::applier::StateMachineApplier;
use crate::error::{ProposeError, ServerError};
use crate::handle::{Input, ProposeReply, RaftHandle, Status, INPUT_QUEUE_CAPACITY};
use crate::snapshot::SnapshotInstaller;
use crate::transport::Transport;

/// Single-task processing loop of one replica.
///
/// Events are handled strictly one at a time. Term and vote reach storage
/// before any message produced by the same event is sent.
pub struct RaftServer<L, T, A, I>
where
    L: RaftLog + Storage + Send + 'static,
    T: Transport,
    A: StateMachineApplier,
    I: SnapshotInstaller,
{
    node: RaftNode<L>,
    transport: T,
    applier: A,
    installer: I,
    inputs: mpsc::Receiver<Input>,
    handle: RaftHandle,
    status: watch::Sender<Status>,
    pending: BTreeMap<LogIndex, ProposeReply>,
    election_deadline: Instant,
}

impl<L, T, A, I> RaftServer<L, T, A, I>
where
    L: RaftLog + Storage + Send + 'static,
    T: Transport,
    A: StateMachineApplier,
    I: SnapshotInstaller,
{
    /// Wrap `node`, restoring term and vote from its storage.
    pub fn new(mut node: RaftNode<L>, transport: T, applier: A, installer: I) -> Result<(Self, RaftHandle), ServerError> {
        let (term, voted_for) = node.log().load_term_and_vote()?;
        node.restore(term, voted_for);

        let member = node.myself();
        let (input_tx, inputs) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (status, status_rx) = watch::channel(Status::initial(member));
        let handle = RaftHandle::new(member, input_tx, status_rx);
        let election_deadline = Instant::now() + node.config().random_election_timeout();

        tracing::info!(%member, term, voted_for = ?voted_for, "raft server created");

        let server = Self {
            node,
            transport,
            applier,
            installer,
            inputs,
            handle: handle.clone(),
            status,
            pending: BTreeMap::new(),
            election_deadline,
        };
        server.publish_status();
        Ok((server, handle))
    }

    /// Run the loop on its own tokio task.
    pub fn spawn(self) -> JoinHandle<Result<(), ServerError>> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown or a fatal error.
    ///
    /// A storage or consistency failure stops the replica; it is reported here
    /// and every pending proposal fails with [`ProposeError::Stopped`].
    pub async fn run(mut self) -> Result<(), ServerError> {
        let result = self.event_loop().await;
        if let Err(e) = &result {
            tracing::error!(member = %self.node.myself(), %e, "raft server stopped on error");
        }
        self.fail_pending_from(0, |_| ProposeError::Stopped);
        self.publish_status();
        result
    }

    async fn event_loop(&mut self) -> Result<(), ServerError> {
        let mut heartbeat = interval(self.node.config().heartbeat());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let election = sleep_until(self.election_deadline);
            tokio::pin!(election);

            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(Input::Event(event)) => {
                        self.step(event)?;
                    }
                    Some(Input::Propose { content, reply }) => self.propose(content, reply)?,
                    Some(Input::Shutdown) | None => {
                        tracing::info!(member = %self.node.myself(), "raft server shutting down");
                        return Ok(());
                    }
                },
                _ = heartbeat.tick() => {
                    if self.node.role() == Role::Leader {
                        self.step(RaftEvent::HeartbeatTimeout)?;
                    }
                }
                _ = &mut election => {
                    self.reset_election_deadline();
                    self.step(RaftEvent::ElectionTimeout)?;
                }
            }
        }
    }

    fn reset_election_deadline(&mut self) {
        self.election_deadline = Instant::now() + self.node.config().random_election_timeout();
    }

    fn propose(&mut self, content: ReplicatedContent, reply: ProposeReply) -> Result<(), ServerError> {
        if self.node.role() != Role::Leader {
            let _ = reply.send(Err(ProposeError::NotLeader {
                leader_hint: self.node.state().leader,
            }));
            return Ok(());
        }

        let applied = self.step(RaftEvent::NewEntries(vec![content]))?;
        match applied.appended {
            Some((index, _)) if index <= self.node.state().commit_index => {
                let _ = reply.send(Ok(index));
            }
            Some((index, _)) if self.node.role() == Role::Leader => {
                self.pending.insert(index, reply);
            }
            Some((index, _)) => {
                let _ = reply.send(Err(ProposeError::LeadershipLost { index }));
            }
            None => {
                let _ = reply.send(Err(ProposeError::NotLeader {
                    leader_hint: self.node.state().leader,
                }));
            }
        }
        Ok(())
    }

    /// Feed one event to the node and carry out everything it decided.
    fn step(&mut self, event: RaftEvent) -> Result<Applied, ServerError> {
        let mut applied = self.node.handle(event)?;

        if applied.term_or_vote_changed {
            let state = self.node.state();
            let (term, voted_for) = (state.term, state.voted_for);
            self.node.log_mut().save_term_and_vote(term, voted_for)?;
        }

        for directed in std::mem::take(&mut applied.outgoing) {
            let to = directed.to;
            let sent = match directed.message {
                RaftMessage::VoteRequest(request) => self.transport.send_request_vote(to, request),
                RaftMessage::AppendEntries(request) => self.transport.send_append_entries(to, request),
                other => self.transport.send(to, other),
            };
            if let Err(e) = sent {
                tracing::debug!(from = %self.node.myself(), %to, %e, "dropped outgoing message");
            }
        }

        if let Some(from) = applied.truncated_from {
            self.fail_pending_from(from, |index| ProposeError::LeadershipLost { index });
        }

        for (index, entry) in std::mem::take(&mut applied.committed) {
            self.applier.apply(index, &entry);
        }
        self.resolve_committed(applied.commit_index);

        if applied.role != Role::Leader {
            self.fail_pending_from(0, |index| ProposeError::LeadershipLost { index });
        }

        if applied.renew_election_timeout {
            self.reset_election_deadline();
        }

        if applied.needs_fresh_snapshot {
            self.installer.request_snapshot(applied.leader, self.handle.clone());
        }

        self.publish_status();

        if applied.elected {
            tracing::info!(member = %self.node.myself(), term = applied.term, "elected leader");
            self.step(RaftEvent::NewEntries(vec![ReplicatedContent::NewLeaderBarrier]))?;
        }

        Ok(applied)
    }

    fn resolve_committed(&mut self, commit_index: LogIndex) {
        let still_pending = self.pending.split_off(&(commit_index + 1));
        for (index, reply) in std::mem::replace(&mut self.pending, still_pending) {
            let _ = reply.send(Ok(index));
        }
    }

    fn fail_pending_from(&mut self, from: LogIndex, error: impl Fn(LogIndex) -> ProposeError) {
        for (index, reply) in self.pending.split_off(&from) {
            let _ = reply.send(Err(error(index)));
        }
    }

    fn publish_status(&self) {
        let state = self.node.state();
        self.status.send_replace(Status {
            member: self.node.myself(),
            role: state.role,
            term: state.term,
            leader: state.leader,
            commit_index: state.commit_index,
            append_index: self.node.log().append_index(),
            participating: self.node.is_participating(),
        });
    }
}
