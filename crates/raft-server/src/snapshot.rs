//! # snapshot
//!
//! why: a replica that fell behind the leader's compaction point can only catch up from a snapshot
//! relations: RaftServer calls the installer when Applied::needs_fresh_snapshot is raised;
//!            the installer answers through RaftHandle::snapshot_installed
//! what: SnapshotInstaller trait, NoSnapshots

use raft_core::MemberId;

use crate::handle::RaftHandle;

/// Fetches and installs a state-machine snapshot on request.
///
/// Once the snapshot covering `(index, term)` is installed, report it with
/// [`RaftHandle::snapshot_installed`]; the replica then skips its log forward.
/// Repeated requests may arrive while one is in progress.
pub trait SnapshotInstaller: Send + 'static {
    fn request_snapshot(&mut self, leader: Option<MemberId>, handle: RaftHandle);
}

/// Installer for deployments without compaction; requests are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSnapshots;

impl SnapshotInstaller for NoSnapshots {
    fn request_snapshot(&mut self, leader: Option<MemberId>, handle: RaftHandle) {
        tracing::warn!(member = %handle.member(), leader = ?leader, "snapshot requested but no installer configured");
    }
}
