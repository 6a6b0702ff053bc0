//! Download engine collaborator contract.
//!
//! The scheduler never waits on the engine except for removals, whose
//! completion futures are aggregated by `remove_source` and `shutdown`.
//! Everything else is fire-and-forget: the effect becomes authoritative
//! once it shows up in a later status batch.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use mining_core::{DownloadHandle, InfoHash};

use crate::error::EngineError;

/// Completion of an engine teardown request.
pub type EngineFuture = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send>>;

/// Parameters for a new engine-managed download.
#[derive(Debug, Clone, PartialEq)]
pub struct AddDownload {
    pub info_hash: InfoHash,
    pub name: String,
    pub magnet: String,
    pub hops: u8,
    pub dest_dir: PathBuf,
    /// Not shown in the user's download list.
    pub hidden: bool,
    /// Registered but not transferring until restarted.
    pub user_stopped: bool,
    /// Reported back with the credit-mining flag set.
    pub credit_mining: bool,
}

/// Operations the scheduler issues against the torrent engine.
pub trait DownloadEngine: Send + Sync {
    /// Whether the engine already runs a download for `info_hash`.
    fn has_download(&self, info_hash: &InfoHash) -> bool;

    fn add_download(&self, request: AddDownload);

    fn restart(&self, handle: DownloadHandle);

    fn stop(&self, handle: DownloadHandle);

    fn force_recheck(&self, handle: DownloadHandle);

    /// Tear down a hidden download, optionally deleting its persisted state.
    fn remove_download(&self, handle: DownloadHandle, remove_state: bool) -> EngineFuture;
}
