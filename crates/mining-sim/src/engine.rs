//! In-memory download engine.
//!
//! Keeps every download in a map behind one lock and moves them through
//! a small lifecycle each time [`SimulatedEngine::advance`] is called:
//!
//! ```text
//! metadata ──► stopped (user-stopped) | downloading ──► seeding
//! hashchecking ──► stopped | stopped_on_error (broken swarm)
//! ```
//!
//! With a state directory configured, every credit mining download is
//! persisted as `<infohash>.state` so a later run can replay it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mining_core::{DownloadHandle, DownloadState, DownloadStatus, InfoHash};
use mining_scheduler::{AddDownload, CheckpointDir, DownloadEngine, EngineError, EngineFuture};

/// Largest upload credited to a seeding swarm per step.
const MAX_UPLOAD_PER_STEP: u64 = 256 * 1024;
/// Download progress gained per step while downloading.
const PROGRESS_PER_STEP: f64 = 0.25;

/// A command received by the engine, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Add { info_hash: InfoHash, name: String },
    Restart(DownloadHandle),
    Stop(DownloadHandle),
    Recheck(DownloadHandle),
    Remove(DownloadHandle, bool),
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    name: String,
    #[serde(default)]
    uploaded: u64,
}

#[derive(Debug, Clone)]
struct SimDownload {
    info_hash: InfoHash,
    name: String,
    status: DownloadStatus,
    availability: f64,
    uploaded: u64,
    progress: f64,
    user_stopped: bool,
    credit_mining: bool,
    /// Rechecks of a broken swarm end in an error again.
    broken: bool,
}

impl SimDownload {
    fn state(&self, handle: DownloadHandle) -> DownloadState {
        DownloadState {
            handle,
            info_hash: self.info_hash,
            name: self.name.clone(),
            status: self.status,
            availability: self.availability,
            seeding_uploaded: self.uploaded,
            credit_mining: self.credit_mining,
        }
    }
}

struct SimState {
    next_handle: u64,
    downloads: BTreeMap<DownloadHandle, SimDownload>,
    by_hash: HashMap<InfoHash, DownloadHandle>,
    commands: Vec<EngineCommand>,
    rng: StdRng,
}

/// Deterministic stand-in for a BitTorrent session.
pub struct SimulatedEngine {
    state_dir: Option<PathBuf>,
    inner: Mutex<SimState>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Engine whose availability and upload figures come from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state_dir: None,
            inner: Mutex::new(SimState {
                next_handle: 1,
                downloads: BTreeMap::new(),
                by_hash: HashMap::new(),
                commands: Vec::new(),
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// Persist credit mining downloads under `dir`.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replay every checkpoint in the state directory as a stopped download.
    ///
    /// Returns the number of downloads restored.
    pub fn load_checkpoints(&self) -> usize {
        let Some(dir) = &self.state_dir else {
            return 0;
        };
        let files = CheckpointDir::new(dir).state_files();
        if files.is_empty() {
            debug!(dir = %dir.display(), "no checkpoints to load");
            return 0;
        }

        let mut restored = 0;
        for path in files {
            match read_checkpoint(&path) {
                Ok((info_hash, checkpoint)) => {
                    let handle = self.restore(info_hash, &checkpoint.name, DownloadStatus::Stopped);
                    if let Some(dl) = self.lock().downloads.get_mut(&handle) {
                        dl.uploaded = checkpoint.uploaded;
                    }
                    restored += 1;
                }
                Err(reason) => warn!(path = %path.display(), %reason, "skipping unreadable checkpoint"),
            }
        }

        info!(restored, "loaded persisted downloads");
        restored
    }

    /// Register a credit mining download as if replayed from persisted state.
    pub fn restore(&self, info_hash: InfoHash, name: &str, status: DownloadStatus) -> DownloadHandle {
        let mut state = self.lock();
        let availability = state.rng.random_range(0.0..4.0);
        insert(
            &mut state,
            SimDownload {
                info_hash,
                name: name.to_string(),
                status,
                availability,
                uploaded: 0,
                progress: 1.0,
                user_stopped: true,
                credit_mining: true,
                broken: false,
            },
        )
    }

    /// Register a download the user added by hand.
    pub fn add_user_download(&self, info_hash: InfoHash, name: &str) -> DownloadHandle {
        let mut state = self.lock();
        insert(
            &mut state,
            SimDownload {
                info_hash,
                name: name.to_string(),
                status: DownloadStatus::Downloading,
                availability: 1.0,
                uploaded: 0,
                progress: 0.0,
                user_stopped: false,
                credit_mining: false,
                broken: false,
            },
        )
    }

    /// Current status of every download, ordered by handle.
    pub fn status_batch(&self) -> Vec<DownloadState> {
        self.lock()
            .downloads
            .iter()
            .map(|(handle, dl)| dl.state(*handle))
            .collect()
    }

    /// Move every download one step through its lifecycle.
    pub fn advance(&self) {
        let mut state = self.lock();
        let SimState { downloads, rng, .. } = &mut *state;

        for dl in downloads.values_mut() {
            let current = dl.status;
            dl.status = match current {
                DownloadStatus::AllocatingDiskspace
                | DownloadStatus::WaitingForHashcheck
                | DownloadStatus::Circuits => DownloadStatus::Metadata,
                DownloadStatus::Metadata if dl.user_stopped => DownloadStatus::Stopped,
                DownloadStatus::Metadata => DownloadStatus::Downloading,
                DownloadStatus::Hashchecking if dl.broken => DownloadStatus::StoppedOnError,
                DownloadStatus::Hashchecking => DownloadStatus::Stopped,
                DownloadStatus::Downloading => {
                    dl.progress = (dl.progress + PROGRESS_PER_STEP).min(1.0);
                    if dl.progress >= 1.0 {
                        DownloadStatus::Seeding
                    } else {
                        DownloadStatus::Downloading
                    }
                }
                DownloadStatus::Seeding => {
                    dl.uploaded += rng.random_range(0..=MAX_UPLOAD_PER_STEP);
                    DownloadStatus::Seeding
                }
                other => other,
            };
        }
    }

    /// Commands received so far.
    pub fn commands(&self) -> Vec<EngineCommand> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().downloads.is_empty()
    }

    pub fn handle_of(&self, info_hash: &InfoHash) -> Option<DownloadHandle> {
        self.lock().by_hash.get(info_hash).copied()
    }

    pub fn status_of(&self, info_hash: &InfoHash) -> Option<DownloadStatus> {
        let state = self.lock();
        let handle = state.by_hash.get(info_hash)?;
        state.downloads.get(handle).map(|dl| dl.status)
    }

    pub fn set_status(&self, info_hash: &InfoHash, status: DownloadStatus) {
        self.update(info_hash, |dl| dl.status = status);
    }

    pub fn set_availability(&self, info_hash: &InfoHash, availability: f64) {
        self.update(info_hash, |dl| dl.availability = availability);
    }

    pub fn set_uploaded(&self, info_hash: &InfoHash, uploaded: u64) {
        self.update(info_hash, |dl| dl.uploaded = uploaded);
    }

    /// Fail the download now and make every later recheck fail too.
    pub fn break_swarm(&self, info_hash: &InfoHash) {
        self.update(info_hash, |dl| {
            dl.broken = true;
            dl.status = DownloadStatus::StoppedOnError;
        });
    }

    fn update(&self, info_hash: &InfoHash, f: impl FnOnce(&mut SimDownload)) {
        let mut state = self.lock();
        if let Some(handle) = state.by_hash.get(info_hash).copied()
            && let Some(dl) = state.downloads.get_mut(&handle)
        {
            f(dl);
        }
    }

    fn checkpoint_path(&self, info_hash: &InfoHash) -> Option<PathBuf> {
        self.state_dir
            .as_ref()
            .map(|dir| dir.join(format!("{info_hash}.state")))
    }

    fn write_checkpoint(&self, info_hash: &InfoHash, name: &str) {
        let Some(path) = self.checkpoint_path(info_hash) else {
            return;
        };
        let checkpoint = Checkpoint {
            name: name.to_string(),
            uploaded: 0,
        };
        let result = serde_json::to_vec(&checkpoint)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                std::fs::write(&path, bytes).map_err(|e| e.to_string())
            });
        if let Err(reason) = result {
            warn!(%info_hash, %reason, "failed to persist download state");
        }
    }

    fn delete_checkpoint(&self, info_hash: &InfoHash) -> Result<(), EngineError> {
        let Some(path) = self.checkpoint_path(info_hash) else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Io(e.to_string())),
        }
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn insert(state: &mut SimState, download: SimDownload) -> DownloadHandle {
    let handle = DownloadHandle(state.next_handle);
    state.next_handle += 1;
    state.by_hash.insert(download.info_hash, handle);
    state.downloads.insert(handle, download);
    handle
}

fn read_checkpoint(path: &Path) -> Result<(InfoHash, Checkpoint), String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| "non-utf8 file name".to_string())?;
    let info_hash = InfoHash::from_hex(stem).map_err(|e| e.to_string())?;
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let checkpoint = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
    Ok((info_hash, checkpoint))
}

impl DownloadEngine for SimulatedEngine {
    fn has_download(&self, info_hash: &InfoHash) -> bool {
        if self.lock().by_hash.contains_key(info_hash) {
            return true;
        }
        self.checkpoint_path(info_hash).is_some_and(|p| p.exists())
    }

    fn add_download(&self, request: AddDownload) {
        let AddDownload {
            info_hash,
            name,
            user_stopped,
            credit_mining,
            ..
        } = request;

        {
            let mut state = self.lock();
            state.commands.push(EngineCommand::Add {
                info_hash,
                name: name.clone(),
            });
            if state.by_hash.contains_key(&info_hash) {
                debug!(%info_hash, "download already exists");
                return;
            }
            let availability = state.rng.random_range(0.0..4.0);
            let handle = insert(
                &mut state,
                SimDownload {
                    info_hash,
                    name: name.clone(),
                    status: DownloadStatus::Metadata,
                    availability,
                    uploaded: 0,
                    progress: 0.0,
                    user_stopped,
                    credit_mining,
                    broken: false,
                },
            );
            debug!(%info_hash, %handle, "download added");
        }

        if credit_mining {
            self.write_checkpoint(&info_hash, &name);
        }
    }

    fn restart(&self, handle: DownloadHandle) {
        let mut state = self.lock();
        state.commands.push(EngineCommand::Restart(handle));
        if let Some(dl) = state.downloads.get_mut(&handle) {
            dl.user_stopped = false;
            dl.status = if dl.progress >= 1.0 {
                DownloadStatus::Seeding
            } else {
                DownloadStatus::Downloading
            };
        }
    }

    fn stop(&self, handle: DownloadHandle) {
        let mut state = self.lock();
        state.commands.push(EngineCommand::Stop(handle));
        if let Some(dl) = state.downloads.get_mut(&handle) {
            dl.user_stopped = true;
            dl.status = DownloadStatus::Stopped;
        }
    }

    fn force_recheck(&self, handle: DownloadHandle) {
        let mut state = self.lock();
        state.commands.push(EngineCommand::Recheck(handle));
        if let Some(dl) = state.downloads.get_mut(&handle) {
            dl.status = DownloadStatus::Hashchecking;
        }
    }

    fn remove_download(&self, handle: DownloadHandle, remove_state: bool) -> EngineFuture {
        let removed = {
            let mut state = self.lock();
            state.commands.push(EngineCommand::Remove(handle, remove_state));
            let removed = state.downloads.remove(&handle);
            if let Some(dl) = &removed {
                state.by_hash.remove(&dl.info_hash);
            }
            removed
        };

        let result = match removed {
            Some(dl) if remove_state => self.delete_checkpoint(&dl.info_hash),
            Some(_) => Ok(()),
            None => Err(EngineError::DownloadNotFound(handle)),
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> InfoHash {
        InfoHash::new([n; 20])
    }

    fn request(n: u8) -> AddDownload {
        AddDownload {
            info_hash: hash(n),
            name: format!("swarm-{n}"),
            magnet: String::new(),
            hops: 1,
            dest_dir: PathBuf::from("downloads"),
            hidden: true,
            user_stopped: true,
            credit_mining: true,
        }
    }

    #[test]
    fn added_download_settles_stopped() {
        let engine = SimulatedEngine::new();
        engine.add_download(request(1));

        assert!(engine.has_download(&hash(1)));
        assert_eq!(engine.status_of(&hash(1)), Some(DownloadStatus::Metadata));
        engine.advance();
        assert_eq!(engine.status_of(&hash(1)), Some(DownloadStatus::Stopped));

        let batch = engine.status_batch();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].credit_mining);
        assert_eq!(batch[0].handle, DownloadHandle(1));
    }

    #[test]
    fn restart_downloads_then_seeds() {
        let engine = SimulatedEngine::new();
        engine.add_download(request(1));
        engine.advance();
        let handle = engine.handle_of(&hash(1)).unwrap();

        engine.restart(handle);
        assert_eq!(engine.status_of(&hash(1)), Some(DownloadStatus::Downloading));
        for _ in 0..4 {
            engine.advance();
        }
        assert_eq!(engine.status_of(&hash(1)), Some(DownloadStatus::Seeding));

        engine.stop(handle);
        assert_eq!(engine.status_of(&hash(1)), Some(DownloadStatus::Stopped));
        engine.restart(handle);
        assert_eq!(engine.status_of(&hash(1)), Some(DownloadStatus::Seeding));
    }

    #[test]
    fn recheck_of_broken_swarm_fails_again() {
        let engine = SimulatedEngine::new();
        let h1 = engine.restore(hash(1), "one", DownloadStatus::StoppedOnError);
        let h2 = engine.restore(hash(2), "two", DownloadStatus::Stopped);
        engine.break_swarm(&hash(2));

        engine.force_recheck(h1);
        engine.force_recheck(h2);
        engine.advance();

        assert_eq!(engine.status_of(&hash(1)), Some(DownloadStatus::Stopped));
        assert_eq!(engine.status_of(&hash(2)), Some(DownloadStatus::StoppedOnError));
    }

    #[tokio::test]
    async fn remove_unknown_handle_fails() {
        let engine = SimulatedEngine::new();
        let err = engine.remove_download(DownloadHandle(42), true).await.unwrap_err();
        assert_eq!(err, EngineError::DownloadNotFound(DownloadHandle(42)));
    }

    #[tokio::test]
    async fn checkpoints_survive_restart_until_removed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new().with_state_dir(dir.path());
        engine.add_download(request(1));
        engine.add_download(request(2));
        assert!(dir.path().join(format!("{}.state", hash(1))).exists());

        let handle = engine.handle_of(&hash(2)).unwrap();
        engine.remove_download(handle, true).await.unwrap();
        assert!(!dir.path().join(format!("{}.state", hash(2))).exists());

        let replayed = SimulatedEngine::new().with_state_dir(dir.path());
        assert_eq!(replayed.load_checkpoints(), 1);
        let batch = replayed.status_batch();
        assert_eq!(batch[0].info_hash, hash(1));
        assert_eq!(batch[0].name, "swarm-1");
        assert_eq!(batch[0].status, DownloadStatus::Stopped);
    }

    #[test]
    fn replay_covers_exactly_the_counted_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new().with_state_dir(dir.path());
        engine.add_download(request(1));
        engine.add_download(request(2));
        std::fs::write(dir.path().join("notes.txt"), b"{}").unwrap();
        std::fs::create_dir(dir.path().join(format!("{}.state", hash(3)))).unwrap();
        let nested = dir.path().join("old");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            nested.join(format!("{}.state", hash(4))),
            br#"{"name":"swarm-4"}"#,
        )
        .unwrap();

        let replayed = SimulatedEngine::new().with_state_dir(dir.path());
        let restored = replayed.load_checkpoints();

        assert_eq!(restored, 2);
        assert_eq!(restored, CheckpointDir::new(dir.path()).count());
        assert!(replayed.handle_of(&hash(4)).is_none());
    }

    #[test]
    fn user_downloads_are_not_credit_mining() {
        let engine = SimulatedEngine::new();
        engine.add_user_download(hash(1), "linux.iso");

        let batch = engine.status_batch();
        assert!(!batch[0].credit_mining);
    }

    #[test]
    fn commands_are_recorded_in_order() {
        let engine = SimulatedEngine::new();
        engine.add_download(request(1));
        let handle = engine.handle_of(&hash(1)).unwrap();
        engine.restart(handle);
        engine.stop(handle);

        assert_eq!(
            engine.commands(),
            vec![
                EngineCommand::Add {
                    info_hash: hash(1),
                    name: "swarm-1".to_string()
                },
                EngineCommand::Restart(handle),
                EngineCommand::Stop(handle),
            ]
        );
    }
}
