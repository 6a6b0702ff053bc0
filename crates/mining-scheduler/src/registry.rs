//! Swarm registry and source manager.
//!
//! Single owner of the swarm map and the active-source table. Records are
//! reference-counted by source attribution: a swarm stays tracked while at
//! least one active source vouches for it, and is torn down with its
//! engine download when the last one goes away.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use mining_core::{magnet_link, InfoHash, MiningSettings, SourceKey, SwarmRecord};

use crate::checkpoint::CheckpointDir;
use crate::engine::{AddDownload, DownloadEngine, EngineFuture};
use crate::error::{MiningError, MiningResult};
use crate::source::{Discovery, DiscoverySink, Source, SourceFactory};

/// What happened to a discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// New record created and handed to the engine.
    Added,
    /// Already tracked; the source was added to its attribution.
    Attributed,
    /// The reporting source is no longer active.
    InactiveSource,
    /// The engine already has a live or persisted download for it.
    AlreadyManaged,
    /// The candidate cap is reached.
    LimitReached,
}

pub struct Registry {
    settings: Arc<MiningSettings>,
    engine: Arc<dyn DownloadEngine>,
    checkpoints: CheckpointDir,
    swarms: HashMap<InfoHash, SwarmRecord>,
    sources: BTreeMap<SourceKey, Box<dyn Source>>,
}

impl Registry {
    pub fn new(settings: Arc<MiningSettings>, engine: Arc<dyn DownloadEngine>) -> Self {
        let checkpoints = CheckpointDir::new(&settings.state_dir);
        Self {
            settings,
            engine,
            checkpoints,
            swarms: HashMap::new(),
            sources: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &MiningSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<dyn DownloadEngine> {
        &self.engine
    }

    pub fn checkpoints(&self) -> &CheckpointDir {
        &self.checkpoints
    }

    pub fn len(&self) -> usize {
        self.swarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swarms.is_empty()
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<&SwarmRecord> {
        self.swarms.get(info_hash)
    }

    pub fn swarms(&self) -> impl Iterator<Item = &SwarmRecord> {
        self.swarms.values()
    }

    pub fn source_keys(&self) -> Vec<SourceKey> {
        self.sources.keys().cloned().collect()
    }

    pub fn has_source(&self, key: &SourceKey) -> bool {
        self.sources.contains_key(key)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Record for `info_hash`, created unattributed if not yet tracked.
    pub(crate) fn adopt(&mut self, info_hash: InfoHash, name: &str) -> &mut SwarmRecord {
        self.swarms
            .entry(info_hash)
            .or_insert_with(|| SwarmRecord::new(info_hash, name))
    }

    pub(crate) fn remove_swarm(&mut self, info_hash: &InfoHash) -> Option<SwarmRecord> {
        self.swarms.remove(info_hash)
    }

    // ── Sources ─────────────────────────────────────────────────────

    /// Create, register and start a source.
    pub fn add_source(
        &mut self,
        key: &str,
        factory: &dyn SourceFactory,
        tx: &mpsc::UnboundedSender<Discovery>,
    ) -> MiningResult<SourceKey> {
        let key = SourceKey::parse(key).map_err(|source| MiningError::MalformedSource {
            key: key.to_string(),
            source,
        })?;

        match self.sources.entry(key.clone()) {
            Entry::Occupied(_) => Err(MiningError::DuplicateSource(key)),
            Entry::Vacant(slot) => {
                let sink = DiscoverySink::new(key.clone(), tx.clone());
                let source = slot.insert(factory.create(&key, sink));
                source.start();
                info!(source = %key, "added source");
                Ok(key)
            }
        }
    }

    /// Stop a source and drop its attribution everywhere.
    ///
    /// Returns the teardown futures for downloads whose last attributing
    /// source this was.
    pub fn remove_source(&mut self, key: &str) -> MiningResult<Vec<EngineFuture>> {
        let parsed = SourceKey::parse(key).map_err(|_| MiningError::UnknownSource(key.to_string()))?;
        let mut source = self
            .sources
            .remove(&parsed)
            .ok_or_else(|| MiningError::UnknownSource(key.to_string()))?;
        source.stop();
        info!(source = %parsed, "removed source");

        let orphaned: Vec<InfoHash> = self
            .swarms
            .values_mut()
            .filter_map(|record| {
                let was_attributed = record.sources.remove(&parsed);
                (was_attributed && record.sources.is_empty()).then_some(record.info_hash)
            })
            .collect();

        let mut teardowns = Vec::new();
        for info_hash in orphaned {
            if let Some(record) = self.swarms.remove(&info_hash)
                && let Some(handle) = record.download
            {
                info!(%info_hash, %handle, "removing torrent");
                teardowns.push(self.engine.remove_download(handle, true));
            }
        }
        info!(source = %parsed, downloads = teardowns.len(), "removing download(s)");

        Ok(teardowns)
    }

    // ── Discovery ───────────────────────────────────────────────────

    /// Apply a discovery reported by a source.
    pub fn on_discovery(&mut self, discovery: Discovery) -> DiscoveryOutcome {
        let Discovery {
            source,
            info_hash,
            name,
        } = discovery;
        debug!(%info_hash, %source, "received torrent");

        if !self.sources.contains_key(&source) {
            debug!(%info_hash, %source, "skipping torrent (unknown source)");
            return DiscoveryOutcome::InactiveSource;
        }

        if let Some(record) = self.swarms.get_mut(&info_hash) {
            record.sources.insert(source);
            debug!(%info_hash, "skipping torrent (already known)");
            return DiscoveryOutcome::Attributed;
        }

        if self.engine.has_download(&info_hash) || self.checkpoints.contains(&info_hash) {
            debug!(%info_hash, "skipping torrent (download already running or scheduled to run)");
            return DiscoveryOutcome::AlreadyManaged;
        }

        if self.swarms.len() >= self.settings.max_torrents_listed {
            debug!(%info_hash, limit = self.settings.max_torrents_listed, "skipping torrent (limit reached)");
            return DiscoveryOutcome::LimitReached;
        }

        let mut record = SwarmRecord::new(info_hash, name.clone());
        record.sources.insert(source);
        self.swarms.insert(info_hash, record);
        info!(%info_hash, %name, "starting torrent");

        self.engine.add_download(AddDownload {
            info_hash,
            magnet: magnet_link(&info_hash, &name),
            name,
            hops: self.settings.hops,
            dest_dir: self.settings.save_path.clone(),
            hidden: true,
            user_stopped: true,
            credit_mining: true,
        });

        DiscoveryOutcome::Added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use mining_core::{DownloadHandle, DownloadStatus};

    struct Fixture {
        registry: Registry,
        engine: Arc<RecordingEngine>,
        sources: NullSources,
        tx: mpsc::UnboundedSender<Discovery>,
        _rx: mpsc::UnboundedReceiver<Discovery>,
        _state_dir: tempfile::TempDir,
    }

    fn fixture(max_listed: usize) -> Fixture {
        let state_dir = tempfile::tempdir().unwrap();
        let settings = MiningSettings {
            max_torrents_listed: max_listed,
            state_dir: state_dir.path().to_path_buf(),
            ..MiningSettings::default()
        };
        let engine = Arc::new(RecordingEngine::default());
        let (tx, rx) = mpsc::unbounded_channel();
        Fixture {
            registry: Registry::new(Arc::new(settings), engine.clone()),
            engine,
            sources: NullSources::default(),
            tx,
            _rx: rx,
            _state_dir: state_dir,
        }
    }

    impl Fixture {
        fn add_source(&mut self, c: char) -> SourceKey {
            self.registry
                .add_source(&source_key(c), &self.sources, &self.tx)
                .unwrap()
        }

        fn discover(&mut self, source: &SourceKey, n: u8) -> DiscoveryOutcome {
            self.registry.on_discovery(Discovery {
                source: source.clone(),
                info_hash: hash(n),
                name: format!("swarm-{n}"),
            })
        }
    }

    #[test]
    fn add_source_starts_subscription() {
        let mut f = fixture(10);
        let key = f.add_source('a');

        assert!(f.registry.has_source(&key));
        assert_eq!(f.sources.events.lock().unwrap().as_slice(), &[(key, "start")]);
    }

    #[test]
    fn add_source_rejects_duplicate() {
        let mut f = fixture(10);
        f.add_source('a');
        let err = f
            .registry
            .add_source(&source_key('a'), &f.sources, &f.tx)
            .unwrap_err();
        assert!(matches!(err, MiningError::DuplicateSource(_)));
        assert_eq!(f.registry.source_count(), 1);
    }

    #[test]
    fn add_source_rejects_malformed_key() {
        let mut f = fixture(10);
        let err = f
            .registry
            .add_source("not-a-channel", &f.sources, &f.tx)
            .unwrap_err();
        assert!(matches!(err, MiningError::MalformedSource { .. }));
        assert_eq!(f.registry.source_count(), 0);
        assert!(f.sources.events.lock().unwrap().is_empty());
    }

    #[test]
    fn discovery_creates_hidden_stopped_download() {
        let mut f = fixture(10);
        let key = f.add_source('a');

        assert_eq!(f.discover(&key, 1), DiscoveryOutcome::Added);

        let record = f.registry.get(&hash(1)).unwrap();
        assert!(record.sources.contains(&key));
        assert!(record.download.is_none());

        let calls = f.engine.calls();
        assert_eq!(calls.len(), 1);
        let EngineCall::Add(req) = &calls[0] else {
            panic!("expected add, got {calls:?}");
        };
        assert_eq!(req.info_hash, hash(1));
        assert!(req.hidden && req.user_stopped && req.credit_mining);
        assert_eq!(req.hops, 1);
        assert_eq!(req.dest_dir, f.registry.settings().save_path);
        assert!(req.magnet.starts_with(&format!("magnet:?xt=urn:btih:{}", hash(1))));
    }

    #[test]
    fn same_swarm_from_two_sources_is_deduplicated() {
        let mut f = fixture(10);
        let a = f.add_source('a');
        let b = f.add_source('b');

        assert_eq!(f.discover(&a, 1), DiscoveryOutcome::Added);
        assert_eq!(f.discover(&b, 1), DiscoveryOutcome::Attributed);

        assert_eq!(f.registry.len(), 1);
        let record = f.registry.get(&hash(1)).unwrap();
        assert_eq!(record.sources.len(), 2);
        assert_eq!(f.engine.calls().len(), 1);
    }

    #[test]
    fn discovery_from_inactive_source_is_ignored() {
        let mut f = fixture(10);
        let stale = SourceKey::parse(&source_key('c')).unwrap();

        assert_eq!(f.discover(&stale, 1), DiscoveryOutcome::InactiveSource);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn discovery_of_engine_download_is_dropped() {
        let mut f = fixture(10);
        let key = f.add_source('a');
        f.engine.existing.lock().unwrap().insert(hash(1));

        assert_eq!(f.discover(&key, 1), DiscoveryOutcome::AlreadyManaged);
        assert!(f.registry.is_empty());
        assert!(f.engine.calls().is_empty());
    }

    #[test]
    fn discovery_with_checkpoint_on_disk_is_dropped() {
        let mut f = fixture(10);
        let key = f.add_source('a');
        let path = f
            .registry
            .checkpoints()
            .path()
            .join(format!("{}.state", hash(2)));
        std::fs::write(path, b"").unwrap();

        assert_eq!(f.discover(&key, 2), DiscoveryOutcome::AlreadyManaged);
        assert!(f.registry.get(&hash(2)).is_none());
    }

    #[test]
    fn candidate_cap_drops_extra_swarms() {
        let mut f = fixture(3);
        let key = f.add_source('a');

        for n in 1..=3 {
            assert_eq!(f.discover(&key, n), DiscoveryOutcome::Added);
        }
        assert_eq!(f.discover(&key, 4), DiscoveryOutcome::LimitReached);

        assert_eq!(f.registry.len(), 3);
        assert!(f.registry.get(&hash(4)).is_none());
        // Known swarms still gain attribution at the cap.
        let b = f.add_source('b');
        assert_eq!(f.discover(&b, 1), DiscoveryOutcome::Attributed);
    }

    #[test]
    fn removing_only_source_removes_swarm_and_download() {
        let mut f = fixture(10);
        let key = f.add_source('a');
        f.discover(&key, 1);
        f.discover(&key, 2);
        // Only swarm 1 has been picked up by the engine.
        f.registry.adopt(hash(1), "swarm-1").download = Some(DownloadHandle(1));
        f.engine.clear();

        let teardowns = f.registry.remove_source(key.as_str()).unwrap();

        assert_eq!(teardowns.len(), 1);
        assert!(f.registry.is_empty());
        assert!(!f.registry.has_source(&key));
        assert_eq!(f.engine.calls(), vec![EngineCall::Remove(DownloadHandle(1), true)]);
        assert_eq!(f.sources.events.lock().unwrap().last(), Some(&(key, "stop")));
    }

    #[test]
    fn removing_one_of_two_sources_keeps_swarm() {
        let mut f = fixture(10);
        let a = f.add_source('a');
        let b = f.add_source('b');
        f.discover(&a, 1);
        f.discover(&b, 1);
        f.registry.adopt(hash(1), "swarm-1").download = Some(DownloadHandle(1));
        f.engine.clear();

        let teardowns = f.registry.remove_source(a.as_str()).unwrap();

        assert!(teardowns.is_empty());
        let record = f.registry.get(&hash(1)).unwrap();
        assert_eq!(record.sources.len(), 1);
        assert!(record.sources.contains(&b));
        assert!(f.engine.calls().is_empty());
    }

    #[test]
    fn removing_source_leaves_unattributed_engine_swarms() {
        let mut f = fixture(10);
        let key = f.add_source('a');
        let adopted = f.registry.adopt(hash(9), "replayed");
        adopted.download = Some(DownloadHandle(9));
        adopted.state = Some(status(9, DownloadStatus::Stopped, 1.0, 0));

        f.registry.remove_source(key.as_str()).unwrap();
        assert!(f.registry.get(&hash(9)).is_some());
    }

    #[test]
    fn removing_unknown_source_fails() {
        let mut f = fixture(10);
        let err = f.registry.remove_source(&source_key('z')).err().unwrap();
        assert!(matches!(err, MiningError::UnknownSource(_)));

        let err = f.registry.remove_source("bogus").err().unwrap();
        assert!(matches!(err, MiningError::UnknownSource(_)));
    }
}
