//! Selector: the periodic admission decision.
//!
//! Every tick ranks the loaded swarms with each policy, interleaves the
//! rankings round-robin into an admission set, then moves the engine
//! towards it: admitted-but-stopped swarms are restarted, running swarms
//! outside the set are paused, or purged when nobody can serve them.

use std::collections::HashSet;

use tracing::{debug, info};

use mining_core::{DownloadStatus, InfoHash, SwarmRecord};
use mining_policy::Policy;

use crate::engine::EngineFuture;
use crate::registry::Registry;

/// Actions taken by one selector tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionReport {
    pub admitted: Vec<InfoHash>,
    pub started: Vec<InfoHash>,
    pub stopped: Vec<InfoHash>,
    /// Dead swarms removed from the registry and the engine.
    pub removed: Vec<InfoHash>,
}

/// Interleave policy rankings into at most `limit` distinct swarms.
///
/// Draw `k` comes from ranking `k mod rankings.len()`, taking its best
/// swarm not already admitted. Exhausted rankings are skipped, so the
/// result is shorter than `limit` only when every ranking has run dry.
pub fn admission_set(rankings: Vec<Vec<InfoHash>>, limit: usize) -> Vec<InfoHash> {
    let n = rankings.len();
    let mut cursors: Vec<_> = rankings.into_iter().map(Vec::into_iter).collect();
    let mut exhausted = vec![false; n];
    let mut chosen = HashSet::new();
    let mut admitted = Vec::with_capacity(limit);

    let mut k = 0;
    while admitted.len() < limit && exhausted.iter().any(|done| !done) {
        let idx = k % n;
        k += 1;
        if exhausted[idx] {
            continue;
        }
        match cursors[idx].find(|ih| !chosen.contains(ih)) {
            Some(ih) => {
                chosen.insert(ih);
                admitted.push(ih);
            }
            None => exhausted[idx] = true,
        }
    }

    admitted
}

impl Registry {
    /// Run one selection tick.
    ///
    /// Returns the tick's report and the teardown futures of purged swarms;
    /// the caller decides whether to await or detach them.
    pub fn select(
        &mut self,
        policies: &mut [Box<dyn Policy>],
    ) -> (SelectionReport, Vec<EngineFuture>) {
        let mut report = SelectionReport::default();
        let mut teardowns = Vec::new();

        if policies.is_empty() || self.is_empty() {
            debug!("nothing to select");
            return (report, teardowns);
        }

        let mut loaded: Vec<&SwarmRecord> = self.swarms().filter(|r| r.is_loaded()).collect();
        loaded.sort_by_key(|r| r.info_hash);

        let rankings: Vec<Vec<InfoHash>> = policies
            .iter_mut()
            .map(|p| {
                debug!(policy = p.name(), candidates = loaded.len(), "ranking swarms");
                p.rank(&loaded)
            })
            .collect();
        let limit = self.settings().max_torrents_active.min(self.len());
        report.admitted = admission_set(rankings, limit);

        let admitted: HashSet<InfoHash> = report.admitted.iter().copied().collect();
        let threshold = self.settings().dead_swarm_availability;
        let engine = self.engine().clone();

        let mut tracked: Vec<InfoHash> = self.swarms().map(|r| r.info_hash).collect();
        tracked.sort();

        for info_hash in tracked {
            let Some(record) = self.get(&info_hash) else {
                continue;
            };
            let (Some(handle), Some(state)) = (record.download, record.state.as_ref()) else {
                continue;
            };

            if admitted.contains(&info_hash) {
                if state.status == DownloadStatus::Stopped {
                    info!(%info_hash, "starting torrent");
                    engine.restart(handle);
                    report.started.push(info_hash);
                }
            } else if !state.status.is_stopped() {
                if state.availability < threshold {
                    info!(%info_hash, availability = state.availability, "removing torrent");
                    self.remove_swarm(&info_hash);
                    teardowns.push(engine.remove_download(handle, true));
                    report.removed.push(info_hash);
                } else {
                    info!(%info_hash, "stopping torrent");
                    engine.stop(handle);
                    report.stopped.push(info_hash);
                }
            }
        }

        info!(
            admitted = report.admitted.len(),
            removed = report.removed.len(),
            "started {} torrent(s), stopped {} torrent(s)",
            report.started.len(),
            report.stopped.len() + report.removed.len()
        );

        (report, teardowns)
    }
}
