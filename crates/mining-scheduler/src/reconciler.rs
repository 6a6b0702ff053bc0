//! Status reconciliation: merges engine status batches into the registry.
//!
//! Each batch refreshes every credit mining record's handle and snapshot,
//! issues at most one forced recheck per error episode, and feeds the two
//! gates the manager acts on:
//!
//! ```text
//! readiness:  batch.len() == persisted checkpoints at startup   (fires once)
//! activation: active + stopped == tracked && >= max_torrents_active
//! ```

use tracing::{error, info};

use mining_core::{DownloadState, InfoHash};

use crate::registry::Registry;

/// Counters gathered from one status batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries in the batch, credit mining or not.
    pub entries: usize,
    /// Credit mining downloads downloading or seeding.
    pub active: usize,
    /// Credit mining downloads stopped, with or without error.
    pub stopped: usize,
    /// Seeding bytes uploaded across credit mining downloads.
    pub uploaded: u64,
    /// Swarms first seen through the engine rather than a source.
    pub adopted: Vec<InfoHash>,
    /// Swarms a forced recheck was issued for.
    pub rechecked: Vec<InfoHash>,
}

impl ReconcileReport {
    /// Credit mining downloads in a settled (running or stopped) state.
    pub fn settled(&self) -> usize {
        self.active + self.stopped
    }
}

impl Registry {
    /// Merge one engine status batch.
    pub fn reconcile(&mut self, batch: &[DownloadState]) -> ReconcileReport {
        let mut report = ReconcileReport {
            entries: batch.len(),
            ..ReconcileReport::default()
        };

        for state in batch.iter().filter(|s| s.credit_mining) {
            let info_hash = state.info_hash;
            if self.get(&info_hash).is_none() {
                report.adopted.push(info_hash);
            }

            let engine = self.engine().clone();
            let record = self.adopt(info_hash, &state.name);
            record.download = Some(state.handle);
            record.state = Some(state.clone());

            if state.status.is_active() {
                report.active += 1;
                record.force_checked = false;
            }
            if state.status.is_stopped() {
                report.stopped += 1;
            }
            report.uploaded += state.seeding_uploaded;

            if state.status.is_error() {
                error!(%info_hash, "got an error for credit mining download");
                if !record.force_checked {
                    info!(%info_hash, handle = %state.handle, "attempting to recheck download");
                    engine.force_recheck(state.handle);
                    record.force_checked = true;
                    report.rechecked.push(info_hash);
                }
            }
        }

        info!(
            active = report.active,
            stopped = report.stopped,
            uploaded = report.uploaded,
            "{} active download(s), {} bytes uploaded",
            report.active,
            report.uploaded
        );

        report
    }
}

/// One-shot signal that persisted downloads have all been replayed.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    expected: usize,
    fired: bool,
}

impl ReadinessGate {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            fired: false,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_ready(&self) -> bool {
        self.fired
    }

    /// Feed a batch size. Returns `true` only on the batch that opens the gate.
    pub fn observe(&mut self, batch_len: usize) -> bool {
        if self.fired || batch_len != self.expected {
            return false;
        }
        self.fired = true;
        true
    }
}

/// Whether enough settled swarms exist to start periodic selection.
pub fn should_activate(report: &ReconcileReport, tracked: usize, max_active: usize) -> bool {
    let settled = report.settled();
    settled == tracked && settled >= max_active
}
