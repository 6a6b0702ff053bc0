//! Credit mining manager: the async control surface.
//!
//! All mutable state (registry, policies, gates, timer) sits behind one
//! mutex, and every entry point holds it for the whole operation, so
//! discoveries, status batches and selector ticks are applied strictly
//! one after another.
//!
//! ```text
//! Source ──DiscoverySink──► pump task ──► on_discovery ─┐
//! Engine ──status batch──────────────────► reconcile ───┼─► ManagerState
//! Selector timer ──tick──────────────────► select_now ──┘     (Mutex)
//! ```
//!
//! Background work (discovery pump, source activation, selector timer)
//! holds only a weak reference to the manager and stops on `shutdown`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use mining_core::{DownloadState, InfoHash, MiningSettings, MiningStats, SourceKey, SwarmRecord};
use mining_policy::{default_policies, Policy};

use crate::engine::{DownloadEngine, EngineFuture};
use crate::error::MiningError;
use crate::reconciler::{should_activate, ReadinessGate, ReconcileReport};
use crate::registry::{DiscoveryOutcome, Registry};
use crate::selector::SelectionReport;
use crate::source::{Discovery, SourceFactory};

/// Outcome of an aggregated set of engine teardowns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    pub requested: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TeardownSummary {
    fn merge(&mut self, other: TeardownSummary) {
        self.requested += other.requested;
        self.completed += other.completed;
        self.failed += other.failed;
    }
}

/// Running selector loop.
struct SelectorTimer {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

impl SelectorTimer {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn cancel(self) {
        self.stop_tx.send_replace(true);
        self.handle.abort();
    }
}

struct ManagerState {
    registry: Registry,
    policies: Vec<Box<dyn Policy>>,
    /// Set by `initialize` once persisted checkpoints are counted.
    readiness: Option<ReadinessGate>,
    selector: Option<SelectorTimer>,
    discovery_rx: Option<mpsc::UnboundedReceiver<Discovery>>,
    tasks: Vec<JoinHandle<()>>,
    last_report: ReconcileReport,
}

struct Shared {
    settings: Arc<MiningSettings>,
    factory: Arc<dyn SourceFactory>,
    discovery_tx: mpsc::UnboundedSender<Discovery>,
    ready_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    state: Mutex<ManagerState>,
}

/// Handle to the credit mining subsystem. Cheap to clone.
#[derive(Clone)]
pub struct CreditMiningManager {
    shared: Arc<Shared>,
}

impl CreditMiningManager {
    pub fn new(
        settings: MiningSettings,
        engine: Arc<dyn DownloadEngine>,
        factory: Arc<dyn SourceFactory>,
    ) -> Self {
        let settings = Arc::new(settings);
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let (ready_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);

        let state = ManagerState {
            registry: Registry::new(settings.clone(), engine),
            policies: Vec::new(),
            readiness: None,
            selector: None,
            discovery_rx: Some(discovery_rx),
            tasks: Vec::new(),
            last_report: ReconcileReport::default(),
        };

        Self {
            shared: Arc::new(Shared {
                settings,
                factory,
                discovery_tx,
                ready_tx,
                shutdown_tx,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn settings(&self) -> &MiningSettings {
        &self.shared.settings
    }

    /// Install policies, count persisted state and start background work.
    ///
    /// `None` selects the default pair: half the active set by upload,
    /// half at random. Configured sources are subscribed once the first
    /// status batch covering every persisted download has been reconciled.
    pub async fn initialize(&self, policies: Option<Vec<Box<dyn Policy>>>) {
        info!("starting credit mining manager");

        let save_path = &self.shared.settings.save_path;
        if let Err(e) = tokio::fs::create_dir_all(save_path).await {
            error!(path = ?save_path, error = %e, "failed to create credit mining directory");
        }

        let mut state = self.shared.state.lock().await;
        if state.readiness.is_some() {
            warn!("credit mining manager already initialized");
            return;
        }

        state.policies = policies.unwrap_or_else(default_policies);
        let checkpoints = state.registry.checkpoints().count();
        state.readiness = Some(ReadinessGate::new(checkpoints));
        info!(
            checkpoints,
            policies = state.policies.len(),
            "credit mining manager initialized"
        );

        let weak = Arc::downgrade(&self.shared);
        if let Some(rx) = state.discovery_rx.take() {
            let pump = tokio::spawn(run_discovery_pump(
                weak.clone(),
                rx,
                self.shared.shutdown_tx.subscribe(),
            ));
            state.tasks.push(pump);
        }

        let activation = tokio::spawn(activate_sources(
            weak,
            self.shared.ready_tx.subscribe(),
            self.shared.shutdown_tx.subscribe(),
            self.shared.settings.sources.clone(),
        ));
        state.tasks.push(activation);
    }

    /// Subscribe to a source. Returns whether a new source was started.
    pub async fn add_source(&self, key: &str) -> bool {
        if *self.shared.shutdown_tx.borrow() {
            warn!(source = key, "manager is shut down, not adding source");
            return false;
        }

        let mut state = self.shared.state.lock().await;
        let was_empty = state.registry.is_empty();

        match state
            .registry
            .add_source(key, self.shared.factory.as_ref(), &self.shared.discovery_tx)
        {
            Ok(_) => {
                // Nothing to rank yet; activation restarts the timer later.
                if was_empty && let Some(timer) = state.selector.take() {
                    timer.cancel();
                    debug!("selector paused until swarms are loaded");
                }
                true
            }
            Err(MiningError::DuplicateSource(key)) => {
                info!(source = %key, "already have source");
                false
            }
            Err(e) => {
                error!(error = %e, "cannot add source");
                false
            }
        }
    }

    /// Withdraw a source and wait for the teardowns it caused.
    pub async fn remove_source(&self, key: &str) -> TeardownSummary {
        let teardowns = {
            let mut state = self.shared.state.lock().await;
            match state.registry.remove_source(key) {
                Ok(teardowns) => {
                    if let Some(timer) = state.selector.take() {
                        timer.cancel();
                    }
                    teardowns
                }
                Err(e) => {
                    error!(error = %e, "cannot remove source");
                    return TeardownSummary::default();
                }
            }
        };

        await_teardowns(teardowns).await
    }

    /// Apply one discovery. Normally fed by the discovery pump.
    pub async fn on_discovery(&self, discovery: Discovery) -> DiscoveryOutcome {
        let mut state = self.shared.state.lock().await;
        state.registry.on_discovery(discovery)
    }

    /// Merge one engine status batch and evaluate the gates.
    pub async fn reconcile(&self, batch: &[DownloadState]) -> ReconcileReport {
        let mut state = self.shared.state.lock().await;
        let report = state.registry.reconcile(batch);

        if let Some(gate) = state.readiness.as_mut()
            && gate.observe(batch.len())
        {
            info!(checkpoints = gate.expected(), "persisted downloads loaded, credit mining ready");
            self.shared.ready_tx.send_replace(true);
        }

        // A batch may still arrive after shutdown; the selector stays down.
        let stopped = *self.shared.shutdown_tx.borrow();
        let running = state.selector.as_ref().is_some_and(SelectorTimer::is_running);
        if !stopped
            && !running
            && should_activate(
                &report,
                state.registry.len(),
                self.shared.settings.max_torrents_active,
            )
        {
            state.selector = Some(self.spawn_selector());
        }

        state.last_report = report.clone();
        report
    }

    /// Run one selector tick right now.
    pub async fn select_now(&self) -> SelectionReport {
        let (report, teardowns) = {
            let mut state = self.shared.state.lock().await;
            let ManagerState {
                registry, policies, ..
            } = &mut *state;
            registry.select(policies)
        };

        for teardown in teardowns {
            tokio::spawn(async move {
                if let Err(e) = teardown.await {
                    warn!(error = %e, "failed to remove dead torrent");
                }
            });
        }

        report
    }

    /// Stop background work, optionally withdrawing every source first.
    pub async fn shutdown(&self, remove_downloads: bool) -> TeardownSummary {
        info!(remove_downloads, "shutting down credit mining manager");

        let mut summary = TeardownSummary::default();
        if remove_downloads {
            for key in self.sources().await {
                summary.merge(self.remove_source(key.as_str()).await);
            }
        }

        self.shared.shutdown_tx.send_replace(true);
        let mut state = self.shared.state.lock().await;
        if let Some(timer) = state.selector.take() {
            timer.cancel();
        }
        for task in state.tasks.drain(..) {
            task.abort();
        }

        summary
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn stats(&self) -> MiningStats {
        let state = self.shared.state.lock().await;
        MiningStats {
            tracked: state.registry.len(),
            sources: state.registry.source_count(),
            active: state.last_report.active,
            stopped: state.last_report.stopped,
            uploaded: state.last_report.uploaded,
            selector_running: state.selector.as_ref().is_some_and(SelectorTimer::is_running),
            ready: state.readiness.as_ref().is_some_and(ReadinessGate::is_ready),
        }
    }

    pub async fn swarm(&self, info_hash: &InfoHash) -> Option<SwarmRecord> {
        self.shared.state.lock().await.registry.get(info_hash).cloned()
    }

    pub async fn swarms(&self) -> Vec<SwarmRecord> {
        let state = self.shared.state.lock().await;
        let mut swarms: Vec<SwarmRecord> = state.registry.swarms().cloned().collect();
        swarms.sort_by_key(|r| r.info_hash);
        swarms
    }

    pub async fn sources(&self) -> Vec<SourceKey> {
        self.shared.state.lock().await.registry.source_keys()
    }

    pub async fn is_selector_running(&self) -> bool {
        let state = self.shared.state.lock().await;
        state.selector.as_ref().is_some_and(SelectorTimer::is_running)
    }

    /// Receiver that flips to `true` once persisted downloads are replayed.
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.shared.ready_tx.subscribe()
    }

    fn spawn_selector(&self) -> SelectorTimer {
        let interval = self.shared.settings.auto_manage_interval;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_selector(Arc::downgrade(&self.shared), interval, stop_rx));
        info!(interval_secs = interval.as_secs(), "selector started");
        SelectorTimer { handle, stop_tx }
    }
}

/// Await every teardown, counting completions and failures.
async fn await_teardowns(teardowns: Vec<EngineFuture>) -> TeardownSummary {
    let mut summary = TeardownSummary {
        requested: teardowns.len(),
        ..TeardownSummary::default()
    };

    let mut set = JoinSet::new();
    for teardown in teardowns {
        set.spawn(teardown);
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => summary.completed += 1,
            Ok(Err(e)) => {
                warn!(error = %e, "download teardown failed");
                summary.failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "download teardown task aborted");
                summary.failed += 1;
            }
        }
    }

    summary
}

/// Periodic selector. The first tick fires immediately.
async fn run_selector(shared: Weak<Shared>, interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                CreditMiningManager { shared }.select_now().await;
            }
            _ = stop.changed() => {
                debug!("selector stopped");
                break;
            }
        }
    }
}

/// Drain source discoveries into the registry, one at a time.
async fn run_discovery_pump(
    shared: Weak<Shared>,
    mut rx: mpsc::UnboundedReceiver<Discovery>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            discovery = rx.recv() => {
                let Some(discovery) = discovery else {
                    break;
                };
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                CreditMiningManager { shared }.on_discovery(discovery).await;
            }
            _ = shutdown.changed() => {
                debug!("discovery pump shutting down");
                break;
            }
        }
    }
}

/// Subscribe the configured sources once the readiness gate opens.
async fn activate_sources(
    shared: Weak<Shared>,
    mut ready: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
    sources: Vec<String>,
) {
    let ready = tokio::select! {
        fired = ready.wait_for(|ready| *ready) => fired.is_ok(),
        _ = shutdown.wait_for(|stop| *stop) => false,
    };
    if !ready {
        return;
    }

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let manager = CreditMiningManager { shared };
    for key in &sources {
        manager.add_source(key).await;
    }
    debug!(count = sources.len(), "configured sources activated");
}
