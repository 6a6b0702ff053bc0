//! Run mode: wires the manager to the simulated engine and drives it.
//!
//! The daemon:
//! 1. Creates the state directory and replays persisted downloads
//! 2. Builds feed sources and the credit mining manager
//! 3. Feeds an engine status batch to the manager every interval
//! 4. On Ctrl-C, stops the status loop and shuts the manager down

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use mining_core::MiningSettings;
use mining_scheduler::CreditMiningManager;
use mining_sim::{FeedSources, SimulatedEngine};

pub struct Options {
    pub settings: MiningSettings,
    pub feed: Option<PathBuf>,
    pub status_interval: u64,
    pub feed_pace: Option<u64>,
    pub seed: u64,
}

pub async fn run(opts: Options) -> anyhow::Result<()> {
    let Options {
        settings,
        feed,
        status_interval,
        feed_pace,
        seed,
    } = opts;
    info!("credit mining daemon starting");

    std::fs::create_dir_all(&settings.state_dir)
        .with_context(|| format!("create state dir {}", settings.state_dir.display()))?;

    // ── Collaborators ──────────────────────────────────────────

    let engine = Arc::new(SimulatedEngine::with_seed(seed).with_state_dir(&settings.state_dir));

    let mut sources = match &feed {
        Some(path) => FeedSources::from_file(path)
            .with_context(|| format!("load feed {}", path.display()))?,
        None => FeedSources::new(),
    };
    if let Some(secs) = feed_pace {
        sources = sources.with_pace(Duration::from_secs(secs.max(1)));
    }

    // ── Manager ────────────────────────────────────────────────

    let manager = CreditMiningManager::new(settings, engine.clone(), Arc::new(sources));
    manager.initialize(None).await;

    let restored = engine.load_checkpoints();
    info!(restored, "engine session ready");

    // ── Status loop ────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status_handle = tokio::spawn(run_status_loop(
        manager.clone(),
        engine.clone(),
        Duration::from_secs(status_interval.max(1)),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("install Ctrl-C handler")?;
    info!("shutdown signal received");
    shutdown_tx.send_replace(true);

    if let Err(e) = status_handle.await {
        warn!(error = %e, "status loop ended abnormally");
    }

    let summary = manager.shutdown(false).await;
    let stats = manager.stats().await;
    info!(
        tracked = stats.tracked,
        uploaded = stats.uploaded,
        teardowns = summary.requested,
        "credit mining daemon stopped"
    );
    Ok(())
}

/// Report engine status to the manager until shutdown.
///
/// The first batch goes out immediately so the readiness check sees
/// exactly the replayed downloads.
pub async fn run_status_loop(
    manager: CreditMiningManager,
    engine: Arc<SimulatedEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let batch = engine.status_batch();
                manager.reconcile(&batch).await;
                engine.advance();

                let stats = manager.stats().await;
                debug!(
                    tracked = stats.tracked,
                    sources = stats.sources,
                    active = stats.active,
                    stopped = stats.stopped,
                    uploaded = stats.uploaded,
                    selector = stats.selector_running,
                    ready = stats.ready,
                    "credit mining status"
                );
            }
            _ = shutdown.changed() => {
                info!("status loop shutting down");
                break;
            }
        }
    }
}

/// Human-readable summary of validated settings.
pub fn describe(settings: &MiningSettings) -> String {
    let summary = serde_json::json!({
        "max_torrents_active": settings.max_torrents_active,
        "max_torrents_listed": settings.max_torrents_listed,
        "auto_manage_interval_secs": settings.auto_manage_interval.as_secs(),
        "hops": settings.hops,
        "save_path": settings.save_path.display().to_string(),
        "state_dir": settings.state_dir.display().to_string(),
        "dead_swarm_availability": settings.dead_swarm_availability,
        "sources": settings.sources,
    });
    format!("{summary:#}")
}
