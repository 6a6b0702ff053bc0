//! mining-scheduler: admission control for credit mining swarms.
//!
//! Decides which swarms discovered by subscribed sources are kept in the
//! download engine and which of them actually run. The scheduler:
//!
//! - Tracks candidate swarms, attributed to the sources that reported them
//! - Merges periodic engine status batches and rechecks failed downloads
//! - Waits for persisted downloads to replay before subscribing sources
//! - Periodically admits the best swarms under the configured policies
//!
//! # Architecture
//!
//! ```text
//! CreditMiningManager
//!   ├── Registry (swarm map + active sources)
//!   │   ├── reconcile() ← engine status batches
//!   │   └── select()    ← selector timer
//!   ├── Policies (UploadPolicy, RandomPolicy, ...)
//!   ├── DownloadEngine (add / restart / stop / recheck / remove)
//!   └── SourceFactory → Source → DiscoverySink → discovery pump
//! ```

pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod manager;
pub mod reconciler;
pub mod registry;
pub mod selector;
pub mod source;

#[cfg(test)]
mod testing;

pub use checkpoint::CheckpointDir;
pub use engine::{AddDownload, DownloadEngine, EngineFuture};
pub use error::{EngineError, MiningError, MiningResult};
pub use manager::{CreditMiningManager, TeardownSummary};
pub use reconciler::{ReadinessGate, ReconcileReport, should_activate};
pub use registry::{DiscoveryOutcome, Registry};
pub use selector::{SelectionReport, admission_set};
pub use source::{Discovery, DiscoverySink, Source, SourceFactory};
