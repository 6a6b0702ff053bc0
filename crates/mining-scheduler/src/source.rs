//! Discovery source contract.
//!
//! Sources report candidates through a [`DiscoverySink`]; the manager
//! drains the sink's channel on a single task so discoveries are applied
//! one at a time, in arrival order.

use tokio::sync::mpsc;

use mining_core::{InfoHash, SourceKey};

/// A candidate swarm surfaced by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub source: SourceKey,
    pub info_hash: InfoHash,
    pub name: String,
}

/// Handle a source uses to report discoveries.
#[derive(Debug, Clone)]
pub struct DiscoverySink {
    key: SourceKey,
    tx: mpsc::UnboundedSender<Discovery>,
}

impl DiscoverySink {
    pub fn new(key: SourceKey, tx: mpsc::UnboundedSender<Discovery>) -> Self {
        Self { key, tx }
    }

    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// Report a candidate. Returns `false` once the manager has shut down.
    pub fn discovered(&self, info_hash: InfoHash, name: impl Into<String>) -> bool {
        self.tx
            .send(Discovery {
                source: self.key.clone(),
                info_hash,
                name: name.into(),
            })
            .is_ok()
    }
}

/// An active discovery subscription.
pub trait Source: Send {
    fn start(&mut self);

    /// Stop reporting. Discoveries already queued are dropped by the registry.
    fn stop(&mut self);
}

/// Builds sources for validated keys.
pub trait SourceFactory: Send + Sync {
    fn create(&self, key: &SourceKey, sink: DiscoverySink) -> Box<dyn Source>;
}
