//! Feed-driven discovery sources.
//!
//! A feed file maps source keys to the swarms each source advertises:
//!
//! ```json
//! {
//!   "4f0c...e1": [
//!     { "info_hash": "5b8d...42", "name": "ubuntu-24.04.iso" }
//!   ]
//! }
//! ```
//!
//! Sources replay their entries when started, either all at once or one
//! per `pace` tick. A key without a feed yields a source that never
//! reports anything.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use mining_core::{InfoHash, SourceKey};
use mining_scheduler::{DiscoverySink, Source, SourceFactory};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read feed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse feed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One swarm advertised by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub info_hash: InfoHash,
    pub name: String,
}

impl FeedEntry {
    pub fn new(info_hash: InfoHash, name: impl Into<String>) -> Self {
        Self {
            info_hash,
            name: name.into(),
        }
    }
}

/// Source factory backed by static feeds.
#[derive(Debug, Clone, Default)]
pub struct FeedSources {
    feeds: BTreeMap<SourceKey, Arc<Vec<FeedEntry>>>,
    pace: Option<Duration>,
}

impl FeedSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self, FeedError> {
        let content = std::fs::read_to_string(path)?;
        let sources = Self::from_json_str(&content)?;
        info!(path = %path.display(), feeds = sources.feeds.len(), "loaded discovery feeds");
        Ok(sources)
    }

    pub fn from_json_str(json: &str) -> Result<Self, FeedError> {
        let feeds: BTreeMap<SourceKey, Vec<FeedEntry>> = serde_json::from_str(json)?;
        Ok(Self {
            feeds: feeds.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            pace: None,
        })
    }

    /// Report one entry per `pace` instead of the whole feed at start.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn insert(&mut self, key: SourceKey, entries: Vec<FeedEntry>) {
        self.feeds.insert(key, Arc::new(entries));
    }

    pub fn keys(&self) -> impl Iterator<Item = &SourceKey> {
        self.feeds.keys()
    }
}

impl SourceFactory for FeedSources {
    fn create(&self, key: &SourceKey, sink: DiscoverySink) -> Box<dyn Source> {
        let entries = self.feeds.get(key).cloned().unwrap_or_default();
        if entries.is_empty() {
            debug!(source = %key, "no feed for source");
        }
        Box::new(FeedSource {
            sink,
            entries,
            pace: self.pace,
            task: None,
        })
    }
}

/// A source replaying a fixed feed.
pub struct FeedSource {
    sink: DiscoverySink,
    entries: Arc<Vec<FeedEntry>>,
    pace: Option<Duration>,
    task: Option<JoinHandle<()>>,
}

impl Source for FeedSource {
    fn start(&mut self) {
        let Some(pace) = self.pace else {
            for entry in self.entries.iter() {
                self.sink.discovered(entry.info_hash, entry.name.clone());
            }
            return;
        };

        let sink = self.sink.clone();
        let entries = self.entries.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pace);
            for entry in entries.iter() {
                ticker.tick().await;
                if !sink.discovered(entry.info_hash, entry.name.clone()) {
                    break;
                }
            }
            debug!(source = %sink.key(), "feed exhausted");
        }));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedSource {
    fn drop(&mut self) {
        self.stop();
    }
}
