//! Test doubles shared by the scheduler's unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use mining_core::{DownloadHandle, DownloadState, DownloadStatus, InfoHash, SourceKey};

use crate::engine::{AddDownload, DownloadEngine, EngineFuture};
use crate::error::EngineError;
use crate::source::{DiscoverySink, Source, SourceFactory};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Add(AddDownload),
    Restart(DownloadHandle),
    Stop(DownloadHandle),
    Recheck(DownloadHandle),
    Remove(DownloadHandle, bool),
}

/// Engine that records every call. Removals complete immediately, and
/// fail for handles listed in `failing`.
#[derive(Default)]
pub struct RecordingEngine {
    pub calls: Mutex<Vec<EngineCall>>,
    pub existing: Mutex<HashSet<InfoHash>>,
    pub failing: Mutex<HashSet<DownloadHandle>>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn push(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DownloadEngine for RecordingEngine {
    fn has_download(&self, info_hash: &InfoHash) -> bool {
        self.existing.lock().unwrap().contains(info_hash)
    }

    fn add_download(&self, request: AddDownload) {
        self.push(EngineCall::Add(request));
    }

    fn restart(&self, handle: DownloadHandle) {
        self.push(EngineCall::Restart(handle));
    }

    fn stop(&self, handle: DownloadHandle) {
        self.push(EngineCall::Stop(handle));
    }

    fn force_recheck(&self, handle: DownloadHandle) {
        self.push(EngineCall::Recheck(handle));
    }

    fn remove_download(&self, handle: DownloadHandle, remove_state: bool) -> EngineFuture {
        self.push(EngineCall::Remove(handle, remove_state));
        let failed = self.failing.lock().unwrap().contains(&handle);
        Box::pin(async move {
            if failed {
                Err(EngineError::Io(format!("cannot delete files of {handle}")))
            } else {
                Ok(())
            }
        })
    }
}

/// Source factory whose sources only record lifecycle transitions.
#[derive(Default)]
pub struct NullSources {
    pub events: Arc<Mutex<Vec<(SourceKey, &'static str)>>>,
}

struct NullSource {
    key: SourceKey,
    events: Arc<Mutex<Vec<(SourceKey, &'static str)>>>,
}

impl Source for NullSource {
    fn start(&mut self) {
        self.events.lock().unwrap().push((self.key.clone(), "start"));
    }

    fn stop(&mut self) {
        self.events.lock().unwrap().push((self.key.clone(), "stop"));
    }
}

impl SourceFactory for NullSources {
    fn create(&self, key: &SourceKey, _sink: DiscoverySink) -> Box<dyn Source> {
        Box::new(NullSource {
            key: key.clone(),
            events: self.events.clone(),
        })
    }
}

pub fn hash(n: u8) -> InfoHash {
    let mut bytes = [0u8; 20];
    bytes[19] = n;
    InfoHash::new(bytes)
}

pub fn source_key(c: char) -> String {
    c.to_string().repeat(40)
}

pub fn status(n: u8, status: DownloadStatus, availability: f64, uploaded: u64) -> DownloadState {
    DownloadState {
        handle: DownloadHandle(u64::from(n)),
        info_hash: hash(n),
        name: format!("swarm-{n}"),
        status,
        availability,
        seeding_uploaded: uploaded,
        credit_mining: true,
    }
}
