//! Shared types used across the credit mining crates.
//!
//! A [`SwarmRecord`] is the registry's view of one torrent: who discovered
//! it, which engine download (if any) backs it, and the last status the
//! engine reported for it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdentifierError;

/// Length of a v1 BitTorrent info-hash in bytes.
pub const INFO_HASH_LEN: usize = 20;

fn decode_hex_40(s: &str) -> Result<[u8; INFO_HASH_LEN], IdentifierError> {
    if s.len() != INFO_HASH_LEN * 2 {
        return Err(IdentifierError::Length(s.len()));
    }
    let mut bytes = [0u8; INFO_HASH_LEN];
    hex::decode_to_slice(s, &mut bytes).map_err(|e| IdentifierError::Hex(e.to_string()))?;
    Ok(bytes)
}

// ── Identifiers ───────────────────────────────────────────────────

/// Content identifier of a swarm.
///
/// Ordered bytewise, which is also the order of its hex rendering; policies
/// rely on this for deterministic tie-breaks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    pub const fn new(bytes: [u8; INFO_HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentifierError> {
        decode_hex_40(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for InfoHash {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<InfoHash> for String {
    fn from(value: InfoHash) -> Self {
        value.to_hex()
    }
}

/// Key of a discovery source: a channel public-key digest written as
/// 40 hex characters. Stored lowercase so the same channel never
/// registers twice under different spellings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceKey(String);

impl SourceKey {
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        decode_hex_40(s)?;
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SourceKey {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SourceKey {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceKey> for String {
    fn from(value: SourceKey) -> Self {
        value.0
    }
}

/// Engine-assigned reference to a managed download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DownloadHandle(pub u64);

impl fmt::Display for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dl-{}", self.0)
    }
}

// ── Download status ──────────────────────────────────────────────

/// Lifecycle status of a download as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    AllocatingDiskspace,
    WaitingForHashcheck,
    Hashchecking,
    Metadata,
    Circuits,
    Downloading,
    Seeding,
    Stopped,
    StoppedOnError,
}

impl DownloadStatus {
    /// Downloading or seeding.
    pub fn is_active(self) -> bool {
        matches!(self, DownloadStatus::Downloading | DownloadStatus::Seeding)
    }

    /// Stopped, with or without an error.
    pub fn is_stopped(self) -> bool {
        matches!(self, DownloadStatus::Stopped | DownloadStatus::StoppedOnError)
    }

    pub fn is_error(self) -> bool {
        self == DownloadStatus::StoppedOnError
    }

    pub fn label(self) -> &'static str {
        match self {
            DownloadStatus::AllocatingDiskspace => "allocating",
            DownloadStatus::WaitingForHashcheck => "waiting-hashcheck",
            DownloadStatus::Hashchecking => "hashchecking",
            DownloadStatus::Metadata => "metadata",
            DownloadStatus::Circuits => "circuits",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Seeding => "seeding",
            DownloadStatus::Stopped => "stopped",
            DownloadStatus::StoppedOnError => "stopped-on-error",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of a status batch delivered by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadState {
    pub handle: DownloadHandle,
    pub info_hash: InfoHash,
    pub name: String,
    pub status: DownloadStatus,
    /// Estimated number of distributed copies reachable through peers.
    pub availability: f64,
    /// Bytes uploaded while seeding.
    pub seeding_uploaded: u64,
    /// Whether the engine was asked to manage this download for credit mining.
    pub credit_mining: bool,
}

// ── Swarm record ─────────────────────────────────────────────────

/// Registry entry for one swarm.
#[derive(Debug, Clone, PartialEq)]
pub struct SwarmRecord {
    pub info_hash: InfoHash,
    pub name: String,
    pub download: Option<DownloadHandle>,
    pub state: Option<DownloadState>,
    pub sources: BTreeSet<SourceKey>,
    /// A forced recheck was issued during the current error episode.
    pub force_checked: bool,
}

impl SwarmRecord {
    pub fn new(info_hash: InfoHash, name: impl Into<String>) -> Self {
        Self {
            info_hash,
            name: name.into(),
            download: None,
            state: None,
            sources: BTreeSet::new(),
            force_checked: false,
        }
    }

    /// Last reported status, if the engine has reported this swarm yet.
    pub fn status(&self) -> Option<DownloadStatus> {
        self.state.as_ref().map(|s| s.status)
    }

    pub fn availability(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.availability)
    }

    pub fn uploaded(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.seeding_uploaded)
    }

    /// Handed to the engine and reported on at least once.
    pub fn is_loaded(&self) -> bool {
        self.download.is_some() && self.state.is_some()
    }
}

/// Point-in-time counters for the credit mining subsystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningStats {
    pub tracked: usize,
    pub sources: usize,
    pub active: usize,
    pub stopped: usize,
    pub uploaded: u64,
    pub selector_running: bool,
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn info_hash_parses_hex() {
        let ih = InfoHash::from_hex(HASH).unwrap();
        assert_eq!(ih.to_hex(), HASH);
        assert_eq!(ih.as_bytes()[0], 0x01);
        assert_eq!(ih.to_string(), HASH);
    }

    #[test]
    fn info_hash_rejects_wrong_length() {
        assert_eq!(InfoHash::from_hex("abcd"), Err(IdentifierError::Length(4)));
    }

    #[test]
    fn info_hash_rejects_non_hex() {
        let bad = "zz23456789abcdef0123456789abcdef01234567";
        assert!(matches!(InfoHash::from_hex(bad), Err(IdentifierError::Hex(_))));
    }

    #[test]
    fn info_hash_serializes_as_hex_string() {
        let ih: InfoHash = HASH.parse().unwrap();
        let json = serde_json::to_string(&ih).unwrap();
        assert_eq!(json, format!("\"{HASH}\""));
        let back: InfoHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ih);
    }

    #[test]
    fn info_hash_orders_like_hex() {
        let low = InfoHash::from_hex(&"0".repeat(40)).unwrap();
        let high = InfoHash::from_hex(&"f".repeat(40)).unwrap();
        assert!(low < high);
    }

    #[test]
    fn source_key_is_case_insensitive() {
        let upper = SourceKey::parse(&HASH.to_uppercase()).unwrap();
        let lower = SourceKey::parse(HASH).unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), HASH);
    }

    #[test]
    fn source_key_rejects_short_key() {
        assert!(SourceKey::parse("channel").is_err());
    }

    #[test]
    fn status_classification() {
        assert!(DownloadStatus::Seeding.is_active());
        assert!(DownloadStatus::Downloading.is_active());
        assert!(!DownloadStatus::Hashchecking.is_active());
        assert!(DownloadStatus::StoppedOnError.is_stopped());
        assert!(DownloadStatus::StoppedOnError.is_error());
        assert!(!DownloadStatus::Stopped.is_error());
        assert!(!DownloadStatus::Metadata.is_stopped());
    }

    #[test]
    fn fresh_record_is_not_loaded() {
        let record = SwarmRecord::new(HASH.parse().unwrap(), "ubuntu");
        assert!(!record.is_loaded());
        assert_eq!(record.status(), None);
        assert_eq!(record.uploaded(), 0);
        assert!(record.sources.is_empty());
    }
}
