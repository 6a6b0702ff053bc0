//! The engine's persisted download state directory.
//!
//! Every download the engine persists leaves a `<infohash>.state` file.
//! The count taken at startup sets the readiness gate; the per-hash check
//! keeps discoveries from racing downloads that have not been loaded yet.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use mining_core::InfoHash;

const STATE_EXTENSION: &str = "state";

#[derive(Debug, Clone)]
pub struct CheckpointDir {
    path: PathBuf,
}

impl CheckpointDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Paths of the `*.state` files directly inside the directory, sorted.
    ///
    /// A missing directory yields nothing. Whoever replays checkpoints
    /// should walk this list so the replay matches [`Self::count`].
    pub fn state_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == STATE_EXTENSION))
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.state_files().len()
    }

    pub fn contains(&self, info_hash: &InfoHash) -> bool {
        self.path
            .join(format!("{}.{STATE_EXTENSION}", info_hash.to_hex()))
            .is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_state_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{}.state", "a".repeat(40))), b"").unwrap();
        std::fs::write(dir.path().join(format!("{}.state", "b".repeat(40))), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested.state")).unwrap();

        assert_eq!(CheckpointDir::new(dir.path()).count(), 2);
    }

    #[test]
    fn state_files_lists_what_count_counts() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join(format!("{}.state", "b".repeat(40)));
        let a = dir.path().join(format!("{}.state", "a".repeat(40)));
        std::fs::write(&b, b"").unwrap();
        std::fs::write(&a, b"").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join(format!("{}.state", "c".repeat(40))), b"").unwrap();

        let checkpoints = CheckpointDir::new(dir.path());
        assert_eq!(checkpoints.state_files(), vec![a, b]);
        assert_eq!(checkpoints.count(), 2);
    }

    #[test]
    fn missing_directory_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(CheckpointDir::new(dir.path().join("absent")).count(), 0);
    }

    #[test]
    fn contains_matches_hex_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let ih = InfoHash::new([0xab; 20]);
        let checkpoints = CheckpointDir::new(dir.path());
        assert!(!checkpoints.contains(&ih));

        std::fs::write(dir.path().join(format!("{}.state", ih.to_hex())), b"").unwrap();
        assert!(checkpoints.contains(&ih));
    }
}
