use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use crate::error::PlaybackError;

/// Write-once-read-once-delete storage for speech chunk files.
pub trait ScratchStorage: Send + Sync {
    fn write_temp(&self, bytes: &[u8]) -> Result<PathBuf, PlaybackError>;

    /// Best effort; a missing file is not an error.
    fn delete(&self, path: &Path);
}

/// Scratch storage under a dedicated subdirectory of the system temp dir.
///
/// File names are timestamp-qualified plus a process-local counter so no two
/// chunks ever share a name, even when written within the same millisecond.
#[derive(Debug)]
pub struct TempDirScratch {
    dir: PathBuf,
    counter: AtomicU64,
}

impl TempDirScratch {
    pub fn new() -> Self {
        Self::in_dir(std::env::temp_dir().join("chat-speech"))
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for TempDirScratch {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchStorage for TempDirScratch {
    fn write_temp(&self, bytes: &[u8]) -> Result<PathBuf, PlaybackError> {
        fs::create_dir_all(&self.dir)
            .map_err(|error| PlaybackError::io("creating scratch dir", &self.dir, error))?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let serial = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("chunk-{millis}-{serial}.mp3"));

        fs::write(&path, bytes).map_err(|error| PlaybackError::io("writing chunk", &path, error))?;
        Ok(path)
    }

    fn delete(&self, path: &Path) {
        if let Err(error) = fs::remove_file(path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to delete scratch chunk {}: {error}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ScratchStorage, TempDirScratch};

    #[test]
    fn chunk_files_never_collide() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = TempDirScratch::in_dir(dir.path());

        let first = scratch.write_temp(b"a").expect("write");
        let second = scratch.write_temp(b"b").expect("write");

        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).expect("read"), b"a");
    }

    #[test]
    fn delete_tolerates_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = TempDirScratch::in_dir(dir.path());

        let path = scratch.write_temp(b"x").expect("write");
        scratch.delete(&path);
        scratch.delete(&path);
        assert!(!path.exists());
    }
}
