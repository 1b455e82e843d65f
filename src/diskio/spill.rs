use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};

static NEXT_SPILL_ID: AtomicU64 = AtomicU64::new(0);

/// Caller-owned directory that receives spill files.
///
/// The directory itself is never created or removed here; only the files
/// handed out by [`SpillDir::create`] are.
#[derive(Debug, Clone)]
pub struct SpillDir {
    path: PathBuf,
}

impl SpillDir {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(Error::MissingTempDir(path));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates a fresh, empty file named `<prefix>-<random>-<seq>.tmp`.
    pub fn create(&self, prefix: &str) -> Result<(PathBuf, File)> {
        let mut rng = rand::rng();
        loop {
            let seq = NEXT_SPILL_ID.fetch_add(1, Ordering::Relaxed);
            let name = format!("{prefix}-{:08x}-{seq}.tmp", rng.random::<u32>());
            let path = self.path.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!(path = %path.display(), "created spill file");
                    return Ok((path, file));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Moves `from` over `to`, falling back to copy + remove when the two paths
/// live on different filesystems.
pub fn replace_file(from: &Path, to: &Path) -> Result<()> {
    if let Err(err) = fs::rename(from, to) {
        debug!(%err, from = %from.display(), to = %to.display(), "rename failed, copying");
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

pub fn remove_spill(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    debug!(path = %path.display(), "removed spill file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SpillDir::new(&missing),
            Err(Error::MissingTempDir(p)) if p == missing
        ));
    }

    #[test]
    fn test_create_hands_out_distinct_files() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDir::new(dir.path()).unwrap();
        let (a, _) = spill.create("run").unwrap();
        let (b, _) = spill.create("run").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(dir.path()));
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("run-"));

        remove_spill(&a).unwrap();
        remove_spill(&b).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_replace_file_overwrites_target() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDir::new(dir.path()).unwrap();
        let (from, mut file) = spill.create("out").unwrap();
        file.write_all(b"new").unwrap();
        drop(file);

        let target = dir.path().join("target.bin");
        fs::write(&target, b"old contents").unwrap();
        replace_file(&from, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!from.exists());
    }
}
