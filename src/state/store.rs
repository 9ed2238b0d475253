//! On-disk handling shared by the registry and ledger files.
//!
//! Both records are small JSON documents that are rewritten in full on every
//! mutation. A rewrite goes through a temp file in the same directory, is
//! fsynced, and is then renamed over the target, so a crash at any point
//! leaves either the old or the new document, never a torn one.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::StateError;

const LOCK_FILE: &str = "tgdrive.lock";

/// A persisted record carrying a format version.
pub(crate) trait Versioned {
    const CURRENT_VERSION: u32;

    fn version(&self) -> u32;
}

/// Result of reading a record from disk.
#[derive(Debug)]
pub(crate) enum Loaded<T> {
    /// No file at the path.
    Absent,
    Record(T),
    /// The file exists but cannot be used. It must not be overwritten in place.
    Unreadable(StateError),
}

/// Read and decode a versioned JSON record.
pub(crate) fn load_record<T>(path: &Path) -> Loaded<T>
where
    T: DeserializeOwned + Versioned,
{
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Loaded::Absent,
        Err(e) => {
            return Loaded::Unreadable(StateError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let record: T = match serde_json::from_slice(&bytes) {
        Ok(record) => record,
        Err(e) => {
            return Loaded::Unreadable(StateError::Parse {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    if record.version() > T::CURRENT_VERSION {
        return Loaded::Unreadable(StateError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: record.version(),
            expected: T::CURRENT_VERSION,
        });
    }

    Loaded::Record(record)
}

/// Atomically replace `path` with the pretty-printed JSON form of `value`.
pub(crate) fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).map_err(|e| StateError::write(path, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tgdrive-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| StateError::write(path, e))?;

    serde_json::to_writer_pretty(&mut tmp, value).map_err(|e| StateError::Serialize {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(b"\n")
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| StateError::write(path, e))?;

    tmp.persist(path)
        .map_err(|e| StateError::write(path, e.error))?;

    // Make the rename itself durable.
    if let Err(e) = sync_dir(dir) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
    Ok(())
}

/// Move an unreadable record out of the way so the next write cannot destroy it.
pub(crate) fn quarantine(path: &Path) -> Result<PathBuf, StateError> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let target = parent_dir(path).join(format!("{}.unreadable-{}", file_name, stamp));
    std::fs::rename(path, &target).map_err(|e| StateError::write(path, e))?;
    Ok(target)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Exclusive advisory lock on the state directory.
///
/// The registry and ledger assume a single writer. Holding this for the whole
/// `sync` or `register` invocation turns a second concurrent instance into a
/// fast failure instead of a lost update. Released when dropped.
#[derive(Debug)]
pub struct StateLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl StateLock {
    pub fn acquire(state_dir: &Path) -> Result<Self, StateError> {
        std::fs::create_dir_all(state_dir).map_err(|e| StateError::write(state_dir, e))?;
        let path = state_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StateError::write(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(true) => {
                tracing::debug!(lock = %path.display(), "acquired state lock");
                Ok(Self { _file: file, path })
            }
            Ok(false) => Err(StateError::Locked { path }),
            Err(e) => Err(StateError::write(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        version: u32,
        names: Vec<String>,
    }

    impl Versioned for Sample {
        const CURRENT_VERSION: u32 = 1;

        fn version(&self) -> u32 {
            self.version
        }
    }

    #[test]
    fn test_load_absent() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_record::<Sample>(&dir.path().join("missing.json"));
        assert!(matches!(loaded, Loaded::Absent));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");
        let sample = Sample {
            version: 1,
            names: vec!["a".into(), "b".into()],
        };
        write_record(&path, &sample).unwrap();
        match load_record::<Sample>(&path) {
            Loaded::Record(loaded) => assert_eq!(loaded, sample),
            other => panic!("unexpected {:?}", other),
        }
        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_load_corrupt_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            load_record::<Sample>(&path),
            Loaded::Unreadable(StateError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_newer_version_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(&path, br#"{"version": 9, "names": []}"#).unwrap();
        assert!(matches!(
            load_record::<Sample>(&path),
            Loaded::Unreadable(StateError::UnsupportedVersion { found: 9, .. })
        ));
    }

    #[test]
    fn test_write_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let sample = Sample {
            version: 1,
            names: vec![],
        };
        let err = write_record(&blocker.join("sample.json"), &sample).unwrap_err();
        assert!(matches!(err, StateError::Write { .. }));
    }

    #[test]
    fn test_quarantine_moves_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, b"garbage").unwrap();
        let moved = quarantine(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read(&moved).unwrap(), b"garbage");
        assert!(moved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("progress.json.unreadable-"));
    }

    #[test]
    fn test_state_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let first = StateLock::acquire(dir.path()).unwrap();
        assert!(first.path().exists());
        assert!(matches!(
            StateLock::acquire(dir.path()),
            Err(StateError::Locked { .. })
        ));
        drop(first);
        assert!(StateLock::acquire(dir.path()).is_ok());
    }
}
