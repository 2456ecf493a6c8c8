//! Persistence helpers shared by every store: atomic JSON writes and
//! tolerant JSON reads.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const STATE_VERSION: u32 = 1;

pub(crate) fn default_state_version() -> u32 {
    STATE_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    #[error("io error at {path}: {message}")]
    Io { path: String, message: String },
    #[error("serde error at {path}: {message}")]
    Serde { path: String, message: String },
    #[error("unsupported {kind} version {version}, expected {expected}")]
    UnsupportedVersion {
        kind: String,
        version: u32,
        expected: u32,
    },
}

impl PersistError {
    pub(crate) fn io(path: &Path, err: impl ToString) -> Self {
        PersistError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn serde(path: &Path, err: impl ToString) -> Self {
        PersistError::Serde {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

pub(crate) fn validate_version(kind: &str, version: u32) -> Result<(), PersistError> {
    if version == STATE_VERSION {
        Ok(())
    } else {
        Err(PersistError::UnsupportedVersion {
            kind: kind.to_string(),
            version,
            expected: STATE_VERSION,
        })
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| PersistError::io(parent, err))?;
    }
    let temp_path = temp_path_for(path);
    fs::write(&temp_path, bytes).map_err(|err| PersistError::io(&temp_path, err))?;
    fs::rename(&temp_path, path).map_err(|err| PersistError::io(path, err))?;
    Ok(())
}

pub(crate) fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| PersistError::serde(path, err))?;
    write_bytes_atomic(path, &bytes)
}

/// Reads a JSON file, returning `Ok(None)` when it does not exist.
pub(crate) fn read_json_if_exists<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, PersistError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(PersistError::io(path, err)),
    };
    let value = serde_json::from_slice(&bytes).map_err(|err| PersistError::serde(path, err))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u64,
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("sample.json");
        let sample = Sample {
            name: "a".to_string(),
            count: 3,
        };

        write_json_atomic(&sample, &path).expect("write");

        assert!(path.exists());
        assert!(!temp_path_for(&path).exists());
        let loaded: Option<Sample> = read_json_if_exists(&path).expect("read");
        assert_eq!(loaded, Some(sample));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded: Option<Sample> =
            read_json_if_exists(&dir.path().join("absent.json")).expect("read");
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_file_is_a_serde_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, b"{not json").expect("write");
        let err = read_json_if_exists::<Sample>(&path).expect_err("corrupt");
        assert!(matches!(err, PersistError::Serde { .. }));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = validate_version("forum", STATE_VERSION + 1).expect_err("version");
        assert!(matches!(err, PersistError::UnsupportedVersion { .. }));
    }
}
