//! JSON snapshots of chain state, written atomically.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Write `value` to `path` through a `.partial` file renamed into place.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(value).context("failed to serialize snapshot")?;

    let tmp_path = path.with_extension("partial");
    fs::write(&tmp_path, json).with_context(|| format!("failed to write temporary {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), path.display()))?;
    info!(path = %path.display(), "snapshot saved");
    Ok(())
}

/// Read a snapshot written by [`save_json`]. A missing file is `None`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "no snapshot found");
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("failed to open {}", path.display())),
    };
    let value = serde_json::from_slice(&bytes).with_context(|| format!("corrupted snapshot {}", path.display()))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let value: BTreeMap<u32, String> = [(1, "one".to_string()), (2, "two".to_string())].into();

        save_json(&path, &value).unwrap();
        assert!(!path.with_extension("partial").exists());
        assert_eq!(load_json::<BTreeMap<u32, String>>(&path).unwrap(), Some(value));
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<u8>> = load_json(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn test_corrupted_snapshot_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").unwrap();
        let err = load_json::<Vec<u8>>(&path).unwrap_err();
        assert!(err.to_string().contains("corrupted snapshot"));
    }
}
