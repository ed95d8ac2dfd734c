// Named, compressed, checksummed copies of an index
use crate::persistence::{read_forest, write_forest};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rpforest_core::Forest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SNAPSHOT_EXTENSION: &str = "snapshot";
const CHECKSUM_EXTENSION: &str = "sha256";

/// Snapshot description returned by create and list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDescription {
    pub name: String,
    pub creation_time: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

pub struct SnapshotManager {
    snapshot_dir: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_dir: P) -> Result<Self> {
        let snapshot_dir = snapshot_dir.as_ref().to_path_buf();
        fs::create_dir_all(&snapshot_dir)
            .with_context(|| format!("creating snapshot directory {}", snapshot_dir.display()))?;
        Ok(Self { snapshot_dir })
    }

    /// Directory holding the snapshots of one index
    fn index_dir(&self, index_name: &str) -> Result<PathBuf> {
        validate_name(index_name)?;
        Ok(self.snapshot_dir.join(index_name))
    }

    fn generate_snapshot_name(index_name: &str) -> String {
        let now: DateTime<Utc> = Utc::now();
        format!(
            "{}-{}.{}",
            index_name,
            now.format("%Y-%m-%d-%H-%M-%S%.3f"),
            SNAPSHOT_EXTENSION
        )
    }

    fn checksum_path(snapshot_path: &Path) -> PathBuf {
        let mut name = snapshot_path.as_os_str().to_owned();
        name.push(".");
        name.push(CHECKSUM_EXTENSION);
        PathBuf::from(name)
    }

    fn describe(path: &Path, checksum: Option<String>) -> Result<SnapshotDescription> {
        let metadata = fs::metadata(path)?;
        let creation_time = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%dT%H:%M:%SZ").to_string());

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("snapshot path {} has no file name", path.display()))?;

        Ok(SnapshotDescription {
            name: name.to_string(),
            creation_time,
            size: metadata.len(),
            checksum,
        })
    }

    /// Write a gzip-compressed snapshot of `forest` plus a `.sha256` sidecar.
    pub fn create_snapshot(&self, index_name: &str, forest: &Forest) -> Result<SnapshotDescription> {
        let index_dir = self.index_dir(index_name)?;
        fs::create_dir_all(&index_dir)?;

        let snapshot_name = Self::generate_snapshot_name(index_name);
        let snapshot_path = index_dir.join(&snapshot_name);

        let file = File::create(&snapshot_path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        write_forest(&mut encoder, forest)?;
        encoder.finish()?;

        let checksum = format!("{:x}", Sha256::digest(fs::read(&snapshot_path)?));
        fs::write(Self::checksum_path(&snapshot_path), &checksum)?;

        info!(
            index = index_name,
            snapshot = %snapshot_name,
            items = forest.count(),
            "snapshot created"
        );
        Self::describe(&snapshot_path, Some(checksum))
    }

    /// List snapshots of an index, newest first.
    pub fn list_snapshots(&self, index_name: &str) -> Result<Vec<SnapshotDescription>> {
        let index_dir = self.index_dir(index_name)?;
        if !index_dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&index_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let checksum = fs::read_to_string(Self::checksum_path(&path)).ok();
            snapshots.push(Self::describe(&path, checksum)?);
        }

        // Names embed the timestamp
        snapshots.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(snapshots)
    }

    /// Load a snapshot, verifying its checksum when a sidecar exists.
    pub fn load_snapshot(&self, index_name: &str, snapshot_name: &str) -> Result<Forest> {
        let snapshot_path = self
            .snapshot_path(index_name, snapshot_name)?
            .ok_or_else(|| {
                anyhow!("Snapshot '{}' not found for index '{}'", snapshot_name, index_name)
            })?;
        self.load_snapshot_from_path(&snapshot_path)
    }

    /// Load a snapshot file directly (for recovery)
    pub fn load_snapshot_from_path(&self, path: &Path) -> Result<Forest> {
        match fs::read_to_string(Self::checksum_path(path)) {
            Ok(expected) => {
                let actual = format!("{:x}", Sha256::digest(fs::read(path)?));
                if actual != expected.trim() {
                    return Err(anyhow!(
                        "Checksum mismatch for {}: expected {}, got {}",
                        path.display(),
                        expected.trim(),
                        actual
                    ));
                }
            }
            Err(_) => warn!(path = %path.display(), "no checksum sidecar, skipping verification"),
        }

        let file = File::open(path)?;
        let forest = read_forest(GzDecoder::new(BufReader::new(file)))
            .with_context(|| format!("decoding snapshot {}", path.display()))?;
        Ok(forest)
    }

    /// Delete a snapshot and its sidecar
    pub fn delete_snapshot(&self, index_name: &str, snapshot_name: &str) -> Result<bool> {
        let Some(snapshot_path) = self.snapshot_path(index_name, snapshot_name)? else {
            return Ok(false);
        };
        fs::remove_file(&snapshot_path)?;
        let sidecar = Self::checksum_path(&snapshot_path);
        if sidecar.exists() {
            fs::remove_file(sidecar)?;
        }
        Ok(true)
    }

    /// Path of an existing snapshot, `None` if there is no such file.
    pub fn snapshot_path(&self, index_name: &str, snapshot_name: &str) -> Result<Option<PathBuf>> {
        validate_name(snapshot_name)?;
        let path = self.index_dir(index_name)?.join(snapshot_name);
        Ok(path.exists().then_some(path))
    }
}

/// Names must be a single plain path component
fn validate_name(name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if plain {
        Ok(())
    } else {
        Err(anyhow!("Invalid snapshot or index name {:?}", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpforest_core::ForestConfig;
    use tempfile::TempDir;

    fn built_forest() -> Forest {
        let mut forest = Forest::with_config(ForestConfig {
            seed: Some(1),
            leaf_size: 4,
            ..ForestConfig::new(2)
        })
        .unwrap();
        for i in 0..40i64 {
            forest.add_item(i, &[i as f32, -(i as f32)]).unwrap();
        }
        forest.build(3).unwrap();
        forest
    }

    #[test]
    fn test_create_list_load() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        let forest = built_forest();

        let description = manager.create_snapshot("points", &forest).unwrap();
        assert!(description.name.starts_with("points-"));
        assert!(description.name.ends_with(".snapshot"));
        assert!(description.size > 0);
        assert_eq!(description.checksum.as_ref().map(String::len), Some(64));

        let listed = manager.list_snapshots("points").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, description.name);
        assert_eq!(listed[0].checksum, description.checksum);

        let loaded = manager.load_snapshot("points", &description.name).unwrap();
        assert_eq!(loaded.n_trees(), 3);
        assert_eq!(
            loaded.query(&[7.0, -7.0], 3, None).unwrap(),
            forest.query(&[7.0, -7.0], 3, None).unwrap()
        );
    }

    #[test]
    fn test_tampered_snapshot_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        let description = manager.create_snapshot("points", &built_forest()).unwrap();

        let path = manager
            .snapshot_path("points", &description.name)
            .unwrap()
            .unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = manager.load_snapshot("points", &description.name).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_names_cannot_leave_snapshot_dir() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path().join("snapshots")).unwrap();
        let forest = built_forest();

        for bad in ["../escape", "..", "a/b", "a\\b", ""] {
            assert!(manager.create_snapshot(bad, &forest).is_err(), "{bad:?}");
            assert!(manager.list_snapshots(bad).is_err(), "{bad:?}");
            assert!(manager.snapshot_path("points", bad).is_err(), "{bad:?}");
            assert!(manager.delete_snapshot("points", bad).is_err(), "{bad:?}");
            assert!(manager.load_snapshot("points", bad).is_err(), "{bad:?}");
        }
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn test_delete_and_missing() {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(dir.path()).unwrap();
        let description = manager.create_snapshot("points", &built_forest()).unwrap();

        assert!(manager.delete_snapshot("points", &description.name).unwrap());
        assert!(!manager.delete_snapshot("points", &description.name).unwrap());
        assert!(manager.list_snapshots("points").unwrap().is_empty());
        assert!(manager.list_snapshots("other").unwrap().is_empty());
        assert!(manager.load_snapshot("points", &description.name).is_err());
    }
}
