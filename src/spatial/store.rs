//! On-disk cache of built spatial indexes, one artifact per cache key.
//!
//! Artifacts carry a SHA-256 fingerprint of the coordinate sequence they were
//! built from. A mismatch is logged; it only triggers a rebuild when the
//! store was opened with `rebuild_stale`.

use super::index::{IndexError, SpatialIndex};
use crate::lookup::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Replace every non-alphanumeric character with `_`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Hex SHA-256 over the ordered coordinate bits.
pub fn fingerprint(coords: &[Coordinate]) -> String {
    let mut hasher = Sha256::new();
    for c in coords {
        hasher.update(c.lat.to_bits().to_le_bytes());
        hasher.update(c.lon.to_bits().to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    fingerprint: &'a str,
    built_at: DateTime<Utc>,
    index: &'a SpatialIndex,
}

#[derive(Deserialize)]
struct Artifact {
    fingerprint: String,
    built_at: DateTime<Utc>,
    index: SpatialIndex,
}

pub struct IndexStore {
    dir: PathBuf,
    rebuild_stale: bool,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>, rebuild_stale: bool) -> Self {
        Self {
            dir: dir.into(),
            rebuild_stale,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<sanitized key>_tree.bin`
    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}_tree.bin", sanitize_key(key)))
    }

    /// Return the cached index for `key`, or build one over `coords` and
    /// persist it. A cached artifact is returned even when `coords` differ,
    /// unless `rebuild_stale` is set.
    pub fn load_or_build(&self, coords: &[Coordinate], key: &str) -> Result<SpatialIndex, IndexError> {
        let path = self.artifact_path(key);
        let expected = fingerprint(coords);

        if path.exists() {
            match Self::read(&path) {
                Ok(artifact) if artifact.fingerprint == expected => {
                    log::debug!("Loaded index '{}' from {}", key, path.display());
                    return Ok(artifact.index);
                }
                Ok(artifact) if !self.rebuild_stale => {
                    log::warn!(
                        "Index '{}' (built {}) does not match the current {} coordinates; reusing it",
                        key,
                        artifact.built_at.format("%Y-%m-%d %H:%M"),
                        coords.len(),
                    );
                    return Ok(artifact.index);
                }
                Ok(_) => log::info!("Index '{}' is stale, rebuilding", key),
                Err(e) => log::warn!("Unreadable index artifact {}: {}; rebuilding", path.display(), e),
            }
        }

        let index = SpatialIndex::build(coords)?;
        if let Err(e) = self.write(&path, &expected, &index) {
            log::warn!("Could not persist index '{}' to {}: {}", key, path.display(), e);
        } else {
            log::info!("Built index '{}' over {} points", key, index.len());
        }
        Ok(index)
    }

    fn read(path: &Path) -> Result<Artifact, IndexError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }

    fn write(&self, path: &Path, fingerprint: &str, index: &SpatialIndex) -> Result<(), IndexError> {
        fs::create_dir_all(&self.dir)?;
        let temp_path = path.with_extension("tmp");
        let writer = BufWriter::new(File::create(&temp_path)?);
        let artifact = ArtifactRef {
            fingerprint,
            built_at: Utc::now(),
            index,
        };
        bincode::serialize_into(writer, &artifact)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate { lat, lon }
    }

    fn sample() -> Vec<Coordinate> {
        vec![c(39.29, -76.61), c(39.30, -76.59), c(39.27, -76.64), c(39.33, -76.62)]
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("Baltimore, MD"), "Baltimore__MD");
        assert_eq!(sanitize_key("city_centers"), "city_centers");
        assert_eq!(sanitize_key("Winston-Salem, NC"), "Winston_Salem__NC");
        assert_eq!(sanitize_key("../etc"), "___etc");
    }

    #[test]
    fn test_fingerprint_depends_on_order_and_values() {
        let a = sample();
        let mut b = sample();
        b.swap(0, 1);
        assert_eq!(fingerprint(&a), fingerprint(&sample()));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_build_persists_artifact() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path().join("trees"), false);

        store.load_or_build(&sample(), "Baltimore, MD").unwrap();
        assert!(dir.path().join("trees").join("Baltimore__MD_tree.bin").is_file());
    }

    #[test]
    fn test_reloaded_index_answers_identically() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path(), false);
        let coords = sample();

        let fresh = SpatialIndex::build(&coords).unwrap();
        store.load_or_build(&coords, "city_centers").unwrap();
        let loaded = store.load_or_build(&coords, "city_centers").unwrap();

        for probe in [c(39.28, -76.60), c(39.35, -76.70), c(0.0, 0.0)] {
            let (d1, i1) = fresh.nearest(&probe);
            let (d2, i2) = loaded.nearest(&probe);
            assert_eq!(i1, i2);
            assert_eq!(d1.to_bits(), d2.to_bits());
        }
    }

    #[test]
    fn test_stale_artifact_reused_by_default() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path(), false);
        store.load_or_build(&sample(), "k").unwrap();

        let other = vec![c(10.0, 10.0)];
        let index = store.load_or_build(&other, "k").unwrap();
        assert_eq!(index.coords(), sample().as_slice());
    }

    #[test]
    fn test_stale_artifact_rebuilt_on_request() {
        let dir = TempDir::new().unwrap();
        IndexStore::new(dir.path(), false).load_or_build(&sample(), "k").unwrap();

        let store = IndexStore::new(dir.path(), true);
        let other = vec![c(10.0, 10.0)];
        let index = store.load_or_build(&other, "k").unwrap();
        assert_eq!(index.coords(), other.as_slice());

        let again = IndexStore::new(dir.path(), false).load_or_build(&other, "k").unwrap();
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_corrupt_artifact_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path(), false);
        fs::write(store.artifact_path("k"), b"garbage").unwrap();

        let index = store.load_or_build(&sample(), "k").unwrap();
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_empty_without_artifact_fails() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path(), false);
        assert!(matches!(store.load_or_build(&[], "k"), Err(IndexError::EmptyInput)));
    }
}
