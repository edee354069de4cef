//! Write-through JSON cache shared by both resolvers.
//!
//! The whole mapping lives in memory and is rewritten to disk on every
//! `flush()`. Writes go to a sibling temp file that is then renamed over the
//! target, so a killed process leaves either the old or the new file.

use super::types::LocationKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt cache file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable `LocationKey -> V` store.
pub struct PersistentCache<V> {
    path: PathBuf,
    entries: BTreeMap<LocationKey, V>,
}

impl<V> PersistentCache<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Load the cache at `path`, starting empty when the file does not exist.
    /// Creates the containing directory.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let entries = Self::read_file(&path)?;
        match &entries {
            Some(e) if e.is_empty() => log::info!("Cache {} is empty", path.display()),
            Some(e) => log::info!("Cache {} loaded: {} entries", path.display(), e.len()),
            None => log::info!("Cache {} not found, starting empty", path.display()),
        }
        Ok(Self {
            path,
            entries: entries.unwrap_or_default(),
        })
    }

    fn read_file(path: &Path) -> Result<Option<BTreeMap<LocationKey, V>>, CacheError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| CacheError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn get(&self, key: &LocationKey) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &LocationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert into memory only. Callers follow every `put` with `flush`.
    pub fn put(&mut self, key: LocationKey, value: V) {
        self.entries.insert(key, value);
    }

    /// Rewrite the whole file atomically.
    pub fn flush(&self) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            CacheError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(io_err)?;
        fs::rename(&temp_path, &self.path).map_err(io_err)?;
        log::debug!("Cache {} saved: {} entries", self.path.display(), self.entries.len());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LocationKey, &V)> {
        self.entries.iter()
    }
}

/// Entry counts for `cache-stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub total: usize,
    /// Entries holding a usable value (not a failure sentinel).
    pub resolved: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::types::{Coordinate, PointOfInterest};
    use tempfile::TempDir;

    fn key(s: &str) -> LocationKey {
        LocationKey::from(s)
    }

    #[test]
    fn test_missing_file_starts_empty_and_creates_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("centers.json");
        let cache: PersistentCache<Option<Coordinate>> = PersistentCache::load_from(&path).unwrap();
        assert!(cache.is_empty());
        assert!(dir.path().join("nested").is_dir());
        assert!(!path.exists());
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("centers.json");

        {
            let mut cache = PersistentCache::load_from(&path).unwrap();
            cache.put(key("Denver, CO"), Coordinate::new(39.7392, -104.9903));
            cache.put(key("Nowhere, ZZ"), None);
            cache.flush().unwrap();
        }

        let cache: PersistentCache<Option<Coordinate>> = PersistentCache::load_from(&path).unwrap();
        assert_eq!(cache.len(), 2);
        let denver = cache.get(&key("Denver, CO")).unwrap().unwrap();
        assert!((denver.lat - 39.7392).abs() < 1e-9);
        assert_eq!(cache.get(&key("Nowhere, ZZ")), Some(&None));
        assert!(cache.get(&key("Boulder, CO")).is_none());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_format_is_flat_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("landmarks.json");
        let mut cache = PersistentCache::load_from(&path).unwrap();
        cache.put(
            key("Austin, TX"),
            vec![PointOfInterest {
                name: None,
                coordinate: Coordinate { lat: 30.0, lon: -97.0 },
            }],
        );
        cache.flush().unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"Austin, TX": [{"name": null, "lat": 30.0, "lon": -97.0}]})
        );
    }

    #[test]
    fn test_reads_externally_written_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("centers.json");
        fs::write(&path, r#"{"Reno, NV": {"lat": 39.5, "lon": -119.8}, "Gone, XX": null}"#).unwrap();

        let cache: PersistentCache<Option<Coordinate>> = PersistentCache::load_from(&path).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key("Gone, XX")));
        assert_eq!(cache.get(&key("Gone, XX")), Some(&None));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("centers.json");
        fs::write(&path, "{ not json").unwrap();

        let result: Result<PersistentCache<Option<Coordinate>>, _> = PersistentCache::load_from(&path);
        assert!(matches!(result, Err(CacheError::Corrupt { .. })));
    }
}
