//! Local replica storage for stats records
//!
//! Each record lives in `<dir>/<key>.kv` as two newline-terminated decimal
//! counters (kills, then deaths). The directory is scanned once at startup.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::protocol::{StatKey, Stats};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed record in {path}")]
    Malformed { path: PathBuf },
}

/// Records this peer holds as a replica
pub struct StatsStore {
    dir: PathBuf,
    records: RwLock<HashMap<StatKey, Stats>>,
}

impl StatsStore {
    /// Open (creating if needed) the store directory and load every record
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut records = HashMap::new();
        let entries = std::fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(key) = key_from_path(&path) else {
                continue;
            };
            match read_record(&path) {
                Ok(value) => {
                    records.insert(key, value);
                }
                Err(e) => warn!(error = %e, "Skipping unreadable stats record"),
            }
        }

        info!(dir = %dir.display(), records = records.len(), "Loaded stats replicas");

        Ok(Self {
            dir,
            records: RwLock::new(records),
        })
    }

    pub fn get(&self, key: StatKey) -> Option<Stats> {
        self.records.read().get(&key).copied()
    }

    /// Persist then publish a record; a failed write leaves memory untouched
    pub fn put(&self, key: StatKey, value: Stats) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let body = format!("{}\n{}\n", value.kills, value.deaths);
        std::fs::write(&path, body).map_err(|source| StoreError::Io { path, source })?;

        self.records.write().insert(key, value);
        debug!(key, kills = value.kills, deaths = value.deaths, "Stored stats replica");
        Ok(())
    }

    /// Keys currently held, sorted
    pub fn keys(&self) -> Vec<StatKey> {
        let mut keys: Vec<StatKey> = self.records.read().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    fn path_for(&self, key: StatKey) -> PathBuf {
        self.dir.join(format!("{}.kv", key))
    }
}

fn key_from_path(path: &Path) -> Option<StatKey> {
    if path.extension()? != "kv" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

fn read_record(path: &Path) -> Result<Stats, StoreError> {
    let body = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut lines = body.lines().map(str::trim);
    let malformed = || StoreError::Malformed {
        path: path.to_path_buf(),
    };
    let kills = lines.next().and_then(|l| l.parse().ok()).ok_or_else(malformed)?;
    let deaths = lines.next().and_then(|l| l.parse().ok()).ok_or_else(malformed)?;

    Ok(Stats { kills, deaths })
}
