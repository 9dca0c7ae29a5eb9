// Small persisted key-value records (personal ATH, last visit). Read once
// per session and cached in memory; callers throttle writes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "vault_";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Personal all-time-high record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AthRecord {
    pub value: f64,
    /// UNIX milliseconds at the moment the high was recorded.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct AthUpdate {
    pub is_new_ath: bool,
    pub ath: AthRecord,
}

/// Snapshot of the previous session, for "since your last visit" deltas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub timestamp: i64,
    #[serde(rename = "totalValueUSD")]
    pub total_value_usd: f64,
    #[serde(rename = "fees7d")]
    pub fees_7d: f64,
}

/// File-backed key-value store with namespaced string keys. Loaded once at
/// construction; every mutation rewrites the file.
pub struct SessionStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl SessionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Session store at {} is corrupt, starting fresh: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => {
                debug!("No session store at {}, starting fresh", path.display());
                HashMap::new()
            }
        };

        Self { path, entries }
    }

    fn get_item(&self, key: &str) -> Option<&String> {
        self.entries.get(&format!("{KEY_PREFIX}{key}"))
    }

    fn set_item(&mut self, key: &str, value: String) {
        self.entries.insert(format!("{KEY_PREFIX}{key}"), value);
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn get_ath(&self) -> Option<AthRecord> {
        let value = self.get_item("ath_value")?.parse::<f64>().ok()?;
        let timestamp = self.get_item("ath_timestamp")?.parse::<i64>().ok()?;
        Some(AthRecord { value, timestamp })
    }

    /// Replaces the stored ATH when the current value strictly exceeds it.
    /// `is_new_ath` is only reported when a previous record existed, so the
    /// very first observation does not celebrate itself.
    pub fn update_ath(&mut self, current_value: f64, now_ms: i64) -> Result<AthUpdate> {
        let existing = self.get_ath();
        match existing {
            Some(ath) if current_value <= ath.value => Ok(AthUpdate {
                is_new_ath: false,
                ath,
            }),
            _ => {
                let ath = AthRecord {
                    value: current_value,
                    timestamp: now_ms,
                };
                self.set_item("ath_value", ath.value.to_string());
                self.set_item("ath_timestamp", ath.timestamp.to_string());
                self.persist()?;
                Ok(AthUpdate {
                    is_new_ath: existing.is_some(),
                    ath,
                })
            }
        }
    }

    pub fn get_last_visit(&self) -> Option<VisitRecord> {
        let raw = self.get_item("last_visit")?;
        serde_json::from_str(raw).ok()
    }

    pub fn save_visit(&mut self, total_value_usd: f64, fees_7d: f64, now_ms: i64) -> Result<()> {
        let record = VisitRecord {
            timestamp: now_ms,
            total_value_usd,
            fees_7d,
        };
        self.set_item("last_visit", serde_json::to_string(&record)?);
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> SessionStore {
        let path = std::env::temp_dir().join(format!(
            "vault_store_test_{}_{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        SessionStore::open(path)
    }

    #[test]
    fn test_first_observation_is_not_a_new_ath() {
        let mut store = temp_store("first");
        let update = store.update_ath(1000.0, 1).unwrap();
        assert!(!update.is_new_ath);
        assert_eq!(update.ath.value, 1000.0);
    }

    #[test]
    fn test_higher_value_replaces_ath() {
        let mut store = temp_store("higher");
        store.update_ath(1000.0, 1).unwrap();
        let update = store.update_ath(1500.0, 2).unwrap();
        assert!(update.is_new_ath);
        assert_eq!(update.ath.value, 1500.0);
        assert_eq!(update.ath.timestamp, 2);
    }

    #[test]
    fn test_lower_value_keeps_existing_ath() {
        let mut store = temp_store("lower");
        store.update_ath(1000.0, 1).unwrap();
        let update = store.update_ath(900.0, 2).unwrap();
        assert!(!update.is_new_ath);
        assert_eq!(update.ath.value, 1000.0);
    }

    #[test]
    fn test_visit_round_trips_through_file() {
        let path = std::env::temp_dir().join(format!(
            "vault_store_test_visit_{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut store = SessionStore::open(&path);
        store.save_visit(8000.0, 42.5, 1_700_000_000_000).unwrap();

        let reopened = SessionStore::open(&path);
        let visit = reopened.get_last_visit().unwrap();
        assert_eq!(visit.total_value_usd, 8000.0);
        assert_eq!(visit.fees_7d, 42.5);
        assert_eq!(visit.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_missing_records_read_as_none() {
        let store = temp_store("missing");
        assert!(store.get_ath().is_none());
        assert!(store.get_last_visit().is_none());
    }
}
