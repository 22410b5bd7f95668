use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::BuildEntry;
use crate::error::DepotError;
use crate::store::Store;

/// Bumped whenever the persisted entry layout changes; older documents are ignored.
pub const SCAN_CACHE_SCHEMA: u32 = 2;

pub fn freshness_window() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub schema_version: u32,
    /// Seconds since the Unix epoch.
    pub scan_timestamp: i64,
    pub entries: Vec<BuildEntry>,
}

impl ScanRecord {
    pub fn scanned_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.scan_timestamp, 0)
    }
}

#[derive(Debug, Clone)]
pub struct ScanCache {
    path: Utf8PathBuf,
    freshness: Duration,
}

impl ScanCache {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            freshness: freshness_window(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn load(&self) -> Option<ScanRecord> {
        self.load_at(Utc::now())
    }

    /// Returns the record only if it parses, matches the current schema and is
    /// younger than the freshness window. Every other outcome is a miss.
    pub fn load_at(&self, now: DateTime<Utc>) -> Option<ScanRecord> {
        let content = fs::read_to_string(self.path.as_std_path()).ok()?;
        let record: ScanRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(err) => {
                debug!(path = %self.path, error = %err, "discarding unreadable scan cache");
                return None;
            }
        };
        if record.schema_version != SCAN_CACHE_SCHEMA {
            debug!(
                found = record.schema_version,
                expected = SCAN_CACHE_SCHEMA,
                "discarding scan cache with old schema"
            );
            return None;
        }
        let age = now.signed_duration_since(record.scanned_at()?);
        if age >= self.freshness {
            info!(
                age_hours = %format!("{:.1}", age.num_minutes() as f64 / 60.0),
                "scan cache is stale, will refresh"
            );
            return None;
        }
        Some(record)
    }

    pub fn save(&self, entries: &[BuildEntry], timestamp: DateTime<Utc>) -> Result<(), DepotError> {
        let record = ScanRecord {
            schema_version: SCAN_CACHE_SCHEMA,
            scan_timestamp: timestamp.timestamp(),
            entries: entries.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&record)
            .map_err(|err| DepotError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&self.path, &content)
    }
}
