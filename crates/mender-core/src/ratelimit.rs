use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::io::atomic_write;

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalFile {
    #[serde(default)]
    executions: Vec<DateTime<Utc>>,
}

/// Timestamps of recent executions, persisted so a restart does not reset
/// the hourly budget. Pruned to the trailing hour on every access.
#[derive(Debug)]
pub struct RateJournal {
    path: Option<PathBuf>,
    entries: Vec<DateTime<Utc>>,
}

impl RateJournal {
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<JournalFile>(&raw) {
                Ok(f) => f.executions,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt rate journal, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path: Some(path.to_path_buf()),
            entries,
        }
    }

    /// A journal that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Vec::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        self.entries.retain(|t| *t > cutoff);
    }

    /// Executions within the hour before `now`.
    pub fn count_at(&mut self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        self.entries.len()
    }

    pub fn is_limited_at(&mut self, now: DateTime<Utc>, max_per_hour: usize) -> bool {
        self.count_at(now) >= max_per_hour
    }

    pub fn record_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.prune(now);
        self.entries.push(now);
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = JournalFile {
            executions: self.entries.clone(),
        };
        atomic_write(path, &serde_json::to_vec_pretty(&file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap()
    }

    #[test]
    fn limits_within_trailing_hour() {
        let mut j = RateJournal::in_memory();
        for m in [0, 10, 20] {
            j.record_at(t0() + Duration::minutes(m)).unwrap();
        }
        assert!(j.is_limited_at(t0() + Duration::minutes(30), 3));
        // first entry has aged out
        assert!(!j.is_limited_at(t0() + Duration::minutes(61), 3));
        assert_eq!(j.count_at(t0() + Duration::minutes(61)), 2);
    }

    #[test]
    fn persists_across_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rate_journal.json");
        {
            let mut j = RateJournal::load(&path);
            j.record_at(t0()).unwrap();
            j.record_at(t0() + Duration::minutes(1)).unwrap();
        }
        let mut j = RateJournal::load(&path);
        assert_eq!(j.count_at(t0() + Duration::minutes(2)), 2);
    }

    #[test]
    fn corrupt_journal_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rate_journal.json");
        std::fs::write(&path, "[[[").unwrap();
        let mut j = RateJournal::load(&path);
        assert_eq!(j.count_at(t0()), 0);
    }
}
