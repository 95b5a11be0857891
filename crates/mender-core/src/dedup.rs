//! Fingerprint-based alert deduplication.
//!
//! Each distinct condition (see [`Issue::fingerprint`]) alerts once, then is
//! suppressed for a sliding window. Records disappear as soon as the
//! condition is absent from a full collection pass, so a recurrence after a
//! fix alerts immediately.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::io::atomic_write;
use crate::issue::Issue;

/// Suppression state for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
    /// `None` when the stored deadline could not be parsed; treated as expired.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub suppressed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DedupState {
    #[serde(default)]
    seen_alerts: BTreeMap<String, FingerprintRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupStats {
    pub active_alerts: usize,
    pub total_suppressed: u64,
    pub alerts: BTreeMap<String, u64>,
}

pub fn fingerprint(issue: &Issue) -> String {
    issue.fingerprint()
}

pub struct Deduplicator {
    path: PathBuf,
    window: Duration,
    state: DedupState,
}

impl Deduplicator {
    /// Load state from `path`. A missing file starts empty; a corrupt one is
    /// logged and replaced by empty state on the next flush.
    pub fn load(path: &Path, suppress_hours: f64) -> Self {
        let state = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<DedupState>(&raw) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt dedup state, starting empty");
                    DedupState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DedupState::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable dedup state, starting empty");
                DedupState::default()
            }
        };
        Self {
            path: path.to_path_buf(),
            window: Duration::milliseconds((suppress_hours * 3_600_000.0) as i64),
            state,
        }
    }

    pub fn should_alert(&mut self, issue: &Issue) -> bool {
        self.should_alert_at(issue, Utc::now())
    }

    /// Decide whether `issue` alerts at `now`, updating its record.
    pub fn should_alert_at(&mut self, issue: &Issue, now: DateTime<Utc>) -> bool {
        let key = issue.fingerprint();
        let window = self.window;

        let alert = match self.state.seen_alerts.get_mut(&key) {
            None => {
                tracing::info!(fingerprint = %key, "new alert");
                self.state.seen_alerts.insert(
                    key.clone(),
                    FingerprintRecord {
                        first_seen: now,
                        last_seen: now,
                        count: 1,
                        suppressed_until: Some(now + window),
                    },
                );
                true
            }
            Some(record) => {
                record.count += 1;
                record.last_seen = now;
                let expired = match record.suppressed_until {
                    Some(until) => now > until,
                    None => true,
                };
                if expired {
                    tracing::info!(fingerprint = %key, count = record.count, "suppression expired, re-alerting");
                    record.suppressed_until = Some(now + window);
                } else {
                    tracing::debug!(fingerprint = %key, count = record.count, "suppressed");
                }
                expired
            }
        };

        self.flush_logged();
        alert
    }

    /// Drop every record whose fingerprint is absent from `current`.
    /// Returns the removed keys.
    pub fn clear_resolved(&mut self, current: &[Issue]) -> Vec<String> {
        let live: HashSet<String> = current.iter().map(Issue::fingerprint).collect();
        let removed: Vec<String> = self
            .state
            .seen_alerts
            .keys()
            .filter(|k| !live.contains(*k))
            .cloned()
            .collect();
        for key in &removed {
            tracing::info!(fingerprint = %key, "cleared resolved alert");
            self.state.seen_alerts.remove(key);
        }
        if !removed.is_empty() {
            self.flush_logged();
        }
        removed
    }

    pub fn record(&self, key: &str) -> Option<&FingerprintRecord> {
        self.state.seen_alerts.get(key)
    }

    pub fn stats(&self) -> DedupStats {
        let alerts: BTreeMap<String, u64> = self
            .state
            .seen_alerts
            .iter()
            .map(|(k, r)| (k.clone(), r.count))
            .collect();
        DedupStats {
            active_alerts: alerts.len(),
            total_suppressed: alerts.values().map(|c| c.saturating_sub(1)).sum(),
            alerts,
        }
    }

    pub fn flush(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.state)?;
        atomic_write(&self.path, &data)
    }

    fn flush_logged(&self) {
        if let Err(e) = self.flush() {
            tracing::error!(path = %self.path.display(), error = %e, "failed to save dedup state");
        }
    }
}

/// Accept RFC 3339 or naive ISO timestamps (read as UTC); anything else is `None`.
fn lenient_timestamp<'de, D>(de: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(de)?;
    let Some(serde_json::Value::String(s)) = raw else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn web1() -> Issue {
        Issue::new("docker", "container_unhealthy", "web1 is unhealthy").with("container", "web1")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn repeated_issue_alerts_once_within_window() {
        let dir = TempDir::new().unwrap();
        let mut dedup = Deduplicator::load(&dir.path().join("dedup.json"), 2.0);

        let alerts: Vec<bool> = (0..3)
            .map(|i| dedup.should_alert_at(&web1(), t0() + Duration::minutes(i * 10)))
            .collect();

        assert_eq!(alerts, vec![true, false, false]);
        let rec = dedup.record("docker:container_unhealthy:web1").unwrap();
        assert_eq!(rec.count, 3);
        assert_eq!(rec.first_seen, t0());
        assert_eq!(rec.last_seen, t0() + Duration::minutes(20));
        assert!(rec.suppressed_until.unwrap() >= rec.last_seen);
    }

    #[test]
    fn realerts_after_window_and_slides_deadline() {
        let dir = TempDir::new().unwrap();
        let mut dedup = Deduplicator::load(&dir.path().join("dedup.json"), 2.0);

        assert!(dedup.should_alert_at(&web1(), t0()));
        let later = t0() + Duration::hours(2) + Duration::seconds(1);
        assert!(dedup.should_alert_at(&web1(), later));
        let rec = dedup.record("docker:container_unhealthy:web1").unwrap();
        assert_eq!(rec.suppressed_until, Some(later + Duration::hours(2)));
        assert!(!dedup.should_alert_at(&web1(), later + Duration::minutes(1)));
    }

    #[test]
    fn resolved_issue_alerts_immediately_on_recurrence() {
        let dir = TempDir::new().unwrap();
        let mut dedup = Deduplicator::load(&dir.path().join("dedup.json"), 2.0);

        assert!(dedup.should_alert_at(&web1(), t0()));
        let removed = dedup.clear_resolved(&[]);
        assert_eq!(removed, vec!["docker:container_unhealthy:web1".to_string()]);
        assert!(dedup.should_alert_at(&web1(), t0() + Duration::minutes(5)));
    }

    #[test]
    fn clear_resolved_keeps_current_issues() {
        let dir = TempDir::new().unwrap();
        let mut dedup = Deduplicator::load(&dir.path().join("dedup.json"), 2.0);
        let disk = Issue::new("system", "disk_high", "full").with("mount", "/data");

        dedup.should_alert_at(&web1(), t0());
        dedup.should_alert_at(&disk, t0());
        dedup.clear_resolved(&[disk.clone()]);

        assert!(dedup.record("docker:container_unhealthy:web1").is_none());
        assert!(dedup.record(&disk.fingerprint()).is_some());
    }

    #[test]
    fn state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dedup.json");
        {
            let mut dedup = Deduplicator::load(&path, 2.0);
            assert!(dedup.should_alert_at(&web1(), t0()));
        }
        let mut dedup = Deduplicator::load(&path, 2.0);
        assert!(!dedup.should_alert_at(&web1(), t0() + Duration::minutes(1)));
        assert_eq!(dedup.stats().total_suppressed, 1);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dedup.json");
        std::fs::write(&path, "{not json").unwrap();
        let mut dedup = Deduplicator::load(&path, 2.0);
        assert_eq!(dedup.stats().active_alerts, 0);
        assert!(dedup.should_alert_at(&web1(), t0()));
        let reloaded = Deduplicator::load(&path, 2.0);
        assert_eq!(reloaded.stats().active_alerts, 1);
    }

    #[test]
    fn unparsable_deadline_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dedup.json");
        let raw = serde_json::json!({
            "seen_alerts": {
                "docker:container_unhealthy:web1": {
                    "first_seen": "2026-10-18T11:00:00Z",
                    "last_seen": "2026-10-18T11:00:00Z",
                    "count": 4,
                    "suppressed_until": "garbage"
                }
            }
        });
        std::fs::write(&path, raw.to_string()).unwrap();

        let mut dedup = Deduplicator::load(&path, 2.0);
        assert!(dedup.should_alert_at(&web1(), t0()));
        let rec = dedup.record("docker:container_unhealthy:web1").unwrap();
        assert_eq!(rec.count, 5);
        assert_eq!(rec.suppressed_until, Some(t0() + Duration::hours(2)));
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let raw = r#"{"first_seen":"2026-10-18T11:00:00Z","last_seen":"2026-10-18T11:00:00Z",
                      "count":1,"suppressed_until":"2026-10-18T13:00:00.123456"}"#;
        let rec: FingerprintRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(
            rec.suppressed_until.unwrap().format("%H:%M:%S").to_string(),
            "13:00:00"
        );
    }

    #[test]
    fn stats_report_counts() {
        let dir = TempDir::new().unwrap();
        let mut dedup = Deduplicator::load(&dir.path().join("dedup.json"), 2.0);
        for i in 0..3 {
            dedup.should_alert_at(&web1(), t0() + Duration::minutes(i));
        }
        let stats = dedup.stats();
        assert_eq!(stats.active_alerts, 1);
        assert_eq!(stats.total_suppressed, 2);
        assert_eq!(stats.alerts["docker:container_unhealthy:web1"], 3);
    }

    #[test]
    fn wall_clock_alert_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dedup.json");
        assert!(Deduplicator::load(&path, 2.0).should_alert(&web1()));

        let mut reloaded = Deduplicator::load(&path, 2.0);
        assert!(!reloaded.should_alert(&web1()));
        assert_eq!(reloaded.record("docker:container_unhealthy:web1").unwrap().count, 2);
    }
}
