//! Audit/feedback store: a time-bounded record of verdicts and
//! later-supplied outcome feedback, keyed by analysis identifier.
//!
//! # Error Handling
//!
//! Audit writes are best-effort from the decision path's perspective. The
//! agent goes through [`AuditTrail::record_analysis_best_effort`] because a
//! decision that has already been made (and possibly acted upon) must not
//! be failed retroactively by store unavailability; the failure is surfaced
//! on the log side channel instead. Callers needing the durability signal
//! use the fallible methods directly.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;

/// Retention window for analysis records: a cache of recent decisions,
/// not a permanent ledger.
pub const ANALYSIS_TTL: Duration = Duration::from_secs(86_400);

/// Retention window for feedback records, used only for future tuning.
pub const FEEDBACK_TTL: Duration = Duration::from_secs(2_592_000);

const ENTRIES_FILE: &str = "audit.json";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

/// Outcome of one autonomous-decision call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub analysis_id: String,
    pub summary: String,
    pub approved: bool,
    pub confidence: f64,
    pub recommendations: Vec<String>,
    pub risks: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Later-supplied judgment of whether the autonomous decision was right.
/// Never read synchronously by the decision gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub analysis_id: String,
    pub was_correct: bool,
    pub actual_outcome: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Narrow key/value contract the engine depends on. An in-process cache,
/// an external cache service, or a database table are all valid backings.
pub trait AuditStore: Send + Sync {
    fn put(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> anyhow::Result<()>;
    fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

/// File-backed store: one JSON map guarded by an advisory lock, written
/// atomically. Expired entries are invisible to reads and pruned on write.
pub struct FileStore {
    store_dir: PathBuf,
}

struct StoreLock {
    file: std::fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileStore {
    pub fn new(store_dir: &Path) -> Self {
        Self {
            store_dir: store_dir.to_path_buf(),
        }
    }

    fn entries_path(&self) -> PathBuf {
        self.store_dir.join(ENTRIES_FILE)
    }

    fn ensure_dir(&self) -> anyhow::Result<()> {
        if !self.store_dir.exists() {
            fs::create_dir_all(&self.store_dir)?;
        }
        Ok(())
    }

    fn lock(&self, exclusive: bool) -> anyhow::Result<StoreLock> {
        if exclusive {
            self.ensure_dir()?;
        } else if !self.store_dir.exists() {
            return Err(anyhow::anyhow!("audit store directory missing"));
        }

        let lock_path = self.store_dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "timed out waiting for audit store lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }

        Ok(StoreLock { file })
    }

    fn load_entries(&self) -> HashMap<String, StoredEntry> {
        let path = self.entries_path();
        if !path.exists() {
            return HashMap::new();
        }
        fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }
}

impl AuditStore for FileStore {
    fn put(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        let now = Utc::now();
        let mut entries = self.load_entries();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.clone(),
                expires_at: now + chrono::Duration::from_std(ttl)?,
            },
        );
        let content = serde_json::to_string(&entries)?;
        write_atomic(&self.entries_path(), &content)?;
        Ok(())
    }

    fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        if !self.entries_path().exists() {
            return Ok(None);
        }
        let _lock = self.lock(false)?;
        let entries = self.load_entries();
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.value.clone()))
    }
}

/// Write content atomically by writing to a temp file first, then renaming.
fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(&tmp_path, perms);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

/// Typed view over any [`AuditStore`] with the namespaced keys and TTLs the
/// consensus engine and decision gate rely on.
pub struct AuditTrail {
    store: Box<dyn AuditStore>,
}

impl AuditTrail {
    pub fn new(store: Box<dyn AuditStore>) -> Self {
        Self { store }
    }

    fn analysis_key(id: &str) -> String {
        format!("analysis:{}", id)
    }

    fn feedback_key(id: &str) -> String {
        format!("feedback:{}", id)
    }

    pub fn record_analysis(&self, record: &AnalysisRecord) -> anyhow::Result<()> {
        self.store.put(
            &Self::analysis_key(&record.analysis_id),
            &serde_json::to_value(record)?,
            ANALYSIS_TTL,
        )
    }

    pub fn load_analysis(&self, analysis_id: &str) -> anyhow::Result<Option<AnalysisRecord>> {
        self.store
            .get(&Self::analysis_key(analysis_id))?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    pub fn record_feedback(&self, record: &FeedbackRecord) -> anyhow::Result<()> {
        self.store.put(
            &Self::feedback_key(&record.analysis_id),
            &serde_json::to_value(record)?,
            FEEDBACK_TTL,
        )
    }

    pub fn load_feedback(&self, analysis_id: &str) -> anyhow::Result<Option<FeedbackRecord>> {
        self.store
            .get(&Self::feedback_key(analysis_id))?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Record the analysis, surfacing failure on the log side channel only.
    pub fn record_analysis_best_effort(&self, record: &AnalysisRecord) {
        if let Err(err) = self.record_analysis(record) {
            warn!(
                analysis_id = %record.analysis_id,
                "audit write failed (decision unaffected): {:#}",
                err
            );
        }
    }

    /// Record feedback, surfacing failure on the log side channel only.
    pub fn record_feedback_best_effort(&self, record: &FeedbackRecord) {
        if let Err(err) = self.record_feedback(record) {
            warn!(
                analysis_id = %record.analysis_id,
                "feedback write failed: {:#}",
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_analysis(id: &str) -> AnalysisRecord {
        AnalysisRecord {
            analysis_id: id.to_string(),
            summary: "replaces the retry loop with a backoff helper".to_string(),
            approved: true,
            confidence: 0.91,
            recommendations: vec!["add a jitter bound".to_string()],
            risks: vec![],
            timestamp: Utc::now(),
        }
    }

    fn trail(dir: &TempDir) -> AuditTrail {
        AuditTrail::new(Box::new(FileStore::new(dir.path())))
    }

    #[test]
    fn analysis_round_trips_through_the_store() {
        let dir = TempDir::new().unwrap();
        let trail = trail(&dir);
        let record = sample_analysis("a-1");

        trail.record_analysis(&record).unwrap();
        let loaded = trail.load_analysis("a-1").unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[test]
    fn missing_key_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let trail = trail(&dir);
        assert_eq!(trail.load_analysis("never-written").unwrap(), None);
        assert_eq!(trail.load_feedback("never-written").unwrap(), None);
    }

    #[test]
    fn expired_entries_are_invisible() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store
            .put("analysis:old", &serde_json::json!({"stale": true}), Duration::ZERO)
            .unwrap();
        assert_eq!(store.get("analysis:old").unwrap(), None);
    }

    #[test]
    fn expired_entries_are_pruned_on_write() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store
            .put("analysis:old", &serde_json::json!(1), Duration::ZERO)
            .unwrap();
        store
            .put("analysis:new", &serde_json::json!(2), Duration::from_secs(60))
            .unwrap();

        let content = fs::read_to_string(dir.path().join(ENTRIES_FILE)).unwrap();
        let entries: HashMap<String, StoredEntry> = serde_json::from_str(&content).unwrap();
        assert!(!entries.contains_key("analysis:old"));
        assert!(entries.contains_key("analysis:new"));
    }

    #[test]
    fn feedback_round_trips_and_is_namespaced_separately() {
        let dir = TempDir::new().unwrap();
        let trail = trail(&dir);
        let feedback = FeedbackRecord {
            analysis_id: "a-1".to_string(),
            was_correct: false,
            actual_outcome: "the merge broke the nightly build".to_string(),
            notes: Some("classifier over-trusted a terse response".to_string()),
            timestamp: Utc::now(),
        };

        trail.record_feedback(&feedback).unwrap();
        assert_eq!(trail.load_feedback("a-1").unwrap(), Some(feedback));
        // Same identifier, different namespace.
        assert_eq!(trail.load_analysis("a-1").unwrap(), None);
    }

    #[test]
    fn best_effort_write_swallows_store_failure() {
        struct FailingStore;
        impl AuditStore for FailingStore {
            fn put(&self, _: &str, _: &serde_json::Value, _: Duration) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("store offline"))
            }
            fn get(&self, _: &str) -> anyhow::Result<Option<serde_json::Value>> {
                Err(anyhow::anyhow!("store offline"))
            }
        }
        let trail = AuditTrail::new(Box::new(FailingStore));
        // Must not panic or propagate.
        trail.record_analysis_best_effort(&sample_analysis("a-1"));
    }

    #[test]
    fn feedback_deserializes_without_notes() {
        let row = serde_json::json!({
            "analysis_id": "a-2",
            "was_correct": true,
            "actual_outcome": "merged cleanly",
            "timestamp": Utc::now()
        });
        let parsed: FeedbackRecord = serde_json::from_value(row).unwrap();
        assert_eq!(parsed.notes, None);
    }
}
