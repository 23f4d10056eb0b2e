//! Settings for the dispatch and consensus layers.
//!
//! Stored as JSON in ~/.config/quorum/config.json. There are no module
//! singletons: callers construct `Settings` (and `Credentials`) once at
//! process start and pass them by reference.

use crate::gate::Policy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Minimum approving backends for a consensus verdict to count as
    /// approved. The default of 2 deliberately favors availability over
    /// strictness: 2-of-2, 2-of-3, and 2-of-4 all approve, 1-of-1 never does.
    #[serde(default = "default_quorum")]
    pub quorum: usize,
    /// Minimum verdict confidence the decision gate will authorize.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Per-backend-call deadline, seconds. Bounds both the sequential
    /// fallback path and each leg of the consensus fan-out.
    #[serde(default = "default_per_call_timeout_secs")]
    pub per_call_timeout_secs: u64,
    /// Case-insensitive substrings that veto autonomous actions when they
    /// appear in a verdict's risk annotations.
    #[serde(default = "default_veto_terms")]
    pub veto_terms: Vec<String>,
}

fn default_quorum() -> usize {
    2
}

fn default_confidence_threshold() -> f64 {
    0.85
}

fn default_per_call_timeout_secs() -> u64 {
    30
}

fn default_veto_terms() -> Vec<String> {
    ["critical", "security", "breaking"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            confidence_threshold: default_confidence_threshold(),
            per_call_timeout_secs: default_per_call_timeout_secs(),
            veto_terms: default_veto_terms(),
        }
    }
}

impl Settings {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("quorum"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load settings from disk, or return defaults.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(settings) => return settings,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        tracing::warn!(
                            "config file was corrupted ({}); a backup was saved and defaults were loaded",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save settings to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        fs::create_dir_all(&dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&dir, fs::Permissions::from_mode(0o700));
        }

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &content)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_secs)
    }

    /// Decision-gate policy derived from these settings.
    pub fn policy(&self) -> Policy {
        Policy {
            confidence_threshold: self.confidence_threshold,
            veto_terms: self.veto_terms.clone(),
        }
    }
}

/// Keep the unreadable file around for inspection instead of overwriting it.
fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let backup = path.with_extension("json.corrupt");
    let _ = fs::write(backup, content);
}
