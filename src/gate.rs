//! Decision gate: converts a consensus verdict into an authorization for
//! an autonomous action (for example, an auto-merge).
//!
//! Deliberately conservative: a conjunction of independent binary checks,
//! not a weighted score. Any single veto condition blocks the action no
//! matter how high confidence is elsewhere.

use crate::audit::AnalysisRecord;
use serde::{Deserialize, Serialize};

pub const PASS_REASON: &str = "All safety checks passed with consensus approval";

const CHECK_CONSENSUS: &str = "Consensus approval";
const CHECK_CONFIDENCE: &str = "High confidence";
const CHECK_RISKS: &str = "No critical risks";

/// Safety policy applied to a verdict before authorizing a side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub confidence_threshold: f64,
    pub veto_terms: Vec<String>,
}

impl Default for Policy {
    fn default() -> Self {
        crate::config::Settings::default().policy()
    }
}

/// One named pass/fail check.
#[derive(Debug, Clone)]
pub struct SafetyCheck {
    pub name: &'static str,
    pub passed: bool,
}

/// The gate's answer: authorized iff every check passed.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub authorized: bool,
    pub reason: String,
    pub checks: Vec<SafetyCheck>,
}

impl Policy {
    /// Run every check against the analysis and combine them.
    pub fn authorize(&self, analysis: &AnalysisRecord) -> Authorization {
        let checks = vec![
            SafetyCheck {
                name: CHECK_CONSENSUS,
                passed: analysis.approved,
            },
            SafetyCheck {
                name: CHECK_CONFIDENCE,
                passed: analysis.confidence >= self.confidence_threshold,
            },
            SafetyCheck {
                name: CHECK_RISKS,
                passed: !self.matches_veto(&analysis.risks),
            },
        ];

        let authorized = checks.iter().all(|c| c.passed);
        let reason = if authorized {
            PASS_REASON.to_string()
        } else {
            let failed: Vec<&str> = checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.name)
                .collect();
            format!("Failed safety checks: {}", failed.join(", "))
        };

        Authorization {
            authorized,
            reason,
            checks,
        }
    }

    /// Case-insensitive substring match of any veto term in any risk line.
    fn matches_veto(&self, risks: &[String]) -> bool {
        risks.iter().any(|risk| {
            let risk = risk.to_lowercase();
            self.veto_terms
                .iter()
                .any(|term| risk.contains(&term.to_lowercase()))
        })
    }
}
