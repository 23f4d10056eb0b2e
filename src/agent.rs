//! Inbound operations: the call sites the application layer talks to.
//!
//! Wires the consensus engine, the fallback dispatcher, the decision gate,
//! and the audit trail together behind a handful of high-level operations:
//! analyze a pull request, auto-resolve an issue, authorize an auto-merge,
//! record feedback, and check backend health.

use crate::audit::{AnalysisRecord, AuditStore, AuditTrail, FeedbackRecord};
use crate::backend::{Backend, CompletionRequest, Credentials, Message};
use crate::config::Settings;
use crate::consensus::ConsensusEngine;
use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use crate::gate::Policy;
use chrono::Utc;
use regex::Regex;
use tracing::info;

/// Pull request under analysis, as supplied by the caller.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub title: String,
    pub body: String,
    pub files: Vec<ChangedFile>,
}

#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub filename: String,
    pub changes: String,
}

/// Issue handed to the auto-resolve path.
#[derive(Debug, Clone)]
pub struct Issue {
    pub title: String,
    pub description: String,
    pub context: Option<String>,
}

/// Outcome of one auto-resolve attempt.
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub success: bool,
    pub solution: String,
    pub confidence: f64,
    pub applied_changes: Vec<String>,
}

/// The decision gate's answer for one auto-merge evaluation.
#[derive(Debug, Clone)]
pub struct MergeDecision {
    pub merged: bool,
    pub reason: String,
}

/// Caller-supplied judgment of a past analysis.
#[derive(Debug, Clone)]
pub struct Feedback {
    pub analysis_id: String,
    pub was_correct: bool,
    pub actual_outcome: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub services: Vec<(Backend, bool)>,
}

pub struct Agent {
    dispatcher: Dispatcher,
    engine: ConsensusEngine,
    policy: Policy,
    audit: AuditTrail,
}

impl Agent {
    pub fn new(credentials: &Credentials, settings: &Settings, store: Box<dyn AuditStore>) -> Self {
        Self::from_parts(
            Dispatcher::from_credentials(credentials, settings),
            ConsensusEngine::from_credentials(credentials, settings),
            settings.policy(),
            AuditTrail::new(store),
        )
    }

    pub fn from_parts(
        dispatcher: Dispatcher,
        engine: ConsensusEngine,
        policy: Policy,
        audit: AuditTrail,
    ) -> Self {
        Self {
            dispatcher,
            engine,
            policy,
            audit,
        }
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Analyze a pull request across all configured backends.
    ///
    /// Always produces a record: a verdict below quorum yields
    /// `approved = false`, not an error, so callers can still display it.
    /// The audit write is best-effort by design.
    pub async fn analyze_pull_request(&self, pr: &PullRequest) -> AnalysisRecord {
        let prompt = pr_analysis_prompt(pr);
        let verdict = self.engine.evaluate(&prompt).await;

        let summary = extract_section(&verdict.primary_response, "SUMMARY");
        let decision = extract_section(&verdict.primary_response, "DECISION");
        let risks = section_lines(&verdict.primary_response, "RISKS");
        let recommendations = section_lines(&verdict.primary_response, "RECOMMENDATIONS");

        let record = AnalysisRecord {
            analysis_id: uuid::Uuid::new_v4().to_string(),
            summary,
            approved: verdict.approved && decision.contains("APPROVE"),
            confidence: verdict.confidence,
            recommendations,
            risks,
            timestamp: Utc::now(),
        };

        self.audit.record_analysis_best_effort(&record);
        info!(
            analysis_id = %record.analysis_id,
            approved = record.approved,
            confidence = record.confidence,
            "analysis complete"
        );
        record
    }

    /// Generate a solution through the single-answer path, then run a
    /// consensus quality check over it.
    pub async fn auto_resolve(&self, issue: &Issue) -> Result<ResolveOutcome, DispatchError> {
        let request = CompletionRequest::new(vec![
            Message::system(
                "You are an autonomous coding agent. Generate production-ready \
                 code that fixes the reported issue.",
            ),
            Message::user(issue_prompt(issue)),
        ]);
        let solution = self.dispatcher.dispatch(&request).await?;

        let quality = self
            .engine
            .evaluate(&format!(
                "Review this solution for correctness and quality:\n\n{}\n\n\
                 Provide APPROVE or REQUEST_CHANGES.",
                solution.content
            ))
            .await;

        Ok(ResolveOutcome {
            success: quality.approved,
            solution: solution.content.clone(),
            confidence: quality.confidence,
            applied_changes: extract_code_blocks(&solution.content),
        })
    }

    /// Evaluate a past analysis against the safety policy for auto-merge.
    pub fn auto_merge(&self, pr_number: u64, analysis: &AnalysisRecord) -> MergeDecision {
        let authorization = self.policy.authorize(analysis);
        info!(
            pr_number,
            authorized = authorization.authorized,
            "auto-merge evaluation: {}",
            authorization.reason
        );
        MergeDecision {
            merged: authorization.authorized,
            reason: authorization.reason,
        }
    }

    /// Record later-observed outcome feedback for a past analysis.
    pub fn learn(&self, feedback: Feedback) {
        let record = FeedbackRecord {
            analysis_id: feedback.analysis_id,
            was_correct: feedback.was_correct,
            actual_outcome: feedback.actual_outcome,
            notes: feedback.notes,
            timestamp: Utc::now(),
        };
        self.audit.record_feedback_best_effort(&record);
    }

    /// Probe every configured backend with a trivial prompt.
    pub async fn health_check(&self) -> HealthReport {
        let verdict = self
            .engine
            .evaluate("Respond with OK if you can read this.")
            .await;

        let mut services: Vec<(Backend, bool)> = verdict
            .outcomes
            .iter()
            .map(|o| (o.backend, !o.response.is_empty()))
            .collect();
        services.extend(verdict.failures.iter().map(|f| (f.backend, false)));

        let healthy = services.iter().filter(|(_, ok)| *ok).count();
        let total = services.len();
        let status = if total > 0 && healthy == total {
            HealthStatus::Healthy
        } else if healthy >= 2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Down
        };

        HealthReport { status, services }
    }
}

fn pr_analysis_prompt(pr: &PullRequest) -> String {
    let file_list: Vec<String> = pr.files.iter().map(|f| format!("- {}", f.filename)).collect();
    let detailed: Vec<String> = pr
        .files
        .iter()
        .map(|f| format!("\n=== {} ===\n{}", f.filename, f.changes))
        .collect();

    format!(
        "Analyze this pull request thoroughly:\n\n\
         TITLE: {}\n\n\
         DESCRIPTION:\n{}\n\n\
         FILES CHANGED ({}):\n{}\n\n\
         DETAILED CHANGES:\n{}\n\n\
         Provide:\n\
         1. Summary of changes\n\
         2. Approval recommendation (APPROVE or REQUEST_CHANGES)\n\
         3. Security concerns\n\
         4. Performance implications\n\
         5. Code quality assessment\n\n\
         Format your response as:\n\
         SUMMARY: [one sentence]\n\
         DECISION: [APPROVE or REQUEST_CHANGES]\n\
         RISKS: [list any concerns]\n\
         RECOMMENDATIONS: [list improvements]",
        pr.title,
        pr.body,
        pr.files.len(),
        file_list.join("\n"),
        detailed.join("\n")
    )
}

fn issue_prompt(issue: &Issue) -> String {
    let context = issue
        .context
        .as_deref()
        .map(|c| format!("\n\nCONTEXT:\n{}", c))
        .unwrap_or_default();
    format!(
        "Solve this issue:\n\n\
         ISSUE: {}\n\n\
         DESCRIPTION:\n{}{}\n\n\
         Provide:\n\
         1. Root cause analysis\n\
         2. Complete solution with code\n\
         3. Testing strategy\n\
         4. Deployment considerations",
        issue.title, issue.description, context
    )
}

/// Extract the body of one `NAME:` section from a structured response.
/// Sections run until the next all-caps header line or end of text.
fn extract_section(text: &str, name: &str) -> String {
    let Ok(header_re) = Regex::new(r"(?m)^[ \t]*([A-Z_]+):") else {
        return String::new();
    };

    let headers: Vec<(String, usize, usize)> = header_re
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name_match = caps.get(1)?;
            Some((
                name_match.as_str().to_string(),
                whole.start(),
                whole.end(),
            ))
        })
        .collect();

    for (i, (header_name, _, content_start)) in headers.iter().enumerate() {
        if header_name.eq_ignore_ascii_case(name) {
            let content_end = headers
                .get(i + 1)
                .map(|(_, next_start, _)| *next_start)
                .unwrap_or(text.len());
            return text[*content_start..content_end].trim().to_string();
        }
    }
    String::new()
}

/// Non-empty lines of one section.
fn section_lines(text: &str, name: &str) -> Vec<String> {
    extract_section(text, name)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Extract fenced code blocks from markdown, with the fences removed.
fn extract_code_blocks(text: &str) -> Vec<String> {
    let Ok(fence_re) = Regex::new(r"(?s)```(?:[a-zA-Z0-9_+-]*\n)?(.*?)```") else {
        return Vec::new();
    };
    fence_re
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|block| !block.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::FileStore;
    use crate::backend::ModelBackend;
    use crate::testutil::ScriptedBackend;
    use std::sync::Arc;
    use tempfile::TempDir;

    const STRUCTURED_REVIEW: &str = "SUMMARY: Tightens the retry loop in the dispatcher. I APPROVE.\n\
         DECISION: APPROVE\n\
         RISKS:\n- None observed\n\
         RECOMMENDATIONS:\n- Add a jitter bound\n- Document the backoff cap";

    fn agent_with(backends: Vec<Arc<dyn ModelBackend>>, dir: &TempDir) -> Agent {
        let settings = Settings {
            per_call_timeout_secs: 1,
            ..Default::default()
        };
        Agent::from_parts(
            Dispatcher::new(backends.clone(), settings.per_call_timeout()),
            ConsensusEngine::new(backends, &settings),
            settings.policy(),
            AuditTrail::new(Box::new(FileStore::new(dir.path()))),
        )
    }

    #[test]
    fn extract_section_finds_body_until_next_header() {
        assert_eq!(
            extract_section(STRUCTURED_REVIEW, "DECISION"),
            "APPROVE"
        );
        assert_eq!(
            extract_section(STRUCTURED_REVIEW, "SUMMARY"),
            "Tightens the retry loop in the dispatcher. I APPROVE."
        );
        assert_eq!(extract_section(STRUCTURED_REVIEW, "MISSING"), "");
    }

    #[test]
    fn section_lines_drop_empty_entries() {
        let lines = section_lines(STRUCTURED_REVIEW, "RECOMMENDATIONS");
        assert_eq!(
            lines,
            vec!["- Add a jitter bound", "- Document the backoff cap"]
        );
    }

    #[test]
    fn extract_code_blocks_strips_fences_and_language_tags() {
        let text = "Here is the fix:\n```rust\nfn fixed() {}\n```\nand a second one\n```\nplain\n```";
        assert_eq!(extract_code_blocks(text), vec!["fn fixed() {}", "plain"]);
        assert!(extract_code_blocks("no blocks here").is_empty());
    }

    #[tokio::test]
    async fn analyze_records_audit_and_extracts_sections() {
        let dir = TempDir::new().unwrap();
        // The structured reviewer carries the highest prior, so its text
        // becomes the primary response the sections are extracted from.
        let agent = agent_with(
            vec![
                ScriptedBackend::respond(Backend::OpenAi, STRUCTURED_REVIEW),
                ScriptedBackend::respond(Backend::Gemini, "APPROVE, no concerns"),
            ],
            &dir,
        );

        let pr = PullRequest {
            title: "Tighten retry loop".to_string(),
            body: "Bounds the backoff".to_string(),
            files: vec![ChangedFile {
                filename: "src/dispatch.rs".to_string(),
                changes: "-retry\n+retry_with_cap".to_string(),
            }],
        };
        let record = agent.analyze_pull_request(&pr).await;

        assert!(record.approved);
        assert_eq!(record.summary, "Tightens the retry loop in the dispatcher. I APPROVE.");
        assert_eq!(record.recommendations.len(), 2);

        let loaded = agent.audit().load_analysis(&record.analysis_id).unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn analyze_below_quorum_is_unapproved_but_still_recorded() {
        let dir = TempDir::new().unwrap();
        let agent = agent_with(
            vec![ScriptedBackend::respond(Backend::Gemini, STRUCTURED_REVIEW)],
            &dir,
        );

        let pr = PullRequest {
            title: "t".to_string(),
            body: "b".to_string(),
            files: vec![],
        };
        let record = agent.analyze_pull_request(&pr).await;
        assert!(!record.approved);
        assert!(agent.audit().load_analysis(&record.analysis_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn auto_merge_blocks_on_veto_risk() {
        let dir = TempDir::new().unwrap();
        let agent = agent_with(vec![], &dir);
        let analysis = AnalysisRecord {
            analysis_id: "a-1".to_string(),
            summary: "s".to_string(),
            approved: true,
            confidence: 0.9,
            recommendations: vec![],
            risks: vec!["critical data migration".to_string()],
            timestamp: Utc::now(),
        };

        let decision = agent.auto_merge(42, &analysis);
        assert!(!decision.merged);
        assert!(decision.reason.contains("No critical risks"));
    }

    #[tokio::test]
    async fn learn_persists_feedback() {
        let dir = TempDir::new().unwrap();
        let agent = agent_with(vec![], &dir);
        agent.learn(Feedback {
            analysis_id: "a-9".to_string(),
            was_correct: true,
            actual_outcome: "merged without incident".to_string(),
            notes: None,
        });
        let loaded = agent.audit().load_feedback("a-9").unwrap().unwrap();
        assert!(loaded.was_correct);
    }

    #[tokio::test]
    async fn health_check_degrades_with_partial_failures() {
        let dir = TempDir::new().unwrap();
        let agent = agent_with(
            vec![
                ScriptedBackend::respond(Backend::Gemini, "OK"),
                ScriptedBackend::respond(Backend::Qwen, "OK"),
                ScriptedBackend::fail(Backend::OpenAi, "503"),
            ],
            &dir,
        );
        let report = agent.health_check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.services.len(), 3);
    }

    #[tokio::test]
    async fn health_check_with_no_backends_is_down() {
        let dir = TempDir::new().unwrap();
        let agent = agent_with(vec![], &dir);
        assert_eq!(agent.health_check().await.status, HealthStatus::Down);
    }
}
