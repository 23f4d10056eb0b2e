//! Parallel consensus engine: the multi-answer path.
//!
//! Fans one prompt out to every configured backend at once, waits for all
//! of them to settle (success, failure, or timeout) rather than racing to
//! the first, and reduces the surviving outcomes into one verdict. Each
//! leg carries its own timeout, so a hung backend degrades participant
//! count but can never stall the barrier. The engine holds no state
//! between calls and the concurrent legs share nothing mutable; the only
//! synchronization point is the join barrier itself.

pub mod classifier;

use crate::backend::{Backend, CompletionRequest, Credentials, Message, ModelBackend};
use crate::config::Settings;
use classifier::{AffirmativePatterns, ResponseClassifier};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Primary response when every backend failed.
pub const NO_RESPONSE_PLACEHOLDER: &str = "No response available";

/// Maps a backend and its response to a confidence score in [0, 1].
///
/// The default is a fixed per-backend prior; a calibration model derived
/// from response properties can be swapped in without touching the engine.
pub trait ConfidencePrior: Send + Sync {
    fn confidence(&self, backend: Backend, response: &str) -> f64;
}

/// The hand-picked per-backend constants.
pub struct FixedPriors;

impl ConfidencePrior for FixedPriors {
    fn confidence(&self, backend: Backend, _response: &str) -> f64 {
        backend.confidence_prior()
    }
}

/// One backend's successful contribution to a fan-out.
#[derive(Debug, Clone)]
pub struct BackendOutcome {
    pub backend: Backend,
    pub response: String,
    pub approved: bool,
    pub confidence: f64,
    pub elapsed: Duration,
}

/// A failed leg, kept for diagnostics only; never part of the arithmetic.
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: Backend,
    pub error: String,
    pub elapsed: Duration,
}

/// The reduced, single-valued outcome of a fan-out.
#[derive(Debug, Clone)]
pub struct ConsensusVerdict {
    /// Outcomes from backends that responded, in completion order.
    pub outcomes: Vec<BackendOutcome>,
    /// Legs that failed or timed out.
    pub failures: Vec<BackendFailure>,
    pub approval_count: usize,
    pub total_responses: usize,
    /// Mean confidence over responding backends; 0.0 when none responded.
    pub confidence: f64,
    /// True iff `approval_count` met the quorum, independent of
    /// `total_responses`.
    pub approved: bool,
    /// Text of the highest-confidence responder, or the placeholder.
    pub primary_response: String,
}

pub struct ConsensusEngine {
    backends: Vec<Arc<dyn ModelBackend>>,
    classifier: Box<dyn ResponseClassifier>,
    prior: Box<dyn ConfidencePrior>,
    quorum: usize,
    per_call_timeout: Duration,
}

impl ConsensusEngine {
    pub fn new(backends: Vec<Arc<dyn ModelBackend>>, settings: &Settings) -> Self {
        Self {
            backends,
            classifier: Box::new(AffirmativePatterns::new()),
            prior: Box::new(FixedPriors),
            quorum: settings.quorum,
            per_call_timeout: settings.per_call_timeout(),
        }
    }

    pub fn from_credentials(credentials: &Credentials, settings: &Settings) -> Self {
        Self::new(credentials.adapters(), settings)
    }

    pub fn with_classifier(mut self, classifier: Box<dyn ResponseClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_prior(mut self, prior: Box<dyn ConfidencePrior>) -> Self {
        self.prior = prior;
        self
    }

    /// Fan the prompt out to every configured backend and reduce.
    pub async fn evaluate(&self, prompt: &str) -> ConsensusVerdict {
        self.fan_out(prompt, self.per_call_timeout).await
    }

    /// Like [`evaluate`](Self::evaluate), bounded by a caller deadline.
    ///
    /// All legs launch together, so clamping each leg's timeout to the
    /// deadline guarantees the barrier settles in time; legs still
    /// outstanding at the deadline count as failures and the verdict is
    /// computed from whatever responded. Fewer than `quorum` responders
    /// can never approve, which is the intended fail-closed property.
    pub async fn evaluate_within(&self, prompt: &str, deadline: Duration) -> ConsensusVerdict {
        self.fan_out(prompt, deadline.min(self.per_call_timeout)).await
    }

    async fn fan_out(&self, prompt: &str, call_bound: Duration) -> ConsensusVerdict {
        let started = Instant::now();
        let request = CompletionRequest::new(vec![Message::user(prompt)]);

        let calls = self
            .backends
            .iter()
            .map(|adapter| self.poll_backend(adapter.as_ref(), &request, call_bound));
        let settled = futures::future::join_all(calls).await;

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for leg in settled {
            match leg {
                Ok(outcome) => outcomes.push(outcome),
                Err(failure) => failures.push(failure),
            }
        }

        let verdict = reduce(outcomes, failures, self.quorum);
        debug!(
            approvals = verdict.approval_count,
            responses = verdict.total_responses,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "consensus fan-out complete"
        );
        verdict
    }

    async fn poll_backend(
        &self,
        adapter: &dyn ModelBackend,
        request: &CompletionRequest,
        call_bound: Duration,
    ) -> Result<BackendOutcome, BackendFailure> {
        let backend = adapter.id();
        let started = Instant::now();
        match tokio::time::timeout(call_bound, adapter.complete(request)).await {
            Ok(Ok(result)) => {
                let approved = self.classifier.approves(&result.content);
                let confidence = self
                    .prior
                    .confidence(backend, &result.content)
                    .clamp(0.0, 1.0);
                Ok(BackendOutcome {
                    backend,
                    response: result.content,
                    approved,
                    confidence,
                    elapsed: started.elapsed(),
                })
            }
            Ok(Err(err)) => {
                warn!(backend = %backend, "consensus leg failed: {}", err);
                Err(BackendFailure {
                    backend,
                    error: err.to_string(),
                    elapsed: started.elapsed(),
                })
            }
            Err(_) => {
                warn!(backend = %backend, "consensus leg timed out");
                Err(BackendFailure {
                    backend,
                    error: format!("timed out after {:.1}s", call_bound.as_secs_f64()),
                    elapsed: started.elapsed(),
                })
            }
        }
    }
}

/// Reduce settled outcomes into a verdict. Failed legs are excluded from
/// both the approval count and the confidence mean, not counted as zeros.
fn reduce(
    outcomes: Vec<BackendOutcome>,
    failures: Vec<BackendFailure>,
    quorum: usize,
) -> ConsensusVerdict {
    let total_responses = outcomes.len();
    let approval_count = outcomes.iter().filter(|o| o.approved).count();
    let confidence = if total_responses == 0 {
        0.0
    } else {
        outcomes.iter().map(|o| o.confidence).sum::<f64>() / total_responses as f64
    };

    let primary_response = outcomes
        .iter()
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|o| o.response.clone())
        .unwrap_or_else(|| NO_RESPONSE_PLACEHOLDER.to_string());

    ConsensusVerdict {
        outcomes,
        failures,
        approval_count,
        total_responses,
        confidence,
        approved: approval_count >= quorum,
        primary_response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedBackend;

    fn engine(backends: Vec<Arc<dyn ModelBackend>>) -> ConsensusEngine {
        let settings = Settings {
            per_call_timeout_secs: 1,
            ..Default::default()
        };
        ConsensusEngine::new(backends, &settings)
    }

    #[tokio::test]
    async fn two_approvals_meet_quorum() {
        let e = engine(vec![
            ScriptedBackend::respond(Backend::Gemini, "APPROVE: clean change"),
            ScriptedBackend::respond(Backend::Qwen, "lgtm"),
        ]);
        let verdict = e.evaluate("review this").await;
        assert_eq!(verdict.approval_count, 2);
        assert_eq!(verdict.total_responses, 2);
        assert!(verdict.approved);
    }

    #[tokio::test]
    async fn single_approval_never_approves_even_unanimously() {
        let e = engine(vec![ScriptedBackend::respond(
            Backend::Gemini,
            "looks good",
        )]);
        let verdict = e.evaluate("review this").await;
        assert_eq!(verdict.approval_count, 1);
        assert_eq!(verdict.total_responses, 1);
        assert!(!verdict.approved);
    }

    #[tokio::test]
    async fn two_of_four_approvals_still_approve() {
        let e = engine(vec![
            ScriptedBackend::respond(Backend::Gemini, "APPROVE"),
            ScriptedBackend::respond(Backend::Qwen, "REQUEST_CHANGES"),
            ScriptedBackend::respond(Backend::OpenRouter, "REQUEST_CHANGES"),
            ScriptedBackend::respond(Backend::OpenAi, "looks good"),
        ]);
        let verdict = e.evaluate("review this").await;
        assert_eq!(verdict.approval_count, 2);
        assert_eq!(verdict.total_responses, 4);
        assert!(verdict.approved);
    }

    #[tokio::test]
    async fn confidence_stays_in_unit_interval() {
        struct Overshoot;
        impl ConfidencePrior for Overshoot {
            fn confidence(&self, _: Backend, _: &str) -> f64 {
                7.5
            }
        }
        let e = engine(vec![
            ScriptedBackend::respond(Backend::Gemini, "APPROVE"),
            ScriptedBackend::respond(Backend::Qwen, "APPROVE"),
        ])
        .with_prior(Box::new(Overshoot));
        let verdict = e.evaluate("review this").await;
        assert!(verdict.confidence >= 0.0 && verdict.confidence <= 1.0);
    }

    #[tokio::test]
    async fn hanging_backend_does_not_block_the_others() {
        let hung = ScriptedBackend::hang(Backend::OpenRouter);
        let e = ConsensusEngine::new(
            vec![
                ScriptedBackend::respond(Backend::Gemini, "APPROVE"),
                ScriptedBackend::respond(Backend::Qwen, "APPROVE"),
                ScriptedBackend::respond(Backend::OpenAi, "APPROVE"),
                hung.clone(),
            ],
            &Settings {
                per_call_timeout_secs: 60,
                ..Default::default()
            },
        );

        let started = Instant::now();
        let verdict = e.evaluate_within("review this", Duration::from_millis(200)).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(verdict.total_responses, 3);
        assert!(verdict
            .outcomes
            .iter()
            .all(|o| o.backend != Backend::OpenRouter));
        assert_eq!(verdict.failures.len(), 1);
        assert_eq!(verdict.failures[0].backend, Backend::OpenRouter);
    }

    #[tokio::test]
    async fn three_respond_one_times_out_scenario() {
        // Priors: gemini 0.90, openai 0.95, qwen 0.85 -> mean 0.90.
        let e = engine(vec![
            ScriptedBackend::respond(Backend::Gemini, "APPROVE, well tested"),
            ScriptedBackend::respond(Backend::OpenAi, "lgtm"),
            ScriptedBackend::respond(Backend::Qwen, "looks good to me"),
            ScriptedBackend::hang(Backend::OpenRouter),
        ]);
        let verdict = e.evaluate_within("review this", Duration::from_millis(200)).await;

        assert_eq!(verdict.approval_count, 3);
        assert_eq!(verdict.total_responses, 3);
        assert!((verdict.confidence - 0.9).abs() < 1e-9);
        assert!(verdict.approved);
        // Highest-confidence responder (openai, 0.95) supplies the primary.
        assert_eq!(verdict.primary_response, "lgtm");
    }

    #[tokio::test]
    async fn all_backends_failing_yields_placeholder() {
        let e = engine(vec![
            ScriptedBackend::fail(Backend::Gemini, "500"),
            ScriptedBackend::fail(Backend::Qwen, "network unreachable"),
        ]);
        let verdict = e.evaluate("review this").await;

        assert_eq!(verdict.total_responses, 0);
        assert_eq!(verdict.approval_count, 0);
        assert!(!verdict.approved);
        assert_eq!(verdict.confidence, 0.0);
        assert_eq!(verdict.primary_response, NO_RESPONSE_PLACEHOLDER);
        assert_eq!(verdict.failures.len(), 2);
    }

    #[tokio::test]
    async fn custom_classifier_replaces_pattern_matching() {
        struct StrictPrefix;
        impl ResponseClassifier for StrictPrefix {
            fn approves(&self, response: &str) -> bool {
                response.starts_with("DECISION: APPROVE")
            }
        }
        let e = engine(vec![
            ScriptedBackend::respond(Backend::Gemini, "DECISION: APPROVE"),
            ScriptedBackend::respond(Backend::Qwen, "looks good"),
        ])
        .with_classifier(Box::new(StrictPrefix));
        let verdict = e.evaluate("review this").await;
        assert_eq!(verdict.approval_count, 1);
        assert!(!verdict.approved);
    }
}
