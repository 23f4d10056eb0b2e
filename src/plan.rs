//! Structured plan generation over the fallback dispatcher.
//!
//! Single-answer path: agreement across models is not required, only
//! availability. The backend is asked for JSON; when its free text does
//! not parse, the caller gets the raw text tagged with the producing
//! backend rather than an error.

use crate::backend::{Backend, CompletionRequest, Message, ResponseMode};
use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use std::collections::BTreeMap;

/// Domain parameters for one plan request. Deliberately neutral: the
/// caller decides what goals, constraints, and numeric targets mean.
#[derive(Debug, Clone, Default)]
pub struct PlanParams {
    pub goals: Vec<String>,
    pub constraints: Vec<String>,
    /// Named numeric targets, e.g. `sessions_per_week` or `budget_usd`.
    pub targets: BTreeMap<String, f64>,
}

/// Result of a plan request.
#[derive(Debug, Clone)]
pub enum PlanOutput {
    /// The backend produced parseable JSON.
    Structured(serde_json::Value),
    /// Parsing failed; raw text plus which backend produced it.
    Raw { text: String, backend: Backend },
}

const PLAN_SYSTEM_PROMPT: &str = "You are a planning assistant. Generate a concrete, \
     actionable plan that satisfies the stated goals within the stated \
     constraints. Output valid JSON only, with keys \"plan_name\", \
     \"description\", \"steps\" (an array of objects with \"name\", \
     \"detail\", and \"order\"), and \"notes\" (an array of strings).";

/// Generate a plan through the fallback dispatcher.
pub async fn generate_plan(
    dispatcher: &Dispatcher,
    params: &PlanParams,
) -> Result<PlanOutput, DispatchError> {
    let request = CompletionRequest::new(vec![
        Message::system(PLAN_SYSTEM_PROMPT),
        Message::user(plan_prompt(params)),
    ])
    .with_temperature(0.3)
    .with_response_mode(ResponseMode::Json);

    let result = dispatcher.dispatch(&request).await?;
    let cleaned = strip_markdown_fences(&result.content);

    match serde_json::from_str::<serde_json::Value>(cleaned) {
        Ok(value) => Ok(PlanOutput::Structured(value)),
        Err(_) => Ok(PlanOutput::Raw {
            text: result.content,
            backend: result.backend,
        }),
    }
}

fn plan_prompt(params: &PlanParams) -> String {
    let mut out = String::from("Create a plan:\n");
    if !params.goals.is_empty() {
        out.push_str(&format!("- Goals: {}\n", params.goals.join(", ")));
    }
    if !params.constraints.is_empty() {
        out.push_str(&format!("- Constraints: {}\n", params.constraints.join(", ")));
    }
    for (name, value) in &params.targets {
        out.push_str(&format!("- Target {}: {}\n", name, value));
    }
    out
}

/// Strip markdown code fences from a response.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    clean.strip_suffix("```").unwrap_or(clean).trim()
}
