//! Completion provider seam
//!
//! The LLM backend is an external collaborator: the engine only knows
//! this capability set. [`ScriptedCompletion`] is the offline fallback
//! used in tests and when no provider key is configured, so the system
//! always produces a response body.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::memory::session::Role;

/// Request to the completion backend
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    /// Conversation turns, oldest first
    pub messages: Vec<(Role, String)>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One completion
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Completion backend capability set
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

// ============================================================================
// SCRIPTED FALLBACK
// ============================================================================

/// Deterministic offline completion provider
#[derive(Default)]
pub struct ScriptedCompletion {
    _unused: (),
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "greenroom-scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|(role, _)| *role == Role::User)
            .map(|(_, content)| content.as_str())
            .unwrap_or("");

        let text = format!(
            "I can help with that. You said: \"{}\". {}",
            truncate(last_user, 160),
            first_sentence(&request.system_prompt)
        );

        let input_tokens = estimate_tokens(
            request
                .messages
                .iter()
                .map(|(_, c)| c.as_str())
                .chain([request.system_prompt.as_str()]),
        );
        let output_tokens = estimate_tokens([text.as_str()]);

        Ok(Completion {
            text,
            model: self.model_name().to_string(),
            input_tokens,
            output_tokens,
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn first_sentence(s: &str) -> &str {
    s.split('.').next().unwrap_or(s).trim()
}

/// Rough 4-chars-per-token estimate
fn estimate_tokens<'a>(texts: impl IntoIterator<Item = &'a str>) -> u32 {
    let chars: usize = texts.into_iter().map(str::len).sum();
    (chars / 4).max(1) as u32
}

// ============================================================================
// USAGE LEDGER
// ============================================================================

/// Per-model token price per 1k tokens (input, output), for the usage
/// report's cost column
const PRICES_PER_1K: &[(&str, f64, f64)] = &[("greenroom-scripted", 0.0, 0.0)];
const DEFAULT_PRICE_PER_1K: (f64, f64) = (0.003, 0.015);

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

/// Token + cost accounting across completion calls
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub models: BTreeMap<String, ModelUsage>,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_estimated_cost_usd: f64,
}

/// Thread-safe usage accumulator
#[derive(Default)]
pub struct UsageLedger {
    models: Mutex<BTreeMap<String, ModelUsage>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, model: &str, input_tokens: u32, output_tokens: u32) {
        let (in_price, out_price) = PRICES_PER_1K
            .iter()
            .find(|(name, _, _)| *name == model)
            .map(|(_, i, o)| (*i, *o))
            .unwrap_or(DEFAULT_PRICE_PER_1K);

        let mut models = self.models.lock().expect("usage lock");
        let usage = models.entry(model.to_string()).or_default();
        usage.requests += 1;
        usage.input_tokens += input_tokens as u64;
        usage.output_tokens += output_tokens as u64;
        usage.estimated_cost_usd += in_price * input_tokens as f64 / 1000.0
            + out_price * output_tokens as f64 / 1000.0;
    }

    pub fn report(&self) -> UsageReport {
        let models = self.models.lock().expect("usage lock").clone();
        let total_requests = models.values().map(|m| m.requests).sum();
        let total_tokens = models
            .values()
            .map(|m| m.input_tokens + m.output_tokens)
            .sum();
        let total_estimated_cost_usd = models.values().map(|m| m.estimated_cost_usd).sum();
        UsageReport {
            models,
            total_requests,
            total_tokens,
            total_estimated_cost_usd,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_completion_echoes_user() {
        let provider = ScriptedCompletion::new();
        let completion = provider
            .complete(CompletionRequest {
                system_prompt: "You are a casting assistant. Keep replies short.".into(),
                messages: vec![(Role::User, "hello there".into())],
                temperature: 0.7,
                max_tokens: 256,
            })
            .await
            .unwrap();
        assert!(completion.text.contains("hello there"));
        assert!(completion.output_tokens > 0);
    }

    #[test]
    fn test_usage_ledger_accumulates() {
        let ledger = UsageLedger::new();
        ledger.record("greenroom-scripted", 100, 50);
        ledger.record("greenroom-scripted", 100, 50);
        ledger.record("external-model", 1000, 500);

        let report = ledger.report();
        assert_eq!(report.total_requests, 3);
        assert_eq!(report.total_tokens, 300 + 1500);
        assert_eq!(report.models["greenroom-scripted"].requests, 2);
        // Scripted model is free; the external one is not
        assert!(report.models["greenroom-scripted"].estimated_cost_usd < 1e-12);
        assert!(report.models["external-model"].estimated_cost_usd > 0.0);
    }
}
