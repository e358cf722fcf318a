//! Gate 1: intent recognition.
//!
//! The method name is matched against three keyword sets, checked in order.
//! The first set with a hit decides the intent and its fixed confidence;
//! a method matching none of them is treated as chat.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use serde::Serialize;

use crate::error::{GateError, Result};

/// Intents at or above this confidence pass the gate.
pub const MIN_CONFIDENCE: f64 = 0.6;

const EXECUTE_KEYWORDS: &[&str] = &["execute", "run", "install", "build", "deploy"];
const QUERY_KEYWORDS: &[&str] = &["read", "get", "list", "search", "find"];
const PLAN_KEYWORDS: &[&str] = &["create", "setup", "init", "generate", "scaffold"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Execute,
    Query,
    Plan,
    Chat,
}

impl Intent {
    pub fn confidence(&self) -> f64 {
        match self {
            Intent::Execute => 0.9,
            Intent::Query => 0.85,
            Intent::Plan => 0.8,
            Intent::Chat => 0.6,
        }
    }
}

/// Result of classifying a method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntentMatch {
    pub intent: Intent,
    pub confidence: f64,
}

/// Keyword classifier over method names.
pub struct IntentClassifier {
    matchers: Vec<(Intent, AhoCorasick)>,
}

impl IntentClassifier {
    pub fn new() -> Result<Self> {
        let sets = [
            (Intent::Execute, EXECUTE_KEYWORDS),
            (Intent::Query, QUERY_KEYWORDS),
            (Intent::Plan, PLAN_KEYWORDS),
        ];
        let matchers = sets
            .into_iter()
            .map(|(intent, keywords)| {
                AhoCorasickBuilder::new()
                    .ascii_case_insensitive(true)
                    .build(keywords)
                    .map(|ac| (intent, ac))
                    .map_err(|e| GateError::Config(format!("intent keywords: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { matchers })
    }

    pub fn classify(&self, method: &str) -> IntentMatch {
        let intent = self
            .matchers
            .iter()
            .find(|(_, ac)| ac.is_match(method))
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::Chat);
        IntentMatch {
            intent,
            confidence: intent.confidence(),
        }
    }

    /// Run the gate. `Err` carries the failure reason.
    pub fn check(&self, method: &str) -> std::result::Result<IntentMatch, String> {
        let matched = self.classify(method);
        if matched.confidence < MIN_CONFIDENCE {
            return Err(format!(
                "intent unclear, confidence too low: {}",
                matched.confidence
            ));
        }
        if matched.intent == Intent::Execute && method.trim().is_empty() {
            return Err("execute intent without an operation method".to_string());
        }
        Ok(matched)
    }
}
