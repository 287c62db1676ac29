//! Reasoning-engine intents.
//!
//! The engine answers every planning prompt with exactly one intent. The
//! daemon never trusts a decoded intent directly: the validator builds these
//! types from the raw JSON only after every field has been checked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One operation the engine wants executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub operation_id: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl OperationRequest {
    pub fn new(operation_id: &str, target: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            target: target.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }
}

/// The engine's conclusion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub root_causes: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    /// 0.0 - 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AnalysisResult {
    /// Result used when the iteration budget runs out without a conclusion
    pub fn inconclusive(iterations: u32) -> Self {
        Self {
            summary: format!(
                "Investigation inconclusive: no analysis was reached within {} iterations",
                iterations
            ),
            findings: Vec::new(),
            root_causes: Vec::new(),
            next_steps: vec![
                "Review the collected operation outputs below".to_string(),
                "Re-run with a larger iteration budget or a narrower scope".to_string(),
            ],
            confidence: None,
        }
    }
}

/// Exactly one intent per planning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    DataRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
        operations: Vec<OperationRequest>,
    },
    Analysis(AnalysisResult),
    Clarification {
        question: String,
    },
}

impl Intent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataRequest { .. } => "data_request",
            Self::Analysis(_) => "analysis",
            Self::Clarification { .. } => "clarification",
        }
    }

    pub fn operations(&self) -> &[OperationRequest] {
        match self {
            Self::DataRequest { operations, .. } => operations,
            _ => &[],
        }
    }
}

/// Schema description handed to the reasoning engine with every prompt
pub const INTENT_SCHEMA: &str = r#"Respond with ONE JSON object. "kind" selects the shape:

{"kind": "data_request",
 "rationale": "why these operations help (optional)",
 "operations": [{"operation_id": "<id from the catalog>",
                 "target": "<device from the scope>",
                 "params": {"<name>": "<value>"}}]}

{"kind": "analysis",
 "summary": "one or two sentences",
 "findings": ["observed fact", ...],
 "root_causes": ["likely cause", ...],
 "next_steps": ["recommended action", ...],
 "confidence": 0.0-1.0}

{"kind": "clarification",
 "question": "what you need the operator to tell you"}"#;
