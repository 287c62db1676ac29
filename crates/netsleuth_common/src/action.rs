//! Results of dispatched operations.

use serde::{Deserialize, Serialize};

/// Best-effort reachability diagnostics run after a connection failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityProbeResult {
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    pub dns_resolved: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_addresses: Vec<String>,
    /// The connection error that triggered the probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

impl ConnectivityProbeResult {
    pub fn describe(&self) -> String {
        let mut parts = vec![
            format!("reachable={}", self.reachable),
            format!("dns_resolved={}", self.dns_resolved),
        ];
        if let Some(latency) = self.latency_ms {
            parts.push(format!("latency_ms={:.1}", latency));
        }
        if !self.resolved_addresses.is_empty() {
            parts.push(format!("addresses={}", self.resolved_addresses.join(",")));
        }
        if let Some(err) = &self.connection_error {
            parts.push(format!("connection_error={}", err));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Parsed { data: serde_json::Value },
    Raw { text: String },
    ConnectivityFallback { probe: ConnectivityProbeResult },
    Failed { error: String },
}

impl ActionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Parsed { .. } => "parsed",
            Self::Raw { .. } => "raw",
            Self::ConnectivityFallback { .. } => "connectivity_fallback",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether the device actually returned output
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Parsed { .. } | Self::Raw { .. })
    }
}

/// Exactly one per dispatched operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub operation_id: String,
    pub target: String,
    /// Rendered command that was (or would have been) sent
    pub command: String,
    pub outcome: ActionOutcome,
}

impl ActionResult {
    pub fn new(operation_id: &str, target: &str, command: &str, outcome: ActionOutcome) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            target: target.to_string(),
            command: command.to_string(),
            outcome,
        }
    }

    pub fn failed(operation_id: &str, target: &str, command: &str, error: impl Into<String>) -> Self {
        Self::new(
            operation_id,
            target,
            command,
            ActionOutcome::Failed {
                error: error.into(),
            },
        )
    }

    pub fn probe(&self) -> Option<&ConnectivityProbeResult> {
        match &self.outcome {
            ActionOutcome::ConnectivityFallback { probe } => Some(probe),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let result = ActionResult::failed("show_version", "sw-42", "show version", "auth failed");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["error"], "auth failed");
        assert!(!result.outcome.is_success());
    }

    #[test]
    fn test_probe_accessor() {
        let probe = ConnectivityProbeResult {
            reachable: false,
            dns_resolved: true,
            ..Default::default()
        };
        let result = ActionResult::new(
            "show_version",
            "sw-42",
            "show version",
            ActionOutcome::ConnectivityFallback {
                probe: probe.clone(),
            },
        );
        assert_eq!(result.probe(), Some(&probe));
        assert_eq!(result.outcome.label(), "connectivity_fallback");
    }

    #[test]
    fn test_probe_describe() {
        let probe = ConnectivityProbeResult {
            reachable: true,
            latency_ms: Some(1.5),
            dns_resolved: true,
            resolved_addresses: vec!["10.0.0.1".to_string()],
            connection_error: None,
        };
        assert_eq!(
            probe.describe(),
            "reachable=true dns_resolved=true latency_ms=1.5 addresses=10.0.0.1"
        );
    }
}
