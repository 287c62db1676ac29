//! Report assembly.
//!
//! `Report::assemble` is a pure projection over a finished session. The
//! report carries no timestamps or ids, so replaying identical collaborator
//! responses yields a byte-identical report.

use crate::action::{ActionOutcome, ConnectivityProbeResult};
use crate::error::ValidationError;
use crate::request::Request;
use crate::session::{Session, SessionStatus};
use serde::{Deserialize, Serialize};

/// An operation executed during the session, with its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub iteration: u32,
    pub operation_id: String,
    pub target: String,
    pub command: String,
    pub outcome: ActionOutcome,
}

/// A connectivity probe run after a connection failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityRecord {
    pub iteration: u32,
    pub operation_id: String,
    pub target: String,
    #[serde(flatten)]
    pub probe: ConnectivityProbeResult,
}

/// A rejected intent item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub iteration: u32,
    #[serde(flatten)]
    pub error: ValidationError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub request: Request,
    /// Devices touched, in first-touched order
    pub devices: Vec<String>,
    pub operations: Vec<OperationRecord>,
    pub connectivity: Vec<ConnectivityRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub findings: Vec<String>,
    pub root_causes: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
    pub validation_errors: Vec<ValidationRecord>,
    pub iterations: u32,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
}

impl Report {
    pub fn assemble(session: &Session) -> Self {
        let mut devices: Vec<String> = Vec::new();
        let mut operations = Vec::new();
        let mut connectivity = Vec::new();

        for (iteration, result) in session.action_results() {
            if !devices.iter().any(|d| d == &result.target) {
                devices.push(result.target.clone());
            }
            if let Some(probe) = result.probe() {
                connectivity.push(ConnectivityRecord {
                    iteration,
                    operation_id: result.operation_id.clone(),
                    target: result.target.clone(),
                    probe: probe.clone(),
                });
            }
            operations.push(OperationRecord {
                iteration,
                operation_id: result.operation_id.clone(),
                target: result.target.clone(),
                command: result.command.clone(),
                outcome: result.outcome.clone(),
            });
        }

        let validation_errors = session
            .validation_errors()
            .map(|(iteration, error)| ValidationRecord {
                iteration,
                error: error.clone(),
            })
            .collect();

        let analysis = session.analysis();

        Self {
            request: session.request().clone(),
            devices,
            operations,
            connectivity,
            summary: analysis.map(|a| a.summary.clone()),
            findings: analysis.map(|a| a.findings.clone()).unwrap_or_default(),
            root_causes: analysis.map(|a| a.root_causes.clone()).unwrap_or_default(),
            next_steps: analysis.map(|a| a.next_steps.clone()).unwrap_or_default(),
            confidence: analysis.and_then(|a| a.confidence),
            clarification: session.clarification().map(str::to_string),
            validation_errors,
            iterations: session.iteration_count(),
            status: session.status(),
            status_detail: session.status_detail().map(str::to_string),
        }
    }

    /// Report for a session that never started (configuration problem)
    pub fn rejected(request: Request, status: SessionStatus, detail: impl Into<String>) -> Self {
        Self {
            request,
            devices: Vec::new(),
            operations: Vec::new(),
            connectivity: Vec::new(),
            summary: None,
            findings: Vec::new(),
            root_causes: Vec::new(),
            next_steps: Vec::new(),
            confidence: None,
            clarification: None,
            validation_errors: Vec::new(),
            iterations: 0,
            status,
            status_detail: Some(detail.into()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable form of every field (deterministic, no timestamps)
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();

        out.push_str("# Troubleshooting Report\n\n");
        out.push_str(&format!("- **Status**: {}\n", self.status));
        if let Some(detail) = &self.status_detail {
            out.push_str(&format!("- **Detail**: {}\n", detail));
        }
        out.push_str(&format!("- **Iterations**: {}\n", self.iterations));
        if let Some(confidence) = self.confidence {
            out.push_str(&format!("- **Confidence**: {:.2}\n", confidence));
        }
        out.push('\n');

        out.push_str("## Request\n\n");
        push_request(&mut out, &self.request);
        out.push('\n');

        out.push_str("## Summary\n\n");
        out.push_str(self.summary.as_deref().unwrap_or("None"));
        out.push_str("\n\n");

        if let Some(question) = &self.clarification {
            out.push_str("## Clarification Needed\n\n");
            out.push_str(question);
            out.push_str("\n\n");
        }

        push_list(&mut out, "Findings", &self.findings);
        push_list(&mut out, "Root Causes", &self.root_causes);
        push_list(&mut out, "Next Steps", &self.next_steps);
        push_list(&mut out, "Devices Investigated", &self.devices);

        out.push_str("## Operations\n\n");
        if self.operations.is_empty() {
            out.push_str("None\n\n");
        }
        for op in &self.operations {
            out.push_str(&format!(
                "### [{}] {} @ {} ({})\n\n",
                op.iteration,
                op.operation_id,
                op.target,
                op.outcome.label()
            ));
            out.push_str(&format!("Command: `{}`\n\n", op.command));
            push_outcome(&mut out, &op.outcome);
        }

        out.push_str("## Connectivity\n\n");
        if self.connectivity.is_empty() {
            out.push_str("None\n\n");
        } else {
            out.push_str("| Iteration | Target | Operation | Reachable | DNS | Latency | Addresses | Error |\n");
            out.push_str("|-----------|--------|-----------|-----------|-----|---------|-----------|-------|\n");
            for c in &self.connectivity {
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
                    c.iteration,
                    c.target,
                    c.operation_id,
                    c.probe.reachable,
                    c.probe.dns_resolved,
                    c.probe
                        .latency_ms
                        .map(|l| format!("{:.1} ms", l))
                        .unwrap_or_else(|| "-".to_string()),
                    if c.probe.resolved_addresses.is_empty() {
                        "-".to_string()
                    } else {
                        c.probe.resolved_addresses.join(", ")
                    },
                    c.probe.connection_error.as_deref().unwrap_or("-"),
                ));
            }
            out.push('\n');
        }

        out.push_str("## Validation Errors\n\n");
        if self.validation_errors.is_empty() {
            out.push_str("None\n");
        }
        for v in &self.validation_errors {
            out.push_str(&format!(
                "- [{}] {} at `{}`: {}\n",
                v.iteration, v.error.kind, v.error.location, v.error.message
            ));
        }

        out
    }
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    out.push_str(&format!("## {}\n\n", title));
    if items.is_empty() {
        out.push_str("None\n");
    }
    for item in items {
        out.push_str(&format!("- {}\n", item));
    }
    out.push('\n');
}

fn push_request(out: &mut String, request: &Request) {
    match request {
        Request::Alarm {
            alarm_details,
            target_scope,
        } => {
            out.push_str("- **Type**: alarm\n");
            out.push_str(&format!("- **Description**: {}\n", alarm_details.description));
            if let Some(severity) = &alarm_details.severity {
                out.push_str(&format!("- **Severity**: {}\n", severity));
            }
            if let Some(source) = &alarm_details.source {
                out.push_str(&format!("- **Source**: {}\n", source));
            }
            if let Some(component) = &alarm_details.component {
                out.push_str(&format!("- **Component**: {}\n", component));
            }
            for (key, value) in &alarm_details.additional_info {
                out.push_str(&format!("- **{}**: {}\n", key, value));
            }
            push_scope(out, target_scope);
        }
        Request::Query {
            query,
            target_scope,
            chat_history,
            attachments,
        } => {
            out.push_str("- **Type**: user query\n");
            out.push_str(&format!("- **Query**: {}\n", query));
            push_scope(out, target_scope);
            for message in chat_history {
                out.push_str(&format!("- **{}**: {}\n", message.role, message.content));
            }
            for attachment in attachments {
                out.push_str(&format!(
                    "- **Attachment** `{}` ({}):\n\n```\n{}\n```\n",
                    attachment.filename,
                    attachment.content_type.as_deref().unwrap_or("text/plain"),
                    attachment.content
                ));
            }
        }
    }
}

fn push_scope(out: &mut String, scope: &crate::request::TargetScope) {
    out.push_str(&format!("- **Devices**: {}\n", scope.devices.join(", ")));
    if let Some(region) = &scope.region {
        out.push_str(&format!("- **Region**: {}\n", region));
    }
}

fn push_outcome(out: &mut String, outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Parsed { data } => {
            let pretty = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
            out.push_str(&format!("```json\n{}\n```\n\n", pretty));
        }
        ActionOutcome::Raw { text } => {
            out.push_str(&format!("```\n{}\n```\n\n", text.trim_end()));
        }
        ActionOutcome::ConnectivityFallback { probe } => {
            out.push_str(&format!("Connection failed; probe: {}\n\n", probe.describe()));
        }
        ActionOutcome::Failed { error } => {
            out.push_str(&format!("Error: {}\n\n", error));
        }
    }
}
