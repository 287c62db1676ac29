//! Prompt construction for the reasoning engine.
//!
//! Prompts are pure functions of the request, catalog and consolidated
//! context so a replayed session sends byte-identical prompts.

use netsleuth_common::{CapabilityCatalog, Request, ValidationError};

const SYSTEM_PROMPT: &str = "\
You are a network troubleshooting assistant. You investigate problems on \
network devices by requesting read-only diagnostic operations and then \
explaining what you found.

Rules:
- Only request operations from the catalog below, by their exact operation_id.
- Only target devices listed in the scope.
- Never request configuration changes; nothing you ask for can modify a device.
- When the collected data explains the problem, reply with an analysis.
- If you cannot proceed without more information from the operator, reply \
with a clarification question.
- Reply with a single JSON object and nothing else.";

pub fn system_prompt(catalog: &CapabilityCatalog, request: &Request) -> String {
    let scope = request.target_scope();
    let devices = if scope.is_empty() {
        "(no devices in scope: you can only answer with an analysis or a clarification)".to_string()
    } else {
        scope.devices.join(", ")
    };

    let mut out = format!(
        "{}\n\n{}\n\nDevices in scope: {}",
        SYSTEM_PROMPT,
        catalog.to_llm_context(),
        devices
    );
    if let Some(region) = &scope.region {
        out.push_str(&format!("\nRegion: {}", region));
    }
    out
}

/// Everything the engine needs for the next step.
pub struct PlanningInput<'a> {
    pub request: &'a Request,
    pub context: &'a str,
    /// 1-based iteration being planned
    pub iteration: u32,
    pub max_iterations: u32,
    /// Errors from the previous attempt of this iteration
    pub corrections: &'a [ValidationError],
}

pub fn user_prompt(input: &PlanningInput<'_>) -> String {
    let mut out = String::new();

    match input.request {
        Request::Alarm { alarm_details, .. } => {
            out.push_str("ALARM\n");
            out.push_str(&format!("description: {}\n", alarm_details.description));
            if let Some(severity) = &alarm_details.severity {
                out.push_str(&format!("severity: {}\n", severity));
            }
            if let Some(source) = &alarm_details.source {
                out.push_str(&format!("source: {}\n", source));
            }
            if let Some(component) = &alarm_details.component {
                out.push_str(&format!("component: {}\n", component));
            }
            for (key, value) in &alarm_details.additional_info {
                out.push_str(&format!("{}: {}\n", key, value));
            }
        }
        Request::Query {
            query,
            chat_history,
            attachments,
            ..
        } => {
            if !chat_history.is_empty() {
                out.push_str("CONVERSATION SO FAR\n");
                for message in chat_history {
                    out.push_str(&format!("{}: {}\n", message.role, message.content));
                }
                out.push('\n');
            }
            out.push_str(&format!("QUESTION\n{}\n", query));
            for attachment in attachments {
                out.push_str(&format!(
                    "\nATTACHMENT {}\n{}\n",
                    attachment.filename, attachment.content
                ));
            }
        }
    }

    out.push_str(&format!(
        "\nIteration {} of {}.",
        input.iteration, input.max_iterations
    ));
    if input.iteration == input.max_iterations {
        out.push_str(" This is the last iteration: prefer an analysis.");
    }
    out.push('\n');

    if input.context.is_empty() {
        out.push_str("\nNo data collected yet.\n");
    } else {
        out.push_str("\nCOLLECTED DATA\n");
        out.push_str(input.context);
    }

    if !input.corrections.is_empty() {
        out.push_str("\nYOUR PREVIOUS REPLY WAS REJECTED\n");
        for error in input.corrections {
            out.push_str(&format!("- {}\n", error));
        }
        out.push_str("Reply again with a corrected JSON object.\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsleuth_common::{AlarmDetails, ChatMessage, TargetScope};

    #[test]
    fn test_system_prompt_lists_catalog_and_scope() {
        let request = Request::Alarm {
            alarm_details: AlarmDetails::new("link down"),
            target_scope: TargetScope::devices(["core-router-1"]),
        };
        let prompt = system_prompt(&CapabilityCatalog::standard(), &request);
        assert!(prompt.contains("show_interfaces"));
        assert!(prompt.contains("Devices in scope: core-router-1"));
    }

    #[test]
    fn test_user_prompt_includes_corrections() {
        let request = Request::Query {
            query: "why is sw-42 slow?".to_string(),
            target_scope: TargetScope::devices(["sw-42"]),
            chat_history: vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")],
            attachments: vec![],
        };
        let errors = vec![ValidationError::unknown_operation(0, "reload_device")];
        let prompt = user_prompt(&PlanningInput {
            request: &request,
            context: "",
            iteration: 1,
            max_iterations: 5,
            corrections: &errors,
        });
        assert!(prompt.contains("QUESTION\nwhy is sw-42 slow?"));
        assert!(prompt.contains("assistant: hello"));
        assert!(prompt.contains("YOUR PREVIOUS REPLY WAS REJECTED"));
        assert!(prompt.contains("reload_device"));
        assert!(prompt.contains("No data collected yet"));
    }

    #[test]
    fn test_last_iteration_hint() {
        let request = Request::Alarm {
            alarm_details: AlarmDetails::new("cpu high").with_severity("major"),
            target_scope: TargetScope::devices(["r1"]),
        };
        let prompt = user_prompt(&PlanningInput {
            request: &request,
            context: "[iteration 1] show_version @ r1 -> raw\nIOS\n",
            iteration: 3,
            max_iterations: 3,
            corrections: &[],
        });
        assert!(prompt.contains("last iteration"));
        assert!(prompt.contains("COLLECTED DATA"));
        assert!(prompt.contains("severity: major"));
    }
}
