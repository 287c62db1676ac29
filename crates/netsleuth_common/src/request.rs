//! Troubleshooting requests: alarms and interactive queries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured information about an alarm raised by a monitoring system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmDetails {
    /// Where the alarm came from (NMS, syslog collector, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Affected component, usually a device or device/interface pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Any other alarm attributes, kept in key order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_info: BTreeMap<String, String>,
}

impl AlarmDetails {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Default::default()
        }
    }

    pub fn with_severity(mut self, severity: &str) -> Self {
        self.severity = Some(severity.to_string());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }

    pub fn with_info(mut self, key: &str, value: &str) -> Self {
        self.additional_info
            .insert(key.to_string(), value.to_string());
        self
    }
}

/// The set of devices a session may touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetScope {
    /// Device hostnames or addresses
    #[serde(default)]
    pub devices: Vec<String>,
    /// Broader scope such as a market or region (informational only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl TargetScope {
    pub fn devices<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            devices: devices.into_iter().map(Into::into).collect(),
            region: None,
        }
    }

    /// Hostnames compare case-insensitively.
    pub fn contains(&self, target: &str) -> bool {
        self.devices
            .iter()
            .any(|d| d.eq_ignore_ascii_case(target.trim()))
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One turn of earlier conversation supplied with a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: ChatRole::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.to_string(),
        }
    }
}

/// A text attachment (log snippet, speed test output, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub content: String,
}

/// A troubleshooting request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Alarm {
        alarm_details: AlarmDetails,
        target_scope: TargetScope,
    },
    Query {
        query: String,
        target_scope: TargetScope,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        chat_history: Vec<ChatMessage>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
}

impl Request {
    pub fn target_scope(&self) -> &TargetScope {
        match self {
            Self::Alarm { target_scope, .. } | Self::Query { target_scope, .. } => target_scope,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Alarm { .. } => "alarm",
            Self::Query { .. } => "user_query",
        }
    }

    /// Short one-line description used in logs.
    pub fn headline(&self) -> String {
        let text = match self {
            Self::Alarm { alarm_details, .. } => {
                let mut parts = Vec::new();
                if let Some(severity) = &alarm_details.severity {
                    parts.push(severity.clone());
                }
                if let Some(component) = &alarm_details.component {
                    parts.push(component.clone());
                }
                if !alarm_details.description.is_empty() {
                    parts.push(alarm_details.description.clone());
                }
                parts.join(" / ")
            }
            Self::Query { query, .. } => query.clone(),
        };
        let mut headline: String = text.chars().take(60).collect();
        if text.chars().count() > 60 {
            headline.push_str("...");
        }
        headline
    }
}
