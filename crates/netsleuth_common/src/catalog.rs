//! Capability Catalog
//!
//! Defines the ONLY operations netsleuth may run against a device.
//! The reasoning engine cannot invent commands - it can only select an
//! operation id from this catalog and fill in declared parameters.
//!
//! If an operation is not in this catalog, it CANNOT be executed.

use crate::parsers::ParserStrategy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Risk levels for operations. Only `ReadOnly` entries are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Read-only, safe to run
    #[default]
    ReadOnly,
    /// May change device state but is reversible
    LowRisk,
    /// Potentially disruptive
    HighRisk,
}

impl std::fmt::Display for RiskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read_only"),
            Self::LowRisk => write!(f, "low_risk"),
            Self::HighRisk => write!(f, "high_risk"),
        }
    }
}

/// A named template parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// Regex the whole value must match
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

/// One allowlisted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub operation_id: String,
    /// Human-readable description shown to the reasoning engine
    #[serde(default)]
    pub description: String,
    /// Command sent to the device; `{name}` placeholders refer to `params`
    #[serde(alias = "device_command_template")]
    pub command_template: String,
    #[serde(default)]
    pub parser: ParserStrategy,
    #[serde(default)]
    pub risk: RiskClass,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,
}

impl CapabilityEntry {
    pub fn new(operation_id: &str, command_template: &str, parser: ParserStrategy) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            description: String::new(),
            command_template: command_template.to_string(),
            parser,
            risk: RiskClass::ReadOnly,
            params: Vec::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn param(mut self, name: &str, pattern: &str, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            pattern: pattern.to_string(),
            description: description.to_string(),
        });
        self
    }

    pub fn risk(mut self, risk: RiskClass) -> Self {
        self.risk = risk;
        self
    }

    /// Placeholder names in template order
    pub fn placeholders(&self) -> Vec<&str> {
        template_placeholders(&self.command_template)
    }

    /// Substitute parameter values into the template.
    /// Values must already have been validated against the catalog.
    pub fn render(&self, params: &BTreeMap<String, String>) -> Result<String, CatalogError> {
        let mut command = self.command_template.clone();
        for name in self.placeholders() {
            let value = params.get(name).ok_or_else(|| CatalogError::MissingParam {
                operation_id: self.operation_id.clone(),
                param: name.to_string(),
            })?;
            command = command.replace(&format!("{{{}}}", name), value);
        }
        Ok(command)
    }
}

/// Extract `{name}` placeholders from a command template
pub fn template_placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if !name.is_empty() && !names.contains(&name) {
                    names.push(name);
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    names
}

/// Catalog construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate operation id '{0}'")]
    DuplicateOperation(String),

    #[error("catalog entry with empty operation id")]
    EmptyOperationId,

    #[error("operation '{0}' has an empty command template")]
    EmptyTemplate(String),

    #[error("operation '{operation_id}' uses undeclared placeholder '{placeholder}'")]
    UndeclaredPlaceholder {
        operation_id: String,
        placeholder: String,
    },

    #[error("operation '{operation_id}' parameter '{param}' has invalid pattern: {reason}")]
    InvalidParamPattern {
        operation_id: String,
        param: String,
        reason: String,
    },

    #[error("operation '{operation_id}' is missing parameter '{param}'")]
    MissingParam { operation_id: String, param: String },
}

/// Serializable read-only export of the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub operations: Vec<CapabilityEntry>,
}

/// The capability catalog. Ordered by operation id so prompts built from it
/// are stable.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    entries: BTreeMap<String, CapabilityEntry>,
    patterns: HashMap<(String, String), Regex>,
}

impl CapabilityCatalog {
    /// Build a catalog, rejecting duplicates and malformed entries.
    pub fn from_entries(entries: Vec<CapabilityEntry>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        let mut patterns = HashMap::new();

        for entry in entries {
            let id = entry.operation_id.trim().to_string();
            if id.is_empty() {
                return Err(CatalogError::EmptyOperationId);
            }
            if entry.command_template.trim().is_empty() {
                return Err(CatalogError::EmptyTemplate(id));
            }
            for placeholder in entry.placeholders() {
                if !entry.params.iter().any(|p| p.name == placeholder) {
                    return Err(CatalogError::UndeclaredPlaceholder {
                        operation_id: id.clone(),
                        placeholder: placeholder.to_string(),
                    });
                }
            }
            for param in &entry.params {
                let anchored = format!("^(?:{})$", param.pattern);
                let regex = Regex::new(&anchored).map_err(|e| CatalogError::InvalidParamPattern {
                    operation_id: id.clone(),
                    param: param.name.clone(),
                    reason: e.to_string(),
                })?;
                patterns.insert((id.clone(), param.name.clone()), regex);
            }
            if map.contains_key(&id) {
                return Err(CatalogError::DuplicateOperation(id));
            }
            map.insert(id, entry);
        }

        Ok(Self {
            entries: map,
            patterns,
        })
    }

    /// Built-in catalog of read-only show commands
    pub fn standard() -> Self {
        Self::from_entries(standard_entries()).expect("built-in catalog entries are valid")
    }

    pub fn get(&self, operation_id: &str) -> Option<&CapabilityEntry> {
        self.entries.get(operation_id)
    }

    pub fn contains(&self, operation_id: &str) -> bool {
        self.entries.contains_key(operation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CapabilityEntry> {
        self.entries.values()
    }

    /// Whether `value` fully matches the declared pattern of a parameter
    pub fn param_matches(&self, operation_id: &str, param: &str, value: &str) -> bool {
        self.patterns
            .get(&(operation_id.to_string(), param.to_string()))
            .map(|re| re.is_match(value))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            operations: self.entries.values().cloned().collect(),
        }
    }

    /// Compact catalog description for the reasoning engine
    pub fn to_llm_context(&self) -> String {
        let mut lines =
            vec!["Available operations (ONLY use these, do not invent commands):".to_string()];

        for entry in self.entries.values() {
            if entry.risk != RiskClass::ReadOnly {
                continue;
            }
            let mut line = format!("- {}: {}", entry.operation_id, entry.description);
            if !entry.params.is_empty() {
                let params: Vec<String> = entry
                    .params
                    .iter()
                    .map(|p| format!("{} ({})", p.name, p.description))
                    .collect();
                line.push_str(&format!(" [params: {}]", params.join(", ")));
            }
            lines.push(line);
        }

        lines.join("\n")
    }
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

const INTERFACE_PATTERN: &str = r"[A-Za-z][A-Za-z-]*[0-9]+(?:/[0-9]+)*(?:\.[0-9]+)?";

fn standard_entries() -> Vec<CapabilityEntry> {
    vec![
        CapabilityEntry::new("show_version", "show version", ParserStrategy::None)
            .describe("Software version, uptime and hardware model"),
        CapabilityEntry::new(
            "show_ip_interface_brief",
            "show ip interface brief",
            ParserStrategy::Table,
        )
        .describe("One-line status and address per interface"),
        CapabilityEntry::new("show_interfaces", "show interfaces | json", ParserStrategy::Json)
            .describe("Detailed state and counters for all interfaces"),
        CapabilityEntry::new(
            "show_interface_detail",
            "show interfaces {interface} | json",
            ParserStrategy::Json,
        )
        .describe("Detailed state and counters for one interface")
        .param("interface", INTERFACE_PATTERN, "interface name, e.g. GigabitEthernet0/1"),
        CapabilityEntry::new("show_running_config", "show running-config", ParserStrategy::None)
            .describe("Current running configuration (secrets are redacted)"),
        CapabilityEntry::new("show_logging", "show logging", ParserStrategy::None)
            .describe("Recent syslog buffer"),
        CapabilityEntry::new("show_ip_route", "show ip route | json", ParserStrategy::Json)
            .describe("IPv4 routing table"),
        CapabilityEntry::new("show_ip_arp", "show ip arp", ParserStrategy::Table)
            .describe("ARP table"),
        CapabilityEntry::new(
            "show_cdp_neighbors",
            "show cdp neighbors detail",
            ParserStrategy::None,
        )
        .describe("CDP neighbor details"),
        CapabilityEntry::new(
            "show_lldp_neighbors",
            "show lldp neighbors detail",
            ParserStrategy::None,
        )
        .describe("LLDP neighbor details"),
    ]
}
