//! Output parsers selected per catalog entry.
//!
//! A parser turns raw device output into structured JSON. Returning `None`
//! means the output did not fit the strategy; callers keep the raw text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How the output of an operation is parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserStrategy {
    /// Keep raw text
    #[default]
    None,
    /// Output is JSON (e.g. `show ... | json`)
    Json,
    /// `key: value` or `key = value` lines
    KeyValue,
    /// Fixed-width table with a header line
    Table,
}

impl ParserStrategy {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn parse(&self, text: &str) -> Option<Value> {
        match self {
            Self::None => None,
            Self::Json => parse_json(text),
            Self::KeyValue => parse_key_value(text),
            Self::Table => parse_table(text),
        }
    }
}

impl std::fmt::Display for ParserStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Json => write!(f, "json"),
            Self::KeyValue => write!(f, "key_value"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// Parse JSON, tolerating a banner or prompt echo around the document.
pub fn parse_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Parse `key: value` / `key = value` lines into an object.
/// Later duplicates overwrite earlier ones.
pub fn parse_key_value(text: &str) -> Option<Value> {
    let mut map = Map::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let split = match (line.find(':'), line.find('=')) {
            (Some(c), Some(e)) => Some(c.min(e)),
            (Some(c), None) => Some(c),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        };
        let Some(idx) = split else { continue };
        let key = line[..idx].trim();
        let value = line[idx + 1..].trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), Value::String(value.to_string()));
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

/// Parse a fixed-width table. Column boundaries come from the positions of
/// the header tokens; the last column takes the rest of the line.
pub fn parse_table(text: &str) -> Option<Value> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<char> = lines.next()?.chars().collect();

    let mut columns: Vec<(usize, String)> = Vec::new();
    let mut i = 0;
    while i < header.len() {
        if header[i].is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        while i < header.len() && !header[i].is_whitespace() {
            i += 1;
        }
        columns.push((start, header[start..i].iter().collect()));
    }
    if columns.len() < 2 {
        return None;
    }

    let mut rows = Vec::new();
    for line in lines {
        let chars: Vec<char> = line.chars().collect();
        let mut row = Map::new();
        for (idx, (start, name)) in columns.iter().enumerate() {
            let end = columns
                .get(idx + 1)
                .map(|(next, _)| *next)
                .unwrap_or(chars.len());
            let cell: String = if *start >= chars.len() {
                String::new()
            } else {
                chars[*start..end.min(chars.len())].iter().collect()
            };
            row.insert(name.clone(), Value::String(cell.trim().to_string()));
        }
        rows.push(Value::Object(row));
    }

    if rows.is_empty() {
        None
    } else {
        Some(Value::Array(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_with_prompt_echo() {
        let text = "core-router-1#show interfaces | json\n{\"interfaces\": {\"Gi0/1\": {\"oper_status\": \"up\"}}}\ncore-router-1#";
        let value = parse_json(text).unwrap();
        assert_eq!(value["interfaces"]["Gi0/1"]["oper_status"], "up");
    }

    #[test]
    fn test_json_rejects_plain_text() {
        assert!(parse_json("GigabitEthernet0/1 is up, line protocol is up").is_none());
    }

    #[test]
    fn test_key_value() {
        let text = "Hostname: core-router-1\nUptime = 5 weeks\n\nnot a pair\n";
        let value = parse_key_value(text).unwrap();
        assert_eq!(value["Hostname"], "core-router-1");
        assert_eq!(value["Uptime"], "5 weeks");
        assert!(parse_key_value("nothing here").is_none());
    }

    #[test]
    fn test_table_ip_interface_brief() {
        let text = "\
Interface              IP-Address      OK? Method Status                Protocol
GigabitEthernet0/0     10.0.0.1        YES NVRAM  up                    up
GigabitEthernet0/1     unassigned      YES NVRAM  administratively down down
";
        let value = ParserStrategy::Table.parse(text).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Interface"], "GigabitEthernet0/0");
        assert_eq!(rows[1]["Status"], "administratively down");
        assert_eq!(rows[1]["Protocol"], "down");
    }

    #[test]
    fn test_table_needs_rows() {
        assert!(parse_table("Interface  Status\n").is_none());
        assert!(parse_table("single\nrow").is_none());
    }

    #[test]
    fn test_none_strategy_never_parses() {
        assert!(ParserStrategy::None.parse("{\"a\": 1}").is_none());
        assert!(ParserStrategy::default().is_none());
    }
}
