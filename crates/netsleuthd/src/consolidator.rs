//! Result consolidation.
//!
//! Folds the session history and the newest batch into one bounded text
//! block for the next planning prompt. Every result keeps its header line;
//! only `Parsed`/`Raw` payloads may be summarized, oldest iteration first and
//! largest payload first within an iteration.

use netsleuth_common::{ActionOutcome, ActionResult, Intent, IterationRecord};
use serde_json::Value;

pub const TRUNCATED_MARKER: &str = "[truncated]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedContext {
    pub text: String,
    /// Payloads that were summarized
    pub elided: usize,
    /// Still above budget after every elidable payload was summarized
    pub over_budget: bool,
}

struct Entry {
    iteration: u32,
    position: usize,
    header: String,
    payload: String,
    /// `None` for payloads that are never elided
    summary: Option<String>,
    elided: bool,
}

impl Entry {
    fn rendered_len(&self) -> usize {
        char_len(&self.header) + 1 + char_len(self.current_payload()) + 1
    }

    fn current_payload(&self) -> &str {
        match (&self.summary, self.elided) {
            (Some(summary), true) => summary,
            _ => &self.payload,
        }
    }
}

/// The budget is in characters, not bytes
fn char_len(s: &str) -> usize {
    s.chars().count()
}

enum Block {
    Context(String),
    Result(usize),
}

/// Consolidate `history` plus `new_results` (the iteration being closed)
/// into at most `budget` characters where the policy allows.
pub fn consolidate(history: &[IterationRecord], new_results: &[ActionResult], budget: usize) -> ConsolidatedContext {
    let mut entries: Vec<Entry> = Vec::new();
    let mut blocks: Vec<Block> = Vec::new();

    for record in history {
        if let Some(Intent::DataRequest {
            rationale: Some(rationale),
            ..
        }) = &record.intent
        {
            blocks.push(Block::Context(format!(
                "[iteration {}] rationale: {}",
                record.index, rationale
            )));
        }
        if let Some(Intent::Analysis(analysis)) = &record.intent {
            blocks.push(Block::Context(format!(
                "[iteration {}] analysis: {}",
                record.index, analysis.summary
            )));
        }
        if !record.validation_errors.is_empty() {
            let items: Vec<String> = record.validation_errors.iter().map(|e| e.to_string()).collect();
            blocks.push(Block::Context(format!(
                "[iteration {}] corrections after {} rejected item(s): {}",
                record.index,
                items.len(),
                items.join("; ")
            )));
        }
        for result in &record.action_results {
            push_entry(&mut entries, &mut blocks, record.index, result);
        }
    }

    let current = history.last().map(|r| r.index).unwrap_or(0) + 1;
    for result in new_results {
        push_entry(&mut entries, &mut blocks, current, result);
    }

    let context_len: usize = blocks
        .iter()
        .map(|b| match b {
            Block::Context(line) => char_len(line) + 1,
            Block::Result(_) => 0,
        })
        .sum();
    let mut total: usize = context_len + entries.iter().map(Entry::rendered_len).sum::<usize>();

    // Elision order: oldest iteration, then largest payload, then position
    let mut order: Vec<usize> = (0..entries.len())
        .filter(|&i| entries[i].summary.is_some())
        .collect();
    order.sort_by(|&a, &b| {
        let (ea, eb) = (&entries[a], &entries[b]);
        ea.iteration
            .cmp(&eb.iteration)
            .then(char_len(&eb.payload).cmp(&char_len(&ea.payload)))
            .then(ea.position.cmp(&eb.position))
    });

    let mut elided = 0;
    for i in order {
        if total <= budget {
            break;
        }
        let before = entries[i].rendered_len();
        entries[i].elided = true;
        let after = entries[i].rendered_len();
        if after >= before {
            entries[i].elided = false;
            continue;
        }
        total = total - before + after;
        elided += 1;
    }

    let mut text = String::with_capacity(total);
    for block in &blocks {
        match block {
            Block::Context(line) => {
                text.push_str(line);
                text.push('\n');
            }
            Block::Result(i) => {
                let entry = &entries[*i];
                text.push_str(&entry.header);
                text.push('\n');
                text.push_str(entry.current_payload());
                text.push('\n');
            }
        }
    }

    ConsolidatedContext {
        text,
        elided,
        over_budget: total > budget,
    }
}

fn push_entry(entries: &mut Vec<Entry>, blocks: &mut Vec<Block>, iteration: u32, result: &ActionResult) {
    let header = format!(
        "[iteration {}] {} @ {} -> {}",
        iteration,
        result.operation_id,
        result.target,
        result.outcome.label()
    );
    let (payload, summary) = match &result.outcome {
        ActionOutcome::Parsed { data } => {
            let payload = data.to_string();
            let summary = format!("{} ({} chars) {}", describe_value(data), char_len(&payload), TRUNCATED_MARKER);
            (payload, Some(summary))
        }
        ActionOutcome::Raw { text } => {
            let payload = text.trim_end().to_string();
            let first = payload.lines().next().unwrap_or("").trim();
            let first: String = first.chars().take(120).collect();
            let summary = format!(
                "first line: {} ({} lines, {} chars) {}",
                first,
                payload.lines().count(),
                char_len(&payload),
                TRUNCATED_MARKER
            );
            (payload, Some(summary))
        }
        ActionOutcome::ConnectivityFallback { probe } => (format!("probe: {}", probe.describe()), None),
        ActionOutcome::Failed { error } => (format!("error: {}", error), None),
    };

    let position = entries.len();
    blocks.push(Block::Result(position));
    entries.push(Entry {
        iteration,
        position,
        header,
        payload,
        summary,
        elided: false,
    });
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(12).map(|k| k.as_str()).collect();
            let more = if map.len() > keys.len() { ", ..." } else { "" };
            format!("object with keys: {}{}", keys.join(", "), more)
        }
        Value::Array(items) => format!("array of {} item(s)", items.len()),
        other => format!("{} value", json_type(other)),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
