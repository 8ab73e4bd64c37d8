//! Compactor: replaces older turns with a single rule-based summary.
//!
//! The cut always lands right after a user message, so an assistant tool
//! call and the tool entry answering it are never separated. A compaction
//! that would still leave the log above the threshold is skipped, which
//! keeps the operation idempotent.

use std::collections::HashMap;
use tracing::debug;
use weaver_core::message::{meta, MessageEntry, Role};
use weaver_core::session::Session;

const REQUEST_PREVIEW_CHARS: usize = 200;
const ERROR_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compactor {
    threshold: usize,
    keep_recent: usize,
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new(40, 10)
    }
}

impl Compactor {
    pub fn new(threshold: usize, keep_recent: usize) -> Self {
        Self {
            threshold,
            keep_recent,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn keep_recent(&self) -> usize {
        self.keep_recent
    }

    /// The compacted log, or `None` when nothing should change.
    pub fn compact(&self, messages: &[MessageEntry]) -> Option<Vec<MessageEntry>> {
        if messages.len() <= self.threshold {
            return None;
        }
        let mut cutoff = messages.len().saturating_sub(self.keep_recent);
        if cutoff <= 1 {
            return None;
        }
        while messages[cutoff - 1].role != Role::User {
            cutoff -= 1;
            if cutoff <= 1 {
                return None;
            }
        }

        let kept = &messages[cutoff..];
        if kept.len() + 1 > self.threshold {
            debug!(
                cutoff,
                kept = kept.len(),
                "Compaction skipped: no boundary brings the log under the threshold"
            );
            return None;
        }

        let summary = MessageEntry::system(summarize(&messages[..cutoff]))
            .with_meta(meta::COMPACTION, true)
            .with_meta("compacted_messages", cutoff as u64);

        let mut out = Vec::with_capacity(kept.len() + 1);
        out.push(summary);
        out.extend_from_slice(kept);
        Some(out)
    }

    /// Compact a live session in place. Returns whether the log changed.
    pub fn compact_session(&self, session: &Session) -> bool {
        let messages = session.messages();
        match self.compact(&messages) {
            Some(compacted) => {
                debug!(
                    session_id = session.id(),
                    before = messages.len(),
                    after = compacted.len(),
                    "Compacted session messages"
                );
                session.replace_messages(compacted);
                true
            }
            None => false,
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

/// First quoted token in `text`, e.g. `employees` in `Table "employees" created`.
fn quoted_name(text: &str) -> Option<String> {
    for quote in ['"', '`', '\''] {
        let mut parts = text.split(quote);
        parts.next();
        if let Some(name) = parts.next().map(str::trim).filter(|n| !n.is_empty()) {
            if parts.next().is_some() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn table_from_args(args: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(args).ok()?;
    ["table_name", "name", "table"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn summarize(prefix: &[MessageEntry]) -> String {
    let mut earlier = Vec::new();
    let mut requests = Vec::new();
    let mut executions: Vec<(String, bool, usize)> = Vec::new();
    let mut tables = Vec::new();
    let mut ui_ops = Vec::new();
    let mut errors = Vec::new();
    let mut call_args: HashMap<&str, &str> = HashMap::new();

    for entry in prefix {
        match entry.role {
            Role::System if entry.is_compaction_summary() => earlier.push(entry.content.trim()),
            Role::User => requests.push(preview(&entry.content, REQUEST_PREVIEW_CHARS)),
            Role::Assistant => {
                if let (Some(id), Some(args)) = (entry.tool_call_id(), entry.tool_call_args()) {
                    call_args.insert(id, args);
                }
            }
            Role::Tool => {
                let name = entry.tool_name().unwrap_or("unknown").to_string();
                let success = entry.flag(meta::SUCCESS) && !entry.flag(meta::ERROR);
                match executions
                    .iter_mut()
                    .find(|(n, s, _)| *n == name && *s == success)
                {
                    Some((_, _, count)) => *count += 1,
                    None => executions.push((name.clone(), success, 1)),
                }

                if !success {
                    let text = entry.content.trim();
                    let text = text.strip_prefix("Error: ").unwrap_or(text);
                    errors.push(format!("{name}: {}", preview(text, ERROR_PREVIEW_CHARS)));
                    continue;
                }
                match name.as_str() {
                    "create_table" => {
                        let table = entry
                            .tool_call_id()
                            .and_then(|id| call_args.get(id))
                            .and_then(|args| table_from_args(args))
                            .or_else(|| quoted_name(&entry.content));
                        if let Some(table) = table {
                            push_unique(&mut tables, table);
                        }
                    }
                    "generate_ui_schema" | "modify_ui_schema" => push_unique(&mut ui_ops, name),
                    _ => {}
                }
            }
            Role::System => {}
        }
    }

    let mut out = format!(
        "[Conversation summary: {} earlier messages compacted]",
        prefix.len()
    );
    if !earlier.is_empty() {
        out.push_str("\n\nEarlier summary:\n");
        out.push_str(&earlier.join("\n"));
    }
    if !requests.is_empty() {
        out.push_str("\n\nUser requests:");
        for r in &requests {
            out.push_str(&format!("\n- {r}"));
        }
    }
    if !executions.is_empty() {
        out.push_str("\n\nTool executions:");
        for (name, success, count) in &executions {
            let outcome = if *success { "success" } else { "failed" };
            out.push_str(&format!("\n- {name} x{count} ({outcome})"));
        }
    }
    if !tables.is_empty() {
        out.push_str(&format!("\n\nTables created: {}", tables.join(", ")));
    }
    if !ui_ops.is_empty() {
        out.push_str(&format!("\n\nUI schema operations: {}", ui_ops.join(", ")));
    }
    if !errors.is_empty() {
        out.push_str("\n\nErrors:");
        for e in &errors {
            out.push_str(&format!("\n- {e}"));
        }
    }
    out
}
