//! Context pruner — conversation-side utility (spec.md §4.14, component C14)
//!
//! Compacts old tool-output messages beyond a protected recency window and
//! past a `[SUMMARY]` barrier, so a long-running conversation doesn't carry
//! every historical tool payload into every subsequent prompt.

/// A message role relevant to pruning decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// One conversation message. Fields outside of `content` are preserved
/// verbatim across pruning (spec.md §4.14).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone)]
pub struct PrunerConfig {
    /// Number of most-recent user turns that are never pruned.
    pub protect_recent_turns: usize,
    /// Minimum character length of a tool-result body before it's eligible
    /// for pruning.
    pub min_prune_length: usize,
    /// Tool names that are never pruned regardless of age or length.
    pub protected_tools: Vec<String>,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self { protect_recent_turns: 2, min_prune_length: 200, protected_tools: Vec::new() }
    }
}

fn placeholder(char_count: usize) -> String {
    format!("[OUTPUT PRUNED — {char_count} chars]")
}

/// Index of the start of the last `protect_recent_turns` user turns. If
/// there are fewer user turns than that, the whole transcript is protected
/// (index `0`).
fn recent_turn_barrier(messages: &[Message], protect_recent_turns: usize) -> usize {
    let user_indices: Vec<usize> =
        messages.iter().enumerate().filter(|(_, m)| m.role == Role::User).map(|(i, _)| i).collect();
    if user_indices.len() <= protect_recent_turns {
        0
    } else {
        user_indices[user_indices.len() - protect_recent_turns]
    }
}

/// Index of the most recent assistant message containing a `[SUMMARY]`
/// marker, if any.
fn summary_barrier(messages: &[Message]) -> Option<usize> {
    messages
        .iter()
        .enumerate()
        .rev()
        .find(|(_, m)| m.role == Role::Assistant && m.content.contains("[SUMMARY]"))
        .map(|(i, _)| i)
}

/// Compacts tool-result messages older than both barriers. Returns the
/// input unchanged (no allocation, no-op) when nothing was eligible for
/// pruning (spec.md §4.14 / §8: "if nothing was pruned, return the
/// original list by identity" — the closest Rust equivalent is returning
/// the same `Vec` without ever cloning a `Message`).
pub fn prune(messages: Vec<Message>, config: &PrunerConfig) -> Vec<Message> {
    let recent = recent_turn_barrier(&messages, config.protect_recent_turns);
    let summary = summary_barrier(&messages).unwrap_or(0);
    let barrier = recent.max(summary);

    let any_eligible = messages[..barrier.min(messages.len())].iter().any(|m| is_eligible(m, config));
    if !any_eligible {
        return messages;
    }

    messages
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            if i < barrier && is_eligible(&m, config) {
                let char_count = m.content.chars().count();
                Message {
                    role: m.role,
                    content: placeholder(char_count),
                    tool_call_id: m.tool_call_id,
                    tool_name: m.tool_name,
                    timestamp_ms: m.timestamp_ms,
                }
            } else {
                m
            }
        })
        .collect()
}

fn is_eligible(m: &Message, config: &PrunerConfig) -> bool {
    m.role == Role::ToolResult
        && m.content.chars().count() >= config.min_prune_length
        && !m.tool_name.as_deref().is_some_and(|name| config.protected_tools.iter().any(|p| p == name))
}
