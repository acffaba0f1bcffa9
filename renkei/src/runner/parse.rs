//! Lenient parsing of model replies.
//!
//! The reply grammar is a recogniser, not a strict parser: markers are
//! matched case-insensitively at the start of a line, content runs to the
//! next marker, `ACTION_INPUT` may span lines, and a reply with no `ACTION`
//! at all is an implicit final answer.

use crate::prompts::FINAL_ANSWER;

/// What the model asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAction {
    /// Invoke a tool with the raw input text.
    Tool {
        /// The tool name as written by the model.
        name: String,
        /// Everything after `ACTION_INPUT:`, untrimmed of inner newlines.
        input: String,
    },
    /// Terminate with this answer.
    Final {
        /// The final answer text.
        text: String,
    },
}

/// A parsed model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// The `THOUGHT:` content, possibly empty.
    pub thought: String,
    /// The requested action.
    pub action: ReplyAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Thought,
    Action,
    ActionInput,
}

/// Match a marker at the start of a line, returning the rest of the line.
fn match_marker(line: &str) -> Option<(Marker, &str)> {
    let lead = line.trim_start();
    for (marker, label) in [
        (Marker::ActionInput, "ACTION_INPUT:"),
        (Marker::Action, "ACTION:"),
        (Marker::Thought, "THOUGHT:"),
    ] {
        if let Some(head) = lead.get(..label.len())
            && head.eq_ignore_ascii_case(label)
        {
            return Some((marker, &lead[label.len()..]));
        }
    }
    None
}

/// Parse a model reply into thought and action.
#[must_use]
pub fn parse_reply(text: &str) -> ParsedReply {
    let mut thought = String::new();
    let mut action: Option<String> = None;
    let mut action_input = String::new();
    let mut current: Option<Marker> = None;

    for line in text.lines() {
        if let Some((marker, rest)) = match_marker(line) {
            current = Some(marker);
            let rest = rest.trim_start();
            match marker {
                Marker::Thought => thought = rest.to_string(),
                Marker::Action => action = Some(rest.trim().to_string()),
                Marker::ActionInput => action_input = rest.to_string(),
            }
            continue;
        }
        // Continuation lines extend the current section.
        match current {
            Some(Marker::Thought) => {
                if !thought.is_empty() {
                    thought.push('\n');
                }
                thought.push_str(line);
            }
            Some(Marker::ActionInput) => {
                action_input.push('\n');
                action_input.push_str(line);
            }
            // A multi-line ACTION makes no sense; ignore the spill.
            Some(Marker::Action) | None => {}
        }
    }

    let thought = thought.trim().to_string();
    let action_input = action_input.trim().to_string();

    match action {
        None => ParsedReply {
            thought: String::new(),
            action: ReplyAction::Final {
                text: text.trim().to_string(),
            },
        },
        Some(name) if name.eq_ignore_ascii_case(FINAL_ANSWER) => {
            let text = if action_input.is_empty() {
                thought.clone()
            } else {
                action_input
            };
            ParsedReply {
                thought,
                action: ReplyAction::Final { text },
            }
        }
        Some(name) => ParsedReply {
            thought,
            action: ReplyAction::Tool {
                name,
                input: action_input,
            },
        },
    }
}
