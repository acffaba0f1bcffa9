//! Prompt text rendered for the model.
//!
//! Templates are plain code: the reply grammar the runner parses is defined
//! here and nowhere else, so the preamble and the parser stay in one crate
//! and cannot drift apart.

use crate::tool::ToolDescriptor;

/// Marker that ends an execution when named as the action.
pub const FINAL_ANSWER: &str = "FINAL_ANSWER";

/// The directive sent as a last model call once the iteration cap is hit.
pub const FINAL_ANSWER_DIRECTIVE: &str = "You have used all available steps. \
You must now give your final answer based on what you have learned so far. \
Reply with ACTION: FINAL_ANSWER and put the answer in ACTION_INPUT.";

/// Prompt instructing the model to split a request into a numbered task list.
pub const DECOMPOSE_PROMPT: &str = "Split the following request into the \
smallest list of independent subtasks needed to fulfil it. Reply with a \
numbered list, one subtask per line, and nothing else. If the request is a \
single task, reply with a single numbered line.";

/// Render the fixed tool-use preamble appended to every agent system prompt.
///
/// Describes the reply grammar and lists the tools the agent may name. The
/// runner appends this verbatim; agents cannot override it.
#[must_use]
pub fn render_tool_preamble(tools: &[ToolDescriptor]) -> String {
    let mut out = String::with_capacity(512 + tools.len() * 96);
    out.push_str(
        "You solve tasks step by step using the tools listed below.\n\
         Reply using exactly this format:\n\n\
         THOUGHT: your reasoning about the next step\n\
         ACTION: one tool name from the list, or FINAL_ANSWER\n\
         ACTION_INPUT: the tool input, or the final answer text\n\n\
         ACTION_INPUT may be a JSON object matching the tool parameters, or a \
         bare value when the tool takes a single parameter. After each tool \
         call you will receive a line starting with OBSERVATION: containing \
         the result. When you can answer the task, use ACTION: FINAL_ANSWER.\n",
    );
    if tools.is_empty() {
        out.push_str("\nNo tools are available; answer directly with ACTION: FINAL_ANSWER.\n");
        return out;
    }
    out.push_str("\nAvailable tools:\n");
    for tool in tools {
        out.push_str("- ");
        out.push_str(&tool.name);
        out.push_str(": ");
        out.push_str(&tool.description);
        if !tool.params.is_empty() {
            out.push_str(" (");
            for (i, param) in tool.params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&param.name);
                out.push_str(": ");
                out.push_str(param.ty.as_str());
                if !param.required {
                    out.push_str("?");
                }
            }
            out.push(')');
        }
        out.push('\n');
    }
    out
}
