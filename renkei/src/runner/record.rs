//! Execution records and steps.

use serde::{Deserialize, Serialize};

use crate::capability::TokenUsage;

/// Terminal status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The model produced a final answer.
    Completed,
    /// The iteration cap was hit; the recorded response comes from the
    /// courtesy final call.
    MaxIterationsReached,
    /// The execution deadline elapsed.
    TimedOut,
    /// The model call failed.
    Failed,
    /// The caller cancelled the execution.
    Cancelled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// The action taken in one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// A tool was invoked.
    ToolCall {
        /// Tool name as the model wrote it.
        tool: String,
        /// The raw input handed to the registry.
        raw_input: String,
    },
    /// The model terminated with an answer.
    FinalAnswer {
        /// The answer text.
        text: String,
    },
}

/// One iteration of the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// 0-based iteration index.
    pub index: u32,
    /// The model's thought, possibly empty.
    pub thought: String,
    /// What the model asked for.
    pub action: StepAction,
    /// Tool observation; present only for tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
    /// Whether the tool succeeded; present only for tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_success: Option<bool>,
    /// Tool wall time in milliseconds; present only for tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_duration_ms: Option<u64>,
    /// Wall time of the whole iteration in milliseconds.
    pub wall_time_ms: u64,
}

/// The complete result of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique execution id.
    pub execution_id: String,
    /// The agent that ran.
    pub agent_id: String,
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Final response text; may be empty on failure.
    pub response: String,
    /// Iterations performed (the courtesy final call not included).
    pub iterations: u32,
    /// Aggregated token usage.
    pub usage: TokenUsage,
    /// Ordered per-iteration records.
    pub steps: Vec<ExecutionStep>,
    /// Start time, epoch seconds.
    pub started_at: i64,
    /// End time, epoch seconds.
    pub finished_at: i64,
}

impl ExecutionRecord {
    /// Whether the run ended with a usable answer.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::MaxIterationsReached
        )
    }
}
