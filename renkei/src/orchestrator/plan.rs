//! Plan types for multi-task execution.

use serde::{Deserialize, Serialize};

/// How a plan's tasks are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Tasks run in declared order; each output feeds later tasks.
    Sequential,
    /// Independent tasks run concurrently; dependents wait for their
    /// predecessors.
    Parallel,
}

/// Lifecycle of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished with an answer.
    Completed,
    /// Finished without an answer.
    Failed,
}

/// One task in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    /// Stable task id within the plan (`t1`, `t2`, ...).
    pub task_id: String,
    /// What the task asks for; also drives agent selection.
    pub description: String,
    /// The agent assigned by the selector.
    pub assigned_agent_id: String,
    /// Ids of tasks that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Current status.
    pub status: TaskStatus,
    /// The task's output once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure reason once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanTask {
    /// Create a pending task.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        description: impl Into<String>,
        assigned_agent_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            assigned_agent_id: assigned_agent_id.into(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            output: None,
            error: None,
        }
    }

    /// Declare predecessors.
    #[must_use]
    pub fn with_depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// An ordered set of tasks plus its scheduling mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Tasks in declared order.
    pub tasks: Vec<PlanTask>,
    /// Scheduling mode.
    pub mode: ExecutionMode,
}

impl Plan {
    /// Create a plan.
    #[must_use]
    pub const fn new(tasks: Vec<PlanTask>, mode: ExecutionMode) -> Self {
        Self { tasks, mode }
    }

    /// Whether at least one task completed.
    #[must_use]
    pub fn any_completed(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| t.status == TaskStatus::Completed)
    }

    /// Index lookup by task id.
    #[must_use]
    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.task_id == task_id)
    }
}
