//! The orchestrator: decomposes a prompt into tasks and schedules them.
//!
//! Decomposition asks the model for a numbered list; each line becomes one
//! task, assigned to an agent through the selector. A single-task plan
//! degrades transparently to one runner invocation. Multi-task plans run
//! sequentially (outputs threaded forward as context) or in parallel over an
//! explicit dependency DAG with fork/join waves.

mod plan;

pub use plan::{ExecutionMode, Plan, PlanTask, TaskStatus};

use std::sync::{Arc, LazyLock};

use futures::StreamExt;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::capability::{ChatCapability, SamplingOptions};
use crate::catalog::{AgentCatalog, AgentSelector};
use crate::error::{CoreError, Result};
use crate::message::Message;
use crate::prompts::DECOMPOSE_PROMPT;
use crate::runner::{CancelHandle, ExecutionRecord, Runner};
use crate::stream::{Chunk, ChunkSink, DEFAULT_STREAM_CAPACITY, channel};

static NUMBERED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    // Infallible: the pattern is a literal.
    Regex::new(r"^\s*\d+[.)]\s*(.+)$").unwrap_or_else(|_| unreachable!())
});

/// The result of an orchestrated run.
#[derive(Debug)]
pub struct OrchestratorOutcome {
    /// The executed plan with final statuses and outputs.
    pub plan: Plan,
    /// The combined response, `Task <n>:` headers included.
    pub response: String,
    /// Per-task execution records, keyed by task id, for inspection.
    pub records: Vec<(String, ExecutionRecord)>,
    /// True when at least one task completed.
    pub succeeded: bool,
}

/// Decomposes prompts and schedules per-task agent executions.
pub struct Orchestrator {
    chat: Arc<dyn ChatCapability>,
    selector: Arc<AgentSelector>,
    catalog: Arc<AgentCatalog>,
    runner: Arc<Runner>,
    plan_model: String,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("plan_model", &self.plan_model)
            .finish_non_exhaustive()
    }
}

/// What one task execution produced.
struct TaskResult {
    record: Option<ExecutionRecord>,
    error: Option<String>,
}

impl Orchestrator {
    /// Create an orchestrator over the injected components.
    ///
    /// `plan_model` is the chat model used for decomposition.
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatCapability>,
        selector: Arc<AgentSelector>,
        catalog: Arc<AgentCatalog>,
        runner: Arc<Runner>,
        plan_model: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            selector,
            catalog,
            runner,
            plan_model: plan_model.into(),
        }
    }

    /// Decompose `prompt`, build a plan, and execute it.
    ///
    /// # Errors
    ///
    /// [`CoreError::Validation`] for an empty prompt, or a catalog
    /// persistence failure while creating the fallback agent.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        prompt: &str,
        mode: ExecutionMode,
        sink: ChunkSink,
        cancel: &CancelHandle,
    ) -> Result<OrchestratorOutcome> {
        if prompt.trim().is_empty() {
            return Err(CoreError::validation("prompt must not be empty"));
        }
        let descriptions = self.decompose(prompt).await;
        let mut tasks = Vec::with_capacity(descriptions.len());
        for (i, description) in descriptions.into_iter().enumerate() {
            let selection = self.selector.select_by_prompt(&description).await?;
            tasks.push(PlanTask::new(
                format!("t{}", i + 1),
                description,
                selection.agent_id,
            ));
        }
        info!(tasks = tasks.len(), ?mode, "plan built");
        self.run_plan(Plan::new(tasks, mode), sink, cancel).await
    }

    /// Execute an explicit plan.
    ///
    /// This is the programmatic entry point; `depends_on` edges are honoured
    /// regardless of how the plan was produced.
    ///
    /// # Errors
    ///
    /// [`CoreError::Validation`] for an empty plan.
    pub async fn run_plan(
        &self,
        mut plan: Plan,
        mut sink: ChunkSink,
        cancel: &CancelHandle,
    ) -> Result<OrchestratorOutcome> {
        if plan.tasks.is_empty() {
            return Err(CoreError::validation("plan has no tasks"));
        }

        let mut records = Vec::new();

        // A one-task plan behaves exactly like a direct execution.
        if plan.tasks.len() == 1 {
            let result = self
                .run_task(&mut plan.tasks[0], &[], &mut sink, cancel, true)
                .await;
            let response = plan.tasks[0].output.clone().unwrap_or_default();
            if let Some(record) = result.record {
                records.push((plan.tasks[0].task_id.clone(), record));
            }
            let succeeded = plan.any_completed();
            return Ok(OrchestratorOutcome {
                plan,
                response,
                records,
                succeeded,
            });
        }

        match plan.mode {
            ExecutionMode::Sequential => {
                self.run_sequential(&mut plan, &mut records, &mut sink, cancel)
                    .await;
            }
            ExecutionMode::Parallel => {
                self.run_parallel(&mut plan, &mut records, &mut sink, cancel)
                    .await;
            }
        }

        let response = combined_response(&plan);
        let _ = sink
            .emit(Chunk::Final {
                content: response.clone(),
            })
            .await;
        let succeeded = plan.any_completed();
        info!(succeeded, "plan finished");
        Ok(OrchestratorOutcome {
            plan,
            response,
            records,
            succeeded,
        })
    }

    /// Ask the model to split the prompt; fall back to a single task when
    /// the model fails or returns no numbered lines.
    async fn decompose(&self, prompt: &str) -> Vec<String> {
        let messages = [Message::system(DECOMPOSE_PROMPT), Message::user(prompt)];
        let outcome = self
            .chat
            .chat(&self.plan_model, &messages, &SamplingOptions::default())
            .await;
        let reply = match outcome {
            Ok(outcome) => outcome.content,
            Err(err) => {
                warn!(error = %err, "decomposition failed, running as one task");
                return vec![prompt.to_string()];
            }
        };
        let tasks: Vec<String> = reply
            .lines()
            .filter_map(|line| {
                NUMBERED_LINE
                    .captures(line)
                    .map(|caps| caps[1].trim().to_string())
            })
            .filter(|t| !t.is_empty())
            .collect();
        if tasks.is_empty() {
            debug!("no numbered lines in decomposition reply");
            vec![prompt.to_string()]
        } else {
            tasks
        }
    }

    async fn run_sequential(
        &self,
        plan: &mut Plan,
        records: &mut Vec<(String, ExecutionRecord)>,
        sink: &mut ChunkSink,
        cancel: &CancelHandle,
    ) {
        for index in 0..plan.tasks.len() {
            if cancel.is_cancelled() {
                break;
            }
            if has_failed_predecessor(plan, index) {
                let task = &mut plan.tasks[index];
                task.status = TaskStatus::Failed;
                task.error = Some("predecessor failed".into());
                continue;
            }
            let context = completed_outputs(plan, index);
            let header = Chunk::Response {
                content: format!("Task {}: {}", index + 1, plan.tasks[index].description),
            };
            if sink.emit(header).await.is_err() {
                break;
            }
            let result = self
                .run_task(&mut plan.tasks[index], &context, sink, cancel, false)
                .await;
            if let Some(record) = result.record {
                records.push((plan.tasks[index].task_id.clone(), record));
            }
        }
    }

    async fn run_parallel(
        &self,
        plan: &mut Plan,
        records: &mut Vec<(String, ExecutionRecord)>,
        sink: &mut ChunkSink,
        cancel: &CancelHandle,
    ) {
        while plan
            .tasks
            .iter()
            .any(|t| t.status == TaskStatus::Pending)
        {
            if cancel.is_cancelled() {
                break;
            }
            propagate_predecessor_failures(plan);

            let ready: Vec<usize> = plan
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| t.status == TaskStatus::Pending && deps_completed(plan, t))
                .map(|(i, _)| i)
                .collect();
            if ready.is_empty() {
                // Whatever is left depends on something that will never
                // complete (unknown ids or cycles).
                for task in &mut plan.tasks {
                    if task.status == TaskStatus::Pending {
                        task.status = TaskStatus::Failed;
                        task.error = Some("unsatisfiable dependency".into());
                    }
                }
                break;
            }

            self.run_wave(plan, &ready, records, sink, cancel).await;
        }
    }

    /// Fork one wave of independent tasks, merge their chunk streams into
    /// the outer sink, and join the results.
    async fn run_wave(
        &self,
        plan: &mut Plan,
        ready: &[usize],
        records: &mut Vec<(String, ExecutionRecord)>,
        sink: &mut ChunkSink,
        cancel: &CancelHandle,
    ) {
        let mut handles = Vec::with_capacity(ready.len());
        let mut streams = Vec::with_capacity(ready.len());

        for &index in ready {
            let task = &mut plan.tasks[index];
            task.status = TaskStatus::Running;
            let header = Chunk::Response {
                content: format!("Task {}: {}", index + 1, task.description),
            };
            if sink.emit(header).await.is_err() {
                return;
            }

            let agent = match self.catalog.get(&task.assigned_agent_id) {
                Ok(agent) => agent,
                Err(err) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(err.to_string());
                    continue;
                }
            };
            let (task_sink, task_stream) = channel(DEFAULT_STREAM_CAPACITY);
            let runner = Arc::clone(&self.runner);
            let cancel = cancel.clone();
            let message = task.description.clone();
            handles.push((
                index,
                tokio::spawn(async move {
                    runner.run(&agent, &message, task_sink, &cancel, None).await
                }),
            ));
            streams.push(task_stream);
        }

        if handles.is_empty() {
            return;
        }
        let mut merged = futures::stream::select_all(streams);
        let forward = async {
            while let Some(envelope) = merged.next().await {
                if envelope.chunk.is_final() {
                    continue;
                }
                if sink.emit(envelope.chunk).await.is_err() {
                    break;
                }
            }
        };
        let indices: Vec<usize> = handles.iter().map(|(i, _)| *i).collect();
        let joins = futures::future::join_all(handles.into_iter().map(|(_, h)| h));
        let (_, results) = tokio::join!(forward, joins);

        for (index, joined) in indices.into_iter().zip(results) {
            let task = &mut plan.tasks[index];
            match joined {
                Ok(Ok(record)) => {
                    apply_record(task, &record);
                    records.push((task.task_id.clone(), record));
                }
                Ok(Err(err)) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(err.to_string());
                }
                Err(join_err) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(join_err.to_string());
                }
            }
        }
    }

    /// Run one task inline, forwarding its chunks into the outer sink.
    ///
    /// `transparent` keeps the task's own `Final` chunk (single-task
    /// degrade); otherwise finals are suppressed in favour of the combined
    /// one.
    async fn run_task(
        &self,
        task: &mut PlanTask,
        context: &[(String, String)],
        sink: &mut ChunkSink,
        cancel: &CancelHandle,
        transparent: bool,
    ) -> TaskResult {
        task.status = TaskStatus::Running;
        let agent = match self.catalog.get(&task.assigned_agent_id) {
            Ok(agent) => agent,
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err.to_string());
                return TaskResult {
                    record: None,
                    error: task.error.clone(),
                };
            }
        };

        let mut message = task.description.clone();
        if !context.is_empty() {
            message.push_str("\n\nContext from earlier tasks:\n");
            for (label, output) in context {
                message.push_str(label);
                message.push_str(": ");
                message.push_str(output);
                message.push('\n');
            }
        }

        let (task_sink, mut task_stream) = channel(DEFAULT_STREAM_CAPACITY);
        let run = self.runner.run(&agent, &message, task_sink, cancel, None);
        let forward = async {
            while let Some(envelope) = task_stream.next().await {
                if !transparent && envelope.chunk.is_final() {
                    continue;
                }
                if sink.emit(envelope.chunk).await.is_err() {
                    break;
                }
            }
        };
        let (outcome, ()) = tokio::join!(run, forward);

        match outcome {
            Ok(record) => {
                apply_record(task, &record);
                TaskResult {
                    record: Some(record),
                    error: task.error.clone(),
                }
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err.to_string());
                TaskResult {
                    record: None,
                    error: task.error.clone(),
                }
            }
        }
    }
}

fn apply_record(task: &mut PlanTask, record: &ExecutionRecord) {
    if record.is_success() {
        task.status = TaskStatus::Completed;
        task.output = Some(record.response.clone());
    } else {
        task.status = TaskStatus::Failed;
        task.error = Some(format!("execution ended with status {}", record.status));
    }
}

/// Outputs of completed tasks earlier than `index`, labelled for prompting.
fn completed_outputs(plan: &Plan, index: usize) -> Vec<(String, String)> {
    plan.tasks[..index]
        .iter()
        .enumerate()
        .filter(|(_, t)| t.status == TaskStatus::Completed)
        .filter_map(|(i, t)| {
            t.output
                .as_ref()
                .map(|o| (format!("Task {} ({})", i + 1, t.description), o.clone()))
        })
        .collect()
}

fn has_failed_predecessor(plan: &Plan, index: usize) -> bool {
    plan.tasks[index].depends_on.iter().any(|dep| {
        plan.position(dep)
            .is_none_or(|i| plan.tasks[i].status == TaskStatus::Failed)
    })
}

fn deps_completed(plan: &Plan, task: &PlanTask) -> bool {
    task.depends_on.iter().all(|dep| {
        plan.position(dep)
            .is_some_and(|i| plan.tasks[i].status == TaskStatus::Completed)
    })
}

/// Mark pending tasks whose predecessors failed, cascading through the DAG.
fn propagate_predecessor_failures(plan: &mut Plan) {
    loop {
        let mut changed = false;
        for index in 0..plan.tasks.len() {
            if plan.tasks[index].status == TaskStatus::Pending {
                let failed_dep = plan.tasks[index].depends_on.iter().any(|dep| {
                    plan.position(dep)
                        .is_some_and(|i| plan.tasks[i].status == TaskStatus::Failed)
                });
                if failed_dep {
                    plan.tasks[index].status = TaskStatus::Failed;
                    plan.tasks[index].error = Some("predecessor failed".into());
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Concatenate per-task outputs in declared order with headers.
fn combined_response(plan: &Plan) -> String {
    let mut out = String::new();
    for (i, task) in plan.tasks.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        out.push_str(&format!("Task {}: {}\n", i + 1, task.description));
        match (&task.output, &task.error) {
            (Some(output), _) => out.push_str(output),
            (None, Some(error)) => out.push_str(&format!("[failed: {error}]")),
            (None, None) => out.push_str("[not run]"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::MockChat;
    use crate::catalog::{AgentDefinition, SelectorConfig};
    use crate::context::ContextManager;
    use crate::tool::ToolRegistry;
    use crate::tool::builtin::{ToolEndpoints, register_defaults};

    struct Fixture {
        _dir: tempfile::TempDir,
        orchestrator: Orchestrator,
    }

    fn fixture(replies: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(AgentCatalog::open(dir.path().join("agents.json")));
        catalog
            .create(
                AgentDefinition::new("worker", "default-chat")
                    .with_description("Does any kind of task"),
            )
            .unwrap();

        let registry = Arc::new(ToolRegistry::new());
        register_defaults(&registry, &ToolEndpoints::default(), None).unwrap();
        let chat: Arc<dyn ChatCapability> = Arc::new(MockChat::scripted(replies.to_vec()));
        let runner = Arc::new(Runner::new(
            Arc::clone(&chat),
            registry,
            Arc::new(ContextManager::with_defaults()),
        ));
        let selector = Arc::new(AgentSelector::new(
            Arc::clone(&catalog),
            Some(Arc::new(crate::capability::mock::MockEmbedder::new())),
            SelectorConfig {
                score_floor: 0.0,
                ..SelectorConfig::default()
            },
            "default-chat",
        ));
        let orchestrator = Orchestrator::new(chat, selector, catalog, runner, "default-chat");
        Fixture {
            _dir: dir,
            orchestrator,
        }
    }

    async fn run_with_drain(
        orchestrator: &Orchestrator,
        prompt: &str,
        mode: ExecutionMode,
    ) -> (OrchestratorOutcome, Vec<Chunk>) {
        let (sink, stream) = channel(256);
        let cancel = CancelHandle::new();
        let (outcome, chunks) = tokio::join!(
            orchestrator.run(prompt, mode, sink, &cancel),
            stream.map(|e| e.chunk).collect::<Vec<_>>()
        );
        (outcome.unwrap(), chunks)
    }

    #[tokio::test]
    async fn two_task_sequential_plan_combines_outputs() {
        // Replies serve, in order: decomposition, task 1, task 2.
        let fx = fixture(&[
            "1. Translate 'hello' to French\n2. Count the letters of the translation",
            "ACTION: FINAL_ANSWER\nACTION_INPUT: bonjour",
            "ACTION: FINAL_ANSWER\nACTION_INPUT: 7 letters",
        ]);
        let (outcome, chunks) = run_with_drain(
            &fx.orchestrator,
            "translate 'hello' to French, then count its letters",
            ExecutionMode::Sequential,
        )
        .await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.plan.tasks.len(), 2);
        assert_eq!(outcome.plan.mode, ExecutionMode::Sequential);
        assert!(outcome.response.contains("Task 1:"));
        assert!(outcome.response.contains("bonjour"));
        assert!(outcome.response.contains("Task 2:"));
        assert!(outcome.response.contains("7 letters"));
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(chunks.iter().filter(|c| c.is_final()).count(), 1);
        assert!(chunks.last().unwrap().is_final());
    }

    #[tokio::test]
    async fn second_task_sees_first_output_as_context() {
        let fx = fixture(&[
            "1. Produce a word\n2. Use the word",
            "ACTION: FINAL_ANSWER\nACTION_INPUT: bonjour",
            "ACTION: FINAL_ANSWER\nACTION_INPUT: used it",
        ]);
        let (outcome, _) = run_with_drain(
            &fx.orchestrator,
            "produce then use",
            ExecutionMode::Sequential,
        )
        .await;
        // The second record's conversation carried the first task's output.
        assert!(outcome.succeeded);
        let second = &outcome.records[1].1;
        assert_eq!(second.status, crate::runner::ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn single_task_degrades_to_plain_execution() {
        let fx = fixture(&[
            "1. Just answer",
            "ACTION: FINAL_ANSWER\nACTION_INPUT: direct answer",
        ]);
        let (outcome, chunks) =
            run_with_drain(&fx.orchestrator, "say it", ExecutionMode::Sequential).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.plan.tasks.len(), 1);
        assert_eq!(outcome.response, "direct answer");
        assert!(!outcome.response.contains("Task 1:"));
        assert_eq!(chunks.iter().filter(|c| c.is_final()).count(), 1);
    }

    #[tokio::test]
    async fn unnumbered_decomposition_reply_means_one_task() {
        let fx = fixture(&[
            "I cannot split this",
            "ACTION: FINAL_ANSWER\nACTION_INPUT: whole answer",
        ]);
        let (outcome, _) =
            run_with_drain(&fx.orchestrator, "do it all", ExecutionMode::Sequential).await;
        assert_eq!(outcome.plan.tasks.len(), 1);
        assert_eq!(outcome.response, "whole answer");
    }

    #[tokio::test]
    async fn parallel_independent_tasks_all_complete() {
        let fx = fixture(&[
            "1. First thing\n2. Second thing\n3. Third thing",
            "ACTION: FINAL_ANSWER\nACTION_INPUT: done",
        ]);
        let (outcome, chunks) =
            run_with_drain(&fx.orchestrator, "three things", ExecutionMode::Parallel).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.plan.tasks.len(), 3);
        assert!(outcome
            .plan
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed));
        assert_eq!(chunks.iter().filter(|c| c.is_final()).count(), 1);
    }

    #[tokio::test]
    async fn failed_predecessor_skips_dependents() {
        let fx = fixture(&["unused decomposition", "ACTION: FINAL_ANSWER\nACTION_INPUT: ok"]);
        // Build the plan programmatically: t2 depends on t1, whose agent
        // does not exist.
        let plan = Plan::new(
            vec![
                PlanTask::new("t1", "doomed", "missing-agent"),
                PlanTask::new("t2", "dependent", "missing-agent").with_depends_on(["t1"]),
            ],
            ExecutionMode::Parallel,
        );
        let (sink, stream) = channel(64);
        let cancel = CancelHandle::new();
        let (outcome, _chunks) = tokio::join!(
            fx.orchestrator.run_plan(plan, sink, &cancel),
            stream.collect::<Vec<_>>()
        );
        let outcome = outcome.unwrap();

        assert!(!outcome.succeeded);
        assert_eq!(outcome.plan.tasks[0].status, TaskStatus::Failed);
        assert_eq!(outcome.plan.tasks[1].status, TaskStatus::Failed);
        assert_eq!(
            outcome.plan.tasks[1].error.as_deref(),
            Some("predecessor failed")
        );
    }

    #[test]
    fn numbered_line_regex_accepts_common_shapes() {
        for line in ["1. task", "  2) another", "10. ten"] {
            assert!(NUMBERED_LINE.is_match(line), "{line}");
        }
        assert!(!NUMBERED_LINE.is_match("no number here"));
    }
}
