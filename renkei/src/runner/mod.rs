//! The agent runner: drives the reason-act loop for one execution.
//!
//! A runner instance is shared, but each call to [`Runner::run`] handles
//! exactly one execution with its own conversation, deadline, cancellation
//! flag, and chunk sink. Termination conditions are checked in a fixed order
//! at the top of every iteration: deadline, cancellation, iteration cap,
//! then the model call itself.

mod parse;
mod record;

pub use parse::{ParsedReply, ReplyAction, parse_reply};
pub use record::{ExecutionRecord, ExecutionStatus, ExecutionStep, StepAction};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::capability::{ChatCapability, SamplingOptions, TokenUsage};
use crate::catalog::AgentDefinition;
use crate::context::ContextManager;
use crate::error::{CoreError, Result};
use crate::message::{Message, estimate_tokens, estimate_total};
use crate::prompts::{FINAL_ANSWER_DIRECTIVE, render_tool_preamble};
use crate::stream::{Chunk, ChunkSink, StreamClosed};
use crate::tool::{InvocationCtx, ToolDescriptor, ToolRegistry};

/// Prefix of every tool observation fed back to the model.
const OBSERVATION_PREFIX: &str = "OBSERVATION: ";

/// External cancellation signal for one execution.
///
/// Cloned handles share the flag; the runner observes it at iteration
/// boundaries, and the inherited deadline covers long tool calls.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Create an unfired handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives executions against the chat capability and the tool registry.
pub struct Runner {
    chat: Arc<dyn ChatCapability>,
    registry: Arc<ToolRegistry>,
    context: Arc<ContextManager>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").finish_non_exhaustive()
    }
}

/// Everything accumulated over one execution.
struct RunState {
    execution_id: String,
    conversation: Vec<Message>,
    steps: Vec<ExecutionStep>,
    usage: TokenUsage,
    last_observation: Option<String>,
    started_at: i64,
}

impl RunState {
    fn finish(
        self,
        agent: &AgentDefinition,
        status: ExecutionStatus,
        response: String,
        iterations: u32,
    ) -> ExecutionRecord {
        ExecutionRecord {
            execution_id: self.execution_id,
            agent_id: agent.id.clone(),
            status,
            response,
            iterations,
            usage: self.usage,
            steps: self.steps,
            started_at: self.started_at,
            finished_at: epoch_seconds(),
        }
    }
}

fn epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

impl Runner {
    /// Create a runner over the injected components.
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatCapability>,
        registry: Arc<ToolRegistry>,
        context: Arc<ContextManager>,
    ) -> Self {
        Self {
            chat,
            registry,
            context,
        }
    }

    /// Run one execution to completion, emitting chunks into `sink`.
    ///
    /// The sink is consumed so the stream closes exactly when the execution
    /// ends. The effective deadline is the agent's `timeout_seconds`,
    /// tightened by `caller_timeout` when that is shorter. Exactly one
    /// `Final` chunk is emitted unless the execution is cancelled (including
    /// by the consumer dropping the stream), in which case emission stops
    /// silently.
    ///
    /// # Errors
    ///
    /// [`CoreError::Validation`] before anything runs: empty message, or
    /// enabled tools that do not resolve in the registry.
    #[instrument(skip_all, fields(agent = %agent.id))]
    pub async fn run(
        &self,
        agent: &AgentDefinition,
        user_message: &str,
        mut sink: ChunkSink,
        cancel: &CancelHandle,
        caller_timeout: Option<Duration>,
    ) -> Result<ExecutionRecord> {
        if user_message.trim().is_empty() {
            return Err(CoreError::validation("message must not be empty"));
        }
        let tools = self.resolve_agent_tools(agent)?;

        let timeout = caller_timeout
            .map_or(Duration::from_secs(agent.timeout_seconds), |caller| {
                caller.min(Duration::from_secs(agent.timeout_seconds))
            });
        let deadline = Instant::now() + timeout;

        let system_content = format!(
            "{}\n\n{}",
            agent.system_prompt.trim(),
            render_tool_preamble(&tools)
        );
        let sampling = SamplingOptions {
            temperature: Some(agent.temperature),
            top_p: Some(agent.top_p),
            max_tokens: Some(agent.max_output_tokens),
        };

        let mut state = RunState {
            execution_id: Uuid::new_v4().to_string(),
            conversation: vec![Message::user(user_message)],
            steps: Vec::new(),
            usage: TokenUsage::default(),
            last_observation: None,
            started_at: epoch_seconds(),
        };
        info!(
            execution = %state.execution_id,
            timeout_secs = timeout.as_secs(),
            "execution started"
        );

        let mut iteration: u32 = 0;
        loop {
            // Termination checks, in contract order.
            if Instant::now() >= deadline {
                let response = state.last_observation.clone().unwrap_or_default();
                let _ = sink
                    .emit(Chunk::Final {
                        content: response.clone(),
                    })
                    .await;
                warn!(execution = %state.execution_id, iteration, "deadline elapsed");
                return Ok(state.finish(agent, ExecutionStatus::TimedOut, response, iteration));
            }
            if cancel.is_cancelled() {
                info!(execution = %state.execution_id, iteration, "cancelled");
                return Ok(state.finish(
                    agent,
                    ExecutionStatus::Cancelled,
                    String::new(),
                    iteration,
                ));
            }
            if iteration >= agent.max_iterations {
                return Ok(self
                    .courtesy_final(
                        agent,
                        &system_content,
                        &sampling,
                        deadline,
                        &mut sink,
                        state,
                        iteration,
                    )
                    .await);
            }

            let iteration_started = Instant::now();
            let prompt = self
                .assemble_prompt(agent, &system_content, &state.conversation)
                .await;

            let outcome = match tokio::time::timeout_at(
                deadline,
                self.chat.chat(&agent.model, &prompt, &sampling),
            )
            .await
            {
                Err(_) => {
                    let response = state.last_observation.clone().unwrap_or_default();
                    let _ = sink
                        .emit(Chunk::Final {
                            content: response.clone(),
                        })
                        .await;
                    warn!(execution = %state.execution_id, iteration, "model call hit the deadline");
                    return Ok(state.finish(agent, ExecutionStatus::TimedOut, response, iteration));
                }
                Ok(Err(err)) => {
                    warn!(execution = %state.execution_id, error = %err, "model call failed");
                    let _ = sink
                        .emit(Chunk::Final {
                            content: String::new(),
                        })
                        .await;
                    return Ok(state.finish(
                        agent,
                        ExecutionStatus::Failed,
                        String::new(),
                        iteration,
                    ));
                }
                Ok(Ok(outcome)) => outcome,
            };
            state.usage += outcome
                .usage
                .unwrap_or_else(|| estimated_usage(&prompt, &outcome.content));

            let reply = parse_reply(&outcome.content);
            if sink
                .emit(Chunk::Thinking {
                    iteration,
                    content: reply.thought.clone(),
                })
                .await
                .is_err()
            {
                return Ok(state.finish(
                    agent,
                    ExecutionStatus::Cancelled,
                    String::new(),
                    iteration,
                ));
            }

            match reply.action {
                ReplyAction::Final { text } => {
                    state.steps.push(ExecutionStep {
                        index: iteration,
                        thought: reply.thought,
                        action: StepAction::FinalAnswer { text: text.clone() },
                        tool_output: None,
                        tool_success: None,
                        tool_duration_ms: None,
                        wall_time_ms: elapsed_ms(iteration_started),
                    });
                    let _ = sink
                        .emit(Chunk::Final {
                            content: text.clone(),
                        })
                        .await;
                    info!(
                        execution = %state.execution_id,
                        iterations = iteration + 1,
                        "execution completed"
                    );
                    return Ok(state.finish(
                        agent,
                        ExecutionStatus::Completed,
                        text,
                        iteration + 1,
                    ));
                }
                ReplyAction::Tool { name, input } => {
                    state.conversation.push(Message::assistant(&outcome.content));
                    let known =
                        agent.tools.iter().any(|t| t == &name) && self.registry.contains(&name);
                    if known {
                        let step = ToolStep {
                            iteration,
                            started: iteration_started,
                            thought: reply.thought,
                            tool: name,
                            input,
                        };
                        if self
                            .tool_step(agent, &mut state, &mut sink, step, deadline)
                            .await
                            .is_err()
                        {
                            return Ok(state.finish(
                                agent,
                                ExecutionStatus::Cancelled,
                                String::new(),
                                iteration,
                            ));
                        }
                    } else {
                        // The iteration is still charged; the model learns
                        // from the observation and may recover.
                        let observation = format!("unknown tool: {name}");
                        debug!(execution = %state.execution_id, tool = %name, "unknown tool requested");
                        state.steps.push(ExecutionStep {
                            index: iteration,
                            thought: reply.thought,
                            action: StepAction::ToolCall {
                                tool: name,
                                raw_input: input,
                            },
                            tool_output: Some(observation.clone()),
                            tool_success: Some(false),
                            tool_duration_ms: Some(0),
                            wall_time_ms: elapsed_ms(iteration_started),
                        });
                        state
                            .conversation
                            .push(Message::tool(format!("{OBSERVATION_PREFIX}{observation}")));
                        state.last_observation = Some(observation);
                    }
                }
            }
            iteration += 1;
        }
    }

    /// Resolve the agent's enabled tool set against the registry.
    ///
    /// Missing tools are reported, not silently dropped.
    fn resolve_agent_tools(&self, agent: &AgentDefinition) -> Result<Vec<ToolDescriptor>> {
        let mut descriptors = Vec::with_capacity(agent.tools.len());
        let mut missing = Vec::new();
        for name in &agent.tools {
            match self.registry.resolve(name) {
                Ok((descriptor, _)) => descriptors.push(descriptor),
                Err(_) => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(descriptors)
        } else {
            Err(CoreError::validation(format!(
                "agent '{}' enables unregistered tools: {}",
                agent.id,
                missing.join(", ")
            )))
        }
    }

    /// Build the per-iteration message sequence and pass it through the
    /// context manager.
    async fn assemble_prompt(
        &self,
        agent: &AgentDefinition,
        system_content: &str,
        conversation: &[Message],
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 2);
        messages.push(Message::system(system_content));
        messages.extend_from_slice(conversation);
        messages.push(Message::assistant("THOUGHT:"));
        self.context.process(&agent.model, messages).await
    }

    /// Execute one tool call step: emit chunks, invoke, record, observe.
    ///
    /// Returns `Err` only when the stream consumer has gone away.
    async fn tool_step(
        &self,
        agent: &AgentDefinition,
        state: &mut RunState,
        sink: &mut ChunkSink,
        step: ToolStep,
        deadline: Instant,
    ) -> std::result::Result<(), StreamClosed> {
        sink.emit(Chunk::ToolCall {
            tool: step.tool.clone(),
            input: step.input.clone(),
        })
        .await?;

        let ctx = InvocationCtx {
            deadline,
            per_call_timeout: None,
            collection: agent.knowledge_collection.clone(),
        };
        let outcome = match self.registry.invoke(&step.tool, &step.input, &ctx).await {
            Ok(outcome) => outcome,
            // resolve() succeeded moments ago and registration is permanent,
            // so this arm is unreachable in practice.
            Err(err) => crate::tool::ToolOutcome {
                output: err.to_string(),
                success: false,
                duration: Duration::ZERO,
            },
        };
        debug!(
            tool = %step.tool,
            success = outcome.success,
            "tool invoked"
        );

        sink.emit(Chunk::ToolResult {
            tool: step.tool.clone(),
            output: outcome.output.clone(),
            success: outcome.success,
        })
        .await?;

        state.steps.push(ExecutionStep {
            index: step.iteration,
            thought: step.thought,
            action: StepAction::ToolCall {
                tool: step.tool,
                raw_input: step.input,
            },
            tool_output: Some(outcome.output.clone()),
            tool_success: Some(outcome.success),
            tool_duration_ms: Some(u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX)),
            wall_time_ms: elapsed_ms(step.started),
        });
        state
            .conversation
            .push(Message::tool(format!("{OBSERVATION_PREFIX}{}", outcome.output)));
        state.last_observation = Some(outcome.output);
        Ok(())
    }

    /// One extra model call after the iteration cap, directing the model to
    /// answer now. Does not count toward `max_iterations`.
    #[allow(clippy::too_many_arguments)]
    async fn courtesy_final(
        &self,
        agent: &AgentDefinition,
        system_content: &str,
        sampling: &SamplingOptions,
        deadline: Instant,
        sink: &mut ChunkSink,
        mut state: RunState,
        iterations: u32,
    ) -> ExecutionRecord {
        debug!(execution = %state.execution_id, "iteration cap reached, requesting final answer");
        let mut prompt = self
            .assemble_prompt(agent, system_content, &state.conversation)
            .await;
        // Swap the trailing scaffold for the directive plus a fresh scaffold.
        prompt.pop();
        prompt.push(Message::system(FINAL_ANSWER_DIRECTIVE));
        prompt.push(Message::assistant("THOUGHT:"));

        let courtesy_started = Instant::now();
        let response = match tokio::time::timeout_at(
            deadline,
            self.chat.chat(&agent.model, &prompt, sampling),
        )
        .await
        {
            Ok(Ok(outcome)) => {
                state.usage += outcome
                    .usage
                    .unwrap_or_else(|| estimated_usage(&prompt, &outcome.content));
                match parse_reply(&outcome.content).action {
                    ReplyAction::Final { text } => text,
                    ReplyAction::Tool { .. } => outcome.content.trim().to_string(),
                }
            }
            Ok(Err(err)) => {
                warn!(execution = %state.execution_id, error = %err, "courtesy final call failed");
                state.last_observation.clone().unwrap_or_default()
            }
            Err(_) => state.last_observation.clone().unwrap_or_default(),
        };

        state.steps.push(ExecutionStep {
            index: iterations,
            thought: String::new(),
            action: StepAction::FinalAnswer {
                text: response.clone(),
            },
            tool_output: None,
            tool_success: None,
            tool_duration_ms: None,
            wall_time_ms: elapsed_ms(courtesy_started),
        });
        let _ = sink
            .emit(Chunk::Final {
                content: response.clone(),
            })
            .await;
        info!(execution = %state.execution_id, iterations, "iteration cap reached");
        state.finish(agent, ExecutionStatus::MaxIterationsReached, response, iterations)
    }
}

/// Arguments of one tool step, bundled to keep call sites readable.
struct ToolStep {
    iteration: u32,
    started: Instant,
    thought: String,
    tool: String,
    input: String,
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn estimated_usage(prompt: &[Message], reply: &str) -> TokenUsage {
    TokenUsage::new(
        u32::try_from(estimate_total(prompt)).unwrap_or(u32::MAX),
        u32::try_from(estimate_tokens(reply)).unwrap_or(u32::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::{FailingChat, MockChat};
    use crate::context::ContextManager;
    use crate::stream;
    use crate::tool::builtin::{ToolEndpoints, register_defaults};
    use futures::StreamExt;

    fn runner(chat: impl ChatCapability + 'static) -> Runner {
        let registry = Arc::new(ToolRegistry::new());
        register_defaults(&registry, &ToolEndpoints::default(), None).unwrap();
        Runner::new(
            Arc::new(chat),
            registry,
            Arc::new(ContextManager::with_defaults()),
        )
    }

    fn agent() -> AgentDefinition {
        let mut def = AgentDefinition::new("tester", "default-chat")
            .with_system_prompt("You are a test agent.")
            .with_tools(["calculator", "current_time"]);
        def.id = "agent-under-test".into();
        def
    }

    async fn run_collect(
        runner: &Runner,
        agent: &AgentDefinition,
        message: &str,
    ) -> (ExecutionRecord, Vec<Chunk>) {
        let (sink, stream) = stream::channel(64);
        let cancel = CancelHandle::new();
        let (record, chunks) = tokio::join!(
            runner.run(agent, message, sink, &cancel, None),
            stream.map(|envelope| envelope.chunk).collect::<Vec<_>>()
        );
        (record.unwrap(), chunks)
    }

    #[tokio::test]
    async fn tool_call_then_final_answer() {
        let runner = runner(MockChat::scripted([
            "THOUGHT: compute first\nACTION: calculator\nACTION_INPUT: 250 * 0.15 + 100",
            "THOUGHT: done\nACTION: FINAL_ANSWER\nACTION_INPUT: The result is 137.5",
        ]));
        let (record, chunks) = run_collect(&runner, &agent(), "compute 15% of 250 plus 100").await;

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.iterations, 2);
        assert!(record.response.contains("137.5"));
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps[0].thought, "compute first");
        assert!(record.usage.total() > 0);

        let finals: Vec<_> = chunks.iter().filter(|c| c.is_final()).collect();
        assert_eq!(finals.len(), 1);
        assert!(chunks.last().unwrap().is_final());
        assert!(chunks.iter().any(|c| matches!(
            c,
            Chunk::ToolResult { success: true, output, .. } if output == "137.5"
        )));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_observation_and_loop_recovers() {
        let runner = runner(MockChat::scripted([
            "THOUGHT: try something\nACTION: bogus\nACTION_INPUT: x",
            "THOUGHT: ok\nACTION: FINAL_ANSWER\nACTION_INPUT: recovered",
        ]));
        let (record, _) = run_collect(&runner, &agent(), "do the thing").await;

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.response, "recovered");
        let first = &record.steps[0];
        assert_eq!(first.tool_output.as_deref(), Some("unknown tool: bogus"));
        assert_eq!(first.tool_success, Some(false));
    }

    #[tokio::test]
    async fn plain_reply_is_an_implicit_final_answer() {
        let runner = runner(MockChat::scripted(["Paris is the capital of France."]));
        let (record, chunks) = run_collect(&runner, &agent(), "capital of France?").await;
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.response, "Paris is the capital of France.");
        assert_eq!(record.iterations, 1);
        assert_eq!(chunks.iter().filter(|c| c.is_final()).count(), 1);
    }

    #[tokio::test]
    async fn iteration_cap_triggers_courtesy_final() {
        let runner = runner(MockChat::scripted([
            "THOUGHT: loop\nACTION: calculator\nACTION_INPUT: 1+1",
        ]));
        let def = agent().with_max_iterations(2);
        let (record, chunks) = run_collect(&runner, &def, "keep adding").await;

        assert_eq!(record.status, ExecutionStatus::MaxIterationsReached);
        assert_eq!(record.iterations, 2);
        assert!(record.steps.len() <= 3); // two tool steps + courtesy
        assert!(!record.response.is_empty());
        assert_eq!(
            chunks
                .iter()
                .filter(|c| matches!(c, Chunk::ToolCall { .. }))
                .count(),
            2
        );
        assert!(chunks.last().unwrap().is_final());
    }

    #[tokio::test]
    async fn model_failure_ends_with_failed_status() {
        let runner = runner(FailingChat);
        let (record, chunks) = run_collect(&runner, &agent(), "anything").await;
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.response.is_empty());
        assert_eq!(chunks.iter().filter(|c| c.is_final()).count(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_up_front() {
        let runner = runner(MockChat::scripted(["x"]));
        let (sink, _stream) = stream::channel(8);
        let err = runner
            .run(&agent(), "   ", sink, &CancelHandle::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn unregistered_enabled_tool_is_reported() {
        let runner = runner(MockChat::scripted(["x"]));
        let def = agent().with_tools(["calculator", "not_registered"]);
        let (sink, _stream) = stream::channel(8);
        let err = runner
            .run(&def, "hi", sink, &CancelHandle::new(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not_registered"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_before_any_chunk() {
        let runner = runner(MockChat::scripted([
            "THOUGHT: loop\nACTION: calculator\nACTION_INPUT: 1+1",
        ]));
        let (sink, stream) = stream::channel(64);
        let cancel = CancelHandle::new();
        cancel.cancel();
        let record = runner
            .run(&agent(), "hi", sink, &cancel, None)
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
        let chunks: Vec<_> = stream.collect().await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn dropped_stream_cancels_the_execution() {
        let runner = runner(MockChat::scripted([
            "THOUGHT: loop\nACTION: calculator\nACTION_INPUT: 1+1",
        ]));
        let (sink, stream) = stream::channel(64);
        drop(stream);
        let record = runner
            .run(&agent(), "hi", sink, &CancelHandle::new(), None)
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn caller_timeout_tightens_the_agent_deadline() {
        let runner = runner(
            MockChat::scripted(["THOUGHT: slow\nACTION: FINAL_ANSWER\nACTION_INPUT: done"])
                .with_delay(Duration::from_millis(300)),
        );
        let (sink, stream) = stream::channel(64);
        let started = Instant::now();
        let agent_def = agent();
        let cancel = CancelHandle::new();
        let (record, chunks) = tokio::join!(
            runner.run(
                &agent_def,
                "hi",
                sink,
                &cancel,
                Some(Duration::from_millis(50)),
            ),
            stream.map(|e| e.chunk).collect::<Vec<_>>()
        );
        let record = record.unwrap();
        assert_eq!(record.status, ExecutionStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(chunks.iter().filter(|c| c.is_final()).count(), 1);
    }

    #[tokio::test]
    async fn steps_never_exceed_cap_plus_courtesy() {
        let runner = runner(MockChat::scripted([
            "THOUGHT: loop\nACTION: calculator\nACTION_INPUT: 2*3",
        ]));
        for cap in [1, 3] {
            let def = agent().with_max_iterations(cap);
            let (record, _) = run_collect(&runner, &def, "go").await;
            assert!(record.steps.len() as u32 <= cap + 1);
        }
    }

    #[tokio::test]
    async fn reported_usage_is_summed_instead_of_estimated() {
        let runner = runner(
            MockChat::scripted([
                "THOUGHT: a\nACTION: calculator\nACTION_INPUT: 1+1",
                "ACTION: FINAL_ANSWER\nACTION_INPUT: 2",
            ])
            .with_usage(TokenUsage::new(10, 5)),
        );
        let (record, _) = run_collect(&runner, &agent(), "add").await;
        assert_eq!(record.usage, TokenUsage::new(20, 10));
    }
}
