//! Renkei is the agent-execution core of a local, single-host AI platform:
//! a reason-act control loop that drives a language model through multi-step
//! tasks, invokes registered tools on its behalf, enforces per-step and
//! global resource limits, and streams typed execution chunks to callers.
//!
//! # Architecture
//!
//! Leaves first: the [`tool`] registry and [`context`] manager feed the
//! [`catalog`] and [`runner`]; the [`orchestrator`] schedules multi-task
//! plans over the runner; [`stream`] carries execution state out; and
//! [`service`] is the transport-agnostic request/response surface. Model
//! inference, embeddings, and summarization are consumed through the
//! [`capability`] traits, with concrete bindings injected at process start.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = Arc::new(ToolRegistry::new());
//! builtin::register_defaults(&registry, &endpoints, None)?;
//! let catalog = Arc::new(AgentCatalog::open("data/agents.json"));
//! let runner = Arc::new(Runner::new(chat, registry.clone(), context));
//!
//! let (sink, mut chunks) = stream::channel(32);
//! let record = runner.run(&agent, "compute 15% of 250", sink, &cancel, None).await?;
//! ```

pub mod capability;
pub mod catalog;
pub mod context;
pub mod discovery;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod prompts;
pub mod runner;
pub mod service;
pub mod stream;
pub mod tool;

pub use capability::{ChatCapability, EmbeddingCapability, SummaryCapability, TokenUsage};
pub use catalog::{AgentCatalog, AgentDefinition, AgentSelector, SelectorConfig};
pub use context::{ContextConfig, ContextManager, ModelBudget};
pub use error::{CoreError, ErrorCode, ErrorEnvelope, Result};
pub use message::{Message, Role};
pub use orchestrator::{ExecutionMode, Orchestrator, Plan, PlanTask, TaskStatus};
pub use runner::{CancelHandle, ExecutionRecord, ExecutionStatus, Runner};
pub use service::{CoreService, ExecuteRequest, ExecutionHandle};
pub use stream::{Chunk, ChunkEnvelope, ChunkSink, ChunkStream};
pub use tool::{ParamType, ToolDescriptor, ToolRegistry, ToolSource};
