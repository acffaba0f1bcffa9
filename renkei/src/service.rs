//! The management and execution surface.
//!
//! [`CoreService`] is the transport-agnostic facade: request/response
//! methods with opaque request ids, wire-shaped inputs, and the
//! `(code, message, details?)` error envelope. A gRPC or HTTP adapter maps
//! its framing onto these methods one-to-one.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

use crate::catalog::{AgentCatalog, AgentDefinition, AgentSelector};
use crate::error::ErrorEnvelope;
use crate::orchestrator::{ExecutionMode, Orchestrator, OrchestratorOutcome};
use crate::runner::{CancelHandle, ExecutionRecord, Runner};
use crate::stream::{ChunkStream, DEFAULT_STREAM_CAPACITY, channel};
use crate::tool::{ToolDescriptor, ToolRegistry};

/// An execution request on either surface.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecuteRequest {
    /// Opaque caller-supplied request id, carried into logs.
    pub request_id: String,
    /// Agent to run; empty or absent means "let the selector pick".
    #[serde(default)]
    pub agent_id: Option<String>,
    /// The user message.
    pub message: String,
    /// Optional caller deadline in seconds; the agent's own timeout still
    /// applies when shorter.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// A running streamed execution.
#[derive(Debug)]
pub struct ExecutionHandle {
    /// The ordered chunk stream.
    pub chunks: ChunkStream,
    /// Cancels the underlying execution.
    pub cancel: CancelHandle,
    /// Resolves to the final record once the stream has closed.
    pub outcome: JoinHandle<Result<ExecutionRecord, ErrorEnvelope>>,
}

/// The platform's agent-execution service.
pub struct CoreService {
    catalog: Arc<AgentCatalog>,
    registry: Arc<ToolRegistry>,
    selector: Arc<AgentSelector>,
    runner: Arc<Runner>,
    orchestrator: Arc<Orchestrator>,
    stream_capacity: usize,
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("stream_capacity", &self.stream_capacity)
            .finish_non_exhaustive()
    }
}

impl CoreService {
    /// Assemble the service from its injected components.
    #[must_use]
    pub fn new(
        catalog: Arc<AgentCatalog>,
        registry: Arc<ToolRegistry>,
        selector: Arc<AgentSelector>,
        runner: Arc<Runner>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            catalog,
            registry,
            selector,
            runner,
            orchestrator,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Override the per-execution stream capacity.
    #[must_use]
    pub const fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    // -- management surface -------------------------------------------------

    /// Create an agent definition.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR`, `DUPLICATE_ID`, or `CATALOG_PERSISTENCE_ERROR`.
    pub fn create_agent(
        &self,
        request_id: &str,
        definition: AgentDefinition,
    ) -> Result<AgentDefinition, ErrorEnvelope> {
        let _span = info_span!("create_agent", request_id).entered();
        self.catalog.create(definition).map_err(Into::into)
    }

    /// Replace an agent definition.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND`, `VALIDATION_ERROR`, or `CATALOG_PERSISTENCE_ERROR`.
    pub fn update_agent(
        &self,
        request_id: &str,
        id: &str,
        definition: AgentDefinition,
    ) -> Result<AgentDefinition, ErrorEnvelope> {
        let _span = info_span!("update_agent", request_id, agent = id).entered();
        self.catalog.update(id, definition).map_err(Into::into)
    }

    /// Delete an agent.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` or `CATALOG_PERSISTENCE_ERROR`.
    pub fn delete_agent(&self, request_id: &str, id: &str) -> Result<(), ErrorEnvelope> {
        let _span = info_span!("delete_agent", request_id, agent = id).entered();
        self.catalog.delete(id).map_err(Into::into)
    }

    /// Fetch one agent.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND`.
    pub fn get_agent(&self, request_id: &str, id: &str) -> Result<AgentDefinition, ErrorEnvelope> {
        let _span = info_span!("get_agent", request_id, agent = id).entered();
        self.catalog.get(id).map_err(Into::into)
    }

    /// List all agents.
    #[must_use]
    pub fn list_agents(&self, request_id: &str) -> Vec<AgentDefinition> {
        let _span = info_span!("list_agents", request_id).entered();
        self.catalog.list()
    }

    /// List all registered tools, source variants and flags included.
    #[must_use]
    pub fn list_tools(&self, request_id: &str) -> Vec<ToolDescriptor> {
        let _span = info_span!("list_tools", request_id).entered();
        self.registry.list()
    }

    // -- execution surface --------------------------------------------------

    /// Run an execution to completion and return its record.
    ///
    /// Equivalent to collecting [`CoreService::stream_execute`] and keeping
    /// the final state.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` or `NOT_FOUND` before the run starts; terminal
    /// statuses are reported inside the record, not as errors.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionRecord, ErrorEnvelope> {
        let span = info_span!("execute", request_id = %request.request_id);
        async {
            let agent = self.resolve_agent(&request).await?;
            let caller_timeout = request.timeout_seconds.map(Duration::from_secs);
            let (sink, stream) = channel(self.stream_capacity);
            let cancel = CancelHandle::new();
            let (record, ()) = tokio::join!(
                self.runner
                    .run(&agent, &request.message, sink, &cancel, caller_timeout),
                stream.for_each(|_| async {})
            );
            record.map_err(Into::into)
        }
        .instrument(span)
        .await
    }

    /// Start a streamed execution.
    ///
    /// Dropping the returned stream cancels the execution; the record is
    /// still produced and available through the handle.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` or `NOT_FOUND` before the run starts.
    pub async fn stream_execute(
        &self,
        request: ExecuteRequest,
    ) -> Result<ExecutionHandle, ErrorEnvelope> {
        let span = info_span!("stream_execute", request_id = %request.request_id);
        if request.message.trim().is_empty() {
            return Err(crate::error::CoreError::validation("message must not be empty").into());
        }
        let agent = self.resolve_agent(&request).instrument(span.clone()).await?;

        let caller_timeout = request.timeout_seconds.map(Duration::from_secs);
        let (sink, chunks) = channel(self.stream_capacity);
        let cancel = CancelHandle::new();
        let runner = Arc::clone(&self.runner);
        let task_cancel = cancel.clone();
        let message = request.message.clone();
        let outcome = tokio::spawn(
            async move {
                runner
                    .run(&agent, &message, sink, &task_cancel, caller_timeout)
                    .await
                    .map_err(Into::into)
            }
            .instrument(span),
        );
        Ok(ExecutionHandle {
            chunks,
            cancel,
            outcome,
        })
    }

    /// Decompose a prompt and run the resulting plan, collecting the
    /// combined response.
    ///
    /// # Errors
    ///
    /// `VALIDATION_ERROR` for an empty prompt.
    pub async fn orchestrate(
        &self,
        request_id: &str,
        prompt: &str,
        mode: ExecutionMode,
    ) -> Result<OrchestratorOutcome, ErrorEnvelope> {
        let span = info_span!("orchestrate", request_id);
        async {
            let (sink, stream) = channel(self.stream_capacity);
            let cancel = CancelHandle::new();
            let (outcome, ()) = tokio::join!(
                self.orchestrator.run(prompt, mode, sink, &cancel),
                stream.for_each(|_| async {})
            );
            outcome.map_err(Into::into)
        }
        .instrument(span)
        .await
    }

    /// Resolve the target agent: by id when given, by the selector
    /// otherwise.
    async fn resolve_agent(
        &self,
        request: &ExecuteRequest,
    ) -> Result<AgentDefinition, ErrorEnvelope> {
        match request.agent_id.as_deref() {
            Some(id) if !id.is_empty() => self.catalog.get(id).map_err(Into::into),
            _ => {
                let selection = self.selector.select_by_prompt(&request.message).await?;
                self.catalog.get(&selection.agent_id).map_err(Into::into)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::mock::{MockChat, MockEmbedder};
    use crate::catalog::SelectorConfig;
    use crate::context::ContextManager;
    use crate::error::ErrorCode;
    use crate::tool::builtin::{ToolEndpoints, register_defaults};

    struct Fixture {
        _dir: tempfile::TempDir,
        service: CoreService,
        agent_id: String,
    }

    fn fixture(replies: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(AgentCatalog::open(dir.path().join("agents.json")));
        let agent = catalog
            .create(
                AgentDefinition::new("helper", "default-chat")
                    .with_description("General helper")
                    .with_tools(["calculator"]),
            )
            .unwrap();

        let registry = Arc::new(ToolRegistry::new());
        register_defaults(&registry, &ToolEndpoints::default(), None).unwrap();
        let chat: Arc<dyn crate::capability::ChatCapability> =
            Arc::new(MockChat::scripted(replies.to_vec()));
        let runner = Arc::new(Runner::new(
            Arc::clone(&chat),
            Arc::clone(&registry),
            Arc::new(ContextManager::with_defaults()),
        ));
        let selector = Arc::new(AgentSelector::new(
            Arc::clone(&catalog),
            Some(Arc::new(MockEmbedder::new())),
            SelectorConfig {
                score_floor: 0.0,
                ..SelectorConfig::default()
            },
            "default-chat",
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            chat,
            Arc::clone(&selector),
            Arc::clone(&catalog),
            Arc::clone(&runner),
            "default-chat",
        ));
        Fixture {
            _dir: dir,
            service: CoreService::new(catalog, registry, selector, runner, orchestrator),
            agent_id: agent.id,
        }
    }

    fn request(fx: &Fixture, message: &str) -> ExecuteRequest {
        ExecuteRequest {
            request_id: "req-1".into(),
            agent_id: Some(fx.agent_id.clone()),
            message: message.into(),
            timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn execute_returns_the_record() {
        let fx = fixture(&["ACTION: FINAL_ANSWER\nACTION_INPUT: done"]);
        let record = fx.service.execute(request(&fx, "do it")).await.unwrap();
        assert_eq!(record.response, "done");
        assert_eq!(record.agent_id, fx.agent_id);
    }

    #[tokio::test]
    async fn execute_with_unknown_agent_is_not_found() {
        let fx = fixture(&["x"]);
        let mut req = request(&fx, "hi");
        req.agent_id = Some("nope".into());
        let err = fx.service.execute(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn empty_agent_id_goes_through_the_selector() {
        let fx = fixture(&["ACTION: FINAL_ANSWER\nACTION_INPUT: selected"]);
        let mut req = request(&fx, "anything at all");
        req.agent_id = None;
        let record = fx.service.execute(req).await.unwrap();
        assert_eq!(record.response, "selected");
    }

    #[tokio::test]
    async fn stream_execute_yields_chunks_and_record() {
        let fx = fixture(&["ACTION: FINAL_ANSWER\nACTION_INPUT: streamed"]);
        let handle = fx
            .service
            .stream_execute(request(&fx, "stream it"))
            .await
            .unwrap();
        let chunks: Vec<_> = handle.chunks.collect().await;
        assert!(chunks.last().unwrap().chunk.is_final());
        let record = handle.outcome.await.unwrap().unwrap();
        assert_eq!(record.response, "streamed");
    }

    #[tokio::test]
    async fn agent_crud_round_trip() {
        let fx = fixture(&["x"]);
        let created = fx
            .service
            .create_agent(
                "req-2",
                AgentDefinition::new("crud", "default-chat"),
            )
            .unwrap();
        let fetched = fx.service.get_agent("req-3", &created.id).unwrap();
        assert_eq!(fetched, created);

        fx.service.delete_agent("req-4", &created.id).unwrap();
        let err = fx.service.get_agent("req-5", &created.id).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn list_tools_reports_source_and_flags() {
        let fx = fixture(&["x"]);
        let tools = fx.service.list_tools("req-6");
        let calc = tools.iter().find(|t| t.name == "calculator").unwrap();
        assert_eq!(calc.source, crate::tool::ToolSource::Builtin);
        assert!(calc.enabled);
    }
}
