//! The process-wide tool registry.
//!
//! Read-mostly after start-up: registration takes the write lock, lookups
//! take the read lock and clone the invoker handle out, so invocations never
//! hold the lock. The registry reports failures; it never retries.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ParamType, SharedInvoker, ToolDescriptor, ToolInvoker};
use crate::error::{CoreError, Result};

/// Context inherited by every tool invocation.
#[derive(Debug, Clone)]
pub struct InvocationCtx {
    /// Absolute deadline of the owning execution.
    pub deadline: Instant,
    /// Optional per-invocation budget, applied on top of (and never beyond)
    /// the execution deadline.
    pub per_call_timeout: Option<Duration>,
    /// Knowledge collection of the executing agent, consumed by the search
    /// tool.
    pub collection: Option<String>,
}

impl InvocationCtx {
    /// Context bounded only by the execution deadline.
    #[must_use]
    pub const fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            per_call_timeout: None,
            collection: None,
        }
    }

    /// The instant this invocation must finish by: the execution deadline,
    /// tightened by the per-call budget when one is set.
    #[must_use]
    pub fn effective_deadline(&self) -> Instant {
        match self.per_call_timeout {
            Some(budget) => self.deadline.min(Instant::now() + budget),
            None => self.deadline,
        }
    }
}

/// What a tool invocation produced.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Observation text (the failure description when `success` is false).
    pub output: String,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Wall time spent inside the invocation.
    pub duration: Duration,
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    invoker: SharedInvoker,
}

#[derive(Default)]
struct RegistryInner {
    // Insertion order is the listing order, stable for the process lifetime.
    entries: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

/// Central mapping from tool name to executable capability.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("ToolRegistry")
            .field("tools", &inner.entries.len())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a tool.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateName`] when the name is taken, or a validation
    /// error when the schema declares a required parameter after an optional
    /// one.
    pub fn register(
        &self,
        descriptor: ToolDescriptor,
        invoker: impl ToolInvoker + 'static,
    ) -> Result<()> {
        descriptor.check_param_order()?;
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.index.contains_key(&descriptor.name) {
            return Err(CoreError::DuplicateName(descriptor.name));
        }
        debug!(tool = %descriptor.name, "registered tool");
        let slot = inner.entries.len();
        inner.index.insert(descriptor.name.clone(), slot);
        inner.entries.push(RegisteredTool {
            descriptor,
            invoker: std::sync::Arc::new(invoker),
        });
        Ok(())
    }

    /// All descriptors in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.read()
            .entries
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().index.contains_key(name)
    }

    /// Look up a tool by name.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] when the name does not resolve.
    pub fn resolve(&self, name: &str) -> Result<(ToolDescriptor, SharedInvoker)> {
        let inner = self.read();
        let idx = *inner
            .index
            .get(name)
            .ok_or_else(|| CoreError::not_found("tool", name))?;
        let entry = &inner.entries[idx];
        Ok((entry.descriptor.clone(), SharedInvoker::clone(&entry.invoker)))
    }

    /// Invoke a tool with the raw `ACTION_INPUT` text.
    ///
    /// Parse failures, invoker errors, panics, and per-call timeouts are all
    /// folded into a failed [`ToolOutcome`] so a misbehaving tool can never
    /// end an execution.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] only, when the name does not resolve.
    pub async fn invoke(&self, name: &str, raw_input: &str, ctx: &InvocationCtx) -> Result<ToolOutcome> {
        let (descriptor, invoker) = self.resolve(name)?;
        let started = Instant::now();

        if !descriptor.enabled {
            return Ok(ToolOutcome {
                output: format!("tool '{name}' is disabled"),
                success: false,
                duration: started.elapsed(),
            });
        }

        let args = match parse_raw_input(&descriptor, raw_input) {
            Ok(args) => args,
            Err(err) => {
                let failure = CoreError::bad_arguments(name, err);
                debug!(tool = name, error = %failure, "argument parse failed");
                return Ok(ToolOutcome {
                    output: failure.to_string(),
                    success: false,
                    duration: started.elapsed(),
                });
            }
        };

        let outcome = self
            .dispatch(name, invoker, args, ctx)
            .await;
        Ok(ToolOutcome {
            duration: started.elapsed(),
            ..outcome
        })
    }

    /// Run the invoker on its own task so a panic is contained, bounded by
    /// the effective deadline.
    async fn dispatch(
        &self,
        name: &str,
        invoker: SharedInvoker,
        args: Value,
        ctx: &InvocationCtx,
    ) -> ToolOutcome {
        let deadline = ctx.effective_deadline();
        let call_ctx = ctx.clone();
        let tool = name.to_string();
        let handle = tokio::spawn(async move { invoker.invoke(args, &call_ctx).await });

        let joined = tokio::time::timeout_at(deadline, handle).await;
        match joined {
            Err(_) => {
                warn!(tool = name, "tool invocation hit its deadline");
                ToolOutcome {
                    output: format!("tool '{name}' timed out"),
                    success: false,
                    duration: Duration::ZERO,
                }
            }
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    "panicked"
                } else {
                    "was aborted"
                };
                let failure = CoreError::tool_internal(&tool, format!("invoker {reason}"));
                warn!(tool = name, error = %failure, "tool invoker failed");
                ToolOutcome {
                    output: failure.to_string(),
                    success: false,
                    duration: Duration::ZERO,
                }
            }
            Ok(Ok(Err(err))) => ToolOutcome {
                output: err.to_string(),
                success: false,
                duration: Duration::ZERO,
            },
            Ok(Ok(Ok(output))) => ToolOutcome {
                output,
                success: true,
                duration: Duration::ZERO,
            },
        }
    }
}

/// Parse the raw model-provided input against a descriptor's schema.
///
/// Attempts, first success wins: a JSON object keyed by parameter names; the
/// bare trimmed text when the schema declares a single string parameter; a
/// decimal parse when it declares a single numeric parameter.
fn parse_raw_input(descriptor: &ToolDescriptor, raw: &str) -> std::result::Result<Value, String> {
    let trimmed = raw.trim();

    // First success wins; a JSON object that fails schema validation still
    // falls through to the bare-value attempts.
    let mut object_err = None;
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) {
        match validate_object(descriptor, object) {
            Ok(args) => return Ok(args),
            Err(err) => object_err = Some(err),
        }
    }

    if let Some(param) = descriptor.sole_param_of(ParamType::String) {
        let mut object = Map::new();
        object.insert(param.name.clone(), Value::String(trimmed.to_string()));
        return Ok(Value::Object(object));
    }

    if let Some(param) = descriptor.sole_param_of(ParamType::Number) {
        let number: f64 = trimmed
            .parse()
            .map_err(|_| format!("expected a decimal number, got '{trimmed}'"))?;
        let mut object = Map::new();
        object.insert(
            param.name.clone(),
            serde_json::Number::from_f64(number)
                .map(Value::Number)
                .ok_or_else(|| format!("'{trimmed}' is not a finite number"))?,
        );
        return Ok(Value::Object(object));
    }

    // Zero-parameter tools ignore whatever the model put after the marker.
    if descriptor.params.is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    Err(object_err.unwrap_or_else(|| {
        format!("input does not match the schema of '{}'", descriptor.name)
    }))
}

fn validate_object(
    descriptor: &ToolDescriptor,
    object: Map<String, Value>,
) -> std::result::Result<Value, String> {
    for param in &descriptor.params {
        match object.get(&param.name) {
            Some(value) => {
                if !param.ty.matches(value) {
                    return Err(format!(
                        "parameter '{}' must be of type {}",
                        param.name,
                        param.ty.as_str()
                    ));
                }
            }
            None if param.required => {
                return Err(format!("missing required parameter '{}'", param.name));
            }
            None => {}
        }
    }
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ToolInvoker for Echo {
        async fn invoke(&self, args: Value, _ctx: &InvocationCtx) -> Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct Panicking;

    #[async_trait]
    impl ToolInvoker for Panicking {
        async fn invoke(&self, _args: Value, _ctx: &InvocationCtx) -> Result<String> {
            panic!("boom");
        }
    }

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor::builtin("echo", "Echo the input").param("text", ParamType::String)
    }

    fn far_deadline() -> InvocationCtx {
        InvocationCtx::new(Instant::now() + Duration::from_secs(60))
    }

    #[test]
    fn duplicate_registration_fails_deterministically() {
        let registry = ToolRegistry::new();
        registry.register(echo_descriptor(), Echo).unwrap();
        let second = registry.register(echo_descriptor(), Echo);
        assert!(matches!(second, Err(CoreError::DuplicateName(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn listing_preserves_insertion_order() {
        let registry = ToolRegistry::new();
        registry.register(echo_descriptor(), Echo).unwrap();
        registry
            .register(ToolDescriptor::builtin("zzz", "later"), Echo)
            .unwrap();
        registry
            .register(ToolDescriptor::builtin("aaa", "last"), Echo)
            .unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["echo", "zzz", "aaa"]);
        assert_eq!(names, registry.list().into_iter().map(|d| d.name).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn invoke_parses_json_object_input() {
        let registry = ToolRegistry::new();
        registry.register(echo_descriptor(), Echo).unwrap();
        let outcome = registry
            .invoke("echo", r#"{"text": "hello"}"#, &far_deadline())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "hello");
    }

    #[tokio::test]
    async fn invoke_accepts_bare_string_for_single_string_param() {
        let registry = ToolRegistry::new();
        registry.register(echo_descriptor(), Echo).unwrap();
        let outcome = registry
            .invoke("echo", "  plain text  ", &far_deadline())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "plain text");
    }

    #[tokio::test]
    async fn bad_arguments_become_failed_outcome() {
        struct Typed;
        #[async_trait]
        impl ToolInvoker for Typed {
            async fn invoke(&self, _args: Value, _ctx: &InvocationCtx) -> Result<String> {
                Ok("unreachable".into())
            }
        }
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor::builtin("pair", "needs two params")
                    .param("a", ParamType::String)
                    .param("b", ParamType::Number),
                Typed,
            )
            .unwrap();

        let outcome = registry
            .invoke("pair", "just text", &far_deadline())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.contains("bad arguments"));

        let missing = registry
            .invoke("pair", r#"{"a": "x"}"#, &far_deadline())
            .await
            .unwrap();
        assert!(!missing.success);
        assert!(missing.output.contains("missing required parameter 'b'"));
    }

    #[tokio::test]
    async fn panic_is_contained_as_internal_error() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::builtin("bomb", "panics"), Panicking)
            .unwrap();
        let outcome = registry.invoke("bomb", "", &far_deadline()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.contains("panicked"));
    }

    #[tokio::test]
    async fn per_call_timeout_tightens_the_deadline() {
        struct Slow;
        #[async_trait]
        impl ToolInvoker for Slow {
            async fn invoke(&self, _args: Value, _ctx: &InvocationCtx) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".into())
            }
        }
        let registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::builtin("slow", "sleeps"), Slow)
            .unwrap();
        let ctx = InvocationCtx {
            per_call_timeout: Some(Duration::from_millis(20)),
            ..far_deadline()
        };
        let outcome = registry.invoke("slow", "", &ctx).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("bogus", "", &far_deadline()).await;
        assert!(matches!(err, Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn number_parse_for_single_numeric_param() {
        let descriptor =
            ToolDescriptor::builtin("sqrt", "square root").param("value", ParamType::Number);
        let parsed = parse_raw_input(&descriptor, "42.5").unwrap();
        assert_eq!(parsed["value"], serde_json::json!(42.5));
        assert!(parse_raw_input(&descriptor, "not a number").is_err());
    }
}
