//! Tool descriptors, the process-wide registry, and built-in tools.
//!
//! A tool is an externally-callable capability the model can name in an
//! `ACTION:` line. Descriptors carry an ordered, tagged-variant parameter
//! schema; the registry owns parsing the model's free-form `ACTION_INPUT`
//! into a structured argument object before the invoker runs.

pub mod builtin;
mod registry;

pub use registry::{InvocationCtx, ToolOutcome, ToolRegistry};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// The type of a single tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamType {
    /// Free text.
    String,
    /// Decimal number.
    Number,
    /// True/false.
    Boolean,
    /// Arbitrary JSON object.
    JsonObject,
}

impl ParamType {
    /// String form used in prompts and listings.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::JsonObject => "object",
        }
    }

    /// Whether `value` inhabits this type.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => matches!(value, Value::String(_)),
            Self::Number => matches!(value, Value::Number(_)),
            Self::Boolean => matches!(value, Value::Bool(_)),
            Self::JsonObject => matches!(value, Value::Object(_)),
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name, unique within the tool.
    pub name: String,
    /// Parameter type.
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Whether the parameter must be present.
    pub required: bool,
}

/// Where a tool's implementation lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSource {
    /// Resolved by an in-process function value.
    Builtin,
    /// Resolved by an outbound RPC to a sibling service.
    Service {
        /// Base URL of the backing service.
        endpoint: String,
    },
    /// Resolved by spawning a described command. Reserved; descriptors may
    /// carry it but no built-in registers one.
    Subprocess {
        /// The command to run.
        command: String,
        /// Its arguments.
        args: Vec<String>,
    },
}

/// Description of a registered tool, shown to the model and to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique, case-sensitive name.
    pub name: String,
    /// Human description included in the prompt.
    pub description: String,
    /// Ordered parameter schema.
    pub params: Vec<ParamSpec>,
    /// Implementation source.
    pub source: ToolSource,
    /// Advisory flag; reported but not enforced by the core.
    pub requires_confirmation: bool,
    /// Whether the tool may be invoked.
    pub enabled: bool,
}

impl ToolDescriptor {
    /// Create a descriptor for an in-process tool.
    #[must_use]
    pub fn builtin(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            source: ToolSource::Builtin,
            requires_confirmation: false,
            enabled: true,
        }
    }

    /// Create a descriptor for a service-backed tool.
    #[must_use]
    pub fn service(
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            source: ToolSource::Service {
                endpoint: endpoint.into(),
            },
            ..Self::builtin(name, description)
        }
    }

    /// Append a required parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            required: true,
        });
        self
    }

    /// Append an optional parameter.
    #[must_use]
    pub fn optional_param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            required: false,
        });
        self
    }

    /// Mark the tool as requiring caller confirmation.
    #[must_use]
    pub const fn with_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// The single parameter of the given type, if the schema declares
    /// exactly one parameter and it has that type.
    #[must_use]
    pub fn sole_param_of(&self, ty: ParamType) -> Option<&ParamSpec> {
        match self.params.as_slice() {
            [only] if only.ty == ty => Some(only),
            _ => None,
        }
    }

    /// Check the ordering rule: no required parameter may follow an
    /// optional one.
    pub(crate) fn check_param_order(&self) -> Result<()> {
        let mut saw_optional = false;
        for param in &self.params {
            if !param.required && !saw_optional {
                saw_optional = true;
            } else if param.required && saw_optional {
                return Err(crate::error::CoreError::validation(format!(
                    "tool '{}': required parameter '{}' declared after an optional one",
                    self.name, param.name
                )));
            }
        }
        Ok(())
    }
}

/// An executable tool implementation.
///
/// Invokers receive the argument object the registry parsed and the
/// invocation context; they return the observation text. Errors become
/// failed observations, never panics out of the registry.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run the tool.
    ///
    /// # Errors
    ///
    /// Any error is rendered into the observation; it does not end the
    /// execution.
    async fn invoke(&self, args: Value, ctx: &InvocationCtx) -> Result<String>;
}

/// Shared handle to an invoker, cloned out of the registry so invocations
/// run without holding the registry lock.
pub type SharedInvoker = Arc<dyn ToolInvoker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_order_rule_rejects_required_after_optional() {
        let bad = ToolDescriptor::builtin("t", "d")
            .param("a", ParamType::String)
            .optional_param("b", ParamType::Number)
            .param("c", ParamType::Boolean);
        assert!(bad.check_param_order().is_err());

        let good = ToolDescriptor::builtin("t", "d")
            .param("a", ParamType::String)
            .optional_param("b", ParamType::Number)
            .optional_param("c", ParamType::Boolean);
        assert!(good.check_param_order().is_ok());
    }

    #[test]
    fn sole_param_detection() {
        let single = ToolDescriptor::builtin("t", "d").param("expression", ParamType::String);
        assert!(single.sole_param_of(ParamType::String).is_some());
        assert!(single.sole_param_of(ParamType::Number).is_none());

        let two = ToolDescriptor::builtin("t", "d")
            .param("a", ParamType::String)
            .optional_param("b", ParamType::String);
        assert!(two.sole_param_of(ParamType::String).is_none());
    }

    #[test]
    fn param_type_matching() {
        assert!(ParamType::Number.matches(&serde_json::json!(3.5)));
        assert!(!ParamType::Number.matches(&serde_json::json!("3.5")));
        assert!(ParamType::JsonObject.matches(&serde_json::json!({"k": 1})));
    }

    #[test]
    fn source_serializes_tagged() {
        let source = ToolSource::Service {
            endpoint: "http://127.0.0.1:8092".into(),
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["kind"], "service");
    }
}
