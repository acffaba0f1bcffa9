//! In-process calculator tool.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::tool::{InvocationCtx, ParamType, ToolDescriptor, ToolInvoker};

/// Evaluates arithmetic and scientific expressions.
///
/// Backed by `evalexpr`; supports the usual operators plus `math::*`
/// functions and the constants `pi` and `e`. `**` is accepted as an alias
/// for `^` because models emit both.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    /// Descriptor for registration.
    #[must_use]
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::builtin(
            "calculator",
            "Evaluate a mathematical expression and return the numeric result",
        )
        .param("expression", ParamType::String)
    }

    fn evaluate(expression: &str) -> Result<String> {
        use evalexpr::{ContextWithMutableVariables, HashMapContext, eval_with_context};

        let prepared = expression.replace("**", "^");
        let mut context = HashMapContext::new();
        context
            .set_value("pi".into(), evalexpr::Value::Float(std::f64::consts::PI))
            .and_then(|()| {
                context.set_value("e".into(), evalexpr::Value::Float(std::f64::consts::E))
            })
            .map_err(|e| CoreError::tool_internal("calculator", e.to_string()))?;

        let value = eval_with_context(&prepared, &context)
            .map_err(|e| CoreError::bad_arguments("calculator", e.to_string()))?;
        Ok(render(&value))
    }
}

fn render(value: &evalexpr::Value) -> String {
    match value {
        evalexpr::Value::Float(f) => {
            // "2.0" reads better as "2" in an observation.
            if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{f}")
            }
        }
        other => format!("{other}"),
    }
}

#[async_trait]
impl ToolInvoker for CalculatorTool {
    async fn invoke(&self, args: Value, _ctx: &InvocationCtx) -> Result<String> {
        let expression = args["expression"].as_str().unwrap_or_default();
        if expression.trim().is_empty() {
            return Err(CoreError::bad_arguments("calculator", "empty expression"));
        }
        Self::evaluate(expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    fn ctx() -> InvocationCtx {
        InvocationCtx::new(Instant::now() + Duration::from_secs(5))
    }

    #[tokio::test]
    async fn evaluates_percent_of_style_arithmetic() {
        let out = CalculatorTool
            .invoke(serde_json::json!({"expression": "250 * 0.15 + 100"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, "137.5");
    }

    #[tokio::test]
    async fn integer_results_render_without_fraction() {
        let out = CalculatorTool
            .invoke(serde_json::json!({"expression": "2.0 + 2"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, "4");
    }

    #[tokio::test]
    async fn double_star_is_exponentiation() {
        let out = CalculatorTool
            .invoke(serde_json::json!({"expression": "2 ** 10"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, "1024");
    }

    #[tokio::test]
    async fn constants_are_bound() {
        let out = CalculatorTool
            .invoke(serde_json::json!({"expression": "pi > e && e > 2"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, "true");
    }

    #[tokio::test]
    async fn garbage_is_bad_arguments() {
        let err = CalculatorTool
            .invoke(serde_json::json!({"expression": "what is love"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolBadArguments { .. }));
    }
}
