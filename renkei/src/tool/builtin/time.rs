//! In-process wall-clock tool.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::error::Result;
use crate::tool::{InvocationCtx, ToolDescriptor, ToolInvoker};

/// Reports the current UTC time. Takes no parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTimeTool;

impl CurrentTimeTool {
    /// Descriptor for registration.
    #[must_use]
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::builtin("current_time", "Get the current date and time in UTC")
    }
}

#[async_trait]
impl ToolInvoker for CurrentTimeTool {
    async fn invoke(&self, _args: Value, _ctx: &InvocationCtx) -> Result<String> {
        let now = Utc::now();
        Ok(format!(
            "{} (unix {})",
            now.format("%Y-%m-%d %H:%M:%S UTC"),
            now.timestamp()
        ))
    }
}
