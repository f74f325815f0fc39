//! System tools.

use av_domain::error::Result;

use crate::{Tool, ToolCategory, ToolContext};

/// Reports the current date and time. Shared across users.
pub struct CurrentTimeTool;

#[async_trait::async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }
    fn description(&self) -> &str {
        "Get the current date and time"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::System
    }
    fn tags(&self) -> Vec<&str> {
        vec!["system", "read"]
    }

    async fn run(&self, _ctx: &ToolContext, _input_json: &str) -> Result<String> {
        Ok(chrono::Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string())
    }
}
