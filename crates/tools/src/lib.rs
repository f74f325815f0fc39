//! Tool registry and trait definitions.
//!
//! A tool declares a name, a description, and a JSON Schema for its
//! parameters, and executes against the raw argument string the model
//! produced. Tools that must bind to a user are registered as factories.

pub mod builtin;
pub mod registry;

pub use registry::{ToolFactory, ToolRegistry};

use av_domain::error::Result;
use av_domain::message::ToolDescriptor;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Category
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Memo,
    Schedule,
    Search,
    Ai,
    System,
    Custom,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Memo => "memo",
            ToolCategory::Schedule => "schedule",
            ToolCategory::Search => "search",
            ToolCategory::Ai => "ai",
            ToolCategory::System => "system",
            ToolCategory::Custom => "custom",
        }
    }

    pub fn all() -> [ToolCategory; 6] {
        [
            ToolCategory::Memo,
            ToolCategory::Schedule,
            ToolCategory::Search,
            ToolCategory::Ai,
            ToolCategory::System,
            ToolCategory::Custom,
        ]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Request-scoped context handed to every tool invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolContext {
    pub user_id: i64,
    pub conversation_id: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The tool contract: `run` receives the exact JSON string the model
/// produced and is responsible for parsing and validating it.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "memo_search").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    fn category(&self) -> ToolCategory {
        ToolCategory::Custom
    }

    fn tags(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Execute the tool. Errors are captured by the agent loop as
    /// `"Error: …"` results and fed back to the model.
    async fn run(&self, ctx: &ToolContext, input_json: &str) -> Result<String>;

    /// Convert to the descriptor passed to the LLM for function calling.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }
}
