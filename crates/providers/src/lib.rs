//! LLM abstraction: provider trait, the OpenAI-compatible HTTP adapter,
//! text-embedded tool-call parsing, and the role-keyed provider registry.

pub mod embed;
pub mod openai_compat;
pub mod registry;
pub mod scripted;
pub mod textcalls;
pub mod traits;

pub use registry::ProviderRegistry;
pub use traits::{ChatOutcome, ChatProvider, Usage};
