//! The aviary execution core: routing, parrot execution, memory, and the
//! service facade that ties routing, blocks, events, and persistence into
//! one deterministic request path.

pub mod memory;
pub mod parrot;
pub mod router;
pub mod runtime;
pub mod service;
pub mod state;

pub use service::{Assistant, ChatRequest, ChatResult};
pub use state::AppState;
