//! Block persistence and conversation state.
//!
//! Owns the block store (one record per AI round, with its append-only
//! event stream), the event persister that bridges live callbacks to
//! durable storage, the async session-stats writer, the in-memory
//! conversation contexts, and the persisted routing metadata.

pub mod context;
pub mod persister;
pub mod route_meta;
pub mod stats;
pub mod store;

pub use context::{ContextRegistry, ConversationContext};
pub use persister::EventPersister;
pub use route_meta::{RouteMetadata, RouteMetaStore};
pub use stats::{StatsPersister, StatsRecord};
pub use store::BlockStore;
