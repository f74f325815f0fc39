//! CCRunner: hot-multiplexing supervisor for external code-execution CLIs.
//!
//! A code-execution request resolves to a deterministic session id; the
//! runner keeps one live child process per session and reuses it across
//! calls instead of paying startup cost each turn. Children speak
//! line-delimited JSON on stdout; the runner maps those lines onto the
//! canonical event stream and group-kills the whole process tree on
//! teardown.

pub mod manager;
pub mod runner;
pub mod session;
pub mod stream;

pub use manager::SessionManager;
pub use runner::{CcRunner, ExecuteConfig};
pub use session::{session_id_for, SessionState};
