use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CC runner: the external code-execution CLI and its session pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// CLI binary invoked for code-execution sessions.
    #[serde(default = "d_binary")]
    pub binary: String,
    /// Root under which per-user working directories are created
    /// (`<root>/user_<id>`).
    #[serde(default = "d_workdir_root")]
    pub workdir_root: PathBuf,
    /// Working directory for evolution sessions (the source tree the
    /// assistant is allowed to modify). Unset disables evolution spawns.
    #[serde(default)]
    pub evolution_workdir: Option<PathBuf>,
    #[serde(default = "d_spawn_timeout")]
    pub spawn_timeout_secs: u64,
    /// Hard ceiling on one Execute call.
    #[serde(default = "d_execute_timeout")]
    pub execute_timeout_secs: u64,
    /// Sessions idle longer than this are reaped.
    #[serde(default = "d_idle_ttl")]
    pub idle_ttl_secs: u64,
    #[serde(default = "d_reaper_interval")]
    pub reaper_interval_secs: u64,
    /// Grace between SIGTERM and SIGKILL on the process group.
    #[serde(default = "d_terminate_grace")]
    pub terminate_grace_secs: u64,
    /// Environment variable that must be set truthy for evolution mode.
    #[serde(default = "d_evolution_gate")]
    pub evolution_env_gate: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary: d_binary(),
            workdir_root: d_workdir_root(),
            evolution_workdir: None,
            spawn_timeout_secs: d_spawn_timeout(),
            execute_timeout_secs: d_execute_timeout(),
            idle_ttl_secs: d_idle_ttl(),
            reaper_interval_secs: d_reaper_interval(),
            terminate_grace_secs: d_terminate_grace(),
            evolution_env_gate: d_evolution_gate(),
        }
    }
}

impl RunnerConfig {
    /// Per-user working directory for geek-mode sessions.
    pub fn user_workdir(&self, user_id: i64) -> PathBuf {
        self.workdir_root.join(format!("user_{user_id}"))
    }
}

fn d_binary() -> String {
    "claude".into()
}
fn d_workdir_root() -> PathBuf {
    dirs_fallback().join(".aviary").join("cc")
}
fn d_spawn_timeout() -> u64 {
    10
}
fn d_execute_timeout() -> u64 {
    300
}
fn d_idle_ttl() -> u64 {
    900
}
fn d_reaper_interval() -> u64 {
    60
}
fn d_terminate_grace() -> u64 {
    5
}
fn d_evolution_gate() -> String {
    "AVIARY_EVOLUTION_ENABLED".into()
}

fn dirs_fallback() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
