//! Execution strategies: the ReAct tool loop, the single-round direct
//! executor, and the plan/fan-out/synthesise executor.

pub mod agent_loop;
pub mod cancel;
pub mod direct;
pub mod planning;

pub use agent_loop::{run_react_loop, AgentLoopConfig, RunOutcome};
pub use cancel::CancelMap;

use av_domain::block::AgentStats;
use av_providers::Usage;

/// Fixed result substrings that signal a side-effectful tool finished its
/// job: the loop stops iterating and answers with the tool result.
pub const SUCCESS_MARKERS: &[&str] = &[
    "✓ 已创建",
    "✓ 已更新",
    "successfully created",
    "successfully updated",
    "schedule created",
    "schedule updated",
];

/// Handoff signal: an agent reports it cannot fulfil the request so the
/// orchestrator can re-route. String contract, kept verbatim for
/// compatibility with existing CLIs.
pub const HANDOFF_PREFIX: &str = "INABILITY_REPORTED:";

/// Case-insensitive early-stop check over a tool result.
pub fn hits_success_marker(result: &str) -> bool {
    if result.contains(HANDOFF_PREFIX) {
        return true;
    }
    let lower = result.to_lowercase();
    SUCCESS_MARKERS.iter().any(|m| lower.contains(&m.to_lowercase()))
}

/// Fold one LLM call's usage into the run stats.
pub(crate) fn add_usage(stats: &mut AgentStats, usage: &Usage) {
    stats.llm_call_count += 1;
    stats.prompt_tokens += usage.prompt_tokens;
    stats.completion_tokens += usage.completion_tokens;
    stats.cache_read_tokens += usage.cache_read_tokens;
    stats.cache_write_tokens += usage.cache_write_tokens;
}

/// Truncate on a char boundary for event summaries.
pub(crate) fn truncate_summary(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_markers_match_case_insensitively() {
        assert!(hits_success_marker("✓ 已创建: 明天 15:00 开会 (ID=42)"));
        assert!(hits_success_marker("✓ 已更新: 日程"));
        assert!(hits_success_marker("Successfully Created the note"));
        assert!(hits_success_marker("SCHEDULE UPDATED"));
        assert!(!hits_success_marker("工作进行中"));
        assert!(!hits_success_marker("created a draft")); // missing the full marker
    }

    #[test]
    fn handoff_prefix_is_case_sensitive_literal() {
        assert!(hits_success_marker("INABILITY_REPORTED: cannot schedule flights"));
        assert!(!hits_success_marker("inability_reported: lowercase is not the contract"));
    }

    #[test]
    fn truncate_summary_respects_chars() {
        assert_eq!(truncate_summary("短", 10), "短");
        assert_eq!(truncate_summary("一二三四五", 3), "一二三…");
    }
}
