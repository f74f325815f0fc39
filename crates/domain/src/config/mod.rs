//! Configuration tree for the aviary core.
//!
//! One file per concern. Every field has a serde default so a partial
//! `aviary.toml` (or none at all) yields a working configuration; parrot
//! definition files are the exception and fail fast on missing fields.

mod llm;
mod memory;
mod parrots;
mod router;
mod runner;
mod store;

pub use llm::*;
pub use memory::*;
pub use parrots::*;
pub use router::*;
pub use runner::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub parrots: ParrotsConfig,
}

impl AppConfig {
    /// Load from a TOML file. A missing file yields defaults; a malformed
    /// file is a startup error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Duration strings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a compact duration string: `"30s"`, `"5m"`, `"2h"`, or bare
/// seconds (`"300"`).
pub fn parse_duration(s: &str) -> Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("empty duration".into()));
    }
    let (value, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    };
    let n: u64 = value
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration: {s}")))?;
    let secs = match unit {
        "" | "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        other => return Err(Error::Config(format!("unknown duration unit: {other}"))),
    };
    Ok(std::time::Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
        assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
        assert_eq!(parse_duration("2h").unwrap().as_secs(), 7200);
        assert_eq!(parse_duration("120").unwrap().as_secs(), 120);
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.router.confidence_threshold, 0.7);
        assert_eq!(cfg.runner.terminate_grace_secs, 5);
    }
}
