use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Discovery config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParrotsConfig {
    /// Directory scanned for `*.yaml` / `*.yml` parrot definitions.
    #[serde(default = "d_config_dir")]
    pub config_dir: PathBuf,
}

impl Default for ParrotsConfig {
    fn default() -> Self {
        Self {
            config_dir: d_config_dir(),
        }
    }
}

fn d_config_dir() -> PathBuf {
    PathBuf::from("parrots")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parrot definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution strategy for a parrot. Unknown values fail at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    React,
    Direct,
    Planning,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::React => "react",
            Strategy::Direct => "direct",
            Strategy::Planning => "planning",
        }
    }
}

/// Card the parrot presents about itself (used by the orchestrator and the
/// catalogue).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfDescription {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// One parrot definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParrotSpec {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub emoji: Option<String>,
    pub strategy: Strategy,
    /// ReAct only; ignored by other strategies.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub tools: Vec<String>,
    pub system_prompt: String,
    #[serde(default)]
    pub prompt_hints: Vec<String>,
    #[serde(default)]
    pub enable_cache: bool,
    /// Duration string, e.g. `"5m"`.
    #[serde(default = "d_cache_ttl")]
    pub cache_ttl: String,
    #[serde(default = "d_cache_size")]
    pub cache_size: usize,
    #[serde(default)]
    pub self_description: SelfDescription,
}

fn d_max_iterations() -> u32 {
    10
}
fn d_cache_ttl() -> String {
    "5m".into()
}
fn d_cache_size() -> usize {
    128
}

impl ParrotSpec {
    /// Structural validation beyond what serde enforces. Tool existence is
    /// checked later against the registry, at factory time.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("parrot name must not be empty".into()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(Error::Validation(format!(
                "parrot '{}': system_prompt is required",
                self.name
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::Validation(format!(
                "parrot '{}': max_iterations must be positive",
                self.name
            )));
        }
        if self.enable_cache {
            super::parse_duration(&self.cache_ttl).map_err(|e| {
                Error::Validation(format!("parrot '{}': bad cache_ttl: {e}", self.name))
            })?;
            if self.cache_size == 0 {
                return Err(Error::Validation(format!(
                    "parrot '{}': cache_size must be positive when cache is enabled",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Parse a single parrot file.
pub fn parse_parrot_spec(raw: &str) -> Result<ParrotSpec> {
    let spec: ParrotSpec =
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("parrot config: {e}")))?;
    spec.validate()?;
    Ok(spec)
}

/// Load every parrot definition under `dir`. Duplicate names and any
/// invalid file are startup errors.
pub fn load_parrot_dir(dir: &Path) -> Result<Vec<ParrotSpec>> {
    let mut specs = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    if !dir.exists() {
        return Ok(specs);
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(Error::Io)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    entries.sort();

    for path in entries {
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let spec = parse_parrot_spec(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        if !seen.insert(spec.name.clone()) {
            return Err(Error::Config(format!(
                "duplicate parrot name '{}' in {}",
                spec.name,
                path.display()
            )));
        }
        specs.push(spec);
    }

    Ok(specs)
}
