//! Parrot factory: config-driven composition.
//!
//! Reads every definition under the parrot config directory, validates it
//! against the tool registry, and registers built-in parrots (geek,
//! evolution, amazing) for the names the config left free. Any invalid
//! definition is a startup error.

use std::sync::Arc;

use av_domain::block::Mode;
use av_domain::config::{
    load_parrot_dir, parse_duration, ParrotSpec, ParrotsConfig, SelfDescription, Strategy,
};
use av_domain::error::{Error, Result};
use av_tools::ToolRegistry;

use super::{cache::ResultCache, ExecutorKind, Parrot, ParrotRegistry};

/// Build the parrot registry from the config directory plus built-ins.
pub fn build_registry(
    config: &ParrotsConfig,
    tools: &ToolRegistry,
) -> Result<Arc<ParrotRegistry>> {
    let registry = Arc::new(ParrotRegistry::new());

    for spec in load_parrot_dir(&config.config_dir)? {
        registry.register(build_parrot(spec, tools)?)?;
    }

    register_builtins(&registry)?;
    Ok(registry)
}

/// Compose one parrot from its spec: strategy → executor kind, tool names
/// checked against the registry, cache wired from the cache fields.
pub fn build_parrot(spec: ParrotSpec, tools: &ToolRegistry) -> Result<Parrot> {
    for tool_name in &spec.tools {
        if !tools.contains(tool_name) {
            return Err(Error::Config(format!(
                "parrot '{}': unknown tool '{tool_name}'",
                spec.name
            )));
        }
    }

    let kind = match spec.strategy {
        Strategy::React => ExecutorKind::React,
        Strategy::Direct => ExecutorKind::Direct,
        Strategy::Planning => ExecutorKind::Planning,
    };

    let cache = if spec.enable_cache {
        let ttl = parse_duration(&spec.cache_ttl)?;
        Some(ResultCache::new(spec.name.clone(), ttl, spec.cache_size))
    } else {
        None
    };

    Ok(Parrot { spec, kind, cache })
}

/// Built-in parrots for names the config did not claim.
fn register_builtins(registry: &Arc<ParrotRegistry>) -> Result<()> {
    if !registry.contains("geek") {
        registry.register(Parrot {
            spec: builtin_spec(
                "geek",
                "Geek Parrot",
                "执行代码任务：在用户工作区内读写文件、运行命令、完成编码工作。",
                &["code", "shell", "files"],
            ),
            kind: ExecutorKind::CcBacked(Mode::Geek),
            cache: None,
        })?;
    }
    if !registry.contains("evolution") {
        registry.register(Parrot {
            spec: builtin_spec(
                "evolution",
                "Evolution Parrot",
                "修改自身源码的受限模式，仅管理员可用。",
                &["self-modify"],
            ),
            kind: ExecutorKind::CcBacked(Mode::Evolution),
            cache: None,
        })?;
    }
    if !registry.contains("amazing") {
        registry.register(Parrot {
            spec: builtin_spec(
                "amazing",
                "Amazing Parrot",
                "协调多个专家鹦鹉处理复合请求。",
                &["orchestration"],
            ),
            kind: ExecutorKind::Orchestrator,
            cache: None,
        })?;
    }
    Ok(())
}

fn builtin_spec(name: &str, display: &str, prompt: &str, capabilities: &[&str]) -> ParrotSpec {
    ParrotSpec {
        name: name.to_owned(),
        display_name: display.to_owned(),
        emoji: None,
        strategy: Strategy::Direct, // unused by CC/orchestrator kinds
        max_iterations: 10,
        tools: Vec::new(),
        system_prompt: prompt.to_owned(),
        prompt_hints: Vec::new(),
        enable_cache: false,
        cache_ttl: "5m".into(),
        cache_size: 0,
        self_description: SelfDescription {
            title: display.to_owned(),
            name: name.to_owned(),
            emoji: String::new(),
            capabilities: capabilities.iter().map(|s| (*s).to_owned()).collect(),
        },
    }
}
