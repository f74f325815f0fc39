//! `aviary` — run the assistant core from the command line.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use av_core::{Assistant, AppState, ChatRequest};
use av_domain::block::Mode;
use av_domain::config::AppConfig;
use av_domain::event::{EventCallback, EventWithMeta};
use av_providers::openai_compat::OpenAiCompatProvider;
use av_providers::{ChatProvider, ProviderRegistry};
use av_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "aviary", about = "Personal AI assistant execution core")]
struct Cli {
    /// Path to aviary.toml.
    #[arg(long, default_value = "aviary.toml")]
    config: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a single message and stream events to stdout.
    Send {
        #[arg(long, default_value_t = 1)]
        user: i64,
        #[arg(long, default_value_t = 1)]
        conversation: i64,
        /// normal | geek | evolution | auto
        #[arg(long, default_value = "auto")]
        mode: String,
        /// Route to a specific parrot instead of classifying.
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        admin: bool,
        message: String,
    },
    /// Interactive chat loop on stdin.
    Chat {
        #[arg(long, default_value_t = 1)]
        user: i64,
        #[arg(long, default_value_t = 1)]
        conversation: i64,
    },
    /// List configured parrots.
    Parrots,
    /// List registered tools.
    Tools,
}

fn parse_mode(raw: &str) -> anyhow::Result<Mode> {
    match raw {
        "normal" => Ok(Mode::Normal),
        "geek" => Ok(Mode::Geek),
        "evolution" => Ok(Mode::Evolution),
        "auto" => Ok(Mode::Auto),
        other => anyhow::bail!("unknown mode: {other}"),
    }
}

fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    // Providers: the main chat model plus the small intent model, both on
    // the same OpenAI-compatible endpoint.
    let api_key = std::env::var(&config.llm.api_key_env).ok();
    let timeout = std::time::Duration::from_secs(config.llm.chat_timeout_secs);

    let providers = Arc::new(ProviderRegistry::new());
    let chat: Arc<dyn ChatProvider> = Arc::new(OpenAiCompatProvider::new(
        "chat",
        &config.llm.endpoint,
        &config.llm.chat_model,
        &config.llm.embedding_model,
        api_key.clone(),
        timeout,
        config.llm.max_transport_retries,
    )?);
    let intent: Arc<dyn ChatProvider> = Arc::new(OpenAiCompatProvider::new(
        "intent",
        &config.llm.endpoint,
        &config.llm.intent_model,
        &config.llm.embedding_model,
        api_key,
        std::time::Duration::from_secs(config.llm.intent_timeout_secs),
        config.llm.max_transport_retries,
    )?);
    providers.register(chat);
    providers.register(intent);
    providers.set_role("chat", "chat");
    providers.set_role("embedding", "chat");
    providers.set_role("intent", "intent");
    providers.set_role("summary", "intent");

    // The memo/schedule CRUD services are external collaborators; the CLI
    // wires the in-memory reference backends.
    let tools = Arc::new(ToolRegistry::new());
    av_tools::builtin::register_builtin(
        &tools,
        Arc::new(av_tools::builtin::memo::InMemoryMemoStore::new()),
        Arc::new(av_tools::builtin::schedule::InMemoryScheduleStore::new()),
    )
    .map_err(|e| anyhow::anyhow!("tool registration: {e}"))?;

    let memory_store = Arc::new(av_core::memory::JsonlMemoryStore::new(
        &config.store.state_path,
    )?);

    AppState::build(config, providers, tools, memory_store)
        .map_err(|e| anyhow::anyhow!("state build: {e}"))
}

fn print_event_callback() -> EventCallback {
    Arc::new(|ev: &EventWithMeta| {
        let line = serde_json::to_string(ev).unwrap_or_default();
        println!("{line}");
        Ok(())
    })
}

async fn run_send(
    assistant: &Assistant,
    user: i64,
    conversation: i64,
    mode: Mode,
    agent: Option<String>,
    admin: bool,
    message: String,
) -> anyhow::Result<()> {
    let req = ChatRequest {
        user_id: user,
        conversation_id: conversation,
        input: message,
        mode,
        requested_agent: agent,
        is_admin: admin,
        follow_up_block: None,
    };
    let result = assistant
        .handle(req, print_event_callback())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    eprintln!(
        "[{} via {} ({:.2})] block {}",
        result.route.route, result.route.method, result.route.confidence, result.block_id
    );
    Ok(())
}

async fn run_chat(assistant: &Assistant, user: i64, conversation: i64) -> anyhow::Result<()> {
    eprintln!("aviary chat — /reset clears the conversation, /exit quits");
    let stdin = std::io::stdin();
    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/exit" => break,
            "/reset" => {
                assistant.reset_conversation(conversation);
                eprintln!("conversation reset");
                continue;
            }
            _ => {}
        }

        let req = ChatRequest::new(user, conversation, line);
        match assistant.handle(req, print_event_callback()).await {
            Ok(result) => {
                eprintln!("[{} via {}]", result.route.route, result.route.method);
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Send {
            user,
            conversation,
            mode,
            agent,
            admin,
            message,
        } => {
            let state = build_state(config)?;
            let assistant = Assistant::new(state);
            let mode = parse_mode(&mode)?;
            let outcome =
                run_send(&assistant, user, conversation, mode, agent, admin, message).await;
            let (saved, lost) = assistant.close().await;
            tracing::info!(saved, lost, "stats drained");
            outcome
        }
        Command::Chat { user, conversation } => {
            let state = build_state(config)?;
            let assistant = Assistant::new(state);
            let outcome = run_chat(&assistant, user, conversation).await;
            let (saved, lost) = assistant.close().await;
            tracing::info!(saved, lost, "stats drained");
            outcome
        }
        Command::Parrots => {
            let state = build_state(config)?;
            for name in state.parrots.names() {
                let parrot = state.parrots.get(&name).expect("listed parrot");
                let desc = &parrot.spec.self_description;
                println!(
                    "{} — {} [{}]",
                    name,
                    parrot.spec.display_name,
                    desc.capabilities.join(", ")
                );
            }
            Ok(())
        }
        Command::Tools => {
            let state = build_state(config)?;
            print!("{}", state.tools.describe());
            Ok(())
        }
    }
}
