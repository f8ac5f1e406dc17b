//! chatgate - gate pipeline chat backend
//!
//! `serve` runs the HTTP API, `ask` pushes a single message through the
//! pipeline and prints the result, `config` validates the configuration.

use chatgate::config::AssistantConfig;
use chatgate::gates::{assemble_gate_set, GateDependencies};
use chatgate::llm::create_provider;
use chatgate::observability::init_default_logging;
use chatgate::pipeline::{PipelineOrchestrator, PipelineSettings};
use chatgate::server::{self, ChatRequest, ChatService};
use chatgate::store::{AckLedger, ConversationStore, InMemoryConversationStore};
use chatgate::tools::ToolSystem;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Gate pipeline backend for a conversational assistant
#[derive(Parser)]
#[command(name = "chatgate")]
#[command(about = "Gate pipeline backend for a conversational assistant")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CHATGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the chat API
    Serve,
    /// Run one message through the pipeline and print the result
    Ask {
        #[arg(short, long)]
        message: String,
        #[arg(long, default_value = "cli-user")]
        user: String,
        #[arg(long, default_value = "cli")]
        conversation: String,
        /// Token from an earlier await_ack result
        #[arg(long)]
        ack_token: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Everything a running assistant needs
struct Runtime {
    service: Arc<ChatService>,
    tools: Arc<ToolSystem>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var("LOG_LEVEL").is_err() {
        let level = if cli.verbose > 1 { "TRACE" } else { "DEBUG" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!("Starting chatgate v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Ask {
            message,
            user,
            conversation,
            ack_token,
        } => ask(config, message, user, conversation, ack_token).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AssistantConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AssistantConfig::load_from_file(path)?);
    }

    for path_str in ["chatgate.toml", "config/chatgate.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AssistantConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create chatgate.toml".into())
}

/// Wire providers, tools and stores into a chat service
async fn build_runtime(config: &AssistantConfig) -> Result<Runtime, Box<dyn std::error::Error>> {
    let llm = create_provider(&config.llm, config.get_llm_api_key()?)?;

    let mut tools = ToolSystem::new();
    tools.initialize(&config.tools).await?;
    info!(tools = ?tools.list_tools(), "Tool system ready");
    let tools = Arc::new(tools);

    let store: Arc<dyn ConversationStore> =
        Arc::new(InMemoryConversationStore::new(config.memory.max_turns));
    let ledger = Arc::new(AckLedger::new(Duration::from_secs(
        config.intent.ack_ttl_secs,
    )));

    let gates = assemble_gate_set(
        config,
        GateDependencies {
            llm,
            tools: tools.clone(),
            store: store.clone(),
            ledger: ledger.clone(),
        },
    )?;
    info!(gates = ?gates.gate_ids(), "Gate set assembled");

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        gates,
        PipelineSettings::from(&config.pipeline),
    ));
    let service = ChatService::new(orchestrator, store, ledger)
        .with_history_window(config.memory.history_window)
        .with_request_timeout(config.pipeline.request_timeout_ms.map(Duration::from_millis));

    Ok(Runtime {
        service: Arc::new(service),
        tools,
    })
}

async fn serve(config: AssistantConfig) -> Result<(), Box<dyn std::error::Error>> {
    let Runtime { service, tools } = build_runtime(&config).await?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
    };

    server::serve(
        service,
        config.assistant.id.clone(),
        config.server.max_body_bytes,
        addr,
        shutdown,
    )
    .await;

    shutdown_tools(tools).await;
    Ok(())
}

async fn ask(
    config: AssistantConfig,
    message: String,
    user: String,
    conversation: String,
    ack_token: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Runtime { service, tools } = build_runtime(&config).await?;

    let mut request = ChatRequest::new(message, user, conversation);
    request.ack_token = ack_token;
    let result = service.handle(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    drop(service);
    shutdown_tools(tools).await;
    Ok(())
}

async fn shutdown_tools(tools: Arc<ToolSystem>) {
    match Arc::try_unwrap(tools) {
        Ok(mut tools) => {
            if let Err(e) = tools.shutdown().await {
                error!("Error during tool shutdown: {}", e);
            }
        }
        Err(_) => warn!("Tool system still in use, skipping shutdown"),
    }
}

fn handle_config_command(
    config: &AssistantConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
