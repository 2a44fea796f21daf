//! Chat hub server entry point

use chathub::agent::LlmAgentFactory;
use chathub::config::HubConfig;
use chathub::hub::ChatHub;
use chathub::llm::providers::{OpenAiConfig, OpenAiProvider};
use chathub::llm::LlmProvider;
use chathub::observability::init_default_logging;
use chathub::server;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Real-time multi-agent chat hub
#[derive(Parser)]
#[command(name = "chathub")]
#[command(about = "Streams agent responses to session groups over WebSocket")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CHATHUB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the hub
    Serve,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting chathub v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<HubConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(HubConfig::load_from_file(path)?);
    }

    for path_str in ["chathub.toml", "config/chathub.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(HubConfig::load_from_file(&path)?);
        }
    }

    warn!("No configuration file found, using defaults");
    Ok(HubConfig::default())
}

/// Provider factory for creating LLM providers from configuration
struct LlmProviderFactory;

impl LlmProviderFactory {
    fn create_provider(
        config: &HubConfig,
    ) -> Result<Arc<dyn LlmProvider>, Box<dyn std::error::Error>> {
        match config.llm.provider.as_str() {
            "openai" => {
                let api_key = config.get_llm_api_key()?;
                let mut openai_config = OpenAiConfig {
                    api_key,
                    timeout: Duration::from_secs(config.llm.timeout_secs),
                    ..Default::default()
                };
                if let Some(base_url) = &config.llm.base_url {
                    openai_config.base_url = base_url.clone();
                }
                Ok(Arc::new(OpenAiProvider::new(openai_config)?))
            }
            provider => Err(format!("Unsupported LLM provider: {provider}").into()),
        }
    }
}

async fn serve(config: HubConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = LlmProviderFactory::create_provider(&config)?;
    let factory = Arc::new(LlmAgentFactory::new(provider, config.llm.agent_settings()));
    let hub = Arc::new(ChatHub::new(&config, factory)?);
    let addr = config.server.socket_addr()?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
    };

    server::serve(hub, addr, shutdown).await?;
    Ok(())
}

fn handle_config_command(config: &HubConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", config.to_toml()?);
    }

    info!("Configuration validation complete");
    Ok(())
}
