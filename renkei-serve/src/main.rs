//! renkeid - the agent execution core daemon.
//!
//! Loads the TOML config, wires the capability bindings to the sibling
//! platform services, assembles the core service, registers with discovery,
//! and runs until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use renkei::capability::http::{HttpChat, HttpEmbedding, HttpSummarizer};
use renkei::capability::{ChatCapability, EmbeddingCapability, SummaryCapability};
use renkei::discovery::{DiscoveryClient, DiscoveryConfig};
use renkei::orchestrator::Orchestrator;
use renkei::tool::builtin::{ToolEndpoints, register_defaults};
use renkei::{
    AgentCatalog, AgentSelector, ContextConfig, ContextManager, CoreService, ModelBudget, Runner,
    SelectorConfig, ToolRegistry,
};

mod config;

use config::ServeConfig;

/// Agent execution core daemon.
#[derive(Parser)]
#[command(name = "renkeid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "RENKEI_CONFIG", default_value = "renkei.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (the default).
    Serve,
    /// Load and validate the configuration, then exit.
    Check,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to create tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load(&cli.config).await?;

    if matches!(cli.command, Some(Commands::Check)) {
        info!("configuration is valid");
        return Ok(());
    }

    let service = build_service(&config)?;
    info!(
        service = %config.service.name,
        port = config.service.port,
        "execution core assembled"
    );
    // Transport adapters attach to `service` in-process; keep it alive for
    // the daemon lifetime.
    let _service = service;

    let discovery = config.discovery.endpoint.as_ref().map(|endpoint| {
        let client = DiscoveryClient::new(DiscoveryConfig {
            heartbeat_interval: Duration::from_secs(config.discovery.heartbeat_secs),
            ..DiscoveryConfig::new(
                endpoint,
                &config.service.name,
                env!("CARGO_PKG_VERSION"),
                config.service.port,
            )
        });
        (client.clone(), client.spawn())
    });

    wait_for_shutdown().await;
    info!("shutting down");

    if let Some((client, heartbeat)) = discovery {
        heartbeat.abort();
        client.deregister().await;
    }
    Ok(())
}

/// Assemble the core from the configuration.
fn build_service(config: &ServeConfig) -> Result<CoreService, Box<dyn std::error::Error>> {
    let chat: Arc<dyn ChatCapability> = Arc::new(HttpChat::new(&config.capabilities.chat_endpoint));
    let embedder: Arc<dyn EmbeddingCapability> =
        Arc::new(HttpEmbedding::new(&config.capabilities.nlp_endpoint));
    let summarizer: Arc<dyn SummaryCapability> =
        Arc::new(HttpSummarizer::new(&config.capabilities.nlp_endpoint));

    let registry = Arc::new(ToolRegistry::new());
    let endpoints = ToolEndpoints {
        search: config.capabilities.search_endpoint.clone(),
        nlp: Some(config.capabilities.nlp_endpoint.clone()),
    };
    register_defaults(&registry, &endpoints, Some(Arc::clone(&summarizer)))?;
    info!(tools = registry.len(), "tool registry bootstrapped");

    let catalog = Arc::new(AgentCatalog::open(&config.catalog.path));
    if let Err(err) = catalog.ensure_default(&config.capabilities.chat_model) {
        warn!(error = %err, "could not ensure the default agent");
    }

    let context = Arc::new(ContextManager::new(
        ContextConfig {
            default_budget: ModelBudget {
                max_tokens: config.context.max_tokens,
                reserved_output: config.context.reserved_output,
            },
            budgets: config
                .context
                .budgets
                .iter()
                .map(|entry| {
                    (
                        entry.model.clone(),
                        ModelBudget {
                            max_tokens: entry.max_tokens,
                            reserved_output: entry.reserved_output,
                        },
                    )
                })
                .collect(),
            ..ContextConfig::default()
        },
        Some(summarizer),
    ));

    let runner = Arc::new(Runner::new(
        Arc::clone(&chat),
        Arc::clone(&registry),
        context,
    ));
    let selector = Arc::new(AgentSelector::new(
        Arc::clone(&catalog),
        Some(embedder),
        SelectorConfig {
            embed_model: config.capabilities.embed_model.clone(),
            score_floor: config.selector.score_floor,
        },
        &config.capabilities.chat_model,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        chat,
        Arc::clone(&selector),
        Arc::clone(&catalog),
        Arc::clone(&runner),
        &config.capabilities.chat_model,
    ));

    Ok(CoreService::new(catalog, registry, selector, runner, orchestrator)
        .with_stream_capacity(config.service.stream_capacity))
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            () = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
