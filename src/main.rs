//! Bot Telemetry Agent for Zentinel
//!
//! Runs a demo site behind the bot telemetry middleware, or fetches the
//! current ruleset.

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_agent_bot_telemetry::ruleset::{HttpRulesetSource, Ruleset, RulesetSource};
use zentinel_agent_bot_telemetry::{guard, BotTelemetryAgent, BotTelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-bot-telemetry")]
#[command(author, version, about = "Bot and AI-referrer telemetry agent for Zentinel")]
struct Args {
    /// Path to configuration file (JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API key for ruleset sync and telemetry (overrides the config file)
    #[arg(long, env = "BOT_TELEMETRY_API_KEY", global = true)]
    api_key: Option<String>,

    /// Log sync and delivery failures
    #[arg(long, env = "BOT_TELEMETRY_DEBUG", global = true)]
    debug: bool,

    /// Path to a ruleset file to use instead of syncing
    #[arg(long, global = true)]
    ruleset: Option<PathBuf>,

    /// Enable JSON logging format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a demo site behind the middleware
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        listen: SocketAddr,
    },
    /// Fetch the ruleset from the patterns endpoint and print or save it
    FetchRules {
        /// Write the ruleset here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

fn load_config(args: &Args) -> Result<BotTelemetryConfig> {
    let mut config = match &args.config {
        Some(path) => BotTelemetryConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => BotTelemetryConfig::default(),
    };

    if let Some(key) = &args.api_key {
        config.api_key = Some(key.clone());
    }
    if args.debug {
        config.debug = true;
    }
    if let Some(path) = &args.ruleset {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ruleset from {}", path.display()))?;
        let ruleset: Ruleset = serde_json::from_str(&content)
            .with_context(|| format!("invalid ruleset in {}", path.display()))?;
        config.ruleset = Some(ruleset);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(args.json_logs, &args.log_level);

    let config = load_config(&args)?;

    match args.command {
        Command::Serve { listen } => serve(config, listen).await,
        Command::FetchRules { output } => fetch_rules(config, output).await,
    }
}

/// Run the demo site.
async fn serve(config: BotTelemetryConfig, listen: SocketAddr) -> Result<()> {
    let agent = Arc::new(BotTelemetryAgent::new(config)?);

    let app = Router::new()
        .route("/", get(|| async { "Hello from behind the bot telemetry agent\n" }))
        .route("/health", get(|| async { "ok\n" }))
        .layer(axum::middleware::from_fn_with_state(agent, guard));

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(address = %listen, "Starting bot telemetry demo server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Fetch the ruleset once and write it out as JSON.
async fn fetch_rules(config: BotTelemetryConfig, output: Option<PathBuf>) -> Result<()> {
    let api_key = config
        .api_key()
        .context("an API key is required to fetch the ruleset")?;

    let source = HttpRulesetSource::new(
        config.patterns_endpoint.clone(),
        api_key,
        config.request_timeout(),
    )?;
    let ruleset = source.fetch().await?;
    info!(
        version = %ruleset.version,
        patterns = ruleset.patterns.len(),
        ai_referrers = ruleset.ai_referrers.len(),
        "Fetched ruleset"
    );

    let json = serde_json::to_string_pretty(&ruleset)?;
    match output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(())
}
