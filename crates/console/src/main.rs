//! HostPanel Console
//!
//! Live log and command stream client for hosted game servers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::auth::provider_from_config;
use console::config::{default_config_path, Config};
use console::network::{ApiClient, StatusPoller, WebSocketTransport};
use console::session::{classify_style, ConsoleSession, LineStyle, SessionRunner};
use console::ui::ConsoleTui;
use crossterm::style::Stylize;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// HostPanel Console - live console for hosted game servers.
#[derive(Parser, Debug)]
#[command(name = "hostpanel-console")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the panel API base URL
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Read the bearer credential from this file
    #[arg(long, global = true, value_name = "FILE")]
    pub token_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Open the interactive console for a server
    Attach {
        /// Server ID
        server_id: String,
    },

    /// Stream console output to stdout
    Tail {
        /// Server ID
        server_id: String,

        /// Print lines without color
        #[arg(long)]
        raw: bool,
    },

    /// Show a server's status and metrics
    Status {
        /// Server ID
        server_id: String,
    },

    /// Inspect the configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;

    // Apply environment variable and flag overrides
    config.apply_env_overrides();
    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
    }
    if let Some(path) = &cli.token_file {
        config.auth.token = None;
        config.auth.token_file = Some(path.clone());
    }

    // Validate configuration
    config.validate()?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.console.log_level.to_lowercase()
    };

    match cli.command {
        Commands::Attach { server_id } => {
            // The terminal belongs to the TUI; logs go to a file.
            let _guard = init_file_tracing(&config, &level)?;
            tracing::info!("Attaching to server {}", server_id);
            run_attach(&config, &server_id).await?;
        }
        Commands::Tail { server_id, raw } => {
            init_stderr_tracing(&level);
            run_tail(&config, &server_id, raw).await?;
        }
        Commands::Status { server_id } => {
            init_stderr_tracing(&level);
            show_status(&config, &server_id).await?;
        }
        Commands::Config(ConfigCommands::Show) => {
            let mut shown = config.clone();
            if shown.auth.token.is_some() {
                shown.auth.token = Some("<redacted>".to_string());
            }
            print!("{}", shown.to_toml()?);
        }
        Commands::Config(ConfigCommands::Path) => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

fn init_stderr_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn init_file_tracing(config: &Config, level: &str) -> anyhow::Result<WorkerGuard> {
    let log_dir = config.console.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::daily(&log_dir, "console.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

/// Builds a runner for `server_id` and starts its status poller.
fn start_session(config: &Config, server_id: &str) -> anyhow::Result<(SessionRunner, JoinHandle<()>)> {
    let credentials = provider_from_config(&config.auth);
    let api = Arc::new(ApiClient::new(
        config.api.base_url.clone(),
        credentials.clone(),
        config.api.request_timeout(),
    )?);
    let channel_url = protocol::console_url(&config.api.base_url, server_id)?;
    tracing::debug!(%channel_url, "Console channel address");

    let session = ConsoleSession::with_policy(server_id, config.reconnect.policy());
    let runner = SessionRunner::new(
        session,
        channel_url,
        Arc::new(WebSocketTransport::default()),
        credentials,
    );

    let poller = StatusPoller::new(api, server_id, config.api.poll_interval())
        .spawn(runner.sender(), runner.shutdown_token());
    Ok((runner, poller))
}

async fn run_attach(config: &Config, server_id: &str) -> anyhow::Result<()> {
    let (mut runner, poller) = start_session(config, server_id)?;

    let export_dir = config.console.data_dir.join("exports");
    let mut tui = ConsoleTui::new(config.console.scrollback_step, export_dir)?;
    let result = tui.run(&mut runner).await;
    tui.restore()?;

    runner.shutdown();
    let _ = poller.await;
    result?;

    if runner.session().record().is_none() && runner.session().status().is_none() {
        eprintln!("No status received for server {}", server_id);
    }
    Ok(())
}

async fn run_tail(config: &Config, server_id: &str, raw: bool) -> anyhow::Result<()> {
    let (mut runner, poller) = start_session(config, server_id)?;
    let mut seen = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, detaching");
                break;
            }
            _ = runner.step() => {}
        }

        let buffer = runner.session().log().buffer();
        for line in buffer.since(seen) {
            print_line(line, raw);
        }
        seen = buffer.pushed_total();

        if runner.is_finished() {
            eprintln!("Server {} no longer exists", server_id);
            break;
        }
    }

    runner.shutdown();
    let _ = poller.await;
    Ok(())
}

fn print_line(line: &str, raw: bool) {
    if raw {
        println!("{}", line);
        return;
    }
    match classify_style(line) {
        LineStyle::Marker => println!("{}", line.dark_grey().italic()),
        LineStyle::CommandEcho => println!("{}", line.cyan()),
        LineStyle::Error => println!("{}", line.red()),
        LineStyle::Warning => println!("{}", line.yellow()),
        LineStyle::Ready => println!("{}", line.green().bold()),
        LineStyle::Info => println!("{}", line),
        LineStyle::Muted => println!("{}", line.grey()),
    }
}

async fn show_status(config: &Config, server_id: &str) -> anyhow::Result<()> {
    let credentials = provider_from_config(&config.auth);
    let api = Arc::new(ApiClient::new(
        config.api.base_url.clone(),
        credentials,
        config.api.request_timeout(),
    )?);
    let poller = StatusPoller::new(api, server_id, config.api.poll_interval());
    let (record, metrics) = poller
        .poll_once()
        .await
        .with_context(|| format!("Failed to fetch server {}", server_id))?;

    println!("Server:   {} ({})", record.name, record.id);
    println!("Status:   {}", record.status.label());
    println!("Created:  {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(version) = &record.mc_version {
        println!("Version:  {}", version);
    }
    if let Some(port) = record.port {
        println!("Port:     {}", port);
    }
    if let Some(metrics) = metrics {
        println!("CPU:      {:.1}%", metrics.cpu_percent);
        println!(
            "RAM:      {} / {} MB ({}%)",
            metrics.ram_used_mb,
            metrics.ram_limit_mb,
            metrics.ram_percent()
        );
        println!("Players:  {}", metrics.players_online);
        if !metrics.player_names.is_empty() {
            println!("          {}", metrics.player_names.join(", "));
        }
    }
    Ok(())
}
