//! Chat dashboard CLI - main entry point
//!
//! Polls the chat webhook on half-hour marks and prints the dashboard.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use chat_dashboard::commands::{dashboard, OutputFormat};
use chat_dashboard::{metrics, Config, Window};
use tracing::warn;

#[derive(Parser)]
#[command(name = "chat_dashboard")]
#[command(about = "Chat-bot analytics dashboard poller", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Output format: table | json
    #[arg(long, default_value = "table", global = true)]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the half-hour aligned poller and print each update
    Run {
        /// Window to start with: 7d | 30d | 90d
        #[arg(short, long)]
        window: Option<String>,
    },

    /// Fetch once, update the cache and print the dashboard
    Fetch {
        /// Window to fetch: 7d | 30d | 90d
        #[arg(short, long)]
        window: Option<String>,
    },

    /// Print the dashboard from cached data
    Show {
        /// Window to aggregate: 7d | 30d | 90d
        #[arg(short, long)]
        window: Option<String>,
    },

    /// Clear the persisted dashboard cache
    Clear,

    /// Show half-hour marks and the startup decision
    Marks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("chat_dashboard=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::new();

    let metrics_addr = cli
        .metrics_addr
        .as_deref()
        .and_then(|addr| match addr.parse::<SocketAddr>() {
            Ok(socket) => Some(socket),
            Err(err) => {
                warn!(%addr, "Invalid metrics address: {}", err);
                None
            }
        })
        .or(config.metrics_addr);
    if let Some(socket) = metrics_addr {
        metrics::spawn_metrics_server(socket);
    }

    let format = OutputFormat::parse(&cli.format);
    let pick = |window: Option<String>, fallback: Window| match window {
        Some(w) => Window::parse_or_default(Some(&w)),
        None => fallback,
    };

    match cli.command {
        Commands::Run { window } => {
            config.window = pick(window, config.window);
            dashboard::run(&config, format).await?;
        }
        Commands::Fetch { window } => {
            let window = pick(window, config.window);
            dashboard::fetch(&config, window, format).await?;
        }
        Commands::Show { window } => {
            let window = pick(window, config.window);
            dashboard::show(&config, window, format)?;
        }
        Commands::Clear => dashboard::clear(&config)?,
        Commands::Marks => dashboard::marks(&config)?,
    }

    Ok(())
}
