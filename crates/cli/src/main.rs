mod check_command;
mod http;
mod run_command;
mod status_command;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "chanrelay", about = "chanrelay: mirror channel posts into one target channel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery of `chanrelay.{toml,yaml,json}`).
    #[arg(long, global = true, env = "CHANRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay posts until interrupted (default when no subcommand is provided).
    Run,
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the configured target, sources and stored cursors.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "chanrelay starting");
            run_command::run(cli.config).await
        },
        Some(Commands::Check { verbose }) => check_command::check(cli.config.as_deref(), verbose),
        Some(Commands::Status { json }) => status_command::status(cli.config, json).await,
    }
}
