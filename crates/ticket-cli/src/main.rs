mod cmd;
mod output;
mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use settings::Overrides;

#[derive(Parser)]
#[command(
    name = "ticketd",
    about = "Turn cost recommendations into tracked tickets",
    version,
    propagate_version = true
)]
struct Cli {
    /// YAML config file; environment and flags override it
    #[arg(long, global = true, env = "TICKETD_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (reconcile trigger, ticket API, webhooks)
    Serve,

    /// Run one reconciliation pass and print the report
    Reconcile,

    /// Apply database migrations and verify the schema
    Migrate,

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = settings::resolve(cli.config.as_deref(), cli.overrides).and_then(|config| {
        match cli.command {
            Commands::Serve => cmd::serve::run(config),
            Commands::Reconcile => cmd::reconcile::run(config, cli.json),
            Commands::Migrate => cmd::migrate::run(config),
            Commands::Config { subcommand } => cmd::config::run(&config, subcommand, cli.json),
        }
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
