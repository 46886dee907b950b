use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "iconpipe",
    about = "Rate-limited icon resolution against the item icon service",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Pipeline configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve item ids to icon URLs.
    ///
    /// The first `--priority` ids go through the fast lane; the rest are
    /// paced through the background queue.
    Resolve {
        /// Item ids to resolve
        #[arg(required = true)]
        ids: Vec<u32>,
        /// How many leading ids use the priority lane
        #[arg(short, long, default_value_t = 0)]
        priority: usize,
        /// Spread background ids over the quota window before submitting
        #[arg(long)]
        stagger: bool,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Print the fallback icon URLs for an item id
    Fallbacks {
        id: u32,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("iconpipe=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Resolve {
            ids,
            priority,
            stagger,
            format,
        } => commands::resolve::resolve(&config, &ids, priority, stagger, &format).await,
        Commands::Fallbacks { id } => commands::fallbacks::fallbacks(&config, id),
        Commands::Config => commands::config::print(&config),
    }
}
