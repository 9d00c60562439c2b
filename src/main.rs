mod cli;
mod core;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ormon",
    about = "OpenRouter usage and rate limit monitoring CLI",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use the named API key from the key store
    #[arg(short, long, global = true)]
    key: Option<String>,

    /// Output as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current API status, limits and health
    Status {
        /// Force a fresh check, ignoring the cache
        #[arg(short, long)]
        refresh: bool,
    },
    /// Show limit details with a risk analysis
    Limits,
    /// Continuously monitor usage and fire threshold alerts
    Watch {
        /// Check interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,
        /// Warning threshold percentage
        #[arg(short = 'w', long)]
        warn_threshold: Option<u8>,
        /// Alert threshold percentage
        #[arg(short = 'a', long)]
        alert_threshold: Option<u8>,
    },
    /// Manage stored API keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
    /// Inspect recorded usage history
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Record one local API request against today's quota
    Record {
        /// Model the request was made with
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Show local request statistics
    Stats {
        /// Days to include, ending today
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Store a named API key (encrypted at rest)
    Add { name: String, api_key: String },
    /// Remove a named API key
    Remove { name: String },
    /// List stored key names
    List,
    /// Probe a stored key (or the default) against the live API
    Test { name: Option<String> },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show recorded snapshots (default)
    Show {
        #[arg(short, long, default_value_t = 7)]
        days: u32,
        /// Maximum records to return
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show threshold-crossing alerts
    Alerts {
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// Delete recorded history
    Clear {
        /// Only delete records older than this many days
        #[arg(long)]
        older_than: Option<u32>,
    },
    /// Aggregate statistics over the window
    Stats {
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default config file
    Init,
    /// Print one field, or the whole config
    Get { field: Option<String> },
    /// Set a config field
    Set { field: String, value: String },
    /// Reset the config to defaults
    Reset,
    /// Validate the config file
    Check,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("ormon=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ormon=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_opts = cli::output::OutputOptions {
        format: if cli.json {
            cli::output::OutputFormat::Json
        } else {
            cli::output::OutputFormat::Table
        },
        pretty: cli.pretty,
        use_color: cli::output::detect_color(!cli.no_color),
    };

    match cli.command {
        Commands::Status { refresh } => {
            cli::status_cmd::status(cli.key, refresh, &output_opts).await?
        }
        Commands::Limits => cli::status_cmd::limits(cli.key, &output_opts).await?,
        Commands::Watch {
            interval,
            warn_threshold,
            alert_threshold,
        } => {
            cli::watch_cmd::run(cli.key, interval, warn_threshold, alert_threshold, &output_opts)
                .await?
        }
        Commands::Keys { action } => match action {
            KeysAction::Add { name, api_key } => cli::keys_cmd::add(&name, &api_key, &output_opts)?,
            KeysAction::Remove { name } => cli::keys_cmd::remove(&name, &output_opts)?,
            KeysAction::List => cli::keys_cmd::list(&output_opts)?,
            KeysAction::Test { name } => {
                cli::keys_cmd::test(name.or(cli.key), &output_opts).await?
            }
        },
        Commands::History { action } => match action {
            None => cli::history_cmd::show(7, None, cli.key, &output_opts)?,
            Some(HistoryAction::Show { days, limit }) => {
                cli::history_cmd::show(days, limit, cli.key, &output_opts)?
            }
            Some(HistoryAction::Alerts { days }) => {
                cli::history_cmd::alerts(days, cli.key, &output_opts)?
            }
            Some(HistoryAction::Clear { older_than }) => {
                cli::history_cmd::clear(older_than, cli.key, &output_opts)?
            }
            Some(HistoryAction::Stats { days }) => {
                cli::history_cmd::stats(days, cli.key, &output_opts)?
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Init => cli::config_cmd::init(&output_opts)?,
            ConfigAction::Get { field } => cli::config_cmd::get(field, &output_opts)?,
            ConfigAction::Set { field, value } => {
                cli::config_cmd::set(&field, &value, &output_opts)?
            }
            ConfigAction::Reset => cli::config_cmd::reset(&output_opts)?,
            ConfigAction::Check => cli::config_cmd::check(&output_opts)?,
        },
        Commands::Record { model } => cli::track_cmd::record(cli.key, model, &output_opts)?,
        Commands::Stats { days } => cli::track_cmd::stats(days, &output_opts)?,
    }

    Ok(())
}
