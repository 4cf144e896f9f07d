//! NTBridge CLI: operator tooling for a bridge deployment.
//!
//! Commands:
//! - `lookup`   Find a captured message by short, long or sequence id
//! - `cursor`   Show an account's short-id cursor
//! - `config`   Show, validate or initialize the configuration
//! - `status`   Show configuration and store files

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ntbridge",
    about = "NTBridge: host bridge operator tooling",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a captured message in an account's identity store
    Lookup {
        /// Account uin whose store to read
        #[arg(short, long)]
        account: String,

        #[command(flatten)]
        target: LookupArgs,
    },

    /// Show the current short-id cursor of an account
    Cursor {
        /// Account uin whose store to read
        #[arg(short, long)]
        account: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show configuration and store status
    Status,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct LookupArgs {
    /// Compact id handed out to clients
    #[arg(long)]
    short: Option<i32>,

    /// Long host message id
    #[arg(long)]
    long: Option<String>,

    /// Host sequence id
    #[arg(long)]
    seq: Option<String>,
}

impl LookupArgs {
    fn into_target(self) -> Option<commands::lookup::Target> {
        use commands::lookup::Target;
        match (self.short, self.long, self.seq) {
            (Some(short), _, _) => Some(Target::Short(short)),
            (_, Some(long), _) => Some(Target::Long(long)),
            (_, _, Some(seq)) => Some(Target::Sequence(seq)),
            _ => None,
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Lookup { account, target } => {
            let target = target
                .into_target()
                .ok_or("one of --short, --long or --seq is required")?;
            commands::lookup::run(&account, target).await?
        }
        Commands::Cursor { account } => commands::cursor::run(&account).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
