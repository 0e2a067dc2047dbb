//! msgvault - Encrypted-at-rest message log
//!
//! Usage:
//!   msgvault init                 - Write a default configuration file
//!   msgvault append <text>        - Append a message to the log
//!   msgvault show                 - Print the decrypted log
//!   msgvault show --summary-cmd C - Print the log summarized by command C
//!   msgvault check                - Report whether the log can be read
//!   msgvault quarantine           - Move an unreadable log aside

use clap::{Parser, Subcommand};
use msgvault::{
    config::{Config, LoggingConfig, Passphrase, PassphraseSource},
    store::{IncomingMessage, LogState, MessageStore},
    transcript::{self, CommandSummarizer},
    Error, Result,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "msgvault")]
#[command(author = "msgvault Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Encrypted-at-rest message log")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/msgvault/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Prompt for the passphrase instead of reading MSGVAULT_PASSPHRASE
    #[arg(long, global = true)]
    prompt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Append a message to the log
    Append {
        /// Message text
        text: String,

        /// Timestamp in seconds since the Unix epoch (defaults to now)
        #[arg(long)]
        at: Option<i64>,
    },

    /// Print the log as `[timestamp] text` lines
    Show {
        /// Pipe the transcript through this command and print its output,
        /// falling back to the transcript if it fails
        #[arg(long, value_name = "COMMAND")]
        summary_cmd: Option<String>,
    },

    /// Print the decrypted log as JSON
    Dump,

    /// Report whether the log is absent, readable or unreadable
    Check,

    /// Move an unreadable log aside so a new one can be started
    Quarantine,
}

fn main() {
    let cli = Cli::parse();

    // Expand ~ in config path
    let config_path = expand_tilde(&cli.config);

    let config = match Config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(cli.verbose, &config.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run_command(cli.command, &config_path, config, cli.prompt) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match logging.open_file()? {
        Some(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to set subscriber: {}", e)))
}

fn run_command(command: Commands, config_path: &Path, config: Config, prompt: bool) -> Result<()> {
    match command {
        Commands::Init { force } => cmd_init(config_path, config, force),

        Commands::Append { text, at } => {
            let at = at.unwrap_or_else(|| chrono::Utc::now().timestamp());
            with_store(&config, prompt, |store| cmd_append(store, at, text))
        }

        Commands::Show { summary_cmd } => {
            let summarizer = summary_cmd.as_deref().and_then(CommandSummarizer::parse);
            with_store(&config, prompt, |store| cmd_show(store, summarizer))
        }

        Commands::Dump => with_store(&config, prompt, cmd_dump),

        Commands::Check => with_store(&config, prompt, cmd_check),

        Commands::Quarantine => with_store(&config, prompt, cmd_quarantine),
    }
}

/// Resolve the passphrase, open the store and drive `f` on a runtime
fn with_store<F, Fut>(config: &Config, prompt: bool, f: F) -> Result<()>
where
    F: FnOnce(MessageStore) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let (passphrase, source) = if prompt {
        let value = rpassword::prompt_password("Log passphrase: ")
            .map_err(|e| Error::Internal(e.to_string()))?;
        (Passphrase::new(value)?, PassphraseSource::Prompt)
    } else {
        Passphrase::resolve(&config.encryption)?
    };

    if source == PassphraseSource::BuiltinDefault {
        eprintln!("WARNING: log is protected by the built-in default passphrase");
    }

    let store = MessageStore::from_config(config, &passphrase)?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))?;
    runtime.block_on(f(store))
}

fn cmd_init(config_path: &Path, config: Config, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(Error::InvalidConfig(format!(
            "{:?} already exists (use --force to overwrite)",
            config_path
        )));
    }

    info!("Initializing msgvault...");
    config.ensure_directories()?;
    config.save(config_path)?;

    info!("Configuration saved to {:?}", config_path);
    info!("Message log: {:?}", config.store.path);
    info!("Set MSGVAULT_PASSPHRASE before appending; the built-in default is not secret.");
    Ok(())
}

async fn cmd_append(store: MessageStore, at: i64, text: String) -> Result<()> {
    let record = store.append(IncomingMessage::new(at, text)).await?;
    println!("Appended [{}] {}", record.iso_timestamp(), record.text);
    Ok(())
}

async fn cmd_show(store: MessageStore, summarizer: Option<CommandSummarizer>) -> Result<()> {
    let records = store.read_all().await;
    if records.is_empty() {
        println!("(log is empty)");
        return Ok(());
    }

    let text = match &summarizer {
        Some(summarizer) => transcript::summarize_or_render(summarizer, &records).await,
        None => transcript::render(&records),
    };
    println!("{}", text);
    Ok(())
}

async fn cmd_dump(store: MessageStore) -> Result<()> {
    let records = store.read_all().await;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn cmd_check(store: MessageStore) -> Result<()> {
    match store.load().await? {
        LogState::Absent => println!("No log at {:?}", store.path()),
        LogState::Loaded(records) => {
            println!("{:?}: {} records ({:?})", store.path(), records.len(), store.engine().scheme())
        }
    }
    Ok(())
}

async fn cmd_quarantine(store: MessageStore) -> Result<()> {
    if let LogState::Loaded(records) = store.load().await.unwrap_or(LogState::Absent) {
        warn!(
            "Log at {:?} is readable ({} records); moving it aside anyway",
            store.path(),
            records.len()
        );
    }

    match store.quarantine().await? {
        Some(dest) => println!("Moved {:?} to {:?}", store.path(), dest),
        None => println!("No log at {:?}", store.path()),
    }
    Ok(())
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
