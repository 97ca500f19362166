use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use regwalk::commands;
use regwalk::commands::app::{AppError, KeysRequest};
use regwalk::commands::render::OutputFormat;
use regwalk::config::{Config, ConfigError};
use regwalk::domain::Hive;
use std::io::Write as _;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the regwalk CLI binary.
#[derive(Debug, Error)]
enum RegwalkError {
    /// `--workers` was set to zero.
    #[error("--workers must be at least 1")]
    NoWorkers,

    /// Command orchestration failed.
    #[error(transparent)]
    App(#[from] AppError),

    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Command-line interface.
#[derive(Parser)]
#[command(name = "regwalk")]
#[command(
    about = "CLI to enumerate registry keys across local and remote machines",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Command to run.
    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List the subkeys of a key on one or more machines.
    Keys(KeysArgs),
    /// Show an orchestration job and the runbook instances it started.
    Job {
        /// Job id (a GUID).
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Orchestration web service URL (overrides `REGWALK_SERVICE_URL`).
        #[arg(long)]
        service_url: Option<String>,

        /// User for basic authentication; the password is read from `REGWALK_PASSWORD`.
        #[arg(long)]
        user: Option<String>,
    },
}

/// Arguments of the keys command.
#[derive(Args)]
struct KeysArgs {
    /// Key to enumerate, e.g. `SOFTWARE\Microsoft`.
    #[arg(value_name = "PATH")]
    path: String,

    /// Machines to query (defaults to the local machine).
    #[arg(short, long = "computer", value_name = "HOST", value_delimiter = ',')]
    computers: Vec<String>,

    /// Hive to open (`LocalMachine`, `HKLM`, `HKEY_LOCAL_MACHINE`, ...).
    #[arg(long, default_value_t = Hive::LocalMachine)]
    hive: Hive,

    /// Glob matched against subkey names, case-insensitively.
    #[arg(short, long, default_value = "*")]
    filter: String,

    /// Also enumerate every subkey below the matching ones.
    #[arg(short, long)]
    recurse: bool,

    /// Skip machines that do not answer a TCP connection attempt.
    #[arg(long)]
    ping: bool,

    /// Query several machines at the same time.
    #[arg(long)]
    parallel: bool,

    /// Number of machines queried at the same time with --parallel.
    #[arg(long, requires = "parallel")]
    workers: Option<usize>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Directory of `<host>.toml` registry snapshots read instead of the live registry
    /// (overrides `REGWALK_SNAPSHOT_DIR`).
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,
}

impl From<KeysArgs> for KeysRequest {
    fn from(args: KeysArgs) -> Self {
        Self {
            path: args.path,
            computers: args.computers,
            hive: args.hive,
            filter: args.filter,
            recurse: args.recurse,
            ping: args.ping,
            parallel: args.parallel,
            workers: args.workers,
            format: args.format,
            snapshot_dir: args.snapshot_dir,
        }
    }
}

/// Parse the command line and run the selected command.
fn main() -> Result<(), RegwalkError> {
    let cli = Cli::parse();

    init_logging(&cli);

    let cwd = std::env::current_dir()?;
    let mut config = Config::load(&cwd)?;

    match cli.command {
        Commands::Keys(args) => {
            if args.workers == Some(0) {
                return Err(RegwalkError::NoWorkers);
            }
            commands::app::keys(&config, &args.into())?;
        }
        Commands::Job {
            job_id,
            service_url,
            user,
        } => {
            if let Some(url) = service_url {
                config.orchestrator.service_url = Some(url);
            }
            if let Some(name) = user {
                config.orchestrator.user = Some(name);
            }
            commands::app::job(&config, &job_id)?;
        }
    }
    Ok(())
}

/// Initialize logging based on the verbosity level specified in the CLI.
fn init_logging(cli: &Cli) {
    let mut builder = env_logger::builder();
    builder
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .format(|buf, record| {
            let level = record.level();
            let style = &buf.default_level_style(level);
            writeln!(buf, "[{style}{level}{style:#}] {}", record.args())
        });

    if !cli.verbose {
        builder.format_timestamp(None);
    }

    builder.init();
}
