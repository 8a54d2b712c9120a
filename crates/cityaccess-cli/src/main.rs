use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cityaccess_cli::commands::fetch::{handle_fetch, FetchArgs};
use cityaccess_cli::commands::init::handle_init;
use cityaccess_cli::commands::prefilter::handle_prefilter;
use cityaccess_cli::commands::run::handle_run;
use cityaccess_cli::commands::score::{handle_score, ScoreArgs};
use cityaccess_cli::commands::load_config;
use cityaccess_cli::logging::{init_logging, LogFormat, LoggingConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Walking-accessibility scoring and funding allocation")]
struct Cli {
    /// SQLite store holding every pipeline table.
    #[arg(long, global = true, default_value = "cityaccess.db")]
    db: PathBuf,

    /// JSON configuration file; `CITYACCESS_*` variables and flags override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (overrides `LOG_FORMAT`).
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the store schema and import origin, destination and contract CSVs.
    Init {
        #[arg(long)]
        origins: PathBuf,
        #[arg(long)]
        destinations: PathBuf,
        #[arg(long)]
        contracts: Option<PathBuf>,
    },
    /// Compute straight-line distances for every origin × destination pair.
    Prefilter,
    /// Query the routing service for travel durations of nearby pairs.
    Fetch(FetchArgs),
    /// Score every origin and allocate investment.
    Score(ScoreArgs),
    /// Prefilter, fetch and score in one go.
    Run {
        #[command(flatten)]
        fetch: FetchArgs,
        #[command(flatten)]
        score: ScoreArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig::from_env().with_format(cli.log_format));

    let mut config = load_config(cli.config.as_deref())?;
    match &cli.command {
        Command::Fetch(args) => args.apply(&mut config),
        Command::Score(args) => args.apply(&mut config),
        Command::Run { fetch, score } => {
            fetch.apply(&mut config);
            score.apply(&mut config);
        }
        Command::Init { .. } | Command::Prefilter => {}
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Init {
            origins,
            destinations,
            contracts,
        } => handle_init(&cli.db, &origins, &destinations, contracts.as_deref()),
        Command::Prefilter => handle_prefilter(&cli.db, &config),
        Command::Fetch(_) => handle_fetch(&cli.db, &config),
        Command::Score(_) => handle_score(&cli.db, &config),
        Command::Run { .. } => handle_run(&cli.db, &config),
    }
}
