use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use openreview_harvester::app::App;
use openreview_harvester::config::{ConfigLoader, Credentials, ResolvedConfig};
use openreview_harvester::domain::VenueId;
use openreview_harvester::error::HarvestError;
use openreview_harvester::http::{RequestExecutor, ReqwestTransport};
use openreview_harvester::output::{JsonOutput, LogProgress};
use openreview_harvester::providers::{CurrentApi, LegacyApi, Providers};
use openreview_harvester::store::Store;

#[derive(Parser)]
#[command(name = "or-harvest")]
#[command(about = "Mirror OpenReview venues: papers, supplements and reviews")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./harvest.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[arg(long, global = true)]
    cache_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List every venue known upstream")]
    Venues,
    #[command(about = "Fetch (or load) the paper listing of one venue")]
    Listing(ListingArgs),
    #[command(about = "Download papers, supplements and reviews")]
    Harvest(HarvestArgs),
}

#[derive(Args)]
struct ListingArgs {
    venue: String,
}

#[derive(Args)]
struct HarvestArgs {
    venues: Vec<String>,

    /// Harvest every venue listed upstream
    #[arg(long, conflicts_with = "venues")]
    all: bool,

    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::VenueNotFound(_)
        | HarvestError::InvalidVenueId(_)
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidQuery(_) => 2,
        error if error.is_upstream() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir.into();
    }
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir.into();
    }
    if let Commands::Harvest(HarvestArgs {
        workers: Some(workers),
        ..
    }) = &cli.command
    {
        config.workers = *workers;
    }

    let app = build_app(&config)?;
    match cli.command {
        Commands::Venues => {
            let result = app.venues(&LogProgress)?;
            JsonOutput::print_venues(&result).into_diagnostic()?;
        }
        Commands::Listing(args) => {
            let venue: VenueId = args.venue.parse()?;
            let result = app.listing(&venue, &LogProgress)?;
            JsonOutput::print_listing(&result).into_diagnostic()?;
        }
        Commands::Harvest(args) => {
            let venues = if args.all {
                app.venues(&LogProgress)?.venues
            } else if !args.venues.is_empty() {
                args.venues
                    .iter()
                    .map(|venue| venue.parse())
                    .collect::<Result<Vec<VenueId>, HarvestError>>()?
            } else {
                app.table().venues().cloned().collect()
            };
            if venues.is_empty() {
                return Err(miette::Report::msg(
                    "no venues to harvest (pass venue ids, --all, or configure venues)",
                ));
            }
            let report = app.harvest(&venues, &LogProgress)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
    }
    Ok(())
}

fn build_app(config: &ResolvedConfig) -> Result<App<LegacyApi, CurrentApi>, HarvestError> {
    let transport = ReqwestTransport::new(Duration::from_secs(config.api.timeout_secs))?;
    let legacy = LegacyApi::new(
        config.api.v1_base_url.clone(),
        RequestExecutor::new(transport.clone(), config.retry.clone()),
    );
    let current = CurrentApi::new(
        config.api.v2_base_url.clone(),
        RequestExecutor::new(transport, config.retry.clone()),
    );

    match Credentials::from_env() {
        Some(credentials) => {
            legacy.session().login(&credentials)?;
            current.session().login(&credentials)?;
        }
        None => info!("no credentials in environment, continuing anonymously"),
    }

    let store = Store::new(config.data_dir.clone(), config.cache_dir.clone());
    Ok(App::new(
        store,
        Providers::new(legacy, current),
        config.venues.clone(),
        config.workers,
    ))
}
