use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use portal_sync::config::{ConfigLoader, ResolvedConfig};
use portal_sync::error::SyncError;
use portal_sync::logging::{REFRESH_LOG_FILE, SCAN_LOG_FILE, TaskLog};
use portal_sync::output::{HumanOutput, JsonOutput, OutputMode};
use portal_sync::refresh::{REFRESH_TASK, RefreshOptions, RefreshSummary, RegistryRefresher};
use portal_sync::scan::{DatasetScanner, SCAN_TASK, ScanReport};
use portal_sync::store::DescriptorCache;
use portal_sync::task::{self, Outcome, TaskStatus};
use portal_sync::zenodo::ZenodoHttpClient;

#[derive(Parser)]
#[command(name = "portal-sync")]
#[command(about = "Refresh the descriptor cache and scan dataset folders for a data portal")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Pull every registry descriptor into the local cache")]
    Refresh(RefreshArgs),
    #[command(about = "Read dataset ids and annex UUIDs from project folders")]
    Scan(ScanArgs),
    #[command(about = "Run refresh and scan side by side")]
    Run(RunArgs),
}

#[derive(Args, Clone)]
struct RefreshArgs {
    #[arg(long)]
    cache_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    force: bool,
}

#[derive(Args, Clone)]
struct ScanArgs {
    root: Option<Utf8PathBuf>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    refresh: RefreshArgs,

    #[arg(long)]
    datasets_dir: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<SyncError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::ConfigRead(_) | SyncError::ConfigParse(_) => 2,
        err if err.is_remote() => 3,
        _ => 1,
    }
}

fn status_exit_code<T>(outcome: &Outcome<T>) -> u8 {
    match outcome.status() {
        TaskStatus::Succeeded => 0,
        TaskStatus::Partial => 4,
        TaskStatus::Cancelled => 130,
        TaskStatus::Failed => outcome.error().map(map_exit_code).unwrap_or(1),
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    let code = match cli.command {
        Commands::Refresh(args) => {
            let refresher = build_refresher(&config, &args)?;
            let outcome = task::spawn(refresher)?.join();
            print_refresh(&outcome, output_mode)?;
            status_exit_code(&outcome)
        }
        Commands::Scan(args) => {
            let scanner = build_scanner(&config, args.root)?;
            let outcome = task::spawn(scanner)?.join();
            print_scan(&outcome, output_mode)?;
            status_exit_code(&outcome)
        }
        Commands::Run(args) => {
            let refresher = build_refresher(&config, &args.refresh)?;
            let scanner = build_scanner(&config, args.datasets_dir)?;
            let refresh_handle = task::spawn(refresher)?;
            let scan_handle = task::spawn(scanner)?;
            tracing::debug!(
                refresh = refresh_handle.name(),
                scan = scan_handle.name(),
                "tasks started"
            );
            let refresh_outcome = refresh_handle.join();
            let scan_outcome = scan_handle.join();
            print_refresh(&refresh_outcome, output_mode)?;
            print_scan(&scan_outcome, output_mode)?;
            status_exit_code(&refresh_outcome).max(status_exit_code(&scan_outcome))
        }
    };

    Ok(ExitCode::from(code))
}

fn build_refresher(
    config: &ResolvedConfig,
    args: &RefreshArgs,
) -> miette::Result<RegistryRefresher<ZenodoHttpClient>> {
    let registry = ZenodoHttpClient::new(&config.registry)?;
    let cache_dir = args
        .cache_dir
        .clone()
        .unwrap_or_else(|| config.cache_dir.clone());
    let mut options = RefreshOptions::from(&config.registry);
    options.force |= args.force;
    let log = TaskLog::file(&config.log_dir, REFRESH_LOG_FILE)?;
    Ok(RegistryRefresher::new(
        registry,
        DescriptorCache::new(cache_dir),
        options,
        log,
    ))
}

fn build_scanner(
    config: &ResolvedConfig,
    root: Option<Utf8PathBuf>,
) -> miette::Result<DatasetScanner> {
    let root = root.unwrap_or_else(|| config.datasets_dir.clone());
    let log = TaskLog::file(&config.log_dir, SCAN_LOG_FILE)?;
    Ok(DatasetScanner::new(root, log))
}

fn print_refresh(outcome: &Outcome<RefreshSummary>, mode: OutputMode) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print_refresh(REFRESH_TASK, outcome).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_refresh(REFRESH_TASK, outcome);
            Ok(())
        }
    }
}

fn print_scan(outcome: &Outcome<ScanReport>, mode: OutputMode) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print_scan(SCAN_TASK, outcome).into_diagnostic(),
        OutputMode::Human => {
            HumanOutput::print_scan(SCAN_TASK, outcome);
            Ok(())
        }
    }
}
