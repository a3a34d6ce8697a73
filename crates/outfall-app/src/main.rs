use std::process;

use inquire::{InquireError, Text};
use tracing::info_span;
use tracing_subscriber::filter::LevelFilter;
use uuid::Uuid;

use outfall_app::cli::{AuditArgs, CleanArgs, Cli, Commands, FetchArgs};
use outfall_app::config::{self, AppConfig};
use outfall_app::error::AppError;
use outfall_app::harvest::{self, HarvestError, NoDataMarkers, PreemptionHandler, Stage};
use outfall_app::logging;
use outfall_app::maintenance::{self, clean};
use outfall_app::paths::AppPaths;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);

    if let Err(err) = run(cli, log_level).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

async fn run(cli: Cli, log_level: LevelFilter) -> Result<(), AppError> {
    let Some(command) = cli.command else {
        Cli::print_help();
        return Ok(());
    };

    let config = config::load()?;
    let paths = AppPaths::new(&config.storage.data_dir)?;

    match command {
        Commands::FetchFacilities(args) => {
            run_fetch(&config, &paths, Stage::Facilities, args, log_level).await
        }
        Commands::FetchDmr(args) => run_fetch(&config, &paths, Stage::Dmr, args, log_level).await,
        Commands::Audit(args) => {
            logging::init(log_level, None, config.logging.max_log_files)?;
            run_audit(&config, &paths, args)
        }
        Commands::Clean(args) => {
            let log_dir = paths.log_dir()?;
            logging::init(log_level, Some(&log_dir), config.logging.max_log_files)?;
            run_clean(&config, &paths, args).await
        }
    }
}

async fn run_fetch(
    config: &AppConfig,
    paths: &AppPaths,
    stage: Stage,
    args: FetchArgs,
    log_level: LevelFilter,
) -> Result<(), AppError> {
    let log_dir = paths.log_dir()?;
    logging::init(log_level, Some(&log_dir), config.logging.max_log_files)?;

    let region = args.region;
    if !config.regions()?.contains(&region) {
        return Err(AppError::UnknownRegion { region });
    }

    let span = info_span!("harvest", stage = %stage, region = %region);
    let _preemption = PreemptionHandler::new(config.preemption.signal, span.clone())
        .install()
        .map_err(HarvestError::from)?;

    let throttle = harvest::configured_throttle(config);
    let summary = harvest::harvest_region(config, paths, stage, &region, throttle, span).await?;
    println!(
        "{stage} {region}: {} stored, {} quarantined, {} failed, {} already done",
        summary.stored,
        summary.quarantined,
        summary.failed,
        summary.already_done()
    );
    Ok(())
}

fn run_audit(config: &AppConfig, paths: &AppPaths, args: AuditArgs) -> Result<(), AppError> {
    let configured = config.regions()?;
    let regions = match args.region {
        Some(region) if configured.contains(&region) => vec![region],
        Some(region) => return Err(AppError::UnknownRegion { region }),
        None => configured,
    };

    let report = maintenance::audit(paths, &regions, config.years(), &config.listing.options());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

async fn run_clean(config: &AppConfig, paths: &AppPaths, args: CleanArgs) -> Result<(), AppError> {
    let markers = NoDataMarkers::new(config.service.no_data_markers.iter().cloned());
    let plan = clean::scan(paths, &markers).await?;
    if plan.is_empty() {
        println!("nothing to clean ({} artifacts scanned)", plan.scanned);
        return Ok(());
    }

    for entry in &plan.misclassified {
        println!("{} [{}] {}", entry.stage, entry.marker, entry.path.display());
    }
    for path in &plan.stale_temp_files {
        println!("stale temp file {}", path.display());
    }

    if args.dry_run {
        println!("dry run: {} files left in place", plan.pending());
        return Ok(());
    }
    if !args.yes {
        confirm_clean(plan.pending())?;
    }

    let summary = clean::apply(paths, &plan).await?;
    println!(
        "moved {} artifacts to {}, dropped {} checkpoint entries, removed {} temp files",
        summary.moved,
        paths.trash_dir().display(),
        summary.checkpoint_entries_removed,
        summary.temp_files_removed
    );
    Ok(())
}

fn confirm_clean(pending: usize) -> Result<(), AppError> {
    let token = generate_confirmation_token();
    debug_assert_eq!(token.len(), 8);
    let prompt_message = format!("Type `{token}` to clean {pending} files");
    let input = match Text::new(prompt_message.as_str())
        .with_placeholder("confirmation token")
        .with_help_message("Misclassified artifacts move to trash and their keys become pending.")
        .prompt()
    {
        Ok(value) => value,
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
            return Err(AppError::CleanConfirmationCancelled { pending });
        }
        Err(err) => {
            return Err(AppError::CleanPromptFailed { source: err });
        }
    };
    if input.trim() != token {
        return Err(AppError::CleanConfirmationRejected { pending });
    }
    Ok(())
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    let fetching = cli.command.as_ref().and_then(Commands::stage).is_some();
    match (fetching, cli.verbose) {
        (true, 0) => LevelFilter::INFO,
        (true, 1) => LevelFilter::DEBUG,
        (true, _) => LevelFilter::TRACE,
        (false, 0) => LevelFilter::WARN,
        (false, 1) => LevelFilter::INFO,
        (false, 2) => LevelFilter::DEBUG,
        (false, _) => LevelFilter::TRACE,
    }
}

fn generate_confirmation_token() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    let token: String = raw.chars().take(8).collect();
    debug_assert!(token.chars().all(|ch| ch.is_ascii_hexdigit()));
    token
}
