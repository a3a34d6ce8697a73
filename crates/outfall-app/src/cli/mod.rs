pub mod validators;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

use crate::harvest::key::{RegionCode, Stage};

/// Top-level CLI entry point.
#[derive(Debug, Default, Parser)]
#[command(
    name = "outfall",
    version,
    author,
    about = "Resumable bulk downloader for EPA ECHO discharge-monitoring data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download yearly facility listings for one region.
    FetchFacilities(FetchArgs),
    /// Download monitoring records for every permit in a region's listings.
    FetchDmr(FetchArgs),
    /// Report keys that have no stored artifact yet.
    Audit(AuditArgs),
    /// Move success artifacts that actually hold a no-data reply to trash.
    Clean(CleanArgs),
}

impl Commands {
    /// Stage driven by a fetch command.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Commands::FetchFacilities(_) => Some(Stage::Facilities),
            Commands::FetchDmr(_) => Some(Stage::Dmr),
            Commands::Audit(_) | Commands::Clean(_) => None,
        }
    }
}

/// Fetch one stage for one region.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Two-letter region code, e.g. OH.
    #[arg(value_name = "REGION", value_parser = validators::validate_region)]
    pub region: RegionCode,
}

/// Report missing artifacts.
#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Restrict the report to one region.
    #[arg(long, value_name = "REGION", value_parser = validators::validate_region)]
    pub region: Option<RegionCode>,
    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Clean misclassified artifacts.
#[derive(Debug, Args)]
pub struct CleanArgs {
    /// List what would be moved without touching anything.
    #[arg(long)]
    pub dry_run: bool,
    /// Skip the confirmation prompt.
    #[arg(long, short = 'y')]
    pub yes: bool,
}
