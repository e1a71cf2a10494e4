use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cryptgrow::config::Settings;
use cryptgrow::extend::{Orchestrator, Outcome, TerminalPrompter};
use cryptgrow::system::{self, SystemServices};
use cryptgrow::{logging, ui};

/// Grow LVM-on-LUKS filesystems onto new or enlarged disks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to /etc/cryptgrow/config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print every mutating command instead of running it
    #[arg(long)]
    dry_run: bool,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match run(&cli) {
        Ok(outcome) => {
            tracing::info!("session ended: {outcome:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            ui::error(format!("{err:#}"));
            if let Some(path) = logging::log_path() {
                ui::error(format!("See {} for details.", path.display()));
            }
            ExitCode::FAILURE
        }
    };
    logging::shutdown();
    code
}

fn run(cli: &Cli) -> Result<Outcome> {
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            // Still leave a log behind; `main` reports the error into it.
            if let Err(log_err) = logging::init(&Settings::default().log_dir, cli.debug) {
                ui::warn(format!("Could not create a log file: {log_err:#}"));
            }
            return Err(err);
        }
    };

    if !cli.dry_run {
        system::ensure_root()?;
    }

    let log_path = logging::init(&settings.log_dir, cli.debug)?;
    tracing::info!(
        "{} {} starting (dry run: {})",
        logging::TOOL_NAME,
        env!("CARGO_PKG_VERSION"),
        cli.dry_run
    );
    tracing::debug!("settings: {settings:?}");

    if cli.dry_run {
        ui::warn("*** DRY RUN MODE ENABLED - No changes will be made ***");
    }
    ui::info(format!("Logging to {}", log_path.display()));

    let system = SystemServices::new(&settings, cli.dry_run);
    let mut prompter = TerminalPrompter::new();
    let mut orchestrator =
        Orchestrator::new(system.services(), &settings, &mut prompter, cli.dry_run);
    orchestrator.run()
}
