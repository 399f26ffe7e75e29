//! CLI entry point for Subframe Monitor
//!
//! Parses command line arguments, sets up logging and dispatches to the daemon.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use subframe_monitor::{
    format_exposure, format_hour, format_size, Config, Daemon, Registry, SessionSummary,
    WeightingFormula,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Subframe Monitor - measure, sort and upload astrophotography subframes
#[derive(Parser, Debug)]
#[command(name = "subframe-monitor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor until interrupted
    Run,

    /// Start a new, empty session and make it current
    NewSession {
        /// Session name; the registry is stored as `<dir>/<name>.json`
        name: String,

        /// Monitored directory, overriding the configuration
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Print the summary of a session
    Summary {
        /// Session file to read instead of the configured session
        #[arg(short, long)]
        session: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Weigh the frames of the current session and write the weights into the files
    Weigh {
        /// Weighting formula, overriding `[weighting] formula`
        #[arg(short, long)]
        formula: Option<String>,
    },

    /// Validate the configuration and exit
    CheckConfig,
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    // Ignore error if a subscriber is already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.json_logs);

    match dispatch(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Run => run(&args.config).await,
        Command::NewSession { name, dir } => new_session(&args.config, &name, dir),
        Command::Summary { session, json } => summary(&args.config, session.as_deref(), json),
        Command::Weigh { formula } => weigh(&args.config, formula).await,
        Command::CheckConfig => check_config(&args.config),
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "Subframe monitor starting");
    let mut daemon = Daemon::load(config_path).context("failed to initialize daemon")?;

    let cfg = daemon.config();
    info!(
        directory = ?cfg.monitor.directory_path,
        session = ?cfg.monitor.session_name,
        scanning = cfg.features.scanning,
        file_actions = cfg.features.file_actions,
        transfer = cfg.features.transfer,
        "Daemon initialized"
    );
    if cfg.status.enabled {
        info!(bind = %cfg.status.bind, "Status endpoint enabled");
    }

    daemon.run().await.context("daemon stopped with an error")?;
    info!("Subframe monitor stopped");
    Ok(())
}

fn load_config(path: &Path) -> Config {
    let (config, err) = Config::load_or_default(path);
    if let Some(e) = err {
        warn!(path = %path.display(), error = %e, "Using default configuration");
    }
    config
}

fn new_session(config_path: &Path, name: &str, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = load_config(config_path);
    if let Some(dir) = dir {
        config.monitor.directory_path = Some(dir);
    }

    let mut daemon = Daemon::from_config(config, Some(config_path.to_path_buf()))
        .context("invalid configuration")?;
    daemon.new_session(name)?;
    daemon.shutdown()?;

    println!("Started session {name}");
    Ok(())
}

fn summary(config_path: &Path, session: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path);

    let registry = match session {
        Some(path) => Registry::load_session_file(path)?.0,
        None => {
            let (Some(dir), Some(name)) = (
                config.monitor.directory_path.as_deref(),
                config.monitor.session_name.as_deref(),
            ) else {
                bail!("no session configured; pass --session or set [monitor] in the config");
            };
            Registry::try_load_session(dir, name)
                .with_context(|| format!("failed to read session {name}"))?
        }
    };

    let summary = SessionSummary::from_frames(registry.frames(), &config.thresholds);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{} frames: {} approved, {} rejected, {}, {}",
        summary.count,
        summary.approved,
        summary.rejected,
        format_size(summary.total_size),
        format_exposure(summary.total_exposure_secs),
    );
    println!(
        "avg FWHM {:.2}  ecc {:.2}  SNR {:.2}  PSF {:.2}",
        summary.averages.fwhm,
        summary.averages.eccentricity,
        summary.averages.snr,
        summary.averages.psf,
    );
    for (status, count) in &summary.by_status {
        println!("  {status}: {count}");
    }
    for group in &summary.groups {
        println!(
            "{} / {}: {} frames ({} approved), {}, FWHM {:.2}",
            group.object,
            group.filter,
            group.count,
            group.approved,
            format_exposure(group.total_exposure_secs),
            group.averages.fwhm,
        );
    }
    println!(
        "Upload window: {} to {}",
        format_hour(config.transfer.start_hour),
        format_hour(config.transfer.stop_hour),
    );
    Ok(())
}

async fn weigh(config_path: &Path, formula: Option<String>) -> anyhow::Result<()> {
    let config = load_config(config_path);
    let Some(source) = formula.or_else(|| config.weighting.formula.clone()) else {
        bail!("no weighting formula; pass --formula or set [weighting] formula in the config");
    };
    let formula = WeightingFormula::parse(&source)?;

    let mut daemon = Daemon::from_config(config, Some(config_path.to_path_buf()))
        .context("invalid configuration")?;
    if daemon.registry().is_empty() {
        bail!("current session has no frames");
    }

    let (computed, written) = daemon.weigh_frames(&formula).await;
    println!(
        "Weighed {} frames ({} skipped), wrote {} ({} skipped) as {}",
        computed.applied,
        computed.skipped,
        written.applied,
        written.skipped,
        daemon.config().keywords.weight,
    );
    Ok(())
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.validate()?;
    println!("{}: ok", config_path.display());
    Ok(())
}
