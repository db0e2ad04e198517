//! erpcache operator CLI
//!
//! Runs the calibration workflows against a live ERP web service and shows the
//! resulting cache configuration.
//!
//! ```text
//! erpcache diagnose          probe every operation, print a JSON report
//! erpcache auto-configure    calibrate TTLs, print the report and new settings
//! erpcache show-config       print the effective cache settings
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use erpcache::calibration::{AutoConfigOptions, HttpProbeConfig, DEFAULT_SESSION_CANDIDATES};
use erpcache::{AutoConfigurator, CacheManager, CacheSettings, HttpLatencyProbe, TtlCalibrator};

// =============================================================================
// CLI Arguments
// =============================================================================

/// erpcache - Response cache manager for the ERP web service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache settings file (YAML, nested under `cache:`)
    #[arg(long, env = "ERPCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// ERP web-service base URL
    #[arg(
        long,
        env = "ERP_URL",
        default_value = "http://localhost:8000/WcfServiceLibraryVerial"
    )]
    erp_url: String,

    /// Session identifiers to try, in priority order
    #[arg(long, env = "ERP_SESSIONS", value_delimiter = ',')]
    sessions: Vec<u32>,

    /// Per-probe timeout in seconds
    #[arg(long, env = "PROBE_TIMEOUT_SECONDS", default_value = "15")]
    probe_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every catalogued operation and report connectivity
    Diagnose,
    /// Measure latency and recalibrate operation TTLs
    AutoConfigure {
        /// Write the calibrated settings to this YAML file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the effective cache settings
    ShowConfig {
        #[arg(long, value_enum, default_value = "yaml")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Yaml,
    Pairs,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let settings = load_settings(&args)?;

    match &args.command {
        Command::Diagnose => {
            let configurator = configurator(&args)?;
            let report = configurator.diagnose().await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.all_healthy() {
                warn!(
                    failed = report.failed,
                    session = ?report.session,
                    "upstream not fully reachable"
                );
                std::process::exit(1);
            }
        }
        Command::AutoConfigure { output } => {
            let manager = CacheManager::new(settings).context("invalid cache settings")?;
            let configurator = configurator(&args)?;

            let report = manager
                .auto_configure_all(&configurator)
                .await
                .context("auto-configuration failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            let calibrated = manager.export_settings();
            for (key, value) in calibrated.to_pairs() {
                println!("{} = {}", key, value);
            }

            if let Some(path) = output {
                std::fs::write(path, calibrated.to_yaml()?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "calibrated settings written");
            }
        }
        Command::ShowConfig { format } => match format {
            OutputFormat::Yaml => print!("{}", settings.to_yaml()?),
            OutputFormat::Pairs => {
                for (key, value) in settings.to_pairs() {
                    println!("{} = {}", key, value);
                }
            }
        },
    }

    Ok(())
}

fn load_settings(args: &Args) -> Result<CacheSettings> {
    match &args.config {
        Some(path) => {
            let settings = CacheSettings::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            info!(path = %path.display(), "loaded cache settings");
            Ok(settings)
        }
        None => Ok(CacheSettings::default()),
    }
}

fn configurator(args: &Args) -> Result<AutoConfigurator> {
    let probe_timeout = Duration::from_secs(args.probe_timeout_secs);
    let probe = HttpLatencyProbe::new(HttpProbeConfig {
        base_url: args.erp_url.clone(),
        timeout: probe_timeout,
        ..Default::default()
    })?;

    let session_candidates = if args.sessions.is_empty() {
        DEFAULT_SESSION_CANDIDATES.to_vec()
    } else {
        args.sessions.clone()
    };

    info!("ERP URL: {}", args.erp_url);
    info!("  Session candidates: {:?}", session_candidates);
    info!("  Probe timeout: {}s", args.probe_timeout_secs);

    Ok(AutoConfigurator::new(
        probe,
        TtlCalibrator::default(),
        AutoConfigOptions {
            session_candidates,
            probe_timeout,
            ..Default::default()
        },
    ))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Reports go to stdout; logs stay on stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
