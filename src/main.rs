//! Binary entry point for moodscan.
//!
//! This binary serves the emotion detection API and offers one-shot local
//! analysis.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use moodscan::config::MoodscanConfig;
use moodscan::http::InBand;
use moodscan::observability::{self, InitOptions};
use moodscan::{EmotionDetector, HttpServer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Moodscan - facial emotion detection service.
#[derive(Parser)]
#[command(name = "moodscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server.
    Serve {
        /// Bind host.
        #[arg(long)]
        host: Option<String>,

        /// Bind port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds a request waits for its classification.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Analyze a local image once and print the result as JSON.
    Analyze {
        /// Image file to analyze.
        image: PathBuf,
    },

    /// Show configuration.
    Config {
        /// Show current configuration.
        #[arg(long)]
        show: bool,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match MoodscanConfig::load(cli.config.as_deref()) {
        Ok(config) => config.with_env_overrides(),
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let expose_metrics = matches!(cli.command, Commands::Serve { .. });
    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: expose_metrics,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(
    command: Commands,
    config: MoodscanConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Serve {
            host,
            port,
            timeout_secs,
        } => cmd_serve(config, host, port, timeout_secs).await,

        Commands::Analyze { image } => cmd_analyze(&config, image).await,

        Commands::Config { show } => {
            cmd_config(&config, show);
            Ok(())
        },
    }
}

async fn cmd_serve(
    mut config: MoodscanConfig,
    host: Option<String>,
    port: Option<u16>,
    timeout_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(host) = host {
        config = config.with_host(host);
    }
    if let Some(port) = port {
        config = config.with_port(port);
    }
    if let Some(secs) = timeout_secs {
        config = config.with_detection_timeout(Duration::from_secs(secs));
    }

    HttpServer::from_config(&config)?.serve().await?;
    Ok(())
}

async fn cmd_analyze(
    config: &MoodscanConfig,
    image: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(&image).map_err(|e| format!("{}: {e}", image.display()))?;
    let detector = EmotionDetector::from_config(config)?;

    let (payload, outcome) = match detector.detect(bytes).await {
        Ok(result) => (InBand::Ok(result), Ok(())),
        Err(e) => (
            InBand::Error {
                error: e.to_string(),
            },
            Err(moodscan::Error::from(e)),
        ),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    outcome.map_err(Into::into)
}

fn cmd_config(config: &MoodscanConfig, show: bool) {
    if !show {
        println!("Use --show to display configuration");
        return;
    }

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("Server:");
    println!("  Host: {}", config.server.host);
    println!("  Port: {}", config.server.port);
    println!("  Max Upload Bytes: {}", config.server.max_upload_bytes);
    println!();
    println!("Detection:");
    println!("  Timeout: {}s", config.detection.timeout.as_secs());
    println!("  Workers: {}", config.detection.workers);
    println!("  Detector Backend: {}", config.detection.detector_backend);
    println!("  Enforce Detection: {}", config.detection.enforce_detection);
    println!();
    println!("Classifier:");
    println!(
        "  Command: {}",
        config.classifier.command.as_deref().unwrap_or("(not configured)")
    );
    println!("  Args: {:?}", config.classifier.args);
    println!();
    println!("Artifacts:");
    println!(
        "  Directory: {}",
        config
            .artifacts
            .dir
            .as_ref()
            .map_or_else(|| "(system temp dir)".to_string(), |d| d.display().to_string())
    );
    println!("  Prefix: {}", config.artifacts.prefix);
    println!("  Suffix: {}", config.artifacts.suffix);
}
