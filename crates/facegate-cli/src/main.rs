use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{image_io, locator, OnnxLoader, SearchPlan, Threshold};
use serde::Serialize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod kiosk;
mod store;
#[cfg(test)]
mod testing;

use config::Config;
use kiosk::Kiosk;
use store::KioskStore;

#[derive(Parser)]
#[command(name = "facegate", about = "Kiosk face verification and identification")]
struct Cli {
    /// Acceptance threshold, overriding FACEGATE_THRESHOLD and the stored setting
    #[arg(long, global = true, value_parser = parse_threshold)]
    threshold: Option<Threshold>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show where the model files were found
    Locate,
    /// Load the models and report engine readiness
    Status,
    /// Compare two images (1:1)
    Verify {
        /// Reference image (path or file:// URI)
        reference: String,
        /// Probe image (path or file:// URI)
        probe: String,
    },
    /// Verify a probe against an enrolled work id and log the result
    Check {
        #[arg(long)]
        work_id: String,
        probe: String,
    },
    /// Search every enrolled user for each probe (1:N)
    Identify {
        #[arg(required = true)]
        probes: Vec<String>,
    },
    /// Report the face position in each frame
    Track {
        #[arg(required = true)]
        frames: Vec<String>,
    },
    /// Show recent access-log entries
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn parse_threshold(raw: &str) -> Result<Threshold, String> {
    Threshold::parse(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let plan = config.search_plan(&cwd);

    tracing::info!(
        app_dir = %config.app_dir.display(),
        db = %config.db_path.display(),
        "facegate starting"
    );

    let passed = match cli.command {
        Commands::Locate => locate(&plan)?,
        Commands::Logs { limit } => {
            let store = open_store(&config).await?;
            print_json(&store.recent_access(limit).await?)?;
            true
        }
        Commands::Status => {
            let kiosk = start_kiosk(cli.threshold, &config, plan).await?;
            print_json(&kiosk.status)?;
            kiosk.status.ready
        }
        Commands::Verify { reference, probe } => {
            let kiosk = start_kiosk(cli.threshold, &config, plan).await?;
            let outcome = kiosk
                .handle
                .verify(
                    image_io::resolve_path(&reference),
                    image_io::resolve_path(&probe),
                    kiosk.threshold,
                )
                .await?;
            print_json(&outcome)?;
            outcome.accepted()
        }
        Commands::Check { work_id, probe } => {
            let kiosk = start_kiosk(cli.threshold, &config, plan).await?;
            let report = kiosk.check(&work_id, &probe).await?;
            print_json(&report)?;
            report.accepted
        }
        Commands::Identify { probes } => {
            let kiosk = start_kiosk(cli.threshold, &config, plan).await?;
            let gallery = kiosk.store.gallery().await?;
            tracing::info!(enrolled = gallery.len(), "gallery loaded");
            let mut any_matched = false;
            for probe in probes {
                let outcome = kiosk.identify(&gallery, &probe).await?;
                any_matched |= outcome.matched().is_some();
                print_json(&outcome)?;
            }
            any_matched
        }
        Commands::Track { frames } => {
            let kiosk = start_kiosk(cli.threshold, &config, plan).await?;
            let mut any_present = false;
            for frame in frames {
                let outcome = kiosk.handle.track(image_io::resolve_path(&frame)).await?;
                any_present |= outcome.ready().is_some_and(|p| p.present);
                print_json(&outcome)?;
            }
            any_present
        }
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn locate(plan: &SearchPlan) -> Result<bool> {
    match locator::locate(plan) {
        Ok(bundle) => {
            print_json(&serde_json::json!({
                "directory": bundle.directory.display().to_string(),
                "detector": bundle.detector.display().to_string(),
                "landmarker": bundle.landmarker.display().to_string(),
                "recognizer": bundle.recognizer.display().to_string(),
                "found_by": format!("{:?}", bundle.found_by),
            }))?;
            Ok(true)
        }
        Err(e) => {
            tracing::error!(error = %e, "model discovery failed");
            print_json(&serde_json::json!({ "error": e.to_string() }))?;
            Ok(false)
        }
    }
}

async fn open_store(config: &Config) -> Result<KioskStore> {
    KioskStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))
}

/// Open the database, resolve the threshold and start the ONNX engine.
async fn start_kiosk(flag: Option<Threshold>, config: &Config, plan: SearchPlan) -> Result<Kiosk> {
    let store = open_store(config).await?;
    let threshold = resolve_threshold(flag, config, &store).await?;
    Kiosk::start(store, threshold, OnnxLoader::new(plan), config.queue_depth).await
}

/// Command-line flag, then `FACEGATE_THRESHOLD`, then the stored setting,
/// then the default. Invalid environment or stored values fall back to the default.
async fn resolve_threshold(
    flag: Option<Threshold>,
    config: &Config,
    store: &KioskStore,
) -> Result<Threshold> {
    if let Some(t) = flag {
        return Ok(t);
    }
    let raw = match &config.threshold {
        Some(raw) => Some(raw.clone()),
        None => store.setting(facegate_core::THRESHOLD_SETTING).await?,
    };
    let threshold = Threshold::from_setting(raw.as_deref());
    tracing::debug!(threshold = %threshold, "acceptance threshold");
    Ok(threshold)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
