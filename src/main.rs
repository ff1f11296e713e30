//! MediScan - Medicine packaging scanner
//!
//! Extracts structured medicine information (name, ingredients, quantity)
//! from photos of medicine packaging: region detection with geometric
//! fallback, language identification, multi-engine OCR, and heuristic field
//! extraction.

mod config;
mod extract;
mod imaging;
mod lang;
mod ocr;
mod pipeline;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::lang::LanguageTag;
use crate::pipeline::{Pipeline, ScanOutcome};
use crate::vision::ModelManager;

/// MediScan - structured extraction from medicine packaging photos
#[derive(Parser, Debug)]
#[command(name = "mediscan")]
#[command(about = "Extract medicine name, ingredients and quantity from packaging photos")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a single image
    Scan {
        /// Image file to process
        image: PathBuf,

        /// Draw the detection box and save it next to the input
        #[arg(long)]
        annotate: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Process every image in a batch directory, in file-name order
    Batch {
        /// Directory of images
        dir: PathBuf,

        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download the OCR models for all supported languages
    FetchModels,

    /// Remove stale files from a batch/upload directory
    Cleanup {
        /// Directory to clean
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_or_create_config(args.config.as_deref());

    match args.command {
        Command::Scan {
            image,
            annotate,
            json,
        } => run_scan(config, &image, annotate, json),
        Command::Batch { dir, json } => run_batch(config, &dir, json),
        Command::FetchModels => run_fetch_models(&config),
        Command::Cleanup { dir } => {
            let removed = storage::cleanup_stale(&dir, config.storage.retention_days);
            println!("Removed {removed} stale files from {}", dir.display());
            Ok(())
        }
    }
}

/// Load configuration from the given path, the platform config dir, or fall
/// back to defaults.
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    if let Some(path) = explicit {
        match config::load_config(path) {
            Ok(config) => {
                info!("loaded configuration from {path:?}");
                return config;
            }
            Err(e) => warn!("failed to load {path:?} ({e:#}), using defaults"),
        }
    } else if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("loaded configuration from {config_path:?}");
                return config;
            }
        }
    }

    info!("using default configuration");
    AppConfig::default()
}

fn run_scan(mut config: AppConfig, image: &Path, annotate: bool, json: bool) -> Result<()> {
    if annotate {
        config.detection.annotate = true;
    }

    let mut pipeline = Pipeline::new(config)?;
    let outcome = pipeline.process_one(image)?;

    if let Some(overlay) = &outcome.overlay {
        let overlay_path = image.with_file_name(format!("{}_detected.png", outcome.image_id));
        match overlay.save(&overlay_path) {
            Ok(()) => info!("saved detection overlay to {overlay_path:?}"),
            Err(e) => warn!("failed to save detection overlay: {e}"),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    Ok(())
}

fn run_batch(config: AppConfig, dir: &Path, json: bool) -> Result<()> {
    let mut pipeline = Pipeline::new(config)?;
    let outcomes = pipeline.process_batch(dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            print_outcome(outcome);
            println!();
        }
        println!("Processed {} images", outcomes.len());
    }

    Ok(())
}

fn run_fetch_models(config: &AppConfig) -> Result<()> {
    let models = match &config.ocr.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };

    let languages = [
        LanguageTag::TraditionalChinese,
        LanguageTag::SimplifiedChinese,
        LanguageTag::English,
        LanguageTag::Japanese,
        LanguageTag::Korean,
    ];
    models
        .ensure_ocr_models(&languages)
        .context("model download failed")?;

    println!("Models ready in {}", models.models_dir().display());
    Ok(())
}

fn print_outcome(outcome: &ScanOutcome) {
    println!("Image:      {}", outcome.image_id);
    println!("Language:   {}", outcome.language);
    println!(
        "Name:       {}",
        outcome.info.name.as_deref().unwrap_or("-")
    );
    if outcome.info.ingredients.is_empty() {
        println!("Ingredients: -");
    } else {
        println!("Ingredients:");
        for ingredient in &outcome.info.ingredients {
            println!("  - {ingredient}");
        }
    }
    println!(
        "Quantity:   {}",
        outcome.info.quantity.as_deref().unwrap_or("-")
    );
    println!("Confidence: {:.2}", outcome.info.confidence);
    if let Some(detection) = &outcome.detection {
        println!(
            "Detection:  ({}, {})-({}, {}) confidence {}",
            detection.x1,
            detection.y1,
            detection.x2,
            detection.y2,
            detection
                .confidence
                .map(|c| format!("{c:.2}"))
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!("Elapsed:    {}ms", outcome.elapsed_ms);
}
