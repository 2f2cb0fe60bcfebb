//! Orchard Scan command-line tool.
//!
//! Analyzes single images, scans batches of images into a farm report and
//! inspects the disease signature registry.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use orchard_scan::farm::csv_reader::read_tree_log;
use orchard_scan::farm::{
    process_batch, write_export, AbortHandle, BatchImage, ExportFormat, FarmReport, FarmSession,
    FarmSummary, Location,
};
use orchard_scan::health::decode_image;
use orchard_scan::{log, paths, set_session_log, HealthAnalyzer, ScanConfig, SignatureRegistry};

/// File extensions picked up when a directory is passed to `scan`.
const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

#[derive(Parser)]
#[command(name = "orchard-scan")]
#[command(about = "Classical crop disease detection and farm health reports")]
#[command(version)]
struct Cli {
    /// Path to config.json (defaults to the one next to the executable).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one image and print its health report.
    Analyze {
        /// Crop type (e.g. apple, soybean).
        #[arg(long)]
        crop: String,

        /// Path to the image.
        #[arg(long)]
        image: PathBuf,

        /// Write the report (JSON) here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Write health_map.png and contour_map.png into this directory.
        #[arg(long)]
        maps_dir: Option<PathBuf>,
    },

    /// Scan a batch of images into a farm report.
    Scan {
        /// Crop type (defaults to farm.crop_type from the config).
        #[arg(long)]
        crop: Option<String>,

        /// Image files or directories of images.
        #[arg(long, num_args = 1.., required = true)]
        images: Vec<PathBuf>,

        /// JSON object mapping image file names to {"x": .., "y": ..}.
        #[arg(long)]
        locations: Option<PathBuf>,

        /// Export format: json or csv.
        #[arg(long, default_value = "json")]
        format: String,

        /// Export path (defaults to output/<mission_id>.<format>).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Recompute the farm summary from an exported CSV.
    Summarize {
        /// Path to the exported CSV.
        #[arg(long)]
        csv: PathBuf,
    },

    /// List registered disease signatures.
    Signatures {
        /// Only list this crop.
        #[arg(long)]
        crop: Option<String>,
    },

    /// Write the default config.json for editing.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Set up panic hook to log panics
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        eprintln!("[PANIC]{} {}", location, msg);
        log(&format!("[PANIC]{} {}", location, msg));
    }));

    let cli = Cli::parse();

    // Ensure output directories exist
    paths::ensure_directories()?;

    let config_path = cli.config.unwrap_or_else(paths::get_config_path);
    let config = ScanConfig::load(&config_path);

    match cli.command {
        Commands::Analyze {
            crop,
            image,
            out,
            maps_dir,
        } => run_analyze(&config, &crop, &image, out.as_deref(), maps_dir.as_deref()),
        Commands::Scan {
            crop,
            images,
            locations,
            format,
            out,
        } => {
            let crop = crop.unwrap_or_else(|| config.farm.crop_type.clone());
            run_scan(&config, &crop, &images, locations.as_deref(), &format, out)
        }
        Commands::Summarize { csv } => run_summarize(&csv),
        Commands::Signatures { crop } => run_signatures(&config, crop.as_deref()),
        Commands::InitConfig { force } => run_init_config(&config_path, force),
    }
}

/// Built-in registry, or the JSON file named in the config.
fn load_registry(config: &ScanConfig) -> Result<SignatureRegistry> {
    match &config.detection.signatures_path {
        Some(path) => SignatureRegistry::load(path)
            .with_context(|| format!("Failed to load signatures from {}", path.display())),
        None => Ok(SignatureRegistry::builtin()),
    }
}

fn run_analyze(
    config: &ScanConfig,
    crop: &str,
    image_path: &Path,
    out: Option<&Path>,
    maps_dir: Option<&Path>,
) -> Result<()> {
    let registry = Arc::new(load_registry(config)?);
    let analyzer = HealthAnalyzer::classical(registry, config);

    let bytes = fs::read(image_path)
        .with_context(|| format!("Failed to read image: {}", image_path.display()))?;
    let image = decode_image(&bytes)
        .with_context(|| format!("Failed to decode image: {}", image_path.display()))?;
    let analysis = analyzer.analyze(&image, crop)?;

    log(&format!(
        "{}: health {:.1} ({}), {} detections",
        image_path.display(),
        analysis.report.overall_health,
        analysis.report.status,
        analysis.report.total_detections
    ));

    if let Some(dir) = maps_dir {
        fs::create_dir_all(dir).context("Failed to create maps directory")?;
        let (health_map, contour_map) = analyzer.render_layers(&image, &analysis.report);
        if let Some(img) = health_map {
            img.save(dir.join("health_map.png"))
                .context("Failed to save health map")?;
        }
        if let Some(img) = contour_map {
            img.save(dir.join("contour_map.png"))
                .context("Failed to save contour map")?;
        }
        log(&format!("Saved maps to {}", dir.display()));
    }

    let json = serde_json::to_string_pretty(&analysis).context("Failed to serialize report")?;
    match out {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            log(&format!("Report written to {}", path.display()));
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Expands directories into the image files they contain, sorted by name.
fn collect_images(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("Failed to read directory: {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
                })
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

#[derive(Deserialize)]
struct LocationEntry {
    x: f64,
    y: f64,
}

fn load_locations(path: &Path) -> Result<HashMap<String, Location>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read locations: {}", path.display()))?;
    let entries: HashMap<String, LocationEntry> =
        serde_json::from_str(&content).context("Failed to parse locations JSON")?;
    Ok(entries
        .into_iter()
        .map(|(name, e)| (name, Location::new(e.x, e.y)))
        .collect())
}

fn run_scan(
    config: &ScanConfig,
    crop: &str,
    inputs: &[PathBuf],
    locations: Option<&Path>,
    format: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let format = ExportFormat::parse(format)?;
    let registry = Arc::new(load_registry(config)?);
    let analyzer = HealthAnalyzer::classical(Arc::clone(&registry), config);
    let locations = match locations {
        Some(path) => load_locations(path)?,
        None => HashMap::new(),
    };

    let mut batch = Vec::new();
    for path in collect_images(inputs)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log(&format!("Skipping {}: {}", path.display(), e));
                continue;
            }
        };
        batch.push(BatchImage {
            location: locations.get(&name).copied(),
            name,
            bytes,
        });
    }

    let session = FarmSession::new(crop, config.farm.synthetic_row_length);
    let mission_id = session.mission_id()?;
    set_session_log(Some(paths::get_output_dir().join(format!("{}.log", mission_id))));

    let result = process_batch(
        &analyzer,
        &session,
        crop,
        &batch,
        config.batch.workers,
        &AbortHandle::new(),
    );
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            set_session_log(None);
            return Err(anyhow!("Scan failed: {}", e));
        }
    };
    for error in &outcome.errors {
        eprintln!("{}: {}", error.name, error.message);
    }

    let report = FarmReport::generate(&session.snapshot()?, registry.crop(crop).ok(), &config.render);
    let out = out.unwrap_or_else(|| {
        paths::get_output_dir().join(format!("{}.{}", mission_id, format.extension()))
    });
    let written = write_export(&report, format, &out);
    set_session_log(None);
    written?;

    let summary = &report.farm_summary;
    println!(
        "{} trees, {} healthy, {} diseased, average health {:.1}, {:.1}% healthy -> {}",
        summary.total_trees,
        summary.healthy_trees,
        summary.diseased_trees,
        summary.average_health_score,
        summary.health_percentage,
        out.display()
    );
    Ok(())
}

fn run_summarize(csv: &Path) -> Result<()> {
    let records = read_tree_log(csv)?;
    let summary = FarmSummary::from_records(&records);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
    );
    Ok(())
}

fn run_signatures(config: &ScanConfig, crop: Option<&str>) -> Result<()> {
    let registry = load_registry(config)?;
    let crops: Vec<String> = match crop {
        Some(c) => vec![registry.crop(c)?.crop().to_string()],
        None => registry.crop_names().map(str::to_string).collect(),
    };

    for name in crops {
        let signatures = registry.crop(&name)?;
        println!("{}", name);
        for sig in signatures.signatures() {
            println!(
                "  {:<18} area>={:<4} conf>={:.2}{}  {}",
                sig.disease_label,
                sig.min_region_area,
                sig.confidence_threshold,
                if sig.healthy { " (healthy)" } else { "" },
                sig.description
            );
        }
    }
    Ok(())
}

fn run_init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        ));
    }
    ScanConfig::save_default(config_path)
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
    log(&format!("Default config written to {}", config_path.display()));
    Ok(())
}
