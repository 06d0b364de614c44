//! Command-line interface for the lidar pipeline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{ConfigTable, PipelineConfig};
use crate::core::loaders::load_scan_file;
use crate::core::writers::DirectorySink;
use crate::processors::pipeline::{process_batch, ConfigSource, Naming};
use crate::processors::scan_pattern::ScanPatternDetector;

#[derive(Parser)]
#[command(name = "lidar-pipeline")]
#[command(about = "Scanning Doppler lidar formatting and QC pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to YAML rule table selecting a config per file (overrides --config)
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format, QC and write one or more .hpl scan files
    Process {
        /// Scan files or directories containing .hpl files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,
        /// Site short name used in output file names
        #[arg(long)]
        site: String,
        /// Instrument slot at the site
        #[arg(long, default_value = "01")]
        z_id: String,
        /// Output data level
        #[arg(long, default_value = "b0")]
        data_level: String,
        /// Overwrite existing outputs
        #[arg(long)]
        replace: bool,
    },

    /// Detect and print the scan pattern of one file
    Pattern {
        /// Input .hpl file
        file: PathBuf,
    },

    /// Validate configuration and optionally show which rule each file matches
    CheckConfig {
        /// Files to resolve against the rule table
        files: Vec<PathBuf>,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Configuration problems abort before any file is read.
    let configs = match load_configs(cli.config.as_deref(), cli.rules.as_deref()) {
        Ok(configs) => configs,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let outcome = match cli.command {
        Commands::Process {
            inputs,
            output_dir,
            site,
            z_id,
            data_level,
            replace,
        } => {
            let naming = Naming::new(site, z_id, data_level);
            cmd_process(&inputs, &output_dir, &naming, replace, &configs)
        }
        Commands::Pattern { file } => cmd_pattern(&file, &configs),
        Commands::CheckConfig { files } => cmd_check_config(&files, &configs),
    };

    if let Err(e) = outcome {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn load_configs(config: Option<&Path>, rules: Option<&Path>) -> anyhow::Result<ConfigSource> {
    if let Some(path) = rules {
        let table = ConfigTable::from_yaml(path)
            .with_context(|| format!("failed to load rule table {}", path.display()))?;
        info!("Loaded {} config rule(s) from: {}", table.rules.len(), path.display());
        return Ok(ConfigSource::Table(table));
    }
    match config {
        Some(path) => {
            let cfg = PipelineConfig::from_yaml(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            info!("Loaded config from: {}", path.display());
            Ok(ConfigSource::Single(cfg))
        }
        None => Ok(ConfigSource::Single(PipelineConfig::default())),
    }
}

/// Expand directories to their `.hpl` files, sorted by name.
fn collect_inputs(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("failed to read directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("hpl"))
                })
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        bail!("no .hpl files found in the given inputs");
    }
    Ok(files)
}

fn cmd_process(
    inputs: &[PathBuf],
    output_dir: &Path,
    naming: &Naming,
    replace: bool,
    configs: &ConfigSource,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let files = collect_inputs(inputs)?;

    println!("Processing {} scan file(s)...", files.len());
    println!("Output directory: {}", output_dir.display());

    let sink = DirectorySink::new(output_dir, replace);
    let spinner = create_spinner("Formatting and quality-controlling scans...");
    let results = process_batch(&files, configs, naming, &sink);
    spinner.finish_and_clear();

    let mut succeeded = 0;
    let mut retained = 0;
    let mut rejected = 0;
    let mut unevaluated = 0;
    for (path, result) in &results {
        match result {
            Ok(report) => {
                succeeded += 1;
                retained += report.retained;
                rejected += report.rejected;
                unevaluated += report.unevaluated;
                info!("{} -> {}", path.display(), report.key.file_stem());
            }
            Err(e) => error!("{}: {}", path.display(), e),
        }
    }
    let failed = results.len() - succeeded;

    print_summary(
        "Processing Complete",
        &[
            ("Output directory", output_dir.display().to_string()),
            ("Files processed", succeeded.to_string()),
            ("Files failed", failed.to_string()),
            ("Samples retained", retained.to_string()),
            ("Samples rejected", rejected.to_string()),
            ("Not evaluated", unevaluated.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    if failed > 0 {
        bail!("{} of {} file(s) failed", failed, results.len());
    }
    Ok(())
}

fn cmd_pattern(file: &Path, configs: &ConfigSource) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = configs.resolve(file)?;

    let spinner = create_spinner("Detecting scan pattern...");
    let (header, table) =
        load_scan_file(file).with_context(|| format!("failed to load {}", file.display()))?;
    let pattern =
        ScanPatternDetector::new(&config.pattern).detect(&table.azimuths(), &table.elevations());
    spinner.finish_and_clear();

    for (id, direction) in pattern.directions.iter().enumerate() {
        println!(
            "beam {:>3}: azimuth {:>8.3}  elevation {:>7.3}  ({} beams)",
            id, direction.azimuth, direction.elevation, direction.count
        );
    }

    print_summary(
        "Scan Pattern",
        &[
            ("Input file", file.display().to_string()),
            ("Scan type", header.scan_type.clone()),
            ("Beams", table.num_beams().to_string()),
            ("Directions", pattern.directions.len().to_string()),
            ("Repetitions", pattern.num_repetitions().to_string()),
            ("Settling beams", pattern.selected.len().to_string()),
            ("Unresolved beams", pattern.unresolved_beams().to_string()),
            ("angle_tolerance", config.pattern.angle_tolerance.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_check_config(files: &[PathBuf], configs: &ConfigSource) -> anyhow::Result<()> {
    let mut items = vec![(
        "Source",
        match configs {
            ConfigSource::Single(_) => "single config".to_string(),
            ConfigSource::Table(table) => format!("rule table ({} rules)", table.rules.len()),
        },
    )];

    let mut unresolved = 0;
    for file in files {
        match configs.resolve(file) {
            Ok(config) => {
                let yaml = serde_yaml::to_string(config)?;
                println!("# {}\n{}", file.display(), yaml);
            }
            Err(e) => {
                unresolved += 1;
                error!("{}: {}", file.display(), e);
            }
        }
    }
    items.push(("Files resolved", (files.len() - unresolved).to_string()));
    items.push(("Files unresolved", unresolved.to_string()));

    print_summary("Configuration Valid", &items);

    if unresolved > 0 {
        bail!("{} file(s) have no unique configuration", unresolved);
    }
    Ok(())
}
