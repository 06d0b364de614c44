//! Per-file and batch drivers.
//!
//! A file goes through parse → time reconstruction → geometry and pattern
//! detection → QC → assembly → sink. Files are independent, so
//! [`process_batch`] runs them in parallel and reports one result per file.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;

use crate::config::{ConfigError, ConfigTable, DistanceMode, PipelineConfig};
use crate::core::dataset::StandardizedDataset;
use crate::core::loaders::{load_scan_file, FormatError, RawHeader, ScanTable};
use crate::core::time::{reconstruct_times, seconds_since_first};
use crate::core::transforms::{beams_to_cartesian, intensity_to_snr, range_axes};
use crate::core::writers::{DatasetSink, OutputKey, WriteError};
use crate::processors::dataset::{detect_scan_kind, AssemblyError, AssemblyInputs, DatasetAssembler};
use crate::processors::qc_filter::{QcCriterion, QcFilterEngine, QcInputs};
use crate::processors::scan_pattern::ScanPatternDetector;

/// Any failure while processing one file.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Output identity supplied by the caller rather than read from the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    pub site: String,
    pub z_id: String,
    pub data_level: String,
}

impl Naming {
    pub fn new(
        site: impl Into<String>,
        z_id: impl Into<String>,
        data_level: impl Into<String>,
    ) -> Self {
        Self {
            site: site.into(),
            z_id: z_id.into(),
            data_level: data_level.into(),
        }
    }
}

/// Where each file's configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// The same configuration for every file.
    Single(PipelineConfig),
    /// Resolved per file name and date.
    Table(ConfigTable),
}

impl ConfigSource {
    pub fn resolve(&self, source: &Path) -> std::result::Result<&PipelineConfig, ConfigError> {
        match self {
            ConfigSource::Single(config) => Ok(config),
            ConfigSource::Table(table) => table.resolve(source),
        }
    }
}

/// Summary of one processed file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub source: PathBuf,
    pub key: OutputKey,
    pub beams: usize,
    pub gates: usize,
    pub directions: usize,
    pub repetitions: usize,
    pub retained: usize,
    pub rejected: usize,
    pub dynamic_rejected: usize,
    pub unevaluated: usize,
    pub outputs: Vec<PathBuf>,
}

/// A standardized scan with its output key and QC tallies.
#[derive(Debug, Clone)]
pub struct Standardized {
    pub key: OutputKey,
    pub dataset: StandardizedDataset,
    /// Samples carrying the dynamic-criterion bit.
    pub dynamic_rejected: usize,
    /// Samples that passed the hard criteria but sat in underflow bins.
    pub unevaluated_samples: usize,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Turn a parsed scan into a standardized dataset and its output key.
pub fn standardize(
    header: &RawHeader,
    table: &ScanTable,
    config: &PipelineConfig,
    naming: &Naming,
) -> std::result::Result<Standardized, AssemblyError> {
    let times = reconstruct_times(header.start_time.date(), &table.time_offsets());
    let ranges = range_axes(
        header.num_gates,
        header.range_gate_length_m,
        config.format.overlapping_distance,
    );
    let geometry_distance = match config.format.geometry_distance {
        DistanceMode::Native => &ranges.distance,
        DistanceMode::Overlapped => &ranges.distance_overlapped,
    };

    let azimuths = table.azimuths();
    let elevations = table.elevations();
    let geometry = beams_to_cartesian(geometry_distance, &azimuths, &elevations);
    let pattern = ScanPatternDetector::new(&config.pattern).detect(&azimuths, &elevations);

    let doppler = table.doppler_grid();
    let snr = intensity_to_snr(&table.intensity_grid());
    let time_s = seconds_since_first(&times);
    let qc = QcFilterEngine::new(&config.qc).apply(&QcInputs {
        wind_speed: &doppler,
        snr: &snr,
        distance: geometry_distance,
        time_s: &time_s,
        azimuth: &azimuths,
        elevation: &elevations,
        geometry: &geometry,
    });

    let scan_kind = detect_scan_kind(header);
    let key = OutputKey::new(
        naming.site.as_str(),
        naming.z_id.as_str(),
        naming.data_level.as_str(),
        header.start_time,
        &scan_kind,
    );

    let dataset = DatasetAssembler::new(naming.data_level.as_str(), key.datastream()).assemble(
        AssemblyInputs {
            header,
            table,
            times: &times,
            ranges: &ranges,
            geometry: &geometry,
            pattern: &pattern,
            snr: &snr,
            qc: &qc,
            scan_kind: &scan_kind,
        },
    )?;

    Ok(Standardized {
        key,
        dataset,
        dynamic_rejected: qc.count(QcCriterion::Dynamic),
        unevaluated_samples: qc.unevaluated_samples,
    })
}

/// Process one scan file and hand the result to `sink`.
///
/// # Arguments
///
/// * `path` - Raw `.hpl` scan file
/// * `config` - Validated pipeline configuration
/// * `naming` - Site, instrument slot and data level for the output key
/// * `sink` - Persistence target
///
/// # Errors
///
/// Any parse, assembly or write failure aborts this file without partial
/// output from the pipeline itself.
pub fn process_file(
    path: &Path,
    config: &PipelineConfig,
    naming: &Naming,
    sink: &dyn DatasetSink,
) -> Result<FileReport> {
    let name = file_name(path);
    let (header, table) = load_scan_file(path)?;
    log::info!(
        "{}: {} beams x {} gates, scan type '{}'",
        name,
        table.num_beams(),
        header.num_gates,
        header.scan_type
    );

    let Standardized {
        key,
        dataset,
        dynamic_rejected,
        unevaluated_samples,
    } = standardize(&header, &table, config, naming)?;
    let outputs = sink.write(&key, &dataset)?;

    let flags = &dataset.qc_wind_speed;
    let retained = flags.iter().filter(|&&f| f == 0).count();
    let report = FileReport {
        source: path.to_path_buf(),
        beams: dataset.num_beams(),
        gates: dataset.num_gates(),
        directions: dataset
            .beam_id
            .iter()
            .flatten()
            .max()
            .map_or(0, |&m| m + 1),
        repetitions: {
            let mut ids: Vec<usize> = dataset.scan_id.iter().flatten().copied().collect();
            ids.dedup();
            ids.len()
        },
        retained,
        rejected: flags.len() - retained,
        dynamic_rejected,
        unevaluated: unevaluated_samples,
        outputs,
        key,
    };

    log::info!(
        "{}: {} retained, {} rejected ({} dynamic), {} not evaluated",
        name,
        report.retained,
        report.rejected,
        report.dynamic_rejected,
        report.unevaluated
    );
    Ok(report)
}

/// Resolve the configuration for `path`, then process it.
///
/// Configuration is resolved before the file is opened.
pub fn process_with_source(
    path: &Path,
    configs: &ConfigSource,
    naming: &Naming,
    sink: &dyn DatasetSink,
) -> Result<FileReport> {
    let config = configs.resolve(path)?;
    process_file(path, config, naming, sink)
}

/// Process many files in parallel.
///
/// Results come back in input order, one per file; a failure in one file
/// does not affect the others.
pub fn process_batch(
    paths: &[PathBuf],
    configs: &ConfigSource,
    naming: &Naming,
    sink: &dyn DatasetSink,
) -> Vec<(PathBuf, Result<FileReport>)> {
    paths
        .par_iter()
        .map(|path| {
            let result = process_with_source(path, configs, naming, sink);
            if let Err(e) = &result {
                log::warn!("{}: {}", file_name(path), e);
            }
            (path.clone(), result)
        })
        .collect()
}
