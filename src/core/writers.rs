//! Persistence of standardized datasets.
//!
//! The pipeline hands every finished dataset to a [`DatasetSink`]. The
//! shipped [`DirectorySink`] writes two files per dataset:
//! - `<key>.csv` with one row per (beam, gate) sample
//! - `<key>.yaml` with dimensions, variable attributes and global attributes
//!
//! `<key>` is built by [`OutputKey::file_stem`].

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

use super::dataset::{Attributes, ScanKind, StandardizedDataset};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create the output directory.
    #[error("failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Attribute sidecar serialization error.
    #[error("YAML write error for '{path}': {source}")]
    YamlError {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Output exists and replacing was not requested.
    #[error("output '{path}' already exists (use replace to overwrite)")]
    AlreadyExists { path: String },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Identity of one output product.
///
/// Renders as `{site}.lidar.z{z_id}.{level}.{YYYYMMDD}.{HHMMSS}.{scan}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputKey {
    pub site: String,
    /// Instrument slot at the site, e.g. `"01"`.
    pub z_id: String,
    /// Processing level, e.g. `"b0"`.
    pub data_level: String,
    pub start: NaiveDateTime,
    pub scan: String,
}

impl OutputKey {
    pub fn new(
        site: impl Into<String>,
        z_id: impl Into<String>,
        data_level: impl Into<String>,
        start: NaiveDateTime,
        scan: &ScanKind,
    ) -> Self {
        Self {
            site: site.into(),
            z_id: z_id.into(),
            data_level: data_level.into(),
            start,
            scan: scan.label(),
        }
    }

    /// Datastream name, i.e. the key without date, time and scan.
    pub fn datastream(&self) -> String {
        format!("{}.lidar.z{}.{}", self.site, self.z_id, self.data_level)
    }

    pub fn file_stem(&self) -> String {
        format!(
            "{}.{}.{}",
            self.datastream(),
            self.start.format("%Y%m%d.%H%M%S"),
            self.scan
        )
    }
}

/// Destination for finished datasets.
pub trait DatasetSink: Send + Sync {
    /// Persist `dataset` under `key`, returning the paths written.
    fn write(&self, key: &OutputKey, dataset: &StandardizedDataset) -> Result<Vec<PathBuf>>;
}

/// Writes `<key>.csv` and `<key>.yaml` into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    replace: bool,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(root: P, replace: bool) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            replace,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, key: &OutputKey, extension: &str) -> Result<PathBuf> {
        let path = self
            .root
            .join(format!("{}.{}", key.file_stem(), extension));
        if path.exists() && !self.replace {
            return Err(WriteError::AlreadyExists {
                path: path.display().to_string(),
            });
        }
        Ok(path)
    }
}

impl DatasetSink for DirectorySink {
    fn write(&self, key: &OutputKey, dataset: &StandardizedDataset) -> Result<Vec<PathBuf>> {
        ensure_dir(&self.root)?;
        let csv_path = self.target(key, "csv")?;
        let yaml_path = self.target(key, "yaml")?;

        // Either both files land or neither does.
        if let Err(e) = write_samples_csv(&csv_path, dataset)
            .and_then(|()| write_attributes_yaml(&yaml_path, dataset))
        {
            for path in [&csv_path, &yaml_path] {
                if path.is_file() {
                    if let Err(remove_err) = fs::remove_file(path) {
                        log::warn!("failed to remove partial output {}: {}", path.display(), remove_err);
                    }
                }
            }
            return Err(e);
        }

        log::info!(
            "{}: wrote {} samples to {}",
            key.file_stem(),
            dataset.num_beams() * dataset.num_gates(),
            self.root.display()
        );
        Ok(vec![csv_path, yaml_path])
    }
}

/// Creates a directory and its parents if missing.
fn ensure_dir(path: &Path) -> Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        fs::create_dir_all(path).map_err(|e| WriteError::CreateDirectory {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

const CSV_COLUMNS: [&str; 22] = [
    "time",
    "range_gate",
    "distance",
    "distance_overlapped",
    "azimuth",
    "elevation",
    "pitch",
    "roll",
    "scanID",
    "beamID",
    "wind_speed",
    "intensity",
    "beta",
    "SNR",
    "x",
    "y",
    "z",
    "rws_norm",
    "snr_norm",
    "probability",
    "qc_wind_speed",
    "beam",
];

fn optional_index(value: Option<usize>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write one row per (beam, gate) sample.
///
/// Unresolved scan or beam IDs are written as empty fields.
///
/// # Example
///
/// ```no_run
/// # use lidar_pipeline::core::dataset::StandardizedDataset;
/// use lidar_pipeline::core::writers::write_samples_csv;
/// use std::path::Path;
///
/// # fn demo(dataset: &StandardizedDataset) {
/// write_samples_csv(Path::new("scan.csv"), dataset).unwrap();
/// # }
/// ```
pub fn write_samples_csv(path: &Path, dataset: &StandardizedDataset) -> Result<()> {
    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);
    let path_str = path.display().to_string();
    let csv_err = |e| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    };

    csv_writer.write_record(CSV_COLUMNS).map_err(csv_err)?;

    for i in 0..dataset.num_beams() {
        let time = dataset.time[i].format(TIME_FORMAT).to_string();
        for j in 0..dataset.num_gates() {
            csv_writer
                .write_record(&[
                    time.clone(),
                    dataset.range_gate[j].to_string(),
                    dataset.distance[j].to_string(),
                    dataset.distance_overlapped[j].to_string(),
                    dataset.azimuth[i].to_string(),
                    dataset.elevation[i].to_string(),
                    dataset.pitch[i].to_string(),
                    dataset.roll[i].to_string(),
                    optional_index(dataset.scan_id[i]),
                    optional_index(dataset.beam_id[i]),
                    dataset.wind_speed[[i, j]].to_string(),
                    dataset.intensity[[i, j]].to_string(),
                    dataset.beta[[i, j]].to_string(),
                    dataset.snr[[i, j]].to_string(),
                    dataset.x[[i, j]].to_string(),
                    dataset.y[[i, j]].to_string(),
                    dataset.z[[i, j]].to_string(),
                    dataset.rws_norm[[i, j]].to_string(),
                    dataset.snr_norm[[i, j]].to_string(),
                    dataset.probability[[i, j]].to_string(),
                    dataset.qc_wind_speed[[i, j]].to_string(),
                    i.to_string(),
                ])
                .map_err(csv_err)?;
        }
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;

    Ok(())
}

#[derive(Serialize)]
struct Dimensions {
    beam: usize,
    range_gate: usize,
}

#[derive(Serialize)]
struct AttributeSidecar<'a> {
    dimensions: Dimensions,
    variables: &'a BTreeMap<String, Attributes>,
    global: &'a Attributes,
}

/// Write dimensions, variable attributes and global attributes as YAML.
pub fn write_attributes_yaml(path: &Path, dataset: &StandardizedDataset) -> Result<()> {
    let sidecar = AttributeSidecar {
        dimensions: Dimensions {
            beam: dataset.num_beams(),
            range_gate: dataset.num_gates(),
        },
        variables: &dataset.variable_attrs,
        global: &dataset.global_attrs,
    };
    let content = serde_yaml::to_string(&sidecar).map_err(|e| WriteError::YamlError {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut writer = create_buffered_writer(path)?;
    writer
        .write_all(content.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| WriteError::WriteFile {
            path: path.display().to_string(),
            source: e,
        })
}
