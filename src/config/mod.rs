//! Configuration types for the lidar pipeline.
//!
//! Configuration is plain serde data loaded from YAML. Every section has
//! defaults, so a partial file (or none at all) yields a usable config. A
//! [`ConfigTable`] maps file names to configurations through regex rules with
//! optional date windows, mirroring how deployments switch settings over time.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading, validating or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid regex '{pattern}' in rule '{rule}': {error}")]
    Regex {
        rule: String,
        pattern: String,
        error: regex::Error,
    },

    #[error("no date (YYYYMMDD) found in file name '{0}'")]
    MissingDate(String),

    #[error("no configuration rule matches '{0}'")]
    NoMatch(String),

    #[error("multiple configuration rules match '{file}': {rules:?}")]
    Ambiguous { file: String, rules: Vec<String> },
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Which gate-to-distance mapping feeds the Cartesian projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMode {
    /// Native gate length from the file header.
    #[default]
    Native,
    /// Fixed overlapping-mode step.
    Overlapped,
}

/// Settings for raw-file formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Distance between gates in overlapping mode, in meters.
    #[serde(default = "default_overlapping_distance")]
    pub overlapping_distance: f64,

    /// Distance mapping used for x/y/z.
    #[serde(default)]
    pub geometry_distance: DistanceMode,
}

fn default_overlapping_distance() -> f64 {
    1.5
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            overlapping_distance: default_overlapping_distance(),
            geometry_distance: DistanceMode::Native,
        }
    }
}

/// Settings for scan-pattern detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Maximum angular separation (degrees) for two beams to share a direction.
    #[serde(default = "default_angle_tolerance")]
    pub angle_tolerance: f64,

    /// Minimum occurrences before a cluster counts as a scan direction.
    #[serde(default = "default_min_occurrence")]
    pub min_occurrence: usize,
}

fn default_angle_tolerance() -> f64 {
    0.25
}

fn default_min_occurrence() -> usize {
    2
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            angle_tolerance: default_angle_tolerance(),
            min_occurrence: default_min_occurrence(),
        }
    }
}

/// Axis along which QC samples are binned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinAxis {
    /// Gate-center distance, meters.
    Range,
    /// Seconds since the first beam.
    Time,
    /// Beam azimuth, degrees.
    Azimuth,
    /// Beam elevation, degrees.
    Elevation,
    X,
    Y,
    Z,
}

impl BinAxis {
    pub fn name(self) -> &'static str {
        match self {
            BinAxis::Range => "range",
            BinAxis::Time => "time",
            BinAxis::Azimuth => "azimuth",
            BinAxis::Elevation => "elevation",
            BinAxis::X => "x",
            BinAxis::Y => "y",
            BinAxis::Z => "z",
        }
    }
}

/// One binning axis and its bin width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinSpec {
    pub axis: BinAxis,
    pub width: f64,
}

/// How the dynamic-filter probability threshold is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ThresholdConfig {
    /// Use the configured density value directly.
    Fixed { value: f64 },
    /// Derive the threshold from the spread of `rws_norm` across
    /// log-spaced probability bins.
    Adaptive {
        min_probability_range: f64,
        max_probability_range: f64,
        #[serde(default = "default_bins_per_decade")]
        bins_per_decade: usize,
    },
}

fn default_bins_per_decade() -> usize {
    4
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        ThresholdConfig::Fixed { value: 0.001 }
    }
}

/// Settings for the QC filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcConfig {
    /// Binning axes for the local median.
    #[serde(default = "default_bins")]
    pub bins: Vec<BinSpec>,

    /// Bins with fewer samples are not evaluated by the dynamic filter.
    #[serde(default = "default_min_bin_population")]
    pub min_bin_population: usize,

    /// Kernel bandwidth along `rws_norm`, m/s.
    #[serde(default = "default_sigma_rws")]
    pub sigma_rws: f64,

    /// Kernel bandwidth along `snr_norm`, dB.
    #[serde(default = "default_sigma_snr")]
    pub sigma_snr: f64,

    /// Kernel support along `rws_norm`, in units of `sigma_rws`.
    #[serde(default = "default_kernel_cutoff")]
    pub kernel_cutoff: f64,

    #[serde(default)]
    pub threshold: ThresholdConfig,

    /// Only samples with |rws_norm| above this can be rejected, m/s.
    #[serde(default = "default_rws_norm_limit")]
    pub rws_norm_limit: f64,

    /// Minimum SNR, dB.
    #[serde(default = "default_snr_min")]
    pub snr_min: Option<f64>,

    /// Maximum absolute radial wind speed, m/s.
    #[serde(default = "default_rws_max")]
    pub rws_max: Option<f64>,

    #[serde(default)]
    pub distance_min: Option<f64>,

    #[serde(default)]
    pub distance_max: Option<f64>,
}

fn default_bins() -> Vec<BinSpec> {
    vec![
        BinSpec {
            axis: BinAxis::Range,
            width: 100.0,
        },
        BinSpec {
            axis: BinAxis::Time,
            width: 600.0,
        },
    ]
}

fn default_min_bin_population() -> usize {
    10
}

fn default_sigma_rws() -> f64 {
    0.5
}

fn default_sigma_snr() -> f64 {
    1.0
}

fn default_kernel_cutoff() -> f64 {
    5.0
}

fn default_rws_norm_limit() -> f64 {
    2.0
}

fn default_snr_min() -> Option<f64> {
    Some(-25.0)
}

fn default_rws_max() -> Option<f64> {
    Some(30.0)
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            bins: default_bins(),
            min_bin_population: default_min_bin_population(),
            sigma_rws: default_sigma_rws(),
            sigma_snr: default_sigma_snr(),
            kernel_cutoff: default_kernel_cutoff(),
            threshold: ThresholdConfig::default(),
            rws_norm_limit: default_rws_norm_limit(),
            snr_min: default_snr_min(),
            rws_max: default_rws_max(),
            distance_min: None,
            distance_max: None,
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub format: FormatConfig,

    #[serde(default)]
    pub pattern: PatternConfig,

    #[serde(default)]
    pub qc: QcConfig,
}

fn positive(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number, got {}", value),
        })
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check every tunable before the configuration reaches the core.
    pub fn validate(&self) -> Result<()> {
        positive("format.overlapping_distance", self.format.overlapping_distance)?;
        positive("pattern.angle_tolerance", self.pattern.angle_tolerance)?;
        if self.pattern.min_occurrence == 0 {
            return Err(ConfigError::Invalid {
                field: "pattern.min_occurrence",
                reason: "must be at least 1".to_string(),
            });
        }

        let qc = &self.qc;
        if qc.bins.is_empty() {
            return Err(ConfigError::Invalid {
                field: "qc.bins",
                reason: "at least one binning axis is required".to_string(),
            });
        }
        for (i, spec) in qc.bins.iter().enumerate() {
            positive("qc.bins.width", spec.width)?;
            if qc.bins[..i].iter().any(|s| s.axis == spec.axis) {
                return Err(ConfigError::Invalid {
                    field: "qc.bins",
                    reason: format!("axis '{}' listed twice", spec.axis.name()),
                });
            }
        }
        if qc.min_bin_population == 0 {
            return Err(ConfigError::Invalid {
                field: "qc.min_bin_population",
                reason: "must be at least 1".to_string(),
            });
        }
        positive("qc.sigma_rws", qc.sigma_rws)?;
        positive("qc.sigma_snr", qc.sigma_snr)?;
        positive("qc.kernel_cutoff", qc.kernel_cutoff)?;
        positive("qc.rws_norm_limit", qc.rws_norm_limit)?;
        if let Some(rws_max) = qc.rws_max {
            positive("qc.rws_max", rws_max)?;
        }
        if let (Some(lo), Some(hi)) = (qc.distance_min, qc.distance_max) {
            if lo > hi {
                return Err(ConfigError::Invalid {
                    field: "qc.distance_min",
                    reason: format!("{} exceeds distance_max {}", lo, hi),
                });
            }
        }

        match qc.threshold {
            ThresholdConfig::Fixed { value } => {
                if !(value.is_finite() && value >= 0.0) {
                    return Err(ConfigError::Invalid {
                        field: "qc.threshold.value",
                        reason: format!("must be a non-negative number, got {}", value),
                    });
                }
            }
            ThresholdConfig::Adaptive {
                min_probability_range,
                max_probability_range,
                bins_per_decade,
            } => {
                positive("qc.threshold.min_probability_range", min_probability_range)?;
                positive("qc.threshold.max_probability_range", max_probability_range)?;
                if min_probability_range >= max_probability_range {
                    return Err(ConfigError::Invalid {
                        field: "qc.threshold",
                        reason: "min_probability_range must be below max_probability_range"
                            .to_string(),
                    });
                }
                if bins_per_decade == 0 {
                    return Err(ConfigError::Invalid {
                        field: "qc.threshold.bins_per_decade",
                        reason: "must be at least 1".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A configuration that applies to files whose name matches `regex` and
/// whose embedded date falls inside `[start_date, end_date]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRule {
    pub name: String,
    pub regex: String,

    /// Inclusive, as YYYYMMDD.
    #[serde(default)]
    pub start_date: Option<u32>,

    /// Inclusive, as YYYYMMDD.
    #[serde(default)]
    pub end_date: Option<u32>,

    #[serde(default)]
    pub config: PipelineConfig,
}

/// Ordered set of configuration rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigTable {
    #[serde(default)]
    pub rules: Vec<ConfigRule>,
}

impl ConfigTable {
    /// Load a rule table from YAML, validating every rule's regex and config.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let table: ConfigTable = serde_yaml::from_str(&content)?;
        for rule in &table.rules {
            compile_rule(rule)?;
            rule.config.validate()?;
        }
        Ok(table)
    }

    /// Resolve the single configuration matching a source file.
    ///
    /// The date is the first run of eight digits in the file name. Zero or
    /// more than one matching rule is an error.
    pub fn resolve(&self, source: &Path) -> Result<&PipelineConfig> {
        let file_name = source
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let date_re = Regex::new(r"\d{8}").map_err(|e| ConfigError::Regex {
            rule: "date".to_string(),
            pattern: r"\d{8}".to_string(),
            error: e,
        })?;
        let date: u32 = date_re
            .find(&file_name)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| ConfigError::MissingDate(file_name.clone()))?;

        let mut matches = Vec::new();
        for rule in &self.rules {
            let re = compile_rule(rule)?;
            let start = rule.start_date.unwrap_or(19700101);
            let end = rule.end_date.unwrap_or(30000101);
            if re.is_match(&file_name) && start <= date && date <= end {
                matches.push(rule);
            }
        }

        match matches.as_slice() {
            [] => Err(ConfigError::NoMatch(file_name)),
            [rule] => Ok(&rule.config),
            many => Err(ConfigError::Ambiguous {
                file: file_name,
                rules: many.iter().map(|r| r.name.clone()).collect(),
            }),
        }
    }
}

fn compile_rule(rule: &ConfigRule) -> Result<Regex> {
    Regex::new(&rule.regex).map_err(|e| ConfigError::Regex {
        rule: rule.name.clone(),
        pattern: rule.regex.clone(),
        error: e,
    })
}
