//! Standardized dataset types and the attribute vocabulary attached to them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Text(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Int(value as i64)
    }
}

/// Named attributes, sorted by key.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Units marker for dimensionless variables.
pub const UNITLESS: &str = "unitless";

/// Descriptive metadata for one dataset variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: &'static str,
    pub long_name: &'static str,
    pub description: &'static str,
    pub units: &'static str,
}

const fn var(
    name: &'static str,
    long_name: &'static str,
    description: &'static str,
    units: &'static str,
) -> VariableInfo {
    VariableInfo {
        name,
        long_name,
        description,
        units,
    }
}

/// Every variable a [`StandardizedDataset`] carries, in output order.
pub const VARIABLES: [VariableInfo; 21] = [
    var("time", "Time UTC", "Timestamp in UTC format for the specific beam.", "UTC"),
    var("range_gate", "Range gate", "Index of the range gate along the beam.", UNITLESS),
    var("distance", "Range", "Distance from the lidar source.", "m"),
    var(
        "distance_overlapped",
        "Overlapped range",
        "Distance from the lidar source using the overlapping gate step.",
        "m",
    ),
    var("azimuth", "Azimuth", "Beam azimuth angle", "degrees"),
    var("elevation", "Elevation", "Beam elevation angle", "degrees"),
    var("pitch", "Pitch", "Lidar pitch angle", "degrees"),
    var("roll", "Roll", "Lidar roll angle", "degrees"),
    var("scanID", "Scan ID", "Repetition index of the scan.", UNITLESS),
    var("beamID", "Beam ID", "Index of the beam within a scan.", UNITLESS),
    var("wind_speed", "Line-of-sight velocity", "Line-of-sight velocity.", "m/s"),
    var("intensity", "Intensity", "Intensity (SNR + 1).", UNITLESS),
    var("beta", "Backscatter", "Attenuated backscatter coefficient.", "m^-1 sr^-1"),
    var("SNR", "Signal-to-noise ratio", "Signal-to-noise ratio.", "dB"),
    var("x", "x-direction", "x-direction.", "m"),
    var("y", "y-direction", "y-direction.", "m"),
    var("z", "z-direction", "z-direction.", "m"),
    var(
        "rws_norm",
        "Normalized radial wind speed",
        "Fluctuation of radial wind speed on top of the binned spatio-temporal median. It is used in the dynamic filter.",
        "m/s",
    ),
    var(
        "snr_norm",
        "Normalized SNR",
        "Fluctuation of signal-to-noise ratio on top of the binned spatio-temporal median. It is used in the dynamic filter.",
        "dB",
    ),
    var(
        "probability",
        "Probability",
        "Value of 2-D p.d.f. in the rws_norm vs snr_norm plane. It is used in the dynamic filter.",
        UNITLESS,
    ),
    var(
        "qc_wind_speed",
        "Wind speed QC flag",
        "This variable contains bit-packed integer values, where each bit represents a QC test on the data. Non-zero bits indicate the QC condition given in the description for those bits.",
        UNITLESS,
    ),
];

/// Look up the descriptive metadata of a variable by name.
pub fn variable_info(name: &str) -> Option<&'static VariableInfo> {
    VARIABLES.iter().find(|v| v.name == name)
}

impl VariableInfo {
    /// Attribute map with `standard_name`, `long_name`, `description` and `units`.
    pub fn attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("standard_name".into(), self.name.into());
        attrs.insert("long_name".into(), self.long_name.into());
        attrs.insert("description".into(), self.description.into());
        attrs.insert("units".into(), self.units.into());
        attrs
    }
}

/// Normalized scan type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanKind {
    Stare,
    /// User-defined scan file N.
    User(u32),
    Vad,
    WindProfile,
    Rhi,
    /// Anything else, lowercased with non-alphanumerics replaced by `_`.
    Other(String),
}

fn user_label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"user(?:file)?(\d+)").unwrap())
}

impl ScanKind {
    /// Normalize a raw scan-type label such as `"Stare"` or `"User file 4 - csm"`.
    pub fn from_label(label: &str) -> Self {
        let compact: String = label
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        if let Some(n) = user_label_pattern()
            .captures(&compact)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            return ScanKind::User(n);
        }

        if compact.contains("stare") {
            ScanKind::Stare
        } else if compact.contains("vad") {
            ScanKind::Vad
        } else if compact.contains("wind_profile") || compact.contains("windprofile") {
            ScanKind::WindProfile
        } else if compact.contains("rhi") {
            ScanKind::Rhi
        } else {
            ScanKind::Other(sanitize(label))
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ScanKind::Other(_))
    }

    /// Label used in file names and the `scan_type` attribute.
    pub fn label(&self) -> String {
        match self {
            ScanKind::Stare => "stare".to_string(),
            ScanKind::User(n) => format!("user{}", n),
            ScanKind::Vad => "vad".to_string(),
            ScanKind::WindProfile => "wind_profile".to_string(),
            ScanKind::Rhi => "rhi".to_string(),
            ScanKind::Other(s) => s.clone(),
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

fn sanitize(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_').to_string();
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

/// One formatted, quality-controlled scan.
///
/// Per-beam vectors have length `num_beams`; grids have shape
/// `(num_beams, num_gates)`; `range_gate`, `distance` and
/// `distance_overlapped` have length `num_gates`.
#[derive(Debug, Clone)]
pub struct StandardizedDataset {
    pub time: Vec<NaiveDateTime>,
    pub range_gate: Vec<usize>,
    pub distance: Vec<f64>,
    pub distance_overlapped: Vec<f64>,
    pub azimuth: Vec<f64>,
    pub elevation: Vec<f64>,
    pub pitch: Vec<f64>,
    pub roll: Vec<f64>,
    pub scan_id: Vec<Option<usize>>,
    pub beam_id: Vec<Option<usize>>,
    pub wind_speed: Array2<f64>,
    pub intensity: Array2<f64>,
    pub beta: Array2<f64>,
    pub snr: Array2<f64>,
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub z: Array2<f64>,
    pub rws_norm: Array2<f64>,
    pub snr_norm: Array2<f64>,
    pub probability: Array2<f64>,
    pub qc_wind_speed: Array2<u16>,
    pub scan_kind: ScanKind,
    /// Keyed by variable name.
    pub variable_attrs: BTreeMap<String, Attributes>,
    pub global_attrs: Attributes,
}

impl StandardizedDataset {
    pub fn num_beams(&self) -> usize {
        self.time.len()
    }

    pub fn num_gates(&self) -> usize {
        self.range_gate.len()
    }

    pub fn start_time(&self) -> Option<NaiveDateTime> {
        self.time.first().copied()
    }

    /// Fraction of samples with a zero QC flag.
    pub fn retained_fraction(&self) -> f64 {
        let total = self.qc_wind_speed.len();
        if total == 0 {
            return 0.0;
        }
        let good = self.qc_wind_speed.iter().filter(|&&f| f == 0).count();
        good as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_kind_known_labels() {
        assert_eq!(ScanKind::from_label("Stare"), ScanKind::Stare);
        assert_eq!(ScanKind::from_label("User file 4 - csm"), ScanKind::User(4));
        assert_eq!(ScanKind::from_label("User4"), ScanKind::User(4));
        assert_eq!(ScanKind::from_label("VAD"), ScanKind::Vad);
        assert_eq!(ScanKind::from_label("Wind profile"), ScanKind::WindProfile);
        assert_eq!(ScanKind::from_label("RHI"), ScanKind::Rhi);
        assert_eq!(ScanKind::User(12).label(), "user12");
    }

    #[test]
    fn test_user_label_pattern_compiled_once() {
        assert!(std::ptr::eq(user_label_pattern(), user_label_pattern()));
        assert_eq!(ScanKind::from_label("userfile17"), ScanKind::User(17));
    }

    #[test]
    fn test_scan_kind_unknown_is_sanitized() {
        let kind = ScanKind::from_label("  Sector Scan #2 ");
        assert_eq!(kind, ScanKind::Other("sector_scan_2".to_string()));
        assert!(!kind.is_known());
        assert_eq!(ScanKind::from_label("---").label(), "unknown");
    }

    #[test]
    fn test_variable_table_complete() {
        for name in ["time", "wind_speed", "SNR", "probability", "qc_wind_speed"] {
            let info = variable_info(name).unwrap();
            assert!(!info.units.is_empty());
        }
        assert_eq!(variable_info("scanID").unwrap().units, UNITLESS);
        assert!(variable_info("nonexistent").is_none());

        let attrs = variable_info("distance").unwrap().attributes();
        assert_eq!(attrs["standard_name"], AttrValue::from("distance"));
        assert_eq!(attrs["units"], AttrValue::from("m"));
    }

    #[test]
    fn test_attr_value_yaml_untagged() {
        let mut attrs = Attributes::new();
        attrs.insert("a".into(), AttrValue::from(3usize));
        attrs.insert("b".into(), AttrValue::from(0.5));
        attrs.insert("c".into(), AttrValue::from("text"));

        let yaml = serde_yaml::to_string(&attrs).unwrap();
        assert!(yaml.contains("a: 3"));
        assert!(yaml.contains("b: 0.5"));
        assert!(yaml.contains("c: text"));
    }
}
