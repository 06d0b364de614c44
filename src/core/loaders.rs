//! Loader for Halo Photonics `.hpl` scan files.
//!
//! The format is line oriented:
//! - 11 header lines of `key: value` pairs
//! - 6 column-label lines (skipped)
//! - repeated ray blocks: one beam line (`time azimuth elevation pitch roll`)
//!   followed by exactly `Number of gates` gate lines
//!   (`gate doppler intensity beta`)
//!
//! A blank line or end of file terminates the table.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use ndarray::Array2;
use thiserror::Error;

/// Number of `key: value` header lines.
pub const HEADER_LINES: usize = 11;

/// Number of column-label lines between header and data.
pub const LABEL_LINES: usize = 6;

/// Upper bound on buffers sized from header counts before data confirms them.
const MAX_PREALLOCATED: usize = 4096;

const START_TIME_KEY: &str = "Start time";

const REQUIRED_KEYS: [&str; 7] = [
    "Filename",
    "System ID",
    "Number of gates",
    "Range gate length (m)",
    "Scan type",
    "Pulses/ray",
    START_TIME_KEY,
];

/// Errors for malformed or incomplete scan files.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: header is missing required key '{key}'")]
    MissingHeaderKey { path: PathBuf, key: &'static str },

    #[error("{path}: header key '{key}' has invalid value '{value}'")]
    InvalidHeaderValue {
        path: PathBuf,
        key: String,
        value: String,
    },

    #[error("{path}: unparsable start time '{value}'")]
    InvalidStartTime { path: PathBuf, value: String },

    #[error("{path}:{line} (byte {offset}): file ended inside the header")]
    TruncatedHeader {
        path: PathBuf,
        line: usize,
        offset: u64,
    },

    #[error("{path}:{line} (byte {offset}): malformed beam line '{content}'")]
    InvalidBeamLine {
        path: PathBuf,
        line: usize,
        offset: u64,
        content: String,
    },

    #[error("{path}:{line} (byte {offset}): malformed gate line '{content}'")]
    InvalidGateLine {
        path: PathBuf,
        line: usize,
        offset: u64,
        content: String,
    },

    #[error("{path}:{line} (byte {offset}): gate index {gate} out of range for {num_gates} gates")]
    GateOutOfRange {
        path: PathBuf,
        line: usize,
        offset: u64,
        gate: usize,
        num_gates: usize,
    },

    #[error("{path}:{line} (byte {offset}): ray {beam} truncated, expected {expected} gate lines, found {found}")]
    TruncatedRay {
        path: PathBuf,
        line: usize,
        offset: u64,
        beam: usize,
        expected: usize,
        found: usize,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, FormatError>;

/// Instrument metadata from the file header.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHeader {
    /// Original file name as recorded by the instrument.
    pub filename: String,
    pub system_id: i64,
    pub num_gates: usize,
    /// Native range-gate length, meters.
    pub range_gate_length_m: f64,
    pub gate_length_pts: Option<u32>,
    pub pulses_per_ray: f64,
    pub rays_in_file: Option<usize>,
    /// Scan type label as written in the header, e.g. `"Stare"`.
    pub scan_type: String,
    pub focus_range: Option<f64>,
    pub start_time: NaiveDateTime,
    /// Velocity resolution, m/s.
    pub resolution_mps: Option<f64>,
    /// Any other header keys, verbatim.
    pub extra: BTreeMap<String, String>,
}

/// One ray: pointing, attitude and per-gate measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamRecord {
    /// Decimal hours since midnight of the start date, before wrap repair.
    pub time_offset_h: f64,
    pub azimuth: f64,
    pub elevation: f64,
    pub pitch: f64,
    pub roll: f64,
    /// Radial (Doppler) velocity, m/s.
    pub doppler: Vec<f64>,
    /// Intensity (SNR + 1).
    pub intensity: Vec<f64>,
    /// Attenuated backscatter, m^-1 sr^-1.
    pub beta: Vec<f64>,
}

impl BeamRecord {
    fn with_gates(fields: [f64; 5], num_gates: usize) -> Self {
        Self {
            time_offset_h: fields[0],
            azimuth: fields[1],
            elevation: fields[2],
            pitch: fields[3],
            roll: fields[4],
            doppler: vec![0.0; num_gates],
            intensity: vec![0.0; num_gates],
            beta: vec![0.0; num_gates],
        }
    }
}

/// Beams in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanTable {
    pub beams: Vec<BeamRecord>,
    pub num_gates: usize,
}

impl ScanTable {
    /// Returns the number of beams.
    #[inline]
    pub fn num_beams(&self) -> usize {
        self.beams.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.beams.is_empty()
    }

    pub fn time_offsets(&self) -> Vec<f64> {
        self.beams.iter().map(|b| b.time_offset_h).collect()
    }

    pub fn azimuths(&self) -> Vec<f64> {
        self.beams.iter().map(|b| b.azimuth).collect()
    }

    pub fn elevations(&self) -> Vec<f64> {
        self.beams.iter().map(|b| b.elevation).collect()
    }

    pub fn pitches(&self) -> Vec<f64> {
        self.beams.iter().map(|b| b.pitch).collect()
    }

    pub fn rolls(&self) -> Vec<f64> {
        self.beams.iter().map(|b| b.roll).collect()
    }

    /// Radial velocity as a (beam, gate) grid.
    pub fn doppler_grid(&self) -> Array2<f64> {
        self.grid(|b| &b.doppler)
    }

    /// Intensity as a (beam, gate) grid.
    pub fn intensity_grid(&self) -> Array2<f64> {
        self.grid(|b| &b.intensity)
    }

    /// Backscatter as a (beam, gate) grid.
    pub fn beta_grid(&self) -> Array2<f64> {
        self.grid(|b| &b.beta)
    }

    fn grid<F>(&self, field: F) -> Array2<f64>
    where
        F: Fn(&BeamRecord) -> &Vec<f64>,
    {
        let mut out = Array2::zeros((self.beams.len(), self.num_gates));
        for (i, beam) in self.beams.iter().enumerate() {
            for (j, &v) in field(beam).iter().enumerate().take(self.num_gates) {
                out[[i, j]] = v;
            }
        }
        out
    }
}

/// Line reader that tracks line numbers and byte offsets for diagnostics.
struct LineCursor<R> {
    reader: R,
    path: PathBuf,
    buf: String,
    line: usize,
    offset: u64,
    next_offset: u64,
}

impl<R: BufRead> LineCursor<R> {
    fn new(reader: R, path: &Path) -> Self {
        Self {
            reader,
            path: path.to_path_buf(),
            buf: String::new(),
            line: 0,
            offset: 0,
            next_offset: 0,
        }
    }

    /// Advances to the next line; `false` at end of file.
    fn advance(&mut self) -> Result<bool> {
        self.buf.clear();
        let n = self
            .reader
            .read_line(&mut self.buf)
            .map_err(|e| FormatError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        if n == 0 {
            return Ok(false);
        }
        self.line += 1;
        self.offset = self.next_offset;
        self.next_offset += n as u64;
        Ok(true)
    }

    /// Current line without its terminator.
    fn text(&self) -> &str {
        self.buf.trim_end_matches(['\r', '\n'])
    }

    fn at_blank(&self) -> bool {
        self.text().trim().is_empty()
    }
}

/// Load and parse a scan file from disk.
///
/// # Errors
///
/// Returns a [`FormatError`] if the file cannot be read, the header lacks a
/// required key, or a ray block is truncated.
pub fn load_scan_file<P: AsRef<Path>>(path: P) -> Result<(RawHeader, ScanTable)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| FormatError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_scan(BufReader::new(file), path)
}

/// Parse a scan from any buffered reader. `source` is used only for error
/// context.
pub fn parse_scan<R: BufRead>(reader: R, source: &Path) -> Result<(RawHeader, ScanTable)> {
    let mut cursor = LineCursor::new(reader, source);
    let truncated_header = |cursor: &LineCursor<R>| FormatError::TruncatedHeader {
        path: source.to_path_buf(),
        line: cursor.line + 1,
        offset: cursor.next_offset,
    };

    let mut fields: Vec<(String, String)> = Vec::with_capacity(HEADER_LINES);
    for _ in 0..HEADER_LINES {
        if !cursor.advance()? {
            return Err(truncated_header(&cursor));
        }
        // Split at the first colon only: the start time keeps its own colons.
        if let Some((key, value)) = cursor.text().split_once(':') {
            fields.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    let header = build_header(fields, source)?;

    for _ in 0..LABEL_LINES {
        if !cursor.advance()? {
            return Err(truncated_header(&cursor));
        }
    }

    let num_gates = header.num_gates;
    let mut beams = Vec::with_capacity(header.rays_in_file.unwrap_or(256).min(MAX_PREALLOCATED));
    let mut gate_values = Vec::with_capacity(num_gates.min(MAX_PREALLOCATED));

    loop {
        if !cursor.advance()? || cursor.at_blank() {
            break;
        }
        let beam_fields =
            parse_beam_line(cursor.text()).ok_or_else(|| FormatError::InvalidBeamLine {
                path: source.to_path_buf(),
                line: cursor.line,
                offset: cursor.offset,
                content: cursor.text().to_string(),
            })?;

        let beam_index = beams.len();
        gate_values.clear();

        for found in 0..num_gates {
            if !cursor.advance()? || cursor.at_blank() {
                return Err(FormatError::TruncatedRay {
                    path: source.to_path_buf(),
                    line: cursor.line,
                    offset: cursor.offset,
                    beam: beam_index,
                    expected: num_gates,
                    found,
                });
            }

            let (gate, doppler, intensity, beta) =
                parse_gate_line(cursor.text()).ok_or_else(|| FormatError::InvalidGateLine {
                    path: source.to_path_buf(),
                    line: cursor.line,
                    offset: cursor.offset,
                    content: cursor.text().to_string(),
                })?;

            if gate >= num_gates {
                return Err(FormatError::GateOutOfRange {
                    path: source.to_path_buf(),
                    line: cursor.line,
                    offset: cursor.offset,
                    gate,
                    num_gates,
                });
            }

            gate_values.push((gate, doppler, intensity, beta));
        }

        // Gate lines are not assumed to be sorted.
        let mut beam = BeamRecord::with_gates(beam_fields, num_gates);
        for &(gate, doppler, intensity, beta) in &gate_values {
            beam.doppler[gate] = doppler;
            beam.intensity[gate] = intensity;
            beam.beta[gate] = beta;
        }

        beams.push(beam);
    }

    log::debug!(
        "{}: parsed {} beams x {} gates",
        source.display(),
        beams.len(),
        num_gates
    );

    Ok((header, ScanTable { beams, num_gates }))
}

fn parse_beam_line(line: &str) -> Option<[f64; 5]> {
    let mut out = [0.0; 5];
    let mut tokens = line.split_whitespace();
    for slot in out.iter_mut() {
        *slot = tokens.next()?.parse().ok()?;
    }
    Some(out)
}

fn parse_gate_line(line: &str) -> Option<(usize, f64, f64, f64)> {
    let mut tokens = line.split_whitespace();
    let gate = tokens.next()?.parse().ok()?;
    let doppler = tokens.next()?.parse().ok()?;
    let intensity = tokens.next()?.parse().ok()?;
    let beta = tokens.next()?.parse().ok()?;
    Some((gate, doppler, intensity, beta))
}

fn build_header(fields: Vec<(String, String)>, source: &Path) -> Result<RawHeader> {
    let mut map: BTreeMap<String, String> = fields.into_iter().collect();

    for key in REQUIRED_KEYS {
        if !map.contains_key(key) {
            return Err(FormatError::MissingHeaderKey {
                path: source.to_path_buf(),
                key,
            });
        }
    }

    let mut take = |key: &str| map.remove(key).unwrap_or_default();
    let filename = take("Filename");
    let system_id = take("System ID");
    let num_gates = take("Number of gates");
    let gate_length = take("Range gate length (m)");
    let scan_type = take("Scan type");
    let pulses = take("Pulses/ray");
    let start_time = take(START_TIME_KEY);

    let invalid = |key: &str, value: &str| FormatError::InvalidHeaderValue {
        path: source.to_path_buf(),
        key: key.to_string(),
        value: value.to_string(),
    };

    let header = RawHeader {
        system_id: system_id
            .parse()
            .map_err(|_| invalid("System ID", &system_id))?,
        num_gates: num_gates
            .parse()
            .map_err(|_| invalid("Number of gates", &num_gates))?,
        range_gate_length_m: gate_length
            .parse()
            .map_err(|_| invalid("Range gate length (m)", &gate_length))?,
        pulses_per_ray: pulses.parse().map_err(|_| invalid("Pulses/ray", &pulses))?,
        start_time: parse_start_time(&start_time).ok_or_else(|| {
            FormatError::InvalidStartTime {
                path: source.to_path_buf(),
                value: start_time.clone(),
            }
        })?,
        gate_length_pts: map.remove("Gate length (pts)").and_then(|v| v.parse().ok()),
        rays_in_file: map.remove("No. of rays in file").and_then(|v| v.parse().ok()),
        focus_range: map.remove("Focus range").and_then(|v| v.parse().ok()),
        resolution_mps: map.remove("Resolution (m/s)").and_then(|v| v.parse().ok()),
        filename,
        scan_type,
        extra: map,
    };
    Ok(header)
}

/// Parse `YYYYMMDD HH:MM:SS.ss`.
fn parse_start_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y%m%d %H:%M:%S%.f").ok()
}
