//! Assembly of the standardized dataset.
//!
//! [`DatasetAssembler::assemble`] merges the parsed scan, reconstructed
//! times, geometry, scan pattern and QC result into one
//! [`StandardizedDataset`] and attaches variable and global attributes.

use chrono::NaiveDateTime;
use ndarray::Array2;
use thiserror::Error;

use crate::core::dataset::{Attributes, ScanKind, StandardizedDataset, VARIABLES};
use crate::core::loaders::{RawHeader, ScanTable};
use crate::core::transforms::{GeometryGrid, RangeAxes};
use crate::processors::qc_filter::{QcResult, QcThresholds};
use crate::processors::scan_pattern::ScanPattern;

/// Errors raised while assembling a dataset.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Two sub-results disagree on beam or gate count.
    #[error("dimension mismatch: {what} has {found} {axis}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        axis: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Result type for assembly.
pub type Result<T> = std::result::Result<T, AssemblyError>;

/// Everything the assembler merges, borrowed from the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInputs<'a> {
    pub header: &'a RawHeader,
    pub table: &'a ScanTable,
    pub times: &'a [NaiveDateTime],
    pub ranges: &'a RangeAxes,
    pub geometry: &'a GeometryGrid,
    pub pattern: &'a ScanPattern,
    pub snr: &'a Array2<f64>,
    pub qc: &'a QcResult,
    pub scan_kind: &'a ScanKind,
}

const DESCRIPTION: &str = "Halo XR/XR+ Lidar standardized and quality-controlled data";

/// Builds [`StandardizedDataset`]s with provenance attributes.
#[derive(Debug, Clone)]
pub struct DatasetAssembler {
    data_level: String,
    datastream: String,
}

fn check(what: &'static str, axis: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(AssemblyError::DimensionMismatch {
            what,
            axis,
            expected,
            found,
        })
    }
}

fn check_grid(what: &'static str, grid: (usize, usize), beams: usize, gates: usize) -> Result<()> {
    check(what, "beams", beams, grid.0)?;
    check(what, "gates", gates, grid.1)
}

/// Lowercase attribute name with non-alphanumerics collapsed to `_`.
fn attr_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c);
        } else if !key.ends_with('_') {
            key.push('_');
        }
    }
    key.trim_matches('_').to_string()
}

/// Normalize the scan type from the header label, falling back to the file name.
pub fn detect_scan_kind(header: &RawHeader) -> ScanKind {
    let kind = ScanKind::from_label(&header.scan_type);
    if kind.is_known() {
        return kind;
    }
    let from_name = ScanKind::from_label(&header.filename);
    if from_name.is_known() {
        return from_name;
    }
    log::warn!(
        "{}: scan type '{}' not recognized, using '{}'",
        header.filename,
        header.scan_type,
        kind
    );
    kind
}

impl DatasetAssembler {
    pub fn new(data_level: impl Into<String>, datastream: impl Into<String>) -> Self {
        Self {
            data_level: data_level.into(),
            datastream: datastream.into(),
        }
    }

    /// Merge all sub-results into one dataset.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::DimensionMismatch`] if any input disagrees
    /// with the header's gate count or the scan table's beam count.
    pub fn assemble(&self, inputs: AssemblyInputs<'_>) -> Result<StandardizedDataset> {
        let header = inputs.header;
        let table = inputs.table;
        let beams = table.num_beams();
        let gates = header.num_gates;

        check("scan table", "gates", gates, table.num_gates)?;
        for beam in &table.beams {
            check("beam doppler", "gates", gates, beam.doppler.len())?;
            check("beam intensity", "gates", gates, beam.intensity.len())?;
            check("beam beta", "gates", gates, beam.beta.len())?;
        }
        check("times", "beams", beams, inputs.times.len())?;
        check("scan pattern", "beams", beams, inputs.pattern.assignments.len())?;
        check("distance", "gates", gates, inputs.ranges.distance.len())?;
        check(
            "distance_overlapped",
            "gates",
            gates,
            inputs.ranges.distance_overlapped.len(),
        )?;
        check_grid("geometry", inputs.geometry.dim(), beams, gates)?;
        check_grid("SNR", inputs.snr.dim(), beams, gates)?;
        check_grid("QC flags", inputs.qc.flags.dim(), beams, gates)?;
        check_grid("rws_norm", inputs.qc.rws_norm.dim(), beams, gates)?;
        check_grid("snr_norm", inputs.qc.snr_norm.dim(), beams, gates)?;
        check_grid("probability", inputs.qc.probability.dim(), beams, gates)?;

        let variable_attrs = VARIABLES
            .iter()
            .map(|info| {
                let mut attrs = info.attributes();
                match info.name {
                    "wind_speed" => {
                        attrs.insert("ancillary_variables".into(), "qc_wind_speed".into());
                    }
                    "qc_wind_speed" => attrs.extend(qc_variable_attrs(inputs.qc)),
                    _ => {}
                }
                (info.name.to_string(), attrs)
            })
            .collect();

        let global_attrs = self.global_attrs(&inputs, inputs.scan_kind);

        Ok(StandardizedDataset {
            time: inputs.times.to_vec(),
            range_gate: (0..gates).collect(),
            distance: inputs.ranges.distance.clone(),
            distance_overlapped: inputs.ranges.distance_overlapped.clone(),
            azimuth: table.azimuths(),
            elevation: table.elevations(),
            pitch: table.pitches(),
            roll: table.rolls(),
            scan_id: inputs.pattern.scan_ids(),
            beam_id: inputs.pattern.beam_ids(),
            wind_speed: table.doppler_grid(),
            intensity: table.intensity_grid(),
            beta: table.beta_grid(),
            snr: inputs.snr.clone(),
            x: inputs.geometry.x.clone(),
            y: inputs.geometry.y.clone(),
            z: inputs.geometry.z.clone(),
            rws_norm: inputs.qc.rws_norm.clone(),
            snr_norm: inputs.qc.snr_norm.clone(),
            probability: inputs.qc.probability.clone(),
            qc_wind_speed: inputs.qc.flags.clone(),
            scan_kind: inputs.scan_kind.clone(),
            variable_attrs,
            global_attrs,
        })
    }

    fn global_attrs(&self, inputs: &AssemblyInputs<'_>, scan_kind: &ScanKind) -> Attributes {
        let header = inputs.header;
        let mut attrs = Attributes::new();

        attrs.insert("filename".into(), header.filename.clone().into());
        attrs.insert("system_id".into(), header.system_id.into());
        attrs.insert("num_gates".into(), header.num_gates.into());
        attrs.insert("range_gate_length".into(), header.range_gate_length_m.into());
        attrs.insert("pulses_per_ray".into(), header.pulses_per_ray.into());
        attrs.insert(
            "start_time".into(),
            header.start_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string().into(),
        );
        if let Some(pts) = header.gate_length_pts {
            attrs.insert("gate_length_pts".into(), (pts as i64).into());
        }
        if let Some(rays) = header.rays_in_file {
            attrs.insert("rays_in_file".into(), rays.into());
        }
        if let Some(focus) = header.focus_range {
            attrs.insert("focus_range".into(), focus.into());
        }
        if let Some(resolution) = header.resolution_mps {
            attrs.insert("resolution".into(), resolution.into());
        }
        for (key, value) in &header.extra {
            attrs
                .entry(attr_key(key))
                .or_insert_with(|| value.clone().into());
        }

        attrs.insert("scan_type".into(), scan_kind.label().into());
        attrs.insert("scan_type_label".into(), header.scan_type.clone().into());
        attrs.insert(
            "scan_directions".into(),
            inputs.pattern.directions.len().into(),
        );
        attrs.insert(
            "scan_repetitions".into(),
            inputs.pattern.num_repetitions().into(),
        );
        attrs.insert(
            "settling_beams".into(),
            inputs.pattern.selected.len().into(),
        );

        attrs.extend(threshold_attrs(&inputs.qc.thresholds));
        let underflow: Vec<String> = inputs.qc.underflow.iter().map(|u| u.to_string()).collect();
        attrs.insert("qc_underflow_bins".into(), underflow.join("; ").into());
        attrs.insert(
            "qc_unevaluated_samples".into(),
            inputs.qc.unevaluated_samples.into(),
        );

        attrs.insert("data_level".into(), self.data_level.clone().into());
        attrs.insert("datastream".into(), self.datastream.clone().into());
        attrs.insert("description".into(), DESCRIPTION.into());
        attrs.insert(
            "history".into(),
            format!(
                "Generated by {} {} on {}",
                env!("CARGO_PKG_NAME"),
                crate::VERSION,
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
            )
            .into(),
        );
        attrs
    }
}

/// QC legend in the `bit_N_description` / `bit_N_assessment` convention.
fn qc_variable_attrs(qc: &QcResult) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("bit_0_description".into(), "Value retained.".into());
    attrs.insert("bit_0_assessment".into(), "Good".into());
    for criterion in &qc.legend {
        let bit = criterion.bit();
        attrs.insert(
            format!("bit_{}_description", bit),
            criterion.description().into(),
        );
        attrs.insert(format!("bit_{}_assessment", bit), "Bad".into());
    }
    attrs.insert(
        "qc_probability_threshold".into(),
        qc.thresholds.probability.into(),
    );
    attrs
}

fn threshold_attrs(t: &QcThresholds) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("qc_probability_threshold".into(), t.probability.into());
    attrs.insert("qc_probability_mode".into(), t.probability_mode.into());
    attrs.insert("qc_rws_norm_limit".into(), t.rws_norm_limit.into());
    attrs.insert("qc_sigma_rws".into(), t.sigma_rws.into());
    attrs.insert("qc_sigma_snr".into(), t.sigma_snr.into());
    attrs.insert("qc_min_bin_population".into(), t.min_bin_population.into());
    let optional = [
        ("qc_snr_min", t.snr_min),
        ("qc_rws_max", t.rws_max),
        ("qc_distance_min", t.distance_min),
        ("qc_distance_max", t.distance_max),
    ];
    for (key, value) in optional {
        if let Some(v) = value {
            attrs.insert(key.into(), v.into());
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PatternConfig, QcConfig};
    use crate::core::dataset::AttrValue;
    use crate::core::loaders::{parse_scan, tests::header_text};
    use crate::core::time::{reconstruct_times, seconds_since_first};
    use crate::core::transforms::{beams_to_cartesian, intensity_to_snr, range_axes};
    use crate::processors::qc_filter::{QcFilterEngine, QcInputs};
    use crate::processors::scan_pattern::ScanPatternDetector;
    use std::io::Cursor;
    use std::path::Path;

    struct Parts {
        header: RawHeader,
        table: ScanTable,
        times: Vec<NaiveDateTime>,
        ranges: RangeAxes,
        geometry: GeometryGrid,
        pattern: ScanPattern,
        snr: Array2<f64>,
        qc: QcResult,
        scan_kind: ScanKind,
    }

    impl Parts {
        fn build() -> Self {
            let mut text = header_text(2, "20230830 06:46:13.00");
            text.push_str(" 6.770000 0.00 90.00 0.10 0.20\n");
            text.push_str("0 1.0 1.5 1.0E-6\n1 1.2 2.0 2.0E-6\n");
            text.push_str(" 6.771000 0.00 90.00 0.10 0.20\n");
            text.push_str("0 1.1 1.5 1.0E-6\n1 1.3 2.0 2.0E-6\n");
            let (header, table) =
                parse_scan(Cursor::new(text.into_bytes()), Path::new("stare.hpl")).unwrap();

            let times = reconstruct_times(header.start_time.date(), &table.time_offsets());
            let ranges = range_axes(header.num_gates, header.range_gate_length_m, 1.5);
            let geometry =
                beams_to_cartesian(&ranges.distance, &table.azimuths(), &table.elevations());
            let pattern = ScanPatternDetector::new(&PatternConfig::default())
                .detect(&table.azimuths(), &table.elevations());
            let snr = intensity_to_snr(&table.intensity_grid());
            let time_s = seconds_since_first(&times);
            let doppler = table.doppler_grid();
            let azimuth = table.azimuths();
            let elevation = table.elevations();
            let qc = QcFilterEngine::new(&QcConfig::default()).apply(&QcInputs {
                wind_speed: &doppler,
                snr: &snr,
                distance: &ranges.distance,
                time_s: &time_s,
                azimuth: &azimuth,
                elevation: &elevation,
                geometry: &geometry,
            });

            let scan_kind = detect_scan_kind(&header);

            Self {
                header,
                table,
                times,
                ranges,
                geometry,
                pattern,
                snr,
                qc,
                scan_kind,
            }
        }

        fn inputs(&self) -> AssemblyInputs<'_> {
            AssemblyInputs {
                header: &self.header,
                table: &self.table,
                times: &self.times,
                ranges: &self.ranges,
                geometry: &self.geometry,
                pattern: &self.pattern,
                snr: &self.snr,
                qc: &self.qc,
                scan_kind: &self.scan_kind,
            }
        }
    }

    fn assembler() -> DatasetAssembler {
        DatasetAssembler::new("b0", "sc1.lidar.z01.b0")
    }

    #[test]
    fn test_assemble_shapes_and_values() {
        let parts = Parts::build();
        let dataset = assembler().assemble(parts.inputs()).unwrap();

        assert_eq!(dataset.num_beams(), 2);
        assert_eq!(dataset.num_gates(), 2);
        assert_eq!(dataset.range_gate, vec![0, 1]);
        assert_eq!(dataset.distance, vec![15.0, 45.0]);
        assert_eq!(dataset.wind_speed[[1, 1]], 1.3);
        assert_eq!(dataset.pitch, vec![0.1, 0.1]);
        assert_eq!(dataset.scan_kind, ScanKind::Stare);
        assert!(dataset.z[[0, 1]] > 44.9);
    }

    #[test]
    fn test_assembler_uses_supplied_scan_kind() {
        let parts = Parts::build();
        let vad = ScanKind::Vad;
        let inputs = AssemblyInputs {
            scan_kind: &vad,
            ..parts.inputs()
        };

        let dataset = assembler().assemble(inputs).unwrap();
        assert_eq!(dataset.scan_kind, ScanKind::Vad);
        assert_eq!(dataset.global_attrs["scan_type"], AttrValue::from("vad"));
        assert_eq!(
            dataset.global_attrs["scan_type_label"],
            AttrValue::from("Stare")
        );
    }

    #[test]
    fn test_variable_attributes() {
        let parts = Parts::build();
        let dataset = assembler().assemble(parts.inputs()).unwrap();

        for info in VARIABLES.iter() {
            let attrs = &dataset.variable_attrs[info.name];
            for key in ["standard_name", "long_name", "description", "units"] {
                assert!(attrs.contains_key(key), "{} lacks {}", info.name, key);
            }
        }

        let qc = &dataset.variable_attrs["qc_wind_speed"];
        assert_eq!(qc["bit_0_assessment"], AttrValue::from("Good"));
        assert_eq!(
            qc["bit_4_description"],
            AttrValue::from("Value rejected due to dynamic criterion.")
        );
        assert_eq!(qc["bit_1_assessment"], AttrValue::from("Bad"));
        assert_eq!(
            dataset.variable_attrs["probability"]["units"],
            AttrValue::from("unitless")
        );
    }

    #[test]
    fn test_global_attributes() {
        let parts = Parts::build();
        let dataset = assembler().assemble(parts.inputs()).unwrap();
        let g = &dataset.global_attrs;

        assert_eq!(g["system_id"], AttrValue::Int(116));
        assert_eq!(g["scan_type"], AttrValue::from("stare"));
        assert_eq!(g["data_level"], AttrValue::from("b0"));
        assert_eq!(g["datastream"], AttrValue::from("sc1.lidar.z01.b0"));
        assert_eq!(g["qc_probability_threshold"], AttrValue::Float(0.001));
        // Four samples cannot fill a default-sized bin.
        assert_eq!(g["qc_unevaluated_samples"], AttrValue::Int(4));
        assert!(!g["qc_underflow_bins"].as_text().unwrap().is_empty());
        let history = g["history"].to_string();
        assert!(history.starts_with("Generated by lidar-pipeline"));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let parts = Parts::build();
        let short_times = &parts.times[..1];
        let inputs = AssemblyInputs {
            times: short_times,
            ..parts.inputs()
        };

        match assembler().assemble(inputs) {
            Err(AssemblyError::DimensionMismatch {
                what,
                expected,
                found,
                ..
            }) => {
                assert_eq!(what, "times");
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("expected DimensionMismatch, got {:?}", other.map(|_| ())),
        }

        let wide = Array2::zeros((2, 3));
        let inputs = AssemblyInputs {
            snr: &wide,
            ..parts.inputs()
        };
        assert!(assembler().assemble(inputs).is_err());
    }

    #[test]
    fn test_attr_key_sanitizes() {
        assert_eq!(attr_key("Range gate length (m)"), "range_gate_length_m");
        assert_eq!(attr_key("Pulses/ray"), "pulses_ray");
    }
}
