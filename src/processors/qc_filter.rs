//! Quality control of radial wind speed.
//!
//! Every sample gets a bit-packed `u16` flag. Bit 0 means "value retained"
//! and is never set, so a flag of 0 is good. Each [`QcCriterion`] owns one
//! higher bit and failing criteria are OR-combined.
//!
//! The hard criteria are simple limits on SNR, radial speed and distance.
//! The dynamic criterion works on samples that pass them:
//!
//! 1. Samples are binned along the configured axes and each bin with enough
//!    members gets a median velocity and median SNR.
//! 2. `rws_norm` and `snr_norm` are the sample's deviations from those
//!    medians.
//! 3. A Gaussian kernel density over the (`rws_norm`, `snr_norm`) plane is
//!    evaluated at every sample.
//! 4. A sample is rejected when its density is strictly below the threshold
//!    and its `|rws_norm|` strictly exceeds the fluctuation limit.
//!
//! Densities are summed in a fixed order so repeated runs are bit-identical
//! even though samples are evaluated in parallel with rayon.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::Array2;
use rayon::prelude::*;

use crate::config::{BinAxis, QcConfig, ThresholdConfig};
use crate::core::transforms::GeometryGrid;

/// A quality-control test with its reserved flag bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QcCriterion {
    /// SNR below the minimum or undefined.
    Snr,
    /// Absolute radial speed above the maximum.
    RwsRange,
    /// Distance outside the configured window.
    Range,
    /// Low-probability outlier in the normalized feature plane.
    Dynamic,
}

impl QcCriterion {
    pub const ALL: [QcCriterion; 4] = [
        QcCriterion::Snr,
        QcCriterion::RwsRange,
        QcCriterion::Range,
        QcCriterion::Dynamic,
    ];

    pub fn bit(self) -> u8 {
        match self {
            QcCriterion::Snr => 1,
            QcCriterion::RwsRange => 2,
            QcCriterion::Range => 3,
            QcCriterion::Dynamic => 4,
        }
    }

    pub fn mask(self) -> u16 {
        1 << self.bit()
    }

    pub fn name(self) -> &'static str {
        match self {
            QcCriterion::Snr => "snr",
            QcCriterion::RwsRange => "rws_range",
            QcCriterion::Range => "range",
            QcCriterion::Dynamic => "dynamic",
        }
    }

    pub fn description(self) -> String {
        format!("Value rejected due to {} criterion.", self.name())
    }
}

impl fmt::Display for QcCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-sample and per-beam quantities the filter reads.
///
/// Grids have shape `(beams, gates)`; `distance` has one entry per gate and
/// the per-beam slices one entry per beam.
#[derive(Debug, Clone, Copy)]
pub struct QcInputs<'a> {
    pub wind_speed: &'a Array2<f64>,
    pub snr: &'a Array2<f64>,
    pub distance: &'a [f64],
    /// Seconds since the first beam.
    pub time_s: &'a [f64],
    pub azimuth: &'a [f64],
    pub elevation: &'a [f64],
    pub geometry: &'a GeometryGrid,
}

impl QcInputs<'_> {
    fn axis_value(&self, axis: BinAxis, beam: usize, gate: usize) -> f64 {
        match axis {
            BinAxis::Range => self.distance[gate],
            BinAxis::Time => self.time_s[beam],
            BinAxis::Azimuth => self.azimuth[beam],
            BinAxis::Elevation => self.elevation[beam],
            BinAxis::X => self.geometry.x[[beam, gate]],
            BinAxis::Y => self.geometry.y[[beam, gate]],
            BinAxis::Z => self.geometry.z[[beam, gate]],
        }
    }
}

/// A bin too small to evaluate with the dynamic criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinUnderflow {
    /// Bin index along each configured axis.
    pub key: Vec<(BinAxis, i64)>,
    pub population: usize,
}

impl fmt::Display for BinUnderflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, (axis, index)) in self.key.iter().enumerate() {
            if k > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", axis.name(), index)?;
        }
        write!(f, " (n={})", self.population)
    }
}

/// Numeric limits actually applied, for provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct QcThresholds {
    /// Density threshold on the linear scale.
    pub probability: f64,
    /// `"fixed"` or `"adaptive"`.
    pub probability_mode: &'static str,
    pub rws_norm_limit: f64,
    pub sigma_rws: f64,
    pub sigma_snr: f64,
    pub min_bin_population: usize,
    pub snr_min: Option<f64>,
    pub rws_max: Option<f64>,
    pub distance_min: Option<f64>,
    pub distance_max: Option<f64>,
}

/// Output of [`QcFilterEngine::apply`].
#[derive(Debug, Clone)]
pub struct QcResult {
    pub flags: Array2<u16>,
    /// NaN where the dynamic criterion was not evaluated.
    pub rws_norm: Array2<f64>,
    pub snr_norm: Array2<f64>,
    pub probability: Array2<f64>,
    pub legend: Vec<QcCriterion>,
    pub thresholds: QcThresholds,
    pub underflow: Vec<BinUnderflow>,
    /// Samples that passed the hard criteria but sat in underflow bins.
    pub unevaluated_samples: usize,
}

impl QcResult {
    /// Number of samples with `criterion`'s bit set.
    pub fn count(&self, criterion: QcCriterion) -> usize {
        let mask = criterion.mask();
        self.flags.iter().filter(|&&f| f & mask != 0).count()
    }

    pub fn retained(&self) -> usize {
        self.flags.iter().filter(|&&f| f == 0).count()
    }
}

/// Applies the hard and dynamic QC criteria.
#[derive(Debug, Clone)]
pub struct QcFilterEngine {
    config: QcConfig,
}

/// Median of a non-empty slice of finite values; averages the middle pair.
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Linearly interpolated percentile `q` in `[0, 1]` of a non-empty slice.
fn percentile(values: &mut [f64], q: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (pos - lo as f64)
}

struct Evaluated {
    /// (beam, gate) of the sample.
    at: (usize, usize),
    rws_norm: f64,
    snr_norm: f64,
}

impl QcFilterEngine {
    pub fn new(config: &QcConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &QcConfig {
        &self.config
    }

    /// Run every criterion over one scan.
    pub fn apply(&self, inputs: &QcInputs<'_>) -> QcResult {
        let shape = inputs.wind_speed.dim();
        debug_assert_eq!(inputs.snr.dim(), shape);
        debug_assert_eq!(inputs.geometry.dim(), shape);
        debug_assert_eq!(inputs.distance.len(), shape.1);

        let mut flags = Array2::<u16>::zeros(shape);
        let mut rws_norm = Array2::from_elem(shape, f64::NAN);
        let mut snr_norm = Array2::from_elem(shape, f64::NAN);
        let mut probability = Array2::from_elem(shape, f64::NAN);

        let candidates = self.apply_hard_criteria(inputs, &mut flags);
        let (evaluated, underflow, unevaluated_samples) = self.normalize(inputs, &candidates);

        let density = self.density(&evaluated);
        let threshold = self.threshold(&evaluated, &density);

        let limit = self.config.rws_norm_limit;
        for (sample, &p) in evaluated.iter().zip(&density) {
            rws_norm[sample.at] = sample.rws_norm;
            snr_norm[sample.at] = sample.snr_norm;
            probability[sample.at] = p;
            if p < threshold && sample.rws_norm.abs() > limit {
                flags[sample.at] |= QcCriterion::Dynamic.mask();
            }
        }

        if !underflow.is_empty() {
            log::warn!(
                "{} QC bin(s) below minimum population {}; {} sample(s) not evaluated by the dynamic filter",
                underflow.len(),
                self.config.min_bin_population,
                unevaluated_samples
            );
        }

        QcResult {
            flags,
            rws_norm,
            snr_norm,
            probability,
            legend: QcCriterion::ALL.to_vec(),
            thresholds: self.thresholds(threshold),
            underflow,
            unevaluated_samples,
        }
    }

    /// Set hard-criterion bits and return samples eligible for the dynamic
    /// filter, in row-major order.
    fn apply_hard_criteria(
        &self,
        inputs: &QcInputs<'_>,
        flags: &mut Array2<u16>,
    ) -> Vec<(usize, usize)> {
        let cfg = &self.config;
        let (beams, gates) = flags.dim();
        let mut candidates = Vec::new();

        for i in 0..beams {
            for j in 0..gates {
                let v = inputs.wind_speed[[i, j]];
                let snr = inputs.snr[[i, j]];
                let d = inputs.distance[j];
                let mut flag = 0u16;

                if let Some(min) = cfg.snr_min {
                    if !(snr >= min) {
                        flag |= QcCriterion::Snr.mask();
                    }
                }
                if let Some(max) = cfg.rws_max {
                    if v.abs() > max {
                        flag |= QcCriterion::RwsRange.mask();
                    }
                }
                let below = cfg.distance_min.is_some_and(|lo| d < lo);
                let above = cfg.distance_max.is_some_and(|hi| d > hi);
                if below || above {
                    flag |= QcCriterion::Range.mask();
                }

                flags[[i, j]] = flag;
                if flag == 0 && v.is_finite() && snr.is_finite() {
                    candidates.push((i, j));
                }
            }
        }
        candidates
    }

    /// Bin candidates, compute per-bin medians and normalized features.
    fn normalize(
        &self,
        inputs: &QcInputs<'_>,
        candidates: &[(usize, usize)],
    ) -> (Vec<Evaluated>, Vec<BinUnderflow>, usize) {
        let specs = &self.config.bins;

        // Samples with an undefined axis value cannot be placed in a bin.
        let placed: Vec<(usize, usize)> = candidates
            .iter()
            .copied()
            .filter(|&(i, j)| {
                specs
                    .iter()
                    .all(|s| inputs.axis_value(s.axis, i, j).is_finite())
            })
            .collect();

        let origins: Vec<f64> = specs
            .iter()
            .map(|s| {
                let min = placed
                    .iter()
                    .map(|&(i, j)| inputs.axis_value(s.axis, i, j))
                    .fold(f64::INFINITY, f64::min);
                min.floor() - s.width / 2.0
            })
            .collect();

        let mut bins: BTreeMap<Vec<i64>, Vec<(usize, usize)>> = BTreeMap::new();
        for &(i, j) in &placed {
            let key = specs
                .iter()
                .zip(&origins)
                .map(|(s, &origin)| ((inputs.axis_value(s.axis, i, j) - origin) / s.width).floor() as i64)
                .collect();
            bins.entry(key).or_default().push((i, j));
        }

        let mut evaluated = Vec::with_capacity(placed.len());
        let mut underflow = Vec::new();
        let mut unevaluated = candidates.len() - placed.len();

        for (key, members) in bins {
            if members.len() < self.config.min_bin_population {
                unevaluated += members.len();
                underflow.push(BinUnderflow {
                    key: specs.iter().map(|s| s.axis).zip(key).collect(),
                    population: members.len(),
                });
                continue;
            }

            let mut v: Vec<f64> = members.iter().map(|&at| inputs.wind_speed[at]).collect();
            let mut s: Vec<f64> = members.iter().map(|&at| inputs.snr[at]).collect();
            let median_v = median(&mut v);
            let median_snr = median(&mut s);

            evaluated.extend(members.into_iter().map(|at| Evaluated {
                at,
                rws_norm: inputs.wind_speed[at] - median_v,
                snr_norm: inputs.snr[at] - median_snr,
            }));
        }

        (evaluated, underflow, unevaluated)
    }

    /// Kernel density at every evaluated sample, in `evaluated` order.
    fn density(&self, evaluated: &[Evaluated]) -> Vec<f64> {
        let n = evaluated.len();
        if n == 0 {
            return Vec::new();
        }
        let sr = self.config.sigma_rws;
        let ss = self.config.sigma_snr;
        let reach = self.config.kernel_cutoff * sr;
        let norm = 1.0 / (n as f64 * 2.0 * std::f64::consts::PI * sr * ss);

        // Sort by (rws_norm, beam, gate) so both the window and the summation
        // order are fixed.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            evaluated[a]
                .rws_norm
                .total_cmp(&evaluated[b].rws_norm)
                .then(evaluated[a].at.cmp(&evaluated[b].at))
        });
        let r: Vec<f64> = order.iter().map(|&k| evaluated[k].rws_norm).collect();
        let s: Vec<f64> = order.iter().map(|&k| evaluated[k].snr_norm).collect();

        let sorted_density: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|p| {
                let lo = r.partition_point(|&x| x < r[p] - reach);
                let hi = r.partition_point(|&x| x <= r[p] + reach);
                let mut sum = 0.0;
                for q in lo..hi {
                    let dr = (r[q] - r[p]) / sr;
                    let ds = (s[q] - s[p]) / ss;
                    sum += (-0.5 * (dr * dr + ds * ds)).exp();
                }
                sum * norm
            })
            .collect();

        let mut density = vec![0.0; n];
        for (pos, &k) in order.iter().enumerate() {
            density[k] = sorted_density[pos];
        }
        density
    }

    fn threshold(&self, evaluated: &[Evaluated], density: &[f64]) -> f64 {
        match self.config.threshold {
            ThresholdConfig::Fixed { value } => value,
            ThresholdConfig::Adaptive {
                min_probability_range,
                max_probability_range,
                bins_per_decade,
            } => adaptive_threshold(
                evaluated,
                density,
                min_probability_range,
                max_probability_range,
                bins_per_decade,
                self.config.rws_norm_limit,
            ),
        }
    }

    fn thresholds(&self, probability: f64) -> QcThresholds {
        let cfg = &self.config;
        QcThresholds {
            probability,
            probability_mode: match cfg.threshold {
                ThresholdConfig::Fixed { .. } => "fixed",
                ThresholdConfig::Adaptive { .. } => "adaptive",
            },
            rws_norm_limit: cfg.rws_norm_limit,
            sigma_rws: cfg.sigma_rws,
            sigma_snr: cfg.sigma_snr,
            min_bin_population: cfg.min_bin_population,
            snr_min: cfg.snr_min,
            rws_max: cfg.rws_max,
            distance_min: cfg.distance_min,
            distance_max: cfg.distance_max,
        }
    }
}

/// Walk log-spaced probability bins from high to low and return the upper
/// edge of the first bin whose 90th-percentile `|rws_norm|` exceeds `limit`.
/// Falls back to `min_p`.
fn adaptive_threshold(
    evaluated: &[Evaluated],
    density: &[f64],
    min_p: f64,
    max_p: f64,
    bins_per_decade: usize,
    limit: f64,
) -> f64 {
    let decades = (max_p / min_p).log10();
    let nbins = ((decades * bins_per_decade as f64) - 1e-9).ceil().max(1.0) as usize;
    let edges: Vec<f64> = (0..=nbins)
        .map(|k| min_p * 10f64.powf(decades * k as f64 / nbins as f64))
        .collect();

    for k in (0..nbins).rev() {
        let (lo, hi) = (edges[k], edges[k + 1]);
        let top = k + 1 == nbins;
        let mut spread: Vec<f64> = evaluated
            .iter()
            .zip(density)
            .filter(|&(_, &p)| p >= lo && (p < hi || (top && p <= hi)))
            .map(|(e, _)| e.rws_norm.abs())
            .collect();
        if spread.is_empty() {
            continue;
        }
        if percentile(&mut spread, 0.9) > limit {
            log::debug!("adaptive QC threshold {:.3e} (bin {} of {})", hi, k, nbins);
            return hi;
        }
    }
    min_p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinSpec;
    use crate::core::transforms::beams_to_cartesian;
    use ndarray::array;

    struct Fixture {
        wind: Array2<f64>,
        snr: Array2<f64>,
        distance: Vec<f64>,
        time_s: Vec<f64>,
        azimuth: Vec<f64>,
        elevation: Vec<f64>,
        geometry: GeometryGrid,
    }

    impl Fixture {
        fn new(wind: Array2<f64>) -> Self {
            let (beams, gates) = wind.dim();
            let distance: Vec<f64> = (0..gates).map(|j| 15.0 + 30.0 * j as f64).collect();
            let azimuth = vec![0.0; beams];
            let elevation = vec![90.0; beams];
            let geometry = beams_to_cartesian(&distance, &azimuth, &elevation);
            Self {
                snr: Array2::from_elem(wind.dim(), -3.0),
                wind,
                distance,
                time_s: (0..beams).map(|i| i as f64).collect(),
                azimuth,
                elevation,
                geometry,
            }
        }

        /// Five samples near 1 m/s and one at 10 m/s in beam 1, gate 2.
        fn with_outlier() -> Self {
            Self::new(array![[0.9, 1.0, 1.1], [0.95, 1.05, 10.0]])
        }

        fn inputs(&self) -> QcInputs<'_> {
            QcInputs {
                wind_speed: &self.wind,
                snr: &self.snr,
                distance: &self.distance,
                time_s: &self.time_s,
                azimuth: &self.azimuth,
                elevation: &self.elevation,
                geometry: &self.geometry,
            }
        }
    }

    /// One bin covering every sample.
    fn single_bin_config(threshold: f64) -> QcConfig {
        QcConfig {
            bins: vec![
                BinSpec {
                    axis: BinAxis::Range,
                    width: 1e4,
                },
                BinSpec {
                    axis: BinAxis::Time,
                    width: 1e6,
                },
            ],
            min_bin_population: 3,
            threshold: ThresholdConfig::Fixed { value: threshold },
            ..QcConfig::default()
        }
    }

    fn run(config: &QcConfig, fixture: &Fixture) -> QcResult {
        QcFilterEngine::new(config).apply(&fixture.inputs())
    }

    #[test]
    fn test_criterion_bits_and_legend() {
        let masks: Vec<u16> = QcCriterion::ALL.iter().map(|c| c.mask()).collect();
        assert_eq!(masks, vec![2, 4, 8, 16]);
        assert_eq!(
            QcCriterion::Dynamic.description(),
            "Value rejected due to dynamic criterion."
        );
    }

    #[test]
    fn test_outlier_gets_dynamic_bit() {
        let fixture = Fixture::with_outlier();
        let result = run(&single_bin_config(0.1), &fixture);

        assert_eq!(result.flags, array![[0u16, 0, 0], [0, 0, 16]]);
        assert_eq!(result.count(QcCriterion::Dynamic), 1);
        assert_eq!(result.retained(), 5);
        assert!(result.underflow.is_empty());
        assert_eq!(result.unevaluated_samples, 0);

        // Median of the six velocities is 1.025.
        assert!((result.rws_norm[[1, 2]] - 8.975).abs() < 1e-12);
        assert_eq!(result.snr_norm[[0, 0]], 0.0);

        // The outlier's kernel only reaches itself.
        let alone = 1.0 / (6.0 * 2.0 * std::f64::consts::PI * 0.5 * 1.0);
        assert!((result.probability[[1, 2]] - alone).abs() < 1e-15);
        assert!(result.probability[[0, 1]] > 0.2);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let fixture = Fixture::with_outlier();
        let config = single_bin_config(0.1);
        let first = run(&config, &fixture);
        let second = run(&config, &fixture);

        assert_eq!(first.flags, second.flags);
        for (a, b) in first.probability.iter().zip(second.probability.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_sample_at_threshold_passes() {
        let fixture = Fixture::with_outlier();
        let p = run(&single_bin_config(0.1), &fixture).probability[[1, 2]];

        let at = run(&single_bin_config(p), &fixture);
        assert_eq!(at.flags[[1, 2]], 0);

        let above = run(&single_bin_config(p * (1.0 + 1e-9)), &fixture);
        assert_eq!(above.flags[[1, 2]], QcCriterion::Dynamic.mask());
    }

    #[test]
    fn test_zero_threshold_rejects_nothing() {
        let fixture = Fixture::with_outlier();
        let result = run(&single_bin_config(0.0), &fixture);
        assert_eq!(result.count(QcCriterion::Dynamic), 0);
        assert!(result.probability.iter().all(|p| p.is_finite() && *p > 0.0));
    }

    #[test]
    fn test_underflow_bins_unflagged_and_recorded() {
        let fixture = Fixture::with_outlier();
        let mut config = single_bin_config(0.1);
        config.bins = vec![BinSpec {
            axis: BinAxis::Range,
            width: 1.0,
        }];

        let result = run(&config, &fixture);
        assert!(result.flags.iter().all(|&f| f == 0));
        assert_eq!(result.underflow.len(), 3);
        assert!(result.underflow.iter().all(|u| u.population == 2));
        assert_eq!(result.unevaluated_samples, 6);
        assert!(result.probability.iter().all(|p| p.is_nan()));
        assert_eq!(result.underflow[0].to_string(), "range=0 (n=2)");
    }

    #[test]
    fn test_hard_criteria_or_combined() {
        let mut fixture = Fixture::with_outlier();
        fixture.wind[[0, 0]] = 40.0;
        fixture.snr[[0, 0]] = -30.0;
        let mut config = single_bin_config(0.1);
        config.distance_max = Some(50.0);

        let result = run(&config, &fixture);
        let snr_and_speed = QcCriterion::Snr.mask() | QcCriterion::RwsRange.mask();
        let range = QcCriterion::Range.mask();
        assert_eq!(
            result.flags,
            array![[snr_and_speed, 0, range], [0, 0, range]]
        );
        assert!(result.rws_norm[[0, 0]].is_nan());
    }

    #[test]
    fn test_undefined_snr_fails_snr_criterion() {
        let mut fixture = Fixture::with_outlier();
        fixture.snr[[0, 1]] = f64::NAN;
        let result = run(&single_bin_config(0.1), &fixture);
        assert_eq!(result.flags[[0, 1]], QcCriterion::Snr.mask());

        let mut config = single_bin_config(0.1);
        config.snr_min = None;
        let result = run(&config, &fixture);
        assert_eq!(result.flags[[0, 1]], 0);
        assert!(result.probability[[0, 1]].is_nan());
    }

    #[test]
    fn test_adaptive_threshold() {
        let fixture = Fixture::with_outlier();
        let mut config = single_bin_config(0.1);
        config.threshold = ThresholdConfig::Adaptive {
            min_probability_range: 1e-3,
            max_probability_range: 1.0,
            bins_per_decade: 1,
        };

        let result = run(&config, &fixture);
        assert!((result.thresholds.probability - 0.1).abs() < 1e-9);
        assert_eq!(result.thresholds.probability_mode, "adaptive");
        assert_eq!(result.flags[[1, 2]], QcCriterion::Dynamic.mask());
        assert_eq!(result.count(QcCriterion::Dynamic), 1);
    }

    #[test]
    fn test_adaptive_threshold_falls_back_to_lower_bound() {
        let fixture = Fixture::new(array![[1.0, 1.1, 0.9], [1.0, 1.05, 0.95]]);
        let mut config = single_bin_config(0.1);
        config.threshold = ThresholdConfig::Adaptive {
            min_probability_range: 1e-4,
            max_probability_range: 1.0,
            bins_per_decade: 2,
        };

        let result = run(&config, &fixture);
        assert_eq!(result.thresholds.probability, 1e-4);
        assert!(result.flags.iter().all(|&f| f == 0));
    }

    #[test]
    fn test_median_and_percentile() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!((percentile(&mut [1.0, 2.0, 3.0, 4.0, 5.0], 0.9) - 4.6).abs() < 1e-12);
    }
}
