//! Scan-pattern detection from beam pointing angles.
//!
//! Beams are clustered in (azimuth, elevation) by single linkage: two beams
//! are linked when both their circular azimuth difference and their
//! elevation difference are within the angle tolerance. Clusters that occur
//! often enough become pointing directions; the rest are settling beams.
//!
//! Beams are bucketed into tolerance-sized (azimuth, elevation) cells, with
//! azimuth cells wrapping past 360°. A cell is linked internally in one pass
//! and to each adjacent cell by at most one union, in parallel with rayon,
//! through a lock-free union-find. Component labels depend only on the partition, so the result
//! is deterministic.
//!
//! # Example
//!
//! ```
//! use lidar_pipeline::config::PatternConfig;
//! use lidar_pipeline::processors::scan_pattern::ScanPatternDetector;
//!
//! let azimuths = [0.0, 90.0, 180.0, 0.0, 90.0, 180.0];
//! let elevations = [45.0; 6];
//! let pattern = ScanPatternDetector::new(&PatternConfig::default())
//!     .detect(&azimuths, &elevations);
//! assert_eq!(pattern.directions.len(), 3);
//! assert_eq!(pattern.num_repetitions(), 2);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::config::PatternConfig;

/// Atomic Union-Find data structure for lock-free parallel merging.
///
/// Uses path compression with atomic compare-and-swap operations to safely
/// merge sets from multiple threads without locks.
pub struct AtomicUnionFind {
    parent: Vec<AtomicUsize>,
}

impl AtomicUnionFind {
    /// Create a new union-find structure where each element is its own parent.
    #[inline]
    pub fn new(size: usize) -> Self {
        let parent = (0..size).map(AtomicUsize::new).collect();
        Self { parent }
    }

    /// Find the root of the set containing `x` with path compression.
    #[inline]
    pub fn find(&self, mut x: usize) -> usize {
        loop {
            let p = self.parent[x].load(Ordering::Relaxed);
            if p == x {
                return x;
            }
            let gp = self.parent[p].load(Ordering::Relaxed);
            if gp != p {
                // Losing this race is harmless; x still reaches the root.
                let _ = self.parent[x].compare_exchange_weak(
                    p,
                    gp,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
            x = p;
        }
    }

    /// Union the sets containing `x` and `y`.
    ///
    /// Returns true if a merge actually occurred.
    #[inline]
    pub fn union(&self, x: usize, y: usize) -> bool {
        loop {
            let root_x = self.find(x);
            let root_y = self.find(y);

            if root_x == root_y {
                return false;
            }

            let (small, large) = if root_x < root_y {
                (root_x, root_y)
            } else {
                (root_y, root_x)
            };

            match self.parent[small].compare_exchange_weak(
                small,
                large,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }
}

/// One detected scan direction.
#[derive(Debug, Clone, PartialEq)]
pub struct PointingDirection {
    /// Circular mean of member azimuths, degrees in `[0, 360)`.
    pub azimuth: f64,
    /// Mean of member elevations, degrees.
    pub elevation: f64,
    /// Number of beams pointing this way.
    pub count: usize,
}

/// Position of one beam within the scan pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeamAssignment {
    /// Repetition index; `None` for incomplete repetitions and settling beams.
    pub scan_id: Option<usize>,
    /// Index into [`ScanPattern::directions`]; `None` for settling beams.
    pub beam_id: Option<usize>,
}

/// A beam whose angle belongs to no detected direction.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlingBeam {
    pub beam: usize,
    pub azimuth: f64,
    pub elevation: f64,
}

/// Result of scan-pattern detection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanPattern {
    /// Detected directions in order of first appearance.
    pub directions: Vec<PointingDirection>,
    /// Settling beams, kept for diagnostics.
    pub selected: Vec<SettlingBeam>,
    /// One entry per input beam.
    pub assignments: Vec<BeamAssignment>,
}

impl ScanPattern {
    pub fn scan_ids(&self) -> Vec<Option<usize>> {
        self.assignments.iter().map(|a| a.scan_id).collect()
    }

    pub fn beam_ids(&self) -> Vec<Option<usize>> {
        self.assignments.iter().map(|a| a.beam_id).collect()
    }

    /// Number of complete repetitions.
    pub fn num_repetitions(&self) -> usize {
        let mut ids: Vec<usize> = self.assignments.iter().filter_map(|a| a.scan_id).collect();
        ids.dedup();
        ids.len()
    }

    /// Beams on a detected direction whose repetition was incomplete.
    pub fn unresolved_beams(&self) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.beam_id.is_some() && a.scan_id.is_none())
            .count()
    }
}

/// Clusters beam angles and assigns (scanID, beamID) per beam.
#[derive(Debug, Clone)]
pub struct ScanPatternDetector {
    angle_tolerance: f64,
    min_occurrence: usize,
}

/// Smallest absolute difference between two azimuths, degrees.
#[inline]
pub fn azimuth_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

impl ScanPatternDetector {
    pub fn new(config: &PatternConfig) -> Self {
        Self {
            angle_tolerance: config.angle_tolerance,
            min_occurrence: config.min_occurrence.max(1),
        }
    }

    /// Detect the scan pattern of one file.
    ///
    /// # Arguments
    ///
    /// * `azimuths` - Beam azimuths in degrees, in time order
    /// * `elevations` - Beam elevations in degrees, same length
    pub fn detect(&self, azimuths: &[f64], elevations: &[f64]) -> ScanPattern {
        debug_assert_eq!(azimuths.len(), elevations.len());
        let n = azimuths.len().min(elevations.len());
        if n == 0 {
            return ScanPattern::default();
        }

        let labels = self.cluster(&azimuths[..n], &elevations[..n]);

        // Cluster ids are already in order of first appearance.
        let num_clusters = labels.iter().copied().max().map_or(0, |m| m + 1);
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); num_clusters];
        for (i, &label) in labels.iter().enumerate() {
            members[label].push(i);
        }

        let mut direction_of_cluster = vec![None; num_clusters];
        let mut directions = Vec::new();
        for (cluster, beams) in members.iter().enumerate() {
            if beams.len() >= self.min_occurrence {
                direction_of_cluster[cluster] = Some(directions.len());
                directions.push(mean_direction(beams, azimuths, elevations));
            }
        }

        let mut pattern = ScanPattern {
            directions,
            selected: Vec::new(),
            assignments: vec![BeamAssignment::default(); n],
        };

        let num_directions = pattern.directions.len();
        let mut seen = vec![false; num_directions];
        let mut cycle: Vec<usize> = Vec::new();
        let mut cycle_index = 0;

        for i in 0..n {
            let Some(direction) = direction_of_cluster[labels[i]] else {
                pattern.selected.push(SettlingBeam {
                    beam: i,
                    azimuth: azimuths[i],
                    elevation: elevations[i],
                });
                continue;
            };

            if seen[direction] {
                if close_cycle(&mut pattern.assignments, &cycle, &seen, cycle_index) {
                    cycle_index += 1;
                }
                cycle.clear();
                seen.iter_mut().for_each(|s| *s = false);
            }

            seen[direction] = true;
            cycle.push(i);
            pattern.assignments[i].beam_id = Some(direction);
        }
        close_cycle(&mut pattern.assignments, &cycle, &seen, cycle_index);

        log::debug!(
            "scan pattern: {} direction(s), {} repetition(s), {} settling beam(s), {} unresolved",
            num_directions,
            pattern.num_repetitions(),
            pattern.selected.len(),
            pattern.unresolved_beams()
        );

        pattern
    }

    /// Single-linkage cluster labels, numbered by first appearance.
    fn cluster(&self, azimuths: &[f64], elevations: &[f64]) -> Vec<usize> {
        let n = azimuths.len();
        let tol = self.angle_tolerance;
        let az: Vec<f64> = azimuths.iter().map(|a| a.rem_euclid(360.0)).collect();
        let az_cells = (360.0 / tol).ceil().max(1.0) as i64;

        // Cells are `tol` wide on both axes, so only adjacent cells can link.
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for i in 0..n {
            if !(az[i].is_finite() && elevations[i].is_finite()) {
                continue;
            }
            let key = (
                ((az[i] / tol).floor() as i64).rem_euclid(az_cells),
                (elevations[i] / tol).floor() as i64,
            );
            cells.entry(key).or_default().push(i);
        }

        let linked = |i: usize, j: usize| {
            azimuth_difference(az[i], az[j]) <= tol && (elevations[i] - elevations[j]).abs() <= tol
        };
        let uf = AtomicUnionFind::new(n);

        cells.par_iter().for_each(|(&(ca, ce), members)| {
            // Members of one cell are all within tolerance of each other.
            for pair in members.windows(2) {
                uf.union(pair[0], pair[1]);
            }
            for da in -1..=1 {
                for de in -1..=1 {
                    let neighbor = (ca.saturating_add(da).rem_euclid(az_cells), ce.saturating_add(de));
                    // Each unordered cell pair once; one link merges both cells.
                    if neighbor <= (ca, ce) {
                        continue;
                    }
                    let Some(others) = cells.get(&neighbor) else {
                        continue;
                    };
                    if let Some((i, j)) = members
                        .iter()
                        .flat_map(|&i| others.iter().map(move |&j| (i, j)))
                        .find(|&(i, j)| linked(i, j))
                    {
                        uf.union(i, j);
                    }
                }
            }
        });

        let mut root_to_label: HashMap<usize, usize> = HashMap::new();
        (0..n)
            .map(|i| {
                let next = root_to_label.len();
                *root_to_label.entry(uf.find(i)).or_insert(next)
            })
            .collect()
    }
}

fn mean_direction(beams: &[usize], azimuths: &[f64], elevations: &[f64]) -> PointingDirection {
    let (mut sin_sum, mut cos_sum, mut el_sum) = (0.0, 0.0, 0.0);
    for &b in beams {
        let a = azimuths[b].to_radians();
        sin_sum += a.sin();
        cos_sum += a.cos();
        el_sum += elevations[b];
    }
    PointingDirection {
        azimuth: sin_sum.atan2(cos_sum).to_degrees().rem_euclid(360.0),
        elevation: el_sum / beams.len() as f64,
        count: beams.len(),
    }
}

/// Assign `index` to the cycle's beams if it visited every direction.
fn close_cycle(
    assignments: &mut [BeamAssignment],
    cycle: &[usize],
    seen: &[bool],
    index: usize,
) -> bool {
    if cycle.is_empty() || !seen.iter().all(|&s| s) {
        return false;
    }
    for &b in cycle {
        assignments[b].scan_id = Some(index);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(tol: f64, min_occurrence: usize) -> ScanPatternDetector {
        ScanPatternDetector::new(&PatternConfig {
            angle_tolerance: tol,
            min_occurrence,
        })
    }

    /// `reps` repetitions over `dirs` azimuths with small deterministic jitter.
    fn repeated(dirs: &[f64], reps: usize, elevation: f64) -> (Vec<f64>, Vec<f64>) {
        let mut az = Vec::new();
        let mut el = Vec::new();
        for r in 0..reps {
            for (k, &d) in dirs.iter().enumerate() {
                let jitter = 0.02 * (((r + k) % 3) as f64 - 1.0);
                az.push(d + jitter);
                el.push(elevation - jitter);
            }
        }
        (az, el)
    }

    #[test]
    fn test_four_directions_five_repetitions() {
        let (az, el) = repeated(&[0.0, 90.0, 180.0, 270.0], 5, 60.0);
        let pattern = detector(0.25, 2).detect(&az, &el);

        assert_eq!(pattern.directions.len(), 4);
        assert!(pattern.directions.iter().all(|d| d.count == 5));
        assert_eq!(pattern.num_repetitions(), 5);
        assert_eq!(pattern.unresolved_beams(), 0);
        assert!(pattern.selected.is_empty());

        for (i, a) in pattern.assignments.iter().enumerate() {
            assert_eq!(a.scan_id, Some(i / 4));
            assert_eq!(a.beam_id, Some(i % 4));
        }
        assert!((pattern.directions[1].azimuth - 90.0).abs() < 0.05);
        assert!((pattern.directions[1].elevation - 60.0).abs() < 0.05);
    }

    #[test]
    fn test_partial_final_repetition_unresolved() {
        let (mut az, mut el) = repeated(&[10.0, 20.0, 30.0, 40.0], 2, 45.0);
        az.extend([10.0, 20.0]);
        el.extend([45.0, 45.0]);

        let pattern = detector(0.25, 2).detect(&az, &el);
        assert_eq!(pattern.directions.len(), 4);
        assert_eq!(pattern.num_repetitions(), 2);
        assert_eq!(pattern.unresolved_beams(), 2);
        assert_eq!(
            pattern.assignments[8],
            BeamAssignment {
                scan_id: None,
                beam_id: Some(0)
            }
        );
        assert_eq!(pattern.assignments[9].beam_id, Some(1));
        assert_eq!(pattern.assignments[7].scan_id, Some(1));
    }

    #[test]
    fn test_incomplete_middle_repetition_keeps_numbering() {
        let az = vec![
            0.0, 90.0, 180.0, 270.0, 0.0, 90.0, 270.0, 0.0, 90.0, 180.0, 270.0,
        ];
        let el = vec![45.0; 11];

        let pattern = detector(0.25, 2).detect(&az, &el);
        assert_eq!(pattern.directions.len(), 4);
        assert_eq!(
            pattern.scan_ids(),
            vec![
                Some(0),
                Some(0),
                Some(0),
                Some(0),
                None,
                None,
                None,
                Some(1),
                Some(1),
                Some(1),
                Some(1)
            ]
        );
        assert_eq!(pattern.num_repetitions(), 2);
        assert_eq!(pattern.unresolved_beams(), 3);
    }

    #[test]
    fn test_long_stare_is_one_direction() {
        let n = 50_000;
        let az: Vec<f64> = (0..n).map(|i| 0.01 * ((i % 5) as f64 - 2.0)).collect();
        let el = vec![90.0; n];

        let pattern = detector(0.25, 2).detect(&az, &el);
        assert_eq!(pattern.directions.len(), 1);
        assert_eq!(pattern.directions[0].count, n);
        assert_eq!(pattern.num_repetitions(), n);
    }

    #[test]
    fn test_settling_beams_selected() {
        let az = vec![0.0, 37.0, 90.0, 0.0, 90.0, 0.0, 90.0];
        let el = vec![45.0; 7];

        let pattern = detector(0.25, 2).detect(&az, &el);
        assert_eq!(pattern.directions.len(), 2);
        assert_eq!(pattern.selected.len(), 1);
        assert_eq!(pattern.selected[0].beam, 1);
        assert_eq!(pattern.assignments[1], BeamAssignment::default());
        assert_eq!(pattern.num_repetitions(), 3);
        assert_eq!(pattern.assignments[2].scan_id, Some(0));
    }

    #[test]
    fn test_azimuth_wrap_joins_cluster() {
        let az = vec![359.9, 180.0, 0.05, 180.1, 359.95, 179.95];
        let el = vec![30.0; 6];

        let pattern = detector(0.25, 2).detect(&az, &el);
        assert_eq!(pattern.directions.len(), 2);
        assert_eq!(pattern.directions[0].count, 3);
        assert!(azimuth_difference(pattern.directions[0].azimuth, 0.0) < 0.1);
        assert_eq!(pattern.num_repetitions(), 3);
    }

    #[test]
    fn test_elevation_only_pattern() {
        let (el, az) = {
            let (e, _) = repeated(&[10.0, 20.0, 30.0], 3, 0.0);
            (e, vec![270.0; 9])
        };
        let pattern = detector(0.25, 2).detect(&az, &el);
        assert_eq!(pattern.directions.len(), 3);
        assert_eq!(pattern.num_repetitions(), 3);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let (az, el) = repeated(&[5.0, 65.0, 125.0, 185.0, 245.0, 305.0], 20, 75.0);
        let d = detector(0.25, 2);
        let first = d.detect(&az, &el);
        for _ in 0..5 {
            assert_eq!(d.detect(&az, &el), first);
        }
    }

    #[test]
    fn test_single_linkage_chains() {
        // 0.0 - 0.2 - 0.4 chain into one direction at tolerance 0.25.
        let az = vec![0.0, 0.2, 0.4, 0.0, 0.2, 0.4];
        let el = vec![0.0; 6];
        let pattern = detector(0.25, 2).detect(&az, &el);
        assert_eq!(pattern.directions.len(), 1);
        assert_eq!(pattern.directions[0].count, 6);
    }

    #[test]
    fn test_empty_input() {
        let pattern = detector(0.25, 2).detect(&[], &[]);
        assert!(pattern.directions.is_empty());
        assert!(pattern.assignments.is_empty());
    }

    #[test]
    fn test_union_find() {
        let uf = AtomicUnionFind::new(4);
        assert!(uf.union(0, 1));
        assert!(!uf.union(1, 0));
        assert_eq!(uf.find(0), uf.find(1));
        assert_ne!(uf.find(2), uf.find(3));
    }
}
