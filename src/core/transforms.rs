//! Beam geometry and derived quantities.
//!
//! This module converts gate indices to distances, projects the
//! (beam, gate) grid from spherical lidar coordinates to Cartesian
//! coordinates, and derives SNR from intensity. The per-beam projection is
//! parallelized using Rayon.

use ndarray::Array2;
use rayon::prelude::*;

/// Cartesian coordinates of every (beam, gate) sample, meters.
///
/// x points east, y north and z up, with the lidar at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryGrid {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub z: Array2<f64>,
}

impl GeometryGrid {
    /// (beams, gates)
    pub fn dim(&self) -> (usize, usize) {
        self.x.dim()
    }
}

/// Gate-center distances for both gate spacings the instrument can report.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeAxes {
    /// Centers using the native range-gate length.
    pub distance: Vec<f64>,
    /// Centers using the overlapping-mode step.
    pub distance_overlapped: Vec<f64>,
}

/// Convert one spherical lidar coordinate to Cartesian.
///
/// Azimuth is measured clockwise from north and elevation up from the
/// horizon, both in degrees. With `A = 90° - azimuth` and `E = elevation`:
/// `x = r cos E cos A`, `y = r cos E sin A`, `z = r sin E`.
///
/// # Example
///
/// ```
/// use lidar_pipeline::core::transforms::lidar_xyz;
///
/// let [x, y, z] = lidar_xyz(100.0, 0.0, 90.0);
/// assert!((x - 100.0).abs() < 1e-9 && y.abs() < 1e-9 && z.abs() < 1e-9);
/// ```
#[inline]
pub fn lidar_xyz(r: f64, elevation_deg: f64, azimuth_deg: f64) -> [f64; 3] {
    let a = (90.0 - azimuth_deg).to_radians();
    let e = elevation_deg.to_radians();
    let horizontal = r * e.cos();
    [horizontal * a.cos(), horizontal * a.sin(), r * e.sin()]
}

/// Gate-center distances `i * step + gate_length / 2`.
///
/// # Arguments
///
/// * `num_gates` - Number of range gates
/// * `step` - Spacing between consecutive gates, meters
/// * `gate_length` - Native gate length; half of it offsets every center
pub fn gate_distances(num_gates: usize, step: f64, gate_length: f64) -> Vec<f64> {
    let offset = gate_length / 2.0;
    (0..num_gates).map(|i| i as f64 * step + offset).collect()
}

/// Build the native and overlapped distance axes.
///
/// Both share the half-native-gate offset; only the step differs.
pub fn range_axes(num_gates: usize, gate_length: f64, overlapping_distance: f64) -> RangeAxes {
    RangeAxes {
        distance: gate_distances(num_gates, gate_length, gate_length),
        distance_overlapped: gate_distances(num_gates, overlapping_distance, gate_length),
    }
}

/// Project every (beam, gate) sample to Cartesian coordinates.
///
/// # Arguments
///
/// * `distances` - Gate-center distances, one per gate
/// * `azimuths` - Beam azimuths in degrees, one per beam
/// * `elevations` - Beam elevations in degrees, one per beam
///
/// # Returns
///
/// A [`GeometryGrid`] with shape `[num_beams][num_gates]`.
pub fn beams_to_cartesian(distances: &[f64], azimuths: &[f64], elevations: &[f64]) -> GeometryGrid {
    debug_assert_eq!(
        azimuths.len(),
        elevations.len(),
        "azimuths and elevations must have same length"
    );

    let rows: Vec<(Vec<f64>, Vec<f64>, Vec<f64>)> = azimuths
        .par_iter()
        .zip(elevations.par_iter())
        .map(|(&azi, &ele)| {
            let mut x_row = Vec::with_capacity(distances.len());
            let mut y_row = Vec::with_capacity(distances.len());
            let mut z_row = Vec::with_capacity(distances.len());

            for &r in distances {
                let [x, y, z] = lidar_xyz(r, ele, azi);
                x_row.push(x);
                y_row.push(y);
                z_row.push(z);
            }

            (x_row, y_row, z_row)
        })
        .collect();

    let shape = (rows.len(), distances.len());
    let mut grid = GeometryGrid {
        x: Array2::zeros(shape),
        y: Array2::zeros(shape),
        z: Array2::zeros(shape),
    };

    for (i, (x_row, y_row, z_row)) in rows.into_iter().enumerate() {
        for j in 0..shape.1 {
            grid.x[[i, j]] = x_row[j];
            grid.y[[i, j]] = y_row[j];
            grid.z[[i, j]] = z_row[j];
        }
    }

    grid
}

/// SNR in dB from instrument intensity (SNR + 1).
///
/// Intensities at or below 1 have no defined SNR and map to NaN.
#[inline]
pub fn snr_db(intensity: f64) -> f64 {
    if intensity > 1.0 {
        10.0 * (intensity - 1.0).log10()
    } else {
        f64::NAN
    }
}

/// Apply [`snr_db`] to a whole intensity grid.
pub fn intensity_to_snr(intensity: &Array2<f64>) -> Array2<f64> {
    intensity.mapv(snr_db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_lidar_xyz_north_horizontal() {
        let [x, y, z] = lidar_xyz(100.0, 0.0, 0.0);
        assert_close(x, 0.0);
        assert_close(y, 100.0);
        assert_close(z, 0.0);
    }

    #[test]
    fn test_lidar_xyz_vertical_any_azimuth() {
        for azimuth in [0.0, 45.0, 137.5, 270.0, 359.9] {
            let [x, y, z] = lidar_xyz(250.0, 90.0, azimuth);
            assert_close(x, 0.0);
            assert_close(y, 0.0);
            assert_close(z, 250.0);
        }
    }

    #[test]
    fn test_lidar_xyz_east_and_elevated() {
        let [x, y, z] = lidar_xyz(10.0, 30.0, 90.0);
        assert_close(x, 10.0 * 30f64.to_radians().cos());
        assert_close(y, 0.0);
        assert_close(z, 5.0);
    }

    #[test]
    fn test_gate_distances_half_gate_offset() {
        assert_eq!(gate_distances(3, 30.0, 30.0), vec![15.0, 45.0, 75.0]);
        assert!(gate_distances(0, 30.0, 30.0).is_empty());
    }

    #[test]
    fn test_range_axes_share_offset() {
        let axes = range_axes(3, 30.0, 1.5);
        assert_eq!(axes.distance, vec![15.0, 45.0, 75.0]);
        assert_eq!(axes.distance_overlapped, vec![15.0, 16.5, 18.0]);
    }

    #[test]
    fn test_beams_to_cartesian_grid() {
        let distances = vec![10.0, 20.0];
        let grid = beams_to_cartesian(&distances, &[0.0, 90.0, 0.0], &[0.0, 0.0, 90.0]);

        assert_eq!(grid.dim(), (3, 2));
        assert_close(grid.y[[0, 1]], 20.0);
        assert_close(grid.x[[1, 0]], 10.0);
        assert_close(grid.z[[2, 1]], 20.0);
        assert_close(grid.x[[2, 1]], 0.0);
    }

    #[test]
    fn test_beams_to_cartesian_empty() {
        let grid = beams_to_cartesian(&[10.0], &[], &[]);
        assert_eq!(grid.dim(), (0, 1));
    }

    #[test]
    fn test_intensity_to_snr() {
        let intensity = array![[11.0, 1.0], [2.0, 0.5]];
        let snr = intensity_to_snr(&intensity);

        assert_close(snr[[0, 0]], 10.0);
        assert!(snr[[0, 1]].is_nan());
        assert_close(snr[[1, 0]], 0.0);
        assert!(snr[[1, 1]].is_nan());
    }
}
