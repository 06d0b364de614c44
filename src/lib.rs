//! Formatting, standardization and quality control of scanning Doppler
//! lidar scans.
//!
//! This crate provides tools for:
//! - Parsing Halo Photonics `.hpl` scan files into typed headers and beam tables
//! - Repairing midnight wraps in beam times
//! - Projecting beams to Cartesian coordinates and detecting the scan pattern
//! - Kernel-density QC of radial wind speed with bit-packed flags
//! - Assembling attributed datasets and writing them to disk
//!
//! # Example
//!
//! ```no_run
//! use lidar_pipeline::core::writers::DirectorySink;
//! use lidar_pipeline::processors::pipeline::{process_file, Naming};
//! use lidar_pipeline::PipelineConfig;
//! use std::path::Path;
//!
//! let sink = DirectorySink::new("out", false);
//! let naming = Naming::new("sc1", "01", "b0");
//! let report = process_file(
//!     Path::new("User4_137_20230830_064606.hpl"),
//!     &PipelineConfig::default(),
//!     &naming,
//!     &sink,
//! )
//! .unwrap();
//! println!("{} samples retained", report.retained);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{ConfigTable, PatternConfig, PipelineConfig, QcConfig};
pub use crate::core::dataset::StandardizedDataset;
pub use crate::core::loaders::{RawHeader, ScanTable};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
