//! Core data types and I/O operations.

pub mod dataset;
pub mod loaders;
pub mod time;
pub mod transforms;
pub mod writers;

pub use dataset::{AttrValue, Attributes, ScanKind, StandardizedDataset};
pub use loaders::{load_scan_file, BeamRecord, FormatError, RawHeader, ScanTable};
pub use writers::{DatasetSink, DirectorySink, OutputKey, WriteError};
