//! Data processing modules.

pub mod dataset;
pub mod pipeline;
pub mod qc_filter;
pub mod scan_pattern;

// Re-export key types for convenience
pub use dataset::{AssemblyError, DatasetAssembler};
pub use pipeline::{
    process_batch, process_file, standardize, ConfigSource, FileReport, Naming, PipelineError,
    Standardized,
};
pub use qc_filter::{QcCriterion, QcFilterEngine, QcResult};
pub use scan_pattern::{ScanPattern, ScanPatternDetector};
