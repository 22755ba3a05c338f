//! CTG-Processing: session preparation, feature extraction and reporting
//!
//! Turns assembled fragment series into uniformly sampled, filtered
//! sessions and derives clinical features from them.

pub mod stats;
pub mod processor;
pub mod filters;
pub mod config;
pub mod resample;
pub mod cache;
pub mod pipeline;
pub mod features;
pub mod sanitize;
pub mod report;

pub use pipeline::*;
pub use processor::{ProcessingMetrics, SignalProcessor};
pub use filters::{ExponentialBaseline, FilterBank, MedianFilter, SavitzkyGolay, SpikeRemover};
pub use config::{PrepareParams, ProcessingConfig};
pub use resample::{resample_and_merge, uniform_grid, ResampleParams, ResampledTable};
pub use cache::{CacheKey, SessionCache};
pub use features::{
    Deceleration, DecelerationConfig, FeatureConfig, FeatureExtractor, FeatureSet, PatientContext,
    BRADYCARDIA_BPM, TACHYCARDIA_BPM,
};
pub use sanitize::{finite, sanitize_value, to_clean_json};
pub use report::{conclusion, ReportPreview, SessionStatistics};
