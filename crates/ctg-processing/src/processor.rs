//! Core signal processor trait and timing metrics

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Core trait for all sampled-array transforms
///
/// Processors are stateless: the same input always gives the same output,
/// so one instance can be shared between sessions.
pub trait SignalProcessor: Send + Sync {
    /// Transform one uniformly sampled array; missing samples are `NaN`
    fn process(&self, input: &[f64]) -> Vec<f64>;

    /// Get processor name/identifier
    fn name(&self) -> &str;
}

/// Performance metrics for processing operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    /// Actual processing time in microseconds
    pub processing_time_us: u64,
    /// Samples handed to the processor
    pub samples: usize,
    /// Missing samples in the input
    pub missing_in: usize,
    /// Missing samples in the output
    pub missing_out: usize,
}

impl ProcessingMetrics {
    /// Start timing a processing operation
    pub fn start_timing() -> ProcessingTimer {
        ProcessingTimer {
            start_time: Instant::now(),
            metrics: ProcessingMetrics::default(),
        }
    }
}

/// Helper for timing processing operations
pub struct ProcessingTimer {
    start_time: Instant,
    metrics: ProcessingMetrics,
}

impl ProcessingTimer {
    pub fn record_input(&mut self, input: &[f64]) {
        self.metrics.samples = input.len();
        self.metrics.missing_in = count_missing(input);
    }

    pub fn record_output(&mut self, output: &[f64]) {
        self.metrics.missing_out = count_missing(output);
    }

    /// Finish timing and return metrics
    pub fn finish(mut self) -> ProcessingMetrics {
        self.metrics.processing_time_us = self.start_time.elapsed().as_micros() as u64;
        self.metrics
    }
}

fn count_missing(data: &[f64]) -> usize {
    data.iter().filter(|v| !v.is_finite()).count()
}
