//! ChannelSeries: continuous (time, value) samples of one channel

use crate::error::{CtgError, CtgResult};
use crate::session::Channel;
use serde::{Deserialize, Serialize};

/// Assembled samples of one physiological channel
///
/// Times are seconds from the start of the session and never decrease.
/// Sampling is not required to be uniform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSeries {
    /// Channel the samples belong to
    pub channel: Channel,
    times: Vec<f64>,
    values: Vec<f64>,
}

impl ChannelSeries {
    /// Create an empty series
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            times: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build a series from parallel vectors
    pub fn from_parts(channel: Channel, times: Vec<f64>, values: Vec<f64>) -> CtgResult<Self> {
        if times.len() != values.len() {
            return Err(CtgError::InvalidConfig {
                reason: format!(
                    "Time vector length {} doesn't match value vector length {}",
                    times.len(),
                    values.len()
                ),
            });
        }

        if times.windows(2).any(|w| w[1] < w[0]) {
            return Err(CtgError::InvalidConfig {
                reason: format!("{} series times must be non-decreasing", channel),
            });
        }

        Ok(Self { channel, times, values })
    }

    /// Append one sample; the caller keeps time ordering
    pub fn push(&mut self, time: f64, value: f64) {
        debug_assert!(self.times.last().map_or(true, |&last| time >= last));
        self.times.push(time);
        self.values.push(value);
    }

    /// Append every sample of another series
    pub fn extend_from(&mut self, times: &[f64], values: &[f64]) {
        for (&t, &v) in times.iter().zip(values) {
            self.push(t, v);
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Check if the series holds no samples
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// First timestamp
    pub fn start_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    /// Last timestamp
    pub fn end_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    /// Median of consecutive time differences
    pub fn median_spacing(&self) -> Option<f64> {
        median_spacing(&self.times)
    }

    /// Iterate over (time, value) pairs
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }
}

/// Median of consecutive differences of a sorted time vector
pub fn median_spacing(times: &[f64]) -> Option<f64> {
    if times.len() < 2 {
        return None;
    }

    let mut diffs: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
    diffs.sort_by(|a, b| a.total_cmp(b));

    let mid = diffs.len() / 2;
    if diffs.len() % 2 == 0 {
        Some((diffs[mid - 1] + diffs[mid]) / 2.0)
    } else {
        Some(diffs[mid])
    }
}
