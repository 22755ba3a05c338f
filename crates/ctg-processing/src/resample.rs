//! Resampling of both channels onto one uniform grid

use ctg_core::{Channel, ChannelSeries, GapKind, GapWarning};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Relative tolerance when counting grid steps
const GRID_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampleParams {
    pub sample_rate: f64,
    pub interp_limit_s: f64,
    pub gap_warn_s: f64,
}

/// Both channels sampled on the same grid
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResampledTable {
    pub time: Vec<f64>,
    pub bpm: Vec<f64>,
    pub uterus: Vec<f64>,
    pub warnings: Vec<GapWarning>,
}

impl ResampledTable {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn column(&self, channel: Channel) -> &[f64] {
        match channel {
            Channel::Bpm => &self.bpm,
            Channel::Uterus => &self.uterus,
        }
    }
}

/// Inclusive grid from `start` to `end` with the given step
///
/// Points are computed as `start + i * step` so no error accumulates.
pub fn uniform_grid(start: f64, end: f64, step: f64) -> Vec<f64> {
    if !(step > 0.0) || !(end >= start) {
        return if start.is_finite() { vec![start] } else { Vec::new() };
    }

    let steps = (end - start) / step;
    let count = (steps + GRID_EPSILON * steps.max(1.0)).floor() as usize + 1;
    (0..count).map(|i| start + i as f64 * step).collect()
}

/// Put both channels on a uniform grid covering their combined span
///
/// Values are interpolated linearly in time and held constant beyond the
/// first and last sample. A channel without samples stays missing.
pub fn resample_and_merge(
    bpm: &ChannelSeries,
    uterus: &ChannelSeries,
    params: &ResampleParams,
) -> ResampledTable {
    let starts = [bpm.start_time(), uterus.start_time()];
    let ends = [bpm.end_time(), uterus.end_time()];

    let start = starts.into_iter().flatten().reduce(f64::min);
    let end = ends.into_iter().flatten().reduce(f64::max);

    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => return ResampledTable::default(),
    };

    let step = 1.0 / params.sample_rate;
    let time = uniform_grid(start, end, step);

    let mut warnings = Vec::new();
    let bpm_values = interpolate_channel(bpm, &time, params, &mut warnings);
    let uterus_values = interpolate_channel(uterus, &time, params, &mut warnings);

    detect_unfilled_gaps(Channel::Bpm, &bpm_values, &time, step, params.gap_warn_s, &mut warnings);
    detect_unfilled_gaps(Channel::Uterus, &uterus_values, &time, step, params.gap_warn_s, &mut warnings);

    for warning in &warnings {
        warn!("Gap in session data: {}", warning.describe());
    }
    debug!(
        "Resampled onto {} points [{:.2}, {:.2}]s at {} Hz",
        time.len(),
        start,
        end,
        params.sample_rate
    );

    ResampledTable {
        time,
        bpm: bpm_values,
        uterus: uterus_values,
        warnings,
    }
}

fn interpolate_channel(
    series: &ChannelSeries,
    grid: &[f64],
    params: &ResampleParams,
    warnings: &mut Vec<GapWarning>,
) -> Vec<f64> {
    // Duplicate timestamps keep their first value
    let mut times: Vec<f64> = Vec::with_capacity(series.len());
    let mut values: Vec<f64> = Vec::with_capacity(series.len());
    for (t, v) in series.samples() {
        if times.last() == Some(&t) {
            continue;
        }
        times.push(t);
        values.push(v);
    }

    if times.is_empty() {
        return vec![f64::NAN; grid.len()];
    }

    for (w, vals) in times.windows(2).zip(values.windows(2)) {
        let gap = w[1] - w[0];
        if gap > params.interp_limit_s && vals.iter().all(|v| v.is_finite()) {
            warnings.push(GapWarning {
                channel: series.channel,
                kind: GapKind::Bridged,
                start: w[0],
                end: w[1],
                duration: gap,
            });
        }
    }

    let last = times.len() - 1;
    grid.iter()
        .map(|&t| {
            let idx = times.partition_point(|&x| x <= t);
            if idx == 0 {
                values[0]
            } else if idx > last {
                values[last]
            } else {
                let (t0, t1) = (times[idx - 1], times[idx]);
                let (v0, v1) = (values[idx - 1], values[idx]);
                v0 + (v1 - v0) * (t - t0) / (t1 - t0)
            }
        })
        .collect()
}

fn detect_unfilled_gaps(
    channel: Channel,
    values: &[f64],
    grid: &[f64],
    step: f64,
    gap_warn_s: f64,
    warnings: &mut Vec<GapWarning>,
) {
    let n = values.len();
    let mut i = 0;
    while i < n {
        if values[i].is_finite() {
            i += 1;
            continue;
        }

        let mut j = i;
        while j < n && !values[j].is_finite() {
            j += 1;
        }

        let duration = (j - i) as f64 * step;
        if duration > gap_warn_s {
            warnings.push(GapWarning {
                channel,
                kind: GapKind::Unfilled,
                start: grid[i],
                end: grid[j - 1],
                duration,
            });
        }
        i = j;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(sample_rate: f64) -> ResampleParams {
        ResampleParams {
            sample_rate,
            interp_limit_s: 5.0,
            gap_warn_s: 10.0,
        }
    }

    fn series(channel: Channel, samples: &[(f64, f64)]) -> ChannelSeries {
        let (times, values) = samples.iter().copied().unzip();
        ChannelSeries::from_parts(channel, times, values).unwrap()
    }

    #[test]
    fn test_grid_step_and_length() {
        let grid = uniform_grid(0.0, 10.0, 0.25);
        assert_eq!(grid.len(), 41);
        assert_eq!(grid[40], 10.0);

        assert_eq!(uniform_grid(0.0, 10.1, 0.25).len(), 41);
        assert_eq!(uniform_grid(0.0, 0.1 * 3.0, 0.1).len(), 4);
        assert_eq!(uniform_grid(2.0, 2.0, 0.25), vec![2.0]);

        for rate in [1.0, 2.0, 4.0, 8.0] {
            let step = 1.0 / rate;
            let grid = uniform_grid(1.5, 61.5, step);
            assert_eq!(grid.len(), (60.0 * rate) as usize + 1);
            for w in grid.windows(2) {
                assert!((w[1] - w[0] - step).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_merge_covers_both_channels() {
        let bpm = series(Channel::Bpm, &[(0.0, 140.0), (1.0, 150.0)]);
        let uterus = series(Channel::Uterus, &[(0.5, 10.0), (2.0, 20.0)]);

        let table = resample_and_merge(&bpm, &uterus, &params(2.0));
        assert_eq!(table.time, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(table.bpm, vec![140.0, 145.0, 150.0, 150.0, 150.0]);
        assert_eq!(table.uterus[0], 10.0);
        assert!((table.uterus[2] - (10.0 + 10.0 / 3.0)).abs() < 1e-12);
        assert_eq!(table.uterus[4], 20.0);
        assert!(table.warnings.is_empty());
    }

    #[test]
    fn test_absent_versus_sparse_channel() {
        let samples: Vec<(f64, f64)> = (0..=120).map(|i| (i as f64 * 0.25, 140.0)).collect();
        let bpm = series(Channel::Bpm, &samples);

        // Single uterus sample is held over the whole grid
        let sparse = series(Channel::Uterus, &[(3.0, 12.0)]);
        let table = resample_and_merge(&bpm, &sparse, &params(4.0));
        assert!(table.uterus.iter().all(|&v| v == 12.0));
        assert!(table.warnings.is_empty());

        let absent = ChannelSeries::new(Channel::Uterus);
        let table = resample_and_merge(&bpm, &absent, &params(4.0));
        assert!(table.uterus.iter().all(|v| v.is_nan()));
        assert_eq!(table.warnings.len(), 1);

        let warning = &table.warnings[0];
        assert_eq!(warning.channel, Channel::Uterus);
        assert_eq!(warning.kind, GapKind::Unfilled);
        assert_eq!(warning.start, 0.0);
        assert_eq!(warning.end, 30.0);
        assert!((warning.duration - 121.0 * 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_short_absent_channel_not_reported() {
        let bpm = series(Channel::Bpm, &[(0.0, 140.0), (5.0, 141.0)]);
        let table = resample_and_merge(&bpm, &ChannelSeries::new(Channel::Uterus), &params(4.0));
        assert!(table.warnings.is_empty());
    }

    #[test]
    fn test_bridged_gap_reported_and_filled() {
        let bpm = series(Channel::Bpm, &[(0.0, 140.0), (1.0, 140.0), (9.0, 120.0)]);
        let uterus = ChannelSeries::new(Channel::Uterus);
        let mut p = params(1.0);
        p.gap_warn_s = 100.0;

        let table = resample_and_merge(&bpm, &uterus, &p);
        assert!(table.bpm.iter().all(|v| v.is_finite()));
        assert_eq!(table.bpm[5], 130.0);

        assert_eq!(table.warnings.len(), 1);
        let warning = &table.warnings[0];
        assert_eq!(warning.kind, GapKind::Bridged);
        assert_eq!((warning.start, warning.end, warning.duration), (1.0, 9.0, 8.0));
    }

    #[test]
    fn test_duplicate_timestamps_keep_first() {
        let bpm = series(Channel::Bpm, &[(0.0, 100.0), (0.0, 200.0), (1.0, 110.0)]);
        let table = resample_and_merge(&bpm, &ChannelSeries::new(Channel::Uterus), &params(2.0));
        assert_eq!(table.bpm, vec![100.0, 105.0, 110.0]);
    }

    #[test]
    fn test_empty_input() {
        let table = resample_and_merge(
            &ChannelSeries::new(Channel::Bpm),
            &ChannelSeries::new(Channel::Uterus),
            &params(4.0),
        );
        assert!(table.is_empty());
        assert!(table.warnings.is_empty());
    }
}
