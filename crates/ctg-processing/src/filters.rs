//! Noise-reduction filters for resampled CTG channels
//!
//! Every filter works on one uniformly sampled array and tolerates missing
//! samples (`NaN`) anywhere in it.

use crate::config::PrepareParams;
use crate::processor::{ProcessingMetrics, SignalProcessor};
use crate::stats::{median_in_place, nan_median, nan_std_population, rolling_median_centered};
use ctg_core::{config_error, ChannelColumns, CtgResult};
use tracing::debug;

/// Centered median filter with shrinking edges
pub struct MedianFilter {
    kernel: usize,
}

impl MedianFilter {
    /// Create a median filter; the kernel must be odd
    pub fn new(kernel: usize) -> CtgResult<Self> {
        if kernel == 0 || kernel % 2 == 0 {
            return Err(config_error!("Median kernel must be a positive odd number, got {}", kernel));
        }

        Ok(Self { kernel })
    }
}

impl SignalProcessor for MedianFilter {
    fn process(&self, input: &[f64]) -> Vec<f64> {
        rolling_median_centered(input, self.kernel)
    }

    fn name(&self) -> &str {
        "Median Filter"
    }
}

/// Replaces isolated outliers with the local median
///
/// A sample is a spike when it lies more than `threshold` population
/// standard deviations away from the global median.
pub struct SpikeRemover {
    threshold: f64,
}

impl SpikeRemover {
    /// Neighbours taken on each side when replacing a spike
    const NEIGHBOURHOOD: usize = 2;

    pub fn new(threshold: f64) -> CtgResult<Self> {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(config_error!("Spike threshold must be positive, got {}", threshold));
        }

        Ok(Self { threshold })
    }
}

impl SignalProcessor for SpikeRemover {
    fn process(&self, input: &[f64]) -> Vec<f64> {
        let (median, std) = match (nan_median(input), nan_std_population(input)) {
            (Some(median), Some(std)) if std > 0.0 => (median, std),
            _ => return input.to_vec(),
        };

        let limit = self.threshold * std;
        let mut out = input.to_vec();
        let mut scratch = Vec::with_capacity(2 * Self::NEIGHBOURHOOD + 1);
        let mut replaced = 0usize;

        for (i, &x) in input.iter().enumerate() {
            if !((x - median).abs() > limit) {
                continue;
            }

            // Replacement reads the unmodified input
            let lo = i.saturating_sub(Self::NEIGHBOURHOOD);
            let hi = (i + Self::NEIGHBOURHOOD + 1).min(input.len());
            scratch.clear();
            scratch.extend(input[lo..hi].iter().copied().filter(|v| v.is_finite()));
            if let Some(local) = median_in_place(&mut scratch) {
                out[i] = local;
                replaced += 1;
            }
        }

        if replaced > 0 {
            debug!("Spike removal replaced {} samples", replaced);
        }
        out
    }

    fn name(&self) -> &str {
        "Spike Remover"
    }
}

/// Exponentially weighted moving average used as the signal baseline
///
/// Uses the recursive form without bias adjustment. Leading missing samples
/// stay missing, later ones repeat the previous output.
pub struct ExponentialBaseline {
    alpha: f64,
}

impl ExponentialBaseline {
    pub fn new(span: usize) -> CtgResult<Self> {
        if span == 0 {
            return Err(config_error!("EMA span must be at least 1"));
        }

        Ok(Self {
            alpha: 2.0 / (span as f64 + 1.0),
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl SignalProcessor for ExponentialBaseline {
    fn process(&self, input: &[f64]) -> Vec<f64> {
        let mut state: Option<f64> = None;

        input
            .iter()
            .map(|&x| {
                if x.is_finite() {
                    let next = match state {
                        Some(prev) => prev + self.alpha * (x - prev),
                        None => x,
                    };
                    state = Some(next);
                }
                state.unwrap_or(f64::NAN)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "Exponential Baseline"
    }
}

/// Savitzky-Golay smoother
///
/// Coefficients come from a direct least-squares polynomial fit over the
/// window. Edge samples are evaluated on the first and last full window.
pub struct SavitzkyGolay {
    window: usize,
    /// One weight row per evaluation offset, `-h..=h`
    weights: Vec<Vec<f64>>,
}

impl SavitzkyGolay {
    pub fn new(window: usize, polyorder: usize) -> CtgResult<Self> {
        if window == 0 || window % 2 == 0 {
            return Err(config_error!("Smoothing window must be a positive odd number, got {}", window));
        }
        if polyorder >= window {
            return Err(config_error!(
                "Polynomial order {} must be less than the window {}",
                polyorder,
                window
            ));
        }

        let half = (window / 2) as isize;
        let weights = (-half..=half)
            .map(|t| fit_weights(window, polyorder, t as f64))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| config_error!("Singular Savitzky-Golay system for window {}", window))?;

        Ok(Self { window, weights })
    }

    /// Weights applied to a window to evaluate the fit at `offset` from its center
    pub fn weights_at(&self, offset: isize) -> Option<&[f64]> {
        let half = (self.window / 2) as isize;
        if offset.abs() > half {
            return None;
        }
        self.weights.get((offset + half) as usize).map(Vec::as_slice)
    }
}

impl SignalProcessor for SavitzkyGolay {
    fn process(&self, input: &[f64]) -> Vec<f64> {
        let n = input.len();
        if n < self.window {
            return input.to_vec();
        }

        let half = self.window / 2;
        (0..n)
            .map(|i| {
                let start = i.saturating_sub(half).min(n - self.window);
                let window = &input[start..start + self.window];
                if window.iter().any(|v| !v.is_finite()) {
                    return input[i];
                }

                let row = &self.weights[i - start];
                row.iter().zip(window).map(|(w, x)| w * x).sum()
            })
            .collect()
    }

    fn name(&self) -> &str {
        "Savitzky-Golay Smoother"
    }
}

/// Least-squares weights of a polynomial fit evaluated at `t`
///
/// Window positions are `-h..=h`. Solves the normal equations `G x = e(t)`
/// and maps the solution back onto the window samples.
fn fit_weights(window: usize, polyorder: usize, t: f64) -> Option<Vec<f64>> {
    let half = (window / 2) as f64;
    let positions: Vec<f64> = (0..window).map(|j| j as f64 - half).collect();
    let terms = polyorder + 1;

    let mut gram = vec![vec![0.0; terms]; terms];
    for (k, row) in gram.iter_mut().enumerate() {
        for (l, cell) in row.iter_mut().enumerate() {
            *cell = positions.iter().map(|z| z.powi((k + l) as i32)).sum();
        }
    }
    let rhs: Vec<f64> = (0..terms).map(|k| t.powi(k as i32)).collect();

    let x = solve_linear(gram, rhs)?;
    Some(
        positions
            .iter()
            .map(|z| (0..terms).map(|k| z.powi(k as i32) * x[k]).sum())
            .collect(),
    )
}

/// Gaussian elimination with partial pivoting
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n).max_by(|&r, &s| a[r][col].abs().total_cmp(&a[s][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Filter bank producing every conditioned column of a channel
///
/// `filtered` runs the cleaning chain in order; the baseline and the
/// smoother both read `filtered`.
pub struct FilterBank {
    cleaning: Vec<Box<dyn SignalProcessor>>,
    baseline: Box<dyn SignalProcessor>,
    smoother: Box<dyn SignalProcessor>,
}

impl FilterBank {
    /// Create a bank with an empty cleaning chain
    pub fn new(baseline: Box<dyn SignalProcessor>, smoother: Box<dyn SignalProcessor>) -> Self {
        Self {
            cleaning: Vec::new(),
            baseline,
            smoother,
        }
    }

    /// Append a filter to the cleaning chain
    pub fn add_filter(&mut self, filter: Box<dyn SignalProcessor>) {
        self.cleaning.push(filter);
    }

    /// Standard CTG conditioning: median, spike removal, EMA baseline, Savitzky-Golay
    pub fn ctg_conditioning(params: &PrepareParams) -> CtgResult<Self> {
        let mut bank = FilterBank::new(
            Box::new(ExponentialBaseline::new(params.ema_span)?),
            Box::new(SavitzkyGolay::new(params.smooth_window, params.smooth_polyorder)?),
        );
        bank.add_filter(Box::new(MedianFilter::new(params.median_kernel)?));
        bank.add_filter(Box::new(SpikeRemover::new(params.spike_threshold)?));
        Ok(bank)
    }

    /// Names of the cleaning chain, in order
    pub fn filter_names(&self) -> Vec<&str> {
        self.cleaning.iter().map(|f| f.name()).collect()
    }

    /// Run the bank over one resampled channel
    pub fn apply(&self, raw: Vec<f64>) -> ChannelColumns {
        let mut timer = ProcessingMetrics::start_timing();
        timer.record_input(&raw);

        let filtered = self.process(&raw);
        let baseline = self.baseline.process(&filtered);
        let smooth = self.smoother.process(&filtered);
        let deviation = filtered
            .iter()
            .zip(&baseline)
            .map(|(f, b)| f - b)
            .collect();

        timer.record_output(&filtered);
        let metrics = timer.finish();
        debug!(
            "Filter bank [{} | {} | {}]: {} samples, {} missing in, {} missing out, {}us",
            self.filter_names().join(" -> "),
            self.baseline.name(),
            self.smoother.name(),
            metrics.samples,
            metrics.missing_in,
            metrics.missing_out,
            metrics.processing_time_us
        );

        ChannelColumns {
            raw,
            filtered,
            baseline,
            smooth,
            deviation,
        }
    }
}

impl SignalProcessor for FilterBank {
    fn process(&self, input: &[f64]) -> Vec<f64> {
        let mut current = input.to_vec();

        // Apply filters sequentially
        for filter in &self.cleaning {
            current = filter.process(&current);
        }
        current
    }

    fn name(&self) -> &str {
        "Filter Bank"
    }
}
