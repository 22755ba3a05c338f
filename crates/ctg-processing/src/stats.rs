//! Missing-aware numeric helpers shared by filters and feature extraction
//!
//! Missing samples are `NaN` and are skipped everywhere. Degenerate inputs
//! yield `None` rather than an error.

/// Finite values of a slice
pub fn valid_values(data: &[f64]) -> Vec<f64> {
    data.iter().copied().filter(|v| v.is_finite()).collect()
}

pub fn nan_mean(data: &[f64]) -> Option<f64> {
    let (sum, count) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

pub fn nan_median(data: &[f64]) -> Option<f64> {
    let mut valid = valid_values(data);
    median_in_place(&mut valid)
}

/// Median of a scratch buffer, reordering it
pub fn median_in_place(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Population standard deviation (divisor n)
pub fn nan_std_population(data: &[f64]) -> Option<f64> {
    let valid = valid_values(data);
    let mean = nan_mean(&valid)?;
    let var = valid.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / valid.len() as f64;
    Some(var.sqrt())
}

/// Sample standard deviation (divisor n - 1), needs two values
pub fn nan_std_sample(data: &[f64]) -> Option<f64> {
    let valid = valid_values(data);
    if valid.len() < 2 {
        return None;
    }
    let mean = nan_mean(&valid)?;
    let var = valid.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (valid.len() - 1) as f64;
    Some(var.sqrt())
}

pub fn nan_min(data: &[f64]) -> Option<f64> {
    data.iter().copied().filter(|v| v.is_finite()).reduce(f64::min)
}

pub fn nan_max(data: &[f64]) -> Option<f64> {
    data.iter().copied().filter(|v| v.is_finite()).reduce(f64::max)
}

/// Centered rolling median with shrinking edges
///
/// For an even window the extra sample is taken from the past. A window
/// without any valid sample yields `NaN`.
pub fn rolling_median_centered(data: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let n = data.len();
    let mut scratch = Vec::with_capacity(window);

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(window / 2);
            let hi = (i + window - window / 2).min(n);
            scratch.clear();
            scratch.extend(data[lo..hi].iter().copied().filter(|v| v.is_finite()));
            median_in_place(&mut scratch).unwrap_or(f64::NAN)
        })
        .collect()
}

/// Trailing rolling sample standard deviation
///
/// Each output covers up to `window` samples ending at the current one and
/// is `NaN` until two valid samples are available.
pub fn rolling_std_trailing(data: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);

    (0..data.len())
        .map(|i| {
            let lo = (i + 1).saturating_sub(window);
            nan_std_sample(&data[lo..=i]).unwrap_or(f64::NAN)
        })
        .collect()
}

/// Least-squares slope of `values` against `times` centered on their mean
///
/// Pairs with a missing member are ignored; fewer than `min_points` valid
/// pairs, or no spread in time, give `None`.
pub fn centered_slope(times: &[f64], values: &[f64], min_points: usize) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = times
        .iter()
        .zip(values)
        .filter(|(t, v)| t.is_finite() && v.is_finite())
        .map(|(&t, &v)| (t, v))
        .collect();

    if pairs.len() < min_points.max(2) {
        return None;
    }

    let n = pairs.len() as f64;
    let t_mean = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let v_mean = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (t, v) in &pairs {
        let dt = t - t_mean;
        sxx += dt * dt;
        sxy += dt * (v - v_mean);
    }

    (sxx > 0.0).then(|| sxy / sxx)
}
