//! Online predictors for a playing session
//!
//! Trend classification, rule-based risk scoring and short-term linear
//! forecasts. Each predictor is a function of its own buffer at the time
//! it is asked.

use ctg_core::{CtgError, CtgResult};
use ctg_processing::stats::{centered_slope, nan_std_sample};
use ctg_processing::{FeatureExtractor, FeatureSet, PatientContext, BRADYCARDIA_BPM, TACHYCARDIA_BPM};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Fewest points any online predictor works with
pub const MIN_ONLINE_POINTS: usize = 10;

/// Slope magnitude (bpm/s) separating a trend from a stable rate
const TREND_SLOPE_THRESHOLD: f64 = 0.05;

/// Append to a bounded buffer, dropping the oldest value
fn push_bounded(buffer: &mut VecDeque<f64>, value: f64, capacity: usize) {
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPrediction {
    pub trend: TrendDirection,
    /// Least-squares slope, bpm per second
    pub slope: f64,
    pub confidence: f64,
    pub window_size: usize,
}

/// Direction of the heart rate over the last `window` valid samples
#[derive(Debug, Clone)]
pub struct TrendClassifier {
    window: usize,
    times: VecDeque<f64>,
    values: VecDeque<f64>,
}

impl Default for TrendClassifier {
    fn default() -> Self {
        Self::new(50)
    }
}

impl TrendClassifier {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            times: VecDeque::with_capacity(window),
            values: VecDeque::with_capacity(window),
        }
    }

    /// Record a sample, missing or non-finite values are ignored
    pub fn update(&mut self, time: f64, bpm: Option<f64>) {
        let Some(value) = bpm.filter(|v| v.is_finite()) else {
            return;
        };
        push_bounded(&mut self.times, time, self.window);
        push_bounded(&mut self.values, value, self.window);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn predict(&self) -> TrendPrediction {
        let n = self.values.len();
        if n < MIN_ONLINE_POINTS {
            return TrendPrediction {
                trend: TrendDirection::InsufficientData,
                slope: 0.0,
                confidence: 0.0,
                window_size: n,
            };
        }

        let times: Vec<f64> = self.times.iter().copied().collect();
        let values: Vec<f64> = self.values.iter().copied().collect();
        // Identical timestamps leave the slope undefined
        let slope = centered_slope(&times, &values, MIN_ONLINE_POINTS).unwrap_or(0.0);

        let trend = if slope > TREND_SLOPE_THRESHOLD {
            TrendDirection::Rising
        } else if slope < -TREND_SLOPE_THRESHOLD {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        };

        TrendPrediction {
            trend,
            slope,
            confidence: (n as f64 / self.window as f64).min(1.0),
            window_size: n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    Tachycardia,
    Bradycardia,
    HighVariability,
    LowVariability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub score: f64,
    pub factors: Vec<RiskFactor>,
    pub current_bpm: Option<f64>,
    pub variability: Option<f64>,
}

impl RiskAssessment {
    fn unknown() -> Self {
        Self {
            risk_level: RiskLevel::Unknown,
            score: 0.0,
            factors: Vec::new(),
            current_bpm: None,
            variability: None,
        }
    }
}

/// Rule-based score over a window of heart-rate values
///
/// One rate rule and one variability rule can fire at most.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer;

impl RiskScorer {
    const HIGH_VARIABILITY_BPM: f64 = 15.0;
    const LOW_VARIABILITY_BPM: f64 = 3.0;
    const HIGH_RISK_SCORE: f64 = 0.6;
    const MEDIUM_RISK_SCORE: f64 = 0.3;

    pub fn assess(&self, bpm: &[f64]) -> RiskAssessment {
        if bpm.len() < MIN_ONLINE_POINTS {
            return RiskAssessment::unknown();
        }
        let (Some(&current), Some(std)) = (bpm.last(), nan_std_sample(bpm)) else {
            return RiskAssessment::unknown();
        };

        let mut score = 0.0;
        let mut factors = Vec::new();

        if current > TACHYCARDIA_BPM {
            score += 0.4;
            factors.push(RiskFactor::Tachycardia);
        } else if current < BRADYCARDIA_BPM {
            score += 0.5;
            factors.push(RiskFactor::Bradycardia);
        }

        if std > Self::HIGH_VARIABILITY_BPM {
            score += 0.3;
            factors.push(RiskFactor::HighVariability);
        } else if std < Self::LOW_VARIABILITY_BPM {
            score += 0.2;
            factors.push(RiskFactor::LowVariability);
        }

        let risk_level = if score >= Self::HIGH_RISK_SCORE {
            RiskLevel::High
        } else if score >= Self::MEDIUM_RISK_SCORE {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        RiskAssessment {
            risk_level,
            score,
            factors,
            current_bpm: Some(current),
            variability: Some(std),
        }
    }
}

/// Forecast of one channel at one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub pred: Option<f64>,
    /// In-window root mean square error of the fit
    pub rmse: Option<f64>,
    /// Points in the forecaster window
    pub n: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LinearFit {
    t_mean: f64,
    intercept: f64,
    slope: f64,
    rmse: f64,
}

impl LinearFit {
    fn compute(times: &VecDeque<f64>, values: &VecDeque<f64>) -> Self {
        let n = values.len() as f64;
        let t_mean = times.iter().sum::<f64>() / n;
        let v_mean = values.iter().sum::<f64>() / n;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (t, v) in times.iter().zip(values) {
            let dt = t - t_mean;
            sxx += dt * dt;
            sxy += dt * (v - v_mean);
        }
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };

        let sq_error: f64 = times
            .iter()
            .zip(values)
            .map(|(t, v)| {
                let residual = v_mean + slope * (t - t_mean) - v;
                residual * residual
            })
            .sum();

        Self {
            t_mean,
            intercept: v_mean,
            slope,
            rmse: (sq_error / n).sqrt(),
        }
    }

    fn at(&self, time: f64) -> f64 {
        self.intercept + self.slope * (time - self.t_mean)
    }
}

/// Linear extrapolation of the last `window_s` seconds of one channel
///
/// The fit is recomputed lazily, only after new samples arrived.
#[derive(Debug, Clone)]
pub struct ShortTermForecaster {
    capacity: usize,
    times: VecDeque<f64>,
    values: VecDeque<f64>,
    fit: Option<LinearFit>,
    dirty: bool,
}

impl ShortTermForecaster {
    pub fn new(window_s: f64, sample_rate: f64) -> Self {
        let capacity = ((window_s * sample_rate).floor() as usize).max(1);
        Self {
            capacity,
            times: VecDeque::with_capacity(capacity),
            values: VecDeque::with_capacity(capacity),
            fit: None,
            dirty: false,
        }
    }

    pub fn update(&mut self, time: f64, value: Option<f64>) {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            return;
        };
        push_bounded(&mut self.times, time, self.capacity);
        push_bounded(&mut self.values, value, self.capacity);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Predicted value `horizon_s` seconds after the newest sample
    pub fn forecast(&mut self, horizon_s: f64) -> Forecast {
        let n = self.values.len();
        let Some(&last_time) = self.times.back().filter(|_| n >= MIN_ONLINE_POINTS) else {
            return Forecast { pred: None, rmse: None, n };
        };

        if self.dirty || self.fit.is_none() {
            self.fit = Some(LinearFit::compute(&self.times, &self.values));
            self.dirty = false;
        }

        match self.fit {
            Some(fit) => Forecast {
                pred: Some(fit.at(last_time + horizon_s)),
                rmse: Some(fit.rmse),
                n,
            },
            None => Forecast { pred: None, rmse: None, n },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub bpm: Forecast,
    pub uterus: Forecast,
}

/// Rolling per-stream state: raw buffers, forecasters and patient context
#[derive(Debug, Clone)]
pub struct OnlineSessionState {
    session_id: String,
    capacity: usize,
    times: VecDeque<f64>,
    bpm: VecDeque<f64>,
    uterus: VecDeque<f64>,
    bpm_forecaster: ShortTermForecaster,
    uterus_forecaster: ShortTermForecaster,
    patient: PatientContext,
    extractor: FeatureExtractor,
    features: Option<FeatureSet>,
}

impl OnlineSessionState {
    pub fn new(session_id: &str, sample_rate: f64, window_s: f64, patient: PatientContext) -> Self {
        let bpm_forecaster = ShortTermForecaster::new(window_s, sample_rate);
        let capacity = bpm_forecaster.capacity();
        Self {
            session_id: session_id.to_string(),
            capacity,
            times: VecDeque::with_capacity(capacity),
            bpm: VecDeque::with_capacity(capacity),
            uterus: VecDeque::with_capacity(capacity),
            uterus_forecaster: ShortTermForecaster::new(window_s, sample_rate),
            bpm_forecaster,
            patient,
            extractor: FeatureExtractor::default(),
            features: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn patient(&self) -> &PatientContext {
        &self.patient
    }

    /// Merge new patient entries over the existing ones
    pub fn update_patient(&mut self, update: &PatientContext) {
        for (key, value) in update.as_map() {
            self.patient.insert(key, value.clone());
        }
        self.features = None;
    }

    /// Append one grid point, missing values are kept as gaps
    pub fn update(&mut self, time: f64, bpm: Option<f64>, uterus: Option<f64>) {
        push_bounded(&mut self.times, time, self.capacity);
        push_bounded(&mut self.bpm, bpm.unwrap_or(f64::NAN), self.capacity);
        push_bounded(&mut self.uterus, uterus.unwrap_or(f64::NAN), self.capacity);

        self.bpm_forecaster.update(time, bpm);
        self.uterus_forecaster.update(time, uterus);
        self.features = None;
    }

    /// Forecasts of both channels keyed by horizon in seconds
    pub fn predict_short(&mut self, horizons_s: &[f64]) -> BTreeMap<String, HorizonForecast> {
        horizons_s
            .iter()
            .map(|&horizon| {
                let forecast = HorizonForecast {
                    bpm: self.bpm_forecaster.forecast(horizon),
                    uterus: self.uterus_forecaster.forecast(horizon),
                };
                (format!("{}", horizon), forecast)
            })
            .collect()
    }

    /// Features of the buffered window
    pub fn current_features(&mut self) -> CtgResult<&FeatureSet> {
        if self.times.is_empty() {
            return Err(CtgError::InsufficientData { required: 1, available: 0 });
        }

        let features = match self.features.take() {
            Some(features) => features,
            None => {
                let times: Vec<f64> = self.times.iter().copied().collect();
                let bpm: Vec<f64> = self.bpm.iter().copied().collect();
                let uterus: Vec<f64> = self.uterus.iter().copied().collect();
                self.extractor.extract(&times, &bpm, &uterus, &self.patient)
            }
        };
        Ok(self.features.insert(features))
    }
}
