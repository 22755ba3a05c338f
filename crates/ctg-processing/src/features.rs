//! Feature and event extraction for CTG sessions

use crate::stats::{centered_slope, nan_max, nan_mean, nan_min, rolling_median_centered, rolling_std_trailing};
use ctg_core::{config_error, median_spacing, Channel, CtgResult, PreparedSession};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Heart rate above this is tachycardic (bpm)
pub const TACHYCARDIA_BPM: f64 = 160.0;
/// Heart rate below this is bradycardic (bpm)
pub const BRADYCARDIA_BPM: f64 = 110.0;
/// Window of the short-term variability estimate (s)
pub const VARIABILITY_WINDOW_S: f64 = 60.0;
/// Fewest valid samples for a trend slope
pub const MIN_TREND_POINTS: usize = 5;

/// Deceleration detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecelerationConfig {
    /// Drop below the rolling baseline that counts as a deceleration (bpm)
    pub drop_threshold: f64,
    /// Shortest episode kept (s)
    pub min_duration_s: f64,
    /// Rolling median baseline window (s)
    pub baseline_window_s: f64,
}

impl Default for DecelerationConfig {
    fn default() -> Self {
        Self {
            drop_threshold: 15.0,
            min_duration_s: 10.0,
            baseline_window_s: 60.0,
        }
    }
}

/// Feature extraction configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub deceleration: DecelerationConfig,
}

impl FeatureConfig {
    pub fn validate(&self) -> CtgResult<()> {
        let decel = &self.deceleration;
        if !(decel.drop_threshold.is_finite() && decel.drop_threshold > 0.0) {
            return Err(config_error!("Deceleration drop threshold must be positive, got {}", decel.drop_threshold));
        }
        if !(decel.min_duration_s.is_finite() && decel.min_duration_s >= 0.0) {
            return Err(config_error!("Deceleration minimum duration must be non-negative, got {}", decel.min_duration_s));
        }
        if !(decel.baseline_window_s.is_finite() && decel.baseline_window_s > 0.0) {
            return Err(config_error!("Deceleration baseline window must be positive, got {}", decel.baseline_window_s));
        }
        Ok(())
    }
}

/// One deceleration episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deceleration {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

/// Opaque patient record passed through to features and reports
///
/// Keys follow the patient registry (`age`, `gestation_weeks`, `Ph`, `CO2`,
/// `Glu`, `LAC`, `BE`, `risk_factors`, ...). Nothing here is validated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientContext(Map<String, Value>);

impl PatientContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Numeric entry, `None` when absent or not a number
    pub fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Names of the risk factors flagged `true` in the `risk_factors` object
    pub fn active_risk_factors(&self) -> Vec<String> {
        match self.0.get("risk_factors") {
            Some(Value::Object(factors)) => factors
                .iter()
                .filter(|(_, v)| v.as_bool() == Some(true))
                .map(|(k, _)| k.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Ph < 7.35 and BE < -2.0
    pub fn metabolic_acidosis(&self) -> bool {
        matches!((self.number("Ph"), self.number("BE")), (Some(ph), Some(be)) if ph < 7.35 && be < -2.0)
    }

    /// Ph < 7.35 and CO2 > 45.0
    pub fn respiratory_acidosis(&self) -> bool {
        matches!((self.number("Ph"), self.number("CO2")), (Some(ph), Some(co2)) if ph < 7.35 && co2 > 45.0)
    }

    /// LAC > 4.0
    pub fn lactic_acidosis(&self) -> bool {
        self.number("LAC").map_or(false, |lac| lac > 4.0)
    }
}

/// Features of one session or buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub decelerations: Vec<Deceleration>,
    pub decel_count: usize,
    pub tachy_count: usize,
    pub brady_count: usize,
    /// Times of tachycardic samples
    pub tachy_times: Vec<f64>,
    /// Times of bradycardic samples
    pub brady_times: Vec<f64>,
    /// Positions of tachycardic samples in the input arrays
    pub tachy_indices: Vec<usize>,
    /// Positions of bradycardic samples in the input arrays
    pub brady_indices: Vec<usize>,
    pub stv_mean: Option<f64>,
    pub stv_min: Option<f64>,
    pub stv_max: Option<f64>,
    pub last_bpm: Option<f64>,
    pub last_uterus: Option<f64>,
    /// BPM change per second
    pub bpm_trend_slope: Option<f64>,
    pub patient: PatientContext,
    pub metabolic_acidosis: bool,
    pub respiratory_acidosis: bool,
    pub lactic_acidosis: bool,
}

impl FeatureSet {
    /// Names of [`FeatureSet::feature_vector`] entries, in order
    pub const VECTOR_FIELDS: [&'static str; 10] = [
        "decel_count",
        "tachy_count",
        "brady_count",
        "stv_mean",
        "age",
        "gestation_weeks",
        "Ph",
        "Glu",
        "LAC",
        "BE",
    ];

    /// Fixed-order numeric vector for an external classifier; missing values are 0
    pub fn feature_vector(&self) -> Vec<f64> {
        let mut vector = vec![
            self.decel_count as f64,
            self.tachy_count as f64,
            self.brady_count as f64,
            self.stv_mean.unwrap_or(0.0),
        ];
        vector.extend(
            Self::VECTOR_FIELDS[4..]
                .iter()
                .map(|key| self.patient.number(key).unwrap_or(0.0)),
        );
        vector
    }
}

/// Extracts clinical events and summary features from a BPM trace
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Features of a prepared session, computed on the filtered columns
    pub fn extract_session(&self, session: &PreparedSession, patient: &PatientContext) -> FeatureSet {
        let empty: &[f64] = &[];
        let column = |channel: Channel| {
            session
                .channel(channel)
                .map_or(empty, |columns| columns.filtered.as_slice())
        };
        self.extract(&session.grid, column(Channel::Bpm), column(Channel::Uterus), patient)
    }

    /// Features of parallel time/bpm/uterus arrays
    ///
    /// Missing BPM samples are dropped before any computation; windows are
    /// sized from the spacing of the remaining samples.
    pub fn extract(&self, time: &[f64], bpm: &[f64], uterus: &[f64], patient: &PatientContext) -> FeatureSet {
        let mut indices = Vec::new();
        let mut times = Vec::new();
        let mut values = Vec::new();
        for (i, (&t, &v)) in time.iter().zip(bpm).enumerate() {
            if v.is_finite() && t.is_finite() {
                indices.push(i);
                times.push(t);
                values.push(v);
            }
        }

        let sample_rate = median_spacing(&times)
            .filter(|spacing| *spacing > 0.0)
            .map(|spacing| 1.0 / spacing);

        let decelerations = match sample_rate {
            Some(rate) => self.detect_decelerations(&times, &values, rate),
            None => Vec::new(),
        };

        let mut tachy_times = Vec::new();
        let mut tachy_indices = Vec::new();
        let mut brady_times = Vec::new();
        let mut brady_indices = Vec::new();
        for ((&i, &t), &v) in indices.iter().zip(&times).zip(&values) {
            if v > TACHYCARDIA_BPM {
                tachy_times.push(t);
                tachy_indices.push(i);
            } else if v < BRADYCARDIA_BPM {
                brady_times.push(t);
                brady_indices.push(i);
            }
        }

        let window = sample_rate.map_or(1, |rate| samples_for(VARIABILITY_WINDOW_S, rate));
        let stv = rolling_std_trailing(&values, window);

        FeatureSet {
            decel_count: decelerations.len(),
            decelerations,
            tachy_count: tachy_times.len(),
            brady_count: brady_times.len(),
            tachy_times,
            brady_times,
            tachy_indices,
            brady_indices,
            stv_mean: nan_mean(&stv),
            stv_min: nan_min(&stv),
            stv_max: nan_max(&stv),
            last_bpm: values.last().copied(),
            last_uterus: uterus.iter().rev().copied().find(|v| v.is_finite()),
            bpm_trend_slope: centered_slope(&times, &values, MIN_TREND_POINTS),
            patient: patient.clone(),
            metabolic_acidosis: patient.metabolic_acidosis(),
            respiratory_acidosis: patient.respiratory_acidosis(),
            lactic_acidosis: patient.lactic_acidosis(),
        }
    }

    /// Runs below `baseline - drop_threshold` lasting at least the minimum duration
    pub fn detect_decelerations(&self, times: &[f64], bpm: &[f64], sample_rate: f64) -> Vec<Deceleration> {
        let config = &self.config.deceleration;
        let window = samples_for(config.baseline_window_s, sample_rate);
        let baseline = rolling_median_centered(bpm, window);

        let mut episodes = Vec::new();
        let mut open: Option<usize> = None;

        let close = |start: usize, end: usize, episodes: &mut Vec<Deceleration>| {
            let duration = times[end] - times[start];
            if duration >= config.min_duration_s {
                episodes.push(Deceleration {
                    start: times[start],
                    end: times[end],
                    duration,
                });
            }
        };

        for i in 0..bpm.len() {
            let below = bpm[i] < baseline[i] - config.drop_threshold;
            match (below, open) {
                (true, None) => open = Some(i),
                (false, Some(start)) => {
                    close(start, i - 1, &mut episodes);
                    open = None;
                }
                _ => {}
            }
        }

        if let Some(start) = open {
            close(start, bpm.len() - 1, &mut episodes);
        }

        episodes
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

/// Window length in samples for a duration at a sample rate, at least one
fn samples_for(seconds: f64, sample_rate: f64) -> usize {
    ((seconds * sample_rate).round() as usize).max(1)
}
