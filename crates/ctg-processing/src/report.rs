//! Session statistics, automatic conclusion and report preview

use crate::features::{FeatureSet, PatientContext, BRADYCARDIA_BPM, TACHYCARDIA_BPM};
use crate::stats::{nan_max, nan_mean, nan_median, nan_min, nan_std_sample, valid_values};
use chrono::{DateTime, Utc};
use ctg_core::{Channel, CohortGroup, PreparedSession};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mean std below this reads as reduced variability (bpm)
const REDUCED_VARIABILITY_BPM: f64 = 5.0;
/// Mean std above this reads as increased variability (bpm)
const INCREASED_VARIABILITY_BPM: f64 = 15.0;
/// More tachycardic samples than this are reported
const TACHY_SAMPLES_REPORTED: usize = 5;

/// Patient keys copied into a report preview
const PATIENT_HIGHLIGHTS: [&str; 4] = ["age", "gestation_weeks", "diagnosis", "risk_factors"];

/// Whole-session summary of the filtered heart rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub duration_seconds: f64,
    pub total_samples: usize,
    pub bpm_samples: usize,
    pub mean_bpm: Option<f64>,
    pub median_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
    pub min_bpm: Option<f64>,
    pub std_bpm: Option<f64>,
    pub decel_count: usize,
    pub tachy_count: usize,
    pub brady_count: usize,
}

impl SessionStatistics {
    pub fn compute(session: &PreparedSession, features: &FeatureSet) -> Self {
        let bpm: &[f64] = session
            .channel(Channel::Bpm)
            .map(|columns| columns.filtered.as_slice())
            .unwrap_or_default();
        let valid = valid_values(bpm);

        let duration_seconds = match (session.grid.first(), session.grid.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };

        Self {
            duration_seconds,
            total_samples: session.len(),
            bpm_samples: valid.len(),
            mean_bpm: nan_mean(&valid),
            median_bpm: nan_median(&valid),
            max_bpm: nan_max(&valid),
            min_bpm: nan_min(&valid),
            std_bpm: nan_std_sample(&valid),
            decel_count: features.decel_count,
            tachy_count: valid.iter().filter(|&&v| v > TACHYCARDIA_BPM).count(),
            brady_count: valid.iter().filter(|&&v| v < BRADYCARDIA_BPM).count(),
        }
    }
}

/// Plain-language summary of the statistics and patient risk factors
pub fn conclusion(stats: &SessionStatistics, patient: &PatientContext) -> String {
    let mut sentences: Vec<String> = Vec::new();

    if let Some(mean) = stats.mean_bpm {
        let rhythm = if mean > TACHYCARDIA_BPM {
            "Persistent tachycardia is observed."
        } else if mean < BRADYCARDIA_BPM {
            "Bradycardia is observed."
        } else {
            "Baseline heart rate is within normal limits."
        };
        sentences.push(rhythm.to_string());
    }

    if let Some(std) = stats.std_bpm {
        let variability = if std < REDUCED_VARIABILITY_BPM {
            "Heart rate variability is reduced."
        } else if std > INCREASED_VARIABILITY_BPM {
            "Heart rate variability is increased."
        } else {
            "Heart rate variability is normal."
        };
        sentences.push(variability.to_string());
    }

    if stats.decel_count > 0 {
        sentences.push("Decelerations were recorded.".to_string());
    }
    if stats.tachy_count > TACHY_SAMPLES_REPORTED {
        sentences.push("Multiple tachycardia episodes.".to_string());
    }
    if stats.brady_count > 0 {
        sentences.push("Bradycardia episodes were recorded.".to_string());
    }

    let risks = patient.active_risk_factors();
    if !risks.is_empty() {
        sentences.push(format!("Risk factors present: {}.", risks.join(", ")));
    }

    if sentences.is_empty() {
        sentences.push("No pathological changes detected. Cardiotocogram is normal.".to_string());
    }

    sentences.join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSessionInfo {
    pub group: CohortGroup,
    pub folder_id: String,
    pub duration_seconds: f64,
    pub total_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpmSummary {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub std: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCounts {
    pub decelerations: usize,
    pub tachycardia: usize,
    pub bradycardia: usize,
}

/// Data a report renderer needs for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPreview {
    pub session_id: String,
    pub session_info: ReportSessionInfo,
    /// Selected patient entries, absent keys are `null`
    pub patient_info: Map<String, Value>,
    pub bpm_statistics: BpmSummary,
    pub events: EventCounts,
    pub conclusion: String,
    pub generated_at: DateTime<Utc>,
}

impl ReportPreview {
    pub fn build(session: &PreparedSession, features: &FeatureSet, patient: &PatientContext) -> Self {
        let stats = SessionStatistics::compute(session, features);

        let patient_info = PATIENT_HIGHLIGHTS
            .iter()
            .map(|key| {
                let value = patient.get(key).cloned().unwrap_or(Value::Null);
                (key.to_string(), value)
            })
            .collect();

        Self {
            session_id: session.meta.session_id.clone(),
            session_info: ReportSessionInfo {
                group: session.meta.group,
                folder_id: session.meta.folder_id.clone(),
                duration_seconds: stats.duration_seconds,
                total_samples: stats.total_samples,
            },
            patient_info,
            bpm_statistics: BpmSummary {
                mean: stats.mean_bpm,
                median: stats.median_bpm,
                max: stats.max_bpm,
                min: stats.min_bpm,
                std: stats.std_bpm,
            },
            events: EventCounts {
                decelerations: stats.decel_count,
                tachycardia: stats.tachy_count,
                bradycardia: stats.brady_count,
            },
            conclusion: conclusion(&stats, patient),
            generated_at: Utc::now(),
        }
    }
}
