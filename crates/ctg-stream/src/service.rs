//! Transport-free service facade over the session pipeline
//!
//! Every call rescans the data root, so sessions added or removed on disk
//! are picked up without a restart.

use crate::playback::{spawn_session_stream, StreamConfig, StreamFrame, StreamHandle};
use ctg_core::{CohortGroup, CtgError, CtgResult, PreparedSession, SessionDescriptor, SessionOverview, SessionSummary};
use ctg_ingest::{discover_sessions, list_sessions};
use ctg_processing::{
    to_clean_json, FeatureExtractor, FeatureSet, PatientContext, ProcessingConfig, ReportPreview, SessionPipeline,
    SessionStatistics,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Patient records looked up by cohort folder
pub trait PatientDirectory: Send + Sync {
    /// Context for a session folder, empty when unknown
    fn lookup(&self, group: CohortGroup, folder_id: &str) -> PatientContext;
}

/// Directory without any records
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPatientRecords;

impl PatientDirectory for NoPatientRecords {
    fn lookup(&self, _group: CohortGroup, _folder_id: &str) -> PatientContext {
        PatientContext::new()
    }
}

/// In-memory records keyed by `"{group}/{folder}"`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticPatientDirectory {
    records: HashMap<String, PatientContext>,
}

impl StaticPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(group: CohortGroup, folder_id: &str) -> String {
        format!("{}/{}", group, folder_id)
    }

    pub fn insert(&mut self, group: CohortGroup, folder_id: &str, patient: PatientContext) {
        self.records.insert(Self::key(group, folder_id), patient);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_json(json: &str) -> CtgResult<Self> {
        serde_json::from_str(json).map_err(|e| CtgError::Serialization {
            reason: format!("Failed to parse patient records: {}", e),
        })
    }

    pub fn load(path: &Path) -> CtgResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| CtgError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let directory = Self::from_json(&json)?;
        info!("Loaded {} patient records from {}", directory.len(), path.display());
        Ok(directory)
    }
}

impl PatientDirectory for StaticPatientDirectory {
    fn lookup(&self, group: CohortGroup, folder_id: &str) -> PatientContext {
        self.records
            .get(&Self::key(group, folder_id))
            .cloned()
            .unwrap_or_default()
    }
}

/// Processing and streaming settings of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub processing: ProcessingConfig,
    pub stream: StreamConfig,
}

impl ServiceConfig {
    pub fn validate(&self) -> CtgResult<()> {
        self.processing.validate()?;
        self.stream.validate()
    }

    pub fn to_json(&self) -> CtgResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CtgError::Serialization {
            reason: format!("Failed to serialize service config: {}", e),
        })
    }

    pub fn from_json(json: &str) -> CtgResult<Self> {
        serde_json::from_str(json).map_err(|e| CtgError::Serialization {
            reason: format!("Failed to parse service config: {}", e),
        })
    }

    pub fn load(path: &Path) -> CtgResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| CtgError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Analysis payload of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionAnalysis {
    pub overview: SessionOverview,
    pub statistics: SessionStatistics,
    pub features: FeatureSet,
    pub feature_vector: Vec<f64>,
}

pub struct CtgService<P: PatientDirectory = NoPatientRecords> {
    data_root: PathBuf,
    config: ServiceConfig,
    pipeline: SessionPipeline,
    extractor: FeatureExtractor,
    patients: P,
}

impl CtgService<NoPatientRecords> {
    pub fn new(data_root: impl Into<PathBuf>, config: ServiceConfig) -> CtgResult<Self> {
        Self::with_patients(data_root, config, NoPatientRecords)
    }
}

impl<P: PatientDirectory> CtgService<P> {
    pub fn with_patients(data_root: impl Into<PathBuf>, config: ServiceConfig, patients: P) -> CtgResult<Self> {
        config.validate()?;
        let data_root = data_root.into();
        info!("Serving CTG sessions from {}", data_root.display());

        Ok(Self {
            pipeline: SessionPipeline::from_config(&config.processing),
            extractor: FeatureExtractor::new(config.processing.features.clone()),
            data_root,
            config,
            patients,
        })
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &SessionPipeline {
        &self.pipeline
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        list_sessions(&self.data_root)
    }

    fn find(&self, session_id: &str) -> CtgResult<SessionDescriptor> {
        discover_sessions(&self.data_root)
            .remove(session_id)
            .ok_or_else(|| CtgError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    fn prepare(&self, session_id: &str, sample_rate: Option<f64>) -> CtgResult<(SessionDescriptor, Arc<PreparedSession>)> {
        let descriptor = self.find(session_id)?;
        let params = self.config.processing.prepare_params(sample_rate);
        let prepared = self.pipeline.prepare(&descriptor, &params)?;
        Ok((descriptor, prepared))
    }

    fn patient_for(&self, descriptor: &SessionDescriptor) -> PatientContext {
        self.patients.lookup(descriptor.group, &descriptor.folder_id)
    }

    pub fn session_overview(&self, session_id: &str, sample_rate: Option<f64>) -> CtgResult<SessionOverview> {
        let (_, prepared) = self.prepare(session_id, sample_rate)?;
        Ok(prepared.overview())
    }

    /// First `limit` frames of a session at the configured rate
    pub fn session_frames(&self, session_id: &str, limit: usize) -> CtgResult<Vec<StreamFrame>> {
        let (_, prepared) = self.prepare(session_id, None)?;
        Ok((0..prepared.len().min(limit))
            .filter_map(|index| StreamFrame::at(&prepared, index))
            .collect())
    }

    pub fn analyze(&self, session_id: &str) -> CtgResult<SessionAnalysis> {
        let (descriptor, prepared) = self.prepare(session_id, None)?;
        let patient = self.patient_for(&descriptor);

        let features = self.extractor.extract_session(&prepared, &patient);
        let statistics = SessionStatistics::compute(&prepared, &features);
        debug!(
            "Analyzed session {}: {} decelerations, {} tachycardic samples",
            session_id, features.decel_count, statistics.tachy_count
        );

        Ok(SessionAnalysis {
            overview: prepared.overview(),
            feature_vector: features.feature_vector(),
            statistics,
            features,
        })
    }

    /// Analysis as JSON with every non-finite number replaced by `null`
    pub fn analysis(&self, session_id: &str) -> CtgResult<Value> {
        to_clean_json(&self.analyze(session_id)?)
    }

    pub fn report_preview(&self, session_id: &str) -> CtgResult<ReportPreview> {
        let (descriptor, prepared) = self.prepare(session_id, None)?;
        let patient = self.patient_for(&descriptor);
        let features = self.extractor.extract_session(&prepared, &patient);
        Ok(ReportPreview::build(&prepared, &features, &patient))
    }

    /// Start playing a session; must be called inside a tokio runtime
    pub fn open_stream(&self, session_id: &str, sample_rate: Option<f64>) -> CtgResult<StreamHandle> {
        let (descriptor, prepared) = self.prepare(session_id, sample_rate)?;
        let patient = self.patient_for(&descriptor);
        spawn_session_stream(prepared, patient, self.config.stream.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::StreamMessage;
    use serde_json::json;
    use std::fs;

    /// Two-minute hypoxia session "4" with both channels
    fn write_dataset(root: &Path) {
        let bpm_dir = root.join("hypoxia/4/bpm");
        let uterus_dir = root.join("hypoxia/4/uterus");
        fs::create_dir_all(&bpm_dir).unwrap();
        fs::create_dir_all(&uterus_dir).unwrap();

        let mut bpm = String::from("time_sec,value\n");
        let mut uterus = String::from("time_sec,value\n");
        for i in 0..480 {
            let t = i as f64 * 0.25;
            let rate = if i % 40 < 20 { 138.0 } else { 146.0 };
            bpm.push_str(&format!("{},{}\n", t, rate));
            uterus.push_str(&format!("{},{}\n", t, 12.0));
        }
        fs::write(bpm_dir.join("4_1.csv"), bpm).unwrap();
        fs::write(uterus_dir.join("4_1.csv"), uterus).unwrap();
    }

    fn service() -> (tempfile::TempDir, CtgService<StaticPatientDirectory>) {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());

        let patients = StaticPatientDirectory::from_json(
            r#"{"hypoxia/4": {"age": 31, "Ph": 7.2, "BE": -4.0, "risk_factors": {"preeclampsia": true}}}"#,
        )
        .unwrap();
        let service = CtgService::with_patients(dir.path(), ServiceConfig::default(), patients).unwrap();
        (dir, service)
    }

    #[test]
    fn test_list_and_overview() {
        let (_dir, service) = service();

        let sessions = service.list_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "4");

        let overview = service.session_overview("4", None).unwrap();
        assert_eq!(overview.sample_count, 480);
        assert!(overview.has_bpm && overview.has_uterus);
        assert!(overview.warnings.is_empty());

        let halved = service.session_overview("4", Some(2.0)).unwrap();
        assert_eq!(halved.sample_count, 240);
        assert_eq!(service.pipeline().cache().len(), 2);
    }

    #[test]
    fn test_unknown_session() {
        let (_dir, service) = service();

        assert!(service.session_overview("99", None).unwrap_err().is_not_found());
        assert!(service.analysis("99").unwrap_err().is_not_found());
        assert!(service.report_preview("99").unwrap_err().is_not_found());
        assert!(service.session_frames("99", 5).unwrap_err().is_not_found());
    }

    #[test]
    fn test_frames_limit() {
        let (_dir, service) = service();

        let frames = service.session_frames("4", 5).unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[4].time, 1.0);
        assert_eq!(frames[0].uterus, Some(12.0));

        assert_eq!(service.session_frames("4", 10_000).unwrap().len(), 480);
    }

    #[test]
    fn test_analysis_payload() {
        let (_dir, service) = service();

        let analysis = service.analysis("4").unwrap();
        assert_eq!(analysis["overview"]["meta"]["session_id"], json!("4"));
        assert_eq!(analysis["statistics"]["bpm_samples"], json!(480));
        assert_eq!(analysis["statistics"]["tachy_count"], json!(0));
        assert_eq!(analysis["features"]["patient"]["age"], json!(31));
        assert_eq!(analysis["features"]["metabolic_acidosis"], json!(true));
        assert_eq!(analysis["feature_vector"].as_array().unwrap().len(), 10);
        assert_eq!(analysis["feature_vector"][4], json!(31.0));
    }

    #[test]
    fn test_report_preview_uses_patient_records() {
        let (_dir, service) = service();

        let preview = service.report_preview("4").unwrap();
        assert_eq!(preview.session_info.group, CohortGroup::Hypoxia);
        assert_eq!(preview.patient_info["age"], json!(31));
        assert!(preview.conclusion.contains("preeclampsia"));
    }

    #[test]
    fn test_config_round_trip_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(&path, r#"{"stream": {"playback_speed": 20.0}}"#).unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.stream.playback_speed, 20.0);
        assert_eq!(config.processing, ProcessingConfig::default());
        assert_eq!(ServiceConfig::from_json(&config.to_json().unwrap()).unwrap(), config);

        fs::write(&path, r#"{"stream": {"playback_speed": -1.0}}"#).unwrap();
        assert!(matches!(ServiceConfig::load(&path), Err(CtgError::InvalidConfig { .. })));
        assert!(matches!(
            ServiceConfig::load(&dir.path().join("missing.json")),
            Err(CtgError::Io { .. })
        ));
    }

    #[test]
    fn test_patient_directory_lookup() {
        let mut directory = StaticPatientDirectory::new();
        let mut patient = PatientContext::new();
        patient.insert("age", 25);
        directory.insert(CohortGroup::Regular, "3", patient.clone());

        assert_eq!(directory.lookup(CohortGroup::Regular, "3"), patient);
        assert!(directory.lookup(CohortGroup::Hypoxia, "3").is_empty());
        assert!(NoPatientRecords.lookup(CohortGroup::Regular, "3").is_empty());
        assert!(StaticPatientDirectory::from_json("[1, 2]").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_stream() {
        let (_dir, service) = service();

        let mut handle = service.open_stream("4", None).unwrap();
        match handle.recv().await {
            Some(StreamMessage::Meta { sample_count, .. }) => assert_eq!(sample_count, 480),
            other => panic!("expected meta message, got {:?}", other),
        }
        assert!(matches!(handle.recv().await, Some(StreamMessage::Frame(_))));

        handle.cancel();
        while handle.recv().await.is_some() {}
        handle.join().await.unwrap();

        assert!(service.open_stream("99", None).unwrap_err().is_not_found());
    }
}
