//! Paced playback of a prepared session with periodic advisory packets

use crate::online::{HorizonForecast, OnlineSessionState, RiskAssessment, RiskScorer, TrendClassifier, TrendPrediction, MIN_ONLINE_POINTS};
use ctg_core::{config_error, Channel, CtgError, CtgResult, GapWarning, PreparedSession, SessionMeta};
use ctg_processing::stats::{nan_mean, nan_median};
use ctg_processing::{FeatureSet, PatientContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Values averaged for the one-minute statistics of an advisory packet
const ONE_MINUTE_VALUES: usize = 60;

/// Streaming configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Window of the short-term forecasters (s)
    pub forecaster_window_s: f64,
    /// Forecast horizons reported in advisory packets (s)
    pub horizons_s: Vec<f64>,
    /// Valid samples used for trend classification
    pub trend_window: usize,
    /// Valid samples used for risk scoring
    pub risk_buffer: usize,
    /// Emulated time between advisory packets (s)
    pub advisory_interval_s: f64,
    /// 1.0 plays in real time, larger values play faster
    pub playback_speed: f64,
    /// Messages buffered before the producer waits for the consumer
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            forecaster_window_s: 300.0,
            horizons_s: vec![300.0, 600.0],
            trend_window: 100,
            risk_buffer: 200,
            advisory_interval_s: 5.0,
            playback_speed: 1.0,
            channel_capacity: 256,
        }
    }
}

impl StreamConfig {
    pub fn with_playback_speed(&self, playback_speed: f64) -> Self {
        Self {
            playback_speed,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> CtgResult<()> {
        if !(self.playback_speed.is_finite() && self.playback_speed > 0.0) {
            return Err(config_error!("Playback speed must be positive, got {}", self.playback_speed));
        }
        if !(self.forecaster_window_s.is_finite() && self.forecaster_window_s > 0.0) {
            return Err(config_error!("Forecaster window must be positive, got {}", self.forecaster_window_s));
        }
        if !(self.advisory_interval_s.is_finite() && self.advisory_interval_s > 0.0) {
            return Err(config_error!("Advisory interval must be positive, got {}", self.advisory_interval_s));
        }
        if self.horizons_s.iter().any(|h| !(h.is_finite() && *h > 0.0)) {
            return Err(config_error!("Forecast horizons must be positive, got {:?}", self.horizons_s));
        }
        if self.trend_window < MIN_ONLINE_POINTS || self.risk_buffer < MIN_ONLINE_POINTS {
            return Err(config_error!(
                "Trend window and risk buffer need at least {} samples",
                MIN_ONLINE_POINTS
            ));
        }
        if self.channel_capacity == 0 {
            return Err(config_error!("Channel capacity must be at least 1"));
        }
        Ok(())
    }
}

/// One grid point of a played session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub time: f64,
    pub bpm: Option<f64>,
    pub uterus: Option<f64>,
}

impl StreamFrame {
    /// Frame at a grid index, from the filtered columns
    pub fn at(session: &PreparedSession, index: usize) -> Option<Self> {
        let time = *session.grid.get(index)?;
        Some(Self {
            time,
            bpm: session.filtered_at(Channel::Bpm, index),
            uterus: session.filtered_at(Channel::Uterus, index),
        })
    }
}

/// Heart-rate summary of the risk buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferStatistics {
    pub mean_bpm_1min: f64,
    pub median_bpm_1min: f64,
    pub current_bpm: Option<f64>,
    pub samples_in_buffer: usize,
}

impl BufferStatistics {
    pub fn from_buffer(buffer: &[f64], current_bpm: Option<f64>) -> CtgResult<Self> {
        let recent = &buffer[buffer.len().saturating_sub(ONE_MINUTE_VALUES)..];
        let insufficient = || CtgError::InsufficientData {
            required: 1,
            available: 0,
        };
        Ok(Self {
            mean_bpm_1min: nan_mean(recent).ok_or_else(insufficient)?,
            median_bpm_1min: nan_median(recent).ok_or_else(insufficient)?,
            current_bpm,
            samples_in_buffer: buffer.len(),
        })
    }
}

/// Clinical events found in the forecaster window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEvents {
    pub decel_count: usize,
    pub tachy_count: usize,
    pub brady_count: usize,
    pub stv_mean: Option<f64>,
    pub acidosis: bool,
}

impl From<&FeatureSet> for WindowEvents {
    fn from(features: &FeatureSet) -> Self {
        Self {
            decel_count: features.decel_count,
            tachy_count: features.tachy_count,
            brady_count: features.brady_count,
            stv_mean: features.stv_mean,
            acidosis: features.metabolic_acidosis
                || features.respiratory_acidosis
                || features.lactic_acidosis,
        }
    }
}

/// Periodic trend, risk and forecast summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryPacket {
    pub timestamp: f64,
    pub trend: TrendPrediction,
    pub risk: RiskAssessment,
    pub statistics: BufferStatistics,
    pub events: WindowEvents,
    pub forecast: BTreeMap<String, HorizonForecast>,
}

/// Message sent to a stream consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Meta {
        meta: SessionMeta,
        sample_rate: f64,
        sample_count: usize,
        warnings: Vec<GapWarning>,
    },
    Frame(StreamFrame),
    Prediction(AdvisoryPacket),
    Error {
        message: String,
    },
}

/// Consumer side of a running stream
#[derive(Debug)]
pub struct StreamHandle {
    id: Uuid,
    receiver: mpsc::Receiver<StreamMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next message, `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.receiver.recv().await
    }

    /// Token that stops this stream when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop accepting messages; the producer ends at its next send
    pub fn close(&mut self) {
        self.receiver.close();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the stream task has exited
    pub async fn join(self) -> CtgResult<()> {
        self.task.await.map_err(|e| CtgError::Internal {
            reason: format!("Stream supervisor failed: {}", e),
        })
    }
}

/// Start playing a session on its own task
///
/// Frames are paced at one grid step divided by the playback speed.
/// A fault inside the playback task ends the stream with a single
/// [`StreamMessage::Error`].
pub fn spawn_session_stream(
    session: Arc<PreparedSession>,
    patient: PatientContext,
    config: StreamConfig,
) -> CtgResult<StreamHandle> {
    config.validate()?;

    let id = Uuid::new_v4();
    let (sender, receiver) = mpsc::channel(config.channel_capacity);
    let cancel = CancellationToken::new();

    info!(
        "Starting stream {} for session {} ({} frames, speed {}x)",
        id,
        session.meta.session_id,
        session.len(),
        config.playback_speed
    );

    let worker = tokio::spawn(play_session(
        Arc::clone(&session),
        patient,
        config,
        sender.clone(),
        cancel.clone(),
    ));

    let supervisor_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let outcome = worker.await;
        if let Some(message) = fault_message(outcome) {
            error!("Stream {} failed: {}", id, message);
            deliver(&sender, &supervisor_cancel, StreamMessage::Error { message }).await;
        } else {
            debug!("Stream {} finished", id);
        }
    });

    Ok(StreamHandle {
        id,
        receiver,
        cancel,
        task,
    })
}

/// Error text for a failed playback task, `None` on a clean exit
fn fault_message(outcome: Result<CtgResult<()>, JoinError>) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) if e.is_panic() => Some("Stream task panicked".to_string()),
        Err(_) => None,
    }
}

/// Send unless cancelled; `false` when the stream should stop
async fn deliver(sender: &mpsc::Sender<StreamMessage>, cancel: &CancellationToken, message: StreamMessage) -> bool {
    tokio::select! {
        sent = sender.send(message) => sent.is_ok(),
        _ = cancel.cancelled() => false,
    }
}

async fn play_session(
    session: Arc<PreparedSession>,
    patient: PatientContext,
    config: StreamConfig,
    sender: mpsc::Sender<StreamMessage>,
    cancel: CancellationToken,
) -> CtgResult<()> {
    let session_id = session.meta.session_id.as_str();
    let pause = Duration::from_secs_f64(session.step() / config.playback_speed);

    let meta = StreamMessage::Meta {
        meta: session.meta.clone(),
        sample_rate: session.sample_rate,
        sample_count: session.len(),
        warnings: session.warnings.clone(),
    };
    if !deliver(&sender, &cancel, meta).await {
        return Ok(());
    }

    let mut online = OnlineSessionState::new(session_id, session.sample_rate, config.forecaster_window_s, patient);
    let mut trend = TrendClassifier::new(config.trend_window);
    let scorer = RiskScorer;
    let mut risk_buffer: VecDeque<f64> = VecDeque::with_capacity(config.risk_buffer);
    let mut last_advisory = session.grid.first().copied().unwrap_or(0.0);

    for index in 0..session.len() {
        let Some(frame) = StreamFrame::at(&session, index) else {
            break;
        };
        let (time, bpm, uterus) = (frame.time, frame.bpm, frame.uterus);

        if !deliver(&sender, &cancel, StreamMessage::Frame(frame)).await {
            info!("Stream for session {} stopped at {:.2}s", session_id, time);
            return Ok(());
        }

        online.update(time, bpm, uterus);
        if let Some(value) = bpm {
            trend.update(time, Some(value));
            if risk_buffer.len() == config.risk_buffer {
                risk_buffer.pop_front();
            }
            risk_buffer.push_back(value);
        }

        if time - last_advisory >= config.advisory_interval_s && risk_buffer.len() >= MIN_ONLINE_POINTS {
            let buffer = risk_buffer.make_contiguous();
            let packet = AdvisoryPacket {
                timestamp: time,
                trend: trend.predict(),
                risk: scorer.assess(buffer),
                statistics: BufferStatistics::from_buffer(buffer, bpm)?,
                events: WindowEvents::from(online.current_features()?),
                forecast: online.predict_short(&config.horizons_s),
            };
            debug!(
                "Advisory for session {} at {:.2}s: {:?} risk",
                session_id, time, packet.risk.risk_level
            );
            if !deliver(&sender, &cancel, StreamMessage::Prediction(packet)).await {
                return Ok(());
            }
            last_advisory = time;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Stream for session {} cancelled at {:.2}s", session_id, time);
                return Ok(());
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!("Stream for session {} completed", session_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::online::{RiskLevel, TrendDirection};
    use ctg_core::{ChannelColumns, CohortGroup};

    fn columns(values: Vec<f64>) -> ChannelColumns {
        ChannelColumns {
            raw: values.clone(),
            filtered: values.clone(),
            baseline: values.clone(),
            smooth: values.clone(),
            deviation: vec![0.0; values.len()],
        }
    }

    fn session(bpm: Vec<f64>) -> Arc<PreparedSession> {
        let grid: Vec<f64> = (0..bpm.len()).map(|i| i as f64 * 0.25).collect();
        let uterus = vec![8.0; bpm.len()];
        Arc::new(PreparedSession {
            meta: SessionMeta {
                session_id: "12".to_string(),
                group: CohortGroup::Regular,
                folder_id: "12".to_string(),
                start_time: grid.first().copied(),
                end_time: grid.last().copied(),
            },
            grid,
            sample_rate: 4.0,
            bpm: Some(columns(bpm)),
            uterus: Some(columns(uterus)),
            warnings: Vec::new(),
        })
    }

    async fn collect(mut handle: StreamHandle) -> Vec<StreamMessage> {
        let mut messages = Vec::new();
        while let Some(message) = handle.recv().await {
            messages.push(message);
        }
        messages
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_playback() {
        let handle = spawn_session_stream(session(vec![140.0; 100]), PatientContext::new(), StreamConfig::default())
            .unwrap();
        let messages = collect(handle).await;

        assert_eq!(messages.len(), 105);
        assert!(matches!(messages[0], StreamMessage::Meta { sample_count: 100, .. }));

        let frames: Vec<&StreamFrame> = messages
            .iter()
            .filter_map(|m| match m {
                StreamMessage::Frame(frame) => Some(frame),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 100);
        assert_eq!(frames[99].time, 24.75);
        assert_eq!(frames[3].bpm, Some(140.0));
        assert_eq!(frames[3].uterus, Some(8.0));

        let packets: Vec<&AdvisoryPacket> = messages
            .iter()
            .filter_map(|m| match m {
                StreamMessage::Prediction(packet) => Some(packet),
                _ => None,
            })
            .collect();
        let stamps: Vec<f64> = packets.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![5.0, 10.0, 15.0, 20.0]);

        let first = packets[0];
        assert_eq!(first.statistics.samples_in_buffer, 21);
        assert_eq!(first.statistics.mean_bpm_1min, 140.0);
        assert_eq!(first.trend.trend, TrendDirection::Stable);
        assert_eq!(first.risk.risk_level, RiskLevel::Low);
        assert_eq!(first.forecast["300"].bpm.pred, Some(140.0));
        assert_eq!(first.events.decel_count, 0);
        assert_eq!(first.events.tachy_count, 0);
        assert!(!first.events.acidosis);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advisory_reports_window_events() {
        let mut patient = PatientContext::new();
        patient.insert("LAC", 5.2);
        let handle = spawn_session_stream(session(vec![170.0; 30]), patient, StreamConfig::default()).unwrap();

        let packets: Vec<AdvisoryPacket> = collect(handle)
            .await
            .into_iter()
            .filter_map(|m| match m {
                StreamMessage::Prediction(packet) => Some(packet),
                _ => None,
            })
            .collect();

        assert_eq!(packets.len(), 1);
        // Frames 0..=20 played when the packet at 5s is built
        assert_eq!(packets[0].events.tachy_count, 21);
        assert_eq!(packets[0].events.brady_count, 0);
        assert!(packets[0].events.acidosis);

        let json = serde_json::to_value(&packets[0]).unwrap();
        assert_eq!(json["events"]["tachy_count"], 21);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_streams_are_independent() {
        let mut first =
            spawn_session_stream(session(vec![140.0; 200]), PatientContext::new(), StreamConfig::default()).unwrap();
        let mut second =
            spawn_session_stream(session(vec![150.0; 200]), PatientContext::new(), StreamConfig::default()).unwrap();
        assert_ne!(first.id(), second.id());

        let mut first_frames = 0;
        let mut second_frames = 0;
        while first_frames < 5 || second_frames < 5 {
            tokio::select! {
                Some(message) = first.recv(), if first_frames < 5 => {
                    if let StreamMessage::Frame(frame) = message {
                        assert_eq!(frame.bpm, Some(140.0));
                        first_frames += 1;
                    }
                }
                Some(message) = second.recv(), if second_frames < 5 => {
                    if let StreamMessage::Frame(frame) = message {
                        assert_eq!(frame.bpm, Some(150.0));
                        second_frames += 1;
                    }
                }
                else => break,
            }
        }

        first.cancel();
        while first.recv().await.is_some() {}
        first.join().await.unwrap();
        assert!(!second.is_finished());

        while let Some(message) = second.recv().await {
            if matches!(message, StreamMessage::Frame(_)) {
                second_frames += 1;
            }
            assert!(!matches!(message, StreamMessage::Error { .. }));
        }
        assert_eq!(second_frames, 200);
        second.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_values_become_none() {
        let mut bpm = vec![140.0; 8];
        bpm[2] = f64::NAN;
        let mut handle = spawn_session_stream(session(bpm), PatientContext::new(), StreamConfig::default()).unwrap();

        let _meta = handle.recv().await;
        let mut frames = Vec::new();
        while let Some(StreamMessage::Frame(frame)) = handle.recv().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 8);
        assert_eq!(frames[2].bpm, None);

        let json = serde_json::to_value(StreamMessage::Frame(frames[2].clone())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "frame", "time": 0.5, "bpm": null, "uterus": 8.0}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_stream() {
        let mut handle =
            spawn_session_stream(session(vec![140.0; 400]), PatientContext::new(), StreamConfig::default()).unwrap();

        let mut frames = 0;
        while let Some(message) = handle.recv().await {
            if matches!(message, StreamMessage::Frame(_)) {
                frames += 1;
            }
            if frames == 10 {
                handle.cancel();
            }
        }

        assert!(frames >= 10);
        assert!(frames < 400);
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_receiver_stops_producer() {
        let mut handle =
            spawn_session_stream(session(vec![140.0; 400]), PatientContext::new(), StreamConfig::default()).unwrap();
        let _meta = handle.recv().await;
        handle.close();

        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_fault_message() {
        assert_eq!(fault_message(Ok(Ok(()))), None);

        let err = CtgError::InsufficientData { required: 1, available: 0 };
        assert!(fault_message(Ok(Err(err))).is_some());

        let panicked: Result<CtgResult<()>, JoinError> = tokio::spawn(async { panic!("boom") }).await;
        assert_eq!(fault_message(panicked), Some("Stream task panicked".to_string()));
    }

    #[test]
    fn test_buffer_statistics_window() {
        let mut buffer = vec![100.0; 40];
        buffer.extend(vec![150.0; 60]);

        let stats = BufferStatistics::from_buffer(&buffer, Some(150.0)).unwrap();
        assert_eq!(stats.mean_bpm_1min, 150.0);
        assert_eq!(stats.samples_in_buffer, 100);

        assert!(matches!(
            BufferStatistics::from_buffer(&[], None),
            Err(CtgError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(StreamConfig::default().validate().is_ok());
        assert!(StreamConfig::default().with_playback_speed(0.0).validate().is_err());

        let mut config = StreamConfig::default();
        config.horizons_s = vec![300.0, -1.0];
        assert!(config.validate().is_err());

        let json = serde_json::to_string(&StreamConfig::default()).unwrap();
        let parsed: StreamConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, StreamConfig::default());
    }
}
