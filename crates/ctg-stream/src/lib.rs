//! CTG-Stream: online prediction, session playback and the service facade
//!
//! Plays prepared sessions frame by frame with periodic advisory packets.

pub mod online;
pub mod playback;
pub mod service;

pub use online::*;
pub use playback::{
    spawn_session_stream, AdvisoryPacket, BufferStatistics, StreamConfig, StreamFrame, StreamHandle, StreamMessage,
    WindowEvents,
};
pub use service::{CtgService, NoPatientRecords, PatientDirectory, ServiceConfig, SessionAnalysis, StaticPatientDirectory};
