//! Session identification types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cohort group a subject folder belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortGroup {
    Hypoxia,
    Regular,
}

impl CohortGroup {
    /// Every known group, in scan order
    pub const ALL: [CohortGroup; 2] = [CohortGroup::Hypoxia, CohortGroup::Regular];

    /// Directory name used on disk
    pub fn as_str(&self) -> &'static str {
        match self {
            CohortGroup::Hypoxia => "hypoxia",
            CohortGroup::Regular => "regular",
        }
    }
}

/// Physiological channel recorded for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Fetal heart rate, beats per minute
    Bpm,
    /// Tocographic signal, arbitrary units
    Uterus,
}

impl Channel {
    /// Name used for subfolders and payload fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Bpm => "bpm",
            Channel::Uterus => "uterus",
        }
    }
}

/// One recording session discovered on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Cohort group
    pub group: CohortGroup,
    /// Subject folder name
    pub folder_id: String,
    /// Session identifier, deterministic from the folder layout
    pub session_id: String,
    /// BPM fragments in concatenation order
    pub bpm_files: Vec<PathBuf>,
    /// Uterus fragments in concatenation order
    pub uterus_files: Vec<PathBuf>,
}

impl SessionDescriptor {
    /// Fragment list for a channel
    pub fn files(&self, channel: Channel) -> &[PathBuf] {
        match channel {
            Channel::Bpm => &self.bpm_files,
            Channel::Uterus => &self.uterus_files,
        }
    }

    /// Compact listing entry
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            group: self.group,
            folder_id: self.folder_id.clone(),
        }
    }
}

/// Entry of the session list handed to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub group: CohortGroup,
    pub folder_id: String,
}

impl std::fmt::Display for CohortGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
