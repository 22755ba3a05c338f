//! Prepared session: both channels on one uniform grid with filter outputs

use crate::session::{Channel, CohortGroup, SessionDescriptor};
use serde::{Deserialize, Serialize};

/// Kind of gap reported while resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Grid points left without a value after interpolation
    Unfilled,
    /// Source gap longer than the interpolation limit, filled anyway
    Bridged,
}

/// Informational notice about a stretch of missing data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapWarning {
    pub channel: Channel,
    pub kind: GapKind,
    /// Start of the gap, seconds
    pub start: f64,
    /// End of the gap, seconds
    pub end: f64,
    /// Gap duration, seconds
    pub duration: f64,
}

impl GapWarning {
    /// Human readable form used in logs
    pub fn describe(&self) -> String {
        let what = match self.kind {
            GapKind::Unfilled => "missing",
            GapKind::Bridged => "interpolated",
        };
        format!(
            "{}: {:.1}s {} between {:.2}s and {:.2}s",
            self.channel, self.duration, what, self.start, self.end
        )
    }
}

/// Filter outputs of one channel, aligned with the grid
///
/// Missing samples are `f64::NAN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelColumns {
    /// Resampled, unfiltered values
    pub raw: Vec<f64>,
    /// Median filter followed by spike removal
    pub filtered: Vec<f64>,
    /// Exponential baseline of `filtered`
    pub baseline: Vec<f64>,
    /// Savitzky-Golay smoothing of `filtered`
    pub smooth: Vec<f64>,
    /// `filtered - baseline`
    pub deviation: Vec<f64>,
}

impl ChannelColumns {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Identification and time span of a prepared session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub group: CohortGroup,
    pub folder_id: String,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

impl SessionMeta {
    pub fn from_descriptor(session: &SessionDescriptor, grid: &[f64]) -> Self {
        Self {
            session_id: session.session_id.clone(),
            group: session.group,
            folder_id: session.folder_id.clone(),
            start_time: grid.first().copied(),
            end_time: grid.last().copied(),
        }
    }
}

/// Fully conditioned session, shared read-only once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedSession {
    /// Uniform time grid, seconds
    pub grid: Vec<f64>,
    /// Sample rate the grid was built with, Hz
    pub sample_rate: f64,
    /// Heart rate columns, `None` when the channel has no data at all
    pub bpm: Option<ChannelColumns>,
    /// Uterine activity columns, `None` when the channel has no data at all
    pub uterus: Option<ChannelColumns>,
    pub warnings: Vec<GapWarning>,
    pub meta: SessionMeta,
}

impl PreparedSession {
    /// Number of grid points
    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Grid step in seconds
    pub fn step(&self) -> f64 {
        1.0 / self.sample_rate
    }

    /// Columns of a channel
    pub fn channel(&self, channel: Channel) -> Option<&ChannelColumns> {
        match channel {
            Channel::Bpm => self.bpm.as_ref(),
            Channel::Uterus => self.uterus.as_ref(),
        }
    }

    /// Filtered value of a channel at grid index, `None` when missing
    pub fn filtered_at(&self, channel: Channel, index: usize) -> Option<f64> {
        self.channel(channel)
            .and_then(|columns| columns.filtered.get(index).copied())
            .filter(|v| v.is_finite())
    }

    /// Compact metadata view
    pub fn overview(&self) -> SessionOverview {
        SessionOverview {
            meta: self.meta.clone(),
            sample_rate: self.sample_rate,
            sample_count: self.len(),
            has_bpm: self.bpm.is_some(),
            has_uterus: self.uterus.is_some(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Session metadata handed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOverview {
    pub meta: SessionMeta,
    pub sample_rate: f64,
    pub sample_count: usize,
    pub has_bpm: bool,
    pub has_uterus: bool,
    pub warnings: Vec<GapWarning>,
}
