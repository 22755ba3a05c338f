//! Series assembly: concatenate a channel's CSV fragments into one series
//!
//! Every fragment restarts its own clock near zero. Fragments are shifted so
//! that each one starts one sample interval after the previous one ended.

use ctg_core::{fragment_error, Channel, ChannelSeries, CtgError, CtgResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Gap between fragments when no fragment reveals its spacing (4 Hz)
const FALLBACK_SPACING_S: f64 = 0.25;

/// Column names recognised in fragment headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentColumns {
    pub time: String,
    pub value: String,
}

impl Default for FragmentColumns {
    fn default() -> Self {
        Self {
            time: "time_sec".to_string(),
            value: "value".to_string(),
        }
    }
}

/// Source of assembled channel series
///
/// The pipeline only talks to this trait, so alternative storage (or a
/// counting double in tests) can stand in for the CSV reader.
pub trait SeriesSource: Send + Sync {
    /// Load and concatenate the given fragments of one channel
    fn load_channel(&self, files: &[PathBuf], channel: Channel) -> ChannelSeries;
}

/// Reads fragments from CSV files on disk
#[derive(Debug, Clone, Default)]
pub struct CsvSeriesSource {
    columns: FragmentColumns,
}

impl CsvSeriesSource {
    pub fn new(columns: FragmentColumns) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &FragmentColumns {
        &self.columns
    }
}

impl SeriesSource for CsvSeriesSource {
    fn load_channel(&self, files: &[PathBuf], channel: Channel) -> ChannelSeries {
        assemble_channel(files, channel, &self.columns)
    }
}

/// Read one fragment, sorted by its own time column
///
/// Rows with a missing or non-numeric cell are dropped. A fragment without
/// the expected columns or without any usable row is an error.
pub fn read_fragment(path: &Path, channel: Channel, columns: &FragmentColumns) -> CtgResult<ChannelSeries> {
    let path_str = path.display().to_string();

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(&path_str, e))?;

    let headers = reader.headers().map_err(|e| csv_error(&path_str, e))?.clone();
    let time_idx = headers
        .iter()
        .position(|h| h == columns.time)
        .ok_or_else(|| fragment_error!(path_str, "missing column {}", columns.time))?;
    let value_idx = headers
        .iter()
        .position(|h| h == columns.value)
        .ok_or_else(|| fragment_error!(path_str, "missing column {}", columns.value))?;

    let mut rows: Vec<(f64, f64)> = Vec::new();
    let mut dropped = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(_) => {
                dropped += 1;
                continue;
            }
        };

        match (parse_cell(record.get(time_idx)), parse_cell(record.get(value_idx))) {
            (Some(time), Some(value)) => rows.push((time, value)),
            _ => dropped += 1,
        }
    }

    if rows.is_empty() {
        return Err(fragment_error!(path_str, "no usable rows"));
    }

    if dropped > 0 {
        debug!("{}: dropped {} unusable rows", path_str, dropped);
    }

    // Stable sort keeps the file order of equal timestamps
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (times, values): (Vec<f64>, Vec<f64>) = rows.into_iter().unzip();
    ChannelSeries::from_parts(channel, times, values)
}

/// Concatenate fragments in the given order into one continuous series
///
/// Unreadable fragments are skipped with a warning; no usable fragment
/// yields an empty series.
pub fn assemble_channel(files: &[PathBuf], channel: Channel, columns: &FragmentColumns) -> ChannelSeries {
    let mut series = ChannelSeries::new(channel);
    let mut last_end: Option<f64> = None;
    // Spacing after the previous fragment, unknown after a lone sample
    let mut gap_spacing: Option<f64> = None;
    let mut known_spacing: Option<f64> = None;
    let mut used = 0usize;

    for path in files {
        let fragment = match read_fragment(path, channel, columns) {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!("Skipping {} fragment: {}", channel, e);
                continue;
            }
        };

        let first = match fragment.start_time() {
            Some(first) => first,
            None => continue,
        };

        let own_spacing = fragment.median_spacing();
        if let Some(spacing) = own_spacing {
            known_spacing.get_or_insert(spacing);
        }

        let start = match last_end {
            None => 0.0,
            Some(end) => {
                end + gap_spacing
                    .or(own_spacing)
                    .or(known_spacing)
                    .unwrap_or(FALLBACK_SPACING_S)
            }
        };

        let shifted: Vec<f64> = fragment.times().iter().map(|t| t - first + start).collect();
        series.extend_from(&shifted, fragment.values());
        used += 1;

        last_end = shifted.last().copied();
        gap_spacing = own_spacing.or(known_spacing);
    }

    debug!(
        "Assembled {} series: {} samples from {}/{} fragments",
        channel,
        series.len(),
        used,
        files.len()
    );
    series
}

fn parse_cell(cell: Option<&str>) -> Option<f64> {
    cell.and_then(|s| s.parse::<f64>().ok()).filter(|v| v.is_finite())
}

fn csv_error(path: &str, error: csv::Error) -> CtgError {
    if error.is_io_error() {
        CtgError::Io {
            path: path.to_string(),
            reason: error.to_string(),
        }
    } else {
        fragment_error!(path, "{}", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_fragment(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn regular_fragment(samples: usize, step: f64, value: f64) -> String {
        let mut contents = String::from("time_sec,value\n");
        for i in 0..samples {
            contents.push_str(&format!("{},{}\n", i as f64 * step, value));
        }
        contents
    }

    #[test]
    fn test_fragments_abut_at_end_plus_spacing() {
        let dir = tempdir().unwrap();
        let a = write_fragment(dir.path(), "a.csv", &regular_fragment(5, 0.25, 140.0));
        let b = write_fragment(dir.path(), "b.csv", &regular_fragment(3, 0.25, 150.0));

        let series = assemble_channel(&[a, b], Channel::Bpm, &FragmentColumns::default());

        assert_eq!(series.len(), 8);
        // First fragment ends at 1.0, spacing 0.25
        assert!((series.times()[5] - 1.25).abs() < 1e-12);
        assert_eq!(series.values()[5], 150.0);
        assert!((series.end_time().unwrap() - 1.75).abs() < 1e-12);
        assert!(series.times().windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_fragment_is_zero_based_and_sorted() {
        let dir = tempdir().unwrap();
        let a = write_fragment(
            dir.path(),
            "a.csv",
            "value,time_sec\n3,12.5\n1,12.0\n2,12.25\n",
        );

        let series = assemble_channel(&[a], Channel::Uterus, &FragmentColumns::default());
        assert_eq!(series.times(), &[0.0, 0.25, 0.5]);
        assert_eq!(series.values(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_skips_malformed_and_drops_bad_rows() {
        let dir = tempdir().unwrap();
        let bad = write_fragment(dir.path(), "a.csv", "t,v\n0,1\n");
        let empty = write_fragment(dir.path(), "b.csv", "time_sec,value\n");
        let partial = write_fragment(
            dir.path(),
            "c.csv",
            "time_sec,value\n0,140\n0.25,\n0.5,abc\n0.75,141\n",
        );
        let missing = dir.path().join("missing.csv");

        let series = assemble_channel(
            &[bad, empty, missing, partial],
            Channel::Bpm,
            &FragmentColumns::default(),
        );

        assert_eq!(series.times(), &[0.0, 0.75]);
        assert_eq!(series.values(), &[140.0, 141.0]);
    }

    #[test]
    fn test_single_sample_fragment_uses_known_spacing() {
        let dir = tempdir().unwrap();
        let a = write_fragment(dir.path(), "a.csv", &regular_fragment(3, 0.5, 1.0));
        let b = write_fragment(dir.path(), "b.csv", "time_sec,value\n0,2\n");
        let c = write_fragment(dir.path(), "c.csv", "time_sec,value\n0,3\n");

        let series = assemble_channel(&[a, b, c], Channel::Uterus, &FragmentColumns::default());
        assert_eq!(series.times(), &[0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_leading_single_sample_fragment_takes_next_spacing() {
        let dir = tempdir().unwrap();
        let a = write_fragment(dir.path(), "a.csv", "time_sec,value\n7,1\n");
        let b = write_fragment(dir.path(), "b.csv", &regular_fragment(3, 0.25, 2.0));

        let series = assemble_channel(&[a, b], Channel::Uterus, &FragmentColumns::default());
        assert_eq!(series.times(), &[0.0, 0.25, 0.5, 0.75]);
        assert_eq!(series.values(), &[1.0, 2.0, 2.0, 2.0]);
        assert!(series.times().windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_single_sample_fragments_only() {
        let dir = tempdir().unwrap();
        let a = write_fragment(dir.path(), "a.csv", "time_sec,value\n0,1\n");
        let b = write_fragment(dir.path(), "b.csv", "time_sec,value\n3,2\n");

        let series = assemble_channel(&[a, b], Channel::Bpm, &FragmentColumns::default());
        assert_eq!(series.times(), &[0.0, FALLBACK_SPACING_S]);
    }

    #[test]
    fn test_no_usable_fragment_is_empty() {
        let series = assemble_channel(&[], Channel::Bpm, &FragmentColumns::default());
        assert!(series.is_empty());
    }

    #[test]
    fn test_read_fragment_errors() {
        let dir = tempdir().unwrap();
        let columns = FragmentColumns::default();

        let err = read_fragment(&dir.path().join("nope.csv"), Channel::Bpm, &columns).unwrap_err();
        assert!(matches!(err, CtgError::Io { .. }));

        let path = write_fragment(dir.path(), "a.csv", "time_sec\n0\n");
        let err = read_fragment(&path, Channel::Bpm, &columns).unwrap_err();
        assert!(matches!(err, CtgError::MalformedFragment { .. }));
    }

    #[test]
    fn test_custom_columns() {
        let dir = tempdir().unwrap();
        let path = write_fragment(dir.path(), "a.csv", "t,hr\n0,120\n1,121\n");
        let source = CsvSeriesSource::new(FragmentColumns {
            time: "t".to_string(),
            value: "hr".to_string(),
        });

        let series = source.load_channel(&[path], Channel::Bpm);
        assert_eq!(series.values(), &[120.0, 121.0]);
    }
}
