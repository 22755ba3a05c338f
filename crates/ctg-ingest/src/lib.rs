//! CTG-Ingest: session discovery and fragment assembly
//!
//! Turns the on-disk fragment layout into session descriptors and continuous channel series.

pub mod discovery;
pub mod assembly;

pub use discovery::{discover_sessions, list_sessions};
pub use assembly::{
    assemble_channel, read_fragment, CsvSeriesSource, FragmentColumns, SeriesSource,
};
