//! Session pipeline: assembly, resampling and filtering behind a cache

use crate::cache::{CacheKey, SessionCache};
use crate::config::{PrepareParams, ProcessingConfig};
use crate::filters::FilterBank;
use crate::resample::resample_and_merge;
use ctg_core::{Channel, CtgResult, PreparedSession, SessionDescriptor, SessionMeta};
use ctg_ingest::{CsvSeriesSource, FragmentColumns, SeriesSource};
use std::sync::Arc;
use tracing::{debug, info};

/// Default number of prepared sessions kept in memory
pub const DEFAULT_CACHE_CAPACITY: usize = 20;

/// Prepares sessions and memoizes the results
///
/// Preparation is synchronous. The pipeline can be shared between threads;
/// concurrent misses for the same key may both compute, the first insert
/// is kept.
pub struct SessionPipeline<S: SeriesSource = CsvSeriesSource> {
    source: S,
    cache: SessionCache,
}

impl SessionPipeline<CsvSeriesSource> {
    /// Pipeline reading CSV fragments
    pub fn new(columns: FragmentColumns, cache_capacity: usize) -> Self {
        Self::with_source(CsvSeriesSource::new(columns), cache_capacity)
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(config.columns.clone(), config.cache_capacity)
    }
}

impl Default for SessionPipeline<CsvSeriesSource> {
    fn default() -> Self {
        Self::new(FragmentColumns::default(), DEFAULT_CACHE_CAPACITY)
    }
}

impl<S: SeriesSource> SessionPipeline<S> {
    /// Pipeline over any series source
    pub fn with_source(source: S, cache_capacity: usize) -> Self {
        Self {
            source,
            cache: SessionCache::new(cache_capacity),
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Prepared session for the given parameters, from cache when possible
    pub fn prepare(&self, session: &SessionDescriptor, params: &PrepareParams) -> CtgResult<Arc<PreparedSession>> {
        params.validate()?;

        let key = CacheKey::new(&session.session_id, params);
        if let Some(hit) = self.cache.get(&key) {
            debug!("Cache hit for session {} at {} Hz", session.session_id, params.sample_rate);
            return Ok(hit);
        }

        let prepared = self.build(session, params)?;
        Ok(self.cache.insert(key, Arc::new(prepared)))
    }

    fn build(&self, session: &SessionDescriptor, params: &PrepareParams) -> CtgResult<PreparedSession> {
        let bank = FilterBank::ctg_conditioning(params)?;

        let bpm = self.source.load_channel(session.files(Channel::Bpm), Channel::Bpm);
        let uterus = self.source.load_channel(session.files(Channel::Uterus), Channel::Uterus);

        let table = resample_and_merge(&bpm, &uterus, &params.resample_params());

        // A channel without any value gets no columns at all
        let condition = |values: &[f64]| {
            values
                .iter()
                .any(|v| v.is_finite())
                .then(|| bank.apply(values.to_vec()))
        };
        let bpm_columns = condition(&table.bpm);
        let uterus_columns = condition(&table.uterus);

        let meta = SessionMeta::from_descriptor(session, &table.time);

        info!(
            "Prepared session {}: {} samples at {} Hz, bpm={}, uterus={}, {} warnings",
            session.session_id,
            table.len(),
            params.sample_rate,
            bpm_columns.is_some(),
            uterus_columns.is_some(),
            table.warnings.len()
        );

        Ok(PreparedSession {
            grid: table.time,
            sample_rate: params.sample_rate,
            bpm: bpm_columns,
            uterus: uterus_columns,
            warnings: table.warnings,
            meta,
        })
    }
}
