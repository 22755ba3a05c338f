//! Bounded cache of prepared sessions

use crate::config::PrepareParams;
use ctg_core::PreparedSession;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Session id plus every parameter that shapes a prepared session
///
/// Floats are keyed by their bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    session_id: String,
    sample_rate: u64,
    median_kernel: usize,
    ema_span: usize,
    interp_limit_s: u64,
    gap_warn_s: u64,
    spike_threshold: u64,
    smooth_window: usize,
    smooth_polyorder: usize,
}

impl CacheKey {
    pub fn new(session_id: &str, params: &PrepareParams) -> Self {
        Self {
            session_id: session_id.to_string(),
            sample_rate: params.sample_rate.to_bits(),
            median_kernel: params.median_kernel,
            ema_span: params.ema_span,
            interp_limit_s: params.interp_limit_s.to_bits(),
            gap_warn_s: params.gap_warn_s.to_bits(),
            spike_threshold: params.spike_threshold.to_bits(),
            smooth_window: params.smooth_window,
            smooth_polyorder: params.smooth_polyorder,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Arc<PreparedSession>>,
    /// Insertion order, oldest first
    order: VecDeque<CacheKey>,
}

/// FIFO-evicting map from [`CacheKey`] to shared prepared sessions
///
/// Readers share the lock. An entry, once inserted, is never replaced.
pub struct SessionCache {
    capacity: usize,
    state: RwLock<CacheState>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<PreparedSession>> {
        self.state.read().entries.get(key).cloned()
    }

    /// Insert a session and return the cached value for the key
    ///
    /// When another caller inserted the same key first, its value is kept
    /// and returned instead.
    pub fn insert(&self, key: CacheKey, session: Arc<PreparedSession>) -> Arc<PreparedSession> {
        let mut state = self.state.write();

        if let Some(existing) = state.entries.get(&key) {
            return Arc::clone(existing);
        }

        state.entries.insert(key.clone(), Arc::clone(&session));
        state.order.push_back(key);

        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
                debug!("Evicted prepared session {} from cache", oldest.session_id());
            }
        }

        session
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.read().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.order.clear();
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctg_core::{CohortGroup, SessionMeta};

    fn prepared(id: &str) -> Arc<PreparedSession> {
        Arc::new(PreparedSession {
            grid: vec![0.0],
            sample_rate: 4.0,
            bpm: None,
            uterus: None,
            warnings: Vec::new(),
            meta: SessionMeta {
                session_id: id.to_string(),
                group: CohortGroup::Regular,
                folder_id: id.to_string(),
                start_time: Some(0.0),
                end_time: Some(0.0),
            },
        })
    }

    #[test]
    fn test_key_encodes_parameters() {
        let params = PrepareParams::default();
        let a = CacheKey::new("1", &params);
        assert_eq!(a, CacheKey::new("1", &params));
        assert_ne!(a, CacheKey::new("2", &params));
        assert_ne!(a, CacheKey::new("1", &params.with_sample_rate(2.0)));

        let mut other = params.clone();
        other.spike_threshold = 3.5;
        assert_ne!(a, CacheKey::new("1", &other));
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = SessionCache::new(4);
        let key = CacheKey::new("1", &PrepareParams::default());

        let first = prepared("1");
        let stored = cache.insert(key.clone(), Arc::clone(&first));
        assert!(Arc::ptr_eq(&stored, &first));

        let second = cache.insert(key.clone(), prepared("1"));
        assert!(Arc::ptr_eq(&second, &first));
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = SessionCache::new(2);
        let params = PrepareParams::default();
        let keys: Vec<CacheKey> = ["a", "b", "c"].iter().map(|id| CacheKey::new(id, &params)).collect();

        cache.insert(keys[0].clone(), prepared("a"));
        cache.insert(keys[1].clone(), prepared("b"));
        // Reading does not refresh the entry
        assert!(cache.get(&keys[0]).is_some());
        cache.insert(keys[2].clone(), prepared("c"));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&keys[0]));
        assert!(cache.contains(&keys[1]));
        assert!(cache.contains(&keys[2]));

        cache.clear();
        assert!(cache.is_empty());
    }
}
