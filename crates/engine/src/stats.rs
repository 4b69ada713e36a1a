//! Engine counters
//!
//! Monotonic counters over the life of a context. Tests use them to assert
//! the memoisation and minimal-invalidation properties; `update()` logs them
//! at debug level.

/// Monotonic engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Entry writes that actually changed a value
    pub writes: u64,
    /// Mapper re-runs plus lazy recomputations
    pub recomputes: u64,
    /// Lazy reads served from a valid cache
    pub cache_hits: u64,
    /// Re-entries into an in-flight lazy cell (tolerated cycles)
    pub cycles_tolerated: u64,
    /// Computations that failed and kept their stale value
    pub compute_failures: u64,
}

impl EngineStats {
    /// Difference since an earlier reading
    #[must_use]
    pub fn since(&self, earlier: &EngineStats) -> EngineStats {
        EngineStats {
            writes: self.writes - earlier.writes,
            recomputes: self.recomputes - earlier.recomputes,
            cache_hits: self.cache_hits - earlier.cache_hits,
            cycles_tolerated: self.cycles_tolerated - earlier.cycles_tolerated,
            compute_failures: self.compute_failures - earlier.compute_failures,
        }
    }
}
