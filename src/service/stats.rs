use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::{Level, event};

use super::MatrixDataService;
use crate::cache::CacheStats;
use crate::core::Result;
use crate::metrics::{OperationStats, PerformanceSummary};
use crate::naming::NamingStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    pub debug_mode: bool,
    pub enable_performance_tracking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStats {
    pub performance: PerformanceSummary,
    pub cache: CacheStats,
    pub naming: NamingStats,
    pub config: ConfigSnapshot,
}

impl MatrixDataService {
    pub fn get_service_stats(&self) -> ServiceStats {
        ServiceStats {
            performance: self.tracker.summary(),
            cache: self.cache.stats(),
            naming: self.naming.stats(),
            config: ConfigSnapshot {
                debug_mode: self.options.debug_mode,
                enable_performance_tracking: self.tracker.is_enabled(),
            },
        }
    }

    pub fn operation_stats(&self) -> Vec<OperationStats> {
        self.tracker.all_stats()
    }

    pub fn log_service_report(&self) {
        let stats = self.get_service_stats();
        event!(
            Level::INFO,
            operations = stats.performance.operations,
            total_calls = stats.performance.total_calls,
            total_errors = stats.performance.total_errors,
            avg_ms = stats.performance.avg_duration.as_secs_f64() * 1000.0,
            slowest = ?stats.performance.slowest_operation,
            cache_size = stats.cache.size,
            cache_hit_rate = stats.cache.hit_rate,
            cache_invalidations = stats.cache.invalidations,
            schema_names = stats.naming.schema_names_cache,
            "matrix service report"
        );
        self.tracker.log_report();
    }

    /// Drops cached query results, write permissions and memoized names.
    /// Name overrides are kept.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.lock_permissions().clear();
        self.naming.clear_cache();
        event!(Level::DEBUG, "matrix service caches cleared");
    }

    /// Evicts cached results depending on `entity` (logical name).
    pub fn invalidate_entity_cache(&self, entity: &str) -> usize {
        self.cache
            .invalidate_entity(&self.naming.resolve_entity(entity))
    }

    pub fn set_schema_name_override(&self, entity: &str, field: &str, name: &str) -> Result<()> {
        self.ensure_alive()?;
        self.naming.set_override(entity, field, name);
        Ok(())
    }

    /// Releases cached state. Every later data call fails with
    /// `ServiceDestroyed`.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cache.clear();
        self.lock_permissions().clear();
        self.tracker.reset();
        event!(Level::INFO, "matrix service destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
