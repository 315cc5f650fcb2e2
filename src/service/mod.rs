//! Matrix data service
//!
//! Orchestrates loading, paging and saving of one row/column/junction matrix
//! against a `RecordPlatform`.
//!
//! # Architecture
//!
//! - `load.rs` - initial load, pagination and junction strategies
//! - `save.rs` - single-record CRUD and batch save with compensation
//! - `diagnostics.rs` - junction field-mapping diagnosis
//! - `stats.rs` - statistics, reporting and lifecycle controls

mod diagnostics;
mod load;
mod save;
mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{Level, event};

use crate::cache::{CacheKey, ResultCache};
use crate::config::{MatrixConfig, ServiceOptions};
use crate::core::{FieldExtractor, MatrixError, Record, Result};
use crate::metrics::PerformanceTracker;
use crate::naming::NamingResolver;
use crate::platform::{DefaultErrorTranslator, ErrorTranslator, RecordPage, RecordPlatform};
use crate::query::{BuiltQuery, QueryBuilder};
use crate::version::VersionChainResolver;

pub use diagnostics::{JunctionDiagnostics, JunctionSample};
pub use save::{BatchSaveResult, WriteOperation};
pub use stats::{ConfigSnapshot, ServiceStats};

pub struct MatrixDataService {
    platform: Arc<dyn RecordPlatform>,
    translator: Box<dyn ErrorTranslator>,
    naming: Arc<NamingResolver>,
    queries: QueryBuilder,
    cache: ResultCache<RecordPage>,
    tracker: PerformanceTracker,
    versions: VersionChainResolver,
    extractor: FieldExtractor,
    /// Write permission per physical entity.
    permissions: Mutex<HashMap<String, bool>>,
    options: ServiceOptions,
    destroyed: AtomicBool,
}

impl MatrixDataService {
    pub fn new(platform: Arc<dyn RecordPlatform>, options: ServiceOptions) -> Result<Self> {
        options.validate()?;
        let naming = Arc::new(NamingResolver::from_options(&options));
        Ok(Self {
            platform,
            translator: Box::new(DefaultErrorTranslator::new()),
            queries: QueryBuilder::new(Arc::clone(&naming), &options),
            naming,
            cache: ResultCache::new(options.cache_max_entries, options.cache_ttl),
            tracker: PerformanceTracker::new(options.enable_performance_tracking),
            versions: VersionChainResolver::new(),
            extractor: FieldExtractor::new(),
            permissions: Mutex::new(HashMap::new()),
            options,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn with_translator(mut self, translator: impl ErrorTranslator + 'static) -> Self {
        self.translator = Box::new(translator);
        self
    }

    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn naming(&self) -> &Arc<NamingResolver> {
        &self.naming
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            Err(MatrixError::ServiceDestroyed)
        } else {
            Ok(())
        }
    }

    /// Validates the config of an entry point and checks the service is usable.
    fn begin(&self, config: &MatrixConfig) -> Result<()> {
        self.ensure_alive()?;
        config.validate()
    }

    fn debug_enabled(&self, config: &MatrixConfig) -> bool {
        self.options.debug_mode || config.is_debug()
    }

    fn translate(&self, error: crate::platform::PlatformError, operation: &str) -> MatrixError {
        let translated = self.translator.translate(error, operation);
        event!(Level::WARN, operation, error = %translated, "platform call failed");
        translated
    }

    /// Read-through fetch of one page, cached under the query's entity.
    async fn fetch(&self, query: &BuiltQuery, operation: &str) -> Result<RecordPage> {
        let key = CacheKey::new(operation, &[query.entity.as_str()], &query.descriptor);
        self.cache
            .get_or_fetch(&key, || self.fetch_uncached(query, operation))
            .await
    }

    async fn fetch_uncached(&self, query: &BuiltQuery, operation: &str) -> Result<RecordPage> {
        self.platform
            .retrieve_multiple(query)
            .await
            .map_err(|err| self.translate(err, operation))
    }

    fn extract(&self, record: &Record, entity: &str, field: &str) -> Option<String> {
        let physical = self.naming.resolve_field(entity, field);
        self.extractor.extract(record, &physical)
    }

    /// Write permission on `entity`, asked once per entity until the cache is cleared.
    async fn check_write_permission(&self, entity: &str) -> Result<bool> {
        let physical = self.naming.resolve_entity(entity);
        if let Some(allowed) = self.lock_permissions().get(&physical) {
            return Ok(*allowed);
        }
        let allowed = self
            .platform
            .can_write(&physical)
            .await
            .map_err(|err| self.translate(err, "can_write"))?;
        self.lock_permissions().insert(physical, allowed);
        Ok(allowed)
    }

    fn lock_permissions(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.permissions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
