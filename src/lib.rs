// ============================================================================
// matrixdata Library
// ============================================================================

pub mod cache;
pub mod config;
pub mod core;
pub mod metrics;
pub mod naming;
pub mod platform;
pub mod prelude;
pub mod query;
pub mod service;
pub mod version;

// Re-export main types for convenience
pub use config::{MatrixConfig, ServiceOptions};
pub use core::{
    BatchOperation, CellState, ColumnEntity, EntityPage, FieldExtractor, JunctionRecord, MatrixData,
    MatrixError, Record, Result, RowEntity, StatusCode,
};
pub use platform::{
    DefaultErrorTranslator, ErrorTranslator, InMemoryPlatform, PlatformError, RecordPage,
    RecordPlatform,
};
pub use service::{BatchSaveResult, JunctionDiagnostics, MatrixDataService, ServiceStats};

// ============================================================================
// Service entry point
// ============================================================================

/// Opens a service over `platform` with options read from `MATRIX_*`
/// environment variables.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use matrixdata::{InMemoryPlatform, MatrixConfig};
///
/// # #[tokio::main]
/// # async fn main() -> matrixdata::Result<()> {
/// let service = matrixdata::connect(Arc::new(InMemoryPlatform::new()))?;
/// let config = MatrixConfig::new("question", "study", "link");
///
/// let matrix = service.load_initial_matrix_data(&config, None).await?;
/// assert!(matrix.rows.is_empty());
/// assert!(matrix.junctions.is_empty());
/// # Ok(())
/// # }
/// ```
pub fn connect(platform: std::sync::Arc<dyn RecordPlatform>) -> Result<MatrixDataService> {
    MatrixDataService::new(platform, ServiceOptions::from_env())
}
