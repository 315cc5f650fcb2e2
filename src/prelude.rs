//! Common imports for code driving a matrix.
//!
//! `use matrixdata::prelude::*;` brings in the service, its configuration,
//! the data model and the platform seam.

pub use crate::config::{MatrixConfig, ServiceOptions};
pub use crate::core::{
    BatchOperation, CellState, ColumnEntity, EntityPage, JunctionRecord, MatrixData, MatrixError,
    Record, Result, RowEntity, StatusCode,
};
pub use crate::platform::{ErrorTranslator, PlatformError, RecordPage, RecordPlatform};
pub use crate::service::{BatchSaveResult, MatrixDataService};

pub mod testing {
    //! In-memory platform for tests and local tooling.
    pub use crate::platform::InMemoryPlatform;
}
