//! Remote record platform seam.
//!
//! The service talks to the platform only through `RecordPlatform`; raw
//! platform failures are mapped to `MatrixError` by an `ErrorTranslator`.

mod memory;
mod translator;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::core::Record;
use crate::query::BuiltQuery;

pub use memory::InMemoryPlatform;
pub use translator::{DefaultErrorTranslator, ErrorTranslator};

/// Failure as reported by the platform, before translation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PlatformError {
    pub status: Option<u16>,
    /// Platform-specific error code, e.g. `0x80040237`.
    pub code: Option<String>,
    pub message: String,
}

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(format!("{} with id '{}' does not exist", entity, id)).with_status(404)
    }
}

/// One page of a multi-record retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordPage {
    pub records: Vec<Record>,
    /// Total matching records, when the platform reports it.
    pub total_count: Option<usize>,
    pub more_records: bool,
}

/// Record store the matrix is loaded from and saved to. Entity names are
/// physical names.
#[async_trait]
pub trait RecordPlatform: Send + Sync {
    async fn retrieve_multiple(&self, query: &BuiltQuery) -> Result<RecordPage, PlatformError>;

    async fn retrieve(&self, entity: &str, id: &str) -> Result<Record, PlatformError>;

    /// Returns the id of the new record.
    async fn create(&self, entity: &str, record: Record) -> Result<String, PlatformError>;

    async fn update(&self, entity: &str, id: &str, record: Record) -> Result<(), PlatformError>;

    async fn delete(&self, entity: &str, id: &str) -> Result<(), PlatformError>;

    /// Whether the current user may write records of `entity`.
    async fn can_write(&self, entity: &str) -> Result<bool, PlatformError>;
}
