pub mod error;
pub mod record;
pub mod types;

pub use error::{MatrixError, Result};
pub use record::{ExtractionStrategy, FieldExtractor, Record};
pub use types::{
    BatchOperation, CellState, ColumnEntity, EntityPage, JunctionCreate, JunctionRecord,
    JunctionUpdate, MatrixData, RowEntity, StatusCode,
};
