//! Configuration consumed by the matrix service.
//!
//! - `matrix.rs` - entity and field names describing one matrix (`MatrixConfig`)
//! - `options.rs` - tuning knobs of the service itself (`ServiceOptions`)

mod matrix;
mod options;

pub use matrix::MatrixConfig;
pub use options::ServiceOptions;
