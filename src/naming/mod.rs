//! Naming conventions of the record platform.
//!
//! The resolver is an explicit, shareable instance (`Arc<NamingResolver>`);
//! there is no process-wide name cache.

mod resolver;

pub use resolver::{NamingResolver, NamingStats};
