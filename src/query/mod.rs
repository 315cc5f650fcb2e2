//! Query construction for the record platform.
//!
//! # Architecture
//!
//! - `descriptor.rs` - type-safe logical query description
//! - `builder.rs` - name resolution, fetch XML rendering, URL length checks
//! - `validator.rs` - identifier grammar and validation rule chain

mod builder;
mod descriptor;
mod validator;

pub use builder::{BuiltQuery, QueryBuilder};
pub use descriptor::{
    ACTIVE_STATE, ACTIVE_STATUS_REASON, ConditionOperator, Filter, FilterValue, INACTIVE_STATE,
    INACTIVE_STATUS_REASON, Order, ParentScope, QueryDescriptor, STATE_FIELD, STATUS_REASON_FIELD,
};
pub use validator::{QueryRule, QueryValidation, QueryValidator, is_valid_identifier};
