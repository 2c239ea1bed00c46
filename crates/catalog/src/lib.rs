//! Tool catalog: the static set of operations the bridge exposes, their input
//! schemas, and whether each runs locally or on the browser peer.
//!
//! The catalog is immutable once built. [`Catalog::validate`] is pure; it
//! checks arguments against a descriptor and never executes anything.

pub mod builtin;
pub mod descriptor;
pub mod error;
pub mod schema;
mod validate;

pub use {
    descriptor::{Catalog, OperationDescriptor},
    error::{Error, Result, ValidationError},
    schema::{FieldSchema, FieldType, InputSchema, Property},
    tabwire_common::ExecutionKind,
};
