//! Identifier generation and local ↔ remote schema mapping.
//!
//! Local records use camelCase field names and Unix-millisecond timestamps;
//! the remote datastore uses its own (typically snake_case) names and
//! RFC3339 timestamps. [`SchemaRegistry`] holds one [`EntitySchema`] per
//! entity type and translates records in both directions.

pub mod id;
pub mod schema;

pub use id::{generate_id, is_valid_id};
pub use schema::{
    camel_case, snake_case, EntitySchema, FieldKind, FieldMapping, MappingError, Naming,
    SchemaRegistry,
};
