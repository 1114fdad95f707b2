//! This module defines the core, strongly-typed data representations used
//! throughout the redim pipeline.
//!
//! It includes the canonical `AttrType` enum describing how an attribute is laid
//! out inside a tuple, the owned `Value` cell payload, and the array schema
//! objects (`ArraySchema`, `AttributeDesc`, `DimensionDesc`) that the host
//! engine would otherwise supply.

pub mod attr_type;
pub mod schema;
pub mod value;

// Re-export the main type(s) for easier access.
pub use attr_type::AttrType;
pub use schema::{ArraySchema, AttributeDesc, DimensionDesc};
pub use value::Value;

/// A signed 64-bit array coordinate.
pub type Coordinate = i64;
/// A full coordinate vector, one entry per dimension.
pub type Coordinates = Vec<Coordinate>;
/// A linearized (row-major) cell position inside a chunk.
pub type Position = i64;
/// The id of a worker instance in the cluster.
pub type InstanceId = u32;
