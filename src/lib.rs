//! This file is the root of the `redim_core` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of the library (`tuple`, `chunk_pipeline`,
//!     `bridge`, etc.) so the Rust compiler knows they exist.
//! 2.  Re-exporting the handful of types a caller needs to run a redimension.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//==================================================================================
// 1. Module Declarations
//==================================================================================
pub mod observability; // `log_metric!` is exported at the crate root

pub mod array;
pub mod bridge;
pub mod chunk_pipeline;
pub mod config;
pub mod error;
pub mod layout;
pub mod settings;
pub mod tuple;
pub mod types;

// Used by `log_metric!` so callers don't need their own `log` dependency.
#[doc(hidden)]
pub use log;

//==================================================================================
// 2. Public API Re-exports
//==================================================================================
pub use array::{MemArray, TransitArray};
pub use bridge::{redimension_batch, LocalCluster};
pub use chunk_pipeline::redimension_worker;
pub use config::RedimConfig;
pub use error::RedimError;
pub use observability::enable_verbose_logging;
pub use settings::{ClusterContext, Settings};
pub use types::{ArraySchema, AttrType, AttributeDesc, DimensionDesc, Value};
