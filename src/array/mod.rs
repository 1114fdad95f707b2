//! Array storage the pipeline reads from and writes to.
//!
//! A host database would own these. The core only needs forward iteration over
//! populated cells, chunk-addressed writes, and an existence bitmap per chunk.

pub mod mem;
pub mod transit;

pub use mem::{MemArray, MemChunk};
pub use transit::{TransitAddress, TransitArray, TransitChunk};
