//! The binary tuple format and its chunk-level packing.

pub mod codec;
pub mod packing;

pub use codec::{AttrSlot, TupleLayout, TupleRecord};
pub use packing::{PackedChunkBuilder, PackedTupleCursor};
