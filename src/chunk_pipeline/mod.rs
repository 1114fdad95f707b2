//! The per-worker redimension pipeline.
//!
//! Each stage is a `TupleSource` feeding a `TupleSink`, or an external service
//! (sort, shuffle) bracketed by such passes. The orchestrator wires them in the
//! fixed order project, sort, split, shuffle, merge.

//==================================================================================
// 1. Module Declarations
//==================================================================================

/// Sources: source-array projection and transit-array pass-through.
pub mod reader;

/// Sinks: transit chunk packing and destination cell reassembly.
pub mod writer;

pub mod sort;
pub mod shuffle;
pub mod merge;

/// Wires the stages together for one worker.
pub mod orchestrator;

//==================================================================================
// 2. Public API Re-exports
//==================================================================================

pub use self::merge::merge;
pub use self::orchestrator::{array_pass, redimension_worker};
pub use self::reader::{EncodedArrayReader, RawArrayReader, RawOutput, TupleRef, TupleSource};
pub use self::shuffle::{InProcessShuffle, ShuffleService};
pub use self::sort::{sort_stage, ExternalMergeSortService, SortArena, SortPlan, SortService};
pub use self::writer::{OutputArrayWriter, TransitArrayWriter, TransitWriteMode, TupleSink};
