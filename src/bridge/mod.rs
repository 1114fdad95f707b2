// In: src/bridge/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Bridge Layer
// ====================================================================================
//
// The `bridge` is the public entry point of the redim library. It turns Arrow data
// into the in-memory arrays the pipeline works on, runs the per-worker pipeline on
// a simulated cluster, and turns the result back into Arrow.
//
// Data Flow:
//
//   1. [Stateless API (redimension_batch)]  -> Receives a RecordBatch + destination schema
//         |
//         `-> a. Calls `arrow_impl` to build the source `MemArray`
//         |
//         `-> b. Hands it to the `LocalCluster`
//
//   2. [LocalCluster]                       -> Partitions the source by chunk
//         |
//         `-> one thread per worker, each running
//             `chunk_pipeline::redimension_worker` against a shared shuffle
//
//   3. [Stateless API]                      -> Calls `arrow_impl` on every worker's
//                                              output and concatenates the batches
//
// ====================================================================================
pub(crate) mod arrow_impl;
pub mod cluster;
pub mod stateless_api;

// --- Cluster Runner ---
pub use cluster::LocalCluster;

// --- Arrow Conversions ---
pub use arrow_impl::{array_schema_for, array_to_record_batch, arrow_schema_for, record_batch_to_array};

// --- Stateless API ---
pub use stateless_api::{redimension_batch, redimension_batch_with_directives};

#[cfg(test)]
mod tests;
