// In: src/error.rs

//! This module defines the single, unified error type for the entire redim library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.
//!
//! Every variant is fatal. Nothing inside the core retries or downgrades an error;
//! the per-worker pipeline unwinds to the orchestrator, which tags the failure with
//! the stage that raised it and hands it to the caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedimError {
    // =========================================================================
    // === High-Level, Semantic Errors (Specific to our library's logic)
    // =========================================================================
    /// A sizing directive or schema annotation was rejected before execution.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source field cannot be routed to the destination slot it was matched to.
    #[error("Schema mapping error: {0}")]
    SchemaMapping(String),

    /// A contract between pipeline stages was violated (this is a bug).
    #[error("Internal logic error (this is a bug): {0}")]
    Internal(String),

    /// A bounded resource cannot hold what it was asked to hold.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Two records resolved to the same destination cell.
    #[error("Data collision at chunk {chunk:?}, cell position {position}")]
    DataCollision { chunk: Vec<i64>, position: i64 },

    /// A mapped coordinate falls outside its destination dimension.
    #[error("Coordinate {value} is outside dimension '{dimension}' [{start}, {end}]")]
    OutOfBounds {
        dimension: String,
        value: i64,
        start: i64,
        end: i64,
    },

    /// This worker was released because a sibling worker failed.
    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Pipeline execution failed at stage '{stage}': {source}")]
    PipelineError {
        stage: String,
        #[source]
        source: Box<RedimError>,
    },

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error from the spill-file subsystem of the external sort.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically while loading a config document.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error from a safe byte-casting operation failing.
    #[error("Byte slice casting error: {0}")]
    PodCast(String), // Manual `From` impl is needed as bytemuck::PodCastError doesn't impl Error
}

impl RedimError {
    /// Wraps `self` with the name of the pipeline stage it escaped from.
    pub fn at_stage(self, stage: &str) -> Self {
        RedimError::PipelineError {
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }

    /// Strips any `PipelineError` wrappers and returns the originating error.
    pub fn root_cause(&self) -> &RedimError {
        let mut current = self;
        while let RedimError::PipelineError { source, .. } = current {
            current = source;
        }
        current
    }
}

// =============================================================================
// === Manual `From` Implementations ===
// =============================================================================

impl From<bytemuck::PodCastError> for RedimError {
    fn from(err: bytemuck::PodCastError) -> Self {
        RedimError::PodCast(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_stages() {
        let err = RedimError::Capacity("too many".into())
            .at_stage("merge")
            .at_stage("worker 2");
        assert!(matches!(err.root_cause(), RedimError::Capacity(_)));
        assert!(err.to_string().contains("worker 2"));
    }

    #[test]
    fn test_collision_message_names_the_cell() {
        let err = RedimError::DataCollision {
            chunk: vec![0, 10],
            position: 7,
        };
        assert_eq!(
            err.to_string(),
            "Data collision at chunk [0, 10], cell position 7"
        );
    }
}
