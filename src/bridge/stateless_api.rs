// In: src/bridge/stateless_api.rs

use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;

use crate::bridge::arrow_impl;
use crate::bridge::cluster::LocalCluster;
use crate::config::RedimConfig;
use crate::error::RedimError;
use crate::types::{ArraySchema, DimensionDesc};

/// Redimensions one Arrow batch on `cluster` and returns the destination cells
/// as a single batch, worker by worker.
///
/// `source_dimensions` names the batch columns that hold source coordinates;
/// every other column is a source attribute.
pub fn redimension_batch(
    batch: &RecordBatch,
    source_dimensions: Vec<DimensionDesc>,
    output_schema: &ArraySchema,
    cluster: &LocalCluster,
) -> Result<RecordBatch, RedimError> {
    // 1. Marshal the batch into the source array.
    let input_schema = arrow_impl::array_schema_for("input", &batch.schema(), source_dimensions)?;
    let source = arrow_impl::record_batch_to_array(batch, &input_schema)?;

    // 2. Run the pipeline on every worker.
    let outputs = cluster.redimension(&source, output_schema)?;

    // 3. Stitch the per-worker shares back together.
    let schema = Arc::new(arrow_impl::arrow_schema_for(output_schema));
    let batches = outputs
        .iter()
        .map(arrow_impl::array_to_record_batch)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

/// Same as `redimension_batch`, on a single worker with sizing directives
/// such as `"sg_chunk_size_limit_bytes=65536"`.
pub fn redimension_batch_with_directives(
    batch: &RecordBatch,
    source_dimensions: Vec<DimensionDesc>,
    output_schema: &ArraySchema,
    directives: &[&str],
) -> Result<RecordBatch, RedimError> {
    let cluster = LocalCluster::new(1, RedimConfig::from_directives(directives)?)?;
    redimension_batch(batch, source_dimensions, output_schema, &cluster)
}
