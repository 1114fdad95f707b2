// In: src/chunk_pipeline/orchestrator/core.rs

use log::info;

use crate::array::{MemArray, TransitArray};
use crate::chunk_pipeline::merge::merge;
use crate::chunk_pipeline::reader::{EncodedArrayReader, RawArrayReader, RawOutput, TupleSource};
use crate::chunk_pipeline::shuffle::ShuffleService;
use crate::chunk_pipeline::sort::{sort_stage, SortService};
use crate::chunk_pipeline::writer::{TransitArrayWriter, TupleSink};
use crate::error::RedimError;
use crate::log_metric;
use crate::settings::Settings;

//==================================================================================
// 1. Pipeline Pass
//==================================================================================

/// Drains `source` into `sink` and finalizes it. Both ends are generic, so the
/// tuple representation is fixed once per pass rather than checked per tuple.
pub fn array_pass<S, W>(source: &mut S, mut sink: W) -> Result<W::Output, RedimError>
where
    S: TupleSource,
    W: TupleSink,
{
    while !source.end() {
        sink.write_tuple(source.current()?)?;
        source.next()?;
    }
    sink.finalize()
}

//==================================================================================
// 2. Per-Worker Orchestration
//==================================================================================

/// Runs one worker's share of a redimension: project, sort, split by
/// destination instance, shuffle, merge. Returns the part of the destination
/// array owned by this worker.
///
/// Every stage failure is tagged with the stage name; the root cause is still
/// reachable through `RedimError::root_cause`.
pub fn redimension_worker(
    source: &MemArray,
    settings: &Settings,
    sort_service: &dyn SortService,
    shuffle_service: &dyn ShuffleService,
) -> Result<MemArray, RedimError> {
    let me = settings.instance_id();

    // --- 1. Project source cells into encoded tuples, chunked for the sort ---
    let staged = project(source, settings).map_err(|e| e.at_stage("project"))?;
    info!(
        "instance {}: projected {} tuples into {} staging chunks",
        me,
        staged.num_tuples(),
        staged.num_chunks()
    );

    // --- 2. Local sort by canonical tuple order ---
    let sorted = sort_stage(sort_service, &staged, settings).map_err(|e| e.at_stage("sort"))?;
    drop(staged);

    // --- 3. Re-pack into destination-homogeneous chunks ---
    let split = split_on_instance(&sorted, settings).map_err(|e| e.at_stage("split"))?;
    drop(sorted);

    // --- 4. All-to-all exchange ---
    let sent = split.num_tuples();
    let shuffled = shuffle_service
        .redistribute(split, me)
        .map_err(|e| e.at_stage("shuffle"))?;

    // --- 5. Merge the per-origin streams into the destination chunks ---
    let output = merge(&shuffled, settings).map_err(|e| e.at_stage("merge"))?;

    log_metric!(
        "event" = "worker_done",
        "instance" = me,
        "tuples_sent" = sent,
        "tuples_received" = shuffled.num_tuples(),
        "cells_written" = output.num_cells()
    );
    Ok(output)
}

fn project(source: &MemArray, settings: &Settings) -> Result<TransitArray, RedimError> {
    let mut reader = RawArrayReader::new(source, settings, RawOutput::Encoded)?;
    array_pass(&mut reader, TransitArrayWriter::staging(settings))
}

fn split_on_instance(sorted: &TransitArray, settings: &Settings) -> Result<TransitArray, RedimError> {
    let mut reader = EncodedArrayReader::new(sorted)?;
    array_pass(&mut reader, TransitArrayWriter::split_on_instance(settings))
}
