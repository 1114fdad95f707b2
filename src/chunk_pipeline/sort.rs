// In: src/chunk_pipeline/sort.rs

//! The local pre-shuffle sort.
//!
//! The stage itself only supplies the comparator (canonical tuple order, or a
//! key-column prefix of it) and the sizing policy. The sorting is delegated to a
//! `SortService`. `ExternalMergeSortService` is the default: it fills a bounded
//! arena, spills each full arena as a sorted run file, and merges the runs with
//! a binary heap.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use log::{debug, warn};

use crate::array::TransitArray;
use crate::chunk_pipeline::reader::{EncodedArrayReader, TupleRef, TupleSource};
use crate::chunk_pipeline::writer::{TransitArrayWriter, TransitWriteMode, TupleSink};
use crate::error::RedimError;
use crate::log_metric;
use crate::settings::Settings;
use crate::tuple::codec;
use crate::types::InstanceId;

/// Per-tuple bookkeeping charged to the arena on top of the tuple bytes.
const RUN_ENTRY_OVERHEAD: usize = std::mem::size_of::<Vec<u8>>();

static SPILL_SEQ: AtomicU64 = AtomicU64::new(0);

//==================================================================================
// Arena
//==================================================================================

/// A byte budget scoped to one sort call. Deliberately `!Sync`: the arena
/// belongs to the single thread running the sort.
#[derive(Debug)]
pub struct SortArena {
    name: String,
    capacity: usize,
    used: Cell<usize>,
    peak: Cell<usize>,
}

impl SortArena {
    pub fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            capacity,
            used: Cell::new(0),
            peak: Cell::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used.get()
    }

    pub fn peak(&self) -> usize {
        self.peak.get()
    }

    /// Charges `bytes` if they fit.
    pub fn try_reserve(&self, bytes: usize) -> bool {
        let next = self.used.get().saturating_add(bytes);
        if next > self.capacity {
            return false;
        }
        self.used.set(next);
        self.peak.set(self.peak.get().max(next));
        true
    }

    pub fn release_all(&self) {
        self.used.set(0);
    }
}

impl Drop for SortArena {
    fn drop(&mut self) {
        debug!("arena '{}' released, peak {} of {} bytes", self.name, self.peak(), self.capacity);
    }
}

//==================================================================================
// Service Contract
//==================================================================================

/// Everything a sort service needs besides the data and the arena.
#[derive(Debug, Clone)]
pub struct SortPlan {
    /// Positional key columns to compare: 0 is the instance id, then the chunk
    /// coordinates, then the cell position. Anything past the last column means
    /// the full canonical order.
    pub key_columns: usize,
    pub src_instance: InstanceId,
    pub chunk_size: usize,
    pub chunk_byte_limit: usize,
    pub spill_dir: PathBuf,
}

impl SortPlan {
    /// Full canonical order, sized from `settings`.
    pub fn canonical(settings: &Settings) -> Self {
        Self {
            key_columns: settings.num_output_dims() + 2,
            src_instance: settings.instance_id(),
            chunk_size: settings.tupled_chunk_size(),
            chunk_byte_limit: settings.sort_chunk_size_limit(),
            spill_dir: settings.spill_dir().clone(),
        }
    }
}

/// The external sort-by-key facility. Output is a staging-layout transit array
/// whose tuples, read in address order, are sorted by the plan's key.
pub trait SortService: Send + Sync {
    fn sort(&self, input: &TransitArray, plan: &SortPlan, arena: &SortArena) -> Result<TransitArray, RedimError>;
}

/// Runs the sort stage: a fresh arena sized to the sort buffer budget, alive
/// only for the duration of the call.
pub fn sort_stage(
    service: &dyn SortService,
    input: &TransitArray,
    settings: &Settings,
) -> Result<TransitArray, RedimError> {
    let arena = SortArena::new(
        &format!("redim sort {}", settings.instance_id()),
        settings.sort_buffer_bytes(),
    );
    service.sort(input, &SortPlan::canonical(settings), &arena)
}

//==================================================================================
// Default Service
//==================================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalMergeSortService;

impl SortService for ExternalMergeSortService {
    fn sort(&self, input: &TransitArray, plan: &SortPlan, arena: &SortArena) -> Result<TransitArray, RedimError> {
        let mut writer = TransitArrayWriter::new(
            TransitWriteMode::Staging,
            plan.src_instance,
            plan.chunk_size,
            plan.chunk_byte_limit,
        );
        let mut reader = EncodedArrayReader::new(input)?;
        let mut run: Vec<Vec<u8>> = Vec::new();
        let mut spilled: Vec<SpillRun> = Vec::new();
        let mut n_dims = None;

        while !reader.end() {
            let blob = reader.current()?.encoded()?;
            // Runs are merged with the unchecked comparator, so every tuple is
            // checked for a well-formed prefix of one shared dimensionality here.
            let n = codec::n_dims(blob)?;
            if *n_dims.get_or_insert(n) != n {
                return Err(RedimError::Internal(format!(
                    "sort input mixes {}- and {}-dimension tuples",
                    n_dims.unwrap_or(n),
                    n
                )));
            }
            let cost = blob.len() + RUN_ENTRY_OVERHEAD;
            if !arena.try_reserve(cost) {
                if run.is_empty() {
                    return Err(RedimError::Capacity(format!(
                        "a {}-byte tuple does not fit in the {}-byte sort arena; raise the memory limit",
                        blob.len(),
                        arena.capacity()
                    )));
                }
                sort_run(&mut run, plan.key_columns)?;
                spilled.push(SpillRun::write(&plan.spill_dir, plan.src_instance, &run)?);
                run.clear();
                arena.release_all();
                if !arena.try_reserve(cost) {
                    return Err(RedimError::Internal("empty sort arena rejected a tuple".into()));
                }
            }
            run.push(blob.to_vec());
            reader.next()?;
        }
        sort_run(&mut run, plan.key_columns)?;

        if spilled.is_empty() {
            for blob in &run {
                writer.write_tuple(TupleRef::Encoded(blob))?;
            }
        } else {
            if !run.is_empty() {
                spilled.push(SpillRun::write(&plan.spill_dir, plan.src_instance, &run)?);
            }
            drop(run);
            arena.release_all();
            merge_runs(&mut spilled, plan.key_columns, &mut writer)?;
        }

        log_metric!(
            "event" = "sort_done",
            "instance" = plan.src_instance,
            "tuples" = input.num_tuples(),
            "runs_spilled" = spilled.len(),
            "arena_peak" = arena.peak()
        );
        writer.finalize()
    }
}

/// Stable sort of one run, surfacing the first comparison error.
fn sort_run(run: &mut [Vec<u8>], key_columns: usize) -> Result<(), RedimError> {
    let mut failure = None;
    run.sort_by(|a, b| {
        codec::compare_prefix(a, b, key_columns).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    failure.map_or(Ok(()), Err)
}

//==================================================================================
// Spill Runs
//==================================================================================

/// A sorted run on disk: `[u32 len][tuple]...`, removed when dropped.
#[derive(Debug)]
struct SpillRun {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    len: usize,
}

impl SpillRun {
    fn write(dir: &Path, instance: InstanceId, run: &[Vec<u8>]) -> Result<Self, RedimError> {
        std::fs::create_dir_all(dir)?;
        let seq = SPILL_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        let path = dir.join(format!("redim-sort-{}-{}-{}.run", std::process::id(), instance, seq));
        debug!("spilling {} tuples to {:?}", run.len(), path);

        let mut out = BufWriter::new(File::create(&path)?);
        for blob in run {
            let len = u32::try_from(blob.len())
                .map_err(|_| RedimError::Capacity(format!("{}-byte tuple cannot be spilled", blob.len())))?;
            out.write_all(&len.to_le_bytes())?;
            out.write_all(blob)?;
        }
        out.flush()?;
        Ok(Self {
            path,
            reader: None,
            len: run.len(),
        })
    }

    fn next_tuple(&mut self) -> Result<Option<Vec<u8>>, RedimError> {
        let reader = match &mut self.reader {
            Some(r) => r,
            None => self.reader.insert(BufReader::new(File::open(&self.path)?)),
        };
        let mut len = [0u8; 4];
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let mut blob = vec![0u8; u32::from_le_bytes(len) as usize];
        reader.read_exact(&mut blob)?;
        Ok(Some(blob))
    }
}

impl Drop for SpillRun {
    fn drop(&mut self) {
        self.reader = None;
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("could not remove spill file {:?}: {}", self.path, e);
        }
    }
}

struct HeapEntry {
    blob: Vec<u8>,
    run: usize,
    key_columns: usize,
}

impl HeapEntry {
    fn key_order(&self, other: &Self) -> Ordering {
        let n = self.blob[0] as usize;
        codec::compare_prefix_unchecked(&self.blob, &other.blob, n, self.key_columns)
            .then(self.run.cmp(&other.run))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key_order(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the smallest key; equal keys pop in run order,
// which keeps the merge stable.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key_order(self)
    }
}

fn merge_runs(
    runs: &mut [SpillRun],
    key_columns: usize,
    writer: &mut TransitArrayWriter,
) -> Result<(), RedimError> {
    debug!(
        "merging {} spilled runs ({} tuples)",
        runs.len(),
        runs.iter().map(|r| r.len).sum::<usize>()
    );
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (i, run) in runs.iter_mut().enumerate() {
        if let Some(blob) = run.next_tuple()? {
            heap.push(HeapEntry { blob, run: i, key_columns });
        }
    }
    while let Some(HeapEntry { blob, run, .. }) = heap.pop() {
        writer.write_tuple(TupleRef::Encoded(&blob))?;
        if let Some(next) = runs[run].next_tuple()? {
            heap.push(HeapEntry {
                blob: next,
                run,
                key_columns,
            });
        }
    }
    Ok(())
}
