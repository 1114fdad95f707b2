// In: src/chunk_pipeline/writer.rs

//! Chunk batch writers: the consumers at the end of every pipeline pass.
//!
//! * `TransitArrayWriter` packs encoded tuples into transit chunks, either keyed
//!   by a running sequence number (staging) or additionally split whenever the
//!   destination instance changes (instance split, required before the shuffle).
//! * `OutputArrayWriter` decomposes tuples into destination cells, synthesizing
//!   the coordinate of an unsourced destination dimension when there is one.

use std::cmp::Ordering;

use hashbrown::HashMap;

use crate::array::{MemArray, TransitAddress, TransitArray, TransitChunk};
use crate::chunk_pipeline::reader::TupleRef;
use crate::error::RedimError;
use crate::log_metric;
use crate::settings::Settings;
use crate::tuple::{codec, PackedChunkBuilder, TupleRecord};
use crate::types::{Coordinates, InstanceId, Position, Value};

/// The `{write_tuple, finalize}` half of a pipeline pass. `finalize` consumes
/// the writer and hands ownership of the finished array to the caller.
pub trait TupleSink {
    type Output;

    fn write_tuple(&mut self, tuple: TupleRef<'_>) -> Result<(), RedimError>;

    fn finalize(self) -> Result<Self::Output, RedimError>;
}

//==================================================================================
// Transit Writer
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitWriteMode {
    Staging,
    SplitOnInstance,
}

#[derive(Debug)]
pub struct TransitArrayWriter {
    mode: TransitWriteMode,
    src_instance: InstanceId,
    chunk_size: usize,
    address: TransitAddress,
    builder: PackedChunkBuilder,
    array: TransitArray,
    tuples_written: u64,
}

impl TransitArrayWriter {
    pub fn new(mode: TransitWriteMode, src_instance: InstanceId, chunk_size: usize, byte_limit: usize) -> Self {
        Self {
            mode,
            src_instance,
            chunk_size: chunk_size.max(1),
            address: TransitAddress::new(0, src_instance, 0),
            builder: PackedChunkBuilder::new(byte_limit),
            array: TransitArray::new(),
            tuples_written: 0,
        }
    }

    /// Pre-sort staging: at most `tupled_chunk_size` tuples and
    /// `sort_chunk_size_limit` bytes per chunk.
    pub fn staging(settings: &Settings) -> Self {
        Self::new(
            TransitWriteMode::Staging,
            settings.instance_id(),
            settings.tupled_chunk_size(),
            settings.sort_chunk_size_limit(),
        )
    }

    /// Shuffle input: chunks homogeneous in destination instance, at most
    /// `sg_chunk_size_limit` bytes each.
    pub fn split_on_instance(settings: &Settings) -> Self {
        Self::new(
            TransitWriteMode::SplitOnInstance,
            settings.instance_id(),
            settings.tupled_chunk_size(),
            settings.sg_chunk_size_limit(),
        )
    }

    fn flush(&mut self) -> Result<(), RedimError> {
        if self.builder.is_empty() {
            return Ok(());
        }
        let num_tuples = self.builder.num_tuples();
        let packed = self.builder.finish()?;
        self.array.insert(self.address, TransitChunk::new(packed, num_tuples))?;
        self.address = self.address.next_chunk();
        Ok(())
    }
}

impl TupleSink for TransitArrayWriter {
    type Output = TransitArray;

    fn write_tuple(&mut self, tuple: TupleRef<'_>) -> Result<(), RedimError> {
        let blob = tuple.encoded()?;
        if self.mode == TransitWriteMode::SplitOnInstance {
            let dst = codec::instance_id(blob)?;
            if dst != self.address.dst_instance {
                self.flush()?;
                self.address = TransitAddress::new(dst, self.src_instance, 0);
            }
        }
        if self.builder.num_tuples() >= self.chunk_size {
            self.flush()?;
        }
        if !self.builder.try_push(blob)? {
            self.flush()?;
            if !self.builder.try_push(blob)? {
                return Err(RedimError::Internal("an empty transit chunk rejected a tuple".into()));
            }
        }
        self.tuples_written += 1;
        Ok(())
    }

    fn finalize(mut self) -> Result<TransitArray, RedimError> {
        self.flush()?;
        log_metric!(
            "event" = "transit_written",
            "mode" = format!("{:?}", self.mode),
            "tuples" = self.tuples_written,
            "chunks" = self.array.num_chunks(),
            "bytes" = self.array.packed_bytes()
        );
        Ok(self.array)
    }
}

//==================================================================================
// Output Writer
//==================================================================================

/// How the unsourced destination dimension, if any, gets its coordinates.
#[derive(Debug)]
enum Synthetic {
    Absent,
    /// The synthetic dimension is the last one, so group members occupy
    /// consecutive positions and can be written as they arrive. Keyed by the
    /// group's base position within the open chunk.
    Immediate {
        capacity: i64,
        next_offsets: HashMap<Position, i64>,
    },
    /// Group members are spread across the chunk; buffer the chunk, then assign.
    Buffered {
        capacity: i64,
        stride: i64,
        buffer: Vec<Vec<u8>>,
    },
}

pub struct OutputArrayWriter<'s> {
    settings: &'s Settings,
    array: MemArray,
    open_chunk: Option<Coordinates>,
    last_pos: Option<Position>,
    scratch: TupleRecord,
    synthetic: Synthetic,
    tuples_written: u64,
    chunks_opened: u64,
}

impl<'s> OutputArrayWriter<'s> {
    pub fn new(settings: &'s Settings) -> Result<Self, RedimError> {
        let schema = settings.output_schema();
        let synthetic = match settings.synthetic_dim() {
            None => Synthetic::Absent,
            Some(dim) => {
                let d = &schema.dimensions[dim];
                let capacity = d.chunk_interval.min(d.length());
                if dim + 1 == schema.num_dimensions() {
                    Synthetic::Immediate {
                        capacity,
                        next_offsets: HashMap::new(),
                    }
                } else {
                    let stride = schema.dimensions[dim + 1..]
                        .iter()
                        .fold(1i64, |acc, d| acc.saturating_mul(d.chunk_interval));
                    Synthetic::Buffered {
                        capacity,
                        stride,
                        buffer: Vec::new(),
                    }
                }
            }
        };
        Ok(Self {
            settings,
            array: MemArray::new(schema.clone())?,
            open_chunk: None,
            last_pos: None,
            scratch: TupleRecord::default(),
            synthetic,
            tuples_written: 0,
            chunks_opened: 0,
        })
    }

    /// Returns true when `chunk` differs from the chunk currently open.
    fn is_new_chunk(&self, chunk: &[i64]) -> bool {
        self.open_chunk.as_deref() != Some(chunk)
    }

    fn open(&mut self, chunk: &[i64]) -> Result<(), RedimError> {
        self.flush_synthetic()?;
        self.open_chunk = Some(chunk.to_vec());
        self.last_pos = None;
        self.chunks_opened += 1;
        if let Synthetic::Immediate { next_offsets, .. } = &mut self.synthetic {
            next_offsets.clear();
        }
        Ok(())
    }

    fn check_routing(&self, dst_instance: InstanceId) -> Result<(), RedimError> {
        if dst_instance != self.settings.instance_id() {
            return Err(RedimError::Internal(format!(
                "instance {} received a tuple routed to instance {}",
                self.settings.instance_id(),
                dst_instance
            )));
        }
        Ok(())
    }

    fn store(&mut self, chunk: &[i64], pos: Position, values: Vec<Value>) -> Result<(), RedimError> {
        if self.last_pos == Some(pos) {
            return Err(RedimError::DataCollision {
                chunk: chunk.to_vec(),
                position: pos,
            });
        }
        self.array.chunk_mut(chunk).insert(pos, values)?;
        self.last_pos = Some(pos);
        self.tuples_written += 1;
        Ok(())
    }

    fn write_record(&mut self, record: &TupleRecord) -> Result<(), RedimError> {
        self.check_routing(record.dst_instance)?;
        if self.is_new_chunk(&record.chunk_coords) {
            self.open(&record.chunk_coords)?;
        }
        let pos = match &mut self.synthetic {
            Synthetic::Absent => record.cell_pos,
            Synthetic::Immediate { capacity, next_offsets } => {
                let next = next_offsets.entry(record.cell_pos).or_insert(0);
                let offset = *next;
                if offset >= *capacity {
                    return Err(synthetic_overflow(*capacity));
                }
                *next = offset + 1;
                record.cell_pos + offset
            }
            Synthetic::Buffered { buffer, .. } => {
                let blob = self.settings.tuple_layout().encode(
                    record.dst_instance,
                    &record.chunk_coords,
                    record.cell_pos,
                    &record.values,
                )?;
                buffer.push(blob);
                return Ok(());
            }
        };
        self.store(&record.chunk_coords, pos, record.values.clone())
    }

    fn write_blob(&mut self, blob: &[u8]) -> Result<(), RedimError> {
        if let Synthetic::Buffered { .. } = self.synthetic {
            self.check_routing(codec::instance_id(blob)?)?;
            let n = codec::n_dims(blob)?;
            let mut chunk = vec![0; n];
            codec::chunk_coords(blob, &mut chunk)?;
            if self.is_new_chunk(&chunk) {
                self.open(&chunk)?;
            }
            if let Synthetic::Buffered { buffer, .. } = &mut self.synthetic {
                buffer.push(blob.to_vec());
            }
            return Ok(());
        }
        let settings = self.settings;
        let mut record = std::mem::take(&mut self.scratch);
        let result = settings
            .tuple_layout()
            .decode_into(blob, &mut record)
            .and_then(|_| self.write_record(&record));
        self.scratch = record;
        result
    }

    /// Assigns synthetic coordinates to the buffered chunk and writes it out.
    fn flush_synthetic(&mut self) -> Result<(), RedimError> {
        let (capacity, stride, mut buffer) = match &mut self.synthetic {
            Synthetic::Buffered {
                capacity,
                stride,
                buffer,
            } if !buffer.is_empty() => (*capacity, *stride, std::mem::take(buffer)),
            _ => return Ok(()),
        };
        let n_dims = self.settings.num_output_dims();

        sort_blobs(&mut buffer)?;
        let mut group_base = None;
        let mut offset = 0i64;
        for blob in buffer.iter_mut() {
            let base = codec::cell_position(blob)?;
            if group_base == Some(base) {
                offset += 1;
            } else {
                group_base = Some(base);
                offset = 0;
            }
            if offset >= capacity {
                return Err(synthetic_overflow(capacity));
            }
            codec::set_position(blob, n_dims, base + offset * stride)?;
        }
        sort_blobs(&mut buffer)?;

        let settings = self.settings;
        let layout = settings.tuple_layout();
        let mut record = std::mem::take(&mut self.scratch);
        for blob in &buffer {
            layout.decode_into(blob, &mut record)?;
            let values = std::mem::take(&mut record.values);
            self.store(&record.chunk_coords, record.cell_pos, values)?;
        }
        self.scratch = record;
        Ok(())
    }
}

impl TupleSink for OutputArrayWriter<'_> {
    type Output = MemArray;

    fn write_tuple(&mut self, tuple: TupleRef<'_>) -> Result<(), RedimError> {
        match tuple {
            TupleRef::Fields(record) => self.write_record(record),
            TupleRef::Encoded(blob) => self.write_blob(blob),
        }
    }

    fn finalize(mut self) -> Result<MemArray, RedimError> {
        self.flush_synthetic()?;
        log_metric!(
            "event" = "output_written",
            "cells" = self.tuples_written,
            "chunks" = self.chunks_opened
        );
        Ok(self.array)
    }
}

fn synthetic_overflow(capacity: i64) -> RedimError {
    RedimError::Capacity(format!(
        "more than {} records share every non-synthetic coordinate; widen the synthetic dimension's chunk interval",
        capacity
    ))
}

/// Stable sort by canonical tuple order, surfacing the first comparison error.
fn sort_blobs(blobs: &mut [Vec<u8>]) -> Result<(), RedimError> {
    let mut failure = None;
    blobs.sort_by(|a, b| {
        codec::compare(a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    failure.map_or(Ok(()), Err)
}
