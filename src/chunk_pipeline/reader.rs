// In: src/chunk_pipeline/reader.rs

//! Projection readers: lazy producers of redim tuples.
//!
//! `RawArrayReader` scans a source array cell by cell, applies the field mapping
//! and emits one tuple per qualifying cell. `EncodedArrayReader` walks a transit
//! array whose chunks already hold packed tuples. Both implement `TupleSource`,
//! and every stage is generic over it, so the variant is resolved once per stream.

use crate::array::{MemArray, MemChunk, TransitArray, TransitChunk};
use crate::error::RedimError;
use crate::log_metric;
use crate::settings::{FieldDestination, Settings};
use crate::tuple::{PackedTupleCursor, TupleRecord};
use crate::types::{Coordinates, Position, Value};

/// The record a source is positioned on: either the materialized field vector
/// or an encoded blob. Valid until the next call to `next()`.
#[derive(Debug, Clone, Copy)]
pub enum TupleRef<'r> {
    Fields(&'r TupleRecord),
    Encoded(&'r [u8]),
}

impl<'r> TupleRef<'r> {
    pub fn encoded(self) -> Result<&'r [u8], RedimError> {
        match self {
            TupleRef::Encoded(blob) => Ok(blob),
            TupleRef::Fields(_) => Err(RedimError::Internal(
                "stage expects encoded tuples but was handed a field vector".into(),
            )),
        }
    }
}

/// Forward-only tuple stream. A source is positioned on its first record right
/// after construction.
pub trait TupleSource {
    fn end(&self) -> bool;

    /// Moves to the next record. Calling this at end is a contract violation.
    fn next(&mut self) -> Result<(), RedimError>;

    /// The current record. Calling this at end is a contract violation.
    fn current(&self) -> Result<TupleRef<'_>, RedimError>;
}

//==================================================================================
// Raw Mode
//==================================================================================

/// What a `RawArrayReader` hands out per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOutput {
    Fields,
    Encoded,
}

pub struct RawArrayReader<'a> {
    settings: &'a Settings,
    array: &'a MemArray,
    chunks: Vec<&'a MemChunk>,
    output: RawOutput,
    chunk_idx: usize,
    positions: Vec<Position>,
    cell_idx: usize,
    in_cell: Coordinates,
    out_cell: Coordinates,
    record: TupleRecord,
    blob: Vec<u8>,
    at_end: bool,
    cells_scanned: u64,
    dropped: u64,
}

impl<'a> RawArrayReader<'a> {
    pub fn new(array: &'a MemArray, settings: &'a Settings, output: RawOutput) -> Result<Self, RedimError> {
        if array.schema() != settings.input_schema() {
            return Err(RedimError::Internal(format!(
                "reader built for '{}' was handed array '{}'",
                settings.input_schema().name,
                array.schema().name
            )));
        }
        let mut reader = Self {
            settings,
            array,
            chunks: array.chunks().collect(),
            output,
            chunk_idx: 0,
            positions: Vec::new(),
            cell_idx: 0,
            in_cell: vec![0; settings.input_schema().num_dimensions()],
            out_cell: vec![0; settings.num_output_dims()],
            record: TupleRecord {
                chunk_coords: vec![0; settings.num_output_dims()],
                ..TupleRecord::default()
            },
            blob: Vec::new(),
            at_end: false,
            cells_scanned: 0,
            dropped: 0,
        };
        if let Some(first) = reader.chunks.first() {
            reader.positions = first.positions().collect();
        }
        reader.seek_qualifying()?;
        Ok(reader)
    }

    /// Records dropped so far because a coordinate-bound field was null.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn seek_qualifying(&mut self) -> Result<(), RedimError> {
        loop {
            let Some(chunk) = self.chunks.get(self.chunk_idx).copied() else {
                self.at_end = true;
                log_metric!(
                    "event" = "projection_done",
                    "cells_scanned" = self.cells_scanned,
                    "dropped" = self.dropped
                );
                return Ok(());
            };
            if self.cell_idx >= self.positions.len() {
                self.chunk_idx += 1;
                self.cell_idx = 0;
                self.positions = self
                    .chunks
                    .get(self.chunk_idx)
                    .map(|c| c.positions().collect())
                    .unwrap_or_default();
                continue;
            }
            let k = self.cell_idx;
            self.cell_idx += 1;
            self.cells_scanned += 1;
            if self.project(chunk, k)? {
                return Ok(());
            }
            self.dropped += 1;
        }
    }

    /// Builds the record for the `k`-th populated cell of `chunk`. Returns false
    /// when the null filter drops it.
    fn project(&mut self, chunk: &MemChunk, k: usize) -> Result<bool, RedimError> {
        let settings = self.settings;
        let input = settings.input_schema();
        self.array
            .layout()
            .position_to_coord(chunk.origin(), self.positions[k], &mut self.in_cell);

        self.record.values.clear();
        self.record.values.resize(settings.num_output_attrs(), Value::null());

        for (i, mapping) in settings.attr_mapping().iter().enumerate() {
            match mapping.destination {
                FieldDestination::Attribute(j) => {
                    self.record.values[j] = chunk.column(i)[k].clone();
                }
                FieldDestination::Dimension(d) => {
                    let v = &chunk.column(i)[k];
                    if v.is_null() {
                        if mapping.null_filter {
                            return Ok(false);
                        }
                        return Err(RedimError::Internal(format!(
                            "null coordinate for dimension {} without a null filter",
                            d
                        )));
                    }
                    self.out_cell[d] = v.to_coordinate(input.attributes[i].attr_type)?;
                }
                FieldDestination::Unused => {}
            }
        }
        for (i, mapping) in settings.dim_mapping().iter().enumerate() {
            match mapping.destination {
                FieldDestination::Attribute(j) => self.record.values[j] = Value::from_i64(self.in_cell[i]),
                FieldDestination::Dimension(d) => self.out_cell[d] = self.in_cell[i],
                FieldDestination::Unused => {}
            }
        }
        if let Some(s) = settings.synthetic_dim() {
            self.out_cell[s] = settings.output_schema().dimensions[s].start;
        }

        settings.output_layout().check_bounds(&self.out_cell)?;
        settings.chunk_position_for(&self.out_cell, &mut self.record.chunk_coords);
        self.record.cell_pos = settings.coord_to_position(&self.record.chunk_coords, &self.out_cell);
        self.record.dst_instance = settings.instance_for_chunk(&self.record.chunk_coords);

        if self.output == RawOutput::Encoded {
            settings.tuple_layout().encode_into(
                self.record.dst_instance,
                &self.record.chunk_coords,
                self.record.cell_pos,
                &self.record.values,
                &mut self.blob,
            )?;
        }
        Ok(true)
    }
}

impl TupleSource for RawArrayReader<'_> {
    fn end(&self) -> bool {
        self.at_end
    }

    fn next(&mut self) -> Result<(), RedimError> {
        if self.at_end {
            return Err(RedimError::Internal("reader advanced past end".into()));
        }
        self.seek_qualifying()
    }

    fn current(&self) -> Result<TupleRef<'_>, RedimError> {
        if self.at_end {
            return Err(RedimError::Internal("reader read past end".into()));
        }
        Ok(match self.output {
            RawOutput::Fields => TupleRef::Fields(&self.record),
            RawOutput::Encoded => TupleRef::Encoded(&self.blob),
        })
    }
}

//==================================================================================
// Encoded Mode
//==================================================================================

/// Pass-through over the packed tuples of a transit array, in address order.
pub struct EncodedArrayReader<'a> {
    chunks: Vec<&'a TransitChunk>,
    next_chunk: usize,
    cursor: Option<PackedTupleCursor<'a>>,
}

impl<'a> EncodedArrayReader<'a> {
    pub fn new(array: &'a TransitArray) -> Result<Self, RedimError> {
        let mut reader = Self {
            chunks: array.chunks().map(|(_, c)| c).collect(),
            next_chunk: 0,
            cursor: None,
        };
        reader.open_next_chunk()?;
        Ok(reader)
    }

    fn open_next_chunk(&mut self) -> Result<(), RedimError> {
        self.cursor = match self.chunks.get(self.next_chunk) {
            Some(chunk) => Some(PackedTupleCursor::new(chunk.packed())?),
            None => None,
        };
        self.next_chunk += 1;
        Ok(())
    }
}

impl TupleSource for EncodedArrayReader<'_> {
    fn end(&self) -> bool {
        self.cursor.is_none()
    }

    fn next(&mut self) -> Result<(), RedimError> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| RedimError::Internal("reader advanced past end".into()))?;
        cursor.advance()?;
        if cursor.end() {
            self.open_next_chunk()?;
        }
        Ok(())
    }

    fn current(&self) -> Result<TupleRef<'_>, RedimError> {
        let cursor = self
            .cursor
            .as_ref()
            .ok_or_else(|| RedimError::Internal("reader read past end".into()))?;
        Ok(TupleRef::Encoded(cursor.current()?))
    }
}
