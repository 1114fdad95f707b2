//! In-memory chunked arrays: the source a redimension reads from and the
//! destination it writes into.

use std::collections::BTreeMap;

use crate::error::RedimError;
use crate::layout::ChunkLayout;
use crate::types::{ArraySchema, Coordinates, Position, Value};

/// One chunk. Cells are stored column-wise in ascending position order;
/// `positions` lists the populated positions, so the k-th position owns the
/// k-th entry of every column. Storage grows with the cells written, never with
/// the chunk's logical volume.
#[derive(Debug, Clone, PartialEq)]
pub struct MemChunk {
    origin: Coordinates,
    positions: Vec<Position>,
    columns: Vec<Vec<Value>>,
}

impl MemChunk {
    pub fn new(origin: Coordinates, num_attributes: usize) -> Self {
        Self {
            origin,
            positions: Vec::new(),
            columns: vec![Vec::new(); num_attributes],
        }
    }

    pub fn origin(&self) -> &[i64] {
        &self.origin
    }

    pub fn num_cells(&self) -> usize {
        self.positions.len()
    }

    pub fn is_populated(&self, pos: Position) -> bool {
        self.positions.binary_search(&pos).is_ok()
    }

    /// Populated positions in ascending order. Drives iteration even when no
    /// attribute column is read.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.positions.iter().copied()
    }

    pub fn column(&self, attr: usize) -> &[Value] {
        &self.columns[attr]
    }

    /// Stores a cell. Writing a position twice is a data collision.
    pub fn insert(&mut self, pos: Position, values: Vec<Value>) -> Result<(), RedimError> {
        if values.len() != self.columns.len() {
            return Err(RedimError::Internal(format!(
                "chunk holds {} attributes, cell carries {}",
                self.columns.len(),
                values.len()
            )));
        }
        if pos < 0 {
            return Err(RedimError::Internal(format!("negative cell position {}", pos)));
        }
        // Writers mostly append in position order.
        let rank = match self.positions.last() {
            Some(&last) if pos <= last => match self.positions.binary_search(&pos) {
                Ok(_) => {
                    return Err(RedimError::DataCollision {
                        chunk: self.origin.clone(),
                        position: pos,
                    })
                }
                Err(rank) => rank,
            },
            _ => self.positions.len(),
        };
        self.positions.insert(rank, pos);
        for (column, v) in self.columns.iter_mut().zip(values) {
            column.insert(rank, v);
        }
        Ok(())
    }
}

/// A whole array held in memory, chunk-addressed by chunk origin.
#[derive(Debug, Clone)]
pub struct MemArray {
    schema: ArraySchema,
    layout: ChunkLayout,
    chunks: BTreeMap<Coordinates, MemChunk>,
}

impl MemArray {
    pub fn new(schema: ArraySchema) -> Result<Self, RedimError> {
        schema.validate()?;
        let layout = ChunkLayout::new(&schema.dimensions);
        Ok(Self {
            schema,
            layout,
            chunks: BTreeMap::new(),
        })
    }

    pub fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn num_cells(&self) -> usize {
        self.chunks.values().map(MemChunk::num_cells).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in ascending origin order.
    pub fn chunks(&self) -> impl Iterator<Item = &MemChunk> {
        self.chunks.values()
    }

    pub fn chunk(&self, origin: &[i64]) -> Option<&MemChunk> {
        self.chunks.get(origin)
    }

    /// Opens the chunk at `origin`, creating it if absent.
    pub fn chunk_mut(&mut self, origin: &[i64]) -> &mut MemChunk {
        let num_attributes = self.schema.num_attributes();
        self.chunks
            .entry(origin.to_vec())
            .or_insert_with(|| MemChunk::new(origin.to_vec(), num_attributes))
    }

    /// Writes one cell by its coordinates.
    pub fn write_cell(&mut self, cell: &[i64], values: Vec<Value>) -> Result<(), RedimError> {
        if cell.len() != self.layout.num_dims() {
            return Err(RedimError::Internal(format!(
                "array '{}' has {} dimensions, cell has {}",
                self.schema.name,
                self.layout.num_dims(),
                cell.len()
            )));
        }
        self.layout.check_bounds(cell)?;
        let mut origin = vec![0; cell.len()];
        self.layout.chunk_position_for(cell, &mut origin);
        let pos = self.layout.coord_to_position(&origin, cell);
        self.chunk_mut(&origin).insert(pos, values)
    }

    /// Deals whole chunks out to `parts` arrays round-robin, in origin order.
    pub fn partition(&self, parts: usize) -> Result<Vec<MemArray>, RedimError> {
        if parts == 0 {
            return Err(RedimError::Config("cannot partition an array into zero parts".into()));
        }
        let mut out: Vec<MemArray> = (0..parts)
            .map(|_| MemArray {
                schema: self.schema.clone(),
                layout: self.layout.clone(),
                chunks: BTreeMap::new(),
            })
            .collect();
        for (k, (origin, chunk)) in self.chunks.iter().enumerate() {
            out[k % parts].chunks.insert(origin.clone(), chunk.clone());
        }
        Ok(out)
    }

    /// Materializes every cell as `(coordinates, values)` in chunk then position
    /// order.
    pub fn cells(&self) -> Vec<(Coordinates, Vec<Value>)> {
        let mut out = Vec::with_capacity(self.num_cells());
        for chunk in self.chunks.values() {
            for (k, pos) in chunk.positions().enumerate() {
                let mut cell = vec![0; self.layout.num_dims()];
                self.layout.position_to_coord(&chunk.origin, pos, &mut cell);
                let values = chunk.columns.iter().map(|c| c[k].clone()).collect();
                out.push((cell, values));
            }
        }
        out
    }
}
