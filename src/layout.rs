// In: src/layout.rs

//! Destination-schema geometry: which chunk a cell belongs to, where inside that
//! chunk it lives, and which worker owns the chunk.
//!
//! Positions are row-major over the full chunk shape (`chunk_interval` per
//! dimension), so the last-declared dimension varies fastest.

use std::fmt;

use crate::error::RedimError;
use crate::types::{Coordinate, DimensionDesc, InstanceId, Position};

/// Maps cell coordinates to chunk origins and in-chunk positions for one schema.
#[derive(Debug, Clone)]
pub struct ChunkLayout {
    dims: Vec<DimensionDesc>,
    strides: Vec<i64>,
}

impl ChunkLayout {
    pub fn new(dims: &[DimensionDesc]) -> Self {
        let mut strides = vec![1i64; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1].saturating_mul(dims[i + 1].chunk_interval);
        }
        Self {
            dims: dims.to_vec(),
            strides,
        }
    }

    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn dimensions(&self) -> &[DimensionDesc] {
        &self.dims
    }

    pub fn check_bounds(&self, cell: &[Coordinate]) -> Result<(), RedimError> {
        for (d, &c) in self.dims.iter().zip(cell) {
            if !d.contains(c) {
                return Err(RedimError::OutOfBounds {
                    dimension: d.name.clone(),
                    value: c,
                    start: d.start,
                    end: d.end,
                });
            }
        }
        Ok(())
    }

    /// Writes the origin of the chunk containing `cell` into `chunk`.
    pub fn chunk_position_for(&self, cell: &[Coordinate], chunk: &mut [Coordinate]) {
        for ((d, &c), out) in self.dims.iter().zip(cell).zip(chunk.iter_mut()) {
            *out = d.chunk_origin(c);
        }
    }

    pub fn coord_to_position(&self, chunk: &[Coordinate], cell: &[Coordinate]) -> Position {
        chunk
            .iter()
            .zip(cell)
            .zip(&self.strides)
            .map(|((&origin, &c), &stride)| (c - origin) * stride)
            .sum()
    }

    /// Inverse of `coord_to_position`.
    pub fn position_to_coord(&self, chunk: &[Coordinate], pos: Position, cell: &mut [Coordinate]) {
        let mut rest = pos;
        for ((&origin, &stride), out) in chunk.iter().zip(&self.strides).zip(cell.iter_mut()) {
            *out = origin + rest / stride;
            rest %= stride;
        }
    }
}

/// Routes a destination chunk to the worker that will own it.
///
/// Implementations must be deterministic and identical on every worker.
pub trait ChunkDistribution: Send + Sync + fmt::Debug {
    fn instance_for_chunk(
        &self,
        chunk: &[Coordinate],
        dims: &[DimensionDesc],
        num_instances: u32,
    ) -> InstanceId;
}

/// Hashes the per-dimension chunk numbers and takes the result modulo the
/// instance count.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashedDistribution;

impl ChunkDistribution for HashedDistribution {
    fn instance_for_chunk(
        &self,
        chunk: &[Coordinate],
        dims: &[DimensionDesc],
        num_instances: u32,
    ) -> InstanceId {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for (d, &c) in dims.iter().zip(chunk) {
            h ^= d.chunk_number(c) as u64;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
            h ^= h >> 29;
        }
        (h % num_instances.max(1) as u64) as InstanceId
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Vec<DimensionDesc> {
        vec![
            DimensionDesc::new("x", 0, 99, 10),
            DimensionDesc::new("y", -20, 19, 4),
            DimensionDesc::new("z", 1, 6, 3),
        ]
    }

    #[test]
    fn test_chunk_position_for_snaps_to_origin() {
        let layout = ChunkLayout::new(&dims());
        let mut chunk = vec![0; 3];
        layout.chunk_position_for(&[37, -17, 5], &mut chunk);
        assert_eq!(chunk, vec![30, -20, 4]);
        layout.chunk_position_for(&[0, 19, 1], &mut chunk);
        assert_eq!(chunk, vec![0, 16, 1]);
    }

    #[test]
    fn test_position_roundtrip_covers_the_whole_chunk() {
        let layout = ChunkLayout::new(&dims());
        let chunk = vec![30, -20, 4];
        let mut seen = Vec::new();
        for x in 30..40 {
            for y in -20..-16 {
                for z in 4..7 {
                    let cell = [x, y, z];
                    let pos = layout.coord_to_position(&chunk, &cell);
                    let mut back = vec![0; 3];
                    layout.position_to_coord(&chunk, pos, &mut back);
                    assert_eq!(back, cell.to_vec());
                    seen.push(pos);
                }
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..120).collect::<Vec<_>>());
    }

    #[test]
    fn test_last_dimension_varies_fastest() {
        let layout = ChunkLayout::new(&dims());
        let chunk = vec![0, -20, 1];
        assert_eq!(layout.coord_to_position(&chunk, &[0, -20, 2]), 1);
        assert_eq!(layout.coord_to_position(&chunk, &[0, -19, 1]), 3);
        assert_eq!(layout.coord_to_position(&chunk, &[1, -20, 1]), 12);
    }

    #[test]
    fn test_bounds_are_enforced() {
        let layout = ChunkLayout::new(&dims());
        assert!(layout.check_bounds(&[0, 0, 1]).is_ok());
        assert!(matches!(
            layout.check_bounds(&[100, 0, 1]),
            Err(RedimError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_hashed_distribution_is_stable_and_in_range() {
        let dims = dims();
        let dist = HashedDistribution;
        for x in (0..100).step_by(10) {
            let chunk = [x, -20, 1];
            let a = dist.instance_for_chunk(&chunk, &dims, 4);
            let b = dist.instance_for_chunk(&chunk, &dims, 4);
            assert_eq!(a, b);
            assert!(a < 4);
        }
        assert_eq!(dist.instance_for_chunk(&[0, -20, 1], &dims, 1), 0);
    }
}
