//! The packed-tuple chunk: many redim tuples in one blob, so that network transit
//! pays per-chunk rather than per-cell overhead.
//!
//! ```text
//! packed := ([u32 len][len bytes])+ [u32 0]
//! ```
//!
//! A packed chunk holds at least one tuple; a blob consisting only of the
//! sentinel is malformed.

use crate::error::RedimError;

const LENGTH_SIZE: usize = 4;
const SENTINEL_SIZE: usize = LENGTH_SIZE;

/// Bytes a tuple of `tuple_len` occupies inside a packed chunk.
pub const fn framed_size(tuple_len: usize) -> usize {
    LENGTH_SIZE + tuple_len
}

/// Smallest ceiling under which a tuple of `tuple_len` bytes can be packed alone.
pub const fn min_ceiling_for(tuple_len: usize) -> usize {
    framed_size(tuple_len) + SENTINEL_SIZE
}

//==================================================================================
// Builder
//==================================================================================

/// Accumulates tuples into one packed blob without ever exceeding `limit` bytes
/// (framing and sentinel included).
#[derive(Debug)]
pub struct PackedChunkBuilder {
    buf: Vec<u8>,
    limit: usize,
    count: usize,
}

impl PackedChunkBuilder {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            count: 0,
        }
    }

    /// A builder that never rejects a tuple for size.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn num_tuples(&self) -> usize {
        self.count
    }

    /// Size the blob would have if finished now.
    pub fn packed_bytes(&self) -> usize {
        self.buf.len() + SENTINEL_SIZE
    }

    /// Appends `tuple` if it fits. Returns `Ok(false)` when the chunk is full and
    /// must be finished first.
    ///
    /// A tuple too large to fit even into an empty chunk is a capacity error.
    pub fn try_push(&mut self, tuple: &[u8]) -> Result<bool, RedimError> {
        if tuple.is_empty() {
            return Err(RedimError::Internal("cannot pack a zero-length tuple".into()));
        }
        let len = u32::try_from(tuple.len()).map_err(|_| {
            RedimError::Capacity(format!("tuple of {} bytes cannot be framed", tuple.len()))
        })?;
        if min_ceiling_for(tuple.len()) > self.limit {
            return Err(RedimError::Capacity(format!(
                "a {}-byte tuple does not fit in a {}-byte chunk; raise the memory limit",
                tuple.len(),
                self.limit
            )));
        }
        if self.packed_bytes().saturating_add(framed_size(tuple.len())) > self.limit {
            return Ok(false);
        }
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(tuple);
        self.count += 1;
        Ok(true)
    }

    /// Terminates the blob with the sentinel and resets the builder.
    pub fn finish(&mut self) -> Result<Vec<u8>, RedimError> {
        if self.count == 0 {
            return Err(RedimError::Internal("refusing to emit an empty packed chunk".into()));
        }
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        self.count = 0;
        Ok(std::mem::take(&mut self.buf))
    }
}

//==================================================================================
// Cursor
//==================================================================================

/// Walks a packed blob in place. The cursor borrows the blob, so the backing
/// chunk stays pinned exactly as long as a tuple from it may be read.
#[derive(Debug, Clone)]
pub struct PackedTupleCursor<'a> {
    blob: &'a [u8],
    off: usize,
}

impl<'a> PackedTupleCursor<'a> {
    /// Validates the framing of the whole blob and positions on its first tuple.
    pub fn new(blob: &'a [u8]) -> Result<Self, RedimError> {
        let mut off = 0;
        let mut count = 0usize;
        loop {
            let len = frame_len(blob, off)?;
            if len == 0 {
                break;
            }
            off += LENGTH_SIZE;
            if len > blob.len() - off {
                return Err(RedimError::Internal(format!(
                    "packed tuple at offset {} claims {} bytes, only {} remain",
                    off - LENGTH_SIZE,
                    len,
                    blob.len() - off
                )));
            }
            off += len;
            count += 1;
        }
        if count == 0 {
            return Err(RedimError::Internal("packed chunk holds no tuples".into()));
        }
        if off + SENTINEL_SIZE != blob.len() {
            return Err(RedimError::Internal(format!(
                "{} stray bytes after packed chunk sentinel",
                blob.len() - off - SENTINEL_SIZE
            )));
        }
        Ok(Self { blob, off: 0 })
    }

    pub fn end(&self) -> bool {
        self.current_len() == 0
    }

    pub fn current(&self) -> Result<&'a [u8], RedimError> {
        if self.end() {
            return Err(RedimError::Internal("packed cursor read past end".into()));
        }
        let start = self.off + LENGTH_SIZE;
        Ok(&self.blob[start..start + self.current_len()])
    }

    pub fn advance(&mut self) -> Result<(), RedimError> {
        if self.end() {
            return Err(RedimError::Internal("packed cursor advanced past end".into()));
        }
        self.off += framed_size(self.current_len());
        Ok(())
    }

    // Framing was validated in `new`, so every offset reached here is in bounds.
    fn current_len(&self) -> usize {
        let bytes: [u8; 4] = bytemuck::pod_read_unaligned(&self.blob[self.off..self.off + LENGTH_SIZE]);
        u32::from_le_bytes(bytes) as usize
    }
}

fn frame_len(blob: &[u8], off: usize) -> Result<usize, RedimError> {
    let bytes = blob.get(off..off + LENGTH_SIZE).ok_or_else(|| {
        RedimError::Internal("packed chunk is missing its terminating sentinel".into())
    })?;
    Ok(u32::from_le_bytes(bytemuck::pod_read_unaligned(bytes)) as usize)
}

/// Unpacks every tuple of `blob` as borrowed slices.
pub fn unpack(blob: &[u8]) -> Result<Vec<&[u8]>, RedimError> {
    let mut cursor = PackedTupleCursor::new(blob)?;
    let mut out = Vec::new();
    while !cursor.end() {
        out.push(cursor.current()?);
        cursor.advance()?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuples() -> Vec<Vec<u8>> {
        vec![vec![1], vec![2; 17], vec![3, 3, 3], vec![4; 250]]
    }

    #[test]
    fn test_pack_then_unpack_preserves_order() {
        let mut builder = PackedChunkBuilder::unbounded();
        for t in tuples() {
            assert!(builder.try_push(&t).unwrap());
        }
        assert_eq!(builder.num_tuples(), 4);
        let blob = builder.finish().unwrap();
        assert!(builder.is_empty());

        let expected: usize = tuples().iter().map(|t| framed_size(t.len())).sum::<usize>() + 4;
        assert_eq!(blob.len(), expected);
        assert_eq!(&blob[blob.len() - 4..], &[0, 0, 0, 0]);

        let unpacked: Vec<Vec<u8>> = unpack(&blob).unwrap().into_iter().map(<[u8]>::to_vec).collect();
        assert_eq!(unpacked, tuples());
    }

    #[test]
    fn test_sentinel_only_blob_is_rejected() {
        assert!(matches!(
            PackedTupleCursor::new(&[0, 0, 0, 0]),
            Err(RedimError::Internal(_))
        ));
        let mut builder = PackedChunkBuilder::unbounded();
        assert!(builder.finish().is_err());
    }

    #[test]
    fn test_malformed_blobs_are_rejected() {
        // truncated payload
        assert!(PackedTupleCursor::new(&[9, 0, 0, 0, 1, 2]).is_err());
        // missing sentinel
        assert!(PackedTupleCursor::new(&[1, 0, 0, 0, 7]).is_err());
        // trailing garbage
        assert!(PackedTupleCursor::new(&[1, 0, 0, 0, 7, 0, 0, 0, 0, 5]).is_err());
        assert!(PackedTupleCursor::new(&[]).is_err());
    }

    #[test]
    fn test_builder_respects_ceiling() {
        let limit = 64;
        let mut builder = PackedChunkBuilder::new(limit);
        let t = vec![0xab; 10];
        let mut pushed = 0;
        while builder.try_push(&t).unwrap() {
            pushed += 1;
        }
        // 4 sentinel + 4 * (4 + 10) = 60 <= 64, a fifth would be 74
        assert_eq!(pushed, 4);
        let blob = builder.finish().unwrap();
        assert!(blob.len() <= limit);
        assert!(builder.try_push(&t).unwrap());
    }

    #[test]
    fn test_oversized_single_tuple_is_a_capacity_error() {
        let mut builder = PackedChunkBuilder::new(16);
        assert!(builder.try_push(&[1; 8]).unwrap());
        let err = builder.try_push(&[1; 9]).unwrap_err();
        assert!(matches!(err, RedimError::Capacity(_)));
        assert!(err.to_string().contains("raise the memory limit"));
    }

    #[test]
    fn test_cursor_past_end_is_internal_error() {
        let mut builder = PackedChunkBuilder::unbounded();
        builder.try_push(&[5]).unwrap();
        let blob = builder.finish().unwrap();
        let mut cursor = PackedTupleCursor::new(&blob).unwrap();
        assert_eq!(cursor.current().unwrap(), &[5]);
        cursor.advance().unwrap();
        assert!(cursor.end());
        assert!(cursor.current().is_err());
        assert!(cursor.advance().is_err());
    }
}
