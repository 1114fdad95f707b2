//! Transit arrays: packed-tuple chunks addressed for the sort and the shuffle.

use std::collections::BTreeMap;

use bitvec::prelude::*;

use crate::error::RedimError;
use crate::types::InstanceId;

/// Where a transit chunk lives. Ordering is `(dst_instance, src_instance,
/// chunk_no)`, which is the order the merge seeks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransitAddress {
    pub dst_instance: InstanceId,
    pub src_instance: InstanceId,
    pub chunk_no: u64,
}

impl TransitAddress {
    pub fn new(dst_instance: InstanceId, src_instance: InstanceId, chunk_no: u64) -> Self {
        Self {
            dst_instance,
            src_instance,
            chunk_no,
        }
    }

    pub fn next_chunk(self) -> Self {
        Self {
            chunk_no: self.chunk_no + 1,
            ..self
        }
    }
}

/// One packed blob plus the existence bitmap over its tuple slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitChunk {
    packed: Vec<u8>,
    existence: BitVec<u8, Lsb0>,
}

impl TransitChunk {
    pub fn new(packed: Vec<u8>, num_tuples: usize) -> Self {
        Self {
            packed,
            existence: bitvec![u8, Lsb0; 1; num_tuples],
        }
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    pub fn num_tuples(&self) -> usize {
        self.existence.count_ones()
    }

    pub fn packed_len(&self) -> usize {
        self.packed.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransitArray {
    chunks: BTreeMap<TransitAddress, TransitChunk>,
}

impl TransitArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: TransitAddress, chunk: TransitChunk) -> Result<(), RedimError> {
        if self.chunks.contains_key(&address) {
            return Err(RedimError::Internal(format!(
                "transit chunk {:?} written twice",
                address
            )));
        }
        self.chunks.insert(address, chunk);
        Ok(())
    }

    pub fn get(&self, address: &TransitAddress) -> Option<&TransitChunk> {
        self.chunks.get(address)
    }

    pub fn chunks(&self) -> impl Iterator<Item = (&TransitAddress, &TransitChunk)> {
        self.chunks.iter()
    }

    pub fn into_chunks(self) -> impl Iterator<Item = (TransitAddress, TransitChunk)> {
        self.chunks.into_iter()
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn num_tuples(&self) -> usize {
        self.chunks.values().map(TransitChunk::num_tuples).sum()
    }

    pub fn packed_bytes(&self) -> usize {
        self.chunks.values().map(TransitChunk::packed_len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
