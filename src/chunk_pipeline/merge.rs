// In: src/chunk_pipeline/merge.rs

//! The k-way merge over the shuffled per-origin streams.
//!
//! After the shuffle, a worker holds one sorted stream per origin worker, laid
//! out as transit chunks `(self, src, 0), (self, src, 1), ...`. The merge keeps
//! exactly one open chunk per origin and repeatedly emits the smallest current
//! tuple into the output writer.

use std::cmp::Ordering;

use log::debug;

use crate::array::{MemArray, TransitAddress, TransitArray};
use crate::chunk_pipeline::reader::TupleRef;
use crate::chunk_pipeline::writer::{OutputArrayWriter, TupleSink};
use crate::error::RedimError;
use crate::log_metric;
use crate::settings::Settings;
use crate::tuple::{codec, PackedTupleCursor};
use crate::types::InstanceId;

/// One origin worker's stream: the open chunk's cursor, or `None` once the
/// stream is exhausted.
#[derive(Debug)]
struct OriginCursor<'a> {
    array: &'a TransitArray,
    address: TransitAddress,
    cursor: Option<PackedTupleCursor<'a>>,
}

impl<'a> OriginCursor<'a> {
    fn open(array: &'a TransitArray, self_instance: InstanceId, src: InstanceId) -> Result<Self, RedimError> {
        let mut origin = Self {
            array,
            address: TransitAddress::new(self_instance, src, 0),
            cursor: None,
        };
        origin.seek()?;
        Ok(origin)
    }

    /// Opens the chunk at `self.address`, or closes the stream if there is none.
    fn seek(&mut self) -> Result<(), RedimError> {
        self.cursor = match self.array.get(&self.address) {
            Some(chunk) => Some(PackedTupleCursor::new(chunk.packed())?),
            None => None,
        };
        Ok(())
    }

    fn current(&self) -> Option<Result<&'a [u8], RedimError>> {
        self.cursor.as_ref().map(|c| c.current())
    }

    fn advance(&mut self) -> Result<(), RedimError> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| RedimError::Internal("merge advanced a closed stream".into()))?;
        cursor.advance()?;
        if cursor.end() {
            self.address = self.address.next_chunk();
            self.seek()?;
        }
        Ok(())
    }
}

/// Index of the minimal current tuple among the open streams; the first
/// minimal index wins ties.
fn select_min(current: &[Option<&[u8]>]) -> Result<Option<usize>, RedimError> {
    let mut best: Option<(usize, &[u8])> = None;
    for (i, tuple) in current.iter().enumerate() {
        let Some(tuple) = *tuple else { continue };
        match best {
            Some((_, b)) if codec::compare(tuple, b)? != Ordering::Less => {}
            _ => best = Some((i, tuple)),
        }
    }
    Ok(best.map(|(i, _)| i))
}

/// Merges every origin stream addressed to this instance and writes the result
/// through an `OutputArrayWriter`.
pub fn merge(shuffled: &TransitArray, settings: &Settings) -> Result<MemArray, RedimError> {
    let me = settings.instance_id();
    let mut origins = (0..settings.num_instances())
        .map(|src| OriginCursor::open(shuffled, me, src))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        "instance {} merging {} origin streams ({} open)",
        me,
        origins.len(),
        origins.iter().filter(|o| o.cursor.is_some()).count()
    );

    let mut writer = OutputArrayWriter::new(settings)?;
    let mut heads: Vec<Option<&[u8]>> = Vec::with_capacity(origins.len());
    let mut merged = 0usize;
    loop {
        heads.clear();
        for origin in &origins {
            heads.push(origin.current().transpose()?);
        }
        let Some(winner) = select_min(&heads)? else { break };
        let tuple = heads[winner].ok_or_else(|| RedimError::Internal("merge selected a closed stream".into()))?;
        writer.write_tuple(TupleRef::Encoded(tuple))?;
        origins[winner].advance()?;
        merged += 1;
    }

    // Chunks addressed to another instance, or stranded past a gap in a
    // stream's chunk numbers, would otherwise vanish silently.
    if merged != shuffled.num_tuples() {
        return Err(RedimError::Internal(format!(
            "merge consumed {} of {} shuffled tuples on instance {}",
            merged,
            shuffled.num_tuples(),
            me
        )));
    }
    log_metric!("event" = "merge_done", "instance" = me, "tuples" = merged);
    writer.finalize()
}
