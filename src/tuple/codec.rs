//! The redim tuple: one compact, self-delimiting byte blob per output cell.
//!
//! ```text
//! tuple := [u8 n_dims][u32 dst_instance][i64 chunk_coord; n_dims][i64 cell_pos][value]*
//! value := ([i8 missing_reason])([u32 size])([data])
//! ```
//!
//! The missing-reason byte is present only for nullable attributes (-1 means
//! "present"), the size only for variable-size types. All integers are
//! little-endian. The blob carries no type information beyond `n_dims`; the
//! decoder must be handed the same `TupleLayout` that encoded it.
//!
//! Ordering is lexicographic over `(dst_instance, chunk_coords, cell_pos)`.
//! Attribute payloads never take part in ordering or equality.

use std::cmp::Ordering;

use crate::error::RedimError;
use crate::types::{ArraySchema, Coordinate, Coordinates, InstanceId, Position, Value};

//==================================================================================
// Format Constants
//==================================================================================
const N_DIMS_SIZE: usize = 1;
const INSTANCE_SIZE: usize = 4;
const COORD_SIZE: usize = 8;
const POSITION_SIZE: usize = 8;
const MISSING_SIZE: usize = 1;
const LENGTH_SIZE: usize = 4;

const INSTANCE_OFFSET: usize = N_DIMS_SIZE;
const COORDS_OFFSET: usize = INSTANCE_OFFSET + INSTANCE_SIZE;

/// Size of the positional prefix (everything before the attribute block).
pub const fn prefix_len(n_dims: usize) -> usize {
    COORDS_OFFSET + COORD_SIZE * n_dims + POSITION_SIZE
}

fn position_offset(n_dims: usize) -> usize {
    COORDS_OFFSET + COORD_SIZE * n_dims
}

//==================================================================================
// Public Structs
//==================================================================================

/// How one attribute is laid out in the attribute block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSlot {
    pub nullable: bool,
    /// `Some(width)` for fixed-size types, `None` for length-prefixed ones.
    pub fixed_size: Option<usize>,
}

/// The schema-driven serializer for redim tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleLayout {
    n_dims: u8,
    slots: Vec<AttrSlot>,
}

/// A decoded tuple: the materialized field vector of one output cell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TupleRecord {
    pub dst_instance: InstanceId,
    pub chunk_coords: Coordinates,
    pub cell_pos: Position,
    pub values: Vec<Value>,
}

//==================================================================================
// Core Implementation
//==================================================================================

impl TupleLayout {
    pub fn new(n_dims: u8, slots: Vec<AttrSlot>) -> Self {
        Self { n_dims, slots }
    }

    /// Derives the layout for tuples destined for `schema`.
    pub fn from_schema(schema: &ArraySchema) -> Result<Self, RedimError> {
        let n_dims = u8::try_from(schema.num_dimensions()).map_err(|_| {
            RedimError::Config(format!(
                "array '{}' has too many dimensions for the tuple format",
                schema.name
            ))
        })?;
        let slots = schema
            .attributes
            .iter()
            .map(|a| AttrSlot {
                nullable: a.nullable,
                fixed_size: a.attr_type.fixed_size(),
            })
            .collect();
        Ok(Self::new(n_dims, slots))
    }

    pub fn n_dims(&self) -> usize {
        self.n_dims as usize
    }

    pub fn num_attrs(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[AttrSlot] {
        &self.slots
    }

    /// Exact encoded size for a tuple carrying `values`.
    pub fn encoded_len(&self, values: &[Value]) -> Result<usize, RedimError> {
        self.check_arity(values.len())?;
        let mut size = prefix_len(self.n_dims());
        for (slot, v) in self.slots.iter().zip(values) {
            if let Value::Null(reason) = v {
                if *reason < 0 {
                    return Err(RedimError::Internal(format!(
                        "missing reason {} is outside 0..=127",
                        reason
                    )));
                }
            }
            if slot.nullable {
                size += MISSING_SIZE;
                if v.is_null() {
                    continue;
                }
            } else if v.is_null() {
                return Err(RedimError::Internal(
                    "null value supplied for a non-nullable attribute".into(),
                ));
            }
            size += match slot.fixed_size {
                Some(width) => width,
                None => LENGTH_SIZE + v.size(),
            };
        }
        Ok(size)
    }

    /// Encodes a tuple into a freshly allocated blob.
    pub fn encode(
        &self,
        dst_instance: InstanceId,
        chunk_coords: &[Coordinate],
        cell_pos: Position,
        values: &[Value],
    ) -> Result<Vec<u8>, RedimError> {
        let mut out = Vec::new();
        self.encode_into(dst_instance, chunk_coords, cell_pos, values, &mut out)?;
        Ok(out)
    }

    /// Encodes a tuple into `out`, replacing its contents. The buffer is sized
    /// once up front.
    pub fn encode_into(
        &self,
        dst_instance: InstanceId,
        chunk_coords: &[Coordinate],
        cell_pos: Position,
        values: &[Value],
        out: &mut Vec<u8>,
    ) -> Result<(), RedimError> {
        if chunk_coords.len() != self.n_dims() {
            return Err(RedimError::Internal(format!(
                "tuple expects {} chunk coordinates, got {}",
                self.n_dims,
                chunk_coords.len()
            )));
        }
        let size = self.encoded_len(values)?;
        out.clear();
        out.reserve(size);

        out.push(self.n_dims);
        out.extend_from_slice(&dst_instance.to_le_bytes());
        for c in chunk_coords {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out.extend_from_slice(&cell_pos.to_le_bytes());

        for (slot, v) in self.slots.iter().zip(values) {
            if slot.nullable {
                out.push(v.missing_reason() as u8);
                if v.is_null() {
                    continue;
                }
            }
            match slot.fixed_size {
                Some(width) => {
                    if v.size() != width {
                        return Err(RedimError::Internal(format!(
                            "fixed-size attribute expects {} bytes, got {}",
                            width,
                            v.size()
                        )));
                    }
                    out.extend_from_slice(v.data());
                }
                None => {
                    let len = u32::try_from(v.size()).map_err(|_| {
                        RedimError::Capacity(format!(
                            "variable-size value of {} bytes exceeds the tuple format limit",
                            v.size()
                        ))
                    })?;
                    out.extend_from_slice(&len.to_le_bytes());
                    out.extend_from_slice(v.data());
                }
            }
        }
        debug_assert_eq!(out.len(), size);
        Ok(())
    }

    pub fn decode(&self, blob: &[u8]) -> Result<TupleRecord, RedimError> {
        let mut record = TupleRecord::default();
        self.decode_into(blob, &mut record)?;
        Ok(record)
    }

    /// Inverse of `encode_into`, reusing the vectors held by `record`.
    pub fn decode_into(&self, blob: &[u8], record: &mut TupleRecord) -> Result<(), RedimError> {
        let n_dims = n_dims(blob)?;
        if n_dims != self.n_dims() {
            return Err(RedimError::Internal(format!(
                "tuple carries {} dimensions, layout expects {}",
                n_dims, self.n_dims
            )));
        }
        record.dst_instance = instance_id(blob)?;
        record.chunk_coords.resize(n_dims, 0);
        chunk_coords(blob, &mut record.chunk_coords)?;
        record.cell_pos = cell_position(blob)?;

        record.values.clear();
        let mut off = prefix_len(n_dims);
        for slot in &self.slots {
            if slot.nullable {
                let reason = take(blob, off, MISSING_SIZE)?[0] as i8;
                off += MISSING_SIZE;
                if reason >= 0 {
                    record.values.push(Value::Null(reason));
                    continue;
                }
            }
            let width = match slot.fixed_size {
                Some(width) => width,
                None => {
                    let len = read_u32(blob, off)? as usize;
                    off += LENGTH_SIZE;
                    len
                }
            };
            record.values.push(Value::Data(take(blob, off, width)?.to_vec()));
            off += width;
        }
        if off != blob.len() {
            return Err(RedimError::Internal(format!(
                "tuple has {} trailing bytes after the attribute block",
                blob.len() - off
            )));
        }
        Ok(())
    }

    fn check_arity(&self, n: usize) -> Result<(), RedimError> {
        if n != self.slots.len() {
            return Err(RedimError::Internal(format!(
                "tuple expects {} attribute values, got {}",
                self.slots.len(),
                n
            )));
        }
        Ok(())
    }
}

//==================================================================================
// Fixed-Offset Accessors
//==================================================================================

pub fn n_dims(blob: &[u8]) -> Result<usize, RedimError> {
    let n = *blob
        .first()
        .ok_or_else(|| RedimError::Internal("empty tuple".into()))? as usize;
    if blob.len() < prefix_len(n) {
        return Err(RedimError::Internal(format!(
            "tuple of {} bytes is shorter than its {}-dimension prefix",
            blob.len(),
            n
        )));
    }
    Ok(n)
}

pub fn instance_id(blob: &[u8]) -> Result<InstanceId, RedimError> {
    read_u32(blob, INSTANCE_OFFSET)
}

pub fn chunk_coords(blob: &[u8], out: &mut [Coordinate]) -> Result<(), RedimError> {
    for (i, c) in out.iter_mut().enumerate() {
        *c = read_i64(blob, COORDS_OFFSET + i * COORD_SIZE)?;
    }
    Ok(())
}

pub fn cell_position(blob: &[u8]) -> Result<Position, RedimError> {
    let n = n_dims(blob)?;
    read_i64(blob, position_offset(n))
}

/// Patches the cell position in place. Used only after synthetic coordinate
/// assignment.
pub fn set_position(blob: &mut [u8], n_dims: usize, pos: Position) -> Result<(), RedimError> {
    let off = position_offset(n_dims);
    let slot = blob
        .get_mut(off..off + POSITION_SIZE)
        .ok_or_else(|| RedimError::Internal("tuple too short to hold a position".into()))?;
    slot.copy_from_slice(&pos.to_le_bytes());
    Ok(())
}

//==================================================================================
// Canonical Order
//==================================================================================

/// Total order over `(dst_instance, chunk_coords, cell_pos)`.
pub fn compare(a: &[u8], b: &[u8]) -> Result<Ordering, RedimError> {
    let n = n_dims(a)?;
    compare_prefix(a, b, n + 2)
}

/// Compares only the first `key_columns` positional components, where column 0
/// is the instance id, columns `1..=n_dims` the chunk coordinates and column
/// `n_dims + 1` the cell position.
pub fn compare_prefix(a: &[u8], b: &[u8], key_columns: usize) -> Result<Ordering, RedimError> {
    let n = n_dims(a)?;
    if n_dims(b)? != n {
        return Err(RedimError::Internal("malformed tuple comparison".into()));
    }
    Ok(compare_prefix_unchecked(a, b, n, key_columns))
}

/// Comparison for blobs already known to be well-formed with `n` dimensions.
pub(crate) fn compare_prefix_unchecked(a: &[u8], b: &[u8], n: usize, key_columns: usize) -> Ordering {
    let ia = u32::from_le_bytes(fixed(a, INSTANCE_OFFSET));
    let ib = u32::from_le_bytes(fixed(b, INSTANCE_OFFSET));
    let mut ord = ia.cmp(&ib);
    let last = key_columns.min(n + 2);
    let mut col = 1;
    while ord == Ordering::Equal && col < last {
        let off = COORDS_OFFSET + (col - 1) * COORD_SIZE;
        let ca = i64::from_le_bytes(fixed(a, off));
        let cb = i64::from_le_bytes(fixed(b, off));
        ord = ca.cmp(&cb);
        col += 1;
    }
    ord
}

pub fn less(a: &[u8], b: &[u8]) -> Result<bool, RedimError> {
    Ok(compare(a, b)? == Ordering::Less)
}

pub fn equal(a: &[u8], b: &[u8]) -> Result<bool, RedimError> {
    Ok(compare(a, b)? == Ordering::Equal)
}

//==================================================================================
// Private Helpers
//==================================================================================

fn take(blob: &[u8], off: usize, len: usize) -> Result<&[u8], RedimError> {
    blob.get(off..off + len).ok_or_else(|| {
        RedimError::Internal(format!(
            "tuple truncated: need {} bytes at offset {}, have {}",
            len,
            off,
            blob.len()
        ))
    })
}

fn read_u32(blob: &[u8], off: usize) -> Result<u32, RedimError> {
    take(blob, off, 4).map(|b| u32::from_le_bytes(bytemuck::pod_read_unaligned(b)))
}

fn read_i64(blob: &[u8], off: usize) -> Result<i64, RedimError> {
    take(blob, off, 8).map(|b| i64::from_le_bytes(bytemuck::pod_read_unaligned(b)))
}

/// Infallible fixed-width read for offsets already covered by `n_dims`.
fn fixed<const N: usize>(blob: &[u8], off: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&blob[off..off + N]);
    out
}

//==================================================================================
// Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn mixed_layout() -> TupleLayout {
        TupleLayout::new(
            2,
            vec![
                AttrSlot { nullable: false, fixed_size: Some(8) },
                AttrSlot { nullable: true, fixed_size: Some(4) },
                AttrSlot { nullable: true, fixed_size: None },
                AttrSlot { nullable: false, fixed_size: None },
            ],
        )
    }

    fn mixed_values() -> Vec<Value> {
        vec![
            Value::from_i64(42),
            Value::from_pod(7.5f32),
            Value::from_text("hello"),
            Value::Data(vec![]),
        ]
    }

    #[test]
    fn test_roundtrip_mixed_layout() {
        let layout = mixed_layout();
        let values = mixed_values();
        let blob = layout.encode(3, &[10, -20], 17, &values).unwrap();
        assert_eq!(blob.len(), layout.encoded_len(&values).unwrap());

        let rec = layout.decode(&blob).unwrap();
        assert_eq!(rec.dst_instance, 3);
        assert_eq!(rec.chunk_coords, vec![10, -20]);
        assert_eq!(rec.cell_pos, 17);
        assert_eq!(rec.values, values);
    }

    #[test]
    fn test_byte_layout_is_exact() {
        let layout = TupleLayout::new(
            1,
            vec![
                AttrSlot { nullable: true, fixed_size: Some(2) },
                AttrSlot { nullable: false, fixed_size: None },
            ],
        );
        let blob = layout
            .encode(0x0102_0304, &[-1], 5, &[Value::from_pod(0x0a0bu16), Value::from_text("ab")])
            .unwrap();
        let mut expected = vec![1u8, 0x04, 0x03, 0x02, 0x01];
        expected.extend_from_slice(&(-1i64).to_le_bytes());
        expected.extend_from_slice(&5i64.to_le_bytes());
        expected.extend_from_slice(&[0xff, 0x0b, 0x0a]);
        expected.extend_from_slice(&[2, 0, 0, 0, b'a', b'b']);
        assert_eq!(blob, expected);
    }

    #[test]
    fn test_null_contributes_only_the_missing_byte() {
        let layout = TupleLayout::new(
            0,
            vec![
                AttrSlot { nullable: true, fixed_size: Some(8) },
                AttrSlot { nullable: true, fixed_size: None },
            ],
        );
        let values = vec![Value::Null(0), Value::Null(5)];
        let blob = layout.encode(1, &[], 0, &values).unwrap();
        assert_eq!(blob.len(), prefix_len(0) + 2);
        assert_eq!(layout.decode(&blob).unwrap().values, values);
    }

    #[test]
    fn test_negative_missing_reason_is_rejected() {
        let layout = TupleLayout::new(0, vec![AttrSlot { nullable: true, fixed_size: Some(8) }]);
        assert!(matches!(
            layout.encode(0, &[], 0, &[Value::Null(-3)]),
            Err(RedimError::Internal(_))
        ));
        assert!(matches!(layout.encoded_len(&[Value::Null(-1)]), Err(RedimError::Internal(_))));
    }

    #[test]
    fn test_prefix_reads_at_odd_offsets() {
        // the 1-byte header leaves every coordinate unaligned
        let layout = TupleLayout::new(3, vec![]);
        let a = layout.encode(u32::MAX, &[i64::MIN, -1, i64::MAX], 0, &[]).unwrap();
        let b = layout.encode(u32::MAX, &[i64::MIN, -1, i64::MAX], 1, &[]).unwrap();
        let mut sub = vec![0u8];
        sub.extend_from_slice(&a);
        assert_eq!(compare(&sub[1..], &b).unwrap(), Ordering::Less);
        assert_eq!(compare_prefix_unchecked(&a, &b, 3, 4), Ordering::Equal);
        assert_eq!(fixed::<8>(&a, COORDS_OFFSET + COORD_SIZE), (-1i64).to_le_bytes());
    }

    #[test]
    fn test_zero_attributes_zero_dimensions() {
        let layout = TupleLayout::new(0, vec![]);
        let blob = layout.encode(9, &[], 123, &[]).unwrap();
        assert_eq!(blob.len(), 1 + 4 + 8);
        let rec = layout.decode(&blob).unwrap();
        assert_eq!(rec.dst_instance, 9);
        assert!(rec.chunk_coords.is_empty());
        assert_eq!(rec.cell_pos, 123);
        assert!(rec.values.is_empty());
    }

    #[test]
    fn test_encode_rejects_arity_and_width_mismatches() {
        let layout = mixed_layout();
        let mut values = mixed_values();
        values.pop();
        assert!(matches!(
            layout.encode(0, &[0, 0], 0, &values),
            Err(RedimError::Internal(_))
        ));

        let mut values = mixed_values();
        values[0] = Value::from_pod(1i32);
        assert!(matches!(
            layout.encode(0, &[0, 0], 0, &values),
            Err(RedimError::Internal(_))
        ));

        let mut values = mixed_values();
        values[3] = Value::null();
        assert!(layout.encode(0, &[0, 0], 0, &values).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_and_trailing_bytes() {
        let layout = mixed_layout();
        let blob = layout.encode(0, &[0, 0], 0, &mixed_values()).unwrap();
        assert!(layout.decode(&blob[..blob.len() - 1]).is_err());
        let mut longer = blob.clone();
        longer.push(0);
        assert!(layout.decode(&longer).is_err());
    }

    #[test]
    fn test_accessors_and_set_position() {
        let layout = mixed_layout();
        let mut blob = layout.encode(6, &[1, 2], 3, &mixed_values()).unwrap();
        assert_eq!(instance_id(&blob).unwrap(), 6);
        assert_eq!(cell_position(&blob).unwrap(), 3);
        set_position(&mut blob, 2, 99).unwrap();
        let rec = layout.decode(&blob).unwrap();
        assert_eq!(rec.cell_pos, 99);
        assert_eq!(rec.values, mixed_values());
    }

    #[test]
    fn test_order_ignores_attribute_payload() {
        let layout = mixed_layout();
        let mut other = mixed_values();
        other[2] = Value::from_text("a completely different payload");
        let a = layout.encode(1, &[5, 5], 5, &mixed_values()).unwrap();
        let b = layout.encode(1, &[5, 5], 5, &other).unwrap();
        assert!(equal(&a, &b).unwrap());
        assert!(!less(&a, &b).unwrap());
        assert!(!less(&b, &a).unwrap());
    }

    #[test]
    fn test_order_is_lexicographic_and_signed() {
        let layout = TupleLayout::new(2, vec![]);
        let t = |i, c0, c1, p| layout.encode(i, &[c0, c1], p, &[]).unwrap();
        assert!(less(&t(0, 100, 100, 100), &t(1, -100, -100, 0)).unwrap());
        assert!(less(&t(1, -5, 100, 100), &t(1, 0, -100, 0)).unwrap());
        assert!(less(&t(1, 0, -1, 100), &t(1, 0, 0, 0)).unwrap());
        assert!(less(&t(1, 0, 0, -3), &t(1, 0, 0, 2)).unwrap());
        assert!(!less(&t(1, 0, 0, 2), &t(1, 0, 0, 2)).unwrap());
    }

    #[test]
    fn test_mismatched_dimensionality_is_fatal() {
        let a = TupleLayout::new(1, vec![]).encode(0, &[0], 0, &[]).unwrap();
        let b = TupleLayout::new(2, vec![]).encode(0, &[0, 0], 0, &[]).unwrap();
        assert!(matches!(less(&a, &b), Err(RedimError::Internal(_))));
        assert!(matches!(equal(&a, &b), Err(RedimError::Internal(_))));
    }

    #[test]
    fn test_key_prefix_comparison() {
        let layout = TupleLayout::new(1, vec![]);
        let a = layout.encode(2, &[10], 1, &[]).unwrap();
        let b = layout.encode(2, &[10], 9, &[]).unwrap();
        assert_eq!(compare_prefix(&a, &b, 2).unwrap(), Ordering::Equal);
        assert_eq!(compare_prefix(&a, &b, 3).unwrap(), Ordering::Less);
        assert_eq!(compare_prefix(&a, &b, 1).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_sorting_shuffled_tuples_yields_positional_order() {
        let layout = TupleLayout::new(
            2,
            vec![AttrSlot { nullable: true, fixed_size: None }],
        );
        let mut expected = Vec::new();
        for inst in 0..3u32 {
            for c in [-10i64, 0, 10] {
                for p in 0..4i64 {
                    let payload = Value::from_text(&"x".repeat((p * 3 + c.rem_euclid(5)) as usize));
                    expected.push(layout.encode(inst, &[c, -c], p, &[payload]).unwrap());
                }
            }
        }
        let mut shuffled = expected.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(7));
        shuffled.sort_by(|a, b| compare(a, b).unwrap());
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn test_strict_weak_order_on_random_triples() {
        let layout = TupleLayout::new(1, vec![]);
        let pool: Vec<Vec<u8>> = (0..6)
            .flat_map(|i| (0..3).map(move |p| (i % 2, i / 2, p)))
            .map(|(inst, c, p)| layout.encode(inst as u32, &[c as i64], p as i64, &[]).unwrap())
            .collect();
        for a in &pool {
            assert!(!less(a, a).unwrap());
            for b in &pool {
                let ab = less(a, b).unwrap();
                let ba = less(b, a).unwrap();
                assert!(!(ab && ba));
                assert_eq!(!ab && !ba, equal(a, b).unwrap());
                for c in &pool {
                    if ab && less(b, c).unwrap() {
                        assert!(less(a, c).unwrap());
                    }
                }
            }
        }
    }
}
