//! The owned cell payload carried by source arrays, tuples and output arrays.

use bytemuck::Pod;
use num_traits::ToPrimitive;

use crate::error::RedimError;
use crate::types::{AttrType, Coordinate};

/// The marker stored in a nullable slot when the value is present.
pub const NOT_MISSING: i8 = -1;

/// A single attribute value: either raw little-endian bytes or a null with a
/// "missing reason" code in `0..=127`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null(i8),
    Data(Vec<u8>),
}

impl Value {
    /// The default null (missing reason 0).
    pub fn null() -> Self {
        Value::Null(0)
    }

    pub fn null_with_reason(reason: u8) -> Result<Self, RedimError> {
        i8::try_from(reason)
            .map(Value::Null)
            .map_err(|_| RedimError::Internal(format!("missing reason {} out of range", reason)))
    }

    /// Wraps any plain-old-data scalar.
    pub fn from_pod<T: Pod>(v: T) -> Self {
        Value::Data(bytemuck::bytes_of(&v).to_vec())
    }

    pub fn from_i64(v: i64) -> Self {
        Self::from_pod(v)
    }

    pub fn from_bool(v: bool) -> Self {
        Value::Data(vec![v as u8])
    }

    pub fn from_text(v: &str) -> Self {
        Value::Data(v.as_bytes().to_vec())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// The byte written into a nullable slot: the reason for nulls, -1 otherwise.
    pub fn missing_reason(&self) -> i8 {
        match self {
            Value::Null(reason) => *reason,
            Value::Data(_) => NOT_MISSING,
        }
    }

    /// Payload size in bytes; zero for nulls.
    pub fn size(&self) -> usize {
        self.data().len()
    }

    pub fn data(&self) -> &[u8] {
        match self {
            Value::Null(_) => &[],
            Value::Data(bytes) => bytes,
        }
    }

    /// Reads the payload back as a scalar of type `T`.
    pub fn as_pod<T: Pod>(&self) -> Result<T, RedimError> {
        match self {
            Value::Null(_) => Err(RedimError::Internal("scalar read of a null value".into())),
            Value::Data(bytes) => Ok(bytemuck::try_pod_read_unaligned(bytes)?),
        }
    }

    pub fn as_i64(&self) -> Result<i64, RedimError> {
        self.as_pod::<i64>()
    }

    /// Interprets the payload as an integral value of type `ty` and widens it to
    /// a coordinate.
    pub fn to_coordinate(&self, ty: AttrType) -> Result<Coordinate, RedimError> {
        let wide = match ty {
            AttrType::Int8 => self.as_pod::<i8>()?.to_i64(),
            AttrType::Int16 => self.as_pod::<i16>()?.to_i64(),
            AttrType::Int32 => self.as_pod::<i32>()?.to_i64(),
            AttrType::Int64 => self.as_pod::<i64>()?.to_i64(),
            AttrType::UInt8 => self.as_pod::<u8>()?.to_i64(),
            AttrType::UInt16 => self.as_pod::<u16>()?.to_i64(),
            AttrType::UInt32 => self.as_pod::<u32>()?.to_i64(),
            AttrType::UInt64 => self.as_pod::<u64>()?.to_i64(),
            other => {
                return Err(RedimError::SchemaMapping(format!(
                    "type {} cannot be used as a coordinate",
                    other
                )))
            }
        };
        wide.ok_or_else(|| RedimError::SchemaMapping("coordinate does not fit in Int64".into()))
    }
}
