//! This module defines the canonical, type-safe representation of attribute
//! types used throughout the redim pipeline.

use crate::error::RedimError;
use arrow_schema::DataType as ArrowDataType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The canonical, internal representation of an attribute's data type.
///
/// The tuple codec never stores type tags. All it needs from a type is whether
/// it is fixed-size (and how wide) or variable-size, which `fixed_size` answers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttrType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Boolean,
    String,
    Binary,
}

impl AttrType {
    /// Converts an Arrow `DataType` into an `AttrType`.
    pub fn from_arrow_type(arrow_type: &ArrowDataType) -> Result<Self, RedimError> {
        match arrow_type {
            ArrowDataType::Int8 => Ok(Self::Int8),
            ArrowDataType::Int16 => Ok(Self::Int16),
            ArrowDataType::Int32 => Ok(Self::Int32),
            ArrowDataType::Int64 => Ok(Self::Int64),
            ArrowDataType::UInt8 => Ok(Self::UInt8),
            ArrowDataType::UInt16 => Ok(Self::UInt16),
            ArrowDataType::UInt32 => Ok(Self::UInt32),
            ArrowDataType::UInt64 => Ok(Self::UInt64),
            ArrowDataType::Float32 => Ok(Self::Float32),
            ArrowDataType::Float64 => Ok(Self::Float64),
            ArrowDataType::Boolean => Ok(Self::Boolean),
            ArrowDataType::Utf8 => Ok(Self::String),
            ArrowDataType::Binary => Ok(Self::Binary),
            dt => Err(RedimError::SchemaMapping(format!(
                "Cannot convert Arrow type {:?} to an attribute type",
                dt
            ))),
        }
    }

    /// Converts an `AttrType` back into an Arrow `DataType`.
    pub fn to_arrow_type(&self) -> ArrowDataType {
        match self {
            Self::Int8 => ArrowDataType::Int8,
            Self::Int16 => ArrowDataType::Int16,
            Self::Int32 => ArrowDataType::Int32,
            Self::Int64 => ArrowDataType::Int64,
            Self::UInt8 => ArrowDataType::UInt8,
            Self::UInt16 => ArrowDataType::UInt16,
            Self::UInt32 => ArrowDataType::UInt32,
            Self::UInt64 => ArrowDataType::UInt64,
            Self::Float32 => ArrowDataType::Float32,
            Self::Float64 => ArrowDataType::Float64,
            Self::Boolean => ArrowDataType::Boolean,
            Self::String => ArrowDataType::Utf8,
            Self::Binary => ArrowDataType::Binary,
        }
    }

    /// Width in bytes of a fixed-size type, `None` for variable-size types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Int8 | Self::UInt8 | Self::Boolean => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 => Some(8),
            Self::String | Self::Binary => None,
        }
    }

    /// Returns `true` if the type is an integer type.
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    /// Returns `true` if a value of this type can always become a signed 64-bit
    /// coordinate. UInt64 is the only integral type that cannot.
    pub fn converts_to_coordinate(&self) -> bool {
        self.is_integral() && *self != Self::UInt64
    }
}

/// Provides the canonical string representation for an `AttrType`.
impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_roundtrip_for_all_types() {
        let all = [
            AttrType::Int8,
            AttrType::Int16,
            AttrType::Int32,
            AttrType::Int64,
            AttrType::UInt8,
            AttrType::UInt16,
            AttrType::UInt32,
            AttrType::UInt64,
            AttrType::Float32,
            AttrType::Float64,
            AttrType::Boolean,
            AttrType::String,
            AttrType::Binary,
        ];
        for t in all {
            assert_eq!(AttrType::from_arrow_type(&t.to_arrow_type()).unwrap(), t);
        }
    }

    #[test]
    fn test_unsupported_arrow_type_is_rejected() {
        let res = AttrType::from_arrow_type(&ArrowDataType::Date32);
        assert!(matches!(res, Err(RedimError::SchemaMapping(_))));
    }

    #[test]
    fn test_coordinate_conversion_excludes_uint64() {
        assert!(AttrType::Int32.converts_to_coordinate());
        assert!(AttrType::UInt32.converts_to_coordinate());
        assert!(!AttrType::UInt64.converts_to_coordinate());
        assert!(!AttrType::Float64.converts_to_coordinate());
        assert_eq!(AttrType::String.fixed_size(), None);
    }
}
