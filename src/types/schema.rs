//! Array schema objects: the shape of a source or destination array.
//!
//! In a full array database these live in the catalog. The core only needs
//! names, types, nullability and dimension bounds, so a plain serde-friendly
//! description is enough.

use serde::{Deserialize, Serialize};

use crate::error::RedimError;
use crate::types::{AttrType, Coordinate};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AttributeDesc {
    pub name: String,
    pub attr_type: AttrType,
    pub nullable: bool,
}

impl AttributeDesc {
    pub fn new(name: &str, attr_type: AttrType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            attr_type,
            nullable,
        }
    }
}

/// A dimension with inclusive bounds `[start, end]` cut into chunks of
/// `chunk_interval` cells.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DimensionDesc {
    pub name: String,
    pub start: Coordinate,
    pub end: Coordinate,
    pub chunk_interval: i64,
}

impl DimensionDesc {
    pub fn new(name: &str, start: Coordinate, end: Coordinate, chunk_interval: i64) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
            chunk_interval,
        }
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        c >= self.start && c <= self.end
    }

    /// Number of coordinates in `[start, end]`, saturating at `i64::MAX` for
    /// open-ended dimensions.
    pub fn length(&self) -> i64 {
        self.end
            .checked_sub(self.start)
            .map_or(i64::MAX, |span| span.saturating_add(1))
    }

    /// Zero-based chunk number of the chunk holding `c`.
    pub fn chunk_number(&self, c: Coordinate) -> i64 {
        let n = (i128::from(c) - i128::from(self.start)).div_euclid(i128::from(self.chunk_interval));
        n.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// First coordinate of the chunk holding `c`.
    pub fn chunk_origin(&self, c: Coordinate) -> Coordinate {
        let offset = (i128::from(c) - i128::from(self.start)).rem_euclid(i128::from(self.chunk_interval));
        (i128::from(c) - offset) as i64
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArraySchema {
    pub name: String,
    pub attributes: Vec<AttributeDesc>,
    pub dimensions: Vec<DimensionDesc>,
}

impl ArraySchema {
    pub fn new(name: &str, attributes: Vec<AttributeDesc>, dimensions: Vec<DimensionDesc>) -> Self {
        Self {
            name: name.to_string(),
            attributes,
            dimensions,
        }
    }

    pub fn num_attributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    /// Number of cells in one full chunk.
    pub fn chunk_volume(&self) -> Result<usize, RedimError> {
        self.dimensions.iter().try_fold(1usize, |acc, d| {
            usize::try_from(d.chunk_interval)
                .ok()
                .and_then(|i| acc.checked_mul(i))
                .ok_or_else(|| {
                    RedimError::Config(format!(
                        "chunk volume of array '{}' overflows",
                        self.name
                    ))
                })
        })
    }

    /// Rejects malformed dimension declarations and duplicate field names.
    pub fn validate(&self) -> Result<(), RedimError> {
        if self.dimensions.len() > u8::MAX as usize {
            return Err(RedimError::Config(format!(
                "array '{}' declares {} dimensions, at most {} are supported",
                self.name,
                self.dimensions.len(),
                u8::MAX
            )));
        }
        for d in &self.dimensions {
            if d.chunk_interval <= 0 {
                return Err(RedimError::Config(format!(
                    "dimension '{}' has non-positive chunk interval {}",
                    d.name, d.chunk_interval
                )));
            }
            if d.start > d.end {
                return Err(RedimError::Config(format!(
                    "dimension '{}' has start {} past end {}",
                    d.name, d.start, d.end
                )));
            }
        }
        let mut names: Vec<&str> = self
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.dimensions.iter().map(|d| d.name.as_str()))
            .collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(RedimError::Config(format!(
                "array '{}' declares '{}' more than once",
                self.name, w[0]
            )));
        }
        self.chunk_volume().map(|_| ())
    }
}
