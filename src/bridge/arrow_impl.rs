// In: src/bridge/arrow_impl.rs

//! Conversions between Arrow `RecordBatch`es and in-memory arrays.
//!
//! A batch is read as one row per cell: the columns named after the array's
//! dimensions hold the coordinates, the columns named after its attributes hold
//! the values. Export writes the dimension columns first (Int64, non-null) and
//! the attribute columns after them.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Int64Array, PrimitiveArray, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Field, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    Schema, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;

use crate::array::MemArray;
use crate::error::RedimError;
use crate::types::{ArraySchema, AttrType, AttributeDesc, DimensionDesc, Value};

//==================================================================================
// 1. Schema
//==================================================================================

/// Builds an array schema for `batch_schema`: the columns named by `dimensions`
/// become the dimensions, every other column an attribute.
pub fn array_schema_for(
    name: &str,
    batch_schema: &Schema,
    dimensions: Vec<DimensionDesc>,
) -> Result<ArraySchema, RedimError> {
    let mut attributes = Vec::new();
    for field in batch_schema.fields() {
        if dimensions.iter().any(|d| &d.name == field.name()) {
            continue;
        }
        attributes.push(AttributeDesc::new(
            field.name(),
            AttrType::from_arrow_type(field.data_type())?,
            field.is_nullable(),
        ));
    }
    for dim in &dimensions {
        if batch_schema.index_of(&dim.name).is_err() {
            return Err(RedimError::SchemaMapping(format!(
                "dimension '{}' has no column in the batch",
                dim.name
            )));
        }
    }
    let schema = ArraySchema::new(name, attributes, dimensions);
    schema.validate()?;
    Ok(schema)
}

/// The Arrow schema `array_to_record_batch` produces for `schema`.
pub fn arrow_schema_for(schema: &ArraySchema) -> Schema {
    let mut fields: Vec<Field> = schema
        .dimensions
        .iter()
        .map(|d| Field::new(&d.name, DataType::Int64, false))
        .collect();
    fields.extend(
        schema
            .attributes
            .iter()
            .map(|a| Field::new(&a.name, a.attr_type.to_arrow_type(), a.nullable)),
    );
    Schema::new(fields)
}

//==================================================================================
// 2. Import
//==================================================================================

fn column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b ArrayRef, RedimError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RedimError::SchemaMapping(format!("batch has no column '{}'", name)))
}

macro_rules! read_primitive {
    ($array:expr, $row:expr, $T:ty) => {{
        let typed = $array
            .as_primitive_opt::<$T>()
            .ok_or_else(|| RedimError::Internal("column downcast failed".into()))?;
        Value::from_pod(typed.value($row))
    }};
}

fn read_value(array: &dyn Array, row: usize, ty: AttrType) -> Result<Value, RedimError> {
    if array.is_null(row) {
        return Ok(Value::null());
    }
    let value = match ty {
        AttrType::Int8 => read_primitive!(array, row, Int8Type),
        AttrType::Int16 => read_primitive!(array, row, Int16Type),
        AttrType::Int32 => read_primitive!(array, row, Int32Type),
        AttrType::Int64 => read_primitive!(array, row, Int64Type),
        AttrType::UInt8 => read_primitive!(array, row, UInt8Type),
        AttrType::UInt16 => read_primitive!(array, row, UInt16Type),
        AttrType::UInt32 => read_primitive!(array, row, UInt32Type),
        AttrType::UInt64 => read_primitive!(array, row, UInt64Type),
        AttrType::Float32 => read_primitive!(array, row, Float32Type),
        AttrType::Float64 => read_primitive!(array, row, Float64Type),
        AttrType::Boolean => {
            let typed = array
                .as_boolean_opt()
                .ok_or_else(|| RedimError::Internal("column downcast failed".into()))?;
            Value::from_bool(typed.value(row))
        }
        AttrType::String => {
            let typed = array
                .as_string_opt::<i32>()
                .ok_or_else(|| RedimError::Internal("column downcast failed".into()))?;
            Value::from_text(typed.value(row))
        }
        AttrType::Binary => {
            let typed = array
                .as_binary_opt::<i32>()
                .ok_or_else(|| RedimError::Internal("column downcast failed".into()))?;
            Value::Data(typed.value(row).to_vec())
        }
    };
    Ok(value)
}

/// Loads `batch` into a fresh array with `schema`. Coordinate columns may be
/// of any signed or narrow unsigned integer type and must not hold nulls.
pub fn record_batch_to_array(batch: &RecordBatch, schema: &ArraySchema) -> Result<MemArray, RedimError> {
    let mut coords: Vec<Int64Array> = Vec::with_capacity(schema.num_dimensions());
    for dim in &schema.dimensions {
        let col = column(batch, &dim.name)?;
        if !AttrType::from_arrow_type(col.data_type())?.converts_to_coordinate() {
            return Err(RedimError::SchemaMapping(format!(
                "dimension column '{}' has non-coordinate type {}",
                dim.name,
                col.data_type()
            )));
        }
        if col.null_count() > 0 {
            return Err(RedimError::SchemaMapping(format!(
                "dimension column '{}' contains nulls",
                dim.name
            )));
        }
        let wide = cast(col, &DataType::Int64)?;
        coords.push(wide.as_primitive::<Int64Type>().clone());
    }

    let mut attrs: Vec<&ArrayRef> = Vec::with_capacity(schema.num_attributes());
    for attr in &schema.attributes {
        let col = column(batch, &attr.name)?;
        if col.data_type() != &attr.attr_type.to_arrow_type() {
            return Err(RedimError::SchemaMapping(format!(
                "column '{}' is {}, attribute expects {}",
                attr.name,
                col.data_type(),
                attr.attr_type
            )));
        }
        if !attr.nullable && col.null_count() > 0 {
            return Err(RedimError::SchemaMapping(format!(
                "non-nullable attribute '{}' received nulls",
                attr.name
            )));
        }
        attrs.push(col);
    }

    let mut array = MemArray::new(schema.clone())?;
    let mut cell = vec![0; schema.num_dimensions()];
    for row in 0..batch.num_rows() {
        for (k, c) in coords.iter().enumerate() {
            cell[k] = c.value(row);
        }
        let values = attrs
            .iter()
            .zip(&schema.attributes)
            .map(|(col, attr)| read_value(*col, row, attr.attr_type))
            .collect::<Result<Vec<_>, _>>()?;
        array.write_cell(&cell, values)?;
    }
    Ok(array)
}

//==================================================================================
// 3. Export
//==================================================================================

macro_rules! write_primitive {
    ($values:expr, $T:ty) => {{
        let data = $values
            .map(|v| match v {
                Value::Null(_) => Ok(None),
                v => v.as_pod::<<$T as ArrowPrimitiveType>::Native>().map(Some),
            })
            .collect::<Result<Vec<_>, RedimError>>()?;
        Arc::new(PrimitiveArray::<$T>::from(data)) as ArrayRef
    }};
}

fn attribute_column<'v>(
    values: impl Iterator<Item = &'v Value>,
    ty: AttrType,
) -> Result<ArrayRef, RedimError> {
    let column = match ty {
        AttrType::Int8 => write_primitive!(values, Int8Type),
        AttrType::Int16 => write_primitive!(values, Int16Type),
        AttrType::Int32 => write_primitive!(values, Int32Type),
        AttrType::Int64 => write_primitive!(values, Int64Type),
        AttrType::UInt8 => write_primitive!(values, UInt8Type),
        AttrType::UInt16 => write_primitive!(values, UInt16Type),
        AttrType::UInt32 => write_primitive!(values, UInt32Type),
        AttrType::UInt64 => write_primitive!(values, UInt64Type),
        AttrType::Float32 => write_primitive!(values, Float32Type),
        AttrType::Float64 => write_primitive!(values, Float64Type),
        AttrType::Boolean => {
            let data: Vec<Option<bool>> = values
                .map(|v| match v {
                    Value::Null(_) => None,
                    v => Some(v.data().first().is_some_and(|&b| b != 0)),
                })
                .collect();
            Arc::new(BooleanArray::from(data)) as ArrayRef
        }
        AttrType::String => {
            let data = values
                .map(|v| match v {
                    Value::Null(_) => Ok(None),
                    v => std::str::from_utf8(v.data())
                        .map(Some)
                        .map_err(|e| RedimError::Internal(format!("string attribute is not UTF-8: {}", e))),
                })
                .collect::<Result<Vec<Option<&str>>, RedimError>>()?;
            Arc::new(StringArray::from(data)) as ArrayRef
        }
        AttrType::Binary => {
            let data: Vec<Option<&[u8]>> = values
                .map(|v| match v {
                    Value::Null(_) => None,
                    v => Some(v.data()),
                })
                .collect();
            Arc::new(BinaryArray::from(data)) as ArrayRef
        }
    };
    Ok(column)
}

/// Exports every cell of `array` as one row, in chunk then position order.
pub fn array_to_record_batch(array: &MemArray) -> Result<RecordBatch, RedimError> {
    let schema = array.schema();
    let cells = array.cells();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.num_dimensions() + schema.num_attributes());
    for k in 0..schema.num_dimensions() {
        let coords: Vec<i64> = cells.iter().map(|(cell, _)| cell[k]).collect();
        columns.push(Arc::new(Int64Array::from(coords)));
    }
    for (k, attr) in schema.attributes.iter().enumerate() {
        columns.push(attribute_column(cells.iter().map(|(_, v)| &v[k]), attr.attr_type)?);
    }
    Ok(RecordBatch::try_new(Arc::new(arrow_schema_for(schema)), columns)?)
}
