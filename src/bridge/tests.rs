use super::*;
use crate::array::MemArray;
use crate::config::RedimConfig;
use crate::error::RedimError;
use crate::types::{ArraySchema, AttrType, AttributeDesc, DimensionDesc, Value};
use arrow::array::{Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use std::collections::BTreeMap;
use std::sync::Arc;

// Test Helpers
fn batch(fields: Vec<Field>, columns: Vec<ArrayRef>) -> RecordBatch {
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
}

fn i64_column<'b>(batch: &'b RecordBatch, name: &str) -> &'b Int64Array {
    batch.column_by_name(name).unwrap().as_primitive::<Int64Type>()
}

/// `row` is the source dimension; `(x, y)` is where the cell goes.
fn scatter_batch() -> RecordBatch {
    let rows: Vec<i64> = (0..12).collect();
    batch(
        vec![
            Field::new("row", DataType::Int64, false),
            Field::new("x", DataType::Int64, false),
            Field::new("y", DataType::Int64, false),
            Field::new("v", DataType::Float64, true),
        ],
        vec![
            Arc::new(Int64Array::from(rows.clone())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r % 4).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r / 4).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(
                rows.iter()
                    .map(|&r| if r == 5 { None } else { Some(r as f64 * 0.5) })
                    .collect::<Vec<_>>(),
            )),
        ],
    )
}

fn scatter_dst() -> ArraySchema {
    ArraySchema::new(
        "scatter",
        vec![
            AttributeDesc::new("v", AttrType::Float64, true),
            AttributeDesc::new("row", AttrType::Int64, false),
        ],
        vec![DimensionDesc::new("x", 0, 3, 2), DimensionDesc::new("y", 0, 2, 3)],
    )
}

fn check_scatter(out: &RecordBatch) {
    assert_eq!(out.num_rows(), 12);
    let schema = out.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["x", "y", "v", "row"]);

    let x = i64_column(out, "x");
    let y = i64_column(out, "y");
    let row = i64_column(out, "row");
    let v = out.column_by_name("v").unwrap().as_primitive::<Float64Type>();
    let mut seen = BTreeMap::new();
    for k in 0..out.num_rows() {
        let r = row.value(k);
        assert_eq!((x.value(k), y.value(k)), (r % 4, r / 4));
        if r == 5 {
            assert!(v.is_null(k));
        } else {
            assert_eq!(v.value(k), r as f64 * 0.5);
        }
        seen.insert(r, k);
    }
    assert_eq!(seen.len(), 12);
}

//==================================================================================
// Arrow Conversions
//==================================================================================

#[test]
fn test_batch_import_export_preserves_every_type() {
    let input = batch(
        vec![
            Field::new("i", DataType::Int32, false),
            Field::new("f", DataType::Float64, true),
            Field::new("s", DataType::Utf8, false),
            Field::new("b", DataType::Boolean, true),
            Field::new("raw", DataType::Binary, false),
        ],
        vec![
            Arc::new(Int32Array::from(vec![0, 1, 2])),
            Arc::new(Float64Array::from(vec![Some(1.5), None, Some(-2.0)])),
            Arc::new(StringArray::from(vec!["a", "", "ccc"])),
            Arc::new(BooleanArray::from(vec![Some(true), Some(false), None])),
            Arc::new(BinaryArray::from(vec![&b"\x00\x01"[..], &b""[..], &b"\xff"[..]])),
        ],
    );
    let schema =
        array_schema_for("typed", &input.schema(), vec![DimensionDesc::new("i", 0, 9, 10)]).unwrap();
    assert_eq!(schema.num_attributes(), 4);
    assert!(schema.attributes[0].nullable);

    let array = record_batch_to_array(&input, &schema).unwrap();
    assert_eq!(array.num_cells(), 3);
    let chunk = array.chunk(&[0]).unwrap();
    assert_eq!(chunk.column(1)[2], Value::from_text("ccc"));
    assert!(chunk.column(0)[1].is_null());

    let out = array_to_record_batch(&array).unwrap();
    assert_eq!(out.num_rows(), 3);
    assert_eq!(i64_column(&out, "i").values().to_vec(), vec![0, 1, 2]);
    for name in ["f", "s", "b", "raw"] {
        let exported: &dyn Array = &**out.column_by_name(name).unwrap();
        let original: &dyn Array = &**input.column_by_name(name).unwrap();
        assert_eq!(exported, original, "column {}", name);
    }
}

#[test]
fn test_import_rejects_bad_dimension_columns() {
    let input = batch(
        vec![Field::new("i", DataType::Float64, false), Field::new("v", DataType::Int64, false)],
        vec![
            Arc::new(Float64Array::from(vec![0.0])),
            Arc::new(Int64Array::from(vec![1])),
        ],
    );
    let schema = ArraySchema::new(
        "s",
        vec![AttributeDesc::new("v", AttrType::Int64, false)],
        vec![DimensionDesc::new("i", 0, 9, 10)],
    );
    assert!(matches!(
        record_batch_to_array(&input, &schema),
        Err(RedimError::SchemaMapping(_))
    ));

    let missing = array_schema_for("s", &input.schema(), vec![DimensionDesc::new("j", 0, 9, 10)]);
    assert!(matches!(missing, Err(RedimError::SchemaMapping(_))));
}

#[test]
fn test_import_rejects_nulls_in_non_nullable_attribute() {
    let input = batch(
        vec![Field::new("i", DataType::Int64, false), Field::new("v", DataType::Int64, true)],
        vec![
            Arc::new(Int64Array::from(vec![0, 1])),
            Arc::new(Int64Array::from(vec![Some(1), None])),
        ],
    );
    let schema = ArraySchema::new(
        "s",
        vec![AttributeDesc::new("v", AttrType::Int64, false)],
        vec![DimensionDesc::new("i", 0, 9, 10)],
    );
    assert!(matches!(
        record_batch_to_array(&input, &schema),
        Err(RedimError::SchemaMapping(_))
    ));
}

#[test]
fn test_import_rejects_out_of_bounds_rows() {
    let input = batch(
        vec![Field::new("i", DataType::Int64, false), Field::new("v", DataType::Int64, false)],
        vec![Arc::new(Int64Array::from(vec![10])), Arc::new(Int64Array::from(vec![1]))],
    );
    let schema =
        array_schema_for("s", &input.schema(), vec![DimensionDesc::new("i", 0, 9, 10)]).unwrap();
    assert!(matches!(
        record_batch_to_array(&input, &schema),
        Err(RedimError::OutOfBounds { value: 10, .. })
    ));
}

//==================================================================================
// Cluster Runs
//==================================================================================

#[test]
fn test_redimension_batch_on_three_workers() {
    let cluster = LocalCluster::new(3, RedimConfig::default()).unwrap();
    let out = redimension_batch(
        &scatter_batch(),
        vec![DimensionDesc::new("row", 0, 11, 4)],
        &scatter_dst(),
        &cluster,
    )
    .unwrap();
    check_scatter(&out);
}

#[test]
fn test_redimension_batch_with_tight_directives() {
    let out = redimension_batch_with_directives(
        &scatter_batch(),
        vec![DimensionDesc::new("row", 0, 11, 4)],
        &scatter_dst(),
        &["sorted_array_chunk_size=2", "sg_chunk_size_limit_bytes=100"],
    )
    .unwrap();
    check_scatter(&out);
}

#[test]
fn test_bad_directive_is_rejected_before_running() {
    let res = redimension_batch_with_directives(
        &scatter_batch(),
        vec![DimensionDesc::new("row", 0, 11, 4)],
        &scatter_dst(),
        &["sg_chunk_size_limit_bytes=0"],
    );
    assert!(matches!(res, Err(RedimError::Config(_))));
}

#[test]
fn test_synthetic_dimension_numbers_each_group() {
    let input = batch(
        vec![
            Field::new("i", DataType::Int64, false),
            Field::new("g", DataType::Int32, false),
            Field::new("name", DataType::Utf8, false),
        ],
        vec![
            Arc::new(Int64Array::from((0..7).collect::<Vec<i64>>())),
            Arc::new(Int32Array::from(vec![0, 1, 0, 0, 1, 0, 1])),
            Arc::new(StringArray::from(vec!["a", "b", "c", "d", "e", "f", "g"])),
        ],
    );
    let dst = ArraySchema::new(
        "numbered",
        vec![AttributeDesc::new("name", AttrType::String, false)],
        vec![DimensionDesc::new("g", 0, 1, 2), DimensionDesc::new("n", 0, 7, 8)],
    );
    let cluster = LocalCluster::new(2, RedimConfig::default()).unwrap();
    let out = redimension_batch(&input, vec![DimensionDesc::new("i", 0, 6, 2)], &dst, &cluster).unwrap();

    assert_eq!(out.num_rows(), 7);
    let g = i64_column(&out, "g");
    let n = i64_column(&out, "n");
    let mut per_group: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for k in 0..out.num_rows() {
        per_group.entry(g.value(k)).or_default().push(n.value(k));
    }
    for ns in per_group.values_mut() {
        ns.sort_unstable();
    }
    assert_eq!(per_group[&0], vec![0, 1, 2, 3]);
    assert_eq!(per_group[&1], vec![0, 1, 2]);
}

#[test]
fn test_cluster_reports_the_originating_failure() {
    // every row lands on x = 0
    let input = batch(
        vec![
            Field::new("i", DataType::Int64, false),
            Field::new("x", DataType::Int64, false),
        ],
        vec![
            Arc::new(Int64Array::from((0..8).collect::<Vec<i64>>())),
            Arc::new(Int64Array::from(vec![0; 8])),
        ],
    );
    let dst = ArraySchema::new("collide", vec![], vec![DimensionDesc::new("x", 0, 3, 4)]);
    let cluster = LocalCluster::new(2, RedimConfig::default()).unwrap();
    let err = redimension_batch(&input, vec![DimensionDesc::new("i", 0, 7, 2)], &dst, &cluster).unwrap_err();
    assert!(matches!(err.root_cause(), RedimError::DataCollision { position: 0, .. }));
    assert!(err.to_string().contains("merge"));
}

#[test]
fn test_cluster_rejects_bad_shapes() {
    assert!(matches!(
        LocalCluster::new(0, RedimConfig::default()),
        Err(RedimError::Config(_))
    ));

    let cluster = LocalCluster::new(2, RedimConfig::default()).unwrap();
    let schema = scatter_dst();
    let one = vec![MemArray::new(schema.clone()).unwrap()];
    assert!(matches!(cluster.run(&one, &schema), Err(RedimError::Config(_))));
}

#[test]
fn test_mapping_error_surfaces_from_every_worker() {
    let cluster = LocalCluster::new(2, RedimConfig::default()).unwrap();
    // destination attribute `w` has no source
    let dst = ArraySchema::new(
        "unsourced",
        vec![AttributeDesc::new("w", AttrType::Int64, false)],
        vec![DimensionDesc::new("x", 0, 3, 2), DimensionDesc::new("y", 0, 2, 3)],
    );
    let err = redimension_batch(
        &scatter_batch(),
        vec![DimensionDesc::new("row", 0, 11, 4)],
        &dst,
        &cluster,
    )
    .unwrap_err();
    assert!(matches!(err, RedimError::SchemaMapping(_)));
}
