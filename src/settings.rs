// In: src/settings.rs

//! Per-invocation settings derived once from the source schema, the destination
//! schema, the cluster context and the sizing config.
//!
//! `Settings` owns the field mapping (which source field feeds which destination
//! slot), the destination geometry and routing, the tuple layout, and every byte
//! ceiling the stages enforce. It is immutable after construction and shared by
//! reference across all stages of one worker.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;

use crate::config::RedimConfig;
use crate::error::RedimError;
use crate::layout::{ChunkDistribution, ChunkLayout};
use crate::tuple::codec::{prefix_len, TupleLayout};
use crate::types::{ArraySchema, AttrType, Coordinate, InstanceId, Position};

/// Assumed payload of a variable-size attribute when estimating tuple size.
const EST_VARIABLE_ATTR_BYTES: usize = 16;

//==================================================================================
// I. Field Mapping
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDestination {
    Attribute(usize),
    Dimension(usize),
    Unused,
}

/// Destination of one source field. A field that becomes a coordinate carries
/// the null filter: a null there drops the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub destination: FieldDestination,
    pub null_filter: bool,
}

impl FieldMapping {
    fn unused() -> Self {
        Self {
            destination: FieldDestination::Unused,
            null_filter: false,
        }
    }

    fn attribute(j: usize) -> Self {
        Self {
            destination: FieldDestination::Attribute(j),
            null_filter: false,
        }
    }

    fn dimension(k: usize) -> Self {
        Self {
            destination: FieldDestination::Dimension(k),
            null_filter: true,
        }
    }

    pub fn is_used(&self) -> bool {
        self.destination != FieldDestination::Unused
    }
}

//==================================================================================
// II. Cluster Context
//==================================================================================

/// Identity of this worker within the cluster and the routing shared by all.
#[derive(Clone)]
pub struct ClusterContext {
    pub instance_id: InstanceId,
    pub num_instances: u32,
    pub distribution: Arc<dyn ChunkDistribution>,
}

impl ClusterContext {
    pub fn new(
        instance_id: InstanceId,
        num_instances: u32,
        distribution: Arc<dyn ChunkDistribution>,
    ) -> Result<Self, RedimError> {
        if num_instances == 0 || instance_id >= num_instances {
            return Err(RedimError::Config(format!(
                "instance {} is not part of a {}-instance cluster",
                instance_id, num_instances
            )));
        }
        Ok(Self {
            instance_id,
            num_instances,
            distribution,
        })
    }
}

impl fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field("instance_id", &self.instance_id)
            .field("num_instances", &self.num_instances)
            .field("distribution", &self.distribution)
            .finish()
    }
}

//==================================================================================
// III. Settings
//==================================================================================

#[derive(Debug)]
pub struct Settings {
    input_schema: ArraySchema,
    output_schema: ArraySchema,
    output_layout: ChunkLayout,
    tuple_layout: TupleLayout,
    attr_mapping: Vec<FieldMapping>,
    dim_mapping: Vec<FieldMapping>,
    synthetic_dim: Option<usize>,
    cluster: ClusterContext,
    tupled_chunk_size: usize,
    est_tuple_size: usize,
    sort_buffer_bytes: usize,
    sort_chunk_size_limit: usize,
    sg_chunk_size_limit: usize,
    spill_dir: PathBuf,
}

impl Settings {
    pub fn new(
        input_schema: &ArraySchema,
        output_schema: &ArraySchema,
        cluster: ClusterContext,
        config: &RedimConfig,
    ) -> Result<Self, RedimError> {
        input_schema.validate()?;
        output_schema.validate()?;
        config.validate()?;

        let (attr_mapping, dim_mapping, synthetic_dim) = map_input_to_output(input_schema, output_schema)?;
        let tuple_layout = TupleLayout::from_schema(output_schema)?;

        let sort_buffer_bytes = to_usize(config.sort_buffer_bytes());
        let sort_chunk_size_limit = config
            .sort_chunk_size_limit_bytes
            .map_or(sort_buffer_bytes / 8, |v| to_usize(v.get()));
        let sg_chunk_size_limit = config
            .sg_chunk_size_limit_bytes
            .map_or(sort_buffer_bytes / 16, |v| to_usize(v.get()));
        let est_tuple_size = config
            .est_tuple_size_bytes
            .map_or_else(|| estimate_tuple_size(output_schema), |v| to_usize(v.get()));
        let tupled_chunk_size = match config.sorted_array_chunk_size {
            Some(v) => to_usize(v.get()),
            None => default_tupled_chunk_size(output_schema, est_tuple_size, sg_chunk_size_limit),
        };

        let settings = Self {
            input_schema: input_schema.clone(),
            output_schema: output_schema.clone(),
            output_layout: ChunkLayout::new(&output_schema.dimensions),
            tuple_layout,
            attr_mapping,
            dim_mapping,
            synthetic_dim,
            cluster,
            tupled_chunk_size,
            est_tuple_size,
            sort_buffer_bytes,
            sort_chunk_size_limit,
            sg_chunk_size_limit,
            spill_dir: config.spill_dir.clone().unwrap_or_else(std::env::temp_dir),
        };
        settings.log_settings();
        Ok(settings)
    }

    fn log_settings(&self) {
        let mapping: Vec<String> = self
            .attr_mapping
            .iter()
            .chain(&self.dim_mapping)
            .enumerate()
            .map(|(i, m)| format!("{} -> {:?}", i, m.destination))
            .collect();
        debug!(
            "redim tuple mapping {} synthetic {:?} tchunk {} est_tuple {} sort_limit {} sg_limit {}",
            mapping.join(" "),
            self.synthetic_dim,
            self.tupled_chunk_size,
            self.est_tuple_size,
            self.sort_chunk_size_limit,
            self.sg_chunk_size_limit
        );
    }

    // --- Schemas and mapping ---

    pub fn input_schema(&self) -> &ArraySchema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &ArraySchema {
        &self.output_schema
    }

    pub fn num_output_attrs(&self) -> usize {
        self.output_schema.num_attributes()
    }

    pub fn num_output_dims(&self) -> usize {
        self.output_schema.num_dimensions()
    }

    pub fn attr_mapping(&self) -> &[FieldMapping] {
        &self.attr_mapping
    }

    pub fn dim_mapping(&self) -> &[FieldMapping] {
        &self.dim_mapping
    }

    /// Index of the destination dimension whose values are assigned at write time.
    pub fn synthetic_dim(&self) -> Option<usize> {
        self.synthetic_dim
    }

    pub fn tuple_layout(&self) -> &TupleLayout {
        &self.tuple_layout
    }

    pub fn output_layout(&self) -> &ChunkLayout {
        &self.output_layout
    }

    // --- Cluster ---

    pub fn instance_id(&self) -> InstanceId {
        self.cluster.instance_id
    }

    pub fn num_instances(&self) -> u32 {
        self.cluster.num_instances
    }

    // --- Destination geometry ---

    pub fn chunk_position_for(&self, cell: &[Coordinate], chunk: &mut [Coordinate]) {
        self.output_layout.chunk_position_for(cell, chunk)
    }

    pub fn instance_for_chunk(&self, chunk: &[Coordinate]) -> InstanceId {
        self.cluster.distribution.instance_for_chunk(
            chunk,
            &self.output_schema.dimensions,
            self.cluster.num_instances,
        )
    }

    pub fn coord_to_position(&self, chunk: &[Coordinate], cell: &[Coordinate]) -> Position {
        self.output_layout.coord_to_position(chunk, cell)
    }

    pub fn position_to_coord(&self, chunk: &[Coordinate], pos: Position, cell: &mut [Coordinate]) {
        self.output_layout.position_to_coord(chunk, pos, cell)
    }

    // --- Sizing ---

    /// Tuples per transit chunk.
    pub fn tupled_chunk_size(&self) -> usize {
        self.tupled_chunk_size
    }

    pub fn est_tuple_size(&self) -> usize {
        self.est_tuple_size
    }

    pub fn sort_buffer_bytes(&self) -> usize {
        self.sort_buffer_bytes
    }

    pub fn sort_chunk_size_limit(&self) -> usize {
        self.sort_chunk_size_limit
    }

    pub fn sg_chunk_size_limit(&self) -> usize {
        self.sg_chunk_size_limit
    }

    pub fn spill_dir(&self) -> &PathBuf {
        &self.spill_dir
    }
}

//==================================================================================
// IV. Private Helpers
//==================================================================================

type Mapping = (Vec<FieldMapping>, Vec<FieldMapping>, Option<usize>);

/// Source attributes match destination attributes by name, then destination
/// dimensions. Source dimensions do the same. Each destination attribute needs
/// a source; at most one destination dimension may be left without one.
fn map_input_to_output(input: &ArraySchema, output: &ArraySchema) -> Result<Mapping, RedimError> {
    let mut attr_sourced = vec![false; output.num_attributes()];
    let mut dim_sourced = vec![false; output.num_dimensions()];

    // Names are unique across attributes and dimensions of a validated schema.
    let mut by_name: HashMap<&str, FieldDestination> =
        HashMap::with_capacity(output.num_attributes() + output.num_dimensions());
    for (k, d) in output.dimensions.iter().enumerate() {
        by_name.insert(d.name.as_str(), FieldDestination::Dimension(k));
    }
    for (j, a) in output.attributes.iter().enumerate() {
        by_name.insert(a.name.as_str(), FieldDestination::Attribute(j));
    }
    let lookup = |name: &str| by_name.get(name).copied().unwrap_or(FieldDestination::Unused);

    let mut attr_mapping = Vec::with_capacity(input.num_attributes());
    for src in &input.attributes {
        let mapping = match lookup(&src.name) {
            FieldDestination::Attribute(j) => {
                let dst = &output.attributes[j];
                if dst.attr_type != src.attr_type {
                    return Err(RedimError::SchemaMapping(format!(
                        "attribute '{}' is {} in the source but {} in the destination",
                        src.name, src.attr_type, dst.attr_type
                    )));
                }
                if src.nullable && !dst.nullable {
                    return Err(RedimError::SchemaMapping(format!(
                        "nullable attribute '{}' cannot feed a non-nullable destination",
                        src.name
                    )));
                }
                attr_sourced[j] = true;
                FieldMapping::attribute(j)
            }
            FieldDestination::Dimension(k) => {
                if !src.attr_type.converts_to_coordinate() {
                    return Err(RedimError::SchemaMapping(format!(
                        "attribute '{}' of type {} cannot become dimension coordinates",
                        src.name, src.attr_type
                    )));
                }
                dim_sourced[k] = true;
                FieldMapping::dimension(k)
            }
            FieldDestination::Unused => FieldMapping::unused(),
        };
        attr_mapping.push(mapping);
    }

    let mut dim_mapping = Vec::with_capacity(input.num_dimensions());
    for src in &input.dimensions {
        let destination = lookup(&src.name);
        match destination {
            FieldDestination::Attribute(j) => {
                let dst = &output.attributes[j];
                if dst.attr_type != AttrType::Int64 {
                    return Err(RedimError::SchemaMapping(format!(
                        "dimension '{}' can only feed an Int64 attribute, not {}",
                        src.name, dst.attr_type
                    )));
                }
                attr_sourced[j] = true;
            }
            FieldDestination::Dimension(k) => dim_sourced[k] = true,
            FieldDestination::Unused => {}
        }
        // source coordinates are never null
        dim_mapping.push(FieldMapping {
            destination,
            null_filter: false,
        });
    }

    if let Some(j) = attr_sourced.iter().position(|s| !s) {
        return Err(RedimError::SchemaMapping(format!(
            "destination attribute '{}' has no source field",
            output.attributes[j].name
        )));
    }

    let unsourced: Vec<usize> = (0..dim_sourced.len()).filter(|&k| !dim_sourced[k]).collect();
    match unsourced.as_slice() {
        [] => Ok((attr_mapping, dim_mapping, None)),
        [k] => Ok((attr_mapping, dim_mapping, Some(*k))),
        [first, second, ..] => Err(RedimError::Config(format!(
            "destination dimensions '{}' and '{}' both lack a source field; at most one may be synthetic",
            output.dimensions[*first].name, output.dimensions[*second].name
        ))),
    }
}

fn estimate_tuple_size(output: &ArraySchema) -> usize {
    let attrs: usize = output
        .attributes
        .iter()
        .map(|a| {
            usize::from(a.nullable)
                + a.attr_type
                    .fixed_size()
                    .unwrap_or(4 + EST_VARIABLE_ATTR_BYTES)
        })
        .sum();
    prefix_len(output.num_dimensions()) + attrs
}

/// `1_000_000` tuples, slightly reduced for wide schemas, then capped so a full
/// chunk of estimated tuples stays under the shuffle chunk ceiling.
fn default_tupled_chunk_size(output: &ArraySchema, est_tuple_size: usize, sg_limit: usize) -> usize {
    let width = (output.num_attributes() + output.num_dimensions() + 10) / 10;
    let by_width = 1_000_000 / width.max(1);
    let by_bytes = sg_limit / est_tuple_size.max(1);
    by_width.min(by_bytes).max(1)
}

fn to_usize(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::HashedDistribution;
    use crate::types::{AttributeDesc, DimensionDesc};

    fn cluster() -> ClusterContext {
        ClusterContext::new(0, 2, Arc::new(HashedDistribution)).unwrap()
    }

    fn input() -> ArraySchema {
        ArraySchema::new(
            "in",
            vec![
                AttributeDesc::new("x", AttrType::Int32, true),
                AttributeDesc::new("val", AttrType::Float64, true),
                AttributeDesc::new("junk", AttrType::String, false),
            ],
            vec![DimensionDesc::new("i", 0, 99, 10)],
        )
    }

    fn output() -> ArraySchema {
        ArraySchema::new(
            "out",
            vec![
                AttributeDesc::new("val", AttrType::Float64, true),
                AttributeDesc::new("i", AttrType::Int64, false),
            ],
            vec![DimensionDesc::new("x", -50, 49, 10), DimensionDesc::new("n", 0, 7, 8)],
        )
    }

    #[test]
    fn test_mapping_by_name_with_synthetic_dimension() {
        let s = Settings::new(&input(), &output(), cluster(), &RedimConfig::default()).unwrap();
        assert_eq!(
            s.attr_mapping(),
            &[
                FieldMapping::dimension(0),
                FieldMapping::attribute(0),
                FieldMapping::unused()
            ]
        );
        assert_eq!(s.dim_mapping()[0].destination, FieldDestination::Attribute(1));
        assert_eq!(s.synthetic_dim(), Some(1));
        assert!(s.attr_mapping()[0].null_filter);
    }

    #[test]
    fn test_unsourced_destination_attribute_is_rejected() {
        let mut out = output();
        out.attributes.push(AttributeDesc::new("extra", AttrType::Int8, true));
        let err = Settings::new(&input(), &out, cluster(), &RedimConfig::default()).unwrap_err();
        assert!(matches!(err, RedimError::SchemaMapping(_)));
    }

    #[test]
    fn test_two_unsourced_dimensions_is_a_config_error() {
        let mut out = output();
        out.dimensions.push(DimensionDesc::new("m", 0, 3, 4));
        let err = Settings::new(&input(), &out, cluster(), &RedimConfig::default()).unwrap_err();
        assert!(matches!(err, RedimError::Config(_)));
    }

    #[test]
    fn test_non_integral_attribute_cannot_become_a_dimension() {
        let mut inp = input();
        inp.attributes[0].attr_type = AttrType::Float32;
        let err = Settings::new(&inp, &output(), cluster(), &RedimConfig::default()).unwrap_err();
        assert!(matches!(err, RedimError::SchemaMapping(_)));

        inp.attributes[0].attr_type = AttrType::UInt64;
        let err = Settings::new(&inp, &output(), cluster(), &RedimConfig::default()).unwrap_err();
        assert!(matches!(err, RedimError::SchemaMapping(_)));
    }

    #[test]
    fn test_nullable_to_non_nullable_narrowing_is_rejected() {
        let mut out = output();
        out.attributes[0].nullable = false;
        let err = Settings::new(&input(), &out, cluster(), &RedimConfig::default()).unwrap_err();
        assert!(matches!(err, RedimError::SchemaMapping(_)));
    }

    #[test]
    fn test_sizing_defaults_and_overrides() {
        let s = Settings::new(&input(), &output(), cluster(), &RedimConfig::default()).unwrap();
        assert_eq!(s.sort_buffer_bytes(), 128 << 20);
        assert_eq!(s.sort_chunk_size_limit(), 16 << 20);
        assert_eq!(s.sg_chunk_size_limit(), 8 << 20);
        // header(1 + 4 + 2*8 + 8) + nullable f64 (1 + 8) + i64 (8)
        assert_eq!(s.est_tuple_size(), 46);
        assert_eq!(s.tupled_chunk_size(), (8 << 20) / 46);

        let config = RedimConfig::from_directives(&[
            "sorted_array_chunk_size=10",
            "sg_chunk_size_limit_bytes=4096",
            "est_tuple_size_bytes=100",
        ])
        .unwrap();
        let s = Settings::new(&input(), &output(), cluster(), &config).unwrap();
        assert_eq!(s.tupled_chunk_size(), 10);
        assert_eq!(s.sg_chunk_size_limit(), 4096);
        assert_eq!(s.est_tuple_size(), 100);
    }

    #[test]
    fn test_default_chunk_size_shrinks_for_wide_schemas() {
        let narrow = output();
        assert_eq!(default_tupled_chunk_size(&narrow, 1, usize::MAX), 1_000_000);
        let mut wide = output();
        for n in 0..8 {
            wide.attributes.push(AttributeDesc::new(&format!("a{}", n), AttrType::Int8, false));
        }
        assert_eq!(default_tupled_chunk_size(&wide, 1, usize::MAX), 500_000);
        assert_eq!(default_tupled_chunk_size(&wide, 1000, 10), 1);
    }

    #[test]
    fn test_cluster_context_rejects_foreign_instance() {
        assert!(ClusterContext::new(2, 2, Arc::new(HashedDistribution)).is_err());
        assert!(ClusterContext::new(0, 0, Arc::new(HashedDistribution)).is_err());
    }
}
