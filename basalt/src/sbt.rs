use crate::backend::*;
use crate::error::PipelineError;
use crate::geometry::GeometryRecord;
use crate::maths::*;
use crate::usage::*;
use bytemuck::Contiguous;
use spark::vk;
use std::mem;

/// Upper bound on the path length setting, which sets the pipeline recursion depth.
pub const MAX_PATH_LENGTH_SETTING: u32 = 8;

const LIBRARY_EXPORTS: &[&str] = &[
    "MissShader",
    "ShadowMissShader",
    "ClosestHitShader",
    "AnyHitShader",
    "ShadowHitShader",
    "ShadowAnyHitShader",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayTracingPipelineKind {
    Interactive,
    Baking,
}

impl RayTracingPipelineKind {
    pub fn name(self) -> &'static str {
        match self {
            RayTracingPipelineKind::Interactive => "path-trace",
            RayTracingPipelineKind::Baking => "lightmap-bake",
        }
    }

    fn library(self) -> &'static str {
        match self {
            RayTracingPipelineKind::Interactive => "RayTrace",
            RayTracingPipelineKind::Baking => "BakeRayTrace",
        }
    }

    fn raygen_export(self) -> &'static str {
        match self {
            RayTracingPipelineKind::Interactive => "RaygenShader",
            RayTracingPipelineKind::Baking => "BakeRayGen",
        }
    }

    /// Attributes are triangle barycentrics. The payload is four floats of radiance and
    /// throughput plus four words of path state.
    pub fn pipeline_desc(self, layout: BindingLayout) -> RayTracingPipelineDesc {
        let mut exports = vec![self.raygen_export()];
        exports.extend_from_slice(LIBRARY_EXPORTS);

        let mut sub_objects = vec![PipelineSubObject::Library {
            name: self.library(),
            exports,
        }];
        sub_objects.extend(
            ShaderGroup::HIT_GROUPS
                .iter()
                .map(|group| PipelineSubObject::HitGroup(group.hit_group_desc())),
        );
        sub_objects.push(PipelineSubObject::ShaderConfig {
            max_payload_size: (4 * mem::size_of::<f32>() + 4 * mem::size_of::<u32>()) as u32,
            max_attribute_size: (2 * mem::size_of::<f32>()) as u32,
        });
        sub_objects.push(PipelineSubObject::GlobalBindingLayout(layout));
        sub_objects.push(PipelineSubObject::PipelineConfig {
            max_recursion_depth: MAX_PATH_LENGTH_SETTING,
        });

        RayTracingPipelineDesc {
            name: self.name(),
            sub_objects,
        }
    }
}

#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Contiguous)]
pub enum ShaderGroup {
    RayGenerator,
    Miss,
    ShadowMiss,
    HitGroup,
    AlphaTestHitGroup,
    ShadowHitGroup,
    ShadowAlphaTestHitGroup,
}

impl ShaderGroup {
    pub const HIT_GROUP_COUNT_PER_GEOMETRY: usize = 2;
    pub const MISS_GROUPS: [ShaderGroup; 2] = [ShaderGroup::Miss, ShaderGroup::ShadowMiss];
    pub const HIT_GROUPS: [ShaderGroup; 4] = [
        ShaderGroup::HitGroup,
        ShaderGroup::AlphaTestHitGroup,
        ShaderGroup::ShadowHitGroup,
        ShaderGroup::ShadowAlphaTestHitGroup,
    ];

    pub fn export_name(self, kind: RayTracingPipelineKind) -> &'static str {
        match self {
            ShaderGroup::RayGenerator => kind.raygen_export(),
            ShaderGroup::Miss => "MissShader",
            ShaderGroup::ShadowMiss => "ShadowMissShader",
            ShaderGroup::HitGroup => "HitGroup",
            ShaderGroup::AlphaTestHitGroup => "AlphaTestHitGroup",
            ShaderGroup::ShadowHitGroup => "ShadowHitGroup",
            ShaderGroup::ShadowAlphaTestHitGroup => "ShadowAlphaTestHitGroup",
        }
    }

    fn hit_group_desc(self) -> HitGroupDesc {
        let (closest_hit, any_hit) = match self {
            ShaderGroup::HitGroup => ("ClosestHitShader", None),
            ShaderGroup::AlphaTestHitGroup => ("ClosestHitShader", Some("AnyHitShader")),
            ShaderGroup::ShadowHitGroup => ("ShadowHitShader", None),
            ShaderGroup::ShadowAlphaTestHitGroup => ("ShadowHitShader", Some("ShadowAnyHitShader")),
            _ => unreachable!("{:?} is not a hit group", self),
        };
        HitGroupDesc {
            export_name: self.export_name(RayTracingPipelineKind::Interactive),
            closest_hit: Some(closest_hit),
            any_hit,
        }
    }

    pub fn is_shadow(self) -> bool {
        matches!(
            self,
            ShaderGroup::ShadowMiss | ShaderGroup::ShadowHitGroup | ShaderGroup::ShadowAlphaTestHitGroup
        )
    }

    pub fn is_alpha_test(self) -> bool {
        matches!(self, ShaderGroup::AlphaTestHitGroup | ShaderGroup::ShadowAlphaTestHitGroup)
    }
}

/// Two records per geometry: the primary ray hit group then its shadow ray counterpart, both
/// alpha tested unless the geometry is opaque.
pub fn hit_group_records(records: &[GeometryRecord]) -> Vec<ShaderGroup> {
    records
        .iter()
        .flat_map(|record| {
            if record.opaque() {
                [ShaderGroup::HitGroup, ShaderGroup::ShadowHitGroup]
            } else {
                [ShaderGroup::AlphaTestHitGroup, ShaderGroup::ShadowAlphaTestHitGroup]
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBindingRegion {
    pub offset: u32,
    pub stride: u32,
    pub size: u32,
}

impl ShaderBindingRegion {
    pub fn into_device_address_region(self, base_device_address: vk::DeviceAddress) -> vk::StridedDeviceAddressRegionKHR {
        vk::StridedDeviceAddressRegionKHR {
            device_address: base_device_address + self.offset as vk::DeviceSize,
            stride: self.stride as vk::DeviceSize,
            size: self.size as vk::DeviceSize,
        }
    }
}

pub struct ShaderTable {
    buffer: BufferId,
    region: ShaderBindingRegion,
    groups: Vec<ShaderGroup>,
}

impl ShaderTable {
    fn new(
        backend: &mut dyn Backend,
        identifiers: &[ShaderIdentifier],
        groups: Vec<ShaderGroup>,
    ) -> Self {
        let alignment = backend.shader_table_alignment();
        let stride = align_up(alignment.handle_size, alignment.handle_alignment);
        let region = ShaderBindingRegion {
            offset: 0,
            stride,
            size: stride * groups.len() as u32,
        };

        let mut data = vec![0u8; region.size as usize];
        for (record, group) in data.chunks_mut(stride as usize).zip(groups.iter()) {
            let handle = identifiers[group.into_integer()].as_bytes();
            record[..handle.len()].copy_from_slice(handle);
        }

        let buffer = backend.create_buffer(
            &BufferDesc::new(data.len()),
            BufferUsage::RAY_TRACING_SHADER_BINDING_TABLE,
        );
        backend.write_buffer(buffer, 0, &data);
        backend.buffer_barrier(
            buffer,
            BufferUsage::empty(),
            BufferUsage::RAY_TRACING_SHADER_BINDING_TABLE,
        );

        Self { buffer, region, groups }
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn groups(&self) -> &[ShaderGroup] {
        &self.groups
    }

    pub fn region(&self) -> ShaderBindingRegion {
        self.region
    }

    pub fn device_address_region(&self, backend: &dyn Backend) -> vk::StridedDeviceAddressRegionKHR {
        self.region
            .into_device_address_region(backend.buffer_device_address(self.buffer))
    }
}

/// Ray generation, miss and hit group tables for one pipeline, each in its own buffer.
pub struct ShaderBindingTable {
    pub raygen: ShaderTable,
    pub miss: ShaderTable,
    pub hit: ShaderTable,
}

impl ShaderBindingTable {
    pub fn new(
        backend: &mut dyn Backend,
        pipeline: PipelineId,
        kind: RayTracingPipelineKind,
        records: &[GeometryRecord],
    ) -> Result<Self, PipelineError> {
        let shader_group_count = 1 + ShaderGroup::MAX_VALUE;
        let mut identifiers = Vec::with_capacity(shader_group_count);
        for index in 0..shader_group_count {
            let group = ShaderGroup::from_integer(index).ok_or(PipelineError::Creation {
                name: kind.name(),
                reason: format!("invalid shader group index {}", index),
            })?;
            let export = group.export_name(kind);
            let identifier = backend
                .shader_identifier(pipeline, export)
                .ok_or(PipelineError::MissingExport {
                    name: kind.name(),
                    export,
                })?;
            identifiers.push(identifier);
        }

        let raygen = ShaderTable::new(backend, &identifiers, vec![ShaderGroup::RayGenerator]);
        let miss = ShaderTable::new(backend, &identifiers, ShaderGroup::MISS_GROUPS.to_vec());
        let hit = ShaderTable::new(backend, &identifiers, hit_group_records(records));
        Ok(Self { raygen, miss, hit })
    }

    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.raygen.buffer);
        backend.destroy_buffer(self.miss.buffer);
        backend.destroy_buffer(self.hit.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn random_records(rng: &mut SmallRng, count: usize) -> Vec<GeometryRecord> {
        (0..count)
            .map(|i| GeometryRecord {
                vertex_offset: 4 * i as u32,
                index_offset: 6 * i as u32,
                material_index: rng.gen_range(0..8),
                is_opaque: rng.gen_bool(0.7) as u32,
            })
            .collect()
    }

    #[test]
    fn hit_records_pair_primary_and_shadow() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for count in [0, 1, 2, 17, 100] {
            let records = random_records(&mut rng, count);
            let groups = hit_group_records(&records);
            assert_eq!(groups.len(), ShaderGroup::HIT_GROUP_COUNT_PER_GEOMETRY * records.len());
            for (i, record) in records.iter().enumerate() {
                let primary = groups[2 * i];
                let shadow = groups[2 * i + 1];
                assert!(!primary.is_shadow());
                assert!(shadow.is_shadow());
                assert_eq!(primary.is_alpha_test(), !record.opaque());
                assert_eq!(shadow.is_alpha_test(), primary.is_alpha_test());
            }
        }
    }

    #[test]
    fn pipeline_desc_differs_only_in_raygen() {
        let interactive = RayTracingPipelineKind::Interactive.pipeline_desc(BindingLayout::default());
        let baking = RayTracingPipelineKind::Baking.pipeline_desc(BindingLayout::default());
        let hit_groups = |desc: &RayTracingPipelineDesc| {
            desc.sub_objects
                .iter()
                .filter(|sub_object| matches!(sub_object, PipelineSubObject::HitGroup(_)))
                .cloned()
                .collect::<Vec<_>>()
        };
        assert_eq!(hit_groups(&interactive).len(), 4);
        assert_eq!(hit_groups(&interactive), hit_groups(&baking));
        match (&interactive.sub_objects[0], &baking.sub_objects[0]) {
            (
                PipelineSubObject::Library { exports: a, .. },
                PipelineSubObject::Library { exports: b, .. },
            ) => {
                assert!(a.contains(&"RaygenShader"));
                assert!(b.contains(&"BakeRayGen"));
                assert_eq!(a[1..], b[1..]);
            }
            _ => panic!("library must come first"),
        }
        assert!(interactive.sub_objects.contains(&PipelineSubObject::ShaderConfig {
            max_payload_size: 32,
            max_attribute_size: 8,
        }));
    }

    #[test]
    fn region_addresses_are_offset_from_base() {
        let region = ShaderBindingRegion {
            offset: 64,
            stride: 32,
            size: 96,
        };
        let address = region.into_device_address_region(0x10000);
        assert_eq!(address.device_address, 0x10040);
        assert_eq!(address.stride, 32);
        assert_eq!(address.size, 96);
    }
}
