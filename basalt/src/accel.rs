use crate::backend::*;
use crate::error::AccelError;
use crate::geometry::*;
use crate::maths::*;
use crate::usage::*;
use bytemuck::{Pod, Zeroable};
use log::info;
use spark::vk;
use std::mem;

// vk::AccelerationStructureInstanceKHR with Pod trait
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct AccelerationStructureInstance {
    pub transform: TransposedTransform3,
    pub instance_custom_index_and_mask: u32,
    pub instance_shader_binding_table_record_offset_and_flags: u32,
    pub acceleration_structure_reference: u64,
}

impl AccelerationStructureInstance {
    pub fn new(transform: TransposedTransform3, mask: u8, bottom_level_address: vk::DeviceAddress) -> Self {
        Self {
            transform,
            instance_custom_index_and_mask: (mask as u32) << 24,
            instance_shader_binding_table_record_offset_and_flags: 0,
            acceleration_structure_reference: bottom_level_address,
        }
    }

    pub fn mask(&self) -> u8 {
        (self.instance_custom_index_and_mask >> 24) as u8
    }
}

/// The bottom and top level acceleration structures for a model, plus the geometry records
/// that hit shaders index by geometry.
pub struct SceneAccel {
    bottom_level: BufferId,
    top_level: BufferId,
    geometry_buffer: BufferId,
    records: Vec<GeometryRecord>,
    build_frame: u64,
}

impl SceneAccel {
    pub const INSTANCE_MASK: u8 = 1;
    pub const BUILD_TIMESTAMP: &'static str = "accel-build";

    fn query_sizes(
        backend: &dyn Backend,
        inputs: &AccelerationStructureInputs,
    ) -> Result<vk::AccelerationStructureBuildSizesInfoKHR, AccelError> {
        let sizes = backend.acceleration_structure_build_sizes(inputs);
        if sizes.acceleration_structure_size == 0 {
            return Err(AccelError::ZeroPrebuildSize(inputs.level()));
        }
        info!(
            "{:?} level: build scratch size: {}, acceleration structure size: {}",
            inputs.level(),
            sizes.build_scratch_size,
            sizes.acceleration_structure_size
        );
        Ok(sizes)
    }

    /// Builds the bottom level over every geometry, then a top level with a single instance of it.
    /// Scratch memory is shared between the two builds and freed before returning.
    pub fn build(backend: &mut dyn Backend, descriptors: &GeometryDescriptors) -> Result<Self, AccelError> {
        if descriptors.is_empty() {
            return Err(AccelError::EmptyScene);
        }

        let bottom_inputs = AccelerationStructureInputs::BottomLevel {
            geometries: &descriptors.geometries,
        };
        let top_inputs = AccelerationStructureInputs::TopLevel { instance_count: 1 };
        let bottom_sizes = Self::query_sizes(backend, &bottom_inputs)?;
        let top_sizes = Self::query_sizes(backend, &top_inputs)?;

        backend.begin_timestamp(Self::BUILD_TIMESTAMP);

        let scratch_size = bottom_sizes.build_scratch_size.max(top_sizes.build_scratch_size);
        let scratch = backend.create_buffer(
            &BufferDesc::new(scratch_size as usize),
            BufferUsage::ACCELERATION_STRUCTURE_BUILD_SCRATCH,
        );
        backend.buffer_barrier(
            scratch,
            BufferUsage::empty(),
            BufferUsage::ACCELERATION_STRUCTURE_BUILD_SCRATCH,
        );

        let bottom_level = backend.create_buffer(
            &BufferDesc::new(bottom_sizes.acceleration_structure_size as usize),
            BufferUsage::ACCELERATION_STRUCTURE_WRITE | BufferUsage::ACCELERATION_STRUCTURE_READ,
        );
        backend.buffer_barrier(
            bottom_level,
            BufferUsage::empty(),
            BufferUsage::ACCELERATION_STRUCTURE_WRITE,
        );
        backend.build_acceleration_structure(&AccelerationStructureBuild {
            inputs: bottom_inputs,
            instance_buffer: None,
            destination: bottom_level,
            scratch,
        });

        // the top level build reads the bottom level and reuses the scratch memory
        backend.buffer_barrier(
            bottom_level,
            BufferUsage::ACCELERATION_STRUCTURE_WRITE,
            BufferUsage::ACCELERATION_STRUCTURE_READ,
        );
        backend.buffer_barrier(
            scratch,
            BufferUsage::ACCELERATION_STRUCTURE_BUILD_SCRATCH,
            BufferUsage::ACCELERATION_STRUCTURE_BUILD_SCRATCH,
        );

        let instance = AccelerationStructureInstance::new(
            TransposedTransform3::identity(),
            Self::INSTANCE_MASK,
            backend.buffer_device_address(bottom_level),
        );
        let instance_buffer = backend.create_buffer(
            &BufferDesc::new(mem::size_of::<AccelerationStructureInstance>()),
            BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
        );
        backend.write_buffer(instance_buffer, 0, bytemuck::bytes_of(&instance));
        backend.buffer_barrier(
            instance_buffer,
            BufferUsage::empty(),
            BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
        );

        let top_level = backend.create_buffer(
            &BufferDesc::new(top_sizes.acceleration_structure_size as usize),
            BufferUsage::ACCELERATION_STRUCTURE_WRITE | BufferUsage::RAY_TRACING_ACCELERATION_STRUCTURE,
        );
        backend.buffer_barrier(top_level, BufferUsage::empty(), BufferUsage::ACCELERATION_STRUCTURE_WRITE);
        backend.build_acceleration_structure(&AccelerationStructureBuild {
            inputs: top_inputs,
            instance_buffer: Some(instance_buffer),
            destination: top_level,
            scratch,
        });
        backend.buffer_barrier(
            top_level,
            BufferUsage::ACCELERATION_STRUCTURE_WRITE,
            BufferUsage::RAY_TRACING_ACCELERATION_STRUCTURE,
        );

        backend.destroy_buffer(scratch);
        backend.destroy_buffer(instance_buffer);

        let records = descriptors.records.clone();
        let geometry_buffer = backend.create_buffer(
            &BufferDesc::new(records.len() * mem::size_of::<GeometryRecord>()),
            BufferUsage::RAY_TRACING_STORAGE_READ,
        );
        backend.write_buffer(geometry_buffer, 0, bytemuck::cast_slice(&records));
        backend.buffer_barrier(
            geometry_buffer,
            BufferUsage::empty(),
            BufferUsage::RAY_TRACING_STORAGE_READ,
        );

        backend.end_timestamp(Self::BUILD_TIMESTAMP);

        Ok(Self {
            bottom_level,
            top_level,
            geometry_buffer,
            records,
            build_frame: backend.frame_index(),
        })
    }

    pub fn top_level(&self) -> BufferId {
        self.top_level
    }

    pub fn bottom_level(&self) -> BufferId {
        self.bottom_level
    }

    pub fn geometry_buffer(&self) -> BufferId {
        self.geometry_buffer
    }

    pub fn records(&self) -> &[GeometryRecord] {
        &self.records
    }

    pub fn build_frame(&self) -> u64 {
        self.build_frame
    }

    /// GPU build time, available exactly once the render latency has elapsed since the build.
    pub fn build_time_ms(&self, backend: &dyn Backend) -> Option<f32> {
        if backend.frame_index() == self.build_frame + RENDER_LATENCY {
            backend.timestamp_ms(Self::BUILD_TIMESTAMP)
        } else {
            None
        }
    }

    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.top_level);
        backend.destroy_buffer(self.bottom_level);
        backend.destroy_buffer(self.geometry_buffer);
    }
}
