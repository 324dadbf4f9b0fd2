use crate::error::PipelineError;
use crate::maths::*;
use crate::usage::*;
use arrayvec::ArrayVec;
use serde::Serialize;
use slotmap::new_key_type;
use spark::vk;
use std::fmt;

new_key_type! {
    pub struct BufferId;
    pub struct ImageId;
    pub struct PipelineId;
}

/// Number of frames the CPU may run ahead of the GPU.
pub const RENDER_LATENCY: u64 = 2;

pub const MAX_SHADER_IDENTIFIER_SIZE: usize = 64;

#[derive(Clone, PartialEq, Eq)]
pub struct ShaderIdentifier(ArrayVec<u8, MAX_SHADER_IDENTIFIER_SIZE>);

impl ShaderIdentifier {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() <= MAX_SHADER_IDENTIFIER_SIZE);
        Self(bytes.iter().copied().collect())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ShaderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShaderIdentifier(")?;
        for b in self.0.iter().take(8) {
            write!(f, "{:02x}", b)?;
        }
        f.write_str("..)")
    }
}

/// Size and alignment rules for shader binding table records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTableAlignment {
    pub handle_size: u32,
    pub handle_alignment: u32,
    pub base_alignment: u32,
}

impl From<&vk::PhysicalDeviceRayTracingPipelinePropertiesKHR> for ShaderTableAlignment {
    fn from(rtpp: &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR) -> Self {
        Self {
            handle_size: rtpp.shader_group_handle_size,
            handle_alignment: rtpp.shader_group_handle_alignment,
            base_alignment: rtpp.shader_group_base_alignment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: usize,
}

impl BufferDesc {
    pub fn new(size: usize) -> Self {
        BufferDesc { size }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageDesc {
    pub size: UVec2,
    pub format: vk::Format,
}

impl ImageDesc {
    pub fn new_2d(size: UVec2, format: vk::Format) -> Self {
        ImageDesc { size, format }
    }

    pub fn channel_count(&self) -> usize {
        let format = self.format;
        if format == vk::Format::R32G32B32A32_SFLOAT || format == vk::Format::R16G16B16A16_SFLOAT {
            4
        } else if format == vk::Format::R32G32B32_SFLOAT {
            3
        } else if format == vk::Format::R32G32_SFLOAT || format == vk::Format::R16G16_SFLOAT {
            2
        } else {
            1
        }
    }

    pub fn texel_count(&self) -> usize {
        (self.size.x as usize) * (self.size.y as usize)
    }

    pub fn float_count(&self) -> usize {
        self.texel_count() * self.channel_count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccelerationStructureLevel {
    Bottom,
    Top,
}

#[derive(Debug, Clone, Copy)]
pub struct TriangleGeometryDesc {
    pub vertex_buffer: BufferId,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub vertex_format: vk::Format,
    pub index_buffer: BufferId,
    pub first_index: u32,
    pub triangle_count: u32,
    pub flags: vk::GeometryFlagsKHR,
}

impl TriangleGeometryDesc {
    pub fn is_opaque(&self) -> bool {
        self.flags.contains(vk::GeometryFlagsKHR::OPAQUE)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AccelerationStructureInputs<'a> {
    BottomLevel {
        geometries: &'a [TriangleGeometryDesc],
    },
    TopLevel {
        instance_count: u32,
    },
}

impl<'a> AccelerationStructureInputs<'a> {
    pub fn level(&self) -> AccelerationStructureLevel {
        match self {
            AccelerationStructureInputs::BottomLevel { .. } => AccelerationStructureLevel::Bottom,
            AccelerationStructureInputs::TopLevel { .. } => AccelerationStructureLevel::Top,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccelerationStructureBuild<'a> {
    pub inputs: AccelerationStructureInputs<'a>,
    /// Required for top level builds.
    pub instance_buffer: Option<BufferId>,
    pub destination: BufferId,
    pub scratch: BufferId,
}

/// Resource binding layout shared by every shader in a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BindingLayout {
    pub uniform_size: u32,
    pub acceleration_structures: u32,
    pub storage_buffers: u32,
    pub storage_images: u32,
    pub sampled_images: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HitGroupDesc {
    pub export_name: &'static str,
    pub closest_hit: Option<&'static str>,
    pub any_hit: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PipelineSubObject {
    Library {
        name: &'static str,
        exports: Vec<&'static str>,
    },
    HitGroup(HitGroupDesc),
    ShaderConfig {
        max_payload_size: u32,
        max_attribute_size: u32,
    },
    GlobalBindingLayout(BindingLayout),
    PipelineConfig {
        max_recursion_depth: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RayTracingPipelineDesc {
    pub name: &'static str,
    pub sub_objects: Vec<PipelineSubObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub name: &'static str,
    pub vertex_shader: &'static str,
    pub fragment_shader: &'static str,
    pub cull_mode: CullMode,
    /// Treat both triangle windings as front facing.
    pub force_front_facing: bool,
    pub color_formats: Vec<vk::Format>,
    pub layout: BindingLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputePipelineDesc {
    pub name: &'static str,
    pub shader: &'static str,
    pub group_size: UVec2,
    pub layout: BindingLayout,
}

/// Resources read or written by a command, along with the usage they must be in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bindings<'a> {
    pub buffers: &'a [(BufferId, BufferUsage)],
    pub images: &'a [(ImageId, ImageUsage)],
}

#[derive(Debug, Clone, Copy)]
pub struct DrawIndexed<'a> {
    pub pipeline: PipelineId,
    pub viewport: UVec2,
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: u32,
    pub first_instance: u32,
    pub instance_count: u32,
    pub color_targets: &'a [ImageId],
    pub bindings: Bindings<'a>,
    pub uniforms: &'a [u8],
}

#[derive(Clone, Copy)]
pub struct TraceRays<'a> {
    pub pipeline: PipelineId,
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub size: UVec2,
    pub top_level: BufferId,
    pub bindings: Bindings<'a>,
    pub uniforms: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub struct Dispatch<'a> {
    pub pipeline: PipelineId,
    pub group_count: UVec2,
    pub bindings: Bindings<'a>,
    pub uniforms: &'a [u8],
}

/// Device interface used by the renderer. All calls are made from the render thread and are
/// recorded in submission order. Destroying a resource is deferred by the backend until the GPU
/// has finished with it.
pub trait Backend {
    fn shader_table_alignment(&self) -> ShaderTableAlignment;

    fn create_buffer(&mut self, desc: &BufferDesc, all_usage: BufferUsage) -> BufferId;
    fn destroy_buffer(&mut self, id: BufferId);
    fn buffer_device_address(&self, id: BufferId) -> vk::DeviceAddress;
    fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[u8]);
    fn clear_buffer(&mut self, id: BufferId, value: u32);
    fn buffer_barrier(&mut self, id: BufferId, old_usage: BufferUsage, new_usage: BufferUsage);

    fn create_image(&mut self, desc: &ImageDesc, all_usage: ImageUsage) -> ImageId;
    fn destroy_image(&mut self, id: ImageId);
    fn clear_image(&mut self, id: ImageId, value: [f32; 4]);
    fn image_barrier(&mut self, id: ImageId, old_usage: ImageUsage, new_usage: ImageUsage);

    /// Copies the image to host memory. This waits for all submitted work to complete.
    fn read_image(&mut self, id: ImageId) -> Vec<f32>;
    fn write_image(&mut self, id: ImageId, texels: &[f32]);

    fn acceleration_structure_build_sizes(
        &self,
        inputs: &AccelerationStructureInputs,
    ) -> vk::AccelerationStructureBuildSizesInfoKHR;
    fn build_acceleration_structure(&mut self, build: &AccelerationStructureBuild);

    fn create_ray_tracing_pipeline(&mut self, desc: &RayTracingPipelineDesc) -> Result<PipelineId, PipelineError>;
    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineId, PipelineError>;
    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<PipelineId, PipelineError>;
    fn destroy_pipeline(&mut self, id: PipelineId);
    fn shader_identifier(&self, pipeline: PipelineId, export_name: &str) -> Option<ShaderIdentifier>;

    fn draw_indexed(&mut self, draw: &DrawIndexed);
    fn trace_rays(&mut self, trace: &TraceRays);
    fn dispatch(&mut self, dispatch: &Dispatch);

    fn begin_timestamp(&mut self, name: &'static str);
    fn end_timestamp(&mut self, name: &'static str);
    /// Returns the most recent completed timing for `name`, once the GPU has caught up.
    fn timestamp_ms(&self, name: &'static str) -> Option<f32>;

    fn frame_index(&self) -> u64;
    fn end_frame(&mut self);
}
