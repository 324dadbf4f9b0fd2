use crate::accel::SceneAccel;
use crate::backend::*;
use crate::bake::BakingConstants;
use crate::camera::Camera;
use crate::error::PipelineError;
use crate::maths::*;
use crate::sbt::*;
use crate::scene::GpuModel;
use crate::settings::*;
use crate::usage::*;
use bytemuck::{Pod, Zeroable};
use spark::vk;
use std::mem;

macro_rules! ray_trace_flags {
    ($(($name:ident, $field:ident, $bit:expr)),+ $(,)?) => {
        /// Feature toggles packed into a single word for the ray tracing shaders.
        pub mod ray_trace_flags {
            $(pub const $name: u32 = 1 << $bit;)+
        }

        fn pack_flags(settings: &PathTraceSettings) -> u32 {
            let mut flags = 0;
            $(
                if settings.$field {
                    flags |= ray_trace_flags::$name;
                }
            )+
            flags
        }
    };
}

ray_trace_flags! {
    (ENABLE_ALBEDO_MAPS, enable_albedo_maps, 0),
    (ENABLE_NORMAL_MAPS, enable_normal_maps, 1),
    (ENABLE_DIFFUSE, enable_diffuse, 2),
    (ENABLE_SPECULAR, enable_specular, 3),
    (ENABLE_DIRECT, enable_direct, 4),
    (ENABLE_INDIRECT, enable_indirect, 5),
    (ENABLE_INDIRECT_SPECULAR, enable_indirect_specular, 6),
    (ENABLE_SKY, enable_sky, 7),
    (ENABLE_SUN, enable_sun, 8),
    (RENDER_LIGHTS, render_lights, 9),
    (WHITE_FURNACE, enable_white_furnace_mode, 10),
    (AVOID_CAUSTIC_PATHS, avoid_caustic_paths, 11),
    (CLAMP_ROUGHNESS, clamp_roughness, 12),
    (MULTISCATTERING_COMPENSATION, apply_multiscattering_energy_compensation, 13),
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct RayTraceConstants {
    pub inv_view_projection: Mat4,
    pub sun_direction: [f32; 3],
    pub cos_sun_angular_radius: f32,
    pub camera_position: [f32; 3],
    pub sin_sun_angular_radius: f32,
    pub ground_albedo: [f32; 3],
    pub turbidity: f32,
    pub sample_index: u32,
    pub total_num_pixels: u32,
    pub sqrt_num_samples: u32,
    pub max_path_length: u32,
    pub max_any_hit_path_length: u32,
    pub num_lights: u32,
    pub roughness_scale: f32,
    pub metallic_scale: f32,
    pub flags: u32,
    pub _pad: [u32; 3],
}

impl RayTraceConstants {
    pub fn new(camera: &Camera, settings: &RenderSettings, sample_index: u32, total_num_pixels: u32, num_lights: u32) -> Self {
        let path_trace = &settings.path_trace;
        let sun_direction = Vec3::from(path_trace.sun_direction).normalized();
        let (sin_sun, cos_sun) = (0.5 * path_trace.sun_size).to_radians().sin_cos();
        let position = camera.position;
        Self {
            inv_view_projection: camera.view_projection_matrix().inversed(),
            sun_direction: [sun_direction.x, sun_direction.y, sun_direction.z],
            cos_sun_angular_radius: cos_sun,
            camera_position: [position.x, position.y, position.z],
            sin_sun_angular_radius: sin_sun,
            ground_albedo: path_trace.ground_albedo,
            turbidity: path_trace.turbidity,
            sample_index,
            total_num_pixels,
            sqrt_num_samples: path_trace.sqrt_num_samples,
            max_path_length: path_trace.max_path_length.clamp(1, MAX_PATH_LENGTH_SETTING),
            max_any_hit_path_length: path_trace.max_any_hit_path_length,
            num_lights,
            roughness_scale: path_trace.roughness_scale,
            metallic_scale: path_trace.metallic_scale,
            flags: pack_flags(path_trace),
            _pad: [0; 3],
        }
    }
}

/// Binding layout shared by the interactive and baking ray tracing pipelines.
pub const RAY_TRACING_LAYOUT: BindingLayout = BindingLayout {
    uniform_size: (mem::size_of::<RayTraceConstants>() + mem::size_of::<BakingConstants>()) as u32,
    acceleration_structures: 1,
    storage_buffers: 3,
    storage_images: 2,
    sampled_images: 3,
};

/// A ray tracing pipeline together with the shader tables for the current scene.
pub struct RayTracingPass {
    kind: RayTracingPipelineKind,
    pipeline: PipelineId,
    tables: Option<ShaderBindingTable>,
}

impl RayTracingPass {
    pub fn new(backend: &mut dyn Backend, kind: RayTracingPipelineKind) -> Result<Self, PipelineError> {
        let pipeline = backend.create_ray_tracing_pipeline(&kind.pipeline_desc(RAY_TRACING_LAYOUT))?;
        Ok(Self {
            kind,
            pipeline,
            tables: None,
        })
    }

    pub fn kind(&self) -> RayTracingPipelineKind {
        self.kind
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    pub fn tables(&self) -> Option<&ShaderBindingTable> {
        self.tables.as_ref()
    }

    pub fn rebuild_tables(&mut self, backend: &mut dyn Backend, accel: &SceneAccel) -> Result<(), PipelineError> {
        if let Some(tables) = self.tables.take() {
            tables.destroy(backend);
        }
        self.tables = Some(ShaderBindingTable::new(backend, self.pipeline, self.kind, accel.records())?);
        Ok(())
    }

    pub fn trace_rays(
        &self,
        backend: &mut dyn Backend,
        scene: &TraceScene,
        size: UVec2,
        images: &[(ImageId, ImageUsage)],
        uniforms: &[u8],
    ) -> bool {
        let tables = match self.tables.as_ref() {
            Some(tables) => tables,
            None => return false,
        };
        let trace = TraceRays {
            pipeline: self.pipeline,
            raygen: tables.raygen.device_address_region(backend),
            miss: tables.miss.device_address_region(backend),
            hit: tables.hit.device_address_region(backend),
            size,
            top_level: scene.accel.top_level(),
            bindings: Bindings {
                buffers: &[
                    (scene.model.vertex_buffer, BufferUsage::RAY_TRACING_STORAGE_READ),
                    (scene.model.index_buffer, BufferUsage::RAY_TRACING_STORAGE_READ),
                    (scene.accel.geometry_buffer(), BufferUsage::RAY_TRACING_STORAGE_READ),
                ],
                images,
            },
            uniforms,
        };
        backend.trace_rays(&trace);
        true
    }

    pub fn destroy(mut self, backend: &mut dyn Backend) {
        if let Some(tables) = self.tables.take() {
            tables.destroy(backend);
        }
        backend.destroy_pipeline(self.pipeline);
    }
}

/// Scene resources read by every ray dispatch.
pub struct TraceScene<'a> {
    pub model: &'a GpuModel,
    pub accel: &'a SceneAccel,
}

/// Interactive progressive path tracer writing into an accumulation target.
pub struct PathTracer {
    size: UVec2,
    target: ImageId,
    target_usage: ImageUsage,
}

impl PathTracer {
    pub const TARGET_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
    const TARGET_ALL_USAGE: ImageUsage = ImageUsage::RAY_TRACING_STORAGE_READ
        .union(ImageUsage::RAY_TRACING_STORAGE_WRITE)
        .union(ImageUsage::FRAGMENT_SAMPLED)
        .union(ImageUsage::TRANSFER_READ);
    const TRACE_USAGE: ImageUsage =
        ImageUsage::RAY_TRACING_STORAGE_READ.union(ImageUsage::RAY_TRACING_STORAGE_WRITE);

    pub fn new(backend: &mut dyn Backend, size: UVec2) -> Self {
        let target = backend.create_image(&ImageDesc::new_2d(size, Self::TARGET_FORMAT), Self::TARGET_ALL_USAGE);
        Self {
            size,
            target,
            target_usage: ImageUsage::empty(),
        }
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn target(&self) -> ImageId {
        self.target
    }

    pub fn resize(&mut self, backend: &mut dyn Backend, size: UVec2) {
        if size != self.size {
            backend.destroy_image(self.target);
            *self = Self::new(backend, size);
        }
    }

    /// Accumulates one sample per pixel, leaving the target readable by fragment shaders.
    pub fn trace(
        &mut self,
        backend: &mut dyn Backend,
        pass: &RayTracingPass,
        scene: &TraceScene,
        constants: &RayTraceConstants,
    ) -> bool {
        backend.image_barrier(self.target, self.target_usage, Self::TRACE_USAGE);
        self.target_usage = Self::TRACE_USAGE;
        let dispatched = pass.trace_rays(
            backend,
            scene,
            self.size,
            &[(self.target, Self::TRACE_USAGE)],
            bytemuck::bytes_of(constants),
        );
        backend.image_barrier(self.target, self.target_usage, ImageUsage::FRAGMENT_SAMPLED);
        self.target_usage = ImageUsage::FRAGMENT_SAMPLED;
        dispatched
    }

    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_image(self.target);
    }
}
