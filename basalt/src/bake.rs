use crate::backend::*;
use crate::denoise::*;
use crate::error::{DenoiseError, Error, PipelineError};
use crate::maths::*;
use crate::path_trace::*;
use crate::scene::*;
use crate::usage::*;
use bytemuck::{Pod, Zeroable};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use spark::vk;
use image::{ImageFormat, RgbImage};
use std::{
    mem,
    ops::{Index, IndexMut},
    path::Path,
};
use strum::{EnumIter, EnumString, EnumVariantNames, IntoStaticStr};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
pub struct BakingConstants {
    pub sample_index: u32,
    pub surface_map_position_index: u32,
    pub surface_map_normal_index: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
struct BakeUniforms {
    ray_trace: RayTraceConstants,
    baking: BakingConstants,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, EnumVariantNames, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
pub enum LightmapPreview {
    UvLayout,
    SurfaceMapPosition,
    SurfaceMapNormal,
    SurfaceMapAlbedo,
    Accumulation,
    DenoisedLightmap,
    FinalLightmap,
}

/// An image along with the usage it was last transitioned to.
#[derive(Debug)]
pub struct TrackedImage {
    pub id: ImageId,
    usage: ImageUsage,
}

impl TrackedImage {
    fn new(backend: &mut dyn Backend, size: UVec2, all_usage: ImageUsage) -> Self {
        let id = backend.create_image(&ImageDesc::new_2d(size, LightmapImages::FORMAT), all_usage);
        Self {
            id,
            usage: ImageUsage::empty(),
        }
    }

    /// Always emits a barrier, so that repeated writes in the same usage are ordered.
    fn transition(&mut self, backend: &mut dyn Backend, usage: ImageUsage) {
        backend.image_barrier(self.id, self.usage, usage);
        self.usage = usage;
    }

    pub fn usage(&self) -> ImageUsage {
        self.usage
    }
}

/// Every square image used while baking, all at the lightmap resolution.
pub struct LightmapImages {
    pub surface_position: TrackedImage,
    pub surface_normal: TrackedImage,
    pub surface_albedo: TrackedImage,
    pub accumulation: TrackedImage,
    pub baked: TrackedImage,
    pub denoised: TrackedImage,
    pub uv_layout: TrackedImage,
}

impl LightmapImages {
    pub const FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
    const SURFACE_USAGE: ImageUsage = ImageUsage::COLOR_ATTACHMENT_WRITE
        .union(ImageUsage::RAY_TRACING_SAMPLED)
        .union(ImageUsage::FRAGMENT_SAMPLED)
        .union(ImageUsage::TRANSFER_READ);
    const ACCUMULATION_USAGE: ImageUsage = ImageUsage::TRANSFER_WRITE
        .union(ImageUsage::RAY_TRACING_STORAGE_READ)
        .union(ImageUsage::RAY_TRACING_STORAGE_WRITE)
        .union(ImageUsage::FRAGMENT_SAMPLED)
        .union(ImageUsage::TRANSFER_READ);
    const BAKED_USAGE: ImageUsage = ImageUsage::TRANSFER_WRITE
        .union(ImageUsage::RAY_TRACING_STORAGE_WRITE)
        .union(ImageUsage::COMPUTE_SAMPLED)
        .union(ImageUsage::FRAGMENT_SAMPLED)
        .union(ImageUsage::TRANSFER_READ);
    const DENOISED_USAGE: ImageUsage = ImageUsage::TRANSFER_WRITE
        .union(ImageUsage::COMPUTE_STORAGE_WRITE)
        .union(ImageUsage::FRAGMENT_SAMPLED)
        .union(ImageUsage::TRANSFER_READ);
    const UV_LAYOUT_USAGE: ImageUsage = ImageUsage::COLOR_ATTACHMENT_WRITE
        .union(ImageUsage::FRAGMENT_SAMPLED)
        .union(ImageUsage::TRANSFER_READ);

    fn new(backend: &mut dyn Backend, size: UVec2) -> Self {
        let mut images = Self {
            surface_position: TrackedImage::new(backend, size, Self::SURFACE_USAGE),
            surface_normal: TrackedImage::new(backend, size, Self::SURFACE_USAGE),
            surface_albedo: TrackedImage::new(backend, size, Self::SURFACE_USAGE),
            accumulation: TrackedImage::new(backend, size, Self::ACCUMULATION_USAGE),
            baked: TrackedImage::new(backend, size, Self::BAKED_USAGE),
            denoised: TrackedImage::new(backend, size, Self::DENOISED_USAGE),
            uv_layout: TrackedImage::new(backend, size, Self::UV_LAYOUT_USAGE),
        };

        // the forward pass samples the baked lightmap before anything is baked
        images.baked.transition(backend, ImageUsage::TRANSFER_WRITE);
        backend.clear_image(images.baked.id, [0.0, 0.0, 0.0, 1.0]);
        images.baked.transition(backend, ImageUsage::FRAGMENT_SAMPLED);
        images
    }

    fn destroy(self, backend: &mut dyn Backend) {
        for image in [
            self.surface_position,
            self.surface_normal,
            self.surface_albedo,
            self.accumulation,
            self.baked,
            self.denoised,
            self.uv_layout,
        ] {
            backend.destroy_image(image.id);
        }
    }
}

impl Index<LightmapPreview> for LightmapImages {
    type Output = TrackedImage;

    fn index(&self, preview: LightmapPreview) -> &TrackedImage {
        match preview {
            LightmapPreview::UvLayout => &self.uv_layout,
            LightmapPreview::SurfaceMapPosition => &self.surface_position,
            LightmapPreview::SurfaceMapNormal => &self.surface_normal,
            LightmapPreview::SurfaceMapAlbedo => &self.surface_albedo,
            LightmapPreview::Accumulation => &self.accumulation,
            LightmapPreview::DenoisedLightmap => &self.denoised,
            LightmapPreview::FinalLightmap => &self.baked,
        }
    }
}

impl IndexMut<LightmapPreview> for LightmapImages {
    fn index_mut(&mut self, preview: LightmapPreview) -> &mut TrackedImage {
        match preview {
            LightmapPreview::UvLayout => &mut self.uv_layout,
            LightmapPreview::SurfaceMapPosition => &mut self.surface_position,
            LightmapPreview::SurfaceMapNormal => &mut self.surface_normal,
            LightmapPreview::SurfaceMapAlbedo => &mut self.surface_albedo,
            LightmapPreview::Accumulation => &mut self.accumulation,
            LightmapPreview::DenoisedLightmap => &mut self.denoised,
            LightmapPreview::FinalLightmap => &mut self.baked,
        }
    }
}

/// What happened during one frame of baking.
#[derive(Debug, Default)]
pub struct BakeFrame {
    pub uploaded_denoised: bool,
    pub denoise: Option<Result<(), DenoiseError>>,
    pub median_dispatched: bool,
    pub surface_map_rendered: bool,
    pub sample_dispatched: Option<u32>,
    pub uv_layout_rendered: bool,
}

/// Scene inputs to a bake frame.
pub struct BakeScene<'a> {
    pub model: &'a Model,
    pub trace: TraceScene<'a>,
    pub pass: &'a RayTracingPass,
    pub constants: RayTraceConstants,
}

/// Progressive lightmap baker: renders a surface map in lightmap space, then accumulates one
/// ray traced sample per texel each frame until stopped.
pub struct LightmapBaker {
    resolution: u32,
    images: LightmapImages,
    sample_index: u32,
    is_active: bool,
    use_denoised: bool,
    preview: LightmapPreview,
    denoise_requested: bool,
    median_requested: bool,
    uv_visualization_requested: bool,
    pending_upload: Option<Vec<f32>>,
    denoiser: DenoiserAdapter,
    surface_pipeline: PipelineId,
    uv_layout_pipeline: PipelineId,
    median_pipeline: PipelineId,
}

impl LightmapBaker {
    pub const MEDIAN_GROUP_SIZE: u32 = 8;

    pub fn new(backend: &mut dyn Backend, resolution: u32, denoiser: DenoiserAdapter) -> Result<Self, PipelineError> {
        let surface_pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "lightmap-surface",
            vertex_shader: "bake/surface.vert.spv",
            fragment_shader: "bake/surface.frag.spv",
            cull_mode: CullMode::None,
            force_front_facing: false,
            color_formats: vec![LightmapImages::FORMAT; 3],
            layout: BindingLayout {
                storage_buffers: 1,
                ..Default::default()
            },
        })?;
        let uv_layout_pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "lightmap-uv-layout",
            vertex_shader: "bake/uv_layout.vert.spv",
            fragment_shader: "bake/uv_layout.frag.spv",
            cull_mode: CullMode::None,
            force_front_facing: false,
            color_formats: vec![LightmapImages::FORMAT],
            layout: BindingLayout::default(),
        })?;
        let median_pipeline = backend.create_compute_pipeline(&ComputePipelineDesc {
            name: "lightmap-median",
            shader: "bake/median.comp.spv",
            group_size: UVec2::broadcast(Self::MEDIAN_GROUP_SIZE),
            layout: BindingLayout {
                storage_images: 1,
                sampled_images: 1,
                ..Default::default()
            },
        })?;

        Ok(Self {
            resolution,
            images: LightmapImages::new(backend, UVec2::broadcast(resolution)),
            sample_index: 0,
            is_active: false,
            use_denoised: false,
            preview: LightmapPreview::FinalLightmap,
            denoise_requested: false,
            median_requested: false,
            uv_visualization_requested: false,
            pending_upload: None,
            denoiser,
            surface_pipeline,
            uv_layout_pipeline,
            median_pipeline,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn size(&self) -> UVec2 {
        UVec2::broadcast(self.resolution)
    }

    pub fn sample_index(&self) -> u32 {
        self.sample_index
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn use_denoised(&self) -> bool {
        self.use_denoised
    }

    pub fn preview(&self) -> LightmapPreview {
        self.preview
    }

    pub fn set_preview(&mut self, preview: LightmapPreview) {
        self.preview = preview;
    }

    pub fn images(&self) -> &LightmapImages {
        &self.images
    }

    /// The lightmap sampled by forward shading.
    pub fn lightmap(&self) -> ImageId {
        if self.use_denoised {
            self.images.denoised.id
        } else {
            self.images.baked.id
        }
    }

    pub fn preview_image(&self) -> ImageId {
        self.images[self.preview].id
    }

    /// Starts baking from scratch. The first frame clears the lightmap and renders the surface map.
    pub fn start(&mut self) {
        info!("starting lightmap bake at {}x{}", self.resolution, self.resolution);
        self.sample_index = 0;
        self.is_active = true;
        self.use_denoised = false;
        self.preview = LightmapPreview::FinalLightmap;
    }

    /// Continues a stopped bake without clearing what has accumulated.
    pub fn resume(&mut self) {
        self.is_active = true;
    }

    pub fn stop(&mut self) {
        if self.is_active {
            info!("stopped lightmap bake after {} samples", self.sample_index);
        }
        self.is_active = false;
    }

    pub fn request_denoise(&mut self) {
        self.denoise_requested = true;
    }

    pub fn request_median_denoise(&mut self) {
        self.median_requested = true;
    }

    pub fn request_uv_visualization(&mut self) {
        self.uv_visualization_requested = true;
    }

    /// Recreates every image when the resolution changes, which discards the current bake.
    pub fn resize(&mut self, backend: &mut dyn Backend, resolution: u32) {
        if resolution == self.resolution {
            return;
        }
        info!("lightmap resolution changed to {}", resolution);
        let images = mem::replace(&mut self.images, LightmapImages::new(backend, UVec2::broadcast(resolution)));
        images.destroy(backend);
        self.resolution = resolution;
        self.sample_index = 0;
        self.is_active = false;
        self.use_denoised = false;
        self.pending_upload = None;
    }

    /// Runs any pending requests, then one bake sample if active.
    pub fn update(&mut self, backend: &mut dyn Backend, scene: &BakeScene) -> BakeFrame {
        let mut frame = BakeFrame::default();

        if let Some(texels) = self.pending_upload.take() {
            self.upload_denoised(backend, &texels);
            frame.uploaded_denoised = true;
        }
        if self.denoise_requested {
            self.denoise_requested = false;
            let result = self.denoise(backend);
            if let Err(err) = &result {
                warn!("lightmap denoise failed, keeping noisy lightmap: {}", err);
            }
            frame.denoise = Some(result);
        }
        if self.median_requested {
            self.median_requested = false;
            self.median_denoise(backend);
            frame.median_dispatched = true;
        }
        if self.is_active {
            if self.sample_index == 0 {
                self.clear_bake(backend);
                frame.surface_map_rendered = self.render_surface_map(backend, scene.model, scene.trace.model);
            }
            frame.sample_dispatched = self.bake_sample(backend, scene);
        }
        if self.uv_visualization_requested {
            self.uv_visualization_requested = false;
            frame.uv_layout_rendered = self.visualize_uvs(backend, scene.model, scene.trace.model);
        }
        frame
    }

    fn clear_bake(&mut self, backend: &mut dyn Backend) {
        for image in [&mut self.images.accumulation, &mut self.images.baked] {
            image.transition(backend, ImageUsage::TRANSFER_WRITE);
            backend.clear_image(image.id, [0.0; 4]);
            image.transition(backend, ImageUsage::FRAGMENT_SAMPLED);
        }
    }

    fn draw_lightmapped_meshes(
        &self,
        backend: &mut dyn Backend,
        model: &Model,
        gpu_model: &GpuModel,
        pipeline: PipelineId,
        color_targets: &[ImageId],
    ) -> bool {
        let (vertex_buffer, index_buffer) = match gpu_model.lightmap_buffers {
            Some(buffers) if model.lightmapped_vertex_count() > 0 => buffers,
            _ => return false,
        };
        for mesh in model.lightmapped_meshes.iter() {
            let material_index = model.mesh(mesh.mesh_ref).map_or(0, |m| m.material_ref.0);
            backend.draw_indexed(&DrawIndexed {
                pipeline,
                viewport: self.size(),
                vertex_buffer,
                index_buffer,
                first_index: mesh.index_offset,
                index_count: mesh.index_count,
                vertex_offset: mesh.vertex_offset,
                first_instance: 0,
                instance_count: 1,
                color_targets,
                bindings: Bindings::default(),
                uniforms: bytemuck::bytes_of(&material_index),
            });
        }
        true
    }

    /// World position, normal and albedo for each lightmap texel, rasterized in lightmap UV space.
    fn render_surface_map(&mut self, backend: &mut dyn Backend, model: &Model, gpu_model: &GpuModel) -> bool {
        if model.lightmapped_vertex_count() == 0 {
            return false;
        }
        for image in [
            &mut self.images.surface_position,
            &mut self.images.surface_normal,
            &mut self.images.surface_albedo,
        ] {
            image.transition(backend, ImageUsage::COLOR_ATTACHMENT_WRITE);
        }
        let targets = [
            self.images.surface_position.id,
            self.images.surface_normal.id,
            self.images.surface_albedo.id,
        ];
        let rendered = self.draw_lightmapped_meshes(backend, model, gpu_model, self.surface_pipeline, &targets);
        for image in [
            &mut self.images.surface_position,
            &mut self.images.surface_normal,
            &mut self.images.surface_albedo,
        ] {
            image.transition(backend, ImageUsage::RAY_TRACING_SAMPLED);
        }
        rendered
    }

    fn bake_sample(&mut self, backend: &mut dyn Backend, scene: &BakeScene) -> Option<u32> {
        let accumulate_usage = ImageUsage::RAY_TRACING_STORAGE_READ | ImageUsage::RAY_TRACING_STORAGE_WRITE;
        self.images.accumulation.transition(backend, accumulate_usage);
        self.images.baked.transition(backend, ImageUsage::RAY_TRACING_STORAGE_WRITE);
        for image in [&mut self.images.surface_position, &mut self.images.surface_normal] {
            if image.usage() != ImageUsage::RAY_TRACING_SAMPLED {
                image.transition(backend, ImageUsage::RAY_TRACING_SAMPLED);
            }
        }

        let uniforms = BakeUniforms {
            ray_trace: RayTraceConstants {
                sample_index: self.sample_index,
                total_num_pixels: self.resolution * self.resolution,
                ..scene.constants
            },
            baking: BakingConstants {
                sample_index: self.sample_index,
                surface_map_position_index: 0,
                surface_map_normal_index: 1,
                _pad: 0,
            },
        };
        let dispatched = scene.pass.trace_rays(
            backend,
            &scene.trace,
            self.size(),
            &[
                (self.images.surface_position.id, ImageUsage::RAY_TRACING_SAMPLED),
                (self.images.surface_normal.id, ImageUsage::RAY_TRACING_SAMPLED),
                (self.images.accumulation.id, accumulate_usage),
                (self.images.baked.id, ImageUsage::RAY_TRACING_STORAGE_WRITE),
            ],
            bytemuck::bytes_of(&uniforms),
        );

        self.images.accumulation.transition(backend, ImageUsage::FRAGMENT_SAMPLED);
        self.images.baked.transition(backend, ImageUsage::FRAGMENT_SAMPLED);

        if dispatched {
            let index = self.sample_index;
            self.sample_index += 1;
            Some(index)
        } else {
            warn!("no shader tables for baking, skipping sample");
            None
        }
    }

    fn median_denoise(&mut self, backend: &mut dyn Backend) {
        self.images.baked.transition(backend, ImageUsage::COMPUTE_SAMPLED);
        self.images.denoised.transition(backend, ImageUsage::COMPUTE_STORAGE_WRITE);
        backend.dispatch(&Dispatch {
            pipeline: self.median_pipeline,
            group_count: self.size().div_round_up(Self::MEDIAN_GROUP_SIZE),
            bindings: Bindings {
                buffers: &[],
                images: &[
                    (self.images.baked.id, ImageUsage::COMPUTE_SAMPLED),
                    (self.images.denoised.id, ImageUsage::COMPUTE_STORAGE_WRITE),
                ],
            },
            uniforms: &[],
        });
        self.images.baked.transition(backend, ImageUsage::FRAGMENT_SAMPLED);
        self.images.denoised.transition(backend, ImageUsage::FRAGMENT_SAMPLED);
        self.use_denoised = true;
        self.preview = LightmapPreview::DenoisedLightmap;
    }

    fn visualize_uvs(&mut self, backend: &mut dyn Backend, model: &Model, gpu_model: &GpuModel) -> bool {
        if model.lightmapped_vertex_count() == 0 {
            return false;
        }
        self.images.uv_layout.transition(backend, ImageUsage::COLOR_ATTACHMENT_WRITE);
        let targets = [self.images.uv_layout.id];
        let rendered = self.draw_lightmapped_meshes(backend, model, gpu_model, self.uv_layout_pipeline, &targets);
        self.images.uv_layout.transition(backend, ImageUsage::FRAGMENT_SAMPLED);
        if rendered {
            self.preview = LightmapPreview::UvLayout;
        }
        rendered
    }

    /// Reads an image back to host memory, which waits for the GPU to go idle.
    fn read_back(backend: &mut dyn Backend, image: &mut TrackedImage) -> Vec<f32> {
        let previous = image.usage();
        image.transition(backend, ImageUsage::TRANSFER_READ);
        let texels = backend.read_image(image.id);
        image.transition(backend, previous);
        texels
    }

    /// Stops baking and denoises the lightmap on the host. The result is uploaded next frame.
    fn denoise(&mut self, backend: &mut dyn Backend) -> Result<(), DenoiseError> {
        self.stop();
        if self.sample_index == 0 {
            return Err(DenoiseError::NothingBaked);
        }
        let size = self.size();
        let noisy = Self::read_back(backend, &mut self.images.baked);
        let denoised = self.denoiser.denoise_rgba(&noisy, size)?;
        info!("denoised {}x{} lightmap", size.x, size.y);
        self.pending_upload = Some(denoised);
        self.preview = LightmapPreview::DenoisedLightmap;
        Ok(())
    }

    fn upload_denoised(&mut self, backend: &mut dyn Backend, texels: &[f32]) {
        assert_eq!(texels.len(), 4 * (self.resolution as usize) * (self.resolution as usize));
        self.images.denoised.transition(backend, ImageUsage::TRANSFER_WRITE);
        backend.write_image(self.images.denoised.id, texels);
        self.images.denoised.transition(backend, ImageUsage::FRAGMENT_SAMPLED);
        self.use_denoised = true;
    }

    pub fn export_ppm(&mut self, backend: &mut dyn Backend, preview: LightmapPreview, path: &Path) -> Result<(), Error> {
        let size = self.size();
        let texels = Self::read_back(backend, &mut self.images[preview]);
        lightmap_to_rgb8(size, &texels)
            .save_with_format(path, ImageFormat::Pnm)
            .map_err(|source| Error::Export {
                path: path.to_owned(),
                source,
            })?;
        info!("wrote {:?} to {}", preview, path.display());
        Ok(())
    }

    pub fn destroy(self, backend: &mut dyn Backend) {
        self.images.destroy(backend);
        backend.destroy_pipeline(self.surface_pipeline);
        backend.destroy_pipeline(self.uv_layout_pipeline);
        backend.destroy_pipeline(self.median_pipeline);
    }
}

/// Drops alpha and quantizes to 8 bits, clamping to [0, 1].
pub fn lightmap_to_rgb8(size: UVec2, rgba: &[f32]) -> RgbImage {
    assert_eq!(rgba.len(), 4 * (size.x as usize) * (size.y as usize));
    RgbImage::from_fn(size.x, size.y, |x, y| {
        let offset = 4 * (y * size.x + x) as usize;
        let texel = &rgba[offset..offset + 3];
        image::Rgb([texel[0], texel[1], texel[2]].map(|c| (c.saturate() * 255.0 + 0.5) as u8))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn rgb8_conversion_clamps_and_drops_alpha() {
        let image = lightmap_to_rgb8(UVec2::new(2, 1), &[2.0, 0.5, -1.0, 0.0, 0.0, 1.0, 0.25, 1.0]);
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.into_raw(), vec![255, 128, 0, 0, 255, 64]);
    }

    #[test]
    fn preview_names_round_trip() {
        for preview in LightmapPreview::iter() {
            let name: &'static str = preview.into();
            assert_eq!(name.parse::<LightmapPreview>().unwrap(), preview);
        }
        assert_eq!("uv-layout".parse::<LightmapPreview>().unwrap(), LightmapPreview::UvLayout);
    }
}
