use crate::backend::*;
use crate::camera::Camera;
use crate::error::PipelineError;
use crate::maths::*;
use crate::scene::SpotLight;
use crate::settings::*;
use crate::usage::*;
use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use std::{f32::consts::PI, mem};

pub const CONE_SIDES: u32 = 16;

/// Radius scale so that an inscribed polygon of `sides` edges covers the circle it approximates.
pub fn scale_correction(sides: u32) -> f32 {
    1.0 / (PI / sides as f32).cos()
}

/// Unit cone with its apex at the origin opening along +z, capped at z = 1 with a rim of radius 1.
/// Triangles wind counter-clockwise when seen from outside.
#[derive(Debug, Clone)]
pub struct ConeMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl ConeMesh {
    pub fn new(sides: u32) -> Self {
        let mut vertices = Vec::with_capacity(sides as usize + 2);
        vertices.push(Vec3::zero());
        for i in 0..sides {
            let angle = 2.0 * PI * (i as f32) / (sides as f32);
            let (sin, cos) = angle.sin_cos();
            vertices.push(Vec3::new(cos, sin, 1.0));
        }
        let centre = vertices.len() as u32;
        vertices.push(Vec3::unit_z());

        let mut indices = Vec::with_capacity(6 * sides as usize);
        for i in 0..sides {
            let a = 1 + i;
            let b = 1 + (i + 1) % sides;
            indices.extend_from_slice(&[0, b, a]);
            indices.extend_from_slice(&[centre, a, b]);
        }
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }
}

/// Tests a cone of the given height and half angle against a sphere.
pub fn sphere_cone_intersection(
    cone_tip: Vec3,
    cone_dir: Vec3,
    cone_height: f32,
    cone_half_angle: f32,
    sphere_centre: Vec3,
    sphere_radius: f32,
) -> bool {
    let v = sphere_centre - cone_tip;
    let along = v.dot(cone_dir);
    if along > cone_height + sphere_radius {
        return false;
    }
    if along < -sphere_radius {
        return false;
    }
    let (sin, cos) = cone_half_angle.sin_cos();
    let perpendicular = (v.mag_sq() - along * along).max(0.0).sqrt();
    let distance_to_surface = cos * perpendicular - sin * along;
    distance_to_surface <= sphere_radius
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZBounds {
    pub min: u32,
    pub max: u32,
}

impl ZBounds {
    /// Maps a view space depth range onto slices, clamping both ends into `[0, num_z_slices)`.
    pub fn from_depth_range(min_z: f32, max_z: f32, near_clip: f32, far_clip: f32, num_z_slices: u32) -> Self {
        let to_slice = |z: f32| -> u32 {
            let t = ((z - near_clip) / (far_clip - near_clip)).saturate();
            ((t * num_z_slices as f32) as u32).min(num_z_slices - 1)
        };
        Self {
            min: to_slice(min_z),
            max: to_slice(max_z),
        }
    }
}

/// Bounding cone of a spot light, placed in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterBounds {
    pub light_index: u32,
    pub position: Vec3,
    /// Columns map the unit cone axes into world space, with the third column along the light.
    pub orientation: Mat3,
    pub scale: Vec3,
    pub z_bounds: ZBounds,
}

impl ClusterBounds {
    pub fn new(light_index: u32, light: &SpotLight, range: f32, camera: &Camera, num_z_slices: u32) -> Self {
        let radius = (0.5 * light.outer_angle).tan() * range * scale_correction(CONE_SIDES);
        let position = light.position;
        let orientation = basis_from_direction(light.direction);
        let scale = Vec3::new(radius, radius, range);

        let mut min_z = f32::MAX;
        let mut max_z = f32::MIN;
        for v in ConeMesh::new(CONE_SIDES).vertices.iter() {
            let world = position + orientation * (scale * *v);
            let z = camera.world_to_view(world).z;
            min_z = min_z.min(z);
            max_z = max_z.max(z);
        }
        let z_bounds = ZBounds::from_depth_range(min_z, max_z, camera.near_clip, camera.far_clip, num_z_slices);

        Self {
            light_index,
            position,
            orientation,
            scale,
            z_bounds,
        }
    }

    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.orientation * (self.scale * local)
    }

    /// Half angle of the polygon cone's circumscribing circular cone.
    pub fn circumscribed_half_angle(&self) -> f32 {
        (self.scale.x / self.scale.z).atan()
    }

    pub fn intersects_near_clip(&self, camera: &Camera) -> bool {
        let (centre, radius) = camera.near_clip_bounding_sphere();
        sphere_cone_intersection(
            self.position,
            self.orientation.cols[2],
            self.scale.z,
            self.circumscribed_half_angle(),
            centre,
            radius,
        )
    }

    pub fn gpu_bounds(&self) -> GpuClusterBounds {
        let m = self.orientation;
        let s = self.scale;
        let p = self.position;
        let x = m.cols[0] * s.x;
        let y = m.cols[1] * s.y;
        let z = m.cols[2] * s.z;
        GpuClusterBounds {
            transform: TransposedTransform3([
                Vec4::new(x.x, y.x, z.x, p.x),
                Vec4::new(x.y, y.y, z.y, p.y),
                Vec4::new(x.z, y.z, z.z, p.z),
            ]),
            z_bounds: [self.z_bounds.min, self.z_bounds.max],
            light_index: self.light_index,
            _pad: 0,
        }
    }
}

/// Per instance data read by the cone vertex shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct GpuClusterBounds {
    pub transform: TransposedTransform3,
    pub z_bounds: [u32; 2],
    pub light_index: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
struct ClusterConstants {
    view: Mat4,
    projection: Mat4,
    tile_count: [u32; 2],
    num_z_slices: u32,
    tile_size: u32,
    near_clip: f32,
    far_clip: f32,
    light_count: u32,
    num_intersecting: u32,
}

/// Screen tiles by depth slices, each cluster holding one bit per light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterGrid {
    pub viewport: UVec2,
    pub tile_size: u32,
    pub tile_count: UVec2,
    pub num_z_slices: u32,
}

impl ClusterGrid {
    pub fn new(viewport: UVec2, tile_size: u32, num_z_slices: u32) -> Self {
        Self {
            viewport,
            tile_size,
            tile_count: viewport.div_round_up(tile_size),
            num_z_slices,
        }
    }

    pub fn cluster_count(&self) -> usize {
        (self.tile_count.x * self.tile_count.y * self.num_z_slices) as usize
    }

    pub fn element_count(&self) -> usize {
        self.cluster_count() * SPOT_LIGHT_ELEMENTS_PER_CLUSTER as usize
    }

    pub fn cluster_index(&self, x: u32, y: u32, z: u32) -> usize {
        ((z * self.tile_count.y + y) * self.tile_count.x + x) as usize
    }
}

/// Host copy of the cluster bitmask, in the same layout as the device buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightAssignment {
    grid: ClusterGrid,
    words: Vec<u32>,
}

impl LightAssignment {
    pub fn new(grid: ClusterGrid) -> Self {
        Self {
            grid,
            words: vec![0; grid.element_count()],
        }
    }

    pub fn from_bytes(grid: ClusterGrid, bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), grid.element_count() * mem::size_of::<u32>());
        Self {
            grid,
            words: bytes
                .chunks_exact(4)
                .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        }
    }

    pub fn grid(&self) -> &ClusterGrid {
        &self.grid
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    fn word_index(&self, x: u32, y: u32, z: u32, light_index: u32) -> usize {
        self.grid.cluster_index(x, y, z) * SPOT_LIGHT_ELEMENTS_PER_CLUSTER as usize + (light_index / 32) as usize
    }

    pub fn set(&mut self, x: u32, y: u32, z: u32, light_index: u32) {
        let i = self.word_index(x, y, z, light_index);
        self.words[i] |= 1 << (light_index % 32);
    }

    pub fn contains(&self, x: u32, y: u32, z: u32, light_index: u32) -> bool {
        let i = self.word_index(x, y, z, light_index);
        (self.words[i] & (1 << (light_index % 32))) != 0
    }

    /// Marks every cluster overlapped by the screen space bounding box of each cone, over its
    /// slice range. Cones that cross the near plane cover the whole screen.
    pub fn rasterize_conservative(grid: ClusterGrid, camera: &Camera, bounds: &[ClusterBounds]) -> Self {
        let mut assignment = Self::new(grid);
        let cone = ConeMesh::new(CONE_SIDES);
        let tile_max = UVec2::new(grid.tile_count.x - 1, grid.tile_count.y - 1);
        for b in bounds {
            let mut lo = Vec2::broadcast(f32::MAX);
            let mut hi = Vec2::broadcast(f32::MIN);
            let mut full_screen = false;
            for v in cone.vertices.iter() {
                let view = camera.world_to_view(b.transform_point(*v));
                if view.z <= camera.near_clip {
                    full_screen = true;
                    break;
                }
                let ndc = camera.view_to_ndc(view);
                let pixel = Vec2::new(0.5 * (ndc.x + 1.0), 0.5 * (1.0 - ndc.y)) * grid.viewport.as_float();
                lo = lo.min_by_component(pixel);
                hi = hi.max_by_component(pixel);
            }
            let (first, last) = if full_screen || b.intersects_near_clip(camera) {
                (UVec2::new(0, 0), tile_max)
            } else {
                let limit = grid.viewport.as_float();
                if hi.x < 0.0 || hi.y < 0.0 || lo.x >= limit.x || lo.y >= limit.y {
                    continue;
                }
                let tile = grid.tile_size as f32;
                let to_tile = |p: Vec2| {
                    UVec2::new(
                        ((p.x.max(0.0) / tile) as u32).min(tile_max.x),
                        ((p.y.max(0.0) / tile) as u32).min(tile_max.y),
                    )
                };
                (to_tile(lo), to_tile(hi))
            };
            for z in b.z_bounds.min..=b.z_bounds.max {
                for y in first.y..=last.y {
                    for x in first.x..=last.x {
                        assignment.set(x, y, z, b.light_index);
                    }
                }
            }
        }
        assignment
    }
}

/// Result of one cluster update, with bounds ordered intersecting lights first.
#[derive(Debug, Clone)]
pub struct ClusterUpdate {
    pub grid: ClusterGrid,
    pub bounds: Vec<ClusterBounds>,
    pub num_intersecting: u32,
}

impl ClusterUpdate {
    pub fn light_count(&self) -> u32 {
        self.bounds.len() as u32
    }

    pub fn num_non_intersecting(&self) -> u32 {
        self.light_count() - self.num_intersecting
    }
}

/// Bins spot lights into view space clusters by rasterizing their bounding cones.
pub struct LightClusterCuller {
    grid: ClusterGrid,
    cluster_buffer: BufferId,
    cluster_usage: BufferUsage,
    bounds_buffer: BufferId,
    cone_vertex_buffer: BufferId,
    cone_index_buffer: BufferId,
    cone_index_count: u32,
    intersecting_pipeline: PipelineId,
    back_face_pipeline: PipelineId,
    front_face_pipeline: PipelineId,
}

impl LightClusterCuller {
    const CLUSTER_ALL_USAGE: BufferUsage = BufferUsage::TRANSFER_WRITE
        .union(BufferUsage::FRAGMENT_STORAGE_ATOMIC)
        .union(BufferUsage::FRAGMENT_STORAGE_READ);
    const LAYOUT: BindingLayout = BindingLayout {
        uniform_size: mem::size_of::<ClusterConstants>() as u32,
        acceleration_structures: 0,
        storage_buffers: 2,
        storage_images: 0,
        sampled_images: 0,
    };

    pub fn new(backend: &mut dyn Backend, viewport: UVec2, settings: &RenderSettings) -> Result<Self, PipelineError> {
        let cone = ConeMesh::new(CONE_SIDES);
        let cone_vertex_buffer = backend.create_buffer(
            &BufferDesc::new(cone.vertices.len() * mem::size_of::<Vec3>()),
            BufferUsage::VERTEX_BUFFER,
        );
        backend.write_buffer(cone_vertex_buffer, 0, bytemuck::cast_slice(&cone.vertices));
        backend.buffer_barrier(cone_vertex_buffer, BufferUsage::empty(), BufferUsage::VERTEX_BUFFER);
        let cone_index_buffer = backend.create_buffer(
            &BufferDesc::new(cone.indices.len() * mem::size_of::<u32>()),
            BufferUsage::INDEX_BUFFER,
        );
        backend.write_buffer(cone_index_buffer, 0, bytemuck::cast_slice(&cone.indices));
        backend.buffer_barrier(cone_index_buffer, BufferUsage::empty(), BufferUsage::INDEX_BUFFER);

        let bounds_buffer = backend.create_buffer(
            &BufferDesc::new(MAX_SPOT_LIGHTS as usize * mem::size_of::<GpuClusterBounds>()),
            BufferUsage::VERTEX_STORAGE_READ,
        );
        backend.buffer_barrier(bounds_buffer, BufferUsage::empty(), BufferUsage::VERTEX_STORAGE_READ);

        let pipeline = |backend: &mut dyn Backend, name, cull_mode, force_front_facing| {
            backend.create_graphics_pipeline(&GraphicsPipelineDesc {
                name,
                vertex_shader: "cluster/cone.vert.spv",
                fragment_shader: "cluster/cone.frag.spv",
                cull_mode,
                force_front_facing,
                color_formats: Vec::new(),
                layout: Self::LAYOUT,
            })
        };
        let intersecting_pipeline = pipeline(backend, "cluster-intersecting", CullMode::None, true)?;
        let back_face_pipeline = pipeline(backend, "cluster-back-faces", CullMode::Front, false)?;
        let front_face_pipeline = pipeline(backend, "cluster-front-faces", CullMode::Back, false)?;

        let grid = ClusterGrid::new(viewport, settings.cluster_tile_size, settings.num_z_slices);
        let cluster_buffer = Self::create_cluster_buffer(backend, &grid);

        Ok(Self {
            grid,
            cluster_buffer,
            cluster_usage: BufferUsage::empty(),
            bounds_buffer,
            cone_vertex_buffer,
            cone_index_buffer,
            cone_index_count: cone.indices.len() as u32,
            intersecting_pipeline,
            back_face_pipeline,
            front_face_pipeline,
        })
    }

    fn create_cluster_buffer(backend: &mut dyn Backend, grid: &ClusterGrid) -> BufferId {
        backend.create_buffer(
            &BufferDesc::new(grid.element_count() * mem::size_of::<u32>()),
            Self::CLUSTER_ALL_USAGE,
        )
    }

    pub fn grid(&self) -> &ClusterGrid {
        &self.grid
    }

    /// Bitmask of lights per cluster, readable by fragment shaders after an update.
    pub fn cluster_buffer(&self) -> BufferId {
        self.cluster_buffer
    }

    pub fn resize(&mut self, backend: &mut dyn Backend, grid: ClusterGrid) {
        if grid != self.grid {
            debug!(
                "resizing light clusters to {}x{}x{}",
                grid.tile_count.x, grid.tile_count.y, grid.num_z_slices
            );
            backend.destroy_buffer(self.cluster_buffer);
            self.cluster_buffer = Self::create_cluster_buffer(backend, &grid);
            self.cluster_usage = BufferUsage::empty();
            self.grid = grid;
        }
    }

    /// Computes per-light bounds, with lights that touch the near clip plane moved to the front.
    pub fn update_lights(lights: &[SpotLight], camera: &Camera, settings: &RenderSettings, grid: ClusterGrid) -> ClusterUpdate {
        let light_count = settings.light_count(lights.len());
        let (mut intersecting, non_intersecting): (Vec<_>, Vec<_>) = lights
            .iter()
            .take(light_count as usize)
            .enumerate()
            .map(|(i, light)| ClusterBounds::new(i as u32, light, settings.spot_light_range, camera, grid.num_z_slices))
            .partition(|bounds| bounds.intersects_near_clip(camera));

        let mut num_intersecting = intersecting.len() as u32;
        debug_assert!(num_intersecting <= light_count);
        if num_intersecting > light_count {
            warn!(
                "{} near plane lights exceeds light count {}, clamping",
                num_intersecting, light_count
            );
            num_intersecting = light_count;
        }
        intersecting.extend(non_intersecting);
        ClusterUpdate {
            grid,
            bounds: intersecting,
            num_intersecting,
        }
    }

    pub fn update_clusters(
        &mut self,
        backend: &mut dyn Backend,
        lights: &[SpotLight],
        camera: &Camera,
        settings: &RenderSettings,
        viewport: UVec2,
    ) -> ClusterUpdate {
        self.resize(
            backend,
            ClusterGrid::new(viewport, settings.cluster_tile_size, settings.num_z_slices),
        );
        let update = Self::update_lights(lights, camera, settings, self.grid);
        self.render(backend, camera, &update);
        update
    }

    fn transition_clusters(&mut self, backend: &mut dyn Backend, usage: BufferUsage) {
        backend.buffer_barrier(self.cluster_buffer, self.cluster_usage, usage);
        self.cluster_usage = usage;
    }

    fn render(&mut self, backend: &mut dyn Backend, camera: &Camera, update: &ClusterUpdate) {
        self.transition_clusters(backend, BufferUsage::TRANSFER_WRITE);
        backend.clear_buffer(self.cluster_buffer, 0);

        let light_count = update.light_count();
        if light_count == 0 {
            self.transition_clusters(backend, BufferUsage::FRAGMENT_STORAGE_READ);
            return;
        }

        let gpu_bounds: Vec<GpuClusterBounds> = update.bounds.iter().map(ClusterBounds::gpu_bounds).collect();
        backend.write_buffer(self.bounds_buffer, 0, bytemuck::cast_slice(&gpu_bounds));

        let constants = ClusterConstants {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            tile_count: [self.grid.tile_count.x, self.grid.tile_count.y],
            num_z_slices: self.grid.num_z_slices,
            tile_size: self.grid.tile_size,
            near_clip: camera.near_clip,
            far_clip: camera.far_clip,
            light_count,
            num_intersecting: update.num_intersecting,
        };

        let passes = [
            (self.intersecting_pipeline, 0, update.num_intersecting),
            (self.back_face_pipeline, update.num_intersecting, update.num_non_intersecting()),
            (self.front_face_pipeline, update.num_intersecting, update.num_non_intersecting()),
        ];
        self.transition_clusters(backend, BufferUsage::FRAGMENT_STORAGE_ATOMIC);
        for (pass_index, &(pipeline, first_instance, instance_count)) in passes.iter().enumerate() {
            if pass_index != 0 {
                // later passes OR into bits written by the previous one
                self.transition_clusters(backend, BufferUsage::FRAGMENT_STORAGE_ATOMIC);
            }
            if instance_count == 0 {
                continue;
            }
            backend.draw_indexed(&DrawIndexed {
                pipeline,
                viewport: self.grid.viewport,
                vertex_buffer: self.cone_vertex_buffer,
                index_buffer: self.cone_index_buffer,
                first_index: 0,
                index_count: self.cone_index_count,
                vertex_offset: 0,
                first_instance,
                instance_count,
                color_targets: &[],
                bindings: Bindings {
                    buffers: &[
                        (self.bounds_buffer, BufferUsage::VERTEX_STORAGE_READ),
                        (self.cluster_buffer, BufferUsage::FRAGMENT_STORAGE_ATOMIC),
                    ],
                    images: &[],
                },
                uniforms: bytemuck::bytes_of(&constants),
            });
        }
        self.transition_clusters(backend, BufferUsage::FRAGMENT_STORAGE_READ);
    }

    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.cluster_buffer);
        backend.destroy_buffer(self.bounds_buffer);
        backend.destroy_buffer(self.cone_vertex_buffer);
        backend.destroy_buffer(self.cone_index_buffer);
        backend.destroy_pipeline(self.intersecting_pipeline);
        backend.destroy_pipeline(self.back_face_pipeline);
        backend.destroy_pipeline(self.front_face_pipeline);
    }
}
