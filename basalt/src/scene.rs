use crate::backend::*;
use crate::error::ConfigError;
use crate::maths::*;
use crate::usage::*;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{fs, path::Path, path::PathBuf};
use strum::{Display, EnumIter, EnumString, EnumVariantNames, IntoEnumIterator};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumVariantNames,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
pub enum SceneKind {
    Sponza,
    SunTemple,
    BoxTest,
    WhiteFurnace,
    TheInn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePreset {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub texture_dir: Option<PathBuf>,
    pub scale: f32,
    pub camera_position: [f32; 3],
    /// Pitch and yaw in radians.
    pub camera_rotation: [f32; 2],
    pub sun_direction: [f32; 3],
}

impl ScenePreset {
    pub fn camera_position(&self) -> Vec3 {
        self.camera_position.into()
    }

    pub fn sun_direction(&self) -> Vec3 {
        Vec3::from(self.sun_direction).normalized()
    }
}

/// Per-scene configuration, complete for every `SceneKind`.
#[derive(Debug, Clone)]
pub struct ScenePresets(HashMap<SceneKind, ScenePreset>);

impl ScenePresets {
    pub fn new(presets: HashMap<SceneKind, ScenePreset>) -> Result<Self, ConfigError> {
        if let Some(missing) = SceneKind::iter().find(|kind| !presets.contains_key(kind)) {
            return Err(ConfigError::MissingScenePreset(missing));
        }
        Ok(Self(presets))
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        Self::new(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn builtin() -> Self {
        let preset = |path: Option<&str>,
                      texture_dir: Option<&str>,
                      scale: f32,
                      camera_position: [f32; 3],
                      camera_rotation: [f32; 2],
                      sun_direction: [f32; 3]| ScenePreset {
            path: path.map(PathBuf::from),
            texture_dir: texture_dir.map(PathBuf::from),
            scale,
            camera_position,
            camera_rotation,
            sun_direction,
        };
        let mut presets = HashMap::new();
        presets.insert(
            SceneKind::Sponza,
            preset(
                Some("Content/Models/Sponza/Sponza_NoSpotLight.fbx"),
                None,
                0.01,
                [-11.5, 1.85, -0.45],
                [0.0, 1.544],
                [0.26, 0.987, -0.16],
            ),
        );
        presets.insert(
            SceneKind::SunTemple,
            preset(
                Some("Content/Models/SunTemple/SunTemple.fbx"),
                Some("Textures"),
                0.005,
                [-1.0, 5.5, 12.0],
                [0.2, 3.0],
                [-0.133_022_31, 0.642_787_6, 0.754_406_5],
            ),
        );
        presets.insert(
            SceneKind::BoxTest,
            preset(None, None, 1.0, [2.78, 2.74, -8.0], [0.0, 0.0], [0.26, 0.987, -0.16]),
        );
        presets.insert(
            SceneKind::WhiteFurnace,
            preset(None, None, 1.0, [0.0, 0.0, -3.0], [0.0, 0.0], [0.0, 1.0, 0.0]),
        );
        presets.insert(
            SceneKind::TheInn,
            preset(
                Some("Content/Models/theInn/source/theInn.fbx"),
                Some("../textures"),
                0.1,
                [0.0, 0.0, -30.0],
                [0.0, 0.0],
                [-0.218, 0.5, -0.839],
            ),
        );
        Self(presets)
    }

    pub fn get(&self, kind: SceneKind) -> &ScenePreset {
        &self.0[&kind]
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct LightmapVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub lightmap_uv: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterialRef(pub u32);

/// Indices are relative to `vertex_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mesh {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub material_ref: MaterialRef,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub base_color: Vec3,
    pub has_opacity_texture: bool,
}

/// A mesh drawn into the lightmap, addressing the secondary lightmap vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightmappedMesh {
    pub mesh_ref: MeshRef,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub position: Vec3,
    /// Unit vector along the cone axis, pointing away from the light.
    pub direction: Vec3,
    pub intensity: Vec3,
    /// Full cone angles in radians.
    pub inner_angle: f32,
    pub outer_angle: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Model {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub spot_lights: Vec<SpotLight>,
    pub lightmap_vertices: Vec<LightmapVertex>,
    pub lightmap_indices: Vec<u32>,
    pub lightmapped_meshes: Vec<LightmappedMesh>,
}

impl Model {
    pub fn mesh_ref_iter(&self) -> impl Iterator<Item = MeshRef> {
        (0..self.meshes.len()).map(|i| MeshRef(i as u32))
    }

    pub fn mesh(&self, r: MeshRef) -> Option<&Mesh> {
        self.meshes.get(r.0 as usize)
    }

    pub fn material(&self, r: MaterialRef) -> Option<&Material> {
        self.materials.get(r.0 as usize)
    }

    pub fn lightmapped_vertex_count(&self) -> usize {
        self.lightmap_vertices.len()
    }
}

/// Device buffers holding a model's geometry.
pub struct GpuModel {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub lightmap_buffers: Option<(BufferId, BufferId)>,
}

impl GpuModel {
    /// Read by acceleration structure builds and by hit shaders.
    pub const GEOMETRY_USAGE: BufferUsage =
        BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT.union(BufferUsage::RAY_TRACING_STORAGE_READ);

    pub fn upload(backend: &mut dyn Backend, model: &Model) -> Self {
        let vertex_buffer = Self::create_filled(
            backend,
            bytemuck::cast_slice(&model.vertices),
            Self::GEOMETRY_USAGE,
            Self::GEOMETRY_USAGE,
        );
        let index_buffer = Self::create_filled(
            backend,
            bytemuck::cast_slice(&model.indices),
            Self::GEOMETRY_USAGE,
            Self::GEOMETRY_USAGE,
        );
        let lightmap_buffers = if model.lightmap_vertices.is_empty() {
            None
        } else {
            let vertex_buffer = Self::create_filled(
                backend,
                bytemuck::cast_slice(&model.lightmap_vertices),
                BufferUsage::VERTEX_BUFFER,
                BufferUsage::VERTEX_BUFFER,
            );
            let index_buffer = Self::create_filled(
                backend,
                bytemuck::cast_slice(&model.lightmap_indices),
                BufferUsage::INDEX_BUFFER,
                BufferUsage::INDEX_BUFFER,
            );
            Some((vertex_buffer, index_buffer))
        };
        Self {
            vertex_buffer,
            index_buffer,
            lightmap_buffers,
        }
    }

    fn create_filled(
        backend: &mut dyn Backend,
        data: &[u8],
        all_usage: BufferUsage,
        initial_usage: BufferUsage,
    ) -> BufferId {
        let id = backend.create_buffer(&BufferDesc::new(data.len()), all_usage);
        backend.write_buffer(id, 0, data);
        backend.buffer_barrier(id, BufferUsage::empty(), initial_usage);
        id
    }

    pub fn destroy(self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
        if let Some((vertex_buffer, index_buffer)) = self.lightmap_buffers {
            backend.destroy_buffer(vertex_buffer);
            backend.destroy_buffer(index_buffer);
        }
    }
}

pub trait SceneSource {
    fn load(&mut self, kind: SceneKind, preset: &ScenePreset) -> Result<Model, ConfigError>;
}

/// Scenes that are generated in code rather than loaded from disk.
#[derive(Debug, Default)]
pub struct ProceduralScenes;

impl SceneSource for ProceduralScenes {
    fn load(&mut self, kind: SceneKind, preset: &ScenePreset) -> Result<Model, ConfigError> {
        match kind {
            SceneKind::BoxTest => Ok(create_box_test_scene(preset.scale)),
            SceneKind::WhiteFurnace => Ok(create_white_furnace_scene(preset.scale)),
            _ => Err(ConfigError::UnsupportedScene(kind)),
        }
    }
}

type Quad = [Vec3; 4];

#[derive(Default)]
struct SceneBuilder {
    model: Model,
    lightmapped_quads: Vec<(MeshRef, Vec<Quad>)>,
}

impl SceneBuilder {
    fn add_material(&mut self, base_color: Vec3, has_opacity_texture: bool) -> MaterialRef {
        let index = self.model.materials.len();
        self.model.materials.push(Material {
            base_color,
            has_opacity_texture,
        });
        MaterialRef(index as u32)
    }

    fn add_mesh(&mut self, quads: &[Quad], material_ref: MaterialRef, lightmapped: bool) -> MeshRef {
        let vertex_offset = self.model.vertices.len() as u32;
        let index_offset = self.model.indices.len() as u32;
        for (i, quad) in quads.iter().enumerate() {
            let normal = quad_normal(quad);
            let uvs = [
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(0.0, 1.0),
            ];
            for (position, uv) in quad.iter().zip(uvs.iter()) {
                self.model.vertices.push(Vertex {
                    position: *position,
                    normal,
                    uv: *uv,
                });
            }
            let base = 4 * i as u32;
            self.model
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        let mesh_ref = MeshRef(self.model.meshes.len() as u32);
        self.model.meshes.push(Mesh {
            vertex_offset,
            vertex_count: 4 * quads.len() as u32,
            index_offset,
            index_count: 6 * quads.len() as u32,
            material_ref,
        });
        if lightmapped {
            self.lightmapped_quads.push((mesh_ref, quads.to_vec()));
        }
        mesh_ref
    }

    fn add_spot_light(&mut self, position: Vec3, direction: Vec3, intensity: Vec3, inner_angle: f32, outer_angle: f32) {
        self.model.spot_lights.push(SpotLight {
            position,
            direction: direction.normalized(),
            intensity,
            inner_angle,
            outer_angle,
        });
    }

    /// Packs every lightmapped quad into its own cell of a square atlas.
    fn build(mut self) -> Model {
        let quad_count: usize = self.lightmapped_quads.iter().map(|(_, quads)| quads.len()).sum();
        let grid_size = (quad_count as f32).sqrt().ceil().max(1.0) as usize;
        let cell_size = 1.0 / grid_size as f32;
        let padding = 0.05 * cell_size;

        let mut cell_index = 0;
        for (mesh_ref, quads) in self.lightmapped_quads.drain(..) {
            let vertex_offset = self.model.lightmap_vertices.len() as u32;
            let index_offset = self.model.lightmap_indices.len() as u32;
            for (i, quad) in quads.iter().enumerate() {
                let cell = Vec2::new((cell_index % grid_size) as f32, (cell_index / grid_size) as f32) * cell_size;
                let lo = padding;
                let hi = cell_size - padding;
                let corners = [
                    Vec2::new(lo, lo),
                    Vec2::new(hi, lo),
                    Vec2::new(hi, hi),
                    Vec2::new(lo, hi),
                ];
                let normal = quad_normal(quad);
                for (position, corner) in quad.iter().zip(corners.iter()) {
                    self.model.lightmap_vertices.push(LightmapVertex {
                        position: *position,
                        normal,
                        lightmap_uv: cell + *corner,
                    });
                }
                let base = 4 * i as u32;
                self.model
                    .lightmap_indices
                    .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
                cell_index += 1;
            }
            self.model.lightmapped_meshes.push(LightmappedMesh {
                mesh_ref,
                vertex_offset,
                vertex_count: 4 * quads.len() as u32,
                index_offset,
                index_count: 6 * quads.len() as u32,
            });
        }
        self.model
    }
}

fn quad_normal(quad: &Quad) -> Vec3 {
    (quad[1] - quad[0]).cross(quad[2] - quad[0]).normalized()
}

fn scaled(scale: f32, quads: &[Quad]) -> Vec<Quad> {
    quads
        .iter()
        .map(|quad| [scale * quad[0], scale * quad[1], scale * quad[2], scale * quad[3]])
        .collect()
}

fn v(x: f32, y: f32, z: f32) -> Vec3 {
    10.0 * Vec3::new(x, y, z)
}

pub fn create_box_test_scene(scale: f32) -> Model {
    let mut builder = SceneBuilder::default();

    let white = builder.add_material(Vec3::new(0.73, 0.73, 0.73), false);
    let red = builder.add_material(Vec3::new(0.65, 0.05, 0.05), false);
    let green = builder.add_material(Vec3::new(0.12, 0.45, 0.15), false);
    let foliage = builder.add_material(Vec3::new(0.3, 0.6, 0.2), true);

    let floor = [v(0.5528, 0.0, 0.0), v(0.0, 0.0, 0.0), v(0.0, 0.0, 0.5592), v(0.5496, 0.0, 0.5592)];
    let ceiling = [
        v(0.556, 0.5488, 0.0),
        v(0.556, 0.5488, 0.5592),
        v(0.0, 0.5488, 0.5592),
        v(0.0, 0.5488, 0.0),
    ];
    let back_wall = [
        v(0.5496, 0.0, 0.5592),
        v(0.0, 0.0, 0.5592),
        v(0.0, 0.5488, 0.5592),
        v(0.556, 0.5488, 0.5592),
    ];
    let red_wall = [
        v(0.5528, 0.0, 0.0),
        v(0.5496, 0.0, 0.5592),
        v(0.556, 0.5488, 0.5592),
        v(0.556, 0.5488, 0.0),
    ];
    let green_wall = [
        v(0.0, 0.0, 0.5592),
        v(0.0, 0.0, 0.0),
        v(0.0, 0.548, 0.0),
        v(0.0, 0.548, 0.5592),
    ];
    let short_block = [
        [v(0.130, 0.165, 0.065), v(0.082, 0.165, 0.225), v(0.240, 0.165, 0.272), v(0.290, 0.165, 0.114)],
        [v(0.290, 0.0, 0.114), v(0.290, 0.165, 0.114), v(0.240, 0.165, 0.272), v(0.240, 0.0, 0.272)],
        [v(0.130, 0.0, 0.065), v(0.130, 0.165, 0.065), v(0.290, 0.165, 0.114), v(0.290, 0.0, 0.114)],
        [v(0.082, 0.0, 0.225), v(0.082, 0.165, 0.225), v(0.130, 0.165, 0.065), v(0.130, 0.0, 0.065)],
        [v(0.240, 0.0, 0.272), v(0.240, 0.165, 0.272), v(0.082, 0.165, 0.225), v(0.082, 0.0, 0.225)],
    ];
    let tall_block = [
        [v(0.423, 0.330, 0.247), v(0.265, 0.330, 0.296), v(0.314, 0.330, 0.456), v(0.472, 0.330, 0.406)],
        [v(0.423, 0.0, 0.247), v(0.423, 0.330, 0.247), v(0.472, 0.330, 0.406), v(0.472, 0.0, 0.406)],
        [v(0.472, 0.0, 0.406), v(0.472, 0.330, 0.406), v(0.314, 0.330, 0.456), v(0.314, 0.0, 0.456)],
        [v(0.314, 0.0, 0.456), v(0.314, 0.330, 0.456), v(0.265, 0.330, 0.296), v(0.265, 0.0, 0.296)],
        [v(0.265, 0.0, 0.296), v(0.265, 0.330, 0.296), v(0.423, 0.330, 0.247), v(0.423, 0.0, 0.247)],
    ];
    let leaves = [v(0.10, 0.25, 0.40), v(0.20, 0.25, 0.40), v(0.20, 0.40, 0.40), v(0.10, 0.40, 0.40)];

    builder.add_mesh(&scaled(scale, &[floor, ceiling, back_wall]), white, true);
    builder.add_mesh(&scaled(scale, &[red_wall]), red, true);
    builder.add_mesh(&scaled(scale, &[green_wall]), green, true);
    builder.add_mesh(&scaled(scale, &short_block), white, true);
    builder.add_mesh(&scaled(scale, &tall_block), white, true);
    builder.add_mesh(&scaled(scale, &[leaves]), foliage, false);

    let cone = |degrees: f32| degrees.to_radians();
    builder.add_spot_light(
        scale * v(0.278, 0.54, 0.28),
        -Vec3::unit_y(),
        Vec3::new(10.0, 9.0, 8.0),
        cone(40.0),
        cone(60.0),
    );
    builder.add_spot_light(
        scale * v(0.05, 0.5, 0.05),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(4.0, 4.0, 6.0),
        cone(20.0),
        cone(35.0),
    );

    builder.build()
}

/// A closed white box with no lights, lit only by the sky.
pub fn create_white_furnace_scene(scale: f32) -> Model {
    let mut builder = SceneBuilder::default();
    let white = builder.add_material(Vec3::broadcast(1.0), false);
    let s = 0.5 * scale;
    let p = |x: f32, y: f32, z: f32| Vec3::new(x * s, y * s, z * s);
    let faces = [
        [p(-1.0, -1.0, -1.0), p(1.0, -1.0, -1.0), p(1.0, -1.0, 1.0), p(-1.0, -1.0, 1.0)],
        [p(-1.0, 1.0, -1.0), p(-1.0, 1.0, 1.0), p(1.0, 1.0, 1.0), p(1.0, 1.0, -1.0)],
        [p(-1.0, -1.0, -1.0), p(-1.0, -1.0, 1.0), p(-1.0, 1.0, 1.0), p(-1.0, 1.0, -1.0)],
        [p(1.0, -1.0, -1.0), p(1.0, 1.0, -1.0), p(1.0, 1.0, 1.0), p(1.0, -1.0, 1.0)],
        [p(-1.0, -1.0, 1.0), p(1.0, -1.0, 1.0), p(1.0, 1.0, 1.0), p(-1.0, 1.0, 1.0)],
        [p(-1.0, -1.0, -1.0), p(-1.0, 1.0, -1.0), p(1.0, 1.0, -1.0), p(1.0, -1.0, -1.0)],
    ];
    builder.add_mesh(&faces, white, true);
    builder.build()
}
