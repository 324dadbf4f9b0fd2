use crate::backend::*;
use crate::scene::*;
use bytemuck::{Pod, Zeroable};
use spark::vk;
use std::mem;

/// Per-geometry metadata, indexed by geometry index in hit shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable, Pod)]
pub struct GeometryRecord {
    pub vertex_offset: u32,
    pub index_offset: u32,
    pub material_index: u32,
    pub is_opaque: u32,
}

impl GeometryRecord {
    pub fn opaque(&self) -> bool {
        self.is_opaque != 0
    }
}

/// Ray tracing geometry for a model, with one record per mesh.
pub struct GeometryDescriptors {
    pub geometries: Vec<TriangleGeometryDesc>,
    pub records: Vec<GeometryRecord>,
}

impl GeometryDescriptors {
    /// Meshes without an opacity texture are flagged opaque so that any-hit shaders are skipped.
    pub fn new(model: &Model, vertex_buffer: BufferId, index_buffer: BufferId) -> Self {
        let mut geometries = Vec::with_capacity(model.meshes.len());
        let mut records = Vec::with_capacity(model.meshes.len());
        for mesh in model.mesh_ref_iter().filter_map(|r| model.mesh(r)) {
            let is_opaque = model
                .material(mesh.material_ref)
                .map_or(true, |material| !material.has_opacity_texture);
            geometries.push(TriangleGeometryDesc {
                vertex_buffer,
                first_vertex: mesh.vertex_offset,
                vertex_count: mesh.vertex_count,
                vertex_stride: mem::size_of::<Vertex>() as u32,
                vertex_format: vk::Format::R32G32B32_SFLOAT,
                index_buffer,
                first_index: mesh.index_offset,
                triangle_count: mesh.index_count / 3,
                flags: if is_opaque {
                    vk::GeometryFlagsKHR::OPAQUE
                } else {
                    vk::GeometryFlagsKHR::empty()
                },
            });
            records.push(GeometryRecord {
                vertex_offset: mesh.vertex_offset,
                index_offset: mesh.index_offset,
                material_index: mesh.material_ref.0,
                is_opaque: is_opaque as u32,
            });
        }
        Self { geometries, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn opacity_follows_material() {
        let model = create_box_test_scene(1.0);
        let mut buffers = SlotMap::<BufferId, ()>::with_key();
        let vertex_buffer = buffers.insert(());
        let index_buffer = buffers.insert(());
        let desc = GeometryDescriptors::new(&model, vertex_buffer, index_buffer);

        assert_eq!(desc.len(), model.meshes.len());
        for ((geometry, record), mesh) in desc.geometries.iter().zip(desc.records.iter()).zip(model.meshes.iter()) {
            let material = &model.materials[mesh.material_ref.0 as usize];
            assert_eq!(record.opaque(), !material.has_opacity_texture);
            assert_eq!(geometry.is_opaque(), record.opaque());
            assert_eq!(record.vertex_offset, geometry.first_vertex);
            assert_eq!(record.index_offset, geometry.first_index);
            assert_eq!(geometry.triangle_count * 3, mesh.index_count);
        }
        assert_eq!(desc.records.iter().filter(|r| !r.opaque()).count(), 1);
    }
}
