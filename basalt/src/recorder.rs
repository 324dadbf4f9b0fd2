use crate::backend::*;
use crate::error::PipelineError;
use crate::maths::*;
use crate::usage::*;
use log::{trace, warn};
use serde::Serialize;
use slotmap::SlotMap;
use spark::vk;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineKind {
    RayTracing,
    Graphics,
    Compute,
}

/// One call made against the backend, in submission order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateBuffer {
        id: BufferId,
        size: usize,
        all_usage: BufferUsage,
    },
    DestroyBuffer {
        id: BufferId,
    },
    WriteBuffer {
        id: BufferId,
        offset: usize,
        size: usize,
    },
    ClearBuffer {
        id: BufferId,
        value: u32,
    },
    BufferBarrier {
        id: BufferId,
        old_usage: BufferUsage,
        new_usage: BufferUsage,
        #[serde(skip)]
        masks: BarrierMasks,
    },
    CreateImage {
        id: ImageId,
        width: u32,
        height: u32,
        all_usage: ImageUsage,
    },
    DestroyImage {
        id: ImageId,
    },
    ClearImage {
        id: ImageId,
        value: [f32; 4],
    },
    ImageBarrier {
        id: ImageId,
        old_usage: ImageUsage,
        new_usage: ImageUsage,
        #[serde(skip)]
        masks: BarrierMasks,
        #[serde(skip)]
        new_layout: Option<vk::ImageLayout>,
    },
    ReadImage {
        id: ImageId,
    },
    WriteImage {
        id: ImageId,
    },
    BuildAccelerationStructure {
        level: AccelerationStructureLevel,
        destination: BufferId,
        scratch: BufferId,
        primitive_count: u32,
    },
    CreatePipeline {
        id: PipelineId,
        name: &'static str,
        kind: PipelineKind,
    },
    DestroyPipeline {
        id: PipelineId,
    },
    DrawIndexed {
        pipeline: &'static str,
        index_count: u32,
        first_instance: u32,
        instance_count: u32,
    },
    TraceRays {
        pipeline: &'static str,
        width: u32,
        height: u32,
        raygen: Vec<&'static str>,
        miss: Vec<&'static str>,
        hit: Vec<&'static str>,
    },
    Dispatch {
        pipeline: &'static str,
        group_count: [u32; 2],
    },
    BeginTimestamp {
        name: &'static str,
    },
    EndTimestamp {
        name: &'static str,
    },
    EndFrame {
        frame_index: u64,
    },
}

/// A misuse of the backend found while recording.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum Violation {
    #[error("{command}: {resource} was destroyed or never created")]
    UnknownResource { command: &'static str, resource: String },

    #[error("{command}: {resource} is in {current} but was used as {access}")]
    UsageMismatch {
        command: &'static str,
        resource: String,
        current: String,
        access: String,
    },

    #[error("{command}: {resource} was not created for {usage}")]
    UndeclaredUsage {
        command: &'static str,
        resource: String,
        usage: String,
    },

    #[error("{command}: {resource} was written with no barrier before this access")]
    Hazard { command: &'static str, resource: String },

    #[error("{command}: device address {address:#x} is not within a buffer in {usage}")]
    BadDeviceAddress {
        command: &'static str,
        address: u64,
        usage: String,
    },

    #[error("{command}: {resource} cannot be in {usage}, which needs more than one image layout")]
    LayoutConflict {
        command: &'static str,
        resource: String,
        usage: String,
    },

    #[error("{command}: {detail}")]
    InvalidCommand { command: &'static str, detail: String },
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub shader_table_alignment: ShaderTableAlignment,
    pub max_recursion_depth: u32,
    /// Report a zero prebuild size for this level, as a broken driver would.
    pub zero_prebuild_level: Option<AccelerationStructureLevel>,
    /// Exports to leave out of every ray tracing pipeline.
    pub missing_exports: Vec<&'static str>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            shader_table_alignment: ShaderTableAlignment {
                handle_size: 32,
                handle_alignment: 32,
                base_alignment: 64,
            },
            max_recursion_depth: 31,
            zero_prebuild_level: None,
            missing_exports: Vec::new(),
        }
    }
}

struct BufferState {
    desc: BufferDesc,
    all_usage: BufferUsage,
    usage: BufferUsage,
    address: vk::DeviceAddress,
    data: Vec<u8>,
    pending_write: bool,
}

/// Host copy of an image. Cleared images stay a single value until written texel by texel.
enum ImageContents {
    Uniform([f32; 4]),
    Texels(Vec<f32>),
}

impl ImageContents {
    fn to_texels(&self, desc: &ImageDesc) -> Vec<f32> {
        match self {
            ImageContents::Uniform(value) => {
                let channels = desc.channel_count();
                value[..channels].repeat(desc.float_count() / channels)
            }
            ImageContents::Texels(texels) => texels.clone(),
        }
    }
}

struct ImageState {
    desc: ImageDesc,
    all_usage: ImageUsage,
    usage: ImageUsage,
    contents: ImageContents,
    pending_write: bool,
}

impl ImageState {
    fn overwrite(&mut self, texels: &[f32]) {
        assert_eq!(texels.len(), self.desc.float_count());
        self.contents = ImageContents::Texels(texels.to_vec());
    }
}

struct PipelineState {
    name: &'static str,
    kind: PipelineKind,
    exports: Vec<(&'static str, ShaderIdentifier)>,
}

#[derive(Default)]
struct QuerySet {
    open: Vec<(&'static str, usize)>,
    timings: Vec<(&'static str, f32)>,
}

/// In-process backend that keeps resource contents on the host and checks every command
/// against the resource usage rules a real GPU relies on.
pub struct Recorder {
    config: RecorderConfig,
    buffers: SlotMap<BufferId, BufferState>,
    images: SlotMap<ImageId, ImageState>,
    pipelines: SlotMap<PipelineId, PipelineState>,
    next_address: vk::DeviceAddress,
    commands: Vec<Command>,
    violations: Vec<Violation>,
    frame_index: u64,
    query_sets: Vec<QuerySet>,
    timings: Vec<(&'static str, f32)>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

impl Recorder {
    const ADDRESS_ALIGNMENT: u32 = 256;
    /// Simulated GPU time per recorded command.
    const MS_PER_COMMAND: f32 = 0.01;

    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            next_address: 0x1000_0000,
            commands: Vec::new(),
            violations: Vec::new(),
            frame_index: 0,
            query_sets: (0..RENDER_LATENCY).map(|_| QuerySet::default()).collect(),
            timings: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn commands_to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.commands)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    pub fn buffer_exists(&self, id: BufferId) -> bool {
        self.buffers.contains_key(id)
    }

    pub fn buffer_data(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(id).map(|buffer| buffer.data.as_slice())
    }

    pub fn buffer_usage(&self, id: BufferId) -> Option<BufferUsage> {
        self.buffers.get(id).map(|buffer| buffer.usage)
    }

    pub fn image_texels(&self, id: ImageId) -> Option<Vec<f32>> {
        self.images.get(id).map(|image| image.contents.to_texels(&image.desc))
    }

    pub fn image_usage(&self, id: ImageId) -> Option<ImageUsage> {
        self.images.get(id).map(|image| image.usage)
    }

    /// Overwrites image contents as if a shader had written them.
    pub fn fill_image(&mut self, id: ImageId, texels: &[f32]) {
        if let Some(image) = self.images.get_mut(id) {
            image.overwrite(texels);
        }
    }

    fn push(&mut self, command: Command) {
        trace!("{:?}", command);
        self.commands.push(command);
    }

    fn violation(&mut self, violation: Violation) {
        warn!("{}", violation);
        self.violations.push(violation);
    }

    fn access_buffer(&mut self, command: &'static str, id: BufferId, access: BufferUsage) {
        let result = match self.buffers.get_mut(id) {
            None => Err(Violation::UnknownResource {
                command,
                resource: format!("{:?}", id),
            }),
            Some(buffer) => {
                if !buffer.usage.contains(access) {
                    Err(Violation::UsageMismatch {
                        command,
                        resource: format!("{:?}", id),
                        current: format!("{:?}", buffer.usage),
                        access: format!("{:?}", access),
                    })
                } else if buffer.pending_write {
                    Err(Violation::Hazard {
                        command,
                        resource: format!("{:?}", id),
                    })
                } else {
                    buffer.pending_write = access.as_access_category().is_write();
                    Ok(())
                }
            }
        };
        if let Err(violation) = result {
            self.violation(violation);
        }
    }

    fn access_image(&mut self, command: &'static str, id: ImageId, access: ImageUsage) {
        let result = match self.images.get_mut(id) {
            None => Err(Violation::UnknownResource {
                command,
                resource: format!("{:?}", id),
            }),
            Some(image) => {
                if !image.usage.contains(access) {
                    Err(Violation::UsageMismatch {
                        command,
                        resource: format!("{:?}", id),
                        current: format!("{:?}", image.usage),
                        access: format!("{:?}", access),
                    })
                } else if image.pending_write {
                    Err(Violation::Hazard {
                        command,
                        resource: format!("{:?}", id),
                    })
                } else {
                    image.pending_write = access.as_access_category().is_write();
                    Ok(())
                }
            }
        };
        if let Err(violation) = result {
            self.violation(violation);
        }
    }

    /// Color attachment writes are ordered between draws, so only the usage is checked.
    fn attach_image(&mut self, command: &'static str, id: ImageId) {
        let result = match self.images.get_mut(id) {
            None => Err(Violation::UnknownResource {
                command,
                resource: format!("{:?}", id),
            }),
            Some(image) if !image.usage.contains(ImageUsage::COLOR_ATTACHMENT_WRITE) => Err(Violation::UsageMismatch {
                command,
                resource: format!("{:?}", id),
                current: format!("{:?}", image.usage),
                access: format!("{:?}", ImageUsage::COLOR_ATTACHMENT_WRITE),
            }),
            Some(image) => {
                image.pending_write = true;
                Ok(())
            }
        };
        if let Err(violation) = result {
            self.violation(violation);
        }
    }

    fn access_bindings(&mut self, command: &'static str, bindings: &Bindings) {
        for &(id, usage) in bindings.buffers {
            self.access_buffer(command, id, usage);
        }
        for &(id, usage) in bindings.images {
            self.access_image(command, id, usage);
        }
    }

    fn resolve_address(&self, address: vk::DeviceAddress) -> Option<BufferId> {
        self.buffers.iter().find_map(|(id, buffer)| {
            let end = buffer.address + buffer.desc.size as vk::DeviceAddress;
            if address >= buffer.address && address < end {
                Some(id)
            } else {
                None
            }
        })
    }

    fn pipeline_name(&mut self, command: &'static str, id: PipelineId, kind: PipelineKind) -> &'static str {
        match self.pipelines.get(id) {
            Some(pipeline) if pipeline.kind == kind => pipeline.name,
            Some(pipeline) => {
                let name = pipeline.name;
                self.violation(Violation::InvalidCommand {
                    command,
                    detail: format!("pipeline \"{}\" is not a {:?} pipeline", name, kind),
                });
                name
            }
            None => {
                self.violation(Violation::UnknownResource {
                    command,
                    resource: format!("{:?}", id),
                });
                "<unknown>"
            }
        }
    }

    /// Decodes a shader table region back to the exports its records identify.
    fn read_shader_table(
        &mut self,
        command: &'static str,
        pipeline: PipelineId,
        region: &vk::StridedDeviceAddressRegionKHR,
    ) -> Vec<&'static str> {
        let id = match self.resolve_address(region.device_address) {
            Some(id) => id,
            None => {
                self.violation(Violation::BadDeviceAddress {
                    command,
                    address: region.device_address,
                    usage: format!("{:?}", BufferUsage::RAY_TRACING_SHADER_BINDING_TABLE),
                });
                return Vec::new();
            }
        };
        self.access_buffer(command, id, BufferUsage::RAY_TRACING_SHADER_BINDING_TABLE);

        let alignment = self.config.shader_table_alignment;
        let (buffer, exports) = match (self.buffers.get(id), self.pipelines.get(pipeline)) {
            (Some(buffer), Some(pipeline)) => (buffer, &pipeline.exports),
            _ => return Vec::new(),
        };
        let start = (region.device_address - buffer.address) as usize;
        let stride = region.stride as usize;
        let size = region.size as usize;
        let mut problems = Vec::new();
        if stride == 0 || stride % alignment.handle_alignment as usize != 0 {
            problems.push(format!("stride {} is not a multiple of {}", stride, alignment.handle_alignment));
        }
        if region.device_address % alignment.base_alignment as vk::DeviceAddress != 0 {
            problems.push(format!("table start {:#x} is misaligned", region.device_address));
        }
        if start + size > buffer.data.len() {
            problems.push(format!("table of {} bytes overruns its buffer", size));
        }
        let mut records = Vec::new();
        if problems.is_empty() {
            let handle_size = alignment.handle_size as usize;
            for record in buffer.data[start..start + size].chunks(stride) {
                let handle = &record[..handle_size.min(record.len())];
                match exports.iter().find(|(_, identifier)| identifier.as_bytes() == handle) {
                    Some((name, _)) => records.push(*name),
                    None => problems.push(format!("record {} matches no shader group", records.len())),
                }
            }
        }
        for detail in problems {
            self.violation(Violation::InvalidCommand { command, detail });
        }
        records
    }

    fn shader_identifier_bytes(&self, pipeline_serial: usize, export_name: &str) -> ShaderIdentifier {
        // FNV-1a, stretched over the handle
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ pipeline_serial as u64;
        let mut bytes = Vec::with_capacity(self.config.shader_table_alignment.handle_size as usize);
        for byte in export_name.bytes() {
            hash = (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3);
        }
        while bytes.len() < self.config.shader_table_alignment.handle_size as usize {
            hash = (hash ^ bytes.len() as u64).wrapping_mul(0x0100_0000_01b3);
            bytes.extend_from_slice(&hash.to_le_bytes());
        }
        bytes.truncate(self.config.shader_table_alignment.handle_size as usize);
        ShaderIdentifier::from_bytes(&bytes)
    }

    fn add_pipeline(
        &mut self,
        name: &'static str,
        kind: PipelineKind,
        export_names: Vec<&'static str>,
    ) -> PipelineId {
        let serial = self.pipelines.len() + self.commands.len();
        let exports = export_names
            .into_iter()
            .map(|export| (export, self.shader_identifier_bytes(serial, export)))
            .collect();
        let id = self.pipelines.insert(PipelineState { name, kind, exports });
        self.push(Command::CreatePipeline { id, name, kind });
        id
    }

    fn validate_ray_tracing_pipeline(&self, desc: &RayTracingPipelineDesc) -> Result<Vec<&'static str>, PipelineError> {
        let creation = |reason: String| PipelineError::Creation { name: desc.name, reason };
        let mut library_exports = Vec::new();
        let mut hit_groups = Vec::new();
        let mut has_shader_config = false;
        let mut has_layout = false;
        let mut recursion_depth = None;
        for sub_object in desc.sub_objects.iter() {
            match sub_object {
                PipelineSubObject::Library { exports, .. } => library_exports.extend(exports.iter().copied()),
                PipelineSubObject::HitGroup(hit_group) => hit_groups.push(hit_group),
                PipelineSubObject::ShaderConfig {
                    max_payload_size,
                    max_attribute_size,
                } => {
                    if *max_payload_size == 0 || *max_attribute_size == 0 {
                        return Err(creation("shader config sizes must be non-zero".into()));
                    }
                    has_shader_config = true;
                }
                PipelineSubObject::GlobalBindingLayout(_) => has_layout = true,
                PipelineSubObject::PipelineConfig { max_recursion_depth } => {
                    recursion_depth = Some(*max_recursion_depth)
                }
            }
        }
        if !has_shader_config || !has_layout {
            return Err(creation("missing shader config or binding layout".into()));
        }
        match recursion_depth {
            Some(depth) if depth >= 1 && depth <= self.config.max_recursion_depth => {}
            Some(depth) => {
                return Err(creation(format!(
                    "recursion depth {} outside 1..={}",
                    depth, self.config.max_recursion_depth
                )))
            }
            None => return Err(creation("missing pipeline config".into())),
        }
        let mut exports: Vec<&'static str> = library_exports.clone();
        for hit_group in hit_groups {
            for shader in hit_group.closest_hit.iter().chain(hit_group.any_hit.iter()) {
                if !library_exports.contains(shader) {
                    return Err(creation(format!(
                        "hit group {} uses {} which no library exports",
                        hit_group.export_name, shader
                    )));
                }
            }
            exports.push(hit_group.export_name);
        }
        exports.retain(|export| !self.config.missing_exports.contains(export));
        Ok(exports)
    }

    fn fake_build_sizes(&self, inputs: &AccelerationStructureInputs) -> (u32, vk::AccelerationStructureBuildSizesInfoKHR) {
        let (primitive_count, node_size) = match inputs {
            AccelerationStructureInputs::BottomLevel { geometries } => {
                (geometries.iter().map(|g| g.triangle_count).sum::<u32>(), 64)
            }
            AccelerationStructureInputs::TopLevel { instance_count } => (*instance_count, 128),
        };
        let zero = self.config.zero_prebuild_level == Some(inputs.level());
        let sizes = vk::AccelerationStructureBuildSizesInfoKHR {
            acceleration_structure_size: if zero {
                0
            } else {
                256 + node_size * primitive_count as vk::DeviceSize
            },
            build_scratch_size: if zero {
                0
            } else {
                128 + (node_size / 2) * primitive_count as vk::DeviceSize
            },
            ..Default::default()
        };
        (primitive_count, sizes)
    }

    fn begin_frame_queries(&mut self) {
        let set = &mut self.query_sets[(self.frame_index % RENDER_LATENCY) as usize];
        // results from RENDER_LATENCY frames ago are now complete
        self.timings = set.timings.drain(..).collect();
        set.open.clear();
    }
}

impl Backend for Recorder {
    fn shader_table_alignment(&self) -> ShaderTableAlignment {
        self.config.shader_table_alignment
    }

    fn create_buffer(&mut self, desc: &BufferDesc, all_usage: BufferUsage) -> BufferId {
        let address = self.next_address;
        self.next_address += align_up(desc.size.max(1) as u32, Self::ADDRESS_ALIGNMENT) as vk::DeviceAddress;
        let id = self.buffers.insert(BufferState {
            desc: *desc,
            all_usage,
            usage: BufferUsage::empty(),
            address,
            data: vec![0; desc.size],
            pending_write: false,
        });
        self.push(Command::CreateBuffer {
            id,
            size: desc.size,
            all_usage,
        });
        id
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if self.buffers.remove(id).is_none() {
            self.violation(Violation::UnknownResource {
                command: "destroy_buffer",
                resource: format!("{:?}", id),
            });
        }
        self.push(Command::DestroyBuffer { id });
    }

    fn buffer_device_address(&self, id: BufferId) -> vk::DeviceAddress {
        self.buffers.get(id).map_or(0, |buffer| buffer.address)
    }

    fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[u8]) {
        match self.buffers.get_mut(id) {
            Some(buffer) if offset + data.len() <= buffer.data.len() => {
                buffer.data[offset..offset + data.len()].copy_from_slice(data);
            }
            Some(buffer) => {
                let detail = format!("{} bytes at {} overruns {} byte buffer", data.len(), offset, buffer.data.len());
                self.violation(Violation::InvalidCommand {
                    command: "write_buffer",
                    detail,
                });
            }
            None => self.violation(Violation::UnknownResource {
                command: "write_buffer",
                resource: format!("{:?}", id),
            }),
        }
        self.push(Command::WriteBuffer {
            id,
            offset,
            size: data.len(),
        });
    }

    fn clear_buffer(&mut self, id: BufferId, value: u32) {
        self.access_buffer("clear_buffer", id, BufferUsage::TRANSFER_WRITE);
        if let Some(buffer) = self.buffers.get_mut(id) {
            for word in buffer.data.chunks_mut(4) {
                word.copy_from_slice(&value.to_ne_bytes()[..word.len()]);
            }
        }
        self.push(Command::ClearBuffer { id, value });
    }

    fn buffer_barrier(&mut self, id: BufferId, old_usage: BufferUsage, new_usage: BufferUsage) {
        let resource = format!("{:?}", id);
        let result = match self.buffers.get_mut(id) {
            None => Err(Violation::UnknownResource {
                command: "buffer_barrier",
                resource,
            }),
            Some(buffer) => {
                let result = if buffer.usage != old_usage {
                    Err(Violation::UsageMismatch {
                        command: "buffer_barrier",
                        resource,
                        current: format!("{:?}", buffer.usage),
                        access: format!("{:?}", old_usage),
                    })
                } else if !buffer.all_usage.as_flags().contains(new_usage.as_flags()) {
                    Err(Violation::UndeclaredUsage {
                        command: "buffer_barrier",
                        resource,
                        usage: format!("{:?}", new_usage),
                    })
                } else {
                    Ok(())
                };
                buffer.usage = new_usage;
                buffer.pending_write = false;
                result
            }
        };
        if let Err(violation) = result {
            self.violation(violation);
        }
        self.push(Command::BufferBarrier {
            id,
            old_usage,
            new_usage,
            masks: BarrierMasks::for_buffer(old_usage, new_usage),
        });
    }

    fn create_image(&mut self, desc: &ImageDesc, all_usage: ImageUsage) -> ImageId {
        let id = self.images.insert(ImageState {
            desc: *desc,
            all_usage,
            usage: ImageUsage::empty(),
            contents: ImageContents::Uniform([0.0; 4]),
            pending_write: false,
        });
        self.push(Command::CreateImage {
            id,
            width: desc.size.x,
            height: desc.size.y,
            all_usage,
        });
        id
    }

    fn destroy_image(&mut self, id: ImageId) {
        if self.images.remove(id).is_none() {
            self.violation(Violation::UnknownResource {
                command: "destroy_image",
                resource: format!("{:?}", id),
            });
        }
        self.push(Command::DestroyImage { id });
    }

    fn clear_image(&mut self, id: ImageId, value: [f32; 4]) {
        self.access_image("clear_image", id, ImageUsage::TRANSFER_WRITE);
        if let Some(image) = self.images.get_mut(id) {
            image.contents = ImageContents::Uniform(value);
        }
        self.push(Command::ClearImage { id, value });
    }

    fn image_barrier(&mut self, id: ImageId, old_usage: ImageUsage, new_usage: ImageUsage) {
        let resource = format!("{:?}", id);
        let result = match self.images.get_mut(id) {
            None => Err(Violation::UnknownResource {
                command: "image_barrier",
                resource,
            }),
            Some(image) => {
                let result = if image.usage != old_usage {
                    Err(Violation::UsageMismatch {
                        command: "image_barrier",
                        resource,
                        current: format!("{:?}", image.usage),
                        access: format!("{:?}", old_usage),
                    })
                } else if !image.all_usage.as_flags().contains(new_usage.as_flags()) {
                    Err(Violation::UndeclaredUsage {
                        command: "image_barrier",
                        resource,
                        usage: format!("{:?}", new_usage),
                    })
                } else if new_usage.as_image_layout().is_none() {
                    Err(Violation::LayoutConflict {
                        command: "image_barrier",
                        resource,
                        usage: format!("{:?}", new_usage),
                    })
                } else {
                    Ok(())
                };
                image.usage = new_usage;
                image.pending_write = false;
                result
            }
        };
        if let Err(violation) = result {
            self.violation(violation);
        }
        self.push(Command::ImageBarrier {
            id,
            old_usage,
            new_usage,
            masks: BarrierMasks::for_image(old_usage, new_usage),
            new_layout: new_usage.as_image_layout(),
        });
    }

    fn read_image(&mut self, id: ImageId) -> Vec<f32> {
        self.access_image("read_image", id, ImageUsage::TRANSFER_READ);
        self.push(Command::ReadImage { id });
        self.images
            .get(id)
            .map_or_else(Vec::new, |image| image.contents.to_texels(&image.desc))
    }

    fn write_image(&mut self, id: ImageId, texels: &[f32]) {
        self.access_image("write_image", id, ImageUsage::TRANSFER_WRITE);
        if let Some(image) = self.images.get_mut(id) {
            image.overwrite(texels);
        }
        self.push(Command::WriteImage { id });
    }

    fn acceleration_structure_build_sizes(
        &self,
        inputs: &AccelerationStructureInputs,
    ) -> vk::AccelerationStructureBuildSizesInfoKHR {
        self.fake_build_sizes(inputs).1
    }

    fn build_acceleration_structure(&mut self, build: &AccelerationStructureBuild) {
        const COMMAND: &str = "build_acceleration_structure";
        let (primitive_count, sizes) = self.fake_build_sizes(&build.inputs);
        match build.inputs {
            AccelerationStructureInputs::BottomLevel { geometries } => {
                let mut inputs: Vec<BufferId> = Vec::new();
                for geometry in geometries {
                    for id in [geometry.vertex_buffer, geometry.index_buffer] {
                        if !inputs.contains(&id) {
                            inputs.push(id);
                        }
                    }
                }
                for id in inputs {
                    self.access_buffer(COMMAND, id, BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT);
                }
            }
            AccelerationStructureInputs::TopLevel { .. } => match build.instance_buffer {
                Some(instance_buffer) => {
                    self.access_buffer(COMMAND, instance_buffer, BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT);
                    // each instance references a bottom level structure by address
                    let references: Vec<vk::DeviceAddress> = self
                        .buffers
                        .get(instance_buffer)
                        .map(|buffer| {
                            buffer
                                .data
                                .chunks_exact(64)
                                .map(|instance| {
                                    let mut address = [0u8; 8];
                                    address.copy_from_slice(&instance[56..64]);
                                    u64::from_le_bytes(address)
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    for address in references {
                        match self.resolve_address(address) {
                            Some(id) => self.access_buffer(COMMAND, id, BufferUsage::ACCELERATION_STRUCTURE_READ),
                            None => self.violation(Violation::BadDeviceAddress {
                                command: COMMAND,
                                address,
                                usage: format!("{:?}", BufferUsage::ACCELERATION_STRUCTURE_READ),
                            }),
                        }
                    }
                }
                None => self.violation(Violation::InvalidCommand {
                    command: COMMAND,
                    detail: "top level build has no instance buffer".into(),
                }),
            },
        }

        self.access_buffer(COMMAND, build.scratch, BufferUsage::ACCELERATION_STRUCTURE_BUILD_SCRATCH);
        self.access_buffer(COMMAND, build.destination, BufferUsage::ACCELERATION_STRUCTURE_WRITE);
        let too_small = [
            (build.scratch, sizes.build_scratch_size),
            (build.destination, sizes.acceleration_structure_size),
        ]
        .iter()
        .filter_map(|&(id, required)| {
            self.buffers
                .get(id)
                .filter(|buffer| (buffer.desc.size as vk::DeviceSize) < required)
                .map(|buffer| format!("{:?} has {} bytes but needs {}", id, buffer.desc.size, required))
        })
        .collect::<Vec<_>>();
        for detail in too_small {
            self.violation(Violation::InvalidCommand { command: COMMAND, detail });
        }

        self.push(Command::BuildAccelerationStructure {
            level: build.inputs.level(),
            destination: build.destination,
            scratch: build.scratch,
            primitive_count,
        });
    }

    fn create_ray_tracing_pipeline(&mut self, desc: &RayTracingPipelineDesc) -> Result<PipelineId, PipelineError> {
        let exports = self.validate_ray_tracing_pipeline(desc)?;
        Ok(self.add_pipeline(desc.name, PipelineKind::RayTracing, exports))
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineId, PipelineError> {
        if desc.force_front_facing && desc.cull_mode != CullMode::None {
            return Err(PipelineError::Creation {
                name: desc.name,
                reason: "forcing front facing triangles requires culling to be disabled".into(),
            });
        }
        Ok(self.add_pipeline(desc.name, PipelineKind::Graphics, Vec::new()))
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<PipelineId, PipelineError> {
        if desc.group_size.x == 0 || desc.group_size.y == 0 {
            return Err(PipelineError::Creation {
                name: desc.name,
                reason: "group size must be non-zero".into(),
            });
        }
        Ok(self.add_pipeline(desc.name, PipelineKind::Compute, Vec::new()))
    }

    fn destroy_pipeline(&mut self, id: PipelineId) {
        if self.pipelines.remove(id).is_none() {
            self.violation(Violation::UnknownResource {
                command: "destroy_pipeline",
                resource: format!("{:?}", id),
            });
        }
        self.push(Command::DestroyPipeline { id });
    }

    fn shader_identifier(&self, pipeline: PipelineId, export_name: &str) -> Option<ShaderIdentifier> {
        self.pipelines.get(pipeline).and_then(|pipeline| {
            pipeline
                .exports
                .iter()
                .find(|(name, _)| *name == export_name)
                .map(|(_, identifier)| identifier.clone())
        })
    }

    fn draw_indexed(&mut self, draw: &DrawIndexed) {
        const COMMAND: &str = "draw_indexed";
        let pipeline = self.pipeline_name(COMMAND, draw.pipeline, PipelineKind::Graphics);
        self.access_buffer(COMMAND, draw.vertex_buffer, BufferUsage::VERTEX_BUFFER);
        self.access_buffer(COMMAND, draw.index_buffer, BufferUsage::INDEX_BUFFER);
        for &target in draw.color_targets {
            self.attach_image(COMMAND, target);
        }
        self.access_bindings(COMMAND, &draw.bindings);
        if draw.instance_count == 0 || draw.index_count == 0 {
            self.violation(Violation::InvalidCommand {
                command: COMMAND,
                detail: format!("empty draw with pipeline \"{}\"", pipeline),
            });
        }
        self.push(Command::DrawIndexed {
            pipeline,
            index_count: draw.index_count,
            first_instance: draw.first_instance,
            instance_count: draw.instance_count,
        });
    }

    fn trace_rays(&mut self, trace: &TraceRays) {
        const COMMAND: &str = "trace_rays";
        let pipeline = self.pipeline_name(COMMAND, trace.pipeline, PipelineKind::RayTracing);
        let raygen = self.read_shader_table(COMMAND, trace.pipeline, &trace.raygen);
        let miss = self.read_shader_table(COMMAND, trace.pipeline, &trace.miss);
        let hit = self.read_shader_table(COMMAND, trace.pipeline, &trace.hit);
        if raygen.len() != 1 {
            self.violation(Violation::InvalidCommand {
                command: COMMAND,
                detail: format!("expected one ray generation record, found {}", raygen.len()),
            });
        }
        self.access_buffer(COMMAND, trace.top_level, BufferUsage::RAY_TRACING_ACCELERATION_STRUCTURE);
        self.access_bindings(COMMAND, &trace.bindings);
        self.push(Command::TraceRays {
            pipeline,
            width: trace.size.x,
            height: trace.size.y,
            raygen,
            miss,
            hit,
        });
    }

    fn dispatch(&mut self, dispatch: &Dispatch) {
        const COMMAND: &str = "dispatch";
        let pipeline = self.pipeline_name(COMMAND, dispatch.pipeline, PipelineKind::Compute);
        self.access_bindings(COMMAND, &dispatch.bindings);
        self.push(Command::Dispatch {
            pipeline,
            group_count: [dispatch.group_count.x, dispatch.group_count.y],
        });
    }

    fn begin_timestamp(&mut self, name: &'static str) {
        let position = self.commands.len();
        let set = &mut self.query_sets[(self.frame_index % RENDER_LATENCY) as usize];
        set.open.push((name, position));
        self.push(Command::BeginTimestamp { name });
    }

    fn end_timestamp(&mut self, name: &'static str) {
        let position = self.commands.len();
        let set = &mut self.query_sets[(self.frame_index % RENDER_LATENCY) as usize];
        match set.open.iter().position(|(open, _)| *open == name) {
            Some(index) => {
                let (_, start) = set.open.remove(index);
                let elapsed = position.saturating_sub(start) as f32 * Self::MS_PER_COMMAND;
                set.timings.push((name, elapsed));
            }
            None => self.violation(Violation::InvalidCommand {
                command: "end_timestamp",
                detail: format!("no open timestamp named {}", name),
            }),
        }
        self.push(Command::EndTimestamp { name });
    }

    fn timestamp_ms(&self, name: &'static str) -> Option<f32> {
        self.timings
            .iter()
            .find(|(timing, _)| *timing == name)
            .map(|(_, ms)| *ms)
    }

    fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn end_frame(&mut self) {
        let frame_index = self.frame_index;
        self.push(Command::EndFrame { frame_index });
        self.frame_index += 1;
        self.begin_frame_queries();
    }
}
