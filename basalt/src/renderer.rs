use crate::accel::SceneAccel;
use crate::backend::*;
use crate::bake::*;
use crate::camera::Camera;
use crate::cluster::*;
use crate::denoise::DenoiserAdapter;
use crate::error::Error;
use crate::geometry::GeometryDescriptors;
use crate::maths::*;
use crate::path_trace::*;
use crate::progress::*;
use crate::sbt::RayTracingPipelineKind;
use crate::scene::*;
use crate::settings::*;
use log::{debug, info};

/// What the renderer did this frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub scene_loaded: Option<SceneKind>,
    pub accel_built: bool,
    pub accel_build_time_ms: Option<f32>,
    pub invalidation: Option<Invalidation>,
    pub path_trace_sample: Option<u32>,
    pub clusters: Option<ClusterUpdate>,
    pub bake: BakeFrame,
}

struct LoadedScene {
    kind: SceneKind,
    model: Model,
    gpu_model: GpuModel,
    accel: Option<SceneAccel>,
}

impl LoadedScene {
    fn destroy(self, backend: &mut dyn Backend) {
        if let Some(accel) = self.accel {
            accel.destroy(backend);
        }
        self.gpu_model.destroy(backend);
    }
}

/// Drives one frame of every subsystem against the backend, in dependency order.
pub struct Renderer {
    presets: ScenePresets,
    source: Box<dyn SceneSource>,
    scene: Option<LoadedScene>,
    camera: Camera,
    progress: ProgressivePathTraceState,
    path_trace_pass: RayTracingPass,
    bake_pass: RayTracingPass,
    path_tracer: PathTracer,
    clusters: LightClusterCuller,
    baker: LightmapBaker,
}

impl Renderer {
    pub fn new(
        backend: &mut dyn Backend,
        size: UVec2,
        settings: &RenderSettings,
        presets: ScenePresets,
        source: Box<dyn SceneSource>,
        denoiser: DenoiserAdapter,
    ) -> Result<Self, Error> {
        settings.validate()?;
        let path_trace_pass = RayTracingPass::new(backend, RayTracingPipelineKind::Interactive)?;
        let bake_pass = RayTracingPass::new(backend, RayTracingPipelineKind::Baking)?;
        let clusters = LightClusterCuller::new(backend, size, settings)?;
        let baker = LightmapBaker::new(backend, settings.lightmap_resolution, denoiser)?;
        Ok(Self {
            presets,
            source,
            scene: None,
            camera: Camera::new(Vec3::zero(), 0.0, 0.0, size.as_float().x / size.as_float().y),
            progress: ProgressivePathTraceState::new(),
            path_trace_pass,
            bake_pass,
            path_tracer: PathTracer::new(backend, size),
            clusters,
            baker,
        })
    }

    pub fn size(&self) -> UVec2 {
        self.path_tracer.size()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn progress(&self) -> &ProgressivePathTraceState {
        &self.progress
    }

    pub fn baker(&self) -> &LightmapBaker {
        &self.baker
    }

    pub fn baker_mut(&mut self) -> &mut LightmapBaker {
        &mut self.baker
    }

    pub fn path_tracer(&self) -> &PathTracer {
        &self.path_tracer
    }

    pub fn light_clusters(&self) -> &LightClusterCuller {
        &self.clusters
    }

    pub fn path_trace_pass(&self) -> &RayTracingPass {
        &self.path_trace_pass
    }

    pub fn bake_pass(&self) -> &RayTracingPass {
        &self.bake_pass
    }

    pub fn accel(&self) -> Option<&SceneAccel> {
        self.scene.as_ref().and_then(|scene| scene.accel.as_ref())
    }

    pub fn model(&self) -> Option<&Model> {
        self.scene.as_ref().map(|scene| &scene.model)
    }

    pub fn resize(&mut self, backend: &mut dyn Backend, size: UVec2) {
        if size != self.size() {
            info!("resizing to {}x{}", size.x, size.y);
            self.path_tracer.resize(backend, size);
            self.camera.aspect_ratio = size.as_float().x / size.as_float().y;
            self.progress.invalidate(Invalidation::TargetResized);
        }
    }

    /// Forces the acceleration structure and shader tables to be rebuilt next frame.
    pub fn request_accel_rebuild(&mut self, backend: &mut dyn Backend) {
        if let Some(accel) = self.scene.as_mut().and_then(|scene| scene.accel.take()) {
            accel.destroy(backend);
        }
    }

    fn load_scene(&mut self, backend: &mut dyn Backend, settings: &mut RenderSettings) -> Result<(), Error> {
        let kind = settings.current_scene;
        let preset = self.presets.get(kind);
        let model = self.source.load(kind, preset)?;
        info!(
            "loaded {}: {} meshes, {} spot lights, {} lightmap vertices",
            kind,
            model.meshes.len(),
            model.spot_lights.len(),
            model.lightmapped_vertex_count()
        );

        if let Some(scene) = self.scene.take() {
            scene.destroy(backend);
        }
        let gpu_model = GpuModel::upload(backend, &model);

        let rotation = preset.camera_rotation;
        self.camera = Camera::new(preset.camera_position(), rotation[0], rotation[1], self.camera.aspect_ratio);
        let sun_direction = preset.sun_direction();
        settings.path_trace.sun_direction = [sun_direction.x, sun_direction.y, sun_direction.z];
        if kind == SceneKind::WhiteFurnace {
            settings.path_trace.enable_white_furnace_mode = true;
        }

        // the surface map belongs to the previous model
        self.baker.stop();

        self.scene = Some(LoadedScene {
            kind,
            model,
            gpu_model,
            accel: None,
        });
        Ok(())
    }

    /// Records all GPU work for one frame. The caller ends the frame on the backend afterwards.
    pub fn update(&mut self, backend: &mut dyn Backend, settings: &mut RenderSettings) -> Result<FrameReport, Error> {
        settings.validate()?;
        let mut report = FrameReport::default();

        if self.scene.as_ref().map(|scene| scene.kind) != Some(settings.current_scene) {
            self.load_scene(backend, settings)?;
            report.scene_loaded = Some(settings.current_scene);
        }
        let scene = match self.scene.as_mut() {
            Some(scene) => scene,
            None => return Ok(report),
        };

        if scene.accel.is_none() {
            let descriptors =
                GeometryDescriptors::new(&scene.model, scene.gpu_model.vertex_buffer, scene.gpu_model.index_buffer);
            let accel = SceneAccel::build(backend, &descriptors)?;
            self.path_trace_pass.rebuild_tables(backend, &accel)?;
            self.bake_pass.rebuild_tables(backend, &accel)?;
            scene.accel = Some(accel);
            report.accel_built = true;
        }
        let accel = match scene.accel.as_ref() {
            Some(accel) => accel,
            None => return Ok(report),
        };
        report.accel_build_time_ms = accel.build_time_ms(backend);
        if let Some(ms) = report.accel_build_time_ms {
            info!("acceleration structure build took {:.3} ms", ms);
        }

        report.invalidation = self
            .progress
            .update(self.camera.pose(), settings, report.scene_loaded.is_some());

        let size = self.path_tracer.size();
        let num_lights = settings.light_count(scene.model.spot_lights.len());
        let constants = RayTraceConstants::new(
            &self.camera,
            settings,
            self.progress.sample_index(),
            size.x * size.y,
            num_lights,
        );
        let trace_scene = TraceScene {
            model: &scene.gpu_model,
            accel,
        };

        self.baker.resize(backend, settings.lightmap_resolution);
        report.bake = self.baker.update(
            backend,
            &BakeScene {
                model: &scene.model,
                trace: TraceScene {
                    model: &scene.gpu_model,
                    accel,
                },
                pass: &self.bake_pass,
                constants,
            },
        );

        if settings.enable_ray_tracing {
            if let Some(sample_index) = self.progress.next_sample() {
                let constants = RayTraceConstants {
                    sample_index,
                    ..constants
                };
                if self
                    .path_tracer
                    .trace(backend, &self.path_trace_pass, &trace_scene, &constants)
                {
                    report.path_trace_sample = Some(sample_index);
                }
            }
        } else {
            let update = self
                .clusters
                .update_clusters(backend, &scene.model.spot_lights, &self.camera, settings, size);
            debug!(
                "clustered {} lights, {} touching the near plane",
                update.light_count(),
                update.num_intersecting
            );
            report.clusters = Some(update);
        }

        Ok(report)
    }

    pub fn destroy(self, backend: &mut dyn Backend) {
        if let Some(scene) = self.scene {
            scene.destroy(backend);
        }
        self.path_trace_pass.destroy(backend);
        self.bake_pass.destroy(backend);
        self.path_tracer.destroy(backend);
        self.clusters.destroy(backend);
        self.baker.destroy(backend);
    }
}
