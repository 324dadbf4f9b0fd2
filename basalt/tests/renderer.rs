mod common;

use basalt::prelude::*;
use common::*;

fn small_settings() -> RenderSettings {
    let mut settings = RenderSettings::default();
    settings.path_trace.sqrt_num_samples = 2;
    settings.lightmap_resolution = 16;
    settings
}

fn create_renderer(recorder: &mut Recorder, settings: &RenderSettings) -> Renderer {
    Renderer::new(
        recorder,
        UVec2::new(32, 16),
        settings,
        ScenePresets::builtin(),
        Box::new(ProceduralScenes),
        DenoiserAdapter::with_median(),
    )
    .unwrap()
}

fn run_frame(renderer: &mut Renderer, recorder: &mut Recorder, settings: &mut RenderSettings) -> FrameReport {
    let report = renderer.update(recorder, settings).unwrap();
    recorder.end_frame();
    report
}

#[test]
fn first_frame_loads_and_builds_the_scene() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    assert!(renderer.model().is_none());

    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.scene_loaded, Some(SceneKind::BoxTest));
    assert!(report.accel_built);
    assert_eq!(report.invalidation, Some(Invalidation::SceneChanged));
    assert_eq!(report.path_trace_sample, Some(0));
    assert!(renderer.accel().is_some());
    assert!(renderer.path_trace_pass().tables().is_some());
    assert!(renderer.bake_pass().tables().is_some());

    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.scene_loaded, None);
    assert!(!report.accel_built);
    assert_no_violations(&recorder);
}

#[test]
fn samples_accumulate_until_converged() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);

    let samples: Vec<Option<u32>> = (0..6)
        .map(|_| run_frame(&mut renderer, &mut recorder, &mut settings).path_trace_sample)
        .collect();
    assert_eq!(samples, vec![Some(0), Some(1), Some(2), Some(3), None, None]);
    assert!(renderer.progress().is_converged());
    assert_eq!(renderer.progress().progress(), 1.0);
    assert_eq!(trace_count(&recorder, "path-trace"), 4);
    assert_no_violations(&recorder);
}

#[test]
fn camera_movement_restarts_accumulation() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    for _ in 0..3 {
        run_frame(&mut renderer, &mut recorder, &mut settings);
    }

    renderer.camera_mut().position += Vec3::unit_x();
    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.invalidation, Some(Invalidation::CameraMoved));
    assert_eq!(report.path_trace_sample, Some(0));

    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.invalidation, None);
    assert_eq!(report.path_trace_sample, Some(1));
}

#[test]
fn settings_change_restarts_accumulation() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    for _ in 0..5 {
        run_frame(&mut renderer, &mut recorder, &mut settings);
    }
    assert!(renderer.progress().is_converged());

    settings.path_trace.turbidity = 4.0;
    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.invalidation, Some(Invalidation::SettingsChanged(vec!["turbidity"])));
    assert_eq!(report.path_trace_sample, Some(0));
}

#[test]
fn white_furnace_scene_forces_furnace_mode() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    run_frame(&mut renderer, &mut recorder, &mut settings);
    renderer.baker_mut().start();
    run_frame(&mut renderer, &mut recorder, &mut settings);
    assert!(renderer.baker().is_active());

    settings.current_scene = SceneKind::WhiteFurnace;
    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.scene_loaded, Some(SceneKind::WhiteFurnace));
    assert!(report.accel_built);
    assert!(settings.path_trace.enable_white_furnace_mode);
    assert!(!renderer.baker().is_active());
    assert_eq!(report.bake.sample_dispatched, None);
    assert_no_violations(&recorder);
}

#[test]
fn rasterized_frames_cull_lights_instead_of_tracing() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    settings.enable_ray_tracing = false;
    let mut renderer = create_renderer(&mut recorder, &settings);

    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.path_trace_sample, None);
    let clusters = report.clusters.unwrap();
    assert_eq!(clusters.light_count(), renderer.model().unwrap().spot_lights.len() as u32);
    assert_eq!(trace_count(&recorder, "path-trace"), 0);
    assert_eq!(
        recorder.buffer_usage(renderer.light_clusters().cluster_buffer()),
        Some(BufferUsage::FRAGMENT_STORAGE_READ)
    );
    assert_no_violations(&recorder);
}

#[test]
fn build_time_arrives_after_render_latency() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);

    let reported: Vec<bool> = (0..2 * RENDER_LATENCY)
        .map(|_| {
            run_frame(&mut renderer, &mut recorder, &mut settings)
                .accel_build_time_ms
                .is_some()
        })
        .collect();
    let expected: Vec<bool> = (0..2 * RENDER_LATENCY).map(|frame| frame == RENDER_LATENCY).collect();
    assert_eq!(reported, expected);
}

#[test]
fn rebuild_request_rebuilds_without_leaking() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    run_frame(&mut renderer, &mut recorder, &mut settings);
    let buffer_count = recorder.live_buffer_count();

    renderer.request_accel_rebuild(&mut recorder);
    assert!(renderer.accel().is_none());
    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert!(report.accel_built);
    assert_eq!(recorder.live_buffer_count(), buffer_count);
    assert_no_violations(&recorder);
}

#[test]
fn baking_alongside_path_tracing_is_hazard_free() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    renderer.baker_mut().start();
    for frame in 0..12 {
        if frame == 6 {
            renderer.baker_mut().request_median_denoise();
            settings.enable_ray_tracing = false;
        }
        let report = run_frame(&mut renderer, &mut recorder, &mut settings);
        assert_eq!(report.bake.sample_dispatched, Some(frame));
    }
    assert_eq!(trace_count(&recorder, "lightmap-bake"), 12);
    assert!(renderer.baker().use_denoised());
    assert_no_violations(&recorder);
}

#[test]
fn resize_recreates_path_trace_target() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    run_frame(&mut renderer, &mut recorder, &mut settings);

    let size = UVec2::new(64, 64);
    renderer.resize(&mut recorder, size);
    assert_eq!(renderer.size(), size);
    assert_eq!(renderer.camera().aspect_ratio, 1.0);
    let texels = recorder.image_texels(renderer.path_tracer().target()).unwrap();
    assert_eq!(texels.len(), 4 * 64 * 64);

    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.invalidation, Some(Invalidation::TargetResized));
    assert_eq!(report.path_trace_sample, Some(0));
    assert_no_violations(&recorder);
}

#[test]
fn resize_with_same_aspect_restarts_converged_accumulation() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    for _ in 0..5 {
        run_frame(&mut renderer, &mut recorder, &mut settings);
    }
    assert!(renderer.progress().is_converged());

    renderer.resize(&mut recorder, UVec2::new(64, 32));
    assert_eq!(renderer.camera().aspect_ratio, 2.0);
    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.invalidation, Some(Invalidation::TargetResized));
    assert_eq!(report.path_trace_sample, Some(0));
    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert_eq!(report.invalidation, None);
    assert_eq!(report.path_trace_sample, Some(1));
    assert_no_violations(&recorder);
}

#[test]
fn destroy_releases_every_resource() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    for _ in 0..3 {
        run_frame(&mut renderer, &mut recorder, &mut settings);
    }
    renderer.destroy(&mut recorder);
    assert_eq!(recorder.live_buffer_count(), 0);
    assert_eq!(recorder.live_image_count(), 0);
}

#[test]
fn invalid_settings_fail_the_frame_before_any_work() {
    let mut recorder = Recorder::default();
    let mut settings = small_settings();
    let mut renderer = create_renderer(&mut recorder, &settings);
    run_frame(&mut renderer, &mut recorder, &mut settings);
    recorder.clear_commands();

    settings.cluster_tile_size = 0;
    settings.enable_ray_tracing = false;
    assert!(matches!(
        renderer.update(&mut recorder, &mut settings),
        Err(Error::Config(ConfigError::InvalidSetting {
            name: "cluster_tile_size",
            value: 0,
            ..
        }))
    ));
    assert!(recorder.commands().is_empty());

    settings.cluster_tile_size = 16;
    let report = run_frame(&mut renderer, &mut recorder, &mut settings);
    assert!(report.clusters.is_some());
    assert_no_violations(&recorder);
}
