mod common;

use basalt::prelude::*;
use common::*;
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn traced_records(recorder: &Recorder) -> (Vec<&'static str>, Vec<&'static str>, Vec<&'static str>) {
    recorder
        .commands()
        .iter()
        .rev()
        .find_map(|command| match command {
            Command::TraceRays { raygen, miss, hit, .. } => Some((raygen.clone(), miss.clone(), hit.clone())),
            _ => None,
        })
        .unwrap()
}

fn expected_hit_groups(records: &[GeometryRecord]) -> Vec<&'static str> {
    records
        .iter()
        .flat_map(|record| {
            if record.opaque() {
                vec!["HitGroup", "ShadowHitGroup"]
            } else {
                vec!["AlphaTestHitGroup", "ShadowAlphaTestHitGroup"]
            }
        })
        .collect()
}

#[test]
fn interactive_tables_select_hit_groups_by_opacity() {
    let mut recorder = Recorder::default();
    let scene = upload_box_scene(&mut recorder);
    let mut pass = RayTracingPass::new(&mut recorder, RayTracingPipelineKind::Interactive).unwrap();
    pass.rebuild_tables(&mut recorder, &scene.accel).unwrap();

    let size = UVec2::new(32, 16);
    let mut path_tracer = PathTracer::new(&mut recorder, size);
    let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 2.0);
    let constants = RayTraceConstants::new(&camera, &RenderSettings::default(), 0, size.x * size.y, 2);
    let trace_scene = TraceScene {
        model: &scene.gpu_model,
        accel: &scene.accel,
    };
    assert!(path_tracer.trace(&mut recorder, &pass, &trace_scene, &constants));
    assert_no_violations(&recorder);

    let (raygen, miss, hit) = traced_records(&recorder);
    assert_eq!(raygen, vec!["RaygenShader"]);
    assert_eq!(miss, vec!["MissShader", "ShadowMissShader"]);
    assert_eq!(hit.len(), 2 * scene.accel.records().len());
    assert_eq!(hit, expected_hit_groups(scene.accel.records()));
    assert_eq!(hit[hit.len() - 2..], ["AlphaTestHitGroup", "ShadowAlphaTestHitGroup"]);
}

#[test]
fn baking_tables_differ_only_in_ray_generation() {
    let mut recorder = Recorder::default();
    let scene = upload_box_scene(&mut recorder);
    let mut interactive = RayTracingPass::new(&mut recorder, RayTracingPipelineKind::Interactive).unwrap();
    let mut baking = RayTracingPass::new(&mut recorder, RayTracingPipelineKind::Baking).unwrap();
    interactive.rebuild_tables(&mut recorder, &scene.accel).unwrap();
    baking.rebuild_tables(&mut recorder, &scene.accel).unwrap();

    let interactive_tables = interactive.tables().unwrap();
    let baking_tables = baking.tables().unwrap();
    assert_eq!(interactive_tables.hit.groups(), baking_tables.hit.groups());
    assert_eq!(interactive_tables.miss.groups(), baking_tables.miss.groups());
    assert_eq!(baking_tables.raygen.groups(), &[ShaderGroup::RayGenerator]);

    let alignment = recorder.shader_table_alignment();
    for table in [&baking_tables.raygen, &baking_tables.miss, &baking_tables.hit] {
        let region = table.region();
        assert_eq!(region.stride % alignment.handle_alignment, 0);
        assert_eq!(region.size, region.stride * table.groups().len() as u32);
        assert_eq!(recorder.buffer_data(table.buffer()).unwrap().len(), region.size as usize);
    }
}

#[test]
fn rebuilding_tables_frees_the_previous_buffers() {
    let mut recorder = Recorder::default();
    let scene = upload_box_scene(&mut recorder);
    let mut pass = RayTracingPass::new(&mut recorder, RayTracingPipelineKind::Baking).unwrap();
    pass.rebuild_tables(&mut recorder, &scene.accel).unwrap();
    let old_hit = pass.tables().unwrap().hit.buffer();
    let buffer_count = recorder.live_buffer_count();

    pass.rebuild_tables(&mut recorder, &scene.accel).unwrap();
    assert!(!recorder.buffer_exists(old_hit));
    assert_eq!(recorder.live_buffer_count(), buffer_count);

    pass.destroy(&mut recorder);
    assert_eq!(recorder.live_buffer_count(), buffer_count - 3);
    assert_no_violations(&recorder);
}

#[test]
fn missing_export_fails_table_creation() {
    let mut recorder = Recorder::new(RecorderConfig {
        missing_exports: vec!["ShadowAlphaTestHitGroup"],
        ..Default::default()
    });
    let scene = upload_box_scene(&mut recorder);
    let mut pass = RayTracingPass::new(&mut recorder, RayTracingPipelineKind::Interactive).unwrap();
    match pass.rebuild_tables(&mut recorder, &scene.accel) {
        Err(PipelineError::MissingExport { name, export }) => {
            assert_eq!(name, "path-trace");
            assert_eq!(export, "ShadowAlphaTestHitGroup");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(pass.tables().is_none());
}

#[test]
fn recursion_depth_beyond_device_limit_fails_pipeline_creation() {
    let mut recorder = Recorder::new(RecorderConfig {
        max_recursion_depth: MAX_PATH_LENGTH_SETTING - 1,
        ..Default::default()
    });
    assert!(matches!(
        RayTracingPass::new(&mut recorder, RayTracingPipelineKind::Baking),
        Err(PipelineError::Creation { name: "lightmap-bake", .. })
    ));
}

#[test]
fn random_opacity_maps_to_paired_hit_groups() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    for _ in 0..8 {
        let mut model = create_box_test_scene(1.0);
        for material in model.materials.iter_mut() {
            material.has_opacity_texture = rng.gen_bool(0.5);
        }
        let mut recorder = Recorder::default();
        let gpu_model = GpuModel::upload(&mut recorder, &model);
        let descriptors = GeometryDescriptors::new(&model, gpu_model.vertex_buffer, gpu_model.index_buffer);
        let accel = SceneAccel::build(&mut recorder, &descriptors).unwrap();
        let mut pass = RayTracingPass::new(&mut recorder, RayTracingPipelineKind::Interactive).unwrap();
        pass.rebuild_tables(&mut recorder, &accel).unwrap();

        let groups = pass.tables().unwrap().hit.groups();
        assert_eq!(groups.len(), ShaderGroup::HIT_GROUP_COUNT_PER_GEOMETRY * model.meshes.len());
        for (pair, mesh) in groups.chunks(2).zip(model.meshes.iter()) {
            let alpha_tested = model.materials[mesh.material_ref.0 as usize].has_opacity_texture;
            assert!(!pair[0].is_shadow() && pair[1].is_shadow());
            assert_eq!(pair[0].is_alpha_test(), alpha_tested);
            assert_eq!(pair[1].is_alpha_test(), alpha_tested);
        }
    }
}
