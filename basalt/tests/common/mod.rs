#![allow(dead_code)]

use basalt::prelude::*;

pub struct TestScene {
    pub model: Model,
    pub gpu_model: GpuModel,
    pub accel: SceneAccel,
}

pub fn upload_box_scene(backend: &mut dyn Backend) -> TestScene {
    let model = create_box_test_scene(1.0);
    let gpu_model = GpuModel::upload(backend, &model);
    let descriptors = GeometryDescriptors::new(&model, gpu_model.vertex_buffer, gpu_model.index_buffer);
    let accel = SceneAccel::build(backend, &descriptors).unwrap();
    TestScene { model, gpu_model, accel }
}

pub fn assert_no_violations(recorder: &Recorder) {
    assert!(
        recorder.violations().is_empty(),
        "unexpected violations:\n{}",
        recorder
            .violations()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    );
}

pub fn draws(recorder: &Recorder) -> Vec<(&'static str, u32, u32)> {
    recorder
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::DrawIndexed {
                pipeline,
                first_instance,
                instance_count,
                ..
            } => Some((*pipeline, *first_instance, *instance_count)),
            _ => None,
        })
        .collect()
}

pub fn image_clears(recorder: &Recorder, id: ImageId) -> usize {
    recorder
        .commands()
        .iter()
        .filter(|command| matches!(command, Command::ClearImage { id: cleared, .. } if *cleared == id))
        .count()
}

pub fn trace_count(recorder: &Recorder, pipeline_name: &str) -> usize {
    recorder
        .commands()
        .iter()
        .filter(|command| matches!(command, Command::TraceRays { pipeline, .. } if *pipeline == pipeline_name))
        .count()
}
