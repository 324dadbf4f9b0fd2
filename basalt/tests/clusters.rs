mod common;

use basalt::prelude::*;
use common::*;

fn spot_light(position: Vec3, direction: Vec3) -> SpotLight {
    SpotLight {
        position,
        direction: direction.normalized(),
        intensity: Vec3::broadcast(1.0),
        inner_angle: 40.0f32.to_radians(),
        outer_angle: 60.0f32.to_radians(),
    }
}

fn cluster_words(recorder: &Recorder, culler: &LightClusterCuller) -> LightAssignment {
    LightAssignment::from_bytes(*culler.grid(), recorder.buffer_data(culler.cluster_buffer()).unwrap())
}

#[test]
fn no_lights_clears_without_drawing() {
    let mut recorder = Recorder::default();
    let settings = RenderSettings::default();
    let size = UVec2::new(100, 40);
    let mut culler = LightClusterCuller::new(&mut recorder, size, &settings).unwrap();
    let grid = *culler.grid();
    assert_eq!(grid.tile_count, UVec2::new(7, 3));
    assert_eq!(grid.element_count(), 7 * 3 * 16);

    // stale bits from an earlier frame
    recorder.write_buffer(culler.cluster_buffer(), 0, &[0xff; 64]);

    let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 2.5);
    let update = culler.update_clusters(&mut recorder, &[], &camera, &settings, size);
    assert_eq!(update.light_count(), 0);
    assert!(draws(&recorder).is_empty());
    assert!(cluster_words(&recorder, &culler).is_empty());
    assert_eq!(
        recorder.buffer_usage(culler.cluster_buffer()),
        Some(BufferUsage::FRAGMENT_STORAGE_READ)
    );
    assert_no_violations(&recorder);
}

#[test]
fn passes_are_ordered_and_separated_by_barriers() {
    let mut recorder = Recorder::default();
    let settings = RenderSettings::default();
    let size = UVec2::new(640, 360);
    let mut culler = LightClusterCuller::new(&mut recorder, size, &settings).unwrap();
    recorder.clear_commands();

    let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 16.0 / 9.0);
    let lights = [
        spot_light(Vec3::new(0.0, 0.0, 20.0), Vec3::unit_x()),
        spot_light(Vec3::zero(), Vec3::unit_z()),
        spot_light(Vec3::new(2.0, 0.0, 10.0), -Vec3::unit_z()),
    ];
    let update = culler.update_clusters(&mut recorder, &lights, &camera, &settings, size);
    assert_eq!(update.num_intersecting, 1);
    assert_eq!(update.bounds[0].light_index, 1);
    assert_no_violations(&recorder);

    assert_eq!(
        draws(&recorder),
        vec![
            ("cluster-intersecting", 0, 1),
            ("cluster-back-faces", 1, 2),
            ("cluster-front-faces", 1, 2),
        ]
    );

    let cluster_buffer = culler.cluster_buffer();
    let events: Vec<String> = recorder
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::ClearBuffer { id, .. } if *id == cluster_buffer => Some("clear".to_owned()),
            Command::BufferBarrier { id, new_usage, .. } if *id == cluster_buffer => {
                Some(format!("{:?}", new_usage))
            }
            Command::DrawIndexed { pipeline, .. } => Some(pipeline.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(
        events,
        vec![
            "TRANSFER_WRITE",
            "clear",
            "FRAGMENT_STORAGE_ATOMIC",
            "cluster-intersecting",
            "FRAGMENT_STORAGE_ATOMIC",
            "cluster-back-faces",
            "FRAGMENT_STORAGE_ATOMIC",
            "cluster-front-faces",
            "FRAGMENT_STORAGE_READ",
        ]
    );
}

#[test]
fn light_count_is_clamped_by_settings() {
    let mut recorder = Recorder::default();
    let mut settings = RenderSettings::default();
    settings.max_light_clamp = 1;
    let size = UVec2::new(64, 64);
    let mut culler = LightClusterCuller::new(&mut recorder, size, &settings).unwrap();
    let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 1.0);
    let lights = [
        spot_light(Vec3::new(0.0, 0.0, 5.0), Vec3::unit_y()),
        spot_light(Vec3::new(0.0, 0.0, 6.0), Vec3::unit_y()),
    ];
    let update = culler.update_clusters(&mut recorder, &lights, &camera, &settings, size);
    assert_eq!(update.light_count(), 1);
    let instances: u32 = draws(&recorder)
        .iter()
        .filter(|(pipeline, _, _)| *pipeline == "cluster-back-faces")
        .map(|(_, _, count)| count)
        .sum();
    assert_eq!(instances, 1);
}

#[test]
fn viewport_change_resizes_cluster_buffer() {
    let mut recorder = Recorder::default();
    let settings = RenderSettings::default();
    let mut culler = LightClusterCuller::new(&mut recorder, UVec2::new(64, 64), &settings).unwrap();
    let old_buffer = culler.cluster_buffer();
    let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 2.0);
    let size = UVec2::new(128, 64);
    culler.update_clusters(&mut recorder, &[], &camera, &settings, size);

    assert!(!recorder.buffer_exists(old_buffer));
    assert_eq!(culler.grid().tile_count, UVec2::new(8, 4));
    assert_eq!(
        recorder.buffer_data(culler.cluster_buffer()).unwrap().len(),
        8 * 4 * 16 * 4
    );
    assert_no_violations(&recorder);
}

#[test]
fn reference_assignment_covers_lights_in_front_of_the_camera() {
    let settings = RenderSettings::default();
    let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 1.0);
    let grid = ClusterGrid::new(UVec2::new(256, 256), settings.cluster_tile_size, settings.num_z_slices);
    let lights = [spot_light(Vec3::new(0.0, 3.0, 20.0), -Vec3::unit_y())];
    let update = LightClusterCuller::update_lights(&lights, &camera, &settings, grid);
    assert_eq!(update.num_intersecting, 0);

    let assignment = LightAssignment::rasterize_conservative(grid, &camera, &update.bounds);
    let z = update.bounds[0].z_bounds;
    assert!(z.min <= z.max && z.max < grid.num_z_slices);

    // the cone points down through the centre of the screen
    let ndc = camera.view_to_ndc(camera.world_to_view(Vec3::new(0.0, 0.0, 20.0)));
    let tile_x = ((0.5 * (ndc.x + 1.0)) * 256.0) as u32 / grid.tile_size;
    let tile_y = ((0.5 * (1.0 - ndc.y)) * 256.0) as u32 / grid.tile_size;
    let mut covered = false;
    for slice in z.min..=z.max {
        covered |= assignment.contains(tile_x, tile_y, slice, 0);
    }
    assert!(covered);
    assert!(!assignment.contains(0, 0, 0, 0));
}
