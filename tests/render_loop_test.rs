use std::time::Duration;

use instant::Instant;
use mesh_stage::{
    EngineConfig, HeadlessBackend, NormalMode, RenderScheduler, Scene, SceneSnapshot, SourceId,
    Transform,
    camera::{Camera, CameraInput, Projection},
    data_structures::scene::InstanceSnapshot,
    flow,
};

use crate::common::test_utils::{Fixtures, QUAD_MTL, QUAD_OBJ, TRIANGLE_OBJ, record};

mod common;

fn projection() -> Projection {
    Projection::new(800, 600, 45.0, 0.1, 100.0)
}

#[test]
fn each_tick_submits_one_frame_with_every_draw() {
    let mut backend = HeadlessBackend::new();
    let mut scene = Scene::new(NormalMode::FillMissing);
    let chair = scene.spawn(&record("chair.obj", &[None, Some("leather")]), None, &mut backend).unwrap();
    scene.duplicate(&chair).unwrap();

    let mut camera = Camera::new([0.0, 0.0, -5.0]);
    let projection = projection();
    let mut scheduler = RenderScheduler::new(60);
    scheduler.enable(Instant::now());

    for _ in 0..3 {
        let report = scheduler
            .tick(&mut scene, &mut camera, &CameraInput::default(), &projection, &mut backend)
            .unwrap();
        assert_eq!(report.draws, 4);
        assert!(!report.skipped);
    }

    assert_eq!(backend.frames().len(), 3);
    let frame = backend.last_frame().unwrap();
    assert_eq!(frame.draws.len(), 4);
    assert_eq!(frame.uniforms.projection, projection.calc_matrix());
    assert_eq!(frame.uniforms.view, camera.view_matrix());
}

#[test]
fn removed_instances_are_freed_at_the_start_of_the_next_tick() {
    let mut backend = HeadlessBackend::new();
    let mut scene = Scene::new(NormalMode::FillMissing);
    let chair = scene.spawn(&record("chair.obj", &[None]), None, &mut backend).unwrap();

    let mut camera = Camera::new([0.0, 0.0, -5.0]);
    let projection = projection();
    let mut scheduler = RenderScheduler::new(60);
    scheduler.enable(Instant::now());
    let input = CameraInput::default();

    scheduler.tick(&mut scene, &mut camera, &input, &projection, &mut backend);
    scene.remove(&chair).unwrap();
    assert_eq!(backend.live_buffer_count(), 1);

    scheduler.tick(&mut scene, &mut camera, &input, &projection, &mut backend);
    assert_eq!(backend.live_buffer_count(), 0);
    assert!(backend.last_frame().unwrap().draws.is_empty());
    assert_eq!(scheduler.skipped(), 0);
}

#[test]
fn disabled_scheduler_leaves_the_backend_alone() {
    let mut backend = HeadlessBackend::new();
    let mut scene = Scene::new(NormalMode::FillMissing);
    scene.spawn(&record("chair.obj", &[None]), None, &mut backend).unwrap();

    let mut camera = Camera::new([0.0, 0.0, -5.0]);
    let mut scheduler = RenderScheduler::new(60);
    let input = CameraInput::default();

    assert!(scheduler
        .tick(&mut scene, &mut camera, &input, &projection(), &mut backend)
        .is_none());
    scheduler.enable(Instant::now());
    scheduler.disable();
    assert!(scheduler
        .tick(&mut scene, &mut camera, &input, &projection(), &mut backend)
        .is_none());
    assert!(backend.frames().is_empty());
    assert_eq!(scheduler.next_tick(), None);
}

#[test]
fn headless_run_loads_files_and_paces_ticks() {
    let fixtures = Fixtures::new("headless");
    fixtures.write("quad.mtl", QUAD_MTL);
    let quad = fixtures.write("quad.obj", QUAD_OBJ);
    let tri = fixtures.write("tri.obj", TRIANGLE_OBJ);
    let missing = fixtures.path("missing.obj");

    let config = EngineConfig {
        target_fps: 100,
        ..Default::default()
    };
    let started = Instant::now();
    let (backend, scene, _) = flow::run_headless(config, vec![quad, tri, missing], 3).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(scene.len(), 2);
    assert_eq!(backend.frames().len(), 3);
    assert!(backend.frames().iter().all(|f| f.draws.len() == 2));
    // first tick fires immediately, the other two wait a budget each
    assert!(elapsed >= Duration::from_millis(18), "ran in {elapsed:?}");
}

#[test]
fn headless_run_restores_the_configured_scene() {
    let fixtures = Fixtures::new("restore");
    let tri = fixtures.write("tri.obj", TRIANGLE_OBJ);
    let source = SourceId::new(tri.to_string_lossy());
    let at = |x: f32| Transform::from(cgmath::Vector3::new(x, 0.0, 0.0));
    let snapshot = SceneSnapshot {
        instances: vec![
            InstanceSnapshot {
                source: source.clone(),
                name: "left".to_string(),
                transform: at(-2.0),
                tint: [0.0; 4],
            },
            InstanceSnapshot {
                source,
                name: "right".to_string(),
                transform: at(2.0),
                tint: [1.0, 0.0, 0.0, 0.5],
            },
        ],
    };
    let scene_file = fixtures.write("scene.json", &snapshot.to_json().unwrap());

    let config = EngineConfig {
        target_fps: 200,
        scene: Some(scene_file),
        ..Default::default()
    };
    let (backend, scene, _) = flow::run_headless(config, Vec::new(), 1).unwrap();

    assert_eq!(scene.len(), 2);
    assert_eq!(backend.live_buffer_count(), 1);
    let draws = &backend.last_frame().unwrap().draws;
    assert_eq!(draws[0].model.w.x, -2.0);
    assert_eq!(draws[1].model.w.x, 2.0);
    assert_eq!(draws[1].tint, [1.0, 0.0, 0.0, 0.5]);
}
