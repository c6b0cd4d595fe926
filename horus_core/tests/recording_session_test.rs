//! End-to-end scenarios spanning the dataflow graph, the record loop, the
//! episode pipeline, and a local-only offload run, against the simulation
//! adapter backends.

use horus_core::dataflow::{spawn_on_bus, Bus, CameraDriver, CameraNode, FollowerDriver, FollowerNode, LeaderDriver, LeaderNode, MapperNode};
use horus_core::joints::{JointMeta, JointUnit};
use horus_core::offload::orchestrator::OffloadConfig;
use horus_core::offload::{OffloadMode, OffloadOrchestrator};
use horus_core::record::{RecordCommand, RecordLoop, TickOutcome};
use horus_core::save::dataset::DatasetPaths;
use horus_core::save::image_writer::ImageWriterPool;
use horus_core::save::memory_guard::MemoryAutoStopGuard;
use horus_core::save::saver::EpisodeSaver;
use std::sync::Arc;
use std::time::Duration;

/// Scenario A (nominal local capture): a short session against simulated
/// adapters produces a columnar file, per-frame PNGs, and no MP4 (encoding
/// skipped), with exit via `save_and_next` then a clean drain.
#[test]
fn nominal_local_capture_produces_expected_files() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DatasetPaths::new(dir.path());
    let bus = Bus::new();

    let mut handles = vec![
        spawn_on_bus(LeaderNode::new(LeaderDriver::simulation()), bus.clone()),
        spawn_on_bus(FollowerNode::new(FollowerDriver::simulation(), bus.clone()), bus.clone()),
        spawn_on_bus(CameraNode::new("top", CameraDriver::simulation(4, 4)), bus.clone()),
    ];
    let joint_meta: Vec<JointMeta> = (0..6).map(|i| JointMeta::new(format!("j{}", i), JointUnit::Radians)).collect();
    handles.push(spawn_on_bus(MapperNode::new(joint_meta, vec![0; 6], bus.clone()).unwrap(), bus.clone()));

    // Give the graph a moment to publish first readings onto the bus.
    std::thread::sleep(Duration::from_millis(150));

    let image_pool = Arc::new(ImageWriterPool::new(2));
    let saver = Arc::new(EpisodeSaver::new(1, image_pool.clone()));
    let memory_guard = MemoryAutoStopGuard::new(u64::MAX, 100);
    let mut record_loop = RecordLoop::new(
        bus.clone(),
        vec!["top".to_string()],
        "pick_and_place",
        30.0,
        paths.clone(),
        true, // skip_encoding: no ffmpeg in this test environment
        saver.clone(),
        image_pool.clone(),
        memory_guard,
    );

    let mut appended = 0;
    for _ in 0..20 {
        if record_loop.tick().unwrap() == TickOutcome::Appended {
            appended += 1;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(appended > 0, "expected at least one frame to be appended");

    record_loop.apply(RecordCommand::SaveAndNext).unwrap();

    for handle in handles.iter_mut() {
        handle.stop();
    }

    let mut saver = Arc::try_unwrap(saver).unwrap_or_else(|arc| {
        arc.stop(true);
        panic!("saver still referenced elsewhere");
    });
    saver.stop(true);

    assert!(paths.data_file(0).exists());
    assert!(paths.image_camera_dir(0, "top").join("frame_0.png").exists());
    assert!(!paths.video_file(0, "top").exists());
}

/// Scenario: `CLOUD=0` (local-only) skips upload/notify/poll/download
/// entirely and goes straight to `Done`.
#[test]
fn local_only_offload_completes_without_network_access() {
    let dir = tempfile::tempdir().unwrap();
    let config = OffloadConfig {
        mode: OffloadMode::LocalOnly,
        repo_id: "test_repo".to_string(),
        api_base_url: "http://127.0.0.1:1".to_string(), // unreachable, must never be called
        api_username: "user".to_string(),
        api_password: "pass".to_string(),
        dataset_root: dir.path().to_path_buf(),
        local_output: dir.path().join("model"),
        edge: None,
        skip_upload: false,
        download_only: false,
    };
    let mut orchestrator = OffloadOrchestrator::new(config).unwrap();
    let state = orchestrator.run().unwrap();
    assert_eq!(state, horus_core::OffloadState::Done);
}
