//! Record loop (§4.E): pulls the latest observation/action off the
//! dataflow bus at the bus tick, appends into the live `EpisodeBuffer`
//! under `buffer_lock`, and applies the user-driven transitions
//! (`save_and_next`, `exit`, `abort`).
//!
//! The record loop and the IPC bridge live in the same process (the
//! Lifecycle Supervisor's CLI binary), so this reads the shared `Bus`
//! directly rather than round-tripping through `IpcClient`'s Unix socket —
//! the bridge exists for a genuinely external controller, which this
//! implementation does not have. Both paths share the same "latest value
//! wins" semantics, so nothing about the tick contract changes.

use crate::dataflow::bus::{Bus, Payload};
use crate::error::{HorusError, HorusResult};
use crate::frame::{EpisodeBuffer, ImageSample};
use crate::joints::{JointUnit, JointVector};
use crate::save::dataset::DatasetPaths;
use crate::save::image_writer::ImageWriterPool;
use crate::save::memory_guard::MemoryAutoStopGuard;
use crate::save::saver::EpisodeSaver;
use crate::save::EpisodeSaveTask;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;

/// User/CLI-driven transitions out of the steady tick loop (§4.E, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCommand {
    /// `n`: finalize current episode, queue async save, start the next one.
    SaveAndNext,
    /// `e`: stop the loop; caller drains the saver and runs offload.
    Exit,
    /// discard the current (unsaved) buffer and start over at the same index.
    Abort,
}

/// Outcome of one `tick()` call, for the caller's logging/metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Appended,
    /// A required camera had no published frame yet; tick skipped, not an error.
    SkippedMissingCamera,
    /// The memory auto-stop guard tripped; caller should treat this as `exit`.
    MemoryLimitExceeded,
}

pub struct RecordLoop {
    bus: Bus,
    cameras: Vec<String>,
    buffer_lock: Arc<Mutex<EpisodeBuffer>>,
    next_episode_index: u64,
    task: String,
    fps: f64,
    paths: DatasetPaths,
    skip_encoding: bool,
    saver: Arc<EpisodeSaver>,
    image_pool: Arc<ImageWriterPool>,
    memory_guard: MemoryAutoStopGuard,
    system: System,
    tick_count: u64,
}

impl RecordLoop {
    pub fn new(
        bus: Bus,
        cameras: Vec<String>,
        task: impl Into<String>,
        fps: f64,
        paths: DatasetPaths,
        skip_encoding: bool,
        saver: Arc<EpisodeSaver>,
        image_pool: Arc<ImageWriterPool>,
        memory_guard: MemoryAutoStopGuard,
    ) -> Self {
        let task = task.into();
        Self {
            bus,
            cameras,
            buffer_lock: Arc::new(Mutex::new(EpisodeBuffer::new(0, task.clone(), fps))),
            next_episode_index: 1,
            task,
            fps,
            paths,
            skip_encoding,
            saver,
            image_pool,
            memory_guard,
            system: System::new(),
            tick_count: 0,
        }
    }

    pub fn current_episode_index(&self) -> u64 {
        self.buffer_lock.lock().episode_index
    }

    pub fn current_episode_size(&self) -> u64 {
        self.buffer_lock.lock().size
    }

    /// Count of episodes finalized (queued for save) so far this session,
    /// including the one `stop_and_drain` finalizes on exit. Used for the
    /// `meta/info` summary (§6) — not a correctness invariant (§7: file
    /// count is never load-bearing).
    pub fn total_episodes(&self) -> u64 {
        self.next_episode_index
    }

    pub fn cameras(&self) -> &[String] {
        &self.cameras
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// One iteration of the record loop (§4.E steps 1-3).
    pub fn tick(&mut self) -> HorusResult<TickOutcome> {
        self.tick_count += 1;
        if self.memory_guard.sample_if_due(self.tick_count, &mut self.system) {
            return Ok(TickOutcome::MemoryLimitExceeded);
        }

        let mut images = HashMap::new();
        for camera in &self.cameras {
            match self.bus.latest(&format!("image/{}", camera)) {
                Some(Payload::Image { width, height, bytes }) => {
                    images.insert(camera.clone(), ImageSample::new(width, height, bytes));
                }
                _ => return Ok(TickOutcome::SkippedMissingCamera),
            }
        }

        let state = match self.bus.latest("joint/follower") {
            Some(Payload::Vector { values, .. }) => values,
            _ => JointVector::new(JointUnit::RawUnits, vec![]),
        };
        let action = match self.bus.latest("action/command") {
            Some(Payload::Vector { values, .. }) => values,
            _ => JointVector::new(JointUnit::RawUnits, vec![]),
        };

        let mut buffer = self.buffer_lock.lock();
        let frame_index = buffer.size;
        for (camera, image) in &images {
            let dest = self.paths.image_frame_path(buffer.episode_index, camera, frame_index);
            self.image_pool.submit(buffer.episode_index, image.clone(), dest);
        }
        buffer.append(state, images, action, HashMap::new());
        Ok(TickOutcome::Appended)
    }

    /// Apply a user-driven command (§4.E, §6 single-keystroke controls).
    pub fn apply(&mut self, command: RecordCommand) -> HorusResult<()> {
        match command {
            RecordCommand::SaveAndNext => {
                let mut buffer = self.buffer_lock.lock();
                if buffer.is_empty() {
                    return Ok(());
                }
                let finished = buffer.deep_copy();
                *buffer = EpisodeBuffer::new(self.next_episode_index, self.task.clone(), self.fps);
                self.next_episode_index += 1;
                drop(buffer);

                let task = EpisodeSaveTask::new(finished, self.paths.clone(), self.cameras.clone(), self.skip_encoding);
                self.saver.queue_save(task)
            }
            RecordCommand::Abort => {
                let mut buffer = self.buffer_lock.lock();
                let episode_index = buffer.episode_index;
                self.image_pool.clear_episode(episode_index);
                *buffer = EpisodeBuffer::new(episode_index, self.task.clone(), self.fps);
                Ok(())
            }
            RecordCommand::Exit => Ok(()),
        }
    }

    /// Stop the loop cleanly: queue whatever is buffered (if non-empty) and
    /// wait for the saver to fully drain. Called on `exit` before offload.
    pub fn stop_and_drain(&mut self) -> HorusResult<()> {
        self.apply(RecordCommand::SaveAndNext)?;
        // `EpisodeSaver::stop` is invoked by the supervisor, which owns the
        // `Arc<EpisodeSaver>` alongside this loop; draining here would
        // require unique ownership this loop does not have.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::bus::Payload;

    fn setup() -> (RecordLoop, Bus, Arc<EpisodeSaver>) {
        let bus = Bus::new();
        let dir = tempfile::tempdir().unwrap();
        let paths = DatasetPaths::new(dir.path());
        let image_pool = Arc::new(ImageWriterPool::new(1));
        let saver = Arc::new(EpisodeSaver::new(1, image_pool.clone()));
        let guard = MemoryAutoStopGuard::new(u64::MAX, 100);
        let record_loop = RecordLoop::new(
            bus.clone(),
            vec!["top".to_string()],
            "pick",
            30.0,
            paths,
            true,
            saver.clone(),
            image_pool,
            guard,
        );
        (record_loop, bus, saver)
    }

    #[test]
    fn tick_skips_when_required_camera_has_no_frame_yet() {
        let (mut record_loop, _bus, _saver) = setup();
        let outcome = record_loop.tick().unwrap();
        assert_eq!(outcome, TickOutcome::SkippedMissingCamera);
        assert_eq!(record_loop.current_episode_size(), 0);
    }

    #[test]
    fn tick_appends_when_all_required_cameras_present() {
        let (mut record_loop, bus, _saver) = setup();
        bus.publish("image/top", Payload::image(2, 2, vec![0u8; 12]));
        let outcome = record_loop.tick().unwrap();
        assert_eq!(outcome, TickOutcome::Appended);
        assert_eq!(record_loop.current_episode_size(), 1);
    }

    #[test]
    fn save_and_next_advances_episode_index_and_resets_buffer() {
        let (mut record_loop, bus, _saver) = setup();
        bus.publish("image/top", Payload::image(2, 2, vec![0u8; 12]));
        record_loop.tick().unwrap();
        assert_eq!(record_loop.current_episode_index(), 0);

        record_loop.apply(RecordCommand::SaveAndNext).unwrap();
        assert_eq!(record_loop.current_episode_index(), 1);
        assert_eq!(record_loop.current_episode_size(), 0);
    }

    #[test]
    fn abort_discards_buffer_without_advancing_index() {
        let (mut record_loop, bus, _saver) = setup();
        bus.publish("image/top", Payload::image(2, 2, vec![0u8; 12]));
        record_loop.tick().unwrap();
        record_loop.apply(RecordCommand::Abort).unwrap();
        assert_eq!(record_loop.current_episode_index(), 0);
        assert_eq!(record_loop.current_episode_size(), 0);
    }
}
