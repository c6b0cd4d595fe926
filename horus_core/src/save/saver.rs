//! Async episode saver (§4.F): a fixed-size worker pool draining a FIFO
//! queue of `EpisodeSaveTask`s, each retried up to 3 times with exponential
//! backoff, always working from a fresh deep copy so a retry never observes
//! a partially-mutated buffer from a prior attempt.

use super::dataset::{self, ColumnarEpisode, DatasetPaths, EpisodeRecord};
use super::encoder;
use super::image_writer::ImageWriterPool;
use super::EpisodeSaveTask;
use crate::error::{HorusError, HorusResult};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MIN_FLUSH_TIMEOUT: Duration = Duration::from_secs(120);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// §4.F / design notes: `save_queue` is a bounded pending set, unlike
/// `image_queue`. A full queue blocks the record loop's `save` action
/// (`queue_save`'s `Sender::send`) rather than erroring — acceptable because
/// `save` is operator-initiated, not a per-tick hot path.
const SAVE_QUEUE_CAPACITY: usize = 4;

pub struct EpisodeSaver {
    sender: Option<Sender<EpisodeSaveTask>>,
    pending: Arc<AtomicUsize>,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    workers: Vec<JoinHandle<()>>,
}

impl EpisodeSaver {
    pub fn new(num_workers: usize, image_pool: Arc<ImageWriterPool>) -> Self {
        let (sender, receiver) = channel::bounded::<EpisodeSaveTask>(SAVE_QUEUE_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let workers = (0..num_workers.max(1))
            .map(|i| spawn_worker(i, receiver.clone(), pending.clone(), in_flight.clone(), image_pool.clone()))
            .collect();
        Self {
            sender: Some(sender),
            pending,
            in_flight,
            workers,
        }
    }

    /// Hand ownership of a deep-copied, finalized episode to the saver.
    /// `save_episode` is guaranteed to run at most once per task, exactly
    /// once on success. Blocks the caller (the record loop's `save` action)
    /// when the bounded queue is already full, rather than erroring.
    pub fn queue_save(&self, task: EpisodeSaveTask) -> HorusResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| HorusError::Internal("saver already stopped".to_string()))?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        sender
            .send(task)
            .map_err(|_| HorusError::Internal("saver queue closed".to_string()))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn in_flight_episodes(&self) -> Vec<u64> {
        self.in_flight.lock().iter().copied().collect()
    }

    /// Block until the queue is empty and no task is in flight, polling
    /// every 500ms — a blind join on the queue primitive cannot express a
    /// true "drained" timeout, so polling the counters is used instead.
    pub fn stop(&mut self, wait_for_completion: bool) {
        self.sender.take();
        if wait_for_completion {
            loop {
                let pending = self.pending.load(Ordering::SeqCst);
                let in_flight = self.in_flight.lock().len();
                if pending == 0 && in_flight == 0 {
                    break;
                }
                std::thread::sleep(STOP_POLL_INTERVAL);
            }
        }
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

impl Drop for EpisodeSaver {
    fn drop(&mut self) {
        self.stop(false);
    }
}

fn spawn_worker(
    worker_id: usize,
    receiver: Receiver<EpisodeSaveTask>,
    pending: Arc<AtomicUsize>,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    image_pool: Arc<ImageWriterPool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("horus-episode-saver-{}", worker_id))
        .spawn(move || {
            while let Ok(task) = receiver.recv() {
                let episode_index = task.buffer.episode_index;
                in_flight.lock().insert(episode_index);

                let mut last_err = None;
                for attempt in 1..=MAX_ATTEMPTS {
                    match save_attempt(&task, &image_pool) {
                        Ok(()) => {
                            last_err = None;
                            break;
                        }
                        Err(e) => {
                            log::warn!(
                                "saver: episode {} attempt {}/{} failed: {}",
                                episode_index,
                                attempt,
                                MAX_ATTEMPTS,
                                e
                            );
                            last_err = Some(e);
                            if attempt < MAX_ATTEMPTS {
                                std::thread::sleep(BASE_BACKOFF * 2u32.pow(attempt - 1));
                            }
                        }
                    }
                }
                if let Some(e) = last_err {
                    log::error!("saver: episode {} failed permanently: {}", episode_index, e);
                } else {
                    log::info!("saver: episode {} saved", episode_index);
                }

                in_flight.lock().remove(&episode_index);
                pending.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .expect("failed to spawn episode saver thread")
}

fn save_attempt(task: &EpisodeSaveTask, image_pool: &ImageWriterPool) -> HorusResult<()> {
    // Step 1: second defensive copy, independent of whatever the record
    // loop does with its own buffer after handing this task off.
    let buffer = task.buffer.deep_copy();
    buffer.validate()?;
    let episode_index = buffer.episode_index;

    // Step 2: wait for the image writer pool to have handled every frame
    // of every camera for this episode.
    let required = buffer.size * task.cameras.len() as u64;
    if required > 0 {
        let timeout = MIN_FLUSH_TIMEOUT.max(Duration::from_secs_f64(
            buffer.size as f64 * task.cameras.len() as f64 * 0.5,
        ));
        let deadline = Instant::now() + timeout;
        loop {
            if image_pool.flushed_count(episode_index) >= required {
                break;
            }
            if Instant::now() >= deadline {
                return Err(HorusError::ImageFlushTimeout {
                    episode_index,
                    waited_secs: timeout.as_secs_f64(),
                });
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    // Step 3: columnar data file.
    let episode = ColumnarEpisode::from_buffer(&buffer);
    dataset::write_columnar_episode(&task.paths, &episode)?;

    // Step 4: per-camera encode, hardware falling back to software.
    if !task.skip_encoding {
        for camera in &task.cameras {
            let frames_glob = task.paths.image_camera_dir(episode_index, camera).join("frame_%d.png");
            let output = task.paths.video_file(episode_index, camera);
            let use_hardware = std::env::var("NPU").map(|v| v != "0").unwrap_or(false);
            encoder::encode_episode_camera(episode_index, camera, &frames_glob, buffer.fps, &output, use_hardware)?;
        }
    }

    // Step 5: buffer drops here, releasing its Vecs — there is no separate
    // arena to release on this side of the boundary.

    // Step 6: this episode's own files must exist; other episodes' gaps
    // are not this task's concern.
    if !dataset::episode_files_exist(
        &task.paths,
        episode_index,
        &task.cameras,
        buffer.size,
        task.skip_encoding,
    ) {
        return Err(HorusError::EpisodeValidationError {
            episode_index,
            message: "expected output files missing after save".to_string(),
        });
    }

    dataset::append_episode_record(
        &task.paths,
        &EpisodeRecord {
            episode_index,
            task: buffer.task.clone(),
            length: buffer.size,
            fps: buffer.fps,
        },
    )?;
    image_pool.clear_episode(episode_index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EpisodeBuffer;
    use crate::joints::{JointUnit, JointVector};
    use std::collections::HashMap;

    fn buffer_with_frames(episode_index: u64, n: usize) -> EpisodeBuffer {
        let mut buf = EpisodeBuffer::new(episode_index, "pick", 30.0);
        for i in 0..n {
            buf.append(
                JointVector::new(JointUnit::Radians, vec![i as f64]),
                HashMap::new(),
                JointVector::new(JointUnit::RawUnits, vec![i as f64]),
                HashMap::new(),
            );
        }
        buf
    }

    #[test]
    fn queue_save_with_no_cameras_skips_image_wait_and_writes_columnar() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DatasetPaths::new(dir.path());
        let image_pool = Arc::new(ImageWriterPool::new(1));
        let mut saver = EpisodeSaver::new(1, image_pool);

        let task = EpisodeSaveTask::new(buffer_with_frames(0, 5), paths.clone(), vec![], true);
        saver.queue_save(task).unwrap();
        saver.stop(true);

        assert!(paths.data_file(0).exists());
    }

    #[test]
    fn stop_waits_for_in_flight_and_queued_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DatasetPaths::new(dir.path());
        let image_pool = Arc::new(ImageWriterPool::new(1));
        let mut saver = EpisodeSaver::new(2, image_pool);

        for i in 0..3 {
            let task = EpisodeSaveTask::new(buffer_with_frames(i, 3), paths.clone(), vec![], true);
            saver.queue_save(task).unwrap();
        }
        saver.stop(true);

        for i in 0..3 {
            assert!(paths.data_file(i).exists());
        }
    }
}
