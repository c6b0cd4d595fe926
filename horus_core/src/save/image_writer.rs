//! Image writer pool (§4.G): off-thread PNG encoding so the record loop
//! never blocks on disk IO.
//!
//! The work queue is deliberately unbounded — applying back-pressure here
//! would mean stalling the record loop (or the camera node feeding it)
//! whenever disk throughput dips, which trades a dropped frame for a
//! dropped *tick*, the opposite of what §4.E wants. A write failure is
//! still counted as flushed so the saver's image-flush wait (§4.F step 2)
//! can never hang on a frame this pool silently dropped; the saver notices
//! the gap itself via the per-episode file-existence check.

use crate::frame::ImageSample;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

struct WriteTask {
    episode_index: u64,
    image: ImageSample,
    destination: PathBuf,
}

pub struct ImageWriterPool {
    sender: Option<Sender<WriteTask>>,
    workers: Vec<JoinHandle<()>>,
    flushed: Arc<Mutex<HashMap<u64, u64>>>,
}

impl ImageWriterPool {
    pub fn new(num_workers: usize) -> Self {
        let (sender, receiver) = channel::unbounded::<WriteTask>();
        let flushed = Arc::new(Mutex::new(HashMap::new()));
        let workers = (0..num_workers.max(1))
            .map(|i| spawn_worker(i, receiver.clone(), flushed.clone()))
            .collect();
        Self {
            sender: Some(sender),
            workers,
            flushed,
        }
    }

    /// Enqueue one frame for a camera. Never blocks.
    pub fn submit(&self, episode_index: u64, image: ImageSample, destination: PathBuf) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(WriteTask {
                episode_index,
                image,
                destination,
            });
        }
    }

    /// Number of frames handled (written or dropped-with-error) for an episode.
    pub fn flushed_count(&self, episode_index: u64) -> u64 {
        self.flushed.lock().get(&episode_index).copied().unwrap_or(0)
    }

    pub fn clear_episode(&self, episode_index: u64) {
        self.flushed.lock().remove(&episode_index);
    }

    /// Drop the sender so workers drain the remaining queue and exit, then
    /// join them. Called during supervisor shutdown, after the saver has
    /// stopped enqueuing new episodes.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

impl Drop for ImageWriterPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    worker_id: usize,
    receiver: Receiver<WriteTask>,
    flushed: Arc<Mutex<HashMap<u64, u64>>>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("horus-image-writer-{}", worker_id))
        .spawn(move || {
            while let Ok(task) = receiver.recv() {
                if let Some(parent) = task.destination.parent() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        log::error!(
                            "image writer: failed to create directory for {}: {}",
                            task.destination.display(),
                            e
                        );
                    }
                }
                let write_result = image::save_buffer(
                    &task.destination,
                    &task.image.rgb,
                    task.image.width,
                    task.image.height,
                    image::ColorType::Rgb8,
                );
                if let Err(e) = write_result {
                    log::error!(
                        "image writer: failed writing {}: {}",
                        task.destination.display(),
                        e
                    );
                }
                *flushed.lock().entry(task.episode_index).or_insert(0) += 1;
            }
        })
        .expect("failed to spawn image writer thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ImageSample;

    #[test]
    fn writes_frame_and_counts_it_as_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ImageWriterPool::new(1);
        let image = ImageSample::new(2, 2, vec![0u8; 2 * 2 * 3]);
        let dest = dir.path().join("frame_0.png");
        pool.submit(0, image, dest.clone());

        for _ in 0..200 {
            if pool.flushed_count(0) == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(pool.flushed_count(0), 1);
        assert!(dest.exists());
    }

    #[test]
    fn failed_write_still_counts_as_flushed() {
        let pool = ImageWriterPool::new(1);
        let image = ImageSample::new(2, 2, vec![0u8; 2 * 2 * 3]);
        // A destination under a path component that is actually a file
        // (not a directory) makes create_dir_all fail and the subsequent
        // write fail too.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let dest = blocker.join("frame_0.png");
        pool.submit(1, image, dest);

        for _ in 0..200 {
            if pool.flushed_count(1) == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(pool.flushed_count(1), 1);
    }
}
