//! Frame and episode buffer: §3 DATA MODEL, §8 invariant 1 and 2.

use crate::error::{HorusError, HorusResult};
use crate::joints::JointVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One H x W x 3 uint8 image, already decoded/captured from a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSample {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl ImageSample {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Self {
        debug_assert_eq!(rgb.len(), width as usize * height as usize * 3);
        Self { width, height, rgb }
    }
}

/// One tick's joint + image + action sample. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_index: u64,
    pub episode_index: u64,
    pub timestamp: f64,
    pub observation_state: JointVector,
    pub observation_images: HashMap<String, ImageSample>,
    pub action: JointVector,
    /// Free-form named scalar/vector extras (observation.<sensor>).
    pub observation_extra: HashMap<String, Vec<f64>>,
}

/// Append-only container holding all frames of one in-progress episode.
///
/// Invariants (§3, §8.1/§8.2):
/// - for every column except `size`/`task`, the list length equals `size`
/// - `timestamp` is strictly increasing with step `1/fps`
/// - promotion to save is an atomic swap with a fresh buffer
pub struct EpisodeBuffer {
    pub episode_index: u64,
    pub task: String,
    pub fps: f64,
    pub size: u64,
    pub states: Vec<JointVector>,
    pub actions: Vec<JointVector>,
    pub images: Vec<HashMap<String, ImageSample>>,
    pub extras: Vec<HashMap<String, Vec<f64>>>,
    pub timestamps: Vec<f64>,
}

impl EpisodeBuffer {
    pub fn new(episode_index: u64, task: impl Into<String>, fps: f64) -> Self {
        Self {
            episode_index,
            task: task.into(),
            fps,
            size: 0,
            states: Vec::new(),
            actions: Vec::new(),
            images: Vec::new(),
            extras: Vec::new(),
            timestamps: Vec::new(),
        }
    }

    /// Append one frame's data. `frame_index` is implied by `size` before
    /// the append (dense, starts at 0 within the episode).
    pub fn append(
        &mut self,
        state: JointVector,
        images: HashMap<String, ImageSample>,
        action: JointVector,
        extras: HashMap<String, Vec<f64>>,
    ) {
        let timestamp = self.size as f64 / self.fps;
        self.states.push(state);
        self.images.push(images);
        self.actions.push(action);
        self.extras.push(extras);
        self.timestamps.push(timestamp);
        self.size += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Check the structural invariant: every column's length equals `size`,
    /// and `timestamp` is strictly increasing with step `1/fps` (§8.1, §8.2).
    pub fn validate(&self) -> HorusResult<()> {
        if self.size == 0 {
            return Err(HorusError::EpisodeValidationError {
                episode_index: self.episode_index,
                message: "episode has zero frames".to_string(),
            });
        }
        let n = self.size as usize;
        if self.states.len() != n
            || self.actions.len() != n
            || self.images.len() != n
            || self.extras.len() != n
            || self.timestamps.len() != n
        {
            return Err(HorusError::EpisodeValidationError {
                episode_index: self.episode_index,
                message: "column length mismatch against size".to_string(),
            });
        }
        for i in 1..n {
            let expected = i as f64 / self.fps;
            if (self.timestamps[i] - expected).abs() > 1e-9 {
                return Err(HorusError::EpisodeValidationError {
                    episode_index: self.episode_index,
                    message: format!(
                        "timestamp[{}] = {} does not equal {}/fps",
                        i, self.timestamps[i], i
                    ),
                });
            }
            if self.timestamps[i] <= self.timestamps[i - 1] {
                return Err(HorusError::EpisodeValidationError {
                    episode_index: self.episode_index,
                    message: format!("timestamp not strictly increasing at index {}", i),
                });
            }
        }
        Ok(())
    }

    /// Deep-copy this buffer into a standalone owned value, leaving `self`
    /// untouched. Used both by the atomic swap (record.rs) and by the
    /// saver's second defensive copy before destructive extraction (§4.F step 1).
    pub fn deep_copy(&self) -> EpisodeBuffer {
        EpisodeBuffer {
            episode_index: self.episode_index,
            task: self.task.clone(),
            fps: self.fps,
            size: self.size,
            states: self.states.clone(),
            actions: self.actions.clone(),
            images: self.images.clone(),
            extras: self.extras.clone(),
            timestamps: self.timestamps.clone(),
        }
    }

    pub fn frame(&self, i: usize) -> Option<Frame> {
        if i >= self.size as usize {
            return None;
        }
        Some(Frame {
            frame_index: i as u64,
            episode_index: self.episode_index,
            timestamp: self.timestamps[i],
            observation_state: self.states[i].clone(),
            observation_images: self.images[i].clone(),
            action: self.actions[i].clone(),
            observation_extra: self.extras[i].clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::JointUnit;

    fn vec3(v: f64) -> JointVector {
        JointVector::new(JointUnit::RawUnits, vec![v; 3])
    }

    #[test]
    fn append_then_swap_yields_dense_columns_and_empty_live_buffer() {
        let mut buf = EpisodeBuffer::new(0, "pick", 30.0);
        for i in 0..10 {
            buf.append(vec3(i as f64), HashMap::new(), vec3(i as f64), HashMap::new());
        }
        assert_eq!(buf.size, 10);
        buf.validate().unwrap();

        let copy = buf.deep_copy();
        let fresh = EpisodeBuffer::new(1, "pick", 30.0);
        assert_eq!(copy.size, 10);
        assert_eq!(fresh.size, 0);
        assert!(fresh.is_empty());
    }

    #[test]
    fn timestamp_sequence_matches_index_over_fps() {
        let mut buf = EpisodeBuffer::new(0, "t", 30.0);
        for i in 0..5 {
            buf.append(vec3(0.0), HashMap::new(), vec3(0.0), HashMap::new());
            assert!((buf.timestamps[i] - i as f64 / 30.0).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_frame_episode_fails_validation() {
        let buf = EpisodeBuffer::new(0, "t", 30.0);
        assert!(buf.validate().is_err());
    }
}
