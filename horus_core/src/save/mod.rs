//! Episode persistence: dataset layout, the async saver, the image writer
//! pool, video encoding, and the memory auto-stop guard (§4.E-§4.H).

pub mod dataset;
pub mod encoder;
pub mod image_writer;
pub mod memory_guard;
pub mod saver;

use crate::frame::EpisodeBuffer;
use dataset::DatasetPaths;

/// One unit of work handed to the async saver: an owned deep copy of a
/// finalized episode plus everything needed to write it to disk (§4.F).
pub struct EpisodeSaveTask {
    pub buffer: EpisodeBuffer,
    pub paths: DatasetPaths,
    pub cameras: Vec<String>,
    pub skip_encoding: bool,
}

impl EpisodeSaveTask {
    pub fn new(buffer: EpisodeBuffer, paths: DatasetPaths, cameras: Vec<String>, skip_encoding: bool) -> Self {
        Self {
            buffer,
            paths,
            cameras,
            skip_encoding,
        }
    }
}
