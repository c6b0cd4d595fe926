//! Video encoder (§4.F step 4): encodes one camera's frame sequence for one
//! episode into an mp4, trying the hardware path first when enabled and
//! falling back to software on a hardware-channel-exhaustion failure.
//!
//! Shells out to `ffmpeg` rather than binding libav directly, matching the
//! "exec a real tool, check its exit status and stderr" pattern the rest of
//! this crate uses for process-boundary concerns (ssh exec, tar).

use crate::error::{HorusError, HorusResult};
use std::path::Path;
use std::process::Command;

/// Substrings that identify a hardware encode session being refused because
/// no accelerated channel is free, as opposed to a genuine encode failure.
const HARDWARE_EXHAUSTION_MARKERS: &[&str] = &[
    "no capable devices found",
    "cannot load libcuda",
    "function not implemented",
    "device or resource busy",
];

fn is_hardware_exhaustion(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    HARDWARE_EXHAUSTION_MARKERS.iter().any(|m| lower.contains(m))
}

fn run_ffmpeg(args: &[String], episode_index: u64, camera: &str) -> HorusResult<()> {
    let output = Command::new("ffmpeg")
        .args(args)
        .output()
        .map_err(|e| HorusError::EncoderError {
            episode_index,
            camera: camera.to_string(),
            message: format!("failed to spawn ffmpeg: {}", e),
        })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    Err(HorusError::EncoderError {
        episode_index,
        camera: camera.to_string(),
        message: stderr,
    })
}

fn hardware_args(frames_glob: &Path, fps: f64, output_path: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-framerate".to_string(),
        fps.to_string(),
        "-i".to_string(),
        frames_glob.display().to_string(),
        "-c:v".to_string(),
        "h264_nvenc".to_string(),
        output_path.display().to_string(),
    ]
}

fn software_args(frames_glob: &Path, fps: f64, output_path: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-framerate".to_string(),
        fps.to_string(),
        "-i".to_string(),
        frames_glob.display().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output_path.display().to_string(),
    ]
}

/// Encode one camera's frame directory into `output_path`. `frames_glob`
/// follows ffmpeg's `frame_%d.png`-style sequential pattern.
pub fn encode_episode_camera(
    episode_index: u64,
    camera: &str,
    frames_glob: &Path,
    fps: f64,
    output_path: &Path,
    use_hardware: bool,
) -> HorusResult<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if use_hardware {
        let args = hardware_args(frames_glob, fps, output_path);
        match run_ffmpeg(&args, episode_index, camera) {
            Ok(()) => return Ok(()),
            Err(HorusError::EncoderError { message, .. }) if is_hardware_exhaustion(&message) => {
                log::warn!(
                    "encoder: hardware channel exhausted for episode {} camera '{}', falling back to software",
                    episode_index,
                    camera
                );
            }
            Err(e) => return Err(e),
        }
    }

    let args = software_args(frames_glob, fps, output_path);
    run_ffmpeg(&args, episode_index, camera)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_hardware_exhaustion_messages() {
        assert!(is_hardware_exhaustion("Error: No capable devices found for NVENC"));
        assert!(is_hardware_exhaustion("ioctl failed: Device or resource busy"));
        assert!(!is_hardware_exhaustion("ffmpeg: invalid argument -framerate"));
    }

    #[test]
    fn software_args_select_libx264_and_yuv420p() {
        let args = software_args(Path::new("frame_%d.png"), 30.0, Path::new("out.mp4"));
        assert!(args.iter().any(|a| a == "libx264"));
        assert!(args.iter().any(|a| a == "yuv420p"));
    }
}
