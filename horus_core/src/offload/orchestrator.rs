//! Offload orchestrator state machine (§4.I):
//! `Idle -> Probing -> Uploading -> Notifying -> PollingStatus`, then either
//! `-> TrainingTriggered -> Downloading -> Done` or `-> Failed` (terminal).

use super::api::ApiClient;
use super::transport::{build_tar_archive, SshTransport};
use crate::error::{HorusError, HorusResult};
use crate::save::dataset::{self, DatasetPaths};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadMode {
    LocalOnly,
    CloudRaw,
    Edge,
    CloudEncoded,
    LocalRaw,
}

impl OffloadMode {
    /// Parses the `CLOUD` env var's 0-4 range (§6).
    pub fn from_cloud_value(value: u8) -> HorusResult<Self> {
        Ok(match value {
            0 => OffloadMode::LocalOnly,
            1 => OffloadMode::CloudRaw,
            2 => OffloadMode::Edge,
            3 => OffloadMode::CloudEncoded,
            4 => OffloadMode::LocalRaw,
            other => return Err(HorusError::config(format!("CLOUD must be 0-4, got {}", other))),
        })
    }

    pub fn uploads_anywhere(self) -> bool {
        matches!(self, OffloadMode::CloudRaw | OffloadMode::Edge | OffloadMode::CloudEncoded)
    }

    pub fn skip_local_encoding(self) -> bool {
        matches!(self, OffloadMode::CloudRaw | OffloadMode::Edge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadState {
    Idle,
    Probing,
    Uploading,
    Notifying,
    PollingStatus,
    TrainingTriggered,
    Downloading,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub port: u16,
    pub remote_path: String,
}

#[derive(Debug, Clone)]
pub struct OffloadConfig {
    pub mode: OffloadMode,
    pub repo_id: String,
    pub api_base_url: String,
    pub api_username: String,
    pub api_password: String,
    pub dataset_root: std::path::PathBuf,
    pub local_output: std::path::PathBuf,
    pub edge: Option<EdgeConfig>,
    pub skip_upload: bool,
    pub download_only: bool,
}

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const TRAINING_DEADLINE: Duration = Duration::from_secs(120 * 60);

pub struct OffloadOrchestrator {
    config: OffloadConfig,
    api: ApiClient,
    state: OffloadState,
}

impl OffloadOrchestrator {
    pub fn new(config: OffloadConfig) -> HorusResult<Self> {
        let api = ApiClient::new(
            config.api_base_url.clone(),
            config.api_username.clone(),
            config.api_password.clone(),
        )?;
        Ok(Self {
            config,
            api,
            state: OffloadState::Idle,
        })
    }

    pub fn state(&self) -> OffloadState {
        self.state
    }

    /// Runs the whole offload phase to completion (or to `Failed`). Modes 0
    /// and 4 do nothing but local bookkeeping; §4.I's table lists no
    /// upload/post-upload step for either.
    pub fn run(&mut self) -> HorusResult<OffloadState> {
        if matches!(self.config.mode, OffloadMode::LocalOnly | OffloadMode::LocalRaw) {
            self.state = OffloadState::Done;
            return Ok(self.state);
        }

        if self.config.download_only {
            return self.run_download_only();
        }

        self.state = OffloadState::Probing;
        if let Err(e) = self.probe(true) {
            self.state = OffloadState::Failed;
            return Err(e);
        }

        if !self.config.skip_upload {
            self.state = OffloadState::Uploading;
            if let Err(e) = self.upload() {
                self.state = OffloadState::Failed;
                return Err(e);
            }
        }

        self.state = OffloadState::Notifying;
        let tar = matches!(self.config.mode, OffloadMode::Edge);
        if let Err(e) = self.api.notify_upload_complete(&self.config.repo_id, tar, None) {
            self.state = OffloadState::Failed;
            return Err(e);
        }

        self.state = OffloadState::PollingStatus;
        match self.poll_until_complete() {
            Ok(status) => {
                self.state = OffloadState::Downloading;
                if let Err(e) = self.download_model(&status) {
                    self.state = OffloadState::Failed;
                    return Err(e);
                }
                self.state = OffloadState::Done;
                Ok(self.state)
            }
            Err(e) => {
                self.state = OffloadState::Failed;
                Err(e)
            }
        }
    }

    fn run_download_only(&mut self) -> HorusResult<OffloadState> {
        self.state = OffloadState::PollingStatus;
        let status = self.api.status(&self.config.repo_id)?;
        if !status.is_completed() {
            return Err(HorusError::TrainingTimeout {
                repo_id: self.config.repo_id.clone(),
                elapsed_mins: 0,
            });
        }
        self.state = OffloadState::Downloading;
        self.download_model(&status)?;
        self.state = OffloadState::Done;
        Ok(self.state)
    }

    /// §4.I startup connection probe: a 5s SSH/HTTP deadline before "ready".
    /// `pub` so `doctor`'s connectivity check can run the same probe the
    /// supervisor runs at session startup, rather than only checking that
    /// the config shape parses.
    pub fn probe(&self, quick: bool) -> HorusResult<()> {
        let started = Instant::now();
        let result = match self.config.mode {
            OffloadMode::Edge => {
                let edge = self.config.edge.as_ref().ok_or_else(|| HorusError::config("edge mode requires EDGE_SERVER_* configuration"))?;
                let transport = SshTransport::new(&edge.host, edge.port, &edge.user, &edge.password);
                transport.test_connection(quick)
            }
            OffloadMode::CloudRaw | OffloadMode::CloudEncoded => self.api.status(&self.config.repo_id).map(|_| ()),
            OffloadMode::LocalOnly | OffloadMode::LocalRaw => Ok(()),
        };
        result.map_err(|e| HorusError::ConnectionProbeFailed {
            elapsed_secs: started.elapsed().as_secs_f64(),
            message: e.to_string(),
        })
    }

    fn upload(&self) -> HorusResult<()> {
        match self.config.mode {
            OffloadMode::Edge => self.upload_to_edge(),
            OffloadMode::CloudRaw | OffloadMode::CloudEncoded => {
                // No SSH credentials are available for the cloud target
                // before training starts (§4.I: those arrive in the
                // `COMPLETED` status response). The upload step for cloud
                // modes instead goes over the same HTTP API used for the
                // rest of the protocol.
                self.upload_to_cloud_over_http()
            }
            OffloadMode::LocalOnly | OffloadMode::LocalRaw => Ok(()),
        }
    }

    /// §4.I edge upload: tar the whole dataset directory, upload as one
    /// file, extract remotely; clear the remote target dir first; fall
    /// back to per-file transfer if the tar path fails.
    fn upload_to_edge(&self) -> HorusResult<()> {
        let edge = self.config.edge.as_ref().ok_or_else(|| HorusError::config("edge mode requires EDGE_SERVER_* configuration"))?;
        let transport = SshTransport::new(&edge.host, edge.port, &edge.user, &edge.password);
        let remote_dir = format!("{}/{}/{}", edge.remote_path, self.config.api_username, self.config.repo_id);
        transport.clear_remote_dir(&remote_dir)?;

        let tar_path = std::env::temp_dir().join(format!("{}-{}.tar", self.config.api_username, self.config.repo_id));
        let tar_result = build_tar_archive(&self.config.dataset_root, &tar_path).and_then(|_| {
            let remote_tar = format!("{}/upload.tar", remote_dir);
            transport.upload_and_extract_tar(&tar_path, &remote_tar, &remote_dir)
        });
        let _ = std::fs::remove_file(&tar_path);

        match tar_result {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("edge upload: tar path failed ({}), falling back to per-file transfer", e);
                transport
                    .upload_file_tree(&self.config.dataset_root, &remote_dir)
                    .map_err(|e| HorusError::UploadFailed { message: e.to_string() })
            }
        }
    }

    /// Streams every dataset file up to the training service one at a time
    /// (§4.I: cloud-raw/cloud-encoded payload is "streamed", not tarred —
    /// only the edge transfer archives). Already-uploaded files are skipped
    /// by comparing remote and local byte length, giving the default resume
    /// path its "idempotent … incremental" semantics (§4.I resumability).
    fn upload_to_cloud_over_http(&self) -> HorusResult<()> {
        let paths = DatasetPaths::new(&self.config.dataset_root);
        if !paths.root.exists() {
            return Err(HorusError::UploadFailed {
                message: format!("dataset root '{}' does not exist", paths.root.display()),
            });
        }
        let files = dataset::relative_file_set(&paths.root)?;
        let mut uploaded = 0usize;
        let mut skipped = 0usize;
        for rel in &files {
            let local_path = paths.root.join(rel);
            let local_len = std::fs::metadata(&local_path)?.len();
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if self.api.remote_file_matches(&self.config.repo_id, &rel_str, local_len) {
                skipped += 1;
                continue;
            }
            self.api.upload_file(&self.config.repo_id, &rel_str, &local_path)?;
            uploaded += 1;
        }
        log::info!(
            "cloud upload: {} file(s) sent, {} already present and skipped",
            uploaded,
            skipped
        );
        Ok(())
    }

    fn poll_until_complete(&self) -> HorusResult<super::api::StatusResponse> {
        let deadline = Instant::now() + TRAINING_DEADLINE;
        let mut triggered = false;
        loop {
            let status = self.api.status(&self.config.repo_id)?;
            if status.is_ready() && !triggered {
                self.api.train(&self.config.repo_id)?;
                triggered = true;
            }
            if status.is_completed() {
                return Ok(status);
            }
            // Secondary completion probe: the status flag is known to lag;
            // an SSH `test -d` against the model directory is ground truth.
            if let (Some(host), Some(model_path)) = (&status.ssh_host, &status.model_path) {
                if let Some(user) = &status.ssh_username {
                    let password = status
                        .ssh_password_b64
                        .as_deref()
                        .and_then(|b64| BASE64.decode(b64).ok())
                        .and_then(|bytes| String::from_utf8(bytes).ok())
                        .unwrap_or_default();
                    let port = status.ssh_port.unwrap_or(22);
                    let transport = SshTransport::new(host, port, user, password);
                    if let Ok(true) = transport.test_dir_exists(model_path) {
                        let mut completed = status;
                        completed.status = "COMPLETED".to_string();
                        return Ok(completed);
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(HorusError::TrainingTimeout {
                    repo_id: self.config.repo_id.clone(),
                    elapsed_mins: TRAINING_DEADLINE.as_secs() / 60,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn download_model(&self, status: &super::api::StatusResponse) -> HorusResult<()> {
        let host = status.ssh_host.as_deref().ok_or_else(|| HorusError::DownloadFailed {
            repo_id: self.config.repo_id.clone(),
            message: "status response missing ssh_host".to_string(),
        })?;
        let user = status.ssh_username.as_deref().ok_or_else(|| HorusError::DownloadFailed {
            repo_id: self.config.repo_id.clone(),
            message: "status response missing ssh_username".to_string(),
        })?;
        let model_path = status.model_path.as_deref().ok_or_else(|| HorusError::DownloadFailed {
            repo_id: self.config.repo_id.clone(),
            message: "status response missing model_path".to_string(),
        })?;
        let password = status
            .ssh_password_b64
            .as_deref()
            .and_then(|b64| BASE64.decode(b64).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default();
        let port = status.ssh_port.unwrap_or(22);

        let transport = SshTransport::new(host, port, user, password);
        transport
            .download_dir(model_path, &self.config.local_output)
            .map_err(|e| HorusError::DownloadFailed {
                repo_id: self.config.repo_id.clone(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_value_out_of_range_is_rejected() {
        assert!(OffloadMode::from_cloud_value(5).is_err());
        assert_eq!(OffloadMode::from_cloud_value(2).unwrap(), OffloadMode::Edge);
    }

    #[test]
    fn local_modes_skip_local_encoding_is_false() {
        assert!(!OffloadMode::LocalOnly.skip_local_encoding());
        assert!(OffloadMode::Edge.skip_local_encoding());
        assert!(OffloadMode::CloudRaw.skip_local_encoding());
        assert!(!OffloadMode::CloudEncoded.skip_local_encoding());
    }
}
