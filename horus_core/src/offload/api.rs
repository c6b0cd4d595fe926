//! HTTP client for the training service (§6 HTTP endpoints, §4.I).

use crate::error::{HorusError, HorusResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const CALL_DEADLINE: Duration = Duration::from_secs(30);
/// File transfer calls get their own, much longer deadline: §6 only fixes
/// the 30s deadline for the notify/train/status control calls, not for the
/// data transfer itself.
const UPLOAD_CALL_DEADLINE: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Serialize)]
struct NotifyUploadCompleteRequest<'a> {
    repo_id: &'a str,
    api_username: &'a str,
    api_password: &'a str,
    tar: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tar_path: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainResponse {
    pub transaction_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub transaction_id: Option<String>,
    pub progress_pct: Option<f64>,
    pub ssh_host: Option<String>,
    pub ssh_username: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_password_b64: Option<String>,
    pub model_path: Option<String>,
}

impl StatusResponse {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("completed")
    }

    pub fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("ready")
    }
}

pub struct ApiClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::blocking::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> HorusResult<Self> {
        let client = reqwest::blocking::Client::builder().timeout(CALL_DEADLINE).build()?;
        Ok(Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            client,
        })
    }

    pub fn notify_upload_complete(&self, repo_id: &str, tar: bool, tar_path: Option<&str>) -> HorusResult<()> {
        let url = format!("{}/notify-upload-complete", self.base_url);
        let body = NotifyUploadCompleteRequest {
            repo_id,
            api_username: &self.username,
            api_password: &self.password,
            tar,
            tar_path,
        };
        let resp = self.client.post(&url).json(&body).send()?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(HorusError::UploadFailed {
                message: format!("notify-upload-complete returned {}", resp.status()),
            })
        }
    }

    pub fn train(&self, repo_id: &str) -> HorusResult<TrainResponse> {
        let url = format!("{}/train/{}", self.base_url, repo_id);
        let resp = self.client.post(&url).send()?;
        if !resp.status().is_success() {
            return Err(HorusError::UploadFailed {
                message: format!("train endpoint returned {}", resp.status()),
            });
        }
        Ok(resp.json()?)
    }

    pub fn status(&self, repo_id: &str) -> HorusResult<StatusResponse> {
        let url = format!("{}/status/{}", self.base_url, repo_id);
        let resp = self.client.get(&url).send()?;
        if !resp.status().is_success() {
            return Err(HorusError::Http(format!("status endpoint returned {}", resp.status())));
        }
        Ok(resp.json()?)
    }

    /// Streams one file's bytes up to the training service, keyed by its
    /// path relative to the dataset root (§4.I cloud-raw/cloud-encoded
    /// upload: "streamed", not tarred — only the edge transfer archives).
    /// Idempotent: a prior successful upload of the same path is skipped by
    /// the caller via [`Self::remote_file_size`] before this is invoked.
    pub fn upload_file(&self, repo_id: &str, relative_path: &str, local_path: &Path) -> HorusResult<()> {
        let body = std::fs::read(local_path)?;
        let url = format!("{}/upload/{}/{}", self.base_url, repo_id, relative_path);
        let resp = self
            .client
            .put(&url)
            .timeout(UPLOAD_CALL_DEADLINE)
            .basic_auth(&self.username, Some(&self.password))
            .body(body)
            .send()?;
        if !resp.status().is_success() {
            return Err(HorusError::UploadFailed {
                message: format!("upload of '{}' returned {}", relative_path, resp.status()),
            });
        }
        Ok(())
    }

    /// Checks whether `relative_path` already exists remotely with the given
    /// byte length, so a resumed upload can skip files it already sent in a
    /// prior run (§4.I default resume path: "idempotent upload via
    /// rsync-like semantics (incremental)").
    pub fn remote_file_matches(&self, repo_id: &str, relative_path: &str, local_len: u64) -> bool {
        let url = format!("{}/upload/{}/{}", self.base_url, repo_id, relative_path);
        let resp = match self.client.head(&url).basic_auth(&self.username, Some(&self.password)).send() {
            Ok(r) => r,
            Err(_) => return false,
        };
        if !resp.status().is_success() {
            return false;
        }
        resp.content_length() == Some(local_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_completed_matches_case_insensitively() {
        let status = StatusResponse {
            status: "Completed".to_string(),
            transaction_id: None,
            progress_pct: None,
            ssh_host: None,
            ssh_username: None,
            ssh_port: None,
            ssh_password_b64: None,
            model_path: None,
        };
        assert!(status.is_completed());
        assert!(!status.is_ready());
    }

    #[test]
    fn remote_file_matches_is_false_when_unreachable() {
        let client = ApiClient::new("http://127.0.0.1:1", "user", "pass").unwrap();
        assert!(!client.remote_file_matches("repo", "data/0.columnar", 42));
    }
}
