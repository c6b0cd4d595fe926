//! SSH/SFTP transport for edge upload, cloud model download, and the
//! secondary completion probe (§4.I).
//!
//! Exec's remote shell commands for shell-shaped operations (`tar -x`,
//! `test -d`, `rm -rf`, `mkdir -p`) and uses SFTP `stat`/`read`/`write` for
//! file transfer, rather than shelling out to a system `ssh`/`scp` binary —
//! this keeps the orchestrator's transport swappable for a fake one in
//! tests.

use crate::error::{HorusError, HorusResult};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

pub struct SshTransport {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl SshTransport {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }

    fn session(&self, connect_timeout: Duration) -> HorusResult<ssh2::Session> {
        let addr = format!("{}:{}", self.host, self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| HorusError::invalid_input(format!("could not resolve '{}'", self.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)?;
        let mut session = ssh2::Session::new().map_err(HorusError::from)?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(&self.user, &self.password)?;
        Ok(session)
    }

    /// §4.I: for modes 1/2/3, a 5s deadline on the startup probe so a dead
    /// remote fails fast instead of delaying operator feedback.
    pub fn test_connection(&self, quick: bool) -> HorusResult<()> {
        let timeout = if quick { Duration::from_secs(5) } else { Duration::from_secs(30) };
        self.session(timeout)?;
        Ok(())
    }

    pub fn exec(&self, command: &str) -> HorusResult<(i32, String)> {
        let session = self.session(Duration::from_secs(30))?;
        let mut channel = session.channel_session()?;
        channel.exec(command)?;
        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        channel.wait_close()?;
        Ok((channel.exit_status()?, output))
    }

    pub fn clear_remote_dir(&self, remote_dir: &str) -> HorusResult<()> {
        let (status, output) = self.exec(&format!("rm -rf '{0}' && mkdir -p '{0}'", remote_dir))?;
        if status != 0 {
            return Err(HorusError::UploadFailed {
                message: format!("clearing remote dir '{}' failed: {}", remote_dir, output),
            });
        }
        Ok(())
    }

    pub fn test_dir_exists(&self, remote_dir: &str) -> HorusResult<bool> {
        let (status, _) = self.exec(&format!("test -d '{}'", remote_dir))?;
        Ok(status == 0)
    }

    pub fn upload_file(&self, local_path: &Path, remote_path: &str) -> HorusResult<()> {
        let session = self.session(Duration::from_secs(60))?;
        let sftp = session.sftp()?;
        let data = std::fs::read(local_path)?;
        let mut remote_file = sftp.create(Path::new(remote_path))?;
        remote_file.write_all(&data)?;
        Ok(())
    }

    /// Edge upload (mode 2, tar path): upload the single archive then
    /// extract it remotely.
    pub fn upload_and_extract_tar(&self, local_tar: &Path, remote_tar_path: &str, remote_dir: &str) -> HorusResult<()> {
        self.upload_file(local_tar, remote_tar_path)?;
        let (status, output) = self.exec(&format!("tar -xf '{}' -C '{}'", remote_tar_path, remote_dir))?;
        if status != 0 {
            return Err(HorusError::UploadFailed {
                message: format!("remote tar extraction failed: {}", output),
            });
        }
        Ok(())
    }

    /// Per-file fallback used when tar archiving or remote extraction fails.
    /// Skips any file whose remote size already matches the local one, so a
    /// resumed upload only resends what changed since the prior attempt
    /// (§4.I resumability: "idempotent upload via rsync-like semantics").
    pub fn upload_file_tree(&self, local_root: &Path, remote_root: &str) -> HorusResult<()> {
        let session = self.session(Duration::from_secs(60))?;
        let sftp = session.sftp()?;
        let files = super::super::save::dataset::relative_file_set(local_root)?;
        let mut uploaded = 0usize;
        let mut skipped = 0usize;
        for rel in files {
            let remote_path = format!("{}/{}", remote_root, rel.display());
            let local_len = std::fs::metadata(local_root.join(&rel))?.len();
            if sftp
                .stat(Path::new(&remote_path))
                .map(|stat| stat.size == Some(local_len))
                .unwrap_or(false)
            {
                skipped += 1;
                continue;
            }
            if let Some(remote_parent) = Path::new(&remote_path).parent() {
                let _ = sftp.mkdir(remote_parent, 0o755);
            }
            let data = std::fs::read(local_root.join(&rel))?;
            let mut remote_file = sftp.create(Path::new(&remote_path))?;
            remote_file.write_all(&data)?;
            uploaded += 1;
        }
        log::info!("edge upload: {} file(s) sent, {} already present and skipped", uploaded, skipped);
        Ok(())
    }

    /// Recursively download `remote_path` into `local_root` (cloud model
    /// retrieval, §4.I). Directories of many small files are the norm, so
    /// this walks rather than fetching a single archive.
    pub fn download_dir(&self, remote_path: &str, local_root: &Path) -> HorusResult<()> {
        let session = self.session(Duration::from_secs(60))?;
        let sftp = session.sftp()?;
        std::fs::create_dir_all(local_root)?;
        download_recursive(&sftp, Path::new(remote_path), local_root)
    }
}

fn download_recursive(sftp: &ssh2::Sftp, remote_dir: &Path, local_dir: &Path) -> HorusResult<()> {
    std::fs::create_dir_all(local_dir)?;
    for (path, stat) in sftp.readdir(remote_dir)? {
        let file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        let local_path = local_dir.join(&file_name);
        if stat.is_dir() {
            download_recursive(sftp, &path, &local_path)?;
        } else {
            let mut remote_file = sftp.open(&path)?;
            let mut buf = Vec::new();
            remote_file.read_to_end(&mut buf)?;
            std::fs::write(&local_path, buf)?;
        }
    }
    Ok(())
}

/// Build a local tar archive of `root` (no compression; PNGs are already
/// compressed) for the edge single-file upload path.
pub fn build_tar_archive(root: &Path, output_path: &Path) -> HorusResult<()> {
    let file = std::fs::File::create(output_path)?;
    let mut builder = tar::Builder::new(file);
    builder.append_dir_all(".", root)?;
    builder.finish()?;
    Ok(())
}
