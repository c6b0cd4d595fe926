//! IPC transport bridge (§4.C): forwards selected dataflow topics to the
//! controlling CLI over a pair of named Unix domain datagram sockets
//! (images, joint vectors) using request/reply. Lazy: nothing is bound
//! until `connect()`; `disconnect()` tears both sockets down.

use crate::dataflow::bus::{Bus, Payload};
use crate::error::{HorusError, HorusResult};
use crate::joints::JointVector;
use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// The per-call deadline a reply must be sent within so the caller's pull
/// never blocks indefinitely (§4.C). Absence of data still yields a reply
/// (empty payload), it just means "nothing published yet".
pub const REPLY_DEADLINE: Duration = Duration::from_millis(100);

const MAX_DATAGRAM: usize = 4 * 1024 * 1024;

/// Wire envelope for a request over the topic socket: the requested topic
/// name. An empty reply (0 bytes) means "no data published on this topic yet".
fn encode_reply(payload: Option<&Payload>) -> Vec<u8> {
    match payload {
        None => Vec::new(),
        Some(p) => bincode::serialize(p).unwrap_or_default(),
    }
}

pub struct IpcBridge {
    bus: Bus,
    image_socket_path: PathBuf,
    joint_socket_path: PathBuf,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl IpcBridge {
    pub fn new(bus: Bus, runtime_dir: impl Into<PathBuf>) -> Self {
        let dir: PathBuf = runtime_dir.into();
        Self {
            bus,
            image_socket_path: dir.join("image.sock"),
            joint_socket_path: dir.join("joint.sock"),
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    pub fn image_socket_path(&self) -> &PathBuf {
        &self.image_socket_path
    }

    pub fn joint_socket_path(&self) -> &PathBuf {
        &self.joint_socket_path
    }

    /// Delete any stale socket file left behind by a prior crashed session
    /// (Lifecycle Supervisor step 4).
    pub fn remove_stale(path: &PathBuf) {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Bind both sockets and start their request/reply server threads.
    /// No-op if already connected.
    pub fn connect(&mut self) -> HorusResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(parent) = self.image_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::remove_stale(&self.image_socket_path);
        Self::remove_stale(&self.joint_socket_path);

        let image_sock = UnixDatagram::bind(&self.image_socket_path)?;
        let joint_sock = UnixDatagram::bind(&self.joint_socket_path)?;
        image_sock.set_read_timeout(Some(Duration::from_millis(200)))?;
        joint_sock.set_read_timeout(Some(Duration::from_millis(200)))?;

        self.threads
            .push(spawn_image_server(image_sock, self.bus.clone(), self.running.clone()));
        self.threads
            .push(spawn_joint_server(joint_sock, self.bus.clone(), self.running.clone()));
        Ok(())
    }

    /// Stop both server threads and remove the socket files. Idempotent.
    pub fn disconnect(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
        Self::remove_stale(&self.image_socket_path);
        Self::remove_stale(&self.joint_socket_path);
    }
}

impl Drop for IpcBridge {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn spawn_image_server(sock: UnixDatagram, bus: Bus, running: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while running.load(Ordering::SeqCst) {
            match sock.recv_from(&mut buf) {
                Ok((n, from_addr)) => {
                    let topic = String::from_utf8_lossy(&buf[..n]).to_string();
                    let reply = encode_reply(bus.latest(&topic).as_ref());
                    if let Some(path) = from_addr.as_pathname() {
                        let _ = sock.send_to(&reply, path);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    // Normal idle timeout; the caller-side silence on timeouts
                    // described in §4.C applies symmetrically here.
                    continue;
                }
                Err(_) => continue,
            }
        }
    })
}

fn spawn_joint_server(sock: UnixDatagram, bus: Bus, running: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = vec![0u8; 64 * 1024];
        while running.load(Ordering::SeqCst) {
            match sock.recv_from(&mut buf) {
                Ok((n, from_addr)) => {
                    // A push carries "push:" + topic + '\0' + bincode(JointVector);
                    // a pull request is just the bare topic name.
                    let data = &buf[..n];
                    if let Some(rest) = data.strip_prefix(b"push:") {
                        if let Some(sep) = rest.iter().position(|&b| b == 0) {
                            let topic = String::from_utf8_lossy(&rest[..sep]).to_string();
                            if let Ok(values) = bincode::deserialize::<JointVector>(&rest[sep + 1..]) {
                                bus.publish(&topic, Payload::vector(topic.clone(), values));
                            }
                        }
                        continue;
                    }
                    let topic = String::from_utf8_lossy(data).to_string();
                    let reply = encode_reply(bus.latest(&topic).as_ref());
                    if let Some(path) = from_addr.as_pathname() {
                        let _ = sock.send_to(&reply, path);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => continue,
                Err(_) => continue,
            }
        }
    })
}

/// Client-side helper the record loop (or an external CLI process) uses to
/// pull the latest value for a topic with the 100ms reply deadline.
pub struct IpcClient {
    socket: UnixDatagram,
    server_path: PathBuf,
}

impl IpcClient {
    pub fn connect(server_path: impl Into<PathBuf>, client_path: impl Into<PathBuf>) -> HorusResult<Self> {
        let client_path: PathBuf = client_path.into();
        if client_path.exists() {
            let _ = std::fs::remove_file(&client_path);
        }
        let socket = UnixDatagram::bind(&client_path)?;
        socket.set_read_timeout(Some(REPLY_DEADLINE))?;
        Ok(Self {
            socket,
            server_path: server_path.into(),
        })
    }

    /// Pull the latest payload for `topic`. Returns `Ok(None)` both on an
    /// empty-payload reply and on a timeout: callers should treat both as
    /// "no data yet this tick" and never stall on either (§4.C).
    pub fn pull(&self, topic: &str) -> HorusResult<Option<Payload>> {
        self.socket.send_to(topic.as_bytes(), &self.server_path)?;
        let mut buf = vec![0u8; 4 * 1024 * 1024];
        match self.socket.recv(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(bincode::deserialize(&buf[..n]).ok()),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(HorusError::Io(e)),
        }
    }

    /// Push an action command vector (CLI -> follower path).
    pub fn push_action(&self, topic: &str, values: JointVector) -> HorusResult<()> {
        let mut msg = b"push:".to_vec();
        msg.extend_from_slice(topic.as_bytes());
        msg.push(0);
        msg.extend_from_slice(&bincode::serialize(&values)?);
        self.socket.send_to(&msg, &self.server_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::JointUnit;

    #[test]
    fn pull_on_empty_topic_returns_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Bus::new();
        let mut bridge = IpcBridge::new(bus.clone(), dir.path());
        bridge.connect().unwrap();

        let client = IpcClient::connect(bridge.joint_socket_path(), dir.path().join("client.sock")).unwrap();
        let result = client.pull("joint/follower").unwrap();
        assert!(result.is_none());

        bridge.disconnect();
    }

    #[test]
    fn published_value_round_trips_through_socket() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Bus::new();
        bus.publish(
            "joint/follower",
            Payload::vector("follower", JointVector::new(JointUnit::RawUnits, vec![1.0, 2.0])),
        );
        let mut bridge = IpcBridge::new(bus, dir.path());
        bridge.connect().unwrap();

        let client = IpcClient::connect(bridge.joint_socket_path(), dir.path().join("client2.sock")).unwrap();
        let reply = client.pull("joint/follower").unwrap().unwrap();
        match reply {
            Payload::Vector { values, .. } => assert_eq!(values.values, vec![1.0, 2.0]),
            _ => panic!("expected vector"),
        }
        bridge.disconnect();
    }
}
