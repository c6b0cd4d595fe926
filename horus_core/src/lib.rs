//! # horus_core
//!
//! Core runtime for a bimanual teleoperation recorder: the dataflow node
//! runtime and bus, the IPC bridge to a controlling process, the teleop
//! mapper and safety monitor, the episode record loop and buffer, the
//! async episode saver and image writer pool, the memory auto-stop guard,
//! and the post-episode offload orchestrator.
//!
//! `horus_teleop` (the CLI binary) owns process lifecycle, startup
//! ordering, and signal handling on top of the types here.

pub mod config;
pub mod dataflow;
pub mod error;
pub mod frame;
pub mod ipc;
pub mod joints;
pub mod offload;
pub mod record;
pub mod save;
pub mod teleop;

pub use config::DeviceConfig;
pub use dataflow::{Bus, Node, NodeEvent, NodeState, Payload};
pub use error::{HorusError, HorusResult};
pub use frame::{EpisodeBuffer, Frame, ImageSample};
pub use ipc::IpcBridge;
pub use joints::{JointMeta, JointUnit, JointVector};
pub use offload::{OffloadMode, OffloadOrchestrator, OffloadState};
pub use record::{RecordCommand, RecordLoop, TickOutcome};
pub use teleop::{MapperState, PoseMappingBaseline, TeleopMapper};
