//! Offload orchestrator (§4.I): uploads a finished dataset to cloud/edge,
//! triggers training, polls for completion, and retrieves the trained model.

pub mod api;
pub mod orchestrator;
pub mod transport;

pub use orchestrator::{OffloadMode, OffloadOrchestrator, OffloadState};
