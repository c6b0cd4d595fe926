//! Dataflow node runtime (§4.B), its bus payloads (§9 bus payload
//! polymorphism), and the adapter backends nodes drive (§4.A).

pub mod adapters;
pub mod bus;
pub mod graph;
pub mod node;

pub use adapters::{CameraDriver, FollowerDriver, LeaderDriver};
pub use bus::{Bus, Payload};
pub use graph::{spawn_on_bus, CameraNode, FollowerNode, LeaderNode, MapperNode};
pub use node::{Node, NodeEvent, NodeHandle, NodeState};
