//! Topic/partition registry and Raft-backed metadata plane: replica assignment, the `MetadataBackend` seam (`Direct` for a
//! single broker, `Raft` for a cluster), and the command set the metadata
//! state machine applies.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod backend;
mod command;
mod node;
mod offsets;
mod registry;

pub use backend::{not_controller_error, Direct, MetadataBackend, Raft};
pub use command::Command;
pub use node::{RaftFsm, RaftNode};
pub use offsets::{CommittedOffset, OffsetStore};
pub use registry::{round_robin_assign, Registry, RegistryConfig};
