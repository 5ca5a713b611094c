//! Kestrel Common - shared error types, configuration, and types
//!
//! This crate provides the ambient stack used across every other Kestrel
//! crate: a unified error hierarchy, typed configuration, shared record/
//! topic/partition/group types, and a metrics facade.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api_key;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::KestrelConfig;
pub use error::{Error, Result};
pub use types::*;
