//! Segmented append-only log storage engine.
//!
//! A `Log` is an ordered sequence of `Segment`s, each backed by a `.log`
//! data file and `.index`/`.timeindex` sparse index files. This crate owns
//! on-disk framing, segment rolling, crash recovery, retention, and
//! compaction; replication and the request plane live one layer up.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod framing;
pub mod log;

pub use log::{CompactionReport, FlushPolicy, Log, RecoveryReport, RetentionReport, Segment};
