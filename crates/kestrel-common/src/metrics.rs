//! Metrics and observability for Kestrel.

use metrics::{counter, gauge, histogram};
use prometheus::{Encoder, TextEncoder};
use std::time::Instant;

// ============================================================================
// Produce / fetch metrics
// ============================================================================

pub fn record_messages_produced(topic: &str, count: u64, bytes: u64) {
    counter!("kestrel_messages_produced_total", "topic" => topic.to_string()).increment(count);
    counter!("kestrel_bytes_produced_total", "topic" => topic.to_string()).increment(bytes);
}

pub fn record_messages_consumed(topic: &str, partition: i32, count: u64, bytes: u64) {
    counter!("kestrel_messages_consumed_total",
        "topic" => topic.to_string(), "partition" => partition.to_string()
    ).increment(count);
    counter!("kestrel_bytes_consumed_total",
        "topic" => topic.to_string(), "partition" => partition.to_string()
    ).increment(bytes);
}

pub fn record_produce_latency(latency_us: f64) {
    histogram!("kestrel_produce_latency_us").record(latency_us);
}

pub fn record_fetch_latency(latency_us: f64) {
    histogram!("kestrel_fetch_latency_us").record(latency_us);
}

// ============================================================================
// Log / compaction metrics
// ============================================================================

pub fn set_high_watermark(topic: &str, partition: i32, hwm: i64) {
    gauge!("kestrel_high_watermark", "topic" => topic.to_string(), "partition" => partition.to_string())
        .set(hwm as f64);
}

pub fn record_segment_roll(topic: &str, partition: i32) {
    counter!("kestrel_segment_rolls_total", "topic" => topic.to_string(), "partition" => partition.to_string())
        .increment(1);
}

pub fn record_retention_run(segments_deleted: u64, bytes_deleted: u64) {
    counter!("kestrel_retention_segments_deleted_total").increment(segments_deleted);
    counter!("kestrel_retention_bytes_deleted_total").increment(bytes_deleted);
}

pub fn record_compaction_run(bytes_reclaimed: u64, keys_removed: u64, duration_ms: u64) {
    counter!("kestrel_compaction_runs_total").increment(1);
    counter!("kestrel_compaction_bytes_reclaimed_total").increment(bytes_reclaimed);
    counter!("kestrel_compaction_keys_removed_total").increment(keys_removed);
    histogram!("kestrel_compaction_duration_ms").record(duration_ms as f64);
}

// ============================================================================
// Replication / raft metrics
// ============================================================================

pub fn set_isr_size(topic: &str, partition: i32, size: usize) {
    gauge!("kestrel_isr_size", "topic" => topic.to_string(), "partition" => partition.to_string())
        .set(size as f64);
}

pub fn record_raft_event(event_type: &str) {
    counter!("kestrel_raft_events_total", "type" => event_type.to_string()).increment(1);
}

pub fn set_node_is_leader(node_id: i32, is_leader: bool) {
    gauge!("kestrel_node_is_leader", "node_id" => node_id.to_string())
        .set(if is_leader { 1.0 } else { 0.0 });
}

// ============================================================================
// Coordinator metrics
// ============================================================================

pub fn record_rebalance(group: &str) {
    counter!("kestrel_rebalances_total", "group" => group.to_string()).increment(1);
}

pub fn set_group_member_count(group: &str, count: usize) {
    gauge!("kestrel_group_members", "group" => group.to_string()).set(count as f64);
}

// ============================================================================
// Export
// ============================================================================

/// Export all registered metrics in Prometheus text format.
#[must_use]
pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("failed to encode Prometheus metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

/// Timer guard that records a histogram observation on drop.
pub struct LatencyTimer {
    start: Instant,
    record: fn(f64),
}

impl LatencyTimer {
    #[must_use]
    pub fn new(record: fn(f64)) -> Self {
        Self {
            start: Instant::now(),
            record,
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let micros = self.start.elapsed().as_secs_f64() * 1_000_000.0;
        (self.record)(micros);
    }
}
