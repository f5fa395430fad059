//! Metrics for the dispatch loop
//!
//! Recorded through the `metrics` facade; the server installs the exporter.

use metrics::{counter, gauge};

pub fn record_batch_fetched(size: usize) {
    counter!("postbox_batches_total").increment(1);
    counter!("postbox_messages_fetched_total").increment(size as u64);
}

pub fn record_poll_failed() {
    counter!("postbox_poll_failures_total").increment(1);
}

pub fn record_message_sent() {
    counter!("postbox_messages_sent_total").increment(1);
}

pub fn record_message_failed(kind: &'static str) {
    counter!("postbox_messages_failed_total", "kind" => kind).increment(1);
}

pub fn record_delivery_recorded() {
    counter!("postbox_delivery_records_total").increment(1);
}

pub fn set_dispatcher_running(running: bool) {
    gauge!("postbox_dispatcher_running").set(if running { 1.0 } else { 0.0 });
}

pub fn record_loop_exit(reason: &'static str) {
    counter!("postbox_loop_exits_total", "reason" => reason).increment(1);
}
