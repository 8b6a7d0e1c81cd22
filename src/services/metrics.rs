use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref CLEANUP_RUNS: IntCounterVec = register_int_counter_vec!(
        "sweeparr_cleanup_runs_total",
        "Cleanup runs by final status",
        &["status"]
    )
    .unwrap();
    pub static ref MEDIA_PICKED_UP: IntCounter = register_int_counter!(
        "sweeparr_media_picked_up_total",
        "Media newly marked for deletion"
    )
    .unwrap();
    pub static ref MEDIA_REMOVED: IntCounterVec = register_int_counter_vec!(
        "sweeparr_media_removed_total",
        "Media rows soft-deleted, by reason",
        &["reason"]
    )
    .unwrap();
    pub static ref KEEP_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "sweeparr_keep_requests_total",
        "Keep requests by outcome",
        &["outcome"]
    )
    .unwrap();
}

pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
