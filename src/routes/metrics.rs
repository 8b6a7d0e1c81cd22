use crate::services::metrics;

pub async fn metrics_text() -> String {
    metrics::render()
}
