use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::AppState;

pub const METRIC_VERSION: &str = env!("CARGO_PKG_VERSION");

const LATENCY_WINDOW: usize = 2048;

#[derive(Default)]
pub(crate) struct RequestMetrics {
    pub(crate) counts: Mutex<HashMap<(String, String, u16), u64>>,
    pub(crate) latency_ns: Mutex<HashMap<String, Vec<u64>>>,
    pub(crate) images_uploaded_total: AtomicU64,
    pub(crate) media_delete_failures_total: AtomicU64,
}

impl RequestMetrics {
    pub(crate) async fn observe_request(
        &self,
        route: &str,
        method: &str,
        status: StatusCode,
        latency: Duration,
    ) {
        let mut counts = self.counts.lock().await;
        *counts
            .entry((route.to_string(), method.to_string(), status.as_u16()))
            .or_insert(0) += 1;
        drop(counts);
        let mut latency_map = self.latency_ns.lock().await;
        let samples = latency_map.entry(route.to_string()).or_insert_with(Vec::new);
        if samples.len() >= 2 * LATENCY_WINDOW {
            samples.drain(..LATENCY_WINDOW);
        }
        samples.push(latency.as_nanos() as u64);
    }
}

pub(crate) fn percentile_ns(values: &[u64], pct: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut v = values.to_vec();
    v.sort_unstable();
    let idx = ((v.len() as f64 - 1.0) * pct).round() as usize;
    v[idx]
}

pub(crate) fn make_request_id(state: &AppState) -> String {
    let id = state.request_id_seed.fetch_add(1, Ordering::Relaxed);
    format!("req-{id:016x}")
}

pub(crate) fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(v) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", v);
    }
    response
}
