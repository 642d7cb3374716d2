use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

#[derive(Default)]
pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_rate_total: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    connected_sockets: AtomicI64,
    presence_updates_total: AtomicU64,
    broadcast_lag_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_frame(frame_type: &str, is_error: bool) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_frame(frame_type, is_error);
    }
}

pub fn socket_connected() {
    if let Some(metrics) = global_metrics() {
        metrics.connected_sockets.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn socket_disconnected() {
    if let Some(metrics) = global_metrics() {
        metrics.connected_sockets.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn increment_presence_updates() {
    if let Some(metrics) = global_metrics() {
        metrics.presence_updates_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn increment_broadcast_lag() {
    if let Some(metrics) = global_metrics() {
        metrics.broadcast_lag_total.fetch_add(1, Ordering::SeqCst);
    }
}

impl RelayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_frame(&self, frame_type: &str, is_error: bool) {
        let label = normalize_frame_type(frame_type);
        increment_label_counter(&self.ws_rate_total, &label, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, &label, 1);
        }
    }

    pub fn render_prometheus(&self, live_rooms: usize) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP relay_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP relay_ws_rate_total Total inbound websocket frames by type.\n");
        output.push_str("# TYPE relay_ws_rate_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_rate_total", &self.ws_rate_total);

        output.push_str("# HELP relay_ws_errors_total Rejected websocket frames by type.\n");
        output.push_str("# TYPE relay_ws_errors_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_errors_total", &self.ws_errors_total);

        output.push_str("# HELP relay_connected_sockets Currently open websocket connections.\n");
        output.push_str("# TYPE relay_connected_sockets gauge\n");
        output.push_str(&format!(
            "relay_connected_sockets {}\n",
            self.connected_sockets.load(Ordering::SeqCst).max(0)
        ));

        output.push_str("# HELP relay_live_rooms Rooms with at least one connection.\n");
        output.push_str("# TYPE relay_live_rooms gauge\n");
        output.push_str(&format!("relay_live_rooms {live_rooms}\n"));

        output.push_str("# HELP presence_updates_total Accepted presence publications.\n");
        output.push_str("# TYPE presence_updates_total counter\n");
        output.push_str(&format!(
            "presence_updates_total {}\n",
            self.presence_updates_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP broadcast_lag_total Subscribers that fell behind and were resynced.\n",
        );
        output.push_str("# TYPE broadcast_lag_total counter\n");
        output.push_str(&format!(
            "broadcast_lag_total {}\n",
            self.broadcast_lag_total.load(Ordering::SeqCst)
        ));

        output
    }
}

// Room ids are unbounded user input; collapse them so label cardinality
// stays fixed.
fn normalize_endpoint(path: &str) -> String {
    let mut normalized_segments = Vec::new();
    let mut previous = "";
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if previous == "rooms" {
            normalized_segments.push("{room_id}".to_string());
        } else if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
        } else {
            normalized_segments.push(segment.to_string());
        }
        previous = segment;
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_frame_type(frame_type: &str) -> String {
    let normalized = frame_type.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn lock<T>(map: &Mutex<T>) -> MutexGuard<'_, T> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = lock(map);
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = lock(map);
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = lock(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = lock(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{frame_type=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{normalize_endpoint, RelayMetrics};
    use std::sync::atomic::Ordering;

    #[test]
    fn render_prometheus_includes_http_and_presence_metrics() {
        let metrics = RelayMetrics::default();
        metrics.record_http_request("get", "/v1/rooms/quiz-attempt:42/activity", 200, 15);
        metrics.record_http_request("GET", "/v1/rooms/admin-dashboard/activity", 403, 25);
        metrics.record_ws_frame("update_presence", false);
        metrics.record_ws_frame("update_presence", true);
        metrics.connected_sockets.fetch_add(3, Ordering::SeqCst);
        metrics.presence_updates_total.fetch_add(5, Ordering::SeqCst);

        let rendered = metrics.render_prometheus(2);

        assert!(rendered.contains(
            "relay_request_rate_total{method=\"GET\",endpoint=\"/v1/rooms/{room_id}/activity\"} 2"
        ));
        assert!(rendered.contains(
            "relay_request_errors_total{method=\"GET\",endpoint=\"/v1/rooms/{room_id}/activity\"} 1"
        ));
        assert!(rendered.contains("relay_ws_rate_total{frame_type=\"update_presence\"} 2"));
        assert!(rendered.contains("relay_ws_errors_total{frame_type=\"update_presence\"} 1"));
        assert!(rendered.contains("relay_connected_sockets 3"));
        assert!(rendered.contains("relay_live_rooms 2"));
        assert!(rendered.contains("presence_updates_total 5"));
        assert!(rendered.contains("broadcast_lag_total 0"));
    }

    #[test]
    fn endpoints_collapse_room_ids_and_numbers() {
        assert_eq!(normalize_endpoint("/"), "/");
        assert_eq!(normalize_endpoint("/v1/rooms"), "/v1/rooms");
        assert_eq!(normalize_endpoint("/v1/rooms/x/activity"), "/v1/rooms/{room_id}/activity");
        assert_eq!(normalize_endpoint("/v1/things/12"), "/v1/things/{number}");
    }
}
