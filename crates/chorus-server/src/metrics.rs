//! Prometheus recorder and the metric names used across the server.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Histogram buckets for connection lifetimes, from one second to one day.
const CONNECTION_DURATION_BUCKETS: [f64; 8] =
    [1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14_400.0, 86_400.0];

/// Builder with the server's histogram buckets applied.
pub fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(WS_CONNECTION_DURATION_SECONDS.to_owned()),
        &CONNECTION_DURATION_BUCKETS,
    )
}

/// Install the global recorder and describe every server metric.
///
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = builder()?.install_recorder()?;
    describe();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe() {
    describe_counter!(WS_CONNECTIONS_TOTAL, "WebSocket connections accepted");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "WebSocket connections ended");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "WebSocket connections currently open");
    describe_histogram!(
        WS_CONNECTION_DURATION_SECONDS,
        Unit::Seconds,
        "Lifetime of finished connections"
    );
    describe_counter!(WS_BROADCAST_DROPS_TOTAL, "Broadcast frames a recipient could not take");
    describe_counter!(WS_FRAMES_DROPPED_TOTAL, "Frames discarded, by reason");
    describe_counter!(WS_UPGRADES_REJECTED_TOTAL, "Upgrade requests refused, by reason");
    describe_counter!(SESSION_JOINS_TOTAL, "Listening sessions started");
    describe_counter!(SESSION_LEAVES_TOTAL, "Listening sessions ended");
    describe_counter!(GATEWAY_ERRORS_TOTAL, "Listener store failures, by operation");
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Broadcast deliveries that could not be queued (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Frames discarded (counter, labels: reason).
pub const WS_FRAMES_DROPPED_TOTAL: &str = "ws_frames_dropped_total";
/// Upgrades rejected (counter, labels: reason).
pub const WS_UPGRADES_REJECTED_TOTAL: &str = "ws_upgrades_rejected_total";
/// Session joins recorded (counter).
pub const SESSION_JOINS_TOTAL: &str = "session_joins_total";
/// Session leaves recorded (counter).
pub const SESSION_LEAVES_TOTAL: &str = "session_leaves_total";
/// Session store failures (counter, labels: operation).
pub const GATEWAY_ERRORS_TOTAL: &str = "gateway_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_from_local_recorder() {
        // Local recorder only; the global one can be installed once per process.
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe();
            metrics::counter!(SESSION_JOINS_TOTAL).increment(2);
            metrics::histogram!(WS_CONNECTION_DURATION_SECONDS).record(42.0);
        });

        let output = render(&handle);
        assert!(output.contains("session_joins_total 2"));
        assert!(output.contains("# HELP session_joins_total Listening sessions started"));
        assert!(output.contains(r#"ws_connection_duration_seconds_bucket{le="60"} 1"#));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_BROADCAST_DROPS_TOTAL,
            WS_FRAMES_DROPPED_TOTAL,
            WS_UPGRADES_REJECTED_TOTAL,
            SESSION_JOINS_TOTAL,
            SESSION_LEAVES_TOTAL,
            GATEWAY_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
