//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Overall server state reported by `/health`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting connections.
    Ok,
    /// Shutdown has begun; open connections are being closed.
    Draining,
}

/// Health check response body.
#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    /// Server state.
    pub status: HealthStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections.
    pub connections: usize,
    /// Tracks with at least one connection in session.
    pub active_tracks: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    active_tracks: usize,
    draining: bool,
) -> HealthResponse {
    HealthResponse {
        status: if draining {
            HealthStatus::Draining
        } else {
            HealthStatus::Ok
        },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_tracks,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn counters_are_reported() {
        let started = Instant::now().checked_sub(Duration::from_secs(90)).unwrap();
        let resp = health_check(started, 3, 2, false);
        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 3);
        assert_eq!(body["active_tracks"], 2);
        assert!(body["uptime_secs"].as_u64().unwrap() >= 89);
    }

    #[test]
    fn draining_during_shutdown() {
        let resp = health_check(Instant::now(), 0, 0, true);
        assert_eq!(resp.status, HealthStatus::Draining);
        assert_eq!(serde_json::to_value(resp.status).unwrap(), "draining");
    }
}
