//! Health probes for the HTTP transport.
//!
//! Liveness always answers 200 "ok". Readiness answers 200 once startup has
//! completed (every handler registered and the listener open) and 503 until
//! then.

use {
    serde::{Deserialize, Serialize},
    std::sync::atomic::{AtomicBool, Ordering},
    std::time::{SystemTime, UNIX_EPOCH},
};

/// Health status payload, available for diagnostics alongside the plain
/// probe bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug)]
pub struct HealthChecker {
    start_time: SystemTime,
    version: String,
    server_name: String,
    ready: AtomicBool,
}

impl HealthChecker {
    pub fn new(server_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            start_time: SystemTime::now(),
            version: version.into(),
            server_name: server_name.into(),
            ready: AtomicBool::new(false),
        }
    }

    /// Flip readiness on once startup completes.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Liveness probe body: always healthy while the process responds.
    pub fn liveness(&self) -> (u16, &'static str) {
        (200, "ok")
    }

    /// Readiness probe body.
    pub fn readiness(&self) -> (u16, &'static str) {
        if self.is_ready() {
            (200, "ok")
        } else {
            (503, "not ready")
        }
    }

    pub fn get_status(&self) -> HealthStatus {
        let now = SystemTime::now();
        HealthStatus {
            status: if self.is_ready() { "healthy" } else { "starting" }.to_string(),
            timestamp: now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
            version: self.version.clone(),
            uptime_seconds: now
                .duration_since(self.start_time)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flips_after_startup() {
        let checker = HealthChecker::new("genmcp", "0.1.0");
        assert_eq!(checker.liveness(), (200, "ok"));
        assert_eq!(checker.readiness(), (503, "not ready"));
        checker.mark_ready();
        assert_eq!(checker.readiness(), (200, "ok"));
    }
}
