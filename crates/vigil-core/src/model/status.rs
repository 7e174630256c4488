use std::time::Duration;

use serde::Serialize;

/// Snapshot of the remote capture service. Replaced wholesale, never
/// patched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub is_running: bool,
    pub uptime: Option<Duration>,
    pub events_processed: Option<u64>,
    /// The service's own view of its upstream connection.
    pub connection_state: Option<String>,
}

impl ServiceStatus {
    pub fn stopped() -> Self {
        Self {
            is_running: false,
            uptime: None,
            events_processed: None,
            connection_state: None,
        }
    }
}
