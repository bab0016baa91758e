//! Connection session lifecycle.
//!
//! The session gates every other operation: reads and writes require
//! `Connected`, and the only transitions are the ones `connect`,
//! `disconnect` and a failed status check drive. The session is reusable
//! indefinitely; there is no terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::error::{ConsoleError, Result};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Device endpoint parameters supplied at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout_ms: u64,
}

/// Read-only view of the session, safe to hand to a renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnState,
    pub endpoint: Option<Endpoint>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Process-wide connection lifecycle tracker, owned by the engine.
#[derive(Debug, Default)]
pub struct ConnectionSession {
    state: ConnState,
    endpoint: Option<Endpoint>,
    last_read_at: Option<DateTime<Utc>>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Enter `Connecting` with a fresh endpoint. A connect while already
    /// connected replaces the previous session.
    pub fn begin_connect(&mut self, endpoint: Endpoint) {
        self.state = ConnState::Connecting;
        self.endpoint = Some(endpoint);
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnState::Connected;
    }

    /// Back to `Disconnected`, dropping the endpoint. Used by disconnect,
    /// failed connects, and stale-connection reconciliation alike.
    pub fn reset(&mut self) {
        self.state = ConnState::Disconnected;
        self.endpoint = None;
    }

    /// Record a successful read for the snapshot's `last_read_at`.
    pub fn mark_read_now(&mut self) {
        self.last_read_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            endpoint: self.endpoint.clone(),
            last_read_at: self.last_read_at,
        }
    }
}

/// Syntactic dotted-quad IPv4 check, applied before any remote call.
pub fn validate_ipv4(ip: &str) -> Result<()> {
    ip.parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| ConsoleError::invalid(format!("'{}' is not a valid IPv4 address", ip)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dotted_quad_addresses() {
        assert!(validate_ipv4("192.168.1.50").is_ok());
        assert!(validate_ipv4("0.0.0.0").is_ok());
        assert!(validate_ipv4("255.255.255.255").is_ok());
    }

    #[test]
    fn rejects_out_of_range_octets() {
        assert!(matches!(
            validate_ipv4("999.1.1.1"),
            Err(ConsoleError::InvalidArgument(_))
        ));
        assert!(validate_ipv4("1.2.3.256").is_err());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(validate_ipv4("").is_err());
        assert!(validate_ipv4("plc.local").is_err());
        assert!(validate_ipv4("1.2.3").is_err());
        assert!(validate_ipv4("1.2.3.4.5").is_err());
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            ip: "192.168.1.50".to_string(),
            port: 502,
            unit_id: 1,
            timeout_ms: 1000,
        }
    }

    #[test]
    fn connect_lifecycle_transitions() {
        let mut session = ConnectionSession::new();
        assert_eq!(session.state(), ConnState::Disconnected);

        session.begin_connect(endpoint());
        assert_eq!(session.state(), ConnState::Connecting);
        assert!(session.endpoint().is_some());

        session.mark_connected();
        assert!(session.is_connected());

        session.reset();
        assert_eq!(session.state(), ConnState::Disconnected);
        assert!(session.endpoint().is_none());
    }

    #[test]
    fn reconnect_replaces_previous_endpoint() {
        let mut session = ConnectionSession::new();
        session.begin_connect(endpoint());
        session.mark_connected();

        let other = Endpoint {
            ip: "10.0.0.9".to_string(),
            ..endpoint()
        };
        session.begin_connect(other.clone());
        assert_eq!(session.state(), ConnState::Connecting);
        assert_eq!(session.endpoint(), Some(&other));
    }

    #[test]
    fn snapshot_reflects_last_read_time() {
        let mut session = ConnectionSession::new();
        assert!(session.snapshot().last_read_at.is_none());
        session.mark_read_now();
        assert!(session.snapshot().last_read_at.is_some());
    }
}
