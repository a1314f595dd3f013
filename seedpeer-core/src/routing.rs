//! Routing table seam: construction parameters and the bootstrap entry point.

use std::time::Duration;

use async_trait::async_trait;

/// Default protocol identifier shared by the host handshake and the routing table.
pub const DEFAULT_PROTOCOL_ID: &str = "/seedpeer/kad/1.0.0";

/// How often a bootstrapped routing table refreshes itself.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Track every connected peer, whoever opened the connection.
    Server,
    /// Track only peers this node dialed.
    Client,
}

#[derive(Debug, Clone)]
pub struct RoutingParams {
    pub protocol_id: String,
    pub refresh_period: Duration,
    pub mode: Mode,
}

impl Default for RoutingParams {
    fn default() -> Self {
        Self {
            protocol_id: DEFAULT_PROTOCOL_ID.to_string(),
            refresh_period: DEFAULT_REFRESH_PERIOD,
            mode: Mode::Server,
        }
    }
}

impl RoutingParams {
    /// Protocol IDs look like `/name/.../version`: leading slash, no whitespace,
    /// no empty segments.
    pub fn validate(&self) -> Result<(), RoutingError> {
        let id = self.protocol_id.as_str();
        let valid = id.len() > 1
            && id.starts_with('/')
            && !id.chars().any(char::is_whitespace)
            && id[1..].split('/').all(|seg| !seg.is_empty());
        if !valid {
            return Err(RoutingError::InvalidProtocolId(self.protocol_id.clone()));
        }
        if self.refresh_period.is_zero() {
            return Err(RoutingError::InvalidRefreshPeriod);
        }
        Ok(())
    }
}

#[async_trait]
pub trait RoutingTable: Send + Sync {
    /// Seed the table and start periodic maintenance.
    async fn bootstrap(&self) -> Result<(), RoutingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("invalid protocol id {0:?}")]
    InvalidProtocolId(String),
    #[error("refresh period must be non-zero")]
    InvalidRefreshPeriod,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(id: &str) -> RoutingParams {
        RoutingParams {
            protocol_id: id.to_string(),
            ..RoutingParams::default()
        }
    }

    #[test]
    fn default_params_are_valid() {
        assert!(RoutingParams::default().validate().is_ok());
        assert!(params("/erd/kad/9.9.9").validate().is_ok());
    }

    #[test]
    fn malformed_protocol_ids_rejected() {
        for id in ["", "/", "kad/1.0", "/kad//1.0", "/kad/1.0/", "/kad 1.0"] {
            assert!(
                matches!(params(id).validate(), Err(RoutingError::InvalidProtocolId(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn zero_refresh_period_rejected() {
        let p = RoutingParams {
            refresh_period: Duration::ZERO,
            ..RoutingParams::default()
        };
        assert!(matches!(p.validate(), Err(RoutingError::InvalidRefreshPeriod)));
    }
}
