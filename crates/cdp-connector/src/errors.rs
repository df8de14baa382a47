//! Connector error categories.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("failed to connect to browser: {0}")]
    ConnectFailed(String),

    #[error("cdp i/o failure: {0}")]
    CdpIo(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("target element not found: {0}")]
    TargetNotFound(String),

    #[error("option not found: {0}")]
    OptionNotFound(String),

    #[error("browser session expired")]
    SessionExpired,

    #[error("internal connector error: {0}")]
    Internal(String),
}

impl ConnectorError {
    /// Whether a single reconnect attempt is worthwhile.
    pub fn is_session_loss(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::CdpIo(_))
    }
}
