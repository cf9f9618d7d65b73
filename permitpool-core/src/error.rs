//! Error types for the PermitPool session client.
//!
//! One variant family per failure category of a session run. Every variant
//! except [`PermitPoolError::Parse`] is fatal to the session.

use thiserror::Error;

/// Result type alias using `PermitPoolError`.
pub type Result<T> = std::result::Result<T, PermitPoolError>;

/// Main error type for all PermitPool operations.
#[derive(Debug, Error)]
pub enum PermitPoolError {
    // ═══════════════════════════════════════════════════════════════════════════
    // STARTUP ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // WIRE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Inbound frame could not be parsed. Logged and dropped.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Server violated the protocol (missing signature, wrong channel, ...).
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Server reported an error after authentication.
    #[error("Server error: {0}")]
    Server(String),

    /// State version did not advance by exactly one.
    #[error("State version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// A numeric field could not be converted to its on-chain representation.
    #[error("Conversion error: {0}")]
    Conversion(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // SIGNING / AUTH ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Malformed input handed to a signer.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authentication handshake failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // CHANNEL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Setup problem outside the protocol's control (e.g. zero ledger balance).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// On-chain submission or confirmation failed.
    #[error("On-chain {phase} failed: {reason}")]
    OnChain { phase: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════════
    // NETWORK ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// No expected message within the watchdog window.
    #[error("Timed out after {seconds}s waiting in {phase}")]
    Timeout { phase: String, seconds: u64 },

    /// WebSocket transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection closed by the peer.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid hex encoding.
    #[error("Invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Internal invariant violation (should never happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PermitPoolError {
    /// Shorthand for an on-chain failure in the named phase.
    pub fn on_chain(phase: impl Into<String>, reason: impl ToString) -> Self {
        Self::OnChain {
            phase: phase.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if this error must terminate the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PermitPoolError::Parse(_))
    }

    /// Returns true if this error came from the authentication handshake.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, PermitPoolError::Auth(_))
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PermitPoolError::Config(_) => 2,
            PermitPoolError::Auth(_) => 3,
            PermitPoolError::Precondition(_) => 4,
            PermitPoolError::OnChain { .. } => 5,
            PermitPoolError::Timeout { .. } => 6,
            _ => 1,
        }
    }
}
