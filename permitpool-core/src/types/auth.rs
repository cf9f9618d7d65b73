//! Authentication records.

use serde::{Deserialize, Serialize};

use crate::error::{PermitPoolError, Result};

/// Asset allowance delegated to the session key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    /// Asset identifier (e.g. "ytest.usd")
    pub asset: String,
    /// Maximum amount, decimal string exactly as sent on the wire
    pub amount: String,
}

impl Allowance {
    /// Creates a new allowance.
    pub fn new(asset: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            amount: amount.into(),
        }
    }
}

/// Parameters bound into both the auth request and the challenge signature.
///
/// Fields are private and there are no mutators: the same instance must be
/// used for `auth_request` and for the EIP-712 `auth_verify` signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthParams {
    session_key: String,
    allowances: Vec<Allowance>,
    expires_at: u64,
    scope: String,
    #[serde(skip)]
    application: String,
}

impl AuthParams {
    /// Creates a validated parameter record.
    pub fn new(
        session_key: impl Into<String>,
        allowances: Vec<Allowance>,
        expires_at: u64,
        scope: impl Into<String>,
        application: impl Into<String>,
    ) -> Result<Self> {
        let session_key = session_key.into();
        let scope = scope.into();
        let application = application.into();

        if !is_hex_address(&session_key) {
            return Err(PermitPoolError::InvalidInput(format!(
                "session key '{session_key}' is not a 20-byte hex address"
            )));
        }
        if application.is_empty() {
            return Err(PermitPoolError::InvalidInput("application name is empty".into()));
        }
        if let Some(bad) = allowances.iter().find(|a| a.asset.is_empty()) {
            return Err(PermitPoolError::InvalidInput(format!(
                "allowance with empty asset (amount {})",
                bad.amount
            )));
        }

        Ok(Self {
            session_key,
            allowances,
            expires_at,
            scope,
            application,
        })
    }

    /// Session key address.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Delegated allowances.
    pub fn allowances(&self) -> &[Allowance] {
        &self.allowances
    }

    /// Expiry, unix seconds.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Scope string.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Application name.
    pub fn application(&self) -> &str {
        &self.application
    }
}

/// Outcome of a successful handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Account address echoed by the server
    pub address: String,
    /// Session key echoed by the server
    pub session_key: String,
    /// Optional bearer token
    pub jwt_token: Option<String>,
}

/// Returns true for `0x` followed by 40 hex digits.
pub fn is_hex_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .map(|h| h.len() == 40 && h.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false)
}
