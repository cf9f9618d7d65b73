//! Network and flow configuration.
//!
//! [`YellowConfig`] describes where to connect (clearnet WebSocket, Ethereum
//! RPC, custody contract); [`FlowConfig`] describes what the session does once
//! connected. Both load from the environment after reading `.env`.

use std::str::FromStr;
use std::time::Duration;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroizing;

use permitpool_core::constants::*;
use permitpool_core::error::{PermitPoolError, Result};
use permitpool_core::types::{
    is_hex_address, parse_decimal, Allowance, AuthParams, Transfer, TransferAllocation,
};

use crate::lifecycle::FlowPlan;

/// Yellow Network configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct YellowConfig {
    /// WebSocket URL for the clearnet node
    pub ws_url: String,
    /// Ethereum RPC URL
    pub rpc_url: String,
    /// Chain ID (e.g., 11155111 for Sepolia)
    pub chain_id: u64,
    /// Custody contract address
    pub custody_address: String,
    /// Adjudicator contract address
    pub adjudicator_address: String,
    /// Challenge duration in seconds
    pub challenge_duration: u64,
    /// Watchdog window between phase transitions, seconds
    pub watchdog_secs: u64,
    /// Bound on one on-chain submit + confirmation, seconds
    pub confirmation_timeout_secs: u64,
    /// Attempts for the initial WebSocket connect
    pub connect_attempts: u32,
}

impl Default for YellowConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.into(),
            rpc_url: DEFAULT_RPC_URL.into(),
            chain_id: SEPOLIA_CHAIN_ID,
            custody_address: SEPOLIA_CUSTODY_ADDRESS.into(),
            adjudicator_address: SEPOLIA_ADJUDICATOR_ADDRESS.into(),
            challenge_duration: DEFAULT_CHALLENGE_DURATION,
            watchdog_secs: DEFAULT_WATCHDOG_SECS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

impl YellowConfig {
    /// Creates config for the Sepolia sandbox.
    pub fn sepolia() -> Self {
        Self::default()
    }

    /// Loads config from the environment, falling back to Sepolia defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let rpc_url = lookup("ETH_RPC_URL")
            .or_else(|| lookup("ALCHEMY_RPC_URL"))
            .unwrap_or(defaults.rpc_url);

        let config = Self {
            ws_url: lookup("YELLOW_WS_URL").unwrap_or(defaults.ws_url),
            rpc_url,
            chain_id: parse_var(&lookup, "CHAIN_ID", defaults.chain_id)?,
            custody_address: lookup("CUSTODY_ADDRESS").unwrap_or(defaults.custody_address),
            adjudicator_address: lookup("ADJUDICATOR_ADDRESS")
                .unwrap_or(defaults.adjudicator_address),
            challenge_duration: parse_var(&lookup, "CHALLENGE_DURATION", defaults.challenge_duration)?,
            watchdog_secs: parse_var(&lookup, "SESSION_WATCHDOG_SECS", defaults.watchdog_secs)?,
            confirmation_timeout_secs: parse_var(
                &lookup,
                "CONFIRMATION_TIMEOUT_SECS",
                defaults.confirmation_timeout_secs,
            )?,
            connect_attempts: defaults.connect_attempts,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks URLs, addresses, and timeouts.
    pub fn validate(&self) -> Result<()> {
        check_url("YELLOW_WS_URL", &self.ws_url, &["ws", "wss"])?;
        check_url("ETH_RPC_URL", &self.rpc_url, &["http", "https"])?;
        check_address("CUSTODY_ADDRESS", &self.custody_address)?;
        check_address("ADJUDICATOR_ADDRESS", &self.adjudicator_address)?;

        if self.watchdog_secs == 0 {
            return Err(PermitPoolError::Config("SESSION_WATCHDOG_SECS must be positive".into()));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(PermitPoolError::Config(
                "CONFIRMATION_TIMEOUT_SECS must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Watchdog window.
    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    /// Confirmation bound for each on-chain leg.
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// What the session does after connecting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Application name (also the EIP-712 domain name)
    pub application: String,
    /// Scope granted to the session key
    pub scope: String,
    /// Asset funding the channel and the allowance
    pub funding_asset: String,
    /// Allowance granted to the session key, decimal string
    pub allowance_amount: String,
    /// Session key lifetime, seconds
    pub session_ttl_secs: u64,
    /// Token address backing the channel
    pub token: String,
    /// Amount moved into the channel on resize, decimal string
    pub allocate_amount: String,
    /// Destination of the off-chain transfer
    pub transfer_destination: String,
    /// Amount of the off-chain transfer, decimal string
    pub transfer_amount: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            application: DEFAULT_APPLICATION.into(),
            scope: DEFAULT_SCOPE.into(),
            funding_asset: DEFAULT_FUNDING_ASSET.into(),
            allowance_amount: DEFAULT_ALLOWANCE_AMOUNT.into(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            token: SEPOLIA_TEST_TOKEN.into(),
            allocate_amount: DEFAULT_ALLOCATE_AMOUNT.to_string(),
            transfer_destination: DEFAULT_TRANSFER_DESTINATION.into(),
            transfer_amount: DEFAULT_TRANSFER_AMOUNT.into(),
        }
    }
}

impl FlowConfig {
    /// Loads flow settings from the environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            application: lookup("YELLOW_APPLICATION").unwrap_or(d.application),
            scope: lookup("YELLOW_SCOPE").unwrap_or(d.scope),
            funding_asset: lookup("FUNDING_ASSET").unwrap_or(d.funding_asset),
            allowance_amount: lookup("ALLOWANCE_AMOUNT").unwrap_or(d.allowance_amount),
            session_ttl_secs: parse_var(&lookup, "SESSION_TTL_SECS", d.session_ttl_secs)?,
            token: lookup("FUNDING_TOKEN").unwrap_or(d.token),
            allocate_amount: lookup("ALLOCATE_AMOUNT").unwrap_or(d.allocate_amount),
            transfer_destination: lookup("TRANSFER_DESTINATION").unwrap_or(d.transfer_destination),
            transfer_amount: lookup("TRANSFER_AMOUNT").unwrap_or(d.transfer_amount),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks names, addresses, and amounts.
    pub fn validate(&self) -> Result<()> {
        if self.application.is_empty() {
            return Err(PermitPoolError::Config("YELLOW_APPLICATION is empty".into()));
        }
        if self.funding_asset.is_empty() {
            return Err(PermitPoolError::Config("FUNDING_ASSET is empty".into()));
        }
        check_address("FUNDING_TOKEN", &self.token)?;
        check_address("TRANSFER_DESTINATION", &self.transfer_destination)?;
        check_amount("ALLOWANCE_AMOUNT", &self.allowance_amount)?;
        check_amount("ALLOCATE_AMOUNT", &self.allocate_amount)?;
        check_amount("TRANSFER_AMOUNT", &self.transfer_amount)?;
        Ok(())
    }

    /// Builds the auth parameters for `session_key`, expiring `session_ttl_secs` after `now`.
    pub fn auth_params(&self, session_key: &str, now: u64) -> Result<AuthParams> {
        AuthParams::new(
            session_key,
            vec![Allowance::new(&self.funding_asset, &self.allowance_amount)],
            now.saturating_add(self.session_ttl_secs),
            &self.scope,
            &self.application,
        )
    }

    /// Builds the channel plan for `account`.
    pub fn plan(&self, account: &str, network: &YellowConfig) -> Result<FlowPlan> {
        Ok(FlowPlan {
            funding_asset: self.funding_asset.clone(),
            chain_id: network.chain_id,
            token: self.token.clone(),
            adjudicator: network.adjudicator_address.clone(),
            challenge_duration: network.challenge_duration,
            allocate_amount: parse_amount_var("ALLOCATE_AMOUNT", &self.allocate_amount)?,
            funds_destination: account.to_owned(),
            transfer: Transfer {
                destination: self.transfer_destination.clone(),
                allocations: vec![TransferAllocation {
                    asset: self.funding_asset.clone(),
                    amount: self.transfer_amount.clone(),
                }],
            },
            confirmation_timeout: network.confirmation_timeout(),
        })
    }
}

/// Reads the account private key from `PRIVATE_KEY`.
pub fn account_key_from_env() -> Result<Zeroizing<String>> {
    let _ = dotenvy::dotenv();
    account_key_from_lookup(|key| std::env::var(key).ok())
}

pub(crate) fn account_key_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Zeroizing<String>> {
    let key = Zeroizing::new(lookup("PRIVATE_KEY").unwrap_or_default());
    if key.trim().is_empty() {
        return Err(PermitPoolError::Config("PRIVATE_KEY is not set".into()));
    }
    Ok(key)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| PermitPoolError::Config(format!("{key}='{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_amount_var(key: &str, raw: &str) -> Result<U256> {
    parse_decimal(key, raw).map_err(|e| PermitPoolError::Config(e.to_string()))
}

fn check_amount(key: &str, raw: &str) -> Result<()> {
    parse_amount_var(key, raw).map(|_| ())
}

fn check_address(key: &str, raw: &str) -> Result<()> {
    if is_hex_address(raw) {
        Ok(())
    } else {
        Err(PermitPoolError::Config(format!("{key}='{raw}' is not a hex address")))
    }
}

fn check_url(key: &str, raw: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| PermitPoolError::Config(format!("{key}='{raw}': {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(PermitPoolError::Config(format!(
            "{key}='{raw}': scheme must be one of {schemes:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = YellowConfig::default();
        assert!(config.ws_url.contains("sandbox"));
        assert_eq!(config.chain_id, 11155111);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_overrides() {
        let config = YellowConfig::from_lookup(env(&[
            ("YELLOW_WS_URL", "ws://127.0.0.1:9000/ws"),
            ("ALCHEMY_RPC_URL", "https://eth-sepolia.example/v2/key"),
            ("SESSION_WATCHDOG_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.ws_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.rpc_url, "https://eth-sepolia.example/v2/key");
        assert_eq!(config.watchdog(), Duration::from_secs(5));
    }

    #[test]
    fn test_eth_rpc_url_wins_over_alchemy() {
        let config = YellowConfig::from_lookup(env(&[
            ("ETH_RPC_URL", "https://rpc.one"),
            ("ALCHEMY_RPC_URL", "https://rpc.two"),
        ]))
        .unwrap();
        assert_eq!(config.rpc_url, "https://rpc.one");
    }

    #[test]
    fn test_config_rejects_bad_values() {
        for pairs in [
            [("YELLOW_WS_URL", "https://not-a-socket")],
            [("CHAIN_ID", "sepolia")],
            [("CUSTODY_ADDRESS", "0x1234")],
            [("SESSION_WATCHDOG_SECS", "0")],
        ] {
            let err = YellowConfig::from_lookup(env(&pairs)).unwrap_err();
            assert!(matches!(err, PermitPoolError::Config(_)), "{pairs:?}");
        }
    }

    #[test]
    fn test_private_key_required() {
        let err = account_key_from_lookup(env(&[])).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = account_key_from_lookup(env(&[("PRIVATE_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, PermitPoolError::Config(_)));

        let key = account_key_from_lookup(env(&[("PRIVATE_KEY", "0xabc")])).unwrap();
        assert_eq!(key.as_str(), "0xabc");
    }

    #[test]
    fn test_flow_config_rejects_fractional_amount() {
        let err = FlowConfig::from_lookup(env(&[("TRANSFER_AMOUNT", "0.5")])).unwrap_err();
        assert!(matches!(err, PermitPoolError::Config(_)));
    }

    #[test]
    fn test_auth_params_from_flow() {
        let flow = FlowConfig::default();
        let params = flow
            .auth_params("0x1111111111111111111111111111111111111111", 1_000)
            .unwrap();

        assert_eq!(params.expires_at(), 1_000 + DEFAULT_SESSION_TTL_SECS);
        assert_eq!(params.application(), DEFAULT_APPLICATION);
        assert_eq!(params.allowances()[0].asset, DEFAULT_FUNDING_ASSET);
    }

    #[test]
    fn test_plan_from_flow() {
        let account = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
        let plan = FlowConfig::default().plan(account, &YellowConfig::sepolia()).unwrap();

        assert_eq!(plan.allocate_amount, U256::from(DEFAULT_ALLOCATE_AMOUNT));
        assert_eq!(plan.funds_destination, account);
        assert_eq!(plan.transfer.allocations[0].amount, DEFAULT_TRANSFER_AMOUNT);
        assert_eq!(plan.chain_id, SEPOLIA_CHAIN_ID);
        assert_eq!(plan.adjudicator, SEPOLIA_ADJUDICATOR_ADDRESS);
        assert_eq!(plan.challenge_duration, DEFAULT_CHALLENGE_DURATION);
    }

    #[test]
    fn test_plan_follows_network_channel_terms() {
        let network = YellowConfig::from_lookup(env(&[
            ("ADJUDICATOR_ADDRESS", "0x1111111111111111111111111111111111111111"),
            ("CHALLENGE_DURATION", "86400"),
        ]))
        .unwrap();
        let plan = FlowConfig::default().plan("0xaaaa", &network).unwrap();

        assert_eq!(plan.adjudicator, "0x1111111111111111111111111111111111111111");
        assert_eq!(plan.challenge_duration, 86400);
    }
}
