//! Account and session-key signers.
//!
//! - [`AccountSigner`] holds the long-lived custody key. It signs raw strings
//!   (EIP-191), the auth challenge (EIP-712), and packed channel states.
//! - [`SessionSigner`] holds a fresh random key created per run. It signs every
//!   protocol request after authentication and is never serialized.

use std::fmt;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256};
use ethers::utils::to_checksum;
use tracing::debug;

use permitpool_core::constants::MAX_CHALLENGE_LEN;
use permitpool_core::error::{PermitPoolError, Result};
use permitpool_core::types::AuthParams;

use crate::eip712::{policy_typed_data, AuthDomain};
use crate::hash::request_digest;

/// Formats a signature as `0x`-prefixed 65-byte hex.
pub fn signature_hex(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.to_vec()))
}

fn checksum(address: Address) -> String {
    to_checksum(&address, None)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNT SIGNER
// ═══════════════════════════════════════════════════════════════════════════════

/// Long-lived account key (custody holder).
#[derive(Clone)]
pub struct AccountSigner {
    wallet: LocalWallet,
}

impl AccountSigner {
    /// Loads the account from a hex private key (with or without `0x`).
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| PermitPoolError::Config(format!("invalid account private key: {e}")))?;
        Ok(Self { wallet })
    }

    /// Account address.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Account address, EIP-55 checksummed.
    pub fn address_string(&self) -> String {
        checksum(self.address())
    }

    /// Underlying wallet, for transaction signing middleware.
    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// EIP-191 personal signature over a raw string.
    pub async fn sign_simple(&self, message: &str) -> Result<String> {
        let signature = self
            .wallet
            .sign_message(message)
            .await
            .map_err(|e| PermitPoolError::InvalidInput(format!("personal sign: {e}")))?;
        Ok(signature_hex(&signature))
    }

    /// EIP-191 personal signature over a 32-byte digest.
    pub async fn sign_digest(&self, digest: [u8; 32]) -> Result<Signature> {
        self.wallet
            .sign_message(digest)
            .await
            .map_err(|e| PermitPoolError::InvalidInput(format!("digest sign: {e}")))
    }

    /// Binds `params` and `domain` into a signer for the server's challenge.
    pub fn sign_structured<'a>(&'a self, params: &'a AuthParams, domain: AuthDomain) -> ChallengeSigner<'a> {
        ChallengeSigner {
            account: self,
            params,
            domain,
        }
    }
}

impl fmt::Debug for AccountSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSigner")
            .field("address", &self.address_string())
            .finish_non_exhaustive()
    }
}

/// Signs an auth challenge as EIP-712 `Policy` typed data.
pub struct ChallengeSigner<'a> {
    account: &'a AccountSigner,
    params: &'a AuthParams,
    domain: AuthDomain,
}

impl ChallengeSigner<'_> {
    /// Signs `challenge` together with the bound auth parameters.
    pub async fn sign(&self, challenge: &str) -> Result<String> {
        validate_challenge(challenge)?;

        let typed = policy_typed_data(
            self.params,
            &self.domain,
            &self.account.address_string(),
            challenge,
        )?;

        let signature = self
            .account
            .wallet
            .sign_typed_data(&typed)
            .await
            .map_err(|e| PermitPoolError::InvalidInput(format!("typed-data sign: {e}")))?;

        debug!(domain = %self.domain.name, "Signed auth challenge");
        Ok(signature_hex(&signature))
    }
}

fn validate_challenge(challenge: &str) -> Result<()> {
    if challenge.is_empty() {
        return Err(PermitPoolError::InvalidInput("empty challenge".into()));
    }
    if challenge.len() > MAX_CHALLENGE_LEN {
        return Err(PermitPoolError::InvalidInput(format!(
            "challenge longer than {MAX_CHALLENGE_LEN} bytes"
        )));
    }
    if challenge.chars().any(char::is_control) {
        return Err(PermitPoolError::InvalidInput("challenge contains control characters".into()));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION SIGNER
// ═══════════════════════════════════════════════════════════════════════════════

/// Short-lived session key. Lives for one run and is dropped on exit.
pub struct SessionSigner {
    wallet: LocalWallet,
}

impl SessionSigner {
    /// Generates a fresh random session key.
    pub fn generate() -> Self {
        Self {
            wallet: LocalWallet::new(&mut rand::thread_rng()),
        }
    }

    /// Session key address.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Session key address, EIP-55 checksummed.
    pub fn address_string(&self) -> String {
        checksum(self.address())
    }

    /// Signs a request payload: ECDSA over keccak256 of its compact JSON.
    pub fn sign_session_message(&self, payload: &serde_json::Value) -> Result<String> {
        if !payload.is_array() && !payload.is_object() {
            return Err(PermitPoolError::InvalidInput(format!(
                "session payload must be a JSON array or object, got {payload}"
            )));
        }

        let digest = request_digest(payload)?;
        let signature = self
            .wallet
            .sign_hash(H256::from(digest))
            .map_err(|e| PermitPoolError::InvalidInput(format!("session sign: {e}")))?;
        Ok(signature_hex(&signature))
    }
}

impl fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSigner")
            .field("address", &self.address_string())
            .finish_non_exhaustive()
    }
}
