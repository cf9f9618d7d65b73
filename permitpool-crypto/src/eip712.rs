//! EIP-712 `Policy` typed data for the auth challenge.
//!
//! The account key signs the challenge together with every field of the
//! [`AuthParams`] the client announced in `auth_request`:
//!
//! ```text
//! Policy(string challenge,string scope,address wallet,address session_key,
//!        uint64 expires_at,Allowance[] allowances)
//! Allowance(string asset,string amount)
//! ```
//!
//! The server rebuilds this structure from the parameters it received, so any
//! drift between the two uses invalidates the signature.

use std::str::FromStr;

use ethers::types::transaction::eip712::{Eip712, TypedData};
use ethers::types::{Address, Signature, H256};
use serde_json::json;

use permitpool_core::constants::AUTH_PRIMARY_TYPE;
use permitpool_core::error::{PermitPoolError, Result};
use permitpool_core::types::AuthParams;

/// EIP-712 domain used for the auth policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthDomain {
    /// Domain name; the application name announced in `auth_request`
    pub name: String,
}

impl AuthDomain {
    /// Creates a domain with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Domain matching the application of `params`.
    pub fn for_params(params: &AuthParams) -> Self {
        Self::new(params.application())
    }
}

/// Builds the typed-data structure signed for `challenge`.
pub fn policy_typed_data(
    params: &AuthParams,
    domain: &AuthDomain,
    wallet: &str,
    challenge: &str,
) -> Result<TypedData> {
    let value = json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" }
            ],
            "Policy": [
                { "name": "challenge", "type": "string" },
                { "name": "scope", "type": "string" },
                { "name": "wallet", "type": "address" },
                { "name": "session_key", "type": "address" },
                { "name": "expires_at", "type": "uint64" },
                { "name": "allowances", "type": "Allowance[]" }
            ],
            "Allowance": [
                { "name": "asset", "type": "string" },
                { "name": "amount", "type": "string" }
            ]
        },
        "primaryType": AUTH_PRIMARY_TYPE,
        "domain": { "name": domain.name },
        "message": {
            "challenge": challenge,
            "scope": params.scope(),
            "wallet": wallet,
            "session_key": params.session_key(),
            "expires_at": params.expires_at(),
            "allowances": params.allowances(),
        }
    });

    serde_json::from_value(value)
        .map_err(|e| PermitPoolError::InvalidInput(format!("policy typed data: {e}")))
}

/// EIP-712 digest of the policy for `challenge`.
pub fn policy_digest(
    params: &AuthParams,
    domain: &AuthDomain,
    wallet: &str,
    challenge: &str,
) -> Result<[u8; 32]> {
    policy_typed_data(params, domain, wallet, challenge)?
        .encode_eip712()
        .map_err(|e| PermitPoolError::InvalidInput(format!("policy encoding: {e}")))
}

/// Recovers the address that signed the policy for `challenge`.
///
/// Verifiers rebuild the policy from the parameters they received; a
/// signature made over different parameters recovers to a different address.
pub fn recover_policy_signer(
    params: &AuthParams,
    domain: &AuthDomain,
    wallet: &str,
    challenge: &str,
    signature: &str,
) -> Result<Address> {
    let digest = policy_digest(params, domain, wallet, challenge)?;
    let signature = Signature::from_str(signature)
        .map_err(|e| PermitPoolError::InvalidInput(format!("signature: {e}")))?;

    signature
        .recover(H256::from(digest))
        .map_err(|e| PermitPoolError::InvalidInput(format!("signature recovery: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use permitpool_core::types::Allowance;

    const WALLET: &str = "0x2222222222222222222222222222222222222222";
    const SESSION: &str = "0x1111111111111111111111111111111111111111";

    fn params() -> AuthParams {
        AuthParams::new(
            SESSION,
            vec![Allowance::new("ytest.usd", "1000000000")],
            1_700_000_000,
            "permitpool.app",
            "PermitPool",
        )
        .unwrap()
    }

    #[test]
    fn test_policy_digest_deterministic() {
        let p = params();
        let d = AuthDomain::for_params(&p);
        let a = policy_digest(&p, &d, WALLET, "chal-123").unwrap();
        let b = policy_digest(&p, &d, WALLET, "chal-123").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_policy_digest_binds_challenge_and_domain() {
        let p = params();
        let d = AuthDomain::for_params(&p);
        let base = policy_digest(&p, &d, WALLET, "chal-123").unwrap();

        assert_ne!(base, policy_digest(&p, &d, WALLET, "chal-124").unwrap());
        assert_ne!(base, policy_digest(&p, &AuthDomain::new("Other"), WALLET, "chal-123").unwrap());
    }

    #[test]
    fn test_bad_wallet_address_is_invalid_input() {
        let p = params();
        let d = AuthDomain::for_params(&p);
        let err = policy_digest(&p, &d, "not-an-address", "chal").unwrap_err();
        assert!(matches!(err, PermitPoolError::InvalidInput(_)));
    }
}
