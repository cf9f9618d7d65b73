//! # PermitPool Cryptography
//!
//! Identity signing for the Yellow session client.
//!
//! This crate provides:
//!
//! - **Signer**: the long-lived [`AccountSigner`] and the per-run [`SessionSigner`]
//! - **EIP-712**: the auth `Policy` typed data and signer recovery
//! - **Hash**: Keccak256, EIP-191 message hashes, request digests
//!
//! ## Example
//!
//! ```rust,ignore
//! use permitpool_crypto::{AccountSigner, AuthDomain, SessionSigner};
//!
//! let account = AccountSigner::from_private_key(&key)?;
//! let session = SessionSigner::generate();
//!
//! // Account key signs the server challenge over the announced parameters
//! let signature = account
//!     .sign_structured(&params, AuthDomain::for_params(&params))
//!     .sign(&challenge)
//!     .await?;
//!
//! // Session key signs every request afterwards
//! let sig = session.sign_session_message(&payload)?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod eip712;
pub mod hash;
pub mod signer;

// Re-export main types at crate root
pub use eip712::{policy_digest, policy_typed_data, recover_policy_signer, AuthDomain};
pub use hash::{keccak256, personal_message_hash, request_digest};
pub use signer::{signature_hex, AccountSigner, ChallengeSigner, SessionSigner};
