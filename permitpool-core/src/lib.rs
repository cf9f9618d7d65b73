//! # PermitPool Core
//!
//! Core types, errors, and collaborator traits for the PermitPool state-channel
//! session client.
//!
//! - **Types**: auth parameters, channel states, ledger balances, transfers
//! - **Errors**: one taxonomy for the whole session, with exit codes
//! - **Constants**: Sepolia sandbox defaults
//! - **Traits**: the on-chain custody collaborator
//!
//! ## Example
//!
//! ```rust
//! use permitpool_core::types::parse_decimal;
//!
//! let amount = parse_decimal("amount", "1000000000").unwrap();
//! assert_eq!(amount.as_u64(), 1_000_000_000);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{PermitPoolError, Result};
pub use traits::CustodyClient;
pub use types::*;
