//! # PermitPool Yellow Network Client
//!
//! A session client for the Yellow clearnet: authenticates a fresh session
//! key against the account, then walks one state channel through its whole
//! life, settling every server-signed state on the Nitrolite custody contract.
//!
//! ## Flow
//!
//! 1. `auth_request` → `auth_challenge` → `auth_verify` (EIP-712 signed by the account)
//! 2. Check the ledger balance of the funding asset
//! 3. `create_channel`, then `Custody.create` on-chain
//! 4. `resize_channel`, then `Custody.resize` on-chain
//! 5. Off-chain `transfer`
//! 6. `close_channel`, then `Custody.close` on-chain
//!
//! Each on-chain leg is confirmed before the next request is sent.
//!
//! ## Example
//!
//! ```rust,ignore
//! use permitpool_yellow::{run_live, FlowConfig, SessionMode, YellowConfig};
//!
//! let network = YellowConfig::from_env()?;
//! let flow = FlowConfig::from_env()?;
//! let account = AccountSigner::from_private_key(&account_key_from_env()?)?;
//!
//! let report = run_live(&network, &flow, account, SessionMode::FullFlow).await?;
//! println!("closed {:?} at version {:?}", report.channel_id, report.final_version);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod auth;
pub mod codec;
pub mod config;
pub mod custody;
pub mod lifecycle;
pub mod session;
pub mod transport;

pub use auth::{AuthHandshake, AuthState, AuthStep};
pub use codec::{decode, Codec, Inbound, Method, Outbound, Request, RpcRequest, Signing, WireShape};
pub use config::{account_key_from_env, FlowConfig, YellowConfig};
pub use custody::NitroliteCustody;
pub use lifecycle::{ChannelLifecycle, FlowPlan, LifecycleStep, OpenChannel, Phase, Submission, SubmissionKind};
pub use session::{run_live, Session, SessionContext, SessionMode, SessionOptions, SessionReport};
pub use transport::{memory, Transport, TransportEvent, WebSocketTransport};
