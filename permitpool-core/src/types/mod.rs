//! Domain types for the PermitPool session client.

pub mod amount;
mod auth;
mod channel;

pub use amount::{parse_amount, parse_decimal, parse_u64};
pub use auth::{is_hex_address, Allowance, AuthParams, AuthSession};
pub use channel::{
    Allocation, ChannelDescriptor, ChannelId, ChannelState, LedgerBalance, Receipt,
    ServerSignature, SignedState, StateIntent, Transfer, TransferAllocation, TxHash,
};
