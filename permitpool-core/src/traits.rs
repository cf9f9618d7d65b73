//! Collaborator traits.
//!
//! The session core talks to the chain only through [`CustodyClient`], so the
//! protocol can be driven against a recording mock in tests and against the
//! Nitrolite custody contract in production.

use async_trait::async_trait;

use crate::error::{PermitPoolError, Result};
use crate::types::{
    ChannelDescriptor, ChannelId, ChannelState, Receipt, ServerSignature, SignedState, TxHash,
};

// ═══════════════════════════════════════════════════════════════════════════════
// CUSTODY CONTRACT
// ═══════════════════════════════════════════════════════════════════════════════

/// Interface to the on-chain custody contract.
///
/// Submissions return as soon as the transaction is accepted by the node;
/// callers must await [`CustodyClient::wait_for_receipt`] before treating the
/// state as settled.
#[async_trait]
pub trait CustodyClient: Send + Sync {
    /// Checks that `channel_id` is the id the contract derives for `channel`.
    fn verify_channel_id(&self, channel_id: &ChannelId, channel: &ChannelDescriptor) -> Result<()>;

    /// Opens the channel on-chain with the server-signed initial state.
    async fn create_channel(
        &self,
        channel: &ChannelDescriptor,
        unsigned_initial_state: &ChannelState,
        server_signature: &ServerSignature,
    ) -> Result<TxHash>;

    /// Submits a server-signed resize state.
    async fn resize_channel(&self, resize_state: &SignedState, proof_states: &[SignedState]) -> Result<TxHash>;

    /// Submits the server-signed final state.
    async fn close_channel(&self, final_state: &SignedState, state_data: &str) -> Result<TxHash>;

    /// Waits until the transaction is mined.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Receipt>;
}

/// `None` stands for a session that never reaches the chain (auth-only runs).
#[async_trait]
impl<C: CustodyClient> CustodyClient for Option<C> {
    fn verify_channel_id(&self, channel_id: &ChannelId, channel: &ChannelDescriptor) -> Result<()> {
        configured(self)?.verify_channel_id(channel_id, channel)
    }

    async fn create_channel(
        &self,
        channel: &ChannelDescriptor,
        unsigned_initial_state: &ChannelState,
        server_signature: &ServerSignature,
    ) -> Result<TxHash> {
        configured(self)?
            .create_channel(channel, unsigned_initial_state, server_signature)
            .await
    }

    async fn resize_channel(&self, resize_state: &SignedState, proof_states: &[SignedState]) -> Result<TxHash> {
        configured(self)?.resize_channel(resize_state, proof_states).await
    }

    async fn close_channel(&self, final_state: &SignedState, state_data: &str) -> Result<TxHash> {
        configured(self)?.close_channel(final_state, state_data).await
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Receipt> {
        configured(self)?.wait_for_receipt(tx_hash).await
    }
}

fn configured<C>(custody: &Option<C>) -> Result<&C> {
    custody
        .as_ref()
        .ok_or_else(|| PermitPoolError::Config("no custody client configured".into()))
}
