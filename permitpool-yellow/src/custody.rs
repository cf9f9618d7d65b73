//! Nitrolite custody contract client.
//!
//! Server-signed states are countersigned by the account and submitted to
//! the custody contract:
//!
//! ```text
//! create(Channel, State)
//! resize(bytes32 channelId, State candidate, State[] proofs)
//! close(bytes32 channelId, State candidate, State[] proofs)
//!
//! Channel = (address[] participants, address adjudicator, uint64 challenge, uint64 nonce)
//! State   = (uint8 intent, uint256 version, bytes data, Allocation[] allocations, bytes[] sigs)
//! ```
//!
//! The account signs `keccak256(abi.encode(channelId, intent, version, data,
//! allocations))` with an EIP-191 prefix. `sigs` is `[account, server]`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionRequest, U256};
use tracing::{info, instrument};

use permitpool_core::error::{PermitPoolError, Result};
use permitpool_core::traits::CustodyClient;
use permitpool_core::types::{
    Allocation, ChannelDescriptor, ChannelId, ChannelState, Receipt, ServerSignature, SignedState,
    TxHash,
};
use permitpool_crypto::{keccak256, AccountSigner};

use crate::config::YellowConfig;

const CREATE_SIGNATURE: &str =
    "create((address[],address,uint64,uint64),(uint8,uint256,bytes,(address,address,uint256)[],bytes[]))";
const RESIZE_SIGNATURE: &str = "resize(bytes32,(uint8,uint256,bytes,(address,address,uint256)[],bytes[]),(uint8,uint256,bytes,(address,address,uint256)[],bytes[])[])";
const CLOSE_SIGNATURE: &str = "close(bytes32,(uint8,uint256,bytes,(address,address,uint256)[],bytes[]),(uint8,uint256,bytes,(address,address,uint256)[],bytes[])[])";

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Custody contract client over JSON-RPC.
pub struct NitroliteCustody {
    client: Arc<SignerClient>,
    account: AccountSigner,
    custody: Address,
    chain_id: u64,
    poll_interval: Duration,
}

impl NitroliteCustody {
    /// Connects to the RPC endpoint in `config`.
    pub fn new(config: &YellowConfig, account: AccountSigner) -> Result<Self> {
        let poll_interval = Duration::from_secs(2);
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| PermitPoolError::Config(format!("ETH_RPC_URL: {e}")))?
            .interval(poll_interval);
        let wallet = account.wallet().clone().with_chain_id(config.chain_id);

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            custody: parse_address("custody", &config.custody_address)?,
            chain_id: config.chain_id,
            account,
            poll_interval,
        })
    }

    /// Custody contract address.
    pub fn custody_address(&self) -> Address {
        self.custody
    }

    async fn sign_state(&self, channel_id: [u8; 32], state: &ChannelState, data: &str) -> Result<Vec<u8>> {
        let digest = packed_state(channel_id, state, data)?;
        Ok(self.account.sign_digest(digest).await?.to_vec())
    }

    async fn state_with_sigs(
        &self,
        channel_id: [u8; 32],
        state: &ChannelState,
        data: &str,
        server_signature: &ServerSignature,
    ) -> Result<Token> {
        let user_sig = self.sign_state(channel_id, state, data).await?;
        let server_sig = hex_bytes("server_signature", server_signature.as_str())?;
        state_token(state, data, vec![user_sig, server_sig])
    }

    #[instrument(skip(self, calldata), fields(custody = ?self.custody))]
    async fn submit(&self, operation: &str, calldata: Vec<u8>) -> Result<TxHash> {
        let tx = TransactionRequest::new().to(self.custody).data(calldata);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| PermitPoolError::on_chain(operation, e))?;

        let tx_hash = pending.tx_hash();
        info!(?tx_hash, "Custody transaction sent");
        Ok(tx_hash)
    }
}

#[async_trait]
impl CustodyClient for NitroliteCustody {
    fn verify_channel_id(&self, server_id: &ChannelId, channel: &ChannelDescriptor) -> Result<()> {
        let derived = channel_id(channel, self.chain_id)?;
        if bytes32("channel_id", server_id.as_str())? != derived {
            return Err(PermitPoolError::Protocol(format!(
                "server channel id {server_id} does not match 0x{} derived from the channel definition",
                hex::encode(derived)
            )));
        }
        Ok(())
    }

    async fn create_channel(
        &self,
        channel: &ChannelDescriptor,
        unsigned_initial_state: &ChannelState,
        server_signature: &ServerSignature,
    ) -> Result<TxHash> {
        let channel_id = channel_id(channel, self.chain_id)?;
        let state = self
            .state_with_sigs(
                channel_id,
                unsigned_initial_state,
                &unsigned_initial_state.data,
                server_signature,
            )
            .await?;

        let calldata = encode_call(CREATE_SIGNATURE, &[channel_token(channel)?, state]);
        self.submit("create", calldata).await
    }

    async fn resize_channel(&self, resize_state: &SignedState, proof_states: &[SignedState]) -> Result<TxHash> {
        let channel_id = bytes32("channel_id", resize_state.channel_id.as_str())?;
        let candidate = self
            .state_with_sigs(
                channel_id,
                &resize_state.state,
                &resize_state.state.data,
                &resize_state.server_signature,
            )
            .await?;

        let mut proofs = Vec::with_capacity(proof_states.len());
        for proof in proof_states {
            proofs.push(
                self.state_with_sigs(channel_id, &proof.state, &proof.state.data, &proof.server_signature)
                    .await?,
            );
        }

        let calldata = encode_call(
            RESIZE_SIGNATURE,
            &[Token::FixedBytes(channel_id.to_vec()), candidate, Token::Array(proofs)],
        );
        self.submit("resize", calldata).await
    }

    async fn close_channel(&self, final_state: &SignedState, state_data: &str) -> Result<TxHash> {
        let channel_id = bytes32("channel_id", final_state.channel_id.as_str())?;
        let candidate = self
            .state_with_sigs(channel_id, &final_state.state, state_data, &final_state.server_signature)
            .await?;

        let calldata = encode_call(
            CLOSE_SIGNATURE,
            &[Token::FixedBytes(channel_id.to_vec()), candidate, Token::Array(vec![])],
        );
        self.submit("close", calldata).await
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Receipt> {
        let receipt = PendingTransaction::new(tx_hash, self.client.provider())
            .interval(self.poll_interval)
            .await
            .map_err(|e| PermitPoolError::on_chain("confirmation", e))?
            .ok_or_else(|| PermitPoolError::on_chain("confirmation", "transaction dropped"))?;

        Ok(Receipt {
            tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            success: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(true),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ABI ENCODING
// ═══════════════════════════════════════════════════════════════════════════════

/// Function selector followed by the ABI-encoded arguments.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = ethers::utils::id(signature).to_vec();
    data.extend(abi::encode(args));
    data
}

/// On-chain channel id: `keccak256(abi.encode(participants, adjudicator, challenge, nonce, chainId))`.
pub fn channel_id(channel: &ChannelDescriptor, chain_id: u64) -> Result<[u8; 32]> {
    let Token::Tuple(mut fields) = channel_token(channel)? else {
        return Err(PermitPoolError::Internal("channel token is not a tuple".into()));
    };
    fields.push(Token::Uint(U256::from(chain_id)));
    Ok(keccak256(&abi::encode(&fields)))
}

/// Digest the account signs for `state`, with `data` as the state data.
pub fn packed_state(channel_id: [u8; 32], state: &ChannelState, data: &str) -> Result<[u8; 32]> {
    let encoded = abi::encode(&[
        Token::FixedBytes(channel_id.to_vec()),
        Token::Uint(U256::from(state.intent.as_u8())),
        Token::Uint(U256::from(state.version)),
        Token::Bytes(hex_bytes("state_data", data)?),
        allocations_token(&state.allocations)?,
    ]);
    Ok(keccak256(&encoded))
}

fn channel_token(channel: &ChannelDescriptor) -> Result<Token> {
    let participants = channel
        .participants
        .iter()
        .map(|p| parse_address("participant", p).map(Token::Address))
        .collect::<Result<Vec<_>>>()?;

    Ok(Token::Tuple(vec![
        Token::Array(participants),
        Token::Address(parse_address("adjudicator", &channel.adjudicator)?),
        Token::Uint(U256::from(channel.challenge)),
        Token::Uint(U256::from(channel.nonce)),
    ]))
}

fn allocations_token(allocations: &[Allocation]) -> Result<Token> {
    let items = allocations
        .iter()
        .map(|a| {
            Ok(Token::Tuple(vec![
                Token::Address(parse_address("allocation destination", &a.destination)?),
                Token::Address(parse_address("allocation token", &a.token)?),
                Token::Uint(a.amount),
            ]))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Token::Array(items))
}

fn state_token(state: &ChannelState, data: &str, sigs: Vec<Vec<u8>>) -> Result<Token> {
    Ok(Token::Tuple(vec![
        Token::Uint(U256::from(state.intent.as_u8())),
        Token::Uint(U256::from(state.version)),
        Token::Bytes(hex_bytes("state_data", data)?),
        allocations_token(&state.allocations)?,
        Token::Array(sigs.into_iter().map(Token::Bytes).collect()),
    ]))
}

fn parse_address(field: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw)
        .map_err(|e| PermitPoolError::Conversion(format!("{field} '{raw}' is not an address: {e}")))
}

fn hex_bytes(field: &str, raw: &str) -> Result<Vec<u8>> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| PermitPoolError::Conversion(format!("{field} '{raw}' is not hex: {e}")))
}

fn bytes32(field: &str, raw: &str) -> Result<[u8; 32]> {
    let bytes = hex_bytes(field, raw)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| PermitPoolError::Conversion(format!("{field} is {} bytes, expected 32", b.len())))
}
