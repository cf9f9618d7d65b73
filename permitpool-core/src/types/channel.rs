//! Channel, state, and ledger types.
//!
//! Channel ids, signatures, and addresses stay opaque strings here; they are
//! turned into bytes only by the on-chain client. Amounts and versions are
//! converted on parse (see [`crate::types::amount`]).

use std::fmt;

use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PermitPoolError, Result};
use crate::types::amount::{parse_amount, parse_u64, serialize_decimal};

/// Transaction hash returned by the custody contract client.
pub type TxHash = H256;

/// Server-assigned channel identifier. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Wraps a non-empty identifier.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(PermitPoolError::Protocol("empty channel_id".into()));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as sent by the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature produced by the coordinating server over a channel state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerSignature(String);

impl ServerSignature {
    /// Wraps a server signature; empty strings are rejected.
    pub fn new(sig: impl Into<String>) -> Result<Self> {
        let sig = sig.into();
        if sig.is_empty() || sig == "0x" {
            return Err(PermitPoolError::Protocol("empty server_signature".into()));
        }
        Ok(Self(sig))
    }

    /// Returns the signature as sent by the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Purpose of a channel state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateIntent {
    /// Regular off-chain operation
    Operate,
    /// Channel creation
    Initialize,
    /// Custody resize
    Resize,
    /// Final state for close
    Finalize,
}

impl StateIntent {
    /// On-chain `uint8` encoding.
    pub fn as_u8(self) -> u8 {
        match self {
            StateIntent::Operate => 0,
            StateIntent::Initialize => 1,
            StateIntent::Resize => 2,
            StateIntent::Finalize => 3,
        }
    }

    /// Decodes the `uint8` encoding.
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(StateIntent::Operate),
            1 => Ok(StateIntent::Initialize),
            2 => Ok(StateIntent::Resize),
            3 => Ok(StateIntent::Finalize),
            other => Err(PermitPoolError::Protocol(format!("unknown state intent {other}"))),
        }
    }

    fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "operate" => Ok(StateIntent::Operate),
                "initialize" => Ok(StateIntent::Initialize),
                "resize" => Ok(StateIntent::Resize),
                "finalize" => Ok(StateIntent::Finalize),
                _ => {
                    let raw = parse_u64("state.intent", value)?;
                    let raw = u8::try_from(raw).map_err(|_| {
                        PermitPoolError::Protocol(format!("unknown state intent {raw}"))
                    })?;
                    Self::from_u8(raw)
                }
            },
            Value::Null => Ok(StateIntent::Operate),
            _ => {
                let raw = parse_u64("state.intent", value)?;
                let raw = u8::try_from(raw)
                    .map_err(|_| PermitPoolError::Protocol(format!("unknown state intent {raw}")))?;
                Self::from_u8(raw)
            }
        }
    }
}

/// Funds assigned to one destination within a state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Allocation {
    /// Destination address
    pub destination: String,
    /// Token address
    pub token: String,
    /// Amount in smallest units
    #[serde(serialize_with = "serialize_decimal")]
    pub amount: U256,
}

impl Allocation {
    fn from_json(index: usize, value: &Value) -> Result<Self> {
        let field = |name: &str| -> Result<String> {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| {
                    PermitPoolError::Protocol(format!("allocations[{index}] missing '{name}'"))
                })
        };

        let amount = value.get("amount").ok_or_else(|| {
            PermitPoolError::Protocol(format!("allocations[{index}] missing 'amount'"))
        })?;

        Ok(Self {
            destination: field("destination")?,
            token: field("token")?,
            amount: parse_amount(&format!("allocations[{index}].amount"), amount)?,
        })
    }
}

/// A versioned channel state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    /// State purpose
    pub intent: StateIntent,
    /// Monotonic version
    pub version: u64,
    /// Opaque application data, hex
    pub data: String,
    /// Fund allocations
    pub allocations: Vec<Allocation>,
}

impl ChannelState {
    /// Parses a server `state` object. Accepts `state_data` or `data`.
    pub fn from_json(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PermitPoolError::Protocol("state is not an object".into()));
        }

        let version = value
            .get("version")
            .ok_or_else(|| PermitPoolError::Protocol("state missing 'version'".into()))?;

        let data = value
            .get("state_data")
            .or_else(|| value.get("data"))
            .and_then(Value::as_str)
            .unwrap_or("0x")
            .to_owned();

        let allocations = match value.get("allocations") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| Allocation::from_json(i, v))
                .collect::<Result<Vec<_>>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(PermitPoolError::Protocol("state.allocations is not a list".into()))
            }
        };

        Ok(Self {
            intent: StateIntent::from_json(value.get("intent").unwrap_or(&Value::Null))?,
            version: parse_u64("state.version", version)?,
            data,
            allocations,
        })
    }
}

/// On-chain channel definition returned with `create_channel`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelDescriptor {
    /// Participant addresses (account first, then the server)
    pub participants: Vec<String>,
    /// Adjudicator contract
    pub adjudicator: String,
    /// Challenge period, seconds
    pub challenge: u64,
    /// Channel nonce
    pub nonce: u64,
}

impl ChannelDescriptor {
    /// Parses a server `channel` object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let participants = value
            .get("participants")
            .and_then(Value::as_array)
            .ok_or_else(|| PermitPoolError::Protocol("channel missing 'participants'".into()))?
            .iter()
            .map(|p| {
                p.as_str().map(str::to_owned).ok_or_else(|| {
                    PermitPoolError::Protocol("channel participant is not a string".into())
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let adjudicator = value
            .get("adjudicator")
            .and_then(Value::as_str)
            .ok_or_else(|| PermitPoolError::Protocol("channel missing 'adjudicator'".into()))?
            .to_owned();

        let challenge = value.get("challenge").cloned().unwrap_or(Value::from(0u64));
        let nonce = value
            .get("nonce")
            .ok_or_else(|| PermitPoolError::Protocol("channel missing 'nonce'".into()))?;

        Ok(Self {
            participants,
            adjudicator,
            challenge: parse_u64("channel.challenge", &challenge)?,
            nonce: parse_u64("channel.nonce", nonce)?,
        })
    }
}

/// A channel state counter-signed by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedState {
    /// Channel the state belongs to
    pub channel_id: ChannelId,
    /// The agreed state
    pub state: ChannelState,
    /// Server signature over the state
    pub server_signature: ServerSignature,
}

/// Off-chain ledger balance entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerBalance {
    /// Asset identifier
    pub asset: String,
    /// Available amount
    #[serde(serialize_with = "serialize_decimal")]
    pub amount: U256,
}

impl LedgerBalance {
    /// Parses one `{asset, amount}` entry.
    pub fn from_json(value: &Value) -> Result<Self> {
        let asset = value
            .get("asset")
            .and_then(Value::as_str)
            .ok_or_else(|| PermitPoolError::Protocol("balance entry missing 'asset'".into()))?
            .to_owned();
        let amount = value.get("amount").cloned().unwrap_or(Value::from(0u64));

        Ok(Self {
            amount: parse_amount(&format!("balance[{asset}]"), &amount)?,
            asset,
        })
    }
}

/// One leg of an off-chain transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAllocation {
    /// Asset identifier
    pub asset: String,
    /// Amount, decimal string
    pub amount: String,
}

/// Off-chain transfer within the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Destination address
    pub destination: String,
    /// Assets to move
    pub allocations: Vec<TransferAllocation>,
}

/// Confirmation of an on-chain transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    /// Confirmed transaction
    pub tx_hash: TxHash,
    /// Block the transaction landed in
    pub block_number: Option<u64>,
    /// False when the transaction reverted
    pub success: bool,
}
