//! Nitrolite RPC wire codec.
//!
//! Outbound requests are framed as
//!
//! ```text
//! {"req": [request_id, method, params, timestamp], "sig": [signature, ...]}
//! ```
//!
//! Inbound frames come in two shapes: the nested `{"res": [id, method,
//! payload, timestamp]}` envelope, and a flat `{"type": method, ...fields}`
//! object used by some server builds. Both decode to the same [`Inbound`].

use std::fmt;

use ethers::types::U256;
use serde_json::{json, Map, Value};

use permitpool_core::error::{PermitPoolError, Result};
use permitpool_core::types::amount::to_json_integer;
use permitpool_core::types::{AuthParams, ChannelId, Transfer};

// ═══════════════════════════════════════════════════════════════════════════════
// METHODS
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol method, with server aliases folded into one variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    /// `auth_request`
    AuthRequest,
    /// `auth_challenge`
    AuthChallenge,
    /// `auth_verify` (alias `auth_success`)
    AuthVerify,
    /// `auth_error` / `auth_failure`
    AuthError,
    /// `get_ledger_balances` (alias `get_balances`)
    GetLedgerBalances,
    /// `create_channel` (alias `channel_opened`)
    CreateChannel,
    /// `resize_channel` (aliases `allocated`, `allocate_success`)
    ResizeChannel,
    /// `transfer` (aliases `transfer_complete`, `transfer_success`)
    Transfer,
    /// `close_channel` (alias `channel_closed`)
    CloseChannel,
    /// Generic `error`
    Error,
    /// Anything else (pushes such as `assets`, `bu`, ...)
    Other(String),
}

impl Method {
    /// Canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Method::AuthRequest => "auth_request",
            Method::AuthChallenge => "auth_challenge",
            Method::AuthVerify => "auth_verify",
            Method::AuthError => "auth_error",
            Method::GetLedgerBalances => "get_ledger_balances",
            Method::CreateChannel => "create_channel",
            Method::ResizeChannel => "resize_channel",
            Method::Transfer => "transfer",
            Method::CloseChannel => "close_channel",
            Method::Error => "error",
            Method::Other(name) => name,
        }
    }

    /// Maps a wire name, including aliases.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "auth_request" => Method::AuthRequest,
            "auth_challenge" => Method::AuthChallenge,
            "auth_verify" | "auth_success" => Method::AuthVerify,
            "auth_error" | "auth_failure" => Method::AuthError,
            "get_ledger_balances" | "get_balances" => Method::GetLedgerBalances,
            "create_channel" | "channel_opened" => Method::CreateChannel,
            "resize_channel" | "allocated" | "allocate_success" => Method::ResizeChannel,
            "transfer" | "transfer_complete" | "transfer_success" => Method::Transfer,
            "close_channel" | "channel_closed" => Method::CloseChannel,
            "error" => Method::Error,
            other => Method::Other(other.to_owned()),
        }
    }

    /// True for error replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Method::Error | Method::AuthError)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTBOUND
// ═══════════════════════════════════════════════════════════════════════════════

/// A protocol request with typed parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Opens the handshake; carries the parameters later bound by the signature.
    AuthRequest {
        /// Account address
        address: String,
        /// Session parameters
        params: AuthParams,
    },
    /// Answers the challenge.
    AuthVerify {
        /// Challenge string echoed back
        challenge: String,
    },
    /// Queries the account's off-chain balances.
    GetLedgerBalances {
        /// Account address
        participant: String,
    },
    /// Asks the server to prepare a channel.
    CreateChannel {
        /// Target chain
        chain_id: u64,
        /// Token backing the channel
        token: String,
    },
    /// Moves ledger funds into the channel.
    ResizeChannel {
        /// Channel to resize
        channel_id: ChannelId,
        /// Amount to allocate
        allocate_amount: U256,
        /// Account receiving the allocation
        funds_destination: String,
    },
    /// Off-chain transfer.
    Transfer(Transfer),
    /// Asks the server for a final state.
    CloseChannel {
        /// Channel to close
        channel_id: ChannelId,
        /// Account receiving the remaining funds
        funds_destination: String,
    },
}

impl Request {
    /// Method this request is sent as.
    pub fn method(&self) -> Method {
        match self {
            Request::AuthRequest { .. } => Method::AuthRequest,
            Request::AuthVerify { .. } => Method::AuthVerify,
            Request::GetLedgerBalances { .. } => Method::GetLedgerBalances,
            Request::CreateChannel { .. } => Method::CreateChannel,
            Request::ResizeChannel { .. } => Method::ResizeChannel,
            Request::Transfer(_) => Method::Transfer,
            Request::CloseChannel { .. } => Method::CloseChannel,
        }
    }

    /// Request parameters as sent on the wire.
    pub fn params(&self) -> Value {
        match self {
            Request::AuthRequest { address, params } => json!({
                "address": address,
                "session_key": params.session_key(),
                "application": params.application(),
                "allowances": params.allowances(),
                "expires_at": params.expires_at(),
                "scope": params.scope(),
            }),
            Request::AuthVerify { challenge } => json!({ "challenge": challenge }),
            Request::GetLedgerBalances { participant } => json!({ "participant": participant }),
            Request::CreateChannel { chain_id, token } => json!({
                "chain_id": chain_id,
                "token": token,
            }),
            Request::ResizeChannel {
                channel_id,
                allocate_amount,
                funds_destination,
            } => json!({
                "channel_id": channel_id,
                "allocate_amount": to_json_integer(*allocate_amount),
                "funds_destination": funds_destination,
            }),
            Request::Transfer(transfer) => json!({
                "destination": transfer.destination,
                "allocations": transfer.allocations,
            }),
            Request::CloseChannel {
                channel_id,
                funds_destination,
            } => json!({
                "channel_id": channel_id,
                "funds_destination": funds_destination,
            }),
        }
    }
}

/// How an outbound request is signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signing {
    /// No signature (`auth_request`)
    Unsigned,
    /// Signature computed by the caller (`auth_verify`)
    Detached(String),
    /// Signed by the session key over the request payload
    SessionKey,
}

/// A request paired with its signing rule.
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    /// The request
    pub request: Request,
    /// Signing rule
    pub signing: Signing,
}

impl Outbound {
    /// Unsigned request.
    pub fn unsigned(request: Request) -> Self {
        Self { request, signing: Signing::Unsigned }
    }

    /// Request carrying a precomputed signature.
    pub fn detached(request: Request, signature: String) -> Self {
        Self { request, signing: Signing::Detached(signature) }
    }

    /// Request signed by the session key.
    pub fn session(request: Request) -> Self {
        Self { request, signing: Signing::SessionKey }
    }
}

/// A request with its id and timestamp assigned.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcRequest {
    /// Request id, unique per connection
    pub id: u64,
    /// Method
    pub method: Method,
    /// Parameters
    pub params: Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl RpcRequest {
    /// The `[id, method, params, timestamp]` array that signatures cover.
    pub fn payload(&self) -> Value {
        json!([self.id, self.method.as_str(), self.params, self.timestamp])
    }

    /// Serializes the full frame.
    pub fn to_wire(&self, signatures: &[String]) -> Result<String> {
        let frame = json!({ "req": self.payload(), "sig": signatures });
        Ok(serde_json::to_string(&frame)?)
    }
}

/// Assigns request ids. One codec per connection.
#[derive(Debug)]
pub struct Codec {
    next_id: u64,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Creates a codec; ids start at 1.
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Stamps `request` with the next id and the current time.
    pub fn request(&mut self, request: &Request) -> RpcRequest {
        let id = self.next_id;
        self.next_id += 1;

        RpcRequest {
            id,
            method: request.method(),
            params: request.params(),
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INBOUND
// ═══════════════════════════════════════════════════════════════════════════════

/// Envelope a frame arrived in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireShape {
    /// `{"res": [id, method, payload, ts]}`
    Nested,
    /// `{"type": method, ...}` or a bare `{"error": ...}`
    Flat,
}

/// A decoded server frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    /// Id of the request this answers, if the envelope carries one
    pub request_id: Option<u64>,
    /// Method, aliases folded
    pub method: Method,
    /// Payload (`res[2]`, or the flat object minus `type`)
    pub payload: Value,
    /// Server timestamp
    pub timestamp: Option<u64>,
    /// Envelope shape
    pub shape: WireShape,
}

impl Inbound {
    /// String field of the payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Human-readable error text of an error frame.
    pub fn error_message(&self) -> String {
        let error = self.payload.get("error");
        error
            .and_then(Value::as_str)
            .or_else(|| error.and_then(|e| e.get("message")).and_then(Value::as_str))
            .or_else(|| self.str_field("message"))
            .map(str::to_owned)
            .unwrap_or_else(|| self.payload.to_string())
    }
}

/// Decodes one text frame.
pub fn decode(raw: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| PermitPoolError::Parse(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| PermitPoolError::Parse("frame is not a JSON object".into()))?;

    if let Some(res) = obj.get("res") {
        return decode_nested(res);
    }

    if let Some(kind) = obj.get("type").and_then(Value::as_str) {
        let mut payload: Map<String, Value> = obj.clone();
        payload.remove("type");
        return Ok(Inbound {
            request_id: None,
            method: Method::from_wire(kind),
            payload: Value::Object(payload),
            timestamp: None,
            shape: WireShape::Flat,
        });
    }

    if let Some(error) = obj.get("error") {
        return Ok(Inbound {
            request_id: None,
            method: Method::Error,
            payload: json!({ "error": error }),
            timestamp: None,
            shape: WireShape::Flat,
        });
    }

    Err(PermitPoolError::Parse("frame has neither 'res' nor 'type'".into()))
}

fn decode_nested(res: &Value) -> Result<Inbound> {
    let items = res
        .as_array()
        .ok_or_else(|| PermitPoolError::Parse("'res' is not an array".into()))?;
    let method = items
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| PermitPoolError::Parse("'res' has no method name".into()))?;

    Ok(Inbound {
        request_id: items.first().and_then(Value::as_u64),
        method: Method::from_wire(method),
        payload: items.get(2).cloned().unwrap_or(Value::Null),
        timestamp: items.get(3).and_then(Value::as_u64),
        shape: WireShape::Nested,
    })
}
