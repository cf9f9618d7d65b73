//! Numeric conversion at the server boundary.
//!
//! The server sends amounts and versions as decimal strings or JSON integers.
//! Every such field is converted here, once, to `U256` (amounts) or `u64`
//! (versions, nonces, challenge periods). Fractions, signs, and values that do
//! not fit are rejected instead of being rounded.

use ethers::types::U256;
use serde::Serializer;
use serde_json::Value;

use crate::error::{PermitPoolError, Result};

/// Parses a decimal string into a `U256`.
pub fn parse_decimal(field: &str, raw: &str) -> Result<U256> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PermitPoolError::Conversion(format!(
            "{field}: '{raw}' is not an unsigned decimal integer"
        )));
    }

    U256::from_dec_str(raw)
        .map_err(|e| PermitPoolError::Conversion(format!("{field}: '{raw}': {e:?}")))
}

/// Converts a JSON string or integer into a `U256` amount.
pub fn parse_amount(field: &str, value: &Value) -> Result<U256> {
    match value {
        Value::String(s) => parse_decimal(field, s),
        Value::Number(n) => n.as_u64().map(U256::from).ok_or_else(|| {
            PermitPoolError::Conversion(format!("{field}: {n} is not an unsigned integer"))
        }),
        other => Err(PermitPoolError::Conversion(format!(
            "{field}: expected string or integer, got {other}"
        ))),
    }
}

/// Converts a JSON string or integer into a `u64` (versions, nonces).
pub fn parse_u64(field: &str, value: &Value) -> Result<u64> {
    let wide = parse_amount(field, value)?;
    if wide > U256::from(u64::MAX) {
        return Err(PermitPoolError::Conversion(format!(
            "{field}: {wide} does not fit in 64 bits"
        )));
    }
    Ok(wide.as_u64())
}

/// Serde helper writing a `U256` as a decimal string.
pub fn serialize_decimal<S: Serializer>(value: &U256, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Writes a `U256` as a JSON integer when it fits in 64 bits, else as a decimal string.
pub fn to_json_integer(value: U256) -> Value {
    if value <= U256::from(u64::MAX) {
        Value::from(value.as_u64())
    } else {
        Value::String(value.to_string())
    }
}
