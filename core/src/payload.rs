//! Wire form of the token handed across the acoustic link
//!
//! Two encodings are supported:
//! - `json`: `{"token_id":"abc123","amount":50.0,"ts":1760000000000}` (reference form)
//! - `compact`: `abc123|50|1760000000000` for profiles with short frames

use crate::error::{AudioModemError, DecodeError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

const COMPACT_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Json,
    Compact,
}

/// Token id, amount and issue time of a transfer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPayload {
    token_id: String,
    amount: Decimal,
    issued_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct JsonWireOut<'a> {
    token_id: &'a str,
    amount: f64,
    ts: i64,
}

#[derive(Deserialize)]
struct JsonWireIn {
    token_id: Option<Value>,
    amount: Option<Value>,
    ts: Option<Value>,
}

impl TransferPayload {
    /// Build a payload stamped with the current time.
    pub fn new(token_id: impl Into<String>, amount: Decimal) -> Result<Self> {
        Self::with_timestamp(token_id, amount, Utc::now())
    }

    /// Build a payload with an explicit issue time, truncated to milliseconds
    /// so that it survives the wire form unchanged.
    pub fn with_timestamp(
        token_id: impl Into<String>,
        amount: Decimal,
        issued_at: DateTime<Utc>,
    ) -> Result<Self> {
        let token_id = token_id.into();
        if token_id.trim().is_empty() {
            return Err(AudioModemError::InvalidPayload("token id is empty".to_string()));
        }
        if amount <= Decimal::ZERO {
            return Err(AudioModemError::InvalidPayload(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        let issued_at = DateTime::from_timestamp_millis(issued_at.timestamp_millis())
            .ok_or_else(|| AudioModemError::InvalidPayload("timestamp out of range".to_string()))?;

        Ok(Self {
            token_id,
            amount: amount.normalize(),
            issued_at,
        })
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn encode(&self, format: PayloadFormat) -> Result<Vec<u8>> {
        match format {
            PayloadFormat::Json => self.encode_json(),
            PayloadFormat::Compact => self.encode_compact(),
        }
    }

    pub fn decode(bytes: &[u8], format: PayloadFormat) -> std::result::Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| DecodeError::MalformedPayload("payload is not UTF-8".to_string()))?;
        match format {
            PayloadFormat::Json => Self::decode_json(text),
            PayloadFormat::Compact => Self::decode_compact(text),
        }
    }

    /// Same JSON object the receiver parses, for handing upward to a host.
    pub fn to_json(&self) -> Result<String> {
        let bytes = self.encode_json()?;
        String::from_utf8(bytes).map_err(|e| AudioModemError::InvalidPayload(e.to_string()))
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        let amount = self.amount.to_f64().ok_or_else(|| {
            AudioModemError::InvalidPayload(format!("amount {} is not representable", self.amount))
        })?;
        // The JSON number must read back as the same decimal
        let reparsed = serde_json::Number::from_f64(amount)
            .map(|n| decimal_from_text(&n.to_string()))
            .and_then(|d| d.ok());
        if reparsed != Some(self.amount) {
            return Err(AudioModemError::InvalidPayload(format!(
                "amount {} loses precision as a JSON number",
                self.amount
            )));
        }

        let wire = JsonWireOut {
            token_id: &self.token_id,
            amount,
            ts: self.issued_at.timestamp_millis(),
        };
        serde_json::to_vec(&wire).map_err(|e| AudioModemError::InvalidPayload(e.to_string()))
    }

    fn encode_compact(&self) -> Result<Vec<u8>> {
        if self.token_id.contains(COMPACT_SEPARATOR) {
            return Err(AudioModemError::InvalidPayload(
                "token id contains the compact separator".to_string(),
            ));
        }
        Ok(format!(
            "{}{sep}{}{sep}{}",
            self.token_id,
            self.amount,
            self.issued_at.timestamp_millis(),
            sep = COMPACT_SEPARATOR
        )
        .into_bytes())
    }

    fn decode_json(text: &str) -> std::result::Result<Self, DecodeError> {
        let wire: JsonWireIn = serde_json::from_str(text)
            .map_err(|e| DecodeError::MalformedPayload(format!("invalid JSON: {}", e)))?;

        let token_id = match wire.token_id {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(malformed("missing token_id")),
        };
        let amount = match wire.amount {
            Some(Value::Number(n)) => decimal_from_text(&n.to_string())?,
            Some(Value::String(s)) => decimal_from_text(&s)?,
            _ => return Err(malformed("missing numeric amount")),
        };
        let ts = match wire.ts {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| malformed("ts is not an integer"))?,
            _ => return Err(malformed("missing ts")),
        };

        Self::from_parts(token_id, amount, ts)
    }

    fn decode_compact(text: &str) -> std::result::Result<Self, DecodeError> {
        let fields: Vec<&str> = text.split(COMPACT_SEPARATOR).collect();
        if fields.len() != 3 {
            return Err(malformed("expected token_id|amount|ts"));
        }
        let amount = decimal_from_text(fields[1])?;
        let ts = fields[2]
            .parse::<i64>()
            .map_err(|_| malformed("ts is not an integer"))?;

        Self::from_parts(fields[0].to_string(), amount, ts)
    }

    fn from_parts(token_id: String, amount: Decimal, ts: i64) -> std::result::Result<Self, DecodeError> {
        let issued_at = DateTime::from_timestamp_millis(ts).ok_or_else(|| malformed("ts out of range"))?;
        Self::with_timestamp(token_id, amount, issued_at)
            .map_err(|e| DecodeError::MalformedPayload(e.to_string()))
    }
}

fn malformed(reason: &str) -> DecodeError {
    DecodeError::MalformedPayload(reason.to_string())
}

fn decimal_from_text(text: &str) -> std::result::Result<Decimal, DecodeError> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| malformed("amount is not numeric"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn sample(token: &str, amount: Decimal) -> TransferPayload {
        let ts = Utc.with_ymd_and_hms(2025, 10, 17, 12, 0, 0).unwrap();
        TransferPayload::with_timestamp(token, amount, ts).unwrap()
    }

    #[test]
    fn test_json_round_trip() {
        let payload = sample("abc123", Decimal::new(50, 0));
        let bytes = payload.encode(PayloadFormat::Json).unwrap();
        let decoded = TransferPayload::decode(&bytes, PayloadFormat::Json).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_json_wire_shape() {
        let payload = sample("abc123", Decimal::new(1250, 2));
        let bytes = payload.encode(PayloadFormat::Json).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["token_id"], "abc123");
        assert_eq!(value["amount"].as_f64(), Some(12.5));
        assert_eq!(value["ts"].as_i64(), Some(payload.issued_at().timestamp_millis()));
    }

    #[test]
    fn test_compact_round_trip() {
        let payload = sample("tok-77", Decimal::new(1999, 2));
        let bytes = payload.encode(PayloadFormat::Compact).unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().starts_with("tok-77|19.99|"));
        let decoded = TransferPayload::decode(&bytes, PayloadFormat::Compact).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_timestamp_truncated_to_millis() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let payload = TransferPayload::with_timestamp("t", Decimal::ONE, ts).unwrap();
        assert_eq!(payload.issued_at().timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_rejects_empty_token_and_non_positive_amount() {
        assert!(TransferPayload::new("", Decimal::ONE).is_err());
        assert!(TransferPayload::new("   ", Decimal::ONE).is_err());
        assert!(TransferPayload::new("abc", Decimal::ZERO).is_err());
        assert!(TransferPayload::new("abc", Decimal::new(-5, 0)).is_err());
    }

    #[test]
    fn test_not_json_is_malformed() {
        let err = TransferPayload::decode(b"not json", PayloadFormat::Json).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)));
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let cases: [&[u8]; 5] = [
            br#"{"amount":5,"ts":1}"#,
            br#"{"token_id":"a","ts":1}"#,
            br#"{"token_id":"a","amount":"lots","ts":1}"#,
            br#"{"token_id":"a","amount":5}"#,
            br#"{"token_id":"","amount":5,"ts":1}"#,
        ];
        for case in cases {
            let err = TransferPayload::decode(case, PayloadFormat::Json).unwrap_err();
            assert!(matches!(err, DecodeError::MalformedPayload(_)), "case {:?}", case);
        }
    }

    #[test]
    fn test_json_accepts_string_amount_and_extra_fields() {
        let text = br#"{"token_id":"x1","amount":"7.25","ts":1700000000000,"note":"hi"}"#;
        let decoded = TransferPayload::decode(text, PayloadFormat::Json).unwrap();
        assert_eq!(decoded.amount(), Decimal::new(725, 2));
    }

    #[test]
    fn test_compact_rejects_separator_in_token() {
        let payload = sample("a|b", Decimal::ONE);
        assert!(payload.encode(PayloadFormat::Compact).is_err());
    }

    #[test]
    fn test_compact_wrong_field_count() {
        let err = TransferPayload::decode(b"abc|5", PayloadFormat::Compact).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let err = TransferPayload::decode(&[0xff, 0xfe, 0x00], PayloadFormat::Json).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedPayload(_)));
    }
}
