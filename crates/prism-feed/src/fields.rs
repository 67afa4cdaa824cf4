//! Field extraction helpers shared by the exchange adapters.
//!
//! Venues disagree on whether numbers are JSON strings or JSON numbers;
//! every helper here accepts both.

use crate::error::{FeedError, FeedResult};
use prism_core::{BookSide, LevelChange, Price, PriceLevel, Size};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Decimal from a JSON string or number.
pub fn decimal(value: &Value, field: &str) -> FeedResult<Decimal> {
    let parsed = match value {
        Value::String(s) => parse_decimal_str(s),
        Value::Number(n) => parse_decimal_str(&n.to_string()),
        _ => None,
    };
    parsed.ok_or_else(|| FeedError::Malformed(format!("{field}: expected decimal, got {value}")))
}

fn parse_decimal_str(s: &str) -> Option<Decimal> {
    if s.contains(['e', 'E']) {
        Decimal::from_scientific(s).ok()
    } else {
        Decimal::from_str(s).ok()
    }
}

pub fn decimal_field(obj: &Value, field: &str) -> FeedResult<Decimal> {
    decimal(required(obj, field)?, field)
}

/// Optional decimal; empty strings (OKX) count as absent.
pub fn opt_decimal_field(obj: &Value, field: &str) -> FeedResult<Option<Decimal>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(v) => decimal(v, field).map(Some),
    }
}

/// Non-negative size.
pub fn size(value: &Value, field: &'static str) -> FeedResult<Size> {
    let d = decimal(value, field)?;
    let size = Size::new(d);
    if size.is_negative() {
        return Err(FeedError::NegativeQuantity {
            field,
            value: d.to_string(),
        });
    }
    Ok(size)
}

pub fn size_field(obj: &Value, field: &'static str) -> FeedResult<Size> {
    size(required(obj, field)?, field)
}

pub fn price_field(obj: &Value, field: &str) -> FeedResult<Price> {
    decimal_field(obj, field).map(Price::new)
}

/// Integer from a JSON number or numeric string.
pub fn i64_value(value: &Value, field: &str) -> FeedResult<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| FeedError::Malformed(format!("{field}: expected integer, got {value}")))
}

pub fn i64_field(obj: &Value, field: &str) -> FeedResult<i64> {
    i64_value(required(obj, field)?, field)
}

pub fn opt_i64_field(obj: &Value, field: &str) -> FeedResult<Option<i64>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(v) => i64_value(v, field).map(Some),
    }
}

/// Sequence number; negative values are rejected.
pub fn u64_field(obj: &Value, field: &str) -> FeedResult<u64> {
    let raw = i64_field(obj, field)?;
    u64::try_from(raw).map_err(|_| FeedError::Malformed(format!("{field}: negative sequence {raw}")))
}

pub fn str_field<'a>(obj: &'a Value, field: &str) -> FeedResult<&'a str> {
    required(obj, field)?
        .as_str()
        .ok_or_else(|| FeedError::Malformed(format!("{field}: expected string")))
}

/// Identifier that may be a string or a number.
pub fn id_field(obj: &Value, field: &str) -> FeedResult<String> {
    match required(obj, field)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(FeedError::Malformed(format!("{field}: expected id, got {other}"))),
    }
}

pub fn array_field<'a>(obj: &'a Value, field: &str) -> FeedResult<&'a Vec<Value>> {
    required(obj, field)?
        .as_array()
        .ok_or_else(|| FeedError::Malformed(format!("{field}: expected array")))
}

pub fn required<'a>(obj: &'a Value, field: &str) -> FeedResult<&'a Value> {
    obj.get(field)
        .ok_or_else(|| FeedError::Malformed(format!("missing field {field}")))
}

/// `[[price, size, ...], ...]` as used by Binance and OKX.
pub fn levels(raw: &[Value]) -> FeedResult<Vec<PriceLevel>> {
    raw.iter()
        .map(|level| {
            let pair = level
                .as_array()
                .filter(|a| a.len() >= 2)
                .ok_or_else(|| FeedError::Malformed(format!("bad level {level}")))?;
            Ok(PriceLevel::new(
                Price::new(decimal(&pair[0], "level price")?),
                size(&pair[1], "level size")?,
            ))
        })
        .collect()
}

/// Same level format, as diff changes for one side.
pub fn level_changes(raw: &[Value], side: BookSide) -> FeedResult<Vec<LevelChange>> {
    Ok(levels(raw)?
        .into_iter()
        .map(|level| LevelChange {
            side,
            price: level.price,
            size: level.size,
        })
        .collect())
}

/// Reclassify missing or mistyped fields as a schema mismatch (REST bodies).
pub fn schema<T>(result: FeedResult<T>) -> FeedResult<T> {
    result.map_err(|e| match e {
        FeedError::Malformed(msg) => FeedError::Schema(msg),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_accepts_string_and_number() {
        assert_eq!(decimal(&json!("0.0024"), "p").unwrap(), dec!(0.0024));
        assert_eq!(decimal(&json!(5042.5), "p").unwrap(), dec!(5042.5));
        assert!(decimal(&json!(true), "p").is_err());
    }

    #[test]
    fn test_negative_size_rejected() {
        let err = size(&json!("-1"), "q").unwrap_err();
        assert!(matches!(err, FeedError::NegativeQuantity { field: "q", .. }));
    }

    #[test]
    fn test_levels_ignore_extra_columns() {
        let raw = json!([["8476.98", "415", "0", "13"], ["8477", "0"]]);
        let parsed = levels(raw.as_array().unwrap()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].size.0, dec!(415));
        assert!(parsed[1].size.is_zero());
    }

    #[test]
    fn test_optional_empty_string_is_none() {
        let obj = json!({"nextFundingRate": "", "ts": "1703088000000"});
        assert_eq!(opt_decimal_field(&obj, "nextFundingRate").unwrap(), None);
        assert_eq!(opt_i64_field(&obj, "ts").unwrap(), Some(1703088000000));
    }

    #[test]
    fn test_negative_sequence_rejected() {
        let obj = json!({"prevSeqId": -1});
        assert!(u64_field(&obj, "prevSeqId").is_err());
        assert_eq!(i64_field(&obj, "prevSeqId").unwrap(), -1);
    }
}
