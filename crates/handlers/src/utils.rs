//! Shared utilities for pallet handlers.
//!
//! This module provides common parsing and extraction functions used across
//! event handlers to avoid code duplication.

use tally_core::models::AccountId;

// =============================================================================
// Event field extraction
// =============================================================================

/// Extract a field from event data, trying multiple key names and falling back to index.
///
/// This function attempts to find a value in the event data by:
/// 1. First trying each key in the `keys` slice in order
/// 2. If no key matches, falling back to accessing by `index`
/// 3. Parsing the found value using the provided `parser` function
///
/// # Example
///
/// ```ignore
/// let from = extract_field(data, &["from", "who"], 0, parse_account);
/// ```
pub fn extract_field<T>(
    data: &serde_json::Value,
    keys: &[&str],
    index: usize,
    parser: fn(&serde_json::Value) -> Option<T>,
) -> Option<T> {
    keys.iter()
        .find_map(|key| data.get(*key))
        .or_else(|| data.get(index))
        .and_then(parser)
}

// =============================================================================
// Account parsing
// =============================================================================

/// Parse an account ID from various JSON representations.
///
/// Handles multiple formats that may be returned by Substrate nodes:
/// - Hex string: `"0x1234..."`
/// - Wrapped object: `{ "Id": "0x..." }`
/// - Array wrapper: `["0x..."]`
/// - Byte array: `[b0, b1, ..., b31]`
pub fn parse_account(value: &serde_json::Value) -> Option<AccountId> {
    match value {
        // Hex string: "0x1234..."
        serde_json::Value::String(s) => {
            let hex_str = s.strip_prefix("0x").unwrap_or(s);
            let bytes = hex::decode(hex_str).ok()?;
            let arr: [u8; 32] = bytes.try_into().ok()?;
            Some(AccountId(arr))
        }
        // Wrapped object: { "Id": "0x..." }
        serde_json::Value::Object(obj) => obj
            .get("Id")
            .or_else(|| obj.get("id"))
            .and_then(parse_account),
        // Array: either ["0x..."] or [b0, b1, ..., b31]
        serde_json::Value::Array(arr) => {
            if arr.len() == 1 {
                return parse_account(&arr[0]);
            }
            if arr.len() != 32 {
                return None;
            }
            let mut bytes = [0u8; 32];
            for (i, v) in arr.iter().enumerate() {
                bytes[i] = v.as_u64()? as u8;
            }
            Some(AccountId(bytes))
        }
        _ => None,
    }
}

// =============================================================================
// Balance parsing
// =============================================================================

/// Parse a balance amount (i128) from JSON.
///
/// Handles both numeric and string representations, which is important
/// because JSON numbers are limited to u64 but Substrate amounts are u128
/// and arrive as decimal strings from the SCALE decoder. Values beyond
/// `i128::MAX` are rejected.
pub fn parse_balance(value: &serde_json::Value) -> Option<i128> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(i128::from)
            .or_else(|| n.as_i64().map(i128::from)),
        serde_json::Value::String(s) => s.parse::<i128>().ok(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -------------------------------------------------------------------------
    // Account parsing tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_account_hex_string() {
        let hex = "0x".to_string() + &"ab".repeat(32);
        let result = parse_account(&json!(hex));
        assert!(result.is_some());
        assert_eq!(result.unwrap().0, [0xab; 32]);
    }

    #[test]
    fn test_parse_account_without_prefix() {
        let hex = "cd".repeat(32);
        let result = parse_account(&json!(hex));
        assert!(result.is_some());
        assert_eq!(result.unwrap().0, [0xcd; 32]);
    }

    #[test]
    fn test_parse_account_wrapped_id() {
        let hex = "0x".to_string() + &"ef".repeat(32);
        assert!(parse_account(&json!({"Id": hex})).is_some());
        assert!(parse_account(&json!({"id": hex})).is_some());
    }

    #[test]
    fn test_parse_account_array_wrapper() {
        let hex = "0x".to_string() + &"34".repeat(32);
        let result = parse_account(&json!([hex]));
        assert!(result.is_some());
        assert_eq!(result.unwrap().0, [0x34; 32]);
    }

    #[test]
    fn test_parse_account_byte_array() {
        let bytes: Vec<u8> = (0..32).collect();
        let result = parse_account(&json!(bytes));
        assert!(result.is_some());
        let expected: [u8; 32] = (0..32).collect::<Vec<u8>>().try_into().unwrap();
        assert_eq!(result.unwrap().0, expected);
    }

    #[test]
    fn test_parse_account_rejects_invalid() {
        // Wrong length
        assert!(parse_account(&json!("ab".repeat(16))).is_none());
        // Non-hex
        assert!(parse_account(&json!("not_valid")).is_none());
        // Array of wrong size
        assert!(parse_account(&json!([1, 2, 3])).is_none());
    }

    // -------------------------------------------------------------------------
    // Balance parsing tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_balance_number() {
        assert_eq!(parse_balance(&json!(12345)), Some(12345));
        assert_eq!(parse_balance(&json!(u64::MAX)), Some(u64::MAX as i128));
    }

    #[test]
    fn test_parse_balance_string() {
        assert_eq!(parse_balance(&json!("67890")), Some(67890));

        // Amounts beyond u64 arrive as strings
        let large = "170141183460469231731687303715884105727"; // i128::MAX
        assert_eq!(parse_balance(&json!(large)), Some(i128::MAX));

        // u128 values above i128::MAX are rejected, not wrapped
        let too_large = "340282366920938463463374607431768211455"; // u128::MAX
        assert_eq!(parse_balance(&json!(too_large)), None);
    }

    #[test]
    fn test_parse_balance_rejects_non_numeric() {
        assert!(parse_balance(&json!("12.5")).is_none());
        assert!(parse_balance(&json!(null)).is_none());
        assert!(parse_balance(&json!({"amount": 5})).is_none());
    }

    // -------------------------------------------------------------------------
    // Field extraction tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_extract_field_by_key() {
        let data = json!({
            "from": "0x".to_string() + &"ab".repeat(32),
            "amount": 1000
        });

        let from = extract_field(&data, &["from", "who"], 0, parse_account);
        assert_eq!(from.unwrap().0, [0xab; 32]);

        let amount = extract_field(&data, &["amount", "value"], 1, parse_balance);
        assert_eq!(amount, Some(1000));
    }

    #[test]
    fn test_extract_field_fallback_key() {
        let data = json!({
            "who": "0x".to_string() + &"cd".repeat(32)
        });

        // "from" doesn't exist, should fallback to "who"
        let from = extract_field(&data, &["from", "who"], 0, parse_account);
        assert_eq!(from.unwrap().0, [0xcd; 32]);
    }

    #[test]
    fn test_extract_field_by_index() {
        let data = json!([
            "0x".to_string() + &"ef".repeat(32),
            "1000"
        ]);

        // No matching keys, should use index
        let from = extract_field(&data, &["from", "who"], 0, parse_account);
        assert!(from.is_some());

        let amount = extract_field(&data, &["amount", "value"], 1, parse_balance);
        assert_eq!(amount, Some(1000));
    }
}
