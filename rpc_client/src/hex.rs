// Hex-word decoding for RPC payloads: 256-bit unsigned balances, signed
// int256 swap amounts, topic-embedded addresses.

use crate::RpcClientError;
use num_bigint::{BigInt, BigUint, Sign};

const BALANCE_OF_SELECTOR: &str = "0x70a08231";

fn strip_0x(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

/// Parses a 0x-prefixed hex quantity into u64 (block numbers, heights).
pub fn parse_hex_u64(value: &str) -> Result<u64, RpcClientError> {
    let digits = strip_0x(value);
    if digits.is_empty() {
        return Err(RpcClientError::InvalidResponse(format!(
            "empty hex quantity: '{}'",
            value
        )));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcClientError::InvalidResponse(format!("bad hex quantity '{}': {}", value, e)))
}

/// Decodes an unsigned 256-bit hex word into a decimal token amount at the
/// given decimal count. Fails on non-hex input; the all-zero word is a
/// legitimate zero balance.
pub fn decode_token_amount(value: &str, decimals: u32) -> Result<f64, RpcClientError> {
    let digits = strip_0x(value);
    if digits.is_empty() {
        return Ok(0.0);
    }

    let raw = BigUint::parse_bytes(digits.as_bytes(), 16).ok_or_else(|| {
        RpcClientError::InvalidResponse(format!("non-hex balance word: '{}'", value))
    })?;

    // Through decimal text so 256-bit magnitudes round once, at the end.
    let amount = raw
        .to_string()
        .parse::<f64>()
        .map_err(|e| RpcClientError::Parse(format!("balance out of range: {}", e)))?
        / 10f64.powi(decimals as i32);

    if amount.is_nan() || amount < 0.0 {
        return Err(RpcClientError::Parse(format!(
            "balance decoded to invalid amount: {}",
            amount
        )));
    }

    Ok(amount)
}

/// Decodes one 64-hex-digit word as a two's-complement signed int256.
pub fn decode_int256(word: &str) -> Result<BigInt, RpcClientError> {
    let digits = strip_0x(word);
    let unsigned = BigUint::parse_bytes(digits.as_bytes(), 16).ok_or_else(|| {
        RpcClientError::InvalidResponse(format!("non-hex int256 word: '{}'", word))
    })?;

    let max_positive = (BigUint::from(1u8) << 255u32) - BigUint::from(1u8);
    let value = if unsigned > max_positive {
        BigInt::from_biguint(Sign::Plus, unsigned) - (BigInt::from(1) << 256u32)
    } else {
        BigInt::from_biguint(Sign::Plus, unsigned)
    };

    Ok(value)
}

/// Extracts the address packed into a 32-byte topic word (last 20 bytes).
pub fn topic_to_address(topic: &str) -> String {
    let digits = strip_0x(topic);
    if digits.len() < 40 {
        return format!("0x{}", digits).to_lowercase();
    }
    format!("0x{}", &digits[digits.len() - 40..]).to_lowercase()
}

/// ABI-encoded `balanceOf(address)` call data: 4-byte selector plus the
/// address left-padded to a 32-byte word.
pub fn balance_of_call_data(wallet: &str) -> Result<String, RpcClientError> {
    let digits = strip_0x(wallet);
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RpcClientError::Parse(format!(
            "not a 20-byte hex address: '{}'",
            wallet
        )));
    }
    Ok(format!(
        "{}{:0>64}",
        BALANCE_OF_SELECTOR,
        digits.to_lowercase()
    ))
}

/// Pads an address to a 32-byte topic word for indexed-parameter filters.
pub fn address_to_topic(address: &str) -> Result<String, RpcClientError> {
    let digits = strip_0x(address);
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RpcClientError::Parse(format!(
            "not a 20-byte hex address: '{}'",
            address
        )));
    }
    Ok(format!("0x{:0>64}", digits.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("0x1a2b3c").unwrap(), 0x1a2b3c);
        assert!(parse_hex_u64("0xzz").is_err());
        assert!(parse_hex_u64("0x").is_err());
    }

    #[test]
    fn test_decode_token_amount_1000_tokens() {
        // 1000 * 1e18 = 0x3635c9adc5dea00000
        let word = format!("0x{:0>64}", "3635c9adc5dea00000");
        let amount = decode_token_amount(&word, 18).unwrap();
        assert!((amount - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_token_amount_zero_word() {
        let word = format!("0x{}", "0".repeat(64));
        assert_eq!(decode_token_amount(&word, 18).unwrap(), 0.0);
    }

    #[test]
    fn test_decode_token_amount_rejects_non_hex() {
        assert!(decode_token_amount("0xNOTHEX", 18).is_err());
    }

    #[test]
    fn test_decode_int256_positive() {
        let word = format!("{:0>64}", "de0b6b3a7640000"); // 1e18
        let value = decode_int256(&word).unwrap();
        assert_eq!(value, BigInt::from(1_000_000_000_000_000_000u64));
    }

    #[test]
    fn test_decode_int256_negative_two_complement() {
        // -1 in two's complement is all f's
        let word = "f".repeat(64);
        let value = decode_int256(&word).unwrap();
        assert_eq!(value, BigInt::from(-1));
    }

    #[test]
    fn test_decode_int256_negative_large() {
        // -(2^255) is the int256 minimum: 0x8000...0
        let word = format!("8{}", "0".repeat(63));
        let value = decode_int256(&word).unwrap();
        assert_eq!(value, -(BigInt::from(1) << 255u32));
    }

    #[test]
    fn test_topic_to_address_extracts_last_20_bytes() {
        let topic = "0x000000000000000000000000b1058c959987e3513600eb5b4fd82aeee2a0e4f9";
        assert_eq!(
            topic_to_address(topic),
            "0xb1058c959987e3513600eb5b4fd82aeee2a0e4f9"
        );
    }

    #[test]
    fn test_balance_of_call_data_layout() {
        let data = balance_of_call_data("0xB1058C959987e3513600eb5b4fd82aeee2a0e4f9").unwrap();
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0x70a08231"));
        assert!(data.ends_with("b1058c959987e3513600eb5b4fd82aeee2a0e4f9"));
        assert!(data[10..34].chars().all(|c| c == '0'));
    }

    #[test]
    fn test_balance_of_call_data_rejects_short_address() {
        assert!(balance_of_call_data("0x1234").is_err());
    }

    #[test]
    fn test_address_to_topic_pads_to_word() {
        let topic = address_to_topic("0xb1058c959987e3513600eb5b4fd82aeee2a0e4f9").unwrap();
        assert_eq!(
            topic,
            "0x000000000000000000000000b1058c959987e3513600eb5b4fd82aeee2a0e4f9"
        );
    }
}
