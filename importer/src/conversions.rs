use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;
use primitive_types::U256;

pub fn u256_to_big_int(input: &U256) -> BigInt {
    let mut bytes = [0; 32];
    input.to_big_endian(&mut bytes);
    BigInt::from_bytes_be(Sign::Plus, &bytes)
}

/// Interprets a raw token amount as a decimal scaled down by the token's
/// decimals, e.g. `1_500_000_000_000_000_000` with 18 decimals becomes
/// `1.5`.
pub fn u256_to_token_amount(input: &U256, decimals: u8) -> BigDecimal {
    BigDecimal::new(u256_to_big_int(input), decimals as i64)
}

/// Signed variant for balance diffs.
pub fn big_int_to_token_amount(input: BigInt, decimals: u8) -> BigDecimal {
    BigDecimal::new(input, decimals as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn scales_down_by_decimals() {
        let amount = U256::from_dec_str("1500000000000000000").unwrap();
        assert_eq!(
            u256_to_token_amount(&amount, 18),
            BigDecimal::from_str("1.5").unwrap()
        );
        assert_eq!(u256_to_token_amount(&U256::zero(), 6), BigDecimal::from(0));
    }

    #[test]
    fn keeps_the_sign_of_balance_diffs() {
        assert_eq!(
            big_int_to_token_amount(BigInt::from(-70_000_000), 6),
            BigDecimal::from_str("-70").unwrap()
        );
    }
}
