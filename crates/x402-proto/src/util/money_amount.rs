use alloy::primitives::U256;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::ops::Mul;
use std::str::FromStr;

use crate::types::TokenAmount;

/// Represents a price-like numeric value in human-readable currency format.
/// Accepts strings like "$0.01", "1,000", "€20", or raw numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

impl MoneyAmount {
    /// Returns the number of digits after the decimal point in the original
    /// input, for precision checks when scaling to atomic token units.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Returns the absolute mantissa of the decimal value as an unsigned
    /// integer. For example, the mantissa of `12.34` is `1234`.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Converts the [`MoneyAmount`] into a raw on-chain [`TokenAmount`] by
    /// scaling the mantissa to the given token decimal precision.
    ///
    /// For example, `0.01` becomes `10000` for a token with 6 decimals.
    /// Returns an error if the money amount is more precise than the token
    /// allows, to prevent silent truncation.
    pub fn as_token_amount(&self, token_decimals: u32) -> Result<TokenAmount, MoneyAmountParseError> {
        let money_decimals = self.scale();
        if money_decimals > token_decimals {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: money_decimals,
                token: token_decimals,
            });
        }
        let scale_diff = token_decimals - money_decimals;
        let multiplier = U256::from(10).pow(U256::from(scale_diff));
        let value = U256::from(self.mantissa()).mul(multiplier);
        Ok(TokenAmount(value))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error("Amount must be between {} and {}", bounds::MIN_STR, bounds::MAX_STR)]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

mod bounds {
    use super::*;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        // Remove anything that isn't digit, dot, minus
        static CLEAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d\.\-]+").expect("valid regex"));
        let cleaned = CLEAN.replace_all(input, "").to_string();

        let parsed = Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        if parsed < *bounds::MIN || parsed > *bounds::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(parsed))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Serialize for MoneyAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            String(String),
            Number(f64),
        }
        let raw = Raw::deserialize(deserializer)?;
        let parsed = match raw {
            Raw::String(s) => MoneyAmount::parse(&s),
            Raw::Number(n) => MoneyAmount::parse(&n.to_string()),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}
