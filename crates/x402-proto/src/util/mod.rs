//! Utility types shared across the workspace.

pub mod b64;
pub mod money_amount;

pub use b64::Base64Bytes;
pub use money_amount::{MoneyAmount, MoneyAmountParseError};
