//! Ledger records shared by the orchestrator, the repositories and the workers.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum using the
/// same SCREAMING_SNAKE_CASE names serde uses on the wire.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::domain::ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    _ => Err($crate::domain::ParseEnumError {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use string_enum;

pub mod hosted_payment;
pub mod transaction;

pub use hosted_payment::{HostedPayment, HostedPaymentStatus};
pub use transaction::{Transaction, TransactionSource, TransactionStatus, TransactionType};

/// Serializes `BigDecimal` as a JSON string and accepts either a string or a
/// JSON number on the way in.
pub mod decimal_string {
    use bigdecimal::BigDecimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDecimal {
        Text(String),
        Number(serde_json::Number),
    }

    pub fn serialize<S>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = match RawDecimal::deserialize(deserializer)? {
            RawDecimal::Text(text) => text,
            RawDecimal::Number(number) => number.to_string(),
        };
        BigDecimal::from_str(text.trim()).map_err(serde::de::Error::custom)
    }
}
