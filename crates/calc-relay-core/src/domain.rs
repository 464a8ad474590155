use std::fmt;

use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). Groups and supergroups are negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a sent Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Identity under which an accumulator value is tracked.
///
/// Either the shared sentinel (`global`) or the decimal id of the source chat.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(pub String);

impl ScopeKey {
    pub const GLOBAL: &'static str = "global";

    pub fn global() -> Self {
        Self(Self::GLOBAL.to_string())
    }

    pub fn for_chat(chat_id: ChatId) -> Self {
        Self(chat_id.0.to_string())
    }

    /// Pick the active scope for a message from `source`.
    pub fn select(independent_mode: bool, source: ChatId) -> Self {
        if independent_mode {
            Self::for_chat(source)
        } else {
            Self::global()
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted running total.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorRecord {
    pub id: ScopeKey,
    #[serde(with = "js_number")]
    pub value: f64,
}

/// Serde helper for floats that may be non-finite.
///
/// JSON numbers cannot hold them, so `Infinity`, `-Infinity` and `NaN` are
/// written as strings and read back from strings.
mod js_number {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { "Infinity" } else { "-Infinity" })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(s) => match s.as_str() {
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(de::Error::custom(format!("invalid number: {other}"))),
            },
        }
    }
}
