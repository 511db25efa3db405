//! Order key type.
//!
//! [`OrderUid`] is the identity of an order aggregate across the store, the
//! cache, and the message stream. It is opaque: the service never interprets
//! its contents beyond requiring it to be non-empty.

use core::fmt;
use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

/// Globally unique key of an order aggregate.
///
/// Serializes as a bare JSON string and is used verbatim as the Kafka message
/// key.
///
/// ```
/// use orderline_core::OrderUid;
///
/// let uid = OrderUid::new("b563feb7b2b84b6test");
/// assert_eq!(uid.as_str(), "b563feb7b2b84b6test");
/// assert_eq!(serde_json::to_string(&uid).unwrap(), "\"b563feb7b2b84b6test\"");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderUid(String);

impl OrderUid {
    /// Create a key from any string-like value.
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key as raw bytes (the wire form of a message key).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns `true` if the key is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for OrderUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OrderUid {
    fn from(uid: String) -> Self {
        Self(uid)
    }
}

impl From<&str> for OrderUid {
    fn from(uid: &str) -> Self {
        Self(uid.to_owned())
    }
}

impl From<OrderUid> for String {
    fn from(uid: OrderUid) -> Self {
        uid.0
    }
}

impl AsRef<str> for OrderUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for OrderUid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for OrderUid {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for OrderUid {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for OrderUid {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for OrderUid {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for OrderUid {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_display_is_raw_value() {
        let uid = OrderUid::new("UID1");
        assert_eq!(uid.to_string(), "UID1");
        assert_eq!(format!("{uid}"), "UID1");
    }

    #[test]
    fn test_borrow_allows_str_lookup() {
        let mut map = HashMap::new();
        map.insert(OrderUid::new("UID1"), 1);
        assert_eq!(map.get("UID1"), Some(&1));
    }

    #[test]
    fn test_is_empty() {
        assert!(OrderUid::default().is_empty());
        assert!(!OrderUid::from("x").is_empty());
    }

    #[test]
    fn test_transparent_serde() {
        let uid: OrderUid = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(uid, "abc");
    }
}
