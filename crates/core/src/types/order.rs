//! The order aggregate.
//!
//! An [`Order`] owns exactly one [`DeliveryInfo`], exactly one [`Payment`], and
//! any number of [`Item`]s. The aggregate is always moved and cached as a whole.
//!
//! # Wire format
//!
//! JSON field names follow the upstream producers (`OrderUID`, `TrackNumber`,
//! `DeliveryInfo`, ...). Decoding is lenient in the same way those producers
//! are: a missing field takes its zero value and `"Items": null` is an empty
//! list. There is no schema version field.
//!
//! `DateCreated` is cut to microseconds on decode, the precision the store
//! keeps, so a decoded order equals the one read back after a restart.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::id::OrderUid;

/// Errors returned by [`Order::validate`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderValidationError {
    /// The order key is the empty string.
    #[error("order uid cannot be empty")]
    EmptyUid,
    /// The payment is keyed by a transaction that is not the order key.
    #[error("payment transaction {transaction:?} does not match order uid {order_uid:?}")]
    TransactionMismatch {
        /// Key of the order being validated.
        order_uid: String,
        /// Transaction id carried by its payment.
        transaction: String,
    },
}

/// Order aggregate root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(rename = "OrderUID")]
    pub order_uid: OrderUid,
    #[serde(rename = "TrackNumber")]
    pub track_number: String,
    /// Entry channel the order came through.
    #[serde(rename = "Entry")]
    pub entry: String,
    #[serde(rename = "DeliveryInfo")]
    pub delivery: DeliveryInfo,
    #[serde(rename = "Payment")]
    pub payment: Payment,
    #[serde(rename = "Items", deserialize_with = "null_as_empty")]
    pub items: Vec<Item>,
    #[serde(rename = "Locale")]
    pub locale: String,
    #[serde(rename = "InternalSignature")]
    pub internal_signature: String,
    #[serde(rename = "CustomerID")]
    pub customer_id: String,
    #[serde(rename = "DeliveryService")]
    pub delivery_service: String,
    #[serde(rename = "Shardkey")]
    pub shardkey: String,
    #[serde(rename = "SmID")]
    pub sm_id: i64,
    #[serde(rename = "DateCreated", deserialize_with = "micros")]
    pub date_created: DateTime<Utc>,
    #[serde(rename = "OofShard")]
    pub oof_shard: String,
}

/// Recipient details. One per order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Zip")]
    pub zip: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Region")]
    pub region: String,
    #[serde(rename = "Email")]
    pub email: String,
}

/// Payment record. One per order, keyed by `transaction`, which must equal the
/// order key.
///
/// Money fields are integers in minor currency units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    #[serde(rename = "Transaction")]
    pub transaction: String,
    #[serde(rename = "RequestID")]
    pub request_id: i64,
    #[serde(rename = "Currency")]
    pub currency: String,
    #[serde(rename = "Provider")]
    pub provider: String,
    #[serde(rename = "Amount")]
    pub amount: i64,
    /// Unix timestamp (seconds) of the payment.
    #[serde(rename = "PaymentDT")]
    pub payment_dt: i64,
    #[serde(rename = "Bank")]
    pub bank: String,
    #[serde(rename = "DeliveryCost")]
    pub delivery_cost: i64,
    #[serde(rename = "GoodsTotal")]
    pub goods_total: i64,
    #[serde(rename = "CustomFee")]
    pub custom_fee: i64,
}

/// A line item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    /// Catalog id.
    #[serde(rename = "ChrtID")]
    pub chrt_id: i64,
    #[serde(rename = "TrackNumber")]
    pub track_number: String,
    #[serde(rename = "Price")]
    pub price: i64,
    /// Row id.
    #[serde(rename = "Rid")]
    pub rid: String,
    #[serde(rename = "Name")]
    pub name: String,
    /// Discount, in percent.
    #[serde(rename = "Sale")]
    pub sale: i32,
    #[serde(rename = "Size")]
    pub size: String,
    #[serde(rename = "TotalPrice")]
    pub total_price: i64,
    #[serde(rename = "NmID")]
    pub nm_id: i64,
    #[serde(rename = "Brand")]
    pub brand: String,
    #[serde(rename = "Status")]
    pub status: i32,
}

impl Order {
    /// Check the invariants the store relies on.
    ///
    /// The payments relation is keyed by transaction id and read back by order
    /// key, so an order whose payment carries a different transaction could be
    /// written but never read back whole.
    ///
    /// # Errors
    ///
    /// Returns [`OrderValidationError`] if the key is empty or the payment
    /// transaction differs from the key.
    pub fn validate(&self) -> Result<(), OrderValidationError> {
        if self.order_uid.is_empty() {
            return Err(OrderValidationError::EmptyUid);
        }

        if self.payment.transaction != self.order_uid.as_str() {
            return Err(OrderValidationError::TransactionMismatch {
                order_uid: self.order_uid.to_string(),
                transaction: self.payment.transaction.clone(),
            });
        }

        Ok(())
    }

    /// Decode an order from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload is not a JSON object of
    /// the expected shape.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encode the order into its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Producers that marshal an empty list as `null` are accepted.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn micros<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(DateTime::<Utc>::deserialize(deserializer)?.trunc_subsecs(6))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "OrderUID": "b563feb7b2b84b6test",
        "TrackNumber": "WBILMTESTTRACK",
        "Entry": "WBIL",
        "DeliveryInfo": {
            "Name": "Test Testov",
            "Phone": "+9720000000",
            "Zip": "2639809",
            "City": "Kiryat Mozkin",
            "Address": "Ploshad Mira 15",
            "Region": "Kraiot",
            "Email": "test@gmail.com"
        },
        "Payment": {
            "Transaction": "b563feb7b2b84b6test",
            "RequestID": 0,
            "Currency": "USD",
            "Provider": "wbpay",
            "Amount": 1817,
            "PaymentDT": 1637907727,
            "Bank": "alpha",
            "DeliveryCost": 1500,
            "GoodsTotal": 317,
            "CustomFee": 0
        },
        "Items": [{
            "ChrtID": 9934930,
            "TrackNumber": "WBILMTESTTRACK",
            "Price": 453,
            "Rid": "ab4219087a764ae0btest",
            "Name": "Mascaras",
            "Sale": 30,
            "Size": "0",
            "TotalPrice": 317,
            "NmID": 2389212,
            "Brand": "Vivienne Sabo",
            "Status": 202
        }],
        "Locale": "en",
        "InternalSignature": "",
        "CustomerID": "test",
        "DeliveryService": "meest",
        "Shardkey": "9",
        "SmID": 99,
        "DateCreated": "2021-11-26T06:22:19Z",
        "OofShard": "1"
    }"#;

    #[test]
    fn test_decode_full_payload() {
        let order = Order::from_json(SAMPLE.as_bytes()).unwrap();

        assert_eq!(order.order_uid, "b563feb7b2b84b6test");
        assert_eq!(order.delivery.city, "Kiryat Mozkin");
        assert_eq!(order.payment.amount, 1817);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].brand, "Vivienne Sabo");
        assert_eq!(order.items[0].status, 202);
        assert_eq!(order.sm_id, 99);
        assert_eq!(order.date_created.to_rfc3339(), "2021-11-26T06:22:19+00:00");
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_encode_uses_wire_field_names() {
        let order = Order::from_json(SAMPLE.as_bytes()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&order.to_json().unwrap()).unwrap();

        assert_eq!(value["OrderUID"], "b563feb7b2b84b6test");
        assert_eq!(value["Payment"]["PaymentDT"], 1_637_907_727);
        assert_eq!(value["Items"][0]["ChrtID"], 9_934_930);
        assert!(value.get("order_uid").is_none());
    }

    #[test]
    fn test_date_created_keeps_microseconds() {
        let order =
            Order::from_json(br#"{"OrderUID": "a", "DateCreated": "2021-11-26T06:22:19.123456789Z"}"#)
                .unwrap();

        assert_eq!(order.date_created.timestamp_subsec_nanos(), 123_456_000);
        let again = Order::from_json(&order.to_json().unwrap()).unwrap();
        assert_eq!(again, order);
    }

    #[test]
    fn test_null_items_decode_as_empty() {
        let order = Order::from_json(br#"{"OrderUID": "a", "Items": null}"#).unwrap();
        assert!(order.items.is_empty());
    }

    #[test]
    fn test_missing_fields_take_zero_values() {
        let order = Order::from_json(br#"{"OrderUID": "a"}"#).unwrap();
        assert_eq!(order.order_uid, "a");
        assert_eq!(order.payment, Payment::default());
        assert_eq!(order.delivery, DeliveryInfo::default());
        assert_eq!(order.sm_id, 0);
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        assert!(Order::from_json(b"not json").is_err());
        assert!(Order::from_json(b"[1, 2, 3]").is_err());
        assert!(Order::from_json(br#"{"SmID": "ninety-nine"}"#).is_err());
    }

    #[test]
    fn test_validate_empty_uid() {
        let order = Order::default();
        assert_eq!(order.validate(), Err(OrderValidationError::EmptyUid));
    }

    #[test]
    fn test_validate_transaction_mismatch() {
        let mut order = Order::from_json(SAMPLE.as_bytes()).unwrap();
        order.payment.transaction = "other".to_string();

        let err = order.validate().unwrap_err();
        assert!(matches!(
            err,
            OrderValidationError::TransactionMismatch { ref transaction, .. } if transaction == "other"
        ));
    }
}
