//! Hits: recorded visitor interactions destined for the remote collector.
use chrono::{DateTime, Utc};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::{visitor::Identity, Error, Result};

/// Version of the payload format written by this crate.
pub const PAYLOAD_VERSION: u32 = 1;

/// Locally unique hit id, assigned by the store on insert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
    Display,
)]
#[serde(transparent)]
pub struct HitId(pub i64);

impl log::kv::ToValue for HitId {
    fn to_value(&self) -> log::kv::Value {
        log::kv::Value::from(self.0)
    }
}

/// Kind of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HitType {
    /// A screen view in a mobile app.
    Screen,
    /// A page view.
    Page,
    /// A custom event.
    Event,
    /// A purchase.
    Transaction,
    /// A line item of a purchase.
    Item,
    /// Exposure of the visitor to a variation.
    Activation,
}

impl HitType {
    /// Name used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            HitType::Screen => "SCREEN",
            HitType::Page => "PAGE",
            HitType::Event => "EVENT",
            HitType::Transaction => "TRANSACTION",
            HitType::Item => "ITEM",
            HitType::Activation => "ACTIVATION",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<HitType> {
        Some(match s {
            "SCREEN" => HitType::Screen,
            "PAGE" => HitType::Page,
            "EVENT" => HitType::Event,
            "TRANSACTION" => HitType::Transaction,
            "ITEM" => HitType::Item,
            "ACTIVATION" => HitType::Activation,
            _ => return None,
        })
    }
}

/// Lifecycle status of a persisted hit. `Sent` hits are never moved back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HitStatus {
    /// Waiting for delivery.
    Pending,
    /// Delivered, waiting for removal.
    Sent,
}

impl HitStatus {
    /// Name used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            HitStatus::Pending => "PENDING",
            HitStatus::Sent => "SENT",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<HitStatus> {
        match s {
            "PENDING" => Some(HitStatus::Pending),
            "SENT" => Some(HitStatus::Sent),
            _ => None,
        }
    }
}

/// Delivery class of a hit. Activation hits are never batched together with ordinary hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitClass {
    /// Activation hits.
    Activation,
    /// Every other hit type.
    Ordinary,
}

impl HitClass {
    /// Class of `hit_type`.
    pub fn of(hit_type: HitType) -> HitClass {
        if hit_type == HitType::Activation {
            HitClass::Activation
        } else {
            HitClass::Ordinary
        }
    }
}

/// A persisted hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    /// Id assigned by the store.
    pub id: HitId,
    /// Identity stamped at creation time. Never rewritten afterwards.
    #[serde(flatten)]
    pub identity: Identity,
    /// Kind of the hit.
    #[serde(rename = "type")]
    pub hit_type: HitType,
    /// Opaque payload, shaped by the hit type.
    pub payload: serde_json::Value,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Delivery status.
    pub status: HitStatus,
}

/// A hit that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHit {
    /// Kind of the hit.
    pub hit_type: HitType,
    /// Opaque payload, shaped by the hit type.
    pub payload: serde_json::Value,
}

impl NewHit {
    /// Create a hit from a raw payload.
    pub fn new(hit_type: HitType, payload: serde_json::Value) -> NewHit {
        NewHit { hit_type, payload }
    }

    /// Serialize typed hit data into an opaque payload.
    pub fn from_data<T: HitData>(data: &T) -> Result<NewHit> {
        let payload =
            serde_json::to_value(data).map_err(|err| Error::Payload(std::sync::Arc::new(err)))?;
        Ok(NewHit::new(T::HIT_TYPE, payload))
    }
}

/// Typed hit data that can be turned into a [`NewHit`].
pub trait HitData: Serialize {
    /// Hit type recorded for this data.
    const HIT_TYPE: HitType;
}

/// A screen view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screen {
    /// Name of the screen.
    pub location: String,
}

impl HitData for Screen {
    const HIT_TYPE: HitType = HitType::Screen;
}

/// A page view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// URL or path of the page.
    pub location: String,
}

impl HitData for Page {
    const HIT_TYPE: HitType = HitType::Page;
}

/// Category of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    /// Events tracking user actions.
    ActionTracking,
    /// Events measuring engagement.
    UserEngagement,
}

/// A custom event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event category.
    pub category: EventCategory,
    /// What the visitor did.
    pub action: String,
    /// Optional free-form label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Optional numeric value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Event {
    /// Create an event without label and value.
    pub fn new(category: EventCategory, action: impl Into<String>) -> Event {
        Event {
            category,
            action: action.into(),
            label: None,
            value: None,
        }
    }
}

impl HitData for Event {
    const HIT_TYPE: HitType = HitType::Event;
}

/// A purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Id of the transaction.
    pub transaction_id: String,
    /// Store or channel the purchase happened in.
    pub affiliation: String,
    /// Total revenue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    /// Shipping cost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<f64>,
    /// Tax amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax: Option<f64>,
    /// ISO 4217 currency code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Number of items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<u32>,
}

impl HitData for Transaction {
    const HIT_TYPE: HitType = HitType::Transaction;
}

/// A line item of a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Id of the transaction the item belongs to.
    pub transaction_id: String,
    /// Product name.
    pub product_name: String,
    /// Product SKU.
    pub product_sku: String,
    /// Unit price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Quantity bought.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// Product category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl HitData for Item {
    const HIT_TYPE: HitType = HitType::Item;
}

/// Confirms that the visitor was exposed to a variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    /// Campaign of the variation.
    pub campaign_id: String,
    /// Variation group of the variation.
    pub variation_group_id: String,
    /// Variation the visitor saw.
    pub variation_id: String,
}

impl HitData for Activation {
    const HIT_TYPE: HitType = HitType::Activation;
}
