use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Provider event names that mean a buyer completed a purchase.
pub const PURCHASE_EVENT_NAMES: &[&str] = &["order_created"];

#[derive(Debug, thiserror::Error)]
pub enum PurchaseEventError {
    #[error("purchase event is missing data.attributes.user_email")]
    MissingEmail,
    #[error("failed to decode event envelope: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Stored once per normalized buyer email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub email: String,
    pub verified: bool,
    pub verified_at: DateTime<Utc>,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertPurchaseInput {
    pub email: String,
    pub order_id: Option<String>,
}

impl UpsertPurchaseInput {
    pub fn into_record(self, verified_at: DateTime<Utc>) -> PurchaseRecord {
        PurchaseRecord {
            email: normalize_email(&self.email),
            verified: true,
            verified_at,
            order_id: self.order_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseEvent {
    Completed {
        event_name: String,
        input: UpsertPurchaseInput,
    },
    Ignored {
        event_name: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct EventEnvelope {
    #[serde(default, deserialize_with = "lenient")]
    meta: Option<EventMeta>,
    #[serde(default, deserialize_with = "lenient")]
    data: Option<EventData>,
}

#[derive(Debug, Default, Deserialize)]
struct EventMeta {
    #[serde(default)]
    event_name: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct EventData {
    #[serde(default)]
    id: Option<OrderIdValue>,
    #[serde(default, deserialize_with = "lenient")]
    attributes: Option<EventAttributes>,
}

/// Nested sections of the wrong shape read as absent instead of failing the envelope.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
struct EventAttributes {
    #[serde(default)]
    user_email: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OrderIdValue {
    Text(String),
    Number(serde_json::Number),
    Other(Value),
}

impl OrderIdValue {
    fn into_order_id(self) -> Option<String> {
        match self {
            Self::Text(value) => Some(value),
            Self::Number(value) => Some(value.to_string()),
            Self::Other(_) => None,
        }
    }
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn is_purchase_event(event_name: &str) -> bool {
    PURCHASE_EVENT_NAMES.contains(&event_name)
}

/// Decodes a verified request body into the action the webhook should take.
pub fn parse_purchase_event(body: &[u8]) -> Result<PurchaseEvent, PurchaseEventError> {
    let value: Value = serde_json::from_slice(body)?;
    if !value.is_object() {
        return Err(PurchaseEventError::Decode(serde::de::Error::custom(
            "event envelope is not a JSON object",
        )));
    }
    let envelope: EventEnvelope = serde_json::from_value(value)?;
    let event_name = envelope
        .meta
        .and_then(|meta| meta.event_name)
        .and_then(|value| match value {
            Value::String(name) => Some(name),
            _ => None,
        });

    let name = match event_name {
        Some(name) if is_purchase_event(&name) => name,
        other => return Ok(PurchaseEvent::Ignored { event_name: other }),
    };

    let data = envelope.data.unwrap_or_default();
    let email = data
        .attributes
        .and_then(|attributes| attributes.user_email)
        .and_then(|value| value.as_str().map(normalize_email))
        .filter(|email| !email.is_empty())
        .ok_or(PurchaseEventError::MissingEmail)?;

    Ok(PurchaseEvent::Completed {
        event_name: name,
        input: UpsertPurchaseInput {
            email,
            order_id: data.id.and_then(OrderIdValue::into_order_id),
        },
    })
}
