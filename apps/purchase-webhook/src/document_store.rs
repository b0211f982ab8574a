//! Hosted document database client.
//!
//! Each purchase is one document at `{base_url}/{collection}/{email}`, written
//! with a full-document `PATCH` in the Firestore REST value encoding. The
//! remote store applies a single-document write atomically, so repeated
//! deliveries for the same buyer overwrite each other.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Url;
use serde_json::{Value, json};

use crate::config::Config;
use crate::purchase::{PurchaseRecord, UpsertPurchaseInput};
use crate::purchase_store::{PurchaseStore, PurchaseStoreError};

#[derive(Clone)]
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: Url,
    collection: String,
    auth_token: Option<String>,
}

impl HttpDocumentStore {
    pub fn from_config(config: &Config) -> Result<Self, PurchaseStoreError> {
        let base_url = config
            .document_store_url
            .as_deref()
            .ok_or_else(|| PurchaseStoreError::Remote {
                message: "document store url is not configured".to_string(),
            })?;

        Self::new(
            base_url,
            &config.document_store_collection,
            config.document_store_token.clone(),
            Duration::from_millis(config.document_store_timeout_ms.max(1)),
        )
    }

    pub fn new(
        base_url: &str,
        collection: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PurchaseStoreError> {
        let base_url = Url::parse(base_url.trim()).map_err(|error| PurchaseStoreError::Remote {
            message: format!("invalid document store url: {error}"),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PurchaseStoreError::Remote {
                message: "document store url cannot be a base url".to_string(),
            });
        }

        let collection = collection.trim().trim_matches('/').to_string();
        if collection.is_empty() {
            return Err(PurchaseStoreError::Remote {
                message: "document store collection must not be empty".to_string(),
            });
        }

        let auth_token = auth_token
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| PurchaseStoreError::Remote {
                message: format!("document store http client init failed: {error}"),
            })?;

        Ok(Self {
            client,
            base_url,
            collection,
            auth_token,
        })
    }

    fn document_url(&self, key: &str) -> Result<Url, PurchaseStoreError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| PurchaseStoreError::Remote {
                    message: "document store url cannot be a base url".to_string(),
                })?;
            segments.pop_if_empty();
            for segment in self.collection.split('/') {
                segments.push(segment);
            }
            segments.push(key);
        }
        Ok(url)
    }
}

fn document_fields(record: &PurchaseRecord) -> Value {
    let order_id = match record.order_id.as_deref() {
        Some(value) => json!({ "stringValue": value }),
        None => json!({ "nullValue": null }),
    };

    json!({
        "fields": {
            "email": { "stringValue": record.email },
            "verified": { "booleanValue": record.verified },
            "verifiedAt": {
                "timestampValue": record.verified_at.to_rfc3339_opts(SecondsFormat::Micros, true)
            },
            "orderId": order_id,
        }
    })
}

#[async_trait]
impl PurchaseStore for HttpDocumentStore {
    async fn upsert_purchase(
        &self,
        input: UpsertPurchaseInput,
    ) -> Result<PurchaseRecord, PurchaseStoreError> {
        let record = input.into_record(Utc::now());
        let url = self.document_url(&record.email)?;

        let mut request = self
            .client
            .patch(url)
            .header("accept", "application/json")
            .json(&document_fields(&record));
        if let Some(token) = self.auth_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| PurchaseStoreError::Remote {
                message: format!("document store write failed: {error}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PurchaseStoreError::Remote {
                message: format!(
                    "document store write rejected status={} body={}",
                    status.as_u16(),
                    body
                ),
            });
        }

        Ok(record)
    }

    fn backend_name(&self) -> &'static str {
        "document_store"
    }
}
