use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;
use crate::document_store::HttpDocumentStore;
use crate::purchase::{PurchaseRecord, UpsertPurchaseInput, normalize_email};

#[derive(Debug, thiserror::Error)]
pub enum PurchaseStoreError {
    #[error("{message}")]
    Persistence { message: String },
    #[error("{message}")]
    Remote { message: String },
}

/// Write access to verified purchases, keyed by normalized email.
///
/// Implementations must treat `upsert_purchase` as a single-document overwrite:
/// a second call for the same email replaces the first record.
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn upsert_purchase(
        &self,
        input: UpsertPurchaseInput,
    ) -> Result<PurchaseRecord, PurchaseStoreError>;

    fn backend_name(&self) -> &'static str;
}

pub type SharedPurchaseStore = Arc<dyn PurchaseStore>;

/// Picks the hosted document store when a URL is configured, otherwise the
/// local file store.
pub fn purchase_store_from_config(
    config: &Config,
) -> Result<SharedPurchaseStore, PurchaseStoreError> {
    if config.document_store_url.is_some() {
        let store = HttpDocumentStore::from_config(config)?;
        return Ok(Arc::new(store));
    }

    Ok(Arc::new(FilePurchaseStore::from_config(config)?))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PurchaseStoreState {
    #[serde(default)]
    purchases: HashMap<String, PurchaseRecord>,
}

#[derive(Clone)]
pub struct FilePurchaseStore {
    state: Arc<RwLock<PurchaseStoreState>>,
    path: Option<PathBuf>,
}

impl FilePurchaseStore {
    pub fn from_config(config: &Config) -> Result<Self, PurchaseStoreError> {
        Self::open(config.purchase_store_path.clone())
    }

    /// Opens the store, refusing a file that exists but cannot be read back.
    pub fn open(path: Option<PathBuf>) -> Result<Self, PurchaseStoreError> {
        let state = Self::load_state(path.as_ref())?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            path,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(PurchaseStoreState::default())),
            path: None,
        }
    }

    pub async fn find_purchase(&self, email: &str) -> Option<PurchaseRecord> {
        let key = normalize_email(email);
        self.state.read().await.purchases.get(&key).cloned()
    }

    pub async fn purchase_count(&self) -> usize {
        self.state.read().await.purchases.len()
    }

    fn load_state(path: Option<&PathBuf>) -> Result<PurchaseStoreState, PurchaseStoreError> {
        let Some(path) = path else {
            return Ok(PurchaseStoreState::default());
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    target: "blueprint.purchase_store",
                    path = %path.display(),
                    "purchase store file not found; starting empty",
                );
                return Ok(PurchaseStoreState::default());
            }
            Err(error) => {
                return Err(PurchaseStoreError::Persistence {
                    message: format!("failed to read purchase store {}: {error}", path.display()),
                });
            }
        };

        serde_json::from_str::<PurchaseStoreState>(&raw).map_err(|error| {
            PurchaseStoreError::Persistence {
                message: format!("failed to parse purchase store {}: {error}", path.display()),
            }
        })
    }

    async fn persist_state(&self, snapshot: &PurchaseStoreState) -> Result<(), PurchaseStoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                PurchaseStoreError::Persistence {
                    message: format!("failed to prepare purchase store directory: {error}"),
                }
            })?;
        }

        let payload =
            serde_json::to_vec(snapshot).map_err(|error| PurchaseStoreError::Persistence {
                message: format!("failed to encode purchase store payload: {error}"),
            })?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(error) = tokio::fs::write(&temp_path, payload).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(PurchaseStoreError::Persistence {
                message: format!("failed to write purchase store payload: {error}"),
            });
        }

        if let Err(error) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(PurchaseStoreError::Persistence {
                message: format!("failed to finalize purchase store payload: {error}"),
            });
        }

        Ok(())
    }

    /// Applies `operation` to a copy of the state and commits it only once the
    /// copy is on disk. The write guard is held across the file write so
    /// snapshots reach the file in the order they were taken.
    async fn mutate<T, F>(&self, operation: F) -> Result<T, PurchaseStoreError>
    where
        F: FnOnce(&mut PurchaseStoreState) -> T,
    {
        let mut state = self.state.write().await;
        let mut candidate = state.clone();
        let result = operation(&mut candidate);

        self.persist_state(&candidate).await?;
        *state = candidate;
        Ok(result)
    }
}

#[async_trait]
impl PurchaseStore for FilePurchaseStore {
    async fn upsert_purchase(
        &self,
        input: UpsertPurchaseInput,
    ) -> Result<PurchaseRecord, PurchaseStoreError> {
        self.mutate(|state| {
            let record = input.into_record(Utc::now());
            state
                .purchases
                .insert(record.email.clone(), record.clone());
            record
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
