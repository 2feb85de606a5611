//! Typed access to seller records in the document store.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::model::SellerOnboardingRecord;
use crate::error::StoreError;
use crate::identity::SellerId;
use crate::store::{DocumentStore, MergeUpdate};

/// The `sellers` collection, read and written through explicit schema types.
#[derive(Clone)]
pub struct SellerRecords {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl SellerRecords {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Load a seller's record, `None` if the seller never registered.
    pub async fn load(
        &self,
        seller_id: &SellerId,
    ) -> Result<Option<SellerOnboardingRecord>, StoreError> {
        let Some(body) = self
            .store
            .get_document(&self.collection, seller_id.as_str())
            .await?
        else {
            return Ok(None);
        };
        serde_json::from_value(body)
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("seller {seller_id}: {e}")))
    }

    pub async fn create(&self, record: &SellerOnboardingRecord) -> Result<(), StoreError> {
        let body = to_json(record)?;
        self.store
            .create_document(&self.collection, record.seller_id.as_str(), &body)
            .await
    }

    pub async fn merge(&self, seller_id: &SellerId, update: &MergeUpdate) -> Result<(), StoreError> {
        self.store
            .merge_update(&self.collection, seller_id.as_str(), update)
            .await
    }
}

/// Serialize a value for the store, mapping failures into `StoreError`.
pub fn to_json<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}
