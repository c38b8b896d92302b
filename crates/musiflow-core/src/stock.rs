//! Stock of allocatable accounts.
//!
//! Admins add email/password pairs as `Available`. Allocation hands out the
//! first `Available` record in insertion order and marks it `Given` in the
//! same read-modify-write, so a record is handed out at most once per
//! context. Records never return to `Available`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RegistryError;
use crate::store::{keys, Edit, JsonStore};

/// Allocation status of a stock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockStatus {
    /// Waiting to be handed out.
    Available,
    /// Handed out to a claimant.
    Given,
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => f.write_str("Available"),
            Self::Given => f.write_str("Given"),
        }
    }
}

/// An account that can be handed to a claimant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// Account email.
    pub email: String,
    /// Account password.
    #[serde(rename = "pass")]
    pub password: String,
    /// Allocation status.
    pub status: StockStatus,
}

/// The persisted list of stock records.
#[derive(Debug, Clone)]
pub struct StockRegistry {
    store: JsonStore,
}

impl StockRegistry {
    /// Create a registry over the given store context.
    #[must_use]
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    /// Append an `Available` record.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::EmptyField`] if `email` or `password` is empty.
    /// - [`RegistryError::Store`] if persisting fails.
    pub async fn add_stock(&self, email: &str, password: &str) -> Result<StockRecord, RegistryError> {
        if email.is_empty() {
            return Err(RegistryError::EmptyField { field: "email" });
        }
        if password.is_empty() {
            return Err(RegistryError::EmptyField { field: "password" });
        }

        let record = StockRecord {
            email: email.to_owned(),
            password: password.to_owned(),
            status: StockStatus::Available,
        };
        let entry = record.clone();
        let total = self
            .store
            .update_list(keys::STOCK, move |stock: &mut Vec<StockRecord>| {
                stock.push(entry);
                Edit::Commit(stock.len())
            })
            .await?;

        info!(email = %record.email, total, "stock added");
        Ok(record)
    }

    /// Hand out the first `Available` record.
    ///
    /// Returns the record as it was before the flip to `Given`, or `None`
    /// when nothing is available; the store is untouched in that case.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if reading or persisting fails.
    pub async fn allocate(&self) -> Result<Option<StockRecord>, RegistryError> {
        let allocated = self
            .store
            .update_list(keys::STOCK, |stock: &mut Vec<StockRecord>| {
                match stock.iter_mut().find(|r| r.status == StockStatus::Available) {
                    Some(record) => {
                        let handed_out = record.clone();
                        record.status = StockStatus::Given;
                        Edit::Commit(Some(handed_out))
                    }
                    None => Edit::Skip(None),
                }
            })
            .await?;

        match &allocated {
            Some(record) => info!(email = %record.email, "stock allocated"),
            None => info!("stock allocation found nothing available"),
        }
        Ok(allocated)
    }

    /// Number of records still `Available`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if reading fails.
    pub async fn available_count(&self) -> Result<usize, RegistryError> {
        Ok(self
            .load()
            .await?
            .iter()
            .filter(|r| r.status == StockStatus::Available)
            .count())
    }

    /// All records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if reading fails.
    pub async fn list(&self) -> Result<Vec<StockRecord>, RegistryError> {
        let mut stock = self.load().await?;
        stock.reverse();
        Ok(stock)
    }

    /// Remove every record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the delete fails.
    pub async fn clear_all(&self) -> Result<(), RegistryError> {
        self.store.remove(keys::STOCK).await?;
        info!("all stock cleared");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<StockRecord>, RegistryError> {
        Ok(self.store.get_list(keys::STOCK).await?)
    }
}
