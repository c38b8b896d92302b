//! Durable storage backed by redb.
//!
//! The default on-disk store. redb is pure Rust, so the binary builds without
//! a C++ toolchain. One table holds every document; each `put`/`delete` is
//! its own committed write transaction, so a document is either fully
//! replaced or untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::{StorageBackend, StorageError};

const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// A storage backend backed by a single redb file.
///
/// # Examples
///
/// ```no_run
/// # use musiflow_storage::RedbBackend;
/// let backend = RedbBackend::open("./musiflow.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn txn_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn table_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::MissingTable {
        name: format!("documents: {e}"),
    }
}

impl RedbBackend {
    /// Open or create a redb database file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file cannot be created or is not
    /// a redb database, and [`StorageError::Transaction`] if the data table
    /// cannot be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Opening the table in a write txn creates it if missing.
        let txn = db.begin_write().map_err(txn_err)?;
        txn.open_table(DATA_TABLE).map_err(table_err)?;
        txn.commit().map_err(txn_err)?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StorageError::Transaction {
                reason: format!("blocking {op} task panicked: {e}"),
            })?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_owned();
        self.blocking("get", move |db| {
            let txn = db.begin_read().map_err(txn_err)?;
            let table = txn.open_table(DATA_TABLE).map_err(table_err)?;
            let value = table
                .get(key.as_str())
                .map_err(|e| StorageError::Read {
                    key: key.clone(),
                    reason: e.to_string(),
                })?
                .map(|v| v.value().to_vec());
            Ok(value)
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = key.to_owned();
        let value = value.to_vec();
        self.blocking("put", move |db| {
            let txn = db.begin_write().map_err(txn_err)?;
            {
                let mut table = txn.open_table(DATA_TABLE).map_err(table_err)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(|e| StorageError::Write {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
            }
            txn.commit().map_err(txn_err)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        self.blocking("delete", move |db| {
            let txn = db.begin_write().map_err(txn_err)?;
            {
                let mut table = txn.open_table(DATA_TABLE).map_err(table_err)?;
                table
                    .remove(key.as_str())
                    .map_err(|e| StorageError::Delete {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
            }
            txn.commit().map_err(txn_err)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.to_owned();
        self.blocking("list", move |db| {
            let list_err = |e: redb::StorageError| StorageError::List {
                prefix: prefix.clone(),
                reason: e.to_string(),
            };
            let txn = db.begin_read().map_err(txn_err)?;
            let table = txn.open_table(DATA_TABLE).map_err(table_err)?;

            let mut keys = Vec::new();
            for item in table.range(prefix.as_str()..).map_err(list_err)? {
                let (k, _) = item.map_err(list_err)?;
                let key = k.value();
                if !key.starts_with(prefix.as_str()) {
                    break;
                }
                keys.push(key.to_owned());
            }
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");

        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.put("codes", b"[]").await.unwrap();
            backend.put("offerClaimed", b"true").await.unwrap();
        }

        let reopened = RedbBackend::open(&path).unwrap();
        assert_eq!(reopened.get("codes").await.unwrap(), Some(b"[]".to_vec()));
        assert!(reopened.exists("offerClaimed").await.unwrap());
        assert_eq!(reopened.path(), path.as_path());
    }

    #[tokio::test]
    async fn delete_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("store.redb")).unwrap();
        backend.put("codes", b"[]").await.unwrap();
        backend.put("credentials", b"[]").await.unwrap();
        backend.put("stock", b"[]").await.unwrap();

        backend.delete("stock").await.unwrap();
        backend.delete("stock").await.unwrap();

        assert_eq!(backend.list("").await.unwrap(), vec!["codes", "credentials"]);
        assert_eq!(backend.list("cr").await.unwrap(), vec!["credentials"]);
        assert_eq!(backend.get("stock").await.unwrap(), None);
    }
}
