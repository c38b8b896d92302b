//! Error types for `musiflow-core`.
//!
//! User-facing failures (unknown code, already claimed, out of stock) are
//! outcomes, not errors. The variants here cover storage faults, misuse of
//! the workflow, and rejected form input.

use musiflow_storage::StorageError;

use crate::signup::SignupField;
use crate::workflow::ClaimState;

/// Errors from the typed JSON store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A document could not be serialized.
    #[error("failed to encode document '{key}': {reason}")]
    Encode { key: String, reason: String },

    /// The underlying storage backend returned an error.
    #[error("store backend error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the code, stock, and credential registries.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A required input field was empty.
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    /// The store returned an error.
    #[error("registry store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the claim workflow.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    /// The requested action is not valid in the current state.
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: ClaimState,
        action: &'static str,
    },

    /// A registry operation failed.
    #[error("claim registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Reading or writing the session flag failed.
    #[error("claim store error: {0}")]
    Store(#[from] StoreError),
}

/// A signup submission with one or more invalid fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("signup rejected, invalid fields: {}", join_fields(.fields))]
pub struct SignupError {
    /// Every field that failed validation, in form order.
    pub fields: Vec<SignupField>,
}

fn join_fields(fields: &[SignupField]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
