//! Core library for `MusiFlow`.
//!
//! Holds the redemption-code lifecycle, the stock registry that hands out
//! accounts, the credential log, the two-page claim workflow, and the admin
//! projections over all of them. Everything persists through [`store::JsonStore`],
//! which wraps a `musiflow-storage` backend and publishes change
//! notifications to every open context.

pub mod admin;
pub mod code;
pub mod credential;
pub mod error;
pub mod signup;
pub mod stock;
pub mod store;
pub mod workflow;
