//! Redemption codes.
//!
//! A code is 16 symbols drawn uniformly from `A-Z0-9`, shown in four groups
//! of four (`XXXX-XXXX-XXXX-XXXX`). Codes are display tokens, not secrets:
//! generation uses the thread RNG and does not check for collisions, and the
//! first stored match wins on lookup.
//!
//! Status only moves forward, `Active` to `Claimed`. Verification flips it on
//! the read that finds an `Active` entry, so each code verifies once.
//!
//! Older stores hold bare strings instead of records. Those are normalized
//! to `Active` records when the document is decoded and written back in
//! record form on the next mutation. Entries with a status this version
//! does not know are left in the document untouched.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RegistryError;
use crate::store::{keys, Edit, JsonStore};

/// Symbols a code is drawn from.
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of symbols in a code, excluding separators.
pub const CODE_SYMBOLS: usize = 16;

const GROUP_LEN: usize = 4;

/// Lifecycle status of a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CodeStatus {
    /// Generated and not yet redeemed.
    #[default]
    Active,
    /// Redeemed by a successful verification.
    Claimed,
}

impl std::fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("Active"),
            Self::Claimed => f.write_str("Claimed"),
        }
    }
}

/// A stored redemption code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredCode")]
pub struct Code {
    /// The formatted code, e.g. `AB12-CD34-EF56-GH78`.
    pub code: String,
    /// Current status.
    pub status: CodeStatus,
}

impl Code {
    fn active(code: String) -> Self {
        Self {
            code,
            status: CodeStatus::Active,
        }
    }
}

/// On-disk shapes a code entry may take.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCode {
    Record {
        code: String,
        #[serde(default)]
        status: CodeStatus,
    },
    Bare(String),
}

impl From<StoredCode> for Code {
    fn from(stored: StoredCode) -> Self {
        match stored {
            StoredCode::Record { code, status } => Self { code, status },
            StoredCode::Bare(code) => Self::active(code),
        }
    }
}

/// Outcome of verifying a submitted code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// No stored code matches.
    NotFound,
    /// The code exists but was already redeemed.
    AlreadyClaimed,
    /// The code was `Active` and is now `Claimed`.
    Verified,
}

/// Generate a formatted code with the thread-local RNG.
#[must_use]
pub fn generate_code() -> String {
    generate_code_with(&mut rand::rng())
}

/// Generate a formatted code from the given RNG.
pub fn generate_code_with<R: Rng>(rng: &mut R) -> String {
    let symbols = (0..CODE_SYMBOLS).map(|_| {
        let idx = rng.random_range(0..CODE_ALPHABET.len());
        char::from(CODE_ALPHABET[idx])
    });
    group_symbols(symbols)
}

/// Normalize what a user typed into the code field.
///
/// Drops anything that is not ASCII alphanumeric, uppercases, keeps at most
/// 16 symbols, and re-inserts the group dashes. Partial input stays partial:
/// `ab12c` becomes `AB12-C`.
#[must_use]
pub fn format_code_input(raw: &str) -> String {
    let symbols = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(CODE_SYMBOLS);
    group_symbols(symbols)
}

fn group_symbols(symbols: impl Iterator<Item = char>) -> String {
    let mut out = String::with_capacity(CODE_SYMBOLS + CODE_SYMBOLS / GROUP_LEN);
    for (i, c) in symbols.enumerate() {
        if i > 0 && i % GROUP_LEN == 0 {
            out.push('-');
        }
        out.push(c);
    }
    out
}

/// The persisted list of redemption codes.
#[derive(Debug, Clone)]
pub struct CodeRegistry {
    store: JsonStore,
}

impl CodeRegistry {
    /// Create a registry over the given store context.
    #[must_use]
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    /// Generate a new `Active` code and append it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if persisting fails.
    pub async fn generate(&self) -> Result<Code, RegistryError> {
        let code = Code::active(generate_code());
        let entry = code.clone();
        let total = self
            .store
            .update_list(keys::CODES, move |codes: &mut Vec<Code>| {
                codes.push(entry);
                Edit::Commit(codes.len())
            })
            .await?;

        info!(code = %code.code, total, "code generated");
        Ok(code)
    }

    /// Generate `count` codes, each persisted as it is created.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if persisting fails; codes generated
    /// before the failure stay stored.
    pub async fn generate_batch(&self, count: usize) -> Result<Vec<Code>, RegistryError> {
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            codes.push(self.generate().await?);
        }
        Ok(codes)
    }

    /// Verify a submitted code, claiming it if it is `Active`.
    ///
    /// Matching is exact, dashes and case included. Only the `Verified`
    /// outcome writes to the store.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if reading or persisting fails.
    pub async fn verify(&self, submitted: &str) -> Result<VerifyResult, RegistryError> {
        let result = self
            .store
            .update_list(keys::CODES, |codes: &mut Vec<Code>| {
                match codes.iter_mut().find(|c| c.code == submitted) {
                    None => Edit::Skip(VerifyResult::NotFound),
                    Some(entry) if entry.status == CodeStatus::Claimed => {
                        Edit::Skip(VerifyResult::AlreadyClaimed)
                    }
                    Some(entry) => {
                        entry.status = CodeStatus::Claimed;
                        Edit::Commit(VerifyResult::Verified)
                    }
                }
            })
            .await?;

        match result {
            VerifyResult::Verified => info!(code = %submitted, "code claimed"),
            VerifyResult::AlreadyClaimed => info!(code = %submitted, "code already claimed"),
            VerifyResult::NotFound => info!("unknown code submitted"),
        }
        Ok(result)
    }

    /// Look up the first entry matching `code` without changing it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if reading fails.
    pub async fn find(&self, code: &str) -> Result<Option<Code>, RegistryError> {
        Ok(self.load().await?.into_iter().find(|c| c.code == code))
    }

    /// All codes, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if reading fails.
    pub async fn list(&self) -> Result<Vec<Code>, RegistryError> {
        let mut codes = self.load().await?;
        codes.reverse();
        Ok(codes)
    }

    /// Remove every code.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the delete fails.
    pub async fn clear_all(&self) -> Result<(), RegistryError> {
        self.store.remove(keys::CODES).await?;
        info!("all codes cleared");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Code>, RegistryError> {
        Ok(self.store.get_list(keys::CODES).await?)
    }
}
