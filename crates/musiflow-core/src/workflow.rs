//! The claim workflow.
//!
//! A claimant moves through two pages. On the verification page they submit
//! a code; a successful verification clears the `offerClaimed` flag and
//! redirects to the claim-options page. There they either take an account
//! from stock (branch A) or submit an existing account (branch B). Either
//! branch sets `offerClaimed` on completion, and the claim-options page
//! refuses entry while the flag is set.
//!
//! ```text
//! AwaitingCode -> CodeVerified -> ChoosingClaimMethod -+-> AllocatingStock -------> Completed
//!                                        ^             |        | out of stock
//!                                        +-------------|--------+
//!                                                      +-> SubmittingCredentials -> Completed
//! ```
//!
//! Simulated processing time is a [`Delays`] value awaited inside each
//! operation. Dropping an operation's future during its delay drops the
//! deferred step with it: nothing scheduled after the delay happens.

use std::time::Duration;

use tracing::{info, warn};

use crate::code::{CodeRegistry, VerifyResult};
use crate::credential::{Credential, CredentialLog};
use crate::error::ClaimError;
use crate::stock::{StockRecord, StockRegistry};
use crate::store::{keys, JsonStore};

/// Simulated processing times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    /// Between a verified code and the redirect to claim options.
    pub verify_redirect: Duration,
    /// Before stock is allocated.
    pub allocation: Duration,
    /// Between recording credentials and completing the claim.
    pub credential_submission: Duration,
    /// Simulated account creation on signup.
    pub signup: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            verify_redirect: Duration::from_millis(1000),
            allocation: Duration::from_millis(3000),
            credential_submission: Duration::from_millis(2000),
            signup: Duration::from_millis(1500),
        }
    }
}

impl Delays {
    /// No waiting at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            verify_redirect: Duration::ZERO,
            allocation: Duration::ZERO,
            credential_submission: Duration::ZERO,
            signup: Duration::ZERO,
        }
    }
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Where a claimant is sent next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// The claim-options page.
    ClaimOptions,
    /// The landing page.
    Home,
}

/// Position in the claim workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    AwaitingCode,
    CodeVerified,
    ChoosingClaimMethod,
    AllocatingStock,
    SubmittingCredentials,
    Completed,
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::AwaitingCode => "awaiting a code",
            Self::CodeVerified => "code verified",
            Self::ChoosingClaimMethod => "choosing a claim method",
            Self::AllocatingStock => "allocating stock",
            Self::SubmittingCredentials => "submitting credentials",
            Self::Completed => "completed",
        })
    }
}

/// Result of submitting a code on the verification page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitCodeOutcome {
    /// The code was claimed; the claimant is redirected.
    Verified { redirect: Navigation },
    /// The code exists but was redeemed before.
    AlreadyClaimed,
    /// No such code.
    NotFound,
}

impl SubmitCodeOutcome {
    /// Message shown under the code field.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Verified { .. } => "Code Verified! Redirecting...",
            Self::AlreadyClaimed => "This code has already been claimed.",
            Self::NotFound => "Invalid Code",
        }
    }
}

/// Result of opening the claim-options page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOptionsEntry {
    /// Both claim methods are offered.
    Ready,
    /// The offer was already claimed this session.
    Redirect(Navigation),
}

/// Result of asking for an account from stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// An account was handed out.
    Allocated(StockRecord),
    /// Nothing available; the claimant may try again.
    OutOfStock,
    /// Another page completed a claim first; the claimant is sent home.
    AlreadyClaimed { redirect: Navigation },
}

impl AllocationOutcome {
    /// Notice shown to the claimant.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Allocated(_) => "Your Premium account is ready.",
            Self::OutOfStock => {
                "Sorry! No accounts are currently available in stock. Please try again later."
            }
            Self::AlreadyClaimed { .. } => "This offer has already been claimed.",
        }
    }
}

/// Receipt for an "existing account" submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// What was recorded.
    pub credential: Credential,
    /// Where the claimant goes next.
    pub redirect: Navigation,
}

impl SubmissionReceipt {
    /// Notice shown to the claimant.
    #[must_use]
    pub fn message(&self) -> &'static str {
        "Request Sent Successfully! Please check your email for confirmation."
    }
}

/// Drives one claimant's pass through the verification and claim-options
/// pages.
#[derive(Debug)]
pub struct ClaimWorkflow {
    store: JsonStore,
    codes: CodeRegistry,
    stock: StockRegistry,
    credentials: CredentialLog,
    delays: Delays,
    state: ClaimState,
}

impl ClaimWorkflow {
    /// Start a workflow on the given store context.
    #[must_use]
    pub fn new(store: JsonStore, delays: Delays) -> Self {
        Self {
            codes: CodeRegistry::new(store.clone()),
            stock: StockRegistry::new(store.clone()),
            credentials: CredentialLog::new(store.clone()),
            store,
            delays,
            state: ClaimState::AwaitingCode,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClaimState {
        self.state
    }

    /// Whether the offer has been claimed this session.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::Store`] if the flag cannot be read.
    pub async fn offer_claimed(&self) -> Result<bool, ClaimError> {
        Ok(self.store.get_flag(keys::OFFER_CLAIMED).await?)
    }

    /// Submit a code on the verification page.
    ///
    /// On success the code is claimed and the `offerClaimed` flag cleared
    /// immediately; the redirect is returned after the verify delay.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::InvalidTransition`] unless awaiting a code.
    /// - [`ClaimError::Registry`] / [`ClaimError::Store`] on storage failure.
    pub async fn submit_code(&mut self, submitted: &str) -> Result<SubmitCodeOutcome, ClaimError> {
        self.expect_state(ClaimState::AwaitingCode, "submit a code")?;

        match self.codes.verify(submitted).await? {
            VerifyResult::NotFound => Ok(SubmitCodeOutcome::NotFound),
            VerifyResult::AlreadyClaimed => Ok(SubmitCodeOutcome::AlreadyClaimed),
            VerifyResult::Verified => {
                self.store.remove(keys::OFFER_CLAIMED).await?;
                self.state = ClaimState::CodeVerified;
                info!("claim session started");

                pause(self.delays.verify_redirect).await;
                Ok(SubmitCodeOutcome::Verified {
                    redirect: Navigation::ClaimOptions,
                })
            }
        }
    }

    /// Open the claim-options page.
    ///
    /// Refuses entry while `offerClaimed` is set, which covers back
    /// navigation and direct URL entry after a completed claim.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::Store`] if the flag cannot be read.
    pub async fn open_claim_options(&mut self) -> Result<ClaimOptionsEntry, ClaimError> {
        if self.offer_claimed().await? {
            info!("claim options refused, offer already claimed");
            return Ok(ClaimOptionsEntry::Redirect(Navigation::Home));
        }
        self.state = ClaimState::ChoosingClaimMethod;
        Ok(ClaimOptionsEntry::Ready)
    }

    /// Branch A: take an account from stock.
    ///
    /// Waits the allocation delay, then allocates. The flag is set before
    /// the stock is touched and cleared again if nothing was handed out, so
    /// a record marked `Given` always comes back to the caller. Out of stock
    /// and failures return to choosing a method.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::InvalidTransition`] unless choosing a claim method.
    /// - [`ClaimError::Registry`] / [`ClaimError::Store`] on storage failure.
    pub async fn claim_available_account(&mut self) -> Result<AllocationOutcome, ClaimError> {
        self.expect_state(ClaimState::ChoosingClaimMethod, "claim an available account")?;

        if self.offer_claimed().await? {
            self.state = ClaimState::AwaitingCode;
            return Ok(AllocationOutcome::AlreadyClaimed {
                redirect: Navigation::Home,
            });
        }

        self.state = ClaimState::AllocatingStock;
        pause(self.delays.allocation).await;

        let outcome = self.allocate_under_flag().await;
        self.state = match &outcome {
            Ok(AllocationOutcome::Allocated(_)) => ClaimState::Completed,
            _ => ClaimState::ChoosingClaimMethod,
        };
        outcome
    }

    async fn allocate_under_flag(&self) -> Result<AllocationOutcome, ClaimError> {
        self.store.set_flag(keys::OFFER_CLAIMED).await?;
        match self.stock.allocate().await {
            Ok(Some(record)) => Ok(AllocationOutcome::Allocated(record)),
            Ok(None) => {
                self.store.remove(keys::OFFER_CLAIMED).await?;
                Ok(AllocationOutcome::OutOfStock)
            }
            Err(e) => {
                if let Err(clear) = self.store.remove(keys::OFFER_CLAIMED).await {
                    warn!(error = %clear, "offer flag left set after failed allocation");
                }
                Err(e.into())
            }
        }
    }

    /// Branch B: submit an existing account.
    ///
    /// The credentials are recorded before the delay; the flag is set and
    /// the redirect returned after it.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::InvalidTransition`] unless choosing a claim method.
    /// - [`ClaimError::Registry`] / [`ClaimError::Store`] on storage failure.
    pub async fn submit_existing_account(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<SubmissionReceipt, ClaimError> {
        self.expect_state(ClaimState::ChoosingClaimMethod, "submit an existing account")?;

        let credential = self.credentials.record(email, password).await?;
        self.state = ClaimState::SubmittingCredentials;

        pause(self.delays.credential_submission).await;

        self.store.set_flag(keys::OFFER_CLAIMED).await?;
        self.state = ClaimState::Completed;
        Ok(SubmissionReceipt {
            credential,
            redirect: Navigation::Home,
        })
    }

    fn expect_state(&self, expected: ClaimState, action: &'static str) -> Result<(), ClaimError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ClaimError::InvalidTransition {
                from: self.state,
                action,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use musiflow_storage::{MemoryBackend, StorageBackend, StorageError};

    use super::*;
    use crate::code::CodeStatus;

    fn workflow() -> (JsonStore, ClaimWorkflow) {
        let store = JsonStore::in_memory();
        (store.clone(), ClaimWorkflow::new(store, Delays::none()))
    }

    async fn verified(store: &JsonStore) -> ClaimWorkflow {
        let code = CodeRegistry::new(store.clone()).generate().await.unwrap();
        let mut flow = ClaimWorkflow::new(store.clone(), Delays::none());
        let outcome = flow.submit_code(&code.code).await.unwrap();
        assert_eq!(
            outcome,
            SubmitCodeOutcome::Verified {
                redirect: Navigation::ClaimOptions
            }
        );
        assert_eq!(flow.open_claim_options().await.unwrap(), ClaimOptionsEntry::Ready);
        flow
    }

    #[tokio::test]
    async fn verified_code_starts_a_fresh_session() {
        let (store, mut flow) = workflow();
        store.set_flag(keys::OFFER_CLAIMED).await.unwrap();
        let codes = CodeRegistry::new(store.clone());
        let code = codes.generate().await.unwrap();

        let outcome = flow.submit_code(&code.code).await.unwrap();
        assert_eq!(outcome.message(), "Code Verified! Redirecting...");
        assert_eq!(flow.state(), ClaimState::CodeVerified);
        assert!(!flow.offer_claimed().await.unwrap());
        assert_eq!(
            codes.find(&code.code).await.unwrap().unwrap().status,
            CodeStatus::Claimed
        );
    }

    #[tokio::test]
    async fn failed_verification_stays_awaiting_code() {
        let (store, mut flow) = workflow();
        store.set_flag(keys::OFFER_CLAIMED).await.unwrap();

        let outcome = flow.submit_code("NOPE-NOPE-NOPE-NOPE").await.unwrap();
        assert_eq!(outcome, SubmitCodeOutcome::NotFound);
        assert_eq!(outcome.message(), "Invalid Code");
        assert_eq!(flow.state(), ClaimState::AwaitingCode);
        assert!(flow.offer_claimed().await.unwrap());

        let code = CodeRegistry::new(store.clone()).generate().await.unwrap();
        let mut other = ClaimWorkflow::new(store.clone(), Delays::none());
        other.submit_code(&code.code).await.unwrap();

        let again = flow.submit_code(&code.code).await.unwrap();
        assert_eq!(again, SubmitCodeOutcome::AlreadyClaimed);
        assert_eq!(again.message(), "This code has already been claimed.");
        assert_eq!(flow.state(), ClaimState::AwaitingCode);
    }

    #[tokio::test]
    async fn branch_a_allocates_and_completes() {
        let (store, _) = workflow();
        StockRegistry::new(store.clone())
            .add_stock("a@x.com", "pw1")
            .await
            .unwrap();
        let mut flow = verified(&store).await;

        let outcome = flow.claim_available_account().await.unwrap();
        let AllocationOutcome::Allocated(record) = outcome else {
            panic!("expected an allocation, got {outcome:?}");
        };
        assert_eq!((record.email.as_str(), record.password.as_str()), ("a@x.com", "pw1"));
        assert_eq!(flow.state(), ClaimState::Completed);
        assert!(flow.offer_claimed().await.unwrap());
    }

    #[tokio::test]
    async fn branch_a_out_of_stock_is_retryable() {
        let (store, _) = workflow();
        let mut flow = verified(&store).await;

        let outcome = flow.claim_available_account().await.unwrap();
        assert_eq!(outcome, AllocationOutcome::OutOfStock);
        assert_eq!(flow.state(), ClaimState::ChoosingClaimMethod);
        assert!(!flow.offer_claimed().await.unwrap());

        StockRegistry::new(store.clone())
            .add_stock("late@x.com", "pw")
            .await
            .unwrap();
        assert!(matches!(
            flow.claim_available_account().await.unwrap(),
            AllocationOutcome::Allocated(_)
        ));
    }

    /// Refuses every write to the offer flag.
    struct FlagWriteFails(MemoryBackend);

    #[async_trait::async_trait]
    impl StorageBackend for FlagWriteFails {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.0.get(key).await
        }

        async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            if key == keys::OFFER_CLAIMED {
                return Err(StorageError::Write {
                    key: key.to_owned(),
                    reason: "disk full".to_owned(),
                });
            }
            self.0.put(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.0.delete(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.0.list(prefix).await
        }
    }

    #[tokio::test]
    async fn branch_a_flag_failure_hands_out_nothing() {
        let store = JsonStore::new(Arc::new(FlagWriteFails(MemoryBackend::new())));
        let stock = StockRegistry::new(store.clone());
        stock.add_stock("a@x.com", "pw1").await.unwrap();

        let mut flow = ClaimWorkflow::new(store, Delays::none());
        assert_eq!(flow.open_claim_options().await.unwrap(), ClaimOptionsEntry::Ready);

        assert!(matches!(
            flow.claim_available_account().await,
            Err(ClaimError::Store(_))
        ));
        assert_eq!(flow.state(), ClaimState::ChoosingClaimMethod);
        assert_eq!(stock.available_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claimed_flag_blocks_reentry_until_new_code() {
        let (store, _) = workflow();
        let stock = StockRegistry::new(store.clone());
        stock.add_stock("a@x.com", "1").await.unwrap();
        stock.add_stock("b@x.com", "2").await.unwrap();

        let mut flow = verified(&store).await;
        flow.claim_available_account().await.unwrap();

        let mut back_button = ClaimWorkflow::new(store.clone(), Delays::none());
        assert_eq!(
            back_button.open_claim_options().await.unwrap(),
            ClaimOptionsEntry::Redirect(Navigation::Home)
        );
        assert!(matches!(
            back_button.claim_available_account().await,
            Err(ClaimError::InvalidTransition {
                from: ClaimState::AwaitingCode,
                ..
            })
        ));
        assert_eq!(stock.available_count().await.unwrap(), 1);

        let mut next = verified(&store).await;
        assert!(matches!(
            next.claim_available_account().await.unwrap(),
            AllocationOutcome::Allocated(_)
        ));
    }

    #[tokio::test]
    async fn branch_a_rechecks_flag_set_by_another_page() {
        let (store, _) = workflow();
        StockRegistry::new(store.clone())
            .add_stock("a@x.com", "1")
            .await
            .unwrap();
        let mut flow = verified(&store).await;

        store.open_context().set_flag(keys::OFFER_CLAIMED).await.unwrap();

        assert_eq!(
            flow.claim_available_account().await.unwrap(),
            AllocationOutcome::AlreadyClaimed {
                redirect: Navigation::Home
            }
        );
        assert_eq!(
            StockRegistry::new(store).available_count().await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn branch_b_records_and_completes() {
        let (store, _) = workflow();
        let mut flow = verified(&store).await;

        let receipt = flow.submit_existing_account("b@y.com", "pw2").await.unwrap();
        assert_eq!(receipt.redirect, Navigation::Home);
        assert_eq!(flow.state(), ClaimState::Completed);
        assert!(flow.offer_claimed().await.unwrap());

        let log = CredentialLog::new(store).list().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].email, "b@y.com");
        assert_eq!(log[0].password, "pw2");
        assert!(!log[0].submitted_at.is_empty());
    }

    #[tokio::test]
    async fn branches_are_mutually_exclusive() {
        let (store, _) = workflow();
        StockRegistry::new(store.clone())
            .add_stock("a@x.com", "1")
            .await
            .unwrap();
        let mut flow = verified(&store).await;
        flow.submit_existing_account("b@y.com", "pw2").await.unwrap();

        assert!(matches!(
            flow.claim_available_account().await,
            Err(ClaimError::InvalidTransition {
                from: ClaimState::Completed,
                ..
            })
        ));
        assert!(flow.submit_existing_account("c@y.com", "pw3").await.is_err());
        assert_eq!(CredentialLog::new(store).list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn branches_require_claim_options() {
        let (_, mut flow) = workflow();
        let err = flow.claim_available_account().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot claim an available account while awaiting a code"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_allocation_during_delay_allocates_nothing() {
        let store = JsonStore::in_memory();
        let stock = StockRegistry::new(store.clone());
        stock.add_stock("a@x.com", "1").await.unwrap();
        let code = CodeRegistry::new(store.clone()).generate().await.unwrap();

        let mut flow = ClaimWorkflow::new(store.clone(), Delays::default());
        flow.submit_code(&code.code).await.unwrap();
        flow.open_claim_options().await.unwrap();

        let navigated_away = tokio::time::timeout(
            Duration::from_millis(500),
            flow.claim_available_account(),
        )
        .await;
        assert!(navigated_away.is_err());
        assert_eq!(flow.state(), ClaimState::AllocatingStock);
        assert_eq!(stock.available_count().await.unwrap(), 1);
        assert!(!flow.offer_claimed().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_are_recorded_before_the_delay() {
        let store = JsonStore::in_memory();
        let mut flow = verified(&store).await;
        flow.delays = Delays::default();

        let navigated_away = tokio::time::timeout(
            Duration::from_millis(100),
            flow.submit_existing_account("b@y.com", "pw2"),
        )
        .await;
        assert!(navigated_away.is_err());
        assert_eq!(CredentialLog::new(store).list().await.unwrap().len(), 1);
        assert!(!flow.offer_claimed().await.unwrap());
    }
}
