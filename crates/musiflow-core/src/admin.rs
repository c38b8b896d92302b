//! Admin projections.
//!
//! The admin page shows three paginated panels (codes, stock, credentials),
//! newest first, each with its own page cursor. A cursor is clamped to the
//! panel's page range on every render, so shrinking a list never leaves the
//! cursor past the last page. Change notifications re-render only the panel
//! whose key changed.

use std::ops::Range;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::code::{Code, CodeRegistry};
use crate::credential::{Credential, CredentialLog};
use crate::error::RegistryError;
use crate::stock::{StockRecord, StockRegistry};
use crate::store::{keys, JsonStore, StoreChange};

/// Rows per admin page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// A page cursor over a list of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    page_size: usize,
    current: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Paginator {
    /// A cursor on page 1. A zero page size is treated as 1.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            current: 1,
        }
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The 1-based current page.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    /// `max(1, ceil(count / page_size))`.
    #[must_use]
    pub fn total_pages(&self, count: usize) -> usize {
        count.div_ceil(self.page_size).max(1)
    }

    /// Pull the cursor back onto the last page if the list shrank.
    pub fn clamp(&mut self, count: usize) -> usize {
        self.current = self.current.clamp(1, self.total_pages(count));
        self.current
    }

    /// Point at `page` before the list length is known. Page 0 reads as 1;
    /// the upper bound is applied by the next [`clamp`](Self::clamp).
    pub fn request(&mut self, page: usize) {
        self.current = page.max(1);
    }

    /// Move to `page`, clamped to `[1, total_pages(count)]`.
    pub fn go_to(&mut self, page: usize, count: usize) -> usize {
        self.current = page;
        self.clamp(count)
    }

    /// Index range of the current page within a list of `count` items.
    #[must_use]
    pub fn window(&self, count: usize) -> Range<usize> {
        let start = self
            .current
            .saturating_sub(1)
            .saturating_mul(self.page_size)
            .min(count);
        let end = start.saturating_add(self.page_size).min(count);
        start..end
    }

    /// Clamp to `items.len()` and cut out the current page.
    pub fn paginate<T>(&mut self, mut items: Vec<T>) -> PageView<T> {
        let total_items = items.len();
        let page = self.clamp(total_items);
        let window = self.window(total_items);
        items.truncate(window.end);
        let items = items.split_off(window.start);
        PageView {
            items,
            page,
            total_pages: self.total_pages(total_items),
            total_items,
        }
    }
}

/// One rendered page of a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView<T> {
    pub items: Vec<T>,
    /// 1-based page shown.
    pub page: usize,
    pub total_pages: usize,
    /// Items across all pages.
    pub total_items: usize,
}

/// The three admin panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Codes,
    Stock,
    Credentials,
}

impl Panel {
    pub const ALL: [Self; 3] = [Self::Codes, Self::Stock, Self::Credentials];

    /// The panel that displays `key`, if any.
    #[must_use]
    pub fn for_key(key: &str) -> Option<Self> {
        match key {
            keys::CODES => Some(Self::Codes),
            keys::STOCK => Some(Self::Stock),
            keys::CREDENTIALS => Some(Self::Credentials),
            _ => None,
        }
    }
}

/// A rendered panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelView {
    Codes(PageView<Code>),
    Stock(PageView<StockRecord>),
    Credentials(PageView<Credential>),
}

impl PanelView {
    #[must_use]
    pub fn panel(&self) -> Panel {
        match self {
            Self::Codes(_) => Panel::Codes,
            Self::Stock(_) => Panel::Stock,
            Self::Credentials(_) => Panel::Credentials,
        }
    }
}

/// The admin's answer to "delete everything?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

/// The admin page: registries plus one page cursor per panel.
#[derive(Debug)]
pub struct AdminView {
    store: JsonStore,
    codes: CodeRegistry,
    stock: StockRegistry,
    credentials: CredentialLog,
    code_pages: Paginator,
    stock_pages: Paginator,
    credential_pages: Paginator,
}

impl AdminView {
    /// Open the admin page on the given store context.
    #[must_use]
    pub fn new(store: JsonStore, page_size: usize) -> Self {
        Self {
            codes: CodeRegistry::new(store.clone()),
            stock: StockRegistry::new(store.clone()),
            credentials: CredentialLog::new(store.clone()),
            store,
            code_pages: Paginator::new(page_size),
            stock_pages: Paginator::new(page_size),
            credential_pages: Paginator::new(page_size),
        }
    }

    #[must_use]
    pub fn codes(&self) -> &CodeRegistry {
        &self.codes
    }

    #[must_use]
    pub fn stock(&self) -> &StockRegistry {
        &self.stock
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialLog {
        &self.credentials
    }

    /// Render one panel at its current cursor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the panel's list cannot be read.
    pub async fn render(&mut self, panel: Panel) -> Result<PanelView, RegistryError> {
        let view = match panel {
            Panel::Codes => PanelView::Codes(self.code_pages.paginate(self.codes.list().await?)),
            Panel::Stock => PanelView::Stock(self.stock_pages.paginate(self.stock.list().await?)),
            Panel::Credentials => PanelView::Credentials(
                self.credential_pages
                    .paginate(self.credentials.list().await?),
            ),
        };
        debug!(panel = ?panel, "panel rendered");
        Ok(view)
    }

    /// Move a panel's cursor and render it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the panel's list cannot be read.
    pub async fn show_page(&mut self, panel: Panel, page: usize) -> Result<PanelView, RegistryError> {
        match panel {
            Panel::Codes => self.code_pages.request(page),
            Panel::Stock => self.stock_pages.request(page),
            Panel::Credentials => self.credential_pages.request(page),
        }
        self.render(panel).await
    }

    /// Page cursor for a panel.
    #[must_use]
    pub fn cursor(&self, panel: Panel) -> Paginator {
        match panel {
            Panel::Codes => self.code_pages,
            Panel::Stock => self.stock_pages,
            Panel::Credentials => self.credential_pages,
        }
    }

    /// Re-render the panel affected by a store change, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the panel's list cannot be read.
    pub async fn handle_change(&mut self, change: &StoreChange) -> Result<Option<PanelView>, RegistryError> {
        match Panel::for_key(&change.key) {
            Some(panel) => Ok(Some(self.render(panel).await?)),
            None => Ok(None),
        }
    }

    /// Wipe codes, stock, and credentials together.
    ///
    /// Does nothing unless confirmed. Returns whether anything was cleared.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if a delete fails; registries
    /// cleared before the failure stay cleared.
    pub async fn clear_all(&mut self, confirmation: Confirmation) -> Result<bool, RegistryError> {
        if confirmation == Confirmation::Declined {
            return Ok(false);
        }
        self.codes.clear_all().await?;
        self.credentials.clear_all().await?;
        self.stock.clear_all().await?;
        for panel in Panel::ALL {
            self.render(panel).await?;
        }
        info!("admin cleared all registries");
        Ok(true)
    }

    /// Subscribe to the change feed this view renders from.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    /// Follow `changes`, handing each re-rendered panel to `on_render`,
    /// until `shutdown` turns true or the feed closes.
    ///
    /// Take `changes` from [`subscribe`](Self::subscribe) before any write
    /// that must be observed. A lagging subscriber re-renders every panel.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if a re-render fails.
    pub async fn watch<F>(
        &mut self,
        mut changes: broadcast::Receiver<StoreChange>,
        mut shutdown: watch::Receiver<bool>,
        mut on_render: F,
    ) -> Result<(), RegistryError>
    where
        F: FnMut(&PanelView),
    {
        info!("admin view watching for changes");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("admin view stopped watching");
                        return Ok(());
                    }
                }
                received = changes.recv() => match received {
                    Ok(change) => {
                        if let Some(view) = self.handle_change(&change).await? {
                            on_render(&view);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "admin view lagged behind change feed, re-rendering all");
                        for panel in Panel::ALL {
                            let view = self.render(panel).await?;
                            on_render(&view);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use musiflow_storage::{StorageBackend, StorageError};

    use super::*;
    use crate::workflow::{ClaimWorkflow, Delays};

    /// Every read fails.
    struct Unreadable;

    #[async_trait::async_trait]
    impl StorageBackend for Unreadable {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Err(StorageError::Read {
                key: key.to_owned(),
                reason: "io error".to_owned(),
            })
        }

        async fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StorageError> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn list(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn codes_of(view: PanelView) -> PageView<Code> {
        match view {
            PanelView::Codes(page) => page,
            other => panic!("expected codes panel, got {other:?}"),
        }
    }

    #[test]
    fn total_pages_has_a_floor_of_one() {
        let pages = Paginator::new(10);
        assert_eq!(pages.total_pages(0), 1);
        assert_eq!(pages.total_pages(1), 1);
        assert_eq!(pages.total_pages(10), 1);
        assert_eq!(pages.total_pages(11), 2);
        assert_eq!(pages.total_pages(95), 10);
    }

    #[test]
    fn cursor_is_clamped_after_shrink() {
        let mut pages = Paginator::new(10);
        assert_eq!(pages.go_to(5, 50), 5);
        assert_eq!(pages.clamp(3), 1);
        assert_eq!(pages.go_to(0, 50), 1);
        assert_eq!(pages.go_to(9, 25), 3);
    }

    #[tokio::test]
    async fn failed_render_leaves_a_usable_cursor() {
        let mut admin = AdminView::new(JsonStore::new(Arc::new(Unreadable)), 10);

        assert!(admin.show_page(Panel::Codes, 0).await.is_err());
        let cursor = admin.cursor(Panel::Codes);
        assert_eq!(cursor.current(), 1);
        assert_eq!(cursor.window(5), 0..5);
    }

    #[test]
    fn window_covers_partial_last_page() {
        let mut pages = Paginator::new(10);
        pages.go_to(3, 25);
        assert_eq!(pages.window(25), 20..25);
        assert_eq!(Paginator::new(0).page_size(), 1);
    }

    #[test]
    fn paginate_cuts_the_current_page() {
        let mut pages = Paginator::new(4);
        pages.go_to(2, 10);
        let view = pages.paginate((0..10).collect::<Vec<_>>());
        assert_eq!(view.items, vec![4, 5, 6, 7]);
        assert_eq!((view.page, view.total_pages, view.total_items), (2, 3, 10));

        let empty = pages.paginate(Vec::<u8>::new());
        assert!(empty.items.is_empty());
        assert_eq!((empty.page, empty.total_pages), (1, 1));
    }

    #[tokio::test]
    async fn panels_paginate_newest_first_with_independent_cursors() {
        let mut admin = AdminView::new(JsonStore::in_memory(), DEFAULT_PAGE_SIZE);
        let generated = admin.codes().generate_batch(23).await.unwrap();
        admin.stock().add_stock("a@x.com", "1").await.unwrap();

        let first = codes_of(admin.render(Panel::Codes).await.unwrap());
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.items[0], generated[22]);
        assert_eq!(first.total_pages, 3);

        let last = codes_of(admin.show_page(Panel::Codes, 3).await.unwrap());
        assert_eq!(last.items.len(), 3);
        assert_eq!(last.items[2], generated[0]);

        assert_eq!(admin.cursor(Panel::Codes).current(), 3);
        assert_eq!(admin.cursor(Panel::Stock).current(), 1);
    }

    #[tokio::test]
    async fn cursor_resets_when_list_is_cleared() {
        let mut admin = AdminView::new(JsonStore::in_memory(), DEFAULT_PAGE_SIZE);
        admin.codes().generate_batch(45).await.unwrap();
        admin.show_page(Panel::Codes, 5).await.unwrap();

        admin.codes().clear_all().await.unwrap();
        admin.codes().generate_batch(3).await.unwrap();

        let view = codes_of(admin.render(Panel::Codes).await.unwrap());
        assert_eq!(view.page, 1);
        assert_eq!(view.items.len(), 3);
    }

    #[tokio::test]
    async fn change_rerenders_only_the_affected_panel() {
        let store = JsonStore::in_memory();
        let mut admin = AdminView::new(store.clone(), DEFAULT_PAGE_SIZE);

        let stock_view = admin
            .handle_change(&StoreChange {
                key: keys::STOCK.to_owned(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stock_view.panel(), Panel::Stock);

        let flag = admin
            .handle_change(&StoreChange {
                key: keys::OFFER_CLAIMED.to_owned(),
            })
            .await
            .unwrap();
        assert!(flag.is_none());
    }

    #[tokio::test]
    async fn bulk_clear_requires_confirmation() {
        let store = JsonStore::in_memory();
        let mut admin = AdminView::new(store.clone(), DEFAULT_PAGE_SIZE);
        admin.codes().generate_batch(12).await.unwrap();
        admin.stock().add_stock("a@x.com", "1").await.unwrap();
        admin.credentials().record("b@y.com", "2").await.unwrap();

        assert!(!admin.clear_all(Confirmation::Declined).await.unwrap());
        assert_eq!(admin.codes().list().await.unwrap().len(), 12);

        assert!(admin.clear_all(Confirmation::Confirmed).await.unwrap());
        assert!(admin.codes().list().await.unwrap().is_empty());
        assert!(admin.stock().list().await.unwrap().is_empty());
        assert!(admin.credentials().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_follows_claims_from_another_context() {
        let admin_tab = JsonStore::in_memory();
        let claim_tab = admin_tab.open_context();
        let mut admin = AdminView::new(admin_tab, DEFAULT_PAGE_SIZE);
        let code = admin.codes().generate().await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();

        let changes = admin.subscribe();
        let watcher = tokio::spawn(async move {
            admin
                .watch(changes, shutdown_rx, |view| {
                    let _ = seen_tx.send(view.clone());
                })
                .await
        });

        let mut flow = ClaimWorkflow::new(claim_tab, Delays::none());
        flow.submit_code(&code.code).await.unwrap();

        // Verification writes `codes`, then removes `offerClaimed`; only the
        // first re-renders a panel.
        let view = codes_of(seen_rx.recv().await.unwrap());
        assert_eq!(view.items[0].code, code.code);
        assert_eq!(view.items[0].status, crate::code::CodeStatus::Claimed);

        shutdown_tx.send(true).unwrap();
        watcher.await.unwrap().unwrap();
        assert!(seen_rx.try_recv().is_err());
    }
}
