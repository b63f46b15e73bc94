//! Inventory traversal
//!
//! Drives the crawl as an explicit state machine:
//!
//! ```text
//! Start → ListAccounts → FilterAccounts → NextAccount
//!   NextAccount → ResolveKeys → ListContainers → FilterContainers → NextContainer
//!     NextContainer → ResumeOrStartUnit → PageObjects ⇄ AppendToChunk
//!       AppendToChunk (last page) → PublishChunks → MarkUnitComplete → NextContainer
//!     NextContainer (none left) → MarkAccountComplete → NextAccount
//!   NextAccount (none left) → Done
//! ```
//!
//! Processing is strictly sequential: one container's pages are exhausted
//! and published before the next container starts, and every container gets
//! its own `ChunkWriter`.
//!
//! A run without a reconciler still completes units, but records them as
//! unpublished. A later publishing run revisits those accounts and goes
//! straight from `ResumeOrStartUnit` to `PublishChunks` for each such unit.

use super::chunk::{ChunkWriter, DEFAULT_BYTE_BUDGET};
use super::error::{InventoryError, Result};
use super::filter::{should_scan_account, should_scan_container, FilterSpec};
use super::progress::{ProgressTracker, UnitStatus};
use super::publish::{PublishOutcome, UploadReconciler};
use super::retry::RetryPolicy;
use super::source::{AccountSource, InventoryLister, KeyResolver, DEFAULT_PAGE_SIZE};
use super::types::{Account, Container, ObjectRecord, Page, RawObject};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Settings the traversal needs; built from `InventoryConfig`.
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Local root for chunk files
    pub output_root: PathBuf,
    /// Byte budget per chunk
    pub byte_budget: u64,
    /// Objects requested per listing page
    pub page_size: usize,
    /// Retry policy for listing calls
    pub retry: RetryPolicy,
}

impl TraversalConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            byte_budget: DEFAULT_BYTE_BUDGET,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// The external services a traversal talks to
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountSource>,
    pub keys: Arc<dyn KeyResolver>,
    pub lister: Arc<dyn InventoryLister>,
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub accounts_listed: u64,
    pub accounts_filtered: u64,
    pub accounts_already_complete: u64,
    pub accounts_skipped: u64,
    pub accounts_failed: u64,
    pub accounts_scanned: u64,
    pub containers_filtered: u64,
    pub containers_already_complete: u64,
    pub containers_resumed: u64,
    pub containers_failed: u64,
    pub containers_scanned: u64,
    pub pages: u64,
    pub objects: u64,
    pub chunks_written: u64,
    pub chunks_created: u64,
    pub chunks_skipped: u64,
    /// Units (`account` or `account/container`) whose listing failed
    pub failed_units: Vec<String>,
    pub duration_ms: u64,
}

impl RunSummary {
    /// True when nothing was left unfinished because of a listing failure
    pub fn is_clean(&self) -> bool {
        self.failed_units.is_empty()
    }
}

/// A container scan in flight
#[derive(Debug)]
pub struct UnitScan {
    pub account: Account,
    pub writer: ChunkWriter,
    /// Continuation of the next page; `None` before the first page
    pub cursor: Option<String>,
    pub pages: u64,
    pub objects: u64,
}

impl UnitScan {
    pub fn container(&self) -> &Container {
        self.writer.container()
    }

    pub fn unit_key(&self) -> String {
        self.writer.container().unit_key()
    }
}

/// States of the crawl
#[derive(Debug)]
pub enum TraversalState {
    Start,
    ListAccounts,
    FilterAccounts(Vec<Account>),
    NextAccount,
    ResolveKeys(Account),
    ListContainers(Account),
    FilterContainers(Account, Vec<Container>),
    NextContainer(Account),
    ResumeOrStartUnit(Account, Container),
    PageObjects(Box<UnitScan>),
    AppendToChunk(Box<UnitScan>, Page<RawObject>),
    PublishChunks(Box<UnitScan>),
    MarkUnitComplete(Box<UnitScan>),
    MarkAccountComplete(Account),
    Done,
}

impl TraversalState {
    pub fn name(&self) -> &'static str {
        match self {
            TraversalState::Start => "Start",
            TraversalState::ListAccounts => "ListAccounts",
            TraversalState::FilterAccounts(_) => "FilterAccounts",
            TraversalState::NextAccount => "NextAccount",
            TraversalState::ResolveKeys(_) => "ResolveKeys",
            TraversalState::ListContainers(_) => "ListContainers",
            TraversalState::FilterContainers(..) => "FilterContainers",
            TraversalState::NextContainer(_) => "NextContainer",
            TraversalState::ResumeOrStartUnit(..) => "ResumeOrStartUnit",
            TraversalState::PageObjects(_) => "PageObjects",
            TraversalState::AppendToChunk(..) => "AppendToChunk",
            TraversalState::PublishChunks(_) => "PublishChunks",
            TraversalState::MarkUnitComplete(_) => "MarkUnitComplete",
            TraversalState::MarkAccountComplete(_) => "MarkAccountComplete",
            TraversalState::Done => "Done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TraversalState::Done)
    }
}

/// Crawls accounts → containers → objects and publishes the manifests
pub struct InventoryTraversal {
    config: TraversalConfig,
    collaborators: Collaborators,
    filter: Option<FilterSpec>,
    reconciler: Option<UploadReconciler>,
    progress: ProgressTracker,
    pending_accounts: VecDeque<Account>,
    pending_containers: VecDeque<Container>,
    account_failed: bool,
    summary: RunSummary,
}

impl InventoryTraversal {
    pub fn new(
        config: TraversalConfig,
        collaborators: Collaborators,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            config,
            collaborators,
            filter: None,
            reconciler: None,
            progress,
            pending_accounts: VecDeque::new(),
            pending_containers: VecDeque::new(),
            account_failed: false,
            summary: RunSummary::default(),
        }
    }

    pub fn with_filter(mut self, filter: Option<FilterSpec>) -> Self {
        self.filter = filter;
        self
    }

    /// Publish chunks through `reconciler`. Without one, chunks stay local.
    pub fn with_reconciler(mut self, reconciler: Option<UploadReconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    fn publishing(&self) -> bool {
        self.reconciler.is_some()
    }

    /// Run the crawl to completion.
    ///
    /// Listing failures are recorded in the summary and the crawl moves on;
    /// publish failures and local I/O errors abort it.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let start = Instant::now();
        let mut state = TraversalState::Start;
        while !state.is_done() {
            debug!(state = state.name(), "Traversal step");
            state = self.step(state).await?;
        }
        self.summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            accounts = self.summary.accounts_scanned,
            containers = self.summary.containers_scanned,
            objects = self.summary.objects,
            chunks = self.summary.chunks_written,
            failed = self.summary.failed_units.len(),
            duration_ms = self.summary.duration_ms,
            "Inventory run finished"
        );
        Ok(self.summary.clone())
    }

    /// Execute one state and return the next.
    pub async fn step(&mut self, state: TraversalState) -> Result<TraversalState> {
        match state {
            TraversalState::Start => Ok(TraversalState::ListAccounts),
            TraversalState::ListAccounts => self.list_accounts().await,
            TraversalState::FilterAccounts(accounts) => Ok(self.filter_accounts(accounts)),
            TraversalState::NextAccount => Ok(match self.pending_accounts.pop_front() {
                Some(account) => TraversalState::ResolveKeys(account),
                None => TraversalState::Done,
            }),
            TraversalState::ResolveKeys(account) => Ok(self.resolve_keys(account).await),
            TraversalState::ListContainers(account) => Ok(self.list_containers(account).await),
            TraversalState::FilterContainers(account, containers) => {
                Ok(self.filter_containers(account, containers))
            }
            TraversalState::NextContainer(account) => {
                Ok(match self.pending_containers.pop_front() {
                    Some(container) => TraversalState::ResumeOrStartUnit(account, container),
                    None => TraversalState::MarkAccountComplete(account),
                })
            }
            TraversalState::ResumeOrStartUnit(account, container) => {
                self.resume_or_start_unit(account, container)
            }
            TraversalState::PageObjects(scan) => Ok(self.page_objects(scan).await),
            TraversalState::AppendToChunk(scan, page) => self.append_to_chunk(scan, page),
            TraversalState::PublishChunks(scan) => self.publish_chunks(scan).await,
            TraversalState::MarkUnitComplete(scan) => self.mark_unit_complete(scan),
            TraversalState::MarkAccountComplete(account) => self.mark_account_complete(account),
            TraversalState::Done => Ok(TraversalState::Done),
        }
    }

    async fn list_accounts(&mut self) -> Result<TraversalState> {
        info!("Getting storage account list");
        let source = Arc::clone(&self.collaborators.accounts);
        let mut accounts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page_cursor = cursor.as_deref();
            let page = self
                .config
                .retry
                .run("accounts", || source.list_accounts(page_cursor))
                .await?;
            accounts.extend(page.items);
            match page.continuation {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        self.summary.accounts_listed = accounts.len() as u64;
        Ok(TraversalState::FilterAccounts(accounts))
    }

    fn filter_accounts(&mut self, accounts: Vec<Account>) -> TraversalState {
        for account in accounts {
            if !should_scan_account(self.filter.as_ref(), &account.name) {
                self.summary.accounts_filtered += 1;
                continue;
            }
            if self.progress.is_finished(&account.name, self.publishing()) {
                info!(account = %account.name, "Account already complete, skipping");
                self.summary.accounts_already_complete += 1;
                continue;
            }
            self.pending_accounts.push_back(account);
        }
        TraversalState::NextAccount
    }

    async fn resolve_keys(&mut self, mut account: Account) -> TraversalState {
        match self.collaborators.keys.resolve_keys(&account).await {
            Ok(keys) if !keys.is_empty() => {
                account.keys = keys;
                info!(
                    account = %account.name,
                    resource_group = account.resource_group().unwrap_or("-"),
                    "Found keys for storage account"
                );
                TraversalState::ListContainers(account)
            }
            Ok(_) => {
                warn!(account = %account.name, "Storage account has no keys, skipping");
                self.summary.accounts_skipped += 1;
                TraversalState::NextAccount
            }
            Err(e) => {
                warn!(account = %account.name, error = %e, "Could not resolve keys, skipping account");
                self.summary.accounts_skipped += 1;
                TraversalState::NextAccount
            }
        }
    }

    async fn list_containers(&mut self, account: Account) -> TraversalState {
        info!(account = %account.name, "Starting file scan on storage account");
        self.account_failed = false;
        let Some(key) = account.primary_key().cloned() else {
            warn!(account = %account.name, "Storage account has no keys, skipping");
            self.summary.accounts_skipped += 1;
            return TraversalState::NextAccount;
        };

        let lister = Arc::clone(&self.collaborators.lister);
        let mut containers = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page_cursor = cursor.as_deref();
            let account_ref = &account;
            let key_ref = &key;
            let result = self
                .config
                .retry
                .run(&account.name, || {
                    lister.list_containers(account_ref, key_ref, page_cursor)
                })
                .await;
            match result {
                Ok(page) => {
                    containers.extend(page.items);
                    match page.continuation {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Err(e) => {
                    error!(account = %account.name, error = %e, "Container listing failed");
                    self.summary.accounts_failed += 1;
                    self.summary.failed_units.push(account.name.clone());
                    return TraversalState::NextAccount;
                }
            }
        }
        TraversalState::FilterContainers(account, containers)
    }

    fn filter_containers(&mut self, account: Account, containers: Vec<Container>) -> TraversalState {
        self.pending_containers.clear();
        for container in containers {
            if should_scan_container(self.filter.as_ref(), &account.name, &container.name) {
                self.pending_containers.push_back(container);
            } else {
                debug!(account = %account.name, container = %container.name, "Container filtered out");
                self.summary.containers_filtered += 1;
            }
        }
        TraversalState::NextContainer(account)
    }

    fn resume_or_start_unit(
        &mut self,
        account: Account,
        container: Container,
    ) -> Result<TraversalState> {
        let key = container.unit_key();
        let root = self.config.output_root.clone();
        let budget = self.config.byte_budget;

        if let Some(marker) = self.progress.get(&key).cloned() {
            let settled = marker.published || !self.publishing();
            match (marker.status, marker.chunk) {
                (UnitStatus::Complete, _) if settled => {
                    info!(account = %account.name, container = %container.name, "Container already complete, skipping");
                    self.summary.containers_already_complete += 1;
                    return Ok(TraversalState::NextContainer(account));
                }
                (status, Some(chunk)) => {
                    match ChunkWriter::resume(root.clone(), container.clone(), budget, chunk) {
                        Ok(writer) => {
                            info!(
                                account = %account.name,
                                container = %container.name,
                                run_id = %writer.run_id(),
                                status = status.as_str(),
                                "Resuming container scan"
                            );
                            self.summary.containers_resumed += 1;
                            let scan = Box::new(UnitScan {
                                account,
                                writer,
                                cursor: marker.cursor,
                                pages: 0,
                                objects: 0,
                            });
                            return Ok(if status == UnitStatus::Started {
                                TraversalState::PageObjects(scan)
                            } else {
                                TraversalState::PublishChunks(scan)
                            });
                        }
                        Err(e) => {
                            warn!(
                                account = %account.name,
                                container = %container.name,
                                error = %e,
                                "Cannot resume container scan, starting over"
                            );
                        }
                    }
                }
                (_, None) => {
                    debug!(unit = %key, "Progress marker without chunk state, starting over");
                }
            }
        }

        info!(account = %account.name, container = %container.name, "Starting file scan on container");
        let writer = ChunkWriter::new(root, container, budget);
        self.progress
            .mark_unit_started(&key, None, writer.state().clone());
        self.progress.save()?;
        Ok(TraversalState::PageObjects(Box::new(UnitScan {
            account,
            writer,
            cursor: None,
            pages: 0,
            objects: 0,
        })))
    }

    async fn page_objects(&mut self, scan: Box<UnitScan>) -> TraversalState {
        let lister = Arc::clone(&self.collaborators.lister);
        let scope = scan.unit_key();
        let page_size = self.config.page_size;

        let result = match scan.account.primary_key() {
            Some(key) => {
                let account = &scan.account;
                let container = scan.container();
                let cursor = scan.cursor.as_deref();
                self.config
                    .retry
                    .run(&scope, || {
                        lister.list_objects(account, key, container, cursor, page_size)
                    })
                    .await
            }
            None => Err(InventoryError::listing(&scope, "account has no keys")),
        };

        match result {
            Ok(page) => TraversalState::AppendToChunk(scan, page),
            Err(e) => {
                error!(
                    account = %scan.account.name,
                    container = %scan.container().name,
                    cursor = scan.cursor.as_deref().unwrap_or("-"),
                    error = %e,
                    "Object listing failed, container left for the next run"
                );
                self.summary.containers_failed += 1;
                self.summary.failed_units.push(scope);
                self.account_failed = true;
                TraversalState::NextContainer(scan.account)
            }
        }
    }

    fn append_to_chunk(
        &mut self,
        mut scan: Box<UnitScan>,
        page: Page<RawObject>,
    ) -> Result<TraversalState> {
        let records: Vec<ObjectRecord> = page
            .items
            .into_iter()
            .map(|raw| ObjectRecord::from_raw(scan.writer.container(), raw))
            .collect();
        scan.writer.append_records(&records)?;
        scan.pages += 1;
        scan.objects += records.len() as u64;
        self.summary.pages += 1;
        self.summary.objects += records.len() as u64;

        let key = scan.unit_key();
        match page.continuation {
            Some(next) => {
                self.progress
                    .mark_unit_started(&key, Some(next.clone()), scan.writer.state().clone());
                self.progress.save()?;
                scan.cursor = Some(next);
                Ok(TraversalState::PageObjects(scan))
            }
            None => {
                scan.writer.finish()?;
                self.progress
                    .mark_unit_listed(&key, scan.writer.state().clone());
                self.progress.save()?;
                info!(
                    account = %scan.account.name,
                    container = %scan.container().name,
                    pages = scan.pages,
                    objects = scan.objects,
                    "Container listing complete"
                );
                Ok(TraversalState::PublishChunks(scan))
            }
        }
    }

    async fn publish_chunks(&mut self, scan: Box<UnitScan>) -> Result<TraversalState> {
        let Some(reconciler) = self.reconciler.clone() else {
            return Ok(TraversalState::MarkUnitComplete(scan));
        };

        for (path, key) in scan.writer.chunks() {
            match reconciler.publish(&path, &key).await {
                PublishOutcome::Created => self.summary.chunks_created += 1,
                PublishOutcome::SkippedIdentical => self.summary.chunks_skipped += 1,
                PublishOutcome::Failed(reason) => {
                    error!(
                        account = %scan.account.name,
                        container = %scan.container().name,
                        path = %path.display(),
                        destination = %reconciler.destination_key(&key),
                        reason = %reason,
                        "Couldn't write chunk to destination, aborting run"
                    );
                    return Err(InventoryError::Publish {
                        account: scan.account.name.clone(),
                        container: scan.container().name.clone(),
                        path,
                        reason,
                    });
                }
            }
        }
        Ok(TraversalState::MarkUnitComplete(scan))
    }

    fn mark_unit_complete(&mut self, scan: Box<UnitScan>) -> Result<TraversalState> {
        self.summary.chunks_written += scan.writer.chunks().len() as u64;
        self.summary.containers_scanned += 1;
        let published = self.publishing();
        self.progress.mark_unit_complete(&scan.unit_key(), published);
        self.progress.save()?;
        let UnitScan { account, .. } = *scan;
        Ok(TraversalState::NextContainer(account))
    }

    fn mark_account_complete(&mut self, account: Account) -> Result<TraversalState> {
        self.summary.accounts_scanned += 1;
        if self.account_failed {
            warn!(account = %account.name, "Account finished with failed containers");
        } else {
            let published = self.publishing();
            self.progress.mark_account_complete(&account.name, published);
            self.progress.save()?;
            info!(account = %account.name, published, "Finished storage account");
        }
        Ok(TraversalState::NextAccount)
    }
}
