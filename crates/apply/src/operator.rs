//! Operator facades: `apply` / `delete` over a held set of documents.

use std::time::Instant;

use metrics::{counter, histogram};
use rekon_core::{Document, Labels, OperatorError, OperatorResult, OwnerRef, Phase, Propagation, ResourceStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::callbacks::{notify, Callbacks, Event};
use crate::reconcile::Reconciler;
use crate::retry::RetryPolicy;

pub const DEFAULT_OWNER_LABEL: &str = "rekon.dev/owner-uid";
pub const DEFAULT_PARENT_KIND: &str = "Function";

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub owner_references: Vec<OwnerRef>,
    pub callbacks: Callbacks,
    pub dry_run: Vec<String>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub propagation: Propagation,
    pub callbacks: Callbacks,
    pub dry_run: Vec<String>,
    pub cancel: CancellationToken,
}

#[async_trait::async_trait]
pub trait Operator: Send + Sync {
    async fn apply(&self, opts: &ApplyOptions) -> OperatorResult<()>;
    async fn delete(&self, opts: &DeleteOptions) -> OperatorResult<()>;
}

/// Which parent owns the children and how they are labeled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerSpec {
    pub parent_kind: String,
    pub label_key: String,
}

impl Default for OwnerSpec {
    fn default() -> Self {
        Self { parent_kind: DEFAULT_PARENT_KIND.to_string(), label_key: DEFAULT_OWNER_LABEL.to_string() }
    }
}

impl OwnerSpec {
    /// Defaults with the label key overridden by `REKON_OWNER_LABEL`.
    pub fn from_env() -> Self {
        let mut me = Self::default();
        if let Ok(key) = std::env::var("REKON_OWNER_LABEL") {
            if !key.trim().is_empty() {
                me.label_key = key.trim().to_string();
            }
        }
        me
    }

    pub fn parent_kind(mut self, kind: &str) -> Self {
        self.parent_kind = kind.to_string();
        self
    }
}

/// Uid of the first reference of `kind`. Matching is on kind only; the uid may be empty.
pub fn find_owner_uid<'r>(refs: &'r [OwnerRef], kind: &str) -> Option<&'r str> {
    refs.iter().find(|r| r.kind == kind).map(|r| r.uid.as_str())
}

/// Right-biased label merge.
pub fn merge_labels(l: &Labels, r: &Labels) -> Labels {
    let mut out = l.clone();
    out.extend(r.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

#[derive(Debug, Default)]
struct Tally {
    created: usize,
    updated: usize,
    skipped: usize,
    deleted: usize,
    failed: usize,
}

impl Tally {
    fn add(&mut self, phase: Phase) {
        match phase {
            Phase::Created => self.created += 1,
            Phase::Updated => self.updated += 1,
            Phase::Skipped => self.skipped += 1,
            Phase::Deleted => self.deleted += 1,
            Phase::Failed => self.failed += 1,
        }
    }
}

/// Pre → reconcile → post for each document. Callback failures and cancellation
/// abort at once; other per-document failures are reported to the post callbacks,
/// the loop carries on and the first one is returned at the end.
async fn apply_all<S, I>(rec: &Reconciler<'_, S>, docs: I, callbacks: &Callbacks) -> OperatorResult<()>
where
    S: ResourceStore + ?Sized,
    I: IntoIterator<Item = Document>,
{
    let t0 = Instant::now();
    let mut tally = Tally::default();
    let mut first_err = None;
    for doc in docs {
        notify(Event::Pending(&doc), None, &callbacks.pre)?;
        let entry = rec.apply_object(&doc).await;
        tally.add(entry.phase());
        debug!(kind = %doc.kind, name = %doc.name(), phase = %entry.phase(), "reconciled");
        let err = entry.error().cloned();
        notify(Event::Done(&entry), err.as_ref(), &callbacks.post)?;
        match err {
            None => {}
            Some(OperatorError::Cancelled) => return Err(OperatorError::Cancelled),
            Some(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    info!(
        created = tally.created,
        updated = tally.updated,
        skipped = tally.skipped,
        failed = tally.failed,
        "apply finished"
    );
    first_err.map_or(Ok(()), Err)
}

/// Delete each document by name; same abort rules as [`apply_all`].
async fn delete_all<S>(rec: &Reconciler<'_, S>, docs: &[Document], opts: &DeleteOptions) -> OperatorResult<()>
where
    S: ResourceStore + ?Sized,
{
    let mut tally = Tally::default();
    let mut first_err = None;
    for doc in docs {
        notify(Event::Pending(doc), None, &opts.callbacks.pre)?;
        let entry = rec.delete_object(doc, opts.propagation).await;
        tally.add(entry.phase());
        let err = entry.error().cloned();
        notify(Event::Done(&entry), err.as_ref(), &opts.callbacks.post)?;
        match err {
            None => {
                counter!("delete_ok", 1u64);
            }
            Some(OperatorError::Cancelled) => return Err(OperatorError::Cancelled),
            Some(e) => {
                counter!("delete_err", 1u64);
                first_err.get_or_insert(e);
            }
        }
    }
    info!(deleted = tally.deleted, failed = tally.failed, propagation = opts.propagation.as_str(), "delete finished");
    first_err.map_or(Ok(()), Err)
}

/// Operator for child documents owned by a parent: stamps owner refs and the
/// owner label, sweeps children no longer held, then reconciles the held set.
pub struct OwnedOperator<S> {
    store: S,
    items: Vec<Document>,
    owner: OwnerSpec,
    retry: RetryPolicy,
}

impl<S: ResourceStore> OwnedOperator<S> {
    pub fn new(store: S, items: Vec<Document>) -> Self {
        Self { store, items, owner: OwnerSpec::from_env(), retry: RetryPolicy::from_env() }
    }

    pub fn with_owner(mut self, owner: OwnerSpec) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn items(&self) -> &[Document] { &self.items }

    pub fn store(&self) -> &S { &self.store }

    fn stamped(&self, owner_id: &str, refs: &[OwnerRef]) -> Vec<Document> {
        let owner_labels = Labels::from([(self.owner.label_key.clone(), owner_id.to_string())]);
        self.items
            .iter()
            .map(|item| {
                let mut doc = item.clone();
                doc.metadata.owner_references = refs.to_vec();
                doc.metadata.labels = merge_labels(&doc.metadata.labels, &owner_labels);
                doc
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl<S: ResourceStore> Operator for OwnedOperator<S> {
    async fn apply(&self, opts: &ApplyOptions) -> OperatorResult<()> {
        let owner_id = find_owner_uid(&opts.owner_references, &self.owner.parent_kind)
            .ok_or_else(|| OperatorError::OwnerNotResolved { kind: self.owner.parent_kind.clone() })?;
        info!(owner = %owner_id, items = self.items.len(), dry_run = !opts.dry_run.is_empty(), "applying owned documents");
        let rec = Reconciler::new(&self.store)
            .with_retry(self.retry)
            .with_dry_run(&opts.dry_run)
            .with_cancel(opts.cancel.clone());
        rec.wipe_removed(&self.owner.label_key, owner_id, &self.items, &opts.callbacks).await?;
        apply_all(&rec, self.stamped(owner_id, &opts.owner_references), &opts.callbacks).await
    }

    async fn delete(&self, opts: &DeleteOptions) -> OperatorResult<()> {
        let rec = Reconciler::new(&self.store).with_dry_run(&opts.dry_run).with_cancel(opts.cancel.clone());
        delete_all(&rec, &self.items, opts).await
    }
}

/// Operator for standalone documents: no owner resolution and no sweeping.
pub struct DocumentOperator<S> {
    store: S,
    items: Vec<Document>,
    retry: RetryPolicy,
}

impl<S: ResourceStore> DocumentOperator<S> {
    pub fn new(store: S, items: Vec<Document>) -> Self { Self { store, items, retry: RetryPolicy::from_env() } }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn items(&self) -> &[Document] { &self.items }

    pub fn store(&self) -> &S { &self.store }
}

#[async_trait::async_trait]
impl<S: ResourceStore> Operator for DocumentOperator<S> {
    async fn apply(&self, opts: &ApplyOptions) -> OperatorResult<()> {
        let rec = Reconciler::new(&self.store)
            .with_retry(self.retry)
            .with_dry_run(&opts.dry_run)
            .with_cancel(opts.cancel.clone());
        apply_all(&rec, self.items.iter().cloned(), &opts.callbacks).await
    }

    async fn delete(&self, opts: &DeleteOptions) -> OperatorResult<()> {
        let rec = Reconciler::new(&self.store).with_dry_run(&opts.dry_run).with_cancel(opts.cancel.clone());
        delete_all(&rec, &self.items, opts).await
    }
}
