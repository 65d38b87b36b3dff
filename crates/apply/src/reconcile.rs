//! Per-document reconcile: create, update (conflict-safe) or skip.

use std::future::Future;

use metrics::counter;
use rekon_core::{Document, OperatorError, ResourceStore, StatusEntry, StoreError, WriteOp};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::derivative::{diff_summary, spec_derivative_eq};
use crate::retry::RetryPolicy;

/// Race a store call against cancellation.
pub(crate) async fn guarded<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        res = fut => res,
    }
}

/// Drives reconcile and delete calls for one Apply/Delete invocation.
pub struct Reconciler<'a, S: ResourceStore + ?Sized> {
    pub(crate) store: &'a S,
    pub(crate) retry: RetryPolicy,
    pub(crate) dry_run: &'a [String],
    pub(crate) cancel: CancellationToken,
}

impl<'a, S: ResourceStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, retry: RetryPolicy::default(), dry_run: &[], cancel: CancellationToken::new() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dry_run(mut self, dry_run: &'a [String]) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bring one desired document into the store. The returned entry holds the
    /// resulting document (or the attempted one on failure) and the error, if any.
    pub async fn apply_object(&self, desired: &Document) -> StatusEntry {
        let name = desired.name();
        let observed = match guarded(&self.cancel, self.store.get(name)).await {
            Ok(doc) => Some(doc),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                counter!("reconcile_failed", 1u64);
                return StatusEntry::failed(desired.clone(), OperatorError::fetch(name, e));
            }
        };

        let entry = match observed {
            Some(observed) if spec_derivative_eq(&desired.spec, &observed.spec) => {
                debug!(name = %name, "up to date");
                StatusEntry::Skipped(observed)
            }
            Some(observed) => self.update(desired, observed).await,
            None => match guarded(&self.cancel, self.store.create(desired, self.dry_run)).await {
                Ok(created) => StatusEntry::Created(created),
                Err(e) => StatusEntry::failed(desired.clone(), OperatorError::write(name, WriteOp::Create, 1, e)),
            },
        };
        record(&entry);
        entry
    }

    async fn update(&self, desired: &Document, observed: Document) -> StatusEntry {
        let name = desired.name();
        if tracing::enabled!(tracing::Level::DEBUG) {
            let diff = diff_summary(&serde_json::Value::Object(desired.spec.clone()), &serde_json::Value::Object(observed.spec.clone()));
            debug!(name = %name, adds = diff.adds, updates = diff.updates, removes = diff.removes, "spec drift");
        }
        let mut staged = observed;
        staged.spec = desired.spec.clone();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match guarded(&self.cancel, self.store.update(&staged, self.dry_run)).await {
                Ok(updated) => return StatusEntry::Updated(updated),
                Err(e) => e,
            };
            if !err.is_conflict() || attempt >= self.retry.attempts {
                return StatusEntry::failed(staged, OperatorError::write(name, WriteOp::Update, attempt, err));
            }
            counter!("reconcile_update_conflicts", 1u64);
            let delay = self.retry.delay(attempt);
            debug!(name = %name, attempt, delay_ms = delay.as_millis() as u64, "update conflict; retrying");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StatusEntry::failed(staged, OperatorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            match guarded(&self.cancel, self.store.get(name)).await {
                Ok(fresh) => {
                    staged = fresh;
                    staged.spec = desired.spec.clone();
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "refetch after conflict failed");
                    return StatusEntry::failed(staged, OperatorError::fetch(name, e));
                }
            }
        }
    }
}

fn record(entry: &StatusEntry) {
    match entry {
        StatusEntry::Created(_) => { counter!("reconcile_created", 1u64); }
        StatusEntry::Updated(_) => { counter!("reconcile_updated", 1u64); }
        StatusEntry::Skipped(_) => { counter!("reconcile_skipped", 1u64); }
        StatusEntry::Deleted(_) => {}
        StatusEntry::Failed { .. } => { counter!("reconcile_failed", 1u64); }
    }
}
