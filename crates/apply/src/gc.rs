//! Owner-scoped garbage collection and plain deletes.

use metrics::counter;
use rekon_core::{label_selector, Document, OperatorError, OperatorResult, Propagation, ResourceStore, StatusEntry, WriteOp};
use tracing::{debug, info, warn};

use crate::callbacks::{notify, Callbacks, Event};
use crate::reconcile::{guarded, Reconciler};

/// Whether `docs` holds a document called `name`.
pub fn contains(docs: &[Document], name: &str) -> bool { docs.iter().any(|d| d.name() == name) }

impl<'a, S: ResourceStore + ?Sized> Reconciler<'a, S> {
    /// Delete one document by name and report the outcome.
    pub async fn delete_object(&self, doc: &Document, propagation: Propagation) -> StatusEntry {
        match guarded(&self.cancel, self.store.delete(doc.name(), propagation, self.dry_run)).await {
            Ok(()) => StatusEntry::Deleted(doc.clone()),
            Err(e) => StatusEntry::failed(doc.clone(), OperatorError::write(doc.name(), WriteOp::Delete, 1, e)),
        }
    }

    /// Delete every child labeled `owner_label=owner_id` whose name is not in
    /// `desired`, with background propagation.
    ///
    /// A List failure aborts before anything is deleted. Callback failures abort
    /// immediately. A failed delete is reported to the post callbacks and the sweep
    /// moves on; the first such failure is returned once the sweep is done.
    pub async fn wipe_removed(
        &self,
        owner_label: &str,
        owner_id: &str,
        desired: &[Document],
        callbacks: &Callbacks,
    ) -> OperatorResult<()> {
        let selector = label_selector(owner_label, owner_id);
        let listed = guarded(&self.cancel, self.store.list(&selector))
            .await
            .map_err(|e| OperatorError::fetch(&selector, e))?;

        let mut first_err = None;
        let mut swept = 0usize;
        for item in listed.iter().filter(|d| !contains(desired, d.name())) {
            // never trust the selector alone
            if item.label(owner_label) != Some(owner_id) {
                warn!(name = %item.name(), selector = %selector, "listed object lacks owner label; leaving it alone");
                continue;
            }
            notify(Event::Pending(item), None, &callbacks.pre)?;
            let entry = self.delete_object(item, Propagation::Background).await;
            let err = entry.error().cloned();
            notify(Event::Done(&entry), err.as_ref(), &callbacks.post)?;
            match err {
                None => {
                    counter!("gc_deleted", 1u64);
                    swept += 1;
                    debug!(name = %item.name(), owner = %owner_id, "removed orphaned child");
                }
                Some(OperatorError::Cancelled) => return Err(OperatorError::Cancelled),
                Some(e) => {
                    counter!("gc_failed", 1u64);
                    warn!(name = %item.name(), error = %e, "orphaned child delete failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        if swept > 0 {
            info!(owner = %owner_id, swept, "garbage collected children");
        }
        first_err.map_or(Ok(()), Err)
    }
}
