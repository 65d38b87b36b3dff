//! Rekon apply: converge a store towards a set of desired documents.
//!
//! Per document the engine fetches the live object, skips it when the desired
//! spec is already a semantic derivative of the observed one, and otherwise
//! creates or updates it (retrying update conflicts with a fresh read). Child
//! documents owned by a parent are swept by owner label before being applied.

#![forbid(unsafe_code)]

pub mod callbacks;
pub mod derivative;
pub mod gc;
pub mod operator;
pub mod reconcile;
pub mod retry;

pub use callbacks::{callback, fire_callbacks, Callback, Callbacks, Event};
pub use derivative::{derivative_eq, diff_summary, spec_derivative_eq, DiffSummary};
pub use gc::contains;
pub use operator::{
    find_owner_uid, merge_labels, ApplyOptions, DeleteOptions, DocumentOperator, Operator, OwnedOperator, OwnerSpec,
    DEFAULT_OWNER_LABEL, DEFAULT_PARENT_KIND,
};
pub use reconcile::Reconciler;
pub use retry::RetryPolicy;
