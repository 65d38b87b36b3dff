//! Rekon core types: documents, owner references, status entries and the
//! resource store contract the engine reconciles against.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

pub mod error;
pub mod status;

pub use error::{OperatorError, OperatorResult, StoreError, WriteOp};
pub use status::{Phase, StatusEntry};

pub type Labels = BTreeMap<String, String>;

/// Free-form `spec` payload. Unknown fields are carried through untouched.
pub type Spec = Map<String, Json>;

/// Dry-run marker understood by the API server.
pub const DRY_RUN_ALL: &str = "All";

/// Link from a child document to its logical parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerRef {
    pub fn new(api_version: &str, kind: &str, name: &str, uid: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            controller: None,
            block_owner_deletion: None,
        }
    }

    /// Owner reference pointing at `doc` (which must already carry a uid to be useful).
    pub fn to(doc: &Document) -> Self {
        Self::new(&doc.api_version, &doc.kind, doc.name(), doc.metadata.uid.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerRef>,
    /// Server-managed metadata (annotations, generation, managedFields, ...).
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

/// A named, labeled, versioned resource with a free-form spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: Spec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Json>,
}

impl Document {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            metadata: Metadata { name: name.to_string(), ..Default::default() },
            spec: Spec::new(),
            status: None,
        }
    }

    pub fn with_spec(mut self, spec: Json) -> Self {
        if let Json::Object(map) = spec {
            self.spec = map;
        }
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.metadata.labels = labels;
        self
    }

    pub fn with_namespace(mut self, ns: &str) -> Self {
        self.metadata.namespace = Some(ns.to_string());
        self
    }

    pub fn name(&self) -> &str { &self.metadata.name }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Result<Json> { serde_json::to_value(self) }

    pub fn from_json(v: Json) -> serde_json::Result<Self> { serde_json::from_value(v) }
}

/// Cascade mode for deletes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Propagation {
    #[default]
    Background,
    Foreground,
    Orphan,
}

impl Propagation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Background => "Background",
            Propagation::Foreground => "Foreground",
            Propagation::Orphan => "Orphan",
        }
    }
}

/// `key=value` equality selector.
pub fn label_selector(key: &str, value: &str) -> String { format!("{}={}", key, value) }

/// Parse a `key=value` selector. Anything else is rejected.
pub fn parse_label_selector(sel: &str) -> Option<(&str, &str)> {
    let (k, v) = sel.split_once('=')?;
    let k = k.trim();
    if k.is_empty() || k.ends_with('!') { return None; }
    Some((k, v.trim()))
}

/// Remote store of named, labeled, versioned documents (one kind, one scope).
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Document, StoreError>;
    async fn list(&self, label_selector: &str) -> Result<Vec<Document>, StoreError>;
    async fn create(&self, doc: &Document, dry_run: &[String]) -> Result<Document, StoreError>;
    /// Rejected with [`StoreError::Conflict`] when `doc`'s resourceVersion is stale.
    async fn update(&self, doc: &Document, dry_run: &[String]) -> Result<Document, StoreError>;
    async fn delete(&self, name: &str, propagation: Propagation, dry_run: &[String]) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for Arc<S> {
    async fn get(&self, name: &str) -> Result<Document, StoreError> { (**self).get(name).await }
    async fn list(&self, label_selector: &str) -> Result<Vec<Document>, StoreError> { (**self).list(label_selector).await }
    async fn create(&self, doc: &Document, dry_run: &[String]) -> Result<Document, StoreError> { (**self).create(doc, dry_run).await }
    async fn update(&self, doc: &Document, dry_run: &[String]) -> Result<Document, StoreError> { (**self).update(doc, dry_run).await }
    async fn delete(&self, name: &str, propagation: Propagation, dry_run: &[String]) -> Result<(), StoreError> {
        (**self).delete(name, propagation, dry_run).await
    }
}

pub mod prelude {
    pub use super::{
        Document, Labels, Metadata, OperatorError, OwnerRef, Phase, Propagation, ResourceStore, Spec, StatusEntry,
        StoreError, WriteOp,
    };
}
