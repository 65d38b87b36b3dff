//! Rekon store: an in-memory [`ResourceStore`] with resourceVersion checks,
//! label-indexed listing, a call journal and fault injection.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use rekon_core::{parse_label_selector, Document, Propagation, ResourceStore, Spec, StoreError};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Store verbs, used for the journal and for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl Verb {
    pub fn is_write(&self) -> bool { matches!(self, Verb::Create | Verb::Update | Verb::Delete) }
}

/// One recorded store call: verb plus target (name, or selector for List).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub target: String,
    pub dry_run: bool,
    /// Set for deletes.
    pub propagation: Option<Propagation>,
}

#[derive(Default)]
struct Inner {
    objects: FxHashMap<String, Document>,
    next_rv: u64,
    calls: Vec<Call>,
    /// Remaining updates to reject as if a concurrent writer got there first.
    update_conflicts: u32,
    /// Persistent faults keyed by verb and optional name (None = any name).
    faults: FxHashMap<(Verb, Option<String>), StoreError>,
    spec_defaults: Spec,
}

impl Inner {
    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    fn record(&mut self, verb: Verb, target: &str, dry_run: bool) {
        self.calls.push(Call { verb, target: target.to_string(), dry_run, propagation: None });
    }

    fn fault(&self, verb: Verb, name: &str) -> Option<StoreError> {
        self.faults
            .get(&(verb, Some(name.to_string())))
            .or_else(|| self.faults.get(&(verb, None)))
            .cloned()
    }

    fn dependents_of(&self, uid: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .objects
            .values()
            .filter(|d| d.metadata.owner_references.iter().any(|r| r.uid == uid))
            .map(|d| d.name().to_string())
            .collect();
        out.sort();
        out
    }

    fn remove_cascading(&mut self, name: &str) {
        let Some(doc) = self.objects.remove(name) else { return };
        let Some(uid) = doc.metadata.uid else { return };
        for dep in self.dependents_of(&uid) {
            self.remove_cascading(&dep);
        }
    }

    fn orphan_dependents(&mut self, uid: &str) {
        for dep in self.dependents_of(uid) {
            let rv = self.bump_rv();
            if let Some(d) = self.objects.get_mut(&dep) {
                d.metadata.owner_references.retain(|r| r.uid != uid);
                d.metadata.resource_version = Some(rv);
            }
        }
    }
}

/// In-memory store for a single kind in a single namespace.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self { Self::default() }

    /// Store pre-populated with `docs` (uid/resourceVersion assigned when missing).
    pub fn with_objects(docs: impl IntoIterator<Item = Document>) -> Self {
        let s = Self::new();
        for d in docs {
            s.seed(d);
        }
        s
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace without journaling.
    pub fn seed(&self, mut doc: Document) -> Document {
        let mut g = self.lock();
        if doc.metadata.uid.is_none() {
            doc.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        doc.metadata.resource_version = Some(g.bump_rv());
        g.objects.insert(doc.name().to_string(), doc.clone());
        doc
    }

    /// Fields merged into `spec` on create when absent, like server-side defaulting.
    pub fn set_spec_defaults(&self, defaults: Spec) { self.lock().spec_defaults = defaults; }

    /// Reject the next `n` updates with a conflict, bumping the stored version each time.
    pub fn fail_updates_with_conflict(&self, n: u32) { self.lock().update_conflicts = n; }

    /// Fail every `verb` call (optionally only for `name`) with `err` until cleared.
    pub fn fail(&self, verb: Verb, name: Option<&str>, err: StoreError) {
        self.lock().faults.insert((verb, name.map(str::to_string)), err);
    }

    pub fn clear_faults(&self) {
        let mut g = self.lock();
        g.faults.clear();
        g.update_conflicts = 0;
    }

    pub fn calls(&self) -> Vec<Call> { self.lock().calls.clone() }

    pub fn calls_of(&self, verb: Verb) -> Vec<String> {
        self.lock().calls.iter().filter(|c| c.verb == verb).map(|c| c.target.clone()).collect()
    }

    /// Number of mutating calls seen (dry-run included).
    pub fn writes(&self) -> usize { self.lock().calls.iter().filter(|c| c.verb.is_write()).count() }

    pub fn clear_calls(&self) { self.lock().calls.clear(); }

    pub fn object(&self, name: &str) -> Option<Document> { self.lock().objects.get(name).cloned() }

    /// All stored objects sorted by name.
    pub fn objects(&self) -> Vec<Document> {
        let mut out: Vec<Document> = self.lock().objects.values().cloned().collect();
        out.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        out
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemStore {
    async fn get(&self, name: &str) -> Result<Document, StoreError> {
        let mut g = self.lock();
        g.record(Verb::Get, name, false);
        if let Some(e) = g.fault(Verb::Get, name) {
            return Err(e);
        }
        g.objects.get(name).cloned().ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<Document>, StoreError> {
        let mut g = self.lock();
        g.record(Verb::List, label_selector, false);
        if let Some(e) = g.fault(Verb::List, label_selector) {
            return Err(e);
        }
        let (key, value) = parse_label_selector(label_selector)
            .ok_or_else(|| StoreError::Other(format!("invalid label selector: {}", label_selector)))?;
        let mut out: Vec<Document> = g.objects.values().filter(|d| d.label(key) == Some(value)).cloned().collect();
        out.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        debug!(selector = %label_selector, count = out.len(), "memstore list");
        Ok(out)
    }

    async fn create(&self, doc: &Document, dry_run: &[String]) -> Result<Document, StoreError> {
        let mut g = self.lock();
        let dry = !dry_run.is_empty();
        g.record(Verb::Create, doc.name(), dry);
        if let Some(e) = g.fault(Verb::Create, doc.name()) {
            return Err(e);
        }
        if doc.name().is_empty() {
            return Err(StoreError::Api { code: 422, message: "metadata.name is required".into() });
        }
        if g.objects.contains_key(doc.name()) {
            return Err(StoreError::Api { code: 409, message: format!("{} already exists", doc.name()) });
        }
        let mut out = doc.clone();
        for (k, v) in g.spec_defaults.clone() {
            out.spec.entry(k).or_insert(v);
        }
        out.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        out.metadata.extra.insert(
            "creationTimestamp".into(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        );
        if dry {
            return Ok(out);
        }
        out.metadata.resource_version = Some(g.bump_rv());
        g.objects.insert(out.name().to_string(), out.clone());
        debug!(name = %out.name(), "memstore create");
        Ok(out)
    }

    async fn update(&self, doc: &Document, dry_run: &[String]) -> Result<Document, StoreError> {
        let mut g = self.lock();
        let dry = !dry_run.is_empty();
        g.record(Verb::Update, doc.name(), dry);
        if let Some(e) = g.fault(Verb::Update, doc.name()) {
            return Err(e);
        }
        let current_rv = match g.objects.get(doc.name()) {
            Some(cur) => cur.metadata.resource_version.clone(),
            None => return Err(StoreError::NotFound(doc.name().to_string())),
        };
        if g.update_conflicts > 0 {
            g.update_conflicts -= 1;
            let rv = g.bump_rv();
            if let Some(cur) = g.objects.get_mut(doc.name()) {
                cur.metadata.resource_version = Some(rv);
            }
            return Err(StoreError::Conflict(format!("{} was modified concurrently", doc.name())));
        }
        if doc.metadata.resource_version != current_rv {
            return Err(StoreError::Conflict(format!(
                "{}: resourceVersion {:?} is stale (current {:?})",
                doc.name(),
                doc.metadata.resource_version,
                current_rv
            )));
        }
        let mut out = doc.clone();
        if dry {
            return Ok(out);
        }
        out.metadata.resource_version = Some(g.bump_rv());
        g.objects.insert(out.name().to_string(), out.clone());
        debug!(name = %out.name(), rv = ?out.metadata.resource_version, "memstore update");
        Ok(out)
    }

    async fn delete(&self, name: &str, propagation: Propagation, dry_run: &[String]) -> Result<(), StoreError> {
        let mut g = self.lock();
        let dry = !dry_run.is_empty();
        g.record(Verb::Delete, name, dry);
        if let Some(last) = g.calls.last_mut() {
            last.propagation = Some(propagation);
        }
        if let Some(e) = g.fault(Verb::Delete, name) {
            return Err(e);
        }
        let uid = match g.objects.get(name) {
            Some(d) => d.metadata.uid.clone(),
            None => return Err(StoreError::NotFound(name.to_string())),
        };
        if dry {
            return Ok(());
        }
        match propagation {
            Propagation::Background | Propagation::Foreground => g.remove_cascading(name),
            Propagation::Orphan => {
                g.objects.remove(name);
                if let Some(uid) = uid {
                    g.orphan_dependents(&uid);
                }
            }
        }
        debug!(name = %name, propagation = propagation.as_str(), "memstore delete");
        Ok(())
    }
}
