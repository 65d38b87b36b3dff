//! Desired Function and Trigger documents built from a workspace config.

use std::io;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rekon_core::{Document, OwnerRef};
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use crate::config::Cfg;
use crate::runtime::RuntimeTable;

pub const FUNCTION_API_VERSION: &str = "serverless.kyma-project.io/v1alpha1";
pub const FUNCTION_KIND: &str = "Function";
pub const TRIGGER_API_VERSION: &str = "eventing.knative.dev/v1alpha1";
pub const TRIGGER_KIND: &str = "Trigger";
pub const DEFAULT_BROKER: &str = "default";
const SUBSCRIBER_API_VERSION: &str = "serving.knative.dev/v1";

/// Function document for `cfg`, reading runtime files from disk.
pub fn build_function(cfg: &Cfg, table: &RuntimeTable, refs: &[OwnerRef]) -> Result<Document> {
    build_function_with(cfg, table, refs, |p| std::fs::read(p))
}

/// As [`build_function`], with the file reader supplied by the caller.
pub fn build_function_with<R>(cfg: &Cfg, table: &RuntimeTable, refs: &[OwnerRef], read: R) -> Result<Document>
where
    R: Fn(&Path) -> io::Result<Vec<u8>>,
{
    let files = table.files(cfg.runtime).ok_or_else(|| anyhow!("no file mapping for runtime {}", cfg.runtime))?;

    let mut spec = Map::new();
    spec.insert("runtime".into(), Json::from(cfg.runtime.as_str()));
    for (field, file) in files.fields() {
        let path = cfg.source.path.join(file);
        let data = read(&path).with_context(|| format!("reading {}", path.display()))?;
        if data.is_empty() {
            debug!(file = %path.display(), "empty file; leaving {} unset", field);
            continue;
        }
        let text = String::from_utf8(data).with_context(|| format!("{} is not valid UTF-8", path.display()))?;
        spec.insert(field.into(), Json::String(text));
    }

    let mut resources = Map::new();
    if let Some(req) = &cfg.resources.requests {
        resources.insert("requests".into(), serde_json::to_value(req)?);
    }
    if let Some(lim) = &cfg.resources.limits {
        resources.insert("limits".into(), serde_json::to_value(lim)?);
    }
    if !resources.is_empty() {
        spec.insert("resources".into(), Json::Object(resources));
    }

    let mut doc = Document::new(FUNCTION_API_VERSION, FUNCTION_KIND, &cfg.name).with_labels(cfg.labels.clone());
    doc.metadata.namespace = cfg.namespace.clone();
    doc.metadata.owner_references = refs.to_vec();
    doc.spec = spec;
    Ok(doc)
}

/// One Trigger per configured subscription, each pointing at the function's Service.
pub fn build_triggers(cfg: &Cfg, function_name: &str) -> Vec<Document> {
    cfg.triggers
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let name = t.name.clone().unwrap_or_else(|| format!("{}-{}", function_name, i));
            let spec = json!({
                "broker": DEFAULT_BROKER,
                "filter": {
                    "attributes": {
                        "eventtypeversion": t.version,
                        "source": t.source,
                        "type": t.event_type,
                    }
                },
                "subscriber": {
                    "ref": {
                        "apiVersion": SUBSCRIBER_API_VERSION,
                        "kind": "Service",
                        "name": function_name,
                    }
                }
            });
            let mut doc = Document::new(TRIGGER_API_VERSION, TRIGGER_KIND, &name)
                .with_labels(cfg.labels.clone())
                .with_spec(spec);
            doc.metadata.namespace = cfg.namespace.clone();
            doc
        })
        .collect()
}
