//! Rekon kubehub – resource store over the Kubernetes API (dynamic objects).

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::{counter, histogram};
use rekon_core::{Document, Propagation, ResourceStore, StoreError};
use tracing::{debug, info};

/// Field manager recorded on writes.
pub const FIELD_MANAGER: &str = "rekon";

fn call_timeout() -> Option<Duration> {
    std::env::var("REKON_CALL_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() })
        }
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// `apiVersion` + `kind` of a document as a gvk key.
pub fn gvk_key_of(doc: &Document) -> String { format!("{}/{}", doc.api_version, doc.kind) }

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

pub fn map_kube_err(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) => match (ae.code, ae.reason.as_str()) {
            (404, _) => StoreError::NotFound(ae.message),
            (409, "AlreadyExists") => StoreError::Api { code: ae.code, message: ae.message },
            (409, _) => StoreError::Conflict(ae.message),
            _ => StoreError::Api { code: ae.code, message: ae.message },
        },
        other => StoreError::Other(other.to_string()),
    }
}

fn to_dynamic(doc: &Document) -> Result<DynamicObject, StoreError> {
    let v = doc.to_json().map_err(|e| StoreError::Other(format!("serializing {}: {}", doc.name(), e)))?;
    serde_json::from_value(v).map_err(|e| StoreError::Other(format!("converting {}: {}", doc.name(), e)))
}

fn from_dynamic(obj: &DynamicObject) -> Result<Document, StoreError> {
    let v = serde_json::to_value(obj).map_err(|e| StoreError::Other(format!("serializing object: {}", e)))?;
    Document::from_json(v).map_err(|e| StoreError::Other(format!("decoding object: {}", e)))
}

fn propagation_policy(p: Propagation) -> PropagationPolicy {
    match p {
        Propagation::Background => PropagationPolicy::Background,
        Propagation::Foreground => PropagationPolicy::Foreground,
        Propagation::Orphan => PropagationPolicy::Orphan,
    }
}

fn post_params(dry_run: &[String]) -> PostParams {
    PostParams { dry_run: !dry_run.is_empty(), field_manager: Some(FIELD_MANAGER.to_string()) }
}

/// Resource store for one kind in one namespace (or cluster scope).
#[derive(Clone)]
pub struct KubeStore {
    api: Api<DynamicObject>,
    timeout: Option<Duration>,
}

impl KubeStore {
    pub fn new(api: Api<DynamicObject>) -> Self { Self { api, timeout: call_timeout() } }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve `gvk_key` via discovery and bind to `namespace` (required for namespaced kinds).
    pub async fn connect(client: Client, gvk_key: &str, namespace: Option<&str>) -> Result<Self> {
        let gvk = parse_gvk_key(gvk_key)?;
        let (ar, namespaced) = find_api_resource(client.clone(), &gvk)
            .await
            .with_context(|| format!("resolving {}", gvk_key))?;
        let api: Api<DynamicObject> = if namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(client, ns, &ar),
                None => Api::default_namespaced_with(client, &ar),
            }
        } else {
            Api::all_with(client, &ar)
        };
        info!(gvk = %gvk_key, ns = ?namespace, namespaced, "kube store ready");
        Ok(Self::new(api))
    }

    async fn call<T, F>(&self, verb: &'static str, fut: F) -> Result<T, StoreError>
    where
        T: Send,
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        let t0 = Instant::now();
        let res = match self.timeout {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(r) => r.map_err(map_kube_err),
                Err(_) => Err(StoreError::Other(format!("{} timed out after {:?}", verb, d))),
            },
            None => fut.await.map_err(map_kube_err),
        };
        histogram!("store_call_ms", t0.elapsed().as_secs_f64() * 1000.0, "verb" => verb);
        if let Err(e) = &res {
            if !e.is_not_found() {
                counter!("store_call_errors", 1u64, "verb" => verb);
            }
        }
        res
    }
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, name: &str) -> Result<Document, StoreError> {
        let obj = self.call("get", self.api.get(name)).await?;
        from_dynamic(&obj)
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<Document>, StoreError> {
        let lp = ListParams::default().labels(label_selector);
        let list = self.call("list", self.api.list(&lp)).await?;
        debug!(selector = %label_selector, count = list.items.len(), "listed");
        list.items.iter().map(from_dynamic).collect()
    }

    async fn create(&self, doc: &Document, dry_run: &[String]) -> Result<Document, StoreError> {
        let obj = to_dynamic(doc)?;
        let pp = post_params(dry_run);
        let out = self.call("create", self.api.create(&pp, &obj)).await?;
        from_dynamic(&out)
    }

    async fn update(&self, doc: &Document, dry_run: &[String]) -> Result<Document, StoreError> {
        let obj = to_dynamic(doc)?;
        let pp = post_params(dry_run);
        let out = self.call("update", self.api.replace(doc.name(), &pp, &obj)).await?;
        from_dynamic(&out)
    }

    async fn delete(&self, name: &str, propagation: Propagation, dry_run: &[String]) -> Result<(), StoreError> {
        let dp = DeleteParams {
            dry_run: !dry_run.is_empty(),
            propagation_policy: Some(propagation_policy(propagation)),
            ..Default::default()
        };
        let _ = self.call("delete", self.api.delete(name, &dp)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{} says no", code),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn parse_gvk_key_handles_core_and_groups() {
        let core = parse_gvk_key("v1/ConfigMap").expect("ok");
        assert_eq!(core.group, "");
        assert_eq!(core.kind, "ConfigMap");
        let g = parse_gvk_key("serverless.kyma-project.io/v1alpha1/Function").expect("ok");
        assert_eq!(g.group, "serverless.kyma-project.io");
        assert_eq!(g.version, "v1alpha1");
        assert!(parse_gvk_key("invalid").is_err());
        assert!(parse_gvk_key("a/b/c/d").is_err());
        assert!(parse_gvk_key("v1/").is_err());
    }

    #[test]
    fn gvk_key_of_joins_api_version_and_kind() {
        let d = Document::new("eventing.knative.dev/v1alpha1", "Trigger", "t");
        assert_eq!(gvk_key_of(&d), "eventing.knative.dev/v1alpha1/Trigger");
        assert!(parse_gvk_key(&gvk_key_of(&d)).is_ok());
    }

    #[test]
    fn kube_errors_map_to_store_errors() {
        assert!(map_kube_err(api_err(404, "NotFound")).is_not_found());
        assert!(map_kube_err(api_err(409, "Conflict")).is_conflict());
        assert!(matches!(map_kube_err(api_err(409, "AlreadyExists")), StoreError::Api { code: 409, .. }));
        assert!(matches!(map_kube_err(api_err(500, "InternalError")), StoreError::Api { code: 500, .. }));
    }

    #[test]
    fn documents_convert_through_dynamic_objects() {
        let mut d = Document::new("eventing.knative.dev/v1alpha1", "Trigger", "t1")
            .with_namespace("dev")
            .with_spec(serde_json::json!({ "broker": "default" }));
        d.metadata.labels.insert("owner".into(), "u1".into());
        d.metadata.resource_version = Some("5".into());
        let obj = to_dynamic(&d).expect("to dynamic");
        assert_eq!(obj.metadata.name.as_deref(), Some("t1"));
        assert_eq!(obj.metadata.resource_version.as_deref(), Some("5"));
        assert_eq!(obj.data["spec"]["broker"], "default");
        let back = from_dynamic(&obj).expect("from dynamic");
        assert_eq!(back, d);
    }

    #[test]
    fn dry_run_markers_toggle_server_dry_run() {
        assert!(!post_params(&[]).dry_run);
        assert!(post_params(&["All".to_string()]).dry_run);
    }
}
