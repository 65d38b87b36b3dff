use std::sync::{Arc, Mutex};

use rekon_apply::{
    ApplyOptions, Callbacks, DeleteOptions, DocumentOperator, Operator, OwnedOperator, OwnerSpec, RetryPolicy,
    DEFAULT_OWNER_LABEL,
};
use rekon_core::{Document, OperatorError, OwnerRef, Phase, Propagation, StoreError, WriteOp};
use rekon_store::{MemStore, Verb};
use serde_json::json;

type Log = Arc<Mutex<Vec<(String, Phase)>>>;

fn trigger(name: &str) -> Document {
    Document::new("eventing.knative.dev/v1alpha1", "Trigger", name).with_spec(json!({ "broker": "default" }))
}

fn child_of(name: &str, owner: &str) -> Document {
    let mut d = trigger(name);
    d.metadata.labels.insert(DEFAULT_OWNER_LABEL.into(), owner.into());
    d
}

fn function_ref(uid: &str) -> OwnerRef { OwnerRef::new("serverless.kyma-project.io/v1alpha1", "Function", "fn", uid) }

fn owned(store: &Arc<MemStore>, items: Vec<Document>) -> OwnedOperator<Arc<MemStore>> {
    OwnedOperator::new(Arc::clone(store), items)
        .with_owner(OwnerSpec::default())
        .with_retry(RetryPolicy::immediate(5))
}

fn logging(log: &Log) -> Callbacks {
    let log = Arc::clone(log);
    Callbacks::new().on_post(move |ev, _| {
        if let Some(s) = ev.status() {
            log.lock().unwrap().push((s.document().name().to_string(), s.phase()));
        }
        Ok(())
    })
}

fn apply_opts(uid: &str, callbacks: Callbacks) -> ApplyOptions {
    ApplyOptions { owner_references: vec![function_ref(uid)], callbacks, ..Default::default() }
}

#[tokio::test]
async fn creates_missing_document() {
    let store = Arc::new(MemStore::new());
    let log = Log::default();
    let doc = Document::new("v1", "Thing", "doc-a").with_spec(json!({ "x": 1 }));
    let op = DocumentOperator::new(Arc::clone(&store), vec![doc]);
    op.apply(&ApplyOptions { callbacks: logging(&log), ..Default::default() }).await.expect("apply");
    assert_eq!(store.calls_of(Verb::Create), vec!["doc-a"]);
    assert_eq!(*log.lock().unwrap(), vec![("doc-a".to_string(), Phase::Created)]);
}

#[tokio::test]
async fn skips_when_extra_fields_are_server_side() {
    let store = Arc::new(MemStore::with_objects(vec![
        Document::new("v1", "Thing", "doc-a").with_spec(json!({ "x": 1, "y": 2 })),
    ]));
    let log = Log::default();
    let op = DocumentOperator::new(Arc::clone(&store), vec![Document::new("v1", "Thing", "doc-a").with_spec(json!({ "x": 1 }))]);
    op.apply(&ApplyOptions { callbacks: logging(&log), ..Default::default() }).await.expect("apply");
    assert!(store.calls_of(Verb::Update).is_empty());
    assert_eq!(*log.lock().unwrap(), vec![("doc-a".to_string(), Phase::Skipped)]);
}

#[tokio::test]
async fn updates_drifted_document() {
    let store = Arc::new(MemStore::with_objects(vec![
        Document::new("v1", "Thing", "doc-a").with_spec(json!({ "x": 0 })),
    ]));
    let log = Log::default();
    let op = DocumentOperator::new(Arc::clone(&store), vec![Document::new("v1", "Thing", "doc-a").with_spec(json!({ "x": 1 }))]);
    op.apply(&ApplyOptions { callbacks: logging(&log), ..Default::default() }).await.expect("apply");
    assert_eq!(store.calls_of(Verb::Update), vec!["doc-a"]);
    assert_eq!(store.object("doc-a").expect("stored").spec.get("x"), Some(&json!(1)));
    assert_eq!(*log.lock().unwrap(), vec![("doc-a".to_string(), Phase::Updated)]);
}

#[tokio::test]
async fn sweeps_unlisted_children_of_resolved_owner_only() {
    let store = Arc::new(MemStore::with_objects(vec![
        child_of("child1", "P"),
        child_of("child2", "P"),
        child_of("child3", "Q"),
    ]));
    let op = owned(&store, vec![trigger("child1")]);
    op.apply(&apply_opts("P", Callbacks::new())).await.expect("apply");
    assert_eq!(store.calls_of(Verb::Delete), vec!["child2"]);
    assert!(store.object("child2").is_none());
    assert!(store.object("child3").is_some());
    assert!(store.calls_of(Verb::Get).iter().all(|n| n != "child3"));
}

#[tokio::test]
async fn second_apply_is_write_free() {
    let store = Arc::new(MemStore::with_objects(vec![child_of("stale", "P")]));
    let op = owned(&store, vec![trigger("t-0"), trigger("t-1")]);
    op.apply(&apply_opts("P", Callbacks::new())).await.expect("first apply");
    assert!(store.writes() > 0);

    store.clear_calls();
    let log = Log::default();
    op.apply(&apply_opts("P", logging(&log))).await.expect("second apply");
    assert_eq!(store.writes(), 0);
    assert!(log.lock().unwrap().iter().all(|(_, p)| *p == Phase::Skipped));
}

#[tokio::test]
async fn stamps_owner_references_and_label() {
    let store = Arc::new(MemStore::new());
    let mut item = trigger("t-0");
    item.metadata.labels.insert("app".into(), "demo".into());
    let op = owned(&store, vec![item]);
    op.apply(&apply_opts("P", Callbacks::new())).await.expect("apply");
    let stored = store.object("t-0").expect("created");
    assert_eq!(stored.label(DEFAULT_OWNER_LABEL), Some("P"));
    assert_eq!(stored.label("app"), Some("demo"));
    assert_eq!(stored.metadata.owner_references, vec![function_ref("P")]);
}

#[tokio::test]
async fn unresolved_owner_short_circuits() {
    let store = Arc::new(MemStore::with_objects(vec![child_of("old", "P")]));
    let op = owned(&store, vec![trigger("t-0")]);
    let opts = ApplyOptions {
        owner_references: vec![OwnerRef::new("v1", "Function123", "fn", "P")],
        ..Default::default()
    };
    let res = op.apply(&opts).await;
    assert_eq!(res, Err(OperatorError::OwnerNotResolved { kind: "Function".into() }));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn no_false_deletes_for_foreign_children_with_desired_names() {
    let store = Arc::new(MemStore::with_objects(vec![child_of("shared", "Q"), child_of("mine", "P")]));
    let op = owned(&store, vec![trigger("other")]);
    op.apply(&apply_opts("P", Callbacks::new())).await.expect("apply");
    assert_eq!(store.calls_of(Verb::Delete), vec!["mine"]);
}

#[tokio::test]
async fn gc_list_failure_aborts_before_reconcile() {
    let store = Arc::new(MemStore::new());
    store.fail(Verb::List, None, StoreError::Other("list error".into()));
    let op = owned(&store, vec![trigger("t-0")]);
    let res = op.apply(&apply_opts("P", Callbacks::new())).await;
    assert!(matches!(res, Err(OperatorError::Fetch { .. })));
    assert!(store.calls_of(Verb::Get).is_empty());
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn gc_delete_failure_is_returned() {
    let store = Arc::new(MemStore::with_objects(vec![child_of("old", "P")]));
    store.fail(Verb::Delete, None, StoreError::Other("delete error".into()));
    let log = Log::default();
    let op = owned(&store, vec![trigger("t-0")]);
    let res = op.apply(&apply_opts("P", logging(&log))).await;
    assert!(matches!(res, Err(OperatorError::Write { op: WriteOp::Delete, .. })));
    assert_eq!(*log.lock().unwrap(), vec![("old".to_string(), Phase::Failed)]);
    assert!(store.calls_of(Verb::Create).is_empty());
}

#[tokio::test]
async fn failed_document_does_not_stop_the_batch() {
    let store = Arc::new(MemStore::new());
    store.fail(Verb::Create, Some("t-0"), StoreError::Api { code: 403, message: "forbidden".into() });
    let log = Log::default();
    let op = owned(&store, vec![trigger("t-0"), trigger("t-1")]);
    let res = op.apply(&apply_opts("P", logging(&log))).await;
    assert!(matches!(res, Err(OperatorError::Write { op: WriteOp::Create, .. })));
    assert_eq!(
        *log.lock().unwrap(),
        vec![("t-0".to_string(), Phase::Failed), ("t-1".to_string(), Phase::Created)]
    );
}

#[tokio::test]
async fn panicking_callback_aborts_apply() {
    let store = Arc::new(MemStore::new());
    let cbs = Callbacks::new().on_pre(|ev, _| {
        if ev.document().name() == "t-0" {
            panic!("boom");
        }
        Ok(())
    });
    let op = owned(&store, vec![trigger("t-0"), trigger("t-1")]);
    let res = op.apply(&apply_opts("P", cbs)).await;
    assert_eq!(res, Err(OperatorError::Callback("boom".into())));
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn conflicts_beyond_budget_fail_apply() {
    let store = Arc::new(MemStore::with_objects(vec![child_of("t-0", "P")]));
    store.fail_updates_with_conflict(10);
    let op = OwnedOperator::new(Arc::clone(&store), vec![trigger("t-0").with_spec(json!({ "broker": "other" }))])
        .with_owner(OwnerSpec::default())
        .with_retry(RetryPolicy::immediate(3));
    let res = op.apply(&apply_opts("P", Callbacks::new())).await;
    assert!(matches!(res, Err(OperatorError::Write { op: WriteOp::Update, attempts: 3, .. })));
    assert_eq!(store.calls_of(Verb::Update).len(), 3);
}

#[tokio::test]
async fn cancelled_apply_returns_cancelled() {
    let store = Arc::new(MemStore::new());
    let op = owned(&store, vec![trigger("t-0")]);
    let opts = apply_opts("P", Callbacks::new());
    opts.cancel.cancel();
    let res = op.apply(&opts).await;
    assert_eq!(res, Err(OperatorError::Cancelled));
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn delete_removes_each_held_document() {
    let store = Arc::new(MemStore::with_objects(vec![trigger("t-0"), trigger("t-1"), trigger("keep")]));
    let log = Log::default();
    let op = owned(&store, vec![trigger("t-0"), trigger("t-1")]);
    let opts = DeleteOptions { propagation: Propagation::Foreground, callbacks: logging(&log), ..Default::default() };
    op.delete(&opts).await.expect("delete");
    assert_eq!(store.calls_of(Verb::Delete), vec!["t-0", "t-1"]);
    assert!(store.calls().iter().all(|c| c.verb != Verb::Delete || c.propagation == Some(Propagation::Foreground)));
    assert!(store.object("keep").is_some());
    assert_eq!(
        *log.lock().unwrap(),
        vec![("t-0".to_string(), Phase::Deleted), ("t-1".to_string(), Phase::Deleted)]
    );
}

#[tokio::test]
async fn delete_reports_missing_documents_and_continues() {
    let store = Arc::new(MemStore::with_objects(vec![trigger("t-1")]));
    let log = Log::default();
    let op = DocumentOperator::new(Arc::clone(&store), vec![trigger("t-0"), trigger("t-1")]);
    let res = op.delete(&DeleteOptions { callbacks: logging(&log), ..Default::default() }).await;
    match res {
        Err(OperatorError::Write { op: WriteOp::Delete, source, .. }) => assert!(source.is_not_found()),
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(
        *log.lock().unwrap(),
        vec![("t-0".to_string(), Phase::Failed), ("t-1".to_string(), Phase::Deleted)]
    );
}

#[tokio::test]
async fn delete_callback_error_aborts() {
    let store = Arc::new(MemStore::with_objects(vec![trigger("t-0"), trigger("t-1")]));
    let cbs = Callbacks::new().on_post(|_, _| Err(OperatorError::Callback("stop".into())));
    let op = DocumentOperator::new(Arc::clone(&store), vec![trigger("t-0"), trigger("t-1")]);
    let res = op.delete(&DeleteOptions { callbacks: cbs, ..Default::default() }).await;
    assert_eq!(res, Err(OperatorError::Callback("stop".into())));
    assert_eq!(store.calls_of(Verb::Delete), vec!["t-0"]);
}

#[tokio::test]
async fn dry_run_apply_leaves_store_untouched() {
    let store = Arc::new(MemStore::with_objects(vec![child_of("old", "P")]));
    let op = owned(&store, vec![trigger("t-0")]);
    let mut opts = apply_opts("P", Callbacks::new());
    opts.dry_run = vec![rekon_core::DRY_RUN_ALL.to_string()];
    op.apply(&opts).await.expect("apply");
    assert!(store.object("old").is_some());
    assert!(store.object("t-0").is_none());
    assert!(store.calls().iter().filter(|c| c.verb.is_write()).all(|c| c.dry_run));
}
