use std::sync::Arc;
use std::time::Duration;

use control_plane::metadata::{OPEN_NOTIFICATIONS_PREFIX, VALUE_TYPE_PREFIX};
use control_plane::{
    BatchUpdateRequest, DomainError, InMemoryConsul, KeyValue, KvService, MetadataService,
    RequestContext,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const ADMIN_ACCESSOR: &str = "7a1c3e4f-0b9d-4c2a-8e6f-1d2b3c4a5e6f";
const ADMIN_SECRET: &str = "0f6e5d4c-3b2a-4918-8776-655443322110";

fn services() -> (InMemoryConsul, KvService, Arc<MetadataService>, RequestContext) {
    let store = InMemoryConsul::new();
    store.insert_management_token(ADMIN_ACCESSOR, ADMIN_SECRET);
    let metadata = Arc::new(MetadataService::new(Arc::new(store.as_admin(ADMIN_SECRET))));
    let kv = KvService::new(Arc::new(store.clone()), metadata.clone());
    (store, kv, metadata, RequestContext::with_token(ADMIN_SECRET))
}

#[tokio::test]
async fn create_writes_value_and_type() {
    let (store, kv, metadata, ctx) = services();
    kv.create(&ctx, "app/config", b"{}", "json").await.expect("create");

    assert_eq!(store.value("app/config").expect("value"), b"{}");
    assert_eq!(metadata.get_value_type("app/config").await.expect("type"), "json");
}

#[tokio::test]
async fn create_folder_skips_value_type() {
    let (store, kv, _, ctx) = services();
    kv.create(&ctx, "app/", b"", "").await.expect("create folder");

    assert!(store
        .stored_keys()
        .iter()
        .all(|key| !key.starts_with(VALUE_TYPE_PREFIX)));
}

#[tokio::test]
async fn create_rejects_existing_key() {
    let (store, kv, _, ctx) = services();
    store.put("a", "1");
    let err = kv.create(&ctx, "a", b"2", "").await.expect_err("exists");
    assert!(matches!(err, DomainError::AlreadyExists(_)));
    assert_eq!(store.value("a").expect("value"), b"1");
}

#[tokio::test]
async fn list_keys_hides_internal_namespace() {
    let (store, kv, metadata, ctx) = services();
    store.put("b", "2");
    metadata.write_value_type("b", "yaml").await.expect("type");

    let keys = kv.list_keys(&ctx).await.expect("keys");
    assert_eq!(keys, vec!["b".to_string()]);
}

#[tokio::test]
async fn list_keys_on_empty_store_is_empty() {
    let (_, kv, _, ctx) = services();
    assert!(kv.list_keys(&ctx).await.expect("keys").is_empty());
}

#[tokio::test]
async fn update_requires_existing_key() {
    let (_, kv, _, ctx) = services();
    let err = kv.update(&ctx, "missing", b"x").await.expect_err("missing");
    assert_eq!(err, DomainError::NotFound("key not found".to_string()));
}

#[tokio::test]
async fn internal_keys_are_not_writable() {
    let (_, kv, _, ctx) = services();
    let err = kv
        .create(&ctx, ".consee-internal/acl-token/id-name/x", b"y", "")
        .await
        .expect_err("internal");
    assert!(matches!(err, DomainError::PermissionDenied(_)));
}

#[tokio::test]
async fn batch_update_aggregates_failures() {
    let (store, kv, _, ctx) = services();
    store.put("a", "1");
    let req = BatchUpdateRequest {
        key_values: vec![
            KeyValue {
                key: "a".to_string(),
                value: "2".to_string(),
            },
            KeyValue {
                key: "x".to_string(),
                value: "1".to_string(),
            },
            KeyValue {
                key: "y".to_string(),
                value: "1".to_string(),
            },
        ],
    };
    let err = kv.batch_update(&ctx, &req).await.expect_err("partial failure");
    assert_eq!(
        err,
        DomainError::Multiple(
            "2 errors occured during batch update: x: key not found; y: key not found."
                .to_string()
        )
    );
    assert_eq!(store.value("a").expect("value"), b"2");
}

#[tokio::test]
async fn update_type_checks_key_presence() {
    let (store, kv, metadata, ctx) = services();
    let err = kv.update_type(&ctx, "nope", "json").await.expect_err("missing");
    assert!(err.is_not_found());

    store.put("conf", "a: 1");
    kv.update_type(&ctx, "conf", "yaml").await.expect("update type");
    assert_eq!(metadata.get_value_type("conf").await.expect("type"), "yaml");
}

#[tokio::test]
async fn delete_removes_value_type() {
    let (store, kv, _, ctx) = services();
    kv.create(&ctx, "gone", b"1", "plaintext").await.expect("create");
    kv.delete(&ctx, "gone").await.expect("delete");

    assert!(store.stored_keys().is_empty());
}

#[tokio::test]
async fn denied_key_maps_to_permission_denied() {
    let (store, kv, _, ctx) = services();
    store.put("secret", "1");
    store.deny_key("secret");
    let err = kv.get(&ctx, "secret").await.expect_err("denied");
    assert!(matches!(err, DomainError::PermissionDenied(_)));
}

#[tokio::test]
async fn offline_store_maps_to_connection_failure() {
    let (store, kv, _, ctx) = services();
    store.set_offline(true);
    let err = kv.get(&ctx, "a").await.expect_err("offline");
    assert_eq!(err, DomainError::connection_failed());
}

async fn next(rx: &mut UnboundedReceiver<usize>) -> usize {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("count in time")
        .expect("watch alive")
}

#[tokio::test]
async fn notification_watch_follows_open_count_until_cancelled() {
    let (store, kv, _, ctx) = services();
    let kv = Arc::new(kv);
    let cancel = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let watcher = {
        let kv = kv.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            kv.watch_open_notifications_count(&ctx, &cancel, move |count| {
                let _ = tx.send(count);
            })
            .await
        })
    };

    assert_eq!(next(&mut rx).await, 0);
    store.put(&format!("{OPEN_NOTIFICATIONS_PREFIX}first"), "{}");
    assert_eq!(next(&mut rx).await, 1);
    store.put(&format!("{OPEN_NOTIFICATIONS_PREFIX}second"), "{}");
    assert_eq!(next(&mut rx).await, 2);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watch stops")
        .expect("task")
        .expect("watch result");
}
