use std::sync::Arc;

use control_plane::metadata::{encode_key, TokenMetadata, VALUE_TYPE_PREFIX};
use control_plane::{DomainError, InMemoryConsul, MetadataService};

const ADMIN_ACCESSOR: &str = "7a1c3e4f-0b9d-4c2a-8e6f-1d2b3c4a5e6f";
const ADMIN_SECRET: &str = "0f6e5d4c-3b2a-4918-8776-655443322110";

fn setup() -> (InMemoryConsul, MetadataService) {
    let store = InMemoryConsul::new();
    store.insert_management_token(ADMIN_ACCESSOR, ADMIN_SECRET);
    let metadata = MetadataService::new(Arc::new(store.as_admin(ADMIN_SECRET)));
    (store, metadata)
}

#[tokio::test]
async fn value_type_defaults_to_plaintext() {
    let (store, metadata) = setup();
    metadata.write_value_type("a/b", "").await.expect("write");

    let path = format!("{VALUE_TYPE_PREFIX}{}", encode_key("a/b"));
    assert_eq!(store.value(&path).expect("stored"), b"plaintext");
    assert_eq!(metadata.get_value_type("a/b").await.expect("read"), "plaintext");

    metadata.delete_value_type("a/b").await.expect("delete");
    assert!(metadata.get_value_type("a/b").await.expect_err("gone").is_not_found());
}

#[tokio::test]
async fn name_mappings_are_written_both_ways() {
    let (_, metadata) = setup();
    metadata
        .write_id_name_mapping("id-1", "reader")
        .await
        .expect("mapping");
    metadata
        .write_id_name_mapping("id-2", "writer")
        .await
        .expect("mapping");

    assert_eq!(metadata.get_token_name("id-1").await.expect("name"), "reader");
    assert_eq!(metadata.get_token_id_by_name("writer").await.expect("id"), "id-2");
    assert_eq!(
        metadata.list_id_name_mappings().await.expect("list"),
        vec![
            ("id-1".to_string(), "reader".to_string()),
            ("id-2".to_string(), "writer".to_string()),
        ]
    );

    metadata.delete_id_name_mapping("id-1").await;
    assert!(metadata.get_token_name("id-1").await.is_err());
    assert!(metadata.get_token_id_by_name("reader").await.is_err());
}

#[tokio::test]
async fn empty_mapping_namespace_lists_nothing() {
    let (_, metadata) = setup();
    assert!(metadata.list_id_name_mappings().await.expect("list").is_empty());
}

#[test]
fn token_metadata_update_keeps_creation_fields() {
    let created = TokenMetadata {
        from: "application".to_string(),
        ..TokenMetadata::created("alice", "2025-01-01 10:00:00")
    };
    let updated = created.updated("bob", "2025-02-01 09:30:00");

    assert_eq!(updated.created_at, "2025-01-01 10:00:00");
    assert_eq!(updated.created_by, "alice");
    assert_eq!(updated.from, "application");
    assert_eq!(updated.last_updated_by, "bob");
    assert_eq!(updated.last_updated_at, "2025-02-01 09:30:00");
    assert_eq!(updated.version, "2025-02-01 09:30:00");
}

#[tokio::test]
async fn token_metadata_round_trips_as_json() {
    let (_, metadata) = setup();
    let record = TokenMetadata::created("initializer", "2025-01-01 00:00:00");
    metadata
        .write_token_metadata("id-1", &record)
        .await
        .expect("write");
    assert_eq!(metadata.get_token_metadata("id-1").await.expect("read"), record);

    metadata.delete_token_metadata("id-1").await;
    assert_eq!(
        metadata.get_token_metadata("id-1").await.expect_err("gone"),
        DomainError::NotFound("metadata not found".to_string())
    );
}

#[tokio::test]
async fn history_and_notifications_are_not_implemented() {
    let (_, metadata) = setup();
    assert!(matches!(
        metadata.kv_history("a").await,
        Err(DomainError::NotImplemented(_))
    ));
    assert!(matches!(
        metadata.open_notifications_count().await,
        Err(DomainError::NotImplemented(_))
    ));
    assert!(matches!(
        metadata.add_history_version("a", "v1", b"x").await,
        Err(DomainError::NotImplemented(_))
    ));
}
