use std::time::Duration;

use consul_client::{KvPair, QueryOptions, WriteOptions, TOKEN_HEADER};

fn has_param(params: &[(String, String)], key: &str, value: &str) -> bool {
    params.iter().any(|(k, v)| k == key && v == value)
}

#[test]
fn empty_query_options_encode_nothing() {
    let options = QueryOptions::default();
    assert!(options.params().is_empty());
    assert!(options.headers().is_empty());
}

#[test]
fn query_options_encode_set_fields() {
    let mut options = QueryOptions {
        datacenter: "dc2".to_string(),
        namespace: "team".to_string(),
        allow_stale: true,
        wait_index: 10,
        wait_time: Some(Duration::from_secs(5)),
        filter: "Name == \"x\"".to_string(),
        token: "secret".to_string(),
        ..QueryOptions::default()
    };
    options
        .node_meta
        .insert("rack".to_string(), "r1".to_string());

    let params = options.params();
    assert!(has_param(&params, "dc", "dc2"));
    assert!(has_param(&params, "ns", "team"));
    assert!(has_param(&params, "stale", ""));
    assert!(has_param(&params, "index", "10"));
    assert!(has_param(&params, "wait", "5000ms"));
    assert!(has_param(&params, "node-meta", "rack:r1"));
    assert!(!params.iter().any(|(k, _)| k == "consistent"));
    assert_eq!(
        options.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok()),
        Some("secret")
    );
}

#[test]
fn tiny_wait_time_rounds_up_to_one_millisecond() {
    let options = QueryOptions {
        wait_time: Some(Duration::from_micros(10)),
        ..QueryOptions::default()
    };
    assert!(has_param(&options.params(), "wait", "1ms"));
}

#[test]
fn cache_control_only_sent_when_cache_enabled() {
    let mut options = QueryOptions {
        max_age: Some(Duration::from_secs(30)),
        ..QueryOptions::default()
    };
    assert!(options.headers().get("cache-control").is_none());

    options.use_cache = true;
    options.stale_if_error = Some(Duration::from_secs(60));
    let headers = options.headers();
    assert_eq!(
        headers.get("cache-control").and_then(|v| v.to_str().ok()),
        Some("max-age=30, stale-if-error=60")
    );
    assert!(has_param(&options.params(), "cached", ""));
}

#[test]
fn write_options_encode_datacenter_and_token() {
    let options = WriteOptions {
        datacenter: "dc1".to_string(),
        ..WriteOptions::with_token("t")
    };
    assert_eq!(options.params(), vec![("dc".to_string(), "dc1".to_string())]);
    assert!(options.headers().contains_key(TOKEN_HEADER));
}

#[test]
fn kv_pair_value_travels_as_base64() {
    let pair = KvPair::new("k", b"v1".to_vec());
    let json = serde_json::to_value(&pair).expect("json");
    assert_eq!(json["Value"], "djE=");

    let decoded: KvPair =
        serde_json::from_str(r#"{"Key":"k","Value":null}"#).expect("decode");
    assert!(decoded.value.is_empty());
}
