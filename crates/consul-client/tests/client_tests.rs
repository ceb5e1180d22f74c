use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use consul_client::{
    AclToken, ClientError, ConsulClient, ConsulClientConfig, KvPair, QueryOptions, WriteOptions,
};

fn spawn_server(
    status: u16,
    headers: &'static str,
    body: &'static str,
) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let read = stream.read(&mut buf).unwrap_or(0);
            let _ = tx.send(String::from_utf8_lossy(&buf[..read]).to_string());
            let response = format!(
                "HTTP/1.1 {status} OK\r\n{headers}Content-Length: {}\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    (format!("http://{}", addr), rx)
}

fn client(address: String) -> ConsulClient {
    ConsulClient::new(ConsulClientConfig {
        address,
        timeout_ms: 2_000,
        ..ConsulClientConfig::default()
    })
    .expect("client")
}

fn request_line(rx: &mpsc::Receiver<String>) -> String {
    rx.recv_timeout(Duration::from_secs(2)).expect("request")
}

#[tokio::test]
async fn kv_get_decodes_first_pair_and_metadata() {
    let (address, rx) = spawn_server(
        200,
        "X-Consul-Index: 42\r\nX-Consul-KnownLeader: true\r\n",
        r#"[{"Key":"app/name","Flags":0,"Value":"Y29uc2Vl","CreateIndex":1,"ModifyIndex":2,"LockIndex":0}]"#,
    );
    let kv = client(address).kv();
    let options = QueryOptions {
        datacenter: "dc1".to_string(),
        token: "secret".to_string(),
        ..QueryOptions::default()
    };
    let response = kv.get("app/name", &options).await.expect("response");

    assert_eq!(response.status, 200);
    let pair = response.body.expect("pair");
    assert_eq!(pair.key, "app/name");
    assert_eq!(pair.value, b"consee");
    let metadata = response.metadata.expect("metadata");
    assert_eq!(metadata.last_index, 42);
    assert!(metadata.known_leader);

    let request = request_line(&rx);
    assert!(request.starts_with("GET /v1/kv/app/name?dc=dc1 "));
    assert!(request.to_lowercase().contains("x-consul-token: secret"));
}

#[tokio::test]
async fn kv_get_missing_key_has_no_body() {
    let (address, _rx) = spawn_server(404, "", "");
    let kv = client(address).kv();
    let response = kv.get("missing", &QueryOptions::default()).await.expect("response");
    assert!(response.is_not_found());
    assert!(response.body.is_none());
    assert!(response.decode_error.is_none());
}

#[tokio::test]
async fn kv_put_sends_raw_value() {
    let (address, rx) = spawn_server(200, "", "true");
    let kv = client(address).kv();
    let response = kv
        .put(&KvPair::new("a/b", b"hello".to_vec()), &WriteOptions::default())
        .await
        .expect("response");
    assert_eq!(response.body, Some(true));
    let request = request_line(&rx);
    assert!(request.starts_with("PUT /v1/kv/a/b "));
}

#[tokio::test]
async fn kv_put_rejects_leading_slash() {
    let kv = client("http://127.0.0.1:1".to_string()).kv();
    let err = kv
        .put(&KvPair::new("/a", Vec::new()), &WriteOptions::default())
        .await
        .expect_err("error");
    assert!(matches!(err, ClientError::InvalidRequest(_)));
}

#[tokio::test]
async fn kv_keys_requests_key_listing() {
    let (address, rx) = spawn_server(200, "X-Consul-Index: 7\r\n", r#"["a","b/"]"#);
    let kv = client(address).kv();
    let response = kv
        .keys("", "/", &QueryOptions::default())
        .await
        .expect("response");
    assert_eq!(response.body, Some(vec!["a".to_string(), "b/".to_string()]));
    let request = request_line(&rx);
    assert!(request.contains("keys="));
    assert!(request.contains("separator=%2F"));
}

#[tokio::test]
async fn acl_read_self_decodes_token() {
    let (address, rx) = spawn_server(
        200,
        "",
        r#"{"AccessorID":"a1","SecretID":"s1","Description":"","Policies":[{"ID":"00000000-0000-0000-0000-000000000001","Name":"global-management"}],"Roles":null,"Local":false}"#,
    );
    let acl = client(address).acl();
    let response = acl
        .token_read_self(&QueryOptions::with_token("s1"))
        .await
        .expect("response");
    let token = response.body.expect("token");
    assert_eq!(token.accessor_id, "a1");
    assert_eq!(token.policies[0].name, "global-management");
    assert!(token.roles.is_empty());
    assert!(request_line(&rx).starts_with("GET /v1/acl/token/self "));
}

#[tokio::test]
async fn acl_forbidden_keeps_message() {
    let (address, _rx) = spawn_server(403, "", "Permission denied");
    let acl = client(address).acl();
    let response = acl
        .token_read("a1", &QueryOptions::default())
        .await
        .expect("response");
    assert!(response.is_forbidden());
    assert_eq!(response.message(), "Permission denied");
    assert!(response.body.is_none());
}

#[tokio::test]
async fn acl_undecodable_body_sets_decode_error() {
    let (address, _rx) = spawn_server(200, "", "{not json");
    let acl = client(address).acl();
    let response = acl
        .token_read_self(&QueryOptions::default())
        .await
        .expect("response");
    assert!(response.body.is_none());
    assert!(response.decode_error.is_some());
}

#[tokio::test]
async fn acl_token_update_requires_accessor() {
    let acl = client("http://127.0.0.1:1".to_string()).acl();
    let err = acl
        .token_update(&AclToken::default(), &WriteOptions::default())
        .await
        .expect_err("error");
    assert!(matches!(err, ClientError::InvalidRequest(_)));
}

#[tokio::test]
async fn unreachable_store_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let kv = client(format!("http://{addr}")).kv();
    let err = kv
        .get("a", &QueryOptions::default())
        .await
        .expect_err("error");
    assert!(matches!(err, ClientError::Transport(_)));
}
