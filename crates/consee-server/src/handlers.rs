use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Query, Request, State};
use axum::http::{header, HeaderMap, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use control_plane::{
    BatchUpdateRequest, CreateKeyValueRequest, CreatePolicyRequest, CreateRoleRequest,
    CreateTokenRequest, ExclusiveFilter, ExportFormat, ExportRequest, ImportRequest,
    ImportResponse, KeyValue, OnConflictPolicy, ParsedRule, ReadPolicyResponse, ReadRoleResponse,
    ReadTokenResponse, RequestContext, ResourceLink, UpdateRoleRequest, UpdateTokenRequest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const TOKEN_HEADER: &str = "g-consee-token";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticateResult {
    pub valid: u8,
    pub admin: u8,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub n: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

#[derive(Deserialize)]
pub struct UpdateValueRequest {
    #[serde(default)]
    pub value: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub v: Option<String>,
}

/// Masks all but the first and last two characters of a long token.
fn fuzz(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return token.to_string();
    }
    let mut masked = vec!['*'; 8];
    masked[0] = chars[0];
    masked[1] = chars[1];
    masked[6] = chars[chars.len() - 2];
    masked[7] = chars[chars.len() - 1];
    masked.into_iter().collect()
}

fn request_context(headers: &HeaderMap) -> Result<RequestContext, AppError> {
    let token = match headers.get(TOKEN_HEADER) {
        Some(value) => value.to_str().map_err(|_| {
            AppError::bad_request("invalid token (should be a valid uuid)")
        })?,
        None => "",
    };
    if token.is_empty() {
        return Err(AppError::bad_request("token is empty"));
    }
    if Uuid::try_parse(token).is_err() {
        return Err(AppError::bad_request(format!(
            "invalid token {} (should be a valid uuid)",
            fuzz(token)
        )));
    }
    Ok(RequestContext::with_token(token))
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|err| AppError::bad_request(err.to_string()).during("decoding body"))
}

fn decode_path(encoded: &str, process: &'static str) -> Result<String, AppError> {
    let raw = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|err| AppError::bad_request(err.to_string()).during(process))?;
    String::from_utf8(raw).map_err(|err| AppError::bad_request(err.to_string()).during(process))
}

fn format_from_filename(filename: &str) -> Result<ExportFormat, AppError> {
    match filename.rsplit_once('.').map(|(_, ext)| ext) {
        Some("zip") => Ok(ExportFormat::Zip),
        Some("json") => Ok(ExportFormat::Json),
        _ => Err(AppError::bad_request("invalid file format").during("parsing file")),
    }
}

pub async fn user_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response<Body>, AppError> {
    let ctx = request_context(req.headers())?;
    state.acl.validate_token(&ctx).await?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Must run after [`user_auth`], which leaves the caller in the extensions.
pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response<Body>, AppError> {
    let ctx = match req.extensions().get::<RequestContext>() {
        Some(ctx) => ctx.clone(),
        None => request_context(req.headers())?,
    };
    state.acl.check_admin(&ctx).await?;
    Ok(next.run(req).await)
}

pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AuthenticateResult>, AppError> {
    let ctx = request_context(&headers)?;
    if let Err(err) = state.acl.validate_token(&ctx).await {
        debug!(error = %err, "token validation failed");
        return Err(AppError::unauthorized("invalid token").during("authentication"));
    }
    if state.acl.check_admin(&ctx).await.is_err() {
        return Ok(Json(AuthenticateResult {
            valid: 1,
            admin: 0,
            n: 0,
        }));
    }
    let n = state.metadata.open_notifications_count().await.unwrap_or(0);
    Ok(Json(AuthenticateResult {
        valid: 1,
        admin: 1,
        n,
    }))
}

pub async fn export(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Response<Body>, AppError> {
    let req: ExportRequest = decode_body(&body)?;
    let format = ExportFormat::parse(&req.format)?;
    let content = state.reconciler.export(&ctx, &req).await?;
    let filename = format!(
        "consee-export-{}.{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename={filename}")),
        ],
        content,
    )
        .into_response())
}

pub async fn import(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    mut multipart: Multipart,
) -> Result<Json<ImportResponse>, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut dryrun = false;
    let mut on_conflict = String::new();
    let mut format = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()).during("parsing file"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::bad_request("invalid file").during("parsing file"))?;
                file = Some((filename, bytes.to_vec()));
            }
            "dryrun" | "on_conflict" | "format" => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()).during("parsing form"))?;
                match name.as_str() {
                    "dryrun" => dryrun = text == "1",
                    "on_conflict" => on_conflict = text,
                    _ => format = text,
                }
            }
            other => debug!(field = %other, "ignoring unknown import field"),
        }
    }

    let (filename, content) =
        file.ok_or_else(|| AppError::bad_request("invalid file").during("parsing file"))?;
    let format = if format.is_empty() {
        format_from_filename(&filename)?
    } else {
        ExportFormat::parse(&format)?
    };
    let req = ImportRequest {
        format,
        dryrun,
        on_conflict: OnConflictPolicy::parse(&on_conflict)?,
        content,
    };
    Ok(Json(state.reconciler.import(&ctx, req).await?))
}

pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.kv.list_keys(&ctx).await?))
}

pub async fn get_kv(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<KeyValue>, AppError> {
    let key = decode_path(&b64key, "decoding b64key")?;
    let entry = state.kv.get(&ctx, &key).await?;
    let value = match query.v.filter(|version| !version.is_empty()) {
        Some(version) => state.metadata.kv_history_value(&key, &version).await?,
        None => entry.value,
    };
    Ok(Json(KeyValue {
        key: entry.key,
        value: String::from_utf8_lossy(&value).into_owned(),
    }))
}

pub async fn get_value_type(
    State(state): State<Arc<AppState>>,
    Path(b64key): Path<String>,
) -> Result<String, AppError> {
    let key = decode_path(&b64key, "decoding b64key")?;
    Ok(state.metadata.get_value_type(&key).await?)
}

pub async fn update_value_type(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64key): Path<String>,
    body: String,
) -> Result<StatusCode, AppError> {
    let key = decode_path(&b64key, "decoding b64key")?;
    state.kv.update_type(&ctx, &key, body.trim()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_kv(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let req: CreateKeyValueRequest = decode_body(&body)?;
    state
        .kv
        .create(&ctx, &req.key, req.value.as_bytes(), &req.value_type)
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn update_kv(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64key): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let key = decode_path(&b64key, "decoding b64key")?;
    let req: UpdateValueRequest = decode_body(&body)?;
    state.kv.update(&ctx, &key, req.value.as_bytes()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_kv(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64key): Path<String>,
) -> Result<StatusCode, AppError> {
    let key = decode_path(&b64key, "decoding b64key")?;
    state.kv.delete(&ctx, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn batch_update_kv(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let req: BatchUpdateRequest = decode_body(&body)?;
    state.kv.batch_update(&ctx, &req).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn parse_rule(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<Vec<ParsedRule>>, AppError> {
    let result = state.acl.validate_hcl_rules(&body);
    if !result.valid {
        warn!(error = %result.error, "rejected hcl rules");
        return Err(AppError::bad_request(result.error).during("parsing rule"));
    }
    Ok(Json(result.parsed))
}

pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ResourceLink>>, AppError> {
    Ok(Json(state.acl.list_tokens().await?))
}

pub async fn read_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<ReadTokenResponse>, AppError> {
    Ok(Json(state.acl.read_token(&ctx, &id).await?))
}

pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<ResourceLink>), AppError> {
    let req: CreateTokenRequest = decode_body(&body)?;
    let link = state.acl.create_token(&ctx, &req).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn update_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let req: UpdateTokenRequest = decode_body(&body)?;
    state.acl.update_token(&ctx, &id, &req).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_token(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.acl.delete_token(&ctx, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_policies(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ResourceLink>>, AppError> {
    let filter = match params.get("exclusive").map(String::as_str) {
        None => ExclusiveFilter::All,
        Some("") => ExclusiveFilter::Only,
        Some(value) => match ExclusiveFilter::from_query(value) {
            ExclusiveFilter::All => ExclusiveFilter::Exclude,
            filter => filter,
        },
    };
    Ok(Json(state.acl.list_policies(&ctx, filter).await?))
}

pub async fn create_policy(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<ResourceLink>), AppError> {
    let req: CreatePolicyRequest = decode_body(&body)?;
    let link = state.acl.create_policy(&ctx, &req).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn read_policy(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64name): Path<String>,
) -> Result<Json<ReadPolicyResponse>, AppError> {
    let name = decode_path(&b64name, "decoding policy name")?;
    Ok(Json(state.acl.read_policy(&ctx, &name).await?))
}

pub async fn update_policy_rule(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64name): Path<String>,
    rules: String,
) -> Result<StatusCode, AppError> {
    let name = decode_path(&b64name, "decoding policy name")?;
    state.acl.update_policy_rule(&ctx, &name, &rules).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64name): Path<String>,
) -> Result<StatusCode, AppError> {
    let name = decode_path(&b64name, "decoding policy name")?;
    state.acl.delete_policy(&ctx, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<ResourceLink>>, AppError> {
    Ok(Json(state.acl.list_roles(&ctx).await?))
}

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<ResourceLink>), AppError> {
    let req: CreateRoleRequest = decode_body(&body)?;
    let link = state.acl.create_role(&ctx, &req).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn read_role(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64name): Path<String>,
) -> Result<Json<ReadRoleResponse>, AppError> {
    let name = decode_path(&b64name, "decoding role name")?;
    Ok(Json(state.acl.read_role(&ctx, &name).await?))
}

pub async fn update_role(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64name): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let name = decode_path(&b64name, "decoding role name")?;
    let req: UpdateRoleRequest = decode_body(&body)?;
    state.acl.update_role(&ctx, &name, &req).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(b64name): Path<String>,
) -> Result<StatusCode, AppError> {
    let name = decode_path(&b64name, "decoding role name")?;
    state.acl.delete_role(&ctx, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::Request;
    use control_plane::{ImportItem, InMemoryConsul, ItemKind};
    use tower::ServiceExt;

    use crate::error::ERROR_HEADER;

    const ADMIN_ACCESSOR: &str = "7a1c3e4f-0b9d-4c2a-8e6f-1d2b3c4a5e6f";
    const ADMIN_SECRET: &str = "0f6e5d4c-3b2a-4918-8776-655443322110";
    const USER_ACCESSOR: &str = "3d5e7f90-1a2b-4c3d-9e8f-0a1b2c3d4e5f";
    const USER_SECRET: &str = "d1d2d3d4-e5e6-4f70-8a9b-c0c1c2c3c4c5";
    const STRANGER_SECRET: &str = "99999999-8888-4777-8666-555555555555";

    fn build_state() -> (InMemoryConsul, Arc<AppState>) {
        let store = InMemoryConsul::new();
        store.insert_management_token(ADMIN_ACCESSOR, ADMIN_SECRET);
        store.insert_token(consul_client::AclToken {
            accessor_id: USER_ACCESSOR.to_string(),
            secret_id: USER_SECRET.to_string(),
            ..Default::default()
        });
        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.as_admin(ADMIN_SECRET)),
        );
        (store, Arc::new(state))
    }

    fn request(method: &str, uri: &str, token: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(TOKEN_HEADER, token)
            .body(body)
            .expect("request build")
    }

    async fn send(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
        crate::app(state.clone()).oneshot(req).await.expect("router")
    }

    async fn body_bytes(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body")
    }

    fn b64(value: &str) -> String {
        STANDARD.encode(value.as_bytes())
    }

    fn multipart_body(boundary: &str, filename: &str, content: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    #[test]
    fn fuzz_masks_long_tokens() {
        assert_eq!(fuzz("short"), "short");
        assert_eq!(fuzz("abcdefghijkl"), "ab****kl");
    }

    #[test]
    fn token_header_must_be_a_uuid() {
        let mut headers = HeaderMap::new();
        let err = request_context(&headers).expect_err("empty");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "token is empty");

        headers.insert(TOKEN_HEADER, "not-a-uuid-at-all".parse().expect("header"));
        let err = request_context(&headers).expect_err("not uuid");
        assert_eq!(err.message(), "invalid token no****ll (should be a valid uuid)");

        headers.insert(TOKEN_HEADER, ADMIN_SECRET.parse().expect("header"));
        assert_eq!(request_context(&headers).expect("uuid").token, ADMIN_SECRET);
    }

    #[test]
    fn filename_extension_selects_format() {
        assert_eq!(format_from_filename("backup.zip").expect("zip"), ExportFormat::Zip);
        assert_eq!(format_from_filename("dump.json").expect("json"), ExportFormat::Json);
        let err = format_from_filename("notes.txt").expect_err("txt");
        assert_eq!(err.message(), "invalid file format");
    }

    #[tokio::test]
    async fn authenticate_reports_role() {
        let (_, state) = build_state();

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, ADMIN_SECRET.parse().expect("header"));
        let Json(admin) = authenticate(State(state.clone()), headers)
            .await
            .expect("admin");
        assert_eq!(admin, AuthenticateResult { valid: 1, admin: 1, n: 0 });

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, USER_SECRET.parse().expect("header"));
        let Json(user) = authenticate(State(state.clone()), headers)
            .await
            .expect("user");
        assert_eq!(user, AuthenticateResult { valid: 1, admin: 0, n: 0 });

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, STRANGER_SECRET.parse().expect("header"));
        let err = authenticate(State(state), headers).await.expect_err("stranger");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authenticate_omits_zero_notification_count() {
        let (_, state) = build_state();
        let response = send(
            &state,
            request("POST", "/api/v0/authenticate", ADMIN_SECRET, Body::empty()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).expect("json");
        assert_eq!(body, serde_json::json!({"valid": 1, "admin": 1}));
    }

    #[tokio::test]
    async fn kv_routes_round_trip() {
        let (store, state) = build_state();
        let created = send(
            &state,
            request(
                "POST",
                "/api/v0/kv/value",
                ADMIN_SECRET,
                Body::from(r#"{"key":"app/conf","value":"a: 1","value_type":"yaml"}"#),
            ),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);

        let uri = format!("/api/v0/kv/value/{}", b64("app/conf"));
        let fetched = send(&state, request("GET", &uri, USER_SECRET, Body::empty())).await;
        assert_eq!(fetched.status(), StatusCode::OK);
        let entry: KeyValue = serde_json::from_slice(&body_bytes(fetched).await).expect("json");
        assert_eq!(entry.value, "a: 1");

        let type_uri = format!("/api/v0/kv/valuetype/{}", b64("app/conf"));
        let value_type = send(&state, request("GET", &type_uri, USER_SECRET, Body::empty())).await;
        assert_eq!(body_bytes(value_type).await.as_ref(), b"yaml");

        let updated = send(
            &state,
            request("PUT", &uri, ADMIN_SECRET, Body::from(r#"{"value":"a: 2"}"#)),
        )
        .await;
        assert_eq!(updated.status(), StatusCode::NO_CONTENT);
        assert_eq!(store.value("app/conf").expect("value"), b"a: 2");

        let deleted = send(&state, request("DELETE", &uri, ADMIN_SECRET, Body::empty())).await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        assert!(store.value("app/conf").is_none());
    }

    #[tokio::test]
    async fn missing_key_maps_to_not_found_with_error_header() {
        let (_, state) = build_state();
        let uri = format!("/api/v0/kv/value/{}", b64("absent"));
        let response = send(&state, request("GET", &uri, ADMIN_SECRET, Body::empty())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let header = response
            .headers()
            .get(ERROR_HEADER)
            .expect("error header")
            .to_str()
            .expect("ascii");
        assert_eq!(
            header,
            "an error occurred while processing request: key not found (status: 404)"
        );
    }

    #[tokio::test]
    async fn malformed_key_path_is_bad_request() {
        let (_, state) = build_state();
        let response = send(
            &state,
            request("GET", "/api/v0/kv/value/not*base64", ADMIN_SECRET, Body::empty()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_update_requires_admin() {
        let (store, state) = build_state();
        store.put("a", "1");
        let body = r#"{"kvs":[{"key":"a","value":"2"}]}"#;

        let denied = send(
            &state,
            request("PUT", "/api/v0/kv/batch", USER_SECRET, Body::from(body)),
        )
        .await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.value("a").expect("value"), b"1");

        let accepted = send(
            &state,
            request("PUT", "/api/v0/kv/batch", ADMIN_SECRET, Body::from(body)),
        )
        .await;
        assert_eq!(accepted.status(), StatusCode::NO_CONTENT);
        assert_eq!(store.value("a").expect("value"), b"2");
    }

    #[tokio::test]
    async fn user_routes_reject_missing_and_unknown_tokens() {
        let (_, state) = build_state();
        let missing = Request::builder()
            .uri("/api/v0/kv/keys")
            .body(Body::empty())
            .expect("request build");
        assert_eq!(send(&state, missing).await.status(), StatusCode::BAD_REQUEST);

        let unknown = request("GET", "/api/v0/kv/keys", STRANGER_SECRET, Body::empty());
        assert_eq!(send(&state, unknown).await.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn hcl_rule_route_is_public() {
        let (_, state) = build_state();
        let ok = Request::builder()
            .method("POST")
            .uri("/api/v0/acl/hcl-rule")
            .body(Body::from("key_prefix \"app/\" {\n  policy = \"read\"\n}\n"))
            .expect("request build");
        let response = send(&state, ok).await;
        assert_eq!(response.status(), StatusCode::OK);
        let rules: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).expect("json");
        assert_eq!(rules.as_array().map(Vec::len), Some(1));

        let broken = Request::builder()
            .method("POST")
            .uri("/api/v0/acl/hcl-rule")
            .body(Body::from("key_prefix \"app/\" {"))
            .expect("request build");
        assert_eq!(send(&state, broken).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn policy_routes_create_and_filter() {
        let (_, state) = build_state();
        let created = send(
            &state,
            request(
                "POST",
                "/api/v0/acl/policy",
                ADMIN_SECRET,
                Body::from(r#"{"name":"ops","rules":"key_prefix \"\" {\n  policy = \"read\"\n}\n"}"#),
            ),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);

        let duplicate = send(
            &state,
            request(
                "POST",
                "/api/v0/acl/policy",
                ADMIN_SECRET,
                Body::from(r#"{"name":"ops","rules":""}"#),
            ),
        )
        .await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let listed = send(
            &state,
            request("GET", "/api/v0/acl/policies?exclusive=0", ADMIN_SECRET, Body::empty()),
        )
        .await;
        let links: Vec<ResourceLink> =
            serde_json::from_slice(&body_bytes(listed).await).expect("json");
        assert!(links.iter().any(|link| link.name == "ops"));

        let only = send(
            &state,
            request("GET", "/api/v0/acl/policies?exclusive", ADMIN_SECRET, Body::empty()),
        )
        .await;
        let links: Vec<ResourceLink> =
            serde_json::from_slice(&body_bytes(only).await).expect("json");
        assert!(links.is_empty());

        let uri = format!("/api/v0/acl/policy/{}", b64("ops"));
        let read = send(&state, request("GET", &uri, USER_SECRET, Body::empty())).await;
        assert_eq!(read.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn token_routes_create_and_read() {
        let (_, state) = build_state();
        let accessor = "c0ffee00-1234-4abc-9def-0123456789ab";
        let body = format!(
            r#"{{"accessor_id":"{accessor}","name":"deployer","policy_mode":"exclusive","rules":"key_prefix \"app/\" {{\n  policy = \"write\"\n}}\n"}}"#
        );
        let created = send(
            &state,
            request("POST", "/api/v0/acl/token", ADMIN_SECRET, Body::from(body)),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);

        let read = send(
            &state,
            request(
                "GET",
                &format!("/api/v0/acl/token/{accessor}"),
                ADMIN_SECRET,
                Body::empty(),
            ),
        )
        .await;
        let token: serde_json::Value =
            serde_json::from_slice(&body_bytes(read).await).expect("json");
        assert_eq!(token["name"], "deployer");

        let update = send(
            &state,
            request(
                "PUT",
                &format!("/api/v0/acl/token/{accessor}"),
                ADMIN_SECRET,
                Body::from(r#"{"policies":[]}"#),
            ),
        )
        .await;
        assert_eq!(update.status(), StatusCode::FORBIDDEN);

        let listed = send(&state, request("GET", "/api/v0/acl/tokens", USER_SECRET, Body::empty())).await;
        let links: Vec<ResourceLink> =
            serde_json::from_slice(&body_bytes(listed).await).expect("json");
        assert_eq!(links.len(), 1);
    }

    #[tokio::test]
    async fn export_requires_admin_and_sets_attachment_headers() {
        let (store, state) = build_state();
        store.put("a", "1");
        let body = r#"{"keys":["a"],"format":"zip","acl":false}"#;

        let denied = send(
            &state,
            request("POST", "/api/v0/export", USER_SECRET, Body::from(body)),
        )
        .await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let response = send(
            &state,
            request("POST", "/api/v0/export", ADMIN_SECRET, Body::from(body)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).expect("type"),
            "application/zip"
        );
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .expect("disposition")
            .to_str()
            .expect("ascii")
            .to_string();
        assert!(disposition.starts_with("attachment; filename=consee-export-"));
        assert!(disposition.ends_with(".zip"));
        assert!(body_bytes(response).await.starts_with(b"PK\x03\x04"));
    }

    #[tokio::test]
    async fn import_applies_uploaded_archive() {
        let (source_store, source) = build_state();
        source_store.put("a", "1");
        let exported = send(
            &source,
            request(
                "POST",
                "/api/v0/export",
                ADMIN_SECRET,
                Body::from(r#"{"keys":["a"],"format":"zip"}"#),
            ),
        )
        .await;
        let archive = body_bytes(exported).await;

        let (target_store, target) = build_state();
        let boundary = "consee-boundary";
        let body = multipart_body(boundary, "backup.zip", &archive, &[("dryrun", "0")]);
        let req = Request::builder()
            .method("POST")
            .uri("/api/v0/import")
            .header(TOKEN_HEADER, ADMIN_SECRET)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request build");
        let response = send(&target, req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let report: ImportResponse =
            serde_json::from_slice(&body_bytes(response).await).expect("json");
        assert_eq!(report.successes, vec![ImportItem::new(ItemKind::Kv, "a")]);
        assert_eq!(target_store.value("a").expect("imported"), b"1");
    }

    #[tokio::test]
    async fn import_rejects_unknown_extension() {
        let (_, state) = build_state();
        let boundary = "consee-boundary";
        let body = multipart_body(boundary, "notes.txt", b"hello", &[]);
        let req = Request::builder()
            .method("POST")
            .uri("/api/v0/import")
            .header(TOKEN_HEADER, ADMIN_SECRET)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request build");
        let response = send(&state, req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
