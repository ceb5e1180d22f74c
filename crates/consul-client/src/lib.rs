mod acl;
mod kv;
mod options;
mod response;
mod types;

pub use acl::AclEndpoint;
pub use kv::KvEndpoint;
pub use options::{QueryOptions, WriteOptions};
pub use response::{Metadata, Response};
pub use types::{AclLink, AclPolicy, AclRole, AclToken, KvPair};

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};
use thiserror::Error;
use tracing::debug;

pub const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Clone, Debug)]
pub struct ConsulClientConfig {
    pub address: String,
    pub prefix: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for ConsulClientConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            prefix: String::new(),
            timeout_ms: 10_000,
            user_agent: "consee".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    config: ConsulClientConfig,
}

pub(crate) struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub duration: Duration,
}

impl ConsulClient {
    pub fn new(config: ConsulClientConfig) -> Result<Self, ClientError> {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        Url::parse(&config.address)
            .map_err(|err| ClientError::InvalidRequest(format!("invalid address: {err}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ConsulClientConfig {
        &self.config
    }

    pub fn kv(&self) -> KvEndpoint {
        KvEndpoint::new(self.clone())
    }

    pub fn acl(&self) -> AclEndpoint {
        AclEndpoint::new(self.clone())
    }

    pub(crate) fn url(&self, path: &[&str], tail: Option<&str>) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.config.address)
            .map_err(|err| ClientError::InvalidRequest(format!("invalid address: {err}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ClientError::InvalidRequest("address cannot be a base".to_string()))?;
            segments.pop_if_empty();
            for part in self.config.prefix.split('/').filter(|part| !part.is_empty()) {
                segments.push(part);
            }
            segments.extend(path);
            if let Some(tail) = tail {
                segments.extend(tail.split('/'));
            }
        }
        Ok(url)
    }

    pub(crate) async fn execute(
        &self,
        method: Method,
        url: Url,
        params: Vec<(String, String)>,
        headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<RawResponse, ClientError> {
        let mut headers = headers;
        if !headers.contains_key(USER_AGENT) {
            if let Ok(value) = HeaderValue::from_str(&self.config.user_agent) {
                headers.insert(USER_AGENT, value);
            }
        }
        if body.is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        debug!(method = %method, path = url.path(), "consul request");
        let mut request = self.http.request(method, url).headers(headers).query(&params);
        if let Some(body) = body {
            request = request.body(body);
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
            duration: started.elapsed(),
        })
    }
}

pub(crate) fn token_headers(token: &str, cache_control: Option<String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !token.is_empty() {
        if let Ok(value) = HeaderValue::from_str(token) {
            headers.insert(TOKEN_HEADER, value);
        }
    }
    if let Some(cache_control) = cache_control {
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            headers.insert(CACHE_CONTROL, value);
        }
    }
    headers
}
