use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::RawResponse;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub last_index: u64,
    pub last_contact_ms: u64,
    pub known_leader: bool,
    pub results_filtered_by_acls: bool,
    pub default_acl_policy: String,
    pub cache_hit: bool,
    pub cache_age_secs: u64,
}

/// Outcome of one call against the store.
///
/// A transport failure never produces a `Response`; any answer the store
/// gave, including 403 and 404, does. `body` is only decoded for successful
/// non-empty answers and `decode_error` records why decoding failed.
#[derive(Clone, Debug)]
pub struct Response<T> {
    pub status: u16,
    pub duration: Duration,
    pub metadata: Option<Metadata>,
    pub raw_body: Vec<u8>,
    pub body: Option<T>,
    pub decode_error: Option<String>,
}

impl<T> Response<T> {
    pub fn new(status: u16, body: Option<T>) -> Self {
        Self {
            status,
            duration: Duration::ZERO,
            metadata: None,
            raw_body: Vec::new(),
            body,
            decode_error: None,
        }
    }

    pub fn with_raw_body(mut self, raw_body: impl Into<Vec<u8>>) -> Self {
        self.raw_body = raw_body.into();
        self
    }

    pub fn with_decode_error(mut self, message: impl Into<String>) -> Self {
        self.decode_error = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_forbidden(&self) -> bool {
        self.status == 403
    }

    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.raw_body).trim().to_string()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> Option<U>) -> Response<U> {
        Response {
            status: self.status,
            duration: self.duration,
            metadata: self.metadata,
            raw_body: self.raw_body,
            body: self.body.and_then(f),
            decode_error: self.decode_error,
        }
    }
}

impl<T: DeserializeOwned> Response<T> {
    pub(crate) fn decode(raw: RawResponse, with_metadata: bool) -> Self {
        let metadata = with_metadata.then(|| parse_metadata(&raw.headers));
        let mut response = Response {
            status: raw.status,
            duration: raw.duration,
            metadata,
            raw_body: Vec::new(),
            body: None,
            decode_error: None,
        };
        if response.is_success() && !raw.body.is_empty() {
            match serde_json::from_slice::<T>(&raw.body) {
                Ok(body) => response.body = Some(body),
                Err(err) => response.decode_error = Some(err.to_string()),
            }
        }
        response.raw_body = raw.body;
        response
    }
}

fn parse_metadata(headers: &HeaderMap) -> Metadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let number = |name: &str| header(name).and_then(|value| value.parse::<u64>().ok());

    let cache_hit = header("X-Cache").map(|value| value == "HIT").unwrap_or(false);
    let cache_age_secs = if cache_hit { number("Age").unwrap_or(0) } else { 0 };
    Metadata {
        last_index: number("X-Consul-Index").unwrap_or(0),
        last_contact_ms: number("X-Consul-LastContact").unwrap_or(0),
        known_leader: header("X-Consul-KnownLeader")
            .map(|value| value == "true")
            .unwrap_or(false),
        results_filtered_by_acls: header("X-Consul-Results-Filtered-By-ACLs")
            .map(|value| value == "true")
            .unwrap_or(false),
        default_acl_policy: header("X-Consul-Default-ACL-Policy").unwrap_or_default(),
        cache_hit,
        cache_age_secs,
    }
}
