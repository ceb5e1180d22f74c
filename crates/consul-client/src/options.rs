use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::token_headers;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub namespace: String,
    pub partition: String,
    pub datacenter: String,
    pub peer: String,
    pub allow_stale: bool,
    pub require_consistent: bool,
    pub use_cache: bool,
    pub max_age: Option<Duration>,
    pub stale_if_error: Option<Duration>,
    pub wait_index: u64,
    pub wait_hash: String,
    pub wait_time: Option<Duration>,
    pub token: String,
    pub near: String,
    pub filter: String,
    pub node_meta: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub namespace: String,
    pub partition: String,
    pub datacenter: String,
    pub token: String,
}

impl QueryOptions {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        push_nonempty(&mut params, "ns", &self.namespace);
        push_nonempty(&mut params, "partition", &self.partition);
        push_nonempty(&mut params, "dc", &self.datacenter);
        push_nonempty(&mut params, "peer", &self.peer);
        if self.allow_stale {
            params.push(("stale".to_string(), String::new()));
        }
        if self.require_consistent {
            params.push(("consistent".to_string(), String::new()));
        }
        if self.wait_index != 0 {
            params.push(("index".to_string(), self.wait_index.to_string()));
        }
        push_nonempty(&mut params, "hash", &self.wait_hash);
        if let Some(wait) = self.wait_time.filter(|wait| !wait.is_zero()) {
            params.push(("wait".to_string(), duration_to_msec(wait)));
        }
        push_nonempty(&mut params, "near", &self.near);
        push_nonempty(&mut params, "filter", &self.filter);
        for (key, value) in &self.node_meta {
            params.push(("node-meta".to_string(), format!("{key}:{value}")));
        }
        if self.use_cache {
            params.push(("cached".to_string(), String::new()));
        }
        params
    }

    pub fn headers(&self) -> HeaderMap {
        token_headers(&self.token, self.cache_control())
    }

    fn cache_control(&self) -> Option<String> {
        if !self.use_cache {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(max_age) = self.max_age {
            parts.push(format!("max-age={}", max_age.as_secs()));
        }
        if let Some(stale) = self.stale_if_error {
            parts.push(format!("stale-if-error={}", stale.as_secs()));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

impl WriteOptions {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        push_nonempty(&mut params, "ns", &self.namespace);
        push_nonempty(&mut params, "partition", &self.partition);
        push_nonempty(&mut params, "dc", &self.datacenter);
        params
    }

    pub fn headers(&self) -> HeaderMap {
        token_headers(&self.token, None)
    }
}

fn push_nonempty(params: &mut Vec<(String, String)>, key: &str, value: &str) {
    if !value.is_empty() {
        params.push((key.to_string(), value.to_string()));
    }
}

fn duration_to_msec(duration: Duration) -> String {
    let millis = duration.as_millis().max(1);
    format!("{millis}ms")
}
