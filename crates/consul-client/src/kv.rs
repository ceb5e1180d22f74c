use std::time::Duration;

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{ClientError, ConsulClient, KvPair, QueryOptions, Response, WriteOptions};

const WATCH_RETRY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct KvEndpoint {
    client: ConsulClient,
}

impl KvEndpoint {
    pub(crate) fn new(client: ConsulClient) -> Self {
        Self { client }
    }

    pub async fn keys(
        &self,
        prefix: &str,
        separator: &str,
        options: &QueryOptions,
    ) -> Result<Response<Vec<String>>, ClientError> {
        let url = self.client.url(&["v1", "kv"], Some(prefix))?;
        let mut params = options.params();
        params.push(("keys".to_string(), String::new()));
        if !separator.is_empty() {
            params.push(("separator".to_string(), separator.to_string()));
        }
        let raw = self
            .client
            .execute(Method::GET, url, params, options.headers(), None)
            .await?;
        Ok(Response::decode(raw, true))
    }

    pub async fn get(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> Result<Response<KvPair>, ClientError> {
        let url = self.client.url(&["v1", "kv"], Some(key))?;
        let raw = self
            .client
            .execute(Method::GET, url, options.params(), options.headers(), None)
            .await?;
        let response: Response<Vec<KvPair>> = Response::decode(raw, true);
        Ok(response.map(|pairs| pairs.into_iter().next()))
    }

    pub async fn list(
        &self,
        prefix: &str,
        options: &QueryOptions,
    ) -> Result<Response<Vec<KvPair>>, ClientError> {
        let url = self.client.url(&["v1", "kv"], Some(prefix))?;
        let mut params = options.params();
        params.push(("recurse".to_string(), String::new()));
        let raw = self
            .client
            .execute(Method::GET, url, params, options.headers(), None)
            .await?;
        Ok(Response::decode(raw, true))
    }

    pub async fn put(
        &self,
        pair: &KvPair,
        options: &WriteOptions,
    ) -> Result<Response<bool>, ClientError> {
        if pair.key.starts_with('/') {
            return Err(ClientError::InvalidRequest(format!(
                "invalid key. key must not begin with a '/': {}",
                pair.key
            )));
        }
        let url = self.client.url(&["v1", "kv"], Some(&pair.key))?;
        let mut params = options.params();
        if pair.flags != 0 {
            params.push(("flags".to_string(), pair.flags.to_string()));
        }
        let raw = self
            .client
            .execute(Method::PUT, url, params, options.headers(), Some(pair.value.clone()))
            .await?;
        Ok(Response::decode(raw, false))
    }

    pub async fn delete(
        &self,
        key: &str,
        options: &WriteOptions,
    ) -> Result<Response<bool>, ClientError> {
        let url = self.client.url(&["v1", "kv"], Some(key))?;
        let raw = self
            .client
            .execute(Method::DELETE, url, options.params(), options.headers(), None)
            .await?;
        Ok(Response::decode(raw, false))
    }

    pub async fn delete_tree(
        &self,
        prefix: &str,
        options: &WriteOptions,
    ) -> Result<Response<bool>, ClientError> {
        let url = self.client.url(&["v1", "kv"], Some(prefix))?;
        let mut params = options.params();
        params.push(("recurse".to_string(), String::new()));
        let raw = self
            .client
            .execute(Method::DELETE, url, params, options.headers(), None)
            .await?;
        Ok(Response::decode(raw, false))
    }

    /// Repeats a blocking key listing under `prefix` until `cancel` fires or
    /// `on_response` returns `false`. The first listing must succeed; later
    /// transport failures are retried after a short pause with the last
    /// observed index.
    pub async fn watch_keys<F>(
        &self,
        prefix: &str,
        options: &QueryOptions,
        cancel: &CancellationToken,
        mut on_response: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(&Response<Vec<String>>) -> bool,
    {
        let mut options = options.clone();
        let mut last_index = 0u64;
        let mut first = true;
        loop {
            options.wait_index = last_index;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.keys(prefix, "", &options) => result,
            };
            match result {
                Ok(response) => {
                    first = false;
                    let index = response
                        .metadata
                        .as_ref()
                        .map(|metadata| metadata.last_index)
                        .unwrap_or(0);
                    last_index = if index < last_index { 0 } else { index };
                    if !on_response(&response) {
                        return Ok(());
                    }
                }
                Err(err) if first => return Err(err),
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "watch request failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(WATCH_RETRY) => {}
                    }
                }
            }
        }
    }
}
