use std::sync::Arc;

use consul_client::{KvPair, Response};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::RequestContext;
use crate::error::DomainError;
use crate::metadata::{is_internal_key, MetadataService, OPEN_NOTIFICATIONS_PREFIX};
use crate::repository::KvRepository;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeyValueRequest {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub value_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    #[serde(rename = "kvs", default)]
    pub key_values: Vec<KeyValue>,
}

fn is_folder(key: &str) -> bool {
    key.ends_with('/')
}

fn reject_internal(key: &str) -> Result<(), DomainError> {
    if is_internal_key(key) {
        warn!(key = %key, "rejected write to internal key");
        return Err(DomainError::permission_denied());
    }
    Ok(())
}

fn write_outcome(key: &str, response: &Response<bool>) -> Result<(), DomainError> {
    match response.status {
        200..=299 if response.body == Some(true) => Ok(()),
        403 => {
            error!(key = %key, "permission denied writing key");
            Err(DomainError::permission_denied())
        }
        400 => Err(DomainError::InvalidInput(response.message())),
        status => {
            error!(key = %key, status, "unexpected status writing key");
            Err(DomainError::unknown())
        }
    }
}

pub struct KvService {
    repo: Arc<dyn KvRepository>,
    metadata: Arc<MetadataService>,
}

impl KvService {
    pub fn new(repo: Arc<dyn KvRepository>, metadata: Arc<MetadataService>) -> Self {
        Self { repo, metadata }
    }

    pub async fn list_keys(&self, ctx: &RequestContext) -> Result<Vec<String>, DomainError> {
        let response = self.repo.list_keys(ctx, "", "").await.map_err(|err| {
            error!(error = %err, "failed to list keys");
            DomainError::from(err)
        })?;
        match response.status {
            404 => return Ok(Vec::new()),
            403 => return Err(DomainError::permission_denied()),
            200..=299 => {}
            status => {
                error!(status, "unexpected status listing keys");
                return Err(DomainError::unknown());
            }
        }
        Ok(response
            .body
            .unwrap_or_default()
            .into_iter()
            .filter(|key| !is_internal_key(key))
            .collect())
    }

    pub async fn get(&self, ctx: &RequestContext, key: &str) -> Result<KvEntry, DomainError> {
        let response = self.repo.read(ctx, key).await.map_err(|err| {
            error!(key = %key, error = %err, "failed to read key");
            DomainError::from(err)
        })?;
        match response.status {
            403 => {
                error!(key = %key, "permission denied reading key");
                return Err(DomainError::permission_denied());
            }
            404 => return Err(DomainError::NotFound("key not found".to_string())),
            200..=299 => {}
            status => {
                error!(key = %key, status, "unexpected status reading key");
                return Err(DomainError::unknown());
            }
        }
        if let Some(reason) = &response.decode_error {
            error!(key = %key, error = %reason, "failed to decode key");
            return Err(DomainError::parse_failed());
        }
        let pair = response
            .body
            .ok_or_else(|| DomainError::NotFound("key not found".to_string()))?;
        Ok(KvEntry {
            key: pair.key,
            value: pair.value,
        })
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &[u8],
        value_type: &str,
    ) -> Result<(), DomainError> {
        if key.is_empty() {
            return Err(DomainError::InvalidInput("key is required".to_string()));
        }
        reject_internal(key)?;
        match self.get(ctx, key).await {
            Ok(_) => {
                error!(key = %key, "key already exists");
                return Err(DomainError::AlreadyExists("key already exists".to_string()));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        self.put(ctx, key, value).await?;
        if is_folder(key) {
            return Ok(());
        }
        self.metadata.write_value_type(key, value_type).await
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &[u8],
    ) -> Result<(), DomainError> {
        reject_internal(key)?;
        self.get(ctx, key).await?;
        self.put(ctx, key, value).await
    }

    pub async fn update_type(
        &self,
        ctx: &RequestContext,
        key: &str,
        value_type: &str,
    ) -> Result<(), DomainError> {
        reject_internal(key)?;
        let response = self.repo.list_keys(ctx, key, "").await.map_err(|err| {
            error!(key = %key, error = %err, "failed to list keys for type update");
            DomainError::from(err)
        })?;
        if response.status == 403 {
            return Err(DomainError::permission_denied());
        }
        if response.body.as_ref().map_or(true, Vec::is_empty) {
            return Err(DomainError::NotFound("key not found".to_string()));
        }
        if is_folder(key) {
            return Ok(());
        }
        self.metadata.write_value_type(key, value_type).await
    }

    /// Updates every pair, collecting per-key failures into one error.
    pub async fn batch_update(
        &self,
        ctx: &RequestContext,
        req: &BatchUpdateRequest,
    ) -> Result<(), DomainError> {
        let mut failures = Vec::new();
        for kv in &req.key_values {
            if let Err(err) = self.update(ctx, &kv.key, kv.value.as_bytes()).await {
                failures.push(format!("{}: {}", kv.key, err));
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(DomainError::Multiple(format!(
            "{} errors occured during batch update: {}.",
            failures.len(),
            failures.join("; ")
        )))
    }

    pub async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<(), DomainError> {
        reject_internal(key)?;
        let response = self.repo.delete(ctx, key).await.map_err(|err| {
            error!(key = %key, error = %err, "failed to delete key");
            DomainError::from(err)
        })?;
        if response.status == 403 {
            error!(key = %key, "permission denied deleting key");
            return Err(DomainError::permission_denied());
        }
        if let Err(err) = self.metadata.delete_value_type(key).await {
            warn!(key = %key, error = %err, "failed to delete value type");
        }
        info!(key = %key, "key deleted");
        Ok(())
    }

    /// Reports the number of open notifications each time it changes, until
    /// `cancel` fires.
    pub async fn watch_open_notifications_count<F>(
        &self,
        ctx: &RequestContext,
        cancel: &CancellationToken,
        mut on_count: F,
    ) -> Result<(), DomainError>
    where
        F: FnMut(usize) + Send,
    {
        let mut callback = |response: &Response<Vec<String>>| {
            let count = response.body.as_ref().map_or(0, Vec::len);
            info!(count, "open notifications count changed");
            on_count(count);
            true
        };
        self.repo
            .watch_keys(ctx, OPEN_NOTIFICATIONS_PREFIX, cancel, &mut callback)
            .await
            .map_err(|err| {
                error!(error = %err, "notification watch stopped");
                DomainError::from(err)
            })
    }

    async fn put(&self, ctx: &RequestContext, key: &str, value: &[u8]) -> Result<(), DomainError> {
        let response = self
            .repo
            .write(ctx, &KvPair::new(key, value.to_vec()))
            .await
            .map_err(|err| {
                error!(key = %key, error = %err, "failed to write key");
                DomainError::from(err)
            })?;
        write_outcome(key, &response)
    }
}
