use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use consul_client::KvPair;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::context::RequestContext;
use crate::error::DomainError;
use crate::repository::AdminRepository;

pub const INTERNAL_PREFIX: &str = ".consee-internal/";
pub const VALUE_TYPE_PREFIX: &str = ".consee-internal/kvmeta/valuetype/";
pub const ID_NAME_PREFIX: &str = ".consee-internal/acl-token/id-name/";
pub const NAME_ID_PREFIX: &str = ".consee-internal/acl-token/name-id/";
pub const TOKEN_METADATA_PREFIX: &str = ".consee-internal/acl-token/metadata/";
pub const OPEN_NOTIFICATIONS_PREFIX: &str = ".consee-internal/notifications/open/";

pub const DEFAULT_VALUE_TYPE: &str = "plaintext";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub last_updated_at: String,
    #[serde(default)]
    pub last_updated_by: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub from: String,
}

impl TokenMetadata {
    pub fn created(by: &str, at: &str) -> Self {
        Self {
            created_at: at.to_string(),
            created_by: by.to_string(),
            last_updated_at: at.to_string(),
            last_updated_by: by.to_string(),
            version: at.to_string(),
            from: String::new(),
        }
    }

    pub fn updated(&self, by: &str, at: &str) -> Self {
        Self {
            last_updated_at: at.to_string(),
            last_updated_by: by.to_string(),
            version: at.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvHistoryEntry {
    pub version: String,
    pub created_at: String,
    pub created_by: String,
}

pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn is_internal_key(key: &str) -> bool {
    key.starts_with(INTERNAL_PREFIX)
}

pub fn encode_key(key: &str) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Bookkeeping kept under the internal prefix, always written with the
/// admin credentials regardless of the caller.
pub struct MetadataService {
    repo: Arc<dyn AdminRepository>,
    ctx: RequestContext,
}

impl MetadataService {
    pub fn new(repo: Arc<dyn AdminRepository>) -> Self {
        Self {
            repo,
            ctx: RequestContext::default(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn AdminRepository> {
        &self.repo
    }

    pub async fn get_value_type(&self, key: &str) -> Result<String, DomainError> {
        let path = format!("{VALUE_TYPE_PREFIX}{}", encode_key(key));
        let value = self.read_internal(&path, "value type not found").await?;
        Ok(String::from_utf8_lossy(&value).to_string())
    }

    pub async fn write_value_type(&self, key: &str, value_type: &str) -> Result<(), DomainError> {
        let value_type = if value_type.is_empty() {
            DEFAULT_VALUE_TYPE
        } else {
            value_type
        };
        let path = format!("{VALUE_TYPE_PREFIX}{}", encode_key(key));
        self.write_internal(&path, value_type.as_bytes().to_vec()).await
    }

    pub async fn delete_value_type(&self, key: &str) -> Result<(), DomainError> {
        let path = format!("{VALUE_TYPE_PREFIX}{}", encode_key(key));
        self.delete_internal(&path).await
    }

    pub async fn kv_history(&self, _key: &str) -> Result<Vec<KvHistoryEntry>, DomainError> {
        Err(DomainError::not_implemented())
    }

    pub async fn kv_history_value(&self, _key: &str, _version: &str) -> Result<Vec<u8>, DomainError> {
        Err(DomainError::not_implemented())
    }

    pub async fn add_history_version(
        &self,
        _key: &str,
        _version: &str,
        _value: &[u8],
    ) -> Result<(), DomainError> {
        Err(DomainError::not_implemented())
    }

    pub async fn list_notifications(&self) -> Result<Vec<String>, DomainError> {
        Err(DomainError::not_implemented())
    }

    pub async fn open_notifications_count(&self) -> Result<usize, DomainError> {
        Err(DomainError::not_implemented())
    }

    pub async fn write_notification(&self, _id: &str, _data: &[u8]) -> Result<(), DomainError> {
        Err(DomainError::not_implemented())
    }

    pub async fn get_token_metadata(&self, accessor_id: &str) -> Result<TokenMetadata, DomainError> {
        let path = format!("{TOKEN_METADATA_PREFIX}{accessor_id}");
        let raw = self.read_internal(&path, "metadata not found").await?;
        serde_json::from_slice(&raw).map_err(|err| {
            error!(accessor_id = %accessor_id, error = %err, "failed to decode token metadata");
            DomainError::parse_failed()
        })
    }

    pub async fn write_token_metadata(
        &self,
        accessor_id: &str,
        metadata: &TokenMetadata,
    ) -> Result<(), DomainError> {
        let path = format!("{TOKEN_METADATA_PREFIX}{accessor_id}");
        let raw = serde_json::to_vec(metadata).map_err(|_| DomainError::parse_failed())?;
        self.write_internal(&path, raw).await
    }

    pub async fn delete_token_metadata(&self, accessor_id: &str) {
        let path = format!("{TOKEN_METADATA_PREFIX}{accessor_id}");
        if let Err(err) = self.delete_internal(&path).await {
            warn!(accessor_id = %accessor_id, error = %err, "failed to delete token metadata");
        }
    }

    pub async fn get_token_name(&self, accessor_id: &str) -> Result<String, DomainError> {
        let path = format!("{ID_NAME_PREFIX}{accessor_id}");
        let raw = self.read_internal(&path, "token not found").await?;
        Ok(String::from_utf8_lossy(&raw).to_string())
    }

    pub async fn get_token_id_by_name(&self, name: &str) -> Result<String, DomainError> {
        let path = format!("{NAME_ID_PREFIX}{name}");
        let raw = self.read_internal(&path, "token not found").await?;
        Ok(String::from_utf8_lossy(&raw).to_string())
    }

    pub async fn write_id_name_mapping(&self, accessor_id: &str, name: &str) -> Result<(), DomainError> {
        self.write_internal(&format!("{ID_NAME_PREFIX}{accessor_id}"), name.as_bytes().to_vec())
            .await?;
        self.write_internal(&format!("{NAME_ID_PREFIX}{name}"), accessor_id.as_bytes().to_vec())
            .await
    }

    pub async fn delete_id_name_mapping(&self, accessor_id: &str) {
        let name = match self.get_token_name(accessor_id).await {
            Ok(name) => name,
            Err(err) => {
                warn!(accessor_id = %accessor_id, error = %err, "token name mapping missing");
                return;
            }
        };
        for path in [
            format!("{ID_NAME_PREFIX}{accessor_id}"),
            format!("{NAME_ID_PREFIX}{name}"),
        ] {
            if let Err(err) = self.delete_internal(&path).await {
                warn!(path = %path, error = %err, "failed to delete token name mapping");
            }
        }
    }

    /// All accessor id to name mappings, in key order.
    pub async fn list_id_name_mappings(&self) -> Result<Vec<(String, String)>, DomainError> {
        let response = self.repo.list(&self.ctx, ID_NAME_PREFIX).await.map_err(|err| {
            error!(error = %err, "failed to list token names");
            DomainError::from(err)
        })?;
        if response.is_not_found() {
            return Ok(Vec::new());
        }
        check_admin_status(response.status)?;
        let pairs = response.body.unwrap_or_default();
        Ok(pairs
            .into_iter()
            .filter_map(|pair| {
                let accessor_id = pair.key.strip_prefix(ID_NAME_PREFIX)?.to_string();
                Some((accessor_id, String::from_utf8_lossy(&pair.value).to_string()))
            })
            .collect())
    }

    async fn read_internal(&self, path: &str, missing: &str) -> Result<Vec<u8>, DomainError> {
        let response = self.repo.read(&self.ctx, path).await.map_err(|err| {
            error!(path = %path, error = %err, "failed to read internal key");
            DomainError::from(err)
        })?;
        if response.is_not_found() {
            return Err(DomainError::NotFound(missing.to_string()));
        }
        check_admin_status(response.status)?;
        if let Some(reason) = response.decode_error {
            error!(path = %path, error = %reason, "failed to decode internal key");
            return Err(DomainError::parse_failed());
        }
        response
            .body
            .map(|pair| pair.value)
            .ok_or_else(|| DomainError::NotFound(missing.to_string()))
    }

    async fn write_internal(&self, path: &str, value: Vec<u8>) -> Result<(), DomainError> {
        let response = self
            .repo
            .write(&self.ctx, &KvPair::new(path, value))
            .await
            .map_err(|err| {
                error!(path = %path, error = %err, "failed to write internal key");
                DomainError::from(err)
            })?;
        check_admin_status(response.status)?;
        if response.body != Some(true) {
            return Err(DomainError::unknown());
        }
        Ok(())
    }

    async fn delete_internal(&self, path: &str) -> Result<(), DomainError> {
        let response = self.repo.delete(&self.ctx, path).await?;
        check_admin_status(response.status)
    }
}

fn check_admin_status(status: u16) -> Result<(), DomainError> {
    match status {
        200..=299 => Ok(()),
        403 => Err(DomainError::permission_denied()),
        _ => Err(DomainError::unknown()),
    }
}
