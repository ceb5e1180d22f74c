use serde::{Deserialize, Serialize};

use crate::acl::ResourceLink;
use crate::error::DomainError;

pub const MANIFEST_MEMBER: &str = "metadata.json";
pub const LATEST_VERSION: &str = "latest";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Zip,
    Json,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "zip" => Ok(ExportFormat::Zip),
            "json" => Ok(ExportFormat::Json),
            other => Err(DomainError::InvalidInput(format!(
                "unsupported format {other:?}, expected zip or json"
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Zip => "zip",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Zip => "application/zip",
            ExportFormat::Json => "application/json",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnConflictPolicy {
    #[default]
    Skip,
    Replace,
}

impl OnConflictPolicy {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "" | "skip" => Ok(OnConflictPolicy::Skip),
            "replace" => Ok(OnConflictPolicy::Replace),
            other => Err(DomainError::InvalidInput(format!(
                "invalid conflict policy {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub acl: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportRequest {
    pub format: ExportFormat,
    pub dryrun: bool,
    pub on_conflict: OnConflictPolicy,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedKey {
    pub name: String,
    #[serde(default)]
    pub value_type: String,
    #[serde(default)]
    pub history_versions: Vec<String>,
}

/// Manifest stored as `metadata.json` at the archive root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMetadata {
    #[serde(default)]
    pub keys: Vec<ExportedKey>,
    #[serde(default)]
    pub tokens: Vec<ResourceLink>,
    #[serde(default)]
    pub policies: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatKeyValue {
    pub key: String,
    #[serde(default)]
    pub flags: u64,
    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    #[serde(rename = "kv")]
    Kv,
    #[serde(rename = "kv-history")]
    KvHistory,
    #[serde(rename = "policy")]
    Policy,
    #[serde(rename = "token")]
    Token,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportItem {
    pub kind: ItemKind,
    pub param: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ImportItem {
    pub fn new(kind: ItemKind, param: impl Into<String>) -> Self {
        Self {
            kind,
            param: param.into(),
            cause: None,
        }
    }

    pub fn failed(kind: ItemKind, param: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            kind,
            param: param.into(),
            cause: Some(cause.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResponse {
    pub successes: Vec<ImportItem>,
    pub conflicts: Vec<ImportItem>,
    pub errors: Vec<ImportItem>,
}

impl ImportResponse {
    pub fn success(&mut self, kind: ItemKind, param: impl Into<String>) {
        self.successes.push(ImportItem::new(kind, param));
    }

    pub fn conflict(&mut self, kind: ItemKind, param: impl Into<String>) {
        self.conflicts.push(ImportItem::new(kind, param));
    }

    pub fn error(&mut self, kind: ItemKind, param: impl Into<String>, cause: impl ToString) {
        self.errors.push(ImportItem::failed(kind, param, cause));
    }

    pub fn params(items: &[ImportItem], kind: ItemKind) -> Vec<&str> {
        items
            .iter()
            .filter(|item| item.kind == kind)
            .map(|item| item.param.as_str())
            .collect()
    }
}

pub fn token_param(link: &ResourceLink) -> String {
    format!("{}(ID:{})", link.name, link.id)
}
