use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, error, info, warn};

use crate::acl::{
    is_builtin_policy, AclService, CreatePolicyRequest, CreateTokenRequest, ExclusiveFilter,
    PolicyMode, ResourceLink, UpdateTokenRequest, GLOBAL_MANAGEMENT,
};
use crate::archive::{
    has_zip_magic, key_member, latest_member, policy_member, token_member, ArchiveError,
    ArchiveReader, ArchiveWriter,
};
use crate::context::RequestContext;
use crate::error::DomainError;
use crate::kv::KvService;
use crate::metadata::{now_timestamp, MetadataService, TokenMetadata, DEFAULT_VALUE_TYPE};
use crate::transfer::{
    token_param, ExportFormat, ExportMetadata, ExportRequest, ExportedKey, FlatKeyValue,
    ImportRequest, ImportResponse, ItemKind, OnConflictPolicy, MANIFEST_MEMBER,
};

pub const ADMIN_TOKEN_NAME: &str = "consee-admin";
pub const INITIALIZER: &str = "initializer";

/// Moves live store state in and out of portable archives, on top of the
/// KV, ACL and metadata services.
pub struct Reconciler {
    kv: Arc<KvService>,
    acl: Arc<AclService>,
    metadata: Arc<MetadataService>,
}

impl Reconciler {
    pub fn new(kv: Arc<KvService>, acl: Arc<AclService>, metadata: Arc<MetadataService>) -> Self {
        Self { kv, acl, metadata }
    }

    /// Registers the operator token under the admin name the first time the
    /// server runs against a store. Later runs change nothing.
    pub async fn initialize(&self) -> Result<(), DomainError> {
        let response = self
            .metadata
            .repository()
            .read_self(&RequestContext::default())
            .await
            .map_err(|err| {
                error!(error = %err, "failed to read self during initialization");
                DomainError::from(err)
            })?;
        match response.status {
            403 => return Err(DomainError::permission_denied()),
            404 => return Err(DomainError::NotFound("token not found".to_string())),
            _ => {}
        }
        if let Some(reason) = &response.decode_error {
            error!(error = %reason, "failed to parse self response during initialization");
            return Err(DomainError::parse_failed());
        }
        let token = response.body.ok_or_else(DomainError::parse_failed)?;
        if !token.policies.iter().any(|policy| policy.name == GLOBAL_MANAGEMENT) {
            error!(accessor_id = %token.accessor_id, "configured token is not a management token");
            return Err(DomainError::admin_required());
        }

        match self.metadata.get_token_name(&token.accessor_id).await {
            Ok(name) => {
                debug!(accessor_id = %token.accessor_id, name = %name, "admin token already registered");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                let now = now_timestamp();
                self.metadata
                    .write_id_name_mapping(&token.accessor_id, ADMIN_TOKEN_NAME)
                    .await?;
                self.metadata
                    .write_token_metadata(&token.accessor_id, &TokenMetadata::created(INITIALIZER, &now))
                    .await?;
                info!(accessor_id = %token.accessor_id, "registered admin token");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn export(
        &self,
        ctx: &RequestContext,
        req: &ExportRequest,
    ) -> Result<Vec<u8>, DomainError> {
        match ExportFormat::parse(&req.format)? {
            ExportFormat::Json => self.export_json(ctx, &req.keys).await,
            ExportFormat::Zip => self.export_zip(ctx, &req.keys, req.acl).await,
        }
    }

    async fn export_json(&self, ctx: &RequestContext, keys: &[String]) -> Result<Vec<u8>, DomainError> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let entry = self.kv.get(ctx, key).await.map_err(|err| {
                error!(key = %key, error = %err, "failed to read key during export");
                err
            })?;
            entries.push(FlatKeyValue {
                key: entry.key,
                flags: 0,
                value: STANDARD.encode(&entry.value),
            });
        }
        serde_json::to_vec(&entries).map_err(|err| DomainError::Internal(err.to_string()))
    }

    async fn export_zip(
        &self,
        ctx: &RequestContext,
        keys: &[String],
        include_acl: bool,
    ) -> Result<Vec<u8>, DomainError> {
        let mut archive = ArchiveWriter::new();
        let mut manifest = ExportMetadata::default();

        for key in keys {
            let entry = self.kv.get(ctx, key).await.map_err(|err| {
                error!(key = %key, error = %err, "failed to read key during export");
                err
            })?;
            archive.add(&latest_member(key), &entry.value).map_err(internal)?;

            let value_type = match self.metadata.get_value_type(key).await {
                Ok(value_type) => value_type,
                Err(err) if err.is_not_found() => DEFAULT_VALUE_TYPE.to_string(),
                Err(err) => {
                    error!(key = %key, error = %err, "failed to read value type during export");
                    return Err(err);
                }
            };

            let history_versions = match self.metadata.kv_history(key).await {
                Ok(entries) => entries.into_iter().map(|entry| entry.version).collect(),
                Err(DomainError::NotImplemented(_)) => Vec::new(),
                Err(err) => return Err(err),
            };
            for version in &history_versions {
                let value = self.metadata.kv_history_value(key, version).await?;
                archive.add(&key_member(key, version), &value).map_err(internal)?;
            }

            manifest.keys.push(ExportedKey {
                name: key.clone(),
                value_type,
                history_versions,
            });
        }

        if include_acl {
            manifest.tokens = self.export_tokens(ctx, &mut archive).await?;
            manifest.policies = self.export_policies(ctx, &mut archive).await?;
        }

        archive.add_json(MANIFEST_MEMBER, &manifest).map_err(internal)?;
        let bytes = archive.finish().map_err(internal)?;
        info!(
            keys = manifest.keys.len(),
            tokens = manifest.tokens.len(),
            policies = manifest.policies.len(),
            "export finished"
        );
        Ok(bytes)
    }

    async fn export_tokens(
        &self,
        ctx: &RequestContext,
        archive: &mut ArchiveWriter,
    ) -> Result<Vec<ResourceLink>, DomainError> {
        let links = self.acl.list_tokens().await?;
        for link in &links {
            let token = self.acl.read_token(ctx, &link.id).await.map_err(|err| {
                error!(accessor_id = %link.id, name = %link.name, error = %err, "failed to read token during export");
                err
            })?;
            let record = match token.exclusive_policy() {
                Some(policy) => CreateTokenRequest {
                    accessor_id: token.accessor_id.clone(),
                    secret_id: token.secret_id.clone(),
                    name: token.name.clone(),
                    policy_mode: PolicyMode::Exclusive,
                    rules: self.acl.read_policy(ctx, &policy.name).await?.rules,
                    ..CreateTokenRequest::default()
                },
                None => CreateTokenRequest {
                    accessor_id: token.accessor_id.clone(),
                    secret_id: token.secret_id.clone(),
                    name: token.name.clone(),
                    policy_mode: PolicyMode::Common,
                    policies: token.policies.iter().map(|policy| policy.name.clone()).collect(),
                    ..CreateTokenRequest::default()
                },
            };
            archive
                .add_json(&token_member(&link.id), &record)
                .map_err(internal)?;
        }
        Ok(links)
    }

    async fn export_policies(
        &self,
        ctx: &RequestContext,
        archive: &mut ArchiveWriter,
    ) -> Result<Vec<String>, DomainError> {
        let mut names = Vec::new();
        for link in self.acl.list_policies(ctx, ExclusiveFilter::Exclude).await? {
            if is_builtin_policy(&link.name) {
                continue;
            }
            let policy = self.acl.read_policy(ctx, &link.name).await.map_err(|err| {
                error!(policy = %link.name, error = %err, "failed to read policy during export");
                err
            })?;
            let record = CreatePolicyRequest {
                name: policy.name,
                description: policy.description,
                rules: policy.rules,
            };
            archive
                .add_json(&policy_member(&link.name), &record)
                .map_err(internal)?;
            names.push(link.name);
        }
        Ok(names)
    }

    /// Classifies every item of the payload, then writes it unless the
    /// request is a dry run. Failures of single items land in `errors`.
    pub async fn import(
        &self,
        ctx: &RequestContext,
        req: ImportRequest,
    ) -> Result<ImportResponse, DomainError> {
        match req.format {
            ExportFormat::Zip => {
                if !has_zip_magic(&req.content) {
                    return Err(DomainError::InvalidInput("invalid file format".to_string()));
                }
                let mut archive = ArchiveReader::open(req.content).map_err(|err| {
                    error!(error = %err, "failed to open import archive");
                    DomainError::InvalidInput(format!("invalid file format: {err}"))
                })?;
                let manifest: ExportMetadata = archive.manifest().map_err(|err| {
                    error!(error = %err, "failed to load import manifest");
                    match err {
                        ArchiveError::MissingMember(_) => DomainError::InvalidInput(
                            "invalid file format: metadata.json not found".to_string(),
                        ),
                        _ => DomainError::InvalidInput(
                            "invalid file format: metadata.json is invalid".to_string(),
                        ),
                    }
                })?;
                let preview = self.dry_run(ctx, &manifest).await;
                if req.dryrun {
                    return Ok(preview);
                }
                debug!(
                    conflicts = preview.conflicts.len(),
                    errors = preview.errors.len(),
                    "dry run finished, applying archive"
                );
                Ok(self.apply_zip(ctx, &mut archive, &manifest, req.on_conflict).await)
            }
            ExportFormat::Json => {
                let entries: Vec<FlatKeyValue> =
                    serde_json::from_slice(&req.content).map_err(|err| {
                        error!(error = %err, "failed to decode flat json import");
                        DomainError::InvalidInput(format!("invalid file format: {err}"))
                    })?;
                let manifest = ExportMetadata {
                    keys: entries
                        .iter()
                        .map(|entry| ExportedKey {
                            name: entry.key.clone(),
                            value_type: DEFAULT_VALUE_TYPE.to_string(),
                            history_versions: Vec::new(),
                        })
                        .collect(),
                    ..ExportMetadata::default()
                };
                let preview = self.dry_run(ctx, &manifest).await;
                if req.dryrun {
                    return Ok(preview);
                }
                Ok(self.apply_json(ctx, &entries, req.on_conflict).await)
            }
        }
    }

    pub async fn dry_run(&self, ctx: &RequestContext, manifest: &ExportMetadata) -> ImportResponse {
        let mut report = ImportResponse::default();

        for key in &manifest.keys {
            match self.kv.get(ctx, &key.name).await {
                Ok(_) => report.conflict(ItemKind::Kv, &key.name),
                Err(err) if err.is_not_found() => report.success(ItemKind::Kv, &key.name),
                Err(err) => report.error(ItemKind::Kv, &key.name, err),
            }
        }

        for name in &manifest.policies {
            if is_builtin_policy(name) {
                continue;
            }
            match self.acl.read_policy(ctx, name).await {
                Ok(_) => report.conflict(ItemKind::Policy, name),
                Err(err) if err.is_not_found() => report.success(ItemKind::Policy, name),
                Err(err) => report.error(ItemKind::Policy, name, err),
            }
        }

        for link in &manifest.tokens {
            let param = token_param(link);
            match self.acl.read_token(ctx, &link.id).await {
                Ok(_) => report.conflict(ItemKind::Token, param),
                Err(err) if err.is_not_found() => report.success(ItemKind::Token, param),
                Err(err) => report.error(ItemKind::Token, param, err),
            }
        }

        report
    }

    async fn apply_zip(
        &self,
        ctx: &RequestContext,
        archive: &mut ArchiveReader,
        manifest: &ExportMetadata,
        on_conflict: OnConflictPolicy,
    ) -> ImportResponse {
        let mut report = ImportResponse::default();

        for key in &manifest.keys {
            let value = match archive.read(&latest_member(&key.name)) {
                Ok(value) => value,
                Err(err) => {
                    warn!(key = %key.name, error = %err, "archive has no readable value for key");
                    report.error(ItemKind::Kv, &key.name, err);
                    continue;
                }
            };
            if !self
                .apply_key(ctx, &key.name, &value, &key.value_type, on_conflict, &mut report)
                .await
            {
                continue;
            }
            for version in &key.history_versions {
                let param = format!("{}:{}", key.name, version);
                let history = match archive.read(&key_member(&key.name, version)) {
                    Ok(history) => history,
                    Err(err) => {
                        report.error(ItemKind::KvHistory, param, err);
                        continue;
                    }
                };
                match self
                    .metadata
                    .add_history_version(&key.name, version, &history)
                    .await
                {
                    Ok(()) => {}
                    Err(DomainError::NotImplemented(_)) => {
                        debug!(key = %key.name, version = %version, "history storage unavailable, version dropped");
                    }
                    Err(err) => report.error(ItemKind::KvHistory, param, err),
                }
            }
        }

        for name in &manifest.policies {
            if is_builtin_policy(name) {
                continue;
            }
            let record: CreatePolicyRequest = match archive.read_json(&policy_member(name)) {
                Ok(record) => record,
                Err(ArchiveError::MissingMember(_)) => {
                    report.error(ItemKind::Policy, name, "policy not found");
                    continue;
                }
                Err(err) => {
                    warn!(policy = %name, error = %err, "undecodable policy in archive");
                    report.error(ItemKind::Policy, name, "invalid policy information");
                    continue;
                }
            };
            self.apply_policy(ctx, name, &record, &mut report).await;
        }

        for link in &manifest.tokens {
            let param = token_param(link);
            let record: CreateTokenRequest = match archive.read_json(&token_member(&link.id)) {
                Ok(record) => record,
                Err(ArchiveError::MissingMember(_)) => {
                    report.error(ItemKind::Token, param, "token not found");
                    continue;
                }
                Err(err) => {
                    warn!(accessor_id = %link.id, error = %err, "undecodable token in archive");
                    report.error(ItemKind::Token, param, "invalid token information");
                    continue;
                }
            };
            self.apply_token(ctx, &link.id, param, &record, &mut report).await;
        }

        info!(
            successes = report.successes.len(),
            conflicts = report.conflicts.len(),
            errors = report.errors.len(),
            "import applied"
        );
        report
    }

    async fn apply_json(
        &self,
        ctx: &RequestContext,
        entries: &[FlatKeyValue],
        on_conflict: OnConflictPolicy,
    ) -> ImportResponse {
        let mut report = ImportResponse::default();
        for entry in entries {
            let value = match STANDARD.decode(entry.value.as_bytes()) {
                Ok(value) => value,
                Err(err) => {
                    report.error(ItemKind::Kv, &entry.key, format!("invalid base64 value: {err}"));
                    continue;
                }
            };
            self.apply_key(ctx, &entry.key, &value, DEFAULT_VALUE_TYPE, on_conflict, &mut report)
                .await;
        }
        info!(
            successes = report.successes.len(),
            conflicts = report.conflicts.len(),
            errors = report.errors.len(),
            "flat import applied"
        );
        report
    }

    /// Returns `false` when the live key could not be looked up, in which
    /// case nothing else should be written for it.
    async fn apply_key(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &[u8],
        value_type: &str,
        on_conflict: OnConflictPolicy,
        report: &mut ImportResponse,
    ) -> bool {
        let existing = match self.kv.get(ctx, key).await {
            Ok(existing) => existing,
            Err(err) if err.is_not_found() => {
                match self.kv.create(ctx, key, value, value_type).await {
                    Ok(()) => report.success(ItemKind::Kv, key),
                    Err(err) => {
                        error!(key = %key, error = %err, "failed to create key during import");
                        report.error(ItemKind::Kv, key, err);
                    }
                }
                return true;
            }
            Err(err) => {
                report.error(ItemKind::Kv, key, err);
                return false;
            }
        };

        if existing.value == value {
            report.success(ItemKind::Kv, key);
            return true;
        }
        report.conflict(ItemKind::Kv, key);
        if on_conflict == OnConflictPolicy::Replace {
            if let Err(err) = self.kv.update(ctx, key, value).await {
                error!(key = %key, error = %err, "failed to replace key during import");
                report.error(ItemKind::Kv, key, err);
            } else if let Err(err) = self.kv.update_type(ctx, key, value_type).await {
                report.error(ItemKind::Kv, key, err);
            }
        }
        true
    }

    async fn apply_policy(
        &self,
        ctx: &RequestContext,
        name: &str,
        record: &CreatePolicyRequest,
        report: &mut ImportResponse,
    ) {
        match self.acl.read_policy(ctx, name).await {
            Ok(_) => {
                report.conflict(ItemKind::Policy, name);
                if let Err(err) = self.acl.update_policy_rule(ctx, name, &record.rules).await {
                    error!(policy = %name, error = %err, "failed to update policy during import");
                    report.error(ItemKind::Policy, name, err);
                }
            }
            Err(err) if err.is_not_found() => match self.acl.create_policy(ctx, record).await {
                Ok(_) => report.success(ItemKind::Policy, name),
                Err(err) => {
                    error!(policy = %name, error = %err, "failed to create policy during import");
                    report.error(ItemKind::Policy, name, err);
                }
            },
            Err(err) => report.error(ItemKind::Policy, name, err),
        }
    }

    async fn apply_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
        param: String,
        record: &CreateTokenRequest,
        report: &mut ImportResponse,
    ) {
        match self.acl.read_token(ctx, accessor_id).await {
            Ok(existing) => {
                report.conflict(ItemKind::Token, param.clone());
                let update = UpdateTokenRequest {
                    policies: record.policies.clone(),
                    roles: existing.roles.iter().map(|role| role.id.clone()).collect(),
                };
                if let Err(err) = self.acl.update_token(ctx, accessor_id, &update).await {
                    error!(accessor_id = %accessor_id, error = %err, "failed to update token during import");
                    report.error(ItemKind::Token, param, err);
                }
            }
            Err(err) if err.is_not_found() => match self.acl.create_token(ctx, record).await {
                Ok(_) => report.success(ItemKind::Token, param),
                Err(err) => {
                    error!(accessor_id = %accessor_id, error = %err, "failed to create token during import");
                    report.error(ItemKind::Token, param, err);
                }
            },
            Err(err) => report.error(ItemKind::Token, param, err),
        }
    }
}

fn internal(err: ArchiveError) -> DomainError {
    error!(error = %err, "archive write failed");
    DomainError::Internal(err.to_string())
}
