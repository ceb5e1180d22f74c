use std::sync::Arc;
use std::time::Duration;

use consul_client::{AclLink, AclPolicy, AclRole, AclToken};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{check_response, take_body, DomainError};
use crate::hcl_rules::{parse_rules, ParsedRule};
use crate::metadata::{now_timestamp, MetadataService, TokenMetadata};
use crate::repository::AclRepository;

pub const GLOBAL_MANAGEMENT: &str = "global-management";
pub const GLOBAL_READ_ONLY: &str = "builtin/global-read-only";
pub const EXCLUSIVE_POLICY_PREFIX: &str = "--";
pub const DEFAULT_TOKEN_NAME_PREFIX: &str = "consee-token-";

const SECRET_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub fn is_builtin_policy(name: &str) -> bool {
    name == GLOBAL_MANAGEMENT || name == GLOBAL_READ_ONLY
}

/// `--` followed by a lowercase hyphenated UUID.
pub fn is_exclusive_policy_name(name: &str) -> bool {
    let Some(id) = name.strip_prefix(EXCLUSIVE_POLICY_PREFIX) else {
        return false;
    };
    id.len() == 36
        && !id.bytes().any(|b| b.is_ascii_uppercase())
        && Uuid::try_parse(id).is_ok()
}

pub fn exclusive_policy_name(accessor_id: &str) -> String {
    format!("{EXCLUSIVE_POLICY_PREFIX}{accessor_id}")
}

/// Time-ordered v7 identifier; the random tail comes from the OS generator.
pub fn generate_id() -> Result<String, DomainError> {
    let mut bytes = [0u8; 10];
    OsRng.try_fill_bytes(&mut bytes).map_err(|err| {
        error!(error = %err, "failed to read random bytes");
        DomainError::Internal(format!("failed to generate id: {err}"))
    })?;
    let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    Ok(uuid::Builder::from_unix_timestamp_millis(millis, &bytes)
        .into_uuid()
        .to_string())
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    pub id: String,
    pub name: String,
}

impl From<&AclLink> for ResourceLink {
    fn from(link: &AclLink) -> Self {
        Self {
            id: link.id.clone(),
            name: link.name.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    #[default]
    #[serde(alias = "")]
    Common,
    Exclusive,
}

impl PolicyMode {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "" | "common" => Ok(PolicyMode::Common),
            "exclusive" => Ok(PolicyMode::Exclusive),
            _ => Err(DomainError::InvalidInput("invalid policy mode".to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTokenRequest {
    #[serde(default)]
    pub accessor_id: String,
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub policy_mode: PolicyMode,
    #[serde(default)]
    pub rules: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTokenRequest {
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadTokenResponse {
    pub accessor_id: String,
    pub secret_id: String,
    pub policies: Vec<ResourceLink>,
    pub roles: Vec<ResourceLink>,
    pub name: String,
    pub metadata: Option<TokenMetadata>,
}

impl ReadTokenResponse {
    /// The owned policy when the token runs in exclusive mode.
    pub fn exclusive_policy(&self) -> Option<&ResourceLink> {
        match self.policies.as_slice() {
            [only] if only.name == exclusive_policy_name(&self.accessor_id) => Some(only),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExclusiveFilter {
    #[default]
    All,
    Only,
    Exclude,
}

impl ExclusiveFilter {
    pub fn from_query(value: &str) -> Self {
        match value {
            "1" => ExclusiveFilter::Only,
            "0" => ExclusiveFilter::Exclude,
            _ => ExclusiveFilter::All,
        }
    }

    fn keeps(self, name: &str) -> bool {
        match self {
            ExclusiveFilter::All => true,
            ExclusiveFilter::Only => is_exclusive_policy_name(name),
            ExclusiveFilter::Exclude => !is_exclusive_policy_name(name),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePolicyRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadPolicyResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parsed_rules: Vec<ParsedRule>,
    pub rules: String,
    pub tokens: Vec<ResourceLink>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidateHclRulesResponse {
    pub valid: bool,
    pub parsed: Vec<ParsedRule>,
    pub unparsed: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policies: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub policies: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadRoleResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub policies: Vec<ResourceLink>,
}

pub struct AclService {
    repo: Arc<dyn AclRepository>,
    metadata: Arc<MetadataService>,
}

impl AclService {
    pub fn new(repo: Arc<dyn AclRepository>, metadata: Arc<MetadataService>) -> Self {
        Self { repo, metadata }
    }

    pub async fn validate_token(&self, ctx: &RequestContext) -> Result<AclToken, DomainError> {
        let response = self.repo.read_self(ctx).await.map_err(|err| {
            error!(error = %err, "failed to read self during token validation");
            DomainError::from(err)
        })?;
        take_body(response, "token not found")
    }

    pub async fn check_admin(&self, ctx: &RequestContext) -> Result<(), DomainError> {
        let token = self.validate_token(ctx).await?;
        if token.policies.iter().any(|policy| policy.name == GLOBAL_MANAGEMENT) {
            Ok(())
        } else {
            Err(DomainError::permission_denied())
        }
    }

    pub async fn list_tokens(&self) -> Result<Vec<ResourceLink>, DomainError> {
        let mappings = self.metadata.list_id_name_mappings().await?;
        Ok(mappings
            .into_iter()
            .map(|(id, name)| ResourceLink { id, name })
            .collect())
    }

    pub async fn read_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<ReadTokenResponse, DomainError> {
        let response = self.repo.read_token(ctx, accessor_id).await.map_err(|err| {
            error!(accessor_id = %accessor_id, error = %err, "failed to read token");
            DomainError::from(err)
        })?;
        let token = take_body(response, "token not found")?;
        let name = match self.metadata.get_token_name(accessor_id).await {
            Ok(name) => name,
            Err(err) if err.is_not_found() => String::new(),
            Err(err) => return Err(err),
        };
        let metadata = match self.metadata.get_token_metadata(accessor_id).await {
            Ok(metadata) => Some(metadata),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };
        Ok(ReadTokenResponse {
            accessor_id: token.accessor_id,
            secret_id: token.secret_id,
            policies: token.policies.iter().map(ResourceLink::from).collect(),
            roles: token.roles.iter().map(ResourceLink::from).collect(),
            name,
            metadata,
        })
    }

    pub async fn create_token(
        &self,
        ctx: &RequestContext,
        req: &CreateTokenRequest,
    ) -> Result<ResourceLink, DomainError> {
        if !req.accessor_id.is_empty() && self.name_of(&req.accessor_id).await?.is_some() {
            return Err(DomainError::AlreadyExists(
                "token accessor id already exists".to_string(),
            ));
        }
        if !req.name.is_empty() {
            match self.metadata.get_token_id_by_name(&req.name).await {
                Ok(id) if !id.is_empty() => {
                    return Err(DomainError::AlreadyExists(
                        "token name already exists".to_string(),
                    ))
                }
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        if !req.secret_id.is_empty() && self.secret_in_use(&req.secret_id).await? {
            return Err(DomainError::AlreadyExists(
                "token secret id already exists".to_string(),
            ));
        }

        let creator = self.caller_label(ctx).await?;
        let accessor_id = if req.accessor_id.is_empty() {
            generate_id()?
        } else {
            req.accessor_id.clone()
        };
        let secret_id = if req.secret_id.is_empty() {
            generate_id()?
        } else {
            req.secret_id.clone()
        };

        match req.policy_mode {
            PolicyMode::Exclusive => {
                self.create_exclusive_token(ctx, &accessor_id, &secret_id, &req.rules)
                    .await?
            }
            PolicyMode::Common => {
                for policy in &req.policies {
                    if is_exclusive_policy_name(policy) {
                        return Err(DomainError::InvalidInput(format!(
                            "policy {policy} is exclusive"
                        )));
                    }
                    self.read_policy_raw(ctx, policy).await?;
                }
                let token = AclToken {
                    accessor_id: accessor_id.clone(),
                    secret_id,
                    policies: req.policies.iter().map(AclLink::by_name).collect(),
                    roles: req.roles.iter().map(AclLink::by_id).collect(),
                    ..AclToken::default()
                };
                let response = self.repo.create_token(ctx, &token).await?;
                take_body(response, "token not found")?;
            }
        }

        let name = if req.name.is_empty() {
            format!("{DEFAULT_TOKEN_NAME_PREFIX}{accessor_id}")
        } else {
            req.name.clone()
        };
        let now = now_timestamp();
        self.metadata.write_id_name_mapping(&accessor_id, &name).await?;
        self.metadata
            .write_token_metadata(&accessor_id, &TokenMetadata::created(&creator, &now))
            .await?;
        info!(accessor_id = %accessor_id, name = %name, "token created");
        Ok(ResourceLink {
            id: accessor_id,
            name,
        })
    }

    async fn create_exclusive_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
        secret_id: &str,
        rules: &str,
    ) -> Result<(), DomainError> {
        let policy = AclPolicy {
            name: exclusive_policy_name(accessor_id),
            description: format!("exclusive policy of token {accessor_id}"),
            rules: rules.to_string(),
            ..AclPolicy::default()
        };
        let response = self.repo.create_policy(ctx, &policy).await?;
        let policy = take_body(response, "policy not found")?;

        let token = AclToken {
            accessor_id: accessor_id.to_string(),
            secret_id: secret_id.to_string(),
            policies: vec![AclLink::by_id(&policy.id)],
            ..AclToken::default()
        };
        let created = match self.repo.create_token(ctx, &token).await {
            Ok(response) => take_body(response, "token not found").map(|_| ()),
            Err(err) => Err(DomainError::from(err)),
        };
        if let Err(err) = created {
            warn!(accessor_id = %accessor_id, error = %err, "token creation failed, removing its exclusive policy");
            if let Err(cleanup) = self.repo.delete_policy(ctx, &policy.id).await {
                error!(policy_id = %policy.id, error = %cleanup, "failed to remove orphaned exclusive policy");
            }
            return Err(err);
        }
        Ok(())
    }

    pub async fn update_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
        req: &UpdateTokenRequest,
    ) -> Result<(), DomainError> {
        let response = self.repo.read_token(ctx, accessor_id).await?;
        let token = take_body(response, "token not found")?;
        if let [only] = token.policies.as_slice() {
            if is_exclusive_policy_name(&only.name) {
                return Err(DomainError::PermissionDenied(
                    "token has an exclusive policy".to_string(),
                ));
            }
        }
        for policy in &req.policies {
            let found = self.read_policy_raw(ctx, policy).await?;
            if is_exclusive_policy_name(&found.name) {
                return Err(DomainError::PermissionDenied(format!(
                    "policy {} is exclusive",
                    found.name
                )));
            }
        }

        let updated = AclToken {
            accessor_id: accessor_id.to_string(),
            description: token.description.clone(),
            policies: req.policies.iter().map(AclLink::by_name).collect(),
            roles: req.roles.iter().map(AclLink::by_id).collect(),
            ..AclToken::default()
        };
        let response = self.repo.update_token(ctx, &updated).await?;
        check_response(&response, "token not found")?;

        let updater = self.caller_label(ctx).await?;
        let now = now_timestamp();
        let metadata = match self.metadata.get_token_metadata(accessor_id).await {
            Ok(existing) => existing.updated(&updater, &now),
            Err(err) if err.is_not_found() => {
                warn!(accessor_id = %accessor_id, "token had no metadata, recording it now");
                TokenMetadata::created(&updater, &now)
            }
            Err(err) => return Err(err),
        };
        self.metadata.write_token_metadata(accessor_id, &metadata).await
    }

    pub async fn delete_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<(), DomainError> {
        let token = self.read_token(ctx, accessor_id).await?;
        let response = self.repo.delete_token(ctx, accessor_id).await?;
        check_response(&response, "token not found")?;

        self.metadata.delete_token_metadata(accessor_id).await;
        self.metadata.delete_id_name_mapping(accessor_id).await;
        if let Some(policy) = token.exclusive_policy() {
            if let Err(err) = self.repo.delete_policy(ctx, &policy.id).await {
                error!(policy_id = %policy.id, error = %err, "failed to delete exclusive policy");
            }
        }
        info!(accessor_id = %accessor_id, "token deleted");
        Ok(())
    }

    pub fn validate_hcl_rules(&self, rules: &str) -> ValidateHclRulesResponse {
        match parse_rules(rules) {
            Ok(set) => ValidateHclRulesResponse {
                valid: true,
                parsed: set.parsed,
                unparsed: set.unparsed.join(", "),
                error: String::new(),
            },
            Err(err) => ValidateHclRulesResponse {
                error: err,
                ..ValidateHclRulesResponse::default()
            },
        }
    }

    pub async fn list_policies(
        &self,
        ctx: &RequestContext,
        filter: ExclusiveFilter,
    ) -> Result<Vec<ResourceLink>, DomainError> {
        let response = self.repo.list_policies(ctx).await?;
        let policies = take_body(response, "policy not found")?;
        let mut links: Vec<ResourceLink> = policies
            .into_iter()
            .filter(|policy| filter.keeps(&policy.name))
            .map(|policy| ResourceLink {
                id: policy.id,
                name: policy.name,
            })
            .collect();
        links.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(links)
    }

    pub async fn read_policy(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<ReadPolicyResponse, DomainError> {
        let policy = self.read_policy_raw(ctx, name).await?;
        let parsed_rules = match parse_rules(&policy.rules) {
            Ok(set) => set.parsed,
            Err(err) => {
                warn!(policy = %name, error = %err, "stored policy rules do not parse");
                Vec::new()
            }
        };
        let tokens = self.policy_tokens(ctx, &policy.id).await?;
        Ok(ReadPolicyResponse {
            id: policy.id,
            name: policy.name,
            description: policy.description,
            parsed_rules,
            rules: policy.rules,
            tokens,
        })
    }

    pub async fn create_policy(
        &self,
        ctx: &RequestContext,
        req: &CreatePolicyRequest,
    ) -> Result<ResourceLink, DomainError> {
        if req.name.is_empty() {
            return Err(DomainError::InvalidInput("policy name is required".to_string()));
        }
        if is_exclusive_policy_name(&req.name) {
            return Err(DomainError::InvalidInput(
                "exclusive policy can not be created separately".to_string(),
            ));
        }
        match self.read_policy_raw(ctx, &req.name).await {
            Ok(_) => {
                return Err(DomainError::AlreadyExists(
                    "policy name already exists".to_string(),
                ))
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        if let Err(err) = parse_rules(&req.rules) {
            return Err(DomainError::InvalidInput(format!("invalid HCL rules: {err}")));
        }
        let policy = AclPolicy {
            name: req.name.clone(),
            description: req.description.clone(),
            rules: req.rules.clone(),
            ..AclPolicy::default()
        };
        let response = self.repo.create_policy(ctx, &policy).await?;
        let created = take_body(response, "policy not found")?;
        info!(policy = %created.name, "policy created");
        Ok(ResourceLink {
            id: created.id,
            name: created.name,
        })
    }

    pub async fn update_policy_rule(
        &self,
        ctx: &RequestContext,
        name: &str,
        rules: &str,
    ) -> Result<(), DomainError> {
        if is_exclusive_policy_name(name) {
            return Err(DomainError::PermissionDenied(
                "exclusive policy can not be updated separately".to_string(),
            ));
        }
        let policy = self.read_policy_raw(ctx, name).await?;
        if let Err(err) = parse_rules(rules) {
            return Err(DomainError::InvalidInput(format!("invalid HCL rules: {err}")));
        }
        let updated = AclPolicy {
            rules: rules.to_string(),
            ..policy
        };
        let response = self.repo.update_policy(ctx, &updated).await?;
        check_response(&response, "policy not found")
    }

    pub async fn delete_policy(&self, ctx: &RequestContext, name: &str) -> Result<(), DomainError> {
        if is_exclusive_policy_name(name) {
            return Err(DomainError::PermissionDenied(
                "exclusive policy can not be deleted separately".to_string(),
            ));
        }
        let policy = self.read_policy_raw(ctx, name).await?;
        let response = self.repo.delete_policy(ctx, &policy.id).await?;
        check_response(&response, "policy not found")?;
        info!(policy = %name, "policy deleted");
        Ok(())
    }

    pub async fn list_roles(&self, ctx: &RequestContext) -> Result<Vec<ResourceLink>, DomainError> {
        let response = self.repo.list_roles(ctx).await?;
        let roles = take_body(response, "role not found")?;
        let mut links: Vec<ResourceLink> = roles
            .into_iter()
            .map(|role| ResourceLink {
                id: role.id,
                name: role.name,
            })
            .collect();
        links.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(links)
    }

    pub async fn read_role(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<ReadRoleResponse, DomainError> {
        let role = self.read_role_raw(ctx, name).await?;
        Ok(ReadRoleResponse {
            id: role.id,
            name: role.name,
            description: role.description,
            policies: role.policies.iter().map(ResourceLink::from).collect(),
        })
    }

    pub async fn create_role(
        &self,
        ctx: &RequestContext,
        req: &CreateRoleRequest,
    ) -> Result<ResourceLink, DomainError> {
        if req.name.is_empty() {
            return Err(DomainError::InvalidInput("role name is required".to_string()));
        }
        match self.read_role_raw(ctx, &req.name).await {
            Ok(_) => {
                return Err(DomainError::AlreadyExists(
                    "role name already exists".to_string(),
                ))
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        reject_exclusive_links(&req.policies)?;
        let role = AclRole {
            name: req.name.clone(),
            description: req.description.clone(),
            policies: req.policies.iter().map(AclLink::by_name).collect(),
            ..AclRole::default()
        };
        let response = self.repo.create_role(ctx, &role).await?;
        let created = take_body(response, "role not found")?;
        Ok(ResourceLink {
            id: created.id,
            name: created.name,
        })
    }

    pub async fn update_role(
        &self,
        ctx: &RequestContext,
        name: &str,
        req: &UpdateRoleRequest,
    ) -> Result<(), DomainError> {
        reject_exclusive_links(&req.policies)?;
        let role = self.read_role_raw(ctx, name).await?;
        let updated = AclRole {
            description: req.description.clone().unwrap_or(role.description.clone()),
            policies: req.policies.iter().map(AclLink::by_name).collect(),
            ..role
        };
        let response = self.repo.update_role(ctx, &updated).await?;
        check_response(&response, "role not found")
    }

    pub async fn delete_role(&self, ctx: &RequestContext, name: &str) -> Result<(), DomainError> {
        let role = self.read_role_raw(ctx, name).await?;
        let response = self.repo.delete_role(ctx, &role.id).await?;
        check_response(&response, "role not found")
    }

    async fn read_policy_raw(&self, ctx: &RequestContext, name: &str) -> Result<AclPolicy, DomainError> {
        let response = self.repo.read_policy_by_name(ctx, name).await.map_err(|err| {
            error!(policy = %name, error = %err, "failed to read policy");
            DomainError::from(err)
        })?;
        take_body(response, "policy not found")
    }

    async fn read_role_raw(&self, ctx: &RequestContext, name: &str) -> Result<AclRole, DomainError> {
        let response = self.repo.read_role_by_name(ctx, name).await?;
        take_body(response, "role not found")
    }

    async fn policy_tokens(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Vec<ResourceLink>, DomainError> {
        let response = self.repo.list_tokens_by_policy(ctx, policy_id).await?;
        let tokens = take_body(response, "policy not found")?;
        let mut links = Vec::with_capacity(tokens.len());
        for token in tokens {
            let name = self.name_of(&token.accessor_id).await?.unwrap_or_default();
            links.push(ResourceLink {
                id: token.accessor_id,
                name,
            });
        }
        Ok(links)
    }

    async fn name_of(&self, accessor_id: &str) -> Result<Option<String>, DomainError> {
        match self.metadata.get_token_name(accessor_id).await {
            Ok(name) if name.is_empty() => Ok(None),
            Ok(name) => Ok(Some(name)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn secret_in_use(&self, secret_id: &str) -> Result<bool, DomainError> {
        let probe = RequestContext::with_token(secret_id);
        let response = tokio::time::timeout(SECRET_PROBE_TIMEOUT, self.repo.read_self(&probe))
            .await
            .map_err(|_| DomainError::connection_failed())??;
        Ok(response.is_success() || response.body.is_some())
    }

    async fn caller_label(&self, ctx: &RequestContext) -> Result<String, DomainError> {
        let response = self.repo.read_self(ctx).await?;
        if !response.is_success() {
            return Err(DomainError::unknown());
        }
        let token = response.body.ok_or_else(DomainError::parse_failed)?;
        let name = self
            .name_of(&token.accessor_id)
            .await?
            .unwrap_or_else(|| "unknown".to_string());
        Ok(format!("{} ({})", token.accessor_id, name))
    }
}

fn reject_exclusive_links(policies: &[String]) -> Result<(), DomainError> {
    match policies.iter().find(|policy| is_exclusive_policy_name(policy)) {
        Some(policy) => Err(DomainError::InvalidInput(format!(
            "policy {policy} is exclusive"
        ))),
        None => Ok(()),
    }
}
