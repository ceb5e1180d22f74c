use async_trait::async_trait;
use consul_client::{
    AclEndpoint, AclPolicy, AclRole, AclToken, ClientError, KvEndpoint, KvPair, QueryOptions,
    Response, WriteOptions,
};
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;

pub type KeysCallback<'a> = dyn FnMut(&Response<Vec<String>>) -> bool + Send + 'a;

#[async_trait]
pub trait KvRepository: Send + Sync {
    async fn list_keys(
        &self,
        ctx: &RequestContext,
        prefix: &str,
        separator: &str,
    ) -> Result<Response<Vec<String>>, ClientError>;
    async fn list(
        &self,
        ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Response<Vec<KvPair>>, ClientError>;
    async fn read(&self, ctx: &RequestContext, key: &str) -> Result<Response<KvPair>, ClientError>;
    async fn write(
        &self,
        ctx: &RequestContext,
        pair: &KvPair,
    ) -> Result<Response<bool>, ClientError>;
    async fn delete(&self, ctx: &RequestContext, key: &str)
        -> Result<Response<bool>, ClientError>;
    async fn delete_tree(
        &self,
        ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Response<bool>, ClientError>;
    async fn watch_keys(
        &self,
        ctx: &RequestContext,
        prefix: &str,
        cancel: &CancellationToken,
        on_response: &mut KeysCallback<'_>,
    ) -> Result<(), ClientError>;
}

#[async_trait]
pub trait AclRepository: Send + Sync {
    async fn read_self(&self, ctx: &RequestContext) -> Result<Response<AclToken>, ClientError>;
    async fn list_tokens(
        &self,
        ctx: &RequestContext,
    ) -> Result<Response<Vec<AclToken>>, ClientError>;
    async fn list_tokens_by_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<Vec<AclToken>>, ClientError>;
    async fn read_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<Response<AclToken>, ClientError>;
    async fn create_token(
        &self,
        ctx: &RequestContext,
        token: &AclToken,
    ) -> Result<Response<AclToken>, ClientError>;
    async fn update_token(
        &self,
        ctx: &RequestContext,
        token: &AclToken,
    ) -> Result<Response<AclToken>, ClientError>;
    async fn delete_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<Response<bool>, ClientError>;
    async fn list_policies(
        &self,
        ctx: &RequestContext,
    ) -> Result<Response<Vec<AclPolicy>>, ClientError>;
    async fn read_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<AclPolicy>, ClientError>;
    async fn read_policy_by_name(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Response<AclPolicy>, ClientError>;
    async fn create_policy(
        &self,
        ctx: &RequestContext,
        policy: &AclPolicy,
    ) -> Result<Response<AclPolicy>, ClientError>;
    async fn update_policy(
        &self,
        ctx: &RequestContext,
        policy: &AclPolicy,
    ) -> Result<Response<AclPolicy>, ClientError>;
    async fn delete_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<bool>, ClientError>;
    async fn list_roles(&self, ctx: &RequestContext)
        -> Result<Response<Vec<AclRole>>, ClientError>;
    async fn read_role(
        &self,
        ctx: &RequestContext,
        role_id: &str,
    ) -> Result<Response<AclRole>, ClientError>;
    async fn read_role_by_name(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Response<AclRole>, ClientError>;
    async fn create_role(
        &self,
        ctx: &RequestContext,
        role: &AclRole,
    ) -> Result<Response<AclRole>, ClientError>;
    async fn update_role(
        &self,
        ctx: &RequestContext,
        role: &AclRole,
    ) -> Result<Response<AclRole>, ClientError>;
    async fn delete_role(
        &self,
        ctx: &RequestContext,
        role_id: &str,
    ) -> Result<Response<bool>, ClientError>;
}

/// Both capabilities under one set of fixed credentials.
pub trait AdminRepository: KvRepository + AclRepository {}

impl<T: KvRepository + AclRepository> AdminRepository for T {}

#[derive(Clone)]
pub struct ConsulKvRepository {
    kv: KvEndpoint,
    datacenter: String,
}

impl ConsulKvRepository {
    pub fn new(kv: KvEndpoint, datacenter: impl Into<String>) -> Self {
        Self {
            kv,
            datacenter: datacenter.into(),
        }
    }
}

#[derive(Clone)]
pub struct ConsulAclRepository {
    acl: AclEndpoint,
    datacenter: String,
}

impl ConsulAclRepository {
    pub fn new(acl: AclEndpoint, datacenter: impl Into<String>) -> Self {
        Self {
            acl,
            datacenter: datacenter.into(),
        }
    }
}

fn query_options(ctx: &RequestContext, datacenter: &str) -> QueryOptions {
    QueryOptions {
        datacenter: datacenter.to_string(),
        token: ctx.token.clone(),
        ..QueryOptions::default()
    }
}

fn write_options(ctx: &RequestContext, datacenter: &str) -> WriteOptions {
    WriteOptions {
        datacenter: datacenter.to_string(),
        token: ctx.token.clone(),
        ..WriteOptions::default()
    }
}

#[async_trait]
impl KvRepository for ConsulKvRepository {
    async fn list_keys(
        &self,
        ctx: &RequestContext,
        prefix: &str,
        separator: &str,
    ) -> Result<Response<Vec<String>>, ClientError> {
        let options = query_options(ctx, &self.datacenter);
        self.kv.keys(prefix, separator, &options).await
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Response<Vec<KvPair>>, ClientError> {
        self.kv.list(prefix, &query_options(ctx, &self.datacenter)).await
    }

    async fn read(&self, ctx: &RequestContext, key: &str) -> Result<Response<KvPair>, ClientError> {
        self.kv.get(key, &query_options(ctx, &self.datacenter)).await
    }

    async fn write(
        &self,
        ctx: &RequestContext,
        pair: &KvPair,
    ) -> Result<Response<bool>, ClientError> {
        self.kv.put(pair, &write_options(ctx, &self.datacenter)).await
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        key: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.kv.delete(key, &write_options(ctx, &self.datacenter)).await
    }

    async fn delete_tree(
        &self,
        ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.kv
            .delete_tree(prefix, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn watch_keys(
        &self,
        ctx: &RequestContext,
        prefix: &str,
        cancel: &CancellationToken,
        on_response: &mut KeysCallback<'_>,
    ) -> Result<(), ClientError> {
        let options = query_options(ctx, &self.datacenter);
        self.kv
            .watch_keys(prefix, &options, cancel, |response| on_response(response))
            .await
    }
}

#[async_trait]
impl AclRepository for ConsulAclRepository {
    async fn read_self(&self, ctx: &RequestContext) -> Result<Response<AclToken>, ClientError> {
        self.acl
            .token_read_self(&query_options(ctx, &self.datacenter))
            .await
    }

    async fn list_tokens(
        &self,
        ctx: &RequestContext,
    ) -> Result<Response<Vec<AclToken>>, ClientError> {
        self.acl.token_list(&query_options(ctx, &self.datacenter)).await
    }

    async fn list_tokens_by_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<Vec<AclToken>>, ClientError> {
        self.acl
            .token_list_by_policy(policy_id, &query_options(ctx, &self.datacenter))
            .await
    }

    async fn read_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<Response<AclToken>, ClientError> {
        self.acl
            .token_read(accessor_id, &query_options(ctx, &self.datacenter))
            .await
    }

    async fn create_token(
        &self,
        ctx: &RequestContext,
        token: &AclToken,
    ) -> Result<Response<AclToken>, ClientError> {
        self.acl
            .token_create(token, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn update_token(
        &self,
        ctx: &RequestContext,
        token: &AclToken,
    ) -> Result<Response<AclToken>, ClientError> {
        self.acl
            .token_update(token, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn delete_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.acl
            .token_delete(accessor_id, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn list_policies(
        &self,
        ctx: &RequestContext,
    ) -> Result<Response<Vec<AclPolicy>>, ClientError> {
        self.acl.policy_list(&query_options(ctx, &self.datacenter)).await
    }

    async fn read_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.acl
            .policy_read(policy_id, &query_options(ctx, &self.datacenter))
            .await
    }

    async fn read_policy_by_name(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.acl
            .policy_read_by_name(name, &query_options(ctx, &self.datacenter))
            .await
    }

    async fn create_policy(
        &self,
        ctx: &RequestContext,
        policy: &AclPolicy,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.acl
            .policy_create(policy, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn update_policy(
        &self,
        ctx: &RequestContext,
        policy: &AclPolicy,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.acl
            .policy_update(policy, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn delete_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.acl
            .policy_delete(policy_id, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn list_roles(
        &self,
        ctx: &RequestContext,
    ) -> Result<Response<Vec<AclRole>>, ClientError> {
        self.acl.role_list(&query_options(ctx, &self.datacenter)).await
    }

    async fn read_role(
        &self,
        ctx: &RequestContext,
        role_id: &str,
    ) -> Result<Response<AclRole>, ClientError> {
        self.acl
            .role_read(role_id, &query_options(ctx, &self.datacenter))
            .await
    }

    async fn read_role_by_name(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Response<AclRole>, ClientError> {
        self.acl
            .role_read_by_name(name, &query_options(ctx, &self.datacenter))
            .await
    }

    async fn create_role(
        &self,
        ctx: &RequestContext,
        role: &AclRole,
    ) -> Result<Response<AclRole>, ClientError> {
        self.acl
            .role_create(role, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn update_role(
        &self,
        ctx: &RequestContext,
        role: &AclRole,
    ) -> Result<Response<AclRole>, ClientError> {
        self.acl
            .role_update(role, &write_options(ctx, &self.datacenter))
            .await
    }

    async fn delete_role(
        &self,
        ctx: &RequestContext,
        role_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.acl
            .role_delete(role_id, &write_options(ctx, &self.datacenter))
            .await
    }
}

/// Repository pinned to the operator's admin token; the caller context passed
/// to each method is ignored.
#[derive(Clone)]
pub struct ConsulAdminRepository {
    kv: ConsulKvRepository,
    acl: ConsulAclRepository,
    credentials: RequestContext,
}

impl ConsulAdminRepository {
    pub fn new(kv: ConsulKvRepository, acl: ConsulAclRepository, admin_token: &str) -> Self {
        Self {
            kv,
            acl,
            credentials: RequestContext::with_token(admin_token),
        }
    }
}

#[async_trait]
impl KvRepository for ConsulAdminRepository {
    async fn list_keys(
        &self,
        _ctx: &RequestContext,
        prefix: &str,
        separator: &str,
    ) -> Result<Response<Vec<String>>, ClientError> {
        self.kv.list_keys(&self.credentials, prefix, separator).await
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Response<Vec<KvPair>>, ClientError> {
        self.kv.list(&self.credentials, prefix).await
    }

    async fn read(&self, _ctx: &RequestContext, key: &str) -> Result<Response<KvPair>, ClientError> {
        self.kv.read(&self.credentials, key).await
    }

    async fn write(
        &self,
        _ctx: &RequestContext,
        pair: &KvPair,
    ) -> Result<Response<bool>, ClientError> {
        self.kv.write(&self.credentials, pair).await
    }

    async fn delete(
        &self,
        _ctx: &RequestContext,
        key: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.kv.delete(&self.credentials, key).await
    }

    async fn delete_tree(
        &self,
        _ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.kv.delete_tree(&self.credentials, prefix).await
    }

    async fn watch_keys(
        &self,
        _ctx: &RequestContext,
        prefix: &str,
        cancel: &CancellationToken,
        on_response: &mut KeysCallback<'_>,
    ) -> Result<(), ClientError> {
        self.kv
            .watch_keys(&self.credentials, prefix, cancel, on_response)
            .await
    }
}

#[async_trait]
impl AclRepository for ConsulAdminRepository {
    async fn read_self(&self, _ctx: &RequestContext) -> Result<Response<AclToken>, ClientError> {
        self.acl.read_self(&self.credentials).await
    }

    async fn list_tokens(
        &self,
        _ctx: &RequestContext,
    ) -> Result<Response<Vec<AclToken>>, ClientError> {
        self.acl.list_tokens(&self.credentials).await
    }

    async fn list_tokens_by_policy(
        &self,
        _ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<Vec<AclToken>>, ClientError> {
        self.acl
            .list_tokens_by_policy(&self.credentials, policy_id)
            .await
    }

    async fn read_token(
        &self,
        _ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<Response<AclToken>, ClientError> {
        self.acl.read_token(&self.credentials, accessor_id).await
    }

    async fn create_token(
        &self,
        _ctx: &RequestContext,
        token: &AclToken,
    ) -> Result<Response<AclToken>, ClientError> {
        self.acl.create_token(&self.credentials, token).await
    }

    async fn update_token(
        &self,
        _ctx: &RequestContext,
        token: &AclToken,
    ) -> Result<Response<AclToken>, ClientError> {
        self.acl.update_token(&self.credentials, token).await
    }

    async fn delete_token(
        &self,
        _ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.acl.delete_token(&self.credentials, accessor_id).await
    }

    async fn list_policies(
        &self,
        _ctx: &RequestContext,
    ) -> Result<Response<Vec<AclPolicy>>, ClientError> {
        self.acl.list_policies(&self.credentials).await
    }

    async fn read_policy(
        &self,
        _ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.acl.read_policy(&self.credentials, policy_id).await
    }

    async fn read_policy_by_name(
        &self,
        _ctx: &RequestContext,
        name: &str,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.acl.read_policy_by_name(&self.credentials, name).await
    }

    async fn create_policy(
        &self,
        _ctx: &RequestContext,
        policy: &AclPolicy,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.acl.create_policy(&self.credentials, policy).await
    }

    async fn update_policy(
        &self,
        _ctx: &RequestContext,
        policy: &AclPolicy,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.acl.update_policy(&self.credentials, policy).await
    }

    async fn delete_policy(
        &self,
        _ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.acl.delete_policy(&self.credentials, policy_id).await
    }

    async fn list_roles(
        &self,
        _ctx: &RequestContext,
    ) -> Result<Response<Vec<AclRole>>, ClientError> {
        self.acl.list_roles(&self.credentials).await
    }

    async fn read_role(
        &self,
        _ctx: &RequestContext,
        role_id: &str,
    ) -> Result<Response<AclRole>, ClientError> {
        self.acl.read_role(&self.credentials, role_id).await
    }

    async fn read_role_by_name(
        &self,
        _ctx: &RequestContext,
        name: &str,
    ) -> Result<Response<AclRole>, ClientError> {
        self.acl.read_role_by_name(&self.credentials, name).await
    }

    async fn create_role(
        &self,
        _ctx: &RequestContext,
        role: &AclRole,
    ) -> Result<Response<AclRole>, ClientError> {
        self.acl.create_role(&self.credentials, role).await
    }

    async fn update_role(
        &self,
        _ctx: &RequestContext,
        role: &AclRole,
    ) -> Result<Response<AclRole>, ClientError> {
        self.acl.update_role(&self.credentials, role).await
    }

    async fn delete_role(
        &self,
        _ctx: &RequestContext,
        role_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        self.acl.delete_role(&self.credentials, role_id).await
    }
}
