use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use consul_client::{
    AclLink, AclPolicy, AclRole, AclToken, ClientError, KvPair, Metadata, Response,
};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::repository::{AclRepository, KeysCallback, KvRepository};

pub const GLOBAL_MANAGEMENT_ID: &str = "00000000-0000-0000-0000-000000000001";
pub const GLOBAL_READ_ONLY_ID: &str = "00000000-0000-0000-0000-000000000002";

#[derive(Default)]
struct StoreState {
    index: u64,
    writes: u64,
    offline: bool,
    kv: BTreeMap<String, KvPair>,
    tokens: BTreeMap<String, AclToken>,
    policies: BTreeMap<String, AclPolicy>,
    roles: BTreeMap<String, AclRole>,
    failing_keys: HashSet<String>,
    denied_keys: HashSet<String>,
}

impl StoreState {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn known_secret(&self, secret: &str) -> bool {
        self.tokens.values().any(|token| token.secret_id == secret)
    }

    fn resolve_policy(&self, link: &AclLink) -> Option<AclLink> {
        self.policies
            .values()
            .find(|policy| {
                (!link.id.is_empty() && policy.id == link.id)
                    || (link.id.is_empty() && policy.name == link.name)
            })
            .map(|policy| AclLink {
                id: policy.id.clone(),
                name: policy.name.clone(),
            })
    }

    fn resolve_role(&self, link: &AclLink) -> Option<AclLink> {
        self.roles
            .values()
            .find(|role| {
                (!link.id.is_empty() && role.id == link.id)
                    || (link.id.is_empty() && role.name == link.name)
            })
            .map(|role| AclLink {
                id: role.id.clone(),
                name: role.name.clone(),
            })
    }

    fn resolve_links(
        &self,
        links: &[AclLink],
        resolve: impl Fn(&Self, &AclLink) -> Option<AclLink>,
        kind: &str,
    ) -> Result<Vec<AclLink>, String> {
        let mut resolved = Vec::with_capacity(links.len());
        for link in links {
            match resolve(self, link) {
                Some(found) => resolved.push(found),
                None => {
                    let label = if link.id.is_empty() { &link.name } else { &link.id };
                    return Err(format!("{kind} not found: {label}"));
                }
            }
        }
        Ok(resolved)
    }
}

/// Store double that speaks the repository traits with realistic status
/// codes. Every caller secret must belong to a stored token.
#[derive(Clone)]
pub struct InMemoryConsul {
    state: Arc<RwLock<StoreState>>,
    changed: Arc<Notify>,
    fixed: Option<RequestContext>,
}

impl Default for InMemoryConsul {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConsul {
    pub fn new() -> Self {
        let mut state = StoreState::default();
        for (id, name, description) in [
            (GLOBAL_MANAGEMENT_ID, "global-management", "Builtin Policy that grants unlimited access"),
            (GLOBAL_READ_ONLY_ID, "builtin/global-read-only", "Builtin Policy that grants unlimited read-only access"),
        ] {
            let index = state.next_index();
            state.policies.insert(
                id.to_string(),
                AclPolicy {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: description.to_string(),
                    create_index: index,
                    modify_index: index,
                    ..AclPolicy::default()
                },
            );
        }
        Self {
            state: Arc::new(RwLock::new(state)),
            changed: Arc::new(Notify::new()),
            fixed: None,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Same store, but every call authenticates with `token`.
    pub fn as_admin(&self, token: impl Into<String>) -> Self {
        Self {
            state: self.state.clone(),
            changed: self.changed.clone(),
            fixed: Some(RequestContext::with_token(token)),
        }
    }

    pub fn insert_management_token(&self, accessor_id: &str, secret_id: &str) -> AclToken {
        self.insert_token(AclToken {
            accessor_id: accessor_id.to_string(),
            secret_id: secret_id.to_string(),
            description: "management token".to_string(),
            policies: vec![AclLink::by_id(GLOBAL_MANAGEMENT_ID)],
            ..AclToken::default()
        })
    }

    pub fn insert_token(&self, token: AclToken) -> AclToken {
        let mut state = self.state.write();
        let mut token = token;
        token.policies = token
            .policies
            .iter()
            .filter_map(|link| state.resolve_policy(link))
            .collect();
        token.roles = token
            .roles
            .iter()
            .filter_map(|link| state.resolve_role(link))
            .collect();
        let index = state.next_index();
        token.create_index = index;
        token.modify_index = index;
        state.tokens.insert(token.accessor_id.clone(), token.clone());
        token
    }

    pub fn insert_policy(&self, name: &str, rules: &str) -> AclPolicy {
        let mut state = self.state.write();
        let index = state.next_index();
        let policy = AclPolicy {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            rules: rules.to_string(),
            create_index: index,
            modify_index: index,
            ..AclPolicy::default()
        };
        state.policies.insert(policy.id.clone(), policy.clone());
        policy
    }

    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) {
        let mut state = self.state.write();
        let index = state.next_index();
        let pair = KvPair {
            create_index: index,
            modify_index: index,
            ..KvPair::new(key, value)
        };
        state.kv.insert(key.to_string(), pair);
        drop(state);
        self.changed.notify_waiters();
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.state.read().kv.get(key).map(|pair| pair.value.clone())
    }

    pub fn stored_keys(&self) -> Vec<String> {
        self.state.read().kv.keys().cloned().collect()
    }

    pub fn token(&self, accessor_id: &str) -> Option<AclToken> {
        self.state.read().tokens.get(accessor_id).cloned()
    }

    pub fn policy_named(&self, name: &str) -> Option<AclPolicy> {
        self.state
            .read()
            .policies
            .values()
            .find(|policy| policy.name == name)
            .cloned()
    }

    pub fn role_named(&self, name: &str) -> Option<AclRole> {
        self.state
            .read()
            .roles
            .values()
            .find(|role| role.name == name)
            .cloned()
    }

    /// Number of successful mutations since the store was created.
    pub fn write_count(&self) -> u64 {
        self.state.read().writes
    }

    /// Every operation on `key` fails at the transport level.
    pub fn fail_key(&self, key: &str) {
        self.state.write().failing_keys.insert(key.to_string());
    }

    /// Every operation on `key` answers 403.
    pub fn deny_key(&self, key: &str) {
        self.state.write().denied_keys.insert(key.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.write().offline = offline;
    }

    fn caller<'a>(&'a self, ctx: &'a RequestContext) -> &'a str {
        self.fixed.as_ref().map(|fixed| fixed.token.as_str()).unwrap_or(&ctx.token)
    }

    fn check<T>(&self, ctx: &RequestContext) -> Result<Option<Response<T>>, ClientError> {
        let state = self.state.read();
        if state.offline {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        if !state.known_secret(self.caller(ctx)) {
            return Ok(Some(failure(403, "ACL not found")));
        }
        Ok(None)
    }

    fn check_key<T>(
        &self,
        ctx: &RequestContext,
        key: &str,
    ) -> Result<Option<Response<T>>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(Some(denied));
        }
        let state = self.state.read();
        if state.failing_keys.contains(key) {
            return Err(ClientError::Transport(format!("injected failure for {key}")));
        }
        if state.denied_keys.contains(key) {
            return Ok(Some(failure(403, "Permission denied")));
        }
        Ok(None)
    }

    fn mutated(&self, state: &mut StoreState) -> u64 {
        state.writes += 1;
        state.next_index()
    }
}

fn ok<T>(body: T, index: u64) -> Response<T> {
    Response::new(200, Some(body)).with_metadata(Metadata {
        last_index: index,
        known_leader: true,
        ..Metadata::default()
    })
}

fn failure<T>(status: u16, message: &str) -> Response<T> {
    Response::new(status, None).with_raw_body(message.as_bytes().to_vec())
}

fn collapse_keys<'a>(
    keys: impl Iterator<Item = &'a String>,
    prefix: &str,
    separator: &str,
) -> Vec<String> {
    let mut collapsed = BTreeSet::new();
    for key in keys.filter(|key| key.starts_with(prefix)) {
        let rest = &key[prefix.len()..];
        match (!separator.is_empty()).then(|| rest.find(separator)).flatten() {
            Some(pos) => {
                collapsed.insert(format!("{prefix}{}", &rest[..pos + separator.len()]));
            }
            None => {
                collapsed.insert(key.clone());
            }
        }
    }
    collapsed.into_iter().collect()
}

#[async_trait]
impl KvRepository for InMemoryConsul {
    async fn list_keys(
        &self,
        ctx: &RequestContext,
        prefix: &str,
        separator: &str,
    ) -> Result<Response<Vec<String>>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        let keys = collapse_keys(state.kv.keys(), prefix, separator);
        if keys.is_empty() {
            return Ok(failure(404, ""));
        }
        Ok(ok(keys, state.index))
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Response<Vec<KvPair>>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        let pairs: Vec<KvPair> = state
            .kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, pair)| pair.clone())
            .collect();
        if pairs.is_empty() {
            return Ok(failure(404, ""));
        }
        Ok(ok(pairs, state.index))
    }

    async fn read(&self, ctx: &RequestContext, key: &str) -> Result<Response<KvPair>, ClientError> {
        if let Some(denied) = self.check_key(ctx, key)? {
            return Ok(denied);
        }
        let state = self.state.read();
        match state.kv.get(key) {
            Some(pair) => Ok(ok(pair.clone(), state.index)),
            None => Ok(failure(404, "")),
        }
    }

    async fn write(
        &self,
        ctx: &RequestContext,
        pair: &KvPair,
    ) -> Result<Response<bool>, ClientError> {
        if pair.key.starts_with('/') {
            return Err(ClientError::InvalidRequest(format!(
                "invalid key. key must not begin with a '/': {}",
                pair.key
            )));
        }
        if let Some(denied) = self.check_key(ctx, &pair.key)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        let index = self.mutated(&mut state);
        let create_index = state
            .kv
            .get(&pair.key)
            .map(|existing| existing.create_index)
            .unwrap_or(index);
        let stored = KvPair {
            create_index,
            modify_index: index,
            ..pair.clone()
        };
        state.kv.insert(pair.key.clone(), stored);
        drop(state);
        self.changed.notify_waiters();
        Ok(ok(true, index))
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        key: &str,
    ) -> Result<Response<bool>, ClientError> {
        if let Some(denied) = self.check_key(ctx, key)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        let index = self.mutated(&mut state);
        state.kv.remove(key);
        drop(state);
        self.changed.notify_waiters();
        Ok(ok(true, index))
    }

    async fn delete_tree(
        &self,
        ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Response<bool>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        let index = self.mutated(&mut state);
        state.kv.retain(|key, _| !key.starts_with(prefix));
        drop(state);
        self.changed.notify_waiters();
        Ok(ok(true, index))
    }

    async fn watch_keys(
        &self,
        ctx: &RequestContext,
        prefix: &str,
        cancel: &CancellationToken,
        on_response: &mut KeysCallback<'_>,
    ) -> Result<(), ClientError> {
        loop {
            let notified = self.changed.notified();
            let response = self.list_keys(ctx, prefix, "").await?;
            if !on_response(&response) {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = notified => {}
            }
        }
    }
}

#[async_trait]
impl AclRepository for InMemoryConsul {
    async fn read_self(&self, ctx: &RequestContext) -> Result<Response<AclToken>, ClientError> {
        if self.state.read().offline {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        let state = self.state.read();
        let secret = self.caller(ctx);
        match state.tokens.values().find(|token| token.secret_id == secret) {
            Some(token) => Ok(ok(token.clone(), state.index)),
            None => Ok(failure(403, "ACL not found")),
        }
    }

    async fn list_tokens(
        &self,
        ctx: &RequestContext,
    ) -> Result<Response<Vec<AclToken>>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        Ok(ok(state.tokens.values().cloned().collect(), state.index))
    }

    async fn list_tokens_by_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<Vec<AclToken>>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        let tokens = state
            .tokens
            .values()
            .filter(|token| token.policies.iter().any(|link| link.id == policy_id))
            .cloned()
            .collect();
        Ok(ok(tokens, state.index))
    }

    async fn read_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<Response<AclToken>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        match state.tokens.get(accessor_id) {
            Some(token) => Ok(ok(token.clone(), state.index)),
            None => Ok(failure(404, "ACL not found")),
        }
    }

    async fn create_token(
        &self,
        ctx: &RequestContext,
        token: &AclToken,
    ) -> Result<Response<AclToken>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        if !token.accessor_id.is_empty() && state.tokens.contains_key(&token.accessor_id) {
            return Ok(failure(400, "Invalid Token: AccessorID is already in use"));
        }
        if !token.secret_id.is_empty() && state.known_secret(&token.secret_id) {
            return Ok(failure(400, "Invalid Token: SecretID is already in use"));
        }
        let policies = match state.resolve_links(&token.policies, StoreState::resolve_policy, "policy") {
            Ok(links) => links,
            Err(message) => return Ok(failure(400, &message)),
        };
        let roles = match state.resolve_links(&token.roles, StoreState::resolve_role, "role") {
            Ok(links) => links,
            Err(message) => return Ok(failure(400, &message)),
        };
        let index = self.mutated(&mut state);
        let created = AclToken {
            accessor_id: non_empty_or_new(&token.accessor_id),
            secret_id: non_empty_or_new(&token.secret_id),
            policies,
            roles,
            create_index: index,
            modify_index: index,
            ..token.clone()
        };
        state.tokens.insert(created.accessor_id.clone(), created.clone());
        Ok(ok(created, index))
    }

    async fn update_token(
        &self,
        ctx: &RequestContext,
        token: &AclToken,
    ) -> Result<Response<AclToken>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        let Some(existing) = state.tokens.get(&token.accessor_id).cloned() else {
            return Ok(failure(400, "Cannot find token to update"));
        };
        let policies = match state.resolve_links(&token.policies, StoreState::resolve_policy, "policy") {
            Ok(links) => links,
            Err(message) => return Ok(failure(400, &message)),
        };
        let roles = match state.resolve_links(&token.roles, StoreState::resolve_role, "role") {
            Ok(links) => links,
            Err(message) => return Ok(failure(400, &message)),
        };
        let index = self.mutated(&mut state);
        let updated = AclToken {
            accessor_id: existing.accessor_id.clone(),
            secret_id: existing.secret_id.clone(),
            description: token.description.clone(),
            policies,
            roles,
            create_index: existing.create_index,
            modify_index: index,
            ..existing
        };
        state.tokens.insert(updated.accessor_id.clone(), updated.clone());
        Ok(ok(updated, index))
    }

    async fn delete_token(
        &self,
        ctx: &RequestContext,
        accessor_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        let index = self.mutated(&mut state);
        state.tokens.remove(accessor_id);
        Ok(ok(true, index))
    }

    async fn list_policies(
        &self,
        ctx: &RequestContext,
    ) -> Result<Response<Vec<AclPolicy>>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        let policies = state
            .policies
            .values()
            .map(|policy| AclPolicy {
                rules: String::new(),
                ..policy.clone()
            })
            .collect();
        Ok(ok(policies, state.index))
    }

    async fn read_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<AclPolicy>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        match state.policies.get(policy_id) {
            Some(policy) => Ok(ok(policy.clone(), state.index)),
            None => Ok(failure(404, "ACL not found")),
        }
    }

    async fn read_policy_by_name(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Response<AclPolicy>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        match state.policies.values().find(|policy| policy.name == name) {
            Some(policy) => Ok(ok(policy.clone(), state.index)),
            None => Ok(failure(404, "ACL not found")),
        }
    }

    async fn create_policy(
        &self,
        ctx: &RequestContext,
        policy: &AclPolicy,
    ) -> Result<Response<AclPolicy>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        if state.policies.values().any(|existing| existing.name == policy.name) {
            return Ok(failure(
                400,
                &format!("Invalid Policy: A Policy with Name {:?} already exists", policy.name),
            ));
        }
        if let Err(err) = hcl::parse(&policy.rules) {
            return Ok(failure(400, &format!("Failed to parse ACL rules: {err}")));
        }
        let index = self.mutated(&mut state);
        let created = AclPolicy {
            id: Uuid::new_v4().to_string(),
            create_index: index,
            modify_index: index,
            ..policy.clone()
        };
        state.policies.insert(created.id.clone(), created.clone());
        Ok(ok(created, index))
    }

    async fn update_policy(
        &self,
        ctx: &RequestContext,
        policy: &AclPolicy,
    ) -> Result<Response<AclPolicy>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        let Some(existing) = state.policies.get(&policy.id).cloned() else {
            return Ok(failure(400, "Cannot find policy to update"));
        };
        if let Err(err) = hcl::parse(&policy.rules) {
            return Ok(failure(400, &format!("Failed to parse ACL rules: {err}")));
        }
        let index = self.mutated(&mut state);
        let updated = AclPolicy {
            create_index: existing.create_index,
            modify_index: index,
            ..policy.clone()
        };
        state.policies.insert(updated.id.clone(), updated.clone());
        Ok(ok(updated, index))
    }

    async fn delete_policy(
        &self,
        ctx: &RequestContext,
        policy_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        if policy_id == GLOBAL_MANAGEMENT_ID || policy_id == GLOBAL_READ_ONLY_ID {
            return Ok(failure(400, "Cannot delete builtin policy"));
        }
        let mut state = self.state.write();
        let index = self.mutated(&mut state);
        state.policies.remove(policy_id);
        for token in state.tokens.values_mut() {
            token.policies.retain(|link| link.id != policy_id);
        }
        Ok(ok(true, index))
    }

    async fn list_roles(
        &self,
        ctx: &RequestContext,
    ) -> Result<Response<Vec<AclRole>>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        Ok(ok(state.roles.values().cloned().collect(), state.index))
    }

    async fn read_role(
        &self,
        ctx: &RequestContext,
        role_id: &str,
    ) -> Result<Response<AclRole>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        match state.roles.get(role_id) {
            Some(role) => Ok(ok(role.clone(), state.index)),
            None => Ok(failure(404, "ACL not found")),
        }
    }

    async fn read_role_by_name(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Response<AclRole>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let state = self.state.read();
        match state.roles.values().find(|role| role.name == name) {
            Some(role) => Ok(ok(role.clone(), state.index)),
            None => Ok(failure(404, "ACL not found")),
        }
    }

    async fn create_role(
        &self,
        ctx: &RequestContext,
        role: &AclRole,
    ) -> Result<Response<AclRole>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        if state.roles.values().any(|existing| existing.name == role.name) {
            return Ok(failure(
                400,
                &format!("Invalid Role: A Role with Name {:?} already exists", role.name),
            ));
        }
        let policies = match state.resolve_links(&role.policies, StoreState::resolve_policy, "policy") {
            Ok(links) => links,
            Err(message) => return Ok(failure(400, &message)),
        };
        let index = self.mutated(&mut state);
        let created = AclRole {
            id: Uuid::new_v4().to_string(),
            policies,
            create_index: index,
            modify_index: index,
            ..role.clone()
        };
        state.roles.insert(created.id.clone(), created.clone());
        Ok(ok(created, index))
    }

    async fn update_role(
        &self,
        ctx: &RequestContext,
        role: &AclRole,
    ) -> Result<Response<AclRole>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        let Some(existing) = state.roles.get(&role.id).cloned() else {
            return Ok(failure(400, "Cannot find role to update"));
        };
        let policies = match state.resolve_links(&role.policies, StoreState::resolve_policy, "policy") {
            Ok(links) => links,
            Err(message) => return Ok(failure(400, &message)),
        };
        let index = self.mutated(&mut state);
        let updated = AclRole {
            policies,
            create_index: existing.create_index,
            modify_index: index,
            ..role.clone()
        };
        state.roles.insert(updated.id.clone(), updated.clone());
        Ok(ok(updated, index))
    }

    async fn delete_role(
        &self,
        ctx: &RequestContext,
        role_id: &str,
    ) -> Result<Response<bool>, ClientError> {
        if let Some(denied) = self.check(ctx)? {
            return Ok(denied);
        }
        let mut state = self.state.write();
        let index = self.mutated(&mut state);
        state.roles.remove(role_id);
        for token in state.tokens.values_mut() {
            token.roles.retain(|link| link.id != role_id);
        }
        Ok(ok(true, index))
    }
}

fn non_empty_or_new(value: &str) -> String {
    if value.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        value.to_string()
    }
}
