use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{
    AclPolicy, AclRole, AclToken, ClientError, ConsulClient, QueryOptions, Response, WriteOptions,
};

#[derive(Clone)]
pub struct AclEndpoint {
    client: ConsulClient,
}

impl AclEndpoint {
    pub(crate) fn new(client: ConsulClient) -> Self {
        Self { client }
    }

    pub async fn token_read_self(
        &self,
        options: &QueryOptions,
    ) -> Result<Response<AclToken>, ClientError> {
        self.query(&["v1", "acl", "token", "self"], Vec::new(), options)
            .await
    }

    pub async fn token_list(
        &self,
        options: &QueryOptions,
    ) -> Result<Response<Vec<AclToken>>, ClientError> {
        self.query(&["v1", "acl", "tokens"], Vec::new(), options).await
    }

    pub async fn token_list_by_policy(
        &self,
        policy_id: &str,
        options: &QueryOptions,
    ) -> Result<Response<Vec<AclToken>>, ClientError> {
        let params = vec![("policy".to_string(), policy_id.to_string())];
        self.query(&["v1", "acl", "tokens"], params, options).await
    }

    pub async fn token_read(
        &self,
        accessor_id: &str,
        options: &QueryOptions,
    ) -> Result<Response<AclToken>, ClientError> {
        self.query(&["v1", "acl", "token", accessor_id], Vec::new(), options)
            .await
    }

    pub async fn token_create(
        &self,
        token: &AclToken,
        options: &WriteOptions,
    ) -> Result<Response<AclToken>, ClientError> {
        self.write(Method::PUT, &["v1", "acl", "token"], Some(token), options)
            .await
    }

    pub async fn token_update(
        &self,
        token: &AclToken,
        options: &WriteOptions,
    ) -> Result<Response<AclToken>, ClientError> {
        if token.accessor_id.is_empty() {
            return Err(ClientError::InvalidRequest(
                "must specify an accessor id for token updating".to_string(),
            ));
        }
        let path = ["v1", "acl", "token", token.accessor_id.as_str()];
        self.write(Method::PUT, &path, Some(token), options).await
    }

    pub async fn token_delete(
        &self,
        accessor_id: &str,
        options: &WriteOptions,
    ) -> Result<Response<bool>, ClientError> {
        self.write::<(), _>(
            Method::DELETE,
            &["v1", "acl", "token", accessor_id],
            None,
            options,
        )
        .await
    }

    pub async fn policy_list(
        &self,
        options: &QueryOptions,
    ) -> Result<Response<Vec<AclPolicy>>, ClientError> {
        self.query(&["v1", "acl", "policies"], Vec::new(), options)
            .await
    }

    pub async fn policy_read(
        &self,
        policy_id: &str,
        options: &QueryOptions,
    ) -> Result<Response<AclPolicy>, ClientError> {
        self.query(&["v1", "acl", "policy", policy_id], Vec::new(), options)
            .await
    }

    pub async fn policy_read_by_name(
        &self,
        name: &str,
        options: &QueryOptions,
    ) -> Result<Response<AclPolicy>, ClientError> {
        let url = self.client.url(&["v1", "acl", "policy", "name"], Some(name))?;
        let raw = self
            .client
            .execute(Method::GET, url, options.params(), options.headers(), None)
            .await?;
        Ok(Response::decode(raw, true))
    }

    pub async fn policy_create(
        &self,
        policy: &AclPolicy,
        options: &WriteOptions,
    ) -> Result<Response<AclPolicy>, ClientError> {
        if !policy.id.is_empty() {
            return Err(ClientError::InvalidRequest(
                "cannot specify an id in policy creation".to_string(),
            ));
        }
        self.write(Method::PUT, &["v1", "acl", "policy"], Some(policy), options)
            .await
    }

    pub async fn policy_update(
        &self,
        policy: &AclPolicy,
        options: &WriteOptions,
    ) -> Result<Response<AclPolicy>, ClientError> {
        if policy.id.is_empty() {
            return Err(ClientError::InvalidRequest(
                "must specify an id in policy update".to_string(),
            ));
        }
        let path = ["v1", "acl", "policy", policy.id.as_str()];
        self.write(Method::PUT, &path, Some(policy), options).await
    }

    pub async fn policy_delete(
        &self,
        policy_id: &str,
        options: &WriteOptions,
    ) -> Result<Response<bool>, ClientError> {
        self.write::<(), _>(
            Method::DELETE,
            &["v1", "acl", "policy", policy_id],
            None,
            options,
        )
        .await
    }

    pub async fn role_list(
        &self,
        options: &QueryOptions,
    ) -> Result<Response<Vec<AclRole>>, ClientError> {
        self.query(&["v1", "acl", "roles"], Vec::new(), options).await
    }

    pub async fn role_read(
        &self,
        role_id: &str,
        options: &QueryOptions,
    ) -> Result<Response<AclRole>, ClientError> {
        self.query(&["v1", "acl", "role", role_id], Vec::new(), options)
            .await
    }

    pub async fn role_read_by_name(
        &self,
        name: &str,
        options: &QueryOptions,
    ) -> Result<Response<AclRole>, ClientError> {
        let url = self.client.url(&["v1", "acl", "role", "name"], Some(name))?;
        let raw = self
            .client
            .execute(Method::GET, url, options.params(), options.headers(), None)
            .await?;
        Ok(Response::decode(raw, true))
    }

    pub async fn role_create(
        &self,
        role: &AclRole,
        options: &WriteOptions,
    ) -> Result<Response<AclRole>, ClientError> {
        if !role.id.is_empty() {
            return Err(ClientError::InvalidRequest(
                "cannot specify an id in role creation".to_string(),
            ));
        }
        self.write(Method::PUT, &["v1", "acl", "role"], Some(role), options)
            .await
    }

    pub async fn role_update(
        &self,
        role: &AclRole,
        options: &WriteOptions,
    ) -> Result<Response<AclRole>, ClientError> {
        if role.id.is_empty() {
            return Err(ClientError::InvalidRequest(
                "must specify an id in role update".to_string(),
            ));
        }
        let path = ["v1", "acl", "role", role.id.as_str()];
        self.write(Method::PUT, &path, Some(role), options).await
    }

    pub async fn role_delete(
        &self,
        role_id: &str,
        options: &WriteOptions,
    ) -> Result<Response<bool>, ClientError> {
        self.write::<(), _>(
            Method::DELETE,
            &["v1", "acl", "role", role_id],
            None,
            options,
        )
        .await
    }

    async fn query<T: DeserializeOwned>(
        &self,
        path: &[&str],
        extra: Vec<(String, String)>,
        options: &QueryOptions,
    ) -> Result<Response<T>, ClientError> {
        let url = self.client.url(path, None)?;
        let mut params = options.params();
        params.extend(extra);
        let raw = self
            .client
            .execute(Method::GET, url, params, options.headers(), None)
            .await?;
        Ok(Response::decode(raw, true))
    }

    async fn write<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &[&str],
        body: Option<&B>,
        options: &WriteOptions,
    ) -> Result<Response<T>, ClientError> {
        let url = self.client.url(path, None)?;
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| ClientError::InvalidRequest(err.to_string()))?;
        let raw = self
            .client
            .execute(method, url, options.params(), options.headers(), body)
            .await?;
        Ok(Response::decode(raw, false))
    }
}
