use std::path::Path;
use std::sync::Arc;

use consul_client::{ConsulClient, ConsulClientConfig};
use control_plane::{
    AclRepository, AclService, AdminRepository, ConsulAclRepository, ConsulAdminRepository,
    ConsulKvRepository, KvRepository, KvService, MetadataService, Reconciler, SystemConfig,
    SystemConfigLoader,
};

use crate::error::AppError;

pub struct AppState {
    pub kv: Arc<KvService>,
    pub acl: Arc<AclService>,
    pub metadata: Arc<MetadataService>,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(
        kv_repo: Arc<dyn KvRepository>,
        acl_repo: Arc<dyn AclRepository>,
        admin_repo: Arc<dyn AdminRepository>,
    ) -> Self {
        let metadata = Arc::new(MetadataService::new(admin_repo));
        let kv = Arc::new(KvService::new(kv_repo, metadata.clone()));
        let acl = Arc::new(AclService::new(acl_repo, metadata.clone()));
        let reconciler = Arc::new(Reconciler::new(kv.clone(), acl.clone(), metadata.clone()));
        Self {
            kv,
            acl,
            metadata,
            reconciler,
        }
    }

    /// Wires the services against a live consul agent.
    pub fn from_config(config: &SystemConfig) -> Result<Self, AppError> {
        let timeout_ms = config.get_number("consul.timeout_ms");
        let client = ConsulClient::new(ConsulClientConfig {
            address: config.get_string("consul.address"),
            timeout_ms: if timeout_ms <= 0 { 10_000 } else { timeout_ms as u64 },
            ..ConsulClientConfig::default()
        })?;
        let datacenter = config.get_string("consul.datacenter");
        let admin_token = config.get_string("consul.admin_token");
        if admin_token.trim().is_empty() {
            return Err(AppError::bad_request("consul.admin_token is not configured"));
        }

        let kv_repo = ConsulKvRepository::new(client.kv(), datacenter.clone());
        let acl_repo = ConsulAclRepository::new(client.acl(), datacenter.clone());
        let admin_repo = ConsulAdminRepository::new(
            ConsulKvRepository::new(client.kv(), datacenter.clone()),
            ConsulAclRepository::new(client.acl(), datacenter),
            &admin_token,
        );
        Ok(Self::new(
            Arc::new(kv_repo),
            Arc::new(acl_repo),
            Arc::new(admin_repo),
        ))
    }
}

pub fn load_config(path: &Path) -> Result<SystemConfig, AppError> {
    Ok(SystemConfigLoader::from_path(path)?)
}

pub fn create_default_config(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, SystemConfigLoader::default_template())?;
    Ok(())
}
