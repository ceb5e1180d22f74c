pub mod acl;
pub mod archive;
pub mod config;
pub mod context;
pub mod error;
pub mod hcl_rules;
pub mod kv;
pub mod memory;
pub mod metadata;
pub mod reconcile;
pub mod repository;
pub mod static_config;
pub mod transfer;

pub use acl::{
    generate_id, is_builtin_policy, is_exclusive_policy_name, AclService, CreatePolicyRequest,
    CreateRoleRequest, CreateTokenRequest, ExclusiveFilter, PolicyMode, ReadPolicyResponse,
    ReadRoleResponse, ReadTokenResponse, ResourceLink, UpdateRoleRequest, UpdateTokenRequest,
    ValidateHclRulesResponse, GLOBAL_MANAGEMENT, GLOBAL_READ_ONLY,
};
pub use archive::{ArchiveError, ArchiveReader, ArchiveWriter};
pub use config::{ConfigError, SystemConfig, SystemConfigLoader};
pub use context::RequestContext;
pub use error::{DomainError, ErrorCode};
pub use hcl_rules::{parse_rules, ParsedRule, RuleSet};
pub use kv::{BatchUpdateRequest, CreateKeyValueRequest, KeyValue, KvEntry, KvService};
pub use memory::InMemoryConsul;
pub use metadata::{MetadataService, TokenMetadata};
pub use reconcile::{Reconciler, ADMIN_TOKEN_NAME};
pub use repository::{
    AclRepository, AdminRepository, ConsulAclRepository, ConsulAdminRepository,
    ConsulKvRepository, KvRepository,
};
pub use transfer::{
    ExportFormat, ExportMetadata, ExportRequest, ImportItem, ImportRequest, ImportResponse,
    ItemKind, OnConflictPolicy,
};
