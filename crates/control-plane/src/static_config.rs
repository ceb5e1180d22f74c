#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigKind {
    Text,
    Number,
}

impl ConfigKind {
    pub fn name(self) -> &'static str {
        match self {
            ConfigKind::Text => "string",
            ConfigKind::Number => "number",
        }
    }
}

/// One known configuration key, addressed as `table.name`.
#[derive(Clone, Debug)]
pub struct StaticConfigItem {
    pub key: &'static str,
    pub description: &'static str,
    pub kind: ConfigKind,
    pub default_value: &'static str,
}

pub static STATIC_CONFIG_TABLE: &[StaticConfigItem] = &[
    StaticConfigItem {
        key: "consul.address",
        description: "Base address of the consul HTTP API",
        kind: ConfigKind::Text,
        default_value: "http://127.0.0.1:8500",
    },
    StaticConfigItem {
        key: "consul.datacenter",
        description: "Datacenter used for every consul request",
        kind: ConfigKind::Text,
        default_value: "dc1",
    },
    StaticConfigItem {
        key: "consul.admin_token",
        description: "Secret of a token holding global-management",
        kind: ConfigKind::Text,
        default_value: "",
    },
    StaticConfigItem {
        key: "consul.timeout_ms",
        description: "Consul request timeout in milliseconds",
        kind: ConfigKind::Number,
        default_value: "10000",
    },
    StaticConfigItem {
        key: "server.port",
        description: "HTTP listen port",
        kind: ConfigKind::Number,
        default_value: "3668",
    },
    StaticConfigItem {
        key: "log.level",
        description: "Default log filter when RUST_LOG is unset",
        kind: ConfigKind::Text,
        default_value: "info",
    },
];
