use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::static_config::{ConfigKind, StaticConfigItem, STATIC_CONFIG_TABLE};

/// Flattened `table.key` settings. Lookups fall back to the static defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    values: HashMap<String, String>,
}

impl SystemConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_string(&self, key: &str) -> String {
        match self.get(key) {
            Some(value) => value.to_string(),
            None => lookup(key)
                .map(|item| item.default_value.to_string())
                .unwrap_or_default(),
        }
    }

    pub fn get_number(&self, key: &str) -> i64 {
        self.get(key)
            .or_else(|| lookup(key).map(|item| item.default_value))
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    /// Overrides one known key, typically from a command line flag.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), ConfigError> {
        let value = value.into();
        let item = lookup(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        if item.kind == ConfigKind::Number && value.parse::<i64>().is_err() {
            return Err(mismatch(key, item));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config io error: {0}")]
    Io(String),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("type mismatch for key {0}: expected {1}")]
    TypeMismatch(String, String),
}

pub struct SystemConfigLoader;

impl SystemConfigLoader {
    pub fn from_str(input: &str) -> Result<SystemConfig, ConfigError> {
        let document: toml::Table =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let mut values = HashMap::new();
        collect_table(&document, "", &mut values)?;
        Ok(SystemConfig { values })
    }

    pub fn from_path(path: &Path) -> Result<SystemConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_str(&raw)
    }

    /// Renders every known key with its default, grouped by table.
    pub fn default_template() -> String {
        let mut tables: BTreeMap<&str, Vec<&StaticConfigItem>> = BTreeMap::new();
        for item in STATIC_CONFIG_TABLE {
            let table = item.key.split_once('.').map_or("", |(table, _)| table);
            tables.entry(table).or_default().push(item);
        }
        let mut sections = Vec::new();
        for (table, items) in tables {
            let mut section = format!("[{table}]\n");
            for item in items {
                let name = item.key.rsplit('.').next().unwrap_or(item.key);
                section.push_str(&format!("# {}\n", item.description));
                match item.kind {
                    ConfigKind::Text => section.push_str(&format!("{name} = {:?}\n", item.default_value)),
                    ConfigKind::Number => section.push_str(&format!("{name} = {}\n", item.default_value)),
                }
            }
            sections.push(section);
        }
        sections.join("\n")
    }
}

fn collect_table(
    table: &toml::Table,
    prefix: &str,
    out: &mut HashMap<String, String>,
) -> Result<(), ConfigError> {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        if let toml::Value::Table(nested) = value {
            collect_table(nested, &key, out)?;
            continue;
        }
        let item = lookup(&key).ok_or_else(|| ConfigError::UnknownKey(key.clone()))?;
        let text = match (item.kind, value) {
            (ConfigKind::Text, toml::Value::String(text)) => text.clone(),
            (ConfigKind::Number, toml::Value::Integer(number)) => number.to_string(),
            _ => return Err(mismatch(&key, item)),
        };
        out.insert(key, text);
    }
    Ok(())
}

fn mismatch(key: &str, item: &StaticConfigItem) -> ConfigError {
    ConfigError::TypeMismatch(key.to_string(), item.kind.name().to_string())
}

fn lookup(key: &str) -> Option<&'static StaticConfigItem> {
    STATIC_CONFIG_TABLE.iter().find(|item| item.key == key)
}
