use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::resolve::NamespaceNames;
use crate::scan::DEFAULT_CHUNK_SIZE;
use crate::sync::SyncOptions;

pub const DEFAULT_SOURCE_NAME: &str = "enwiki";
pub const DEFAULT_INDEX_DB: &str = "projectindex.db";
pub const DEFAULT_REPLICA_DB: &str = "replica.db";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub index: IndexSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub name: Option<String>,
    pub replica_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct IndexSection {
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub content_namespaces: Option<Vec<i64>>,
    pub category_chunk_size: Option<usize>,
    pub lookup_chunk_size: Option<usize>,
    #[serde(default)]
    pub custom_namespaces: Vec<CustomNamespace>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CustomNamespace {
    pub id: i64,
    pub name: String,
}

impl BotConfig {
    /// Resolve the source name: env PROJECTINDEX_SOURCE > config >
    /// default.
    pub fn source_name(&self) -> String {
        if let Some(value) = env_override("PROJECTINDEX_SOURCE") {
            return value;
        }
        self.source
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string())
    }

    /// Resolve the replica path: env PROJECTINDEX_REPLICA_DB > config >
    /// default.
    pub fn replica_db(&self) -> PathBuf {
        if let Some(value) = env_override("PROJECTINDEX_REPLICA_DB") {
            return PathBuf::from(value);
        }
        self.source
            .replica_db
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPLICA_DB))
    }

    /// Resolve the index path: env PROJECTINDEX_INDEX_DB > config >
    /// default.
    pub fn index_db(&self) -> PathBuf {
        if let Some(value) = env_override("PROJECTINDEX_INDEX_DB") {
            return PathBuf::from(value);
        }
        self.index
            .db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_DB))
    }

    pub fn sync_options(&self) -> SyncOptions {
        let defaults = SyncOptions::default();
        SyncOptions {
            content_namespaces: self
                .sync
                .content_namespaces
                .clone()
                .unwrap_or(defaults.content_namespaces),
            category_chunk_size: self
                .sync
                .category_chunk_size
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            lookup_chunk_size: self.sync.lookup_chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            namespace_names: NamespaceNames::with_overrides(
                self.sync
                    .custom_namespaces
                    .iter()
                    .map(|ns| (ns.id, ns.name.clone())),
            ),
        }
    }
}

fn env_override(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        }
        Err(_) => None,
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_builtin_paths() {
        let config = BotConfig::default();
        assert_eq!(config.source_name(), "enwiki");
        assert_eq!(config.replica_db(), PathBuf::from("replica.db"));
        assert_eq!(config.index_db(), PathBuf::from("projectindex.db"));
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert!(config.source.name.is_none());
        assert!(config.sync.content_namespaces.is_none());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[source]
name = "testwiki"
replica_db = "/data/replica.db"

[index]
db_path = "/data/index.db"

[sync]
content_namespaces = [0, 100, 118]
category_chunk_size = 500
lookup_chunk_size = 250

[[sync.custom_namespaces]]
id = 100
name = "Portal"

[[sync.custom_namespaces]]
id = 828
name = "Module"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.source_name(), "testwiki");
        assert_eq!(config.replica_db(), PathBuf::from("/data/replica.db"));
        assert_eq!(config.index_db(), PathBuf::from("/data/index.db"));

        let options = config.sync_options();
        assert_eq!(options.content_namespaces, vec![0, 100, 118]);
        assert_eq!(options.category_chunk_size, 500);
        assert_eq!(options.lookup_chunk_size, 250);
        assert_eq!(options.namespace_names.name(828), Some("Module"));
        assert_eq!(options.namespace_names.name(4), Some("Project"));
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[source]\nname = \"testwiki\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.source_name(), "testwiki");
        let options = config.sync_options();
        assert_eq!(options.content_namespaces, vec![0, 118]);
        assert_eq!(options.category_chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[source\nname = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
