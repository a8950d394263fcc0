use std::path::{Path, PathBuf};

use cairn_bundle::{BundleCodec, BundleFormat, BundleOptions};
use cairn_chunk::ChunkingOptions;
use cairn_pipeline::PipelineOptions;
use cairn_tree::{BuildOptions, NameComparison};
use cairn_workspace::WorkspaceOptions;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Everything a `cairn` process can be configured with.
///
/// Every section and every field has a default, so an empty document is a
/// valid configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub storage: StorageConfig,
    pub chunking: ChunkingOptions,
    pub tree: TreeConfig,
    pub pipeline: PipelineOptions,
    pub workspace: WorkspaceConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Holds `bundles/` and `refs.json`.
    pub root: PathBuf,
    pub codec: BundleCodec,
    /// Bundle format written by this process. Both versions are always read.
    pub format_version: u16,
    pub reader_cache: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".cairn-store"),
            codec: BundleCodec::default(),
            format_version: 2,
            reader_cache: 32,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub comparison: NameComparison,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub verify_downloads: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            verify_downloads: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl CairnConfig {
    pub fn from_file(path: &Path) -> SdkResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
            .map_err(|e| SdkError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let config: CairnConfig = toml::from_str(s).map_err(|e| SdkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    /// Reject settings that would only fail later, deep inside an operation.
    pub fn validate(&self) -> SdkResult<()> {
        self.chunking
            .validate()
            .map_err(|e| SdkError::Config(e.to_string()))?;
        self.pipeline
            .validate()
            .map_err(|e| SdkError::Config(e.to_string()))?;
        self.bundle_options()?;
        Ok(())
    }

    pub fn bundle_options(&self) -> SdkResult<BundleOptions> {
        let format = BundleFormat::from_version(self.storage.format_version).ok_or_else(|| {
            SdkError::Config(format!(
                "unsupported bundle format version {}",
                self.storage.format_version
            ))
        })?;
        if self.storage.reader_cache == 0 {
            return Err(SdkError::Config("reader cache must hold at least one bundle".into()));
        }
        Ok(BundleOptions {
            codec: self.storage.codec,
            format,
            cache_capacity: self.storage.reader_cache,
        })
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            chunking: self.chunking,
            comparison: self.tree.comparison,
            ..BuildOptions::default()
        }
    }

    pub fn workspace_options(&self) -> WorkspaceOptions {
        WorkspaceOptions {
            pipeline: self.pipeline,
            verify_downloads: self.workspace.verify_downloads,
        }
    }
}
