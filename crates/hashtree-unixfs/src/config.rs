//! Import options

use serde::{Deserialize, Serialize};

use crate::chunker::{ChunkStrategy, CDC_MAX_CHUNK_SIZE, CDC_MIN_CHUNK_SIZE};
use crate::importer::ImportError;
use crate::reducer::TreeStrategy;

/// Default chunk size (256KB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default max links per node; keeps an internal node of 32-byte hashes
/// well under one chunk
pub const DEFAULT_MAX_LINKS: usize = 174;

/// Default number of subtrees per depth in trickle layouts
pub const DEFAULT_LAYER_REPEAT: usize = 4;

/// Default number of files processed concurrently
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Options for one import operation
///
/// Can be embedded in an application config file; missing keys take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub max_chunk_size: usize,
    pub chunk_strategy: ChunkStrategy,
    pub tree_strategy: TreeStrategy,
    pub max_links: usize,
    pub layer_repeat: usize,
    pub concurrency: usize,
    /// Compute addresses without writing anything to the store
    pub only_hash: bool,
    /// Wrap top-level entries in one unnamed root directory
    pub wrap_with_directory: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_strategy: ChunkStrategy::default(),
            tree_strategy: TreeStrategy::default(),
            max_links: DEFAULT_MAX_LINKS,
            layer_repeat: DEFAULT_LAYER_REPEAT,
            concurrency: DEFAULT_CONCURRENCY,
            only_hash: false,
            wrap_with_directory: false,
        }
    }
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.chunk_strategy = strategy;
        self
    }

    pub fn with_tree_strategy(mut self, strategy: TreeStrategy) -> Self {
        self.tree_strategy = strategy;
        self
    }

    pub fn with_max_links(mut self, max_links: usize) -> Self {
        self.max_links = max_links;
        self
    }

    pub fn with_layer_repeat(mut self, layer_repeat: usize) -> Self {
        self.layer_repeat = layer_repeat;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn only_hash(mut self) -> Self {
        self.only_hash = true;
        self
    }

    pub fn wrap_with_directory(mut self) -> Self {
        self.wrap_with_directory = true;
        self
    }

    pub fn validate(&self) -> Result<(), ImportError> {
        if self.max_chunk_size == 0 {
            return Err(ImportError::Config("max_chunk_size must be > 0".into()));
        }
        if self.max_links < 2 {
            return Err(ImportError::Config(format!(
                "max_links must be >= 2 (got {})",
                self.max_links
            )));
        }
        if self.concurrency == 0 {
            return Err(ImportError::Config("concurrency must be > 0".into()));
        }
        if self.chunk_strategy == ChunkStrategy::Cdc
            && !(CDC_MIN_CHUNK_SIZE..=CDC_MAX_CHUNK_SIZE).contains(&self.max_chunk_size)
        {
            return Err(ImportError::Config(format!(
                "content-defined chunking needs {}..={} byte chunks (got {})",
                CDC_MIN_CHUNK_SIZE, CDC_MAX_CHUNK_SIZE, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = ImportOptions::default();
        assert_eq!(options.max_chunk_size, 262144);
        assert_eq!(options.max_links, 174);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ImportOptions::new().with_chunk_size(0).validate().is_err());
        assert!(ImportOptions::new().with_max_links(1).validate().is_err());
        assert!(ImportOptions::new().with_concurrency(0).validate().is_err());
        assert!(ImportOptions::new()
            .with_chunk_strategy(ChunkStrategy::Cdc)
            .with_chunk_size(512)
            .validate()
            .is_err());
        assert!(ImportOptions::new()
            .with_chunk_strategy(ChunkStrategy::Cdc)
            .with_chunk_size(4096)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let options: ImportOptions = toml::from_str(
            r#"
            max_chunk_size = 1024
            tree_strategy = "trickle"
            chunk_strategy = "cdc"
            "#,
        )
        .unwrap();

        assert_eq!(options.max_chunk_size, 1024);
        assert_eq!(options.tree_strategy, TreeStrategy::Trickle);
        assert_eq!(options.chunk_strategy, ChunkStrategy::Cdc);
        assert_eq!(options.max_links, DEFAULT_MAX_LINKS);
        assert!(!options.only_hash);
    }

    #[test]
    fn test_json_roundtrip() {
        let options = ImportOptions::new().with_max_links(3).only_hash();
        let json = serde_json::to_string(&options).unwrap();
        let back: ImportOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }
}
