//! Result collection configuration

use crate::storage::{BackendKind, Compression, StorageOptions};
use crate::trajectory::DEFAULT_CHUNK_SIZE;
use crate::value::Mapping;

/// Options for creating, resuming or opening a [`ResultCollection`](super::ResultCollection).
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOptions {
    backend: Option<BackendKind>,
    chunk_size: usize,
    run_id: Option<String>,
    info: Mapping,
    name: Option<String>,
    description: Option<String>,
    storage: StorageOptions,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            backend: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            run_id: None,
            info: Mapping::new(),
            name: None,
            description: None,
            storage: StorageOptions::default(),
        }
    }
}

impl CollectionOptions {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> CollectionOptionsBuilder {
        CollectionOptionsBuilder::default()
    }

    /// Builder pre-filled with these options.
    #[must_use]
    pub fn to_builder(&self) -> CollectionOptionsBuilder {
        CollectionOptionsBuilder {
            options: self.clone(),
        }
    }

    /// Explicit backend, `None` to detect it from the location.
    #[must_use]
    pub const fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    /// Frames per trajectory chunk.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Requested run ID, `None` to generate one.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Free-form info stored in the metadata.
    #[must_use]
    pub const fn info(&self) -> &Mapping {
        &self.info
    }

    /// Human-readable run name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Run description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Backend-level knobs.
    #[must_use]
    pub const fn storage(&self) -> StorageOptions {
        self.storage
    }
}

/// Builder for [`CollectionOptions`].
#[derive(Debug, Default)]
pub struct CollectionOptionsBuilder {
    options: CollectionOptions,
}

impl CollectionOptionsBuilder {
    /// Force a backend instead of detecting it from the location suffix.
    #[must_use]
    pub const fn backend(mut self, kind: BackendKind) -> Self {
        self.options.backend = Some(kind);
        self
    }

    /// Frames buffered per trajectory before a chunk is written (minimum 1).
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.options.chunk_size = chunk_size.max(1);
        self
    }

    /// Use a fixed run ID instead of a generated UUID.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.options.run_id = Some(run_id.into());
        self
    }

    /// Free-form info stored in the metadata.
    #[must_use]
    pub fn info(mut self, info: Mapping) -> Self {
        self.options.info = info;
        self
    }

    /// Human-readable run name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Run description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.options.description = Some(description.into());
        self
    }

    /// Record compression for the container backend.
    #[must_use]
    pub const fn compression(mut self, compression: Compression) -> Self {
        self.options.storage.compression = compression;
        self
    }

    /// Write compact instead of pretty-printed text documents.
    #[must_use]
    pub const fn compact_text(mut self, compact: bool) -> Self {
        self.options.storage.compact_text = compact;
        self
    }

    /// Build the options.
    #[must_use]
    pub fn build(self) -> CollectionOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TextFormat;

    #[test]
    fn test_defaults() {
        let options = CollectionOptions::default();
        assert_eq!(options.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(options.backend(), None);
        assert_eq!(options.run_id(), None);
        assert!(options.info().is_empty());
    }

    #[test]
    fn test_builder() {
        let options = CollectionOptions::builder()
            .backend(BackendKind::Text(TextFormat::Yaml))
            .chunk_size(0)
            .run_id("run-7")
            .name("sweep")
            .compact_text(true)
            .build();
        assert_eq!(options.backend(), Some(BackendKind::Text(TextFormat::Yaml)));
        assert_eq!(options.chunk_size(), 1);
        assert_eq!(options.run_id(), Some("run-7"));
        assert_eq!(options.name(), Some("sweep"));
        assert!(options.storage().compact_text);
    }
}
