//! In-memory backend
//!
//! Nothing is persisted; the tree lives as long as the handle. Used for
//! tests and for runs whose results are consumed in-process.

use super::path::NodePath;
use super::tree::NodeTree;
use super::{
    ensure_open, ensure_writable, AccessMode, BackendKind, Location, NodeKind, StorageBackend,
    TrajectoryInfo,
};
use crate::value::{Mapping, Trajectory, Value};
use crate::{Error, Result};

/// Storage backend keeping the whole tree in process memory.
#[derive(Debug)]
pub struct MemoryBackend {
    tree: NodeTree,
    mode: AccessMode,
    location: Location,
    closed: bool,
}

impl MemoryBackend {
    /// Empty, writable in-memory tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: NodeTree::new(),
            mode: AccessMode::Truncate,
            location: Location::Memory,
            closed: false,
        }
    }

    /// Open in-memory storage.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for `Read`/`Append`: there is no prior
    /// in-memory data to reopen.
    pub fn open(mode: AccessMode) -> Result<Self> {
        match mode {
            AccessMode::Truncate => Ok(Self::new()),
            AccessMode::Read | AccessMode::Append => Err(Error::NotFound(format!(
                "{} (in-memory storage cannot be reopened in {} mode)",
                Location::Memory,
                mode.as_str()
            ))),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn node_kind(&self, path: &NodePath) -> Result<Option<NodeKind>> {
        ensure_open(self.closed, &self.location)?;
        Ok(self.tree.node_kind(path))
    }

    fn list_children(&self, path: &NodePath) -> Result<Vec<String>> {
        ensure_open(self.closed, &self.location)?;
        self.tree.list_children(path)
    }

    fn create_group(&mut self, path: &NodePath) -> Result<()> {
        ensure_writable(self.closed, self.mode, &self.location, format_args!("group {path}"))?;
        self.tree.create_group(path)
    }

    fn write_value(&mut self, group: &NodePath, key: &str, value: &Value) -> Result<()> {
        ensure_writable(self.closed, self.mode, &self.location, group.describe(key))?;
        self.tree.write_value(group, key, value.clone())
    }

    fn read_value(&self, group: &NodePath, key: &str) -> Result<Value> {
        ensure_open(self.closed, &self.location)?;
        self.tree.read_value(group, key)
    }

    fn append_frames(&mut self, group: &NodePath, key: &str, chunk: &Trajectory) -> Result<()> {
        ensure_writable(self.closed, self.mode, &self.location, group.describe(key))?;
        self.tree.append_frames(group, key, chunk)
    }

    fn trajectory_info(&self, group: &NodePath, key: &str) -> Result<Option<TrajectoryInfo>> {
        ensure_open(self.closed, &self.location)?;
        self.tree.trajectory_info(group, key)
    }

    fn read_attrs(&self, path: &NodePath) -> Result<Mapping> {
        ensure_open(self.closed, &self.location)?;
        self.tree.attrs(path).cloned()
    }

    fn write_attrs(&mut self, path: &NodePath, attrs: &Mapping) -> Result<()> {
        ensure_writable(
            self.closed,
            self.mode,
            &self.location,
            format_args!("attributes of {path}"),
        )?;
        self.tree.write_attrs(path, attrs)
    }

    fn flush(&mut self) -> Result<()> {
        ensure_open(self.closed, &self.location)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cannot_reopen() {
        assert!(matches!(
            MemoryBackend::open(AccessMode::Read),
            Err(Error::NotFound(_))
        ));
        assert!(MemoryBackend::open(AccessMode::Truncate).is_ok());
    }

    #[test]
    fn test_closed_handle_rejects_calls() {
        let mut backend = MemoryBackend::new();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(matches!(
            backend.read_value(&NodePath::root(), "x"),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            backend.write_value(&NodePath::root(), "x", &Value::Null),
            Err(Error::InvalidState(_))
        ));
    }
}
