//! Storage groups: hierarchical addressing over one backend handle
//!
//! [`Group`] is a borrowed read view, [`GroupMut`] a borrowed write view.
//! Neither can outlive the [`Storage`](crate::storage::Storage) it was taken
//! from. Child names follow [`validate_name`]: non-empty, no `/`, no
//! leading `__`.

use crate::storage::path::validate_name;
use crate::storage::{NodeKind, NodePath, StorageBackend, TrajectoryInfo};
use crate::trajectory::{TrajectoryWriter, DEFAULT_CHUNK_SIZE};
use crate::value::{Array, Mapping, Value};
use crate::{Error, Result};
use std::fmt;

/// Read view of one group.
#[derive(Clone)]
pub struct Group<'a> {
    backend: &'a dyn StorageBackend,
    path: NodePath,
}

impl<'a> Group<'a> {
    pub(crate) fn new(backend: &'a dyn StorageBackend, path: NodePath) -> Self {
        Self { backend, path }
    }

    /// Absolute path of this group.
    #[must_use]
    pub const fn path(&self) -> &NodePath {
        &self.path
    }

    /// Child names in the backend's documented order.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the group no longer exists.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.backend.list_children(&self.path)
    }

    /// Kind of the child `name`, `None` if absent.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] for illegal names.
    pub fn node_kind(&self, name: &str) -> Result<Option<NodeKind>> {
        self.backend.node_kind(&self.path.join(name)?)
    }

    /// Check whether a child `name` exists. Never fails: absent, illegal
    /// or unreadable names report `false`.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        matches!(self.node_kind(name), Ok(Some(_)))
    }

    /// Check whether `name` is a child group.
    #[must_use]
    pub fn is_group(&self, name: &str) -> bool {
        matches!(self.node_kind(name), Ok(Some(NodeKind::Group)))
    }

    /// Child group `name`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no group `name`.
    pub fn get_group(&self, name: &str) -> Result<Group<'a>> {
        let path = self.path.join(name)?;
        match self.backend.node_kind(&path)? {
            Some(NodeKind::Group) => Ok(Group::new(self.backend, path)),
            Some(NodeKind::Value(kind)) => {
                Err(Error::NotFound(format!("group {path} (it is a {kind})")))
            }
            None => Err(Error::NotFound(format!("group {path}"))),
        }
    }

    /// Value `name`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no value `name`.
    pub fn get_value(&self, name: &str) -> Result<Value> {
        validate_name(name)?;
        self.backend.read_value(&self.path, name)
    }

    /// Number of persisted frames of trajectory `name`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if absent, [`Error::SchemaConflict`] if
    /// `name` is not a trajectory.
    pub fn frame_count(&self, name: &str) -> Result<usize> {
        validate_name(name)?;
        self.backend.frame_count(&self.path, name)
    }

    /// Persisted layout, length and last time point of trajectory `name`.
    ///
    /// # Errors
    /// Returns [`Error::SchemaConflict`] if `name` is not a trajectory.
    pub fn trajectory_info(&self, name: &str) -> Result<Option<TrajectoryInfo>> {
        validate_name(name)?;
        self.backend.trajectory_info(&self.path, name)
    }

    /// Attributes of this group.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the group no longer exists.
    pub fn attrs(&self) -> Result<Mapping> {
        self.backend.read_attrs(&self.path)
    }

    /// Every value below this group, keyed by child name (nested groups
    /// become mappings).
    ///
    /// # Errors
    /// Propagates read errors.
    pub fn to_mapping(&self) -> Result<Mapping> {
        let mut mapping = Mapping::new();
        for name in self.keys()? {
            let value = if self.is_group(&name) {
                Value::Mapping(self.get_group(&name)?.to_mapping()?)
            } else {
                self.get_value(&name)?
            };
            mapping.insert(name, value);
        }
        Ok(mapping)
    }
}

impl fmt::Debug for Group<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("location", self.backend.location())
            .field("path", &self.path)
            .finish()
    }
}

/// Write view of one group.
pub struct GroupMut<'a> {
    backend: &'a mut dyn StorageBackend,
    path: NodePath,
}

impl<'a> GroupMut<'a> {
    pub(crate) fn new(backend: &'a mut dyn StorageBackend, path: NodePath) -> Self {
        Self { backend, path }
    }

    /// Read view of this group.
    #[must_use]
    pub fn as_group(&self) -> Group<'_> {
        Group::new(&*self.backend, self.path.clone())
    }

    /// Absolute path of this group.
    #[must_use]
    pub const fn path(&self) -> &NodePath {
        &self.path
    }

    /// Check whether a child `name` exists. Never fails.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.as_group().has(name)
    }

    /// Child names in the backend's documented order.
    ///
    /// # Errors
    /// See [`Group::keys`].
    pub fn keys(&self) -> Result<Vec<String>> {
        self.as_group().keys()
    }

    /// Value `name`.
    ///
    /// # Errors
    /// See [`Group::get_value`].
    pub fn get_value(&self, name: &str) -> Result<Value> {
        self.as_group().get_value(name)
    }

    /// Create child group `name`, or return it if it already exists.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyExists`] if a value is named `name` and
    /// [`Error::InvalidName`] for illegal names.
    pub fn create_group(&mut self, name: &str) -> Result<GroupMut<'_>> {
        let path = self.path.join(name)?;
        match self.backend.node_kind(&path)? {
            Some(NodeKind::Group) => {}
            Some(NodeKind::Value(kind)) => {
                return Err(Error::AlreadyExists(format!("{path} (a {kind})")));
            }
            None => self.backend.create_group(&path)?,
        }
        Ok(GroupMut::new(&mut *self.backend, path))
    }

    /// Existing child group `name` for writing.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no group `name`.
    pub fn get_group_mut(&mut self, name: &str) -> Result<GroupMut<'_>> {
        let path = self.as_group().get_group(name)?.path().clone();
        Ok(GroupMut::new(&mut *self.backend, path))
    }

    /// Write or overwrite value `name`.
    ///
    /// # Errors
    /// See [`StorageBackend::write_value`].
    pub fn write_value(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.backend.write_value(&self.path, name, &value.into())
    }

    /// Write every entry of `values` as a child value.
    ///
    /// # Errors
    /// Stops at the first failing write.
    pub fn write_values(&mut self, values: &Mapping) -> Result<()> {
        for (name, value) in values {
            self.backend.write_value(&self.path, name, value)?;
        }
        Ok(())
    }

    /// Append one frame to trajectory `name`, unbuffered.
    ///
    /// # Errors
    /// See [`StorageBackend::append_frame`].
    pub fn append_frame(&mut self, name: &str, frame: &Array) -> Result<()> {
        validate_name(name)?;
        self.backend.append_frame(&self.path, name, frame)
    }

    /// Merge `attrs` into this group's attributes.
    ///
    /// # Errors
    /// See [`StorageBackend::write_attrs`].
    pub fn write_attrs(&mut self, attrs: &Mapping) -> Result<()> {
        self.backend.write_attrs(&self.path, attrs)
    }

    /// Buffered writer for trajectory `name`, continuing any persisted frames.
    ///
    /// # Errors
    /// Returns [`Error::AccessDenied`] on a read-only handle and
    /// [`Error::SchemaConflict`] if `name` holds a non-trajectory value.
    pub fn trajectory_writer(&mut self, name: &str, chunk_size: usize) -> Result<TrajectoryWriter<'_>> {
        TrajectoryWriter::new(&mut *self.backend, self.path.clone(), name, chunk_size)
    }

    /// Buffered writer with the default chunk size.
    ///
    /// # Errors
    /// See [`GroupMut::trajectory_writer`].
    pub fn trajectory(&mut self, name: &str) -> Result<TrajectoryWriter<'_>> {
        self.trajectory_writer(name, DEFAULT_CHUNK_SIZE)
    }
}

impl fmt::Debug for GroupMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupMut")
            .field("location", self.backend.location())
            .field("path", &self.path)
            .finish()
    }
}
