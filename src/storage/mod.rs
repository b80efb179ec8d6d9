//! Storage backends
//!
//! One capability trait, [`StorageBackend`], with one implementation per
//! physical format:
//!
//! | Backend | Format | Suffix | Child order |
//! |---|---|---|---|
//! | [`MemoryBackend`] | in-process tree | n/a | creation |
//! | [`TextBackend`] | JSON / YAML document | `.json`, `.yaml`, `.yml` | creation |
//! | [`ContainerBackend`] | single binary file, append-only record log | `.rsc` | creation |
//! | [`ChunkedBackend`] | directory tree, Parquet chunks + JSON node metadata | none, `.chunks` | creation |
//!
//! **Single-writer design**: at most one write-mode handle per location.
//! Concurrent writers are not arbitrated and their outcome is undefined.
//! Readers of a finished location may run concurrently.
//!
//! Visibility to *other* handles on the same location:
//! - text: the document is rewritten on every mutating call
//! - container: records are flushed to the OS per call; other handles see
//!   them when they reopen (the log is replayed at open time)
//! - chunked: chunk files are written before node metadata is atomically
//!   replaced; readers see new data once the metadata rename lands

mod chunked;
mod compression;
mod container;
mod memory;
pub mod path;
mod text;
mod tree;

pub use chunked::ChunkedBackend;
pub use compression::Compression;
pub use container::ContainerBackend;
pub use memory::MemoryBackend;
pub use path::NodePath;
pub use text::{TextBackend, TextFormat};

use crate::group::{Group, GroupMut};
use crate::value::{Array, FrameLayout, Mapping, Trajectory, Value, ValueKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How a location is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Read existing data only
    Read,
    /// Create or wipe the location, then read and write
    Truncate,
    /// Open existing data for reading and further writes (resume)
    Append,
}

impl AccessMode {
    /// Check whether the mode permits mutation.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self, Self::Truncate | Self::Append)
    }

    /// Get mode name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Truncate => "truncate",
            Self::Append => "append",
        }
    }
}

/// Physical storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process tree, nothing persisted
    Memory,
    /// Structured text document
    Text(TextFormat),
    /// Hierarchical binary container file
    Container,
    /// Chunked-array directory store
    Chunked,
}

impl BackendKind {
    /// Select a backend from a path suffix.
    ///
    /// Existing directories and suffix-less paths map to [`BackendKind::Chunked`].
    ///
    /// # Errors
    /// Returns [`Error::Format`] for unknown suffixes.
    pub fn from_path(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self::Chunked);
        }
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());
        match extension.as_deref() {
            None | Some("chunks") => Ok(Self::Chunked),
            Some("json") => Ok(Self::Text(TextFormat::Json)),
            Some("yaml" | "yml") => Ok(Self::Text(TextFormat::Yaml)),
            Some(ContainerBackend::EXTENSION) => Ok(Self::Container),
            Some(other) => Err(Error::format(
                path.display(),
                format!("unsupported storage suffix `.{other}` (use .json, .yaml, .rsc or a directory)"),
            )),
        }
    }
}

/// Where a storage tree lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// Process memory (not persisted)
    Memory,
    /// File or directory on disk
    Path(PathBuf),
}

impl Location {
    /// Filesystem path, if any.
    #[must_use]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Memory => None,
            Self::Path(p) => Some(p),
        }
    }

    /// Backend implied by this location.
    ///
    /// # Errors
    /// Returns [`Error::Format`] for unknown suffixes.
    pub fn detect_backend(&self) -> Result<BackendKind> {
        match self {
            Self::Memory => Ok(BackendKind::Memory),
            Self::Path(p) => BackendKind::from_path(p),
        }
    }

    /// Check whether something is stored at this location.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.as_path().is_some_and(Path::exists)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("<memory>"),
            Self::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl From<&str> for Location {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<String> for Location {
    fn from(path: String) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for Location {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for Location {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&PathBuf> for Location {
    fn from(path: &PathBuf) -> Self {
        Self::Path(path.clone())
    }
}

/// Backend-level knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageOptions {
    /// Record compression for the container backend
    pub compression: Compression,
    /// Write compact instead of pretty-printed text documents
    pub compact_text: bool,
}

/// Kind of node stored at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Group (namespace)
    Group,
    /// Value of the given kind
    Value(ValueKind),
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => f.write_str("group"),
            Self::Value(kind) => write!(f, "{kind}"),
        }
    }
}

/// Persisted state of a trajectory, as needed to continue appending.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryInfo {
    /// Frame layout fixed at creation
    pub layout: FrameLayout,
    /// Number of persisted frames
    pub len: usize,
    /// Time point of the last persisted frame
    pub last_time: Option<f64>,
}

/// Read/write/append contract implemented by every physical format.
///
/// Paths address groups; `key` names a value inside a group. Mutating calls
/// are visible to reads on the same handle as soon as they return.
pub trait StorageBackend: Send {
    /// Physical format of this backend.
    fn kind(&self) -> BackendKind;

    /// Mode the handle was opened with.
    fn mode(&self) -> AccessMode;

    /// Location of the storage tree.
    fn location(&self) -> &Location;

    /// Kind of the node at `path`, `None` if absent.
    ///
    /// # Errors
    /// Returns an error if the handle is closed or storage is unreadable.
    fn node_kind(&self, path: &NodePath) -> Result<Option<NodeKind>>;

    /// Child names of the group at `path`, in creation order.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `path` is not a group.
    fn list_children(&self, path: &NodePath) -> Result<Vec<String>>;

    /// Create the group at `path` (and missing parents).
    ///
    /// # Errors
    /// Returns [`Error::AlreadyExists`] if a value occupies the path.
    fn create_group(&mut self, path: &NodePath) -> Result<()>;

    /// Write or overwrite the value `key` in group `group`.
    ///
    /// # Errors
    /// Returns [`Error::SchemaConflict`] if the write would change an
    /// established scalar kind, array shape/dtype or value kind, and
    /// [`Error::AlreadyExists`] if a group is named `key`.
    fn write_value(&mut self, group: &NodePath, key: &str, value: &Value) -> Result<()>;

    /// Read the value `key` in group `group`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if absent.
    fn read_value(&self, group: &NodePath, key: &str) -> Result<Value>;

    /// Append every frame of `chunk` to trajectory `key`, creating it with
    /// the chunk's layout if absent.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the layout differs from the stored
    /// one (nothing is written) and [`Error::SchemaConflict`] if `key` holds
    /// a non-trajectory value.
    fn append_frames(&mut self, group: &NodePath, key: &str, chunk: &Trajectory) -> Result<()>;

    /// Layout, length and last time point of trajectory `key`; `None` if absent.
    ///
    /// # Errors
    /// Returns [`Error::SchemaConflict`] if `key` is not a trajectory.
    fn trajectory_info(&self, group: &NodePath, key: &str) -> Result<Option<TrajectoryInfo>>;

    /// Attributes of the node at `path`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such node.
    fn read_attrs(&self, path: &NodePath) -> Result<Mapping>;

    /// Merge `attrs` into the attributes of the node at `path`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such node and
    /// [`Error::InvalidName`] for reserved attribute names.
    fn write_attrs(&mut self, path: &NodePath, attrs: &Mapping) -> Result<()>;

    /// Push buffered writes to the storage medium.
    ///
    /// # Errors
    /// Returns [`Error::Storage`] if the medium rejects the write.
    fn flush(&mut self) -> Result<()>;

    /// Flush and release the handle. Idempotent.
    ///
    /// # Errors
    /// Returns [`Error::Storage`] if the final flush fails.
    fn close(&mut self) -> Result<()>;

    /// Append a single frame; its time point is the last one plus `1.0`
    /// (`0.0` for the first frame).
    ///
    /// # Errors
    /// Same as [`StorageBackend::append_frames`].
    fn append_frame(&mut self, group: &NodePath, key: &str, frame: &Array) -> Result<()> {
        let time = self
            .trajectory_info(group, key)?
            .and_then(|info| info.last_time)
            .map_or(0.0, |t| t + 1.0);
        let mut chunk = Trajectory::new(frame.layout());
        chunk.push(frame, time)?;
        self.append_frames(group, key, &chunk)
    }

    /// Number of persisted frames of trajectory `key`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if absent.
    fn frame_count(&self, group: &NodePath, key: &str) -> Result<usize> {
        self.trajectory_info(group, key)?
            .map(|info| info.len)
            .ok_or_else(|| Error::NotFound(group.describe(key)))
    }
}

/// Reject calls on a closed handle.
pub(crate) fn ensure_open(closed: bool, location: &Location) -> Result<()> {
    if closed {
        return Err(Error::InvalidState(format!(
            "storage `{location}` is closed"
        )));
    }
    Ok(())
}

/// Reject mutation on a closed or read-only handle.
pub(crate) fn ensure_writable(
    closed: bool,
    mode: AccessMode,
    location: &Location,
    what: impl fmt::Display,
) -> Result<()> {
    ensure_open(closed, location)?;
    if !mode.is_writable() {
        return Err(Error::AccessDenied(format!("cannot write {what} in `{location}`")));
    }
    Ok(())
}

/// Open a backend of the given kind.
///
/// # Errors
/// Returns [`Error::NotFound`] if `Read`/`Append` targets a missing location
/// and [`Error::Format`] if stored data has an incompatible format.
pub fn open_backend(
    location: &Location,
    mode: AccessMode,
    kind: BackendKind,
    options: StorageOptions,
) -> Result<Box<dyn StorageBackend>> {
    debug!(%location, mode = mode.as_str(), ?kind, "Opening storage");
    let backend: Box<dyn StorageBackend> = match kind {
        BackendKind::Memory => Box::new(MemoryBackend::open(mode)?),
        BackendKind::Text(format) => {
            Box::new(TextBackend::open(require_path(location)?, format, mode, options)?)
        }
        BackendKind::Container => {
            Box::new(ContainerBackend::open(require_path(location)?, mode, options)?)
        }
        BackendKind::Chunked => Box::new(ChunkedBackend::open(require_path(location)?, mode)?),
    };
    Ok(backend)
}

fn require_path(location: &Location) -> Result<&Path> {
    location.as_path().ok_or_else(|| {
        Error::format(location, "this backend needs a filesystem path")
    })
}

/// Open storage handle owning one backend.
///
/// Dropping the handle closes it; close errors on drop are logged.
pub struct Storage {
    backend: Box<dyn StorageBackend>,
}

impl Storage {
    /// Open a location, choosing the backend from its suffix.
    ///
    /// # Errors
    /// See [`open_backend`].
    pub fn open(location: impl Into<Location>, mode: AccessMode) -> Result<Self> {
        let location = location.into();
        let kind = location.detect_backend()?;
        Self::open_with(location, mode, kind, StorageOptions::default())
    }

    /// Open a location with an explicit backend and options.
    ///
    /// # Errors
    /// See [`open_backend`].
    pub fn open_with(
        location: impl Into<Location>,
        mode: AccessMode,
        kind: BackendKind,
        options: StorageOptions,
    ) -> Result<Self> {
        let location = location.into();
        Ok(Self {
            backend: open_backend(&location, mode, kind, options)?,
        })
    }

    /// Fresh in-memory storage.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
        }
    }

    /// Wrap an already opened backend.
    #[must_use]
    pub fn from_backend(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Read view of the root group.
    #[must_use]
    pub fn root(&self) -> Group<'_> {
        Group::new(self.backend.as_ref(), NodePath::root())
    }

    /// Write view of the root group.
    #[must_use]
    pub fn root_mut(&mut self) -> GroupMut<'_> {
        GroupMut::new(self.backend.as_mut(), NodePath::root())
    }

    /// Underlying backend.
    #[must_use]
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Underlying backend, mutable.
    #[must_use]
    pub fn backend_mut(&mut self) -> &mut dyn StorageBackend {
        self.backend.as_mut()
    }

    /// Location of the storage tree.
    #[must_use]
    pub fn location(&self) -> &Location {
        self.backend.location()
    }

    /// Mode the storage was opened with.
    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.backend.mode()
    }

    /// Push buffered writes to the medium.
    ///
    /// # Errors
    /// See [`StorageBackend::flush`].
    pub fn flush(&mut self) -> Result<()> {
        self.backend.flush()
    }

    /// Flush and release the handle. Idempotent.
    ///
    /// # Errors
    /// See [`StorageBackend::close`].
    pub fn close(&mut self) -> Result<()> {
        self.backend.close()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("location", self.backend.location())
            .field("kind", &self.backend.kind())
            .field("mode", &self.backend.mode())
            .finish()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(e) = self.backend.close() {
            warn!(location = %self.backend.location(), error = %e, "Failed to close storage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_suffix() {
        assert_eq!(
            BackendKind::from_path(Path::new("run.json")).unwrap(),
            BackendKind::Text(TextFormat::Json)
        );
        assert_eq!(
            BackendKind::from_path(Path::new("run.YML")).unwrap(),
            BackendKind::Text(TextFormat::Yaml)
        );
        assert_eq!(
            BackendKind::from_path(Path::new("run.rsc")).unwrap(),
            BackendKind::Container
        );
        assert_eq!(
            BackendKind::from_path(Path::new("/nonexistent/run")).unwrap(),
            BackendKind::Chunked
        );
        assert_eq!(
            BackendKind::from_path(Path::new("run.chunks")).unwrap(),
            BackendKind::Chunked
        );
        assert!(matches!(
            BackendKind::from_path(Path::new("run.csv")),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_access_mode_writable() {
        assert!(!AccessMode::Read.is_writable());
        assert!(AccessMode::Truncate.is_writable());
        assert!(AccessMode::Append.is_writable());
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::Memory.to_string(), "<memory>");
        assert_eq!(Location::from("a/b.json").to_string(), "a/b.json");
        assert_eq!(Location::Memory.detect_backend().unwrap(), BackendKind::Memory);
    }

    #[test]
    fn test_default_append_frame_numbers_times() {
        let mut storage = Storage::in_memory();
        let group = NodePath::root();
        let backend = storage.backend_mut();
        backend.append_frame(&group, "x", &Array::from(1.0)).unwrap();
        backend.append_frame(&group, "x", &Array::from(2.0)).unwrap();

        let value = backend.read_value(&group, "x").unwrap();
        let traj = value.as_trajectory().unwrap();
        assert_eq!(traj.times(), &[0.0, 1.0]);
        assert_eq!(backend.frame_count(&group, "x").unwrap(), 2);
        assert!(matches!(backend.frame_count(&group, "y"), Err(Error::NotFound(_))));
    }
}
