//! Chunked-array store backend (directory tree)
//!
//! ```text
//! run/
//! ├── .runstore.json            store marker (format + version)
//! ├── .node.json                root group: attrs + ordered children
//! ├── parameters/
//! │   ├── .node.json
//! │   └── alpha/.node.json      inline value (null, scalar, mapping)
//! └── results/
//!     ├── field/.node.json      array: layout
//!     ├── field/data.parquet
//!     ├── energy/.node.json     trajectory: layout, frame count, chunk list
//!     └── energy/chunk-000000.parquet
//! ```
//!
//! Reads are lazy: nothing is cached between calls. Each node's
//! `.node.json` is replaced atomically after its data files are in place,
//! so readers never see a chunk list pointing at a missing file.

mod codec;

use super::path::{validate_name, NodePath};
use super::{
    ensure_open, ensure_writable, AccessMode, BackendKind, Location, NodeKind, StorageBackend,
    TrajectoryInfo,
};
use crate::value::{Array, ArrayData, FrameLayout, Mapping, Trajectory, Value, ValueKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const MARKER_FILE: &str = ".runstore.json";
const NODE_FILE: &str = ".node.json";
const DATA_FILE: &str = "data.parquet";

#[derive(Debug, Serialize, Deserialize)]
struct StoreMarker {
    format: String,
    version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkMeta {
    file: String,
    frames: usize,
}

/// Contents of a node's `.node.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum NodeMeta {
    Group {
        #[serde(default)]
        attrs: Mapping,
        #[serde(default)]
        children: Vec<String>,
    },
    Inline {
        #[serde(default)]
        attrs: Mapping,
        value: Value,
    },
    Array {
        #[serde(default)]
        attrs: Mapping,
        layout: FrameLayout,
    },
    Trajectory {
        #[serde(default)]
        attrs: Mapping,
        layout: FrameLayout,
        frame_count: usize,
        chunks: Vec<ChunkMeta>,
    },
}

impl NodeMeta {
    fn empty_group() -> Self {
        Self::Group {
            attrs: Mapping::new(),
            children: Vec::new(),
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            Self::Group { .. } => NodeKind::Group,
            Self::Inline { value, .. } => NodeKind::Value(value.kind()),
            Self::Array { .. } => NodeKind::Value(ValueKind::Array),
            Self::Trajectory { .. } => NodeKind::Value(ValueKind::Trajectory),
        }
    }

    fn attrs(&self) -> &Mapping {
        match self {
            Self::Group { attrs, .. }
            | Self::Inline { attrs, .. }
            | Self::Array { attrs, .. }
            | Self::Trajectory { attrs, .. } => attrs,
        }
    }

    fn attrs_mut(&mut self) -> &mut Mapping {
        match self {
            Self::Group { attrs, .. }
            | Self::Inline { attrs, .. }
            | Self::Array { attrs, .. }
            | Self::Trajectory { attrs, .. } => attrs,
        }
    }

    /// Same rules as [`Value::check_overwrite`], decided from metadata alone.
    fn check_overwrite(&self, target: &str, new: &Value) -> Result<()> {
        match (self, new) {
            (Self::Group { .. }, _) => Err(Error::AlreadyExists(format!("{target} is a group"))),
            (Self::Inline { value, .. }, _) => value.check_overwrite(target, new),
            (Self::Array { layout, .. }, Value::Array(a)) if a.layout() == *layout => Ok(()),
            (Self::Array { layout, .. }, Value::Array(a)) => Err(Error::schema_conflict(
                target,
                format!("array {layout} cannot become {}", a.layout()),
            )),
            (Self::Array { .. }, other) => Err(Error::schema_conflict(
                target,
                format!("array cannot become {}", other.kind()),
            )),
            (Self::Trajectory { .. }, _) => Err(Error::schema_conflict(
                target,
                "trajectories are append-only and cannot be overwritten",
            )),
        }
    }
}

/// Directory name for a child; anything outside `[A-Za-z0-9_-]` is escaped.
fn encode_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| Error::io(tmp.display(), &e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path.display(), &e))
}

/// Storage backend writing a directory tree of Parquet chunks and JSON metadata.
#[derive(Debug)]
pub struct ChunkedBackend {
    root: PathBuf,
    location: Location,
    mode: AccessMode,
    closed: bool,
}

impl ChunkedBackend {
    /// Format identifier stored in the store marker.
    pub const FORMAT_ID: &'static str = "runstore-chunked";

    /// Current store format version.
    pub const FORMAT_VERSION: u32 = 1;

    /// Open a chunked store directory.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `Read`/`Append` targets a missing
    /// directory and [`Error::Format`] if the directory is not a store, or
    /// if `Truncate` would wipe a directory that is not one.
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        let backend = Self {
            root: path.to_path_buf(),
            location: Location::Path(path.to_path_buf()),
            mode,
            closed: false,
        };
        match mode {
            AccessMode::Truncate => backend.initialize()?,
            AccessMode::Read | AccessMode::Append => backend.check_marker()?,
        }
        Ok(backend)
    }

    fn initialize(&self) -> Result<()> {
        if self.root.exists() {
            if !self.root.is_dir() {
                return Err(Error::format(&self.location, "exists and is not a directory"));
            }
            let is_store = self.root.join(MARKER_FILE).exists();
            let is_empty = fs::read_dir(&self.root)
                .map_err(|e| Error::io(&self.location, &e))?
                .next()
                .is_none();
            if !is_store && !is_empty {
                return Err(Error::format(
                    &self.location,
                    "refusing to truncate a non-empty directory that is not a chunked store",
                ));
            }
            fs::remove_dir_all(&self.root).map_err(|e| Error::io(&self.location, &e))?;
        }
        fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.location, &e))?;
        let marker = StoreMarker {
            format: Self::FORMAT_ID.to_string(),
            version: Self::FORMAT_VERSION,
        };
        let bytes = serde_json::to_vec_pretty(&marker)
            .map_err(|e| Error::Storage(format!("{}: {e}", self.location)))?;
        write_atomic(&self.root.join(MARKER_FILE), &bytes)?;
        self.store_meta(&NodePath::root(), &NodeMeta::empty_group())?;
        debug!(location = %self.location, "Initialized chunked store");
        Ok(())
    }

    fn check_marker(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::NotFound(self.location.to_string()));
        }
        let text = match fs::read_to_string(self.root.join(MARKER_FILE)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::format(&self.location, "not a chunked store (no marker file)"))
            }
            Err(e) => return Err(Error::io(&self.location, &e)),
        };
        let marker: StoreMarker =
            serde_json::from_str(&text).map_err(|e| Error::format(&self.location, e))?;
        if marker.format != Self::FORMAT_ID || marker.version != Self::FORMAT_VERSION {
            return Err(Error::format(
                &self.location,
                format!(
                    "unsupported store format {} v{} (expected {} v{})",
                    marker.format,
                    marker.version,
                    Self::FORMAT_ID,
                    Self::FORMAT_VERSION
                ),
            ));
        }
        Ok(())
    }

    fn node_dir(&self, path: &NodePath) -> PathBuf {
        path.segments()
            .iter()
            .fold(self.root.clone(), |dir, segment| dir.join(encode_segment(segment)))
    }

    fn load_meta(&self, path: &NodePath) -> Result<Option<NodeMeta>> {
        let file = self.node_dir(path).join(NODE_FILE);
        let text = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(file.display(), &e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| Error::format(file.display(), e))
    }

    fn store_meta(&self, path: &NodePath, meta: &NodeMeta) -> Result<()> {
        let dir = self.node_dir(path);
        fs::create_dir_all(&dir).map_err(|e| Error::io(dir.display(), &e))?;
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| Error::format(&self.location, format!("{path}: {e}")))?;
        write_atomic(&dir.join(NODE_FILE), &bytes)
    }

    fn check_group_path(&self, path: &NodePath) -> Result<()> {
        let mut current = NodePath::root();
        for segment in path.segments() {
            current = current.join(segment)?;
            match self.load_meta(&current)? {
                None => return Ok(()),
                Some(NodeMeta::Group { .. }) => {}
                Some(_) => {
                    return Err(Error::AlreadyExists(format!("{current} is a value, not a group")))
                }
            }
        }
        Ok(())
    }

    fn ensure_group(&self, path: &NodePath) -> Result<()> {
        self.check_group_path(path)?;
        let mut current = NodePath::root();
        for segment in path.segments() {
            let parent = current.clone();
            current = current.join(segment)?;
            if self.load_meta(&current)?.is_none() {
                self.store_meta(&current, &NodeMeta::empty_group())?;
                self.register_child(&parent, segment)?;
            }
        }
        Ok(())
    }

    fn register_child(&self, parent: &NodePath, name: &str) -> Result<()> {
        match self.load_meta(parent)? {
            Some(NodeMeta::Group {
                attrs,
                mut children,
            }) => {
                if children.iter().any(|c| c == name) {
                    return Ok(());
                }
                children.push(name.to_string());
                self.store_meta(parent, &NodeMeta::Group { attrs, children })
            }
            _ => Err(Error::NotFound(format!("group {parent}"))),
        }
    }

    fn read_trajectory(
        &self,
        path: &NodePath,
        layout: &FrameLayout,
        chunks: &[ChunkMeta],
    ) -> Result<Trajectory> {
        let dir = self.node_dir(path);
        let mut times = Vec::new();
        let mut data = ArrayData::empty(layout.dtype);
        for chunk in chunks {
            let (chunk_times, chunk_data) = codec::read_chunk(&dir.join(&chunk.file), layout)?;
            if chunk_times.len() != chunk.frames {
                return Err(Error::format(
                    dir.join(&chunk.file).display(),
                    format!("expected {} frames, found {}", chunk.frames, chunk_times.len()),
                ));
            }
            times.extend(chunk_times);
            data.extend_from(&chunk_data);
        }
        Trajectory::from_parts(layout.clone(), times, data)
            .map_err(|e| Error::format(dir.display(), e))
    }
}

impl StorageBackend for ChunkedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Chunked
    }

    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn node_kind(&self, path: &NodePath) -> Result<Option<NodeKind>> {
        ensure_open(self.closed, &self.location)?;
        Ok(self.load_meta(path)?.map(|meta| meta.kind()))
    }

    fn list_children(&self, path: &NodePath) -> Result<Vec<String>> {
        ensure_open(self.closed, &self.location)?;
        match self.load_meta(path)? {
            Some(NodeMeta::Group { children, .. }) => Ok(children),
            _ => Err(Error::NotFound(format!("group {path}"))),
        }
    }

    fn create_group(&mut self, path: &NodePath) -> Result<()> {
        ensure_writable(self.closed, self.mode, &self.location, format_args!("group {path}"))?;
        self.ensure_group(path)
    }

    fn write_value(&mut self, group: &NodePath, key: &str, value: &Value) -> Result<()> {
        ensure_writable(self.closed, self.mode, &self.location, group.describe(key))?;
        validate_name(key)?;
        self.check_group_path(group)?;
        let target = group.describe(key);
        let child = group.join(key)?;
        let existing = self.load_meta(&child)?;
        if let Some(meta) = &existing {
            meta.check_overwrite(&target, value)?;
        }
        let attrs = existing
            .as_ref()
            .map(|meta| meta.attrs().clone())
            .unwrap_or_default();
        self.ensure_group(group)?;

        let meta = match value {
            Value::Array(array) => {
                let dir = self.node_dir(&child);
                fs::create_dir_all(&dir).map_err(|e| Error::io(dir.display(), &e))?;
                codec::write_array(&dir.join(DATA_FILE), array.data())?;
                NodeMeta::Array {
                    attrs,
                    layout: array.layout(),
                }
            }
            Value::Trajectory(trajectory) => return self.append_frames(group, key, trajectory),
            other => NodeMeta::Inline {
                attrs,
                value: other.clone(),
            },
        };
        self.store_meta(&child, &meta)?;
        if existing.is_none() {
            self.register_child(group, key)?;
        }
        Ok(())
    }

    fn read_value(&self, group: &NodePath, key: &str) -> Result<Value> {
        ensure_open(self.closed, &self.location)?;
        let child = group.join(key)?;
        match self.load_meta(&child)? {
            None => Err(Error::NotFound(group.describe(key))),
            Some(NodeMeta::Group { .. }) => Err(Error::NotFound(format!(
                "value {} (it is a group)",
                group.describe(key)
            ))),
            Some(NodeMeta::Inline { value, .. }) => Ok(value),
            Some(NodeMeta::Array { layout, .. }) => {
                let file = self.node_dir(&child).join(DATA_FILE);
                let data = codec::read_array(&file, layout.dtype)?;
                Array::new(layout.shape, data)
                    .map(Value::Array)
                    .map_err(|e| Error::format(file.display(), e))
            }
            Some(NodeMeta::Trajectory { layout, chunks, .. }) => self
                .read_trajectory(&child, &layout, &chunks)
                .map(Value::Trajectory),
        }
    }

    fn append_frames(&mut self, group: &NodePath, key: &str, chunk: &Trajectory) -> Result<()> {
        ensure_writable(self.closed, self.mode, &self.location, group.describe(key))?;
        validate_name(key)?;
        self.check_group_path(group)?;
        let target = group.describe(key);
        let child = group.join(key)?;
        let existing = self.load_meta(&child)?;
        let (attrs, mut frame_count, mut chunks) = match existing.clone() {
            None => (Mapping::new(), 0, Vec::new()),
            Some(NodeMeta::Trajectory {
                attrs,
                layout,
                frame_count,
                chunks,
            }) => {
                if layout != *chunk.layout() {
                    return Err(Error::ShapeMismatch {
                        key: target,
                        expected: layout.to_string(),
                        actual: chunk.layout().to_string(),
                    });
                }
                (attrs, frame_count, chunks)
            }
            Some(NodeMeta::Group { .. }) => {
                return Err(Error::AlreadyExists(format!("{target} is a group")))
            }
            Some(other) => {
                return Err(Error::schema_conflict(
                    target,
                    format!("cannot append frames to a {}", other.kind()),
                ))
            }
        };

        self.ensure_group(group)?;
        let dir = self.node_dir(&child);
        fs::create_dir_all(&dir).map_err(|e| Error::io(dir.display(), &e))?;
        if !chunk.is_empty() {
            let file = format!("chunk-{:06}.parquet", chunks.len());
            codec::write_chunk(&dir.join(&file), chunk)?;
            chunks.push(ChunkMeta {
                file,
                frames: chunk.len(),
            });
            frame_count += chunk.len();
        }
        let meta = NodeMeta::Trajectory {
            attrs,
            layout: chunk.layout().clone(),
            frame_count,
            chunks,
        };
        self.store_meta(&child, &meta)?;
        if existing.is_none() {
            self.register_child(group, key)?;
        }
        Ok(())
    }

    fn trajectory_info(&self, group: &NodePath, key: &str) -> Result<Option<TrajectoryInfo>> {
        ensure_open(self.closed, &self.location)?;
        let child = group.join(key)?;
        match self.load_meta(&child)? {
            None => Ok(None),
            Some(NodeMeta::Trajectory {
                layout,
                frame_count,
                chunks,
                ..
            }) => {
                let last_time = match chunks.last() {
                    Some(last) => {
                        let (times, _) =
                            codec::read_chunk(&self.node_dir(&child).join(&last.file), &layout)?;
                        times.last().copied()
                    }
                    None => None,
                };
                Ok(Some(TrajectoryInfo {
                    layout,
                    len: frame_count,
                    last_time,
                }))
            }
            Some(other) => Err(Error::schema_conflict(
                group.describe(key),
                format!("{} is not a trajectory", other.kind()),
            )),
        }
    }

    fn read_attrs(&self, path: &NodePath) -> Result<Mapping> {
        ensure_open(self.closed, &self.location)?;
        self.load_meta(path)?
            .map(|meta| meta.attrs().clone())
            .ok_or_else(|| Error::NotFound(format!("node {path}")))
    }

    fn write_attrs(&mut self, path: &NodePath, attrs: &Mapping) -> Result<()> {
        ensure_writable(
            self.closed,
            self.mode,
            &self.location,
            format_args!("attributes of {path}"),
        )?;
        for name in attrs.keys() {
            validate_name(name)?;
        }
        let mut meta = self
            .load_meta(path)?
            .ok_or_else(|| Error::NotFound(format!("node {path}")))?;
        let target = meta.attrs_mut();
        for (name, value) in attrs {
            target.insert(name.clone(), value.clone());
        }
        self.store_meta(path, &meta)
    }

    fn flush(&mut self) -> Result<()> {
        ensure_open(self.closed, &self.location)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            debug!(location = %self.location, "Closed chunked storage");
        }
        Ok(())
    }
}
