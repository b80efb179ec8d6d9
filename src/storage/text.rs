//! Structured text backend (JSON / YAML)
//!
//! The whole tree is one human-readable document:
//!
//! ```text
//! { "format": "runstore-text", "version": 1, "root": { "attrs": {}, "children": { … } } }
//! ```
//!
//! Every mutating call renders the changed tree, writes it (temp file +
//! rename) and only then adopts it, so the file on disk and the handle
//! always agree. Non-finite floats are written as `"NaN"`, `"inf"` and
//! `"-inf"`.

use super::path::NodePath;
use super::tree::{GroupNode, NodeTree};
use super::{
    ensure_open, ensure_writable, AccessMode, BackendKind, Location, NodeKind, StorageBackend,
    StorageOptions, TrajectoryInfo,
};
use crate::value::{Mapping, Trajectory, Value};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Text document syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    /// JSON document
    Json,
    /// YAML document
    Yaml,
}

impl TextFormat {
    /// Get format name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TextDocument {
    format: String,
    version: u32,
    root: GroupNode,
}

/// Storage backend writing the tree as a JSON or YAML document.
#[derive(Debug)]
pub struct TextBackend {
    path: PathBuf,
    location: Location,
    format: TextFormat,
    mode: AccessMode,
    tree: NodeTree,
    compact: bool,
    closed: bool,
}

impl TextBackend {
    /// Format identifier stored in every document.
    pub const FORMAT_ID: &'static str = "runstore-text";

    /// Current document format version.
    pub const FORMAT_VERSION: u32 = 1;

    /// Open a text document.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `Read`/`Append` targets a missing file
    /// and [`Error::Format`] if the document cannot be parsed or has an
    /// unsupported version.
    pub fn open(
        path: &Path,
        format: TextFormat,
        mode: AccessMode,
        options: StorageOptions,
    ) -> Result<Self> {
        let location = Location::Path(path.to_path_buf());
        let tree = match mode {
            AccessMode::Read | AccessMode::Append => Self::load(path, format, &location)?,
            AccessMode::Truncate => NodeTree::new(),
        };
        let backend = Self {
            path: path.to_path_buf(),
            location,
            format,
            mode,
            tree,
            compact: options.compact_text,
            closed: false,
        };
        if mode == AccessMode::Truncate {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent.display(), &e))?;
            }
            backend.persist(&backend.tree)?;
        }
        Ok(backend)
    }

    fn load(path: &Path, format: TextFormat, location: &Location) -> Result<NodeTree> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(location, &e))?;
        let document: TextDocument = match format {
            TextFormat::Json => {
                serde_json::from_str(&text).map_err(|e| Error::format(location, e))?
            }
            TextFormat::Yaml => {
                // YAML goes through a JSON value so nested tagged enums parse uniformly
                let raw: serde_json::Value =
                    serde_yaml::from_str(&text).map_err(|e| Error::format(location, e))?;
                serde_json::from_value(raw).map_err(|e| Error::format(location, e))?
            }
        };
        if document.format != Self::FORMAT_ID {
            return Err(Error::format(
                location,
                format!("unknown document format `{}`", document.format),
            ));
        }
        if document.version != Self::FORMAT_VERSION {
            return Err(Error::format(
                location,
                format!(
                    "unsupported document version {} (expected {})",
                    document.version,
                    Self::FORMAT_VERSION
                ),
            ));
        }
        debug!(%location, format = format.as_str(), "Loaded text document");
        Ok(NodeTree::from_root(document.root))
    }

    fn render(&self, tree: &NodeTree) -> Result<String> {
        let document = TextDocument {
            format: Self::FORMAT_ID.to_string(),
            version: Self::FORMAT_VERSION,
            root: tree.root().clone(),
        };
        let rendered = match (self.format, self.compact) {
            (TextFormat::Json, false) => serde_json::to_string_pretty(&document),
            (TextFormat::Json, true) => serde_json::to_string(&document),
            (TextFormat::Yaml, _) => {
                let raw = serde_json::to_value(&document)
                    .map_err(|e| Error::format(&self.location, e))?;
                return serde_yaml::to_string(&raw).map_err(|e| Error::format(&self.location, e));
            }
        };
        rendered.map_err(|e| Error::format(&self.location, e))
    }

    fn persist(&self, tree: &NodeTree) -> Result<()> {
        let rendered = self.render(tree)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self.path.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&tmp, rendered).map_err(|e| Error::io(tmp.display(), &e))?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::io(&self.location, &e))
    }

    /// Apply `change` to a copy of the tree, persist the copy, then adopt it.
    fn commit(&mut self, change: impl FnOnce(&mut NodeTree) -> Result<()>) -> Result<()> {
        let mut next = self.tree.clone();
        change(&mut next)?;
        self.persist(&next)?;
        self.tree = next;
        Ok(())
    }
}

impl StorageBackend for TextBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Text(self.format)
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
        if self.tree.node_kind(path) == Some(NodeKind::Group) {
            return Ok(());
        }
        self.commit(|tree| tree.create_group(path))
    }

    fn write_value(&mut self, group: &NodePath, key: &str, value: &Value) -> Result<()> {
        let target = group.describe(key);
        ensure_writable(self.closed, self.mode, &self.location, &target)?;
        self.commit(|tree| tree.write_value(group, key, value.clone()))
    }

    fn read_value(&self, group: &NodePath, key: &str) -> Result<Value> {
        ensure_open(self.closed, &self.location)?;
        self.tree.read_value(group, key)
    }

    fn append_frames(&mut self, group: &NodePath, key: &str, chunk: &Trajectory) -> Result<()> {
        let target = group.describe(key);
        ensure_writable(self.closed, self.mode, &self.location, &target)?;
        self.commit(|tree| tree.append_frames(group, key, chunk))
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
        self.commit(|tree| tree.write_attrs(path, attrs))
    }

    fn flush(&mut self) -> Result<()> {
        ensure_open(self.closed, &self.location)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            debug!(location = %self.location, "Closed text storage");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Array, ArrayData, DType, FrameLayout};
    use tempfile::TempDir;

    fn sample_value() -> Value {
        let mut m = Mapping::new();
        m.insert("b".into(), Value::from(2));
        m.insert("a".into(), Value::from(vec![0.1, 0.2]));
        Value::Mapping(m)
    }

    fn round_trip(format: TextFormat, file: &str) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file);
        let root = NodePath::root();
        {
            let mut w =
                TextBackend::open(&path, format, AccessMode::Truncate, StorageOptions::default())
                    .unwrap();
            w.write_value(&root, "m", &sample_value()).unwrap();
            w.write_value(&root, "f32", &Value::from(Array::from(vec![0.1f32, 3.5]))).unwrap();
            let layout = FrameLayout::new(vec![2], DType::Int64);
            let chunk =
                Trajectory::from_frames(layout, &[Array::from(vec![1i64, 2]), Array::from(vec![3i64, 4])])
                    .unwrap();
            w.append_frames(&root, "t", &chunk).unwrap();
            w.close().unwrap();
        }
        let r = TextBackend::open(&path, format, AccessMode::Read, StorageOptions::default()).unwrap();
        assert_eq!(r.read_value(&root, "m").unwrap(), sample_value());
        assert_eq!(
            r.read_value(&root, "f32").unwrap(),
            Value::from(Array::from(vec![0.1f32, 3.5]))
        );
        assert_eq!(r.frame_count(&root, "t").unwrap(), 2);
        assert_eq!(r.list_children(&root).unwrap(), vec!["m", "f32", "t"]);
    }

    #[test]
    fn test_json_round_trip() {
        round_trip(TextFormat::Json, "run.json");
    }

    #[test]
    fn test_yaml_round_trip() {
        round_trip(TextFormat::Yaml, "run.yaml");
    }

    fn non_finite_round_trip(format: TextFormat, file: &str) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file);
        let root = NodePath::root();
        let mut loss = Mapping::new();
        loss.insert("train".into(), Value::from(f64::INFINITY));
        loss.insert("valid".into(), Value::from(f64::NEG_INFINITY));
        {
            let mut w =
                TextBackend::open(&path, format, AccessMode::Truncate, StorageOptions::default())
                    .unwrap();
            w.write_value(&root, "residual", &Value::from(f64::NAN)).unwrap();
            w.write_value(&root, "loss", &Value::Mapping(loss.clone())).unwrap();
            let layout = FrameLayout::scalar(DType::Float32);
            let chunk = Trajectory::from_frames(layout, &[Array::from(f32::NAN)]).unwrap();
            w.append_frames(&root, "t", &chunk).unwrap();
        }
        let r = TextBackend::open(&path, format, AccessMode::Read, StorageOptions::default()).unwrap();
        assert!(r.read_value(&root, "residual").unwrap().as_f64().unwrap().is_nan());
        assert_eq!(r.read_value(&root, "loss").unwrap(), Value::Mapping(loss));
        let t = r.read_value(&root, "t").unwrap();
        match t.as_trajectory().unwrap().data() {
            ArrayData::Float32(v) => assert!(v[0].is_nan()),
            other => panic!("unexpected buffer {other:?}"),
        }
    }

    #[test]
    fn test_json_non_finite_round_trip() {
        non_finite_round_trip(TextFormat::Json, "run.json");
    }

    #[test]
    fn test_yaml_non_finite_round_trip() {
        non_finite_round_trip(TextFormat::Yaml, "run.yaml");
    }

    #[test]
    fn test_yaml_reopen_keeps_creation_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        let root = NodePath::root();
        let mut m = Mapping::new();
        m.insert("z".into(), Value::from(1));
        m.insert("a".into(), Value::from(2));
        {
            let mut w = TextBackend::open(
                &path,
                TextFormat::Yaml,
                AccessMode::Truncate,
                StorageOptions::default(),
            )
            .unwrap();
            w.write_value(&root, "zeta", &Value::from(1)).unwrap();
            w.write_value(&root, "alpha", &Value::from(2)).unwrap();
            w.write_value(&root, "m", &Value::Mapping(m)).unwrap();
        }
        let r = TextBackend::open(&path, TextFormat::Yaml, AccessMode::Read, StorageOptions::default())
            .unwrap();
        assert_eq!(r.list_children(&root).unwrap(), vec!["zeta", "alpha", "m"]);
        let m = r.read_value(&root, "m").unwrap();
        let keys: Vec<_> = m.as_mapping().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_failed_write_leaves_handle_unchanged() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        let path = sub.join("run.json");
        let root = NodePath::root();
        let mut w =
            TextBackend::open(&path, TextFormat::Json, AccessMode::Truncate, StorageOptions::default())
                .unwrap();
        w.write_value(&root, "kept", &Value::from(1)).unwrap();

        fs::remove_dir_all(&sub).unwrap();
        assert!(w.write_value(&root, "rejected", &Value::from(2)).is_err());
        assert!(matches!(w.read_value(&root, "rejected"), Err(Error::NotFound(_))));
        assert_eq!(w.list_children(&root).unwrap(), vec!["kept"]);

        fs::create_dir_all(&sub).unwrap();
        w.write_value(&root, "later", &Value::from(3)).unwrap();
        let r = TextBackend::open(&path, TextFormat::Json, AccessMode::Read, StorageOptions::default())
            .unwrap();
        assert_eq!(r.list_children(&root).unwrap(), vec!["kept", "later"]);
    }

    #[test]
    fn test_bad_version_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{"format":"runstore-text","version":99,"root":{"attrs":{},"children":{}}}"#,
        )
        .unwrap();
        let err = TextBackend::open(&path, TextFormat::Json, AccessMode::Read, StorageOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = TextBackend::open(
            &dir.path().join("missing.json"),
            TextFormat::Json,
            AccessMode::Read,
            StorageOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_read_mode_denies_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yml");
        drop(
            TextBackend::open(&path, TextFormat::Yaml, AccessMode::Truncate, StorageOptions::default())
                .unwrap(),
        );
        let mut r =
            TextBackend::open(&path, TextFormat::Yaml, AccessMode::Read, StorageOptions::default())
                .unwrap();
        assert!(matches!(
            r.write_value(&NodePath::root(), "x", &Value::from(1)),
            Err(Error::AccessDenied(_))
        ));
    }
}
