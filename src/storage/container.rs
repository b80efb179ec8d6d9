//! Hierarchical binary container backend (`.rsc`)
//!
//! One file: a fixed header followed by an append-only log of mutation
//! records. The tree is rebuilt by replaying the log at open time.
//!
//! ```text
//! header:  "RUNSTORE" | version: u32 LE | flags: u32 LE
//! record:  len: u32 LE | codec: u8 | payload (bincode, optionally compressed)
//! ```
//!
//! Each mutating call appends one record and flushes it to the OS before
//! returning. A record cut short by a crash (torn tail) is ignored on read
//! and truncated away when the file is reopened for appending.

use super::compression::Compression;
use super::path::NodePath;
use super::tree::NodeTree;
use super::{
    ensure_open, ensure_writable, AccessMode, BackendKind, Location, NodeKind, StorageBackend,
    StorageOptions, TrajectoryInfo,
};
use crate::value::{Mapping, Trajectory, Value};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

const MAGIC: &[u8; 8] = b"RUNSTORE";
const HEADER_LEN: usize = 16;
const RECORD_HEADER_LEN: usize = 5;

/// One logged mutation.
#[derive(Debug, Serialize, Deserialize)]
enum Record<'a> {
    CreateGroup {
        path: Cow<'a, NodePath>,
    },
    WriteValue {
        group: Cow<'a, NodePath>,
        key: Cow<'a, str>,
        value: Cow<'a, Value>,
    },
    AppendFrames {
        group: Cow<'a, NodePath>,
        key: Cow<'a, str>,
        chunk: Cow<'a, Trajectory>,
    },
    WriteAttrs {
        path: Cow<'a, NodePath>,
        attrs: Cow<'a, Mapping>,
    },
}

impl Record<'_> {
    fn apply(self, tree: &mut NodeTree) -> Result<()> {
        match self {
            Self::CreateGroup { path } => tree.create_group(&path),
            Self::WriteValue { group, key, value } => {
                tree.write_value(&group, &key, value.into_owned())
            }
            Self::AppendFrames { group, key, chunk } => tree.append_frames(&group, &key, &chunk),
            Self::WriteAttrs { path, attrs } => tree.write_attrs(&path, &attrs),
        }
    }
}

/// Outcome of replaying a container log.
struct Replay {
    tree: NodeTree,
    valid_len: usize,
    records: usize,
}

/// Storage backend keeping the tree in a single append-only binary file.
#[derive(Debug)]
pub struct ContainerBackend {
    location: Location,
    mode: AccessMode,
    tree: NodeTree,
    writer: Option<BufWriter<File>>,
    compression: Compression,
    poisoned: bool,
    closed: bool,
}

impl ContainerBackend {
    /// File suffix selecting this backend.
    pub const EXTENSION: &'static str = "rsc";

    /// Current container format version.
    pub const FORMAT_VERSION: u32 = 1;

    /// Open a container file.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `Read`/`Append` targets a missing file
    /// and [`Error::Format`] for a foreign or corrupted file.
    pub fn open(path: &Path, mode: AccessMode, options: StorageOptions) -> Result<Self> {
        let location = Location::Path(path.to_path_buf());
        let (tree, writer) = match mode {
            AccessMode::Truncate => (NodeTree::new(), Some(Self::create(path, &location)?)),
            AccessMode::Read | AccessMode::Append => {
                let bytes = fs::read(path).map_err(|e| Error::io(&location, &e))?;
                let replay = Self::replay(&bytes, &location)?;
                if replay.valid_len < bytes.len() {
                    warn!(
                        %location,
                        discarded_bytes = bytes.len() - replay.valid_len,
                        "Ignoring torn record at end of container"
                    );
                }
                debug!(%location, records = replay.records, "Replayed container log");
                let writer = if mode == AccessMode::Append {
                    Some(Self::reopen(path, &location, replay.valid_len as u64, bytes.len())?)
                } else {
                    None
                };
                (replay.tree, writer)
            }
        };
        Ok(Self {
            location,
            mode,
            tree,
            writer,
            compression: options.compression,
            poisoned: false,
            closed: false,
        })
    }

    fn create(path: &Path, location: &Location) -> Result<BufWriter<File>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent.display(), &e))?;
        }
        let file = File::create(path).map_err(|e| Error::io(location, &e))?;
        let mut writer = BufWriter::new(file);
        let mut header = [0u8; HEADER_LEN];
        header[..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&Self::FORMAT_VERSION.to_le_bytes());
        writer
            .write_all(&header)
            .and_then(|()| writer.flush())
            .map_err(|e| Error::io(location, &e))?;
        Ok(writer)
    }

    fn reopen(
        path: &Path,
        location: &Location,
        valid_len: u64,
        file_len: usize,
    ) -> Result<BufWriter<File>> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| Error::io(location, &e))?;
        if valid_len < file_len as u64 {
            file.set_len(valid_len).map_err(|e| Error::io(location, &e))?;
        }
        file.seek(SeekFrom::Start(valid_len))
            .map_err(|e| Error::io(location, &e))?;
        Ok(BufWriter::new(file))
    }

    fn replay(bytes: &[u8], location: &Location) -> Result<Replay> {
        if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
            return Err(Error::format(location, "not a runstore container file"));
        }
        let version = read_u32(bytes, 8);
        if version != Self::FORMAT_VERSION {
            return Err(Error::format(
                location,
                format!(
                    "unsupported container version {version} (expected {})",
                    Self::FORMAT_VERSION
                ),
            ));
        }

        let mut tree = NodeTree::new();
        let mut offset = HEADER_LEN;
        let mut records = 0;
        while bytes.len() - offset >= RECORD_HEADER_LEN {
            let len = read_u32(bytes, offset) as usize;
            let codec = bytes[offset + 4];
            let start = offset + RECORD_HEADER_LEN;
            let Some(end) = start.checked_add(len).filter(|&end| end <= bytes.len()) else {
                break;
            };
            let compression = Compression::from_codec_id(codec)
                .filter(Compression::is_available)
                .ok_or_else(|| {
                    Error::format(
                        location,
                        format!("record {records}: codec {codec} is unknown or not compiled in"),
                    )
                })?;
            let record = match decode_record(compression, &bytes[start..end]) {
                Ok(record) => record,
                // A garbled final record is a torn write, not corruption
                Err(_) if end == bytes.len() => break,
                Err(e) => {
                    return Err(Error::format(location, format!("record {records}: {e}")));
                }
            };
            record
                .apply(&mut tree)
                .map_err(|e| Error::format(location, format!("record {records}: {e}")))?;
            offset = end;
            records += 1;
        }
        Ok(Replay {
            tree,
            valid_len: offset,
            records,
        })
    }

    fn write_record(&mut self, record: &Record<'_>) -> Result<()> {
        if self.poisoned {
            return Err(Error::Storage(format!(
                "{}: an earlier write failed; reopen the container to recover",
                self.location
            )));
        }
        let payload = bincode::serialize(record)
            .map_err(|e| Error::Storage(format!("{}: record encoding failed: {e}", self.location)))?;
        let payload = self.compression.compress(&payload)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            Error::Storage(format!("{}: record exceeds 4 GiB", self.location))
        })?;
        let codec = self.compression.codec_id();
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::AccessDenied(format!(
                "cannot write records to `{}`",
                self.location
            )));
        };
        let result = writer
            .write_all(&len.to_le_bytes())
            .and_then(|()| writer.write_all(&[codec]))
            .and_then(|()| writer.write_all(&payload))
            .and_then(|()| writer.flush());
        if let Err(e) = result {
            self.poisoned = true;
            return Err(Error::io(&self.location, &e));
        }
        Ok(())
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn decode_record(compression: Compression, payload: &[u8]) -> Result<Record<'static>> {
    let payload = compression.decompress(payload)?;
    bincode::deserialize(&payload).map_err(|e| Error::Storage(format!("undecodable record: {e}")))
}

impl StorageBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
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
        self.tree.check_group_path(path)?;
        self.write_record(&Record::CreateGroup {
            path: Cow::Borrowed(path),
        })?;
        self.tree.create_group(path)
    }

    fn write_value(&mut self, group: &NodePath, key: &str, value: &Value) -> Result<()> {
        ensure_writable(self.closed, self.mode, &self.location, group.describe(key))?;
        self.tree.check_write_value(group, key, value)?;
        self.write_record(&Record::WriteValue {
            group: Cow::Borrowed(group),
            key: Cow::Borrowed(key),
            value: Cow::Borrowed(value),
        })?;
        self.tree.write_value(group, key, value.clone())
    }

    fn read_value(&self, group: &NodePath, key: &str) -> Result<Value> {
        ensure_open(self.closed, &self.location)?;
        self.tree.read_value(group, key)
    }

    fn append_frames(&mut self, group: &NodePath, key: &str, chunk: &Trajectory) -> Result<()> {
        ensure_writable(self.closed, self.mode, &self.location, group.describe(key))?;
        self.tree.check_append(group, key, chunk)?;
        self.write_record(&Record::AppendFrames {
            group: Cow::Borrowed(group),
            key: Cow::Borrowed(key),
            chunk: Cow::Borrowed(chunk),
        })?;
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
        self.tree.check_attrs(path, attrs)?;
        self.write_record(&Record::WriteAttrs {
            path: Cow::Borrowed(path),
            attrs: Cow::Borrowed(attrs),
        })?;
        self.tree.write_attrs(path, attrs)
    }

    fn flush(&mut self) -> Result<()> {
        ensure_open(self.closed, &self.location)?;
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .and_then(|()| writer.get_ref().sync_data())
                .map_err(|e| Error::io(&self.location, &e))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .and_then(|()| writer.get_ref().sync_all())
                .map_err(|e| Error::io(&self.location, &e))?;
        }
        debug!(location = %self.location, "Closed container storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Array, DType, FrameLayout};
    use tempfile::TempDir;

    fn chunk(values: &[f64]) -> Trajectory {
        let frames: Vec<Array> = values.iter().map(|&v| Array::from(v)).collect();
        Trajectory::from_frames(FrameLayout::scalar(DType::Float64), &frames).unwrap()
    }

    #[test]
    fn test_replay_restores_tree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.rsc");
        let root = NodePath::root();
        let results = NodePath::parse("results").unwrap();
        {
            let mut w =
                ContainerBackend::open(&path, AccessMode::Truncate, StorageOptions::default())
                    .unwrap();
            w.create_group(&results).unwrap();
            w.write_value(&root, "alpha", &Value::from(0.5)).unwrap();
            w.write_value(&root, "alpha", &Value::from(0.25)).unwrap();
            w.append_frames(&results, "energy", &chunk(&[1.0, 2.0])).unwrap();
            w.close().unwrap();
        }
        let r = ContainerBackend::open(&path, AccessMode::Read, StorageOptions::default()).unwrap();
        assert_eq!(r.read_value(&root, "alpha").unwrap(), Value::from(0.25));
        assert_eq!(r.frame_count(&results, "energy").unwrap(), 2);
        assert_eq!(r.list_children(&root).unwrap(), vec!["results", "alpha"]);
    }

    #[test]
    fn test_torn_tail_is_ignored_then_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.rsc");
        let root = NodePath::root();
        {
            let mut w =
                ContainerBackend::open(&path, AccessMode::Truncate, StorageOptions::default())
                    .unwrap();
            w.append_frames(&root, "x", &chunk(&[1.0])).unwrap();
            w.append_frames(&root, "x", &chunk(&[2.0])).unwrap();
            w.close().unwrap();
        }
        let full_len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 3).unwrap();
        drop(file);

        let r = ContainerBackend::open(&path, AccessMode::Read, StorageOptions::default()).unwrap();
        assert_eq!(r.frame_count(&root, "x").unwrap(), 1);
        drop(r);

        let mut a =
            ContainerBackend::open(&path, AccessMode::Append, StorageOptions::default()).unwrap();
        a.append_frames(&root, "x", &chunk(&[3.0])).unwrap();
        a.close().unwrap();

        let r = ContainerBackend::open(&path, AccessMode::Read, StorageOptions::default()).unwrap();
        let value = r.read_value(&root, "x").unwrap();
        let frames: Vec<f64> = value
            .as_trajectory()
            .unwrap()
            .frames()
            .iter()
            .filter_map(Array::as_f64)
            .collect();
        assert_eq!(frames, vec![1.0, 3.0]);
    }

    #[test]
    fn test_foreign_file_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.rsc");
        fs::write(&path, b"definitely not a container").unwrap();
        let err = ContainerBackend::open(&path, AccessMode::Read, StorageOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_rejected_append_writes_no_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.rsc");
        let root = NodePath::root();
        let mut w =
            ContainerBackend::open(&path, AccessMode::Truncate, StorageOptions::default()).unwrap();
        w.append_frames(&root, "x", &chunk(&[1.0])).unwrap();
        let before = fs::metadata(&path).unwrap().len();

        let wrong = Trajectory::from_frames(
            FrameLayout::new(vec![2], DType::Float64),
            &[Array::from(vec![1.0, 2.0])],
        )
        .unwrap();
        assert!(matches!(
            w.append_frames(&root, "x", &wrong),
            Err(Error::ShapeMismatch { .. })
        ));
        assert_eq!(fs::metadata(&path).unwrap().len(), before);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_compressed_records_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.rsc");
        let options = StorageOptions {
            compression: Compression::Zstd,
            ..StorageOptions::default()
        };
        {
            let mut w = ContainerBackend::open(&path, AccessMode::Truncate, options).unwrap();
            w.write_value(&NodePath::root(), "v", &Value::from(vec![0.0; 512]))
                .unwrap();
            w.close().unwrap();
        }
        let r = ContainerBackend::open(&path, AccessMode::Read, StorageOptions::default()).unwrap();
        assert_eq!(
            r.read_value(&NodePath::root(), "v").unwrap(),
            Value::from(vec![0.0; 512])
        );
    }
}
