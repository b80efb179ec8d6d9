//! Buffered, chunked trajectory appends
//!
//! Frames collect in memory until `chunk_size` are pending, then go to the
//! backend as one `append_frames` call. Frames are visible to readers only
//! after such a flush; pending frames lost to an abrupt termination are not
//! recoverable.
//!
//! [`TrajectoryBuffer`] is the owned state (used by
//! [`ResultCollection`](crate::collection::ResultCollection) for every
//! trajectory key); [`TrajectoryWriter`] pairs a buffer with a borrowed
//! backend and flushes on drop.

use crate::storage::path::validate_name;
use crate::storage::{NodePath, StorageBackend};
use crate::value::{Array, FrameLayout, Trajectory};
use crate::{Error, Result};
use tracing::{debug, warn};

/// Default number of frames per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Pending frames of one trajectory plus its persisted position.
#[derive(Debug, Clone)]
pub struct TrajectoryBuffer {
    key: String,
    target: String,
    layout: Option<FrameLayout>,
    pending: Option<Trajectory>,
    chunk_size: usize,
    persisted: usize,
    next_time: f64,
}

impl TrajectoryBuffer {
    /// Buffer for trajectory `key` in `group`, positioned after any frames
    /// the backend already holds.
    ///
    /// # Errors
    /// Returns [`Error::SchemaConflict`] if `key` holds a non-trajectory value.
    pub fn open(
        backend: &dyn StorageBackend,
        group: &NodePath,
        key: &str,
        chunk_size: usize,
    ) -> Result<Self> {
        validate_name(key)?;
        let info = backend.trajectory_info(group, key)?;
        let (layout, persisted, next_time) = match info {
            Some(info) => (
                Some(info.layout),
                info.len,
                info.last_time.map_or(0.0, |t| t + 1.0),
            ),
            None => (None, 0, 0.0),
        };
        if persisted > 0 {
            debug!(key, persisted, "Continuing persisted trajectory");
        }
        Ok(Self {
            key: key.to_string(),
            target: group.describe(key),
            layout,
            pending: None,
            chunk_size: chunk_size.max(1),
            persisted,
            next_time,
        })
    }

    /// Trajectory key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Frame layout, once known.
    #[must_use]
    pub const fn layout(&self) -> Option<&FrameLayout> {
        self.layout.as_ref()
    }

    /// Frames per chunk.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Frames already handed to the backend.
    #[must_use]
    pub const fn persisted_len(&self) -> usize {
        self.persisted
    }

    /// Frames waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, Trajectory::len)
    }

    /// Persisted plus pending frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.persisted + self.pending_len()
    }

    /// Check if no frame was persisted or buffered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a chunk is ready to be written.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pending_len() >= self.chunk_size
    }

    /// Validate and buffer one frame. `time` defaults to the previous time
    /// point plus `1.0`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the frame disagrees with the
    /// established layout; nothing is buffered in that case.
    pub fn push(&mut self, frame: &Array, time: Option<f64>) -> Result<()> {
        let layout = match &self.layout {
            Some(layout) => {
                Trajectory::check_frame(layout, &self.target, frame)?;
                layout.clone()
            }
            None => {
                let layout = frame.layout();
                self.layout = Some(layout.clone());
                layout
            }
        };
        let time = time.unwrap_or(self.next_time);
        self.pending
            .get_or_insert_with(|| Trajectory::new(layout))
            .push(frame, time)?;
        self.next_time = time + 1.0;
        Ok(())
    }

    /// Write pending frames as one chunk. Returns the number written.
    ///
    /// On failure the frames stay pending so the caller may retry.
    ///
    /// # Errors
    /// Propagates backend errors.
    pub fn flush(&mut self, backend: &mut dyn StorageBackend, group: &NodePath) -> Result<usize> {
        let Some(chunk) = self.pending.take() else {
            return Ok(0);
        };
        if chunk.is_empty() {
            return Ok(0);
        }
        if let Err(e) = backend.append_frames(group, &self.key, &chunk) {
            self.pending = Some(chunk);
            return Err(e);
        }
        let written = chunk.len();
        self.persisted += written;
        debug!(key = %self.key, written, persisted = self.persisted, "Flushed trajectory chunk");
        Ok(written)
    }
}

/// Buffered writer for one trajectory over a borrowed backend.
///
/// Dropping the writer flushes pending frames on a best-effort basis;
/// call [`TrajectoryWriter::close`] to observe flush errors.
pub struct TrajectoryWriter<'a> {
    backend: &'a mut dyn StorageBackend,
    group: NodePath,
    buffer: TrajectoryBuffer,
    closed: bool,
}

impl<'a> TrajectoryWriter<'a> {
    /// Writer for trajectory `key` in `group`.
    ///
    /// # Errors
    /// Returns [`Error::AccessDenied`] on a read-only handle and
    /// [`Error::SchemaConflict`] if `key` holds a non-trajectory value.
    pub fn new(
        backend: &'a mut dyn StorageBackend,
        group: NodePath,
        key: &str,
        chunk_size: usize,
    ) -> Result<Self> {
        if !backend.mode().is_writable() {
            return Err(Error::AccessDenied(format!(
                "cannot append to {} in `{}`",
                group.describe(key),
                backend.location()
            )));
        }
        let buffer = TrajectoryBuffer::open(&*backend, &group, key, chunk_size)?;
        Ok(Self {
            backend,
            group,
            buffer,
            closed: false,
        })
    }

    /// Append a frame with the next time point.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] for a bad frame, or a backend error
    /// if a full chunk fails to write.
    pub fn append(&mut self, frame: &Array) -> Result<()> {
        self.push(frame, None)
    }

    /// Append a frame with an explicit time point.
    ///
    /// # Errors
    /// See [`TrajectoryWriter::append`].
    pub fn append_at(&mut self, frame: &Array, time: f64) -> Result<()> {
        self.push(frame, Some(time))
    }

    fn push(&mut self, frame: &Array, time: Option<f64>) -> Result<()> {
        self.buffer.push(frame, time)?;
        if self.buffer.is_full() {
            self.buffer.flush(&mut *self.backend, &self.group)?;
        }
        Ok(())
    }

    /// Write pending frames now.
    ///
    /// # Errors
    /// Propagates backend errors; pending frames are kept.
    pub fn flush(&mut self) -> Result<()> {
        self.buffer.flush(&mut *self.backend, &self.group).map(|_| ())
    }

    /// Flush and release the writer.
    ///
    /// # Errors
    /// Propagates the final flush error.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.buffer.flush(&mut *self.backend, &self.group).map(|_| ())
    }

    /// Trajectory key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.buffer.key()
    }

    /// Persisted plus pending frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the trajectory has no frames at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Frames already handed to the backend.
    #[must_use]
    pub const fn persisted_len(&self) -> usize {
        self.buffer.persisted_len()
    }

    /// Frames waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.pending_len()
    }
}

impl Drop for TrajectoryWriter<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.buffer.flush(&mut *self.backend, &self.group) {
            warn!(
                key = %self.buffer.key(),
                pending = self.buffer.pending_len(),
                error = %e,
                "Failed to flush trajectory on drop"
            );
        }
    }
}
