//! Result collection: the persisted state of one simulation run
//!
//! A collection walks `Created → Running → Finished`:
//!
//! ```text
//! create()  ──start(params)──▶  Running  ──finish()──▶  Finished
//!                                  ▲
//!                  resume() ───────┘ (persisted Running)
//! ```
//!
//! Persisted layout, identical on every backend:
//!
//! - `parameters/` group, one value per parameter
//! - `metadata` value, see [`RunMetadata`]
//! - `results/` group, one value per result key
//!
//! `start` writes the parameters first and the metadata last, so a crash in
//! between leaves no valid metadata and [`ResultCollection::resume`] reports
//! [`Error::CorruptedState`] instead of continuing a half-initialized run.

mod metadata;
mod options;

pub use metadata::{RunMetadata, RunState, FORMAT_VERSION};
pub use options::{CollectionOptions, CollectionOptionsBuilder};

use crate::storage::{AccessMode, BackendKind, Location, NodePath, Storage};
use crate::trajectory::TrajectoryBuffer;
use crate::value::{Array, Mapping, Value};
use crate::{Error, Result};
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Root group holding the run parameters.
pub const PARAMETERS_GROUP: &str = "parameters";
/// Root key of the run metadata record.
pub const METADATA_KEY: &str = "metadata";
/// Root group holding the run results.
pub const RESULTS_GROUP: &str = "results";

/// Persisted state of one simulation run.
///
/// Not internally synchronized: callers sharing a collection across threads
/// wrap it in a `Mutex`.
#[derive(Debug)]
pub struct ResultCollection {
    storage: Storage,
    state: RunState,
    metadata: RunMetadata,
    parameters: Mapping,
    results: NodePath,
    chunk_size: usize,
    writers: IndexMap<String, TrajectoryBuffer>,
    read_only: bool,
    closed: bool,
}

impl ResultCollection {
    /// Create a new run at `location`, truncating anything stored there.
    ///
    /// Nothing is written until [`ResultCollection::start`].
    ///
    /// # Errors
    /// Returns [`Error::Format`] for an unknown location suffix and
    /// [`Error::Storage`] if the location cannot be created.
    pub fn create(location: impl Into<Location>, options: &CollectionOptions) -> Result<Self> {
        let location = location.into();
        let kind = backend_kind(&location, options)?;
        let storage = Storage::open_with(location, AccessMode::Truncate, kind, options.storage())?;
        let run_id = options
            .run_id()
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
        let metadata = RunMetadata::new(run_id)
            .with_info(options.info().clone())
            .with_name(options.name().map(ToString::to_string))
            .with_description(options.description().map(ToString::to_string));
        debug!(run_id = metadata.run_id(), location = %storage.location(), "Created run");
        Ok(Self {
            storage,
            state: RunState::Created,
            metadata,
            parameters: Mapping::new(),
            results: results_path()?,
            chunk_size: options.chunk_size(),
            writers: IndexMap::new(),
            read_only: false,
            closed: false,
        })
    }

    /// Create a new run kept in process memory.
    ///
    /// # Errors
    /// See [`ResultCollection::create`].
    pub fn in_memory(options: &CollectionOptions) -> Result<Self> {
        Self::create(Location::Memory, options)
    }

    /// Write the parameters and enter `Running`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the run is `Created`,
    /// [`Error::InvalidName`] for illegal parameter names.
    pub fn start(&mut self, parameters: Mapping) -> Result<()> {
        if self.read_only || self.state != RunState::Created {
            return Err(Error::InvalidState(format!(
                "cannot start run `{}`: it is {}{}",
                self.metadata.run_id(),
                self.state,
                if self.read_only { " and open read-only" } else { "" }
            )));
        }
        let mut metadata = self.metadata.clone();
        metadata.start();
        {
            let mut root = self.storage.root_mut();
            root.create_group(PARAMETERS_GROUP)?
                .write_values(&parameters)?;
            root.create_group(RESULTS_GROUP)?;
            root.write_value(METADATA_KEY, metadata.to_value())?;
        }
        self.storage.flush()?;

        self.metadata = metadata;
        self.parameters = parameters;
        self.state = RunState::Running;
        info!(
            run_id = self.metadata.run_id(),
            location = %self.storage.location(),
            parameters = self.parameters.len(),
            "Run started"
        );
        Ok(())
    }

    /// Write or overwrite result `key`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless `Running`,
    /// [`Error::SchemaConflict`] if `key` has buffered frames or the write
    /// would change an established type or shape.
    pub fn set_result(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_running("set results")?;
        if self.writers.get(key).is_some_and(|w| w.pending_len() > 0) {
            return Err(Error::schema_conflict(
                self.results.describe(key),
                "key has buffered trajectory frames",
            ));
        }
        self.storage
            .backend_mut()
            .write_value(&self.results, key, &value.into())?;
        self.writers.shift_remove(key);
        debug!(key, "Result written");
        Ok(())
    }

    /// Write every entry of `values` as a result.
    ///
    /// # Errors
    /// Stops at the first failing write, see [`ResultCollection::set_result`].
    pub fn set_results(&mut self, values: Mapping) -> Result<()> {
        for (key, value) in values {
            self.set_result(&key, value)?;
        }
        Ok(())
    }

    /// Append one frame to trajectory `key` at the next time point.
    ///
    /// The frame is buffered; a chunk is written once `chunk_size` frames
    /// are pending.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless `Running`,
    /// [`Error::ShapeMismatch`] for a frame that disagrees with the
    /// trajectory, [`Error::SchemaConflict`] if `key` holds another kind of
    /// value.
    pub fn append_frame(&mut self, key: &str, frame: &Array) -> Result<()> {
        self.push_frame(key, frame, None)
    }

    /// Append one frame to trajectory `key` at time point `time`.
    ///
    /// # Errors
    /// See [`ResultCollection::append_frame`].
    pub fn append_frame_at(&mut self, key: &str, frame: &Array, time: f64) -> Result<()> {
        self.push_frame(key, frame, Some(time))
    }

    fn push_frame(&mut self, key: &str, frame: &Array, time: Option<f64>) -> Result<()> {
        self.ensure_running("append frames")?;
        let buffer = match self.writers.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(TrajectoryBuffer::open(
                self.storage.backend(),
                &self.results,
                key,
                self.chunk_size,
            )?),
        };
        buffer.push(frame, time)?;
        if buffer.is_full() {
            buffer.flush(self.storage.backend_mut(), &self.results)?;
        }
        Ok(())
    }

    /// Write every buffered frame and flush the backend.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless `Running`; propagates backend
    /// errors, keeping unwritten frames buffered.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_running("flush")?;
        self.flush_buffers()?;
        self.storage.flush()
    }

    fn flush_buffers(&mut self) -> Result<()> {
        for buffer in self.writers.values_mut() {
            buffer.flush(self.storage.backend_mut(), &self.results)?;
        }
        Ok(())
    }

    /// Flush, mark the run finished and close the storage.
    ///
    /// A second call on a finished run is a no-op. Reopen the location with
    /// [`ResultCollection::open`] to read it back.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if the run was never started or is
    /// open read-only; propagates backend errors.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == RunState::Finished {
            return Ok(());
        }
        self.ensure_running("finish")?;
        self.flush_buffers()?;

        let mut metadata = self.metadata.clone();
        metadata.finish();
        self.storage
            .root_mut()
            .write_value(METADATA_KEY, metadata.to_value())?;
        self.storage.flush()?;
        self.storage.close()?;

        self.metadata = metadata;
        self.state = RunState::Finished;
        self.writers.clear();
        self.closed = true;
        info!(
            run_id = self.metadata.run_id(),
            location = %self.storage.location(),
            "Run finished"
        );
        Ok(())
    }

    /// Resume a run persisted at `location`.
    ///
    /// The stored metadata is validated through a read-only handle first, so
    /// a failure leaves the location untouched. A `Running` run is reopened
    /// for appending and continues where its persisted trajectories end; a
    /// `Finished` run is opened read-only.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if nothing is stored at `location` and
    /// [`Error::CorruptedState`] if the metadata is missing, unreadable or
    /// has an unsupported format version.
    pub fn resume(location: impl Into<Location>, options: &CollectionOptions) -> Result<Self> {
        let location = location.into();
        if !location.exists() {
            return Err(Error::NotFound(format!("no run stored at `{location}`")));
        }
        let kind = backend_kind(&location, options)?;
        let (metadata, parameters) = {
            let storage = open_for_inspection(&location, kind, options)?;
            load_run(&storage)?
        };

        match metadata.state() {
            RunState::Finished => {
                info!(run_id = metadata.run_id(), %location, "Run already finished, opened read-only");
                Self::open_with(location, options)
            }
            RunState::Created => Err(Error::corrupted(
                &location,
                "metadata records a run that was never started",
            )),
            RunState::Running => {
                let storage =
                    Storage::open_with(location, AccessMode::Append, kind, options.storage())?;
                let results = results_path()?;
                let chunk_size = options.chunk_size();
                let mut writers = IndexMap::new();
                if storage.root().is_group(RESULTS_GROUP) {
                    for key in storage.root().get_group(RESULTS_GROUP)?.keys()? {
                        if storage.backend().trajectory_info(&results, &key)?.is_some() {
                            let buffer = TrajectoryBuffer::open(
                                storage.backend(),
                                &results,
                                &key,
                                chunk_size,
                            )?;
                            writers.insert(key, buffer);
                        }
                    }
                }
                info!(
                    run_id = metadata.run_id(),
                    location = %storage.location(),
                    trajectories = writers.len(),
                    "Run resumed"
                );
                Ok(Self {
                    storage,
                    state: RunState::Running,
                    metadata,
                    parameters,
                    results,
                    chunk_size,
                    writers,
                    read_only: false,
                    closed: false,
                })
            }
        }
    }

    /// Open any persisted run read-only.
    ///
    /// # Errors
    /// See [`ResultCollection::resume`].
    pub fn open(location: impl Into<Location>) -> Result<Self> {
        Self::open_with(location, &CollectionOptions::default())
    }

    /// Open any persisted run read-only with explicit options.
    ///
    /// # Errors
    /// See [`ResultCollection::resume`].
    pub fn open_with(location: impl Into<Location>, options: &CollectionOptions) -> Result<Self> {
        let location = location.into();
        if !location.exists() {
            return Err(Error::NotFound(format!("no run stored at `{location}`")));
        }
        let kind = backend_kind(&location, options)?;
        let storage = open_for_inspection(&location, kind, options)?;
        let (metadata, parameters) = load_run(&storage)?;
        debug!(run_id = metadata.run_id(), %location, state = %metadata.state(), "Opened run");
        Ok(Self {
            storage,
            state: metadata.state(),
            metadata,
            parameters,
            results: results_path()?,
            chunk_size: options.chunk_size(),
            writers: IndexMap::new(),
            read_only: true,
            closed: false,
        })
    }

    fn ensure_running(&self, operation: &str) -> Result<()> {
        if self.read_only {
            return Err(Error::InvalidState(format!(
                "cannot {operation}: run `{}` at `{}` is open read-only ({})",
                self.metadata.run_id(),
                self.storage.location(),
                self.state
            )));
        }
        if self.state != RunState::Running {
            return Err(Error::InvalidState(format!(
                "cannot {operation}: run `{}` is {}",
                self.metadata.run_id(),
                self.state
            )));
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState(format!(
                "run `{}` is closed; reopen `{}` to read it",
                self.metadata.run_id(),
                self.storage.location()
            )));
        }
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Parameters the run was started with.
    #[must_use]
    pub const fn parameters(&self) -> &Mapping {
        &self.parameters
    }

    /// Run metadata.
    #[must_use]
    pub const fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        self.metadata.run_id()
    }

    /// Storage location.
    #[must_use]
    pub fn location(&self) -> &Location {
        self.storage.location()
    }

    /// Check whether the collection rejects all mutation.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Persisted value of result `key`. Buffered frames are not included.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `key` has no persisted value.
    pub fn result(&self, key: &str) -> Result<Value> {
        self.ensure_readable()?;
        self.storage.root().get_group(RESULTS_GROUP)?.get_value(key)
    }

    /// Keys of all persisted results.
    ///
    /// # Errors
    /// Propagates backend read errors.
    pub fn result_keys(&self) -> Result<Vec<String>> {
        self.ensure_readable()?;
        let root = self.storage.root();
        if !root.is_group(RESULTS_GROUP) {
            return Ok(Vec::new());
        }
        root.get_group(RESULTS_GROUP)?.keys()
    }

    /// Every persisted result, keyed by name.
    ///
    /// # Errors
    /// Propagates backend read errors.
    pub fn results(&self) -> Result<Mapping> {
        self.ensure_readable()?;
        let root = self.storage.root();
        if !root.is_group(RESULTS_GROUP) {
            return Ok(Mapping::new());
        }
        root.get_group(RESULTS_GROUP)?.to_mapping()
    }

    /// Persisted plus buffered frames of trajectory `key`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `key` has no frames and
    /// [`Error::SchemaConflict`] if it is not a trajectory.
    pub fn trajectory_len(&self, key: &str) -> Result<usize> {
        self.ensure_readable()?;
        if let Some(buffer) = self.writers.get(key) {
            return Ok(buffer.len());
        }
        self.storage.backend().frame_count(&self.results, key)
    }
}

impl Drop for ResultCollection {
    fn drop(&mut self) {
        if self.closed || self.read_only {
            return;
        }
        if let Err(e) = self.flush_buffers() {
            warn!(
                run_id = self.metadata.run_id(),
                location = %self.storage.location(),
                error = %e,
                "Failed to flush buffered frames on drop"
            );
        }
        if self.state == RunState::Running {
            debug!(run_id = self.metadata.run_id(), "Run dropped without finish, resumable");
        }
    }
}

fn results_path() -> Result<NodePath> {
    NodePath::root().join(RESULTS_GROUP)
}

fn backend_kind(location: &Location, options: &CollectionOptions) -> Result<BackendKind> {
    options
        .backend()
        .map_or_else(|| location.detect_backend(), Ok)
}

fn open_for_inspection(
    location: &Location,
    kind: BackendKind,
    options: &CollectionOptions,
) -> Result<Storage> {
    Storage::open_with(location.clone(), AccessMode::Read, kind, options.storage()).map_err(|e| {
        match e {
            Error::Format { location, message } => Error::CorruptedState { location, message },
            other => other,
        }
    })
}

/// Read and validate the metadata and parameters of a persisted run.
fn load_run(storage: &Storage) -> Result<(RunMetadata, Mapping)> {
    let location = storage.location().to_string();
    let root = storage.root();
    let value = root.get_value(METADATA_KEY).map_err(|e| match e {
        Error::NotFound(_) => Error::corrupted(&location, "run metadata is missing"),
        other => Error::corrupted(&location, format!("run metadata is unreadable: {other}")),
    })?;
    let metadata = RunMetadata::from_value(&value, &location)?;
    let parameters = root
        .get_group(PARAMETERS_GROUP)
        .and_then(|group| group.to_mapping())
        .map_err(|e| Error::corrupted(&location, format!("run parameters are unreadable: {e}")))?;
    Ok((metadata, parameters))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Mapping {
        let mut p = Mapping::new();
        p.insert("alpha".into(), Value::from(0.5));
        p.insert("steps".into(), Value::from(10));
        p
    }

    fn running() -> ResultCollection {
        let mut collection = ResultCollection::in_memory(&CollectionOptions::default()).unwrap();
        collection.start(params()).unwrap();
        collection
    }

    #[test]
    fn test_created_rejects_results() {
        let mut collection = ResultCollection::in_memory(&CollectionOptions::default()).unwrap();
        assert_eq!(collection.state(), RunState::Created);
        assert!(matches!(
            collection.set_result("x", 1.0),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(collection.finish(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_start_twice_fails() {
        let mut collection = running();
        assert!(matches!(
            collection.start(params()),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(collection.parameters(), &params());
    }

    #[test]
    fn test_results_and_frames() {
        let mut collection = running();
        collection.set_result("final", 3.5).unwrap();
        for i in 0..5_u32 {
            collection.append_frame("energy", &Array::from(f64::from(i))).unwrap();
        }
        assert_eq!(collection.trajectory_len("energy").unwrap(), 5);
        collection.flush().unwrap();

        let energy = collection.result("energy").unwrap();
        assert_eq!(energy.as_trajectory().unwrap().len(), 5);
        assert_eq!(collection.result("final").unwrap(), Value::from(3.5));
        assert_eq!(collection.result_keys().unwrap(), vec!["final", "energy"]);
    }

    #[test]
    fn test_set_result_over_pending_frames_conflicts() {
        let mut collection = running();
        collection.append_frame("x", &Array::from(1.0)).unwrap();
        assert!(matches!(
            collection.set_result("x", 2.0),
            Err(Error::SchemaConflict { .. })
        ));
    }

    #[test]
    fn test_shape_mismatch_keeps_pending_frames() {
        let mut collection = running();
        collection.append_frame("pos", &Array::from(vec![0.0, 1.0])).unwrap();
        assert!(matches!(
            collection.append_frame("pos", &Array::from(vec![0.0])),
            Err(Error::ShapeMismatch { .. })
        ));
        collection.flush().unwrap();
        assert_eq!(collection.trajectory_len("pos").unwrap(), 1);
    }

    #[test]
    fn test_finish_is_idempotent_and_final() {
        let mut collection = running();
        collection.append_frame("x", &Array::from(1.0)).unwrap();
        collection.finish().unwrap();
        assert_eq!(collection.state(), RunState::Finished);
        assert!(collection.metadata().completed());
        assert!(collection.metadata().finished_at().is_some());
        collection.finish().unwrap();
        assert!(matches!(
            collection.set_result("y", 1.0),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            collection.append_frame("x", &Array::from(2.0)),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(collection.result("x"), Err(Error::InvalidState(_))));
        assert!(matches!(
            collection.trajectory_len("x"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_generated_and_fixed_run_ids() {
        let generated = ResultCollection::in_memory(&CollectionOptions::default()).unwrap();
        assert!(Uuid::parse_str(generated.run_id()).is_ok());

        let options = CollectionOptions::builder().run_id("fixed").build();
        let fixed = ResultCollection::in_memory(&options).unwrap();
        assert_eq!(fixed.run_id(), "fixed");
    }

    #[test]
    fn test_resume_memory_location_is_not_found() {
        assert!(matches!(
            ResultCollection::resume(Location::Memory, &CollectionOptions::default()),
            Err(Error::NotFound(_))
        ));
    }
}
