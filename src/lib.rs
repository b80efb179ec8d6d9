//! # Runstore: Result Storage for Simulation Runs
//!
//! Runstore captures the parameters and results of a simulation run and
//! persists them in one logical schema across several physical formats:
//!
//! - **text**: a single JSON or YAML document (`.json`, `.yaml`)
//! - **container**: a single binary file holding an append-only record log (`.rsc`)
//! - **chunked**: a directory of Parquet chunk files with JSON node metadata
//! - **memory**: an in-process tree for tests and throwaway runs
//!
//! Large per-step data is written incrementally as *trajectories*, buffered
//! into chunks. An interrupted run can be resumed: persisted frames are
//! counted and appending continues where the last flushed chunk ended.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use runstore::{Array, CollectionOptions, Mapping, ResultCollection, Value};
//!
//! let mut parameters = Mapping::new();
//! parameters.insert("alpha".into(), Value::from(0.5));
//!
//! let mut run = ResultCollection::create("run.rsc", &CollectionOptions::default())?;
//! run.start(parameters)?;
//! for step in 0..10 {
//!     run.append_frame("energy", &Array::from(f64::from(step)))?;
//! }
//! run.set_result("converged", true)?;
//! run.finish()?;
//!
//! let run = ResultCollection::open("run.rsc")?;
//! assert_eq!(run.trajectory_len("energy")?, 10);
//! # Ok::<(), runstore::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod catalog;
pub mod collection;
pub mod error;
pub mod group;
pub mod logging;
pub mod model;
pub mod storage;
pub mod trajectory;
pub mod value;

pub use catalog::{CatalogOptions, RunCatalog, RunEntry};
pub use collection::{CollectionOptions, ResultCollection, RunMetadata, RunState};
pub use error::{Error, Result};
pub use group::{Group, GroupMut};
pub use model::{run_model, resume_model, Model};
pub use storage::{AccessMode, BackendKind, Location, Storage, StorageBackend};
pub use trajectory::{TrajectoryWriter, DEFAULT_CHUNK_SIZE};
pub use value::{Array, ArrayData, DType, FrameLayout, Mapping, Scalar, Trajectory, Value};
