//! Model wrapper: run a computation with captured parameters and results
//!
//! A [`Model`] declares its default parameters and writes its results into
//! a [`ResultCollection`]. [`run_model`] merges caller overrides into the
//! defaults, starts the collection, runs the model and finishes the run;
//! [`resume_model`] continues an interrupted run with its persisted
//! parameters.
//!
//! ## Example
//!
//! ```rust,no_run
//! use runstore::model::{model_fn, run_model};
//! use runstore::{Array, CollectionOptions, Mapping, Value};
//!
//! let mut defaults = Mapping::new();
//! defaults.insert("steps".into(), Value::from(10));
//! let mut model = model_fn("counter", defaults, |params, results| {
//!     let steps = params["steps"].as_i64().unwrap_or(0);
//!     for step in 0..steps {
//!         results.append_frame("count", &Array::from(step))?;
//!     }
//!     Ok(())
//! });
//! let run = run_model(&mut model, Mapping::new(), "run.rsc", &CollectionOptions::default())?;
//! println!("finished {}", run.run_id());
//! # Ok::<(), runstore::Error>(())
//! ```

use crate::collection::{CollectionOptions, ResultCollection, RunState};
use crate::storage::Location;
use crate::value::{Mapping, Scalar, Value};
use crate::{Error, Result};
use tracing::{info, warn};

/// A computation whose inputs and outputs are persisted.
pub trait Model {
    /// Short model name, recorded in the run info.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Every accepted parameter with its default value.
    fn default_parameters(&self) -> Mapping;

    /// Run the computation, writing results into `results`.
    ///
    /// On a resumed run, persisted trajectories already hold frames; use
    /// [`ResultCollection::trajectory_len`] to find where to continue.
    ///
    /// # Errors
    /// Any error aborts the run, which stays resumable.
    fn run(&mut self, parameters: &Mapping, results: &mut ResultCollection) -> Result<()>;
}

/// Merge `overrides` into `defaults`.
///
/// An integer override of a float parameter is widened; any other change of
/// scalar kind is rejected.
///
/// # Errors
/// Returns [`Error::InvalidParameter`] for unknown keys and ill-typed values.
pub fn merge_parameters(defaults: &Mapping, overrides: Mapping) -> Result<Mapping> {
    let mut parameters = defaults.clone();
    for (key, value) in overrides {
        let Some(default) = parameters.get_mut(&key) else {
            let known = defaults.keys().cloned().collect::<Vec<_>>().join(", ");
            return Err(Error::InvalidParameter(format!(
                "unknown parameter `{key}` (known: {known})"
            )));
        };
        *default = coerce(&key, default, value)?;
    }
    Ok(parameters)
}

#[allow(clippy::cast_precision_loss)]
fn coerce(key: &str, default: &Value, value: Value) -> Result<Value> {
    match (default, value) {
        (Value::Scalar(Scalar::Float(_)), Value::Scalar(Scalar::Int(i))) => Ok(Value::from(i as f64)),
        (Value::Scalar(d), Value::Scalar(v)) if d.kind_name() != v.kind_name() => {
            Err(Error::InvalidParameter(format!(
                "parameter `{key}` expects {}, got {}",
                d.kind_name(),
                v.kind_name()
            )))
        }
        (Value::Null, value) => Ok(value),
        (d, value) if d.kind() != value.kind() => Err(Error::InvalidParameter(format!(
            "parameter `{key}` expects {}, got {}",
            d.kind(),
            value.kind()
        ))),
        (_, value) => Ok(value),
    }
}

/// Run `model` with `overrides` applied to its defaults, persisting to
/// `location`. Returns the finished collection.
///
/// If the model fails the run is left in `Running` state and can be
/// continued with [`resume_model`].
///
/// # Errors
/// Returns [`Error::InvalidParameter`] for bad overrides and propagates
/// storage and model errors.
pub fn run_model<M: Model + ?Sized>(
    model: &mut M,
    overrides: Mapping,
    location: impl Into<Location>,
    options: &CollectionOptions,
) -> Result<ResultCollection> {
    let parameters = merge_parameters(&model.default_parameters(), overrides)?;

    let mut info = options.info().clone();
    info.insert("model".into(), Value::from(model.name()));
    let mut builder = options.to_builder().info(info);
    if options.description().is_none() {
        if let Some(description) = model.description() {
            builder = builder.description(description);
        }
    }
    let options = builder.build();

    let mut collection = ResultCollection::create(location, &options)?;
    collection.start(parameters.clone())?;
    info!(model = model.name(), run_id = collection.run_id(), "Running model");
    execute(model, &parameters, &mut collection)?;
    collection.finish()?;
    Ok(collection)
}

/// Continue an interrupted run of `model` stored at `location`, handing the
/// model the persisted parameters.
///
/// # Errors
/// Returns [`Error::InvalidState`] if the run already finished and
/// propagates resume, storage and model errors.
pub fn resume_model<M: Model + ?Sized>(
    model: &mut M,
    location: impl Into<Location>,
    options: &CollectionOptions,
) -> Result<ResultCollection> {
    let mut collection = ResultCollection::resume(location, options)?;
    if collection.state() == RunState::Finished {
        return Err(Error::InvalidState(format!(
            "run `{}` at `{}` already finished",
            collection.run_id(),
            collection.location()
        )));
    }
    let parameters = collection.parameters().clone();
    info!(model = model.name(), run_id = collection.run_id(), "Resuming model");
    execute(model, &parameters, &mut collection)?;
    collection.finish()?;
    Ok(collection)
}

fn execute<M: Model + ?Sized>(
    model: &mut M,
    parameters: &Mapping,
    collection: &mut ResultCollection,
) -> Result<()> {
    model.run(parameters, collection).inspect_err(|e| {
        warn!(
            model = model.name(),
            run_id = collection.run_id(),
            error = %e,
            "Model failed, run left resumable"
        );
    })
}

/// [`Model`] built from a closure.
pub struct FnModel<F> {
    name: String,
    defaults: Mapping,
    run: F,
}

/// Wrap a closure as a [`Model`].
pub fn model_fn<F>(name: impl Into<String>, defaults: Mapping, run: F) -> FnModel<F>
where
    F: FnMut(&Mapping, &mut ResultCollection) -> Result<()>,
{
    FnModel {
        name: name.into(),
        defaults,
        run,
    }
}

impl<F> Model for FnModel<F>
where
    F: FnMut(&Mapping, &mut ResultCollection) -> Result<()>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn default_parameters(&self) -> Mapping {
        self.defaults.clone()
    }

    fn run(&mut self, parameters: &Mapping, results: &mut ResultCollection) -> Result<()> {
        (self.run)(parameters, results)
    }
}
