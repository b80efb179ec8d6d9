//! Run catalog: inspect many persisted runs at once
//!
//! A catalog holds the metadata and parameters of every run found in a
//! folder, not open storage handles. Use [`RunEntry::open`] to read the
//! results of one run.
//!
//! ## Example
//!
//! ```rust,no_run
//! use runstore::catalog::{CatalogOptions, RunCatalog};
//! use runstore::Value;
//!
//! let catalog = RunCatalog::from_folder("sweep/", CatalogOptions::default())?;
//! for (name, values) in catalog.varying_parameters() {
//!     println!("{name}: {} values", values.len());
//! }
//! let subset = catalog.filtered(&[("alpha", Value::from(0.5))]);
//! # Ok::<(), runstore::Error>(())
//! ```

use crate::collection::{ResultCollection, RunMetadata, RunState};
use crate::storage::{BackendKind, Location};
use crate::value::{Mapping, Scalar, Value};
use crate::{Error, Result};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// How a folder is scanned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Fail on the first unreadable entry instead of skipping it
    pub strict: bool,
}

/// Summary of one persisted run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEntry {
    location: Location,
    metadata: RunMetadata,
    parameters: Mapping,
}

impl RunEntry {
    /// Summarize the run stored at `location`.
    ///
    /// # Errors
    /// See [`ResultCollection::open`].
    pub fn load(location: impl Into<Location>) -> Result<Self> {
        let collection = ResultCollection::open(location)?;
        Ok(Self {
            location: collection.location().clone(),
            metadata: collection.metadata().clone(),
            parameters: collection.parameters().clone(),
        })
    }

    /// Storage location of the run.
    #[must_use]
    pub const fn location(&self) -> &Location {
        &self.location
    }

    /// Run metadata.
    #[must_use]
    pub const fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Run parameters.
    #[must_use]
    pub const fn parameters(&self) -> &Mapping {
        &self.parameters
    }

    /// Parameter `key`, if set.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Open the run read-only.
    ///
    /// # Errors
    /// See [`ResultCollection::open`].
    pub fn open(&self) -> Result<ResultCollection> {
        ResultCollection::open(self.location.clone())
    }

    fn matches(&self, criteria: &[(&str, Value)]) -> bool {
        criteria
            .iter()
            .all(|(key, value)| self.parameters.get(*key) == Some(value))
    }
}

/// Ordered set of persisted runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunCatalog {
    entries: Vec<RunEntry>,
}

impl RunCatalog {
    /// Catalog over the given entries.
    #[must_use]
    pub const fn new(entries: Vec<RunEntry>) -> Self {
        Self { entries }
    }

    /// Scan `dir` for runs: files with a text or container suffix and
    /// directories (chunked stores). Hidden entries are ignored. Entries
    /// are visited in name order.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `dir` is not a directory; with
    /// `strict` set, the first entry that fails to load.
    pub fn from_folder(dir: impl AsRef<Path>, options: CatalogOptions) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("run folder `{}`", dir.display())));
        }
        let mut paths = fs::read_dir(dir)
            .map_err(|e| Error::io(dir.display(), &e))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| !name.to_string_lossy().starts_with('.'))
            })
            .collect::<Vec<_>>();
        paths.sort();

        let mut entries = Vec::new();
        for path in paths {
            // A plain file is a run only with a single-file backend suffix
            if !path.is_dir()
                && !matches!(
                    BackendKind::from_path(&path),
                    Ok(BackendKind::Text(_) | BackendKind::Container)
                )
            {
                continue;
            }
            match RunEntry::load(path.as_path()) {
                Ok(entry) => entries.push(entry),
                Err(e) if options.strict => return Err(e),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run"),
            }
        }
        if entries.is_empty() {
            warn!(dir = %dir.display(), "Did not find any runs");
        }
        debug!(dir = %dir.display(), runs = entries.len(), "Loaded run catalog");
        Ok(Self { entries })
    }

    /// Number of runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the catalog holds no runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over runs in catalog order.
    pub fn iter(&self) -> std::slice::Iter<'_, RunEntry> {
        self.entries.iter()
    }

    /// Check whether every run has the same parameter names.
    #[must_use]
    pub fn same_parameter_keys(&self) -> bool {
        let mut entries = self.entries.iter();
        let Some(first) = entries.next() else {
            return true;
        };
        entries.all(|entry| {
            entry.parameters.len() == first.parameters.len()
                && entry.parameters.keys().all(|k| first.parameters.contains_key(k))
        })
    }

    /// Distinct values of every parameter, in order of first appearance.
    #[must_use]
    pub fn parameter_values(&self) -> IndexMap<String, Vec<Value>> {
        let mut values: IndexMap<String, Vec<Value>> = IndexMap::new();
        for entry in &self.entries {
            for (key, value) in &entry.parameters {
                let seen = values.entry(key.clone()).or_default();
                if !seen.contains(value) {
                    seen.push(value.clone());
                }
            }
        }
        values
    }

    /// Parameters that take a single value across all runs.
    #[must_use]
    pub fn constant_parameters(&self) -> Mapping {
        self.parameter_values()
            .into_iter()
            .filter(|(_, values)| values.len() == 1)
            .filter_map(|(key, mut values)| values.pop().map(|value| (key, value)))
            .collect()
    }

    /// Parameters that vary across runs, each with its sorted distinct values.
    #[must_use]
    pub fn varying_parameters(&self) -> IndexMap<String, Vec<Value>> {
        self.parameter_values()
            .into_iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|(key, mut values)| {
                values.sort_by(compare_values);
                (key, values)
            })
            .collect()
    }

    /// Runs whose parameters match every `(key, value)` pair.
    #[must_use]
    pub fn filtered(&self, criteria: &[(&str, Value)]) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|entry| entry.matches(criteria))
                .cloned()
                .collect(),
        }
    }

    /// First run whose parameters match every `(key, value)` pair.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no run matches.
    pub fn get(&self, criteria: &[(&str, Value)]) -> Result<&RunEntry> {
        self.entries
            .iter()
            .find(|entry| entry.matches(criteria))
            .ok_or_else(|| {
                let wanted = criteria
                    .iter()
                    .map(|(k, v)| format!("{k}={v:?}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Error::NotFound(format!("run with parameters {wanted}"))
            })
    }

    /// Runs grouped by the values of `keys`, one group per combination
    /// that occurs, in order of first appearance.
    #[must_use]
    pub fn group_by(&self, keys: &[&str]) -> Vec<(Mapping, Self)> {
        let mut groups: Vec<(Mapping, Self)> = Vec::new();
        for entry in &self.entries {
            let group_key: Mapping = keys
                .iter()
                .map(|k| {
                    let value = entry.parameter(k).cloned().unwrap_or(Value::Null);
                    ((*k).to_string(), value)
                })
                .collect();
            match groups.iter_mut().find(|(existing, _)| *existing == group_key) {
                Some((_, group)) => group.entries.push(entry.clone()),
                None => groups.push((group_key, Self::new(vec![entry.clone()]))),
            }
        }
        groups
    }

    /// Runs ordered by the values of `keys` (stable; missing values first).
    #[must_use]
    pub fn sorted_by(&self, keys: &[&str], reverse: bool) -> Self {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| {
            let ordering = keys
                .iter()
                .map(|k| match (a.parameter(k), b.parameter(k)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal);
            if reverse {
                ordering.reverse()
            } else {
                ordering
            }
        });
        Self { entries }
    }

    /// Keep only the first run for each distinct parameter set.
    #[must_use]
    pub fn remove_duplicates(&self) -> Self {
        let mut entries: Vec<RunEntry> = Vec::new();
        for entry in &self.entries {
            if !entries.iter().any(|kept| kept.parameters == entry.parameters) {
                entries.push(entry.clone());
            }
        }
        Self { entries }
    }

    /// Keep only runs that reached `Finished`.
    #[must_use]
    pub fn finished_only(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|entry| entry.metadata.state() == RunState::Finished)
                .cloned()
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RunCatalog {
    type Item = &'a RunEntry;
    type IntoIter = std::slice::Iter<'a, RunEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Total order over parameter values: nulls, then booleans, numbers and
/// strings; other kinds compare equal.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    const fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Scalar(Scalar::Bool(_)) => 1,
            Value::Scalar(Scalar::Int(_) | Scalar::Float(_)) => 2,
            Value::Scalar(Scalar::Str(_)) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Scalar(Scalar::Bool(x)), Value::Scalar(Scalar::Bool(y))) => x.cmp(y),
        (Value::Scalar(Scalar::Str(x)), Value::Scalar(Scalar::Str(y))) => x.cmp(y),
        (Value::Scalar(Scalar::Int(x)), Value::Scalar(Scalar::Int(y))) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}
