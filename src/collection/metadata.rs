//! Run metadata record
//!
//! Persisted at the root key `metadata` as a [`Mapping`] so every backend
//! stores it the same way:
//!
//! ```text
//! run_id          string
//! format_version  int
//! state           "created" | "running" | "finished"
//! created_at      RFC 3339 timestamp
//! started_at      RFC 3339 timestamp | null
//! finished_at     RFC 3339 timestamp | null
//! completed       bool
//! info            mapping
//! name            string (optional)
//! description     string (optional)
//! ```

use crate::value::{Mapping, Scalar, Value};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;

/// Metadata layout version written by this crate.
pub const FORMAT_VERSION: i64 = 1;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Storage created, parameters not yet written
    Created,
    /// Parameters written, results being written
    Running,
    /// Completion flag set, no further writes accepted
    Finished,
}

impl RunState {
    /// Get state name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }

    /// Parse a persisted state name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity, lifecycle timestamps and free-form info of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    run_id: String,
    format_version: i64,
    state: RunState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    info: Mapping,
    name: Option<String>,
    description: Option<String>,
}

impl RunMetadata {
    /// New metadata in `Created` state.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            format_version: FORMAT_VERSION,
            state: RunState::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            info: Mapping::new(),
            name: None,
            description: None,
        }
    }

    /// Attach free-form info.
    #[must_use]
    pub fn with_info(mut self, info: Mapping) -> Self {
        self.info = info;
        self
    }

    /// Attach a human-readable name.
    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Metadata layout version.
    #[must_use]
    pub const fn format_version(&self) -> i64 {
        self.format_version
    }

    /// Get the current run state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Check whether the completion flag is set.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.state == RunState::Finished
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Start timestamp, if started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Finish timestamp, if finished.
    #[must_use]
    pub const fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Free-form info.
    #[must_use]
    pub const fn info(&self) -> &Mapping {
        &self.info
    }

    /// Human-readable name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Transition to `Running`, stamping `started_at`.
    pub fn start(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transition to `Finished`, stamping `finished_at`.
    pub fn finish(&mut self) {
        self.state = RunState::Finished;
        self.finished_at = Some(Utc::now());
    }

    /// Persisted form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let stamp = |t: Option<DateTime<Utc>>| t.map_or(Value::Null, |t| Value::from(t.to_rfc3339()));
        let mut m = Mapping::new();
        m.insert("run_id".into(), Value::from(self.run_id.as_str()));
        m.insert("format_version".into(), Value::from(self.format_version));
        m.insert("state".into(), Value::from(self.state.as_str()));
        m.insert("created_at".into(), Value::from(self.created_at.to_rfc3339()));
        m.insert("started_at".into(), stamp(self.started_at));
        m.insert("finished_at".into(), stamp(self.finished_at));
        m.insert("completed".into(), Value::from(self.completed()));
        m.insert("info".into(), Value::Mapping(self.info.clone()));
        if let Some(name) = &self.name {
            m.insert("name".into(), Value::from(name.as_str()));
        }
        if let Some(description) = &self.description {
            m.insert("description".into(), Value::from(description.as_str()));
        }
        Value::Mapping(m)
    }

    /// Parse the persisted form.
    ///
    /// # Errors
    /// Returns [`Error::CorruptedState`] naming `location` if a field is
    /// missing or ill-typed, or the format version is unsupported.
    pub fn from_value(value: &Value, location: &str) -> Result<Self> {
        let corrupted = |message: String| Error::corrupted(location, message);
        let m = value
            .as_mapping()
            .ok_or_else(|| corrupted(format!("metadata is a {}, not a mapping", value.kind())))?;
        let field = |key: &str| {
            m.get(key)
                .ok_or_else(|| corrupted(format!("metadata field `{key}` is missing")))
        };
        let string = |key: &str| {
            field(key)?
                .as_str()
                .map(ToString::to_string)
                .ok_or_else(|| corrupted(format!("metadata field `{key}` is not a string")))
        };
        let timestamp = |key: &str| -> Result<Option<DateTime<Utc>>> {
            match field(key)? {
                Value::Null => Ok(None),
                Value::Scalar(Scalar::Str(s)) => DateTime::parse_from_rfc3339(s)
                    .map(|t| Some(t.with_timezone(&Utc)))
                    .map_err(|e| corrupted(format!("metadata field `{key}`: {e}"))),
                _ => Err(corrupted(format!("metadata field `{key}` is not a timestamp"))),
            }
        };
        let optional_string = |key: &str| m.get(key).and_then(Value::as_str).map(ToString::to_string);

        let format_version = field("format_version")?
            .as_i64()
            .ok_or_else(|| corrupted("metadata field `format_version` is not an integer".into()))?;
        if format_version != FORMAT_VERSION {
            return Err(corrupted(format!(
                "unsupported metadata format version {format_version} (expected {FORMAT_VERSION})"
            )));
        }
        let state_name = string("state")?;
        let state = RunState::parse(&state_name)
            .ok_or_else(|| corrupted(format!("unknown run state `{state_name}`")))?;
        let created_at = timestamp("created_at")?
            .ok_or_else(|| corrupted("metadata field `created_at` is null".into()))?;
        let info = match m.get("info") {
            Some(Value::Mapping(info)) => info.clone(),
            _ => Mapping::new(),
        };

        Ok(Self {
            run_id: string("run_id")?,
            format_version,
            state,
            created_at,
            started_at: timestamp("started_at")?,
            finished_at: timestamp("finished_at")?,
            info,
            name: optional_string("name"),
            description: optional_string("description"),
        })
    }
}
