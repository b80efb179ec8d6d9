//! Node paths inside a storage tree

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Prefix reserved for internal names and attributes.
pub const RESERVED_PREFIX: &str = "__";

/// Validate a child name.
///
/// # Errors
/// Returns [`Error::InvalidName`] if the name is empty, contains
/// [`SEPARATOR`] or starts with [`RESERVED_PREFIX`].
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SEPARATOR) || name.starts_with(RESERVED_PREFIX) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Absolute path of a node, as a list of validated segments.
///
/// The root is the empty path and displays as `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// The root path.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a `/`-separated path. Leading and trailing separators are ignored.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] for empty inner segments (`a//b`) or
    /// reserved names.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        trimmed
            .split(SEPARATOR)
            .map(|segment| {
                validate_name(segment)?;
                Ok(segment.to_string())
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Path of the child `name`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] if `name` is not a valid child name.
    pub fn join(&self, name: &str) -> Result<Self> {
        validate_name(name)?;
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Ok(Self(segments))
    }

    /// Check if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path segments from the root.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Last segment, `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Parent path, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Display form of the child `key` below this path (for messages).
    #[must_use]
    pub fn describe(&self, key: &str) -> String {
        if self.0.is_empty() {
            format!("/{key}")
        } else {
            format!("{self}/{key}")
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}
