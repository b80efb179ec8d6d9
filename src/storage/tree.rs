//! In-memory node tree shared by the memory, text and container backends
//!
//! All structural rules (naming, overwrite compatibility, trajectory layout)
//! live here. Each mutation has a pure `check_*` counterpart so backends
//! that persist a record can validate, persist, then apply.

use super::path::{validate_name, NodePath};
use super::{NodeKind, TrajectoryInfo};
use crate::value::{Mapping, Trajectory, Value};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Group node: attributes plus ordered children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    /// Node attributes
    #[serde(default)]
    pub attrs: Mapping,
    /// Children in creation order
    #[serde(default)]
    pub children: IndexMap<String, Node>,
}

/// Value node: one value plus attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueNode {
    /// Stored value
    pub value: Value,
    /// Node attributes
    #[serde(default)]
    pub attrs: Mapping,
}

/// Child of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    /// Nested group
    Group(GroupNode),
    /// Stored value
    Value(ValueNode),
}

/// Root of an in-memory storage tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeTree {
    root: GroupNode,
}

impl NodeTree {
    /// Empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree with an existing root group.
    #[must_use]
    pub const fn from_root(root: GroupNode) -> Self {
        Self { root }
    }

    /// Root group.
    #[must_use]
    pub const fn root(&self) -> &GroupNode {
        &self.root
    }

    fn group(&self, path: &NodePath) -> Option<&GroupNode> {
        let mut current = &self.root;
        for segment in path.segments() {
            match current.children.get(segment)? {
                Node::Group(g) => current = g,
                Node::Value(_) => return None,
            }
        }
        Some(current)
    }

    fn child(&self, group: &NodePath, key: &str) -> Option<&Node> {
        self.group(group)?.children.get(key)
    }

    /// Kind of the node at `path`.
    #[must_use]
    pub fn node_kind(&self, path: &NodePath) -> Option<NodeKind> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Some(NodeKind::Group);
        };
        match self.child(&parent, name)? {
            Node::Group(_) => Some(NodeKind::Group),
            Node::Value(v) => Some(NodeKind::Value(v.value.kind())),
        }
    }

    /// Child names of the group at `path`, in creation order.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no group at `path`.
    pub fn list_children(&self, path: &NodePath) -> Result<Vec<String>> {
        self.group(path)
            .map(|g| g.children.keys().cloned().collect())
            .ok_or_else(|| Error::NotFound(format!("group {path}")))
    }

    /// Check that every existing segment of `path` is a group.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyExists`] if a value sits on the path.
    pub fn check_group_path(&self, path: &NodePath) -> Result<()> {
        let mut current = &self.root;
        for (depth, segment) in path.segments().iter().enumerate() {
            match current.children.get(segment) {
                None => return Ok(()),
                Some(Node::Group(g)) => current = g,
                Some(Node::Value(_)) => {
                    return Err(Error::AlreadyExists(format!(
                        "/{} is a value, not a group",
                        path.segments()[..=depth].join("/")
                    )))
                }
            }
        }
        Ok(())
    }

    fn ensure_group(&mut self, path: &NodePath) -> Result<&mut GroupNode> {
        self.check_group_path(path)?;
        let mut current = &mut self.root;
        for segment in path.segments() {
            let node = current
                .children
                .entry(segment.clone())
                .or_insert_with(|| Node::Group(GroupNode::default()));
            current = match node {
                Node::Group(g) => g,
                Node::Value(_) => return Err(Error::AlreadyExists(segment.clone())),
            };
        }
        Ok(current)
    }

    /// Create the group at `path` and any missing parents.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyExists`] if a value occupies the path.
    pub fn create_group(&mut self, path: &NodePath) -> Result<()> {
        self.ensure_group(path).map(|_| ())
    }

    /// Validate a [`NodeTree::write_value`] without applying it.
    ///
    /// # Errors
    /// See [`NodeTree::write_value`].
    pub fn check_write_value(&self, group: &NodePath, key: &str, value: &Value) -> Result<()> {
        validate_name(key)?;
        self.check_group_path(group)?;
        let target = group.describe(key);
        match self.child(group, key) {
            None => Ok(()),
            Some(Node::Group(_)) => Err(Error::AlreadyExists(format!("{target} is a group"))),
            Some(Node::Value(v)) => v.value.check_overwrite(&target, value),
        }
    }

    /// Write or overwrite a value, creating the enclosing group if needed.
    ///
    /// # Errors
    /// Returns [`Error::SchemaConflict`] for incompatible overwrites and
    /// [`Error::AlreadyExists`] if a group has the name.
    pub fn write_value(&mut self, group: &NodePath, key: &str, value: Value) -> Result<()> {
        self.check_write_value(group, key, &value)?;
        let parent = self.ensure_group(group)?;
        if let Some(Node::Value(existing)) = parent.children.get_mut(key) {
            existing.value = value;
        } else {
            parent.children.insert(
                key.to_string(),
                Node::Value(ValueNode {
                    value,
                    attrs: Mapping::new(),
                }),
            );
        }
        Ok(())
    }

    /// Read a value.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no value `key`.
    pub fn read_value(&self, group: &NodePath, key: &str) -> Result<Value> {
        match self.child(group, key) {
            Some(Node::Value(v)) => Ok(v.value.clone()),
            Some(Node::Group(_)) => Err(Error::NotFound(format!(
                "value {} (it is a group)",
                group.describe(key)
            ))),
            None => Err(Error::NotFound(group.describe(key))),
        }
    }

    /// Validate a [`NodeTree::append_frames`] without applying it.
    ///
    /// # Errors
    /// See [`NodeTree::append_frames`].
    pub fn check_append(&self, group: &NodePath, key: &str, chunk: &Trajectory) -> Result<()> {
        validate_name(key)?;
        self.check_group_path(group)?;
        let target = group.describe(key);
        match self.child(group, key) {
            None => Ok(()),
            Some(Node::Group(_)) => Err(Error::AlreadyExists(format!("{target} is a group"))),
            Some(Node::Value(v)) => match &v.value {
                Value::Trajectory(t) if t.layout() == chunk.layout() => Ok(()),
                Value::Trajectory(t) => Err(Error::ShapeMismatch {
                    key: target,
                    expected: t.layout().to_string(),
                    actual: chunk.layout().to_string(),
                }),
                other => Err(Error::schema_conflict(
                    target,
                    format!("cannot append frames to a {}", other.kind()),
                )),
            },
        }
    }

    /// Append a chunk of frames, creating the trajectory if absent.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] on layout disagreement and
    /// [`Error::SchemaConflict`] if `key` holds another kind of value.
    pub fn append_frames(&mut self, group: &NodePath, key: &str, chunk: &Trajectory) -> Result<()> {
        self.check_append(group, key, chunk)?;
        let parent = self.ensure_group(group)?;
        if let Some(Node::Value(ValueNode {
            value: Value::Trajectory(existing),
            ..
        })) = parent.children.get_mut(key)
        {
            existing.extend(chunk)?;
        } else {
            parent.children.insert(
                key.to_string(),
                Node::Value(ValueNode {
                    value: Value::Trajectory(chunk.clone()),
                    attrs: Mapping::new(),
                }),
            );
        }
        Ok(())
    }

    /// Layout, length and last time point of a trajectory.
    ///
    /// # Errors
    /// Returns [`Error::SchemaConflict`] if `key` is not a trajectory.
    pub fn trajectory_info(&self, group: &NodePath, key: &str) -> Result<Option<TrajectoryInfo>> {
        match self.child(group, key) {
            None => Ok(None),
            Some(Node::Value(ValueNode {
                value: Value::Trajectory(t),
                ..
            })) => Ok(Some(TrajectoryInfo {
                layout: t.layout().clone(),
                len: t.len(),
                last_time: t.times().last().copied(),
            })),
            Some(Node::Group(_)) => Err(Error::schema_conflict(
                group.describe(key),
                "group is not a trajectory",
            )),
            Some(Node::Value(v)) => Err(Error::schema_conflict(
                group.describe(key),
                format!("{} is not a trajectory", v.value.kind()),
            )),
        }
    }

    /// Attributes of the node at `path`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no such node.
    pub fn attrs(&self, path: &NodePath) -> Result<&Mapping> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Ok(&self.root.attrs);
        };
        match self.child(&parent, name) {
            Some(Node::Group(g)) => Ok(&g.attrs),
            Some(Node::Value(v)) => Ok(&v.attrs),
            None => Err(Error::NotFound(format!("node {path}"))),
        }
    }

    /// Validate a [`NodeTree::write_attrs`] without applying it.
    ///
    /// # Errors
    /// See [`NodeTree::write_attrs`].
    pub fn check_attrs(&self, path: &NodePath, attrs: &Mapping) -> Result<()> {
        for name in attrs.keys() {
            validate_name(name)?;
        }
        self.attrs(path).map(|_| ())
    }

    /// Merge `attrs` into the node's attributes.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for a missing node and
    /// [`Error::InvalidName`] for reserved attribute names.
    pub fn write_attrs(&mut self, path: &NodePath, attrs: &Mapping) -> Result<()> {
        self.check_attrs(path, attrs)?;
        let target = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => {
                let group = self.ensure_group(&parent)?;
                match group.children.get_mut(name) {
                    Some(Node::Group(g)) => &mut g.attrs,
                    Some(Node::Value(v)) => &mut v.attrs,
                    None => return Err(Error::NotFound(format!("node {path}"))),
                }
            }
            _ => &mut self.root.attrs,
        };
        for (name, value) in attrs {
            target.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Array, DType, FrameLayout, ValueKind};

    fn path(p: &str) -> NodePath {
        NodePath::parse(p).unwrap()
    }

    #[test]
    fn test_children_keep_creation_order() {
        let mut tree = NodeTree::new();
        tree.write_value(&NodePath::root(), "zeta", Value::from(1)).unwrap();
        tree.create_group(&path("alpha")).unwrap();
        tree.write_value(&NodePath::root(), "mid", Value::Null).unwrap();
        assert_eq!(
            tree.list_children(&NodePath::root()).unwrap(),
            vec!["zeta", "alpha", "mid"]
        );
    }

    #[test]
    fn test_write_creates_parent_groups() {
        let mut tree = NodeTree::new();
        tree.write_value(&path("a/b"), "x", Value::from(2.5)).unwrap();
        assert_eq!(tree.node_kind(&path("a")), Some(NodeKind::Group));
        assert_eq!(
            tree.node_kind(&path("a/b/x")),
            Some(NodeKind::Value(ValueKind::Scalar))
        );
        assert_eq!(tree.read_value(&path("a/b"), "x").unwrap(), Value::from(2.5));
    }

    #[test]
    fn test_value_blocks_group_path() {
        let mut tree = NodeTree::new();
        tree.write_value(&NodePath::root(), "x", Value::from(1)).unwrap();
        assert!(matches!(tree.create_group(&path("x")), Err(Error::AlreadyExists(_))));
        assert!(matches!(
            tree.write_value(&path("x"), "y", Value::Null),
            Err(Error::AlreadyExists(_))
        ));
        tree.create_group(&path("g")).unwrap();
        assert!(matches!(
            tree.write_value(&NodePath::root(), "g", Value::Null),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_failed_overwrite_keeps_value() {
        let mut tree = NodeTree::new();
        let root = NodePath::root();
        tree.write_value(&root, "v", Value::from(vec![1.0, 2.0])).unwrap();
        let err = tree
            .write_value(&root, "v", Value::from(vec![1.0, 2.0, 3.0]))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
        assert_eq!(tree.read_value(&root, "v").unwrap(), Value::from(vec![1.0, 2.0]));
    }

    #[test]
    fn test_append_frames_checks_layout() {
        let mut tree = NodeTree::new();
        let root = NodePath::root();
        let layout = FrameLayout::new(vec![2], DType::Float64);
        let chunk = Trajectory::from_frames(layout, &[Array::from(vec![1.0, 2.0])]).unwrap();
        tree.append_frames(&root, "t", &chunk).unwrap();
        tree.append_frames(&root, "t", &chunk).unwrap();

        let wrong = Trajectory::from_frames(
            FrameLayout::new(vec![3], DType::Float64),
            &[Array::from(vec![1.0, 2.0, 3.0])],
        )
        .unwrap();
        assert!(matches!(
            tree.append_frames(&root, "t", &wrong),
            Err(Error::ShapeMismatch { .. })
        ));

        let info = tree.trajectory_info(&root, "t").unwrap().unwrap();
        assert_eq!(info.len, 2);
        assert_eq!(info.last_time, Some(0.0));

        tree.write_value(&root, "s", Value::from(1)).unwrap();
        assert!(matches!(
            tree.append_frames(&root, "s", &chunk),
            Err(Error::SchemaConflict { .. })
        ));
    }

    #[test]
    fn test_attrs_merge_and_reject_reserved() {
        let mut tree = NodeTree::new();
        tree.create_group(&path("g")).unwrap();
        let mut attrs = Mapping::new();
        attrs.insert("unit".into(), Value::from("m"));
        tree.write_attrs(&path("g"), &attrs).unwrap();
        let mut more = Mapping::new();
        more.insert("scale".into(), Value::from(2));
        tree.write_attrs(&path("g"), &more).unwrap();
        assert_eq!(tree.attrs(&path("g")).unwrap().len(), 2);

        let mut reserved = Mapping::new();
        reserved.insert("__x".into(), Value::Null);
        assert!(matches!(
            tree.write_attrs(&path("g"), &reserved),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(tree.attrs(&path("missing")), Err(Error::NotFound(_))));
    }
}
