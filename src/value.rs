//! Value model: the canonical in-memory form of everything a run persists
//!
//! ```text
//! Value ──┬─ Null
//!         ├─ Scalar      bool | i64 | f64 | string
//!         ├─ Array       shape + dtype + contiguous buffer
//!         ├─ Mapping     ordered key → Value
//!         └─ Trajectory  fixed frame layout + frames + time points
//! ```
//!
//! Values are independent of any storage format. Every backend stores and
//! returns them unchanged (round-trip law).

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered mapping of string keys to values.
pub type Mapping = IndexMap<String, Value>;

/// Element type of an [`Array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Boolean
    Bool,
    /// Unsigned 8-bit integer
    UInt8,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
}

impl DType {
    /// Get dtype name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::UInt8 => "uint8",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contiguous, typed element buffer (row-major).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayData {
    /// Boolean elements
    Bool(Vec<bool>),
    /// `u8` elements
    UInt8(Vec<u8>),
    /// `i32` elements
    Int32(Vec<i32>),
    /// `i64` elements
    Int64(Vec<i64>),
    /// `f32` elements
    Float32(#[serde(with = "float_repr::seq")] Vec<f32>),
    /// `f64` elements
    Float64(#[serde(with = "float_repr::seq")] Vec<f64>),
}

/// Apply the same expression to the vector inside any `ArrayData` variant.
macro_rules! with_buffer {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
        }
    };
}

impl ArrayData {
    /// Empty buffer of the given dtype.
    #[must_use]
    pub const fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Self::Bool(Vec::new()),
            DType::UInt8 => Self::UInt8(Vec::new()),
            DType::Int32 => Self::Int32(Vec::new()),
            DType::Int64 => Self::Int64(Vec::new()),
            DType::Float32 => Self::Float32(Vec::new()),
            DType::Float64 => Self::Float64(Vec::new()),
        }
    }

    /// Element type of this buffer.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::UInt8(_) => DType::UInt8,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        with_buffer!(self, v => v.len())
    }

    /// Check if the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the elements in `start..end`.
    ///
    /// # Panics
    /// Panics if the range is out of bounds (callers check frame bounds).
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            Self::Bool(v) => Self::Bool(v[start..end].to_vec()),
            Self::UInt8(v) => Self::UInt8(v[start..end].to_vec()),
            Self::Int32(v) => Self::Int32(v[start..end].to_vec()),
            Self::Int64(v) => Self::Int64(v[start..end].to_vec()),
            Self::Float32(v) => Self::Float32(v[start..end].to_vec()),
            Self::Float64(v) => Self::Float64(v[start..end].to_vec()),
        }
    }

    /// Append all elements of `other`.
    ///
    /// Returns `false` (and appends nothing) if the dtypes differ.
    pub fn extend_from(&mut self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.extend_from_slice(b),
            (Self::UInt8(a), Self::UInt8(b)) => a.extend_from_slice(b),
            (Self::Int32(a), Self::Int32(b)) => a.extend_from_slice(b),
            (Self::Int64(a), Self::Int64(b)) => a.extend_from_slice(b),
            (Self::Float32(a), Self::Float32(b)) => a.extend_from_slice(b),
            (Self::Float64(a), Self::Float64(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }
}

/// Shape and dtype shared by every frame of a trajectory (or one array).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameLayout {
    /// Array shape; empty for 0-d (scalar) frames
    pub shape: Vec<usize>,
    /// Element type
    pub dtype: DType,
}

impl FrameLayout {
    /// Create a layout.
    #[must_use]
    pub const fn new(shape: Vec<usize>, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    /// Layout of 0-d frames of the given dtype.
    #[must_use]
    pub const fn scalar(dtype: DType) -> Self {
        Self {
            shape: Vec::new(),
            dtype,
        }
    }

    /// Number of elements in one frame.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

impl fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(ToString::to_string).collect();
        write!(f, "{}[{}]", self.dtype, dims.join(", "))
    }
}

/// N-dimensional array with immutable shape and dtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    shape: Vec<usize>,
    data: ArrayData,
}

impl Array {
    /// Create an array, checking that the buffer fills the shape.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if `data.len()` differs from the
    /// product of `shape`.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::ShapeMismatch {
                key: "<array>".to_string(),
                expected: format!("{expected} elements for shape {shape:?}"),
                actual: format!("{} elements", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    /// Shape of the array (empty for 0-d arrays).
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Element buffer.
    #[must_use]
    pub const fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Consume the array, returning its buffer.
    #[must_use]
    pub fn into_data(self) -> ArrayData {
        self.data
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shape and dtype of this array.
    #[must_use]
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::new(self.shape.clone(), self.dtype())
    }

    /// Elements as `f64` slice, if the dtype is `float64`.
    #[must_use]
    pub fn as_f64_slice(&self) -> Option<&[f64]> {
        match &self.data {
            ArrayData::Float64(v) => Some(v),
            _ => None,
        }
    }

    /// The single element of a 0-d `float64` array.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match (&self.data, self.shape.is_empty()) {
            (ArrayData::Float64(v), true) => v.first().copied(),
            _ => None,
        }
    }
}

macro_rules! impl_array_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Array {
                /// 0-d array holding one element
                fn from(value: $t) -> Self {
                    Self { shape: Vec::new(), data: ArrayData::$variant(vec![value]) }
                }
            }

            impl From<Vec<$t>> for Array {
                /// 1-d array
                fn from(values: Vec<$t>) -> Self {
                    Self { shape: vec![values.len()], data: ArrayData::$variant(values) }
                }
            }
        )*
    };
}

impl_array_from!(
    bool => Bool,
    u8 => UInt8,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
);

/// Append-only sequence of frames sharing one [`FrameLayout`].
///
/// Frames are stored back to back in one buffer; `times` holds one time
/// point per frame and is the authority on the frame count (frames of a
/// zero-sized shape carry no elements).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    layout: FrameLayout,
    #[serde(with = "float_repr::seq")]
    times: Vec<f64>,
    data: ArrayData,
}

impl Trajectory {
    /// Empty trajectory with a fixed frame layout.
    #[must_use]
    pub fn new(layout: FrameLayout) -> Self {
        let data = ArrayData::empty(layout.dtype);
        Self {
            layout,
            times: Vec::new(),
            data,
        }
    }

    /// Build a trajectory from frames, numbering time points `0, 1, 2, …`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if a frame disagrees with `layout`.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_frames(layout: FrameLayout, frames: &[Array]) -> Result<Self> {
        let mut trajectory = Self::new(layout);
        for (i, frame) in frames.iter().enumerate() {
            trajectory.push(frame, i as f64)?;
        }
        Ok(trajectory)
    }

    /// Rebuild a trajectory from its raw parts.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the buffer does not hold exactly
    /// `times.len()` frames of `layout`.
    pub fn from_parts(layout: FrameLayout, times: Vec<f64>, data: ArrayData) -> Result<Self> {
        let expected = times.len() * layout.element_count();
        if data.dtype() != layout.dtype || data.len() != expected {
            return Err(Error::ShapeMismatch {
                key: "<trajectory>".to_string(),
                expected: format!("{} frames of {layout}", times.len()),
                actual: format!("{} {} elements", data.len(), data.dtype()),
            });
        }
        Ok(Self {
            layout,
            times,
            data,
        })
    }

    /// Frame layout fixed at creation.
    #[must_use]
    pub const fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Check if the trajectory has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Time point of every frame.
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Raw frame buffer (frames back to back).
    #[must_use]
    pub const fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Frame at `index`, if present.
    #[must_use]
    pub fn frame(&self, index: usize) -> Option<Array> {
        if index >= self.len() {
            return None;
        }
        let n = self.layout.element_count();
        Some(Array {
            shape: self.layout.shape.clone(),
            data: self.data.slice(index * n, (index + 1) * n),
        })
    }

    /// All frames in append order.
    #[must_use]
    pub fn frames(&self) -> Vec<Array> {
        (0..self.len()).filter_map(|i| self.frame(i)).collect()
    }

    /// Check that `frame` fits this trajectory.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] naming `key` if it does not.
    pub fn check_frame(layout: &FrameLayout, key: &str, frame: &Array) -> Result<()> {
        if frame.shape() != layout.shape.as_slice() || frame.dtype() != layout.dtype {
            return Err(Error::ShapeMismatch {
                key: key.to_string(),
                expected: layout.to_string(),
                actual: frame.layout().to_string(),
            });
        }
        Ok(())
    }

    /// Append one frame with its time point.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the frame disagrees with the layout.
    pub fn push(&mut self, frame: &Array, time: f64) -> Result<()> {
        Self::check_frame(&self.layout, "<trajectory>", frame)?;
        self.data.extend_from(frame.data());
        self.times.push(time);
        Ok(())
    }

    /// Append every frame of `chunk` (same layout) in order.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the layouts differ.
    pub fn extend(&mut self, chunk: &Self) -> Result<()> {
        if chunk.layout != self.layout {
            return Err(Error::ShapeMismatch {
                key: "<trajectory>".to_string(),
                expected: self.layout.to_string(),
                actual: chunk.layout.to_string(),
            });
        }
        self.data.extend_from(&chunk.data);
        self.times.extend_from_slice(&chunk.times);
        Ok(())
    }
}

/// Scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(#[serde(with = "float_repr")] f64),
    /// String
    Str(String),
}

impl Scalar {
    /// Name of the scalar kind (`bool`, `int`, `float`, `str`).
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
        }
    }
}

/// Discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// [`Value::Null`]
    Null,
    /// [`Value::Scalar`]
    Scalar,
    /// [`Value::Array`]
    Array,
    /// [`Value::Mapping`]
    Mapping,
    /// [`Value::Trajectory`]
    Trajectory,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Scalar => "scalar",
            Self::Array => "array",
            Self::Mapping => "mapping",
            Self::Trajectory => "trajectory",
        };
        f.write_str(name)
    }
}

/// A result value, independent of any storage format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    /// No value
    Null,
    /// Single scalar
    Scalar(Scalar),
    /// N-dimensional array
    Array(Array),
    /// Ordered nested mapping
    Mapping(Mapping),
    /// Append-only frame sequence
    Trajectory(Trajectory),
}

impl Value {
    /// Discriminant of this value.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Scalar(_) => ValueKind::Scalar,
            Self::Array(_) => ValueKind::Array,
            Self::Mapping(_) => ValueKind::Mapping,
            Self::Trajectory(_) => ValueKind::Trajectory,
        }
    }

    /// Scalar content, if any.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Float content; integers are widened.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(Scalar::Float(x)) => Some(*x),
            Self::Scalar(Scalar::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Integer content.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Boolean content.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// String content.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Array content.
    #[must_use]
    pub const fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Mapping content.
    #[must_use]
    pub const fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Trajectory content.
    #[must_use]
    pub const fn as_trajectory(&self) -> Option<&Trajectory> {
        match self {
            Self::Trajectory(t) => Some(t),
            _ => None,
        }
    }

    /// Check whether `new` may overwrite `self` at the same key.
    ///
    /// Scalars keep their kind, arrays keep shape and dtype, trajectories are
    /// append-only and never overwritten. Mappings and nulls may be replaced
    /// by a value of the same kind.
    ///
    /// # Errors
    /// Returns [`Error::SchemaConflict`] naming `key` on any violation.
    pub fn check_overwrite(&self, key: &str, new: &Self) -> Result<()> {
        match (self, new) {
            (Self::Scalar(old), Self::Scalar(next)) if old.kind_name() != next.kind_name() => {
                Err(Error::schema_conflict(
                    key,
                    format!("scalar kind {} cannot become {}", old.kind_name(), next.kind_name()),
                ))
            }
            (Self::Array(old), Self::Array(next)) if old.layout() != next.layout() => {
                Err(Error::schema_conflict(
                    key,
                    format!("array {} cannot become {}", old.layout(), next.layout()),
                ))
            }
            (Self::Trajectory(_), _) => Err(Error::schema_conflict(
                key,
                "trajectories are append-only and cannot be overwritten",
            )),
            (old, next) if old.kind() != next.kind() => Err(Error::schema_conflict(
                key,
                format!("{} cannot become {}", old.kind(), next.kind()),
            )),
            _ => Ok(()),
        }
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Self::Array(value)
    }
}

impl From<Mapping> for Value {
    fn from(value: Mapping) -> Self {
        Self::Mapping(value)
    }
}

impl From<Trajectory> for Value {
    fn from(value: Trajectory) -> Self {
        Self::Trajectory(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(values: Vec<f64>) -> Self {
        Self::Array(Array::from(values))
    }
}

macro_rules! impl_scalar_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Scalar {
                fn from(value: $t) -> Self {
                    Self::$variant(value.into())
                }
            }

            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Self::Scalar(Scalar::from(value))
                }
            }
        )*
    };
}

impl_scalar_from!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => Str,
    &str => Str,
);

/// Serde adapters that keep NaN and infinities intact.
///
/// JSON and YAML numbers cannot hold non-finite floats, so human-readable
/// formats write them as the strings `"NaN"`, `"inf"` and `"-inf"`. Binary
/// formats see plain floats.
mod float_repr {
    use serde::de::{Error as _, Unexpected};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub trait Float: Copy + Serialize + for<'de> Deserialize<'de> {
        const NAN: Self;
        const INFINITY: Self;
        const NEG_INFINITY: Self;

        fn tag(self) -> Option<&'static str>;
    }

    macro_rules! impl_float {
        ($($t:ty),*) => {
            $(
                impl Float for $t {
                    const NAN: Self = <$t>::NAN;
                    const INFINITY: Self = <$t>::INFINITY;
                    const NEG_INFINITY: Self = <$t>::NEG_INFINITY;

                    fn tag(self) -> Option<&'static str> {
                        if self.is_nan() {
                            Some("NaN")
                        } else if self.is_finite() {
                            None
                        } else if self.is_sign_negative() {
                            Some("-inf")
                        } else {
                            Some("inf")
                        }
                    }
                }
            )*
        };
    }

    impl_float!(f32, f64);

    struct Text<F>(F);

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<F> {
        Number(F),
        Tag(String),
    }

    impl<F: Float> Serialize for Text<F> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self.0.tag() {
                Some(tag) => serializer.serialize_str(tag),
                None => self.0.serialize(serializer),
            }
        }
    }

    impl<'de, F: Float> Deserialize<'de> for Text<F> {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            match Repr::<F>::deserialize(deserializer)? {
                Repr::Number(x) => Ok(Self(x)),
                Repr::Tag(tag) => match tag.as_str() {
                    "NaN" | "nan" => Ok(Self(F::NAN)),
                    "inf" | "+inf" | "Infinity" => Ok(Self(F::INFINITY)),
                    "-inf" | "-Infinity" => Ok(Self(F::NEG_INFINITY)),
                    other => Err(D::Error::invalid_value(
                        Unexpected::Str(other),
                        &"a number, \"NaN\", \"inf\" or \"-inf\"",
                    )),
                },
            }
        }
    }

    pub fn serialize<F: Float, S: Serializer>(x: &F, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            Text(*x).serialize(serializer)
        } else {
            x.serialize(serializer)
        }
    }

    pub fn deserialize<'de, F: Float, D: Deserializer<'de>>(deserializer: D) -> Result<F, D::Error> {
        if deserializer.is_human_readable() {
            Text::deserialize(deserializer).map(|t| t.0)
        } else {
            F::deserialize(deserializer)
        }
    }

    pub mod seq {
        use super::{Float, Text};
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        #[allow(clippy::ptr_arg)]
        pub fn serialize<F: Float, S: Serializer>(
            values: &Vec<F>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            if serializer.is_human_readable() {
                serializer.collect_seq(values.iter().map(|x| Text(*x)))
            } else {
                values.serialize(serializer)
            }
        }

        pub fn deserialize<'de, F: Float, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<F>, D::Error> {
            if deserializer.is_human_readable() {
                Vec::<Text<F>>::deserialize(deserializer)
                    .map(|values| values.into_iter().map(|t| t.0).collect())
            } else {
                Vec::<F>::deserialize(deserializer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_new_checks_element_count() {
        assert!(Array::new(vec![2, 3], ArrayData::Float64(vec![0.0; 6])).is_ok());
        let err = Array::new(vec![2, 3], ArrayData::Float64(vec![0.0; 5])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_scalar_array_is_zero_dimensional() {
        let a = Array::from(1.5);
        assert!(a.shape().is_empty());
        assert_eq!(a.len(), 1);
        assert_eq!(a.as_f64(), Some(1.5));
    }

    #[test]
    fn test_trajectory_push_and_frames() {
        let mut t = Trajectory::new(FrameLayout::new(vec![2], DType::Int32));
        t.push(&Array::from(vec![1, 2]), 0.0).unwrap();
        t.push(&Array::from(vec![3, 4]), 0.5).unwrap();

        assert_eq!(t.len(), 2);
        assert_eq!(t.times(), &[0.0, 0.5]);
        assert_eq!(t.frame(1), Some(Array::from(vec![3, 4])));
        assert_eq!(t.frame(2), None);
    }

    #[test]
    fn test_trajectory_rejects_wrong_frame() {
        let mut t = Trajectory::new(FrameLayout::new(vec![2], DType::Int32));
        let err = t.push(&Array::from(vec![1, 2, 3]), 0.0).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        let err = t.push(&Array::from(vec![1.0, 2.0]), 0.0).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(t.is_empty());
    }

    #[test]
    fn test_zero_sized_frames_counted_by_times() {
        let layout = FrameLayout::new(vec![0], DType::Float64);
        let empty = Array::new(vec![0], ArrayData::Float64(vec![])).unwrap();
        let t = Trajectory::from_frames(layout, &[empty.clone(), empty]).unwrap();
        assert_eq!(t.len(), 2);
        assert!(t.data().is_empty());
    }

    #[test]
    fn test_check_overwrite_rules() {
        let arr3 = Value::from(vec![1.0, 2.0, 3.0]);
        let arr4 = Value::from(vec![1.0, 2.0, 3.0, 4.0]);
        assert!(arr3.check_overwrite("k", &arr3).is_ok());
        assert!(arr3.check_overwrite("k", &arr4).is_err());

        assert!(Value::from(1.0).check_overwrite("k", &Value::from(2.0)).is_ok());
        assert!(Value::from(1.0).check_overwrite("k", &Value::from(2)).is_err());
        assert!(Value::Mapping(Mapping::new())
            .check_overwrite("k", &Value::Mapping(Mapping::new()))
            .is_ok());

        let traj = Value::Trajectory(Trajectory::new(FrameLayout::scalar(DType::Float64)));
        assert!(traj.check_overwrite("k", &traj).is_err());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from(3).as_i64(), Some(3));
        assert_eq!(Value::from(3).as_f64(), Some(3.0));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::Null.kind(), ValueKind::Null);
    }

    #[test]
    fn test_non_finite_floats_tagged_in_json() {
        let value = Value::from(vec![1.5, f64::NAN, f64::INFINITY, f64::NEG_INFINITY]);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains(r#"[1.5,"NaN","inf","-inf"]"#), "{json}");

        let back: Value = serde_json::from_str(&json).unwrap();
        let data = back.as_array().unwrap().as_f64_slice().unwrap();
        assert_eq!(data[0], 1.5);
        assert!(data[1].is_nan());
        assert_eq!(data[2], f64::INFINITY);
        assert_eq!(data[3], f64::NEG_INFINITY);

        let scalar: Value = serde_json::from_str(&serde_json::to_string(&Value::from(f64::NAN)).unwrap()).unwrap();
        assert!(scalar.as_f64().unwrap().is_nan());
    }

    #[test]
    fn test_non_finite_floats_raw_in_bincode() {
        let mut t = Trajectory::new(FrameLayout::scalar(DType::Float32));
        t.push(&Array::from(f32::NEG_INFINITY), f64::INFINITY).unwrap();
        let bytes = bincode::serialize(&Value::Trajectory(t.clone())).unwrap();
        let back: Value = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, Value::Trajectory(t));
    }

    #[test]
    fn test_unknown_float_tag_rejected() {
        let err = serde_json::from_str::<Scalar>(r#"{"float":"nope"}"#).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_layout_display() {
        assert_eq!(FrameLayout::new(vec![2, 3], DType::Float32).to_string(), "float32[2, 3]");
        assert_eq!(FrameLayout::scalar(DType::Int64).to_string(), "int64[]");
    }
}
