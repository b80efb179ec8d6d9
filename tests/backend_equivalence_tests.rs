//! Backend equivalence: every backend stores the same logical values
//!
//! Property tests over generated values:
//! - write then read at the same key yields an equal value
//! - appended frame sequences read back exactly, in order
//! - reopening a persisted location shows the same tree
//!
//! Generated floats include NaN and infinities, so values are compared
//! through their `Debug` rendering (`NaN != NaN` under `PartialEq`).
//!
//! Run with `ProptestConfig::with_cases(24)`: each case touches the disk
//! once per backend.

use proptest::prelude::*;
use runstore::storage::{AccessMode, BackendKind, Storage, StorageOptions, TextFormat};
use runstore::{Array, ArrayData, DType, FrameLayout, Mapping, Scalar, Trajectory, Value};
use std::path::PathBuf;
use tempfile::TempDir;

// ============================================================================
// Strategies
// ============================================================================

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}"
}

fn non_finite_f64() -> impl Strategy<Value = f64> {
    prop_oneof![Just(f64::NAN), Just(f64::INFINITY), Just(f64::NEG_INFINITY)]
}

fn arb_f64(bound: f64) -> impl Strategy<Value = f64> {
    prop_oneof![6 => -bound..bound, 1 => non_finite_f64()]
}

fn arb_f32(bound: f32) -> impl Strategy<Value = f32> {
    prop_oneof![
        6 => -bound..bound,
        1 => prop_oneof![Just(f32::NAN), Just(f32::INFINITY), Just(f32::NEG_INFINITY)],
    ]
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        arb_f64(1.0e9).prop_map(Value::from),
        "[a-zA-Z0-9 _.-]{0,12}".prop_map(Value::from),
    ]
}

fn arb_array() -> impl Strategy<Value = Value> {
    prop_oneof![
        proptest::collection::vec(arb_f64(1.0e6), 0..16).prop_map(Value::from),
        proptest::collection::vec(any::<i32>(), 0..16).prop_map(|v| Value::Array(Array::from(v))),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(|v| Value::Array(Array::from(v))),
        proptest::collection::vec(any::<bool>(), 0..16).prop_map(|v| Value::Array(Array::from(v))),
        (1usize..4, 1usize..4).prop_flat_map(|(rows, cols)| {
            proptest::collection::vec(arb_f32(100.0), rows * cols).prop_map(move |data| {
                Value::Array(Array::new(vec![rows, cols], ArrayData::Float32(data)).unwrap())
            })
        }),
    ]
}

fn arb_trajectory() -> impl Strategy<Value = Value> {
    (0usize..4, 0usize..6).prop_flat_map(|(width, frames)| {
        proptest::collection::vec(arb_f64(1.0e3), width.max(1) * frames).prop_map(move |data| {
            let shape = if width == 0 { Vec::new() } else { vec![width] };
            let layout = FrameLayout::new(shape, DType::Float64);
            #[allow(clippy::cast_precision_loss)]
            let times = (0..frames).map(|i| i as f64 * 0.5).collect();
            Value::Trajectory(Trajectory::from_parts(layout, times, ArrayData::Float64(data)).unwrap())
        })
    })
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        arb_scalar(),
        arb_array(),
        arb_trajectory(),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        proptest::collection::vec((arb_name(), inner), 0..4)
            .prop_map(|entries| Value::Mapping(entries.into_iter().collect::<Mapping>()))
    })
}

fn arb_values() -> impl Strategy<Value = Mapping> {
    proptest::collection::vec((arb_name(), arb_value()), 1..6)
        .prop_map(|entries| entries.into_iter().collect())
}

fn arb_frames() -> impl Strategy<Value = Vec<Array>> {
    (1usize..4).prop_flat_map(|width| {
        proptest::collection::vec(
            proptest::collection::vec(any::<i64>(), width).prop_map(Array::from),
            0..20,
        )
    })
}

// ============================================================================
// Helpers
// ============================================================================

fn backends(dir: &TempDir) -> Vec<(BackendKind, PathBuf)> {
    vec![
        (BackendKind::Text(TextFormat::Json), dir.path().join("v.json")),
        (BackendKind::Text(TextFormat::Yaml), dir.path().join("v.yaml")),
        (BackendKind::Container, dir.path().join("v.rsc")),
        (BackendKind::Chunked, dir.path().join("v.chunks")),
    ]
}

fn open(kind: BackendKind, path: &PathBuf, mode: AccessMode) -> Storage {
    Storage::open_with(path, mode, kind, StorageOptions::default()).unwrap()
}

/// Structural rendering in which NaN equals NaN and key order counts.
fn repr<T: std::fmt::Debug>(value: &T) -> String {
    format!("{value:?}")
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: write then read yields a structurally equal value
    #[test]
    fn prop_write_read_round_trip(values in arb_values()) {
        let mut memory = Storage::in_memory();
        memory.root_mut().write_values(&values).unwrap();
        for (key, value) in &values {
            prop_assert_eq!(repr(&memory.root().get_value(key).unwrap()), repr(value));
        }

        let dir = TempDir::new().unwrap();
        for (kind, path) in backends(&dir) {
            let mut storage = open(kind, &path, AccessMode::Truncate);
            storage.root_mut().write_values(&values).unwrap();
            for (key, value) in &values {
                prop_assert_eq!(repr(&storage.root().get_value(key).unwrap()), repr(value), "{:?}", kind);
            }
        }
    }

    /// Property: a reopened location shows the same keys and values
    #[test]
    fn prop_reopen_preserves_tree(values in arb_values()) {
        let dir = TempDir::new().unwrap();
        for (kind, path) in backends(&dir) {
            {
                let mut storage = open(kind, &path, AccessMode::Truncate);
                storage.root_mut().create_group("nested").unwrap().write_values(&values).unwrap();
            }
            let storage = open(kind, &path, AccessMode::Read);
            let nested = storage.root().get_group("nested").unwrap();
            let keys: Vec<String> = values.keys().cloned().collect();
            prop_assert_eq!(nested.keys().unwrap(), keys, "{:?}", kind);
            prop_assert_eq!(repr(&nested.to_mapping().unwrap()), repr(&values), "{:?}", kind);
        }
    }

    /// Property: appended frames read back exactly, across chunk boundaries
    #[test]
    fn prop_frames_read_back_in_order(frames in arb_frames(), chunk_size in 1usize..8) {
        let dir = TempDir::new().unwrap();
        for (kind, path) in backends(&dir) {
            {
                let mut storage = open(kind, &path, AccessMode::Truncate);
                let mut root = storage.root_mut();
                let mut writer = root.trajectory_writer("x", chunk_size).unwrap();
                for frame in &frames {
                    writer.append(frame).unwrap();
                }
                writer.close().unwrap();
            }
            let storage = open(kind, &path, AccessMode::Read);
            if frames.is_empty() {
                prop_assert!(!storage.root().has("x"), "{:?}", kind);
                continue;
            }
            let value = storage.root().get_value("x").unwrap();
            let trajectory = value.as_trajectory().unwrap();
            prop_assert_eq!(&trajectory.frames(), &frames, "{:?}", kind);
            prop_assert_eq!(storage.root().frame_count("x").unwrap(), frames.len());
        }
    }
}

#[test]
fn test_scalar_kinds_survive_text_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut values = Mapping::new();
    values.insert("int".into(), Value::from(3));
    values.insert("float".into(), Value::from(3.0));
    values.insert("text".into(), Value::from("3"));
    values.insert("flag".into(), Value::from(true));
    for (kind, path) in backends(&dir) {
        {
            let mut storage = open(kind, &path, AccessMode::Truncate);
            storage.root_mut().write_values(&values).unwrap();
        }
        let storage = open(kind, &path, AccessMode::Read);
        for (key, value) in &values {
            let read = storage.root().get_value(key).unwrap();
            assert_eq!(&read, value, "{kind:?} {key}");
            assert_eq!(
                read.as_scalar().map(Scalar::kind_name),
                value.as_scalar().map(Scalar::kind_name)
            );
        }
    }
}
