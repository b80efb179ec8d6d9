//! Run catalog over a folder of persisted runs

use runstore::catalog::{CatalogOptions, RunCatalog};
use runstore::collection::{CollectionOptions, ResultCollection, RunState};
use runstore::model::{model_fn, resume_model, run_model};
use runstore::{Array, ArrayData, Error, Mapping, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_run(path: &Path, alpha: f64, seed: i64, finish: bool) {
    let mut parameters = Mapping::new();
    parameters.insert("alpha".into(), Value::from(alpha));
    parameters.insert("seed".into(), Value::from(seed));
    parameters.insert("steps".into(), Value::from(3));

    let mut run = ResultCollection::create(path, &CollectionOptions::default()).unwrap();
    run.start(parameters).unwrap();
    run.set_result("score", alpha * 2.0).unwrap();
    if finish {
        run.finish().unwrap();
    }
}

fn sweep(dir: &Path) {
    write_run(&dir.join("a.json"), 0.1, 1, true);
    write_run(&dir.join("b.rsc"), 0.5, 1, true);
    write_run(&dir.join("c.yaml"), 0.5, 2, false);
    write_run(&dir.join("d"), 0.9, 1, true);
    write_run(&dir.join("e.rsc"), 0.5, 1, true);
}

#[test]
fn test_catalog_from_folder() {
    let dir = TempDir::new().unwrap();
    sweep(dir.path());
    fs::write(dir.path().join("notes.txt"), b"not a run").unwrap();

    let catalog = RunCatalog::from_folder(dir.path(), CatalogOptions::default()).unwrap();
    assert_eq!(catalog.len(), 5);
    assert!(catalog.same_parameter_keys());

    let constant = catalog.constant_parameters();
    assert_eq!(constant.len(), 1);
    assert_eq!(constant["steps"], Value::from(3));

    let varying = catalog.varying_parameters();
    assert_eq!(
        varying["alpha"],
        vec![Value::from(0.1), Value::from(0.5), Value::from(0.9)]
    );
    assert_eq!(varying["seed"], vec![Value::from(1), Value::from(2)]);
}

#[test]
fn test_catalog_queries() {
    let dir = TempDir::new().unwrap();
    sweep(dir.path());
    let catalog = RunCatalog::from_folder(dir.path(), CatalogOptions::default()).unwrap();

    let half = catalog.filtered(&[("alpha", Value::from(0.5))]);
    assert_eq!(half.len(), 3);
    assert_eq!(half.finished_only().len(), 2);
    assert_eq!(half.remove_duplicates().len(), 2);

    let entry = catalog
        .get(&[("alpha", Value::from(0.5)), ("seed", Value::from(2))])
        .unwrap();
    assert_eq!(entry.metadata().state(), RunState::Running);
    let run = entry.open().unwrap();
    assert_eq!(run.result("score").unwrap(), Value::from(1.0));

    let sorted = catalog.sorted_by(&["alpha", "seed"], true);
    let alphas: Vec<_> = sorted
        .iter()
        .map(|e| e.parameter("alpha").cloned().unwrap())
        .collect();
    assert_eq!(alphas[0], Value::from(0.9));
    assert_eq!(alphas[4], Value::from(0.1));

    assert!(matches!(
        catalog.get(&[("alpha", Value::from(0.7))]),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_unreadable_entries_skipped_unless_strict() {
    let dir = TempDir::new().unwrap();
    write_run(&dir.path().join("good.json"), 0.1, 1, true);
    fs::write(dir.path().join("broken.json"), b"{ truncated").unwrap();

    let lenient = RunCatalog::from_folder(dir.path(), CatalogOptions::default()).unwrap();
    assert_eq!(lenient.len(), 1);

    let strict = RunCatalog::from_folder(dir.path(), CatalogOptions { strict: true });
    assert!(matches!(strict, Err(Error::CorruptedState { .. })));
}

#[test]
fn test_files_without_run_suffix_are_ignored() {
    let dir = TempDir::new().unwrap();
    write_run(&dir.path().join("good.rsc"), 0.1, 1, true);
    fs::write(dir.path().join("README"), b"sweep notes").unwrap();
    fs::write(dir.path().join("LICENSE"), b"MIT").unwrap();
    fs::write(dir.path().join("stray.chunks"), b"not a directory").unwrap();

    let strict = RunCatalog::from_folder(dir.path(), CatalogOptions { strict: true }).unwrap();
    assert_eq!(strict.len(), 1);
}

#[test]
fn test_missing_folder() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        RunCatalog::from_folder(dir.path().join("nope"), CatalogOptions::default()),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_model_run_and_resume() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.rsc");
    let mut defaults = Mapping::new();
    defaults.insert("steps".into(), Value::from(6));

    // Fails halfway through the first attempt
    let mut attempts = 0;
    let mut model = model_fn("counter", defaults, |params, results| {
        attempts += 1;
        let steps = params["steps"].as_i64().unwrap_or(0);
        let start = i64::try_from(results.trajectory_len("count").unwrap_or(0)).unwrap_or(0);
        for step in start..steps {
            if attempts == 1 && step == 3 {
                results.flush()?;
                return Err(Error::InvalidState("interrupted".into()));
            }
            results.append_frame("count", &Array::from(step))?;
        }
        Ok(())
    });

    let options = CollectionOptions::default();
    assert!(run_model(&mut model, Mapping::new(), &path, &options).is_err());
    let run = resume_model(&mut model, &path, &options).unwrap();
    assert_eq!(run.state(), RunState::Finished);

    let run = ResultCollection::open(&path).unwrap();
    let value = run.result("count").unwrap();
    let counts = value.as_trajectory().unwrap();
    assert_eq!(counts.data(), &ArrayData::Int64(vec![0, 1, 2, 3, 4, 5]));
    assert_eq!(counts.times(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(run.metadata().info()["model"], Value::from("counter"));

    let mut unknown = Mapping::new();
    unknown.insert("speed".into(), Value::from(1.0));
    assert!(matches!(
        run_model(&mut model, unknown, dir.path().join("other.rsc"), &options),
        Err(Error::InvalidParameter(_))
    ));
}
