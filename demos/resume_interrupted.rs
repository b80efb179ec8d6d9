//! Resume Interrupted: continue a run after an abrupt stop
//!
//! Writes half of a trajectory, simulates a crash (no finish, no drop),
//! resumes from disk and completes the run without gaps or duplicates.
//!
//! Run with: cargo run --example resume_interrupted

use anyhow::{ensure, Result};
use runstore::{logging, Array, CollectionOptions, Mapping, ResultCollection, RunState, Value};

const STEPS: u32 = 10;

fn main() -> Result<()> {
    logging::init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("interrupted.chunks");
    let options = CollectionOptions::builder().chunk_size(2).build();

    println!("=== Runstore: Resume After Interruption ===\n");

    let mut parameters = Mapping::new();
    parameters.insert("alpha".into(), Value::from(0.5));
    parameters.insert("steps".into(), Value::from(i64::from(STEPS)));

    let mut run = ResultCollection::create(&path, &options)?;
    run.start(parameters)?;
    for step in 0..STEPS / 2 {
        run.append_frame("energy", &Array::from(f64::from(step)))?;
    }
    println!("Wrote {} frames, simulating a crash", run.trajectory_len("energy")?);
    std::mem::forget(run);

    let mut run = ResultCollection::resume(&path, &options)?;
    let persisted = u32::try_from(run.trajectory_len("energy")?)?;
    println!("Resumed run {} with {persisted} persisted frames", run.run_id());
    for step in persisted..STEPS {
        run.append_frame("energy", &Array::from(f64::from(step)))?;
    }
    run.finish()?;
    drop(run);

    let run = ResultCollection::open(&path)?;
    ensure!(run.state() == RunState::Finished, "run did not finish");
    let energy = run.result("energy")?;
    let frames = energy.as_trajectory().map(|t| t.frames()).unwrap_or_default();
    let values: Vec<f64> = frames.iter().filter_map(Array::as_f64).collect();
    println!("Stored energies: {values:?}");
    ensure!(values.len() == STEPS as usize, "unexpected frame count");
    Ok(())
}
