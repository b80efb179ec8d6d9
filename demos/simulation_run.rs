//! Simulation Run: parameters, trajectories and a final summary
//!
//! Runs a damped oscillator as a [`Model`], persisting the position
//! trajectory, then reopens the run read-only and prints what was stored.
//!
//! Run with: cargo run --example simulation_run -- [output.rsc|output.json|output-dir]

use anyhow::Result;
use runstore::model::{run_model, Model};
use runstore::{logging, Array, CollectionOptions, Mapping, ResultCollection, Value};

struct Oscillator;

impl Model for Oscillator {
    fn name(&self) -> &str {
        "oscillator"
    }

    fn description(&self) -> Option<&str> {
        Some("Damped harmonic oscillator, explicit Euler")
    }

    fn default_parameters(&self) -> Mapping {
        let mut p = Mapping::new();
        p.insert("damping".into(), Value::from(0.1));
        p.insert("dt".into(), Value::from(0.05));
        p.insert("steps".into(), Value::from(200));
        p
    }

    fn run(&mut self, params: &Mapping, results: &mut ResultCollection) -> runstore::Result<()> {
        let damping = params["damping"].as_f64().unwrap_or(0.0);
        let dt = params["dt"].as_f64().unwrap_or(0.01);
        let steps = params["steps"].as_i64().unwrap_or(0);

        let (mut x, mut v) = (1.0_f64, 0.0_f64);
        let mut time = 0.0;
        for _ in 0..steps {
            results.append_frame_at("state", &Array::from(vec![x, v]), time)?;
            let a = -x - damping * v;
            x += v * dt;
            v += a * dt;
            time += dt;
        }
        results.set_result("final_energy", 0.5 * (x * x + v * v))?;
        Ok(())
    }
}

fn main() -> Result<()> {
    logging::init();

    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "oscillator.rsc".to_string());
    println!("=== Runstore: Simulation Run ===\n");

    let mut overrides = Mapping::new();
    overrides.insert("steps".into(), Value::from(400));
    let run = run_model(
        &mut Oscillator,
        overrides,
        output.as_str(),
        &CollectionOptions::builder().chunk_size(32).build(),
    )?;
    println!("Run {} finished at {}", run.run_id(), run.location());
    drop(run);

    let run = ResultCollection::open(output.as_str())?;
    println!("\nParameters:");
    for (key, value) in run.parameters() {
        println!("  {key} = {value:?}");
    }
    println!("\nResults:");
    for key in run.result_keys()? {
        println!("  {key}");
    }
    println!("\nFrames in `state`: {}", run.trajectory_len("state")?);
    println!("Final energy: {:?}", run.result("final_energy")?.as_f64());
    Ok(())
}
