//! Dam break in a box tank with a ball obstacle.
//!
//! Usage: `cargo run --release --example dam_break [scene.json] [steps] [out_dir]`
//!
//! Without a scene file the built-in dam break is used. With `out_dir`,
//! particle snapshots are written every step. Set `RUST_LOG=info` for
//! progress output.

use std::path::Path;

use pbf3d::{FluidPipeline, Scene, SnapshotWriter};

fn main() -> pbf3d::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let scene = match args.get(1) {
        Some(path) if path.ends_with(".json") => Scene::load_json(Path::new(path))?,
        _ => Scene::dam_break(),
    };
    let steps: u64 = args
        .iter()
        .skip(1)
        .find_map(|a| a.parse().ok())
        .unwrap_or(400);

    println!("=== {} ===", scene.name);
    let mut pipeline = FluidPipeline::from_scene(&scene)?;
    if let Some(dir) = args.iter().skip(2).find(|a| a.parse::<u64>().is_err()) {
        pipeline = pipeline.with_snapshots(SnapshotWriter::new(dir, "fluid_")?);
    }
    println!(
        "{} particles, {} solids, {} boundary particles",
        pipeline.solver().num_particles(),
        pipeline.solver().solids().len(),
        pipeline.solver().boundary().len()
    );

    for _ in 0..steps {
        let stats = pipeline.step()?;
        let state = pipeline.state();
        if state.step % 50 == 0 {
            let mesh = state.last_mesh.unwrap_or_default();
            println!(
                "step {:4}  t={:.3}s  passes={:2}  err={:.4}  mesh {} verts / {} faces  ({:.1} + {:.1} + {:.1} ms)",
                state.step,
                state.time,
                stats.iterations,
                stats.density_error,
                mesh.vertices,
                mesh.faces,
                state.timings.solver_ms,
                state.timings.sampling_ms,
                state.timings.meshing_ms
            );
        }
    }

    let mesh = pipeline.mesh();
    if let Some((lo, hi)) = mesh.bounds() {
        println!("final surface: area {:.4} m^2, bounds {:?} .. {:?}", mesh.surface_area(), lo, hi);
    }
    Ok(())
}
