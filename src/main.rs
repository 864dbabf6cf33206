use std::path::PathBuf;

use anyhow::{Context, bail};
use mesh_stage::{EngineConfig, flow};

const USAGE: &str = "usage: mesh-stage [--headless <ticks>] <config.json> [model.obj ...]";

struct Args {
    headless: Option<u32>,
    config: PathBuf,
    files: Vec<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut headless = None;
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--headless" => {
                let ticks = args.next().context(USAGE)?;
                headless = Some(ticks.parse::<u32>().with_context(|| format!("bad tick count {ticks:?}"))?);
            }
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    let mut positional = positional.into_iter();
    let Some(config) = positional.next() else {
        bail!(USAGE);
    };
    Ok(Args {
        headless,
        config,
        files: positional.collect(),
    })
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let config = EngineConfig::load(&args.config)?;

    match args.headless {
        Some(ticks) => {
            if let Err(e) = env_logger::try_init() {
                eprintln!("Warning: Could not initialize logger: {e}");
            }
            let (backend, scene, _) = flow::run_headless(config, args.files, ticks)?;
            println!(
                "{} frames, {} instances, {} live buffers",
                backend.frames().len(),
                scene.len(),
                backend.live_buffer_count()
            );
            Ok(())
        }
        None => flow::run(config, args.files),
    }
}
