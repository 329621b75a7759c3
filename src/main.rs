use clap::Parser;
use diffbragg::utils::{logger, report};
use diffbragg::{SimulationEngine, SimulatorConfig};
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::process::ExitCode;

/// Forward diffraction simulation with analytic parameter derivatives
#[derive(Parser, Debug)]
#[command(name = "diffbragg")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON simulator config (defaults to the platform config directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Refine handles to activate (0-2 rotations, then unit-cell parameters)
    #[arg(short, long, num_args = 1..)]
    refine: Vec<usize>,

    /// Overrides the shape-transform fudge factor
    #[arg(long)]
    fudge: Option<f64>,

    /// Also compute second-derivative images
    #[arg(long)]
    curvatures: bool,

    /// Log per-pass debug output
    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: &Cli) -> diffbragg::Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            let cfg = SimulatorConfig::from_file(path)?;
            info!("Config loaded from {:?}", path);
            cfg
        }
        None => {
            let (cfg, msg) = SimulatorConfig::load();
            info!("{}", msg);
            cfg
        }
    };
    if let Some(fudge) = cli.fudge {
        config.fudge = fudge;
    }
    config.compute_curvatures |= cli.curvatures;

    let mut engine = SimulationEngine::new(&config)?;
    engine.initialize_managers()?;

    for (handle, name) in engine.handles() {
        info!("Handle {} -> {}", handle, name);
    }
    for &handle in &cli.refine {
        engine.set_active(handle, true)?;
    }
    if cli.refine.is_empty() {
        warn!("No refine handles given, only the forward image is computed");
    }

    engine.reset_pass_buffers()?;
    engine.run_pass()?;

    for line in report::pass_summary(&engine).lines() {
        info!("{}", line);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    if let Err(e) = logger::init(level) {
        eprintln!("Logger init failed: {}", e);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
