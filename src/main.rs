// main.rs — `ripiv` command-line driver.
//
//   ripiv <run-file> [--engine cpu|gpu] [--profile native|embedded] [--frames N]
//
// Loads the run configuration, resolves the pass plan against the first
// frame pair, builds an engine and processes every frame pair in turn.
// Configuration and device-init errors abort the run; anything that goes
// wrong with a single frame pair is logged and the loop moves on. The exit
// status is non-zero if any frame failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use log::{error, info, warn, LevelFilter};

use ripiv::config::{EngineKind, RunConfig};
use ripiv::error::{PivError, Result};
use ripiv::filters;
use ripiv::frame::Frame;
use ripiv::gpu::device::{DeviceProfile, GpuDevice};
use ripiv::gpu::piv::GpuPiv;
use ripiv::grid::PassPlan;
use ripiv::io::load_frame;
use ripiv::output::{ResultSink, TextSink};
use ripiv::piv::{CpuPiv, PivEngine};
use ripiv::validate::ValidatorConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineArg {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Native,
    Embedded,
}

#[derive(Parser)]
#[command(name = "ripiv")]
#[command(about = "Multi-pass PIV phase correlation on CPU or GPU", long_about = None)]
#[command(version)]
struct Cli {
    /// Run file (keyword format, or JSON if the extension is .json)
    run_file: PathBuf,

    /// Engine override; `gpu` here disables the CPU fallback
    #[arg(long, value_enum)]
    engine: Option<EngineArg>,

    /// GPU limits profile
    #[arg(long, value_enum, default_value = "native")]
    profile: ProfileArg,

    /// Process at most N frame pairs
    #[arg(long)]
    frames: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = RunConfig::load(&cli.run_file);
    let level = config
        .as_ref()
        .map(RunConfig::log_level)
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("[ripiv] {}: {e}", cli.run_file.display());
            return ExitCode::FAILURE;
        }
    };

    match run(&cli, &config) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            error!("[ripiv] {failed} frame(s) failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("[ripiv] run aborted: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Process every frame pair; returns the number of frames that failed.
fn run(cli: &Cli, config: &RunConfig) -> Result<usize> {
    let n_frames = cli.frames.map_or(config.n_frames, |n| n.min(config.n_frames));
    if n_frames == 0 {
        warn!("[ripiv] nothing to do: 0 frames");
        return Ok(0);
    }

    // The plan depends on the frame size, so the first pair is loaded up front.
    let first = load_pair(config, 0)?;
    let plan = PassPlan::new(first.0.width(), first.0.height(), &config.passes)?;
    let mut engine = build_engine(cli, config, plan)?;
    let mut sink = TextSink::new(config.output_template.clone());

    let mut failed = 0;
    let mut first = Some(first);
    for i in 0..n_frames {
        let started = Instant::now();
        let pair = match first.take() {
            Some(pair) => Ok(pair),
            None => load_pair(config, i),
        };
        let outcome = pair.and_then(|(mut a, mut b)| {
            engine.plan().check_frame(a.width(), a.height())?;
            engine.plan().check_frame(b.width(), b.height())?;
            filters::apply_all(&config.filters, &mut a);
            filters::apply_all(&config.filters, &mut b);
            let result = engine.process(&a, &b)?;
            sink.write_frame(i, &result)
        });
        match outcome {
            Ok(()) => info!(
                "[ripiv] frame {}/{} done in {:.1} ms ({})",
                i + 1,
                n_frames,
                started.elapsed().as_secs_f64() * 1e3,
                engine.name()
            ),
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                error!("[ripiv] frame {i}: {e}");
                failed += 1;
            }
        }
    }
    Ok(failed)
}

fn load_pair(config: &RunConfig, i: usize) -> Result<(Frame, Frame)> {
    let a = load_frame(&config.image_1.path(i)?)?;
    let b = load_frame(&config.image_2.path(i)?)?;
    if (a.width(), a.height()) != (b.width(), b.height()) {
        return Err(PivError::Frame(format!(
            "frame pair {i} differs in size: {}×{} vs {}×{}",
            a.width(),
            a.height(),
            b.width(),
            b.height()
        )));
    }
    Ok((a, b))
}

fn build_engine(cli: &Cli, config: &RunConfig, plan: PassPlan) -> Result<Box<dyn PivEngine>> {
    let validator = ValidatorConfig::default();
    let kind = match cli.engine {
        Some(EngineArg::Cpu) => EngineKind::Cpu,
        Some(EngineArg::Gpu) => EngineKind::Gpu,
        None => config.engine,
    };
    let forced = matches!(cli.engine, Some(EngineArg::Gpu));
    let profile = match cli.profile {
        ProfileArg::Native => DeviceProfile::Native,
        ProfileArg::Embedded => DeviceProfile::Embedded,
    };

    match kind {
        EngineKind::Cpu => Ok(Box::new(CpuPiv::new(plan, validator))),
        EngineKind::Gpu => match GpuDevice::new_with_profile(profile) {
            Ok(gpu) => Ok(Box::new(GpuPiv::new(gpu, plan, validator)?)),
            Err(e) if !forced => {
                warn!("[ripiv] no usable GPU ({e}), falling back to the CPU engine");
                Ok(Box::new(CpuPiv::new(plan, validator)))
            }
            Err(e) => Err(e.into()),
        },
    }
}
