//! Immersive Warp - command line launcher
//!
//! Pre-distorts a video (or image sequence) through a calibration mesh so it
//! projects correctly onto a dome or curved screen.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use winit::event_loop::{ControlFlow, EventLoop};

use immersive_warp::app::{WarpApp, WarpJob};
use immersive_warp::pipeline::{create_backend, start_session};
use immersive_warp::settings::{output_path_for, WarpSettings, LEGACY_INI_NAME};
use immersive_warp::telemetry::{init_logging, LogConfig};

/// Warp a video through a projection mesh
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video file or image sequence directory
    input: PathBuf,

    /// Output file or directory (default: input name with an `F` suffix)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// XML settings file (default: the user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Legacy INI file to overlay on the settings
    #[arg(long)]
    ini: Option<PathBuf>,

    /// Warp mesh, overriding the settings
    #[arg(long)]
    mesh: Option<PathBuf>,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Use the CPU rasterizer instead of the GPU
    #[arg(long)]
    software: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&LogConfig::from_flags(args.verbose, args.log_file.clone())) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("Immersive Warp v{}", env!("CARGO_PKG_VERSION"));

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<u8> {
    let settings = resolve_settings(&args)?;
    let output = args.output.clone().unwrap_or_else(|| output_path_for(&args.input));
    tracing::info!("{} -> {}", args.input.display(), output.display());

    if args.headless {
        run_headless(&settings, &args.input, &output, args.software)
    } else {
        run_windowed(WarpJob {
            settings,
            input: args.input,
            output,
            software: args.software,
        })
    }
}

/// Settings precedence: XML file, then legacy INI, then `--mesh`
///
/// The INI in the working directory is only consulted when no XML settings
/// were found, so an installed settings file is never silently overridden.
fn resolve_settings(args: &Args) -> Result<WarpSettings> {
    let (mut settings, from_xml) = match &args.settings {
        Some(path) => (
            WarpSettings::load_from_file(path).with_context(|| format!("loading {}", path.display()))?,
            true,
        ),
        None => {
            let found = WarpSettings::default_path().is_some_and(|p| p.exists());
            (WarpSettings::load_or_default()?, found)
        }
    };

    match &args.ini {
        Some(path) => settings
            .apply_legacy_ini(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None if !from_xml => settings.apply_legacy_ini(Path::new(LEGACY_INI_NAME))?,
        None => {}
    }

    if let Some(mesh) = &args.mesh {
        settings.mesh_path = mesh.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn run_headless(settings: &WarpSettings, input: &Path, output: &Path, software: bool) -> Result<u8> {
    let session = create_backend(settings, software).and_then(|backend| start_session(settings, input, output, backend, None));
    let mut sequencer = match session {
        Ok(sequencer) => sequencer,
        Err(e) => {
            tracing::error!("{}", e);
            return Ok(e.exit_code() as u8);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Ctrl+C received, stopping");
        s.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl+C handler")?;

    let counters = sequencer.run_until(&stop);
    tracing::info!("Wrote {} of {} frames", counters.written, counters.read);
    Ok(0)
}

fn run_windowed(job: WarpJob) -> Result<u8> {
    let event_loop = EventLoop::new().context("creating event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = WarpApp::new(job);
    event_loop.run_app(&mut app).context("event loop error")?;
    Ok(app.exit_code() as u8)
}
