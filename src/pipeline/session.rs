//! Session startup
//!
//! Wires settings, mesh, source, backend and sink into a ready `Sequencer`.
//! The mesh loads first so a bad calibration aborts before any video is
//! touched. Every failure here is fatal and maps to a process exit code.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use super::presenter::Presenter;
use super::sequencer::{PipelineContext, Sequencer};
use super::upload::select_upload_strategy;
use crate::gpu::{BackendError, Capabilities, GpuContext, SoftwareBackend, WarpBackend, WgpuBackend};
use crate::settings::{SettingsError, WarpSettings};
use crate::telemetry::ThroughputMeter;
use crate::video::{
    open_sink, open_source, FrameSink, FrameSource, FrameSourceAdapter, SinkConfig, SinkError, SourceError,
};
use crate::warp::{load_mesh, select_render_target, MeshLoadError, WarpRasterizer};

/// Fatal errors before the loop starts
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not load warp mesh: {0}")]
    Mesh(#[from] MeshLoadError),
    #[error("could not open input: {0}")]
    Source(#[from] SourceError),
    #[error("could not open output: {0}")]
    Sink(#[from] SinkError),
    #[error("GPU setup failed: {0}")]
    Backend(#[from] BackendError),
    #[error("bad settings: {0}")]
    Settings(#[from] SettingsError),
}

impl StartupError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Mesh(_) => 2,
            StartupError::Source(_) => 3,
            StartupError::Sink(_) => 4,
            StartupError::Backend(_) | StartupError::Settings(_) => 1,
        }
    }
}

/// Create the device backend
///
/// The software backend reports every acceleration; the settings overrides
/// are applied when the session is assembled.
pub fn create_backend(settings: &WarpSettings, software: bool) -> Result<Box<dyn WarpBackend>, StartupError> {
    if software {
        tracing::info!("Using the software rasterizer");
        return Ok(Box::new(SoftwareBackend::new(Capabilities::full())));
    }

    let context = GpuContext::new_headless()?;
    let allowed = Capabilities {
        staged_upload: settings.allow_staged_upload,
        offscreen_target: settings.allow_offscreen_target,
    };
    Ok(Box::new(WgpuBackend::new(
        context,
        allowed,
        (settings.output_width, settings.output_height),
    )))
}

/// Start a session reading `input` and writing `output`
pub fn start_session(
    settings: &WarpSettings,
    input: &Path,
    output: &Path,
    backend: Box<dyn WarpBackend>,
    presenter: Option<Box<dyn Presenter>>,
) -> Result<Sequencer, StartupError> {
    start_with(
        settings,
        || open_source(input, settings.sequence_fps),
        |config| open_sink(output, config),
        backend,
        presenter,
    )
}

/// Start a session with caller-supplied source and sink constructors
///
/// `open_source` runs only after the mesh has loaded; `open_sink` receives
/// the output size and frame rate the pipeline settled on.
pub fn start_with<S, K>(
    settings: &WarpSettings,
    open_source: S,
    open_sink: K,
    mut backend: Box<dyn WarpBackend>,
    presenter: Option<Box<dyn Presenter>>,
) -> Result<Sequencer, StartupError>
where
    S: FnOnce() -> Result<Box<dyn FrameSource>, SourceError>,
    K: FnOnce(&SinkConfig) -> Result<Box<dyn FrameSink>, SinkError>,
{
    settings.validate()?;

    let mesh = load_mesh(&settings.mesh_path, settings.uv_policy)?;

    let source = FrameSourceAdapter::new(open_source()?);
    let info = source.info().clone();

    let probed = backend.capabilities();
    let caps = Capabilities {
        staged_upload: probed.staged_upload && settings.allow_staged_upload,
        offscreen_target: probed.offscreen_target && settings.allow_offscreen_target,
    };

    let window_size = presenter
        .as_ref()
        .map(|p| p.size())
        .unwrap_or((settings.window_width, settings.window_height));
    let target = select_render_target(&caps, (settings.output_width, settings.output_height), window_size);
    let (out_width, out_height) = target.size();

    let sink = open_sink(&SinkConfig {
        width: out_width,
        height: out_height,
        frame_rate: info.frame_rate,
        codec: settings.codec,
        input_codec: info.codec,
    })?;

    let texture_size = settings.texture_size((info.width, info.height));
    let mut upload = select_upload_strategy(&caps, texture_size);
    upload.allocate(backend.as_mut())?;

    let rasterizer = WarpRasterizer::new(&mesh, settings.uv_policy, target);
    rasterizer.prepare(backend.as_mut())?;

    tracing::info!(
        "Warping {}x{} @ {:.2}fps -> {}x{} on {} ({} upload, texture {}x{})",
        info.width,
        info.height,
        info.frame_rate,
        out_width,
        out_height,
        backend.name(),
        upload.name(),
        texture_size.0,
        texture_size.1
    );

    let meter = ThroughputMeter::new(Duration::from_secs(settings.report_interval_secs), info.frame_count);
    Ok(Sequencer::new(PipelineContext {
        mesh: Some(mesh),
        source,
        sink,
        backend,
        upload,
        rasterizer,
        presenter,
        meter,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warp::Mesh;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_exit_codes() {
        let mesh = StartupError::Mesh(MeshLoadError::MissingHeader);
        assert_eq!(mesh.exit_code(), 2);
        let source = StartupError::Source(SourceError::Decode("x".into()));
        assert_eq!(source.exit_code(), 3);
        let sink = StartupError::Sink(SinkError::Finished);
        assert_eq!(sink.exit_code(), 4);
        let backend = StartupError::Backend(BackendError::NoAdapter);
        assert_eq!(backend.exit_code(), 1);
    }

    #[test]
    fn test_missing_mesh_fails_before_source_opens() {
        let settings = WarpSettings {
            mesh_path: "/nonexistent/dome.map".into(),
            ..Default::default()
        };
        let mut source_opened = false;
        let result = start_with(
            &settings,
            || {
                source_opened = true;
                Err(SourceError::Decode("unreachable".into()))
            },
            |_| Err(SinkError::Finished),
            Box::new(SoftwareBackend::new(Capabilities::full())),
            None,
        );

        assert!(matches!(result, Err(StartupError::Mesh(MeshLoadError::Open { .. }))));
        assert!(!source_opened);
    }

    #[test]
    fn test_mesh_load_is_logged_once() {
        let dir = tempfile::tempdir().unwrap();
        let mesh_path = dir.path().join("dome.map");
        std::fs::write(&mesh_path, Mesh::identity(2, 2).to_map_string()).unwrap();
        let settings = WarpSettings {
            mesh_path,
            ..Default::default()
        };

        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, || {
            start_with(
                &settings,
                || Err(SourceError::Decode("stop after the mesh".into())),
                |_| Err(SinkError::Finished),
                Box::new(SoftwareBackend::new(Capabilities::full())),
                None,
            )
        });

        assert!(matches!(result, Err(StartupError::Source(_))));
        let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("Loaded mesh").count(), 1);
    }
}
