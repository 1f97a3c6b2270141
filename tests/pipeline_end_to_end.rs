//! Full pipeline runs on the software backend

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use immersive_warp::gpu::{AuditEvent, AuditLog, Capabilities, Resource, SoftwareBackend};
use immersive_warp::pipeline::{start_session, start_with, Sequencer, StartupError};
use immersive_warp::settings::WarpSettings;
use immersive_warp::video::{Frame, FrameSink, FrameSource, PixelLayout, SinkError, SourceError, StreamInfo};
use immersive_warp::warp::{Mesh, MeshLoadError};

/// In-memory source of generated frames
struct PatternSource {
    info: StreamInfo,
    frames: Vec<Frame>,
}

impl PatternSource {
    fn new(frames: Vec<Frame>) -> Self {
        let (width, height) = (frames[0].width, frames[0].height);
        let count = frames.len() as u64;
        Self {
            info: StreamInfo {
                width,
                height,
                frame_rate: 30.0,
                frame_count: Some(count),
                codec: None,
            },
            frames: frames.into_iter().rev().collect(),
        }
    }
}

impl FrameSource for PatternSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frames.pop())
    }
}

#[derive(Default)]
struct Captured {
    frames: Vec<Frame>,
    size: (u32, u32),
    finished: bool,
}

struct CaptureSink {
    captured: Rc<RefCell<Captured>>,
}

impl FrameSink for CaptureSink {
    fn expected_layout(&self) -> PixelLayout {
        PixelLayout::Bgr8
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.captured.borrow_mut().frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.captured.borrow_mut().finished = true;
        Ok(())
    }
}

/// 8x8 BGR frame whose pixels encode their own position
fn gradient(seed: u8) -> Frame {
    let mut data = Vec::new();
    for y in 0..8u8 {
        for x in 0..8u8 {
            data.extend_from_slice(&[x * 30, y * 30, seed]);
        }
    }
    Frame::new(data, 8, 8, PixelLayout::Bgr8, 0)
}

fn write_mesh(dir: &Path, mesh: &Mesh) -> PathBuf {
    let path = dir.join("dome.map");
    std::fs::write(&path, mesh.to_map_string()).unwrap();
    path
}

fn settings_for(mesh_path: PathBuf) -> WarpSettings {
    WarpSettings {
        mesh_path,
        output_width: 8,
        output_height: 8,
        window_width: 8,
        window_height: 8,
        ..Default::default()
    }
}

fn run(
    settings: &WarpSettings,
    frames: Vec<Frame>,
    backend: SoftwareBackend,
) -> (Sequencer, AuditLog, Rc<RefCell<Captured>>) {
    let audit = backend.audit();
    let captured = Rc::new(RefCell::new(Captured::default()));
    let sink_log = captured.clone();
    let sequencer = start_with(
        settings,
        || Ok(Box::new(PatternSource::new(frames)) as Box<dyn FrameSource>),
        |config| {
            sink_log.borrow_mut().size = (config.width, config.height);
            Ok(Box::new(CaptureSink { captured: sink_log }) as Box<dyn FrameSink>)
        },
        Box::new(backend),
        None,
    )
    .unwrap();
    (sequencer, audit, captured)
}

#[test]
fn identity_warp_reproduces_input() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(write_mesh(dir.path(), &Mesh::identity(2, 2)));
    let inputs: Vec<Frame> = (0..3).map(|i| gradient(i * 40)).collect();

    for caps in [Capabilities::full(), Capabilities::minimal()] {
        let (mut sequencer, _audit, captured) = run(&settings, inputs.clone(), SoftwareBackend::new(caps));
        let counters = sequencer.run_to_completion();
        assert_eq!(counters.written, 3);

        let captured = captured.borrow();
        for (i, (output, input)) in captured.frames.iter().zip(&inputs).enumerate() {
            assert_eq!(output.frame_index, i as u64);
            assert_eq!((output.width, output.height), (8, 8));
            // Corners first, then the whole image
            assert_eq!(output.pixel(0, 0), input.pixel(0, 0));
            assert_eq!(output.pixel(7, 0), input.pixel(7, 0));
            assert_eq!(output.pixel(0, 7), input.pixel(0, 7));
            assert_eq!(output.pixel(7, 7), input.pixel(7, 7));
            assert_eq!(output.data, input.data);
        }
    }
}

#[test]
fn blanked_cell_keeps_clear_colour() {
    let dir = tempfile::tempdir().unwrap();
    let mut points = Mesh::identity(3, 3).points().to_vec();
    // Bottom-left node only touches the bottom-left cell
    points[0].intensity = -1.0;
    let mesh = Mesh::from_points(2, 3, 3, points).unwrap();
    let settings = settings_for(write_mesh(dir.path(), &mesh));

    let input = Frame::solid(8, 8, PixelLayout::Bgr8, &[50, 100, 150]);
    let (mut sequencer, _audit, captured) =
        run(&settings, vec![input], SoftwareBackend::new(Capabilities::full()));
    sequencer.run_to_completion();

    let captured = captured.borrow();
    let output = &captured.frames[0];
    for y in 0..8 {
        for x in 0..8 {
            let expected: &[u8] = if x < 4 && y >= 4 { &[0, 0, 0] } else { &[50, 100, 150] };
            assert_eq!(output.pixel(x, y), expected, "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn double_buffering_alternates_slots() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(write_mesh(dir.path(), &Mesh::identity(2, 2)));
    let inputs: Vec<Frame> = (0..6).map(gradient).collect();

    let (mut sequencer, audit, _captured) = run(&settings, inputs, SoftwareBackend::new(Capabilities::full()));
    sequencer.run_to_completion();

    assert_eq!(audit.consumed_slots(), vec![0, 1, 0, 1, 0, 1]);
    // The slot being written never matches the one consumed in the same step
    for pair in audit.events().windows(2) {
        if let [AuditEvent::ConsumeSlot(consumed), AuditEvent::WriteSlot(written)] = pair {
            assert_ne!(consumed, written);
        }
    }
}

#[test]
fn failed_slot_map_skips_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(write_mesh(dir.path(), &Mesh::identity(2, 2)));
    let inputs: Vec<Frame> = (0..5).map(gradient).collect();
    let backend = SoftwareBackend::new(Capabilities::full()).with_failing_slot_writes([2]);

    let (mut sequencer, audit, captured) = run(&settings, inputs, backend);
    let counters = sequencer.run_to_completion();

    assert_eq!(counters.read, 5);
    assert_eq!(counters.skipped, 1);
    assert_eq!(counters.written, counters.read - counters.skipped);
    assert_eq!(captured.borrow().frames.len(), 4);
    assert_eq!(audit.count(AuditEvent::MapFailed(0)), 1);
    assert_eq!(audit.consumed_slots(), vec![0, 1, 0, 1]);
}

#[test]
fn end_of_stream_releases_everything_once() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(write_mesh(dir.path(), &Mesh::identity(2, 2)));

    for caps in [Capabilities::full(), Capabilities::minimal()] {
        let inputs: Vec<Frame> = (0..4).map(gradient).collect();
        let (mut sequencer, audit, captured) = run(&settings, inputs, SoftwareBackend::new(caps));
        let counters = sequencer.run_to_completion();

        assert_eq!(counters.written, 4);
        assert!(captured.borrow().finished);
        assert!(audit.live_resources().is_empty());
        for resource in [Resource::Texture, Resource::Geometry, Resource::Target] {
            assert_eq!(audit.release_count(resource), 1);
        }
        let slot_releases = if caps.staged_upload { 1 } else { 0 };
        assert_eq!(audit.release_count(Resource::Slots), slot_releases);

        // Dropping after termination must not release again
        drop(sequencer);
        assert_eq!(audit.release_count(Resource::Texture), 1);
    }
}

#[test]
fn window_target_used_without_offscreen_support() {
    let dir = tempfile::tempdir().unwrap();
    let settings = WarpSettings {
        output_width: 16,
        output_height: 16,
        window_width: 6,
        window_height: 4,
        ..settings_for(write_mesh(dir.path(), &Mesh::identity(2, 2)))
    };

    let (mut sequencer, _audit, captured) =
        run(&settings, vec![gradient(0)], SoftwareBackend::new(Capabilities::minimal()));
    sequencer.run_to_completion();

    let captured = captured.borrow();
    assert_eq!(captured.size, (6, 4));
    assert_eq!((captured.frames[0].width, captured.frames[0].height), (6, 4));
}

#[test]
fn missing_mesh_is_fatal_before_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("frames");
    std::fs::create_dir(&input).unwrap();
    let output = dir.path().join("framesF");
    let settings = settings_for(dir.path().join("missing.map"));

    let result = start_session(
        &settings,
        &input,
        &output,
        Box::new(SoftwareBackend::new(Capabilities::full())),
        None,
    );

    let err = result.err().unwrap();
    assert!(matches!(err, StartupError::Mesh(MeshLoadError::Open { .. })));
    assert_eq!(err.exit_code(), 2);
    assert!(!output.exists());
}

#[test]
fn missing_input_exits_with_source_code() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(write_mesh(dir.path(), &Mesh::identity(2, 2)));

    let result = start_session(
        &settings,
        &dir.path().join("nope"),
        &dir.path().join("nopeF"),
        Box::new(SoftwareBackend::new(Capabilities::full())),
        None,
    );

    assert_eq!(result.err().unwrap().exit_code(), 3);
}

#[test]
fn image_sequence_round_trip_through_session() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("shots");
    std::fs::create_dir(&input).unwrap();
    let colours = [[200u8, 10, 10], [10, 200, 10], [10, 10, 200]];
    for (i, rgb) in colours.iter().enumerate() {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb(*rgb));
        img.save(input.join(format!("shot_{}.png", i))).unwrap();
    }
    let output = dir.path().join("shotsF");
    let settings = settings_for(write_mesh(dir.path(), &Mesh::identity(4, 4)));

    let mut sequencer = start_session(
        &settings,
        &input,
        &output,
        Box::new(SoftwareBackend::new(Capabilities::full())),
        None,
    )
    .unwrap();
    let counters = sequencer.run_to_completion();
    assert_eq!(counters.written, 3);

    for (i, rgb) in colours.iter().enumerate() {
        let written = image::open(output.join(format!("frame_{:06}.png", i))).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (8, 8));
        assert_eq!(written.get_pixel(3, 5).0, *rgb);
    }
}
