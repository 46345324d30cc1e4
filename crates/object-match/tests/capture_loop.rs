use object_match::runner::{
    CAMERA_WINDOW, CAPTURE_WINDOW, CONTOURS_WINDOW, PLACEHOLDER_SIDE, THRESHOLD_WINDOW,
};
use object_match::{
    open_source, run, CaptureSession, Error, ExitReason, MatchConfig, RunOptions, Segmenter,
};
use vision_capture::{
    CameraSource, Display, Frame, MockCamera, NullDisplay, PixelFormat, Rect, ScriptedKeys,
};

fn scene(object: Rect) -> Frame {
    let (w, h) = (120u32, 90u32);
    let mut data = vec![15u8; (w * h * 3) as usize];
    for y in object.y..object.bottom() {
        for x in object.x..object.right() {
            let i = ((y * w + x) * 3) as usize;
            data[i..i + 3].copy_from_slice(&[230, 210, 190]);
        }
    }
    Frame::new(w, h, PixelFormat::Bgr8, data)
}

/// Box-filter corners can shave one pixel off a traced rectangle.
fn assert_near(got: Rect, want: Rect) {
    let edges = |r: Rect| [r.x as i64, r.y as i64, r.right() as i64, r.bottom() as i64];
    for (g, w) in edges(got).into_iter().zip(edges(want)) {
        assert!((g - w).abs() <= 1, "{got:?} vs {want:?}");
    }
}

fn session() -> CaptureSession {
    CaptureSession::new(MatchConfig::default()).expect("default config is valid")
}

#[test]
fn capture_then_commit_keeps_the_captured_frame() -> anyhow::Result<()> {
    let f0 = scene(Rect::new(5, 5, 20, 20));
    let f1 = scene(Rect::new(30, 20, 40, 30));
    let f2 = scene(Rect::new(70, 50, 30, 25));
    let mut camera = MockCamera::scripted(vec![f0, f1.clone(), f2]);
    let mut display = NullDisplay::new();
    // Space seen after frame 0 acts on frame 1; enter acts on frame 2
    let mut keys = ScriptedKeys::from_script("0:space,1:enter")?;

    let out = run(
        &mut camera,
        &mut display,
        &mut keys,
        session(),
        &RunOptions::default(),
    )?;

    assert_eq!(out.reason, ExitReason::ReadFailure);
    assert_eq!(out.frames, 3);
    assert_eq!(out.snapshots.len(), 1);
    let expected = Segmenter::new(&MatchConfig::default()).segment(&f1, 100)?;
    assert_eq!(out.snapshots[0].image(), &expected.crop);
    assert_near(out.snapshots[0].bounds(), Rect::new(30, 20, 40, 30));
    assert_eq!(out.last_reports.len(), 1);
    assert_eq!(out.last_reports[0].snapshot_index, 0);

    assert!(!display.is_open(CAPTURE_WINDOW));
    assert!(!display.is_open(THRESHOLD_WINDOW));
    assert!(!display.is_open(CONTOURS_WINDOW));
    assert!(!display.is_open(CAMERA_WINDOW));
    assert_eq!(display.window("Image 1"), Some(out.snapshots[0].image()));
    Ok(())
}

#[test]
fn quit_key_stops_the_synthetic_stream() -> anyhow::Result<()> {
    let mut camera: MockCamera = open_source("0")?;
    let mut display = NullDisplay::new();
    let mut keys = ScriptedKeys::from_script("3:esc")?;
    let out = run(
        &mut camera,
        &mut display,
        &mut keys,
        session(),
        &RunOptions::default(),
    )?;
    assert_eq!(out.reason, ExitReason::Quit);
    assert_eq!(out.frames, 4);
    assert!(out.snapshots.is_empty());
    Ok(())
}

#[test]
fn frame_limit_ends_the_loop() -> anyhow::Result<()> {
    let mut camera: MockCamera = open_source("0")?;
    let out = run(
        &mut camera,
        &mut NullDisplay::new(),
        &mut ScriptedKeys::default(),
        session(),
        &RunOptions {
            max_frames: Some(5),
            hold_final: true,
        },
    )?;
    assert_eq!(out.reason, ExitReason::FrameLimit);
    assert_eq!(camera.frames_read(), 5);
    Ok(())
}

#[test]
fn synthetic_object_can_be_captured() -> anyhow::Result<()> {
    let mut camera: MockCamera = open_source("0")?;
    let mut keys = ScriptedKeys::from_script("1:space,3:enter")?;
    let out = run(
        &mut camera,
        &mut NullDisplay::new(),
        &mut keys,
        session(),
        &RunOptions {
            max_frames: Some(8),
            hold_final: false,
        },
    )?;
    assert_eq!(out.snapshots.len(), 1);
    let b = out.snapshots[0].bounds();
    assert!(b.width >= 90 && b.height >= 66, "{b:?}");
    Ok(())
}

/// Moves the capture slider when a given camera frame is shown.
struct SliderDisplay {
    inner: NullDisplay,
    camera_frames: u32,
    move_at: u32,
    value: u8,
}

impl Display for SliderDisplay {
    fn show_image(&mut self, window: &str, image: &Frame) -> vision_capture::Result<()> {
        if window == CAMERA_WINDOW {
            self.camera_frames += 1;
            if self.camera_frames == self.move_at {
                self.inner.set_threshold_control(CAPTURE_WINDOW, self.value);
            }
        }
        self.inner.show_image(window, image)
    }

    fn destroy_window(&mut self, window: &str) -> vision_capture::Result<()> {
        self.inner.destroy_window(window)
    }

    fn create_threshold_control(
        &mut self,
        window: &str,
        initial: u8,
        max: u8,
    ) -> vision_capture::Result<()> {
        self.inner.create_threshold_control(window, initial, max)
    }

    fn threshold_control(&mut self, window: &str) -> vision_capture::Result<Option<u8>> {
        self.inner.threshold_control(window)
    }
}

#[test]
fn slider_changes_reach_the_commit() -> anyhow::Result<()> {
    let f = scene(Rect::new(30, 20, 40, 30));
    let mut camera = MockCamera::scripted(vec![f.clone(), f.clone(), f.clone(), f]);
    let mut display = SliderDisplay {
        inner: NullDisplay::new(),
        camera_frames: 0,
        move_at: 3,
        value: 180,
    };
    let mut keys = ScriptedKeys::from_script("0:space,2:enter")?;
    let out = run(
        &mut camera,
        &mut display,
        &mut keys,
        session(),
        &RunOptions::default(),
    )?;
    assert_eq!(out.snapshots.len(), 1);
    assert_eq!(out.snapshots[0].threshold(), 180);
    assert_eq!(out.snapshots[0].bounds(), Rect::new(31, 21, 38, 28));
    Ok(())
}

/// Keeps the order and size of every image shown.
#[derive(Default)]
struct RecordingDisplay {
    inner: NullDisplay,
    shown: Vec<(String, u32, u32)>,
}

impl Display for RecordingDisplay {
    fn show_image(&mut self, window: &str, image: &Frame) -> vision_capture::Result<()> {
        self.shown.push((window.to_string(), image.width, image.height));
        self.inner.show_image(window, image)
    }

    fn destroy_window(&mut self, window: &str) -> vision_capture::Result<()> {
        self.inner.destroy_window(window)
    }

    fn create_threshold_control(
        &mut self,
        window: &str,
        initial: u8,
        max: u8,
    ) -> vision_capture::Result<()> {
        self.inner.create_threshold_control(window, initial, max)
    }

    fn threshold_control(&mut self, window: &str) -> vision_capture::Result<Option<u8>> {
        self.inner.threshold_control(window)
    }
}

fn camera_windows(display: &RecordingDisplay) -> Vec<(u32, u32)> {
    display
        .shown
        .iter()
        .filter(|(w, _, _)| w == CAMERA_WINDOW)
        .map(|&(_, w, h)| (w, h))
        .collect()
}

#[test]
fn hidden_camera_view_still_opens_a_window_for_keys() -> anyhow::Result<()> {
    let config = MatchConfig {
        show_matches: false,
        ..MatchConfig::default()
    };
    let mut camera = MockCamera::scripted(vec![scene(Rect::new(30, 20, 40, 30))]);
    let mut display = RecordingDisplay::default();
    let out = run(
        &mut camera,
        &mut display,
        &mut ScriptedKeys::default(),
        CaptureSession::new(config)?,
        &RunOptions::default(),
    )?;
    assert_eq!(out.frames, 1);
    assert_eq!(
        display.shown.first().map(|(w, _, _)| w.as_str()),
        Some(CAMERA_WINDOW)
    );
    assert_eq!(
        camera_windows(&display),
        vec![(PLACEHOLDER_SIDE, PLACEHOLDER_SIDE)]
    );
    Ok(())
}

#[test]
fn visible_camera_view_shows_live_frames_only() -> anyhow::Result<()> {
    let f = scene(Rect::new(30, 20, 40, 30));
    let mut camera = MockCamera::scripted(vec![f.clone(), f]);
    let mut display = RecordingDisplay::default();
    run(
        &mut camera,
        &mut display,
        &mut ScriptedKeys::default(),
        session(),
        &RunOptions::default(),
    )?;
    assert_eq!(camera_windows(&display), vec![(120, 90), (120, 90)]);
    Ok(())
}

struct DeadCamera;

impl CameraSource for DeadCamera {
    fn open(spec: &str) -> vision_capture::Result<Self> {
        Err(vision_capture::Error::NotFound(spec.to_string()))
    }

    fn read(&mut self) -> vision_capture::Result<Frame> {
        Err(vision_capture::Error::Io("unplugged".into()))
    }

    fn is_open(&self) -> bool {
        false
    }
}

#[test]
fn missing_device_is_reported_before_the_loop() {
    assert!(matches!(
        open_source::<DeadCamera>("7"),
        Err(Error::DeviceUnavailable(_))
    ));
    let err = run(
        &mut DeadCamera,
        &mut NullDisplay::new(),
        &mut ScriptedKeys::default(),
        session(),
        &RunOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::DeviceUnavailable(_)));
}
