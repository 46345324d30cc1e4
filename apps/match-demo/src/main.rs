use anyhow::Result;
use clap::{ArgAction, Parser};
use object_match::{
    open_source, run, CaptureSession, ExitReason, MatchConfig, MatchReport, RunOptions,
    RunOutcome,
};
use serde::Serialize;
use tracing::info;
use vision_capture::{MockCamera, NullDisplay, ScriptedKeys};

/// Keys played to the mock backend when no script is given: capture on the
/// fifth frame, commit two frames later, quit after forty.
const DEFAULT_SCRIPT: &str = "4:space,6:enter,40:esc";

#[derive(Parser, Debug)]
#[command(
    name = "match-demo",
    version,
    about = "Capture an object from a camera frame and count feature matches in later frames"
)]
struct Cli {
    /// Device spec: index like 0 or a path
    #[arg(long, default_value = "0")]
    device: String,
    /// Use the OpenCV camera and windows if compiled in; otherwise mock
    #[arg(long, action = ArgAction::SetTrue)]
    opencv: bool,
    /// Mock key script as POLL:KEY pairs, e.g. "4:space,6:enter,40:esc"
    #[arg(long)]
    script: Option<String>,
    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,
    /// Minimum Hessian response for keypoints
    #[arg(long)]
    sensitivity: Option<f64>,
    /// Good-match multiplier on the smallest match distance
    #[arg(long)]
    ratio: Option<f64>,
    /// Lower bound on the good-match distance limit
    #[arg(long)]
    floor: Option<f64>,
    /// Threshold a new capture starts at
    #[arg(long)]
    threshold: Option<u8>,
    #[arg(long)]
    max_threshold: Option<u8>,
    /// Key wait per frame in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,
    /// Skip the camera and per-snapshot match windows
    #[arg(long, action = ArgAction::SetTrue)]
    no_match_windows: bool,
    /// Print the effective configuration as JSON and exit
    #[arg(long, action = ArgAction::SetTrue)]
    print_config: bool,
    /// Print a JSON report of the committed snapshots on exit
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

impl Cli {
    fn config(&self) -> MatchConfig {
        let mut c = MatchConfig::default();
        if let Some(v) = self.sensitivity {
            c.detector_sensitivity = v;
        }
        if let Some(v) = self.ratio {
            c.match_ratio_multiplier = v;
        }
        if let Some(v) = self.floor {
            c.match_floor = v;
        }
        if let Some(v) = self.threshold {
            c.default_threshold = v;
        }
        if let Some(v) = self.max_threshold {
            c.max_threshold = v;
        }
        if let Some(v) = self.poll_ms {
            c.poll_interval_ms = v;
        }
        if self.no_match_windows {
            c.show_matches = false;
        }
        c
    }
}

#[derive(Serialize)]
struct SnapshotSummary {
    window: String,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    threshold: u8,
    keypoints: usize,
}

#[derive(Serialize)]
struct Report {
    reason: ExitReason,
    frames: u64,
    snapshots: Vec<SnapshotSummary>,
    last_matches: Vec<MatchReport>,
}

impl From<&RunOutcome> for Report {
    fn from(out: &RunOutcome) -> Self {
        let snapshots = out
            .snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let b = s.bounds();
                SnapshotSummary {
                    window: object_match::runner::snapshot_window(i),
                    x: b.x,
                    y: b.y,
                    width: b.width,
                    height: b.height,
                    threshold: s.threshold(),
                    keypoints: s.features().len(),
                }
            })
            .collect();
        Self {
            reason: out.reason,
            frames: out.frames,
            snapshots,
            last_matches: out.last_reports.clone(),
        }
    }
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let config = cli.config();

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let session =
        CaptureSession::new(config).map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    let outcome = if cli.opencv {
        run_opencv(&cli, session)?
    } else {
        run_mock(&cli, session)?
    };

    info!(
        reason = ?outcome.reason,
        frames = outcome.frames,
        snapshots = outcome.snapshots.len(),
        "done"
    );
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&Report::from(&outcome))?);
    }
    Ok(())
}

fn run_mock(cli: &Cli, session: CaptureSession) -> Result<RunOutcome> {
    let mut camera: MockCamera =
        open_source(&cli.device).map_err(|e| anyhow::anyhow!("mock open failed: {e}"))?;
    let script = cli.script.as_deref().unwrap_or(DEFAULT_SCRIPT);
    let mut keys =
        ScriptedKeys::from_script(script).map_err(|e| anyhow::anyhow!("bad --script: {e}"))?;
    // The synthetic camera never ends on its own
    let max_frames = cli
        .frames
        .or_else(|| keys.last_poll().map(|p| p + 2))
        .or(Some(60));
    let mut display = NullDisplay::new();
    let opts = RunOptions {
        max_frames,
        hold_final: false,
    };
    let outcome = run(&mut camera, &mut display, &mut keys, session, &opts)
        .map_err(|e| anyhow::anyhow!("capture loop failed: {e}"))?;
    let windows_shown = display.shown_count();
    info!(windows_shown, "mock display");
    Ok(outcome)
}

#[cfg(feature = "opencv")]
fn run_opencv(cli: &Cli, session: CaptureSession) -> Result<RunOutcome> {
    use vision_capture::{HighGuiDisplay, OpenCvCamera};

    let mut camera: OpenCvCamera =
        open_source(&cli.device).map_err(|e| anyhow::anyhow!("opencv open failed: {e}"))?;
    let mut display = HighGuiDisplay::new();
    // highgui keys are process-wide, so a second handle serves as key source
    let mut keys = HighGuiDisplay::new();
    let opts = RunOptions {
        max_frames: cli.frames,
        hold_final: true,
    };
    run(&mut camera, &mut display, &mut keys, session, &opts)
        .map_err(|e| anyhow::anyhow!("capture loop failed: {e}"))
}

#[cfg(not(feature = "opencv"))]
fn run_opencv(cli: &Cli, session: CaptureSession) -> Result<RunOutcome> {
    println!("OpenCV backend not enabled at compile time; using mock");
    run_mock(cli, session)
}

fn setup_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
