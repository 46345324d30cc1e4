use crate::{CameraSource, Display, Error, Frame, KeySource, PixelFormat, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use time::OffsetDateTime;

const MOCK_WIDTH: u32 = 320;
const MOCK_HEIGHT: u32 = 240;
const OBJECT_W: u32 = 96;
const OBJECT_H: u32 = 72;
const CELL: u32 = 8;

/// In-process camera. Either renders a synthetic scene (a bright textured
/// panel drifting over a dark background) or replays a fixed list of frames.
pub struct MockCamera {
    counter: u64,
    texture: Vec<u8>,
    scripted: Option<VecDeque<Frame>>,
    open: bool,
}

impl MockCamera {
    /// Replay `frames` in order; once exhausted every read fails and the
    /// camera reports itself closed.
    pub fn scripted(frames: Vec<Frame>) -> Self {
        Self {
            counter: 0,
            texture: Vec::new(),
            scripted: Some(frames.into()),
            open: true,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.counter
    }

    fn synthetic(&self, n: u64) -> Frame {
        let cells_x = OBJECT_W / CELL;
        let travel = (MOCK_WIDTH - OBJECT_W - 32) as u64;
        let ox = 16 + ((n * 3) % travel) as u32;
        let oy = (MOCK_HEIGHT - OBJECT_H) / 2;
        let mut data = vec![0u8; (MOCK_WIDTH * MOCK_HEIGHT * 3) as usize];
        for y in 0..MOCK_HEIGHT {
            for x in 0..MOCK_WIDTH {
                let idx = ((y * MOCK_WIDTH + x) * 3) as usize;
                // Dark vertical ramp, well under the default threshold
                let bg = (20 + y * 30 / MOCK_HEIGHT) as u8;
                let inside = x >= ox && x < ox + OBJECT_W && y >= oy && y < oy + OBJECT_H;
                let v = if inside {
                    let cx = (x - ox) / CELL;
                    let cy = (y - oy) / CELL;
                    self.texture[(cy * cells_x + cx) as usize]
                } else {
                    bg
                };
                data[idx] = v;
                data[idx + 1] = v;
                data[idx + 2] = v.saturating_sub(10);
            }
        }
        Frame {
            width: MOCK_WIDTH,
            height: MOCK_HEIGHT,
            pixel_format: PixelFormat::Rgb8,
            data,
            ts: Some(OffsetDateTime::now_utc()),
        }
    }
}

impl CameraSource for MockCamera {
    fn open(_spec: &str) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let cells = ((OBJECT_W / CELL) * (OBJECT_H / CELL)) as usize;
        let texture = (0..cells)
            .map(|_| if rng.gen_bool(0.5) { 245 } else { 140 })
            .collect();
        Ok(Self {
            counter: 0,
            texture,
            scripted: None,
            open: true,
        })
    }

    fn read(&mut self) -> Result<Frame> {
        if let Some(queue) = self.scripted.as_mut() {
            return match queue.pop_front() {
                Some(frame) => {
                    self.counter += 1;
                    Ok(frame)
                }
                None => {
                    self.open = false;
                    Err(Error::Io("end of scripted stream".into()))
                }
            };
        }
        self.counter += 1;
        Ok(self.synthetic(self.counter))
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Headless display: keeps the last frame per window and the slider state so
/// flows can be inspected without a GUI.
#[derive(Debug, Default)]
pub struct NullDisplay {
    windows: HashMap<String, Frame>,
    controls: HashMap<String, u8>,
    shown: u64,
}

impl NullDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self, name: &str) -> Option<&Frame> {
        self.windows.get(name)
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.windows.contains_key(name)
    }

    pub fn shown_count(&self) -> u64 {
        self.shown
    }

    /// Move a slider as a user would.
    pub fn set_threshold_control(&mut self, window: &str, value: u8) {
        if let Some(v) = self.controls.get_mut(window) {
            *v = value;
        }
    }
}

impl Display for NullDisplay {
    fn show_image(&mut self, window: &str, image: &Frame) -> Result<()> {
        self.shown += 1;
        self.windows.insert(window.to_string(), image.clone());
        Ok(())
    }

    fn destroy_window(&mut self, window: &str) -> Result<()> {
        self.windows.remove(window);
        self.controls.remove(window);
        Ok(())
    }

    fn create_threshold_control(&mut self, window: &str, initial: u8, _max: u8) -> Result<()> {
        self.controls.insert(window.to_string(), initial);
        Ok(())
    }

    fn threshold_control(&mut self, window: &str) -> Result<Option<u8>> {
        Ok(self.controls.get(window).copied())
    }
}

/// Key presses keyed by poll number (0-based).
#[derive(Debug, Default, Clone)]
pub struct ScriptedKeys {
    keys: BTreeMap<u64, i32>,
    polls: u64,
}

impl ScriptedKeys {
    pub fn new(keys: impl IntoIterator<Item = (u64, i32)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            polls: 0,
        }
    }

    /// Parse `"2:space,4:enter,30:esc"`. Key names: space, enter, esc, q, or a
    /// decimal key code.
    pub fn from_script(script: &str) -> Result<Self> {
        let mut keys = BTreeMap::new();
        for item in script.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (at, key) = item
                .split_once(':')
                .ok_or_else(|| Error::Script(format!("expected POLL:KEY, got '{item}'")))?;
            let at: u64 = at
                .trim()
                .parse()
                .map_err(|_| Error::Script(format!("invalid poll index '{at}'")))?;
            let code = match key.trim().to_ascii_lowercase().as_str() {
                "space" => 32,
                "enter" => 13,
                "esc" => 27,
                "q" => 'q' as i32,
                other => other
                    .parse()
                    .map_err(|_| Error::Script(format!("unknown key '{other}'")))?,
            };
            keys.insert(at, code);
        }
        Ok(Self { keys, polls: 0 })
    }

    /// Index of the last scripted key, if any.
    pub fn last_poll(&self) -> Option<u64> {
        self.keys.keys().next_back().copied()
    }
}

impl KeySource for ScriptedKeys {
    fn poll_key(&mut self, _wait: Duration) -> Result<Option<i32>> {
        let key = self.keys.get(&self.polls).copied();
        self.polls += 1;
        Ok(key)
    }
}
