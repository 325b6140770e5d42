//! Vision autopilot: a four-state machine fed one detection per control tick.
//!
//! OFF emits nothing, SEARCH spins in place, CHASE closes in on the last seen
//! person and TRACK keeps them centred without moving forward or back.
//! CHASE is entered only from SEARCH when a person box shows up, and falls
//! back to SEARCH once the subject has been missing for `LOOKAHEAD` ticks.

use hawk_proto::telemetry::AutopilotMode;
use hawk_vision::BoundingBox;
use std::str::FromStr;
use tracing::info;

/// Ticks a lost subject is still chased.
pub const LOOKAHEAD: u32 = 7;

// CHASE aims to keep the box top at this normalized height (0 = bottom edge)
const CHASE_TARGET_TOP: f32 = 0.65;
// box top above this line means the subject is too close
const TOO_CLOSE_TOP: f32 = 0.2;
const BACKOFF_FB: f32 = -45.0;
const BACKOFF_UD: f32 = -15.0;
const TRACK_TARGET_TOP: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speeds {
    pub xy: f32,
    pub z: f32,
    pub yaw: f32,
}

impl Default for Speeds {
    fn default() -> Self {
        Self { xy: 100.0, z: 100.0, yaw: 100.0 }
    }
}

/// Modes an operator may select. CHASE is only ever entered automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    Off,
    Search,
    Track,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown autopilot mode `{0}` (expected off, search or track)")]
pub struct UnknownMode(pub String);

impl FromStr for ModeRequest {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(ModeRequest::Off),
            "search" => Ok(ModeRequest::Search),
            "track" => Ok(ModeRequest::Track),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

/// Autopilot output for one tick; unbounded until mixed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GuidanceDeltas {
    pub yaw: f32,
    pub up_down: f32,
    pub forward_back: f32,
}

/// Autopilot context. Owned and mutated by the control loop only.
#[derive(Debug, Clone)]
pub struct Autopilot {
    mode: AutopilotMode,
    // normalized box centre x, box top (measured up from the bottom edge) and width
    last_x_mid: f32,
    last_y_top: f32,
    box_width: f32,
    chase_counter: u32,
    speeds: Speeds,
}

impl Autopilot {
    pub fn new(speeds: Speeds) -> Self {
        Self {
            mode: AutopilotMode::Off,
            last_x_mid: 0.5,
            last_y_top: 0.5,
            box_width: 0.0,
            chase_counter: 0,
            speeds,
        }
    }

    pub fn mode(&self) -> AutopilotMode { self.mode }
    pub fn chase_counter(&self) -> u32 { self.chase_counter }
    pub fn last_x_mid(&self) -> f32 { self.last_x_mid }
    pub fn last_y_top(&self) -> f32 { self.last_y_top }
    pub fn box_width(&self) -> f32 { self.box_width }

    pub fn set_mode(&mut self, req: ModeRequest) {
        let next = match req {
            ModeRequest::Off => AutopilotMode::Off,
            ModeRequest::Search => AutopilotMode::Search,
            ModeRequest::Track => AutopilotMode::Track,
        };
        if next != self.mode {
            info!("autopilot: {} -> {}", self.mode.label(), next.label());
        }
        self.mode = next;
    }

    /// Feed this tick's person box (or its absence) in frame pixels.
    pub fn update_detection(&mut self, person: Option<&BoundingBox>, frame_w: u32, frame_h: u32) {
        match person {
            Some(b) if frame_w > 0 && frame_h > 0 => {
                let (fw, fh) = (frame_w as f32, frame_h as f32);
                self.last_x_mid = b.center_x() / fw;
                self.last_y_top = 1.0 - b.y1 / fh;
                self.box_width = b.width() / fw;
                self.chase_counter = LOOKAHEAD;
                if self.mode == AutopilotMode::Search {
                    info!("autopilot: person spotted, SEARCH -> CHASE");
                    self.mode = AutopilotMode::Chase;
                }
            }
            _ => self.chase_counter = self.chase_counter.saturating_sub(1),
        }
    }

    /// Deltas for this tick. May move CHASE back to SEARCH.
    pub fn update(&mut self) -> GuidanceDeltas {
        match self.mode {
            AutopilotMode::Off => GuidanceDeltas::default(),
            AutopilotMode::Search => self.search(),
            AutopilotMode::Chase => {
                if self.chase_counter == 0 {
                    info!("autopilot: subject lost, CHASE -> SEARCH");
                    self.mode = AutopilotMode::Search;
                    return self.search();
                }
                self.chase()
            }
            AutopilotMode::Track => GuidanceDeltas {
                yaw: self.yaw_towards_subject(),
                up_down: -(self.last_y_top - TRACK_TARGET_TOP) * 2.0 * self.speeds.z,
                forward_back: 0.0,
            },
        }
    }

    fn search(&self) -> GuidanceDeltas {
        GuidanceDeltas { yaw: self.speeds.yaw, up_down: 0.0, forward_back: 0.0 }
    }

    fn chase(&self) -> GuidanceDeltas {
        if self.last_y_top < TOO_CLOSE_TOP {
            return GuidanceDeltas { yaw: self.yaw_towards_subject(), up_down: BACKOFF_UD, forward_back: BACKOFF_FB };
        }
        let mut fb = (0.5 - 0.5 * self.box_width) * 2.0 * self.speeds.xy;
        // backing off is three times as eager as closing in
        if fb < 0.0 {
            fb *= 3.0;
        }
        GuidanceDeltas {
            yaw: self.yaw_towards_subject(),
            up_down: (self.last_y_top - CHASE_TARGET_TOP) * 2.0 * self.speeds.z,
            forward_back: fb,
        }
    }

    fn yaw_towards_subject(&self) -> f32 {
        (self.last_x_mid - 0.5) * 2.0 * self.speeds.yaw
    }
}
