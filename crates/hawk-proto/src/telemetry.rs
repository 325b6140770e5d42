use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutopilotMode {
    #[default]
    Off,
    Search,
    Chase,
    Track,
}

impl AutopilotMode {
    pub fn label(self) -> &'static str {
        match self {
            AutopilotMode::Off => "OFF",
            AutopilotMode::Search => "SEARCH",
            AutopilotMode::Chase => "CHASE",
            AutopilotMode::Track => "TRACK",
        }
    }
}

/// Stick values as transmitted (or held back during pre-flight).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandEcho {
    pub left_right: i8,
    pub forward_back: i8,
    pub up_down: i8,
    pub yaw: i8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightTelemetry {
    pub ts_unix_ms: i64,
    pub mode: AutopilotMode,
    pub chase_counter: u32,
    // guidance point, normalized 0..1 (y measured upward from the bottom edge)
    pub last_x_mid: f32,
    pub last_y_top: f32,
    pub box_width: f32,
    pub flying: bool,
    pub command: CommandEcho,
    pub frame_w: u32,
    pub frame_h: u32,
    // Vehicle health
    pub battery_percent: Option<u8>,
    pub height_cm: Option<i32>,
}

impl FlightTelemetry {
    /// Guidance point in pixel coordinates, only while the subject is fresh.
    pub fn guidance_px(&self) -> Option<(f32, f32)> {
        if self.chase_counter == 0 || self.frame_w == 0 || self.frame_h == 0 {
            return None;
        }
        Some((
            self.last_x_mid * self.frame_w as f32,
            (1.0 - self.last_y_top) * self.frame_h as f32,
        ))
    }
}
