use serde::Deserialize;
use std::time::Duration;

use crate::autopilot::Speeds;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// Control loop rate.
    pub loop_hz: u32,
    /// Detection rate; independent of (and normally below) loop_hz.
    pub detect_hz: u32,
    /// Frame capture + overlay rate.
    pub frame_hz: u32,

    pub speed_xy: i32,
    pub speed_z: i32,
    pub speed_yaw: i32,

    /// How often held-back commands are logged before takeoff.
    pub preflight_log_ms: u64,
    /// Give up if nobody takes off within this long.
    pub preflight_timeout_s: Option<u64>,

    /// Per-unit join budget during shutdown.
    pub join_timeout_ms: u64,
    pub detect_timeout_ms: u64,
    /// How long a key pressed through the control surface counts as held.
    pub key_hold_ms: u64,
    /// Battery/height polling interval.
    pub telemetry_interval_ms: u64,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            loop_hz: 100,
            detect_hz: 10,
            frame_hz: 30,
            speed_xy: 100,
            speed_z: 100,
            speed_yaw: 100,
            preflight_log_ms: 4000,
            preflight_timeout_s: None,
            join_timeout_ms: 1000,
            detect_timeout_ms: 2000,
            key_hold_ms: 300,
            telemetry_interval_ms: 1000,
        }
    }
}

fn period(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / hz.max(1) as f64)
}

impl PilotConfig {
    pub fn loop_period(&self) -> Duration { period(self.loop_hz) }
    pub fn detect_period(&self) -> Duration { period(self.detect_hz) }
    pub fn frame_period(&self) -> Duration { period(self.frame_hz) }

    pub fn speeds(&self) -> Speeds {
        Speeds { xy: self.speed_xy as f32, z: self.speed_z as f32, yaw: self.speed_yaw as f32 }
    }

    pub fn join_timeout(&self) -> Duration { Duration::from_millis(self.join_timeout_ms) }
    pub fn detect_timeout(&self) -> Duration { Duration::from_millis(self.detect_timeout_ms) }
    pub fn key_hold(&self) -> Duration { Duration::from_millis(self.key_hold_ms) }
    pub fn telemetry_interval(&self) -> Duration { Duration::from_millis(self.telemetry_interval_ms) }
    pub fn preflight_log_interval(&self) -> Duration { Duration::from_millis(self.preflight_log_ms) }
    pub fn preflight_timeout(&self) -> Option<Duration> { self.preflight_timeout_s.map(Duration::from_secs) }
}
