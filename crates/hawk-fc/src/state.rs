use std::time::{Duration, Instant};

/// What the link reader has learned about the vehicle so far.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub last_rx: Option<Instant>,
    pub last_heartbeat: Option<Instant>,
    pub battery_percent: Option<u8>,
    pub battery_voltage: Option<f32>,
    pub height_cm: Option<i32>,
    pub last_msg: Option<String>,
}

impl LinkStatus {
    pub fn rx_age(&self) -> Option<Duration> {
        self.last_rx.map(|t| t.elapsed())
    }

    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    /// True once something was heard and then nothing for `timeout`.
    pub fn went_silent(&self, timeout: Duration) -> bool {
        matches!(self.rx_age(), Some(age) if age > timeout)
    }
}
