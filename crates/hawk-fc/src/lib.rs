pub mod autodetect;
pub mod mav;
pub mod safety;
pub mod sim;
pub mod state;
pub mod tello;

use anyhow::Result;
use serde::Deserialize;

/// Stick command, every axis in [-100, 100].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Command {
    pub left_right: i8,
    pub forward_back: i8,
    pub up_down: i8,
    pub yaw: i8,
}

impl Command {
    pub const ZERO: Command = Command { left_right: 0, forward_back: 0, up_down: 0, yaw: 0 };

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    /// The vehicle stopped talking to us; the session cannot continue.
    #[error("vehicle link lost: {0}")]
    LinkLost(String),

    #[error("no reply to `{0}`")]
    Timeout(String),

    #[error("vehicle answered `{command}` with `{reply}`")]
    Rejected { command: String, reply: String },

    #[error("refusing {0}")]
    Refused(String),

    #[error("{0} not available yet")]
    Unavailable(&'static str),

    #[error("not connected")]
    NotConnected,

    /// The driver panicked inside a call; its state can no longer be trusted.
    #[error("vehicle driver crashed during {0}")]
    Crashed(&'static str),

    #[error("mavlink: {0}")]
    Mavlink(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VehicleError {
    /// Fatal errors end the flight session; everything else only costs a tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VehicleError::LinkLost(_) | VehicleError::NotConnected | VehicleError::Crashed(_))
    }
}

/// The vehicle SDK as seen by the control loop.
///
/// `send_command` must not block; lifecycle calls (connect, takeoff, land)
/// may wait for an acknowledgement.
pub trait Vehicle: Send {
    fn connect(&mut self) -> Result<(), VehicleError>;
    fn takeoff(&mut self) -> Result<(), VehicleError>;
    fn land(&mut self) -> Result<(), VehicleError>;
    fn send_command(&mut self, cmd: Command) -> Result<(), VehicleError>;
    fn battery_percent(&mut self) -> Result<u8, VehicleError>;
    fn height_cm(&mut self) -> Result<i32, VehicleError>;
    fn start_video_stream(&mut self) -> Result<(), VehicleError>;
    fn stop_video_stream(&mut self) -> Result<(), VehicleError>;
    /// Release the link. Never fails; problems are logged.
    fn disconnect(&mut self);
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// "tello" | "mavlink" | "sim"
    pub backend: String,
    pub tello: Option<tello::TelloConfig>,
    pub mavlink: Option<mav::MavlinkConfig>,
    pub sim: Option<sim::SimConfig>,
}

pub const BACKENDS: &[&str] = &["tello", "mavlink", "sim"];

/// Build the configured backend. Nothing is opened until `connect`.
pub fn open(cfg: &FcConfig) -> Result<Box<dyn Vehicle>> {
    match cfg.backend.as_str() {
        "tello" => Ok(Box::new(tello::Tello::new(cfg.tello.clone().unwrap_or_default()))),
        "mavlink" => {
            let m = cfg.mavlink.clone().ok_or_else(|| anyhow::anyhow!("fc.backend=mavlink but no [fc.mavlink] section"))?;
            Ok(Box::new(mav::MavVehicle::new(m)))
        }
        "sim" => Ok(Box::new(sim::SimVehicle::new(cfg.sim.clone().unwrap_or_default()))),
        other => anyhow::bail!("unknown fc.backend: {}", other),
    }
}
