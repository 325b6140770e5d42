//! Flight core: frame production, detection, the autopilot state machine and
//! the fixed-rate control loop, tied together through single-slot cells.

pub mod autopilot;
pub mod config;
pub mod control;
pub mod detect;
pub mod doctor;
pub mod error;
pub mod input;
pub mod mixer;
pub mod producer;
pub mod stop;

use hawk_proto::telemetry::FlightTelemetry;
use hawk_proto::LatestCell;
use hawk_vision::{DetectionResult, Frame};
use std::sync::Arc;

pub use config::PilotConfig;
pub use control::{ControlLoop, FlightOutcome};
pub use error::TickError;
pub use stop::StopSignal;

pub type FrameBuffer = LatestCell<Frame>;
pub type DetectionBuffer = LatestCell<DetectionResult>;

/// The cells the flight units communicate through.
///
/// Cloning shares the cells; nothing here is ever queued.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    pub frames: Arc<FrameBuffer>,
    pub detections: Arc<DetectionBuffer>,
    pub telemetry: Arc<LatestCell<FlightTelemetry>>,
    /// Latest frame with overlays, for re-publishing.
    pub annotated: Arc<FrameBuffer>,
}
