use hawk_fc::VehicleError;

/// Why a unit's tick did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// No frame yet; the tick is skipped.
    #[error("no frame available")]
    SourceUnavailable,

    /// Detector errored, panicked, timed out or was still busy; the
    /// detection buffer keeps its previous value.
    #[error("detection failed: {0}")]
    DetectionFailure(String),

    /// A single command did not reach the vehicle; the next tick sends a fresh one.
    #[error("command dropped: {0}")]
    ActuatorCommandFailure(#[source] VehicleError),

    #[error("vehicle disconnected: {0}")]
    ActuatorDisconnect(#[source] VehicleError),
}

impl TickError {
    /// Only a lost vehicle ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TickError::ActuatorDisconnect(_))
    }
}

impl From<VehicleError> for TickError {
    fn from(e: VehicleError) -> Self {
        if e.is_fatal() {
            TickError::ActuatorDisconnect(e)
        } else {
            TickError::ActuatorCommandFailure(e)
        }
    }
}
