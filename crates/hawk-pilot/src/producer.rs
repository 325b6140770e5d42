use hawk_vision::camera::FrameSource;
use hawk_vision::{overlay, Frame};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::TickError;
use crate::stop::StopSignal;
use crate::SharedState;

/// Pulls frames from the source into the frame buffer and renders the
/// annotated copy for re-publishing.
pub struct FrameProducer {
    source: Box<dyn FrameSource>,
    shared: SharedState,
    period: Duration,
}

impl FrameProducer {
    pub fn new(source: Box<dyn FrameSource>, shared: SharedState, period: Duration) -> Self {
        Self { source, shared, period }
    }

    pub fn tick(&mut self) -> Result<(), TickError> {
        let frame = self.source.read_latest_frame().ok_or(TickError::SourceUnavailable)?;
        self.shared.frames.publish(frame.clone());

        let detections = self.shared.detections.snapshot();
        let telemetry = self.shared.telemetry.snapshot().unwrap_or_default();
        let annotated = overlay::annotate(&frame, detections.as_ref(), telemetry.guidance_px(), telemetry.mode);
        self.shared.annotated.publish(Frame::new(annotated));
        Ok(())
    }

    pub async fn run(mut self, stop: StopSignal) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("frames: producer started ({:?} period)", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.wait() => break,
            }
            if stop.is_set() {
                break;
            }
            if let Err(e) = self.tick() {
                debug!("frames: {}", e);
            }
        }
        self.source.stop();
        info!("frames: producer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hawk_proto::telemetry::{AutopilotMode, FlightTelemetry};
    use hawk_vision::camera::StillImage;
    use image::{Rgb, RgbImage};

    struct Blank;

    impl FrameSource for Blank {
        fn read_latest_frame(&mut self) -> Option<Frame> {
            None
        }
    }

    #[test]
    fn publishes_raw_and_annotated() {
        let shared = SharedState::default();
        shared.telemetry.publish(FlightTelemetry { mode: AutopilotMode::Track, ..Default::default() });
        let src = StillImage::from_frame(Frame::new(RgbImage::new(40, 30)));
        let mut p = FrameProducer::new(Box::new(src), shared.clone(), Duration::from_millis(10));

        p.tick().unwrap();
        let raw = shared.frames.snapshot().unwrap();
        let annotated = shared.annotated.snapshot().unwrap();
        assert_eq!(*raw.pixels().get_pixel(0, 0), Rgb([0, 0, 0]));
        // mode bar drawn on the copy only
        assert_ne!(*annotated.pixels().get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn missing_frame_keeps_previous() {
        let shared = SharedState::default();
        let before = Frame::new(RgbImage::new(2, 2));
        shared.frames.publish(before.clone());
        let mut p = FrameProducer::new(Box::new(Blank), shared.clone(), Duration::from_millis(10));

        assert!(matches!(p.tick(), Err(TickError::SourceUnavailable)));
        assert_eq!(shared.frames.snapshot().unwrap().captured_at(), before.captured_at());
        assert!(shared.annotated.is_empty());
    }
}
