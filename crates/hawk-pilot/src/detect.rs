use hawk_vision::{DetectionResult, Detector};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::TickError;
use crate::stop::StopSignal;
use crate::{DetectionBuffer, FrameBuffer};

/// Runs the detector on the latest frame at its own rate and publishes the
/// result. Inference runs on the blocking pool; while a previous call is
/// still running the tick is skipped, so slow inference never queues up.
pub struct DetectionWorker {
    detector: Arc<Mutex<Box<dyn Detector>>>,
    frames: Arc<FrameBuffer>,
    detections: Arc<DetectionBuffer>,
    period: Duration,
    timeout: Duration,
}

impl DetectionWorker {
    pub fn new(
        detector: Box<dyn Detector>,
        frames: Arc<FrameBuffer>,
        detections: Arc<DetectionBuffer>,
        period: Duration,
        timeout: Duration,
    ) -> Self {
        Self { detector: Arc::new(Mutex::new(detector)), frames, detections, period, timeout }
    }

    /// One detection cycle. On any failure the buffer keeps its old value.
    pub async fn tick(&self) -> Result<(), TickError> {
        let frame = self.frames.snapshot().ok_or(TickError::SourceUnavailable)?;

        let detector = Arc::clone(&self.detector);
        let job = tokio::task::spawn_blocking(move || {
            let Some(mut det) = detector.try_lock() else {
                return Err(anyhow::anyhow!("detector still busy"));
            };
            det.infer(&frame)
        });

        // on timeout the blocking call keeps the detector locked until it returns
        let boxes = match tokio::time::timeout(self.timeout, job).await {
            Err(_) => return Err(TickError::DetectionFailure(format!("timed out after {:?}", self.timeout))),
            Ok(Err(join)) if join.is_panic() => return Err(TickError::DetectionFailure("detector panicked".into())),
            Ok(Err(join)) => return Err(TickError::DetectionFailure(join.to_string())),
            Ok(Ok(Err(e))) => return Err(TickError::DetectionFailure(format!("{:#}", e))),
            Ok(Ok(Ok(boxes))) => boxes,
        };

        let result = DetectionResult::from_boxes(boxes);
        debug!("detect: {} boxes, person={}", result.boxes.len(), result.person.is_some());
        self.detections.publish(result);
        Ok(())
    }

    pub async fn run(self, stop: StopSignal) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("detect: worker started ({:?} period)", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.wait() => break,
            }
            if stop.is_set() {
                break;
            }
            match self.tick().await {
                Ok(()) => {}
                Err(TickError::SourceUnavailable) => debug!("detect: no frame yet"),
                Err(e) => warn!("detect: {}", e),
            }
        }
        info!("detect: worker stopped");
    }
}
