//! Fixed-rate control loop and flight session lifecycle.
//!
//! A session connects the vehicle, starts the frame producer and detection
//! worker, waits for the first frame, holds on the ground until a takeoff
//! trigger, then mixes operator and autopilot commands every tick. However
//! the session ends (operator quit, stop signal, fatal vehicle error or a
//! panic) the shutdown sequence runs: stop the units, zero the sticks, land,
//! join, stop the video stream and release the vehicle.

use anyhow::Context;
use futures_util::FutureExt;
use hawk_fc::{Command, Vehicle, VehicleError};
use hawk_proto::telemetry::{CommandEcho, FlightTelemetry};
use hawk_vision::camera::FrameSource;
use hawk_vision::Detector;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::autopilot::{Autopilot, GuidanceDeltas, ModeRequest, Speeds};
use crate::config::PilotConfig;
use crate::detect::DetectionWorker;
use crate::error::TickError;
use crate::input::{Key, ManualInput, SessionTriggers};
use crate::mixer::{mix, ManualDeltas};
use crate::producer::FrameProducer;
use crate::stop::StopSignal;
use crate::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightOutcome {
    /// Operator asked to land and quit.
    Quit,
    /// The session's stop signal fired.
    Stopped,
    /// Nobody took off within the pre-flight timeout.
    PreflightTimeout,
}

enum Flow {
    Continue,
    End(FlightOutcome),
}

pub struct ControlLoop {
    cfg: PilotConfig,
    // lifecycle calls borrow it from the blocking pool
    vehicle: Arc<Mutex<Box<dyn Vehicle>>>,
    autopilot: Autopilot,
    speeds: Speeds,
    input: Arc<dyn ManualInput>,
    triggers: Arc<SessionTriggers>,
    shared: SharedState,

    frame_size: (u32, u32),
    flying: bool,
    last_cmd: Command,
    battery: Option<u8>,
    height: Option<i32>,
    next_poll: Instant,
    preflight_since: Instant,
    next_preflight_log: Instant,
}

impl ControlLoop {
    pub fn new(
        cfg: PilotConfig,
        vehicle: Box<dyn Vehicle>,
        input: Arc<dyn ManualInput>,
        triggers: Arc<SessionTriggers>,
        shared: SharedState,
    ) -> Self {
        let speeds = cfg.speeds();
        let now = Instant::now();
        Self {
            autopilot: Autopilot::new(speeds),
            speeds,
            cfg,
            vehicle: Arc::new(Mutex::new(vehicle)),
            input,
            triggers,
            shared,
            frame_size: (0, 0),
            flying: false,
            last_cmd: Command::ZERO,
            battery: None,
            height: None,
            next_poll: now,
            preflight_since: now,
            next_preflight_log: now,
        }
    }

    /// Fly one session. Returns how it ended; errors mean it was aborted.
    /// The vehicle has been told to land and was released either way.
    pub async fn run(
        mut self,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        stop: StopSignal,
    ) -> anyhow::Result<FlightOutcome> {
        if let Err(e) = self.lifecycle("connect", |v| v.connect()).await {
            let _ = self.lifecycle("disconnect", |v| {
                v.disconnect();
                Ok(())
            }).await;
            return Err(e).context("connect to vehicle");
        }
        match self.vehicle.lock().battery_percent() {
            Ok(b) => info!("control: vehicle connected, battery {}%", b),
            Err(_) => info!("control: vehicle connected"),
        }
        if let Err(e) = self.lifecycle("streamon", |v| v.start_video_stream()).await {
            warn!("control: video stream not started: {}", e);
        }

        let producer = FrameProducer::new(source, self.shared.clone(), self.cfg.frame_period());
        let worker = DetectionWorker::new(
            detector,
            Arc::clone(&self.shared.frames),
            Arc::clone(&self.shared.detections),
            self.cfg.detect_period(),
            self.cfg.detect_timeout(),
        );
        let units = vec![
            ("frames", tokio::spawn(producer.run(stop.clone()))),
            ("detect", tokio::spawn(worker.run(stop.clone()))),
        ];

        let flown = AssertUnwindSafe(self.fly(&stop)).catch_unwind().await;
        self.shutdown(&stop, units).await;

        match flown {
            Ok(Ok(outcome)) => {
                info!("control: session ended ({:?})", outcome);
                Ok(outcome)
            }
            Ok(Err(e)) => Err(e).context("flight aborted"),
            Err(_) => anyhow::bail!("control loop panicked"),
        }
    }

    async fn fly(&mut self, stop: &StopSignal) -> Result<FlightOutcome, TickError> {
        let mut ticker = interval(self.cfg.loop_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // frame size comes from the first frame
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.wait() => return Ok(FlightOutcome::Stopped),
            }
            if let Some(frame) = self.shared.frames.snapshot() {
                self.frame_size = (frame.width(), frame.height());
                break;
            }
            if self.quit_requested() {
                return Ok(FlightOutcome::Quit);
            }
        }
        info!(
            "control: first frame {}x{}, holding for takeoff (key 5 or /do)",
            self.frame_size.0, self.frame_size.1
        );
        self.preflight_since = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.wait() => return Ok(FlightOutcome::Stopped),
            }
            if stop.is_set() {
                return Ok(FlightOutcome::Stopped);
            }
            match self.tick().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::End(outcome)) => return Ok(outcome),
                Err(e) if e.is_fatal() => {
                    error!("control: {}", e);
                    return Err(e);
                }
                Err(e) => warn!("control: {}", e),
            }
        }
    }

    async fn tick(&mut self) -> Result<Flow, TickError> {
        self.apply_mode_requests();
        if self.quit_requested() {
            info!("control: land/quit requested");
            return Ok(Flow::End(FlightOutcome::Quit));
        }

        // the latest result is consumed every tick, stale or not
        let detections = self.shared.detections.snapshot();
        let person = detections.as_ref().and_then(|d| d.person.as_ref());
        let (fw, fh) = self.frame_size;
        self.autopilot.update_detection(person, fw, fh);

        let auto = self.autopilot.update();
        let manual = ManualDeltas::from_input(self.input.as_ref(), &self.speeds);
        let cmd = mix(manual, auto);
        self.last_cmd = cmd;

        self.poll_vehicle();
        self.publish_telemetry();

        if self.flying {
            self.vehicle.lock().send_command(cmd)?;
            return Ok(Flow::Continue);
        }
        self.preflight(cmd, auto).await
    }

    /// On the ground: nothing is transmitted until a takeoff trigger.
    async fn preflight(&mut self, cmd: Command, auto: GuidanceDeltas) -> Result<Flow, TickError> {
        if self.triggers.take_takeoff() || self.input.is_pressed(Key::Five) {
            info!("control: takeoff");
            self.lifecycle("takeoff", |v| v.takeoff()).await?;
            self.flying = true;
            return Ok(Flow::Continue);
        }

        if let Some(limit) = self.cfg.preflight_timeout() {
            if self.preflight_since.elapsed() >= limit {
                warn!("control: no takeoff within {:?}, giving up", limit);
                return Ok(Flow::End(FlightOutcome::PreflightTimeout));
            }
        }

        let now = Instant::now();
        if now >= self.next_preflight_log {
            info!(
                "control: pre-flight {} auto(yaw={:.1} ud={:.1} fb={:.1}) held cmd lr={} fb={} ud={} yaw={}",
                self.autopilot.mode().label(),
                auto.yaw,
                auto.up_down,
                auto.forward_back,
                cmd.left_right,
                cmd.forward_back,
                cmd.up_down,
                cmd.yaw
            );
            self.next_preflight_log = now + self.cfg.preflight_log_interval();
        }
        Ok(Flow::Continue)
    }

    fn apply_mode_requests(&mut self) {
        let from_keys = if self.input.is_pressed(Key::One) {
            Some(ModeRequest::Off)
        } else if self.input.is_pressed(Key::Zero) {
            Some(ModeRequest::Search)
        } else if self.input.is_pressed(Key::Two) {
            Some(ModeRequest::Track)
        } else {
            None
        };
        if let Some(mode) = from_keys.or_else(|| self.triggers.take_mode()) {
            self.autopilot.set_mode(mode);
        }
    }

    fn quit_requested(&self) -> bool {
        self.triggers.land_requested() || self.input.is_pressed(Key::Space) || self.input.is_pressed(Key::Esc)
    }

    fn poll_vehicle(&mut self) {
        let now = Instant::now();
        if now < self.next_poll {
            return;
        }
        self.next_poll = now + self.cfg.telemetry_interval();
        let mut vehicle = self.vehicle.lock();
        match vehicle.battery_percent() {
            Ok(b) => self.battery = Some(b),
            Err(e) => debug!("control: battery: {}", e),
        }
        match vehicle.height_cm() {
            Ok(h) => self.height = Some(h),
            Err(e) => debug!("control: height: {}", e),
        }
    }

    fn publish_telemetry(&self) {
        let c = self.last_cmd;
        self.shared.telemetry.publish(FlightTelemetry {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            mode: self.autopilot.mode(),
            chase_counter: self.autopilot.chase_counter(),
            last_x_mid: self.autopilot.last_x_mid(),
            last_y_top: self.autopilot.last_y_top(),
            box_width: self.autopilot.box_width(),
            flying: self.flying,
            command: CommandEcho { left_right: c.left_right, forward_back: c.forward_back, up_down: c.up_down, yaw: c.yaw },
            frame_w: self.frame_size.0,
            frame_h: self.frame_size.1,
            battery_percent: self.battery,
            height_cm: self.height,
        });
    }

    /// Every step is attempted regardless of earlier failures.
    async fn shutdown(&mut self, stop: &StopSignal, units: Vec<(&'static str, JoinHandle<()>)>) {
        info!("control: shutting down");
        stop.trigger();

        if let Err(e) = self.vehicle.lock().send_command(Command::ZERO) {
            warn!("shutdown: zero command failed: {}", e);
        }
        if let Err(e) = self.lifecycle("land", |v| v.land()).await {
            warn!("shutdown: land failed: {}", e);
        }
        self.flying = false;
        self.last_cmd = Command::ZERO;

        let budget = self.cfg.join_timeout();
        for (name, handle) in units {
            let abort = handle.abort_handle();
            match tokio::time::timeout(budget, handle).await {
                Ok(Ok(())) => debug!("shutdown: {} stopped", name),
                Ok(Err(e)) => warn!("shutdown: {} ended abnormally: {}", name, e),
                Err(_) => {
                    warn!("shutdown: {} still running after {:?}, abandoning it", name, budget);
                    abort.abort();
                }
            }
        }

        if let Err(e) = self.lifecycle("streamoff", |v| v.stop_video_stream()).await {
            warn!("shutdown: stopping video stream failed: {}", e);
        }
        if let Err(e) = self.lifecycle("disconnect", |v| {
                v.disconnect();
                Ok(())
            }).await {
            warn!("shutdown: {}", e);
        }
        self.publish_telemetry();
        info!("control: shutdown complete");
    }

    /// Lifecycle calls may wait on the vehicle for seconds; they run on the
    /// blocking pool so the other units keep their cadence.
    async fn lifecycle<T, F>(&self, what: &'static str, f: F) -> Result<T, VehicleError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn Vehicle>) -> Result<T, VehicleError> + Send + 'static,
    {
        let vehicle = Arc::clone(&self.vehicle);
        tokio::task::spawn_blocking(move || f(&mut vehicle.lock()))
            .await
            .unwrap_or_else(|_| Err(VehicleError::Crashed(what)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::RemoteKeys;
    use hawk_fc::VehicleError;
    use hawk_proto::telemetry::AutopilotMode;
    use hawk_vision::camera::StillImage;
    use hawk_vision::{BoundingBox, Frame};
    use image::RgbImage;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Connect,
        Takeoff,
        Land,
        Send(Command),
        StartVideo,
        StopVideo,
        Disconnect,
    }

    #[derive(Default, Clone, Copy)]
    struct Script {
        fail_connect: bool,
        fail_sends_after: Option<usize>,
        fatal: bool,
        takeoff_takes: Option<Duration>,
    }

    struct MockVehicle {
        log: Arc<Mutex<Vec<Call>>>,
        script: Script,
        sends: usize,
    }

    impl Vehicle for MockVehicle {
        fn connect(&mut self) -> Result<(), VehicleError> {
            self.log.lock().push(Call::Connect);
            if self.script.fail_connect {
                return Err(VehicleError::Timeout("command".into()));
            }
            Ok(())
        }

        fn takeoff(&mut self) -> Result<(), VehicleError> {
            self.log.lock().push(Call::Takeoff);
            if let Some(d) = self.script.takeoff_takes {
                std::thread::sleep(d);
            }
            Ok(())
        }

        fn land(&mut self) -> Result<(), VehicleError> {
            self.log.lock().push(Call::Land);
            Ok(())
        }

        fn send_command(&mut self, cmd: Command) -> Result<(), VehicleError> {
            self.log.lock().push(Call::Send(cmd));
            self.sends += 1;
            match self.script.fail_sends_after {
                Some(n) if self.sends > n && self.script.fatal => Err(VehicleError::LinkLost("state timeout".into())),
                Some(n) if self.sends > n => Err(VehicleError::Timeout("rc".into())),
                _ => Ok(()),
            }
        }

        fn battery_percent(&mut self) -> Result<u8, VehicleError> { Ok(77) }
        fn height_cm(&mut self) -> Result<i32, VehicleError> { Ok(120) }

        fn start_video_stream(&mut self) -> Result<(), VehicleError> {
            self.log.lock().push(Call::StartVideo);
            Ok(())
        }

        fn stop_video_stream(&mut self) -> Result<(), VehicleError> {
            self.log.lock().push(Call::StopVideo);
            Ok(())
        }

        fn disconnect(&mut self) {
            self.log.lock().push(Call::Disconnect);
        }
    }

    struct Fixed(Vec<BoundingBox>);

    impl Detector for Fixed {
        fn infer(&mut self, _frame: &Frame) -> anyhow::Result<Vec<BoundingBox>> {
            Ok(self.0.clone())
        }
    }

    struct Blank;

    impl FrameSource for Blank {
        fn read_latest_frame(&mut self) -> Option<Frame> { None }
    }

    struct Exploding;

    impl ManualInput for Exploding {
        fn is_pressed(&self, _key: Key) -> bool {
            panic!("keyboard driver crashed")
        }
    }

    struct Session {
        log: Arc<Mutex<Vec<Call>>>,
        keys: Arc<RemoteKeys>,
        triggers: Arc<SessionTriggers>,
        shared: SharedState,
        stop: StopSignal,
    }

    impl Session {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                keys: Arc::new(RemoteKeys::new(Duration::from_secs(30))),
                triggers: Arc::new(SessionTriggers::default()),
                shared: SharedState::default(),
                stop: StopSignal::new(),
            }
        }

        fn start_with(
            &self,
            cfg: PilotConfig,
            script: Script,
            input: Arc<dyn ManualInput>,
            source: Box<dyn FrameSource>,
            boxes: Vec<BoundingBox>,
        ) -> JoinHandle<anyhow::Result<FlightOutcome>> {
            let vehicle = MockVehicle { log: Arc::clone(&self.log), script, sends: 0 };
            let lp = ControlLoop::new(cfg, Box::new(vehicle), input, Arc::clone(&self.triggers), self.shared.clone());
            tokio::spawn(lp.run(source, Box::new(Fixed(boxes)), self.stop.clone()))
        }

        fn start(&self, script: Script, boxes: Vec<BoundingBox>) -> JoinHandle<anyhow::Result<FlightOutcome>> {
            let input: Arc<dyn ManualInput> = self.keys.clone();
            self.start_with(cfg(), script, input, still(), boxes)
        }

        fn calls(&self) -> Vec<Call> {
            self.log.lock().clone()
        }

        fn sends(&self) -> Vec<Command> {
            self.calls().into_iter().filter_map(|c| match c { Call::Send(cmd) => Some(cmd), _ => None }).collect()
        }
    }

    fn cfg() -> PilotConfig {
        PilotConfig {
            loop_hz: 200,
            detect_hz: 50,
            frame_hz: 50,
            join_timeout_ms: 500,
            telemetry_interval_ms: 0,
            ..Default::default()
        }
    }

    fn still() -> Box<dyn FrameSource> {
        Box::new(StillImage::from_frame(Frame::new(RgbImage::new(64, 48))))
    }

    // centre x 0.75, width 0.25
    fn right_person() -> BoundingBox {
        BoundingBox::new(40.0, 12.0, 56.0, 40.0, "person", 0.9)
    }

    async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
        for _ in 0..600 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn finish(h: JoinHandle<anyhow::Result<FlightOutcome>>) -> anyhow::Result<FlightOutcome> {
        tokio::time::timeout(Duration::from_secs(5), h).await.unwrap().unwrap()
    }

    fn assert_shutdown_tail(calls: &[Call]) {
        let n = calls.len();
        assert!(n >= 4, "{:?}", calls);
        assert_eq!(&calls[n - 4..], &[Call::Send(Command::ZERO), Call::Land, Call::StopVideo, Call::Disconnect]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn takeoff_fly_and_land_on_request() {
        let s = Session::new();
        s.triggers.request_takeoff();
        let h = s.start(Script::default(), vec![]);

        wait_for("commands in flight", || s.sends().len() >= 5).await;
        s.triggers.request_land();
        assert_eq!(finish(h).await.unwrap(), FlightOutcome::Quit);

        let calls = s.calls();
        assert_eq!(&calls[..2], &[Call::Connect, Call::StartVideo]);
        let takeoff = calls.iter().position(|c| *c == Call::Takeoff).unwrap();
        assert!(calls[..takeoff].iter().all(|c| !matches!(c, Call::Send(_))));
        assert_shutdown_tail(&calls);

        let t = s.shared.telemetry.snapshot().unwrap();
        assert!(!t.flying);
        assert_eq!(t.battery_percent, Some(77));
        assert_eq!((t.frame_w, t.frame_h), (64, 48));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn autopilot_and_operator_commands_are_mixed() {
        let s = Session::new();
        s.triggers.request_mode(ModeRequest::Search);
        s.triggers.request_takeoff();
        s.keys.press(Key::A);
        let h = s.start(Script::default(), vec![right_person()]);

        wait_for("chase command", || {
            s.sends().iter().any(|c| c.left_right == -100 && c.yaw == 50 && c.forward_back == 75)
        })
        .await;
        assert_eq!(s.shared.telemetry.snapshot().unwrap().mode, AutopilotMode::Chase);

        s.stop.trigger();
        assert_eq!(finish(h).await.unwrap(), FlightOutcome::Stopped);
        assert!(s.sends().iter().all(|c| [c.left_right, c.forward_back, c.up_down, c.yaw]
            .iter()
            .all(|v| (-100..=100).contains(&(*v as i32)))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn link_loss_aborts_but_still_lands() {
        let s = Session::new();
        s.triggers.request_takeoff();
        let h = s.start(Script { fail_sends_after: Some(3), fatal: true, ..Default::default() }, vec![]);

        let err = finish(h).await.unwrap_err();
        assert!(format!("{:#}", err).contains("vehicle disconnected"), "{:#}", err);
        let calls = s.calls();
        // 3 good sends, the failing one, then the shutdown zero
        assert_eq!(s.sends().len(), 5);
        assert_shutdown_tail(&calls);
    }

    // single-threaded runtime: a takeoff blocking the worker would freeze every unit
    #[tokio::test]
    async fn slow_takeoff_does_not_stall_other_units() {
        let s = Session::new();
        s.triggers.request_takeoff();
        let h = s.start(Script { takeoff_takes: Some(Duration::from_millis(800)), ..Default::default() }, vec![]);

        wait_for("takeoff to begin", || s.calls().contains(&Call::Takeoff)).await;
        let frames_before = s.shared.frames.version();
        let t = Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(t.elapsed() < Duration::from_millis(300), "runtime stalled for {:?}", t.elapsed());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(s.shared.frames.version() >= frames_before + 3, "frame producer stalled during takeoff");
        // still climbing, so nothing has been sent yet
        assert!(s.sends().is_empty());

        wait_for("commands after takeoff", || !s.sends().is_empty()).await;
        s.stop.trigger();
        assert_eq!(finish(h).await.unwrap(), FlightOutcome::Stopped);
        assert_shutdown_tail(&s.calls());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_commands_do_not_end_flight() {
        let s = Session::new();
        s.triggers.request_takeoff();
        let h = s.start(Script { fail_sends_after: Some(2), ..Default::default() }, vec![]);

        wait_for("ticks past the failures", || s.sends().len() >= 10).await;
        assert!(!h.is_finished());
        s.stop.trigger();
        assert_eq!(finish(h).await.unwrap(), FlightOutcome::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preflight_holds_commands_back() {
        let s = Session::new();
        s.triggers.request_mode(ModeRequest::Search);
        let h = s.start(Script::default(), vec![]);

        // search yaw is computed and reported but never transmitted
        wait_for("search command computed", || {
            s.shared.telemetry.snapshot().map(|t| t.command.yaw == 100).unwrap_or(false)
        })
        .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        s.stop.trigger();
        assert_eq!(finish(h).await.unwrap(), FlightOutcome::Stopped);

        assert_eq!(s.sends(), vec![Command::ZERO]);
        assert!(!s.calls().contains(&Call::Takeoff));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn takeoff_key_lifts_off() {
        let s = Session::new();
        s.keys.press(Key::Five);
        let h = s.start(Script::default(), vec![]);
        wait_for("takeoff", || s.calls().contains(&Call::Takeoff)).await;
        s.keys.press(Key::Esc);
        assert_eq!(finish(h).await.unwrap(), FlightOutcome::Quit);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preflight_timeout_gives_up() {
        let s = Session::new();
        let input: Arc<dyn ManualInput> = s.keys.clone();
        let h = s.start_with(
            PilotConfig { preflight_timeout_s: Some(0), ..cfg() },
            Script::default(),
            input,
            still(),
            vec![],
        );
        assert_eq!(finish(h).await.unwrap(), FlightOutcome::PreflightTimeout);
        assert!(!s.calls().contains(&Call::Takeoff));
        assert_shutdown_tail(&s.calls());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiting_for_first_frame_honours_stop() {
        let s = Session::new();
        s.triggers.request_takeoff();
        let input: Arc<dyn ManualInput> = s.keys.clone();
        let h = s.start_with(cfg(), Script::default(), input, Box::new(Blank), vec![]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        s.stop.trigger();
        assert_eq!(finish(h).await.unwrap(), FlightOutcome::Stopped);
        assert!(!s.calls().contains(&Call::Takeoff));
        assert_eq!(s.sends(), vec![Command::ZERO]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connect_failure_releases_vehicle() {
        let s = Session::new();
        let h = s.start(Script { fail_connect: true, ..Default::default() }, vec![]);
        assert!(finish(h).await.is_err());
        assert_eq!(s.calls(), vec![Call::Connect, Call::Disconnect]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_in_loop_still_shuts_down() {
        let s = Session::new();
        let h = s.start_with(cfg(), Script::default(), Arc::new(Exploding), still(), vec![]);
        let err = finish(h).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert_shutdown_tail(&s.calls());
    }
}
