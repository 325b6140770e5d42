mod keyboard;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use hawk_fc::autodetect::{autodetect_fc, default_candidate_bauds, default_candidate_devs};
use hawk_fc::FcConfig;
use hawk_pilot::doctor as pilot_doctor;
use hawk_pilot::input::{ManualInput, RemoteKeys, SessionTriggers};
use hawk_pilot::{ControlLoop, PilotConfig, SharedState, StopSignal};
use hawk_stream::{doctor as stream_doctor, AppState, StreamConfig};
use hawk_vision::camera::{self, CameraConfig};
use hawk_vision::{Detector, NullDetector, VisionConfig};

#[cfg(feature = "vision-tflite")]
use hawk_vision::tflite::TfliteDetector;

#[derive(Debug, Parser)]
#[command(name = "hawk", version, about = "hawk - vision autopilot for person-following drones")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    Run {
        /// Read flight keys from this terminal.
        #[arg(long)]
        keyboard: bool,
    },
    Vision { #[command(subcommand)] cmd: VisionCmd },
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Connect, print battery and height, disconnect. Nothing is flown.
    Probe,
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    pilot: PilotConfig,
    camera: CameraConfig,
    vision: Option<VisionConfig>,
    fc: FcConfig,
    #[serde(default)]
    stream: StreamConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run { keyboard } => run(&cfg, keyboard).await?,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd)?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    pilot_doctor::check_rates(&cfg.pilot)?;
    pilot_doctor::check_speeds(&cfg.pilot)?;
    pilot_doctor::check_camera(&cfg.camera)?;
    pilot_doctor::check_fc(&cfg.fc)?;
    stream_doctor::check_stream(&cfg.stream)?;

    if let Some(v) = cfg.vision.as_ref().filter(|v| v.enable) {
        anyhow::ensure!(v.backend == "tflite", "unknown vision.backend: {}", v.backend);
        anyhow::ensure!(!v.class_names.is_empty(), "vision.class_names is empty");
        anyhow::ensure!(
            v.class_names.iter().any(|c| c == hawk_vision::PERSON),
            "vision.class_names has no \"person\"; the autopilot would never see anyone"
        );
        #[cfg(not(feature = "vision-tflite"))]
        anyhow::bail!("vision enabled but binary not built with --features vision-tflite");
    } else {
        warn!("doctor: vision disabled, autopilot will only search");
    }

    if !cfg.stream.enable {
        warn!("doctor: stream disabled; takeoff needs `hawk run --keyboard`");
    }
    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config, use_keyboard: bool) -> Result<()> {
    info!("run: starting");
    anyhow::ensure!(
        cfg.stream.enable || use_keyboard,
        "no way to take off: enable [stream] or pass --keyboard"
    );

    let stop = StopSignal::new();
    let shared = SharedState::default();
    let keys = Arc::new(RemoteKeys::new(cfg.pilot.key_hold()));
    let triggers = Arc::new(SessionTriggers::default());

    // everything that can fail on config is opened before the vehicle is touched
    let detector = init_detector(cfg)?;
    let vehicle = hawk_fc::open(&cfg.fc)?;
    let listener = if cfg.stream.enable { Some(hawk_stream::bind(&cfg.stream).await?) } else { None };
    let source = camera::open(&cfg.camera).context("open camera")?;

    let server = listener.map(|l| {
        let st = AppState::new(&cfg.stream, shared.clone(), Arc::clone(&keys), Arc::clone(&triggers), stop.clone());
        tokio::spawn(hawk_stream::serve(l, st))
    });
    let kb = if use_keyboard { Some(keyboard::spawn(Arc::clone(&keys), stop.clone())?) } else { None };

    {
        let triggers = Arc::clone(&triggers);
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                r = tokio::signal::ctrl_c() => {
                    if r.is_ok() {
                        warn!("run: interrupted, landing");
                        triggers.request_land();
                    }
                }
                _ = stop.wait() => {}
            }
        });
    }

    let input: Arc<dyn ManualInput> = keys;
    let control = ControlLoop::new(cfg.pilot.clone(), vehicle, input, triggers, shared);
    let outcome = control.run(source, detector, stop.clone()).await;

    stop.trigger();
    if let Some(h) = server {
        match tokio::time::timeout(Duration::from_secs(2), h).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("run: stream server: {:#}", e),
            Ok(Err(e)) => warn!("run: stream server task: {}", e),
            Err(_) => warn!("run: stream server did not stop in time"),
        }
    }
    if let Some(h) = kb {
        if h.join().is_err() {
            warn!("run: keyboard thread panicked");
        }
    }

    let outcome = outcome?;
    info!("run: done ({:?})", outcome);
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => {
            #[cfg(feature = "vision-tflite")]
            {
                let v = cfg.vision.clone().context("no [vision] config section")?;
                let mut det = TfliteDetector::new(v)?;
                print!("{}", det.inspect()?);
                Ok(())
            }
            #[cfg(not(feature = "vision-tflite"))]
            {
                let _ = cfg;
                anyhow::bail!("vision backend not available; build with --features vision-tflite");
            }
        }
    }
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Probe => {
            let mut vehicle = hawk_fc::open(&cfg.fc)?;
            // blocking SDK calls
            let report = tokio::task::spawn_blocking(move || -> Result<(String, String)> {
                vehicle.connect().context("connect")?;
                // give the state reader a moment
                std::thread::sleep(Duration::from_millis(1500));
                let battery = vehicle.battery_percent().map(|b| format!("{}%", b)).unwrap_or_else(|e| e.to_string());
                let height = vehicle.height_cm().map(|h| format!("{}cm", h)).unwrap_or_else(|e| e.to_string());
                vehicle.disconnect();
                Ok((battery, height))
            })
            .await??;
            println!("backend={}", cfg.fc.backend);
            println!("battery={}", report.0);
            println!("height={}", report.1);
            Ok(())
        }
        FcCmd::Autodetect => {
            let m = cfg.fc.mavlink.as_ref().context("no [fc.mavlink] config section")?;
            let res = autodetect_fc(
                m.candidate_devs.clone().unwrap_or_else(default_candidate_devs),
                m.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds),
                Duration::from_millis(m.heartbeat_timeout_ms.unwrap_or(1500)),
            )?;
            if let Some((dev, baud)) = res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.probes {
                println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
    }
}

fn init_detector(cfg: &Config) -> Result<Box<dyn Detector>> {
    let Some(v) = cfg.vision.as_ref().filter(|v| v.enable) else {
        warn!("vision disabled; autopilot will never find a subject");
        return Ok(Box::new(NullDetector));
    };

    #[cfg(not(feature = "vision-tflite"))]
    {
        let _ = v;
        anyhow::bail!("vision enabled but binary not built with --features vision-tflite");
    }

    #[cfg(feature = "vision-tflite")]
    {
        anyhow::ensure!(v.backend == "tflite", "unknown vision.backend: {}", v.backend);
        Ok(Box::new(TfliteDetector::new(v.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses_and_passes_doctor() {
        let cfg = parse_config(include_str!("../../../config/hawk.example.toml")).unwrap();
        assert_eq!(cfg.pilot.loop_hz, 100);
        assert_eq!(cfg.fc.backend, "tello");
        assert!(cfg.fc.mavlink.is_some());
        assert!(!cfg.vision.as_ref().unwrap().enable);
        doctor(&cfg).unwrap();
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config(
            r#"
            [camera]
            mode = "file"
            path = "demo.jpg"
            width = 0
            height = 0
            fps = 0

            [fc]
            backend = "sim"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pilot.detect_hz, 10);
        assert_eq!(cfg.stream.bind, "0.0.0.0:5001");
        assert!(cfg.vision.is_none());
        doctor(&cfg).unwrap();
    }

    #[test]
    fn chase_lookahead_ignores_config() {
        use hawk_pilot::autopilot::{Autopilot, ModeRequest, LOOKAHEAD};
        use hawk_vision::BoundingBox;

        let cfg = parse_config(
            r#"
            [pilot]
            lookahead = 20

            [camera]
            mode = "file"
            path = "demo.jpg"
            width = 0
            height = 0
            fps = 0

            [fc]
            backend = "sim"
            "#,
        )
        .unwrap();
        doctor(&cfg).unwrap();

        let mut ap = Autopilot::new(cfg.pilot.speeds());
        ap.set_mode(ModeRequest::Search);
        let b = BoundingBox::new(100.0, 100.0, 200.0, 400.0, "person", 0.9);
        ap.update_detection(Some(&b), 1000, 800);
        assert_eq!(ap.chase_counter(), LOOKAHEAD);
        assert_eq!(LOOKAHEAD, 7);
    }
}
