use anyhow::Result;
use hawk_fc::{FcConfig, BACKENDS};
use hawk_vision::camera::{CameraConfig, CAMERA_MODES};

use crate::config::PilotConfig;

pub fn check_rates(cfg: &PilotConfig) -> Result<()> {
    anyhow::ensure!(cfg.loop_hz > 0, "pilot.loop_hz must be > 0");
    anyhow::ensure!(cfg.detect_hz > 0, "pilot.detect_hz must be > 0");
    anyhow::ensure!(cfg.frame_hz > 0, "pilot.frame_hz must be > 0");
    anyhow::ensure!(cfg.detect_hz <= cfg.loop_hz, "pilot.detect_hz should not exceed pilot.loop_hz");
    anyhow::ensure!(cfg.join_timeout_ms >= 100, "pilot.join_timeout_ms too small; set >= 100");
    Ok(())
}

pub fn check_speeds(cfg: &PilotConfig) -> Result<()> {
    for (name, v) in [("speed_xy", cfg.speed_xy), ("speed_z", cfg.speed_z), ("speed_yaw", cfg.speed_yaw)] {
        anyhow::ensure!((0..=100).contains(&v), "pilot.{} should be 0..100, got {}", name, v);
    }
    Ok(())
}

pub fn check_camera(cam: &CameraConfig) -> Result<()> {
    anyhow::ensure!(CAMERA_MODES.contains(&cam.mode.as_str()), "unknown camera.mode: {}", cam.mode);
    match cam.mode.as_str() {
        "v4l2-mjpeg" => anyhow::ensure!(!cam.device.is_empty(), "camera.device missing"),
        "url" => anyhow::ensure!(!cam.url.is_empty(), "camera.url missing"),
        "file" => anyhow::ensure!(!cam.path.is_empty(), "camera.path missing"),
        _ => {}
    }
    if cam.mode != "file" {
        anyhow::ensure!(cam.width > 0 && cam.height > 0, "camera size invalid");
        anyhow::ensure!(cam.fps > 0, "camera.fps must be > 0");
    }
    Ok(())
}

pub fn check_fc(fc: &FcConfig) -> Result<()> {
    anyhow::ensure!(BACKENDS.contains(&fc.backend.as_str()), "unknown fc.backend: {}", fc.backend);
    if fc.backend == "mavlink" {
        let m = fc.mavlink.as_ref().ok_or_else(|| anyhow::anyhow!("fc.backend=mavlink but no [fc.mavlink] section"))?;
        if m.url.is_none() && !m.autodetect {
            anyhow::ensure!(m.serial_dev.as_ref().map(|s| !s.is_empty()).unwrap_or(false), "fc.mavlink.serial_dev missing");
            anyhow::ensure!(m.baud.unwrap_or(0) > 0, "fc.mavlink.baud invalid");
        }
        anyhow::ensure!(m.takeoff_alt_m > 0.5 && m.takeoff_alt_m <= 10.0, "fc.mavlink.takeoff_alt_m should be 0.5..10");
    }
    Ok(())
}
