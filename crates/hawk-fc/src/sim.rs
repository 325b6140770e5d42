use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info};

use crate::{Command, Vehicle, VehicleError};

/// In-process vehicle for dry runs: accepts everything and pretends to fly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub battery_percent: u8,
    /// Battery lost per minute of flight.
    pub drain_per_min: f32,
    pub takeoff_height_cm: i32,
    /// Climb rate at full up_down stick.
    pub climb_cm_s: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { battery_percent: 100, drain_per_min: 8.0, takeoff_height_cm: 80, climb_cm_s: 100.0 }
    }
}

pub struct SimVehicle {
    cfg: SimConfig,
    connected: bool,
    flying: bool,
    height_cm: f32,
    battery: f32,
    last_update: Instant,
    last_cmd: Command,
}

impl SimVehicle {
    pub fn new(cfg: SimConfig) -> Self {
        Self {
            battery: cfg.battery_percent as f32,
            cfg,
            connected: false,
            flying: false,
            height_cm: 0.0,
            last_update: Instant::now(),
            last_cmd: Command::ZERO,
        }
    }

    pub fn flying(&self) -> bool {
        self.flying
    }

    pub fn last_command(&self) -> Command {
        self.last_cmd
    }

    /// Advance height and battery using the last stick command.
    fn integrate(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f32();
        self.last_update = now;
        if !self.flying {
            return;
        }
        self.height_cm = (self.height_cm + self.last_cmd.up_down as f32 / 100.0 * self.cfg.climb_cm_s * dt).max(0.0);
        self.battery = (self.battery - self.cfg.drain_per_min * dt / 60.0).max(0.0);
    }

    fn ensure_connected(&self) -> Result<(), VehicleError> {
        if self.connected { Ok(()) } else { Err(VehicleError::NotConnected) }
    }
}

impl Vehicle for SimVehicle {
    fn connect(&mut self) -> Result<(), VehicleError> {
        self.connected = true;
        self.last_update = Instant::now();
        info!("sim: connected (battery {}%)", self.cfg.battery_percent);
        Ok(())
    }

    fn takeoff(&mut self) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        self.integrate();
        self.flying = true;
        self.height_cm = self.cfg.takeoff_height_cm as f32;
        info!("sim: takeoff to {}cm", self.cfg.takeoff_height_cm);
        Ok(())
    }

    fn land(&mut self) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        self.integrate();
        self.flying = false;
        self.height_cm = 0.0;
        self.last_cmd = Command::ZERO;
        info!("sim: landed");
        Ok(())
    }

    fn send_command(&mut self, cmd: Command) -> Result<(), VehicleError> {
        self.ensure_connected()?;
        self.integrate();
        if cmd != self.last_cmd {
            debug!(
                "sim: rc lr={} fb={} ud={} yaw={}",
                cmd.left_right, cmd.forward_back, cmd.up_down, cmd.yaw
            );
        }
        self.last_cmd = cmd;
        Ok(())
    }

    fn battery_percent(&mut self) -> Result<u8, VehicleError> {
        self.ensure_connected()?;
        self.integrate();
        Ok(self.battery.round() as u8)
    }

    fn height_cm(&mut self) -> Result<i32, VehicleError> {
        self.ensure_connected()?;
        self.integrate();
        Ok(self.height_cm.round() as i32)
    }

    fn start_video_stream(&mut self) -> Result<(), VehicleError> {
        self.ensure_connected()
    }

    fn stop_video_stream(&mut self) -> Result<(), VehicleError> {
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        info!("sim: disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn takeoff_then_climb() {
        let mut v = SimVehicle::new(SimConfig { climb_cm_s: 1000.0, ..Default::default() });
        assert!(v.takeoff().unwrap_err().is_fatal());
        v.connect().unwrap();
        v.takeoff().unwrap();
        assert_eq!(v.height_cm().unwrap(), 80);

        v.send_command(Command { up_down: 100, ..Command::ZERO }).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(v.height_cm().unwrap() > 80);

        v.land().unwrap();
        assert_eq!(v.height_cm().unwrap(), 0);
        assert!(!v.flying());
    }

    #[test]
    fn battery_only_drains_in_flight() {
        let mut v = SimVehicle::new(SimConfig { drain_per_min: 60_000.0, ..Default::default() });
        v.connect().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(v.battery_percent().unwrap(), 100);
        v.takeoff().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(v.battery_percent().unwrap() < 100);
    }
}
