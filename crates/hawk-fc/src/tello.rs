//! DJI Tello text SDK over UDP.
//!
//! Commands go to port 8889 and are answered with `ok` / `error ...`; the
//! drone broadcasts `key:value;` state datagrams to port 8890 about ten times
//! a second. `rc` stick commands are fire-and-forget.

use parking_lot::Mutex;
use serde::Deserialize;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::safety::{Lifecycle, LifecycleLimiter};
use crate::state::LinkStatus;
use crate::{Command, Vehicle, VehicleError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelloConfig {
    pub address: String,
    /// Local command port; 0 picks an ephemeral one.
    pub local_port: u16,
    pub state_port: u16,
    pub reply_timeout_ms: u64,
    /// No state datagram for this long means the link is gone.
    pub link_timeout_ms: u64,
}

impl Default for TelloConfig {
    fn default() -> Self {
        Self {
            address: "192.168.10.1:8889".into(),
            local_port: 8889,
            state_port: 8890,
            reply_timeout_ms: 7000,
            link_timeout_ms: 5000,
        }
    }
}

pub struct Tello {
    cfg: TelloConfig,
    sock: Option<UdpSocket>,
    peer: Option<SocketAddr>,
    status: Arc<Mutex<LinkStatus>>,
    stop: Arc<AtomicBool>,
    state_reader: Option<JoinHandle<()>>,
    limiter: LifecycleLimiter,
}

impl Tello {
    pub fn new(cfg: TelloConfig) -> Self {
        Self {
            cfg,
            sock: None,
            peer: None,
            status: Arc::new(Mutex::new(LinkStatus::default())),
            stop: Arc::new(AtomicBool::new(false)),
            state_reader: None,
            limiter: LifecycleLimiter::new(Duration::from_secs(2)),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status.lock().clone()
    }

    fn socket(&self) -> Result<(&UdpSocket, SocketAddr), VehicleError> {
        match (&self.sock, self.peer) {
            (Some(s), Some(p)) => Ok((s, p)),
            _ => Err(VehicleError::NotConnected),
        }
    }

    /// Send a command and wait for its reply.
    fn exchange(&self, cmd: &str) -> Result<String, VehicleError> {
        let (sock, peer) = self.socket()?;

        // drop replies that arrived after an earlier timeout
        sock.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        while sock.recv_from(&mut buf).is_ok() {}
        sock.set_nonblocking(false)?;

        sock.send_to(cmd.as_bytes(), peer)?;
        let deadline = Instant::now() + Duration::from_millis(self.cfg.reply_timeout_ms);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(VehicleError::Timeout(cmd.to_string()));
            }
            sock.set_read_timeout(Some(left))?;
            match sock.recv_from(&mut buf) {
                Ok((n, from)) if from.ip() == peer.ip() => {
                    let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                    debug!("tello: {} -> {}", cmd, reply);
                    return Ok(reply);
                }
                Ok((_, from)) => debug!("tello: ignoring datagram from {}", from),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(VehicleError::Timeout(cmd.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn expect_ok(&self, cmd: &str) -> Result<(), VehicleError> {
        let reply = self.exchange(cmd)?;
        if reply.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(VehicleError::Rejected { command: cmd.to_string(), reply })
        }
    }

    fn check_link(&self) -> Result<(), VehicleError> {
        let st = self.status.lock();
        if st.went_silent(Duration::from_millis(self.cfg.link_timeout_ms)) {
            return Err(VehicleError::LinkLost(format!(
                "no state for {:?}",
                st.rx_age().unwrap_or_default()
            )));
        }
        Ok(())
    }

    fn start_state_reader(&mut self) -> Result<(), VehicleError> {
        let sock = UdpSocket::bind(("0.0.0.0", self.cfg.state_port))?;
        sock.set_read_timeout(Some(Duration::from_millis(200)))?;
        let status = Arc::clone(&self.status);
        let stop = Arc::clone(&self.stop);

        let handle = std::thread::Builder::new()
            .name("tello-state".into())
            .spawn(move || {
                let mut buf = [0u8; 1024];
                while !stop.load(Ordering::Relaxed) {
                    match sock.recv_from(&mut buf) {
                        Ok((n, _)) => {
                            let line = String::from_utf8_lossy(&buf[..n]);
                            let state = parse_state(&line);
                            let mut st = status.lock();
                            st.connected = true;
                            st.last_rx = Some(Instant::now());
                            if state.battery.is_some() { st.battery_percent = state.battery; }
                            if state.height_cm.is_some() { st.height_cm = state.height_cm; }
                            st.last_msg = Some(line.trim().to_string());
                        }
                        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                        Err(e) => {
                            warn!("tello: state socket error: {}", e);
                            std::thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
            })?;
        self.state_reader = Some(handle);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelloState {
    pub battery: Option<u8>,
    pub height_cm: Option<i32>,
}

/// Parse a state datagram such as `pitch:0;roll:0;yaw:0;...;h:30;bat:87;...`.
pub fn parse_state(line: &str) -> TelloState {
    let mut out = TelloState::default();
    for field in line.trim().split(';') {
        let Some((k, v)) = field.split_once(':') else { continue };
        match k.trim() {
            "bat" => out.battery = v.trim().parse().ok(),
            "h" => out.height_cm = v.trim().parse().ok(),
            _ => {}
        }
    }
    out
}

pub fn rc_line(cmd: Command) -> String {
    format!("rc {} {} {} {}", cmd.left_right, cmd.forward_back, cmd.up_down, cmd.yaw)
}

impl Vehicle for Tello {
    fn connect(&mut self) -> Result<(), VehicleError> {
        let peer = self
            .cfg
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| VehicleError::Refused(format!("unresolvable address {}", self.cfg.address)))?;
        let sock = UdpSocket::bind(("0.0.0.0", self.cfg.local_port))?;
        self.sock = Some(sock);
        self.peer = Some(peer);
        self.stop.store(false, Ordering::Relaxed);

        // enter SDK mode
        self.expect_ok("command")?;
        self.start_state_reader()?;
        self.status.lock().connected = true;
        info!("tello: connected to {}", peer);
        Ok(())
    }

    fn takeoff(&mut self) -> Result<(), VehicleError> {
        if !self.limiter.allow(Lifecycle::Takeoff) {
            warn!("tello: takeoff rate-limited");
            return Ok(());
        }
        info!("tello: takeoff");
        self.expect_ok("takeoff")
    }

    fn land(&mut self) -> Result<(), VehicleError> {
        if !self.limiter.allow(Lifecycle::Land) {
            warn!("tello: land rate-limited");
            return Ok(());
        }
        info!("tello: land");
        self.expect_ok("land")
    }

    fn send_command(&mut self, cmd: Command) -> Result<(), VehicleError> {
        self.check_link()?;
        let (sock, peer) = self.socket()?;
        sock.send_to(rc_line(cmd).as_bytes(), peer)?;
        Ok(())
    }

    fn battery_percent(&mut self) -> Result<u8, VehicleError> {
        self.status.lock().battery_percent.ok_or(VehicleError::Unavailable("battery"))
    }

    fn height_cm(&mut self) -> Result<i32, VehicleError> {
        self.status.lock().height_cm.ok_or(VehicleError::Unavailable("height"))
    }

    fn start_video_stream(&mut self) -> Result<(), VehicleError> {
        self.expect_ok("streamon")
    }

    fn stop_video_stream(&mut self) -> Result<(), VehicleError> {
        self.expect_ok("streamoff")
    }

    fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.state_reader.take() {
            if h.join().is_err() {
                warn!("tello: state reader panicked");
            }
        }
        self.sock = None;
        self.status.lock().connected = false;
        info!("tello: disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_battery_and_height() {
        let s = parse_state("pitch:0;roll:0;yaw:12;vgx:0;vgy:0;vgz:0;templ:60;temph:62;tof:10;h:30;bat:87;baro:120.5;time:0;agx:1.0;agy:0.0;agz:-999.0;\r\n");
        assert_eq!(s, TelloState { battery: Some(87), height_cm: Some(30) });
    }

    #[test]
    fn garbage_state_yields_nothing() {
        assert_eq!(parse_state("hello"), TelloState::default());
        assert_eq!(parse_state("bat:;h:x;"), TelloState::default());
    }

    #[test]
    fn rc_line_keeps_axis_order() {
        let cmd = Command { left_right: -100, forward_back: 20, up_down: 0, yaw: 60 };
        assert_eq!(rc_line(cmd), "rc -100 20 0 60");
    }

    #[test]
    fn commands_before_connect_fail_without_io() {
        let mut t = Tello::new(TelloConfig::default());
        let err = t.send_command(Command::ZERO).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(t.battery_percent(), Err(VehicleError::Unavailable(_))));
    }

    #[test]
    fn exchange_against_fake_drone() {
        let drone = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = drone.local_addr().unwrap();
        let fake = std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (n, from) = drone.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"command");
            drone.send_to(b"ok", from).unwrap();
            let (n, from) = drone.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"takeoff");
            drone.send_to(b"error Not joystick", from).unwrap();
        });

        let mut t = Tello::new(TelloConfig {
            address: addr.to_string(),
            local_port: 0,
            state_port: 0,
            reply_timeout_ms: 2000,
            link_timeout_ms: 5000,
        });
        t.connect().unwrap();
        let err = t.takeoff().unwrap_err();
        assert!(matches!(err, VehicleError::Rejected { .. }));
        fake.join().unwrap();
        t.disconnect();
    }
}
