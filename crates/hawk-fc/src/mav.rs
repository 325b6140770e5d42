use anyhow::Context;
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
        GLOBAL_POSITION_INT_DATA, HEARTBEAT_DATA, MANUAL_CONTROL_DATA, SYS_STATUS_DATA,
    },
    error::MessageReadError,
    read_versioned_msg, write_versioned_msg, MavHeader, MavlinkVersion,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io::{BufReader, Cursor, ErrorKind, Write};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tokio_serial::SerialPort;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::autodetect::{autodetect_fc, default_candidate_bauds, default_candidate_devs};
use crate::safety::{Lifecycle, LifecycleLimiter};
use crate::state::LinkStatus;
use crate::{Command, Vehicle, VehicleError};

// ArduCopter custom modes
const COPTER_GUIDED: u32 = 4;
const COPTER_LOITER: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct MavlinkConfig {
    /// If true, probe candidate serial ports/bauds and take the first that
    /// yields a HEARTBEAT.
    #[serde(default)]
    pub autodetect: bool,

    /// `udpin:0.0.0.0:14550` or `udpout:<host>:<port>`;
    /// takes precedence over the serial settings.
    pub url: Option<String>,

    /// When autodetect=false: fixed port config
    pub serial_dev: Option<String>,
    pub baud: Option<u32>,

    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per probe attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (companion side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Refuse to fly before the FC heartbeat was seen
    #[serde(default = "yes")]
    pub require_heartbeat: bool,

    /// Companion heartbeat rate. Default 1Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// FC heartbeat silence that counts as link loss. Default 3s.
    pub link_timeout_ms: Option<u64>,

    #[serde(default = "default_takeoff_alt")]
    pub takeoff_alt_m: f32,

    /// After takeoff, switch to this custom mode so stick input applies.
    pub stick_mode: Option<u32>,
    /// Delay between takeoff and the stick-mode switch. Default 5s.
    pub stick_mode_delay_ms: Option<u64>,
}

fn yes() -> bool { true }
fn default_takeoff_alt() -> f32 { 1.5 }

impl MavlinkConfig {
    fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms.unwrap_or(3000))
    }

    /// Connection string to open, running autodetect when configured.
    pub fn resolve_url(&self) -> anyhow::Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let (dev, baud) = if self.autodetect {
            let res = autodetect_fc(
                self.candidate_devs.clone().unwrap_or_else(default_candidate_devs),
                self.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds),
                Duration::from_millis(self.heartbeat_timeout_ms.unwrap_or(1500)),
            )?;
            res.chosen.context("fc autodetect failed: no heartbeat found")?
        } else {
            let dev = self.serial_dev.clone().context("fc.mavlink.serial_dev missing (autodetect=false)")?;
            let baud = self.baud.context("fc.mavlink.baud missing (autodetect=false)")?;
            (dev, baud)
        };
        Ok(format!("serial:{}:{}", dev, baud))
    }
}

/// Upper bound on a single read, so readers notice a stop request.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

enum Transport {
    Serial {
        rx: Mutex<BufReader<Box<dyn SerialPort>>>,
        tx: Mutex<Box<dyn SerialPort>>,
    },
    Udp {
        sock: UdpSocket,
        // rest of the last datagram; one datagram may carry several frames
        rx: Mutex<Cursor<Vec<u8>>>,
        peer: Mutex<Option<SocketAddr>>,
        // udpin: answer whoever spoke last
        learn_peer: bool,
    },
}

/// A MAVLink v2 link (serial or UDP) with our own header/sequence.
///
/// Every read gives up after `READ_TIMEOUT`, and dropping the last handle
/// closes the port.
pub struct MavLink {
    transport: Transport,
    sys_id: u8,
    comp_id: u8,
    seq: AtomicU8,
}

impl MavLink {
    /// `serial:<dev>:<baud>`, `udpin:<addr>:<port>` or `udpout:<addr>:<port>`.
    pub fn open(url: &str, sys_id: u8, comp_id: u8) -> anyhow::Result<Self> {
        let transport = match url.split_once(':') {
            Some(("serial", rest)) => {
                let (dev, baud) = rest.rsplit_once(':').with_context(|| format!("no baud in {}", url))?;
                let baud: u32 = baud.parse().with_context(|| format!("bad baud in {}", url))?;
                let port = tokio_serial::new(dev, baud)
                    .timeout(READ_TIMEOUT)
                    .open()
                    .with_context(|| format!("open fc serial device {}", dev))?;
                let tx = port.try_clone().with_context(|| format!("clone fc serial device {}", dev))?;
                Transport::Serial { rx: Mutex::new(BufReader::new(port)), tx: Mutex::new(tx) }
            }
            Some(("udpin", addr)) => {
                let sock = UdpSocket::bind(addr).with_context(|| format!("bind mavlink udp {}", addr))?;
                udp_transport(sock, None)?
            }
            Some(("udpout", addr)) => {
                let peer = addr
                    .to_socket_addrs()
                    .with_context(|| format!("resolve {}", addr))?
                    .next()
                    .with_context(|| format!("no address for {}", addr))?;
                let sock = UdpSocket::bind(("0.0.0.0", 0)).context("bind mavlink udp")?;
                udp_transport(sock, Some(peer))?
            }
            _ => anyhow::bail!("unsupported mavlink url {} (serial:, udpin:, udpout:)", url),
        };
        Ok(Self { transport, sys_id, comp_id, seq: AtomicU8::new(0) })
    }

    /// Link over an already bound socket. Without `peer` it answers whoever spoke last.
    pub fn udp(sock: UdpSocket, peer: Option<SocketAddr>, sys_id: u8, comp_id: u8) -> anyhow::Result<Self> {
        Ok(Self { transport: udp_transport(sock, peer)?, sys_id, comp_id, seq: AtomicU8::new(0) })
    }

    /// Next valid message, or `None` if none arrived within `READ_TIMEOUT`.
    pub fn recv(&self) -> Option<MavMessage> {
        let res = match &self.transport {
            Transport::Serial { rx, .. } => read_versioned_msg(&mut *rx.lock(), MavlinkVersion::V2),
            Transport::Udp { sock, rx, peer, learn_peer } => {
                let mut buf = rx.lock();
                if buf.position() as usize >= buf.get_ref().len() {
                    let mut datagram = vec![0u8; 2048];
                    match sock.recv_from(&mut datagram) {
                        Ok((n, src)) => {
                            datagram.truncate(n);
                            *buf = Cursor::new(datagram);
                            if *learn_peer {
                                *peer.lock() = Some(src);
                            }
                        }
                        Err(e) if is_timeout(&e) => return None,
                        Err(e) => {
                            debug!("mavlink recv: {}", e);
                            return None;
                        }
                    }
                }
                read_versioned_msg(&mut *buf, MavlinkVersion::V2)
            }
        };
        match res {
            Ok((_hdr, msg)) => Some(msg),
            Err(MessageReadError::Io(e)) if is_timeout(&e) || e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => {
                debug!("mavlink recv: {}", e);
                None
            }
        }
    }

    pub fn send(&self, msg: &MavMessage) -> Result<(), VehicleError> {
        let hdr = MavHeader {
            system_id: self.sys_id,
            component_id: self.comp_id,
            sequence: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        let mut frame = Vec::with_capacity(280);
        write_versioned_msg(&mut frame, MavlinkVersion::V2, hdr, msg)
            .map_err(|e| VehicleError::Mavlink(e.to_string()))?;
        match &self.transport {
            Transport::Serial { tx, .. } => tx.lock().write_all(&frame)?,
            Transport::Udp { sock, peer, .. } => {
                let to = (*peer.lock()).ok_or(VehicleError::Unavailable("mavlink peer"))?;
                sock.send_to(&frame, to)?;
            }
        }
        Ok(())
    }

    pub fn send_heartbeat(&self) -> Result<(), VehicleError> {
        self.send(&MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }))
    }
}

fn udp_transport(sock: UdpSocket, peer: Option<SocketAddr>) -> anyhow::Result<Transport> {
    sock.set_read_timeout(Some(READ_TIMEOUT)).context("set mavlink udp read timeout")?;
    Ok(Transport::Udp {
        sock,
        rx: Mutex::new(Cursor::new(Vec::new())),
        learn_peer: peer.is_none(),
        peer: Mutex::new(peer),
    })
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Fold one incoming message into the shared status.
pub fn apply_message(st: &mut LinkStatus, msg: &MavMessage) {
    st.last_rx = Some(Instant::now());
    match msg {
        MavMessage::HEARTBEAT(_) => {
            st.connected = true;
            st.last_heartbeat = Some(Instant::now());
        }
        MavMessage::SYS_STATUS(status) => apply_sys_status(st, status),
        MavMessage::GLOBAL_POSITION_INT(pos) => apply_position(st, pos),
        _ => {}
    }
}

fn apply_sys_status(st: &mut LinkStatus, status: &SYS_STATUS_DATA) {
    // millivolts; u16::MAX means unknown
    if status.voltage_battery != u16::MAX {
        st.battery_voltage = Some(status.voltage_battery as f32 / 1000.0);
    }
    // percent, -1 means unknown
    if (0..=100).contains(&status.battery_remaining) {
        st.battery_percent = Some(status.battery_remaining as u8);
    }
}

fn apply_position(st: &mut LinkStatus, pos: &GLOBAL_POSITION_INT_DATA) {
    // relative_alt is in millimetres above home
    st.height_cm = Some(pos.relative_alt / 10);
}

/// Sticks to MANUAL_CONTROL: x pitch, y roll, r yaw in -1000..1000,
/// z throttle 0..1000 centred on 500.
pub fn manual_control(target: u8, cmd: Command) -> MANUAL_CONTROL_DATA {
    MANUAL_CONTROL_DATA {
        target,
        x: cmd.forward_back as i16 * 10,
        y: cmd.left_right as i16 * 10,
        z: 500 + cmd.up_down as i16 * 5,
        r: cmd.yaw as i16 * 10,
        ..Default::default()
    }
}

/// MAVLink flight controller (ArduPilot) reached over serial or UDP.
pub struct MavVehicle {
    cfg: MavlinkConfig,
    link: Option<Arc<MavLink>>,
    status: Arc<Mutex<LinkStatus>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    limiter: LifecycleLimiter,
    stick_mode_at: Option<Instant>,
}

impl MavVehicle {
    pub fn new(cfg: MavlinkConfig) -> Self {
        Self {
            cfg,
            link: None,
            status: Arc::new(Mutex::new(LinkStatus::default())),
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
            limiter: LifecycleLimiter::new(Duration::from_secs(2)),
            stick_mode_at: None,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status.lock().clone()
    }

    fn link(&self) -> Result<&MavLink, VehicleError> {
        self.link.as_deref().ok_or(VehicleError::NotConnected)
    }

    fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<(), VehicleError> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.cfg.target_sys,
            target_component: self.cfg.target_comp,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        };
        self.link()?.send(&MavMessage::COMMAND_LONG(cmd))
    }

    fn set_mode(&self, custom_mode: u32) -> Result<(), VehicleError> {
        let flag = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        self.command_long(MavCmd::MAV_CMD_DO_SET_MODE, [flag, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    /// Heartbeat gate: fatal once the FC went quiet, refused before it spoke.
    fn check_link(&self) -> Result<(), VehicleError> {
        let st = self.status.lock();
        match st.hb_age() {
            Some(age) if age > self.cfg.link_timeout() => {
                Err(VehicleError::LinkLost(format!("no FC heartbeat for {:?}", age)))
            }
            None if self.cfg.require_heartbeat => Err(VehicleError::Refused("no heartbeat seen yet".into())),
            _ => Ok(()),
        }
    }

    fn start_reader(&mut self, link: Arc<MavLink>) -> Result<(), VehicleError> {
        let status = Arc::clone(&self.status);
        let stop = Arc::clone(&self.stop);
        let hb_hz = self.cfg.send_heartbeat_hz.unwrap_or(1.0).max(0.2);

        // mavlink recv blocks, so the reader gets its own thread
        let handle = std::thread::Builder::new()
            .name("mavlink-rx".into())
            .spawn(move || {
                let hb_interval = Duration::from_secs_f32(1.0 / hb_hz);
                let mut last_hb_send = Instant::now() - hb_interval;

                while !stop.load(Ordering::Relaxed) {
                    if last_hb_send.elapsed() >= hb_interval {
                        if let Err(e) = link.send_heartbeat() {
                            debug!("mavlink: heartbeat send failed: {}", e);
                        }
                        last_hb_send = Instant::now();
                    }
                    match link.recv() {
                        Some(msg) => apply_message(&mut status.lock(), &msg),
                        None => std::thread::sleep(Duration::from_millis(10)),
                    }
                }
            })?;
        self.reader = Some(handle);
        Ok(())
    }
}

impl Vehicle for MavVehicle {
    fn connect(&mut self) -> Result<(), VehicleError> {
        let url = self.cfg.resolve_url().map_err(|e| VehicleError::Refused(format!("{:#}", e)))?;
        let link = MavLink::open(&url, self.cfg.sys_id, self.cfg.comp_id)
            .map_err(|e| VehicleError::Refused(format!("{:#}", e)))?;
        if self.link.is_some() {
            self.disconnect();
        }
        let link = Arc::new(link);
        self.stop.store(false, Ordering::Relaxed);
        self.start_reader(Arc::clone(&link))?;
        self.link = Some(link);
        info!("FC: mavlink link open on {}", url);
        Ok(())
    }

    fn takeoff(&mut self) -> Result<(), VehicleError> {
        self.check_link()?;
        if !self.limiter.allow(Lifecycle::Takeoff) {
            warn!("FC: takeoff rate-limited");
            return Ok(());
        }
        info!("FC: GUIDED, arm, takeoff to {:.1}m", self.cfg.takeoff_alt_m);
        self.set_mode(COPTER_GUIDED)?;
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])?;
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, f32::NAN, 0.0, 0.0, self.cfg.takeoff_alt_m])?;
        self.stick_mode_at = Some(Instant::now() + Duration::from_millis(self.cfg.stick_mode_delay_ms.unwrap_or(5000)));
        Ok(())
    }

    fn land(&mut self) -> Result<(), VehicleError> {
        if !self.limiter.allow(Lifecycle::Land) {
            warn!("FC: land rate-limited");
            return Ok(());
        }
        info!("FC: sending LAND");
        self.stick_mode_at = None;
        self.command_long(MavCmd::MAV_CMD_NAV_LAND, [0.0, 0.0, 0.0, f32::NAN, 0.0, 0.0, 0.0])
    }

    fn send_command(&mut self, cmd: Command) -> Result<(), VehicleError> {
        self.check_link()?;
        if let Some(at) = self.stick_mode_at {
            if Instant::now() >= at {
                let mode = self.cfg.stick_mode.unwrap_or(COPTER_LOITER);
                info!("FC: switching to custom mode {} for stick input", mode);
                self.set_mode(mode)?;
                self.stick_mode_at = None;
            }
        }
        let target = self.cfg.target_sys;
        self.link()?.send(&MavMessage::MANUAL_CONTROL(manual_control(target, cmd)))
    }

    fn battery_percent(&mut self) -> Result<u8, VehicleError> {
        self.status.lock().battery_percent.ok_or(VehicleError::Unavailable("battery"))
    }

    fn height_cm(&mut self) -> Result<i32, VehicleError> {
        self.status.lock().height_cm.ok_or(VehicleError::Unavailable("height"))
    }

    // video comes from the companion camera, not the FC
    fn start_video_stream(&mut self) -> Result<(), VehicleError> { Ok(()) }
    fn stop_video_stream(&mut self) -> Result<(), VehicleError> { Ok(()) }

    fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // reads time out, so the reader sees the flag within READ_TIMEOUT
        if let Some(h) = self.reader.take() {
            if h.join().is_err() {
                warn!("FC: mavlink reader panicked");
            }
        }
        // last handle; closes the port
        self.link = None;
        self.status.lock().connected = false;
        info!("FC: mavlink link closed");
    }
}
