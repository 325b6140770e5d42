use anyhow::Result;
use mavlink::common::MavMessage;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::mav::MavLink;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 230400, 921600]
}

/// Try every device/baud pair until one produces a HEARTBEAT.
pub fn autodetect_fc(
    candidate_devs: Vec<String>,
    candidate_bauds: Vec<u32>,
    heartbeat_timeout: Duration,
) -> Result<AutodetectResult> {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        for baud in &candidate_bauds {
            let start = Instant::now();
            let (hb_seen, note) = match probe(&dev, *baud, heartbeat_timeout) {
                Ok(true) => (true, "heartbeat".to_string()),
                Ok(false) => (false, "no heartbeat".to_string()),
                Err(e) => {
                    warn!("fc autodetect probe failed dev={} baud={} err={:#}", dev, baud, e);
                    (false, format!("open/connect failed: {:#}", e))
                }
            };
            probes.push(ProbeResult {
                dev: dev.clone(),
                baud: *baud,
                hb_seen,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });
            if hb_seen {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, *baud)), probes });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

fn probe(dev: &str, baud: u32, timeout: Duration) -> Result<bool> {
    // the port closes when `link` drops, before the next baud is tried
    let link = MavLink::open(&format!("serial:{}:{}", dev, baud), 255, 190)?;
    Ok(wait_for_heartbeat(&link, timeout))
}

/// Listen until a HEARTBEAT arrives or `timeout` passes (overshooting by at
/// most one read timeout).
pub fn wait_for_heartbeat(link: &MavLink, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(MavMessage::HEARTBEAT(_)) = link.recv() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_devices_are_recorded_not_fatal() {
        let res = autodetect_fc(
            vec!["/dev/hawk-does-not-exist".into()],
            vec![57600, 115200],
            Duration::from_millis(10),
        )
        .unwrap();
        assert!(res.chosen.is_none());
        assert_eq!(res.probes.len(), 2);
        assert!(res.probes.iter().all(|p| !p.hb_seen && p.note.starts_with("open/connect failed")));
    }

    #[test]
    fn silent_port_gives_up_on_time() {
        let link = MavLink::open("udpin:127.0.0.1:0", 255, 190).unwrap();
        let start = Instant::now();
        assert!(!wait_for_heartbeat(&link, Duration::from_millis(150)));
        assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
    }

    #[test]
    fn heartbeat_is_recognised() {
        use mavlink::common::HEARTBEAT_DATA;
        use mavlink::{write_versioned_msg, MavHeader, MavlinkVersion};
        use std::net::UdpSocket;

        let ours = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = ours.local_addr().unwrap();
        let link = MavLink::udp(ours, None, 255, 190).unwrap();

        let mut frame = Vec::new();
        let hdr = MavHeader { system_id: 1, component_id: 1, sequence: 7 };
        write_versioned_msg(&mut frame, MavlinkVersion::V2, hdr, &MavMessage::HEARTBEAT(HEARTBEAT_DATA::default())).unwrap();
        UdpSocket::bind("127.0.0.1:0").unwrap().send_to(&frame, addr).unwrap();

        assert!(wait_for_heartbeat(&link, Duration::from_secs(2)));
    }
}
