//! Operator input: held movement keys plus the one-shot session triggers
//! (takeoff, land/quit, mode switch) from the control surface.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::autopilot::ModeRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// forward / back
    W,
    S,
    /// left / right
    A,
    D,
    /// up / down
    I,
    K,
    /// yaw left / right
    J,
    L,
    /// autopilot SEARCH
    Zero,
    /// autopilot OFF
    One,
    /// autopilot TRACK
    Two,
    /// takeoff
    Five,
    /// land and quit
    Space,
    Esc,
}

impl Key {
    pub const ALL: [Key; 14] = [
        Key::W, Key::S, Key::A, Key::D, Key::I, Key::K, Key::J, Key::L,
        Key::Zero, Key::One, Key::Two, Key::Five, Key::Space, Key::Esc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Key::W => "w",
            Key::S => "s",
            Key::A => "a",
            Key::D => "d",
            Key::I => "i",
            Key::K => "k",
            Key::J => "j",
            Key::L => "l",
            Key::Zero => "0",
            Key::One => "1",
            Key::Two => "2",
            Key::Five => "5",
            Key::Space => "space",
            Key::Esc => "esc",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown key `{0}`")]
pub struct UnknownKey(pub String);

impl FromStr for Key {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Key::ALL
            .into_iter()
            .find(|k| k.name() == lower)
            .ok_or_else(|| UnknownKey(s.to_string()))
    }
}

/// Polled by the control loop once per tick.
pub trait ManualInput: Send + Sync {
    fn is_pressed(&self, key: Key) -> bool;
}

/// Keys pressed remotely (e.g. over HTTP). A press counts as held for the
/// hold window, so a client repeating presses faster than that holds a key.
#[derive(Debug)]
pub struct RemoteKeys {
    hold: Duration,
    until: Mutex<HashMap<Key, Instant>>,
}

impl RemoteKeys {
    pub fn new(hold: Duration) -> Self {
        Self { hold, until: Mutex::new(HashMap::new()) }
    }

    pub fn press(&self, key: Key) {
        self.until.lock().insert(key, Instant::now() + self.hold);
    }

    pub fn release(&self, key: Key) {
        self.until.lock().remove(&key);
    }
}

impl ManualInput for RemoteKeys {
    fn is_pressed(&self, key: Key) -> bool {
        matches!(self.until.lock().get(&key), Some(t) if *t > Instant::now())
    }
}

/// No operator attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl ManualInput for NoInput {
    fn is_pressed(&self, _key: Key) -> bool {
        false
    }
}

/// Session triggers from the control surface.
///
/// Takeoff and mode requests are consumed by the control loop; a land
/// request stays set for the rest of the session.
#[derive(Debug, Default)]
pub struct SessionTriggers {
    takeoff: AtomicBool,
    land: AtomicBool,
    mode: Mutex<Option<ModeRequest>>,
}

impl SessionTriggers {
    pub fn request_takeoff(&self) {
        self.takeoff.store(true, Ordering::SeqCst);
    }

    pub fn request_land(&self) {
        self.land.store(true, Ordering::SeqCst);
    }

    pub fn request_mode(&self, mode: ModeRequest) {
        *self.mode.lock() = Some(mode);
    }

    pub fn take_takeoff(&self) -> bool {
        self.takeoff.swap(false, Ordering::SeqCst)
    }

    pub fn land_requested(&self) -> bool {
        self.land.load(Ordering::SeqCst)
    }

    pub fn take_mode(&self) -> Option<ModeRequest> {
        self.mode.lock().take()
    }
}
