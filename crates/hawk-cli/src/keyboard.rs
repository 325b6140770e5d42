//! Terminal keyboard as manual input.
//!
//! Terminals report presses (and auto-repeat) but not releases, so each key
//! event presses the key in `RemoteKeys` for its hold window.

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use hawk_pilot::input::{Key, RemoteKeys};
use hawk_pilot::StopSignal;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

pub fn spawn(keys: Arc<RemoteKeys>, stop: StopSignal) -> Result<JoinHandle<()>> {
    terminal::enable_raw_mode()?;
    let handle = std::thread::Builder::new().name("keyboard".into()).spawn(move || {
        while !stop.is_set() {
            match event::poll(Duration::from_millis(50)) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("keyboard: poll failed: {}", e);
                    break;
                }
            }
            let Ok(Event::Key(k)) = event::read() else { continue };
            if k.kind == KeyEventKind::Release {
                continue;
            }
            // raw mode swallows SIGINT
            let key = if k.code == KeyCode::Char('c') && k.modifiers.contains(KeyModifiers::CONTROL) {
                Some(Key::Esc)
            } else {
                map_key(k.code)
            };
            if let Some(key) = key {
                debug!("keyboard: {}", key.name());
                keys.press(key);
            }
        }
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("keyboard: could not restore terminal: {}", e);
        }
    });
    match handle {
        Ok(h) => Ok(h),
        Err(e) => {
            let _ = terminal::disable_raw_mode();
            Err(e.into())
        }
    }
}

fn map_key(code: KeyCode) -> Option<Key> {
    match code {
        KeyCode::Esc => Some(Key::Esc),
        KeyCode::Char(' ') => Some(Key::Space),
        KeyCode::Char(c) => c.to_string().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_flight_keys() {
        assert_eq!(map_key(KeyCode::Char('W')), Some(Key::W));
        assert_eq!(map_key(KeyCode::Char('5')), Some(Key::Five));
        assert_eq!(map_key(KeyCode::Char(' ')), Some(Key::Space));
        assert_eq!(map_key(KeyCode::Esc), Some(Key::Esc));
        assert_eq!(map_key(KeyCode::Char('q')), None);
        assert_eq!(map_key(KeyCode::Enter), None);
    }
}
