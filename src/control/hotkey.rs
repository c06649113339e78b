//! Global hotkeys using evdev.
//!
//! Monitors all keyboard devices for one configurable combo per action
//! and sends the action when its combo becomes fully pressed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use evdev::{Device, EventType, InputEventKind, Key};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ControlEvent;
use crate::config::HotkeyConfig;
use crate::service::ReaderEvent;

const KEY_NAMES: &[(&str, Key)] = &[
    ("KEY_LEFTMETA", Key::KEY_LEFTMETA),
    ("KEY_RIGHTMETA", Key::KEY_RIGHTMETA),
    ("KEY_LEFTALT", Key::KEY_LEFTALT),
    ("KEY_RIGHTALT", Key::KEY_RIGHTALT),
    ("KEY_LEFTCTRL", Key::KEY_LEFTCTRL),
    ("KEY_RIGHTCTRL", Key::KEY_RIGHTCTRL),
    ("KEY_LEFTSHIFT", Key::KEY_LEFTSHIFT),
    ("KEY_RIGHTSHIFT", Key::KEY_RIGHTSHIFT),
    ("KEY_SPACE", Key::KEY_SPACE),
    ("KEY_LEFT", Key::KEY_LEFT),
    ("KEY_RIGHT", Key::KEY_RIGHT),
    ("KEY_UP", Key::KEY_UP),
    ("KEY_DOWN", Key::KEY_DOWN),
    ("KEY_PAGEUP", Key::KEY_PAGEUP),
    ("KEY_PAGEDOWN", Key::KEY_PAGEDOWN),
    ("KEY_B", Key::KEY_B),
    ("KEY_N", Key::KEY_N),
    ("KEY_P", Key::KEY_P),
    ("KEY_S", Key::KEY_S),
    ("KEY_PLAYPAUSE", Key::KEY_PLAYPAUSE),
    ("KEY_STOPCD", Key::KEY_STOPCD),
    ("KEY_NEXTSONG", Key::KEY_NEXTSONG),
    ("KEY_PREVIOUSSONG", Key::KEY_PREVIOUSSONG),
    ("KEY_F7", Key::KEY_F7),
    ("KEY_F8", Key::KEY_F8),
    ("KEY_F9", Key::KEY_F9),
    ("KEY_F10", Key::KEY_F10),
];

/// Resolve a key name like "KEY_LEFTMETA" to an evdev Key code.
fn resolve_key(name: &str) -> Option<Key> {
    let key = KEY_NAMES.iter().find(|(n, _)| *n == name).map(|(_, k)| *k);
    if key.is_none() {
        warn!("Unknown key name: {name}");
    }
    key
}

fn resolve_combo(names: &[String]) -> HashSet<Key> {
    names.iter().filter_map(|s| resolve_key(s)).collect()
}

#[derive(Clone)]
struct Binding {
    combo: HashSet<Key>,
    event: ControlEvent,
}

/// Keys held across all devices, and which bindings are currently held down.
#[derive(Default)]
struct HotkeyState {
    pressed_keys: HashSet<Key>,
    active: HashSet<usize>,
}

impl HotkeyState {
    /// Update for one key transition; returns bindings that just became active.
    fn apply(&mut self, key: Key, pressed: bool, bindings: &[Binding]) -> Vec<usize> {
        if pressed {
            self.pressed_keys.insert(key);
        } else {
            self.pressed_keys.remove(&key);
        }

        let mut fired = Vec::new();
        for (i, binding) in bindings.iter().enumerate() {
            let held = binding.combo.is_subset(&self.pressed_keys);
            if held && self.active.insert(i) {
                fired.push(i);
            } else if !held {
                self.active.remove(&i);
            }
        }
        fired
    }
}

pub struct HotkeyMonitor {
    bindings: Vec<Binding>,
    state: Arc<Mutex<HotkeyState>>,
    tx: mpsc::UnboundedSender<ReaderEvent>,
}

impl HotkeyMonitor {
    pub fn new(config: &HotkeyConfig, tx: mpsc::UnboundedSender<ReaderEvent>) -> Self {
        let actions = [
            (&config.play_pause, ControlEvent::TogglePlayPause),
            (&config.stop, ControlEvent::Stop),
            (&config.next, ControlEvent::Next),
            (&config.previous, ControlEvent::Previous),
        ];

        let bindings: Vec<Binding> = actions
            .into_iter()
            .filter_map(|(names, event)| {
                let combo = resolve_combo(names);
                (!combo.is_empty()).then_some(Binding { combo, event })
            })
            .collect();

        info!("Hotkeys: {} action(s) bound", bindings.len());

        Self {
            bindings,
            state: Arc::new(Mutex::new(HotkeyState::default())),
            tx,
        }
    }

    /// Find all keyboard input devices.
    fn find_keyboards() -> Vec<Device> {
        evdev::enumerate()
            .filter_map(|(_path, device)| {
                let is_keyboard = device
                    .supported_keys()
                    .is_some_and(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER));
                is_keyboard.then(|| {
                    info!("Found keyboard: {}", device.name().unwrap_or("unknown"));
                    device
                })
            })
            .collect()
    }

    async fn monitor_device(
        device: Device,
        bindings: Vec<Binding>,
        state: Arc<Mutex<HotkeyState>>,
        tx: mpsc::UnboundedSender<ReaderEvent>,
    ) {
        let name = device.name().unwrap_or("unknown").to_string();
        debug!("Monitoring {name}");

        let mut events = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot create event stream for {name}: {e}");
                return;
            }
        };

        loop {
            let event = match events.next_event().await {
                Ok(event) => event,
                Err(e) => {
                    warn!("Device {name} disconnected: {e}");
                    break;
                }
            };
            if event.event_type() != EventType::KEY {
                continue;
            }
            let InputEventKind::Key(key) = event.kind() else {
                continue;
            };

            // 0 = release, 1 = press, 2 = repeat
            let pressed = match event.value() {
                1 => true,
                0 => false,
                _ => continue,
            };

            let fired = match state.lock() {
                Ok(mut state) => state.apply(key, pressed, &bindings),
                Err(_) => break,
            };
            for i in fired {
                debug!("Hotkey: {:?}", bindings[i].event);
                if tx.send(bindings[i].event.clone().into()).is_err() {
                    return;
                }
            }
        }
    }

    /// Monitor all keyboards until every device disconnects.
    pub async fn run(self) {
        if self.bindings.is_empty() {
            return;
        }

        let keyboards = Self::find_keyboards();
        if keyboards.is_empty() {
            warn!(
                "No keyboards found, hotkeys disabled. Make sure you're in the 'input' group: \
                 sudo usermod -aG input $USER"
            );
            return;
        }

        info!("Monitoring {} keyboard(s) for hotkeys", keyboards.len());

        let handles: Vec<_> = keyboards
            .into_iter()
            .map(|device| {
                tokio::spawn(Self::monitor_device(
                    device,
                    self.bindings.clone(),
                    Arc::clone(&self.state),
                    self.tx.clone(),
                ))
            })
            .collect();

        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> Vec<Binding> {
        vec![
            Binding {
                combo: HashSet::from([Key::KEY_LEFTMETA, Key::KEY_SPACE]),
                event: ControlEvent::TogglePlayPause,
            },
            Binding {
                combo: HashSet::from([Key::KEY_LEFTMETA, Key::KEY_RIGHT]),
                event: ControlEvent::Next,
            },
        ]
    }

    #[test]
    fn fires_once_per_full_combo() {
        let bindings = bindings();
        let mut state = HotkeyState::default();
        assert!(state.apply(Key::KEY_LEFTMETA, true, &bindings).is_empty());
        assert_eq!(state.apply(Key::KEY_SPACE, true, &bindings), [0]);
        // Still held: no repeat.
        assert!(state.apply(Key::KEY_LEFTSHIFT, true, &bindings).is_empty());

        assert!(state.apply(Key::KEY_SPACE, false, &bindings).is_empty());
        assert_eq!(state.apply(Key::KEY_RIGHT, true, &bindings), [1]);
        assert_eq!(state.apply(Key::KEY_SPACE, true, &bindings), [0]);
    }

    #[test]
    fn resolves_known_names_only() {
        assert_eq!(resolve_key("KEY_PLAYPAUSE"), Some(Key::KEY_PLAYPAUSE));
        assert_eq!(resolve_key("KEY_NOPE"), None);
        let combo = resolve_combo(&["KEY_LEFTALT".into(), "KEY_BOGUS".into()]);
        assert_eq!(combo, HashSet::from([Key::KEY_LEFTALT]));
    }

    #[test]
    fn default_config_binds_every_action() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let monitor = HotkeyMonitor::new(&HotkeyConfig::default(), tx);
        assert_eq!(monitor.bindings.len(), 4);
    }
}
