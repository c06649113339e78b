//! User-facing control surfaces. Each one turns its own input into
//! `ControlEvent`s for the reader service.
//!
//! - `terminal`: line commands on stdin
//! - `hotkey`: global evdev key combos
//! - `api`: local HTTP control API

pub mod api;
pub mod hotkey;
pub mod terminal;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    TogglePlayPause,
    Stop,
    Next,
    Previous,
    SetVoice(String),
    SetRate(f32),
    SetPitch(f32),
    Quit,
}
