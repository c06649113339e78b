//! Line commands on stdin.
//!
//! `p`/Enter toggle, `s` stop, `n` next, `b` back, `+`/`-` rate,
//! `>`/`<` pitch, `v <id>` voice, `q` quit.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::ControlEvent;
use crate::reader::controller::PlaybackSnapshot;
use crate::service::ReaderEvent;

const STEP: f32 = 0.1;

pub const HELP: &str = "Keys: [p]lay/pause  [s]top  [n]ext  [b]ack  +/- rate  >/< pitch  v <voice>  [q]uit";

/// Translate one input line. Rate and pitch steps are relative to `current`.
pub fn parse_command(line: &str, current: &PlaybackSnapshot) -> Option<ControlEvent> {
    let line = line.trim();
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    let event = match command {
        "" | "p" => ControlEvent::TogglePlayPause,
        "s" => ControlEvent::Stop,
        "n" => ControlEvent::Next,
        "b" => ControlEvent::Previous,
        "+" => ControlEvent::SetRate(current.rate + STEP),
        "-" => ControlEvent::SetRate(current.rate - STEP),
        ">" => ControlEvent::SetPitch(current.pitch + STEP),
        "<" => ControlEvent::SetPitch(current.pitch - STEP),
        "v" if !argument.is_empty() => ControlEvent::SetVoice(argument.to_string()),
        "q" => ControlEvent::Quit,
        _ => return None,
    };
    Some(event)
}

/// Read stdin until EOF or `q`. EOF counts as quit.
pub async fn run(tx: mpsc::UnboundedSender<ReaderEvent>, snapshots: watch::Receiver<PlaybackSnapshot>) {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                let _ = tx.send(ControlEvent::Quit.into());
                return;
            }
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                let _ = tx.send(ControlEvent::Quit.into());
                return;
            }
        };

        let current = snapshots.borrow().clone();
        let Some(event) = parse_command(&line, &current) else {
            println!("{HELP}");
            continue;
        };

        let quit = event == ControlEvent::Quit;
        if tx.send(event.into()).is_err() || quit {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::controller::PlaybackStatus;

    fn snapshot() -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: PlaybackStatus::Playing,
            position: 0,
            total: 3,
            voice: None,
            rate: 1.4,
            pitch: 0.8,
        }
    }

    #[test]
    fn transport_keys() {
        let s = snapshot();
        assert_eq!(parse_command("", &s), Some(ControlEvent::TogglePlayPause));
        assert_eq!(parse_command(" p ", &s), Some(ControlEvent::TogglePlayPause));
        assert_eq!(parse_command("s", &s), Some(ControlEvent::Stop));
        assert_eq!(parse_command("n", &s), Some(ControlEvent::Next));
        assert_eq!(parse_command("b", &s), Some(ControlEvent::Previous));
        assert_eq!(parse_command("q", &s), Some(ControlEvent::Quit));
        assert_eq!(parse_command("x", &s), None);
    }

    #[test]
    fn steps_are_relative_to_current_settings() {
        let s = snapshot();
        let Some(ControlEvent::SetRate(rate)) = parse_command("+", &s) else {
            panic!("expected rate change");
        };
        assert!((rate - 1.5).abs() < 1e-6);
        let Some(ControlEvent::SetPitch(pitch)) = parse_command("<", &s) else {
            panic!("expected pitch change");
        };
        assert!((pitch - 0.7).abs() < 1e-6);
    }

    #[test]
    fn voice_needs_an_argument() {
        let s = snapshot();
        assert_eq!(
            parse_command("v  bm_george ", &s),
            Some(ControlEvent::SetVoice("bm_george".into()))
        );
        assert_eq!(parse_command("v", &s), None);
    }
}
