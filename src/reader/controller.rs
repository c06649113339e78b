//! Playback controller: STOPPED ⇄ PLAYING ⇄ PAUSED over a segment sequence.
//!
//! The controller is the only writer of position, status and sequence.
//! Every user transition that moves the position cancels in-flight
//! utterances first; completions for utterances it no longer tracks are
//! dropped, so late engine callbacks never act on a new position.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::highlight::Highlighter;
use super::preferences::{clamp_pitch, clamp_rate, PreferenceStore, VoiceSettings};
use super::sanitizer::Sanitizer;
use super::segment::{extract_segments, Segment};
use crate::config::ReaderConfig;
use crate::content::ContentSource;
use crate::engine::{voices_for_language, SpeechEngine, Utterance, UtteranceId, Voice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Paused => write!(f, "PAUSED"),
        }
    }
}

/// A deferred pause attempt the host should deliver back after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseRetry {
    pub epoch: u64,
    pub attempt: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    /// −1 when no session is active.
    pub position: i64,
    pub total: usize,
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
}

pub struct PlaybackController {
    engine: Box<dyn SpeechEngine>,
    source: Box<dyn ContentSource>,
    highlighter: Box<dyn Highlighter>,
    sanitizer: Sanitizer,
    store: Option<PreferenceStore>,
    language: String,
    voices: Vec<Voice>,
    settings: VoiceSettings,

    segments: Vec<Segment>,
    position: Option<usize>,
    status: PlaybackStatus,
    /// Utterances of the current segment not yet reported finished.
    pending: Vec<UtteranceId>,
    next_utterance_id: UtteranceId,

    /// Bumped by every user transition; pause retries from older epochs are void.
    epoch: u64,
    pause_retry_delay: Duration,
    pause_max_retries: u32,
    scheduled_retry: Option<PauseRetry>,
}

impl PlaybackController {
    pub fn new(
        engine: Box<dyn SpeechEngine>,
        source: Box<dyn ContentSource>,
        highlighter: Box<dyn Highlighter>,
        config: &ReaderConfig,
    ) -> Self {
        let voices = voices_for_language(engine.voices(), &config.language);
        Self {
            engine,
            source,
            highlighter,
            sanitizer: Sanitizer::new(config.chunked_voice_prefixes.clone()),
            store: None,
            language: config.language.clone(),
            voices,
            settings: VoiceSettings::new(None, 1.4, 0.8),
            segments: Vec::new(),
            position: None,
            status: PlaybackStatus::Stopped,
            pending: Vec::new(),
            next_utterance_id: 1,
            epoch: 0,
            pause_retry_delay: Duration::from_millis(config.pause_retry_delay_ms),
            pause_max_retries: config.pause_max_retries,
            scheduled_retry: None,
        }
    }

    /// Attach a preference store and adopt its settings.
    pub fn with_store(mut self, store: PreferenceStore) -> Self {
        self.settings = store.load(&self.voices);
        self.store = Some(store);
        self
    }

    // --- Queries ---

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// Current position, or −1 when no session is active.
    pub fn position(&self) -> i64 {
        self.position.map_or(-1, |p| p as i64)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: self.status,
            position: self.position(),
            total: self.segments.len(),
            voice: self.settings.voice.clone(),
            rate: self.settings.rate,
            pitch: self.settings.pitch,
        }
    }

    /// Pause attempt requested by the last transition, if any.
    pub fn take_scheduled_retry(&mut self) -> Option<PauseRetry> {
        self.scheduled_retry.take()
    }

    // --- Transitions ---

    pub fn toggle_play_pause(&mut self) {
        self.epoch += 1;
        if self.status == PlaybackStatus::Stopped || self.position.is_none() {
            self.position = Some(0);
            self.load_segments();
        }

        if self.status == PlaybackStatus::Playing {
            self.request_pause(0);
        } else {
            self.play();
        }
    }

    pub fn play(&mut self) {
        self.highlight();

        if self.status == PlaybackStatus::Paused
            && (self.engine.is_paused() || self.engine.is_speaking())
        {
            self.engine.resume();
            self.set_status(PlaybackStatus::Playing);
            info!("Playback resumed");
            return;
        }

        // Segments with nothing to say are skipped rather than submitted empty.
        loop {
            let Some(index) = self.position.filter(|&p| p < self.segments.len()) else {
                self.stop();
                return;
            };

            self.set_status(PlaybackStatus::Playing);
            let voice = self.current_voice();
            let parts = self
                .sanitizer
                .sanitize(&self.segments[index].text, voice.as_ref())
                .into_parts();

            if parts.is_empty() {
                debug!("Segment {index} has nothing to say, skipping");
                self.position = Some(index + 1);
                self.highlight();
                continue;
            }

            for text in parts {
                let id = self.next_utterance_id;
                self.next_utterance_id += 1;
                self.pending.push(id);
                debug!("Speaking [{index}#{id}]: {text}");
                self.engine.speak(Utterance {
                    id,
                    text,
                    voice: self.settings.voice.clone(),
                    rate: self.settings.rate,
                    pitch: self.settings.pitch,
                });
            }
            return;
        }
    }

    /// Deferred pause attempt; ignored once any other transition happened.
    pub fn retry_pause(&mut self, epoch: u64, attempt: u32) {
        if epoch != self.epoch || self.status != PlaybackStatus::Playing {
            debug!("Dropping stale pause retry #{attempt}");
            return;
        }
        self.request_pause(attempt);
    }

    pub fn next(&mut self) {
        self.epoch += 1;
        self.cancel_speech();
        self.set_status(PlaybackStatus::Stopped);

        let mut target = self.position.map_or(0, |p| p + 1);
        if !self.segments.is_empty() {
            target = target.min(self.segments.len() - 1);
        }
        self.position = Some(target);
        self.play();
    }

    pub fn previous(&mut self) {
        self.epoch += 1;
        self.cancel_speech();
        self.set_status(PlaybackStatus::Stopped);

        self.position = Some(self.position.map_or(0, |p| p.saturating_sub(1)));
        self.play();
    }

    pub fn stop(&mut self) {
        self.epoch += 1;
        self.cancel_speech();
        self.set_status(PlaybackStatus::Stopped);
        info!("Playback stopped");

        self.position = None;
        self.segments.clear();
        self.highlight();
    }

    /// Engine callback: one submitted utterance finished.
    pub fn utterance_ended(&mut self, id: UtteranceId) {
        let Some(slot) = self.pending.iter().position(|&p| p == id) else {
            debug!("Ignoring completion of superseded utterance #{id}");
            return;
        };
        self.pending.remove(slot);

        if self.status == PlaybackStatus::Playing && self.pending.is_empty() {
            self.position = Some(self.position.map_or(0, |p| p + 1));
            self.play();
        }
    }

    // --- Settings ---

    /// Select an installed voice by id. Unknown ids are rejected.
    pub fn set_voice(&mut self, id: &str) -> bool {
        if !self.voices.iter().any(|v| v.id == id) {
            warn!("Unknown voice: {id}");
            return false;
        }
        self.settings.voice = Some(id.to_string());
        info!("Voice changed to: {id}");
        self.persist_settings();
        true
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.settings.rate = clamp_rate(rate);
        info!("Rate changed to: {}", self.settings.rate);
        self.persist_settings();
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.settings.pitch = clamp_pitch(pitch);
        info!("Pitch changed to: {}", self.settings.pitch);
        self.persist_settings();
    }

    /// Re-read the engine's voices once it reports ready.
    pub fn refresh_voices(&mut self) {
        self.voices = voices_for_language(self.engine.voices(), &self.language);
        info!("{} {} voice(s) available", self.voices.len(), self.language);

        let selected_installed = self
            .settings
            .voice
            .as_ref()
            .is_some_and(|id| self.voices.iter().any(|v| &v.id == id));
        if selected_installed {
            return;
        }
        if let Some(store) = &self.store {
            self.settings = store.load(&self.voices);
        } else {
            self.settings.voice = None;
        }
    }

    // --- Internals ---

    fn request_pause(&mut self, attempt: u32) {
        if self.engine.is_speaking() {
            self.engine.pause();
            self.set_status(PlaybackStatus::Paused);
            info!("Playback paused");
            return;
        }

        // Between chunks the engine reports idle and ignores pause; try again shortly.
        self.engine.pause();
        if attempt >= self.pause_max_retries {
            warn!(
                "Engine never reported speech after {attempt} pause retries, giving up"
            );
            return;
        }
        self.scheduled_retry = Some(PauseRetry {
            epoch: self.epoch,
            attempt: attempt + 1,
            delay: self.pause_retry_delay,
        });
    }

    fn cancel_speech(&mut self) {
        self.engine.cancel();
        self.pending.clear();
    }

    fn load_segments(&mut self) {
        self.segments = self
            .source
            .load()
            .map(|root| extract_segments(&root))
            .unwrap_or_default();
        info!("Loaded {} segment(s)", self.segments.len());
    }

    fn highlight(&mut self) {
        let current = self.position.and_then(|p| self.segments.get(p));
        self.highlighter.highlight(current);
    }

    fn current_voice(&self) -> Option<Voice> {
        let id = self.settings.voice.as_ref()?;
        self.voices.iter().find(|v| &v.id == id).cloned()
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if self.status != status {
            info!("Status: {} → {}", self.status, status);
            self.status = status;
        }
    }

    fn persist_settings(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.settings) {
                warn!("Failed to save preferences: {e}");
            }
        }
    }
}
