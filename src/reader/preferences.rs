//! Persisted voice preferences.
//!
//! Stored as one JSON file mapping a site scope to its last saved voice,
//! rate and pitch. All three are written together and expire together.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PreferencesConfig;
use crate::engine::Voice;
use crate::error::{ReaderError, Result};

pub const RATE_MIN: f32 = 1.0;
pub const RATE_MAX: f32 = 2.0;
pub const PITCH_MIN: f32 = 0.5;
pub const PITCH_MAX: f32 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
}

impl VoiceSettings {
    pub fn new(voice: Option<String>, rate: f32, pitch: f32) -> Self {
        Self {
            voice,
            rate: clamp_rate(rate),
            pitch: clamp_pitch(pitch),
        }
    }
}

/// Snap to the 0.1 slider step within the rate range.
pub fn clamp_rate(rate: f32) -> f32 {
    snap(rate, RATE_MIN, RATE_MAX)
}

pub fn clamp_pitch(pitch: f32) -> f32 {
    snap(pitch, PITCH_MIN, PITCH_MAX)
}

fn snap(value: f32, min: f32, max: f32) -> f32 {
    if !value.is_finite() {
        return min;
    }
    (value.clamp(min, max) * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPreferences {
    voice: Option<String>,
    rate: f32,
    pitch: f32,
    saved_at: DateTime<Utc>,
}

type PreferenceFile = BTreeMap<String, StoredPreferences>;

pub struct PreferenceStore {
    path: PathBuf,
    scope: String,
    max_age: Duration,
    default_rate: f32,
    default_pitch: f32,
    fallback_voices: Vec<String>,
}

impl PreferenceStore {
    pub fn new(config: &PreferencesConfig, scope: &str, fallback_voices: Vec<String>) -> Self {
        Self {
            path: config.resolved_path(),
            scope: scope.to_string(),
            max_age: Duration::seconds(config.max_age_secs),
            default_rate: config.default_rate,
            default_pitch: config.default_pitch,
            fallback_voices,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Resolve settings against the installed (language-filtered) voices.
    pub fn load(&self, installed: &[Voice]) -> VoiceSettings {
        self.load_at(installed, Utc::now())
    }

    pub fn load_at(&self, installed: &[Voice], now: DateTime<Utc>) -> VoiceSettings {
        let stored = self.read_entry(now);

        let (persisted_voice, rate, pitch) = match &stored {
            Some(entry) => (entry.voice.as_deref(), entry.rate, entry.pitch),
            None => (None, self.default_rate, self.default_pitch),
        };

        let voice = resolve_voice(persisted_voice, &self.fallback_voices, installed);
        debug!(
            "Preferences for {}: voice={:?} rate={rate} pitch={pitch}",
            self.scope,
            voice.as_ref().map(|v| &v.id)
        );

        VoiceSettings::new(voice.map(|v| v.id), rate, pitch)
    }

    /// Persist all three values, replacing this scope's previous entry.
    pub fn save(&self, settings: &VoiceSettings) -> Result<()> {
        let mut file = self.read_file().unwrap_or_default();
        file.insert(
            self.scope.clone(),
            StoredPreferences {
                voice: settings.voice.clone(),
                rate: settings.rate,
                pitch: settings.pitch,
                saved_at: Utc::now(),
            },
        );

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, json)?;
        info!(
            "Saved preferences for {}: voice={:?} rate={} pitch={}",
            self.scope, settings.voice, settings.rate, settings.pitch
        );
        Ok(())
    }

    fn read_file(&self) -> Result<PreferenceFile> {
        let contents = fs::read_to_string(&self.path)?;
        serde_json::from_str(&contents).map_err(|e| {
            ReaderError::Preferences(format!("{} is malformed: {e}", self.path.display()))
        })
    }

    fn read_entry(&self, now: DateTime<Utc>) -> Option<StoredPreferences> {
        let mut file = match self.read_file() {
            Ok(file) => file,
            Err(ReaderError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Ignoring stored preferences: {e}");
                return None;
            }
        };

        let entry = file.remove(&self.scope)?;
        if now - entry.saved_at > self.max_age {
            debug!("Preferences for {} expired (saved {})", self.scope, entry.saved_at);
            return None;
        }
        Some(entry)
    }
}

/// Persisted voice if installed, else the first installed fallback, else none.
pub fn resolve_voice(persisted: Option<&str>, fallback: &[String], installed: &[Voice]) -> Option<Voice> {
    persisted
        .into_iter()
        .chain(fallback.iter().map(String::as_str))
        .find_map(|id| installed.iter().find(|v| v.id == id))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::voice;

    fn installed() -> Vec<Voice> {
        vec![
            voice("af_heart", "Kokoro Heart", "en-US"),
            voice("am_michael", "Kokoro Michael", "en-US"),
            voice("bm_george", "Kokoro George", "en-GB"),
        ]
    }

    fn store(dir: &tempfile::TempDir, scope: &str) -> PreferenceStore {
        let config = PreferencesConfig {
            path: dir.path().join("prefs.json").display().to_string(),
            ..PreferencesConfig::default()
        };
        PreferenceStore::new(&config, scope, vec!["bm_george".into(), "am_michael".into()])
    }

    #[test]
    fn defaults_when_nothing_saved() {
        let dir = tempfile::tempdir().unwrap();
        let settings = store(&dir, "www.bloomberg.com").load(&installed());
        assert_eq!(settings.voice.as_deref(), Some("bm_george"));
        assert_eq!(settings.rate, 1.4);
        assert_eq!(settings.pitch, 0.8);
    }

    #[test]
    fn save_then_load_round_trips_per_scope() {
        let dir = tempfile::tempdir().unwrap();
        let site = store(&dir, "www.bloomberg.com");
        site.save(&VoiceSettings::new(Some("af_heart".into()), 1.7, 1.2)).unwrap();

        let settings = site.load(&installed());
        assert_eq!(settings, VoiceSettings::new(Some("af_heart".into()), 1.7, 1.2));

        // Another site keeps its own defaults.
        let other = store(&dir, "example.com").load(&installed());
        assert_eq!(other.voice.as_deref(), Some("bm_george"));
        assert_eq!(other.rate, 1.4);
    }

    #[test]
    fn uninstalled_voice_falls_back_silently() {
        let dir = tempfile::tempdir().unwrap();
        let site = store(&dir, "site");
        site.save(&VoiceSettings::new(Some("Google UK English Male".into()), 1.0, 1.0)).unwrap();

        let settings = site.load(&installed());
        assert_eq!(settings.voice.as_deref(), Some("bm_george"));
        assert_eq!(settings.rate, 1.0);

        let none_installed = site.load(&[]);
        assert_eq!(none_installed.voice, None);
    }

    #[test]
    fn expired_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let site = store(&dir, "site");
        site.save(&VoiceSettings::new(Some("af_heart".into()), 2.0, 1.5)).unwrap();

        let later = Utc::now() + Duration::days(91);
        let settings = site.load_at(&installed(), later);
        assert_eq!(settings.voice.as_deref(), Some("bm_george"));
        assert_eq!(settings.rate, 1.4);

        let sooner = Utc::now() + Duration::days(89);
        assert_eq!(site.load_at(&installed(), sooner).rate, 2.0);
    }

    #[test]
    fn malformed_file_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prefs.json"), "{ not json").unwrap();
        let site = store(&dir, "site");
        assert_eq!(site.load(&installed()).pitch, 0.8);

        // Saving replaces the broken file.
        site.save(&VoiceSettings::new(None, 1.1, 0.9)).unwrap();
        assert_eq!(site.load(&installed()).rate, 1.1);
    }

    #[test]
    fn clamps_to_slider_ranges() {
        assert_eq!(clamp_rate(0.3), 1.0);
        assert_eq!(clamp_rate(2.7), 2.0);
        assert_eq!(clamp_rate(1.43), 1.4);
        assert_eq!(clamp_pitch(0.0), 0.5);
        assert_eq!(clamp_pitch(1.26), 1.3);
        assert_eq!(clamp_pitch(f32::NAN), 0.5);
    }
}
