//! Configuration management for article-reader.
//!
//! Loads config from YAML files in standard locations. Every section is
//! optional and falls back to its defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Class of the element holding the article body.
    pub container_class: String,
    /// Language family voices are filtered to (locale prefix).
    pub language: String,
    /// Known-good voices, tried in order when no preference matches.
    pub fallback_voices: Vec<String>,
    /// Voice name prefixes of engines that truncate long inputs.
    pub chunked_voice_prefixes: Vec<String>,
    pub pause_retry_delay_ms: u64,
    pub pause_max_retries: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            container_class: "body-content".into(),
            language: "en".into(),
            fallback_voices: vec![
                "bm_george".into(),
                "am_michael".into(),
                "am_adam".into(),
            ],
            chunked_voice_prefixes: vec!["Google".into(), "Kokoro".into()],
            pause_retry_delay_ms: 200,
            pause_max_retries: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Preference file; empty means ~/.config/article-reader/preferences.json.
    pub path: String,
    pub max_age_secs: i64,
    pub default_rate: f32,
    pub default_pitch: f32,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            max_age_secs: 7_776_000,
            default_rate: 1.4,
            default_pitch: 0.8,
        }
    }
}

impl PreferencesConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if self.path.is_empty() {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("article-reader/preferences.json")
        } else {
            PathBuf::from(&self.path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkRule {
    /// URL prefix the rule applies to.
    pub prefix: String,
    /// Replacement target; `{url}` is the original link, `{url_encoded}`
    /// its percent-encoded form.
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArticleConfig {
    pub recover_embedded_body: bool,
    pub upscale_images: bool,
    pub link_rules: Vec<LinkRule>,
}

impl Default for ArticleConfig {
    fn default() -> Self {
        Self {
            recover_embedded_body: true,
            upscale_images: true,
            link_rules: vec![
                LinkRule {
                    prefix: "https://www.ft.com".into(),
                    target: "https://12ft.io/proxy?q={url_encoded}".into(),
                },
                LinkRule {
                    prefix: "https://www.wsj.com".into(),
                    target: "https://archive.is/latest/{url}".into(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TTSConfig {
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
    pub intra_threads: usize,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            voices_path: String::new(),
            tokenizer_path: String::new(),
            intra_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    pub enabled: bool,
    pub play_pause: Vec<String>,
    pub stop: Vec<String>,
    pub next: Vec<String>,
    pub previous: Vec<String>,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            play_pause: vec!["KEY_LEFTMETA".into(), "KEY_LEFTALT".into(), "KEY_SPACE".into()],
            stop: vec!["KEY_LEFTMETA".into(), "KEY_LEFTALT".into(), "KEY_S".into()],
            next: vec!["KEY_LEFTMETA".into(), "KEY_LEFTALT".into(), "KEY_RIGHT".into()],
            previous: vec!["KEY_LEFTMETA".into(), "KEY_LEFTALT".into(), "KEY_LEFT".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reader: ReaderConfig,
    pub preferences: PreferencesConfig,
    pub article: ArticleConfig,
    pub tts: TTSConfig,
    pub hotkeys: HotkeyConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/article-reader/config.yaml
    /// 3. /etc/article-reader/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/article-reader/config.yaml")),
                Some(PathBuf::from("/etc/article-reader/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
