//! Speech engine adapter.
//!
//! The playback controller drives any `SpeechEngine`: it submits one
//! `Utterance` per spoken chunk and learns about completion through
//! `EngineEvent`s delivered on a channel. `is_speaking`/`is_paused` are
//! advisory only; some backends report them loosely around chunk
//! boundaries.
//!
//! - `kokoro`: native Kokoro ONNX synthesis with rodio playback

pub mod kokoro;

use serde::Serialize;

pub type UtteranceId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Voice {
    /// Stable identifier persisted in preferences.
    pub id: String,
    /// Display name; length-constrained engines are recognised by its prefix.
    pub name: String,
    /// BCP 47 locale, e.g. `en-GB`.
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    /// Voice identifier; `None` lets the engine pick its default.
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Voice metadata is loaded and reliable.
    Ready,
    /// An utterance finished playing, or was dropped without playing.
    UtteranceEnded { id: UtteranceId },
}

pub trait SpeechEngine: Send {
    fn voices(&self) -> Vec<Voice>;
    /// Queue an utterance behind any already queued.
    fn speak(&self, utterance: Utterance);
    fn pause(&self);
    fn resume(&self);
    /// Drop the queue and stop the current utterance. Cancelled utterances
    /// may still report `UtteranceEnded`.
    fn cancel(&self);
    fn is_speaking(&self) -> bool;
    fn is_paused(&self) -> bool;
}

/// Voices whose locale belongs to `language` (`en` matches `en-US`, `en-GB`, …).
pub fn voices_for_language(voices: Vec<Voice>, language: &str) -> Vec<Voice> {
    voices
        .into_iter()
        .filter(|v| v.lang.starts_with(language))
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engine for controller and service tests.

    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default)]
    pub struct EngineLog {
        pub spoken: Vec<Utterance>,
        pub pauses: usize,
        pub resumes: usize,
        pub cancels: usize,
        pub speaking: bool,
        pub paused: bool,
        /// When set, `speak` leaves the engine reporting idle.
        pub idle_while_queued: bool,
    }

    #[derive(Clone, Default)]
    pub struct ScriptedEngine {
        pub log: Arc<Mutex<EngineLog>>,
        pub voices: Vec<Voice>,
    }

    impl ScriptedEngine {
        pub fn with_voices(voices: Vec<Voice>) -> Self {
            Self {
                voices,
                ..Self::default()
            }
        }

        pub fn spoken_texts(&self) -> Vec<String> {
            self.log.lock().unwrap().spoken.iter().map(|u| u.text.clone()).collect()
        }

        pub fn last_id(&self) -> UtteranceId {
            self.log.lock().unwrap().spoken.last().map(|u| u.id).unwrap_or_default()
        }

        pub fn set_speaking(&self, speaking: bool) {
            self.log.lock().unwrap().speaking = speaking;
        }
    }

    impl SpeechEngine for ScriptedEngine {
        fn voices(&self) -> Vec<Voice> {
            self.voices.clone()
        }

        fn speak(&self, utterance: Utterance) {
            let mut log = self.log.lock().unwrap();
            log.speaking = !log.idle_while_queued;
            log.spoken.push(utterance);
        }

        fn pause(&self) {
            let mut log = self.log.lock().unwrap();
            log.pauses += 1;
            if log.speaking {
                log.paused = true;
            }
        }

        fn resume(&self) {
            let mut log = self.log.lock().unwrap();
            log.resumes += 1;
            log.paused = false;
        }

        fn cancel(&self) {
            let mut log = self.log.lock().unwrap();
            log.cancels += 1;
            log.speaking = false;
            log.paused = false;
        }

        fn is_speaking(&self) -> bool {
            self.log.lock().unwrap().speaking
        }

        fn is_paused(&self) -> bool {
            self.log.lock().unwrap().paused
        }
    }

    pub fn voice(id: &str, name: &str, lang: &str) -> Voice {
        Voice {
            id: id.into(),
            name: name.into(),
            lang: lang.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::voice;
    use super::*;

    #[test]
    fn filters_by_language_family() {
        let voices = vec![
            voice("af_heart", "Kokoro Heart", "en-US"),
            voice("bm_george", "Kokoro George", "en-GB"),
            voice("ff_siwis", "Kokoro Siwis", "fr-FR"),
        ];
        let english: Vec<String> = voices_for_language(voices, "en")
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(english, ["af_heart", "bm_george"]);
    }
}
