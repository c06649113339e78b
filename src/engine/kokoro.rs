//! Native Kokoro speech engine.
//!
//! An utterance is split into sentences; each sentence is phonemized with
//! misaki, mapped to Kokoro token ids, run through the ONNX model with the
//! voice's style vector and played on a rodio sink at 24 kHz.
//!
//! The model, phonemizer and audio output live on one worker thread. The
//! engine handle only queues utterances and flips shared flags.

use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ndarray::{Array1, Array2, Array3};
use ndarray_npy::NpzReader;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::{EngineEvent, SpeechEngine, Utterance, Voice};
use crate::config::TTSConfig;
use crate::error::{ReaderError, Result};

/// Worker-side failures are plain messages; they become `ReaderError::Engine` at the handle.
type SynthResult<T> = std::result::Result<T, String>;

fn context<E: Display>(what: &'static str) -> impl FnOnce(E) -> String {
    move |e| format!("{what}: {e}")
}

const SAMPLE_RATE: u32 = 24_000;
/// Kokoro's context limit; also the number of style rows per voice.
const CONTEXT_TOKENS: usize = 510;
const STYLE_DIM: usize = 256;
const DEFAULT_VOICE: &str = "af_heart";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One style row per input length, `(CONTEXT_TOKENS, STYLE_DIM)`.
struct VoiceStyles(Array2<f32>);

/// The parts of a rodio sink the engine handle drives from another thread.
trait SinkControl {
    fn pause(&self);
    fn play(&self);
    fn stop(&self);
}

impl SinkControl for Sink {
    fn pause(&self) {
        Sink::pause(self);
    }

    fn play(&self) {
        Sink::play(self);
    }

    fn stop(&self) {
        Sink::stop(self);
    }
}

/// Flags shared between the engine handle and the worker.
struct Shared<S = Sink> {
    speaking: AtomicBool,
    /// Only written while `active_sink` is locked, so a sink is never
    /// published unpaused after a pause has been requested.
    paused: AtomicBool,
    /// Bumped by `cancel`; work tagged with an older generation is dropped.
    generation: AtomicU64,
    queued: AtomicUsize,
    active_sink: Mutex<Option<S>>,
}

impl<S> Default for Shared<S> {
    fn default() -> Self {
        Self {
            speaking: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            active_sink: Mutex::new(None),
        }
    }
}

impl<S: SinkControl> Shared<S> {
    fn sink_slot(&self) -> MutexGuard<'_, Option<S>> {
        self.active_sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `sink` the playing sink, paused if a pause is in effect.
    fn publish(&self, sink: S) {
        let mut slot = self.sink_slot();
        if self.paused.load(Ordering::SeqCst) {
            sink.pause();
        }
        *slot = Some(sink);
    }

    fn pause_playback(&self) {
        let slot = self.sink_slot();
        self.paused.store(true, Ordering::SeqCst);
        if let Some(sink) = slot.as_ref() {
            sink.pause();
        }
    }

    fn resume_playback(&self) {
        let slot = self.sink_slot();
        self.paused.store(false, Ordering::SeqCst);
        if let Some(sink) = slot.as_ref() {
            sink.play();
        }
    }

    fn stop_playback(&self) {
        let slot = self.sink_slot();
        self.paused.store(false, Ordering::SeqCst);
        if let Some(sink) = slot.as_ref() {
            sink.stop();
        }
    }
}

/// Native Kokoro speech engine.
pub struct KokoroEngine {
    voices: Vec<Voice>,
    queue: Sender<(u64, Utterance)>,
    shared: Arc<Shared>,
}

impl KokoroEngine {
    /// Load the model on a dedicated worker thread and wait until it is ready.
    /// Emits `EngineEvent::Ready` once voices are known.
    pub fn start(config: &TTSConfig, events: UnboundedSender<EngineEvent>) -> Result<Self> {
        let paths = ModelPaths::resolve(config);
        let intra_threads = config.intra_threads;
        let shared = Arc::new(Shared::default());
        let (queue_tx, queue_rx) = mpsc::channel::<(u64, Utterance)>();
        let (ready_tx, ready_rx) = mpsc::channel::<SynthResult<Vec<Voice>>>();

        let worker_shared = shared.clone();
        std::thread::Builder::new()
            .name("kokoro-tts".into())
            .spawn(move || {
                let synth = match Synthesizer::load(&paths, intra_threads) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(synth.voice_list()));
                let _ = events.send(EngineEvent::Ready);
                run_worker(synth, queue_rx, worker_shared, events);
            })?;

        let voices = ready_rx
            .recv()
            .map_err(|_| ReaderError::Engine("TTS worker exited during load".into()))?
            .map_err(ReaderError::Engine)?;

        Ok(Self {
            voices,
            queue: queue_tx,
            shared,
        })
    }
}

impl SpeechEngine for KokoroEngine {
    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn speak(&self, utterance: Utterance) {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        self.shared.speaking.store(true, Ordering::SeqCst);
        if self.queue.send((generation, utterance)).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            warn!("TTS worker is gone, dropping utterance");
        }
    }

    fn pause(&self) {
        if !self.shared.speaking.load(Ordering::SeqCst) {
            return;
        }
        self.shared.pause_playback();
    }

    fn resume(&self) {
        self.shared.resume_playback();
    }

    fn cancel(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.stop_playback();
        self.shared.speaking.store(false, Ordering::SeqCst);
        debug!("TTS cancelled");
    }

    fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }
}

fn run_worker(
    mut synth: Synthesizer,
    queue: Receiver<(u64, Utterance)>,
    shared: Arc<Shared>,
    events: UnboundedSender<EngineEvent>,
) {
    while let Ok((generation, utterance)) = queue.recv() {
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        let id = utterance.id;

        if generation == shared.generation.load(Ordering::SeqCst) {
            shared.speaking.store(true, Ordering::SeqCst);
            let t0 = Instant::now();
            let cancelled = synth.speak(&utterance, generation, &shared);
            debug!(
                "Utterance #{id} {} after {}ms",
                if cancelled { "cancelled" } else { "finished" },
                t0.elapsed().as_millis()
            );
        } else {
            debug!("Dropping cancelled utterance #{id}");
        }

        if shared.queued.load(Ordering::SeqCst) == 0 {
            shared.speaking.store(false, Ordering::SeqCst);
        }
        if events.send(EngineEvent::UtteranceEnded { id }).is_err() {
            break;
        }
    }
    debug!("TTS worker stopped");
}

struct ModelPaths {
    model: PathBuf,
    voices: PathBuf,
    tokenizer: PathBuf,
}

impl ModelPaths {
    fn resolve(config: &TTSConfig) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_default();
        let pick = |configured: &str, default: &str| {
            if configured.is_empty() {
                base_dir.join(default)
            } else {
                PathBuf::from(configured)
            }
        };
        Self {
            model: pick(&config.model_path, "kokoro-v1.0.onnx"),
            voices: pick(&config.voices_path, "voices-v1.0.bin"),
            tokenizer: pick(&config.tokenizer_path, "tokenizer.json"),
        }
    }
}

/// Model state owned by the worker thread.
struct Synthesizer {
    session: Session,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    voices: HashMap<String, VoiceStyles>,
    default_voice: String,
    // Dropping the stream silences every sink, so it lives as long as the worker.
    output_stream: OutputStream,
}

impl Synthesizer {
    fn load(paths: &ModelPaths, intra_threads: usize) -> SynthResult<Self> {
        let started = Instant::now();

        let vocab = read_vocab(&paths.tokenizer)?;
        debug!("{} phoneme tokens from {}", vocab.len(), paths.tokenizer.display());

        let voices = read_voice_styles(&paths.voices)?;
        info!("{} Kokoro voices from {}", voices.len(), paths.voices.display());

        info!("Loading ONNX model from {}", paths.model.display());
        let session = Session::builder()
            .map_err(context("ONNX session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(context("ONNX optimization level"))?
            .with_intra_threads(intra_threads)
            .map_err(context("ONNX thread count"))?
            .commit_from_file(&paths.model)
            .map_err(context("ONNX model"))?;

        let output_stream =
            OutputStreamBuilder::open_default_stream().map_err(context("audio output"))?;

        let default_voice = if voices.contains_key(DEFAULT_VOICE) {
            DEFAULT_VOICE.to_string()
        } else {
            voices
                .keys()
                .min()
                .cloned()
                .ok_or_else(|| format!("no voices in {}", paths.voices.display()))?
        };

        info!("Kokoro ready in {}ms", started.elapsed().as_millis());

        Ok(Self {
            session,
            phonemizer: misaki_rs::G2P::new(misaki_rs::Language::EnglishUS),
            vocab,
            voices,
            default_voice,
            output_stream,
        })
    }

    fn voice_list(&self) -> Vec<Voice> {
        let mut list: Vec<Voice> = self.voices.keys().map(|id| describe_voice(id)).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Speak one utterance sentence by sentence. Returns true if cancelled.
    fn speak(&mut self, utterance: &Utterance, generation: u64, shared: &Shared) -> bool {
        let voice = match &utterance.voice {
            Some(id) if self.voices.contains_key(id) => id.clone(),
            Some(id) => {
                warn!("Unknown voice {id}, using {}", self.default_voice);
                self.default_voice.clone()
            }
            None => self.default_voice.clone(),
        };

        // Pitch is applied as a playback speed factor, so synthesize slower to keep the rate.
        let pitch = utterance.pitch.max(0.1);
        let speed = utterance.rate / pitch;
        let is_cancelled = || shared.generation.load(Ordering::SeqCst) != generation;

        for sentence in sentences(&utterance.text) {
            if is_cancelled() {
                return true;
            }

            let samples = match self.synthesize(sentence, &voice, speed) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("Kokoro synthesis failed: {e}");
                    continue;
                }
            };

            if is_cancelled() {
                return true;
            }
            if !samples.is_empty() && self.play_audio(samples, pitch, generation, shared) {
                return true;
            }
        }

        false
    }

    /// Audio for one sentence. Inputs longer than the context are truncated.
    fn synthesize(&mut self, sentence: &str, voice: &str, speed: f32) -> SynthResult<Vec<f32>> {
        let (phonemes, _) = self.phonemizer.g2p(sentence).map_err(context("G2P"))?;
        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // Token 0 pads both ends; phonemes missing from the vocabulary are skipped.
        let known = phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied());
        let tokens: Vec<i64> = std::iter::once(0)
            .chain(known)
            .chain(std::iter::once(0))
            .take(CONTEXT_TOKENS)
            .collect();
        let n_tokens = tokens.len();

        let styles = &self
            .voices
            .get(voice)
            .ok_or_else(|| format!("voice {voice} not loaded"))?
            .0;
        let row = n_tokens.saturating_sub(2).min(styles.nrows() - 1);
        let style = styles
            .row(row)
            .to_owned()
            .into_shape_with_order((1, STYLE_DIM))
            .map_err(context("style row"))?;

        let tokens = Array2::from_shape_vec((1, n_tokens), tokens).map_err(context("token array"))?;
        let inputs = ort::inputs![
            "tokens" => Tensor::from_array(tokens).map_err(context("token tensor"))?,
            "style" => Tensor::from_array(style).map_err(context("style tensor"))?,
            "speed" => Tensor::from_array(Array1::from_vec(vec![speed]))
                .map_err(context("speed tensor"))?
        ];

        let started = Instant::now();
        let outputs = self.session.run(inputs).map_err(context("Kokoro inference"))?;
        let first = outputs.iter().next().ok_or("model produced no output")?;
        let (_, audio) = first
            .1
            .try_extract_tensor::<f32>()
            .map_err(context("audio tensor"))?;

        let samples = audio.to_vec();
        debug!(
            "{n_tokens} tokens -> {:.2}s audio in {}ms",
            samples.len() as f32 / SAMPLE_RATE as f32,
            started.elapsed().as_millis()
        );
        Ok(samples)
    }

    /// Play samples until done or cancelled. Returns true if cancelled.
    fn play_audio(&self, samples: Vec<f32>, pitch: f32, generation: u64, shared: &Shared) -> bool {
        let sink = Sink::connect_new(self.output_stream.mixer());
        sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples).speed(pitch));
        shared.publish(sink);

        let cancelled = loop {
            let Ok(active) = shared.active_sink.lock() else {
                break true;
            };
            let Some(sink) = active.as_ref() else {
                break true;
            };
            if shared.generation.load(Ordering::SeqCst) != generation {
                sink.stop();
                break true;
            }
            if sink.empty() {
                break false;
            }
            drop(active);
            std::thread::sleep(POLL_INTERVAL);
        };

        if let Ok(mut active) = shared.active_sink.lock() {
            *active = None;
        }
        cancelled
    }
}

/// Voice metadata from the Kokoro naming scheme: `<lang><gender>_<name>`.
fn describe_voice(id: &str) -> Voice {
    let lang = match id.chars().next() {
        Some('a') => "en-US",
        Some('b') => "en-GB",
        Some('e') => "es-ES",
        Some('f') => "fr-FR",
        Some('h') => "hi-IN",
        Some('i') => "it-IT",
        Some('j') => "ja-JP",
        Some('p') => "pt-BR",
        Some('z') => "zh-CN",
        _ => "und",
    };

    let short = id.split_once('_').map_or(id, |(_, name)| name);
    let mut chars = short.chars();
    let display = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => id.to_string(),
    };

    Voice {
        id: id.to_string(),
        name: format!("Kokoro {display} ({lang})"),
        lang: lang.to_string(),
    }
}

/// Phoneme → token id map from a HuggingFace `tokenizer.json`.
fn read_vocab(path: &Path) -> SynthResult<HashMap<char, i64>> {
    let raw = fs::read_to_string(path).map_err(context("tokenizer file"))?;
    let json: serde_json::Value = serde_json::from_str(&raw).map_err(context("tokenizer JSON"))?;
    let entries = json
        .pointer("/model/vocab")
        .and_then(|v| v.as_object())
        .ok_or("tokenizer JSON has no model.vocab")?;

    entries
        .iter()
        .filter_map(|(token, id)| Some((token.chars().next()?, id)))
        .map(|(ch, id)| {
            id.as_i64()
                .map(|id| (ch, id))
                .ok_or_else(|| format!("token {ch:?} has a non-integer id"))
        })
        .collect()
}

/// Voice style arrays from the voices NPZ, keyed by voice id.
fn read_voice_styles(path: &Path) -> SynthResult<HashMap<String, VoiceStyles>> {
    let file = fs::File::open(path).map_err(context("voices file"))?;
    let mut npz = NpzReader::new(file).map_err(context("voices NPZ"))?;
    let entries = npz.names().map_err(context("voices NPZ index"))?;

    let mut voices = HashMap::with_capacity(entries.len());
    for entry in entries {
        let id = entry.trim_end_matches(".npy").to_string();
        // Stored as (rows, 1, STYLE_DIM); drop the batch axis.
        let stored: Array3<f32> = npz.by_name(&entry).map_err(|e| format!("voice {id}: {e}"))?;
        let (rows, dim) = (stored.shape()[0], stored.shape()[2]);
        let styles = stored
            .into_shape_with_order((rows, dim))
            .map_err(|e| format!("voice {id} has unexpected shape: {e}"))?;
        voices.insert(id, VoiceStyles(styles));
    }
    Ok(voices)
}

/// Sentences ending in `.`, `!` or `?` followed by whitespace, trimmed.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(end) = rest
        .char_indices()
        .zip(rest.chars().skip(1))
        .find(|((_, c), next)| matches!(c, '.' | '!' | '?') && next.is_whitespace())
        .map(|((i, _), _)| i + 1)
    {
        let sentence = rest[..end].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        rest = &rest[end..];
    }
    let tail = rest.trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_voices_from_kokoro_names() {
        assert_eq!(
            describe_voice("bm_george"),
            Voice {
                id: "bm_george".into(),
                name: "Kokoro George (en-GB)".into(),
                lang: "en-GB".into(),
            }
        );
        assert_eq!(describe_voice("af_heart").lang, "en-US");
        assert_eq!(describe_voice("ff_siwis").lang, "fr-FR");
        assert_eq!(describe_voice("xx").name, "Kokoro Xx (und)");
    }

    #[test]
    fn splits_sentences_on_terminal_punctuation() {
        assert_eq!(
            sentences("One. Two! Three? 4.5 stays"),
            ["One.", "Two!", "Three?", "4.5 stays"]
        );
        assert!(sentences("   ").is_empty());
    }

    #[derive(Default)]
    struct FakeSink {
        paused: AtomicBool,
        stopped: AtomicBool,
    }

    impl SinkControl for FakeSink {
        fn pause(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }

        fn play(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn sink_paused(shared: &Shared<FakeSink>) -> Option<bool> {
        shared
            .sink_slot()
            .as_ref()
            .map(|sink| sink.paused.load(Ordering::SeqCst))
    }

    #[test]
    fn pause_before_publish_holds_the_next_sink() {
        let shared = Shared::<FakeSink>::default();
        shared.pause_playback();
        assert!(shared.paused.load(Ordering::SeqCst));
        assert_eq!(sink_paused(&shared), None);

        shared.publish(FakeSink::default());
        assert_eq!(sink_paused(&shared), Some(true));

        shared.resume_playback();
        assert!(!shared.paused.load(Ordering::SeqCst));
        assert_eq!(sink_paused(&shared), Some(false));

        shared.stop_playback();
        assert!(shared.sink_slot().as_ref().unwrap().stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_pause_and_publish_agree() {
        for _ in 0..200 {
            let shared = Arc::new(Shared::<FakeSink>::default());
            let worker = {
                let shared = shared.clone();
                std::thread::spawn(move || shared.publish(FakeSink::default()))
            };
            shared.pause_playback();
            worker.join().unwrap();
            assert!(shared.paused.load(Ordering::SeqCst));
            assert_eq!(sink_paused(&shared), Some(true));
        }
    }

    #[test]
    fn missing_model_files_fail_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let missing = |name: &str| dir.path().join(name).display().to_string();
        let config = TTSConfig {
            model_path: missing("model.onnx"),
            voices_path: missing("voices.bin"),
            tokenizer_path: missing("tokenizer.json"),
            ..TTSConfig::default()
        };
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = KokoroEngine::start(&config, tx).err().unwrap();
        assert!(err.to_string().contains("tokenizer"));
    }
}
