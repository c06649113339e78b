//! article-reader: reads web articles aloud, one paragraph at a time.

mod article;
mod config;
mod content;
mod control;
mod engine;
mod error;
mod reader;
mod service;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::content::HtmlFileSource;
use crate::control::ControlEvent;
use crate::engine::kokoro::KokoroEngine;
use crate::engine::{voices_for_language, EngineEvent, SpeechEngine};
use crate::reader::controller::PlaybackController;
use crate::reader::highlight::TerminalHighlighter;
use crate::reader::preferences::PreferenceStore;
use crate::reader::sanitizer::Sanitizer;
use crate::reader::segment::extract_segments;
use crate::service::{ReaderEvent, ReaderService};

#[derive(Parser, Debug)]
#[command(name = "article-reader", about = "Read web articles aloud with Kokoro TTS")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read an article aloud with interactive controls
    Read {
        /// Saved article page (HTML)
        file: PathBuf,

        /// Preference scope, usually the site's host name
        #[arg(long, default_value = "local")]
        site: String,

        /// Voice id, overrides and replaces the saved preference
        #[arg(long)]
        voice: Option<String>,

        /// Speech rate (1.0 - 2.0)
        #[arg(long)]
        rate: Option<f32>,

        /// Pitch (0.5 - 1.5)
        #[arg(long)]
        pitch: Option<f32>,
    },
    /// Print the segments that would be read
    Segments {
        file: PathBuf,
    },
    /// Print the article HTML after link rewriting and image upscaling
    Prepare {
        file: PathBuf,
    },
    /// List available voices and the one that would be used
    Voices {
        #[arg(long, default_value = "local")]
        site: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());

    match args.command {
        Command::Read {
            file,
            site,
            voice,
            rate,
            pitch,
        } => read(config, &file, &site, voice, rate, pitch).await,
        Command::Segments { file } => print_segments(&config, &file),
        Command::Prepare { file } => print_prepared(&config, &file),
        Command::Voices { site } => list_voices(config, &site).await,
    }
}

/// Load the Kokoro model off the async runtime.
async fn load_engine(
    config: &Config,
) -> Result<(KokoroEngine, mpsc::UnboundedReceiver<EngineEvent>), Box<dyn std::error::Error>> {
    info!("Loading Kokoro TTS model...");
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let engine = tokio::task::spawn_blocking({
        let tts_config = config.tts.clone();
        move || KokoroEngine::start(&tts_config, engine_tx)
    })
    .await??;
    Ok((engine, engine_rx))
}

async fn read(
    config: Config,
    file: &Path,
    site: &str,
    voice: Option<String>,
    rate: Option<f32>,
    pitch: Option<f32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = HtmlFileSource::new(file, &config.reader.container_class, config.article.clone());
    // Fail early on unreadable pages rather than at the first play.
    source.load_container()?;

    let (engine, engine_rx) = load_engine(&config).await?;
    let store = PreferenceStore::new(&config.preferences, site, config.reader.fallback_voices.clone());

    let mut controller = PlaybackController::new(
        Box::new(engine),
        Box::new(source),
        Box::new(TerminalHighlighter::default()),
        &config.reader,
    )
    .with_store(store);

    if let Some(id) = voice {
        controller.set_voice(&id);
    }
    if let Some(rate) = rate {
        controller.set_rate(rate);
    }
    if let Some(pitch) = pitch {
        controller.set_pitch(pitch);
    }

    let settings = controller.settings();
    info!(
        "Reading {} (voice: {}, rate: {}, pitch: {})",
        file.display(),
        settings.voice.as_deref().unwrap_or("default"),
        settings.rate,
        settings.pitch
    );

    let service = ReaderService::new(controller, engine_rx);
    let events = service.sender();

    if config.hotkeys.enabled {
        let monitor = control::hotkey::HotkeyMonitor::new(&config.hotkeys, events.clone());
        tokio::spawn(monitor.run());
    }

    if config.api.enabled {
        let api_state = control::api::ControlApiState {
            events: events.clone(),
            snapshot: service.subscribe(),
            voices: service.subscribe_voices(),
        };
        control::api::start_control_api(api_state, config.api.port).await;
    }

    tokio::spawn(control::terminal::run(events.clone(), service.subscribe()));

    tokio::spawn({
        let events = events.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = events.send(ReaderEvent::Shutdown);
            }
        }
    });

    events.send(ControlEvent::TogglePlayPause.into())?;
    service.run().await;
    Ok(())
}

fn print_segments(config: &Config, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = HtmlFileSource::new(file, &config.reader.container_class, config.article.clone());
    let root = source.load_container()?;
    let segments = extract_segments(&root);
    if segments.is_empty() {
        warn!("Nothing to read in {}", file.display());
        return Ok(());
    }

    let sanitizer = Sanitizer::new(config.reader.chunked_voice_prefixes.clone());
    for segment in &segments {
        let spoken = sanitizer.sanitize(&segment.text, None).into_parts();
        println!("[{}] {:?}: {}", segment.index + 1, segment.kind, spoken.join(""));
    }
    Ok(())
}

fn print_prepared(config: &Config, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let page = std::fs::read_to_string(file)?;
    let prepared = article::prepare(&page, &config.article);
    info!(
        "Prepared {}: body recovered: {}, {} link(s) rewritten, {} image(s) upscaled",
        file.display(),
        prepared.recovered_body,
        prepared.links_rewritten,
        prepared.images_upscaled
    );
    println!("{}", prepared.html);
    Ok(())
}

async fn list_voices(config: Config, site: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _engine_rx) = load_engine(&config).await?;
    let voices = voices_for_language(engine.voices(), &config.reader.language);
    let store = PreferenceStore::new(&config.preferences, site, config.reader.fallback_voices.clone());
    let settings = store.load(&voices);

    println!("{} voice(s) for '{}' (site: {}):", voices.len(), config.reader.language, store.scope());
    for voice in &voices {
        let marker = if settings.voice.as_deref() == Some(voice.id.as_str()) { "*" } else { " " };
        println!(" {marker} {:<14} {}", voice.id, voice.name);
    }
    println!("rate: {}  pitch: {}", settings.rate, settings.pitch);
    Ok(())
}
