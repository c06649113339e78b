//! Reader service: the single task that owns the playback controller.
//!
//! Control surfaces, engine callbacks and deferred pause retries all
//! arrive as events and are applied one at a time, so the controller
//! never sees concurrent transitions.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::control::ControlEvent;
use crate::engine::{EngineEvent, Voice};
use crate::reader::controller::{PlaybackController, PlaybackSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    Control(ControlEvent),
    Engine(EngineEvent),
    PauseRetry { epoch: u64, attempt: u32 },
    Shutdown,
}

impl From<ControlEvent> for ReaderEvent {
    fn from(event: ControlEvent) -> Self {
        Self::Control(event)
    }
}

pub struct ReaderService {
    controller: PlaybackController,
    events_tx: mpsc::UnboundedSender<ReaderEvent>,
    events_rx: mpsc::UnboundedReceiver<ReaderEvent>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
    voices_tx: watch::Sender<Vec<Voice>>,
}

impl ReaderService {
    pub fn new(controller: PlaybackController, engine_rx: mpsc::UnboundedReceiver<EngineEvent>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(controller.snapshot());
        let (voices_tx, _) = watch::channel(controller.voices().to_vec());
        Self {
            controller,
            events_tx,
            events_rx,
            engine_rx,
            snapshot_tx,
            voices_tx,
        }
    }

    /// Sender for control surfaces.
    pub fn sender(&self) -> mpsc::UnboundedSender<ReaderEvent> {
        self.events_tx.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe_voices(&self) -> watch::Receiver<Vec<Voice>> {
        self.voices_tx.subscribe()
    }

    /// Process events until quit or shutdown. Playback is stopped on exit.
    pub async fn run(mut self) {
        info!("Reader ready");

        loop {
            let event = tokio::select! {
                Some(event) = self.events_rx.recv() => event,
                Some(event) = self.engine_rx.recv() => ReaderEvent::Engine(event),
                else => break,
            };

            if !self.handle(event) {
                break;
            }
            self.schedule_pause_retry();
            self.snapshot_tx.send_replace(self.controller.snapshot());
        }

        self.controller.stop();
        self.snapshot_tx.send_replace(self.controller.snapshot());
        info!("Reader stopped");
    }

    /// Apply one event. Returns false when the service should exit.
    fn handle(&mut self, event: ReaderEvent) -> bool {
        debug!("Event: {event:?}");
        match event {
            ReaderEvent::Control(control) => return self.on_control(control),
            ReaderEvent::Engine(EngineEvent::Ready) => {
                self.controller.refresh_voices();
                self.voices_tx.send_replace(self.controller.voices().to_vec());
            }
            ReaderEvent::Engine(EngineEvent::UtteranceEnded { id }) => {
                self.controller.utterance_ended(id);
            }
            ReaderEvent::PauseRetry { epoch, attempt } => {
                self.controller.retry_pause(epoch, attempt);
            }
            ReaderEvent::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    fn on_control(&mut self, event: ControlEvent) -> bool {
        match event {
            ControlEvent::TogglePlayPause => self.controller.toggle_play_pause(),
            ControlEvent::Stop => self.controller.stop(),
            ControlEvent::Next => self.controller.next(),
            ControlEvent::Previous => self.controller.previous(),
            ControlEvent::SetVoice(id) => {
                self.controller.set_voice(&id);
            }
            ControlEvent::SetRate(rate) => self.controller.set_rate(rate),
            ControlEvent::SetPitch(pitch) => self.controller.set_pitch(pitch),
            ControlEvent::Quit => return false,
        }
        true
    }

    fn schedule_pause_retry(&mut self) {
        let Some(retry) = self.controller.take_scheduled_retry() else {
            return;
        };
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retry.delay).await;
            if tx
                .send(ReaderEvent::PauseRetry {
                    epoch: retry.epoch,
                    attempt: retry.attempt,
                })
                .is_err()
            {
                warn!("Reader gone, dropping pause retry #{}", retry.attempt);
            }
        });
    }
}
