/// PlayerCore: single-owner event loop for playback state.
///
/// Everything that wants to change playback sends a `PlayerEvent` to this
/// loop: UI commands, backend events (forwarded with the generation of the
/// backend that produced them) and finished metadata polls.  PlayerCore owns
/// the backend and the poller exclusively; no other task touches them.
///
/// The poller runs exactly while the state is `Playing`.  Every state change
/// goes through `transition`/`fail`, which start or stop it in the same step.
///
/// After each event that mutates state, PlayerCore broadcasts
/// `BroadcastMessage::StateUpdated` to all listeners.
use std::sync::Arc;
use std::time::Duration;

use radio_proto::config::Config;
use radio_proto::metadata::ParsedMetadata;
use radio_proto::protocol::{Command, PlaybackState, Platform, StreamSource, Volume};
use radio_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, BackendEvent, BackendFactory, PlaybackBackend};
use crate::fetch::{fetch_now_playing, HttpGet};
use crate::poller::Poller;
use crate::BroadcastMessage;

// ── PlayerEvent ───────────────────────────────────────────────────────────────

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum PlayerEvent {
    /// A command from the UI boundary.
    Command(Command),
    /// An engine event, tagged with the backend generation that emitted it.
    Backend { generation: u64, event: BackendEvent },
    /// A metadata poll completed and parsed.
    Metadata(ParsedMetadata),
    Shutdown,
}

/// Fixed inputs of the controller, resolved once at startup.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub platform: Platform,
    pub source: StreamSource,
    pub metadata_url: String,
    pub poll_interval: Duration,
}

impl CoreSettings {
    pub fn from_config(config: &Config, platform: Platform) -> Self {
        Self {
            platform,
            source: config.station.stream_source(),
            metadata_url: config.station.metadata_url.clone(),
            poll_interval: config.player.poll_interval(),
        }
    }
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore {
    settings: CoreSettings,
    state_manager: Arc<StateManager>,
    factory: Arc<dyn BackendFactory>,
    /// Created on the first play, released only by `dispose`.
    backend: Option<PlaybackBackend>,
    /// Bumped for every backend created.  Events from older ones are dropped.
    generation: u64,
    /// Task relaying the current backend's events into our own loop.
    forwarder: Option<AbortHandle>,
    poller: Poller,
    event_tx: mpsc::Sender<PlayerEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl PlayerCore {
    pub fn new(
        settings: CoreSettings,
        state_manager: Arc<StateManager>,
        factory: Arc<dyn BackendFactory>,
        http: Arc<dyn HttpGet>,
        event_tx: mpsc::Sender<PlayerEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let poller = metadata_poller(&settings, http, event_tx.clone());
        Self {
            settings,
            state_manager,
            factory,
            backend: None,
            generation: 0,
            forwarder: None,
            poller,
            event_tx,
            broadcast_tx,
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_active()
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender is gone.  The backend is released on the way out.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<PlayerEvent>) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop ({} backend)", self.settings.platform);
        loop {
            match event_rx.recv().await {
                None => {
                    info!("PlayerCore: event channel closed, shutting down");
                    break;
                }
                Some(evt) => {
                    if !self.handle_event(evt).await {
                        break;
                    }
                }
            }
        }
        self.dispose().await;
        Ok(())
    }

    /// Apply one event.  Returns false once the loop should stop.
    pub async fn handle_event(&mut self, evt: PlayerEvent) -> bool {
        match evt {
            PlayerEvent::Shutdown => {
                info!("PlayerCore: shutdown requested");
                return false;
            }
            PlayerEvent::Command(cmd) => {
                info!("PlayerCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            PlayerEvent::Backend { generation, event } => {
                self.handle_backend_event(generation, event).await;
            }
            PlayerEvent::Metadata(parsed) => {
                self.apply_metadata(parsed).await;
            }
        }
        true
    }

    async fn handle_command(&mut self, cmd: Command) {
        let result = match cmd {
            Command::Play => self.play().await,
            Command::Pause => self.pause().await,
            Command::TogglePlay => self.toggle_play().await,
            Command::SetVolume { value } => {
                self.set_volume(value).await;
                Ok(())
            }
            Command::Dispose => {
                self.dispose().await;
                Ok(())
            }
            Command::GetState => {
                self.broadcast();
                Ok(())
            }
        };
        // Already recorded as Errored; nothing else to do.
        if let Err(e) = result {
            error!("PlayerCore: command error: {}", e);
        }
    }

    // ── operations ────────────────────────────────────────────────────────────

    /// Start playback, creating the backend on first use.  A failure leaves
    /// the state `Errored` with the poller stopped.
    pub async fn play(&mut self) -> Result<(), BackendError> {
        if self.state_manager.playback_state().await.is_playing() {
            return Ok(());
        }
        match self.start_backend().await {
            Ok(()) => {
                self.transition(PlaybackState::Playing).await;
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// No-op unless `Playing`.
    pub async fn pause(&mut self) -> Result<(), BackendError> {
        if !self.state_manager.playback_state().await.is_playing() {
            return Ok(());
        }
        let result = match self.backend.as_mut() {
            Some(backend) => backend.pause().await,
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                self.transition(PlaybackState::Paused).await;
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    pub async fn toggle_play(&mut self) -> Result<(), BackendError> {
        if self.state_manager.playback_state().await.is_playing() {
            self.pause().await
        } else {
            self.play().await
        }
    }

    /// Clamp, store and apply to the live backend if there is one.
    pub async fn set_volume(&mut self, value: i64) -> Volume {
        let volume = Volume::clamped(value);
        if let Err(e) = self.state_manager.set_volume(volume).await {
            warn!("PlayerCore: failed to persist volume: {}", e);
        }
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.set_volume(volume).await {
                warn!("PlayerCore: backend rejected volume {}: {}", volume.percent(), e);
            }
        }
        self.broadcast();
        volume
    }

    /// Stop polling, release the backend and go back to `Idle`.  Release
    /// failures are logged and never propagated.
    pub async fn dispose(&mut self) {
        self.poller.stop();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(backend) = self.backend.take() {
            info!("PlayerCore: releasing {} backend", backend.platform());
            for e in backend.release().await {
                warn!("PlayerCore: release: {}", e);
            }
        }
        self.transition(PlaybackState::Idle).await;
    }

    // ── backend ───────────────────────────────────────────────────────────────

    async fn start_backend(&mut self) -> Result<(), BackendError> {
        if self.backend.is_none() {
            let backend = self.create_backend().await?;
            self.backend = Some(backend);
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.play().await?;
        }
        Ok(())
    }

    async fn create_backend(&mut self) -> Result<PlaybackBackend, BackendError> {
        self.generation += 1;
        let generation = self.generation;
        let volume = self.state_manager.volume().await;
        info!(
            "PlayerCore: creating {} backend (generation {}, volume {})",
            self.settings.platform,
            generation,
            volume.percent()
        );

        let (backend_tx, mut backend_rx) = mpsc::channel::<BackendEvent>(32);
        let event_tx = self.event_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = backend_rx.recv().await {
                if event_tx
                    .send(PlayerEvent::Backend { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        if let Some(old) = self.forwarder.replace(forwarder.abort_handle()) {
            old.abort();
        }

        self.factory
            .create(self.settings.platform, &self.settings.source, volume, backend_tx)
            .await
    }

    async fn handle_backend_event(&mut self, generation: u64, event: BackendEvent) {
        if generation != self.generation || self.backend.is_none() {
            debug!("PlayerCore: dropping stale backend event {:?} (gen {})", event, generation);
            return;
        }
        let current = self.state_manager.playback_state().await;
        debug!("PlayerCore: backend event {:?} while {:?}", event, current);

        match event {
            // Our own play() already moved to Playing.  Only a backend that
            // recovered on its own brings us back here.
            BackendEvent::Playing => {
                if matches!(current, PlaybackState::Errored | PlaybackState::Ended) {
                    self.transition(PlaybackState::Playing).await;
                }
            }
            BackendEvent::Paused => {
                if current == PlaybackState::Playing {
                    self.transition(PlaybackState::Paused).await;
                }
            }
            BackendEvent::Ended => {
                if matches!(current, PlaybackState::Playing | PlaybackState::Paused) {
                    info!("PlayerCore: stream ended");
                    self.transition(PlaybackState::Ended).await;
                }
            }
            BackendEvent::LoadError(msg) | BackendEvent::PlayError(msg) => {
                self.fail(msg).await;
            }
        }
    }

    // ── state ─────────────────────────────────────────────────────────────────

    async fn transition(&mut self, next: PlaybackState) {
        if next.is_playing() {
            self.poller.start();
        } else {
            self.poller.stop();
        }
        self.state_manager.set_playback_state(next).await;
        self.broadcast();
    }

    async fn fail(&mut self, message: String) {
        warn!("PlayerCore: playback error: {}", message);
        self.poller.stop();
        self.state_manager.set_errored(message).await;
        self.broadcast();
    }

    /// Last writer wins: a slow poll may land after a newer one.
    async fn apply_metadata(&mut self, parsed: ParsedMetadata) {
        if let Some(song) = parsed.now_playing {
            debug!("PlayerCore: now playing {} - {}", song.artist, song.title);
            self.state_manager.set_now_playing(song).await;
        }
        self.state_manager.set_stats(parsed.stats).await;
        self.broadcast();
    }

    fn broadcast(&self) {
        // no receivers is fine
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}

/// Each tick spawns one fetch and returns; results come back as
/// `PlayerEvent::Metadata`.  Failed polls are logged and skipped.
fn metadata_poller(
    settings: &CoreSettings,
    http: Arc<dyn HttpGet>,
    event_tx: mpsc::Sender<PlayerEvent>,
) -> Poller {
    let url = settings.metadata_url.clone();
    Poller::new(settings.poll_interval, move || {
        let http = Arc::clone(&http);
        let url = url.clone();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            match fetch_now_playing(http.as_ref(), &url).await {
                Ok(parsed) => {
                    let _ = event_tx.send(PlayerEvent::Metadata(parsed)).await;
                }
                Err(e) => warn!("metadata poll failed: {}", e),
            }
        });
    })
}
