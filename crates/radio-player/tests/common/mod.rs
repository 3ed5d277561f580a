#![allow(dead_code)]

pub mod fakes;

use std::sync::Arc;
use std::time::Duration;

use radio_player::core::{CoreSettings, PlayerCore, PlayerEvent};
use radio_player::BroadcastMessage;
use radio_proto::protocol::{PlayerState, Platform, StationInfo, StreamSource, Volume};
use radio_proto::state::StateManager;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use fakes::{FakeFactory, FakeHttp};

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const METADATA_URL: &str = "http://stats.test/stats?sid=1";

pub const FIXTURE_XML: &str = "<SHOUTCASTSERVER>\
    <CURRENTLISTENERS>7</CURRENTLISTENERS>\
    <SERVERTITLE>Undeco RadiOnline</SERVERTITLE>\
    <BITRATE>128</BITRATE>\
    <SONGTITLE>DJ X - Night Drive</SONGTITLE>\
    </SHOUTCASTSERVER>";

pub fn settings(platform: Platform) -> CoreSettings {
    CoreSettings {
        platform,
        source: StreamSource::new("http://stream.test/8006/stream"),
        metadata_url: METADATA_URL.to_string(),
        poll_interval: POLL_INTERVAL,
    }
}

/// A core wired to fakes, driven by hand instead of through `run`.
pub struct Harness {
    pub core: PlayerCore,
    pub events: mpsc::Receiver<PlayerEvent>,
    pub updates: broadcast::Receiver<BroadcastMessage>,
    pub factory: Arc<FakeFactory>,
    pub http: Arc<FakeHttp>,
    pub state: Arc<StateManager>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(platform: Platform) -> Self {
        Self::with_fakes(platform, FakeFactory::new(), FakeHttp::new(FIXTURE_XML))
    }

    pub fn with_fakes(platform: Platform, factory: FakeFactory, http: FakeHttp) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(StateManager::new(
            dir.path().join("state.json"),
            StationInfo {
                name: "Undeco RadiOnline".to_string(),
                tagline: String::new(),
                logo: String::new(),
            },
            platform,
            Volume::default(),
        ));
        let factory = Arc::new(factory);
        let http = Arc::new(http);
        let (event_tx, events) = mpsc::channel(64);
        let (broadcast_tx, updates) = broadcast::channel(64);
        let core = PlayerCore::new(
            settings(platform),
            state.clone(),
            factory.clone(),
            http.clone(),
            event_tx,
            broadcast_tx,
        );
        Self {
            core,
            events,
            updates,
            factory,
            http,
            state,
            _dir: dir,
        }
    }

    /// Let spawned tasks (fetches, event forwarders) run and feed whatever
    /// they queued back into the core.
    pub async fn settle(&mut self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
            while let Ok(evt) = self.events.try_recv() {
                self.core.handle_event(evt).await;
            }
        }
    }

    /// Advance paused time, then settle.
    pub async fn advance(&mut self, by: Duration) {
        tokio::time::sleep(by).await;
        self.settle().await;
    }

    pub async fn snapshot(&self) -> PlayerState {
        self.state.get_state().await
    }

    /// Playing if and only if the poller runs.
    pub async fn assert_poll_invariant(&self) {
        let playing = self.snapshot().await.is_playing();
        assert_eq!(
            playing,
            self.core.is_polling(),
            "playing={} but polling={}",
            playing,
            self.core.is_polling()
        );
    }
}
