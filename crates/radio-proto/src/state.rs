use crate::protocol::{
    NowPlaying, PlaybackState, Platform, PlayerState, StationInfo, StreamStats, Volume,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The part of the state that survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub volume: Volume,
}

/// Holds the observable `PlayerState`.  Only the player core writes through
/// this; everything else reads snapshots.
pub struct StateManager {
    state: Arc<RwLock<PlayerState>>,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(
        state_file: PathBuf,
        station: StationInfo,
        platform: Platform,
        default_volume: Volume,
    ) -> Self {
        let volume = Self::load_persistent(&state_file)
            .map(|p| p.volume)
            .unwrap_or(default_volume);

        let state = PlayerState {
            rev: 1,
            station,
            platform,
            playback_state: PlaybackState::Idle,
            volume,
            current_song: NowPlaying::default(),
            stats: StreamStats::default(),
            last_error: None,
            song_updated_at: None,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
        }
    }

    pub async fn get_state(&self) -> PlayerState {
        self.state.read().await.clone()
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.state.read().await.playback_state
    }

    pub async fn volume(&self) -> Volume {
        self.state.read().await.volume
    }

    pub async fn set_playback_state(&self, playback_state: PlaybackState) {
        let mut state = self.state.write().await;
        state.playback_state = playback_state;
        if playback_state == PlaybackState::Playing {
            state.last_error = None;
        }
        state.rev += 1;
    }

    /// Record a backend fault: the state becomes `Errored` with `message`.
    pub async fn set_errored(&self, message: String) {
        let mut state = self.state.write().await;
        state.playback_state = PlaybackState::Errored;
        state.last_error = Some(message);
        state.rev += 1;
    }

    pub async fn set_volume(&self, volume: Volume) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.volume = volume;
            state.rev += 1;
        }
        self.save().await
    }

    pub async fn set_now_playing(&self, song: NowPlaying) {
        let mut state = self.state.write().await;
        state.current_song = song;
        state.song_updated_at = Some(chrono::Local::now());
        state.rev += 1;
    }

    pub async fn set_stats(&self, stats: StreamStats) {
        let mut state = self.state.write().await;
        if state.stats != stats {
            state.stats = stats;
            state.rev += 1;
        }
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = PersistentState {
            volume: self.state.read().await.volume,
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> Option<PersistentState> {
        let content = std::fs::read_to_string(state_file).ok()?;
        match serde_json::from_str::<PersistentState>(&content) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!("state: ignoring unreadable {:?}: {}", state_file, e);
                None
            }
        }
    }
}
