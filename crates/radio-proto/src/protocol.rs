use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Commands accepted by the player core from the UI boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    Play,
    Pause,
    TogglePlay,
    /// Raw slider value; the core clamps it to 0..=100.
    SetVolume { value: i64 },
    Dispose,
    GetState,
}

/// Playback status as owned by the player core.
///
/// Transitions:
///   Idle -> Playing <-> Paused
///   Playing -> Ended           (stream finished, not reachable by user pause)
///   any active -> Errored      (backend load/play failure)
///   Errored | Ended -> Playing (fresh play)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    Ended,
    Errored,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }
}

/// Which kind of playback backend the controller drives.  Detected once at
/// startup and never re-evaluated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// In-process streaming element.
    Web,
    /// Native media player handle.
    Native,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Web => f.write_str("web"),
            Platform::Native => f.write_str("native"),
        }
    }
}

/// URL of the audio stream.  Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource(String);

impl StreamSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn url(&self) -> &str {
        &self.0
    }
}

/// Output volume in percent, always within 0..=100.  Deserializing clamps
/// like `clamped`, so an edited state file cannot push it out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Volume(u8);

impl Volume {
    pub const MAX: Volume = Volume(100);

    /// Clamp an arbitrary slider value into range.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, 100) as u8)
    }

    pub fn percent(&self) -> u8 {
        self.0
    }

    /// Linear gain (0.0..=1.0) as backends expect it.
    pub fn gain(&self) -> f32 {
        self.0 as f32 / 100.0
    }
}

impl From<i64> for Volume {
    fn from(value: i64) -> Self {
        Volume::clamped(value)
    }
}

impl From<Volume> for u8 {
    fn from(volume: Volume) -> Self {
        volume.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(80)
    }
}

/// Song currently on air, as scraped from the station status feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub title: String,
    /// Empty when the feed gives no "artist - title" separator.
    #[serde(default)]
    pub artist: String,
    /// The feed never supplies an album; kept for UI parity.
    #[serde(default)]
    pub album: String,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self {
            title: "Loading".to_string(),
            artist: String::new(),
            album: String::new(),
        }
    }
}

/// Diagnostic fields from the status feed.  They never affect `NowPlaying`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub server_title: String,
    pub listeners: String,
    pub bitrate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationInfo {
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub logo: String,
}

/// Full observable state of the player.  `rev` is incremented on every
/// change so observers can tell whether they missed an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub rev: u64,
    pub station: StationInfo,
    pub platform: Platform,
    pub playback_state: PlaybackState,
    pub volume: Volume,
    pub current_song: NowPlaying,
    #[serde(default)]
    pub stats: StreamStats,
    /// Last non-fatal backend error, for display.  Cleared on successful play.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When `current_song` was last replaced by a fetched value.
    #[serde(default)]
    pub song_updated_at: Option<DateTime<Local>>,
}

impl PlayerState {
    pub fn is_playing(&self) -> bool {
        self.playback_state.is_playing()
    }
}
