//! Playback backends.
//!
//! The controller only ever talks to a [`PlaybackBackend`], a two-variant
//! type selected once from the detected [`Platform`]:
//!
//! ```text
//!   PlaybackBackend::Web     ← in-process streaming element  (element.rs)
//!   PlaybackBackend::Native  ← native media player handle    (mpv.rs)
//! ```
//!
//! Both variants wrap a [`MediaEngine`], which exposes the raw primitives.
//! Engines report asynchronous transitions (stream ended, load failure, ...)
//! as [`BackendEvent`]s on the channel handed to them at construction.
use async_trait::async_trait;
use radio_proto::protocol::{Platform, StreamSource, Volume};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::element::{HttpStreamElement, StreamTap};
use crate::mpv::MpvMedia;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Stream unavailable or the engine could not be created.
    #[error("failed to load stream: {0}")]
    Load(String),

    /// The engine refused to start playback.
    #[error("playback rejected: {0}")]
    Play(String),

    /// Any other primitive (pause, volume, stop, unload) failed.
    #[error("backend command failed: {0}")]
    Command(String),
}

/// Unsolicited state changes reported by an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Playing,
    Paused,
    Ended,
    LoadError(String),
    PlayError(String),
}

/// Raw primitives of one audio engine.
#[async_trait]
pub trait MediaEngine: Send {
    async fn play(&mut self) -> Result<(), BackendError>;
    async fn pause(&mut self) -> Result<(), BackendError>;
    /// `gain` is linear, 0.0..=1.0.
    async fn set_volume(&mut self, gain: f32) -> Result<(), BackendError>;
    async fn stop(&mut self) -> Result<(), BackendError>;
    /// Free everything the engine holds.  The engine is unusable afterwards.
    async fn unload(&mut self) -> Result<(), BackendError>;
}

pub enum PlaybackBackend {
    Web(Box<dyn MediaEngine>),
    Native(Box<dyn MediaEngine>),
}

impl std::fmt::Debug for PlaybackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PlaybackBackend::{}", self.platform())
    }
}

impl PlaybackBackend {
    pub fn platform(&self) -> Platform {
        match self {
            PlaybackBackend::Web(_) => Platform::Web,
            PlaybackBackend::Native(_) => Platform::Native,
        }
    }

    fn engine(&mut self) -> &mut dyn MediaEngine {
        match self {
            PlaybackBackend::Web(engine) | PlaybackBackend::Native(engine) => engine.as_mut(),
        }
    }

    pub async fn play(&mut self) -> Result<(), BackendError> {
        self.engine().play().await
    }

    pub async fn pause(&mut self) -> Result<(), BackendError> {
        self.engine().pause().await
    }

    pub async fn set_volume(&mut self, volume: Volume) -> Result<(), BackendError> {
        self.engine().set_volume(volume.gain()).await
    }

    /// Stop, then unload.  Both steps always run; failures are collected
    /// rather than short-circuiting.
    pub async fn release(mut self) -> Vec<BackendError> {
        let platform = self.platform();
        let mut errors = Vec::new();
        if let Err(e) = self.engine().stop().await {
            warn!("{} backend: stop during release failed: {}", platform, e);
            errors.push(e);
        }
        if let Err(e) = self.engine().unload().await {
            warn!("{} backend: unload during release failed: {}", platform, e);
            errors.push(e);
        }
        debug!("{} backend released ({} errors)", platform, errors.len());
        errors
    }
}

/// Builds the backend for a platform.  The controller calls this lazily on
/// the first `play()` and after a release.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create(
        &self,
        platform: Platform,
        source: &StreamSource,
        volume: Volume,
        events: mpsc::Sender<BackendEvent>,
    ) -> Result<PlaybackBackend, BackendError>;
}

/// Production backends: the HTTP streaming element for `Web` and mpv for
/// `Native`.
pub struct SystemBackends {
    tap: StreamTap,
}

impl SystemBackends {
    /// `tap` receives the element's audio bytes on the web platform.
    pub fn new(tap: StreamTap) -> Self {
        Self { tap }
    }
}

#[async_trait]
impl BackendFactory for SystemBackends {
    async fn create(
        &self,
        platform: Platform,
        source: &StreamSource,
        volume: Volume,
        events: mpsc::Sender<BackendEvent>,
    ) -> Result<PlaybackBackend, BackendError> {
        match platform {
            Platform::Web => {
                let element =
                    HttpStreamElement::new(source.clone(), volume.gain(), self.tap.clone(), events)?;
                Ok(PlaybackBackend::Web(Box::new(element)))
            }
            Platform::Native => {
                let media = MpvMedia::spawn(source.clone(), volume.gain(), events).await?;
                Ok(PlaybackBackend::Native(Box::new(media)))
            }
        }
    }
}
