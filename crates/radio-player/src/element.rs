/// In-process streaming element (the `Web` backend).
///
/// Opens **one** upstream HTTP connection to the station and relays the raw
/// bytes into a [`StreamTap`].  Anything that wants to render the audio (the
/// `/stream` route of the local API, a browser `<audio>` element pointed at
/// it) subscribes to the tap.  Nothing here decodes audio.
///
/// Lifecycle
/// ─────────
/// • `play()` connects and validates the response, then spawns a pump task.
///   Connection failures, and an upstream that sends no headers within
///   `RESPONSE_TIMEOUT`, are returned synchronously as `Load`.  A non-2xx or
///   non-audio response is `Play`.
/// • `pause()` / `stop()` abort the pump.  A live stream cannot be resumed
///   mid-buffer, so the next `play()` reconnects.
/// • The pump reports `Ended` when upstream closes and `LoadError` on a read
///   error.  It never reconnects on its own.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use radio_proto::protocol::StreamSource;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BackendEvent, MediaEngine};

const TAP_CAPACITY: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on waiting for the response headers.  `play()` runs on the
/// player core's loop, so it must not hang on a silent upstream.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

// ── StreamTap ─────────────────────────────────────────────────────────────────

/// Fan-out point for the element's audio bytes.
#[derive(Clone)]
pub struct StreamTap {
    inner: Arc<TapInner>,
}

struct TapInner {
    sender: broadcast::Sender<Bytes>,
    content_type: RwLock<Option<String>>,
    gain_bits: AtomicU32,
}

impl StreamTap {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            inner: Arc::new(TapInner {
                sender,
                content_type: RwLock::new(None),
                gain_bits: AtomicU32::new(1.0f32.to_bits()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.inner.sender.subscribe()
    }

    /// Content type announced by upstream for the current connection.
    pub fn content_type(&self) -> Option<String> {
        self.inner.content_type.read().ok().and_then(|ct| ct.clone())
    }

    /// Gain the renderer should apply (0.0..=1.0).
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.inner.gain_bits.load(Ordering::Relaxed))
    }

    fn publish(&self, chunk: Bytes) {
        // no subscribers is fine
        let _ = self.inner.sender.send(chunk);
    }

    fn set_content_type(&self, content_type: Option<String>) {
        if let Ok(mut ct) = self.inner.content_type.write() {
            *ct = content_type;
        }
    }

    fn set_gain(&self, gain: f32) {
        self.inner
            .gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for StreamTap {
    fn default() -> Self {
        Self::new()
    }
}

// ── HttpStreamElement ─────────────────────────────────────────────────────────

pub struct HttpStreamElement {
    source: StreamSource,
    client: Client,
    tap: StreamTap,
    events: mpsc::Sender<BackendEvent>,
    pump: Option<AbortHandle>,
    unloaded: bool,
    response_timeout: Duration,
}

impl HttpStreamElement {
    pub fn new(
        source: StreamSource,
        gain: f32,
        tap: StreamTap,
        events: mpsc::Sender<BackendEvent>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(CONNECT_TIMEOUT)
            // Shoutcast answers browser user agents with its HTML status page
            .user_agent(concat!("radionline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Load(e.to_string()))?;
        tap.set_gain(gain);

        Ok(Self {
            source,
            client,
            tap,
            events,
            pump: None,
            unloaded: false,
            response_timeout: RESPONSE_TIMEOUT,
        })
    }

    fn pump_running(&self) -> bool {
        self.pump.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn abort_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

fn is_audio_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("audio/") || mime == "application/ogg" || mime == "application/octet-stream"
}

#[async_trait]
impl MediaEngine for HttpStreamElement {
    async fn play(&mut self) -> Result<(), BackendError> {
        if self.unloaded {
            return Err(BackendError::Load("element has been unloaded".to_string()));
        }
        if self.pump_running() {
            return Ok(());
        }

        info!("element: opening stream {}", self.source.url());
        let request = self.client.get(self.source.url()).send();
        let response = tokio::time::timeout(self.response_timeout, request)
            .await
            .map_err(|_| {
                BackendError::Load(format!(
                    "no response from stream within {:?}",
                    self.response_timeout
                ))
            })?
            .map_err(|e| BackendError::Load(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Play(format!("stream returned HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(ct) = content_type.as_deref() {
            if !is_audio_content_type(ct) {
                return Err(BackendError::Play(format!("unsupported content type {}", ct)));
            }
        }
        self.tap.set_content_type(content_type);

        let tap = self.tap.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut total = 0usize;
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        total += bytes.len();
                        tap.publish(bytes);
                    }
                    Err(e) => {
                        warn!("element: stream read error after {} bytes: {}", total, e);
                        let _ = events.send(BackendEvent::LoadError(e.to_string())).await;
                        return;
                    }
                }
            }
            info!("element: upstream closed after {} bytes", total);
            let _ = events.send(BackendEvent::Ended).await;
        });
        self.pump = Some(task.abort_handle());
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), BackendError> {
        debug!("element: pause");
        self.abort_pump();
        Ok(())
    }

    async fn set_volume(&mut self, gain: f32) -> Result<(), BackendError> {
        self.tap.set_gain(gain);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        debug!("element: stop");
        self.abort_pump();
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), BackendError> {
        self.abort_pump();
        self.tap.set_content_type(None);
        self.unloaded = true;
        Ok(())
    }
}

impl Drop for HttpStreamElement {
    fn drop(&mut self) {
        self.abort_pump();
    }
}
