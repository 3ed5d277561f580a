/// Native backend: mpv driven over its JSON IPC socket.
///
/// Architecture:
///
/// ```text
///   MpvMedia::spawn()
///         │
///         ├── MpvDriver      ← owns the mpv child process
///         ├── writer_task    ← receives MpvRequest via mpsc, serialises → socket
///         ├── reader_task    ← reads JSON lines from socket
///         │                        ├── response (has request_id) → matched oneshot::Sender
///         │                        └── event / property-change   → mpv event channel
///         └── translate_task ← mpv events → BackendEvent
/// ```
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use radio_proto::protocol::StreamSource;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::backend::{BackendError, BackendEvent, MediaEngine};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed observe_property IDs, matched in property-change events.
pub const OBS_PAUSE: u64 = 1;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, gain: f32) -> anyhow::Result<()> {
        let vol_pct = (gain * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// Register observe_property for the properties translated into
    /// backend events.  mpv pushes a property-change whenever they change.
    pub async fn observe_properties(&self) {
        match self.send(json!(["observe_property", OBS_PAUSE, "pause"])).await {
            Ok(_) => debug!("mpv: observe_property id={} name=pause", OBS_PAUSE),
            Err(e) => warn!("mpv: observe_property pause failed: {}", e),
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    initial_gain: f32,
}

impl MpvDriver {
    pub fn new(initial_gain: f32) -> Self {
        Self {
            socket_name: radio_proto::platform::mpv_socket_name(),
            process: None,
            initial_gain,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    /// Kill the process if running and remove its socket.
    pub async fn kill(&mut self) -> anyhow::Result<()> {
        let result = match self.process.take() {
            Some(mut p) => p.kill().await.map_err(anyhow::Error::from),
            None => Ok(()),
        };
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }
        result
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        info!("mpv: spawning new process");
        let mpv_binary = radio_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.initial_gain * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let ipc_arg = radio_proto::platform::mpv_socket_arg(&self.socket_name);

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(&ipc_arg)
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            let _ = self.kill().await;
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
            }
        }
        let _ = self.kill().await;
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

/// Resolve every outstanding request with `reason`.  Used once the socket
/// is unusable, so callers see an error instead of their IPC timeout.
async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

/// mpv marks every reply with an `error` field; anything but "success" fails.
fn reply_result(val: Value) -> anyhow::Result<Value> {
    match val.get("error").and_then(Value::as_str) {
        Some("success") => Ok(val),
        Some(err) => Err(anyhow::anyhow!("mpv error: {}", err)),
        None => Err(anyhow::anyhow!("mpv reply without status")),
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

/// Lines with a `request_id` answer a command; the rest are events for
/// the translator.
async fn reader_task<R>(reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    let reason = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break "mpv IPC connection closed".to_string(),
            Err(e) => {
                warn!("mpv: IPC read failed: {}", e);
                break format!("mpv IPC read error: {}", e);
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let val: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!("mpv: skipping non-JSON line '{}': {}", line, e);
                continue;
            }
        };

        match val.get("request_id").and_then(Value::as_u64) {
            Some(req_id) => {
                let waiter = pending.lock().await.remove(&req_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply_result(val));
                    }
                    // Caller already timed out.
                    None => debug!("mpv: late reply for req={}", req_id),
                }
            }
            None => {
                if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    break "mpv event consumer gone".to_string();
                }
            }
        }
    };
    debug!("mpv: reader stopped ({})", reason);
    fail_pending(&pending, &reason).await;
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // The reply can arrive before write_all returns.
        pending.lock().await.insert(req.req_id, req.reply);
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv: IPC write failed: {}", e);
            fail_pending(&pending, &format!("mpv write error: {}", e)).await;
            break;
        }
    }
    debug!("mpv: writer stopped");
}

// ── event translation ─────────────────────────────────────────────────────────

/// Map one mpv event to a backend event.  `loaded` tracks whether a stream
/// is currently loaded into mpv; end-file clears it.
fn translate(evt: &MpvEvent, loaded: &AtomicBool) -> Option<BackendEvent> {
    if let Some((obs_id, data)) = evt.as_property_change() {
        if obs_id != OBS_PAUSE {
            return None;
        }
        return match data.as_bool() {
            Some(true) => Some(BackendEvent::Paused),
            Some(false) if loaded.load(Ordering::Relaxed) => Some(BackendEvent::Playing),
            _ => None,
        };
    }

    if evt.event_name() != Some("end-file") {
        return None;
    }
    let reason = evt
        .raw
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    info!("mpv: end-file reason={}", reason);
    match reason {
        "eof" => {
            loaded.store(false, Ordering::Relaxed);
            Some(BackendEvent::Ended)
        }
        "error" => {
            loaded.store(false, Ordering::Relaxed);
            let detail = evt
                .raw
                .get("file_error")
                .and_then(|v| v.as_str())
                .unwrap_or("playback error");
            Some(BackendEvent::LoadError(detail.to_string()))
        }
        _ => None,
    }
}

async fn translate_task(
    mut mpv_rx: mpsc::Receiver<MpvEvent>,
    events: mpsc::Sender<BackendEvent>,
    loaded: Arc<AtomicBool>,
) {
    while let Some(evt) = mpv_rx.recv().await {
        if let Some(backend_evt) = translate(&evt, &loaded) {
            if events.send(backend_evt).await.is_err() {
                break;
            }
        }
    }
    debug!("mpv: event translation finished");
}

// ── MediaEngine ───────────────────────────────────────────────────────────────

pub struct MpvMedia {
    source: StreamSource,
    driver: MpvDriver,
    handle: MpvHandle,
    loaded: Arc<AtomicBool>,
    translator: AbortHandle,
}

impl MpvMedia {
    /// Start mpv idle with the given initial gain.  Nothing is loaded until
    /// the first `play()`.
    pub async fn spawn(
        source: StreamSource,
        gain: f32,
        events: mpsc::Sender<BackendEvent>,
    ) -> Result<Self, BackendError> {
        let mut driver = MpvDriver::new(gain);
        let (mpv_tx, mpv_rx) = mpsc::channel::<MpvEvent>(64);
        let handle = driver
            .spawn_and_connect(mpv_tx)
            .await
            .map_err(|e| BackendError::Load(e.to_string()))?;
        handle.observe_properties().await;

        let loaded = Arc::new(AtomicBool::new(false));
        let translator = tokio::spawn(translate_task(mpv_rx, events, loaded.clone()));

        Ok(Self {
            source,
            driver,
            handle,
            loaded,
            translator: translator.abort_handle(),
        })
    }
}

#[async_trait]
impl MediaEngine for MpvMedia {
    async fn play(&mut self) -> Result<(), BackendError> {
        if !self.driver.process_alive() {
            return Err(BackendError::Load("mpv process is not running".to_string()));
        }
        if !self.loaded.load(Ordering::Relaxed) {
            info!("mpv: loading {}", self.source.url());
            self.handle
                .load_stream(self.source.url())
                .await
                .map_err(|e| BackendError::Load(e.to_string()))?;
            self.loaded.store(true, Ordering::Relaxed);
        }
        self.handle
            .set_pause(false)
            .await
            .map_err(|e| BackendError::Play(e.to_string()))
    }

    async fn pause(&mut self) -> Result<(), BackendError> {
        self.handle
            .set_pause(true)
            .await
            .map_err(|e| BackendError::Command(e.to_string()))
    }

    async fn set_volume(&mut self, gain: f32) -> Result<(), BackendError> {
        self.handle
            .set_volume(gain)
            .await
            .map_err(|e| BackendError::Command(e.to_string()))
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        self.loaded.store(false, Ordering::Relaxed);
        self.handle
            .stop()
            .await
            .map_err(|e| BackendError::Command(e.to_string()))
    }

    async fn unload(&mut self) -> Result<(), BackendError> {
        self.translator.abort();
        self.driver
            .kill()
            .await
            .map_err(|e| BackendError::Command(e.to_string()))
    }
}
