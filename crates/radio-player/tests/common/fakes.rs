use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use radio_player::backend::{
    BackendError, BackendEvent, BackendFactory, MediaEngine, PlaybackBackend,
};
use radio_player::fetch::{Body, FetchError, GetOptions, HttpGet};
use radio_proto::protocol::{Platform, StreamSource, Volume};
use tokio::sync::mpsc;

/// What the engines created by a `FakeFactory` were asked to do.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub calls: Vec<&'static str>,
    pub gains: Vec<f32>,
}

/// Failure switches shared by every engine a factory hands out.
#[derive(Debug, Default)]
pub struct Faults {
    pub create: AtomicBool,
    pub play: AtomicBool,
    pub pause: AtomicBool,
    pub release: AtomicBool,
}

pub struct FakeEngine {
    log: Arc<Mutex<EngineLog>>,
    faults: Arc<Faults>,
}

impl FakeEngine {
    fn record(&self, call: &'static str) {
        self.log.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn play(&mut self) -> Result<(), BackendError> {
        self.record("play");
        if self.faults.play.load(Ordering::SeqCst) {
            return Err(BackendError::Play("autoplay blocked".to_string()));
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), BackendError> {
        self.record("pause");
        if self.faults.pause.load(Ordering::SeqCst) {
            return Err(BackendError::Command("pause failed".to_string()));
        }
        Ok(())
    }

    async fn set_volume(&mut self, gain: f32) -> Result<(), BackendError> {
        self.record("set_volume");
        self.log.lock().unwrap().gains.push(gain);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        self.record("stop");
        if self.faults.release.load(Ordering::SeqCst) {
            return Err(BackendError::Command("stop failed".to_string()));
        }
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), BackendError> {
        self.record("unload");
        if self.faults.release.load(Ordering::SeqCst) {
            return Err(BackendError::Command("unload failed".to_string()));
        }
        Ok(())
    }
}

pub struct FakeFactory {
    pub created: AtomicUsize,
    pub created_with: Mutex<Vec<(Platform, Volume)>>,
    pub log: Arc<Mutex<EngineLog>>,
    pub faults: Arc<Faults>,
    /// Event sender handed to the most recent engine, for injecting events.
    events: Mutex<Option<mpsc::Sender<BackendEvent>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            created_with: Mutex::new(Vec::new()),
            log: Arc::new(Mutex::new(EngineLog::default())),
            faults: Arc::new(Faults::default()),
            events: Mutex::new(None),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn last_gain(&self) -> Option<f32> {
        self.log.lock().unwrap().gains.last().copied()
    }

    /// Emit `event` as the current engine would.
    pub async fn emit(&self, event: BackendEvent) {
        let tx = self.events.lock().unwrap().clone();
        tx.expect("no engine has been created")
            .send(event)
            .await
            .unwrap();
    }
}

#[async_trait]
impl BackendFactory for FakeFactory {
    async fn create(
        &self,
        platform: Platform,
        _source: &StreamSource,
        volume: Volume,
        events: mpsc::Sender<BackendEvent>,
    ) -> Result<PlaybackBackend, BackendError> {
        if self.faults.create.load(Ordering::SeqCst) {
            return Err(BackendError::Load("stream unavailable".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.created_with.lock().unwrap().push((platform, volume));
        *self.events.lock().unwrap() = Some(events);

        let engine = Box::new(FakeEngine {
            log: self.log.clone(),
            faults: self.faults.clone(),
        });
        Ok(match platform {
            Platform::Web => PlaybackBackend::Web(engine),
            Platform::Native => PlaybackBackend::Native(engine),
        })
    }
}

/// Serves one canned body and counts requests.  `None` fails the request.
pub struct FakeHttp {
    body: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FakeHttp {
    pub fn new(body: &str) -> Self {
        Self {
            body: Mutex::new(Some(body.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_body(&self, body: Option<&str>) {
        *self.body.lock().unwrap() = body.map(str::to_string);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpGet for FakeHttp {
    async fn get(&self, _url: &str, _options: &GetOptions) -> Result<Body, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.body.lock().unwrap().clone() {
            Some(text) => Ok(Body::Text(text)),
            None => Err(FetchError::Status(503)),
        }
    }
}
