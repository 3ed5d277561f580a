use std::sync::Arc;

use radio_player::backend::SystemBackends;
use radio_player::core::{CoreSettings, PlayerCore, PlayerEvent};
use radio_player::element::StreamTap;
use radio_player::fetch::HttpShim;
use radio_player::http::{self, HttpState, RecentLogs};
use radio_player::BroadcastMessage;
use radio_proto::config::Config;
use radio_proto::platform::detect_platform;
use radio_proto::protocol::Platform;
use radio_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR events to the broadcast channel so the API can
/// show recent problems.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut line = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut line));

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(line));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so the logging layer can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);
    let recent_logs = RecentLogs::collect(broadcast_tx.subscribe());

    let data_dir = radio_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("player.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(BroadcastLayer {
            sender: broadcast_tx.clone(),
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,radio_player=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let platform = detect_platform(config.player.platform);
    info!("Playback platform: {}", platform);

    let state_manager = Arc::new(StateManager::new(
        config.daemon.state_file.clone(),
        config.station.info(),
        platform,
        config.player.default_volume(),
    ));

    let tap = StreamTap::new();
    let backends = Arc::new(SystemBackends::new(tap.clone()));
    let shim = Arc::new(HttpShim::for_platform(platform)?);

    // Event channel: all external inputs funnel into PlayerCore
    let (event_tx, event_rx) = mpsc::channel::<PlayerEvent>(256);

    let core = PlayerCore::new(
        CoreSettings::from_config(&config, platform),
        state_manager.clone(),
        backends,
        shim,
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let http_state = HttpState::new(
            state_manager.clone(),
            event_tx.clone(),
            config.social.clone(),
            (platform == Platform::Web).then_some(tap),
            recent_logs,
        );
        let _http_handle =
            http::start_server(config.http.bind_address.clone(), config.http.port, http_state);
    } else {
        warn!("HTTP API disabled; nothing can control playback");
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(PlayerEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Player initialised, running event loop");
    core.run(event_rx).await?;
    info!("Player stopped");

    Ok(())
}
