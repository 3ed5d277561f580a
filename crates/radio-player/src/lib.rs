pub mod backend;
pub mod core;
pub mod element;
pub mod fetch;
pub mod http;
pub mod mpv;
pub mod poller;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// A formatted WARN/ERROR line from the logging layer.
    Log(String),
}
