pub mod config;
pub mod connection;
mod engine;
pub mod error;
pub mod fader;
pub mod graph;
pub mod hw;
pub mod message;
pub mod midi;
pub mod mutex;
pub mod node;
pub mod param;
pub mod plugin;
pub mod port;
pub mod render;
pub mod router;
pub mod routing;
pub mod send;
pub mod track;
pub mod worker;

use tokio::sync::mpsc::{Sender, channel};
use tokio::task::JoinHandle;

pub use config::EngineConfig;
pub use error::EngineError;

/// Starts the engine task. Must be called from inside a tokio runtime.
pub fn init(
    config: EngineConfig,
    tone_hz: Option<f32>,
) -> Result<(Sender<message::Message>, JoinHandle<()>), EngineError> {
    let (tx, rx) = channel::<message::Message>(32);
    let mut engine = engine::Engine::new(rx, config, tone_hz)?;
    let handle = tokio::spawn(async move {
        engine.work().await;
    });
    Ok((tx, handle))
}
