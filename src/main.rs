mod config;
mod logging;

use config::HostConfig;
use patchbay_engine::message::{Action, Message};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc::{Sender, channel};
use tracing::{error, info};

async fn request(tx: &Sender<Message>, action: Action) -> bool {
    if let Err(e) = tx.send(Message::Request(action)).await {
        error!("Engine is gone: {e}");
        return false;
    }
    true
}

fn log_response(response: Result<Action, String>) {
    match response {
        Ok(Action::GraphRecalculated {
            version,
            nodes,
            levels,
            latency,
        }) => info!("graph v{version}: {nodes} nodes, {levels} levels, {latency} frames latency"),
        Ok(Action::StatsReport(stats)) => info!(
            "cycles={} frames={} xruns={} faults={} graph_swaps={} deferred_swaps={} dropped_reports={}",
            stats.cycles,
            stats.frames,
            stats.xruns,
            stats.faults,
            stats.graph_swaps,
            stats.deferred_swaps,
            stats.dropped_reports
        ),
        Ok(Action::HwInfo {
            inputs,
            outputs,
            rate,
            block_length,
        }) => info!("hardware: {inputs} in, {outputs} out, {rate} Hz, {block_length} frames"),
        Ok(action) => tracing::debug!("{action:?}"),
        Err(e) => error!("{e}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let path = std::env::args().nth(1);
    let config = match HostConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let actions = match config.session.actions() {
        Ok(actions) => actions,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let engine_config = config.engine.clone().with_env_overrides();
    let (tx, handle) = match patchbay_engine::init(engine_config, config.session.tone_hz) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to start engine: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (client_tx, mut client_rx) = channel::<Message>(64);
    let responses = tokio::spawn(async move {
        while let Some(message) = client_rx.recv().await {
            if let Message::Response(response) = message {
                let quit = matches!(response, Ok(Action::Quit));
                log_response(response);
                if quit {
                    break;
                }
            }
        }
    });
    if tx.send(Message::Channel(client_tx)).await.is_err() {
        return ExitCode::FAILURE;
    }
    for action in actions {
        if !request(&tx, action).await {
            return ExitCode::FAILURE;
        }
    }

    let run = config.session.run_seconds;
    if run > 0.0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(run)) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    } else if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for ctrl-c: {e}");
    }

    request(&tx, Action::Stats).await;
    request(&tx, Action::Quit).await;
    let _ = handle.await;
    let _ = responses.await;
    ExitCode::SUCCESS
}
