use patchbay_engine::{
    EngineConfig,
    message::{Action, Message, PortRef},
};
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> EngineConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    EngineConfig {
        block_length: 64,
        render_threads: 1,
        ..EngineConfig::default()
    }
}

async fn response(rx: &mut Receiver<Message>) -> Result<Action, String> {
    match timeout(WAIT, rx.recv()).await {
        Ok(Some(Message::Response(r))) => r,
        Ok(other) => panic!("unexpected message {other:?}"),
        Err(_) => panic!("no response from engine"),
    }
}

async fn request(tx: &Sender<Message>, action: Action) {
    tx.send(Message::Request(action)).await.unwrap();
}

async fn connect_client(tx: &Sender<Message>) -> Receiver<Message> {
    let (client_tx, mut client_rx) = channel(64);
    tx.send(Message::Channel(client_tx)).await.unwrap();
    match response(&mut client_rx).await {
        Ok(Action::HwInfo {
            inputs,
            outputs,
            block_length,
            ..
        }) => {
            assert_eq!((inputs, outputs, block_length), (2, 2, 64));
        }
        other => panic!("expected hardware info, got {other:?}"),
    }
    client_rx
}

fn add_track(name: &str) -> Action {
    Action::AddTrack {
        name: name.to_string(),
        audio_ins: 2,
        midi_ins: 1,
        audio_outs: 2,
        midi_outs: 1,
    }
}

fn graph_version(action: Result<Action, String>) -> u64 {
    match action {
        Ok(Action::GraphRecalculated { version, .. }) => version,
        other => panic!("expected a recalculated graph, got {other:?}"),
    }
}

#[tokio::test]
async fn session_builds_and_rejects_loops() {
    let (tx, handle) = patchbay_engine::init(config(), Some(440.0)).unwrap();
    let mut rx = connect_client(&tx).await;

    request(&tx, add_track("A")).await;
    assert!(matches!(response(&mut rx).await, Ok(Action::AddTrack { .. })));
    assert_eq!(graph_version(response(&mut rx).await), 2);

    request(&tx, add_track("B")).await;
    assert!(matches!(response(&mut rx).await, Ok(Action::AddTrack { .. })));
    assert_eq!(graph_version(response(&mut rx).await), 3);

    let a_out = PortRef::new("A", "Audio Out 1");
    let b_in = PortRef::new("B", "Audio In 1");
    request(
        &tx,
        Action::Connect {
            from: a_out.clone(),
            to: b_in.clone(),
            multiplier: 1.0,
        },
    )
    .await;
    assert!(matches!(response(&mut rx).await, Ok(Action::Connect { .. })));
    match response(&mut rx).await {
        Ok(Action::GraphRecalculated {
            version, levels, ..
        }) => {
            assert_eq!(version, 4);
            assert_eq!(levels, 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    request(
        &tx,
        Action::Connect {
            from: PortRef::new("B", "Audio Out 1"),
            to: PortRef::new("A", "Audio In 1"),
            multiplier: 1.0,
        },
    )
    .await;
    let err = response(&mut rx).await.unwrap_err();
    assert!(err.contains("cycle"), "{err}");

    request(
        &tx,
        Action::SetMultiplier {
            from: a_out,
            to: b_in.clone(),
            multiplier: 0.5,
        },
    )
    .await;
    assert!(matches!(response(&mut rx).await, Ok(Action::SetMultiplier { .. })));
    assert_eq!(graph_version(response(&mut rx).await), 5);

    request(&tx, Action::PortSources(b_in)).await;
    match response(&mut rx).await {
        Ok(Action::Connections(sources)) => {
            assert_eq!(sources.len(), 1);
            assert_eq!(sources[0].multiplier, 0.5);
        }
        other => panic!("unexpected {other:?}"),
    }

    request(&tx, Action::ListNodes).await;
    match response(&mut rx).await {
        Ok(Action::Nodes(names)) => {
            for name in ["hw:capture", "hw:playback", "A", "B"] {
                assert!(names.iter().any(|n| n == name), "{name} missing");
            }
        }
        other => panic!("unexpected {other:?}"),
    }

    request(&tx, Action::Stats).await;
    assert!(matches!(response(&mut rx).await, Ok(Action::StatsReport(_))));

    request(&tx, Action::Quit).await;
    assert!(matches!(response(&mut rx).await, Ok(Action::Quit)));
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn saved_connections_load_back() {
    let (tx, handle) = patchbay_engine::init(config(), None).unwrap();
    let mut rx = connect_client(&tx).await;

    request(&tx, add_track("A")).await;
    response(&mut rx).await.unwrap();
    response(&mut rx).await.unwrap();
    let from = PortRef::new("hw:capture", "Capture 1");
    let to = PortRef::new("A", "Audio In 1");
    request(
        &tx,
        Action::Connect {
            from: from.clone(),
            to: to.clone(),
            multiplier: 1.0,
        },
    )
    .await;
    response(&mut rx).await.unwrap();
    response(&mut rx).await.unwrap();

    request(&tx, Action::SaveConnections).await;
    let json = match response(&mut rx).await {
        Ok(Action::ConnectionsJson(json)) => json,
        other => panic!("unexpected {other:?}"),
    };

    request(&tx, Action::Disconnect { from, to }).await;
    response(&mut rx).await.unwrap();
    response(&mut rx).await.unwrap();

    let tampered = json.replace("\"multiplier\": 1.0", "\"multiplier\": 5.0");
    assert_ne!(tampered, json);
    request(&tx, Action::LoadConnections(json)).await;
    assert!(matches!(response(&mut rx).await, Ok(Action::LoadConnections(_))));
    graph_version(response(&mut rx).await);

    request(&tx, Action::LoadConnections(tampered)).await;
    let err = response(&mut rx).await.unwrap_err();
    assert!(err.contains("Capture 1") && err.contains("out of range"), "{err}");

    request(&tx, Action::ListConnections).await;
    match response(&mut rx).await {
        Ok(Action::Connections(all)) => assert_eq!(all.len(), 1),
        other => panic!("unexpected {other:?}"),
    }

    request(&tx, Action::RemoveNode("hw:capture".to_string())).await;
    assert!(response(&mut rx).await.is_err());

    request(&tx, Action::Quit).await;
    assert!(matches!(response(&mut rx).await, Ok(Action::Quit)));
    timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn notes_need_a_known_track() {
    let (tx, handle) = patchbay_engine::init(config(), None).unwrap();
    let mut rx = connect_client(&tx).await;

    request(
        &tx,
        Action::NoteOn {
            track: "nowhere".to_string(),
            channel: 1,
            pitch: 60,
            velocity: 100,
        },
    )
    .await;
    assert!(response(&mut rx).await.is_err());

    request(&tx, add_track("Keys")).await;
    response(&mut rx).await.unwrap();
    response(&mut rx).await.unwrap();
    request(
        &tx,
        Action::NoteOn {
            track: "Keys".to_string(),
            channel: 1,
            pitch: 60,
            velocity: 100,
        },
    )
    .await;
    assert!(matches!(response(&mut rx).await, Ok(Action::NoteOn { .. })));
    request(&tx, Action::Panic(None)).await;
    assert!(matches!(response(&mut rx).await, Ok(Action::Panic(None))));

    request(&tx, Action::Quit).await;
    assert!(matches!(response(&mut rx).await, Ok(Action::Quit)));
    timeout(WAIT, handle).await.unwrap().unwrap();
}
