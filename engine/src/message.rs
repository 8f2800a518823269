use crate::{connection::PortConnection, render::RtStatsSnapshot};
use tokio::sync::mpsc::Sender;

/// A port addressed the way clients see it: owning node name and port
/// label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortRef {
    pub node: String,
    pub port: String,
}

impl PortRef {
    pub fn new(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Action {
    Quit,
    AddTrack {
        name: String,
        audio_ins: usize,
        midi_ins: usize,
        audio_outs: usize,
        midi_outs: usize,
    },
    AddFader {
        name: String,
        midi: bool,
    },
    AddSend {
        name: String,
        midi: bool,
    },
    RemoveNode(String),
    Connect {
        from: PortRef,
        to: PortRef,
        multiplier: f32,
    },
    Disconnect {
        from: PortRef,
        to: PortRef,
    },
    SetMultiplier {
        from: PortRef,
        to: PortRef,
        multiplier: f32,
    },
    SetConnectionEnabled {
        from: PortRef,
        to: PortRef,
        enabled: bool,
    },
    RecalcGraph,
    GraphRecalculated {
        version: u64,
        nodes: usize,
        levels: usize,
        /// Largest playback latency, in frames.
        latency: usize,
    },
    /// All notes off on one track, or on every track.
    Panic(Option<String>),
    NoteOn {
        track: String,
        channel: u8,
        pitch: u8,
        velocity: u8,
    },
    NoteOff {
        track: String,
        channel: u8,
        pitch: u8,
    },
    TrackLevel(String, f32),
    TrackToggleMute(String),
    TrackToggleSolo(String),
    FaderAmp(String, f32),
    FaderBalance(String, f32),
    FaderMute(String, bool),
    SendAmount(String, f32),
    SendEnabled(String, bool),
    ListNodes,
    Nodes(Vec<String>),
    ListConnections,
    /// Sources feeding one port in the live graph.
    PortSources(PortRef),
    Connections(Vec<PortConnection>),
    SaveConnections,
    LoadConnections(String),
    ConnectionsJson(String),
    Stats,
    StatsReport(RtStatsSnapshot),
    HwInfo {
        inputs: usize,
        outputs: usize,
        rate: u32,
        block_length: usize,
    },
}

#[derive(Clone, Debug)]
pub enum Message {
    Channel(Sender<Self>),

    Request(Action),
    Response(Result<Action, String>),
}
