use patchbay_engine::{
    EngineConfig,
    message::{Action, PortRef},
};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_CONFIG: &str = "patchbay.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub engine: EngineConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to run before quitting. 0 runs until interrupted.
    pub run_seconds: f64,
    /// Test tone fed into every capture channel.
    pub tone_hz: Option<f32>,
    pub tracks: Vec<TrackConfig>,
    pub faders: Vec<String>,
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackConfig {
    pub name: String,
    #[serde(default = "two")]
    pub audio_ins: usize,
    #[serde(default = "two")]
    pub audio_outs: usize,
    #[serde(default = "one")]
    pub midi_ins: usize,
    #[serde(default = "one")]
    pub midi_outs: usize,
}

/// `from` and `to` are `node:port`; the port part is the label.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub from: String,
    pub to: String,
    #[serde(default = "unity")]
    pub multiplier: f32,
}

fn one() -> usize {
    1
}

fn two() -> usize {
    2
}

fn unity() -> f32 {
    1.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        let connect = |from: &str, to: &str| ConnectionConfig {
            from: from.to_string(),
            to: to.to_string(),
            multiplier: 1.0,
        };
        Self {
            run_seconds: 2.0,
            tone_hz: Some(440.0),
            tracks: vec![TrackConfig {
                name: "Track 1".to_string(),
                audio_ins: 2,
                audio_outs: 2,
                midi_ins: 1,
                midi_outs: 1,
            }],
            faders: vec!["Master".to_string()],
            connections: vec![
                connect("hw:capture:Capture 1", "Track 1:Audio In 1"),
                connect("hw:capture:Capture 2", "Track 1:Audio In 2"),
                connect("Track 1:Audio Out 1", "Master:Fader In L"),
                connect("Track 1:Audio Out 2", "Master:Fader In R"),
                connect("Master:Fader Out L", "hw:playback:Playback 1"),
                connect("Master:Fader Out R", "hw:playback:Playback 2"),
            ],
        }
    }
}

fn port_ref(address: &str) -> Result<PortRef, String> {
    // Node names may contain ':' (hw:capture), labels may not.
    address
        .rsplit_once(':')
        .map(|(node, port)| PortRef::new(node, port))
        .ok_or_else(|| format!("Port address {address} is not node:port"))
}

impl HostConfig {
    /// Reads `path`, or `patchbay.toml` when it exists. Without a file the
    /// defaults are used.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let path = match path {
            Some(p) => Path::new(p),
            None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
            None => return Ok(Self::default()),
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Self::parse(&content).map_err(|e| format!("{}: {e}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        config.engine.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

impl SessionConfig {
    /// Requests that build the session.
    pub fn actions(&self) -> Result<Vec<Action>, String> {
        let mut actions = vec![];
        for track in &self.tracks {
            actions.push(Action::AddTrack {
                name: track.name.clone(),
                audio_ins: track.audio_ins,
                midi_ins: track.midi_ins,
                audio_outs: track.audio_outs,
                midi_outs: track.midi_outs,
            });
        }
        for fader in &self.faders {
            actions.push(Action::AddFader {
                name: fader.clone(),
                midi: false,
            });
        }
        for conn in &self.connections {
            actions.push(Action::Connect {
                from: port_ref(&conn.from)?,
                to: port_ref(&conn.to)?,
                multiplier: conn.multiplier,
            });
        }
        Ok(actions)
    }
}
