use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    connection::PortConnectionsManager,
    error::EngineError,
    fader::{Fader, FaderControls},
    hw::{self, DummyBackend, HW_INPUT_NAME, HW_OUTPUT_NAME, RenderHandle},
    message::{Action, Message, PortRef},
    midi::{MidiEvent, MidiQueue},
    port::PortIdentifier,
    render::{self, ReportDrain, RtReport, RtStats},
    router::Router,
    send::{ChannelSend, SendControls},
    track::{Track, TrackControls},
};

fn midi_channel(channel: u8) -> Result<u8, String> {
    if (1..=16).contains(&channel) {
        Ok(channel)
    } else {
        Err(format!("MIDI channel {channel} is not in 1..=16"))
    }
}

struct TrackEntry {
    controls: Arc<TrackControls>,
    midi_in: Option<MidiQueue>,
}

/// Control-thread owner of the session. Every topology change and every
/// setting goes through here; the audio thread only sees published graphs
/// and atomics.
pub struct Engine {
    clients: Vec<Sender<Message>>,
    rx: Receiver<Message>,
    config: EngineConfig,
    router: Router,
    tracks: HashMap<String, TrackEntry>,
    faders: HashMap<String, Arc<FaderControls>>,
    sends: HashMap<String, Arc<SendControls>>,
    stats: Arc<RtStats>,
    reports: ReportDrain,
    render: Option<RenderHandle>,
}

impl Engine {
    const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(50);

    /// Builds the router and the hardware bridge and starts the audio
    /// thread on the dummy backend.
    pub fn new(
        rx: Receiver<Message>,
        config: EngineConfig,
        tone_hz: Option<f32>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let stats = Arc::new(RtStats::default());
        let (publisher, renderer, reports) = render::create(&config, stats.clone())?;
        let mut router = Router::new(config.block_length, publisher);
        let (hw_in, hw_out, endpoints) = hw::bridge(&config);
        router.add_node(Box::new(hw_in))?;
        router.add_node(Box::new(hw_out))?;
        router.recalc_graph()?;

        let backend = DummyBackend::new(&config, renderer, endpoints).with_tone(tone_hz);
        let render = RenderHandle::spawn(backend, config.realtime_priority, config.profile)?;
        info!(
            "Engine started: {} Hz, {} frames, {} render threads",
            config.sample_rate,
            config.block_length,
            config.threads()
        );
        Ok(Self {
            clients: vec![],
            rx,
            config,
            router,
            tracks: HashMap::new(),
            faders: HashMap::new(),
            sends: HashMap::new(),
            stats,
            reports,
            render: Some(render),
        })
    }

    async fn notify_clients(&mut self, action: Result<Action, String>) {
        let mut closed = vec![];
        for (i, client) in self.clients.iter().enumerate() {
            if client.send(Message::Response(action.clone())).await.is_err() {
                closed.push(i);
            }
        }
        for i in closed.into_iter().rev() {
            debug!("Dropping disconnected client {i}");
            self.clients.remove(i);
        }
    }

    fn apply_mute_solo_policy(&self) {
        let any_soloed = self.tracks.values().any(|t| t.controls.soloed());
        for track in self.tracks.values() {
            let c = &track.controls;
            let enabled = if any_soloed {
                c.soloed() && !c.muted()
            } else {
                !c.muted()
            };
            c.set_output_enabled(enabled);
        }
    }

    fn resolve(&self, port: &PortRef) -> Result<PortIdentifier, String> {
        self.router
            .find_port(&port.node, &port.port)
            .ok_or_else(|| format!("Port {}:{} not found", port.node, port.port))
    }

    fn track(&self, name: &str) -> Result<&TrackEntry, String> {
        self.tracks
            .get(name)
            .ok_or_else(|| format!("Track not found: {name}"))
    }

    fn fader(&self, name: &str) -> Result<&Arc<FaderControls>, String> {
        self.faders
            .get(name)
            .ok_or_else(|| format!("Fader not found: {name}"))
    }

    fn channel_send(&self, name: &str) -> Result<&Arc<SendControls>, String> {
        self.sends
            .get(name)
            .ok_or_else(|| format!("Send not found: {name}"))
    }

    fn recalc(&mut self) -> Result<Action, String> {
        let snapshot = self.router.recalc_graph().map_err(|e| e.to_string())?;
        Ok(Action::GraphRecalculated {
            version: snapshot.version(),
            nodes: snapshot.nodes().len(),
            levels: snapshot.levels().len(),
            latency: snapshot.max_playback_latency(),
        })
    }

    fn push_note(&self, track: &str, event: MidiEvent) -> Result<(), String> {
        let queue = self
            .track(track)?
            .midi_in
            .as_ref()
            .ok_or_else(|| format!("Track {track} has no MIDI input"))?;
        if queue.push(event) {
            Ok(())
        } else {
            Err(format!("MIDI queue of {track} is full"))
        }
    }

    /// Applies one request. Returns the responses to broadcast; a change
    /// of topology is followed by the recalculated graph.
    fn apply(&mut self, a: Action) -> Result<Vec<Action>, String> {
        let block_length = self.router.block_length();
        let mut topology_changed = false;
        let response = match a {
            Action::AddTrack {
                ref name,
                audio_ins,
                midi_ins,
                audio_outs,
                midi_outs,
            } => {
                let track = Track::new(
                    name.clone(),
                    audio_ins,
                    audio_outs,
                    midi_ins,
                    midi_outs,
                    block_length,
                );
                let controls = track.controls();
                let midi_in = track
                    .midi_inputs()
                    .first()
                    .and_then(|p| p.get().events().map(|e| e.queue()));
                self.router
                    .add_node(Box::new(track))
                    .map_err(|e| e.to_string())?;
                self.tracks.insert(
                    name.clone(),
                    TrackEntry {
                        controls,
                        midi_in,
                    },
                );
                self.apply_mute_solo_policy();
                topology_changed = true;
                a
            }
            Action::AddFader { ref name, midi } => {
                let fader = if midi {
                    Fader::midi(name.clone(), block_length)
                } else {
                    Fader::audio(name.clone(), block_length)
                };
                let controls = fader.controls();
                self.router
                    .add_node(Box::new(fader))
                    .map_err(|e| e.to_string())?;
                self.faders.insert(name.clone(), controls);
                topology_changed = true;
                a
            }
            Action::AddSend { ref name, midi } => {
                let send = if midi {
                    ChannelSend::midi(name.clone(), block_length)
                } else {
                    ChannelSend::audio(name.clone(), block_length)
                };
                let controls = send.controls();
                self.router
                    .add_node(Box::new(send))
                    .map_err(|e| e.to_string())?;
                self.sends.insert(name.clone(), controls);
                topology_changed = true;
                a
            }
            Action::RemoveNode(ref name) => {
                if name == HW_INPUT_NAME || name == HW_OUTPUT_NAME {
                    return Err(format!("Node {name} belongs to the audio backend"));
                }
                let id = self
                    .router
                    .node_id(name)
                    .ok_or_else(|| format!("Node not found: {name}"))?;
                self.router.remove_node(id).map_err(|e| e.to_string())?;
                self.tracks.remove(name);
                self.faders.remove(name);
                self.sends.remove(name);
                self.apply_mute_solo_policy();
                topology_changed = true;
                a
            }
            Action::Connect {
                ref from,
                ref to,
                multiplier,
            } => {
                let (src, dest) = (self.resolve(from)?, self.resolve(to)?);
                self.router
                    .connect(&src, &dest, multiplier, false, true)
                    .map_err(|e| e.to_string())?;
                topology_changed = true;
                a
            }
            Action::Disconnect { ref from, ref to } => {
                let (src, dest) = (self.resolve(from)?, self.resolve(to)?);
                if !self.router.disconnect(&src, &dest) {
                    return Err(format!(
                        "{}:{} is not connected to {}:{}",
                        from.node, from.port, to.node, to.port
                    ));
                }
                topology_changed = true;
                a
            }
            Action::SetMultiplier {
                ref from,
                ref to,
                multiplier,
            } => {
                let (src, dest) = (self.resolve(from)?, self.resolve(to)?);
                self.router
                    .set_multiplier(&src, &dest, multiplier)
                    .map_err(|e| e.to_string())?;
                topology_changed = true;
                a
            }
            Action::SetConnectionEnabled {
                ref from,
                ref to,
                enabled,
            } => {
                let (src, dest) = (self.resolve(from)?, self.resolve(to)?);
                self.router
                    .set_connection_enabled(&src, &dest, enabled)
                    .map_err(|e| e.to_string())?;
                topology_changed = true;
                a
            }
            Action::RecalcGraph => self.recalc()?,
            Action::Panic(ref track) => {
                match track {
                    Some(name) => {
                        if let Some(queue) = &self.track(name)?.midi_in {
                            queue.panic();
                        }
                    }
                    None => {
                        for queue in self.tracks.values().filter_map(|t| t.midi_in.as_ref()) {
                            queue.panic();
                        }
                    }
                }
                a
            }
            Action::NoteOn {
                ref track,
                channel,
                pitch,
                velocity,
            } => {
                let channel = midi_channel(channel)?;
                self.push_note(track, MidiEvent::note_on(channel, pitch, velocity.max(1), 0))?;
                a
            }
            Action::NoteOff {
                ref track,
                channel,
                pitch,
            } => {
                let channel = midi_channel(channel)?;
                self.push_note(track, MidiEvent::note_off(channel, pitch, 0))?;
                a
            }
            Action::TrackLevel(ref name, level) => {
                self.track(name)?.controls.set_level(level);
                a
            }
            Action::TrackToggleMute(ref name) => {
                self.track(name)?.controls.mute();
                self.apply_mute_solo_policy();
                a
            }
            Action::TrackToggleSolo(ref name) => {
                self.track(name)?.controls.solo();
                self.apply_mute_solo_policy();
                a
            }
            Action::FaderAmp(ref name, amp) => {
                self.fader(name)?.set_amp(amp);
                a
            }
            Action::FaderBalance(ref name, balance) => {
                self.fader(name)?.set_balance(balance);
                a
            }
            Action::FaderMute(ref name, muted) => {
                self.fader(name)?.set_muted(muted);
                a
            }
            Action::SendAmount(ref name, amount) => {
                self.channel_send(name)?.set_amount(amount);
                a
            }
            Action::SendEnabled(ref name, enabled) => {
                self.channel_send(name)?.set_enabled(enabled);
                a
            }
            Action::ListNodes => Action::Nodes(self.router.node_names()),
            Action::ListConnections => {
                Action::Connections(self.router.connections().connections().to_vec())
            }
            Action::PortSources(ref port) => {
                let id = self.resolve(port)?;
                Action::Connections(self.router.port_sources(&id))
            }
            Action::SaveConnections => Action::ConnectionsJson(
                self.router
                    .connections()
                    .to_json()
                    .map_err(|e| e.to_string())?,
            ),
            Action::LoadConnections(ref json) => {
                let connections =
                    PortConnectionsManager::from_json(json).map_err(|e| e.to_string())?;
                let snapshot = self
                    .router
                    .load_connections(connections)
                    .map_err(|e| e.to_string())?;
                return Ok(vec![
                    a.clone(),
                    Action::GraphRecalculated {
                        version: snapshot.version(),
                        nodes: snapshot.nodes().len(),
                        levels: snapshot.levels().len(),
                        latency: snapshot.max_playback_latency(),
                    },
                ]);
            }
            Action::Stats => Action::StatsReport(self.stats.snapshot()),
            Action::Quit
            | Action::GraphRecalculated { .. }
            | Action::Nodes(_)
            | Action::Connections(_)
            | Action::ConnectionsJson(_)
            | Action::StatsReport(_)
            | Action::HwInfo { .. } => return Ok(vec![]),
        };
        let mut responses = vec![response];
        if topology_changed {
            responses.push(self.recalc()?);
        }
        Ok(responses)
    }

    async fn handle_request(&mut self, a: Action) {
        match self.apply(a) {
            Ok(responses) => {
                for response in responses {
                    self.notify_clients(Ok(response)).await;
                }
            }
            Err(e) => {
                warn!("{e}");
                self.notify_clients(Err(e)).await;
            }
        }
    }

    fn hw_info(&self) -> Action {
        Action::HwInfo {
            inputs: self.config.hw_inputs,
            outputs: self.config.hw_outputs,
            rate: self.config.sample_rate,
            block_length: self.config.block_length,
        }
    }

    /// Logs what the audio thread reported and frees retired graphs.
    fn maintain(&mut self) {
        let router = &self.router;
        self.reports.drain(|report| match report {
            RtReport::Fault {
                node,
                graph_version,
                fault,
            } => warn!(
                "Node {} failed in graph v{graph_version}: {fault}",
                router.node_name(node).unwrap_or("<removed>")
            ),
            RtReport::Xrun { frame } => warn!("XRUN at frame {frame}"),
            RtReport::GraphAdopted { version } => debug!("Audio thread runs graph v{version}"),
        });
        self.router.collect_garbage();
    }

    fn shutdown(&mut self) {
        if let Some(mut render) = self.render.take() {
            render.stop();
        }
        self.maintain();
        info!("Engine stopped");
    }

    pub async fn work(&mut self) {
        let mut tick = tokio::time::interval(Self::MAINTENANCE_INTERVAL);
        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(Message::Channel(s)) => {
                        if s.send(Message::Response(Ok(self.hw_info()))).await.is_ok() {
                            self.clients.push(s);
                        }
                    }
                    Some(Message::Request(Action::Quit)) => {
                        self.shutdown();
                        self.notify_clients(Ok(Action::Quit)).await;
                        return;
                    }
                    Some(Message::Request(a)) => self.handle_request(a).await,
                    Some(Message::Response(_)) => {}
                    None => {
                        self.shutdown();
                        return;
                    }
                },
                _ = tick.tick() => self.maintain(),
            }
        }
    }
}
