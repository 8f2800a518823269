use crate::{
    error::ProcessFault,
    node::{NodeKind, Processable, ProcessTimeInfo, copy_events, copy_scaled},
    param::{AtomicF32, db_to_amp},
    port::{OwnerType, Port, PortFlow, PortHandle, PortIdentifier, PortType, track_name_hash},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Track settings the control thread changes while the track is running.
#[derive(Debug)]
pub struct TrackControls {
    /// dB.
    level: AtomicF32,
    muted: AtomicBool,
    soloed: AtomicBool,
    /// Cleared by the solo policy when another track is soloed.
    output_enabled: AtomicBool,
}

impl Default for TrackControls {
    fn default() -> Self {
        Self {
            level: AtomicF32::new(0.0),
            muted: AtomicBool::new(false),
            soloed: AtomicBool::new(false),
            output_enabled: AtomicBool::new(true),
        }
    }
}

impl TrackControls {
    pub fn level(&self) -> f32 {
        self.level.get()
    }
    pub fn set_level(&self, level: f32) {
        self.level.set(level);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
    pub fn soloed(&self) -> bool {
        self.soloed.load(Ordering::Relaxed)
    }

    pub fn mute(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::Relaxed)
    }
    pub fn solo(&self) -> bool {
        !self.soloed.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn set_output_enabled(&self, enabled: bool) {
        self.output_enabled.store(enabled, Ordering::Relaxed);
    }
    pub fn output_enabled(&self) -> bool {
        self.output_enabled.load(Ordering::Relaxed)
    }
}

/// Passthrough channel strip: audio ins to audio outs scaled by the level,
/// MIDI ins to MIDI outs.
pub struct Track {
    name: String,
    inputs: Vec<PortHandle>,
    outputs: Vec<PortHandle>,
    audio_ins: usize,
    midi_ins: usize,
    audio_outs: usize,
    controls: Arc<TrackControls>,
}

impl Track {
    pub fn new(
        name: String,
        audio_ins: usize,
        audio_outs: usize,
        midi_ins: usize,
        midi_outs: usize,
        block_length: usize,
    ) -> Self {
        let hash = track_name_hash(&name);
        let port = |port_type, flow, label: String, index| {
            Port::new(
                PortIdentifier::new(OwnerType::Track, port_type, flow, label)
                    .with_track(hash)
                    .with_index(index),
                block_length,
            )
            .into_handle()
        };
        let mut inputs = vec![];
        for i in 0..audio_ins {
            inputs.push(port(PortType::Audio, PortFlow::Input, format!("Audio In {}", i + 1), i));
        }
        for i in 0..midi_ins {
            inputs.push(port(PortType::Event, PortFlow::Input, format!("MIDI In {}", i + 1), i));
        }
        let mut outputs = vec![];
        for i in 0..audio_outs {
            outputs.push(port(PortType::Audio, PortFlow::Output, format!("Audio Out {}", i + 1), i));
        }
        for i in 0..midi_outs {
            outputs.push(port(PortType::Event, PortFlow::Output, format!("MIDI Out {}", i + 1), i));
        }
        Self {
            name,
            inputs,
            outputs,
            audio_ins,
            midi_ins,
            audio_outs,
            controls: Arc::new(TrackControls::default()),
        }
    }

    pub fn controls(&self) -> Arc<TrackControls> {
        self.controls.clone()
    }

    pub fn audio_inputs(&self) -> &[PortHandle] {
        &self.inputs[..self.audio_ins]
    }

    pub fn midi_inputs(&self) -> &[PortHandle] {
        &self.inputs[self.audio_ins..]
    }

    pub fn audio_outputs(&self) -> &[PortHandle] {
        &self.outputs[..self.audio_outs]
    }

    pub fn midi_outputs(&self) -> &[PortHandle] {
        &self.outputs[self.audio_outs..]
    }
}

impl Processable for Track {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Track
    }

    fn inputs(&self) -> &[PortHandle] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortHandle] {
        &self.outputs
    }

    fn process(&mut self, time: &ProcessTimeInfo) -> Result<(), ProcessFault> {
        // Outputs were cleared by the cycle preparation.
        if self.controls.muted() || !self.controls.output_enabled() {
            return Ok(());
        }
        let gain = db_to_amp(self.controls.level());
        if self.audio_ins > 0 {
            for (i, out) in self.audio_outputs().iter().enumerate() {
                let src = &self.inputs[i % self.audio_ins];
                copy_scaled(src.get(), out.lock(), time, gain)?;
            }
        }
        if self.midi_ins > 0 {
            for (i, out) in self.midi_outputs().iter().enumerate() {
                let src = &self.midi_inputs()[i % self.midi_ins];
                copy_events(src.get(), out.lock(), time)?;
            }
        }
        Ok(())
    }
}
