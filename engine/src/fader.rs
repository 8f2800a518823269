use crate::{
    error::ProcessFault,
    node::{NodeKind, Processable, ProcessTimeInfo, copy_events, samples_in, samples_out},
    param::AtomicF32,
    port::{OwnerType, Port, PortFlags, PortFlow, PortHandle, PortIdentifier, PortType, track_name_hash},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Debug)]
pub struct FaderControls {
    /// Linear gain, 0 to 2.
    amp: AtomicF32,
    /// -1 is hard left, 1 hard right.
    balance: AtomicF32,
    muted: AtomicBool,
}

impl Default for FaderControls {
    fn default() -> Self {
        Self {
            amp: AtomicF32::new(1.0),
            balance: AtomicF32::new(0.0),
            muted: AtomicBool::new(false),
        }
    }
}

impl FaderControls {
    pub fn amp(&self) -> f32 {
        self.amp.get()
    }
    pub fn set_amp(&self, amp: f32) {
        self.amp.set(amp.clamp(0.0, 2.0));
    }
    pub fn balance(&self) -> f32 {
        self.balance.get()
    }
    pub fn set_balance(&self, balance: f32) {
        self.balance.set(balance.clamp(-1.0, 1.0));
    }
    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}

/// Gains of the left and right channel for a balance position.
pub fn balance_gains(balance: f32) -> (f32, f32) {
    let b = balance.clamp(-1.0, 1.0);
    (1.0 - b.max(0.0), 1.0 + b.min(0.0))
}

/// Stereo amplitude and balance stage, or a MIDI gate when built with
/// [`Fader::midi`].
pub struct Fader {
    name: String,
    midi: bool,
    inputs: Vec<PortHandle>,
    outputs: Vec<PortHandle>,
    controls: Arc<FaderControls>,
}

impl Fader {
    pub fn audio(name: String, block_length: usize) -> Self {
        let hash = track_name_hash(&name);
        let id = |port_type, flow, label: &str, index, flags| {
            PortIdentifier::new(OwnerType::Fader, port_type, flow, label)
                .with_track(hash)
                .with_index(index)
                .with_flags(flags)
        };
        let stereo = |flow, label_l: &str, label_r: &str| {
            vec![
                Port::new(
                    id(PortType::Audio, flow, label_l, 0, PortFlags::STEREO_L),
                    block_length,
                )
                .into_handle(),
                Port::new(
                    id(PortType::Audio, flow, label_r, 1, PortFlags::STEREO_R),
                    block_length,
                )
                .into_handle(),
            ]
        };
        let mut inputs = stereo(PortFlow::Input, "Fader In L", "Fader In R");
        inputs.push(
            Port::new(
                id(
                    PortType::Control,
                    PortFlow::Input,
                    "Fader Amp Mod",
                    2,
                    PortFlags::AUTOMATABLE | PortFlags::CHANNEL_FADER,
                ),
                block_length,
            )
            .with_range(0.0, 2.0, 0.0, 1.0)
            .into_handle(),
        );
        Self {
            name,
            midi: false,
            inputs,
            outputs: stereo(PortFlow::Output, "Fader Out L", "Fader Out R"),
            controls: Arc::new(FaderControls::default()),
        }
    }

    pub fn midi(name: String, block_length: usize) -> Self {
        let hash = track_name_hash(&name);
        let port = |flow, label: &str| {
            Port::new(
                PortIdentifier::new(OwnerType::Fader, PortType::Event, flow, label).with_track(hash),
                block_length,
            )
            .into_handle()
        };
        Self {
            name,
            midi: true,
            inputs: vec![port(PortFlow::Input, "Fader MIDI In")],
            outputs: vec![port(PortFlow::Output, "Fader MIDI Out")],
            controls: Arc::new(FaderControls::default()),
        }
    }

    pub fn controls(&self) -> Arc<FaderControls> {
        self.controls.clone()
    }

    /// Gain after the amp modulation input.
    fn effective_amp(&self) -> f32 {
        let modulation = self
            .inputs
            .get(2)
            .map(|p| p.get().control_value())
            .unwrap_or(1.0);
        (self.controls.amp() * modulation).clamp(0.0, 2.0)
    }
}

impl Processable for Fader {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Fader
    }

    fn inputs(&self) -> &[PortHandle] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortHandle] {
        &self.outputs
    }

    fn process(&mut self, time: &ProcessTimeInfo) -> Result<(), ProcessFault> {
        if self.controls.muted() {
            return Ok(());
        }
        if self.midi {
            return copy_events(self.inputs[0].get(), self.outputs[0].lock(), time);
        }
        let amp = self.effective_amp();
        let (gain_l, gain_r) = balance_gains(self.controls.balance());
        for (ch, gain) in [(0, gain_l * amp), (1, gain_r * amp)] {
            let input = samples_in(self.inputs[ch].get(), time)?;
            let output = samples_out(self.outputs[ch].lock(), time)?;
            output
                .iter_mut()
                .zip(input)
                .for_each(|(o, i)| *o = *i * gain);
        }
        Ok(())
    }
}
