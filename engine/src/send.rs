use crate::{
    error::ProcessFault,
    node::{NodeKind, Processable, ProcessTimeInfo, copy_events, copy_scaled},
    param::AtomicF32,
    port::{OwnerType, Port, PortFlags, PortFlow, PortHandle, PortIdentifier, PortType, track_name_hash},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Debug)]
pub struct SendControls {
    amount: AtomicF32,
    enabled: AtomicBool,
}

impl Default for SendControls {
    fn default() -> Self {
        Self {
            amount: AtomicF32::new(1.0),
            enabled: AtomicBool::new(true),
        }
    }
}

impl SendControls {
    pub fn amount(&self) -> f32 {
        self.amount.get()
    }
    pub fn set_amount(&self, amount: f32) {
        self.amount.set(amount.clamp(0.0, 2.0));
    }
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Taps a signal off a channel. Connections leaving its outputs count as
/// sends.
pub struct ChannelSend {
    name: String,
    midi: bool,
    inputs: Vec<PortHandle>,
    outputs: Vec<PortHandle>,
    controls: Arc<SendControls>,
}

impl ChannelSend {
    pub fn audio(name: String, block_length: usize) -> Self {
        let hash = track_name_hash(&name);
        let ports = |flow, prefix: &str| {
            [("L", PortFlags::STEREO_L), ("R", PortFlags::STEREO_R)]
                .into_iter()
                .enumerate()
                .map(|(i, (side, flags))| {
                    Port::new(
                        PortIdentifier::new(
                            OwnerType::ChannelSend,
                            PortType::Audio,
                            flow,
                            format!("{prefix} {side}"),
                        )
                        .with_track(hash)
                        .with_index(i)
                        .with_flags(flags | PortFlags::SEND_RECEIVABLE),
                        block_length,
                    )
                    .into_handle()
                })
                .collect::<Vec<_>>()
        };
        Self {
            name,
            midi: false,
            inputs: ports(PortFlow::Input, "Send In"),
            outputs: ports(PortFlow::Output, "Send Out"),
            controls: Arc::new(SendControls::default()),
        }
    }

    pub fn midi(name: String, block_length: usize) -> Self {
        let hash = track_name_hash(&name);
        let port = |flow, label: &str| {
            Port::new(
                PortIdentifier::new(OwnerType::ChannelSend, PortType::Event, flow, label)
                    .with_track(hash),
                block_length,
            )
            .into_handle()
        };
        Self {
            name,
            midi: true,
            inputs: vec![port(PortFlow::Input, "Send MIDI In")],
            outputs: vec![port(PortFlow::Output, "Send MIDI Out")],
            controls: Arc::new(SendControls::default()),
        }
    }

    pub fn controls(&self) -> Arc<SendControls> {
        self.controls.clone()
    }
}

impl Processable for ChannelSend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ChannelSend
    }

    fn inputs(&self) -> &[PortHandle] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortHandle] {
        &self.outputs
    }

    fn process(&mut self, time: &ProcessTimeInfo) -> Result<(), ProcessFault> {
        if !self.controls.enabled() {
            return Ok(());
        }
        for (input, output) in self.inputs.iter().zip(&self.outputs) {
            if self.midi {
                copy_events(input.get(), output.lock(), time)?;
            } else {
                copy_scaled(input.get(), output.lock(), time, self.controls.amount())?;
            }
        }
        Ok(())
    }
}
