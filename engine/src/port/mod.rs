mod identifier;

pub use identifier::{
    OwnerType, PluginAddress, PluginSlotType, PortFlags, PortFlow, PortIdentifier, PortType,
    track_name_hash,
};

use crate::{
    connection::PortConnection,
    midi::{MidiEvents, events::ALL_CHANNELS},
    mutex::UnsafeMutex,
    param::AtomicF32,
};
use std::sync::Arc;

pub type PortHandle = Arc<UnsafeMutex<Port>>;

/// Samples on audio ports are limited to this range when a fader mixes
/// into them.
const AUDIO_LIMIT: f32 = 2.0;
const UNITY_EPSILON: f32 = 0.00001;

#[derive(Debug)]
pub enum PortBuffer {
    /// Audio and CV ports, one block of samples.
    Samples(Vec<f32>),
    Events(MidiEvents),
    Control {
        value: f32,
        /// Value set by the user; CV modulation is applied on top of it.
        base: f32,
    },
}

/// One resolved incoming connection of an input port.
#[derive(Debug, Clone)]
pub struct SourceLink {
    pub port: PortHandle,
    pub connection: PortConnection,
}

#[derive(Debug)]
pub struct Port {
    id: PortIdentifier,
    buffer: PortBuffer,
    min: f32,
    max: f32,
    zero: f32,
    default: f32,
    peak: AtomicF32,
}

impl Port {
    pub fn new(id: PortIdentifier, block_length: usize) -> Self {
        let (buffer, min, max) = match id.port_type {
            PortType::Audio => (PortBuffer::Samples(vec![0.0; block_length]), -1.0, 1.0),
            PortType::Cv => (PortBuffer::Samples(vec![0.0; block_length]), -1.0, 1.0),
            PortType::Event => (PortBuffer::Events(MidiEvents::new()), 0.0, 1.0),
            PortType::Control => (PortBuffer::Control { value: 0.0, base: 0.0 }, 0.0, 1.0),
        };
        Self {
            id,
            buffer,
            min,
            max,
            zero: 0.0,
            default: 0.0,
            peak: AtomicF32::new(0.0),
        }
    }

    pub fn into_handle(self) -> PortHandle {
        Arc::new(UnsafeMutex::new(self))
    }

    /// Sets the value range of a control port and resets it to `default`.
    /// Other port types keep their fixed range.
    pub fn with_range(mut self, min: f32, max: f32, zero: f32, default: f32) -> Self {
        debug_assert!(
            self.id.port_type == PortType::Control,
            "range set on non-control port {}",
            self.id
        );
        debug_assert!(min <= max, "inverted range on {}", self.id);
        if self.id.port_type != PortType::Control || !(min <= max) {
            return self;
        }
        self.min = min;
        self.max = max;
        self.zero = zero.clamp(min, max);
        self.default = default.clamp(min, max);
        self.buffer = PortBuffer::Control {
            value: self.default,
            base: self.default,
        };
        self
    }

    pub fn id(&self) -> &PortIdentifier {
        &self.id
    }

    pub fn port_type(&self) -> PortType {
        self.id.port_type
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn zero(&self) -> f32 {
        self.zero
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    pub fn buffer(&self) -> &PortBuffer {
        &self.buffer
    }

    pub fn samples(&self) -> Option<&[f32]> {
        match &self.buffer {
            PortBuffer::Samples(buf) => Some(buf),
            _ => None,
        }
    }

    pub fn samples_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.buffer {
            PortBuffer::Samples(buf) => Some(buf),
            _ => None,
        }
    }

    pub fn events(&self) -> Option<&MidiEvents> {
        match &self.buffer {
            PortBuffer::Events(events) => Some(events),
            _ => None,
        }
    }

    pub fn events_mut(&mut self) -> Option<&mut MidiEvents> {
        match &mut self.buffer {
            PortBuffer::Events(events) => Some(events),
            _ => None,
        }
    }

    pub fn control_value(&self) -> f32 {
        match self.buffer {
            PortBuffer::Control { value, .. } => value,
            _ => self.zero,
        }
    }

    /// Sets the user value of a control port, clamped into its range.
    pub fn set_control_value(&mut self, v: f32) {
        let (min, max) = (self.min, self.max);
        if let PortBuffer::Control { value, base } = &mut self.buffer {
            let v = if v.is_finite() { v.clamp(min, max) } else { *base };
            *value = v;
            *base = v;
        }
    }

    /// Zeroes `nframes` frames starting at `offset`. Event ports drop their
    /// main events; control ports are left alone.
    pub fn clear_buffer(&mut self, offset: usize, nframes: usize) {
        match &mut self.buffer {
            PortBuffer::Samples(buf) => {
                let start = offset.min(buf.len());
                let end = offset.saturating_add(nframes).min(buf.len());
                buf[start..end].fill(0.0);
            }
            PortBuffer::Events(events) => events.clear(false),
            PortBuffer::Control { .. } => {}
        }
    }

    /// Sums enabled `sources` into this port for the window
    /// `[offset, offset + nframes)`.
    pub fn mix_sources(&mut self, sources: &[SourceLink], offset: usize, nframes: usize) {
        let limit_audio = self.id.owner_type == OwnerType::Fader;
        let (min, max) = (self.min, self.max);
        let port_type = self.id.port_type;
        match &mut self.buffer {
            PortBuffer::Samples(buf) => {
                let start = offset.min(buf.len());
                let end = offset.saturating_add(nframes).min(buf.len());
                let dest = &mut buf[start..end];
                for link in sources.iter().filter(|l| l.connection.enabled) {
                    let src_port = link.port.get();
                    let Some(src) = src_port.samples() else {
                        continue;
                    };
                    let Some(src) = src.get(start..end) else {
                        continue;
                    };
                    let (lo, hi, multiplier) = match port_type {
                        PortType::Cv => (min, max, (max - min) * 0.5 * link.connection.multiplier),
                        _ => (-AUDIO_LIMIT, AUDIO_LIMIT, link.connection.multiplier),
                    };
                    if (multiplier - 1.0).abs() < UNITY_EPSILON {
                        dest.iter_mut().zip(src).for_each(|(d, s)| *d += *s);
                    } else {
                        dest.iter_mut()
                            .zip(src)
                            .for_each(|(d, s)| *d += *s * multiplier);
                    }
                    if port_type == PortType::Cv || limit_audio {
                        let peak = dest.iter().fold(0.0_f32, |p, s| p.max(s.abs()));
                        if peak > hi {
                            dest.iter_mut().for_each(|s| *s = s.clamp(lo, hi));
                        }
                    }
                }
            }
            PortBuffer::Events(events) => {
                let mut appended = false;
                for link in sources.iter().filter(|l| l.connection.enabled) {
                    if let Some(src) = link.port.get().events() {
                        events.append_events(
                            src.events(),
                            ALL_CHANNELS,
                            offset as u32,
                            nframes as u32,
                            false,
                        );
                        appended = true;
                    }
                }
                if appended {
                    events.sort_by_time();
                }
            }
            PortBuffer::Control { value, base } => {
                let depth = (max - min) * 0.5;
                // Modulation is relative to the user value every block.
                *value = *base;
                for link in sources.iter().filter(|l| l.connection.enabled) {
                    let src_port = link.port.get();
                    match src_port.buffer() {
                        PortBuffer::Samples(src) => {
                            let Some(&sample) = src.get(offset) else {
                                continue;
                            };
                            *value = (*value + depth * sample * link.connection.multiplier)
                                .clamp(min, max);
                        }
                        PortBuffer::Control { value: src_value, .. } => {
                            *value = (*src_value * link.connection.multiplier).clamp(min, max);
                        }
                        PortBuffer::Events(_) => {}
                    }
                }
            }
        }
    }

    /// Records the absolute peak of the given window for meters.
    pub fn update_peak(&self, offset: usize, nframes: usize) {
        let peak = match &self.buffer {
            PortBuffer::Samples(buf) => {
                let start = offset.min(buf.len());
                let end = offset.saturating_add(nframes).min(buf.len());
                buf[start..end].iter().fold(0.0_f32, |p, s| p.max(s.abs()))
            }
            PortBuffer::Control { value, .. } => value.abs(),
            PortBuffer::Events(_) => return,
        };
        self.peak.set(peak);
    }

    /// Absolute peak of the last processed block.
    pub fn peak(&self) -> f32 {
        self.peak.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(owner: OwnerType, flow: PortFlow, label: &str) -> Port {
        Port::new(PortIdentifier::new(owner, PortType::Audio, flow, label), 8)
    }

    fn link(port: PortHandle, dest: &Port, multiplier: f32, enabled: bool) -> SourceLink {
        let connection = PortConnection::new(
            port.get().id().clone(),
            dest.id().clone(),
            multiplier,
            false,
            enabled,
        );
        SourceLink { port, connection }
    }

    #[test]
    fn clear_buffer_zeroes_only_the_range() {
        let mut port = audio(OwnerType::Track, PortFlow::Output, "out");
        port.samples_mut().unwrap().fill(1.0);
        port.clear_buffer(2, 3);
        assert_eq!(
            port.samples().unwrap(),
            &[1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]
        );
        port.clear_buffer(6, 100);
        assert_eq!(&port.samples().unwrap()[6..], &[0.0, 0.0]);
    }

    #[test]
    fn audio_sources_sum_with_multiplier() {
        let src_a = audio(OwnerType::Track, PortFlow::Output, "a").into_handle();
        let src_b = audio(OwnerType::Track, PortFlow::Output, "b").into_handle();
        src_a.lock().samples_mut().unwrap().fill(0.5);
        src_b.lock().samples_mut().unwrap().fill(0.25);
        let mut dest = audio(OwnerType::Track, PortFlow::Input, "in");
        let links = vec![
            link(src_a.clone(), &dest, 1.0, true),
            link(src_b.clone(), &dest, 2.0, true),
            link(src_b, &dest, 1.0, false),
        ];
        dest.mix_sources(&links, 0, 8);
        assert!(dest.samples().unwrap().iter().all(|s| (*s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn cv_mix_scales_by_depth_and_limits() {
        let src = Port::new(
            PortIdentifier::new(OwnerType::Plugin, PortType::Cv, PortFlow::Output, "lfo"),
            4,
        )
        .into_handle();
        src.lock().samples_mut().unwrap().fill(1.0);
        let mut dest = Port::new(
            PortIdentifier::new(OwnerType::Plugin, PortType::Cv, PortFlow::Input, "mod"),
            4,
        );
        let links = vec![link(src.clone(), &dest, 2.0, true)];
        dest.mix_sources(&links, 0, 4);
        assert_eq!(dest.samples().unwrap(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn event_sources_append_in_window_and_sort() {
        let src = Port::new(
            PortIdentifier::new(OwnerType::Track, PortType::Event, PortFlow::Output, "midi"),
            16,
        )
        .into_handle();
        {
            let mut s = src.lock();
            let events = s.events_mut().unwrap();
            events.add_note_off(1, 60, 5, false);
            events.add_note_on(1, 60, 100, 5, false);
            events.add_note_on(1, 62, 100, 20, false);
        }
        let mut dest = Port::new(
            PortIdentifier::new(OwnerType::Track, PortType::Event, PortFlow::Input, "midi in"),
            16,
        );
        let links = vec![link(src, &dest, 1.0, true)];
        dest.mix_sources(&links, 0, 16);
        let events = dest.events().unwrap();
        assert_eq!(events.events().len(), 2);
        assert!(events.events()[0].is_note_on());
        assert!(events.events()[1].is_note_off());
    }

    #[test]
    fn control_values_clamp_into_range() {
        let mut port = Port::new(
            PortIdentifier::new(OwnerType::Fader, PortType::Control, PortFlow::Input, "amp"),
            4,
        )
        .with_range(0.0, 2.0, 0.0, 1.0);
        assert_eq!(port.control_value(), 1.0);
        port.set_control_value(5.0);
        assert_eq!(port.control_value(), 2.0);
        port.set_control_value(-1.0);
        assert_eq!(port.control_value(), 0.0);
    }

    #[test]
    fn cv_modulates_control_from_base_value() {
        let lfo = Port::new(
            PortIdentifier::new(OwnerType::Plugin, PortType::Cv, PortFlow::Output, "lfo"),
            4,
        )
        .into_handle();
        lfo.lock().samples_mut().unwrap().fill(0.5);
        let mut port = Port::new(
            PortIdentifier::new(OwnerType::Plugin, PortType::Control, PortFlow::Input, "cutoff"),
            4,
        )
        .with_range(0.0, 2.0, 0.0, 1.0);
        let links = vec![link(lfo, &port, 1.0, true)];
        port.mix_sources(&links, 0, 4);
        assert!((port.control_value() - 1.5).abs() < 1e-6);
        port.mix_sources(&links, 0, 4);
        assert!((port.control_value() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn control_returns_to_user_value_once_unplugged() {
        let lfo = Port::new(
            PortIdentifier::new(OwnerType::Plugin, PortType::Cv, PortFlow::Output, "lfo"),
            4,
        )
        .into_handle();
        lfo.lock().samples_mut().unwrap().fill(0.5);
        let knob = Port::new(
            PortIdentifier::new(OwnerType::Plugin, PortType::Control, PortFlow::Output, "knob"),
            4,
        )
        .with_range(0.0, 2.0, 0.0, 0.4)
        .into_handle();
        let mut port = Port::new(
            PortIdentifier::new(OwnerType::Plugin, PortType::Control, PortFlow::Input, "cutoff"),
            4,
        )
        .with_range(0.0, 2.0, 0.0, 1.0);

        port.mix_sources(&[link(lfo, &port, 1.0, true)], 0, 4);
        assert!((port.control_value() - 1.5).abs() < 1e-6);
        port.mix_sources(&[], 0, 4);
        assert_eq!(port.control_value(), 1.0);

        port.mix_sources(&[link(knob.clone(), &port, 1.0, true)], 0, 4);
        assert!((port.control_value() - 0.4).abs() < 1e-6);
        port.mix_sources(&[link(knob, &port, 1.0, false)], 0, 4);
        assert_eq!(port.control_value(), 1.0);
    }

    #[test]
    fn peak_tracks_last_block() {
        let mut port = audio(OwnerType::Track, PortFlow::Output, "out");
        port.samples_mut().unwrap()[3] = -0.75;
        port.update_peak(0, 8);
        assert_eq!(port.peak(), 0.75);
    }
}
