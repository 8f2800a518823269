use super::{
    processor::{HardwareInput, HardwareOutput, MidiPlayback},
    ring::{RingReader, RingStats, RingWriter, hw_ring},
};
use crate::{
    config::EngineConfig,
    error::RenderError,
    midi::{MidiEvent, MidiQueue},
    param::AtomicF32,
    render::Renderer,
    worker::configure_rt_thread,
};
#[cfg(unix)]
use nix::libc;
use rtrb::{Consumer, RingBuffer};
use std::f32::consts::TAU;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info};

const RT_PRIORITY_AUDIO: i32 = 19;
const MIDI_PLAYBACK_CAPACITY: usize = 1024;
const PROFILE_INTERVAL: Duration = Duration::from_secs(1);
const AUDIO_THREAD_NAME: &str = "patchbay-audio";

/// What the host needs from an audio driver.
pub trait HwBackend: Send {
    fn cycle_samples(&self) -> usize;
    fn sample_rate(&self) -> u32;
    fn input_channels(&self) -> usize;
    fn output_channels(&self) -> usize;
    fn run_cycle(&mut self) -> Result<(), String>;
}

/// Driver-side ends of the hardware bridge.
pub struct HwEndpoints {
    pub capture: Vec<RingWriter>,
    pub playback: Vec<RingReader>,
    pub midi_in: Option<MidiQueue>,
    pub midi_out: Consumer<MidiEvent>,
    pub midi_out_dropped: Arc<AtomicU64>,
}

/// Creates the capture and playback nodes together with the rings that
/// connect them to a driver.
pub fn bridge(config: &EngineConfig) -> (HardwareInput, HardwareOutput, HwEndpoints) {
    let capacity = config.ring_capacity();
    let (capture, capture_readers): (Vec<_>, Vec<_>) =
        (0..config.hw_inputs).map(|_| hw_ring(capacity)).unzip();
    let (playback_writers, playback): (Vec<_>, Vec<_>) =
        (0..config.hw_outputs).map(|_| hw_ring(capacity)).unzip();
    let (midi_producer, midi_out) = RingBuffer::new(MIDI_PLAYBACK_CAPACITY);
    let midi_playback = MidiPlayback::new(midi_producer);
    let midi_out_dropped = midi_playback.dropped();

    let input = HardwareInput::new(capture_readers, config.block_length);
    let output = HardwareOutput::new(playback_writers, midi_playback, config.block_length);
    let endpoints = HwEndpoints {
        capture,
        playback,
        midi_in: input.midi_queue(),
        midi_out,
        midi_out_dropped,
    };
    (input, output, endpoints)
}

/// Gives hardware MIDI messages that arrive without timing evenly spaced
/// frames across the cycle, in arrival order.
pub fn spread_event_frames(events: &mut [MidiEvent], frames: u32) {
    if events.len() <= 1 || frames <= 1 {
        return;
    }
    let n = events.len() as u64;
    for (idx, event) in events.iter_mut().enumerate() {
        event.set_time(((idx as u64 * (frames - 1) as u64) / n) as u32);
    }
}

/// Driver without hardware. Capture rings get silence or a test tone and
/// playback rings are drained and metered.
pub struct DummyBackend {
    renderer: Renderer,
    endpoints: HwEndpoints,
    block_length: usize,
    sample_rate: u32,
    tone_hz: Option<f32>,
    phase: f32,
    scratch: Vec<f32>,
    output_peak: Arc<AtomicF32>,
    midi_out_events: Arc<AtomicU64>,
}

impl DummyBackend {
    pub fn new(config: &EngineConfig, renderer: Renderer, endpoints: HwEndpoints) -> Self {
        Self {
            renderer,
            endpoints,
            block_length: config.block_length,
            sample_rate: config.sample_rate,
            tone_hz: None,
            phase: 0.0,
            scratch: vec![0.0; config.block_length],
            output_peak: Arc::new(AtomicF32::new(0.0)),
            midi_out_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_tone(mut self, hz: Option<f32>) -> Self {
        self.tone_hz = hz.filter(|hz| *hz > 0.0);
        self
    }

    /// Peak of all playback channels in the last cycle.
    pub fn output_peak(&self) -> Arc<AtomicF32> {
        self.output_peak.clone()
    }

    pub fn midi_out_events(&self) -> Arc<AtomicU64> {
        self.midi_out_events.clone()
    }

    pub fn capture_stats(&self) -> Vec<Arc<RingStats>> {
        self.endpoints.capture.iter().map(|w| w.stats()).collect()
    }

    pub fn playback_stats(&self) -> Vec<Arc<RingStats>> {
        self.endpoints.playback.iter().map(|r| r.stats()).collect()
    }

    /// Queues raw MIDI messages from a hardware input for the next cycle.
    pub fn receive_midi(&self, messages: &[&[u8]]) -> usize {
        let Some(queue) = &self.endpoints.midi_in else {
            return 0;
        };
        let mut events: Vec<MidiEvent> = messages
            .iter()
            .filter_map(|bytes| MidiEvent::from_bytes(bytes, 0))
            .collect();
        spread_event_frames(&mut events, self.block_length as u32);
        queue.push_all(&events)
    }

    fn fill_capture(&mut self) {
        match self.tone_hz {
            Some(hz) => {
                let step = TAU * hz / self.sample_rate as f32;
                for sample in &mut self.scratch {
                    *sample = 0.5 * self.phase.sin();
                    self.phase = (self.phase + step) % TAU;
                }
            }
            None => self.scratch.fill(0.0),
        }
        for writer in &self.endpoints.capture {
            if writer.write(&self.scratch) < self.scratch.len() {
                self.renderer.report_xrun();
            }
        }
    }

    fn drain_playback(&mut self) {
        let mut peak = 0.0_f32;
        for reader in &mut self.endpoints.playback {
            if reader.read_into(&mut self.scratch) < self.scratch.len() {
                self.renderer.report_xrun();
            }
            peak = self
                .scratch
                .iter()
                .fold(peak, |acc, s| acc.max(s.abs()));
        }
        self.output_peak.set(peak);
        let mut count = 0;
        while self.endpoints.midi_out.pop().is_ok() {
            count += 1;
        }
        self.midi_out_events.fetch_add(count, Ordering::Relaxed);
    }
}

impl HwBackend for DummyBackend {
    fn cycle_samples(&self) -> usize {
        self.block_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn input_channels(&self) -> usize {
        self.endpoints.capture.len()
    }

    fn output_channels(&self) -> usize {
        self.endpoints.playback.len()
    }

    fn run_cycle(&mut self) -> Result<(), String> {
        self.fill_capture();
        self.renderer.process_cycle(self.block_length);
        self.drain_playback();
        Ok(())
    }
}

#[derive(Debug)]
struct CycleProfiler {
    report_at: Instant,
    cycle_count: u64,
    cycle_err_count: u64,
    cycle_time_ns: u128,
    cycle_max_ns: u128,
}

impl CycleProfiler {
    fn new() -> Self {
        Self {
            report_at: Instant::now() + PROFILE_INTERVAL,
            cycle_count: 0,
            cycle_err_count: 0,
            cycle_time_ns: 0,
            cycle_max_ns: 0,
        }
    }

    fn record(&mut self, elapsed: Duration, failed: bool) {
        let ns = elapsed.as_nanos();
        self.cycle_count += 1;
        if failed {
            self.cycle_err_count += 1;
        }
        self.cycle_time_ns += ns;
        self.cycle_max_ns = self.cycle_max_ns.max(ns);
    }

    fn maybe_report(&mut self, cycle_samples: usize, sample_rate: u32) {
        let now = Instant::now();
        if now < self.report_at {
            return;
        }
        let cycle_avg_us = if self.cycle_count > 0 {
            (self.cycle_time_ns / self.cycle_count as u128) as f64 / 1_000.0
        } else {
            0.0
        };
        let budget_us = if sample_rate > 0 {
            cycle_samples as f64 * 1_000_000.0 / sample_rate as f64
        } else {
            0.0
        };
        info!(
            "audio profile: cycles={} cycle_err={} cycle_avg_us={:.1} cycle_max_us={:.1} budget_us={:.1}",
            self.cycle_count,
            self.cycle_err_count,
            cycle_avg_us,
            self.cycle_max_ns as f64 / 1_000.0,
            budget_us
        );
        self.report_at = now + PROFILE_INTERVAL;
        self.cycle_count = 0;
        self.cycle_err_count = 0;
        self.cycle_time_ns = 0;
        self.cycle_max_ns = 0;
    }
}

fn lock_memory_pages() -> Result<(), String> {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
        if rc == 0 {
            Ok(())
        } else {
            Err(format!(
                "mlockall(MCL_CURRENT|MCL_FUTURE) failed: {}",
                std::io::Error::last_os_error()
            ))
        }
    }
    #[cfg(not(unix))]
    {
        Err("mlockall is not supported on this platform".to_string())
    }
}

/// The running audio thread. Dropping it stops the thread.
pub struct RenderHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RenderHandle {
    /// Runs `backend` on its own thread, one cycle per block period.
    pub fn spawn<B: HwBackend + 'static>(
        mut backend: B,
        realtime: bool,
        profile: bool,
    ) -> Result<Self, RenderError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name(AUDIO_THREAD_NAME.to_string())
            .spawn(move || {
                if realtime {
                    if let Err(e) = lock_memory_pages() {
                        error!("audio memory lock not enabled: {e}");
                    }
                    if let Err(e) = configure_rt_thread(AUDIO_THREAD_NAME, RT_PRIORITY_AUDIO) {
                        error!("audio realtime priority not enabled: {e}");
                    }
                }
                let cycle_samples = backend.cycle_samples();
                let sample_rate = backend.sample_rate().max(1);
                let period = Duration::from_secs_f64(cycle_samples as f64 / sample_rate as f64);
                let mut profiler = profile.then(CycleProfiler::new);
                let mut deadline = Instant::now();
                while !stop_flag.load(Ordering::Relaxed) {
                    let started = Instant::now();
                    let result = backend.run_cycle();
                    if let Err(e) = &result {
                        error!("audio cycle failed: {e}");
                    }
                    if let Some(p) = profiler.as_mut() {
                        p.record(started.elapsed(), result.is_err());
                        p.maybe_report(cycle_samples, sample_rate);
                    }
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    } else {
                        deadline = now;
                    }
                }
            })
            .map_err(|source| RenderError::Spawn {
                name: AUDIO_THREAD_NAME.to_string(),
                source,
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("audio thread panicked");
        }
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Processable;

    #[test]
    fn spread_covers_the_cycle_in_order() {
        let mut events = vec![MidiEvent::note_on(1, 60, 100, 0); 4];
        spread_event_frames(&mut events, 256);
        let times: Vec<u32> = events.iter().map(|e| e.time()).collect();
        assert_eq!(times, vec![0, 63, 127, 191]);
    }

    #[test]
    fn single_event_keeps_its_frame() {
        let mut events = vec![MidiEvent::note_on(1, 60, 100, 7)];
        spread_event_frames(&mut events, 256);
        assert_eq!(events[0].time(), 7);
    }

    #[test]
    fn bridge_matches_the_configured_channels() {
        let config = EngineConfig {
            hw_inputs: 3,
            hw_outputs: 1,
            block_length: 32,
            ..EngineConfig::default()
        };
        let (input, output, endpoints) = bridge(&config);
        // Audio ports plus one MIDI port each.
        assert_eq!(input.outputs().len(), 4);
        assert_eq!(output.inputs().len(), 2);
        assert_eq!(endpoints.capture.len(), 3);
        assert_eq!(endpoints.playback.len(), 1);
        assert!(endpoints.midi_in.is_some());
    }
}
