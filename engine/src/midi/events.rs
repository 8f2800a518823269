use super::event::{MidiEvent, MidiTime};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-array capacity. This caps how many events a port can carry in one
/// cycle; anything beyond it is dropped and counted.
pub const MAX_MIDI_EVENTS: usize = 2560;

pub const ALL_CHANNELS: u16 = 0xFFFF;

/// Fixed-capacity event array. Storage is allocated once; pushing never
/// reallocates.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Box<[MidiEvent]>,
    len: usize,
    dropped: u64,
}

impl EventBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: vec![MidiEvent::default(); capacity].into_boxed_slice(),
            len: 0,
            dropped: 0,
        }
    }

    /// Returns `false` when the buffer is full and the event was dropped.
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.len == self.events.len() {
            self.dropped = self.dropped.saturating_add(1);
            return false;
        }
        self.events[self.len] = event;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[MidiEvent] {
        &self.events[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Keeps events matching `keep`, preserving order, in place.
    pub fn retain(&mut self, mut keep: impl FnMut(&MidiEvent) -> bool) -> usize {
        let mut w = 0;
        for r in 0..self.len {
            if keep(&self.events[r]) {
                self.events[w] = self.events[r];
                w += 1;
            }
        }
        let removed = self.len - w;
        self.len = w;
        removed
    }

    /// Stable insertion sort by scheduling order. Buffers arrive mostly
    /// sorted and the sort must not allocate.
    pub fn sort(&mut self) {
        let events = &mut self.events[..self.len];
        for i in 1..events.len() {
            let mut j = i;
            while j > 0 && events[j - 1].schedule_cmp(&events[j]).is_gt() {
                events.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    /// Removes later copies of structurally identical events.
    pub fn clear_duplicates(&mut self) -> usize {
        let mut w = 0;
        for r in 0..self.len {
            let ev = self.events[r];
            if !self.events[..w].iter().any(|kept| kept.same_as(&ev)) {
                self.events[w] = ev;
                w += 1;
            }
        }
        let removed = self.len - w;
        self.len = w;
        removed
    }

    /// Overwrites this buffer with the contents of `other`.
    fn copy_from(&mut self, other: &EventBuffer) {
        let n = other.len.min(self.events.len());
        self.events[..n].copy_from_slice(&other.events[..n]);
        self.len = n;
        if n < other.len {
            self.dropped = self.dropped.saturating_add((other.len - n) as u64);
        }
    }
}

/// Producer side of a port's queued events. Cloned into anything off the
/// render thread that wants to inject MIDI (UI, hardware input, tests).
#[derive(Debug, Clone)]
pub struct MidiQueue {
    buffer: Arc<Mutex<EventBuffer>>,
}

impl MidiQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(EventBuffer::with_capacity(capacity))),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, EventBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: MidiEvent) -> bool {
        self.lock().push(event)
    }

    pub fn push_all(&self, events: &[MidiEvent]) -> usize {
        let mut queued = self.lock();
        events.iter().filter(|ev| queued.push(**ev)).count()
    }

    pub fn panic(&self) {
        let mut queued = self.lock();
        for channel in 1..=16 {
            queued.push(MidiEvent::all_notes_off(channel, 0));
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Double-buffered events of an event port.
///
/// `main` belongs to the render pass and is valid for one cycle. `queued`
/// is filled by producers on other threads and moved into `main` by
/// [`MidiEvents::dequeue`] at the start of each cycle. Every operation that
/// takes `queued: bool` selects which of the two arrays it acts on.
#[derive(Debug)]
pub struct MidiEvents {
    main: EventBuffer,
    queued: MidiQueue,
}

impl Default for MidiEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiEvents {
    pub fn new() -> Self {
        Self::with_capacity(MAX_MIDI_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            main: EventBuffer::with_capacity(capacity),
            queued: MidiQueue::new(capacity),
        }
    }

    pub fn queue(&self) -> MidiQueue {
        self.queued.clone()
    }

    fn with_target<R>(&mut self, queued: bool, f: impl FnOnce(&mut EventBuffer) -> R) -> R {
        if queued {
            let mut guard = self.queued.lock();
            f(&mut *guard)
        } else {
            f(&mut self.main)
        }
    }

    fn push(&mut self, event: MidiEvent, queued: bool) -> bool {
        self.with_target(queued, |buf| buf.push(event))
    }

    pub fn add_note_on(
        &mut self,
        channel: u8,
        note_pitch: u8,
        velocity: u8,
        time: MidiTime,
        queued: bool,
    ) -> bool {
        self.push(MidiEvent::note_on(channel, note_pitch, velocity, time), queued)
    }

    pub fn add_note_off(&mut self, channel: u8, note_pitch: u8, time: MidiTime, queued: bool) -> bool {
        self.push(MidiEvent::note_off(channel, note_pitch, time), queued)
    }

    pub fn add_control_change(
        &mut self,
        channel: u8,
        controller: u8,
        control: u8,
        time: MidiTime,
        queued: bool,
    ) -> bool {
        self.push(
            MidiEvent::control_change(channel, controller, control, time),
            queued,
        )
    }

    pub fn add_pitchbend(&mut self, channel: u8, pitchbend: u16, time: MidiTime, queued: bool) -> bool {
        self.push(MidiEvent::pitchbend(channel, pitchbend, time), queued)
    }

    pub fn add_channel_pressure(
        &mut self,
        channel: u8,
        value: u8,
        time: MidiTime,
        queued: bool,
    ) -> bool {
        self.push(MidiEvent::channel_pressure(channel, value, time), queued)
    }

    pub fn add_song_pos(&mut self, total_sixteenths: u16, time: MidiTime, queued: bool) -> bool {
        self.push(MidiEvent::song_position(total_sixteenths, time), queued)
    }

    /// Adds an all-notes-off (CC 123) for one channel.
    pub fn add_all_notes_off(&mut self, channel: u8, time: MidiTime, queued: bool) -> bool {
        self.push(MidiEvent::all_notes_off(channel, time), queued)
    }

    pub fn add_raw(&mut self, bytes: &[u8], time: MidiTime, queued: bool) -> bool {
        match MidiEvent::raw(bytes, time) {
            Some(ev) => self.push(ev, queued),
            None => false,
        }
    }

    /// Parses a wire message and adds it. Returns `false` when the bytes
    /// are not a supported message or the array is full.
    pub fn add_event_from_buf(&mut self, time: MidiTime, bytes: &[u8], queued: bool) -> bool {
        match MidiEvent::from_bytes(bytes, time) {
            Some(ev) => self.push(ev, queued),
            None => false,
        }
    }

    pub fn add_event(&mut self, event: MidiEvent, queued: bool) -> bool {
        self.push(event, queued)
    }

    /// Moves every queued event into main, in order, and empties queued.
    pub fn dequeue(&mut self) {
        let mut queued = self.queued.lock();
        self.main.copy_from(&queued);
        queued.clear();
    }

    /// Copies events from `src` (its main array) whose time lies in
    /// `[local_offset, local_offset + nframes)`.
    pub fn append(&mut self, src: &MidiEvents, local_offset: MidiTime, nframes: MidiTime, queued: bool) {
        self.append_events(src.events(), ALL_CHANNELS, local_offset, nframes, queued);
    }

    /// Like [`MidiEvents::append`], skipping channel voice messages whose
    /// channel bit (bit 0 = channel 1) is clear in `channel_mask`. System
    /// messages always pass.
    pub fn append_with_filter(
        &mut self,
        src: &MidiEvents,
        channel_mask: u16,
        local_offset: MidiTime,
        nframes: MidiTime,
        queued: bool,
    ) {
        self.append_events(src.events(), channel_mask, local_offset, nframes, queued);
    }

    pub fn append_events(
        &mut self,
        src: &[MidiEvent],
        channel_mask: u16,
        local_offset: MidiTime,
        nframes: MidiTime,
        queued: bool,
    ) {
        let end = local_offset.saturating_add(nframes);
        self.with_target(queued, |dest| {
            for ev in src {
                if ev.time() < local_offset || ev.time() >= end {
                    continue;
                }
                let channel = ev.channel();
                if channel > 0 && channel_mask & (1 << (channel - 1)) == 0 {
                    continue;
                }
                dest.push(*ev);
            }
            dest.clear_duplicates();
        });
    }

    pub fn sort(&mut self, queued: bool) {
        self.with_target(queued, EventBuffer::sort);
    }

    pub fn sort_by_time(&mut self) {
        self.main.sort();
    }

    pub fn clear_duplicates(&mut self, queued: bool) -> usize {
        self.with_target(queued, EventBuffer::clear_duplicates)
    }

    /// One all-notes-off per channel, at time 0.
    pub fn panic(&mut self, queued: bool) {
        self.with_target(queued, |buf| {
            for channel in 1..=16 {
                buf.push(MidiEvent::all_notes_off(channel, 0));
            }
        });
    }

    pub fn check_for_note_on(&mut self, note_pitch: u8, queued: bool) -> bool {
        self.with_target(queued, |buf| {
            buf.as_slice()
                .iter()
                .any(|ev| ev.is_note_on() && ev.note_pitch() == note_pitch)
        })
    }

    /// Removes every note-on for `note_pitch`. Returns whether any was found.
    pub fn delete_note_on(&mut self, note_pitch: u8, queued: bool) -> bool {
        self.with_target(queued, |buf| {
            buf.retain(|ev| !(ev.is_note_on() && ev.note_pitch() == note_pitch)) > 0
        })
    }

    pub fn has_note_on(&self, check_main: bool, check_queued: bool) -> bool {
        let any_on = |buf: &EventBuffer| buf.as_slice().iter().any(MidiEvent::is_note_on);
        (check_main && any_on(&self.main)) || (check_queued && any_on(&*self.queued.lock()))
    }

    /// Moves every channel voice message in main to `channel` (1-16).
    pub fn set_channel(&mut self, channel: u8) {
        let len = self.main.len;
        for ev in &mut self.main.events[..len] {
            ev.set_channel(channel);
        }
    }

    pub fn clear(&mut self, queued: bool) {
        self.with_target(queued, EventBuffer::clear);
    }

    pub fn len(&mut self, queued: bool) -> usize {
        self.with_target(queued, |buf| buf.len())
    }

    /// Main events of the current cycle.
    pub fn events(&self) -> &[MidiEvent] {
        self.main.as_slice()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MidiEvent> {
        self.main.as_slice().iter()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty()
    }

    /// Events lost to a full array, over both arrays.
    pub fn dropped(&self) -> u64 {
        self.main.dropped() + self.queued.lock().dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::event::MidiEventType;

    #[test]
    fn dequeue_moves_queued_into_main() {
        let mut events = MidiEvents::new();
        assert!(events.add_note_on(1, 60, 100, 0, true));
        events.dequeue();
        assert_eq!(events.events(), &[MidiEvent::note_on(1, 60, 100, 0)]);
        assert_eq!(events.len(true), 0);
    }

    #[test]
    fn dequeue_preserves_count_and_order() {
        let mut events = MidiEvents::new();
        events.add_note_on(1, 60, 100, 7, false);
        let queue = events.queue();
        for t in 0..5 {
            queue.push(MidiEvent::note_on(1, 60 + t as u8, 100, t));
        }
        events.dequeue();
        assert_eq!(events.len(false), 5);
        let times: Vec<_> = events.iter().map(MidiEvent::time).collect();
        assert_eq!(times, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn sort_puts_note_on_before_note_off_at_same_time() {
        let mut events = MidiEvents::new();
        events.add_note_off(1, 60, 5, false);
        events.add_note_on(1, 60, 100, 5, false);
        events.add_control_change(1, 7, 100, 2, false);
        events.sort_by_time();
        let kinds: Vec<_> = events.iter().map(MidiEvent::event_type).collect();
        assert_eq!(
            kinds,
            vec![
                MidiEventType::Controller,
                MidiEventType::NoteOn,
                MidiEventType::NoteOff
            ]
        );
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let mut events = MidiEvents::new();
        events.add_note_on(1, 62, 100, 3, false);
        events.add_note_on(1, 60, 100, 3, false);
        events.add_note_on(1, 61, 100, 1, false);
        events.sort(false);
        let pitches: Vec<_> = events.iter().map(MidiEvent::note_pitch).collect();
        assert_eq!(pitches, vec![61, 62, 60]);
    }

    #[test]
    fn append_keeps_only_the_window() {
        let mut src = MidiEvents::new();
        for t in [0, 4, 5, 9, 10, 12] {
            src.add_note_on(1, 60 + t as u8, 100, t, false);
        }
        let mut dest = MidiEvents::new();
        dest.append(&src, 5, 5, false);
        let times: Vec<_> = dest.iter().map(MidiEvent::time).collect();
        assert_eq!(times, vec![5, 9]);
    }

    #[test]
    fn append_with_filter_skips_masked_channels() {
        let mut src = MidiEvents::new();
        src.add_note_on(1, 60, 100, 0, false);
        src.add_note_on(2, 61, 100, 0, false);
        src.add_note_on(3, 62, 100, 0, false);
        src.add_raw(&[0xF8], 0, false);
        let mut dest = MidiEvents::new();
        dest.append_with_filter(&src, 0b101, 0, 16, false);
        let channels: Vec<_> = dest.iter().map(MidiEvent::channel).collect();
        assert_eq!(channels, vec![1, 3, 0]);
    }

    #[test]
    fn filter_drops_program_and_poly_pressure_on_masked_channels() {
        let mut src = MidiEvents::new();
        src.add_raw(&[0xC1, 5], 0, false);
        src.add_raw(&[0xA1, 60, 10], 1, false);
        src.add_note_on(2, 61, 100, 2, false);
        src.add_raw(&[0xC0, 7], 3, false);
        src.add_raw(&[0xA0, 62, 20], 4, false);
        let mut dest = MidiEvents::new();
        dest.append_with_filter(&src, 0b1, 0, 16, false);
        let kept: Vec<_> = dest.iter().map(MidiEvent::as_bytes).collect();
        assert_eq!(kept, vec![&[0xC0, 7][..], &[0xA0, 62, 20][..]]);
    }

    #[test]
    fn append_twice_does_not_duplicate() {
        let mut src = MidiEvents::new();
        src.add_note_on(1, 60, 100, 1, false);
        let mut dest = MidiEvents::new();
        dest.append(&src, 0, 8, false);
        dest.append(&src, 0, 8, false);
        assert_eq!(dest.len(false), 1);
    }

    #[test]
    fn clear_duplicates_is_idempotent() {
        let mut events = MidiEvents::new();
        events.add_note_on(1, 60, 100, 0, false);
        events.add_note_on(1, 60, 100, 0, false);
        events.add_note_on(1, 60, 90, 0, false);
        events.add_note_off(1, 60, 0, false);
        events.add_note_off(1, 60, 0, false);
        assert_eq!(events.clear_duplicates(false), 2);
        let once: Vec<_> = events.iter().copied().collect();
        assert_eq!(events.clear_duplicates(false), 0);
        assert_eq!(events.events(), once.as_slice());
        assert_eq!(events.len(false), 3);
    }

    #[test]
    fn panic_adds_one_all_notes_off_per_channel() {
        let mut events = MidiEvents::new();
        events.panic(true);
        events.dequeue();
        assert_eq!(events.len(false), 16);
        for (i, ev) in events.iter().enumerate() {
            assert_eq!(ev.event_type(), MidiEventType::AllNotesOff);
            assert_eq!(ev.channel(), i as u8 + 1);
            assert_eq!(ev.controller(), 123);
            assert_eq!(ev.time(), 0);
        }
    }

    #[test]
    fn note_on_lookup_and_delete() {
        let mut events = MidiEvents::new();
        events.add_note_on(1, 60, 100, 0, false);
        events.add_note_off(1, 60, 4, false);
        events.add_note_on(1, 60, 80, 8, false);
        events.add_note_on(1, 64, 80, 8, false);
        assert!(events.check_for_note_on(60, false));
        assert!(!events.check_for_note_on(61, false));
        assert!(events.delete_note_on(60, false));
        assert!(!events.check_for_note_on(60, false));
        assert_eq!(events.len(false), 2);
        assert!(!events.delete_note_on(60, false));
        assert!(events.has_note_on(true, false));
        assert!(!events.has_note_on(false, true));
    }

    #[test]
    fn overflow_drops_and_counts() {
        let mut events = MidiEvents::with_capacity(2);
        assert!(events.add_note_on(1, 60, 100, 0, false));
        assert!(events.add_note_on(1, 61, 100, 0, false));
        assert!(!events.add_note_on(1, 62, 100, 0, false));
        assert_eq!(events.len(false), 2);
        assert_eq!(events.dropped(), 1);
    }

    #[test]
    fn event_from_buf_converts_silent_note_on() {
        let mut events = MidiEvents::new();
        assert!(events.add_event_from_buf(3, &[0x90, 60, 0], false));
        assert!(!events.add_event_from_buf(3, &[0xFE], false));
        assert!(events.iter().all(MidiEvent::is_note_off));
        assert_eq!(events.len(false), 1);
    }

    #[test]
    fn set_channel_rewrites_voice_messages() {
        let mut events = MidiEvents::new();
        events.add_note_on(1, 60, 100, 0, false);
        events.add_pitchbend(2, 0x2000, 0, false);
        events.set_channel(5);
        assert!(events.iter().all(|ev| ev.channel() == 5));
    }
}
