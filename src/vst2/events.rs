//! Serializable wrappers around the VST2 event blobs.
//!
//! A cycle rarely carries more than a handful of events, so the list
//! keeps them inline in a `SmallVec` and never allocates on the common
//! path.

use serde::de::{self, EnumAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use smallvec::SmallVec;
use tracing::trace;

use super::abi;
use crate::codec::{next_field, BytesInPlace, DeserializeInPlace, InPlaceSeed};

/// Maximum number of events in a single list.
pub const MAX_EVENTS: usize = 1 << 16;
/// Maximum size of a sysex dump.
pub const MAX_SYSEX_SIZE: usize = 1 << 16;

/// Owned counterpart of [`abi::VstMidiEvent`], minus the header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MidiEvent {
    pub flags: i32,
    pub note_length: i32,
    pub note_offset: i32,
    pub data: [u8; 4],
    pub detune: i8,
    pub note_off_velocity: u8,
}

/// Owned counterpart of [`abi::VstMidiSysexEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SysexEvent {
    pub flags: i32,
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Midi(MidiEvent),
    Sysex(SysexEvent),
}

impl Default for EventPayload {
    fn default() -> Self {
        EventPayload::Midi(MidiEvent::default())
    }
}

/// A single bridged VST2 event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub delta_frames: i32,
    pub payload: EventPayload,
}

impl Event {
    /// Parses a native event blob, `None` for unknown event types.
    ///
    /// # Safety
    ///
    /// The union side named by the blob's type field must have been
    /// written, and a sysex dump pointer must be valid for `dump_bytes`.
    pub unsafe fn parse(event: &abi::VstEvent) -> Option<Event> {
        // Both union members share the header fields
        match event.midi.event_type {
            abi::K_VST_MIDI_TYPE => {
                let midi = event.midi;
                Some(Event {
                    delta_frames: midi.delta_frames,
                    payload: EventPayload::Midi(MidiEvent {
                        flags: midi.flags,
                        note_length: midi.note_length,
                        note_offset: midi.note_offset,
                        data: midi.midi_data,
                        detune: midi.detune,
                        note_off_velocity: midi.note_off_velocity,
                    }),
                })
            }
            abi::K_VST_SYSEX_TYPE => {
                let sysex = event.sysex;
                let buffer = if sysex.sysex_dump.is_null() {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(sysex.sysex_dump, sysex.dump_bytes as usize)
                        .to_vec()
                };
                Some(Event {
                    delta_frames: sysex.delta_frames,
                    payload: EventPayload::Sysex(SysexEvent {
                        flags: sysex.flags,
                        buffer,
                    }),
                })
            }
            event_type => {
                trace!(event_type, "dropping unsupported event");
                None
            }
        }
    }

    /// Builds the native blob. A sysex dump pointer targets this event's
    /// owned buffer and stays valid until the event is mutated.
    pub(crate) fn to_native(&self) -> abi::VstEvent {
        match &self.payload {
            EventPayload::Midi(midi) => abi::VstEvent {
                midi: abi::VstMidiEvent {
                    event_type: abi::K_VST_MIDI_TYPE,
                    byte_size: std::mem::size_of::<abi::VstMidiEvent>() as i32,
                    delta_frames: self.delta_frames,
                    flags: midi.flags,
                    note_length: midi.note_length,
                    note_offset: midi.note_offset,
                    midi_data: midi.data,
                    detune: midi.detune,
                    note_off_velocity: midi.note_off_velocity,
                    reserved1: 0,
                    reserved2: 0,
                },
            },
            EventPayload::Sysex(sysex) => abi::VstEvent {
                sysex: abi::VstMidiSysexEvent {
                    event_type: abi::K_VST_SYSEX_TYPE,
                    byte_size: std::mem::size_of::<abi::VstMidiSysexEvent>() as i32,
                    delta_frames: self.delta_frames,
                    flags: sysex.flags,
                    dump_bytes: sysex.buffer.len() as i32,
                    reserved1: std::ptr::null_mut(),
                    sysex_dump: sysex.buffer.as_ptr(),
                    reserved2: std::ptr::null_mut(),
                },
            },
        }
    }
}

crate::codec::impl_in_place_pod!(MidiEvent);

impl DeserializeInPlace for SysexEvent {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct SysexVisitor<'a>(&'a mut SysexEvent);

        impl<'de> Visitor<'de> for SysexVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a sysex event")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                self.0.flags = next_field(&mut seq, "flags")?;
                seq.next_element_seed(BytesInPlace {
                    buf: &mut self.0.buffer,
                    max: MAX_SYSEX_SIZE,
                })?
                .ok_or_else(|| de::Error::custom("missing field `buffer`"))
            }
        }

        deserializer.deserialize_tuple(2, SysexVisitor(self))
    }
}

impl DeserializeInPlace for EventPayload {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct PayloadVisitor<'a>(&'a mut EventPayload);

        impl<'de> Visitor<'de> for PayloadVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an event payload")
            }

            fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<(), A::Error> {
                let (tag, variant) = data.variant::<u32>()?;
                match (tag, &mut *self.0) {
                    (0, EventPayload::Midi(held)) => variant.newtype_variant_seed(InPlaceSeed(held)),
                    (0, place) => {
                        *place = EventPayload::Midi(variant.newtype_variant()?);
                        Ok(())
                    }
                    (1, EventPayload::Sysex(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (1, place) => {
                        // Bound checks only run through the in-place path,
                        // so a variant switch decodes into a fresh value
                        let mut held = SysexEvent::default();
                        variant.newtype_variant_seed(InPlaceSeed(&mut held))?;
                        *place = EventPayload::Sysex(held);
                        Ok(())
                    }
                    (tag, _) => Err(de::Error::invalid_value(
                        de::Unexpected::Unsigned(tag as u64),
                        &"a known event payload discriminant",
                    )),
                }
            }
        }

        deserializer.deserialize_enum("EventPayload", &["Midi", "Sysex"], PayloadVisitor(self))
    }
}

impl DeserializeInPlace for Event {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct EventVisitor<'a>(&'a mut Event);

        impl<'de> Visitor<'de> for EventVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an event")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                self.0.delta_frames = next_field(&mut seq, "delta_frames")?;
                crate::codec::next_field_in_place(&mut seq, &mut self.0.payload, "payload")
            }
        }

        deserializer.deserialize_tuple(2, EventVisitor(self))
    }
}

/// An owned event list with inline storage for the common case. The
/// native `VstEvents` pointer array is rebuilt into scratch buffers on
/// demand; those pointers may target the owned events and must not
/// outlive the list.
#[derive(Default)]
pub struct EventList {
    events: SmallVec<[Event; 64]>,
    reconstructed: Vec<abi::VstEvent>,
    pointers: Vec<*mut abi::VstEvent>,
}

impl std::fmt::Debug for EventList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventList")
            .field("events", &self.events)
            .finish()
    }
}

impl PartialEq for EventList {
    fn eq(&self, other: &Self) -> bool {
        self.events == other.events
    }
}

// SAFETY: the raw pointers in the scratch buffers only ever point into
// this list's own storage.
unsafe impl Send for EventList {}

impl EventList {
    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.reconstructed.clear();
        self.pointers.clear();
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Refills the list from a host's event pointer array. Unknown events
    /// are dropped.
    ///
    /// # Safety
    ///
    /// Every referenced blob must be a complete event: the union side
    /// named by its type field written, and any sysex dump pointer valid
    /// for the length it declares.
    pub unsafe fn repopulate(&mut self, events: &[&abi::VstEvent]) {
        self.clear();
        for event in events {
            if let Some(event) = Event::parse(event) {
                self.events.push(event);
            }
        }
    }

    /// Rebuilds the native pointer array over scratch copies of the held
    /// events. The returned pointers are invalidated by any mutation of
    /// this list.
    pub fn as_native(&mut self) -> &[*mut abi::VstEvent] {
        self.reconstructed.clear();
        self.reconstructed
            .extend(self.events.iter().map(Event::to_native));

        self.pointers.clear();
        self.pointers
            .extend(self.reconstructed.iter_mut().map(|event| event as *mut _));

        &self.pointers
    }

    /// Hands every held event to an output sink, ignoring rejections.
    pub fn write_back_outputs(&self, sink: &mut dyn abi::EventSink) {
        for event in &self.events {
            let native = event.to_native();
            if !sink.accept(&native) {
                trace!("output event rejected by the host");
            }
        }
    }
}

impl abi::EventSink for EventList {
    fn accept(&mut self, event: &abi::VstEvent) -> bool {
        // SAFETY: EventSink::accept receives complete events
        if let Some(event) = unsafe { Event::parse(event) } {
            self.events.push(event);
        }
        // Unknown events are dropped but still reported as accepted
        true
    }
}

impl Serialize for EventList {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.events)
    }
}

impl DeserializeInPlace for EventList {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        self.reconstructed.clear();
        self.pointers.clear();

        struct ListVisitor<'a>(&'a mut SmallVec<[Event; 64]>);

        impl<'de> Visitor<'de> for ListVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a sequence of events")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                if let Some(hint) = seq.size_hint() {
                    if hint > MAX_EVENTS {
                        return Err(de::Error::invalid_length(hint, &"too many events"));
                    }
                }

                // Refill existing slots before growing, then drop the tail
                let mut consumed = 0;
                loop {
                    if consumed >= MAX_EVENTS {
                        return Err(de::Error::invalid_length(consumed, &"too many events"));
                    }
                    if consumed < self.0.len() {
                        match seq.next_element_seed(InPlaceSeed(&mut self.0[consumed]))? {
                            Some(()) => consumed += 1,
                            None => break,
                        }
                    } else {
                        let mut event = Event::default();
                        match seq.next_element_seed(InPlaceSeed(&mut event))? {
                            Some(()) => {
                                self.0.push(event);
                                consumed += 1;
                            }
                            None => break,
                        }
                    }
                }
                self.0.truncate(consumed);

                Ok(())
            }
        }

        deserializer.deserialize_seq(ListVisitor(&mut self.events))
    }
}
