//! Serializable wrappers around the VST3 event types.
//!
//! Plain payloads are carried as the native structs directly; the event
//! types with heap pointers (data dumps and UTF-16 text) get owned
//! counterparts whose buffers survive serialization. Reconstructed native
//! events point back into those owned buffers.

use serde::de::{self, EnumAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::trace;

use super::abi;
use crate::codec::{
    deserialize_vec_in_place, next_field, BytesInPlace, DeserializeInPlace, InPlaceSeed,
    WideStringInPlace,
};
use crate::error::InvalidArgument;

/// Maximum number of events in a single list.
pub const MAX_EVENTS: usize = 1 << 16;
/// Maximum size of a data event's buffer.
pub const MAX_DATA_SIZE: usize = 1 << 16;
/// Maximum length of a UTF-16 text field, in code units.
pub const MAX_TEXT_LEN: usize = 1 << 16;

/// Owned counterpart of [`abi::DataEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataEvent {
    pub kind: u32,
    pub buffer: Vec<u8>,
}

/// Owned counterpart of [`abi::NoteExpressionTextEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoteExpressionTextEvent {
    pub type_id: u32,
    pub note_id: i32,
    pub text: Vec<u16>,
}

/// Owned counterpart of [`abi::ChordEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChordEvent {
    pub root: i16,
    pub bass_note: i16,
    pub mask: i16,
    pub text: Vec<u16>,
}

/// Owned counterpart of [`abi::ScaleEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub root: i16,
    pub mask: i16,
    pub text: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    NoteOn(abi::NoteOnEvent),
    NoteOff(abi::NoteOffEvent),
    Data(DataEvent),
    PolyPressure(abi::PolyPressureEvent),
    NoteExpressionValue(abi::NoteExpressionValueEvent),
    NoteExpressionText(NoteExpressionTextEvent),
    Chord(ChordEvent),
    Scale(ScaleEvent),
    LegacyMidiCcOut(abi::LegacyMidiCcOutEvent),
}

impl Default for EventPayload {
    fn default() -> Self {
        EventPayload::NoteOn(abi::NoteOnEvent::default())
    }
}

/// A single bridged VST3 event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub bus_index: i32,
    pub sample_offset: i32,
    pub ppq_position: f64,
    pub flags: u16,
    pub payload: EventPayload,
}

impl Event {
    /// Parses a native event, `None` for unknown event types.
    ///
    /// # Safety
    ///
    /// `event.kind` must name the union member that was actually written,
    /// and any pointers inside must be valid for the lengths they declare.
    pub unsafe fn parse(event: &abi::Event) -> Option<Event> {
        let payload = match event.kind {
            abi::EVENT_NOTE_ON => EventPayload::NoteOn(event.event.note_on),
            abi::EVENT_NOTE_OFF => EventPayload::NoteOff(event.event.note_off),
            abi::EVENT_DATA => {
                let data = event.event.data;
                let buffer = if data.bytes.is_null() {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(data.bytes, data.size as usize).to_vec()
                };
                EventPayload::Data(DataEvent {
                    kind: data.kind,
                    buffer,
                })
            }
            abi::EVENT_POLY_PRESSURE => EventPayload::PolyPressure(event.event.poly_pressure),
            abi::EVENT_NOTE_EXPRESSION_VALUE => {
                EventPayload::NoteExpressionValue(event.event.note_expression_value)
            }
            abi::EVENT_NOTE_EXPRESSION_TEXT => {
                let text_event = event.event.note_expression_text;
                EventPayload::NoteExpressionText(NoteExpressionTextEvent {
                    type_id: text_event.type_id,
                    note_id: text_event.note_id,
                    text: copy_text(text_event.text, text_event.text_len as usize),
                })
            }
            abi::EVENT_CHORD => {
                let chord = event.event.chord;
                EventPayload::Chord(ChordEvent {
                    root: chord.root,
                    bass_note: chord.bass_note,
                    mask: chord.mask,
                    text: copy_text(chord.text, chord.text_len as usize),
                })
            }
            abi::EVENT_SCALE => {
                let scale = event.event.scale;
                EventPayload::Scale(ScaleEvent {
                    root: scale.root,
                    mask: scale.mask,
                    text: copy_text(scale.text, scale.text_len as usize),
                })
            }
            abi::EVENT_LEGACY_MIDI_CC_OUT => {
                EventPayload::LegacyMidiCcOut(event.event.legacy_midi_cc_out)
            }
            _ => {
                trace!(event_type = event.kind, "dropping unsupported event");
                return None;
            }
        };

        Some(Event {
            bus_index: event.bus_index,
            sample_offset: event.sample_offset,
            ppq_position: event.ppq_position,
            flags: event.flags,
            payload,
        })
    }

    /// Builds the native representation. Buffer and text pointers target
    /// this event's owned storage and stay valid until the event is
    /// mutated.
    pub(crate) fn to_native(&self) -> abi::Event {
        let (kind, data) = match &self.payload {
            EventPayload::NoteOn(event) => (abi::EVENT_NOTE_ON, abi::EventData { note_on: *event }),
            EventPayload::NoteOff(event) => {
                (abi::EVENT_NOTE_OFF, abi::EventData { note_off: *event })
            }
            EventPayload::Data(event) => (
                abi::EVENT_DATA,
                abi::EventData {
                    data: abi::DataEvent {
                        size: event.buffer.len() as u32,
                        kind: event.kind,
                        bytes: event.buffer.as_ptr(),
                    },
                },
            ),
            EventPayload::PolyPressure(event) => (
                abi::EVENT_POLY_PRESSURE,
                abi::EventData {
                    poly_pressure: *event,
                },
            ),
            EventPayload::NoteExpressionValue(event) => (
                abi::EVENT_NOTE_EXPRESSION_VALUE,
                abi::EventData {
                    note_expression_value: *event,
                },
            ),
            EventPayload::NoteExpressionText(event) => (
                abi::EVENT_NOTE_EXPRESSION_TEXT,
                abi::EventData {
                    note_expression_text: abi::NoteExpressionTextEvent {
                        type_id: event.type_id,
                        note_id: event.note_id,
                        text_len: event.text.len() as u32,
                        text: event.text.as_ptr(),
                    },
                },
            ),
            EventPayload::Chord(event) => (
                abi::EVENT_CHORD,
                abi::EventData {
                    chord: abi::ChordEvent {
                        root: event.root,
                        bass_note: event.bass_note,
                        mask: event.mask,
                        text_len: event.text.len() as u16,
                        text: event.text.as_ptr(),
                    },
                },
            ),
            EventPayload::Scale(event) => (
                abi::EVENT_SCALE,
                abi::EventData {
                    scale: abi::ScaleEvent {
                        root: event.root,
                        mask: event.mask,
                        text_len: event.text.len() as u16,
                        text: event.text.as_ptr(),
                    },
                },
            ),
            EventPayload::LegacyMidiCcOut(event) => (
                abi::EVENT_LEGACY_MIDI_CC_OUT,
                abi::EventData {
                    legacy_midi_cc_out: *event,
                },
            ),
        };

        abi::Event {
            bus_index: self.bus_index,
            sample_offset: self.sample_offset,
            ppq_position: self.ppq_position,
            flags: self.flags,
            kind,
            event: data,
        }
    }
}

unsafe fn copy_text(text: *const u16, len: usize) -> Vec<u16> {
    if text.is_null() {
        Vec::new()
    } else {
        std::slice::from_raw_parts(text, len).to_vec()
    }
}

const PAYLOAD_VARIANTS: &[&str] = &[
    "NoteOn",
    "NoteOff",
    "Data",
    "PolyPressure",
    "NoteExpressionValue",
    "NoteExpressionText",
    "Chord",
    "Scale",
    "LegacyMidiCcOut",
];

crate::codec::impl_in_place_pod!(
    abi::NoteOnEvent,
    abi::NoteOffEvent,
    abi::PolyPressureEvent,
    abi::NoteExpressionValueEvent,
    abi::LegacyMidiCcOutEvent,
);

impl DeserializeInPlace for DataEvent {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct DataVisitor<'a>(&'a mut DataEvent);

        impl<'de> Visitor<'de> for DataVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a data event")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                self.0.kind = next_field(&mut seq, "kind")?;
                seq.next_element_seed(BytesInPlace {
                    buf: &mut self.0.buffer,
                    max: MAX_DATA_SIZE,
                })?
                .ok_or_else(|| de::Error::custom("missing field `buffer`"))
            }
        }

        deserializer.deserialize_tuple(2, DataVisitor(self))
    }
}

impl DeserializeInPlace for NoteExpressionTextEvent {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct TextVisitor<'a>(&'a mut NoteExpressionTextEvent);

        impl<'de> Visitor<'de> for TextVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a note expression text event")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                self.0.type_id = next_field(&mut seq, "type_id")?;
                self.0.note_id = next_field(&mut seq, "note_id")?;
                seq.next_element_seed(WideStringInPlace {
                    buf: &mut self.0.text,
                    max: MAX_TEXT_LEN,
                })?
                .ok_or_else(|| de::Error::custom("missing field `text`"))
            }
        }

        deserializer.deserialize_tuple(3, TextVisitor(self))
    }
}

impl DeserializeInPlace for ChordEvent {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct ChordVisitor<'a>(&'a mut ChordEvent);

        impl<'de> Visitor<'de> for ChordVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a chord event")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                self.0.root = next_field(&mut seq, "root")?;
                self.0.bass_note = next_field(&mut seq, "bass_note")?;
                self.0.mask = next_field(&mut seq, "mask")?;
                seq.next_element_seed(WideStringInPlace {
                    buf: &mut self.0.text,
                    max: MAX_TEXT_LEN,
                })?
                .ok_or_else(|| de::Error::custom("missing field `text`"))
            }
        }

        deserializer.deserialize_tuple(4, ChordVisitor(self))
    }
}

impl DeserializeInPlace for ScaleEvent {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct ScaleVisitor<'a>(&'a mut ScaleEvent);

        impl<'de> Visitor<'de> for ScaleVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a scale event")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                self.0.root = next_field(&mut seq, "root")?;
                self.0.mask = next_field(&mut seq, "mask")?;
                seq.next_element_seed(WideStringInPlace {
                    buf: &mut self.0.text,
                    max: MAX_TEXT_LEN,
                })?
                .ok_or_else(|| de::Error::custom("missing field `text`"))
            }
        }

        deserializer.deserialize_tuple(3, ScaleVisitor(self))
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
                    (0, EventPayload::NoteOn(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (0, place) => {
                        *place = EventPayload::NoteOn(variant.newtype_variant()?);
                        Ok(())
                    }
                    (1, EventPayload::NoteOff(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (1, place) => {
                        *place = EventPayload::NoteOff(variant.newtype_variant()?);
                        Ok(())
                    }
                    (2, EventPayload::Data(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (2, place) => {
                        // Bound checks only run through the in-place path,
                        // so a variant switch decodes into a fresh value
                        let mut held = DataEvent::default();
                        variant.newtype_variant_seed(InPlaceSeed(&mut held))?;
                        *place = EventPayload::Data(held);
                        Ok(())
                    }
                    (3, EventPayload::PolyPressure(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (3, place) => {
                        *place = EventPayload::PolyPressure(variant.newtype_variant()?);
                        Ok(())
                    }
                    (4, EventPayload::NoteExpressionValue(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (4, place) => {
                        *place = EventPayload::NoteExpressionValue(variant.newtype_variant()?);
                        Ok(())
                    }
                    (5, EventPayload::NoteExpressionText(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (5, place) => {
                        let mut held = NoteExpressionTextEvent::default();
                        variant.newtype_variant_seed(InPlaceSeed(&mut held))?;
                        *place = EventPayload::NoteExpressionText(held);
                        Ok(())
                    }
                    (6, EventPayload::Chord(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (6, place) => {
                        let mut held = ChordEvent::default();
                        variant.newtype_variant_seed(InPlaceSeed(&mut held))?;
                        *place = EventPayload::Chord(held);
                        Ok(())
                    }
                    (7, EventPayload::Scale(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (7, place) => {
                        let mut held = ScaleEvent::default();
                        variant.newtype_variant_seed(InPlaceSeed(&mut held))?;
                        *place = EventPayload::Scale(held);
                        Ok(())
                    }
                    (8, EventPayload::LegacyMidiCcOut(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (8, place) => {
                        *place = EventPayload::LegacyMidiCcOut(variant.newtype_variant()?);
                        Ok(())
                    }
                    (tag, _) => Err(de::Error::invalid_value(
                        de::Unexpected::Unsigned(tag as u64),
                        &"a known event payload discriminant",
                    )),
                }
            }
        }

        deserializer.deserialize_enum("EventPayload", PAYLOAD_VARIANTS, PayloadVisitor(self))
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
                self.0.bus_index = next_field(&mut seq, "bus_index")?;
                self.0.sample_offset = next_field(&mut seq, "sample_offset")?;
                self.0.ppq_position = next_field(&mut seq, "ppq_position")?;
                self.0.flags = next_field(&mut seq, "flags")?;
                crate::codec::next_field_in_place(&mut seq, &mut self.0.payload, "payload")
            }
        }

        deserializer.deserialize_tuple(5, EventVisitor(self))
    }
}

/// An owned event list implementing `IEventList` for both directions.
/// Native events are reconstructed in one pass on the first `get_event`
/// call and cached; the cache entries may point into the owned events and
/// must not outlive the list.
#[derive(Default)]
pub struct EventList {
    events: Vec<Event>,
    reconstructed: Vec<abi::Event>,
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

// SAFETY: the raw pointers in the reconstructed cache only ever point into
// buffers owned by this list's own events.
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
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Refills the list from a host-provided event list. Unknown events
    /// are dropped.
    pub fn repopulate(&mut self, event_list: &mut dyn abi::IEventList) {
        self.clear();
        for index in 0..event_list.get_event_count() {
            if let Ok(native) = event_list.get_event(index) {
                // SAFETY: IEventList::get_event returns complete events
                if let Some(event) = unsafe { Event::parse(&native) } {
                    self.events.push(event);
                }
            }
        }
    }

    /// Adds every held event to the host's output event list, ignoring
    /// rejections.
    pub fn write_back_outputs(&self, output_events: &mut dyn abi::IEventList) {
        for event in &self.events {
            let native = event.to_native();
            if output_events.add_event(&native).is_err() {
                trace!("output event rejected by the host");
            }
        }
    }
}

impl abi::IEventList for EventList {
    fn get_event_count(&self) -> i32 {
        self.events.len() as i32
    }

    fn get_event(&mut self, index: i32) -> Result<abi::Event, InvalidArgument> {
        if index < 0 || index as usize >= self.events.len() {
            return Err(InvalidArgument);
        }

        // Reconstruct the missing tail all at once. This also covers a
        // plugin retrieving an event it just added.
        let already_reconstructed = self.reconstructed.len();
        if index as usize >= already_reconstructed {
            for event in &self.events[already_reconstructed..] {
                self.reconstructed.push(event.to_native());
            }
        }

        Ok(self.reconstructed[index as usize])
    }

    fn add_event(&mut self, event: &abi::Event) -> Result<(), InvalidArgument> {
        // SAFETY: IEventList::add_event receives complete events
        if let Some(event) = unsafe { Event::parse(event) } {
            self.events.push(event);
        }
        // Unknown events are dropped but still reported as accepted
        Ok(())
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
        deserialize_vec_in_place(&mut self.events, MAX_EVENTS, deserializer)
    }
}
