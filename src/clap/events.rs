//! Serializable wrappers around the CLAP event types.
//!
//! Events are parsed out of the host's native event structs into plain
//! owned data, sent over the wire, and reconstructed back into native
//! structs on the other side. Variable-length payloads (sysex) are owned by
//! the event; the native representation's pointer is fixed up at
//! reconstruction time and points into that owned buffer.

use std::mem::size_of;

use serde::de::{self, EnumAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

use super::abi::{self, InputEvents, OutputEvents};
use crate::codec::{
    deserialize_vec_in_place, next_field, BytesInPlace, DeserializeInPlace, InPlaceSeed,
};

/// Maximum number of events in a single list.
pub const MAX_EVENTS: usize = 1 << 16;
/// Maximum size of a single sysex dump.
pub const MAX_SYSEX_SIZE: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoteEventKind {
    #[default]
    On,
    Off,
    Choke,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteEvent {
    pub kind: NoteEventKind,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub velocity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteExpressionEvent {
    pub expression_id: i32,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub value: f64,
}

/// The cookie is an opaque host-sized pointer that must round-trip
/// unchanged, so it is carried as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamValueEvent {
    pub param_id: u32,
    pub cookie: u64,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamModEvent {
    pub param_id: u32,
    pub cookie: u64,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParamGestureKind {
    #[default]
    Begin,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamGestureEvent {
    pub kind: ParamGestureKind,
    pub param_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransportEvent {
    pub flags: u32,
    pub song_pos_beats: i64,
    pub song_pos_seconds: i64,
    pub tempo: f64,
    pub tempo_inc: f64,
    pub loop_start_beats: i64,
    pub loop_end_beats: i64,
    pub loop_start_seconds: i64,
    pub loop_end_seconds: i64,
    pub bar_start: i64,
    pub bar_number: i32,
    pub tsig_num: u16,
    pub tsig_denom: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MidiEvent {
    pub port_index: u16,
    pub data: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MidiSysexEvent {
    pub port_index: u16,
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Midi2Event {
    pub port_index: u16,
    pub data: [u32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Note(NoteEvent),
    NoteExpression(NoteExpressionEvent),
    ParamValue(ParamValueEvent),
    ParamMod(ParamModEvent),
    ParamGesture(ParamGestureEvent),
    Transport(TransportEvent),
    Midi(MidiEvent),
    MidiSysex(MidiSysexEvent),
    Midi2(Midi2Event),
}

impl Default for EventPayload {
    fn default() -> Self {
        EventPayload::Midi(MidiEvent::default())
    }
}

/// A single bridged CLAP event: the shared header fields plus the typed
/// payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub time: u32,
    pub flags: u32,
    pub payload: EventPayload,
}

impl Event {
    /// Parses a native event. Returns `None` for event types this bridge
    /// does not know, which the caller drops.
    ///
    /// # Safety
    ///
    /// `header` must be the header of a complete event struct matching
    /// `header.type_`, per the [`InputEvents::get`] contract.
    pub unsafe fn parse(header: &abi::clap_event_header) -> Option<Event> {
        if header.space_id != abi::CLAP_CORE_EVENT_SPACE_ID {
            trace!(
                space_id = header.space_id,
                event_type = header.type_,
                "dropping event from unknown event space"
            );
            return None;
        }

        let payload = match header.type_ {
            abi::CLAP_EVENT_NOTE_ON
            | abi::CLAP_EVENT_NOTE_OFF
            | abi::CLAP_EVENT_NOTE_CHOKE
            | abi::CLAP_EVENT_NOTE_END => {
                let event = &*(header as *const _ as *const abi::clap_event_note);
                EventPayload::Note(NoteEvent {
                    kind: match header.type_ {
                        abi::CLAP_EVENT_NOTE_ON => NoteEventKind::On,
                        abi::CLAP_EVENT_NOTE_OFF => NoteEventKind::Off,
                        abi::CLAP_EVENT_NOTE_CHOKE => NoteEventKind::Choke,
                        _ => NoteEventKind::End,
                    },
                    note_id: event.note_id,
                    port_index: event.port_index,
                    channel: event.channel,
                    key: event.key,
                    velocity: event.velocity,
                })
            }
            abi::CLAP_EVENT_NOTE_EXPRESSION => {
                let event = &*(header as *const _ as *const abi::clap_event_note_expression);
                EventPayload::NoteExpression(NoteExpressionEvent {
                    expression_id: event.expression_id,
                    note_id: event.note_id,
                    port_index: event.port_index,
                    channel: event.channel,
                    key: event.key,
                    value: event.value,
                })
            }
            abi::CLAP_EVENT_PARAM_VALUE => {
                let event = &*(header as *const _ as *const abi::clap_event_param_value);
                EventPayload::ParamValue(ParamValueEvent {
                    param_id: event.param_id,
                    cookie: event.cookie as u64,
                    note_id: event.note_id,
                    port_index: event.port_index,
                    channel: event.channel,
                    key: event.key,
                    value: event.value,
                })
            }
            abi::CLAP_EVENT_PARAM_MOD => {
                let event = &*(header as *const _ as *const abi::clap_event_param_mod);
                EventPayload::ParamMod(ParamModEvent {
                    param_id: event.param_id,
                    cookie: event.cookie as u64,
                    note_id: event.note_id,
                    port_index: event.port_index,
                    channel: event.channel,
                    key: event.key,
                    amount: event.amount,
                })
            }
            abi::CLAP_EVENT_PARAM_GESTURE_BEGIN | abi::CLAP_EVENT_PARAM_GESTURE_END => {
                let event = &*(header as *const _ as *const abi::clap_event_param_gesture);
                EventPayload::ParamGesture(ParamGestureEvent {
                    kind: if header.type_ == abi::CLAP_EVENT_PARAM_GESTURE_BEGIN {
                        ParamGestureKind::Begin
                    } else {
                        ParamGestureKind::End
                    },
                    param_id: event.param_id,
                })
            }
            abi::CLAP_EVENT_TRANSPORT => {
                let event = &*(header as *const _ as *const abi::clap_event_transport);
                EventPayload::Transport(TransportEvent {
                    flags: event.flags,
                    song_pos_beats: event.song_pos_beats,
                    song_pos_seconds: event.song_pos_seconds,
                    tempo: event.tempo,
                    tempo_inc: event.tempo_inc,
                    loop_start_beats: event.loop_start_beats,
                    loop_end_beats: event.loop_end_beats,
                    loop_start_seconds: event.loop_start_seconds,
                    loop_end_seconds: event.loop_end_seconds,
                    bar_start: event.bar_start,
                    bar_number: event.bar_number,
                    tsig_num: event.tsig_num,
                    tsig_denom: event.tsig_denom,
                })
            }
            abi::CLAP_EVENT_MIDI => {
                let event = &*(header as *const _ as *const abi::clap_event_midi);
                EventPayload::Midi(MidiEvent {
                    port_index: event.port_index,
                    data: event.data,
                })
            }
            abi::CLAP_EVENT_MIDI_SYSEX => {
                let event = &*(header as *const _ as *const abi::clap_event_midi_sysex);
                let buffer = if event.buffer.is_null() {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(event.buffer, event.size as usize).to_vec()
                };
                EventPayload::MidiSysex(MidiSysexEvent {
                    port_index: event.port_index,
                    buffer,
                })
            }
            abi::CLAP_EVENT_MIDI2 => {
                let event = &*(header as *const _ as *const abi::clap_event_midi2);
                EventPayload::Midi2(Midi2Event {
                    port_index: event.port_index,
                    data: event.data,
                })
            }
            _ => {
                trace!(event_type = header.type_, "dropping unsupported event");
                return None;
            }
        };

        Some(Event {
            time: header.time,
            flags: header.flags,
            payload,
        })
    }

    /// Builds the native representation. The sysex pointer targets this
    /// event's owned buffer and stays valid until the event is mutated.
    pub(crate) fn to_native(&self) -> abi::clap_event_any {
        let header = |size: usize, type_: u16| abi::clap_event_header {
            size: size as u32,
            time: self.time,
            space_id: abi::CLAP_CORE_EVENT_SPACE_ID,
            type_,
            flags: self.flags,
        };

        match &self.payload {
            EventPayload::Note(event) => abi::clap_event_any {
                note: abi::clap_event_note {
                    header: header(
                        size_of::<abi::clap_event_note>(),
                        match event.kind {
                            NoteEventKind::On => abi::CLAP_EVENT_NOTE_ON,
                            NoteEventKind::Off => abi::CLAP_EVENT_NOTE_OFF,
                            NoteEventKind::Choke => abi::CLAP_EVENT_NOTE_CHOKE,
                            NoteEventKind::End => abi::CLAP_EVENT_NOTE_END,
                        },
                    ),
                    note_id: event.note_id,
                    port_index: event.port_index,
                    channel: event.channel,
                    key: event.key,
                    velocity: event.velocity,
                },
            },
            EventPayload::NoteExpression(event) => abi::clap_event_any {
                note_expression: abi::clap_event_note_expression {
                    header: header(
                        size_of::<abi::clap_event_note_expression>(),
                        abi::CLAP_EVENT_NOTE_EXPRESSION,
                    ),
                    expression_id: event.expression_id,
                    note_id: event.note_id,
                    port_index: event.port_index,
                    channel: event.channel,
                    key: event.key,
                    value: event.value,
                },
            },
            EventPayload::ParamValue(event) => abi::clap_event_any {
                param_value: abi::clap_event_param_value {
                    header: header(
                        size_of::<abi::clap_event_param_value>(),
                        abi::CLAP_EVENT_PARAM_VALUE,
                    ),
                    param_id: event.param_id,
                    cookie: event.cookie as *mut std::ffi::c_void,
                    note_id: event.note_id,
                    port_index: event.port_index,
                    channel: event.channel,
                    key: event.key,
                    value: event.value,
                },
            },
            EventPayload::ParamMod(event) => abi::clap_event_any {
                param_mod: abi::clap_event_param_mod {
                    header: header(
                        size_of::<abi::clap_event_param_mod>(),
                        abi::CLAP_EVENT_PARAM_MOD,
                    ),
                    param_id: event.param_id,
                    cookie: event.cookie as *mut std::ffi::c_void,
                    note_id: event.note_id,
                    port_index: event.port_index,
                    channel: event.channel,
                    key: event.key,
                    amount: event.amount,
                },
            },
            EventPayload::ParamGesture(event) => abi::clap_event_any {
                param_gesture: abi::clap_event_param_gesture {
                    header: header(
                        size_of::<abi::clap_event_param_gesture>(),
                        match event.kind {
                            ParamGestureKind::Begin => abi::CLAP_EVENT_PARAM_GESTURE_BEGIN,
                            ParamGestureKind::End => abi::CLAP_EVENT_PARAM_GESTURE_END,
                        },
                    ),
                    param_id: event.param_id,
                },
            },
            EventPayload::Transport(event) => abi::clap_event_any {
                transport: abi::clap_event_transport {
                    header: header(
                        size_of::<abi::clap_event_transport>(),
                        abi::CLAP_EVENT_TRANSPORT,
                    ),
                    flags: event.flags,
                    song_pos_beats: event.song_pos_beats,
                    song_pos_seconds: event.song_pos_seconds,
                    tempo: event.tempo,
                    tempo_inc: event.tempo_inc,
                    loop_start_beats: event.loop_start_beats,
                    loop_end_beats: event.loop_end_beats,
                    loop_start_seconds: event.loop_start_seconds,
                    loop_end_seconds: event.loop_end_seconds,
                    bar_start: event.bar_start,
                    bar_number: event.bar_number,
                    tsig_num: event.tsig_num,
                    tsig_denom: event.tsig_denom,
                },
            },
            EventPayload::Midi(event) => abi::clap_event_any {
                midi: abi::clap_event_midi {
                    header: header(size_of::<abi::clap_event_midi>(), abi::CLAP_EVENT_MIDI),
                    port_index: event.port_index,
                    data: event.data,
                },
            },
            EventPayload::MidiSysex(event) => abi::clap_event_any {
                midi_sysex: abi::clap_event_midi_sysex {
                    header: header(
                        size_of::<abi::clap_event_midi_sysex>(),
                        abi::CLAP_EVENT_MIDI_SYSEX,
                    ),
                    port_index: event.port_index,
                    buffer: event.buffer.as_ptr(),
                    size: event.buffer.len() as u32,
                },
            },
            EventPayload::Midi2(event) => abi::clap_event_any {
                midi2: abi::clap_event_midi2 {
                    header: header(size_of::<abi::clap_event_midi2>(), abi::CLAP_EVENT_MIDI2),
                    port_index: event.port_index,
                    data: event.data,
                },
            },
        }
    }
}

const PAYLOAD_VARIANTS: &[&str] = &[
    "Note",
    "NoteExpression",
    "ParamValue",
    "ParamMod",
    "ParamGesture",
    "Transport",
    "Midi",
    "MidiSysex",
    "Midi2",
];

crate::codec::impl_in_place_pod!(
    NoteEvent,
    NoteExpressionEvent,
    ParamValueEvent,
    ParamModEvent,
    ParamGestureEvent,
    TransportEvent,
    MidiEvent,
    Midi2Event,
);

impl DeserializeInPlace for MidiSysexEvent {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct SysexVisitor<'a>(&'a mut MidiSysexEvent);

        impl<'de> Visitor<'de> for SysexVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a sysex event")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                self.0.port_index = next_field(&mut seq, "port_index")?;
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

/// When the wire discriminant matches the variant the payload already
/// holds, the held payload is refilled in place. Switching variants is the
/// only point where a new payload is constructed.
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
                    (0, EventPayload::Note(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (0, place) => {
                        *place = EventPayload::Note(variant.newtype_variant()?);
                        Ok(())
                    }
                    (1, EventPayload::NoteExpression(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (1, place) => {
                        *place = EventPayload::NoteExpression(variant.newtype_variant()?);
                        Ok(())
                    }
                    (2, EventPayload::ParamValue(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (2, place) => {
                        *place = EventPayload::ParamValue(variant.newtype_variant()?);
                        Ok(())
                    }
                    (3, EventPayload::ParamMod(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (3, place) => {
                        *place = EventPayload::ParamMod(variant.newtype_variant()?);
                        Ok(())
                    }
                    (4, EventPayload::ParamGesture(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (4, place) => {
                        *place = EventPayload::ParamGesture(variant.newtype_variant()?);
                        Ok(())
                    }
                    (5, EventPayload::Transport(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (5, place) => {
                        *place = EventPayload::Transport(variant.newtype_variant()?);
                        Ok(())
                    }
                    (6, EventPayload::Midi(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (6, place) => {
                        *place = EventPayload::Midi(variant.newtype_variant()?);
                        Ok(())
                    }
                    (7, EventPayload::MidiSysex(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (7, place) => {
                        // Bound checks only run through the in-place path,
                        // so a variant switch decodes into a fresh value
                        let mut held = MidiSysexEvent::default();
                        variant.newtype_variant_seed(InPlaceSeed(&mut held))?;
                        *place = EventPayload::MidiSysex(held);
                        Ok(())
                    }
                    (8, EventPayload::Midi2(held)) => {
                        variant.newtype_variant_seed(InPlaceSeed(held))
                    }
                    (8, place) => {
                        *place = EventPayload::Midi2(variant.newtype_variant()?);
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
                self.0.time = next_field(&mut seq, "time")?;
                self.0.flags = next_field(&mut seq, "flags")?;
                crate::codec::next_field_in_place(&mut seq, &mut self.0.payload, "payload")
            }
        }

        deserializer.deserialize_tuple(3, EventVisitor(self))
    }
}

/// An owned event list that can stand in for both the input and output
/// event list interfaces. Native events are reconstructed lazily, one
/// scratch slot per event, the first time they are retrieved.
#[derive(Default)]
pub struct EventList {
    events: Vec<Event>,
    /// Lazily grown cache of reconstructed native events. Entries up to
    /// `reconstructed.len()` are valid; sysex entries point into the
    /// corresponding event's owned buffer.
    reconstructed: Vec<abi::clap_event_any>,
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
// buffers owned by this list's own events, so the list can move between
// threads as a unit.
unsafe impl Send for EventList {}

impl EventList {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Drops all events, retaining both the event and scratch capacity.
    pub fn clear(&mut self) {
        self.events.clear();
        self.reconstructed.clear();
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Refills the list from a host-provided input list. Unknown events are
    /// dropped.
    pub fn repopulate(&mut self, in_events: &mut dyn InputEvents) {
        self.clear();
        for index in 0..in_events.size() {
            if let Some(header) = in_events.get(index) {
                // SAFETY: InputEvents::get guarantees the header heads a
                // complete event struct
                if let Some(event) = unsafe { Event::parse(header) } {
                    self.events.push(event);
                }
            }
        }
    }

    /// Pushes every held event into an output sink. Rejections are logged
    /// and ignored.
    pub fn write_back_outputs(&self, out_events: &mut dyn OutputEvents) {
        for event in &self.events {
            let native = event.to_native();
            // SAFETY: the union always starts with a valid header
            let accepted = out_events.try_push(unsafe { &native.header });
            if !accepted {
                trace!("output event rejected by the host");
            }
        }
    }
}

impl InputEvents for EventList {
    fn size(&self) -> u32 {
        self.events.len() as u32
    }

    fn get(&mut self, index: u32) -> Option<&abi::clap_event_header> {
        let index = index as usize;
        if index >= self.events.len() {
            return None;
        }

        // Grow the cache up to the requested index. Events are usually
        // retrieved in order, so this does no extra work.
        while self.reconstructed.len() <= index {
            let native = self.events[self.reconstructed.len()].to_native();
            self.reconstructed.push(native);
        }

        // SAFETY: the union always starts with a valid header
        Some(unsafe { &self.reconstructed[index].header })
    }
}

impl OutputEvents for EventList {
    fn try_push(&mut self, event: &abi::clap_event_header) -> bool {
        // SAFETY: OutputEvents::try_push passes complete events
        if let Some(event) = unsafe { Event::parse(event) } {
            self.events.push(event);
        }
        // Unknown events are dropped but still reported as accepted
        true
    }
}

// Only the events cross the wire; the scratch cache is rebuilt on demand on
// whichever side retrieves the native events.
impl Serialize for EventList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_in_place, to_bytes};

    pub(crate) fn note_on(time: u32, key: i16, velocity: f64) -> Event {
        Event {
            time,
            flags: 0,
            payload: EventPayload::Note(NoteEvent {
                kind: NoteEventKind::On,
                note_id: -1,
                port_index: 0,
                channel: 0,
                key,
                velocity,
            }),
        }
    }

    pub(crate) fn sysex(time: u32, buffer: Vec<u8>) -> Event {
        Event {
            time,
            flags: 0,
            payload: EventPayload::MidiSysex(MidiSysexEvent {
                port_index: 0,
                buffer,
            }),
        }
    }

    struct RawEventList(Vec<abi::clap_event_any>);

    impl InputEvents for RawEventList {
        fn size(&self) -> u32 {
            self.0.len() as u32
        }

        fn get(&mut self, index: u32) -> Option<&abi::clap_event_header> {
            self.0
                .get(index as usize)
                .map(|event| unsafe { &event.header })
        }
    }

    fn raw_note_on(time: u32, key: i16) -> abi::clap_event_any {
        abi::clap_event_any {
            note: abi::clap_event_note {
                header: abi::clap_event_header {
                    size: std::mem::size_of::<abi::clap_event_note>() as u32,
                    time,
                    space_id: abi::CLAP_CORE_EVENT_SPACE_ID,
                    type_: abi::CLAP_EVENT_NOTE_ON,
                    flags: 0,
                },
                note_id: -1,
                port_index: 0,
                channel: 0,
                key,
                velocity: 0.8,
            },
        }
    }

    #[test]
    fn test_event_wire_roundtrip_per_variant() {
        let events = vec![
            note_on(0, 64, 0.5),
            Event {
                time: 1,
                flags: 0,
                payload: EventPayload::NoteExpression(NoteExpressionEvent {
                    expression_id: 2,
                    note_id: 5,
                    port_index: 0,
                    channel: 1,
                    key: 60,
                    value: 0.25,
                }),
            },
            Event {
                time: 2,
                flags: 0,
                payload: EventPayload::ParamValue(ParamValueEvent {
                    param_id: 42,
                    cookie: 0xdead_beef,
                    note_id: -1,
                    port_index: -1,
                    channel: -1,
                    key: -1,
                    value: 0.75,
                }),
            },
            Event {
                time: 3,
                flags: 0,
                payload: EventPayload::ParamGesture(ParamGestureEvent {
                    kind: ParamGestureKind::End,
                    param_id: 42,
                }),
            },
            Event {
                time: 4,
                flags: 0,
                payload: EventPayload::Transport(TransportEvent {
                    tempo: 123.5,
                    tsig_num: 7,
                    tsig_denom: 8,
                    ..TransportEvent::default()
                }),
            },
            Event {
                time: 5,
                flags: 0,
                payload: EventPayload::Midi(MidiEvent {
                    port_index: 0,
                    data: [0x90, 64, 100],
                }),
            },
            sysex(6, vec![0xf0, 1, 2, 3, 0xf7]),
            Event {
                time: 7,
                flags: 0,
                payload: EventPayload::Midi2(Midi2Event {
                    port_index: 1,
                    data: [1, 2, 3, 4],
                }),
            },
        ];

        for event in &events {
            let bytes = to_bytes(event).unwrap();
            let mut decoded = Event::default();
            read_in_place(&bytes, &mut decoded).unwrap();
            assert_eq!(&decoded, event);
        }
    }

    #[test]
    fn test_in_place_decode_reuses_sysex_buffer() {
        let event = sysex(0, vec![0xf0, 1, 2, 3, 0xf7]);
        let bytes = to_bytes(&event).unwrap();

        // Same variant already held, with enough capacity
        let mut place = sysex(99, Vec::with_capacity(64));
        let held_ptr = match &place.payload {
            EventPayload::MidiSysex(held) => held.buffer.as_ptr(),
            _ => unreachable!(),
        };

        read_in_place(&bytes, &mut place).unwrap();
        assert_eq!(place, event);
        match &place.payload {
            EventPayload::MidiSysex(held) => assert_eq!(held.buffer.as_ptr(), held_ptr),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_in_place_decode_switches_variant() {
        let event = note_on(0, 64, 0.5);
        let bytes = to_bytes(&event).unwrap();

        let mut place = sysex(1, vec![1, 2, 3]);
        read_in_place(&bytes, &mut place).unwrap();
        assert_eq!(place, event);
    }

    #[test]
    fn test_repopulate_drops_unknown_events() {
        let mut host_list = RawEventList(vec![
            raw_note_on(0, 60),
            // An event type this bridge does not know
            abi::clap_event_any {
                header: abi::clap_event_header {
                    size: std::mem::size_of::<abi::clap_event_header>() as u32,
                    time: 1,
                    space_id: abi::CLAP_CORE_EVENT_SPACE_ID,
                    type_: 0x7fff,
                    flags: 0,
                },
            },
            // An event from a foreign event space
            abi::clap_event_any {
                header: abi::clap_event_header {
                    size: std::mem::size_of::<abi::clap_event_header>() as u32,
                    time: 2,
                    space_id: 0x1234,
                    type_: abi::CLAP_EVENT_MIDI,
                    flags: 0,
                },
            },
            raw_note_on(3, 72),
        ]);

        let mut list = EventList::default();
        list.repopulate(&mut host_list);

        assert_eq!(list.len(), 2);
        assert_eq!(list.events()[0].time, 0);
        assert_eq!(list.events()[1].time, 3);
    }

    #[test]
    fn test_lazy_reconstruction_and_sysex_pointer() {
        let payload = vec![0xf0u8, 0x7e, 0x7f, 0x09, 0xf7];
        let mut list = EventList::default();
        list.push(note_on(0, 60, 1.0));
        list.push(sysex(5, payload.clone()));

        let header = list.get(1).unwrap();
        assert_eq!(header.type_, abi::CLAP_EVENT_MIDI_SYSEX);
        let native =
            unsafe { &*(header as *const _ as *const abi::clap_event_midi_sysex) };
        assert_eq!(native.size as usize, payload.len());
        let contents =
            unsafe { std::slice::from_raw_parts(native.buffer, native.size as usize) };
        assert_eq!(contents, payload.as_slice());

        assert!(list.get(2).is_none());
    }

    #[test]
    fn test_output_sink_accepts_everything() {
        let mut sink = EventList::default();

        let known = raw_note_on(0, 60);
        assert!(sink.try_push(unsafe { &known.header }));

        let unknown = abi::clap_event_any {
            header: abi::clap_event_header {
                size: std::mem::size_of::<abi::clap_event_header>() as u32,
                time: 0,
                space_id: abi::CLAP_CORE_EVENT_SPACE_ID,
                type_: 0x7fff,
                flags: 0,
            },
        };
        assert!(sink.try_push(unsafe { &unknown.header }));

        // The unknown event was silently dropped
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_event_list_wire_roundtrip_keeps_slots() {
        let mut list = EventList::default();
        list.push(note_on(0, 60, 1.0));
        list.push(sysex(1, vec![0xf0, 0xf7]));
        let bytes = to_bytes(&list).unwrap();

        let mut decoded = EventList::default();
        decoded.push(sysex(9, vec![9; 32]));
        decoded.push(note_on(9, 9, 9.0));
        decoded.push(note_on(10, 10, 10.0));

        read_in_place(&bytes, &mut decoded).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_oversized_sysex_rejected_on_variant_switch() {
        let bytes = to_bytes(&sysex(0, vec![0u8; MAX_SYSEX_SIZE + 1])).unwrap();

        // The bound holds even when the target is on a different variant
        let mut place = Event::default();
        assert!(read_in_place(&bytes, &mut place).is_err());
        let mut place = sysex(9, vec![9; 8]);
        assert!(read_in_place(&bytes, &mut place).is_err());
    }

    #[test]
    fn test_oversized_event_list_rejected() {
        // A length prefix over the list bound must fail to decode
        let mut bytes = to_bytes(&EventList::default()).unwrap();
        bytes[..8].copy_from_slice(&((MAX_EVENTS + 1) as u64).to_le_bytes());

        let mut decoded = EventList::default();
        assert!(read_in_place(&bytes, &mut decoded).is_err());
    }
}
