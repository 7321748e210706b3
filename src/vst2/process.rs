//! The per-cycle VST2 process envelope.
//!
//! VST2 has a single audio port per direction and passes events through a
//! separate host call just before processing, so the request is flat: the
//! frame count, the precision of the invoked process function, prefetched
//! transport state, and the most recent event list. Audio samples travel
//! through the shared region; the plugin side writes its outputs straight
//! back into it, so the response carries no audio payload.

use serde::de::{SeqAccess, Visitor};
use serde::{Deserializer, Serialize};

use super::abi;
use super::events::EventList;
use crate::codec::{next_field, next_field_in_place, DeserializeInPlace};
use crate::error::Result;
use crate::shm::{AudioShmBuffer, Sample};

crate::codec::impl_in_place_pod!(abi::VstTimeInfo);

/// Serializable snapshot of one `processReplacing()` (or
/// `processDoubleReplacing()`) call. A bridge keeps one of these per
/// plugin instance and refills it every cycle.
#[derive(Debug, Default, Serialize)]
pub struct ProcessRequest {
    pub sample_frames: i32,
    /// Whether the double precision process function was invoked. This
    /// dialect's precision signal; it applies to both directions.
    pub double_precision: bool,
    /// Transport state prefetched from `audioMasterGetTime`, when the
    /// host answered it.
    pub time_info: Option<abi::VstTimeInfo>,
    /// Prefetched `audioMasterGetCurrentProcessLevel` answer.
    pub process_level: i32,
    /// The events from the last `effProcessEvents` call preceding this
    /// cycle. Refilled through [`EventList::repopulate`].
    pub events: EventList,
}

impl ProcessRequest {
    /// Copies the input audio into `shared_audio_buffers` and records the
    /// per-cycle scalars. The channel count is clamped to what the shared
    /// region's single input port can hold. Events are managed separately
    /// through the `events` field, mirroring the host's call order.
    pub fn repopulate<S: Sample>(
        &mut self,
        inputs: &[&[S]],
        sample_frames: i32,
        time_info: Option<&abi::VstTimeInfo>,
        process_level: i32,
        shared_audio_buffers: &AudioShmBuffer,
    ) -> Result<()> {
        self.sample_frames = sample_frames;
        self.double_precision = std::mem::size_of::<S>() == std::mem::size_of::<f64>();
        self.time_info = time_info.copied();
        self.process_level = process_level;

        let frames = sample_frames as usize;
        let channels = inputs
            .len()
            .min(shared_audio_buffers.num_input_channels(0));
        for (channel, samples) in inputs.iter().take(channels).enumerate() {
            shared_audio_buffers.write_input_channel(0, channel, &samples[..frames])?;
        }

        Ok(())
    }

    /// Writes the plugin's output audio from the shared region back into
    /// the host's buffers. Extra host channels beyond the region's layout
    /// are left untouched.
    pub fn write_back_outputs<S: Sample>(
        &self,
        outputs: &mut [&mut [S]],
        shared_audio_buffers: &AudioShmBuffer,
    ) -> Result<()> {
        let frames = self.sample_frames as usize;
        let channels = outputs
            .len()
            .min(shared_audio_buffers.num_output_channels(0));
        for (channel, samples) in outputs.iter_mut().take(channels).enumerate() {
            shared_audio_buffers.read_output_channel_into(0, channel, &mut samples[..frames])?;
        }

        Ok(())
    }
}

impl DeserializeInPlace for ProcessRequest {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        struct RequestVisitor<'a>(&'a mut ProcessRequest);

        impl<'de> Visitor<'de> for RequestVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a process request")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
                self.0.sample_frames = next_field(&mut seq, "sample_frames")?;
                self.0.double_precision = next_field(&mut seq, "double_precision")?;
                next_field_in_place(&mut seq, &mut self.0.time_info, "time_info")?;
                self.0.process_level = next_field(&mut seq, "process_level")?;
                next_field_in_place(&mut seq, &mut self.0.events, "events")
            }
        }

        deserializer.deserialize_tuple(5, RequestVisitor(self))
    }
}
