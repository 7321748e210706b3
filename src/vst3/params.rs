//! Parameter change queues.
//!
//! `ParameterChanges` keeps its queues in a pool with a live-count
//! watermark so a plugin calling `addParameterData` on every cycle never
//! reallocates the point vectors.

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserializer, Serialize};

use super::abi;
use crate::codec::{next_field, DeserializeInPlace, InPlaceSeed, VecInPlace};
use crate::error::InvalidArgument;

/// Maximum number of parameter queues in a single cycle.
pub const MAX_PARAMETERS: usize = 1 << 16;
/// Maximum number of automation points per queue.
pub const MAX_POINTS: usize = 1 << 16;

crate::codec::impl_in_place_pod!((i32, f64));

/// Automation points for one parameter, `(sample_offset, value)` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ParamValueQueue {
    pub parameter_id: u32,
    pub points: Vec<(i32, f64)>,
}

impl ParamValueQueue {
    /// Resets the queue for a new parameter, keeping the point allocation.
    pub fn clear_for_parameter(&mut self, parameter_id: u32) {
        self.parameter_id = parameter_id;
        self.points.clear();
    }

    pub fn repopulate(&mut self, queue: &dyn abi::IParamValueQueue) {
        self.parameter_id = queue.get_parameter_id();
        self.points.clear();
        for index in 0..queue.get_point_count() {
            if let Ok(point) = queue.get_point(index) {
                self.points.push(point);
            }
        }
    }

    pub fn write_back_outputs(&self, queue: &mut dyn abi::IParamValueQueue) {
        for (sample_offset, value) in &self.points {
            if queue.add_point(*sample_offset, *value).is_err() {
                break;
            }
        }
    }
}

impl abi::IParamValueQueue for ParamValueQueue {
    fn get_parameter_id(&self) -> u32 {
        self.parameter_id
    }

    fn get_point_count(&self) -> i32 {
        self.points.len() as i32
    }

    fn get_point(&self, index: i32) -> Result<(i32, f64), InvalidArgument> {
        if index < 0 || index as usize >= self.points.len() {
            return Err(InvalidArgument);
        }

        Ok(self.points[index as usize])
    }

    fn add_point(&mut self, sample_offset: i32, value: f64) -> Result<i32, InvalidArgument> {
        self.points.push((sample_offset, value));
        Ok(self.points.len() as i32 - 1)
    }
}

impl DeserializeInPlace for ParamValueQueue {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct QueueVisitor<'a>(&'a mut ParamValueQueue);

        impl<'de> Visitor<'de> for QueueVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a parameter value queue")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                self.0.parameter_id = next_field(&mut seq, "parameter_id")?;
                seq.next_element_seed(VecInPlace {
                    vec: &mut self.0.points,
                    max: MAX_POINTS,
                })?
                .ok_or_else(|| de::Error::custom("missing field `points`"))
            }
        }

        deserializer.deserialize_tuple(2, QueueVisitor(self))
    }
}

/// All parameter changes for one cycle. Only the first `used` queues are
/// live; the rest of the pool holds stale queues kept for their
/// allocations.
#[derive(Debug, Default)]
pub struct ParameterChanges {
    queues: Vec<ParamValueQueue>,
    used: usize,
}

impl PartialEq for ParameterChanges {
    fn eq(&self, other: &Self) -> bool {
        self.queues[..self.used] == other.queues[..other.used]
    }
}

impl ParameterChanges {
    pub fn num_parameters(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn queues(&self) -> &[ParamValueQueue] {
        &self.queues[..self.used]
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }

    /// Claims the next pooled queue, growing the pool if needed.
    fn next_slot(&mut self) -> &mut ParamValueQueue {
        if self.used == self.queues.len() {
            self.queues.push(ParamValueQueue::default());
        }
        self.used += 1;
        &mut self.queues[self.used - 1]
    }

    /// Refills from a host-provided `IParameterChanges`.
    pub fn repopulate(&mut self, changes: &mut dyn abi::IParameterChanges) {
        self.used = 0;
        for index in 0..changes.get_parameter_count() {
            if let Some(queue) = changes.get_parameter_data(index) {
                self.next_slot().repopulate(queue);
            }
        }
    }

    /// Adds every live queue to the host's output parameter changes.
    pub fn write_back_outputs(&self, output_changes: &mut dyn abi::IParameterChanges) {
        for queue in &self.queues[..self.used] {
            let (_, output_queue) = output_changes.add_parameter_data(queue.parameter_id);
            queue.write_back_outputs(output_queue);
        }
    }
}

impl abi::IParameterChanges for ParameterChanges {
    fn get_parameter_count(&self) -> i32 {
        self.used as i32
    }

    fn get_parameter_data(&mut self, index: i32) -> Option<&mut dyn abi::IParamValueQueue> {
        if index < 0 || index as usize >= self.used {
            return None;
        }

        Some(&mut self.queues[index as usize])
    }

    fn add_parameter_data(&mut self, parameter_id: u32) -> (i32, &mut dyn abi::IParamValueQueue) {
        let index = self.used as i32;
        let slot = self.next_slot();
        slot.clear_for_parameter(parameter_id);
        (index, slot)
    }
}

impl Serialize for ParameterChanges {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.queues[..self.used])
    }
}

impl DeserializeInPlace for ParameterChanges {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> Result<(), D::Error> {
        struct ChangesVisitor<'a>(&'a mut ParameterChanges);

        impl<'de> Visitor<'de> for ChangesVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a sequence of parameter value queues")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
                if let Some(hint) = seq.size_hint() {
                    if hint > MAX_PARAMETERS {
                        return Err(de::Error::invalid_length(hint, &"too many queues"));
                    }
                }

                // Fill pooled slots in place, growing the pool as needed.
                // Stale queues past the watermark are kept, not truncated.
                let mut consumed = 0;
                loop {
                    if consumed >= MAX_PARAMETERS {
                        return Err(de::Error::invalid_length(consumed, &"too many queues"));
                    }
                    if consumed < self.0.queues.len() {
                        match seq.next_element_seed(InPlaceSeed(&mut self.0.queues[consumed]))? {
                            Some(()) => consumed += 1,
                            None => break,
                        }
                    } else {
                        let mut queue = ParamValueQueue::default();
                        match seq.next_element_seed(InPlaceSeed(&mut queue))? {
                            Some(()) => {
                                self.0.queues.push(queue);
                                consumed += 1;
                            }
                            None => break,
                        }
                    }
                }
                self.0.used = consumed;

                Ok(())
            }
        }

        deserializer.deserialize_seq(ChangesVisitor(self))
    }
}
