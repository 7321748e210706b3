//! Wire codec helpers for the bridge protocol.
//!
//! Everything that crosses the process boundary is encoded with bincode's
//! fixed-width little-endian representation. Serialization always goes
//! through the regular `serde::Serialize` derives. Deserialization on the
//! audio path goes through [`DeserializeInPlace`] instead of
//! `serde::Deserialize`: the decoded value is written into an existing
//! object so that owned buffers (event payloads, sysex dumps, label text)
//! keep their allocations across processing cycles. A fresh allocation only
//! happens when a container has to grow beyond its previous peak size or
//! when a tagged union switches to a different variant, both of which are
//! rare once audio processing has reached a steady state.

use std::fmt;

use bincode::Options;
use serde::de::{self, DeserializeSeed, Deserializer, SeqAccess, Visitor};
use serde::Serialize;

use crate::error::Result;

fn wire_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// Serialize `value` into a freshly allocated buffer.
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(wire_options().serialize(value)?)
}

/// Serialize `value` into `buffer`, reusing its capacity. This is the
/// serialization counterpart of [`read_in_place`]: a bridge keeps one
/// scratch buffer per direction and refills it every cycle.
pub fn write_to_vec<T: Serialize + ?Sized>(buffer: &mut Vec<u8>, value: &T) -> Result<()> {
    buffer.clear();
    wire_options().serialize_into(&mut *buffer, value)?;
    Ok(())
}

/// Deserialize a value from scratch. Only used for cold-path messages
/// (configuration, negotiation); the audio path uses [`read_in_place`].
pub fn from_bytes<'de, T: serde::Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    Ok(wire_options().deserialize(bytes)?)
}

/// Deserialize into an existing value, reusing its owned storage.
pub fn read_in_place<T: DeserializeInPlace>(bytes: &[u8], place: &mut T) -> Result<()> {
    let mut deserializer = bincode::Deserializer::from_slice(bytes, wire_options());
    place.deserialize_in_place(&mut deserializer)?;
    Ok(())
}

/// In-place counterpart of `serde::Deserialize`. Implementations must
/// consume exactly the bytes produced by the type's `Serialize` impl.
pub trait DeserializeInPlace {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error>;
}

/// Adapts a `&mut T` into a [`DeserializeSeed`] so in-place deserialization
/// composes through nested sequences and enum variants.
pub struct InPlaceSeed<'a, T>(pub &'a mut T);

impl<'de, T: DeserializeInPlace> DeserializeSeed<'de> for InPlaceSeed<'_, T> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        self.0.deserialize_in_place(deserializer)
    }
}

/// Implements [`DeserializeInPlace`] for plain-old-data types by bulk
/// overwrite. Only valid for types whose decode cannot allocate.
macro_rules! impl_in_place_pod {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::codec::DeserializeInPlace for $ty {
            fn deserialize_in_place<'de, D: serde::Deserializer<'de>>(
                &mut self,
                deserializer: D,
            ) -> ::std::result::Result<(), D::Error> {
                *self = <$ty as serde::Deserialize>::deserialize(deserializer)?;
                Ok(())
            }
        }
    )+};
}
pub(crate) use impl_in_place_pod;

/// An option that already holds a value is refilled in place; a fresh value
/// is only constructed on an absent-to-present transition.
impl<T: DeserializeInPlace + Default> DeserializeInPlace for Option<T> {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        struct OptionVisitor<'a, T>(&'a mut Option<T>);

        impl<'de, T: DeserializeInPlace + Default> Visitor<'de> for OptionVisitor<'_, T> {
            type Value = ();

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an optional value")
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<(), E> {
                *self.0 = None;
                Ok(())
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> std::result::Result<(), D::Error> {
                match self.0 {
                    Some(value) => value.deserialize_in_place(deserializer),
                    None => {
                        let mut value = T::default();
                        value.deserialize_in_place(deserializer)?;
                        *self.0 = Some(value);
                        Ok(())
                    }
                }
            }
        }

        deserializer.deserialize_option(OptionVisitor(self))
    }
}

/// Refills a `Vec<u8>` field, enforcing the field's documented maximum
/// length at decode time. Oversized input is a decode error, never a silent
/// truncation, so both sides of the channel stay in sync.
pub struct BytesInPlace<'a> {
    pub buf: &'a mut Vec<u8>,
    pub max: usize,
}

impl<'de> DeserializeSeed<'de> for BytesInPlace<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        struct BytesVisitor<'a> {
            buf: &'a mut Vec<u8>,
            max: usize,
        }

        impl<'de> Visitor<'de> for BytesVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a byte buffer of at most {} bytes", self.max)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<(), E> {
                if v.len() > self.max {
                    return Err(E::invalid_length(v.len(), &self));
                }
                self.buf.clear();
                self.buf.extend_from_slice(v);
                Ok(())
            }
        }

        deserializer.deserialize_bytes(BytesVisitor {
            buf: self.buf,
            max: self.max,
        })
    }
}

/// Same as [`BytesInPlace`] for UTF-8 string fields.
pub struct StringInPlace<'a> {
    pub buf: &'a mut String,
    pub max: usize,
}

impl<'de> DeserializeSeed<'de> for StringInPlace<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        struct StringVisitor<'a> {
            buf: &'a mut String,
            max: usize,
        }

        impl<'de> Visitor<'de> for StringVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a string of at most {} bytes", self.max)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<(), E> {
                if v.len() > self.max {
                    return Err(E::invalid_length(v.len(), &self));
                }
                self.buf.clear();
                self.buf.push_str(v);
                Ok(())
            }
        }

        deserializer.deserialize_str(StringVisitor {
            buf: self.buf,
            max: self.max,
        })
    }
}

/// Same as [`BytesInPlace`] for UTF-16 text fields (VST3 passes label and
/// chord text as 16-bit characters).
pub struct WideStringInPlace<'a> {
    pub buf: &'a mut Vec<u16>,
    pub max: usize,
}

impl<'de> DeserializeSeed<'de> for WideStringInPlace<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        struct WideVisitor<'a> {
            buf: &'a mut Vec<u16>,
            max: usize,
        }

        impl<'de> Visitor<'de> for WideVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a UTF-16 string of at most {} code units", self.max)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
                if let Some(len) = seq.size_hint() {
                    if len > self.max {
                        return Err(de::Error::invalid_length(len, &self));
                    }
                }
                self.buf.clear();
                while let Some(unit) = seq.next_element::<u16>()? {
                    if self.buf.len() == self.max {
                        return Err(de::Error::invalid_length(self.buf.len() + 1, &self));
                    }
                    self.buf.push(unit);
                }
                Ok(())
            }
        }

        deserializer.deserialize_seq(WideVisitor {
            buf: self.buf,
            max: self.max,
        })
    }
}

/// Refills a vector of in-place-deserializable elements, reusing existing
/// slots. Slots past the decoded length are truncated (capacity retained),
/// missing slots are default-constructed and filled.
pub fn deserialize_vec_in_place<'de, D, T>(
    vec: &mut Vec<T>,
    max: usize,
    deserializer: D,
) -> std::result::Result<(), D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeInPlace + Default,
{
    struct VecVisitor<'a, T> {
        vec: &'a mut Vec<T>,
        max: usize,
    }

    impl<'de, T: DeserializeInPlace + Default> Visitor<'de> for VecVisitor<'_, T> {
        type Value = ();

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a sequence of at most {} elements", self.max)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
            if let Some(len) = seq.size_hint() {
                if len > self.max {
                    return Err(de::Error::invalid_length(len, &self));
                }
            }

            let mut count = 0usize;
            loop {
                if count < self.vec.len() {
                    match seq.next_element_seed(InPlaceSeed(&mut self.vec[count]))? {
                        Some(()) => count += 1,
                        None => break,
                    }
                } else {
                    if count == self.max {
                        return Err(de::Error::invalid_length(count + 1, &self));
                    }
                    let mut value = T::default();
                    match seq.next_element_seed(InPlaceSeed(&mut value))? {
                        Some(()) => {
                            self.vec.push(value);
                            count += 1;
                        }
                        None => break,
                    }
                }
            }

            self.vec.truncate(count);
            Ok(())
        }
    }

    deserializer.deserialize_seq(VecVisitor { vec, max })
}

/// Seed form of [`deserialize_vec_in_place`], for vector fields inside
/// manually deserialized structs.
pub struct VecInPlace<'a, T> {
    pub vec: &'a mut Vec<T>,
    pub max: usize,
}

impl<'de, T: DeserializeInPlace + Default> DeserializeSeed<'de> for VecInPlace<'_, T> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        deserialize_vec_in_place(self.vec, self.max, deserializer)
    }
}

/// Reads the next element of a manually deserialized struct, turning a
/// premature end of input into a decode error.
pub(crate) fn next_field<'de, A, T>(
    seq: &mut A,
    field: &'static str,
) -> std::result::Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: serde::Deserialize<'de>,
{
    seq.next_element::<T>()?
        .ok_or_else(|| de::Error::custom(format_args!("missing field `{field}`")))
}

/// In-place variant of [`next_field`].
pub(crate) fn next_field_in_place<'de, A, T>(
    seq: &mut A,
    place: &mut T,
    field: &'static str,
) -> std::result::Result<(), A::Error>
where
    A: SeqAccess<'de>,
    T: DeserializeInPlace,
{
    seq.next_element_seed(InPlaceSeed(place))?
        .ok_or_else(|| de::Error::custom(format_args!("missing field `{field}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn reader(bytes: &[u8]) -> bincode::Deserializer<bincode::de::read::SliceReader<'_>, impl Options + Copy> {
        bincode::Deserializer::from_slice(bytes, wire_options())
    }

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Sample {
        offset: i32,
        value: f64,
    }

    #[test]
    fn test_roundtrip_to_bytes() {
        let sample = Sample {
            offset: 96,
            value: 0.25,
        };
        let bytes = to_bytes(&sample).unwrap();
        let decoded: Sample = from_bytes(&bytes).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn test_write_to_vec_reuses_buffer() {
        let mut buffer = Vec::with_capacity(256);
        write_to_vec(&mut buffer, &vec![1u32, 2, 3]).unwrap();
        let ptr = buffer.as_ptr();
        write_to_vec(&mut buffer, &vec![4u32, 5]).unwrap();
        assert_eq!(buffer.as_ptr(), ptr);
    }

    #[test]
    fn test_bytes_in_place_keeps_allocation() {
        let bytes = to_bytes(&vec![1u8, 2, 3]).unwrap();

        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[9u8; 10]);
        let ptr = buf.as_ptr();

        let mut de = reader(&bytes);
        BytesInPlace {
            buf: &mut buf,
            max: 1 << 16,
        }
        .deserialize(&mut de)
        .unwrap();

        assert_eq!(buf, vec![1, 2, 3]);
        assert_eq!(buf.as_ptr(), ptr);
    }

    #[test]
    fn test_bytes_in_place_rejects_oversized() {
        let bytes = to_bytes(&vec![0u8; 32]).unwrap();
        let mut buf = Vec::new();
        let mut de = reader(&bytes);
        let result = BytesInPlace {
            buf: &mut buf,
            max: 16,
        }
        .deserialize(&mut de);
        assert!(result.is_err());
    }

    #[test]
    fn test_string_in_place() {
        let bytes = to_bytes("sysex label").unwrap();
        let mut buf = String::with_capacity(64);
        buf.push_str("previous contents");
        let ptr = buf.as_ptr();

        let mut de = reader(&bytes);
        StringInPlace {
            buf: &mut buf,
            max: 64,
        }
        .deserialize(&mut de)
        .unwrap();

        assert_eq!(buf, "sysex label");
        assert_eq!(buf.as_ptr(), ptr);
    }

    #[test]
    fn test_wide_string_in_place() {
        let text: Vec<u16> = "Cmaj7".encode_utf16().collect();
        let bytes = to_bytes(&text).unwrap();

        let mut buf = Vec::with_capacity(32);
        let mut de = reader(&bytes);
        WideStringInPlace {
            buf: &mut buf,
            max: 32,
        }
        .deserialize(&mut de)
        .unwrap();
        assert_eq!(buf, text);
    }

    #[test]
    fn test_option_in_place_reuses_held_value() {
        impl_in_place_pod!(Sample);

        let mut place: Option<Sample> = Some(Sample {
            offset: 0,
            value: 0.0,
        });
        let bytes = to_bytes(&Some(Sample {
            offset: 7,
            value: 1.5,
        }))
        .unwrap();

        let mut de = reader(&bytes);
        place.deserialize_in_place(&mut de).unwrap();
        assert_eq!(
            place,
            Some(Sample {
                offset: 7,
                value: 1.5
            })
        );

        let bytes = to_bytes(&None::<Sample>).unwrap();
        let mut de = reader(&bytes);
        place.deserialize_in_place(&mut de).unwrap();
        assert_eq!(place, None);
    }

    #[test]
    fn test_vec_in_place_truncates_and_reuses() {
        struct Wrapper(Vec<Vec<u8>>);
        impl DeserializeInPlace for Vec<u8> {
            fn deserialize_in_place<'de, D: Deserializer<'de>>(
                &mut self,
                deserializer: D,
            ) -> std::result::Result<(), D::Error> {
                BytesInPlace {
                    buf: self,
                    max: 1 << 16,
                }
                .deserialize(deserializer)
            }
        }
        impl DeserializeInPlace for Wrapper {
            fn deserialize_in_place<'de, D: Deserializer<'de>>(
                &mut self,
                deserializer: D,
            ) -> std::result::Result<(), D::Error> {
                deserialize_vec_in_place(&mut self.0, 8, deserializer)
            }
        }

        let mut wrapper = Wrapper(vec![vec![0u8; 32], vec![0u8; 32], vec![0u8; 32]]);
        let inner_ptr = wrapper.0[0].as_ptr();

        let bytes = to_bytes(&vec![vec![1u8, 2], vec![3u8]]).unwrap();
        read_in_place(&bytes, &mut wrapper).unwrap();

        assert_eq!(wrapper.0, vec![vec![1, 2], vec![3]]);
        // First slot was refilled in place, not reallocated.
        assert_eq!(wrapper.0[0].as_ptr(), inner_ptr);
    }
}
