//! Wire traits and the built-in type mappings.
//!
//! Generated code describes each struct with [`WireStruct`] and each union
//! with [`WireUnion`]; [`impl_struct_field!`](crate::impl_struct_field) and
//! [`impl_union_field!`](crate::impl_union_field) then make them usable as
//! fields, array elements and map values.

use std::collections::HashMap;
use std::hash::Hash;

use super::decoder::{Decoder, StructDecoder};
use super::encoder::{Encoder, StructEncoder, INVALID_HANDLE_INDEX};
use crate::error::ValidationError;
use crate::system::{
    DataPipeConsumerHandle, DataPipeProducerHandle, Handle, MessagePipeHandle, SharedBufferHandle,
};

type Result<T> = std::result::Result<T, ValidationError>;

/// Position of a value inside the buffer. `bit` is only used by packed
/// booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: usize,
    pub bit: u8,
}

impl Slot {
    pub fn at(offset: usize) -> Self {
        Self { offset, bit: 0 }
    }
}

/// A type with a fixed-size inline representation.
///
/// Pointer types put their body out of line during `encode` and claim it
/// during `decode`, which is why both take the whole coder.
pub trait WireType: Sized {
    /// Width of the inline slot in bits.
    const SLOT_BITS: usize;

    fn encode(self, encoder: &mut Encoder, slot: Slot);

    fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self>;
}

/// A [`WireType`] with a null encoding, usable as `Option<T>`.
pub trait Nullable: WireType {
    fn encode_null(encoder: &mut Encoder, slot: Slot);

    fn is_null(decoder: &Decoder, slot: Slot) -> Result<bool>;
}

impl<T: Nullable> WireType for Option<T> {
    const SLOT_BITS: usize = T::SLOT_BITS;

    fn encode(self, encoder: &mut Encoder, slot: Slot) {
        match self {
            Some(value) => value.encode(encoder, slot),
            None => T::encode_null(encoder, slot),
        }
    }

    fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
        if T::is_null(decoder, slot)? {
            Ok(None)
        } else {
            T::decode(decoder, slot).map(Some)
        }
    }
}

/// A versioned struct layout.
pub trait WireStruct: Sized {
    /// Known `(version, num_bytes)` pairs, oldest first. Encoding always
    /// uses the last entry.
    const VERSIONS: &'static [(u32, u32)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>);

    fn decode_fields(fields: &mut StructDecoder<'_>) -> Result<Self>;
}

/// A tagged union. Members are written into an 8-byte slot.
pub trait WireUnion: Sized {
    fn tag(&self) -> u32;

    fn encode_member(self, encoder: &mut Encoder, slot: Slot);

    /// Fails with `UnknownUnionTag` for a tag this side does not know.
    fn decode_member(decoder: &mut Decoder, tag: u32, slot: Slot) -> Result<Self>;
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {$(
        impl WireType for $ty {
            const SLOT_BITS: usize = std::mem::size_of::<$ty>() * 8;

            fn encode(self, encoder: &mut Encoder, slot: Slot) {
                encoder.write_bytes(slot.offset, &self.to_le_bytes());
            }

            fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
                decoder.read_array(slot.offset).map(<$ty>::from_le_bytes)
            }
        }
    )*};
}

impl_primitive!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl WireType for bool {
    const SLOT_BITS: usize = 1;

    fn encode(self, encoder: &mut Encoder, slot: Slot) {
        encoder.set_bit(slot.offset, slot.bit, self);
    }

    fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
        decoder.read_bit(slot.offset, slot.bit)
    }
}

// ===== handles =====

impl WireType for Handle {
    const SLOT_BITS: usize = 32;

    fn encode(self, encoder: &mut Encoder, slot: Slot) {
        let index = if self.is_valid() {
            encoder.add_handle(self)
        } else {
            INVALID_HANDLE_INDEX
        };
        encoder.write_u32(slot.offset, index);
    }

    fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
        let index = decoder.read_u32(slot.offset)?;
        if index == INVALID_HANDLE_INDEX {
            return Err(ValidationError::UnexpectedInvalidHandle);
        }
        decoder.claim_handle(index)
    }
}

impl Nullable for Handle {
    fn encode_null(encoder: &mut Encoder, slot: Slot) {
        encoder.write_u32(slot.offset, INVALID_HANDLE_INDEX);
    }

    fn is_null(decoder: &Decoder, slot: Slot) -> Result<bool> {
        decoder.is_null_handle(slot.offset)
    }
}

macro_rules! impl_typed_handle {
    ($($ty:ty),* $(,)?) => {$(
        impl WireType for $ty {
            const SLOT_BITS: usize = 32;

            fn encode(self, encoder: &mut Encoder, slot: Slot) {
                self.into_untyped().encode(encoder, slot);
            }

            fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
                Handle::decode(decoder, slot).map(<$ty>::from_untyped)
            }
        }

        impl Nullable for $ty {
            fn encode_null(encoder: &mut Encoder, slot: Slot) {
                Handle::encode_null(encoder, slot);
            }

            fn is_null(decoder: &Decoder, slot: Slot) -> Result<bool> {
                Handle::is_null(decoder, slot)
            }
        }
    )*};
}

impl_typed_handle!(
    MessagePipeHandle,
    DataPipeProducerHandle,
    DataPipeConsumerHandle,
    SharedBufferHandle,
);

// ===== pointer types =====

fn required_pointer(decoder: &Decoder, slot: Slot) -> Result<usize> {
    decoder
        .decode_pointer(slot.offset)?
        .ok_or(ValidationError::UnexpectedNullPointer)
}

impl<T: WireType> WireType for Vec<T> {
    const SLOT_BITS: usize = 64;

    fn encode(self, encoder: &mut Encoder, slot: Slot) {
        let target = encoder.encode_array(self);
        encoder.write_pointer(slot.offset, target);
    }

    fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
        let target = required_pointer(decoder, slot)?;
        decoder.decode_array(target, None)
    }
}

impl<T: WireType> Nullable for Vec<T> {
    fn encode_null(_encoder: &mut Encoder, _slot: Slot) {}

    fn is_null(decoder: &Decoder, slot: Slot) -> Result<bool> {
        decoder.is_null_pointer(slot.offset)
    }
}

impl<T: WireType, const N: usize> WireType for [T; N] {
    const SLOT_BITS: usize = 64;

    fn encode(self, encoder: &mut Encoder, slot: Slot) {
        Vec::from(self).encode(encoder, slot);
    }

    fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
        let target = required_pointer(decoder, slot)?;
        let items: Vec<T> = decoder.decode_array(target, Some(N))?;
        items
            .try_into()
            .map_err(|_| ValidationError::UnexpectedArrayHeader)
    }
}

impl<T: WireType, const N: usize> Nullable for [T; N] {
    fn encode_null(_encoder: &mut Encoder, _slot: Slot) {}

    fn is_null(decoder: &Decoder, slot: Slot) -> Result<bool> {
        decoder.is_null_pointer(slot.offset)
    }
}

impl WireType for String {
    const SLOT_BITS: usize = 64;

    fn encode(self, encoder: &mut Encoder, slot: Slot) {
        let target = encoder.encode_byte_array(self.as_bytes());
        encoder.write_pointer(slot.offset, target);
    }

    fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
        let target = required_pointer(decoder, slot)?;
        let bytes = decoder.decode_byte_array(target)?;
        String::from_utf8(bytes).map_err(|_| ValidationError::InvalidUtf8)
    }
}

impl Nullable for String {
    fn encode_null(_encoder: &mut Encoder, _slot: Slot) {}

    fn is_null(decoder: &Decoder, slot: Slot) -> Result<bool> {
        decoder.is_null_pointer(slot.offset)
    }
}

/// Layout of the struct that holds a map's two array pointers.
const MAP_VERSIONS: &[(u32, u32)] = &[(0, 24)];

impl<K, V> WireType for HashMap<K, V>
where
    K: WireType + Eq + Hash,
    V: WireType,
{
    const SLOT_BITS: usize = 64;

    fn encode(self, encoder: &mut Encoder, slot: Slot) {
        let (keys, values): (Vec<K>, Vec<V>) = self.into_iter().unzip();
        let target = encoder.claim(24);
        encoder.write_u32(target, 24);
        encoder.write_u32(target + 4, 0);
        keys.encode(encoder, Slot::at(target + 8));
        values.encode(encoder, Slot::at(target + 16));
        encoder.write_pointer(slot.offset, target);
    }

    fn decode(decoder: &mut Decoder, slot: Slot) -> Result<Self> {
        let target = required_pointer(decoder, slot)?;
        decoder.claim_struct_header(target, MAP_VERSIONS)?;
        let keys = Vec::<K>::decode(decoder, Slot::at(target + 8))?;
        let values = Vec::<V>::decode(decoder, Slot::at(target + 16))?;
        if keys.len() != values.len() {
            return Err(ValidationError::DifferentSizedArraysInMap);
        }
        Ok(keys.into_iter().zip(values).collect())
    }
}

impl<K, V> Nullable for HashMap<K, V>
where
    K: WireType + Eq + Hash,
    V: WireType,
{
    fn encode_null(_encoder: &mut Encoder, _slot: Slot) {}

    fn is_null(decoder: &Decoder, slot: Slot) -> Result<bool> {
        decoder.is_null_pointer(slot.offset)
    }
}

/// Makes [`WireStruct`] types usable as fields: encoded out of line behind
/// a pointer, and nullable through `Option`.
#[macro_export]
macro_rules! impl_struct_field {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::bindings::WireType for $ty {
            const SLOT_BITS: usize = 64;

            fn encode(self, encoder: &mut $crate::bindings::Encoder, slot: $crate::bindings::Slot) {
                let target = encoder.encode_struct(self);
                encoder.write_pointer(slot.offset, target);
            }

            fn decode(
                decoder: &mut $crate::bindings::Decoder,
                slot: $crate::bindings::Slot,
            ) -> ::std::result::Result<Self, $crate::ValidationError> {
                let target = decoder
                    .decode_pointer(slot.offset)?
                    .ok_or($crate::ValidationError::UnexpectedNullPointer)?;
                decoder.decode_struct(target)
            }
        }

        impl $crate::bindings::Nullable for $ty {
            fn encode_null(_encoder: &mut $crate::bindings::Encoder, _slot: $crate::bindings::Slot) {}

            fn is_null(
                decoder: &$crate::bindings::Decoder,
                slot: $crate::bindings::Slot,
            ) -> ::std::result::Result<bool, $crate::ValidationError> {
                decoder.is_null_pointer(slot.offset)
            }
        }
    )+};
}

/// Makes [`WireUnion`] types usable as fields: encoded inline in a 16-byte
/// slot, and nullable through `Option`.
#[macro_export]
macro_rules! impl_union_field {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::bindings::WireType for $ty {
            const SLOT_BITS: usize = 128;

            fn encode(self, encoder: &mut $crate::bindings::Encoder, slot: $crate::bindings::Slot) {
                encoder.encode_union_inline(self, slot.offset);
            }

            fn decode(
                decoder: &mut $crate::bindings::Decoder,
                slot: $crate::bindings::Slot,
            ) -> ::std::result::Result<Self, $crate::ValidationError> {
                decoder
                    .decode_union_inline(slot.offset)?
                    .ok_or($crate::ValidationError::UnexpectedNullUnion)
            }
        }

        impl $crate::bindings::Nullable for $ty {
            fn encode_null(_encoder: &mut $crate::bindings::Encoder, _slot: $crate::bindings::Slot) {}

            fn is_null(
                decoder: &$crate::bindings::Decoder,
                slot: $crate::bindings::Slot,
            ) -> ::std::result::Result<bool, $crate::ValidationError> {
                decoder.is_null_union(slot.offset)
            }
        }
    )+};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Core;

    fn round_trip<T: WireType>(value: T) -> Result<T> {
        let mut encoder = Encoder::new();
        let slot = encoder.claim((T::SLOT_BITS + 7) / 8);
        value.encode(&mut encoder, Slot::at(slot));
        let (bytes, handles) = encoder.into_parts();
        let mut decoder = Decoder::new(bytes, handles);
        decoder.claim_memory(0, (T::SLOT_BITS + 7) / 8)?;
        T::decode(&mut decoder, Slot::at(slot))
    }

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
        label: Option<String>,
    }

    impl WireStruct for Point {
        const VERSIONS: &'static [(u32, u32)] = &[(0, 24)];

        fn encode_fields(self, fields: &mut StructEncoder<'_>) {
            fields.put(8, self.x);
            fields.put(12, self.y);
            fields.put(16, self.label);
        }

        fn decode_fields(fields: &mut StructDecoder<'_>) -> Result<Self> {
            Ok(Self {
                x: fields.get(8)?,
                y: fields.get(12)?,
                label: fields.get(16)?,
            })
        }
    }

    crate::impl_struct_field!(Point);

    #[derive(Debug, PartialEq)]
    enum Shape {
        Radius(u32),
        Name(String),
        Inner(Box<Shape>),
    }

    impl WireUnion for Shape {
        fn tag(&self) -> u32 {
            match self {
                Shape::Radius(_) => 0,
                Shape::Name(_) => 1,
                Shape::Inner(_) => 2,
            }
        }

        fn encode_member(self, encoder: &mut Encoder, slot: Slot) {
            match self {
                Shape::Radius(r) => r.encode(encoder, slot),
                Shape::Name(n) => n.encode(encoder, slot),
                Shape::Inner(inner) => encoder.encode_union_pointer(*inner, slot.offset),
            }
        }

        fn decode_member(decoder: &mut Decoder, tag: u32, slot: Slot) -> Result<Self> {
            match tag {
                0 => u32::decode(decoder, slot).map(Shape::Radius),
                1 => String::decode(decoder, slot).map(Shape::Name),
                2 => decoder
                    .decode_union_pointer(slot.offset)?
                    .map(|inner| Shape::Inner(Box::new(inner)))
                    .ok_or(ValidationError::UnexpectedNullUnion),
                other => Err(ValidationError::UnknownUnionTag(other)),
            }
        }
    }

    crate::impl_union_field!(Shape);

    #[test]
    fn test_primitives() {
        assert_eq!(round_trip(-5i16), Ok(-5));
        assert_eq!(round_trip(u64::MAX), Ok(u64::MAX));
        assert_eq!(round_trip(1.5f64), Ok(1.5));
        assert_eq!(round_trip(true), Ok(true));
    }

    #[test]
    fn test_nested_collections() {
        let value = vec![vec![1u8, 2], vec![], vec![3]];
        assert_eq!(round_trip(value.clone()), Ok(value));

        let flags = vec![true, false, true, true, false, true, false, false, true, true];
        assert_eq!(round_trip(flags.clone()), Ok(flags));

        assert_eq!(round_trip([7u16, 8, 9]), Ok([7, 8, 9]));
    }

    #[test]
    fn test_nullable_pointers() {
        let value: Vec<Option<String>> = vec![None, Some("hi".to_string()), None];
        assert_eq!(round_trip(value.clone()), Ok(value));

        let absent: Option<Vec<u32>> = None;
        assert_eq!(round_trip(absent), Ok(None));
    }

    #[test]
    fn test_null_in_required_slot() {
        let mut decoder = Decoder::new(vec![0; 8], Vec::new());
        assert_eq!(
            String::decode(&mut decoder, Slot::at(0)),
            Err(ValidationError::UnexpectedNullPointer)
        );
        assert_eq!(
            Shape::decode(&mut decoder, Slot::at(0)),
            Err(ValidationError::UnexpectedNullUnion)
        );
    }

    #[test]
    fn test_map() {
        let mut map = HashMap::new();
        map.insert("one".to_string(), 1u8);
        map.insert("two".to_string(), 2u8);
        assert_eq!(round_trip(map.clone()), Ok(map));
    }

    #[test]
    fn test_struct_field_and_union() {
        let point = Point {
            x: -1,
            y: 2,
            label: Some("origin".to_string()),
        };
        assert_eq!(
            round_trip(point),
            Ok(Point {
                x: -1,
                y: 2,
                label: Some("origin".to_string())
            })
        );

        let shapes = vec![
            Some(Shape::Radius(3)),
            None,
            Some(Shape::Name("square".to_string())),
            Some(Shape::Inner(Box::new(Shape::Radius(9)))),
        ];
        let decoded = round_trip(shapes).unwrap();
        assert_eq!(decoded[0], Some(Shape::Radius(3)));
        assert_eq!(decoded[1], None);
        assert_eq!(decoded[2], Some(Shape::Name("square".to_string())));
        assert_eq!(
            decoded[3],
            Some(Shape::Inner(Box::new(Shape::Radius(9))))
        );
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut encoder = Encoder::new();
        let slot = encoder.claim(8);
        let target = encoder.encode_byte_array(&[0xff, 0xfe]);
        encoder.write_pointer(slot, target);
        let (bytes, handles) = encoder.into_parts();
        let mut decoder = Decoder::new(bytes, handles);
        decoder.claim_memory(0, 8).unwrap();
        assert_eq!(
            String::decode(&mut decoder, Slot::at(slot)),
            Err(ValidationError::InvalidUtf8)
        );
    }

    #[test]
    fn test_handles_travel_in_order() {
        let core = Core::new();
        let (a, _b) = core.create_message_pipe().unwrap();
        let (c, _d) = core.create_message_pipe().unwrap();
        let raws = (a.raw(), c.raw());

        let decoded = round_trip(vec![Some(a), None, Some(c)]).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().map(|h| h.raw()), Some(raws.0));
        assert!(decoded[1].is_none());
        assert_eq!(decoded[2].as_ref().map(|h| h.raw()), Some(raws.1));
    }

    #[test]
    fn test_repeated_handle_index_rejected() {
        let core = Core::new();
        let (a, b) = core.create_message_pipe().unwrap();

        let mut encoder = Encoder::new();
        let slot = encoder.claim(8);
        encoder.write_u32(slot, 0);
        encoder.write_u32(slot + 4, 0);
        let (bytes, _) = encoder.into_parts();
        let mut decoder = Decoder::new(bytes, vec![a.into_untyped(), b.into_untyped()]);
        decoder.claim_memory(0, 8).unwrap();

        assert!(Handle::decode(&mut decoder, Slot::at(0)).is_ok());
        assert_eq!(
            Handle::decode(&mut decoder, Slot::at(4)).err(),
            Some(ValidationError::IllegalHandle)
        );
    }
}
