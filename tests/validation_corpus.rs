//! Conformance corpus: hand-written messages fed to a stub.
//!
//! Each case is a message in the validation input format plus the verdict
//! the stub must reach: `Ok(())` for a message that is accepted and
//! dispatched, or the exact validation error that rejects it.

use std::collections::HashMap;

use capwire::bindings::{
    parse_validation_input, Decoder, Encoder, Slot, StructDecoder, StructEncoder,
};
use capwire::dispatch::read_message;
use capwire::{
    CapwireError, Core, MessageHeader, MessagePipeHandle, Stub, StubBuilder, ValidationError,
    WireStruct, WireType, WireUnion,
};

type DecodeResult<T> = std::result::Result<T, ValidationError>;

struct F32Param(f32);

impl WireStruct for F32Param {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.0);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> DecodeResult<Self> {
        Ok(F32Param(fields.get(8)?))
    }
}

struct StructA {
    i: u64,
}

impl WireStruct for StructA {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.i);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> DecodeResult<Self> {
        Ok(Self { i: fields.get(8)? })
    }
}

capwire::impl_struct_field!(StructA);

struct StructParam(StructA);

impl WireStruct for StructParam {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.0);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> DecodeResult<Self> {
        Ok(StructParam(fields.get(8)?))
    }
}

struct BoolsParam(Vec<bool>);

impl WireStruct for BoolsParam {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.0);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> DecodeResult<Self> {
        Ok(BoolsParam(fields.get(8)?))
    }
}

enum UnionA {
    Int(u32),
    Text(String),
}

impl WireUnion for UnionA {
    fn tag(&self) -> u32 {
        match self {
            UnionA::Int(_) => 0,
            UnionA::Text(_) => 1,
        }
    }

    fn encode_member(self, encoder: &mut Encoder, slot: Slot) {
        match self {
            UnionA::Int(v) => v.encode(encoder, slot),
            UnionA::Text(v) => v.encode(encoder, slot),
        }
    }

    fn decode_member(decoder: &mut Decoder, tag: u32, slot: Slot) -> DecodeResult<Self> {
        match tag {
            0 => u32::decode(decoder, slot).map(UnionA::Int),
            1 => String::decode(decoder, slot).map(UnionA::Text),
            other => Err(ValidationError::UnknownUnionTag(other)),
        }
    }
}

capwire::impl_union_field!(UnionA);

struct UnionParam(UnionA);

impl WireStruct for UnionParam {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 24)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.0);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> DecodeResult<Self> {
        Ok(UnionParam(fields.get(8)?))
    }
}

struct HandleParam(MessagePipeHandle);

impl WireStruct for HandleParam {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.0);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> DecodeResult<Self> {
        Ok(HandleParam(fields.get(8)?))
    }
}

struct MapParam(HashMap<u8, u8>);

impl WireStruct for MapParam {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.0);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> DecodeResult<Self> {
        Ok(MapParam(fields.get(8)?))
    }
}

struct Empty;

impl WireStruct for Empty {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 8)];

    fn encode_fields(self, _fields: &mut StructEncoder<'_>) {}

    fn decode_fields(_fields: &mut StructDecoder<'_>) -> DecodeResult<Self> {
        Ok(Empty)
    }
}

fn conformance_stub(pipe: MessagePipeHandle) -> Stub {
    StubBuilder::new()
        .one_way(0, |_: F32Param| async { Ok(()) })
        .one_way(1, |_: StructParam| async { Ok(()) })
        .one_way(3, |_: BoolsParam| async { Ok(()) })
        .one_way(4, |_: UnionParam| async { Ok(()) })
        .one_way(5, |_: HandleParam| async { Ok(()) })
        .one_way(6, |_: MapParam| async { Ok(()) })
        .method(7, |_: Empty| async { Ok(Empty) })
        .build(pipe)
}

/// Feeds `text` to a fresh stub and returns its verdict plus the client end.
async fn verdict(text: &str) -> (Result<(), ValidationError>, MessagePipeHandle) {
    let input = parse_validation_input(text).unwrap();
    let core = Core::new();
    let (client, server) = core.create_message_pipe().unwrap();

    let mut handles = Vec::new();
    for _ in 0..input.num_handles {
        let (end, _other) = core.create_message_pipe().unwrap();
        handles.push(end.into_untyped());
    }
    client.write_message(&input.data, handles).unwrap();

    let mut stub = conformance_stub(server);
    let result = match stub.serve_request().await {
        Ok(()) => Ok(()),
        Err(CapwireError::Validation(err)) => Err(err),
        Err(other) => panic!("unexpected non-validation error: {other}"),
    };
    (result, client)
}

const ONE_WAY_0: &str = "[u4]16 [u4]0 [u4]0 [u4]0";
const ONE_WAY_1: &str = "[u4]16 [u4]0 [u4]1 [u4]0";
const ONE_WAY_3: &str = "[u4]16 [u4]0 [u4]3 [u4]0";
const ONE_WAY_4: &str = "[u4]16 [u4]0 [u4]4 [u4]0";
const ONE_WAY_5: &str = "[u4]16 [u4]0 [u4]5 [u4]0";
const ONE_WAY_6: &str = "[u4]16 [u4]0 [u4]6 [u4]0";

fn corpus() -> Vec<(&'static str, String, Result<(), ValidationError>)> {
    use ValidationError::*;

    let case = |name, header: &str, body: &str, expected| (name, format!("{header}\n{body}"), expected);

    vec![
        // ----- message header -----
        case(
            "msghdr_num_bytes_too_small",
            "[u4]8 [u4]0 [u4]0 [u4]0",
            "[u4]16 [u4]0 [f]-1 [u4]0",
            Err(UnexpectedStructHeader),
        ),
        case(
            "msghdr_v1_too_small",
            "[u4]16 [u4]1 [u4]7 [u4]1",
            "[u4]8 [u4]0",
            Err(UnexpectedStructHeader),
        ),
        case(
            "msghdr_missing_request_id",
            "[u4]16 [u4]0 [u4]7 [u4]1",
            "[u4]8 [u4]0",
            Err(MessageHeaderMissingRequestId),
        ),
        case(
            "msghdr_expects_and_is_response",
            "[u4]24 [u4]1 [u4]7 [u4]3 [u8]1",
            "[u4]8 [u4]0",
            Err(MessageHeaderInvalidFlags),
        ),
        case(
            "msghdr_error_without_response",
            "[u4]24 [u4]1 [u4]7 [u4]5 [u8]1",
            "[u4]8 [u4]0",
            Err(MessageHeaderInvalidFlags),
        ),
        case(
            "msghdr_unknown_method",
            "[u4]16 [u4]0 [u4]99 [u4]0",
            "[u4]8 [u4]0",
            Err(MessageHeaderUnknownMethod(99)),
        ),
        case(
            "msghdr_one_way_to_method_with_response",
            "[u4]16 [u4]0 [u4]7 [u4]0",
            "[u4]8 [u4]0",
            Err(MessageHeaderInvalidFlags),
        ),
        // ----- primitives -----
        case("mthd0_good", ONE_WAY_0, "[u4]16 [u4]0 [f]-1 [u4]0", Ok(())),
        case(
            "mthd0_incomplete_struct",
            ONE_WAY_0,
            "[u4]16 [u4]0 [f]-1",
            Err(IllegalMemoryRange),
        ),
        case(
            "mthd0_struct_num_bytes_too_small",
            ONE_WAY_0,
            "[u4]8 [u4]0 [f]-1 [u4]0",
            Err(UnexpectedStructHeader),
        ),
        case(
            "mthd0_struct_num_bytes_huge",
            ONE_WAY_0,
            "[u4]0xFFFFFFF0 [u4]0 [f]-1 [u4]0",
            Err(IllegalMemoryRange),
        ),
        // ----- nested struct -----
        case(
            "mthd1_good",
            ONE_WAY_1,
            "[u4]16 [u4]0 [dist8]a
             [anchr]a [u4]16 [u4]0 [u8]1234",
            Ok(()),
        ),
        case(
            "mthd1_null_struct",
            ONE_WAY_1,
            "[u4]16 [u4]0 [u8]0",
            Err(UnexpectedNullPointer),
        ),
        case(
            "mthd1_pointer_past_end",
            ONE_WAY_1,
            "[u4]16 [u4]0 [u8]64",
            Err(IllegalPointer),
        ),
        case(
            "mthd1_misaligned_struct",
            ONE_WAY_1,
            "[u4]16 [u4]0 [u8]9 [u4]16 [u4]0 [u8]1234",
            Err(MisalignedObject),
        ),
        case(
            "mthd1_inner_struct_truncated",
            ONE_WAY_1,
            "[u4]16 [u4]0 [dist8]a
             [anchr]a [u4]8 [u4]0 [u8]1234",
            Err(UnexpectedStructHeader),
        ),
        // ----- bool array -----
        case(
            "mthd3_good",
            ONE_WAY_3,
            "[u4]16 [u4]0 [dist8]bits
             [anchr]bits [u4]10 [u4]12 [b]01010101 [b]00001111",
            Ok(()),
        ),
        case(
            "mthd3_array_num_bytes_too_small",
            ONE_WAY_3,
            "[u4]16 [u4]0 [dist8]bits
             [anchr]bits [u4]10 [u4]20 [b]01010101 [b]00001111",
            Err(UnexpectedArrayHeader),
        ),
        // ----- union -----
        case(
            "mthd4_good_int",
            ONE_WAY_4,
            "[u4]24 [u4]0 [u4]16 [u4]0 [u4]5 [u4]0",
            Ok(()),
        ),
        case(
            "mthd4_good_string",
            ONE_WAY_4,
            "[u4]24 [u4]0 [u4]16 [u4]1 [dist8]s
             [anchr]s [u4]10 [u4]2 [u1]104 [u1]105",
            Ok(()),
        ),
        case(
            "mthd4_unknown_tag",
            ONE_WAY_4,
            "[u4]24 [u4]0 [u4]16 [u4]9 [u4]5 [u4]0",
            Err(UnknownUnionTag(9)),
        ),
        case(
            "mthd4_wrong_union_size",
            ONE_WAY_4,
            "[u4]24 [u4]0 [u4]12 [u4]0 [u4]5 [u4]0",
            Err(UnexpectedUnionSize),
        ),
        case(
            "mthd4_null_union",
            ONE_WAY_4,
            "[u4]24 [u4]0 [u4]0 [u4]0 [u8]0",
            Err(UnexpectedNullUnion),
        ),
        case(
            "mthd4_string_member_invalid_utf8",
            ONE_WAY_4,
            "[u4]24 [u4]0 [u4]16 [u4]1 [dist8]s
             [anchr]s [u4]10 [u4]2 [u1]0xff [u1]0xfe",
            Err(InvalidUtf8),
        ),
        // ----- handles -----
        case(
            "mthd5_good",
            ONE_WAY_5,
            "[u4]16 [u4]0 [u4]0 [u4]0 [handles]1",
            Ok(()),
        ),
        case(
            "mthd5_handle_index_out_of_range",
            ONE_WAY_5,
            "[u4]16 [u4]0 [u4]1 [u4]0 [handles]1",
            Err(IllegalHandle),
        ),
        case(
            "mthd5_invalid_handle",
            ONE_WAY_5,
            "[u4]16 [u4]0 [u4]0xFFFFFFFF [u4]0 [handles]1",
            Err(UnexpectedInvalidHandle),
        ),
        // ----- map -----
        case(
            "mthd6_good",
            ONE_WAY_6,
            "[u4]16 [u4]0 [dist8]map
             [anchr]map [u4]24 [u4]0 [dist8]keys [dist8]values
             [anchr]keys [u4]10 [u4]2 [u1]1 [u1]2 [u2]0 [u4]0
             [anchr]values [u4]10 [u4]2 [u1]3 [u1]4",
            Ok(()),
        ),
        case(
            "mthd6_different_sized_arrays",
            ONE_WAY_6,
            "[u4]16 [u4]0 [dist8]map
             [anchr]map [u4]24 [u4]0 [dist8]keys [dist8]values
             [anchr]keys [u4]10 [u4]2 [u1]1 [u1]2 [u2]0 [u4]0
             [anchr]values [u4]11 [u4]3 [u1]3 [u1]4 [u1]5",
            Err(DifferentSizedArraysInMap),
        ),
        case(
            "mthd6_overlapping_arrays",
            ONE_WAY_6,
            "[u4]16 [u4]0 [dist8]map
             [anchr]map [u4]24 [u4]0 [dist8]keys [u8]8
             [anchr]keys [u4]10 [u4]2 [u1]1 [u1]2 [u2]0 [u4]0",
            Err(IllegalMemoryRange),
        ),
        // ----- method with response -----
        case(
            "mthd7_good",
            "[u4]24 [u4]1 [u4]7 [u4]1 [u8]5",
            "[u4]8 [u4]0",
            Ok(()),
        ),
    ]
}

#[tokio::test]
async fn test_validation_corpus() {
    for (name, text, expected) in corpus() {
        let (result, _client) = verdict(&text).await;
        assert_eq!(result, expected, "case {name}");
    }
}

#[tokio::test]
async fn test_corpus_comments_are_ignored() {
    let text = "
        [u4]16 [u4]0   // num_bytes, version
        [u4]0 [u4]0    // ordinal 0, no flags
        // params
        [u4]16 [u4]0 [f]-1 [u4]0
    ";
    let (result, _client) = verdict(text).await;
    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn test_accepted_request_is_answered() {
    let (result, client) = verdict("[u4]24 [u4]1 [u4]7 [u4]1 [u8]5 [u4]8 [u4]0").await;
    assert_eq!(result, Ok(()));

    let response = read_message(&client).await.unwrap();
    assert_eq!(response.header().unwrap(), MessageHeader::response(7, 5));
}
