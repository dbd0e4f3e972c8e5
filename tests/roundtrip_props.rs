//! Round-trip laws checked over generated inputs.

use proptest::collection::vec;
use proptest::prelude::*;
use rpkstore::bloom::{BloomBuilder, BloomFilter, BLOOM_FP_RATE};
use rpkstore::codec::{get_codec, Compression};
use rpkstore::event::{
    decode_frame, encode_frame, EncodingFormat, Event, EventType, ResourceMeta,
};
use rpkstore::format::{FileFooter, FileHeader, FILE_FOOTER_SIZE, FILE_HEADER_SIZE};
use std::io::Cursor;
use std::path::Path;

fn arb_compression() -> impl Strategy<Value = Compression> {
    prop_oneof![Just(Compression::Gzip), Just(Compression::Zstd)]
}

fn arb_event_type() -> impl Strategy<Value = EventType> {
    prop_oneof![
        Just(EventType::Create),
        Just(EventType::Update),
        Just(EventType::Delete),
    ]
}

prop_compose! {
    fn arb_event()(
        id in "[a-z0-9]{1,12}",
        ts in 1i64..i64::MAX / 2,
        event_type in arb_event_type(),
        kind in "[A-Z][a-z]{2,10}",
        namespace in "[a-z-]{1,12}",
        name in "[a-z0-9-]{1,20}",
        uid in "[a-f0-9]{8}",
        data in vec(any::<u8>(), 0..256),
    ) -> Event {
        Event {
            id,
            timestamp: ts,
            event_type,
            resource: ResourceMeta {
                group: "apps".into(),
                version: "v1".into(),
                kind,
                namespace,
                name,
                uid,
                involved_object_uid: None,
            },
            data,
        }
    }
}

proptest! {
    #[test]
    fn compress_then_decompress_is_identity(
        data in vec(any::<u8>(), 0..4096),
        compression in arb_compression(),
    ) {
        let codec = get_codec(compression);
        let packed = codec.compress(&data).unwrap();
        prop_assert_eq!(codec.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn frame_round_trip(events in vec(arb_event(), 0..20)) {
        let frame = encode_frame(&events, EncodingFormat::Protobuf).unwrap();
        prop_assert_eq!(decode_frame(&frame, EncodingFormat::Protobuf).unwrap(), events);
    }

    #[test]
    fn json_frame_round_trip(events in vec(arb_event(), 0..8)) {
        let frame = encode_frame(&events, EncodingFormat::Json).unwrap();
        prop_assert_eq!(decode_frame(&frame, EncodingFormat::Json).unwrap(), events);
    }

    #[test]
    fn bloom_serde_preserves_membership(values in vec("[a-zA-Z0-9]{1,24}", 1..64)) {
        let mut builder = BloomBuilder::new(values.len().max(8), BLOOM_FP_RATE).unwrap();
        for v in &values {
            builder.insert(v);
        }
        let json = serde_json::to_string(&builder.freeze()).unwrap();
        let back: BloomFilter = serde_json::from_str(&json).unwrap();
        for v in &values {
            prop_assert!(back.contains(v));
        }
    }

    #[test]
    fn header_round_trip(
        created_at in any::<i64>(),
        compression in arb_compression(),
        threshold in 1u32..u32::MAX,
        checksum_enabled in any::<bool>(),
        reserved in any::<[u8; 16]>(),
    ) {
        let mut header = FileHeader::new(
            compression,
            threshold,
            EncodingFormat::Protobuf,
            checksum_enabled,
        );
        header.created_at = created_at;
        header.reserved = reserved;

        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        prop_assert_eq!(bytes.len(), FILE_HEADER_SIZE);

        let back = FileHeader::read(Cursor::new(&bytes), Path::new("prop.bin")).unwrap();
        prop_assert_eq!(back, header);
    }

    #[test]
    fn footer_round_trip(
        offset in any::<u64>(),
        length in any::<u32>(),
        checksum in "[a-f0-9]{0,64}",
        reserved in any::<[u8; 48]>(),
    ) {
        let mut footer = FileFooter::new(offset, length, checksum);
        footer.reserved = reserved;

        let mut bytes = Vec::new();
        footer.write(&mut bytes).unwrap();
        prop_assert_eq!(bytes.len(), FILE_FOOTER_SIZE);

        let buf: [u8; FILE_FOOTER_SIZE] = bytes.as_slice().try_into().unwrap();
        let back = FileFooter::parse(&buf, Path::new("prop.bin")).unwrap();
        prop_assert_eq!(back, footer);
    }
}
