use super::*;
use builder::Builder;
use bundle_flags::BundleFlags;
use canonical::HopCount;
use crate::crc::CrcType;
use registry::Registry;

fn registry() -> Registry {
    Registry::default()
}

fn test_bundle() -> Bundle {
    Builder::new()
        .source("dtn://src/".parse().unwrap())
        .destination("dtn://dst/".parse().unwrap())
        .lifetime_str("10m")
        .unwrap()
        .payload(b"hello world".to_vec())
        .build()
        .unwrap()
}

#[test]
fn wire_round_trip() {
    let bundle = test_bundle();
    let encoded = bundle.to_cbor().unwrap();

    // Indefinite array wrapper with the break terminator
    assert_eq!(encoded[0], 0x9F);
    assert_eq!(*encoded.last().unwrap(), 0xFF);

    let parsed = parse(&encoded, &registry()).unwrap();
    assert_eq!(parsed, bundle);

    // Deterministic re-encoding
    assert_eq!(parsed.to_cbor().unwrap(), encoded);
}

#[test]
fn round_trip_with_extensions() {
    let bundle = Builder::new()
        .source("ipn:1.1".parse().unwrap())
        .destination("ipn:2.1".parse().unwrap())
        .hop_count(16)
        .previous_node("ipn:3.0".parse().unwrap())
        .bundle_age(250)
        .payload(b"payload".to_vec())
        .build()
        .unwrap();

    let parsed = parse(&bundle.to_cbor().unwrap(), &registry()).unwrap();
    assert_eq!(parsed, bundle);
    assert_eq!(parsed.hop_count(), Some(HopCount { limit: 16, count: 0 }));
    assert_eq!(parsed.bundle_age(), Some(250));
    assert_eq!(
        parsed.previous_node(),
        Some(&"ipn:3.0".parse().unwrap())
    );
}

#[test]
fn unknown_blocks_survive_round_trip() {
    let mut bundle = test_bundle();
    bundle.add_block(canonical::CanonicalData::Unrecognised(
        77,
        cbor::encode::emit(&(1u64, 2u64)),
    ));

    let encoded = bundle.to_cbor().unwrap();
    let parsed = parse(&encoded, &registry()).unwrap();
    assert_eq!(parsed, bundle);
    assert_eq!(parsed.to_cbor().unwrap(), encoded);
}

#[test]
fn crc_flip_detected() {
    for crc_type in [CrcType::Crc16X25, CrcType::Crc32Castagnoli] {
        let mut bundle = test_bundle();
        bundle.find_block_mut(block::Type::Payload).unwrap().crc_type = crc_type;
        let encoded = bundle.to_cbor().unwrap();
        assert!(parse(&encoded, &registry()).is_ok());

        // Flipping any single byte of the payload block breaks its CRC
        for i in 0..encoded.len() {
            let mut corrupt = encoded.clone();
            corrupt[i] ^= 0x01;
            if corrupt[i] == 0xFF || corrupt[i] == 0x9F {
                // Might still be structurally broken; either way it must
                // not parse cleanly back to the original
                continue;
            }
            assert_ne!(
                parse(&corrupt, &registry()).ok(),
                Some(bundle.clone()),
                "flip at {i} went unnoticed"
            );
        }
    }
}

#[test]
fn validation_failures() {
    // Anonymous source without the no-fragment flag
    let mut bundle = test_bundle();
    bundle.primary.source = eid::Eid::Null;
    bundle.primary.report_to = eid::Eid::Null;
    assert!(matches!(
        bundle.validate(),
        Err(Error::ValidationFailed(errors))
            if errors.iter().any(|e| matches!(e, Error::AnonymousFlags))
    ));

    // Duplicate block numbers
    let mut bundle = test_bundle();
    let number = bundle.add_block(canonical::CanonicalData::BundleAge(1));
    bundle.block_by_number_mut(number).unwrap().number = 1;
    assert!(matches!(
        bundle.validate(),
        Err(Error::ValidationFailed(errors))
            if errors.iter().any(|e| matches!(e, Error::DuplicateBlockNumber(1)))
    ));

    // Payload not final
    let mut bundle = test_bundle();
    bundle.add_block(canonical::CanonicalData::BundleAge(1));
    bundle.blocks.reverse();
    assert!(matches!(
        bundle.validate(),
        Err(Error::ValidationFailed(errors))
            if errors.iter().any(|e| matches!(e, Error::PayloadNotFinal))
    ));

    // Zero creation time without a bundle age block
    let mut bundle = test_bundle();
    bundle.primary.timestamp = creation_timestamp::CreationTimestamp::unclocked(1);
    assert!(matches!(
        bundle.validate(),
        Err(Error::ValidationFailed(errors))
            if errors.iter().any(|e| matches!(e, Error::MissingBundleAge))
    ));

    // Fragment and no-fragment flags together
    let mut bundle = test_bundle();
    bundle.primary.flags = BundleFlags {
        is_fragment: true,
        do_not_fragment: true,
        ..Default::default()
    };
    bundle.primary.fragment = Some(bundle_id::FragmentInfo {
        offset: 0,
        total_len: 11,
    });
    assert!(matches!(
        bundle.validate(),
        Err(Error::ValidationFailed(errors))
            if errors.iter().any(|e| matches!(e, Error::FragmentFlagConflict))
    ));

    // Bundle age exceeding the lifetime
    let mut bundle = test_bundle();
    bundle.add_block(canonical::CanonicalData::BundleAge(11 * 60 * 1000));
    assert!(matches!(
        bundle.validate(),
        Err(Error::ValidationFailed(errors))
            if errors.iter().any(|e| matches!(e, Error::BundleAgeExceedsLifetime(_, _)))
    ));

    // Duplicate single-instance extension blocks
    let mut bundle = test_bundle();
    bundle.add_block(canonical::CanonicalData::BundleAge(1));
    bundle.add_block(canonical::CanonicalData::BundleAge(2));
    assert!(matches!(
        bundle.validate(),
        Err(Error::ValidationFailed(errors))
            if errors.iter().any(|e| matches!(e, Error::DuplicateBlocks(block::Type::BundleAge)))
    ));
}

#[test]
fn set_previous_node_replaces() {
    let mut bundle = test_bundle();
    bundle.set_previous_node("dtn://hop1/".parse().unwrap());
    bundle.set_previous_node("dtn://hop2/".parse().unwrap());
    assert_eq!(
        bundle.previous_node(),
        Some(&"dtn://hop2/".parse().unwrap())
    );
    // Replacement, not accumulation
    assert_eq!(
        bundle
            .blocks
            .iter()
            .filter(|b| b.block_type() == block::Type::PreviousNode)
            .count(),
        1
    );
}

#[test]
fn trailing_garbage_rejected() {
    let mut encoded = test_bundle().to_cbor().unwrap();
    encoded.push(0x00);
    assert!(matches!(
        parse(&encoded, &registry()),
        Err(Error::AdditionalData)
    ));
}
