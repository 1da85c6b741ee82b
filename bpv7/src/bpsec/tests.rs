use super::*;
use builder::Builder;
use bundle::Bundle;
use canonical::CanonicalData;
use registry::Registry;

fn test_bundle() -> Bundle {
    Builder::new()
        .source("dtn://src/app".parse().unwrap())
        .destination("dtn://dst/app".parse().unwrap())
        .payload(b"a very secret payload".to_vec())
        .build()
        .unwrap()
}

#[test]
fn asb_content_round_trip() {
    let asb = AbstractSecurityBlock {
        targets: vec![1, 2],
        context_id: CONTEXT_BIB_HMAC_SHA2,
        source: "ipn:9.0".parse().unwrap(),
        parameters: vec![(1, cbor::encode::emit(&7u64))],
        results: vec![
            vec![(1, cbor::encode::emit_bytes(&[0xAA; 32]))],
            vec![(1, cbor::encode::emit_bytes(&[0xBB; 32]))],
        ],
    };
    let content = asb.to_content();
    assert_eq!(AbstractSecurityBlock::from_content(&content).unwrap(), asb);
}

#[test]
fn asb_results_must_mirror_targets() {
    let asb = AbstractSecurityBlock {
        targets: vec![1, 2],
        context_id: CONTEXT_BIB_HMAC_SHA2,
        source: "ipn:9.0".parse().unwrap(),
        parameters: vec![],
        results: vec![vec![(1, cbor::encode::emit_bytes(&[0xAA; 32]))]],
    };
    assert!(matches!(
        asb.check_valid(),
        Err(Error::MismatchedResults)
    ));
}

#[test]
fn bib_sign_verify_all_variants() {
    let key = KeyMaterial::from(&b"integrity key for unit testing!!"[..]);
    for variant in [
        bib::ShaVariant::HmacSha256,
        bib::ShaVariant::HmacSha384,
        bib::ShaVariant::HmacSha512,
    ] {
        let mut bundle = test_bundle();
        bib::apply(
            &mut bundle,
            &[1],
            &key,
            variant,
            ScopeFlags::default(),
            "dtn://src/".parse().unwrap(),
        )
        .unwrap();

        bib::verify(&bundle, &key).unwrap();

        // Any other key fails
        assert!(matches!(
            bib::verify(&bundle, &KeyMaterial::from(&b"some other key"[..])),
            Err(crate::Error::InvalidBpsec(Error::AuthenticationFailed))
        ));
    }
}

#[test]
fn bib_survives_the_wire() {
    let key = KeyMaterial::from(&b"integrity key for unit testing!!"[..]);
    let mut bundle = test_bundle();
    bib::apply(
        &mut bundle,
        &[0, 1],
        &key,
        bib::ShaVariant::HmacSha384,
        ScopeFlags::default(),
        "dtn://src/".parse().unwrap(),
    )
    .unwrap();

    let registry = Registry::default();
    let parsed = bundle::parse(&bundle.to_cbor().unwrap(), &registry).unwrap();
    bib::verify(&parsed, &key).unwrap();
}

#[test]
fn bib_detects_tampering() {
    let key = KeyMaterial::from(&b"integrity key for unit testing!!"[..]);
    let mut bundle = test_bundle();
    bib::apply(
        &mut bundle,
        &[1],
        &key,
        bib::ShaVariant::HmacSha256,
        ScopeFlags::default(),
        "dtn://src/".parse().unwrap(),
    )
    .unwrap();

    if let Some(CanonicalData::Payload(data)) =
        bundle.find_block_mut(block::Type::Payload).map(|b| &mut b.data)
    {
        data[0] ^= 0xFF;
    }
    assert!(matches!(
        bib::verify(&bundle, &key),
        Err(crate::Error::InvalidBpsec(Error::AuthenticationFailed))
    ));
}

#[test]
fn bcb_round_trip_both_key_sizes() {
    let registry = Registry::default();
    for key in [
        KeyMaterial::from([0x13u8; 16]),
        KeyMaterial::from([0x42u8; 32]),
    ] {
        let original = test_bundle();
        let mut bundle = original.clone();
        bcb::encrypt(
            &mut bundle,
            1,
            &key,
            ScopeFlags::default(),
            "dtn://src/".parse().unwrap(),
            None,
        )
        .unwrap();

        // Ciphertext in place of the payload
        assert_ne!(bundle.payload(), original.payload());
        assert!(
            bundle
                .find_block(block::Type::BlockConfidentiality)
                .is_some()
        );

        // Encrypted form survives serialisation
        let mut bundle = bundle::parse(&bundle.to_cbor().unwrap(), &registry).unwrap();

        bcb::decrypt(&mut bundle, &key, &registry).unwrap();
        assert_eq!(bundle.payload(), original.payload());
        assert!(
            bundle
                .find_block(block::Type::BlockConfidentiality)
                .is_none()
        );
        // Decryption restores a CRC-32 on the target
        assert_eq!(
            bundle.payload_block().unwrap().crc_type,
            crc::CrcType::Crc32Castagnoli
        );
    }
}

#[test]
fn bcb_wrong_key_fails() {
    let registry = Registry::default();
    let mut bundle = test_bundle();
    bcb::encrypt(
        &mut bundle,
        1,
        &KeyMaterial::from([0x42u8; 32]),
        ScopeFlags::default(),
        "dtn://src/".parse().unwrap(),
        None,
    )
    .unwrap();

    assert!(matches!(
        bcb::decrypt(
            &mut bundle.clone(),
            &KeyMaterial::from([0x43u8; 32]),
            &registry
        ),
        Err(crate::Error::InvalidBpsec(Error::AuthenticationFailed))
    ));
}

#[test]
fn bcb_flipped_ciphertext_fails() {
    let registry = Registry::default();
    let key = KeyMaterial::from([0x42u8; 32]);
    let mut bundle = test_bundle();
    bcb::encrypt(
        &mut bundle,
        1,
        &key,
        ScopeFlags::default(),
        "dtn://src/".parse().unwrap(),
        None,
    )
    .unwrap();

    if let Some(CanonicalData::Payload(data)) =
        bundle.find_block_mut(block::Type::Payload).map(|b| &mut b.data)
    {
        data[3] ^= 0x01;
    }
    assert!(matches!(
        bcb::decrypt(&mut bundle, &key, &registry),
        Err(crate::Error::InvalidBpsec(Error::AuthenticationFailed))
    ));
}

#[test]
fn bcb_rejects_bad_key_length() {
    let mut bundle = test_bundle();
    assert!(matches!(
        bcb::encrypt(
            &mut bundle,
            1,
            &KeyMaterial::from([0u8; 24]),
            ScopeFlags::default(),
            "dtn://src/".parse().unwrap(),
            None,
        ),
        Err(crate::Error::InvalidBpsec(Error::KeyLengthMismatch(24)))
    ));
}
