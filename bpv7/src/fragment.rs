//! Payload fragmentation and reassembly.
//!
//! Fragments replicate the primary block (with the fragment flag and offset
//! fields set) and those canonical blocks whose control flags demand
//! replication; the first fragment carries every canonical block.
//! Concatenating fragment payloads in offset order yields the original
//! payload exactly.

use super::*;
use block::Type;
use bundle::Bundle;
use bundle_id::FragmentInfo;
use canonical::{CanonicalBlock, CanonicalData};

/// Worst-case growth of the payload byte-string header when the chunk is no
/// longer empty.
const PAYLOAD_HEADER_MARGIN: usize = 8;

/// Splits `bundle` into fragments, each serialising to at most `mtu` bytes.
pub fn fragment(bundle: &Bundle, mtu: usize) -> Result<Vec<Bundle>, Error> {
    if bundle.primary.flags.do_not_fragment {
        return Err(Error::MustNotFragment);
    }
    let payload = bundle.payload().ok_or(Error::MissingPayload)?;
    let (base_offset, total_len) = match bundle.primary.fragment {
        Some(f) => (f.offset, f.total_len),
        None => (0, payload.len() as u64),
    };

    let build = |offset: u64, chunk: &[u8], first: bool| -> Bundle {
        let mut primary = bundle.primary.clone();
        primary.flags.is_fragment = true;
        primary.fragment = Some(FragmentInfo { offset, total_len });

        let mut blocks: Vec<CanonicalBlock> = bundle
            .blocks
            .iter()
            .filter(|b| b.block_type() != Type::Payload && (first || b.flags.must_replicate))
            .cloned()
            .collect();

        let template = bundle.payload_block().expect("payload checked above");
        blocks.push(CanonicalBlock {
            number: 1,
            flags: template.flags.clone(),
            crc_type: template.crc_type,
            data: CanonicalData::Payload(chunk.to_vec()),
        });

        Bundle { primary, blocks }
    };

    // Serialised size of a fragment with an empty payload and worst-case
    // offset width bounds the fixed overhead
    let capacity = |first: bool| -> Result<usize, Error> {
        let overhead = build(total_len, &[], first).to_cbor()?.len() + PAYLOAD_HEADER_MARGIN;
        if overhead >= mtu {
            return Err(Error::MtuTooSmall(mtu));
        }
        Ok(mtu - overhead)
    };

    if payload.is_empty() {
        return Ok(vec![build(base_offset, &[], true)]);
    }

    let mut fragments = Vec::new();
    let mut offset = 0usize;
    let mut first = true;
    loop {
        let take = capacity(first)?.min(payload.len() - offset);
        fragments.push(build(
            base_offset + offset as u64,
            &payload[offset..offset + take],
            first,
        ));
        offset += take;
        first = false;
        if offset >= payload.len() {
            return Ok(fragments);
        }
    }
}

/// Reassembles a complete set of fragments into the original bundle.
///
/// The fragments may arrive in any order and may overlap, but together they
/// must cover `[0, total-data-length)` without gaps.
pub fn reassemble(mut fragments: Vec<Bundle>) -> Result<Bundle, Error> {
    for f in &fragments {
        if !f.primary.flags.is_fragment || f.primary.fragment.is_none() {
            return Err(Error::NotAFragment);
        }
    }
    let Some(first) = fragments.first() else {
        return Err(Error::NotAFragment);
    };

    let scrubbed = first.id().scrubbed();
    let total_len = first.primary.fragment.expect("checked above").total_len;
    for f in &fragments[1..] {
        if f.id().scrubbed() != scrubbed
            || f.primary.fragment.expect("checked above").total_len != total_len
        {
            return Err(Error::MixedFragments);
        }
    }

    fragments.sort_by_key(|f| f.primary.fragment.expect("checked above").offset);

    let mut payload = Vec::with_capacity(total_len as usize);
    let mut covered = 0u64;
    for f in &fragments {
        let offset = f.primary.fragment.expect("checked above").offset;
        if offset > covered {
            return Err(Error::FragmentGap(covered));
        }
        let chunk = f.payload().ok_or(Error::MissingPayload)?;
        let skip = (covered - offset) as usize;
        if skip < chunk.len() {
            payload.extend_from_slice(&chunk[skip..]);
            covered = offset + chunk.len() as u64;
        }
    }
    if covered != total_len {
        return Err(Error::FragmentGap(covered));
    }

    // The offset-zero fragment replicated every canonical block
    let head = fragments.remove(0);
    let mut primary = head.primary;
    primary.flags.is_fragment = false;
    primary.fragment = None;

    let mut blocks = head.blocks;
    for block in &mut blocks {
        if block.block_type() == Type::Payload {
            block.data = CanonicalData::Payload(std::mem::take(&mut payload));
        }
    }

    let bundle = Bundle { primary, blocks };
    bundle.validate()?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder::Builder;
    use registry::Registry;

    fn test_bundle(payload_len: usize) -> Bundle {
        Builder::new()
            .source("dtn://src/".parse().unwrap())
            .destination("dtn://dst/".parse().unwrap())
            .payload((0..payload_len).map(|i| i as u8).collect())
            .build()
            .unwrap()
    }

    #[test]
    fn fragment_and_reassemble() {
        let bundle = test_bundle(1024);
        let fragments = fragment(&bundle, 128).unwrap();
        assert!(fragments.len() > 1);

        let registry = Registry::default();
        for f in &fragments {
            let encoded = f.to_cbor().unwrap();
            assert!(encoded.len() <= 128, "fragment is {} bytes", encoded.len());
            // Every fragment round-trips on its own
            assert_eq!(&bundle::parse(&encoded, &registry).unwrap(), f);
        }

        // Arrival order must not matter
        let mut shuffled = fragments.clone();
        shuffled.reverse();
        shuffled.rotate_left(1);

        let reassembled = reassemble(shuffled).unwrap();
        assert_eq!(reassembled.payload().unwrap(), bundle.payload().unwrap());
        assert!(!reassembled.is_fragment());
        assert_eq!(reassembled.id(), bundle.id());
    }

    #[test]
    fn replication_flags() {
        let mut bundle = test_bundle(512);
        bundle.add_block(CanonicalData::BundleAge(0));
        let n = bundle.add_block(CanonicalData::HopCount(canonical::HopCount::new(5)));
        bundle
            .block_by_number_mut(n)
            .unwrap()
            .flags
            .must_replicate = true;

        let fragments = fragment(&bundle, 160).unwrap();
        assert!(fragments.len() > 1);

        // First fragment carries everything
        assert!(fragments[0].bundle_age().is_some());
        assert!(fragments[0].hop_count().is_some());

        // Later fragments only the replicated block
        for f in &fragments[1..] {
            assert!(f.bundle_age().is_none());
            assert!(f.hop_count().is_some());
        }
    }

    #[test]
    fn forbidden_and_tiny_mtu() {
        let mut bundle = test_bundle(64);
        bundle.primary.flags.do_not_fragment = true;
        assert!(matches!(fragment(&bundle, 32), Err(Error::MustNotFragment)));

        let bundle = test_bundle(64);
        assert!(matches!(
            fragment(&bundle, 16),
            Err(Error::MtuTooSmall(16))
        ));
    }

    #[test]
    fn gap_detection() {
        let bundle = test_bundle(256);
        let mut fragments = fragment(&bundle, 128).unwrap();
        fragments.remove(1);
        assert!(matches!(reassemble(fragments), Err(Error::FragmentGap(_))));
    }

    #[test]
    fn mixed_fragments_rejected() {
        let a = fragment(&test_bundle(256), 128).unwrap();
        let mut b = fragment(
            &Builder::new()
                .source("dtn://other/".parse().unwrap())
                .destination("dtn://dst/".parse().unwrap())
                .payload(vec![0; 256])
                .build()
                .unwrap(),
            128,
        )
        .unwrap();

        let mut mixed = a;
        mixed.append(&mut b);
        assert!(matches!(reassemble(mixed), Err(Error::MixedFragments)));
    }
}
