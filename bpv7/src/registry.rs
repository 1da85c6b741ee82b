//! The extension-block registry.
//!
//! Maps block type codes to factory closures that turn a block's content
//! bytes into typed [`CanonicalData`]. The registry is built once at node
//! construction and is append-only afterwards; registering a code twice is
//! an error. Codes with no factory decode to
//! [`CanonicalData::Unrecognised`].

use super::*;
use canonical::CanonicalData;
use std::collections::HashMap;

pub type Factory = Box<dyn Fn(&[u8]) -> Result<CanonicalData, Error> + Send + Sync>;

pub struct Registry {
    factories: HashMap<u64, Factory>,
}

impl Registry {
    /// A registry with no factories at all.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, code: u64, factory: Factory) -> Result<(), Error> {
        match self.factories.entry(code) {
            std::collections::hash_map::Entry::Occupied(_) => Err(Error::DuplicateFactory(code)),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(factory);
                Ok(())
            }
        }
    }

    pub fn contains(&self, code: u64) -> bool {
        self.factories.contains_key(&code)
    }

    /// Decodes block content. Unknown codes are preserved opaquely rather
    /// than rejected; forwarding must not damage blocks this node cannot
    /// interpret.
    pub fn decode(&self, code: u64, content: &[u8]) -> Result<CanonicalData, Error> {
        match self.factories.get(&code) {
            Some(factory) => factory(content),
            None => Ok(CanonicalData::Unrecognised(code, content.to_vec())),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut r = Self::empty();
        for (block_type, factory) in [
            (
                block::Type::Payload,
                Box::new(|content: &[u8]| Ok(CanonicalData::Payload(content.to_vec()))) as Factory,
            ),
            (
                block::Type::PreviousNode,
                Box::new(|content: &[u8]| {
                    Ok(CanonicalData::PreviousNode(cbor::decode::parse(content)?))
                }),
            ),
            (
                block::Type::BundleAge,
                Box::new(|content: &[u8]| {
                    Ok(CanonicalData::BundleAge(cbor::decode::parse(content)?))
                }),
            ),
            (
                block::Type::HopCount,
                Box::new(|content: &[u8]| {
                    Ok(CanonicalData::HopCount(cbor::decode::parse(content)?))
                }),
            ),
            (
                block::Type::BinarySpray,
                Box::new(|content: &[u8]| {
                    Ok(CanonicalData::BinarySpray {
                        remaining: cbor::decode::parse(content)?,
                    })
                }),
            ),
            (
                block::Type::Dtlsr,
                Box::new(|content: &[u8]| Ok(CanonicalData::Dtlsr(cbor::decode::parse(content)?))),
            ),
            (
                block::Type::Prophet,
                Box::new(|content: &[u8]| {
                    Ok(CanonicalData::Prophet(cbor::decode::parse(content)?))
                }),
            ),
            (
                block::Type::Signature,
                Box::new(|content: &[u8]| {
                    Ok(CanonicalData::Signature(cbor::decode::parse(content)?))
                }),
            ),
            (
                block::Type::BlockIntegrity,
                Box::new(|content: &[u8]| {
                    Ok(CanonicalData::BlockIntegrity(
                        bpsec::AbstractSecurityBlock::from_content(content)?,
                    ))
                }),
            ),
            (
                block::Type::BlockConfidentiality,
                Box::new(|content: &[u8]| {
                    Ok(CanonicalData::BlockConfidentiality(
                        bpsec::AbstractSecurityBlock::from_content(content)?,
                    ))
                }),
            ),
        ] {
            r.register(block_type.into(), factory)
                .expect("default registry registered a code twice");
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_fails() {
        let mut r = Registry::default();
        assert!(matches!(
            r.register(
                block::Type::HopCount.into(),
                Box::new(|_| Ok(CanonicalData::BundleAge(0)))
            ),
            Err(Error::DuplicateFactory(10))
        ));
    }

    #[test]
    fn unknown_codes_are_opaque() {
        let r = Registry::default();
        let data = r.decode(99, &[1, 2, 3]).unwrap();
        assert_eq!(data, CanonicalData::Unrecognised(99, vec![1, 2, 3]));
        assert!(!r.contains(99));
        assert!(r.contains(1));
    }
}
