//! Bundle deserialisation.
//!
//! Each block is located by skipping over it once, then re-parsed from its
//! exact byte extent so the CRC can be verified against the bytes actually
//! received.

use super::*;
use canonical::CanonicalBlock;
use crate::crc::CrcType;
use error::CaptureFieldErr;
use registry::Registry;

/// Parses and validates a bundle from its serialised form.
pub fn parse(data: &[u8], registry: &Registry) -> Result<Bundle, Error> {
    let mut decoder = cbor::decode::Decoder::new(data);
    let bundle = decoder.pull_array(|a| -> Result<Bundle, Error> {
        let start = a.position();
        a.skip_value()?;
        let primary = PrimaryBlock::from_cbor(&data[start..a.position()])?;

        let mut blocks = Vec::new();
        while !a.at_end()? {
            let start = a.position();
            a.skip_value()?;
            blocks.push(parse_canonical(&data[start..a.position()], registry)?);
        }

        Ok(Bundle { primary, blocks })
    })?;

    if !decoder.is_exhausted() {
        return Err(Error::AdditionalData);
    }

    bundle.validate()?;
    Ok(bundle)
}

fn parse_canonical(block: &[u8], registry: &Registry) -> Result<CanonicalBlock, Error> {
    let mut decoder = cbor::decode::Decoder::new(block);
    decoder.pull_array(|a| {
        let type_code = a.pull_uint().map_field_err("block type code")?;
        let number = a.pull_uint().map_field_err("block number")?;
        match (number, type_code) {
            (1, 1) => {}
            (0 | 1, _) | (_, 1) => {
                return Err(Error::InvalidBlockNumber(type_code.into(), number));
            }
            _ => {}
        }

        let flags: block::Flags = a
            .parse()
            .map_field_err("block processing control flags")?;
        let crc_type: CrcType = a.parse().map_field_err("CRC type")?;
        let content = a.pull_bytes().map_field_err("block data")?;

        let crc_range = if !a.at_end()? {
            let start = a.position();
            let value = a.pull_bytes()?;
            if crc_type.width() != 0 && value.len() != crc_type.width() {
                return Err(crc::Error::InvalidLength(value.len()).into());
            }
            Some(start + 1..a.position())
        } else {
            None
        };

        crc::verify_crc(block, crc_range, crc_type)?;

        Ok(CanonicalBlock {
            number,
            flags,
            crc_type,
            data: registry.decode(type_code, &content)?,
        })
    })
}
