use super::*;

fn is_node_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn check_node_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || !name.chars().all(is_node_name_char) {
        Err(Error::DtnInvalidNodeName(name.to_string()))
    } else {
        Ok(())
    }
}

fn dtn_from_ssp(ssp: &str) -> Result<Eid, Error> {
    let Some(rest) = ssp.strip_prefix("//") else {
        return Err(Error::DtnMissingPrefix);
    };
    let Some((node_name, demux)) = rest.split_once('/') else {
        return Err(Error::DtnMissingDemux);
    };
    check_node_name(node_name)?;
    Ok(Eid::Dtn {
        node_name: node_name.to_string(),
        demux: demux.to_string(),
    })
}

fn ipn_from_ssp(ssp: &str) -> Result<Eid, Error> {
    let Some((node, service)) = ssp.split_once('.') else {
        return Err(Error::IpnInvalidFormat);
    };
    if service.contains('.') {
        return Err(Error::IpnInvalidFormat);
    }
    let node_number: u64 = node.parse()?;
    let service_number: u64 = service.parse()?;
    if node_number == 0 {
        return Err(Error::IpnZeroNode);
    }
    Ok(Eid::Ipn {
        node_number,
        service_number,
    })
}

pub(super) fn eid_from_str(s: &str) -> Result<Eid, Error> {
    match s.split_once(':') {
        Some(("dtn", "none")) => Ok(Eid::Null),
        Some(("dtn", ssp)) => dtn_from_ssp(ssp),
        Some(("ipn", ssp)) => ipn_from_ssp(ssp),
        Some((scheme, _)) => Err(Error::UnsupportedScheme(scheme.to_string())),
        None => Err(Error::UnsupportedScheme(s.to_string())),
    }
}

pub(super) fn eid_from_cbor(a: &mut cbor::decode::ArrayDecoder<'_, '_>) -> Result<Eid, Error> {
    match a.pull_uint()? {
        1 => {
            // Scheme-specific part is either the integer 0 (dtn:none) or a
            // URI text string
            if a.peek_major()? == 0 {
                if a.pull_uint()? != 0 {
                    return Err(Error::DtnInvalidSsp);
                }
                Ok(Eid::Null)
            } else {
                dtn_from_ssp(&a.pull_text()?)
            }
        }
        2 => a.pull_array(|a| {
            let node_number = a.pull_uint()?;
            let service_number = a.pull_uint()?;
            if node_number == 0 {
                if service_number == 0 {
                    return Ok(Eid::Null);
                }
                return Err(Error::IpnZeroNode);
            }
            Ok(Eid::Ipn {
                node_number,
                service_number,
            })
        }),
        scheme => Err(Error::UnsupportedSchemeNumber(scheme)),
    }
}
