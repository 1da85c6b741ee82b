use super::*;
use hex_literal::hex;

fn round_trip(eid: Eid) {
    let encoded = cbor::encode::emit(&eid);
    assert_eq!(cbor::decode::parse::<Eid>(&encoded).unwrap(), eid);
}

#[test]
fn round_trips() {
    round_trip(Eid::Null);
    round_trip("dtn://somewhere/else".parse().unwrap());
    round_trip("dtn://somewhere/".parse().unwrap());
    round_trip("ipn:1.2".parse().unwrap());
    round_trip(Eid::Ipn {
        node_number: 7,
        service_number: 0,
    });
}

#[test]
fn wire_form() {
    // dtn:none = [1, 0]
    assert_eq!(cbor::encode::emit(&Eid::Null), hex!("820100"));

    // ipn:1.2 = [2, [1, 2]]
    assert_eq!(
        cbor::encode::emit(&"ipn:1.2".parse::<Eid>().unwrap()),
        hex!("8202820102")
    );

    // [1, "//a/b"]
    assert_eq!(
        cbor::encode::emit(&"dtn://a/b".parse::<Eid>().unwrap()),
        hex!("8201652f2f612f62")
    );
}

#[test]
fn bad_wire() {
    // Unknown scheme 3
    assert!(cbor::decode::parse::<Eid>(&hex!("820300")).unwrap_err().to_string().contains("scheme"));

    // ipn node 0 with non-zero service
    assert!(cbor::decode::parse::<Eid>(&hex!("8202820001")).is_err());

    // [2, [0, 0]] decodes as the null endpoint
    assert_eq!(
        cbor::decode::parse::<Eid>(&hex!("8202820000")).unwrap(),
        Eid::Null
    );
}
