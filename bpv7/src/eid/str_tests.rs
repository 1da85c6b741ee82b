use super::*;

fn dtn_check(s: &str, node: &str, demux: &str) {
    match s.parse::<Eid>().unwrap() {
        Eid::Dtn { node_name, demux: d } => {
            assert_eq!(node_name, node);
            assert_eq!(d, demux);
        }
        e => panic!("{s} parsed as {e}"),
    }
}

fn ipn_check(s: &str, node: u64, service: u64) {
    match s.parse::<Eid>().unwrap() {
        Eid::Ipn {
            node_number,
            service_number,
        } => {
            assert_eq!(node_number, node);
            assert_eq!(service_number, service);
        }
        e => panic!("{s} parsed as {e}"),
    }
}

fn expect_error(s: &str) {
    assert!(s.parse::<Eid>().is_err(), "{s} should not parse");
}

#[test]
fn parse() {
    assert_eq!("dtn:none".parse::<Eid>().unwrap(), Eid::Null);

    dtn_check("dtn://somewhere/", "somewhere", "");
    dtn_check("dtn://somewhere/else", "somewhere", "else");
    dtn_check("dtn://somewhere/else/", "somewhere", "else/");
    dtn_check(
        "dtn://somewhere/over/the/rainbow",
        "somewhere",
        "over/the/rainbow",
    );
    dtn_check("dtn://somewhere//", "somewhere", "/");
    dtn_check("dtn://node-1.example_x/incoming", "node-1.example_x", "incoming");
    dtn_check("dtn://gcast/~news", "gcast", "~news");

    ipn_check("ipn:1.2", 1, 2);
    ipn_check("ipn:1.0", 1, 0);
    ipn_check("ipn:977000.1", 977000, 1);

    expect_error("");
    expect_error("dtn");
    expect_error("ipn");
    expect_error(":");
    expect_error("spaniel:");
    expect_error("dtn:");
    expect_error("dtn:/");
    expect_error("dtn:somewhere");
    expect_error("dtn:/somewhere");
    expect_error("dtn://somewhere");
    expect_error("dtn:///else");
    expect_error("dtn://no spaces/x");
    expect_error("ipn:0.1");
    expect_error("ipn:1");
    expect_error("ipn:1.2.3");
    expect_error("ipn:1.-2");
    expect_error("ipn:one.two");
}

#[test]
fn display_round_trip() {
    for s in [
        "dtn:none",
        "dtn://somewhere/else",
        "dtn://somewhere/",
        "ipn:1.2",
        "ipn:977000.0",
    ] {
        assert_eq!(s.parse::<Eid>().unwrap().to_string(), s);
    }
}

#[test]
fn singleton() {
    assert!(!Eid::Null.is_singleton());
    assert!("dtn://a/b".parse::<Eid>().unwrap().is_singleton());
    assert!(!"dtn://a/~group".parse::<Eid>().unwrap().is_singleton());
    assert!("ipn:1.2".parse::<Eid>().unwrap().is_singleton());
}

#[test]
fn same_node() {
    let a: Eid = "dtn://a/x".parse().unwrap();
    let b: Eid = "dtn://a/y".parse().unwrap();
    let c: Eid = "dtn://c/x".parse().unwrap();
    assert!(a.same_node(&b));
    assert!(!a.same_node(&c));
    assert!(!a.same_node(&Eid::Null));

    let d: Eid = "ipn:7.1".parse().unwrap();
    let e: Eid = "ipn:7.2".parse().unwrap();
    assert!(d.same_node(&e));
    assert!(!d.same_node(&a));

    assert_eq!(a.node_id(), "dtn://a/".parse().unwrap());
    assert_eq!(d.node_id(), Eid::Ipn { node_number: 7, service_number: 0 });
}
