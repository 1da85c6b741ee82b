use crate::encode::*;
use hex_literal::hex;

// Vectors from RFC 8949 Appendix A

#[test]
fn uints() {
    assert_eq!(emit(&0u64), hex!("00"));
    assert_eq!(emit(&1u64), hex!("01"));
    assert_eq!(emit(&10u64), hex!("0a"));
    assert_eq!(emit(&23u64), hex!("17"));
    assert_eq!(emit(&24u64), hex!("1818"));
    assert_eq!(emit(&25u64), hex!("1819"));
    assert_eq!(emit(&100u64), hex!("1864"));
    assert_eq!(emit(&1000u64), hex!("1903e8"));
    assert_eq!(emit(&1000000u64), hex!("1a000f4240"));
    assert_eq!(emit(&1000000000000u64), hex!("1b000000e8d4a51000"));
    assert_eq!(emit(&u64::MAX), hex!("1bffffffffffffffff"));
}

#[test]
fn ints() {
    assert_eq!(emit(&-1i64), hex!("20"));
    assert_eq!(emit(&-10i64), hex!("29"));
    assert_eq!(emit(&-100i64), hex!("3863"));
    assert_eq!(emit(&-1000i64), hex!("3903e7"));
    assert_eq!(emit(&42i64), hex!("182a"));
}

#[test]
fn floats() {
    assert_eq!(emit(&0.0f64), hex!("f90000"));
    assert_eq!(emit(&1.0f64), hex!("f93c00"));
    assert_eq!(emit(&1.1f64), hex!("fb3ff199999999999a"));
    assert_eq!(emit(&1.5f64), hex!("f93e00"));
    assert_eq!(emit(&65504.0f64), hex!("f97bff"));
    assert_eq!(emit(&100000.0f64), hex!("fa47c35000"));
    assert_eq!(emit(&-4.1f64), hex!("fbc010666666666666"));
    assert_eq!(emit(&f64::INFINITY), hex!("f97c00"));
}

#[test]
fn simple() {
    assert_eq!(emit(&false), hex!("f4"));
    assert_eq!(emit(&true), hex!("f5"));
}

#[test]
fn strings() {
    assert_eq!(emit(""), hex!("60"));
    assert_eq!(emit("a"), hex!("6161"));
    assert_eq!(emit("IETF"), hex!("6449455446"));
    assert_eq!(emit_bytes(&[]), hex!("40"));
    assert_eq!(emit_bytes(&hex!("01020304")), hex!("4401020304"));
}

#[test]
fn arrays() {
    assert_eq!(emit_array(Some(0), |_| {}), hex!("80"));
    assert_eq!(
        emit_array(Some(3), |a| {
            a.emit(&1u64);
            a.emit(&2u64);
            a.emit(&3u64);
        }),
        hex!("83010203")
    );
    assert_eq!(
        emit_array(Some(3), |a| {
            a.emit(&1u64);
            a.emit_array(Some(2), |a| {
                a.emit(&2u64);
                a.emit(&3u64);
            });
            a.emit_array(Some(2), |a| {
                a.emit(&4u64);
                a.emit(&5u64);
            });
        }),
        hex!("8301820203820405")
    );
    assert_eq!(emit(&(1u64..=25u64).collect::<Vec<u64>>(), ), hex!("98190102030405060708090a0b0c0d0e0f101112131415161718181819"));
}

#[test]
fn indefinite_arrays() {
    assert_eq!(emit_array(None, |_| {}), hex!("9fff"));
    assert_eq!(
        emit_array(None, |a| {
            a.emit(&1u64);
            a.emit_array(Some(2), |a| {
                a.emit(&2u64);
                a.emit(&3u64);
            });
        }),
        hex!("9f01820203ff")
    );
}

#[test]
fn maps() {
    let mut e = Encoder::new();
    e.emit_map(Some(2), |m| {
        m.emit(&1u64);
        m.emit(&2u64);
        m.emit(&3u64);
        m.emit(&4u64);
    });
    assert_eq!(e.build(), hex!("a201020304"));
}

#[test]
fn tuples() {
    assert_eq!(emit(&(1u64, 2u64)), hex!("820102"));
}

#[test]
#[should_panic]
fn short_definite_array_panics() {
    emit_array(Some(2), |a| {
        a.emit(&1u64);
    });
}
