/*!
Deterministic CBOR for the corvid DTN node.

The bundle protocol wire format requires byte-exact, canonical CBOR: integers
in their shortest encoding, definite-length headers wherever the length is
known up front, and floats at the smallest width that round-trips. The
encoder in this crate only ever produces that form, and the decoder rejects
non-minimal integer encodings outright rather than tracking canonicity as a
side channel.
*/

pub mod decode;
pub mod encode;


#[cfg(test)]
mod encode_tests;
