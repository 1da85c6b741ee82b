//! Canonical CBOR encoding.
//!
//! The [`Encoder`] appends items to a growing byte buffer. Compound items
//! (arrays and maps) are written through closure-scoped helpers so that a
//! definite-length header can never disagree with the number of items
//! actually emitted; a mismatch is a programming error and panics.

use std::ops::Range;

/// A value that can be written to an [`Encoder`].
pub trait Encode {
    fn encode(&self, encoder: &mut Encoder);
}

/// A streaming canonical CBOR encoder.
#[derive(Default)]
pub struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the encoder, returning the encoded bytes.
    pub fn build(self) -> Vec<u8> {
        self.data
    }

    /// The number of bytes written so far.
    #[inline]
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// Writes a head byte plus the minimal-width argument encoding.
    fn push_head(&mut self, major: u8, value: u64) {
        match value {
            0..24 => self.data.push((major << 5) | value as u8),
            24..=0xFF => {
                self.data.push((major << 5) | 24);
                self.data.push(value as u8);
            }
            0x100..=0xFFFF => {
                self.data.push((major << 5) | 25);
                self.data.extend((value as u16).to_be_bytes());
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.data.push((major << 5) | 26);
                self.data.extend((value as u32).to_be_bytes());
            }
            _ => {
                self.data.push((major << 5) | 27);
                self.data.extend(value.to_be_bytes());
            }
        }
    }

    pub fn emit<T: Encode + ?Sized>(&mut self, value: &T) {
        value.encode(self)
    }

    /// Writes a definite-length byte string, returning the range of the
    /// content bytes within the output buffer.
    pub fn emit_bytes(&mut self, value: &[u8]) -> Range<usize> {
        self.push_head(2, value.len() as u64);
        let start = self.offset();
        self.data.extend_from_slice(value);
        start..self.offset()
    }

    /// Writes a definite-length text string.
    pub fn emit_text(&mut self, value: &str) {
        self.push_head(3, value.len() as u64);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Splices pre-encoded CBOR directly into the stream.
    pub fn emit_raw(&mut self, value: &[u8]) -> Range<usize> {
        let start = self.offset();
        self.data.extend_from_slice(value);
        start..self.offset()
    }

    /// Writes an array. `Some(count)` produces a definite-length header,
    /// `None` an indefinite-length array terminated by the break code.
    pub fn emit_array<F>(&mut self, count: Option<usize>, f: F)
    where
        F: FnOnce(&mut Array),
    {
        let mut a = Array::open(self, count);
        f(&mut a);
        a.close();
    }

    /// Fallible variant of [`emit_array`](Self::emit_array).
    pub fn try_emit_array<F, E>(&mut self, count: Option<usize>, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut Array) -> Result<(), E>,
    {
        let mut a = Array::open(self, count);
        f(&mut a)?;
        a.close();
        Ok(())
    }

    /// Writes a map of `count` key/value pairs (or an indefinite map).
    pub fn emit_map<F>(&mut self, count: Option<usize>, f: F)
    where
        F: FnOnce(&mut Map),
    {
        let mut m = Map::open(self, count);
        f(&mut m);
        m.close();
    }
}

/// Closure-scoped helper writing the elements of an array or map.
///
/// `D` is the number of items per logical entry: 1 for arrays, 2 for maps.
pub struct Group<'a, const D: usize> {
    encoder: &'a mut Encoder,
    expected: Option<usize>,
    written: usize,
}

pub type Array<'a> = Group<'a, 1>;
pub type Map<'a> = Group<'a, 2>;

impl<'a, const D: usize> Group<'a, D> {
    fn open(encoder: &'a mut Encoder, count: Option<usize>) -> Self {
        let major = if D == 1 { 4 } else { 5 };
        if let Some(count) = count {
            encoder.push_head(major, count as u64);
        } else {
            encoder.data.push((major << 5) | 31);
        }
        Self {
            encoder,
            expected: count.map(|c| c * D),
            written: 0,
        }
    }

    fn close(self) {
        match self.expected {
            None => self.encoder.data.push(0xFF),
            Some(expected) if expected != self.written => {
                panic!("definite-length group wrote {} of {expected} items", self.written)
            }
            Some(_) => {}
        }
    }

    fn next(&mut self) -> &mut Encoder {
        self.written += 1;
        if let Some(expected) = self.expected
            && self.written > expected
        {
            panic!("definite-length group overflowed {expected} items");
        }
        self.encoder
    }

    /// The number of bytes written since this group was opened, including
    /// its own header.
    pub fn offset(&self) -> usize {
        self.encoder.offset()
    }

    /// Accounts for an item without writing it. The caller takes
    /// responsibility for appending the item's bytes to the built buffer —
    /// this exists for the serialise-then-patch CRC dance.
    pub fn skip_value(&mut self) {
        self.next();
    }

    pub fn emit<T: Encode + ?Sized>(&mut self, value: &T) {
        self.next().emit(value)
    }

    pub fn emit_bytes(&mut self, value: &[u8]) -> Range<usize> {
        self.next().emit_bytes(value)
    }

    pub fn emit_text(&mut self, value: &str) {
        self.next().emit_text(value)
    }

    pub fn emit_raw(&mut self, value: &[u8]) -> Range<usize> {
        self.next().emit_raw(value)
    }

    pub fn emit_array<F>(&mut self, count: Option<usize>, f: F)
    where
        F: FnOnce(&mut Array),
    {
        self.next().emit_array(count, f)
    }

    pub fn try_emit_array<F, E>(&mut self, count: Option<usize>, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut Array) -> Result<(), E>,
    {
        self.next().try_emit_array(count, f)
    }

    pub fn emit_map<F>(&mut self, count: Option<usize>, f: F)
    where
        F: FnOnce(&mut Map),
    {
        self.next().emit_map(count, f)
    }
}

impl<T: Encode> Encode for &T {
    fn encode(&self, encoder: &mut Encoder) {
        (*self).encode(encoder)
    }
}

macro_rules! encode_uint {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, encoder: &mut Encoder) {
                    encoder.push_head(0, *self as u64)
                }
            }
        )*
    };
}

encode_uint!(u8, u16, u32, u64, usize);

macro_rules! encode_int {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, encoder: &mut Encoder) {
                    if *self >= 0 {
                        encoder.push_head(0, *self as u64)
                    } else {
                        encoder.push_head(1, self.unsigned_abs() as u64 - 1)
                    }
                }
            }
        )*
    };
}

encode_int!(i8, i16, i32, i64, isize);

impl Encode for bool {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.data.push((7 << 5) | if *self { 21 } else { 20 })
    }
}

impl Encode for f64 {
    fn encode(&self, encoder: &mut Encoder) {
        let half = half::f16::from_f64(*self);
        if half.to_f64() == *self {
            encoder.data.push((7 << 5) | 25);
            encoder.data.extend(half.to_be_bytes());
        } else if (*self as f32) as f64 == *self {
            encoder.data.push((7 << 5) | 26);
            encoder.data.extend((*self as f32).to_be_bytes());
        } else {
            encoder.data.push((7 << 5) | 27);
            encoder.data.extend(self.to_be_bytes());
        }
    }
}

impl Encode for str {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.emit_text(self)
    }
}

impl Encode for String {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.emit_text(self)
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.emit_array(Some(self.len()), |a| {
            for item in self {
                a.emit(item);
            }
        })
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, encoder: &mut Encoder) {
        self.as_slice().encode(encoder)
    }
}

macro_rules! encode_tuple {
    ($len:expr; $(($name:ident, $index:tt)),*) => {
        impl<$($name: Encode),*> Encode for ($($name,)*) {
            fn encode(&self, encoder: &mut Encoder) {
                encoder.emit_array(Some($len), |a| {
                    $( a.emit(&self.$index); )*
                })
            }
        }
    };
}

encode_tuple!(2; (T0, 0), (T1, 1));
encode_tuple!(3; (T0, 0), (T1, 1), (T2, 2));
encode_tuple!(4; (T0, 0), (T1, 1), (T2, 2), (T3, 3));

/// Encodes a single value into a fresh buffer.
pub fn emit<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut e = Encoder::new();
    e.emit(value);
    e.build()
}

/// Encodes a single array into a fresh buffer.
pub fn emit_array<F>(count: Option<usize>, f: F) -> Vec<u8>
where
    F: FnOnce(&mut Array),
{
    let mut e = Encoder::new();
    e.emit_array(count, f);
    e.build()
}

/// Encodes a single byte string into a fresh buffer.
pub fn emit_bytes(value: &[u8]) -> Vec<u8> {
    let mut e = Encoder::new();
    e.emit_bytes(value);
    e.build()
}
