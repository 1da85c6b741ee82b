//! Canonical CBOR decoding.
//!
//! [`Decoder`] is a cursor over a byte slice. Integer heads must be
//! minimally encoded; a wider-than-necessary head is a [`Error::NonMinimal`]
//! failure, because the bundle wire format demands deterministic
//! re-encoding. Byte strings and arrays may be definite or indefinite
//! length, matching what the bundle grammar allows.

use thiserror::Error;

/// Decoding failures.
#[derive(Error, Debug)]
pub enum Error {
    /// The input ended before the current item was complete.
    #[error("need at least {0} more byte(s) to decode value")]
    NeedMoreData(usize),

    /// The next item has a different major type than the caller asked for.
    #[error("incorrect type, expecting {expected}, found major type {found}")]
    WrongType {
        expected: &'static str,
        found: u8,
    },

    /// An integer or length head was not in its shortest encoding.
    #[error("non-minimal integer encoding")]
    NonMinimal,

    /// An item's declared length exceeds addressable memory.
    #[error("encoded item is too big")]
    TooBig,

    /// An attempt was made to read past the end of an array or map.
    #[error("no more items in sequence")]
    NoMoreItems,

    /// A sequence held more items than the caller consumed.
    #[error("additional unread items in sequence")]
    AdditionalItems,

    /// A reserved or malformed minor value was encountered.
    #[error("invalid minor value {0}")]
    InvalidMinor(u8),

    /// An indefinite-length string contained a chunk of the wrong type.
    #[error("invalid chunk in indefinite-length string")]
    InvalidChunk,

    /// A simple value outside the assigned set.
    #[error("invalid simple value {0}")]
    InvalidSimple(u8),

    /// Nesting deeper than the permitted maximum while skipping.
    #[error("maximum recursion depth reached")]
    MaxRecursion,

    /// A text string was not valid UTF-8.
    #[error(transparent)]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// An integer did not fit the requested width.
    #[error(transparent)]
    IntegerOverflow(#[from] std::num::TryFromIntError),
}

const MAX_SKIP_DEPTH: usize = 16;

/// A value that can be read from a [`Decoder`].
pub trait Decode: Sized {
    type Error: From<Error>;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Self::Error>;
}

/// A cursor over CBOR-encoded bytes.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Absolute offset of the cursor within the input slice.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// `true` once every input byte has been consumed.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self) -> Result<u8, Error> {
        self.data.get(self.pos).copied().ok_or(Error::NeedMoreData(1))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.data.len() - self.pos < n {
            return Err(Error::NeedMoreData(n - (self.data.len() - self.pos)));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Reads a head, returning `(major, argument)`. Enforces minimal
    /// encoding of the argument. Minor 31 (indefinite/break) is reported as
    /// the sentinel argument `u64::MAX` and only where `allow_indefinite`.
    fn pull_head(&mut self, allow_indefinite: bool) -> Result<(u8, u64), Error> {
        let first = self.peek()?;
        self.pos += 1;
        let major = first >> 5;
        let minor = first & 0x1F;
        let arg = match minor {
            0..24 => minor as u64,
            24 => {
                let v = self.take(1)?[0] as u64;
                if v < 24 {
                    return Err(Error::NonMinimal);
                }
                v
            }
            25 => {
                let v = u16::from_be_bytes(self.take(2)?.try_into().unwrap()) as u64;
                if v <= u8::MAX as u64 {
                    return Err(Error::NonMinimal);
                }
                v
            }
            26 => {
                let v = u32::from_be_bytes(self.take(4)?.try_into().unwrap()) as u64;
                if v <= u16::MAX as u64 {
                    return Err(Error::NonMinimal);
                }
                v
            }
            27 => {
                let v = u64::from_be_bytes(self.take(8)?.try_into().unwrap());
                if v <= u32::MAX as u64 {
                    return Err(Error::NonMinimal);
                }
                if v == u64::MAX {
                    // Reserved as the indefinite-length sentinel
                    return Err(Error::TooBig);
                }
                v
            }
            31 if allow_indefinite => u64::MAX,
            _ => return Err(Error::InvalidMinor(minor)),
        };
        Ok((major, arg))
    }

    /// Major type of the next item, without consuming it.
    pub fn peek_major(&self) -> Result<u8, Error> {
        Ok(self.peek()? >> 5)
    }

    /// Decodes one value of type `T`.
    pub fn parse<T: Decode>(&mut self) -> Result<T, T::Error> {
        T::decode(self)
    }

    /// Reads an unsigned integer (major type 0).
    pub fn pull_uint(&mut self) -> Result<u64, Error> {
        match self.pull_head(false)? {
            (0, v) => Ok(v),
            (major, _) => Err(Error::WrongType {
                expected: "unsigned integer",
                found: major,
            }),
        }
    }

    /// Reads a signed integer (major type 0 or 1).
    pub fn pull_int(&mut self) -> Result<i64, Error> {
        match self.pull_head(false)? {
            (0, v) => Ok(i64::try_from(v)?),
            (1, v) => Ok(-1 - i64::try_from(v)?),
            (major, _) => Err(Error::WrongType {
                expected: "integer",
                found: major,
            }),
        }
    }

    pub fn pull_bool(&mut self) -> Result<bool, Error> {
        match self.pull_head(false)? {
            (7, 20) => Ok(false),
            (7, 21) => Ok(true),
            (major, _) => Err(Error::WrongType {
                expected: "boolean",
                found: major,
            }),
        }
    }

    /// Reads a float of any encoded width as an `f64`.
    pub fn pull_f64(&mut self) -> Result<f64, Error> {
        let first = self.peek()?;
        let (major, minor) = (first >> 5, first & 0x1F);
        if major != 7 || !(25..=27).contains(&minor) {
            return Err(Error::WrongType {
                expected: "float",
                found: major,
            });
        }
        self.pos += 1;
        match minor {
            25 => Ok(half::f16::from_be_bytes(self.take(2)?.try_into().unwrap()).to_f64()),
            26 => Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()) as f64),
            _ => Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap())),
        }
    }

    /// Reads a byte string, definite or indefinite length. Indefinite
    /// strings are concatenations of definite chunks terminated by the
    /// break code.
    pub fn pull_bytes(&mut self) -> Result<Vec<u8>, Error> {
        match self.pull_head(true)? {
            (2, u64::MAX) => {
                let mut out = Vec::new();
                loop {
                    if self.peek()? == 0xFF {
                        self.pos += 1;
                        return Ok(out);
                    }
                    match self.pull_head(false)? {
                        (2, len) => {
                            let len = usize::try_from(len).map_err(|_| Error::TooBig)?;
                            out.extend_from_slice(self.take(len)?);
                        }
                        _ => return Err(Error::InvalidChunk),
                    }
                }
            }
            (2, len) => {
                let len = usize::try_from(len).map_err(|_| Error::TooBig)?;
                Ok(self.take(len)?.to_vec())
            }
            (major, _) => Err(Error::WrongType {
                expected: "byte string",
                found: major,
            }),
        }
    }

    /// Reads a definite-length text string.
    pub fn pull_text(&mut self) -> Result<String, Error> {
        match self.pull_head(false)? {
            (3, len) => {
                let len = usize::try_from(len).map_err(|_| Error::TooBig)?;
                Ok(std::str::from_utf8(self.take(len)?)?.to_owned())
            }
            (major, _) => Err(Error::WrongType {
                expected: "text string",
                found: major,
            }),
        }
    }

    /// Reads an array, handing its elements to `f` through an
    /// [`ArrayDecoder`]. The closure must consume every element; leftover
    /// items fail with [`Error::AdditionalItems`].
    pub fn pull_array<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut ArrayDecoder<'a, '_>) -> Result<T, E>,
        E: From<Error>,
    {
        let count = match self.pull_head(true)? {
            (4, u64::MAX) => None,
            (4, count) => Some(count),
            (major, _) => {
                return Err(Error::WrongType {
                    expected: "array",
                    found: major,
                }
                .into());
            }
        };
        let mut a = ArrayDecoder {
            decoder: self,
            count,
            consumed: 0,
        };
        let r = f(&mut a)?;
        a.finish()?;
        Ok(r)
    }

    /// Reads a map, handing alternating keys and values to `f` through a
    /// [`MapDecoder`].
    pub fn pull_map<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut MapDecoder<'a, '_>) -> Result<T, E>,
        E: From<Error>,
    {
        let count = match self.pull_head(true)? {
            (5, u64::MAX) => None,
            (5, count) => Some(count.checked_mul(2).ok_or(Error::TooBig)?),
            (major, _) => {
                return Err(Error::WrongType {
                    expected: "map",
                    found: major,
                }
                .into());
            }
        };
        let mut m = MapDecoder {
            decoder: self,
            count,
            consumed: 0,
        };
        let r = f(&mut m)?;
        m.finish()?;
        Ok(r)
    }

    /// Skips one complete value, including nested structure.
    pub fn skip_value(&mut self) -> Result<(), Error> {
        self.skip_inner(MAX_SKIP_DEPTH)
    }

    fn skip_inner(&mut self, depth: usize) -> Result<(), Error> {
        if depth == 0 {
            return Err(Error::MaxRecursion);
        }
        match self.pull_head(true)? {
            (0, _) | (1, _) => Ok(()),
            (2, u64::MAX) | (3, u64::MAX) => loop {
                if self.peek()? == 0xFF {
                    self.pos += 1;
                    return Ok(());
                }
                self.skip_inner(depth - 1)?;
            },
            (2, len) | (3, len) => {
                self.take(usize::try_from(len).map_err(|_| Error::TooBig)?)?;
                Ok(())
            }
            (4, u64::MAX) | (5, u64::MAX) => loop {
                if self.peek()? == 0xFF {
                    self.pos += 1;
                    return Ok(());
                }
                self.skip_inner(depth - 1)?;
            },
            (4, count) => {
                for _ in 0..count {
                    self.skip_inner(depth - 1)?;
                }
                Ok(())
            }
            (5, count) => {
                for _ in 0..count.checked_mul(2).ok_or(Error::TooBig)? {
                    self.skip_inner(depth - 1)?;
                }
                Ok(())
            }
            (6, _) => self.skip_inner(depth - 1),
            (7, 24) => {
                let v = self.take(1)?[0];
                if v < 32 {
                    return Err(Error::InvalidSimple(v));
                }
                Ok(())
            }
            (7, 25) => self.take(2).map(|_| ()),
            (7, 26) => self.take(4).map(|_| ()),
            (7, 27) => self.take(8).map(|_| ()),
            (7, v @ 28..=30) => Err(Error::InvalidSimple(v as u8)),
            (7, _) => Ok(()),
            _ => unreachable!(),
        }
    }
}

/// Cursor over the elements of one array.
pub struct ArrayDecoder<'a, 'b> {
    decoder: &'b mut Decoder<'a>,
    count: Option<u64>,
    consumed: u64,
}

impl<'a, 'b> ArrayDecoder<'a, 'b> {
    /// Declared element count, or `None` for indefinite-length arrays.
    pub fn count(&self) -> Option<u64> {
        self.count
    }

    /// Absolute cursor offset, for callers that track byte ranges.
    pub fn position(&self) -> usize {
        self.decoder.position()
    }

    /// Major type of the next element, without consuming it.
    pub fn peek_major(&mut self) -> Result<u8, Error> {
        if self.at_end()? {
            return Err(Error::NoMoreItems);
        }
        self.decoder.peek_major()
    }

    /// `true` when every element has been consumed (or the break code is
    /// next, for indefinite arrays).
    pub fn at_end(&mut self) -> Result<bool, Error> {
        match self.count {
            Some(count) => Ok(self.consumed >= count),
            None => Ok(self.decoder.peek()? == 0xFF),
        }
    }

    fn next(&mut self) -> Result<&mut Decoder<'a>, Error> {
        if self.at_end()? {
            return Err(Error::NoMoreItems);
        }
        self.consumed += 1;
        Ok(self.decoder)
    }

    fn finish(mut self) -> Result<(), Error> {
        if !self.at_end()? {
            return Err(Error::AdditionalItems);
        }
        if self.count.is_none() {
            // Consume the break code
            self.decoder.pos += 1;
        }
        Ok(())
    }

    pub fn parse<T: Decode>(&mut self) -> Result<T, T::Error> {
        T::decode(self.next()?)
    }

    pub fn pull_uint(&mut self) -> Result<u64, Error> {
        self.next()?.pull_uint()
    }

    pub fn pull_bool(&mut self) -> Result<bool, Error> {
        self.next()?.pull_bool()
    }

    pub fn pull_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.next()?.pull_bytes()
    }

    pub fn pull_text(&mut self) -> Result<String, Error> {
        self.next()?.pull_text()
    }

    pub fn pull_array<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut ArrayDecoder<'a, '_>) -> Result<T, E>,
        E: From<Error>,
    {
        self.next()?.pull_array(f)
    }

    pub fn pull_map<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut MapDecoder<'a, '_>) -> Result<T, E>,
        E: From<Error>,
    {
        self.next()?.pull_map(f)
    }

    pub fn skip_value(&mut self) -> Result<(), Error> {
        self.next()?.skip_value()
    }
}

/// Cursor over the entries of one map; keys and values are pulled
/// alternately.
pub struct MapDecoder<'a, 'b> {
    decoder: &'b mut Decoder<'a>,
    count: Option<u64>,
    consumed: u64,
}

impl<'a, 'b> MapDecoder<'a, 'b> {
    pub fn at_end(&mut self) -> Result<bool, Error> {
        match self.count {
            Some(count) => Ok(self.consumed >= count),
            None => Ok(self.decoder.peek()? == 0xFF),
        }
    }

    fn next(&mut self) -> Result<&mut Decoder<'a>, Error> {
        if self.at_end()? {
            return Err(Error::NoMoreItems);
        }
        self.consumed += 1;
        Ok(self.decoder)
    }

    fn finish(mut self) -> Result<(), Error> {
        if !self.at_end()? {
            return Err(Error::AdditionalItems);
        }
        if self.count.is_none() {
            self.decoder.pos += 1;
        }
        if self.consumed % 2 != 0 {
            return Err(Error::AdditionalItems);
        }
        Ok(())
    }

    pub fn parse<T: Decode>(&mut self) -> Result<T, T::Error> {
        T::decode(self.next()?)
    }

    pub fn pull_uint(&mut self) -> Result<u64, Error> {
        self.next()?.pull_uint()
    }

    pub fn pull_text(&mut self) -> Result<String, Error> {
        self.next()?.pull_text()
    }
}

macro_rules! decode_uint {
    ($($ty:ty),*) => {
        $(
            impl Decode for $ty {
                type Error = Error;

                fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
                    Ok(decoder.pull_uint()?.try_into()?)
                }
            }
        )*
    };
}

decode_uint!(u8, u16, u32, usize);

impl Decode for u64 {
    type Error = Error;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.pull_uint()
    }
}

impl Decode for i64 {
    type Error = Error;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.pull_int()
    }
}

impl Decode for bool {
    type Error = Error;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.pull_bool()
    }
}

impl Decode for f64 {
    type Error = Error;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.pull_f64()
    }
}

impl Decode for String {
    type Error = Error;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.pull_text()
    }
}

impl Decode for Vec<u8> {
    type Error = Error;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, Error> {
        decoder.pull_bytes()
    }
}

/// Decodes a single value, requiring the input to be fully consumed.
pub fn parse<T: Decode>(data: &[u8]) -> Result<T, T::Error> {
    let mut d = Decoder::new(data);
    let v: T = match d.parse() {
        Ok(v) => v,
        Err(e) => return Err(e),
    };
    if !d.is_exhausted() {
        return Err(Error::AdditionalItems.into());
    }
    Ok(v)
}

/// Decodes a single value from the front of `data`, returning the value and
/// the number of bytes consumed.
pub fn parse_prefix<T: Decode>(data: &[u8]) -> Result<(T, usize), T::Error> {
    let mut d = Decoder::new(data);
    let v: T = match d.parse() {
        Ok(v) => v,
        Err(e) => return Err(e),
    };
    Ok((v, d.position()))
}
