//! # ipcpack
//!
//! A small, bounded TLV encoding for the bodies of IPC messages.
//!
//! ## Philosophy
//!
//! - **Explicit state**: the encoder keeps a stack of open scopes and refuses writes
//!   that would produce a structurally invalid message.
//! - **TLV**: `[Tag][Length?][Value]` lets a reader skip fields it does not know.
//! - **Zero-copy reads**: decoders are bounds-checked views over the input slice.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! All integers are little-endian.


/// Encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a known `Tag`.
    InvalidTag(u8),
    /// A different tag was found where a specific one was required.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or container length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// Closing a scope that is not the innermost open scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when only the root remains.
    ScopeUnderflow,
    /// Attempted to finalize the buffer with open scopes.
    ScopeStillOpen,
    /// A variant scope received a second payload.
    TooManyItems,
    /// A variant scope was closed without a payload.
    EmptyVariant,
    /// A map scope received something other than a variant entry.
    InvalidMapEntry,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "expected tag {:?}, found {:?}", expected, found)
            }
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Error::TooManyItems => write!(f, "variant already holds its payload"),
            Error::EmptyVariant => write!(f, "variant closed without a payload"),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of an encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Padding (skipped by readers).
    Pad = 0x00,

    BoolTrue = 0x01,
    BoolFalse = 0x02,
    U32 = 0x05,
    U64 = 0x06,
    S32 = 0x09,
    S64 = 0x0A,
    F32 = 0x0B,
    F64 = 0x0C,

    Unit = 0x0E,

    // Blobs
    String = 0x10,
    Bytes = 0x11,

    // Containers
    List = 0x20,
    Map = 0x21,
    Variant = 0x33,
}

impl Tag {
    /// Returns the tag for a byte, or `None` if the byte is not a known tag.
    pub fn from_u8(b: u8) -> Option<Self> {
        let tag = match b {
            0x00 => Tag::Pad,
            0x01 => Tag::BoolTrue,
            0x02 => Tag::BoolFalse,
            0x05 => Tag::U32,
            0x06 => Tag::U64,
            0x09 => Tag::S32,
            0x0A => Tag::S64,
            0x0B => Tag::F32,
            0x0C => Tag::F64,
            0x0E => Tag::Unit,
            0x10 => Tag::String,
            0x11 => Tag::Bytes,
            0x20 => Tag::List,
            0x21 => Tag::Map,
            0x33 => Tag::Variant,
            _ => return None,
        };
        Some(tag)
    }

    /// Width of the fixed payload that follows the tag, if any.
    ///
    /// `None` means the tag is followed by a `u32` length and a body.
    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Pad | Tag::BoolTrue | Tag::BoolFalse | Tag::Unit => Some(0),
            Tag::U32 | Tag::S32 | Tag::F32 => Some(4),
            Tag::U64 | Tag::S64 | Tag::F64 => Some(8),
            Tag::String | Tag::Bytes | Tag::List | Tag::Map | Tag::Variant => None,
        }
    }
}

/// A fixed-width little-endian scalar.
pub trait Scalar: Copy + sealed::Sealed {
    const TAG: Tag;
    const WIDTH: usize;

    fn put(self, buf: &mut Vec<u8>);
    fn take(raw: &[u8]) -> Self;
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! scalar {
    ($ty:ty, $tag:expr, $width:literal) => {
        impl sealed::Sealed for $ty {}

        impl Scalar for $ty {
            const TAG: Tag = $tag;
            const WIDTH: usize = $width;

            fn put(self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }

            fn take(raw: &[u8]) -> Self {
                let mut bytes = [0u8; $width];
                bytes.copy_from_slice(&raw[..$width]);
                <$ty>::from_le_bytes(bytes)
            }
        }
    };
}

scalar!(u32, Tag::U32, 4);
scalar!(u64, Tag::U64, 8);
scalar!(i32, Tag::S32, 4);
scalar!(i64, Tag::S64, 8);
scalar!(f32, Tag::F32, 4);
scalar!(f64, Tag::F64, 8);

/// Kind of container currently open on the `Encoder` stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The virtual root; allows any number of items.
    Root,
    /// Ordered sequence of any number of items.
    List,
    /// Keyed entries; only variants are allowed as direct children.
    Map,
    /// A name followed by exactly one payload item.
    Variant,
}

struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// A bounded, scope-checked encoder.
///
/// Length headers of containers are back-patched when the scope closes.
pub struct Encoder {
    buf: Vec<u8>,
    /// Bottom is always `Scope::Root`.
    stack: Vec<Frame>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Frame { start: 0, scope: Scope::Root, count: 0 }],
        }
    }

    /// Consumes the encoder and returns the encoded bytes.
    ///
    /// Fails with `Error::ScopeStillOpen` if any container is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn check_write(&mut self, tag: Tag) -> Result<()> {
        let frame = self.top();
        match frame.scope {
            Scope::Root | Scope::List => Ok(()),
            Scope::Map if tag == Tag::Variant => Ok(()),
            Scope::Map => Err(Error::InvalidMapEntry),
            Scope::Variant if frame.count == 0 => Ok(()),
            Scope::Variant => Err(Error::TooManyItems),
        }
    }

    fn written(&mut self) {
        self.top().count += 1;
    }

    fn tag_only(&mut self, tag: Tag) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.written();
        Ok(())
    }

    fn blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::BlobTooLarge(data.len()))?;
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.written();
        Ok(())
    }

    fn begin(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    fn end(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }

        let frame = self.top();
        if frame.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: frame.scope });
        }
        if frame.scope == Scope::Variant && frame.count == 0 {
            return Err(Error::EmptyVariant);
        }
        let start = frame.start;
        self.stack.pop();

        let body_len = self.buf.len() - start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[start - 4..start].copy_from_slice(&len.to_le_bytes());

        self.written();
        Ok(())
    }

    /// Encodes any fixed-width scalar.
    pub fn scalar<T: Scalar>(&mut self, v: T) -> Result<()> {
        self.check_write(T::TAG)?;
        self.buf.push(T::TAG as u8);
        v.put(&mut self.buf);
        self.written();
        Ok(())
    }

    pub fn u32(&mut self, v: u32) -> Result<()> { self.scalar(v) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.scalar(v) }
    pub fn s32(&mut self, v: i32) -> Result<()> { self.scalar(v) }
    pub fn s64(&mut self, v: i64) -> Result<()> { self.scalar(v) }
    pub fn f32(&mut self, v: f32) -> Result<()> { self.scalar(v) }
    pub fn f64(&mut self, v: f64) -> Result<()> { self.scalar(v) }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.tag_only(if v { Tag::BoolTrue } else { Tag::BoolFalse })
    }

    /// Encodes the unit item `()`.
    pub fn unit(&mut self) -> Result<()> {
        self.tag_only(Tag::Unit)
    }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.blob(Tag::String, v.as_bytes())
    }

    /// Encodes a raw byte blob.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.blob(Tag::Bytes, v)
    }

    pub fn list_begin(&mut self) -> Result<()> { self.begin(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end(Scope::List) }

    /// Begins a map. Only `variant_begin()` entries may be written until `map_end()`.
    pub fn map_begin(&mut self) -> Result<()> { self.begin(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.end(Scope::Map) }

    /// Begins a named variant. Exactly one payload item must follow before `variant_end()`.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.begin(Tag::Variant, Scope::Variant)?;
        self.str(name)?;
        // The name is metadata, not the payload.
        self.top().count = 0;
        Ok(())
    }
    pub fn variant_end(&mut self) -> Result<()> { self.end(Scope::Variant) }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the cursor. Container reads return decoders restricted
/// to the container's body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes left in this view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Peeks the next tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    fn length(&mut self) -> Result<usize> {
        Ok(<u32 as Scalar>::take(self.take(4)?) as usize)
    }

    /// Skips the next item, including any nested children.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        let len = match tag.fixed_width() {
            Some(width) => width,
            None => self.length()?,
        };
        self.take(len)?;
        Ok(())
    }

    /// Decodes any fixed-width scalar.
    pub fn scalar<T: Scalar>(&mut self) -> Result<T> {
        self.expect(T::TAG)?;
        Ok(T::take(self.take(T::WIDTH)?))
    }

    pub fn u32(&mut self) -> Result<u32> { self.scalar() }
    pub fn u64(&mut self) -> Result<u64> { self.scalar() }
    pub fn s32(&mut self) -> Result<i32> { self.scalar() }
    pub fn s64(&mut self) -> Result<i64> { self.scalar() }
    pub fn f32(&mut self) -> Result<f32> { self.scalar() }
    pub fn f64(&mut self) -> Result<f64> { self.scalar() }

    pub fn bool(&mut self) -> Result<bool> {
        let value = match self.peek_tag()? {
            Tag::BoolTrue => true,
            Tag::BoolFalse => false,
            found => return Err(Error::UnexpectedTag { expected: Tag::BoolTrue, found }),
        };
        self.take(1)?;
        Ok(value)
    }

    pub fn unit(&mut self) -> Result<()> {
        self.expect(Tag::Unit)
    }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::String)?;
        let len = self.length()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        let len = self.length()?;
        self.take(len)
    }

    fn enter(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect(expected)?;
        let len = self.length()?;
        Ok(Decoder::new(self.take(len)?))
    }

    /// Enters a list and iterates its items.
    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    /// Enters a map and iterates its `(key, value)` entries.
    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Decodes a variant into `(name, payload)`.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter(Tag::Variant)?;
        let name = inner.str()?;
        Ok((name, inner))
    }
}

/// Iterator over the items of a list. Each item is its own decoder view.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = Result<Decoder<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.dec.remaining() == 0 {
            return None;
        }
        let mut probe = self.dec.clone();
        if let Err(e) = probe.skip() {
            // Poison the iterator so a malformed tail is reported once.
            self.dec = Decoder::new(&[]);
            return Some(Err(e));
        }
        let len = self.dec.remaining() - probe.remaining();
        Some(self.dec.take(len).map(Decoder::new))
    }
}

/// Iterator over the variant entries of a map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(key, value)` for the next entry, or `None` at the end of the map.
    pub fn next_entry(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        self.dec.variant().map(Some)
    }
}
