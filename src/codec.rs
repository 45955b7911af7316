//! Binary record codec.
//!
//! Each log call site serializes its arguments into a tightly packed blob
//! and stores, next to it, a function pointer monomorphized for exactly that
//! call site's argument types. The backend never inspects argument types at
//! runtime: it calls the stored decoder, which walks the blob in declaration
//! order and renders text through the format string baked into it.
//!
//! Per-type encodings:
//! - scalars: raw host-endian bytes, `size_of` wide
//! - runtime strings: 2-byte length + contents, copied, truncated at 65 535
//! - [`StaticStr`]: 2-byte length + 8-byte pointer to the `'static` bytes

use std::fmt::Write as _;
use std::mem;
use std::ptr;

use crate::level::Level;
use crate::stage::StageWriter;

/// Decoder signature stored inside every record.
///
/// Takes the argument blob and the writer to render into. Decoders must not
/// fail: format strings are validated at compile time and blobs are only
/// ever produced by the paired encoder.
pub type DecodeFn = fn(&[u8], &mut StageWriter<'_>);

/// Fixed header at the start of every record.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct Metadata {
    pub timestamp: u64,
    pub decoder: DecodeFn,
    pub args_size: u32,
    pub level: Level,
}

pub(crate) const METADATA_SIZE: usize = mem::size_of::<Metadata>();

impl Metadata {
    /// Writes the header into the start of `buf`, unaligned.
    #[inline]
    pub(crate) fn write_to(self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= METADATA_SIZE);
        // Records are tightly packed in the queue, so the destination has no
        // alignment guarantee.
        unsafe { ptr::write_unaligned(buf.as_mut_ptr() as *mut Metadata, self) }
    }

    /// Reads a header back out of record bytes.
    ///
    /// The bytes must have been produced by [`write_to`](Metadata::write_to)
    /// in this process; in particular the embedded function pointer is only
    /// meaningful within the process that encoded it.
    #[inline]
    pub(crate) fn read_from(buf: &[u8]) -> Metadata {
        debug_assert!(buf.len() >= METADATA_SIZE);
        unsafe { ptr::read_unaligned(buf.as_ptr() as *const Metadata) }
    }
}

/// Sequential reader over an argument blob.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Takes the next `n` bytes. Panics on overrun, which can only happen on
    /// a blob not produced by the paired encoder.
    #[inline]
    pub fn take(&mut self, n: usize) -> &'a [u8] {
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Longest runtime string payload; longer strings are truncated on a UTF-8
/// boundary so the length still fits the 2-byte prefix.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A value that can be captured on the hot path and rendered later by the
/// backend thread.
///
/// `encoded_size` and `encode` run on the producer; the associated `decode`
/// runs on the consumer against bytes the encoder wrote.
pub trait Arg {
    fn encoded_size(&self) -> usize;

    /// Writes the encoded form into the front of `buf`; returns the number
    /// of bytes written, which equals `encoded_size`.
    fn encode(&self, buf: &mut [u8]) -> usize;

    /// Reads one value of this type from `cur` and renders it into `out`.
    fn decode(cur: &mut Cursor<'_>, out: &mut StageWriter<'_>);
}

macro_rules! impl_scalar_arg {
    ($($ty:ty),* $(,)?) => {$(
        impl Arg for $ty {
            #[inline(always)]
            fn encoded_size(&self) -> usize {
                mem::size_of::<$ty>()
            }

            #[inline(always)]
            fn encode(&self, buf: &mut [u8]) -> usize {
                const N: usize = mem::size_of::<$ty>();
                buf[..N].copy_from_slice(&self.to_ne_bytes());
                N
            }

            fn decode(cur: &mut Cursor<'_>, out: &mut StageWriter<'_>) {
                const N: usize = mem::size_of::<$ty>();
                let mut raw = [0u8; N];
                raw.copy_from_slice(cur.take(N));
                let _ = write!(out, "{}", <$ty>::from_ne_bytes(raw));
            }
        }
    )*};
}

impl_scalar_arg!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);

impl Arg for bool {
    #[inline(always)]
    fn encoded_size(&self) -> usize {
        1
    }

    #[inline(always)]
    fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = *self as u8;
        1
    }

    fn decode(cur: &mut Cursor<'_>, out: &mut StageWriter<'_>) {
        let v = cur.take(1)[0] != 0;
        let _ = write!(out, "{}", v);
    }
}

impl Arg for char {
    #[inline(always)]
    fn encoded_size(&self) -> usize {
        4
    }

    #[inline(always)]
    fn encode(&self, buf: &mut [u8]) -> usize {
        buf[..4].copy_from_slice(&(*self as u32).to_ne_bytes());
        4
    }

    fn decode(cur: &mut Cursor<'_>, out: &mut StageWriter<'_>) {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(cur.take(4));
        let v = char::from_u32(u32::from_ne_bytes(raw)).unwrap_or(char::REPLACEMENT_CHARACTER);
        let _ = write!(out, "{}", v);
    }
}

/// Runtime strings take the copy path: length prefix plus contents. This is
/// the safe default for every `&str`, whatever its lifetime.
impl Arg for str {
    #[inline(always)]
    fn encoded_size(&self) -> usize {
        2 + truncate_utf8(self, MAX_STRING_LEN).len()
    }

    #[inline(always)]
    fn encode(&self, buf: &mut [u8]) -> usize {
        let payload = truncate_utf8(self, MAX_STRING_LEN).as_bytes();
        buf[..2].copy_from_slice(&(payload.len() as u16).to_ne_bytes());
        buf[2..2 + payload.len()].copy_from_slice(payload);
        2 + payload.len()
    }

    fn decode(cur: &mut Cursor<'_>, out: &mut StageWriter<'_>) {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(cur.take(2));
        let len = u16::from_ne_bytes(raw) as usize;
        let bytes = cur.take(len);
        match std::str::from_utf8(bytes) {
            Ok(s) => out.append_str(s),
            Err(_) => out.append_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

impl Arg for String {
    #[inline(always)]
    fn encoded_size(&self) -> usize {
        self.as_str().encoded_size()
    }

    #[inline(always)]
    fn encode(&self, buf: &mut [u8]) -> usize {
        self.as_str().encode(buf)
    }

    fn decode(cur: &mut Cursor<'_>, out: &mut StageWriter<'_>) {
        <str as Arg>::decode(cur, out)
    }
}

/// A string with proven `'static` storage, captured as a pointer instead of
/// a copy.
///
/// The constructor is the proof: only a `&'static str` fits, so the pointer
/// stored in the record outlives every read of it. Plain `&str` arguments
/// cannot take this path by accident; they always go through the copying
/// [`str`] encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticStr(pub &'static str);

impl Arg for StaticStr {
    #[inline(always)]
    fn encoded_size(&self) -> usize {
        2 + 8
    }

    #[inline(always)]
    fn encode(&self, buf: &mut [u8]) -> usize {
        let payload = truncate_utf8(self.0, MAX_STRING_LEN);
        buf[..2].copy_from_slice(&(payload.len() as u16).to_ne_bytes());
        buf[2..10].copy_from_slice(&(payload.as_ptr() as u64).to_ne_bytes());
        10
    }

    fn decode(cur: &mut Cursor<'_>, out: &mut StageWriter<'_>) {
        let mut raw2 = [0u8; 2];
        raw2.copy_from_slice(cur.take(2));
        let len = u16::from_ne_bytes(raw2) as usize;
        let mut raw8 = [0u8; 8];
        raw8.copy_from_slice(cur.take(8));
        let addr = u64::from_ne_bytes(raw8);
        // These bytes were encoded from a `&'static str`: the storage lives
        // for the whole process and `len` lands on a char boundary.
        let s = unsafe {
            std::str::from_utf8_unchecked(std::slice::from_raw_parts(addr as *const u8, len))
        };
        out.append_str(s);
    }
}

/// Forwarding impl so argument tuples built from references (`(&T0, &T1)`)
/// encode through the underlying type.
impl<T: Arg + ?Sized> Arg for &T {
    #[inline(always)]
    fn encoded_size(&self) -> usize {
        (**self).encoded_size()
    }

    #[inline(always)]
    fn encode(&self, buf: &mut [u8]) -> usize {
        (**self).encode(buf)
    }

    fn decode(cur: &mut Cursor<'_>, out: &mut StageWriter<'_>) {
        T::decode(cur, out)
    }
}

/// A full argument tuple for one call site.
///
/// The call-site macro instantiates a decoder generic over the concrete
/// tuple type, which is how one monomorphized [`DecodeFn`] per
/// `(format, argument types)` pair comes to exist.
pub trait ArgPack {
    fn encoded_size(&self) -> usize;

    /// Encodes all arguments in declaration order into the front of `buf`.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes all arguments in declaration order, interleaving them with
    /// the literal chunks of `fmt`.
    fn decode_format(fmt: &'static str, cur: &mut Cursor<'_>, out: &mut StageWriter<'_>);
}

impl ArgPack for () {
    #[inline(always)]
    fn encoded_size(&self) -> usize {
        0
    }

    #[inline(always)]
    fn encode(&self, _buf: &mut [u8]) {}

    fn decode_format(fmt: &'static str, _cur: &mut Cursor<'_>, out: &mut StageWriter<'_>) {
        crate::format::FormatWalker::new(fmt).emit_rest(out);
    }
}

macro_rules! impl_arg_pack {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Arg),+> ArgPack for ($($name,)+) {
            #[inline(always)]
            fn encoded_size(&self) -> usize {
                0 $(+ self.$idx.encoded_size())+
            }

            #[inline(always)]
            fn encode(&self, buf: &mut [u8]) {
                let mut pos = 0;
                $(
                    pos += self.$idx.encode(&mut buf[pos..]);
                )+
                let _ = pos;
            }

            fn decode_format(
                fmt: &'static str,
                cur: &mut Cursor<'_>,
                out: &mut StageWriter<'_>,
            ) {
                let mut walker = crate::format::FormatWalker::new(fmt);
                $(
                    walker.emit_until_placeholder(out);
                    $name::decode(cur, out);
                )+
                walker.emit_rest(out);
            }
        }
    };
}

impl_arg_pack!(A0: 0);
impl_arg_pack!(A0: 0, A1: 1);
impl_arg_pack!(A0: 0, A1: 1, A2: 2);
impl_arg_pack!(A0: 0, A1: 1, A2: 2, A3: 3);
impl_arg_pack!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_arg_pack!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
impl_arg_pack!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
impl_arg_pack!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);
impl_arg_pack!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7, A8: 8);
impl_arg_pack!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7, A8: 8, A9: 9);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::OutputStage;

    fn decode_to_string<P: ArgPack>(fmt: &'static str, blob: &[u8]) -> String {
        let mut stage = OutputStage::new(256);
        let mut writer = stage.writer();
        let mut cur = Cursor::new(blob);
        P::decode_format(fmt, &mut cur, &mut writer);
        let mut out = vec![0u8; 4096];
        let n = stage.read(&mut out);
        String::from_utf8(out[..n].to_vec()).unwrap()
    }

    #[test]
    fn test_metadata_round_trip() {
        fn nop(_: &[u8], _: &mut StageWriter<'_>) {}

        let meta = Metadata {
            timestamp: 0x1122_3344_5566_7788,
            decoder: nop,
            args_size: 42,
            level: Level::Warn,
        };

        // Offset by one to exercise the unaligned path.
        let mut buf = vec![0u8; METADATA_SIZE + 1];
        meta.write_to(&mut buf[1..]);
        let back = Metadata::read_from(&buf[1..]);

        assert_eq!(back.timestamp, meta.timestamp);
        assert_eq!(back.args_size, meta.args_size);
        assert_eq!(back.level, meta.level);
        assert_eq!(back.decoder as usize, meta.decoder as usize);
    }

    #[test]
    fn test_scalar_round_trip() {
        let pack = (42i32, 3.25f64, true);
        let mut blob = vec![0u8; pack.encoded_size()];
        pack.encode(&mut blob);

        let text = decode_to_string::<(i32, f64, bool)>("i={} f={} b={}", &blob);
        assert_eq!(text, format!("i={} f={} b={}", 42i32, 3.25f64, true));
    }

    #[test]
    fn test_string_copy_round_trip() {
        let runtime = String::from("runtime value");
        let pack = (runtime.as_str(),);
        let mut blob = vec![0u8; pack.encoded_size()];
        pack.encode(&mut blob);

        let text = decode_to_string::<(&str,)>("msg={}", &blob);
        assert_eq!(text, "msg=runtime value");
    }

    #[test]
    fn test_static_str_pointer_round_trip() {
        let pack = (StaticStr("static value"),);
        assert_eq!(pack.encoded_size(), 10);
        let mut blob = vec![0u8; pack.encoded_size()];
        pack.encode(&mut blob);

        let text = decode_to_string::<(StaticStr,)>("msg={}", &blob);
        assert_eq!(text, "msg=static value");
    }

    #[test]
    fn test_escaped_braces() {
        let pack = (7u32,);
        let mut blob = vec![0u8; pack.encoded_size()];
        pack.encode(&mut blob);

        let text = decode_to_string::<(u32,)>("{{x}} = {}", &blob);
        assert_eq!(text, "{x} = 7");
    }

    #[test]
    fn test_string_truncation_boundary() {
        let exact = "a".repeat(MAX_STRING_LEN);
        assert_eq!(exact.as_str().encoded_size(), 2 + MAX_STRING_LEN);

        let over = "a".repeat(MAX_STRING_LEN + 1);
        assert_eq!(over.as_str().encoded_size(), 2 + MAX_STRING_LEN);

        // Truncation backs off to a char boundary: a 2-byte char straddling
        // the limit is dropped entirely.
        let mut tricky = "a".repeat(MAX_STRING_LEN - 1);
        tricky.push('é');
        assert_eq!(tricky.as_str().encoded_size(), 2 + MAX_STRING_LEN - 1);
    }

    #[test]
    fn test_reference_forwarding() {
        let value = 99u64;
        let pack = (&&value,);
        let mut blob = vec![0u8; pack.encoded_size()];
        pack.encode(&mut blob);

        let text = decode_to_string::<(&&u64,)>("v={}", &blob);
        assert_eq!(text, "v=99");
    }
}
