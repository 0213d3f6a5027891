//! The [`Reader`] — a sticky-error cursor over a wire-encoded buffer.

use std::fmt;

/// Errors that can occur while reading a wire buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireError {
    /// Ran out of bytes mid-field.
    ShortRead,
    /// The alignment padding ran past the end of the buffer.
    BadPadding,
    /// Expected one constructor id, decoded another.
    WrongConstructor {
        /// The id the caller expected.
        expected: u32,
        /// The id actually present in the buffer.
        got: u32,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortRead => write!(f, "unexpected end of buffer"),
            Self::BadPadding => write!(f, "string padding runs past the buffer"),
            Self::WrongConstructor { expected, got } => {
                write!(f, "wrong constructor: expected {expected:#010x}, got {got:#010x}")
            }
        }
    }
}

impl std::error::Error for WireError {}

/// A cursor over an in-memory buffer with a sticky error.
///
/// Once a read fails, the error is latched and every subsequent read returns
/// a zero value without advancing. Callers decode all fields and check
/// [`Reader::finish`] (or [`Reader::error`]) once.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    err: Option<WireError>,
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, err: None }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The latched error, if any.
    pub fn error(&self) -> Option<&WireError> {
        self.err.as_ref()
    }

    /// Latch an error from outside the reader (e.g. a semantic check).
    pub fn fail(&mut self, err: WireError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// Finish reading: `Ok(())` if no error was latched.
    pub fn finish(self) -> Result<(), WireError> {
        match self.err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.err.is_some() {
            return None;
        }
        if self.pos + n > self.buf.len() {
            self.err = Some(WireError::ShortRead);
            return None;
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(s)
    }

    /// Read a little-endian `i32` (0 after an error).
    pub fn i32(&mut self) -> i32 {
        self.take(4)
            .map(|s| i32::from_le_bytes(s.try_into().unwrap()))
            .unwrap_or(0)
    }

    /// Read a little-endian `u32` (0 after an error).
    pub fn u32(&mut self) -> u32 {
        self.take(4)
            .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
            .unwrap_or(0)
    }

    /// Read a little-endian `i64` (0 after an error).
    pub fn i64(&mut self) -> i64 {
        self.take(8)
            .map(|s| i64::from_le_bytes(s.try_into().unwrap()))
            .unwrap_or(0)
    }

    /// Read a little-endian IEEE-754 `f64` (0.0 after an error).
    pub fn f64(&mut self) -> f64 {
        self.take(8)
            .map(|s| f64::from_le_bytes(s.try_into().unwrap()))
            .unwrap_or(0.0)
    }

    /// Read exactly `n` raw bytes (empty after an error).
    pub fn raw(&mut self, n: usize) -> Vec<u8> {
        self.take(n).map(|s| s.to_vec()).unwrap_or_default()
    }

    /// Read a fixed-size array (zeroed after an error).
    pub fn array<const N: usize>(&mut self) -> [u8; N] {
        match self.take(N) {
            Some(s) => s.try_into().unwrap(),
            None => [0u8; N],
        }
    }

    /// Read a `boolTrue`/`boolFalse` constructor (false after an error).
    pub fn bool(&mut self) -> bool {
        match self.u32() {
            crate::BOOL_TRUE_ID => true,
            crate::BOOL_FALSE_ID => false,
            _ if self.err.is_some() => false,
            got => {
                self.fail(WireError::WrongConstructor { expected: crate::BOOL_TRUE_ID, got });
                false
            }
        }
    }

    /// Read a length-prefixed byte string and skip its alignment padding.
    pub fn bytes(&mut self) -> Vec<u8> {
        if self.err.is_some() {
            return Vec::new();
        }
        let first = match self.take(1) {
            Some(s) => s[0],
            None => return Vec::new(),
        };
        let (len, header) = if first < 0xfe {
            (first as usize, 1usize)
        } else {
            match self.take(3) {
                Some(s) => (s[0] as usize | (s[1] as usize) << 8 | (s[2] as usize) << 16, 4usize),
                None => return Vec::new(),
            }
        };
        let data = match self.take(len) {
            Some(s) => s.to_vec(),
            None => return Vec::new(),
        };
        let pad = (4 - (header + len) % 4) % 4;
        if self.pos + pad > self.buf.len() {
            self.err = Some(WireError::BadPadding);
            return Vec::new();
        }
        self.pos += pad;
        data
    }

    /// Read a byte string as UTF-8 (lossy).
    pub fn string(&mut self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Read a big integer magnitude (big-endian bytes, no sign).
    pub fn big_bytes(&mut self) -> Vec<u8> {
        self.bytes()
    }

    /// Read a boxed vector of `i64`.
    pub fn vec_i64(&mut self) -> Vec<i64> {
        self.expect(crate::VECTOR_ID);
        let count = self.i32();
        if self.err.is_some() || count < 0 {
            if count < 0 {
                self.fail(WireError::ShortRead);
            }
            return Vec::new();
        }
        (0..count).map(|_| self.i64()).collect()
    }

    /// Read a `u32` and latch `WrongConstructor` unless it equals `expected`.
    pub fn expect(&mut self, expected: u32) {
        let got = self.u32();
        if self.err.is_none() && got != expected {
            self.err = Some(WireError::WrongConstructor { expected, got });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Writer;

    #[test]
    fn sticky_error_reads_return_zero() {
        let mut r = Reader::new(&[0x01, 0x02]);
        assert_eq!(r.i32(), 0);
        assert_eq!(r.error(), Some(&WireError::ShortRead));
        // further reads are no-ops
        assert_eq!(r.i64(), 0);
        assert_eq!(r.bytes(), Vec::<u8>::new());
        assert_eq!(r.finish(), Err(WireError::ShortRead));
    }

    #[test]
    fn expect_latches_wrong_constructor() {
        let mut w = Writer::new();
        w.u32(0xdeadbeef);
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf);
        r.expect(0x1cb5c415);
        assert_eq!(
            r.finish(),
            Err(WireError::WrongConstructor { expected: 0x1cb5c415, got: 0xdeadbeef })
        );
    }
}
