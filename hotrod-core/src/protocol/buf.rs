//! Variable-length wire primitives shared by the encoder and decoder.
//!
//! Integers travel as 7-bit groups with a continuation high bit, low group
//! first; arrays and strings are varint-length-prefixed. Fixed-width fields
//! are big-endian.

use bytes::{Buf, BufMut, BytesMut};

/// Writes a variable-length unsigned 32-bit integer.
pub fn write_vint(buf: &mut BytesMut, mut value: u32) {
    while value & !0x7F != 0 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Writes a variable-length unsigned 64-bit integer.
pub fn write_vlong(buf: &mut BytesMut, mut value: u64) {
    while value & !0x7F != 0 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Writes a length-prefixed byte array.
pub fn write_array(buf: &mut BytesMut, data: &[u8]) {
    write_vint(buf, data.len() as u32);
    buf.put_slice(data);
}

/// Writes a length-prefixed UTF-8 string.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_array(buf, s.as_bytes());
}

/// A non-consuming reader over a byte slice.
///
/// Every `read_*` method returns `None` when the slice does not hold the
/// complete field. The caller advances the real buffer by [`consumed`]
/// only after the sub-field it was parsing is complete, which is what makes
/// the response decoder resumable: an interrupted parse leaves the source
/// buffer untouched and is simply re-attempted when more bytes arrive.
///
/// [`consumed`]: WireCursor::consumed
#[derive(Debug)]
pub struct WireCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireCursor<'a> {
    /// Creates a cursor over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bytes successfully read so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    /// Reads a big-endian unsigned 16-bit integer.
    pub fn read_u16(&mut self) -> Option<u16> {
        let bytes = self.data.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a big-endian signed 64-bit integer.
    pub fn read_i64(&mut self) -> Option<i64> {
        let bytes = self.data.get(self.pos..self.pos + 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        self.pos += 8;
        Some(i64::from_be_bytes(raw))
    }

    /// Reads a variable-length unsigned 32-bit integer.
    pub fn read_vint(&mut self) -> Option<u32> {
        let mark = self.pos;
        let mut value: u32 = 0;
        let mut shift = 0;
        loop {
            let b = match self.data.get(self.pos) {
                Some(b) => *b,
                None => {
                    self.pos = mark;
                    return None;
                }
            };
            self.pos += 1;
            value |= ((b & 0x7F) as u32) << shift;
            if b & 0x80 == 0 {
                return Some(value);
            }
            shift += 7;
            if shift >= 35 {
                // Overlong encoding. Drain through the terminating byte so
                // the cursor stays aligned with the next field; the caller
                // rejects the truncated value.
                return self.drain_varint(mark, value);
            }
        }
    }

    /// Reads a variable-length unsigned 64-bit integer.
    pub fn read_vlong(&mut self) -> Option<u64> {
        let mark = self.pos;
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let b = match self.data.get(self.pos) {
                Some(b) => *b,
                None => {
                    self.pos = mark;
                    return None;
                }
            };
            self.pos += 1;
            value |= ((b & 0x7F) as u64) << shift;
            if b & 0x80 == 0 {
                return Some(value);
            }
            shift += 7;
            if shift >= 70 {
                return self.drain_varint(mark, value);
            }
        }
    }

    /// Skips the remaining continuation bytes of an overlong varint.
    ///
    /// Returns `None` (with the cursor rewound to `mark`) when the buffer
    /// ends before the terminating byte arrives, so a resumed parse retries
    /// from the start of the field.
    fn drain_varint<T>(&mut self, mark: usize, value: T) -> Option<T> {
        loop {
            let b = match self.data.get(self.pos) {
                Some(b) => *b,
                None => {
                    self.pos = mark;
                    return None;
                }
            };
            self.pos += 1;
            if b & 0x80 == 0 {
                return Some(value);
            }
        }
    }

    /// Reads a length-prefixed byte array.
    pub fn read_array(&mut self) -> Option<Vec<u8>> {
        let mark = self.pos;
        let len = match self.read_vint() {
            Some(len) => len as usize,
            None => {
                self.pos = mark;
                return None;
            }
        };
        match self.data.get(self.pos..self.pos + len) {
            Some(bytes) => {
                self.pos += len;
                Some(bytes.to_vec())
            }
            None => {
                self.pos = mark;
                None
            }
        }
    }

    /// Reads a length-prefixed string, replacing invalid UTF-8.
    pub fn read_string(&mut self) -> Option<String> {
        self.read_array()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

// Committing variants: parse one field and advance the buffer only when the
// field is complete. These are the checkpoint primitive of the resumable
// decoder: a `None` leaves the buffer exactly as it was.

/// Takes one byte off `buf` if present.
pub fn take_u8(buf: &mut BytesMut) -> Option<u8> {
    commit(buf, |cursor| cursor.read_u8())
}

/// Takes a big-endian `u16` off `buf` if complete.
pub fn take_u16(buf: &mut BytesMut) -> Option<u16> {
    commit(buf, |cursor| cursor.read_u16())
}

/// Takes a big-endian `i64` off `buf` if complete.
pub fn take_i64(buf: &mut BytesMut) -> Option<i64> {
    commit(buf, |cursor| cursor.read_i64())
}

/// Takes a varint off `buf` if complete.
pub fn take_vint(buf: &mut BytesMut) -> Option<u32> {
    commit(buf, |cursor| cursor.read_vint())
}

/// Takes a varlong off `buf` if complete.
pub fn take_vlong(buf: &mut BytesMut) -> Option<u64> {
    commit(buf, |cursor| cursor.read_vlong())
}

/// Takes a length-prefixed array off `buf` if complete.
pub fn take_array(buf: &mut BytesMut) -> Option<Vec<u8>> {
    commit(buf, |cursor| cursor.read_array())
}

/// Takes a length-prefixed string off `buf` if complete.
pub fn take_string(buf: &mut BytesMut) -> Option<String> {
    commit(buf, |cursor| cursor.read_string())
}

fn commit<T>(buf: &mut BytesMut, read: impl FnOnce(&mut WireCursor<'_>) -> Option<T>) -> Option<T> {
    let mut cursor = WireCursor::new(buf);
    let value = read(&mut cursor)?;
    let consumed = cursor.consumed();
    buf.advance(consumed);
    Some(value)
}
