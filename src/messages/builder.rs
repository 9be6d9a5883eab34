//! Low-level frame assembly.
//!
//! Every backend message is one type byte, a big-endian i32 length that
//! counts itself, and a payload. The builder back-patches the length on
//! `finish`, so callers never compute frame sizes by hand.

use bytes::{BufMut, BytesMut};

pub struct MessageBuilder {
    buf: BytesMut,
    /// Offset of the length field of the frame currently being built.
    len_at: usize,
}

impl MessageBuilder {
    pub fn new() -> Self {
        MessageBuilder {
            buf: BytesMut::with_capacity(64),
            len_at: 0,
        }
    }

    pub fn with_buffer(buf: BytesMut) -> Self {
        let len_at = buf.len();
        MessageBuilder { buf, len_at }
    }

    /// Open a frame of the given type. The length placeholder is patched by
    /// [`finish`](Self::finish).
    pub fn start(&mut self, message_type: u8) -> &mut Self {
        self.buf.put_u8(message_type);
        self.len_at = self.buf.len();
        self.buf.put_i32(0);
        self
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_i16(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16(value);
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    /// Append a nul-terminated string.
    pub fn put_cstr(&mut self, value: &str) -> &mut Self {
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
        self
    }

    /// Close the current frame: write the real length over the placeholder.
    pub fn finish(&mut self) -> &mut Self {
        let len = (self.buf.len() - self.len_at) as i32;
        self.buf[self.len_at..self.len_at + 4].copy_from_slice(&len.to_be_bytes());
        self
    }

    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_patches_length() {
        let mut builder = MessageBuilder::new();
        builder.start(b'Z').put_u8(b'I').finish();
        let bytes = builder.into_bytes();
        assert_eq!(&bytes[..], &[b'Z', 0, 0, 0, 5, b'I']);
    }

    #[test]
    fn chains_multiple_frames() {
        let mut builder = MessageBuilder::new();
        builder.start(b'1').finish();
        builder.start(b'2').finish();
        let bytes = builder.into_bytes();
        assert_eq!(&bytes[..], &[b'1', 0, 0, 0, 4, b'2', 0, 0, 0, 4]);
    }

    #[test]
    fn cstr_is_nul_terminated() {
        let mut builder = MessageBuilder::new();
        builder.start(b'C').put_cstr("SELECT 1").finish();
        let bytes = builder.into_bytes();
        assert_eq!(bytes[bytes.len() - 1], 0);
        assert_eq!(&bytes[5..13], b"SELECT 1");
    }
}
