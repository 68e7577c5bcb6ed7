use anyhow::anyhow;
use bytes::{Buf, BufMut, BytesMut};

/// Appends the string's bytes followed by a terminating zero byte.
pub fn put_c_string(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Reads bytes up to (and consuming) the next zero byte. Anything after the terminator, e.g.
///  padding, is left in the buffer.
pub fn try_get_c_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let mut result = Vec::new();
    loop {
        match buf.try_get_u8() {
            Ok(0) => break,
            Ok(b) => result.push(b),
            Err(_) => return Err(anyhow!("string is not zero terminated")),
        }
    }

    let s = String::from_utf8(result)?;
    Ok(s)
}

/// Fills the buffer with zero bytes up to `len`. A buffer that is already longer is left
///  unchanged - callers check lengths before they start writing.
pub fn pad_to(buf: &mut BytesMut, len: usize) {
    if buf.len() < len {
        buf.put_bytes(0, len - buf.len());
    }
}
