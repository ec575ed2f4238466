use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{Error, Result};

// Frame layout
// total_len(u32 be) + header_len(varint) + header + body_len(varint) + body
// total_len covers everything after itself.

/// Frames larger than this are treated as a protocol violation.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// One length-delimited `(header, body)` pair off the wire. The header is an
/// opaque serialized request/response header; the body is the application
/// payload and is empty on non-success responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Bytes,
    pub body: Bytes,
}

fn varint_size(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0xfff_ffff => 4,
        _ => 5,
    }
}

fn put_varint(dst: &mut BytesMut, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

// Returns (value, encoded_len). The caller guarantees `src` holds a complete
// frame, so running out of bytes here is malformed input, not a short read.
fn get_varint(src: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in src.iter().enumerate() {
        if i >= 5 {
            break;
        }
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::Protocol("malformed varint in frame".into()))
}

/// Append one frame carrying `header` and `body` to `dst`.
pub fn encode(header: &[u8], body: &[u8], dst: &mut BytesMut) {
    let total = varint_size(header.len() as u32)
        + header.len()
        + varint_size(body.len() as u32)
        + body.len();
    dst.reserve(4 + total);
    dst.put_u32(total as u32);
    put_varint(dst, header.len() as u32);
    dst.extend_from_slice(header);
    put_varint(dst, body.len() as u32);
    dst.extend_from_slice(body);
}

/// Consume the longest complete frame from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. On a malformed frame the
/// buffer is left untouched; nothing is ever partially consumed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let total = BigEndian::read_u32(&buf[..4]) as usize;
    if total > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!("frame of {total} bytes is too large")));
    }
    if buf.len() < 4 + total {
        return Ok(None);
    }

    // Validate the whole layout against the payload slice before touching
    // the buffer.
    let payload = &buf[4..4 + total];
    let (header_len, header_prefix) = get_varint(payload)?;
    let header_len = header_len as usize;
    let body_off = header_prefix + header_len;
    if body_off > total {
        return Err(Error::Protocol("frame header overruns frame".into()));
    }
    let (body_len, body_prefix) = get_varint(&payload[body_off..])?;
    let body_len = body_len as usize;
    if body_off + body_prefix + body_len != total {
        return Err(Error::Protocol(format!(
            "frame length mismatch: declared {total}, contents {}",
            body_off + body_prefix + body_len
        )));
    }

    buf.advance(4);
    let payload = buf.split_to(total).freeze();
    let header = payload.slice(header_prefix..body_off);
    let body = payload.slice(body_off + body_prefix..);
    Ok(Some(Frame { header, body }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    fn encoded(header: &[u8], body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode(header, body, &mut buf);
        buf
    }

    #[test]
    fn round_trip() {
        let mut buf = encoded(b"header-bytes", b"body-bytes");
        let frame = decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.header[..], b"header-bytes");
        assert_eq!(&frame.body[..], b"body-bytes");
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_body_round_trip() {
        let mut buf = encoded(b"h", b"");
        let frame = decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame.header[..], b"h");
        assert!(frame.body.is_empty());
    }

    #[test]
    fn need_more_on_every_split_point() {
        let full = encoded(b"some header", b"and a body");
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(
                decode(&mut partial).unwrap().is_none(),
                "cut at {cut} should need more bytes"
            );
            assert_eq!(partial.len(), cut, "short input must not be consumed");
        }
    }

    #[test]
    fn two_frames_back_to_back() {
        let mut buf = encoded(b"h1", b"b1");
        let second = encoded(b"h2", b"b2");
        buf.extend_from_slice(&second);

        let first = decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first.header[..], b"h1");
        let next = decode(&mut buf).unwrap().unwrap();
        assert_eq!(&next.body[..], b"b2");
        assert!(decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn length_mismatch_is_malformed() {
        let mut buf = encoded(b"head", b"body");
        // grow the declared total without providing the bytes it promises
        let total = BigEndian::read_u32(&buf[..4]);
        BigEndian::write_u32(&mut buf[..4], total - 1);
        let before = buf.clone();
        assert!(decode(&mut buf).is_err());
        assert_eq!(buf, before, "malformed input must not be consumed");
    }

    #[test]
    fn header_overrun_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        // header_len claims 200 bytes inside a 3 byte frame
        buf.put_u8(0xc8);
        buf.put_u8(0x01);
        buf.put_u8(0x00);
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn oversized_frame_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert!(decode(&mut buf).is_err());
    }

    #[test]
    fn varint_boundaries() {
        for value in [0u32, 1, 0x7f, 0x80, 0x3fff, 0x4000, 0x1f_ffff, 0x20_0000] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), varint_size(value));
            let (decoded, used) = get_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, buf.len());
        }
    }

    quickcheck! {
        fn prop_round_trip(header: Vec<u8>, body: Vec<u8>) -> bool {
            let mut buf = encoded(&header, &body);
            match decode(&mut buf) {
                Ok(Some(frame)) => {
                    frame.header[..] == header[..]
                        && frame.body[..] == body[..]
                        && buf.is_empty()
                }
                _ => false,
            }
        }
    }
}
