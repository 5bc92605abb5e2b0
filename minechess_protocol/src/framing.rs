// Length-prefixed text frames for stream transports.
//
// The peer protocol is defined in terms of opaque strings; datagram-style
// transports carry one envelope per message natively, but a byte stream
// (the TCP link in `minechess_peer::tcp`) needs delimiting. Each frame is a
// 4-byte big-endian length followed by that many bytes of UTF-8.
//
// `MAX_FRAME_SIZE` bounds allocation from a corrupt length prefix. STATE_SYNC
// snapshots are the largest frames and stay far below it.

use std::io::{self, Read, Write};

/// Largest frame accepted or produced (16 MiB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

pub fn write_frame<W: Write>(writer: &mut W, text: &str) -> io::Result<()> {
    let len = text.len();
    if len > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    #[expect(clippy::cast_possible_truncation)]
    let prefix = (len as u32).to_be_bytes();
    writer.write_all(&prefix)?;
    writer.write_all(text.as_bytes())?;
    writer.flush()
}

/// Read one frame. A stream that ends between frames yields `UnexpectedEof`;
/// an oversized prefix or non-UTF-8 body yields `InvalidData`.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix);
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    String::from_utf8(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
