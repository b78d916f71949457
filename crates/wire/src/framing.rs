//! Length-prefixed framing.
//!
//! Each frame is a 4-byte little-endian payload length followed by the
//! encoded [`Envelope`]. A stream that ends exactly on a frame boundary is a
//! clean close; ending anywhere else is a transport fault.

use std::io::{ErrorKind, Read, Write};

use crate::{Envelope, WireError};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Fill `buf` from `reader`, returning how many bytes were read before end
/// of stream.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, WireError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Read one frame payload.
///
/// Returns `Ok(None)` if the stream ended before any byte of a new frame.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, WireError> {
    let mut header = [0u8; HEADER_LEN];
    match fill(reader, &mut header)? {
        0 => return Ok(None),
        HEADER_LEN => {}
        read => {
            return Err(WireError::Truncated {
                read,
                expected: HEADER_LEN,
            });
        }
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(WireError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    let read = fill(reader, &mut payload)?;
    if read != len {
        return Err(WireError::Truncated {
            read,
            expected: len,
        });
    }
    Ok(Some(payload))
}

/// Write one frame and flush it.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read and decode one envelope.
pub fn read_envelope<R: Read>(reader: &mut R, max_len: usize) -> Result<Option<Envelope>, WireError> {
    read_frame(reader, max_len)?
        .map(|bytes| Envelope::from_bytes(&bytes))
        .transpose()
}

/// Encode and write one envelope.
pub fn write_envelope<W: Write>(writer: &mut W, envelope: &Envelope) -> Result<(), WireError> {
    write_frame(writer, &envelope.to_bytes())
}
