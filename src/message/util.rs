use std::io::{self, prelude::*};

/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
///
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// Read a usize (sent as a little-endian u64) out of the given stream.
///
pub fn read_usize<R: Read>(stream: &mut R) -> io::Result<usize> {
    Ok(u64::from_le_bytes(read_bytes_array(stream)?) as usize)
}

/// Write a usize to the given stream as a little-endian u64.
///
pub fn write_usize<W: Write>(stream: &mut W, value: usize) -> io::Result<()> {
    stream.write_all(&(value as u64).to_le_bytes())
}

/// Read the given number of bytes from a stream, into a vec.
///
pub fn read_bytes_vec<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    read_bytes_into(stream, &mut buffer)?;
    Ok(buffer)
}

/// Read the given (const) number of bytes from a stream, into an array.
///
pub fn read_bytes_array<R: Read, const SIZE: usize>(stream: &mut R) -> io::Result<[u8; SIZE]> {
    let mut buffer = [0; SIZE];
    read_bytes_into(stream, &mut buffer)?;
    Ok(buffer)
}

/// Fill up the given buffer by reading bytes from a stream. A stream that
/// ends first yields `UnexpectedEof`.
///
pub fn read_bytes_into<R: Read>(stream: &mut R, buffer: &mut [u8]) -> io::Result<()> {
    let mut cursor = 0;
    while cursor < buffer.len() {
        match stream.read(&mut buffer[cursor..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} bytes", cursor, buffer.len()),
                ))
            }
            Ok(n) => cursor += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
