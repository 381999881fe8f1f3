//! Byte-counting writer adapter

use std::io::{self, Write};

/// Wraps a writer and counts the bytes it accepts.
///
/// Every write is forwarded unchanged; only the length the inner writer
/// reports as accepted is added to the total, so partial writes and failed
/// writes are counted exactly.
pub struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    /// Total bytes accepted by the inner writer so far
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `limit` bytes per call and fails once `capacity` is used up.
    struct Trickle {
        data: Vec<u8>,
        limit: usize,
        capacity: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.data.len();
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "full"));
            }
            let n = buf.len().min(self.limit).min(room);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn counts_forwarded_bytes() {
        let mut w = CountingWriter::new(Vec::new());
        w.write_all(b"hello").unwrap();
        w.write_all(b", world").unwrap();
        assert_eq!(w.count(), 12);
        assert_eq!(w.into_inner(), b"hello, world");
    }

    #[test]
    fn counts_only_accepted_portion_of_partial_writes() {
        let mut w = CountingWriter::new(Trickle {
            data: Vec::new(),
            limit: 3,
            capacity: 100,
        });
        let n = w.write(b"abcdefgh").unwrap();
        assert_eq!(n, 3);
        assert_eq!(w.count(), 3);

        w.write_all(b"defgh").unwrap();
        assert_eq!(w.count(), 8);
        assert_eq!(w.get_mut().data, b"abcdefgh");
    }

    #[test]
    fn failed_write_keeps_bytes_accepted_before_error() {
        let mut w = CountingWriter::new(Trickle {
            data: Vec::new(),
            limit: 4,
            capacity: 6,
        });
        let err = w.write_all(b"0123456789").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        assert_eq!(w.count(), 6);
    }
}
