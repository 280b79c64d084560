//! Byte counting for usage reports.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared total of bytes read through a [`CountingReader`].
///
/// The reader is usually buried inside a decoder, so the writer keeps this
/// handle and drains the growth after every record.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter {
    total: Arc<AtomicU64>,
    drained: u64,
}

impl ByteCounter {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Bytes read since the previous call.
    pub fn take_delta(&mut self) -> u64 {
        let total = self.total();
        let delta = total - self.drained;
        self.drained = total;
        delta
    }
}

/// Counts the bytes passing through.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    total: Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> (Self, ByteCounter) {
        let counter = ByteCounter::default();
        (
            Self {
                inner,
                total: Arc::clone(&counter.total),
            },
            counter,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.total.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas() {
        let (mut reader, mut counter) = CountingReader::new(&b"hello world"[..]);
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(counter.take_delta(), 5);
        assert_eq!(counter.take_delta(), 0);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(counter.take_delta(), 6);
        assert_eq!(counter.total(), 11);
    }
}
