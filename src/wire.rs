//! Length-encoded record frames.
//!
//! The native process reads its input as a sequence of frames:
//!
//! ```text
//! i32 field_count                      (big-endian)
//! field_count x { i32 len, len bytes } (big-endian length, UTF-8 bytes)
//! ```
//!
//! There are no delimiters and no escaping, so any text (newlines, NULs,
//! multi-byte characters) round-trips unchanged. The first frame of a job is
//! the field-name header; every later frame must have the same field count.
//!
//! [`LengthEncodedWriter`] produces frames and [`LengthEncodedReader`] decodes
//! them again, which the tests and in-memory processes use to inspect what was
//! sent.

use bytes::{BufMut, BytesMut};
use std::io::{self, Read, Write};

/// Name of the trailing header field that carries control messages.
pub const CONTROL_FIELD_NAME: &str = ".";

/// Writes length-encoded frames to an owned stream.
///
/// Each frame is assembled in memory and handed to the stream in one
/// `write_all` once its last field is added, so the stream never holds part
/// of a frame that was abandoned.
///
/// The writer remembers the field count of the first frame and rejects any
/// later frame of a different size with [`io::ErrorKind::InvalidInput`].
/// It never closes the underlying stream; callers decide when to [`flush`].
///
/// [`flush`]: LengthEncodedWriter::flush
#[derive(Debug)]
pub struct LengthEncodedWriter<W: Write> {
    inner: W,
    num_fields: Option<usize>,
    frame: BytesMut,
    remaining: usize,
}

impl<W: Write> LengthEncodedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            num_fields: None,
            frame: BytesMut::with_capacity(256),
            remaining: 0,
        }
    }

    /// Write a whole frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the field count differs from the header's or the
    /// stream fails.
    pub fn write_record<S: AsRef<str>>(&mut self, fields: &[S]) -> io::Result<()> {
        self.write_num_fields(fields.len())?;
        for field in fields {
            self.write_field(field.as_ref())?;
        }
        Ok(())
    }

    /// Start a frame of `n` fields; follow with exactly `n` calls to
    /// [`write_field`](Self::write_field). Starting a frame discards any
    /// unfinished one.
    ///
    /// # Errors
    ///
    /// Returns an error if `n` differs from the header's field count, does not
    /// fit an `i32`, or the stream fails.
    pub fn write_num_fields(&mut self, n: usize) -> io::Result<()> {
        match self.num_fields {
            Some(expected) if expected != n => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("record has {n} fields but the header has {expected}"),
                ));
            }
            Some(_) => {}
            None => self.num_fields = Some(n),
        }
        self.frame.clear();
        self.frame.put_i32(encode_len(n)?);
        self.remaining = n;
        self.finish_frame()
    }

    /// Add one field to the current frame, writing the frame out after its
    /// last field.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame is open, the field is longer than
    /// `i32::MAX` bytes, or the stream fails.
    pub fn write_field(&mut self, value: &str) -> io::Result<()> {
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "field written outside a frame",
            ));
        }
        let bytes = value.as_bytes();
        self.frame.put_i32(encode_len(bytes.len())?);
        self.frame.put_slice(bytes);
        self.remaining -= 1;
        self.finish_frame()
    }

    fn finish_frame(&mut self) -> io::Result<()> {
        if self.remaining > 0 {
            return Ok(());
        }
        let frame = self.frame.split();
        self.inner.write_all(&frame)
    }

    /// Push buffered bytes to the underlying stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stream fails to flush.
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Field count fixed by the header, once one has been written.
    #[must_use]
    pub fn num_fields(&self) -> Option<usize> {
        self.num_fields
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn encode_len(n: usize) -> io::Result<i32> {
    i32::try_from(n).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("length {n} does not fit a frame"),
        )
    })
}

/// Decodes frames produced by [`LengthEncodedWriter`].
#[derive(Debug)]
pub struct LengthEncodedReader<R: Read> {
    inner: R,
}

impl<R: Read> LengthEncodedReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next frame, or `None` at a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::UnexpectedEof`] for a truncated frame and
    /// [`io::ErrorKind::InvalidData`] for negative lengths or invalid UTF-8.
    pub fn read_record(&mut self) -> io::Result<Option<Vec<String>>> {
        let mut len = [0u8; 4];
        let got = read_up_to(&mut self.inner, &mut len)?;
        if got == 0 {
            return Ok(None);
        }
        if got < len.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let n = decode_len(len)?;
        let mut fields = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            self.inner.read_exact(&mut len)?;
            let field_len = decode_len(len)?;
            // Grows with the bytes that arrive, not with the claimed length.
            let mut buf = Vec::with_capacity(field_len.min(64 * 1024));
            (&mut self.inner).take(field_len as u64).read_to_end(&mut buf)?;
            if buf.len() < field_len {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let field = String::from_utf8(buf)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            fields.push(field);
        }
        Ok(Some(fields))
    }
}

impl<R: Read> Iterator for LengthEncodedReader<R> {
    type Item = io::Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

fn decode_len(bytes: [u8; 4]) -> io::Result<usize> {
    let n = i32::from_be_bytes(bytes);
    usize::try_from(n).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, format!("negative length {n}"))
    })
}

/// Like `read_exact` but reports how much was read before a clean EOF.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
