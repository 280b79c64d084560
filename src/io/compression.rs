//! Content encodings of an upload body.
//!
//! Callers state the encoding up front (the equivalent of a
//! `Content-Encoding: gzip` header). A body declared as gzip is checked
//! against the gzip magic bytes before anything is decoded, so a plain-text
//! body sent with the wrong flag fails with
//! [`IngestError::GzipDecompression`] rather than a confusing parse error.
//!
//! Errors inside the compressed stream surface much later, as read failures
//! deep in the CSV or JSON parser. The decoder is therefore wrapped in a guard
//! that records the first failure in a shared [`DecodeFailure`]; the writer
//! consults it to report those read errors as decompression errors.

use crate::error::{IngestError, Result};
use std::io::{self, BufRead, BufReader, Read};
use std::sync::{Arc, OnceLock};

/// How the upload body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
}

impl ContentEncoding {
    /// Interpret a `Content-Encoding` value. `None` and `identity` mean plain.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] for any other encoding.
    pub fn from_header(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::Identity),
            Some(v) if v.eq_ignore_ascii_case("identity") => Ok(Self::Identity),
            Some(v) if v.eq_ignore_ascii_case("gzip") => Ok(Self::Gzip),
            Some(v) => Err(IngestError::config(format!(
                "unsupported content encoding '{v}'"
            ))),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
        }
    }

    /// Signature every stream of this encoding starts with.
    #[must_use]
    pub fn magic_bytes(self) -> Option<&'static [u8]> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some(&[0x1f, 0x8b]),
        }
    }
}

/// First decoding error seen in a compressed stream, shared with the writer.
#[derive(Debug, Clone, Default)]
pub struct DecodeFailure(Arc<OnceLock<String>>);

impl DecodeFailure {
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    /// Turn `err` into a decompression error if the stream failed to decode.
    #[must_use]
    pub fn classify(&self, err: IngestError) -> IngestError {
        match self.message() {
            Some(msg) => IngestError::GzipDecompression(msg.to_string()),
            None => err,
        }
    }

    fn record(&self, err: &io::Error) {
        let _ = self.0.set(err.to_string());
    }
}

/// Strip `encoding` from `reader`.
///
/// # Errors
///
/// Returns [`IngestError::GzipDecompression`] if a gzip body does not start
/// with the gzip signature, and [`IngestError::Io`] if it cannot be read.
pub fn decode<'a, R: Read + 'a>(
    reader: R,
    encoding: ContentEncoding,
) -> Result<(Box<dyn Read + 'a>, DecodeFailure)> {
    let failure = DecodeFailure::default();
    let Some(magic) = encoding.magic_bytes() else {
        return Ok((Box::new(reader), failure));
    };

    let mut buffered = BufReader::new(reader);
    let head = buffered.fill_buf()?;
    if !head.starts_with(magic) {
        return Err(IngestError::GzipDecompression(
            "input is not in gzip format".to_string(),
        ));
    }

    let decoder = wrap_decoder(buffered, encoding)?;
    Ok((
        Box::new(GuardedReader {
            inner: decoder,
            failure: failure.clone(),
        }),
        failure,
    ))
}

#[cfg(feature = "compression-gzip")]
fn wrap_decoder<'a, R: BufRead + 'a>(
    reader: R,
    _encoding: ContentEncoding,
) -> Result<Box<dyn Read + 'a>> {
    Ok(Box::new(flate2::bufread::MultiGzDecoder::new(reader)))
}

#[cfg(not(feature = "compression-gzip"))]
fn wrap_decoder<'a, R: BufRead + 'a>(
    _reader: R,
    encoding: ContentEncoding,
) -> Result<Box<dyn Read + 'a>> {
    Err(IngestError::config(format!(
        "{} decoding is not enabled in this build",
        encoding.name()
    )))
}

struct GuardedReader<'a> {
    inner: Box<dyn Read + 'a>,
    failure: DecodeFailure,
}

impl Read for GuardedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).inspect_err(|e| self.failure.record(e))
    }
}

#[cfg(all(test, feature = "compression-gzip"))]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_round_trip() {
        let body = gzip(b"time,value\n1,2\n");
        let (mut reader, failure) = decode(&body[..], ContentEncoding::Gzip).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "time,value\n1,2\n");
        assert!(failure.message().is_none());
    }

    #[test]
    fn test_plain_text_flagged_as_gzip() {
        let err = decode(&b"time,value\n"[..], ContentEncoding::Gzip)
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::GzipDecompression(_)));
    }

    #[test]
    fn test_corrupt_body_is_recorded() {
        let mut body = gzip(b"some data that will not survive");
        body.truncate(body.len() / 2);
        let (mut reader, failure) = decode(&body[..], ContentEncoding::Gzip).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
        assert!(failure.message().is_some());
        let err = failure.classify(IngestError::MalformedJson("x".into()));
        assert!(matches!(err, IngestError::GzipDecompression(_)));
    }

    #[test]
    fn test_encoding_header() {
        assert_eq!(ContentEncoding::from_header(None).unwrap(), ContentEncoding::Identity);
        assert_eq!(
            ContentEncoding::from_header(Some("GZIP")).unwrap(),
            ContentEncoding::Gzip
        );
        assert!(ContentEncoding::from_header(Some("br")).is_err());
    }
}
