//! In-memory stand-ins for the native process and its pipes.

use crate::config::JobConfig;
use crate::process::{LengthEncodedProcess, NativeProcess, NativeProcessFactory};
use crate::wire::LengthEncodedReader;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::TempDir;

/// A cloneable in-memory writer; every clone appends to the same bytes.
///
/// With a limit, writes past it fail with `BrokenPipe`, the way a pipe does
/// once the process reading it has died.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    limit: Option<usize>,
}

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that accepts at most `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Arc::default(),
            limit: Some(limit),
        }
    }

    /// Copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self.lock();
        if let Some(limit) = self.limit
            && bytes.len() + buf.len() > limit
        {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader went away"));
        }
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decode length-encoded frames.
///
/// # Errors
///
/// Returns an error if `bytes` ends in the middle of a frame.
pub fn decode_frames(bytes: &[u8]) -> io::Result<Vec<Vec<String>>> {
    LengthEncodedReader::new(bytes).collect()
}

/// Creates self-acknowledging processes writing to [`SharedBuffer`]s, and
/// keeps the buffers so tests can read back what each job received.
#[derive(Debug, Default)]
pub struct MemoryProcessFactory {
    buffers: Mutex<HashMap<String, SharedBuffer>>,
    limit: Option<usize>,
    fail_with: Option<String>,
}

impl MemoryProcessFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes that stop accepting input after `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// A factory whose processes cannot be started.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// Input received by the latest process of `job_id`.
    #[must_use]
    pub fn input(&self, job_id: &str) -> Vec<u8> {
        self.buffers()
            .get(job_id)
            .map(SharedBuffer::contents)
            .unwrap_or_default()
    }

    /// Frames received by the latest process of `job_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input ends in the middle of a frame.
    pub fn frames(&self, job_id: &str) -> io::Result<Vec<Vec<String>>> {
        decode_frames(&self.input(job_id))
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<String, SharedBuffer>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeProcessFactory for MemoryProcessFactory {
    fn create(
        &self,
        job: &JobConfig,
        _ignore_downtime: bool,
    ) -> anyhow::Result<Box<dyn NativeProcess>> {
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        let buffer = self.limit.map_or_else(SharedBuffer::new, SharedBuffer::with_limit);
        self.buffers().insert(job.job_id.clone(), buffer.clone());
        Ok(Box::new(LengthEncodedProcess::self_acknowledging(
            job.job_id.clone(),
            buffer,
        )))
    }
}

/// A temporary directory that is deleted when dropped.
pub struct TempDirPath {
    temp_dir: TempDir,
}

impl TempDirPath {
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[must_use]
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.temp_dir.path().join(filename)
    }
}

/// Gzip `data` in memory.
///
/// # Errors
///
/// Returns an error if compression fails.
#[cfg(feature = "compression-gzip")]
pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
