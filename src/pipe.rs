//! Named pipes to and from the native process.
//!
//! The native process creates its pipes when it starts, which may be a little
//! after the job is opened. [`NamedPipe::open`] therefore retries while the
//! path does not exist yet (or, for the input pipe, while nobody is reading
//! it), up to [`ConnectPolicy::timeout`]. A path that exists but is a regular
//! file is a configuration mistake and fails straight away with
//! [`IngestError::NotAPipe`].
//!
//! The retry policy lives in [`Connector`], a small state machine fed with the
//! outcome of each [`Attempt`] and the time elapsed so far. It never touches
//! the file system, so the policy is tested on its own.

use crate::config::IngestSettings;
use crate::error::{IngestError, Result};
use log::debug;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Which end of the pipe this side holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// We write, the native process reads.
    ToNative,
    /// The native process writes, we read.
    FromNative,
}

/// How long and how often to try connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub timeout: Duration,
    pub retry_interval: Duration,
}

impl ConnectPolicy {
    #[must_use]
    pub fn new(timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            timeout,
            retry_interval,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self::new(settings.pipe_connect_timeout(), settings.pipe_retry_interval())
    }
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self::from_settings(&IngestSettings::default())
    }
}

/// Outcome of a single connect attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Ready(T),
    /// Not possible yet; worth trying again.
    Retry,
    /// Will never succeed.
    Fatal(IngestError),
}

/// What the caller should do after an attempt.
#[derive(Debug)]
pub enum Step<T> {
    Done(T),
    Wait(Duration),
    Fail(IngestError),
}

/// Bounded retry state machine for connecting to a pipe.
#[derive(Debug, Clone)]
pub struct Connector {
    path: PathBuf,
    policy: ConnectPolicy,
    attempts: u32,
}

impl Connector {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, policy: ConnectPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            attempts: 0,
        }
    }

    /// Classify `attempt`, made `elapsed` after the first one.
    pub fn step<T>(&mut self, attempt: Attempt<T>, elapsed: Duration) -> Step<T> {
        self.attempts += 1;
        match attempt {
            Attempt::Ready(value) => Step::Done(value),
            Attempt::Fatal(e) => Step::Fail(e),
            Attempt::Retry if elapsed >= self.policy.timeout => {
                Step::Fail(IngestError::PipeNotFound {
                    path: self.path.clone(),
                    timeout_ms: self.policy.timeout.as_millis(),
                })
            }
            Attempt::Retry => {
                Step::Wait(self.policy.retry_interval.min(self.policy.timeout - elapsed))
            }
        }
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// An open, type-checked named pipe.
#[derive(Debug)]
pub struct NamedPipe {
    file: File,
    path: PathBuf,
    direction: PipeDirection,
}

impl NamedPipe {
    /// Open the pipe at `path`, waiting for it according to `policy`.
    ///
    /// The write end is opened non-blocking so a missing reader shows up as a
    /// retry instead of a hang, then switched back to blocking so a slow
    /// reader applies back-pressure. The read end waits for existence only;
    /// opening it blocks until the native process opens its write end.
    ///
    /// # Errors
    ///
    /// - [`IngestError::NotAPipe`] if `path` exists and is not a FIFO,
    /// - [`IngestError::PipeNotFound`] if the pipe is not usable before the
    ///   timeout,
    /// - [`IngestError::Io`] for any other OS failure.
    pub fn open(path: impl AsRef<Path>, direction: PipeDirection, policy: &ConnectPolicy) -> Result<Self> {
        let path = path.as_ref();
        let mut connector = Connector::new(path, *policy);
        let start = Instant::now();
        loop {
            match connector.step(try_open(path, direction), start.elapsed()) {
                Step::Done(file) => {
                    if direction == PipeDirection::ToNative {
                        clear_nonblocking(&file)?;
                    }
                    debug!(
                        "connected to {} after {} attempt(s)",
                        path.display(),
                        connector.attempts()
                    );
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                        direction,
                    });
                }
                Step::Wait(pause) => thread::sleep(pause),
                Step::Fail(e) => return Err(e),
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn direction(&self) -> PipeDirection {
        self.direction
    }

    #[must_use]
    pub fn into_file(self) -> File {
        self.file
    }
}

impl Read for NamedPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for NamedPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn try_open(path: &Path, direction: PipeDirection) -> Attempt<File> {
    match fs::metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Attempt::Retry,
        Err(e) => return Attempt::Fatal(e.into()),
        Ok(meta) if !meta.file_type().is_fifo() => {
            return Attempt::Fatal(IngestError::NotAPipe {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => {}
    }

    let mut options = OpenOptions::new();
    match direction {
        PipeDirection::ToNative => options.write(true).custom_flags(libc::O_NONBLOCK),
        PipeDirection::FromNative => options.read(true),
    };
    match options.open(path) {
        Ok(file) => Attempt::Ready(file),
        // No reader on the other end yet.
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => Attempt::Retry,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Attempt::Retry,
        Err(e) => Attempt::Fatal(e.into()),
    }
}

fn clear_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` belongs to `file`, which outlives both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Create a FIFO at `path` readable and writable by the owner.
///
/// # Errors
///
/// Returns [`IngestError::Io`] if the path contains a NUL byte or `mkfifo`
/// fails (for example because the path already exists).
pub fn create_named_pipe(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: `c_path` is a valid NUL-terminated string for the call's duration.
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}
