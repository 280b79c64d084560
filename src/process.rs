//! The native analytics process as seen from the pipeline.
//!
//! The process itself is opaque: it is reached only through its input pipe,
//! where records and control messages are written as length-encoded frames,
//! and its output pipe, where it answers flushes. [`NativeProcess`] is that
//! contract; [`NativeProcessFactory`] connects one per opened job.
//!
//! - [`LengthEncodedProcess`] speaks the frame protocol over any writer,
//! - [`NamedPipeProcessFactory`] connects it to the pipes of a running process,
//! - [`BlackHoleProcess`] swallows everything, for dry runs.

pub mod control;
pub mod flush;
pub mod length_encoded;

pub use control::ControlMessageWriter;
pub use flush::{FlushListener, read_results};
pub use length_encoded::{LengthEncodedProcess, NamedPipeProcessFactory};

use crate::config::JobConfig;
use crate::pipeline::params::{InterimResultsParams, TimeRange};
use std::io;
use std::time::Duration;

/// One connected native process.
///
/// Calls come from a single thread at a time, the one holding the job lock.
pub trait NativeProcess: Send {
    /// Write one frame. The first frame written is the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the process can no longer be written to.
    fn write_record(&mut self, record: &[String]) -> io::Result<()>;

    /// # Errors
    ///
    /// Returns an error if the process can no longer be written to.
    fn write_reset_buckets(&mut self, range: TimeRange) -> io::Result<()>;

    /// Send the control messages for `params` followed by a flush, and return
    /// the id the process will acknowledge.
    ///
    /// # Errors
    ///
    /// Returns an error if the process can no longer be written to.
    fn flush_job(&mut self, params: &InterimResultsParams) -> io::Result<String>;

    /// Wait for the acknowledgement of `flush_id`.
    fn wait_for_flush_ack(&mut self, flush_id: &str, timeout: Duration) -> bool;

    /// Push buffered frames to the process without a flush message.
    ///
    /// # Errors
    ///
    /// Returns an error if the process can no longer be written to.
    fn flush_stream(&mut self) -> io::Result<()>;

    /// Flush and release the input channel; the process sees end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails. The channel is released
    /// either way.
    fn close(&mut self) -> io::Result<()>;

    fn is_alive(&self) -> bool;
}

/// Connects a [`NativeProcess`] for a job being opened.
pub trait NativeProcessFactory: Send + Sync {
    /// With `ignore_downtime`, the process does not treat the gap before the
    /// next upload as missing data.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be reached.
    fn create(&self, job: &JobConfig, ignore_downtime: bool)
    -> anyhow::Result<Box<dyn NativeProcess>>;
}

/// Discards data and acknowledges every flush at once.
#[derive(Debug)]
pub struct BlackHoleProcess {
    records: u64,
    next_flush_id: u64,
    open: bool,
}

impl BlackHoleProcess {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: 0,
            next_flush_id: 1,
            open: true,
        }
    }

    /// Frames swallowed so far, header included.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }
}

impl Default for BlackHoleProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeProcess for BlackHoleProcess {
    fn write_record(&mut self, _record: &[String]) -> io::Result<()> {
        self.records += 1;
        Ok(())
    }

    fn write_reset_buckets(&mut self, _range: TimeRange) -> io::Result<()> {
        Ok(())
    }

    fn flush_job(&mut self, _params: &InterimResultsParams) -> io::Result<String> {
        let id = self.next_flush_id;
        self.next_flush_id += 1;
        Ok(id.to_string())
    }

    fn wait_for_flush_ack(&mut self, _flush_id: &str, _timeout: Duration) -> bool {
        true
    }

    fn flush_stream(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.open
    }
}

/// Factory for [`BlackHoleProcess`]es.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlackHoleProcessFactory;

impl NativeProcessFactory for BlackHoleProcessFactory {
    fn create(
        &self,
        _job: &JobConfig,
        _ignore_downtime: bool,
    ) -> anyhow::Result<Box<dyn NativeProcess>> {
        Ok(Box::new(BlackHoleProcess::new()))
    }
}
