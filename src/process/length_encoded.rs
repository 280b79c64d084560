//! The frame protocol over a byte stream, and the named pipe factory.

use super::control::ControlMessageWriter;
use super::flush::{FlushListener, read_results};
use super::{NativeProcess, NativeProcessFactory};
use crate::config::JobConfig;
use crate::pipe::{ConnectPolicy, NamedPipe, PipeDirection};
use crate::pipeline::params::{InterimResultsParams, TimeRange};
use crate::wire::LengthEncodedWriter;
use anyhow::Context;
use log::{debug, error, info};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckMode {
    /// A results reader feeds the listener.
    Results,
    /// Flushes are acknowledged as soon as they are written.
    Immediate,
}

/// A [`NativeProcess`] writing length-encoded frames to `W`.
pub struct LengthEncodedProcess<W: Write + Send> {
    job_id: String,
    writer: Option<LengthEncodedWriter<BufWriter<W>>>,
    listener: Arc<FlushListener>,
    ack: AckMode,
    results: Option<JoinHandle<u64>>,
    next_flush_id: u64,
    failed: bool,
}

impl<W: Write + Send> LengthEncodedProcess<W> {
    /// A process whose flushes are acknowledged through `listener`.
    pub fn new(job_id: impl Into<String>, input: W, listener: Arc<FlushListener>) -> Self {
        Self {
            job_id: job_id.into(),
            writer: Some(LengthEncodedWriter::new(BufWriter::new(input))),
            listener,
            ack: AckMode::Results,
            results: None,
            next_flush_id: 1,
            failed: false,
        }
    }

    /// A process that acknowledges its own flushes once they are written.
    pub fn self_acknowledging(job_id: impl Into<String>, input: W) -> Self {
        Self {
            ack: AckMode::Immediate,
            ..Self::new(job_id, input, Arc::new(FlushListener::new()))
        }
    }

    /// Keep the thread reading this process's output.
    #[must_use]
    pub fn with_results_reader(mut self, handle: JoinHandle<u64>) -> Self {
        self.results = Some(handle);
        self
    }

    fn writer(&mut self) -> io::Result<&mut LengthEncodedWriter<BufWriter<W>>> {
        if self.failed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "an earlier write to the native process failed",
            ));
        }
        self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "native process input is closed")
        })
    }

    fn track<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

impl<W: Write + Send> NativeProcess for LengthEncodedProcess<W> {
    fn write_record(&mut self, record: &[String]) -> io::Result<()> {
        let result = self.writer().and_then(|w| w.write_record(record));
        self.track(result)
    }

    fn write_reset_buckets(&mut self, range: TimeRange) -> io::Result<()> {
        let result = self
            .writer()
            .and_then(|w| ControlMessageWriter::new(w).write_reset_buckets_message(range));
        self.track(result)
    }

    fn flush_job(&mut self, params: &InterimResultsParams) -> io::Result<String> {
        let flush_id = self.next_flush_id.to_string();
        self.next_flush_id += 1;

        let result = self.writer().and_then(|w| {
            let mut control = ControlMessageWriter::new(&mut *w);
            control.write_calc_interim_message(params)?;
            control.write_flush_message(&flush_id)?;
            w.flush()
        });
        self.track(result)?;

        debug!("[{}] flush {flush_id} sent", self.job_id);
        if self.ack == AckMode::Immediate {
            self.listener.acknowledge(&flush_id);
        }
        Ok(flush_id)
    }

    fn wait_for_flush_ack(&mut self, flush_id: &str, timeout: Duration) -> bool {
        self.listener.wait_for_flush(flush_id, timeout)
    }

    fn flush_stream(&mut self) -> io::Result<()> {
        let result = self.writer().and_then(LengthEncodedWriter::flush);
        self.track(result)
    }

    fn close(&mut self) -> io::Result<()> {
        let result = match self.writer.take() {
            Some(mut writer) if !self.failed => writer.flush(),
            _ => Ok(()),
        };
        if let Some(handle) = self.results.take()
            && handle.is_finished()
        {
            let documents = handle.join().unwrap_or_default();
            debug!("[{}] results reader read {documents} documents", self.job_id);
        }
        self.listener.close();
        result
    }

    fn is_alive(&self) -> bool {
        self.writer.is_some() && !self.failed
    }
}

/// Connects to a native process through the pipes it creates in `pipe_dir`:
/// `<job_id>_input` for records and `<job_id>_output` for its results.
#[derive(Debug, Clone)]
pub struct NamedPipeProcessFactory {
    pipe_dir: PathBuf,
    policy: ConnectPolicy,
}

impl NamedPipeProcessFactory {
    #[must_use]
    pub fn new(pipe_dir: impl Into<PathBuf>, policy: ConnectPolicy) -> Self {
        Self {
            pipe_dir: pipe_dir.into(),
            policy,
        }
    }

    #[must_use]
    pub fn input_pipe(&self, job_id: &str) -> PathBuf {
        self.pipe_dir.join(format!("{job_id}_input"))
    }

    #[must_use]
    pub fn output_pipe(&self, job_id: &str) -> PathBuf {
        self.pipe_dir.join(format!("{job_id}_output"))
    }
}

impl NativeProcessFactory for NamedPipeProcessFactory {
    fn create(
        &self,
        job: &JobConfig,
        ignore_downtime: bool,
    ) -> anyhow::Result<Box<dyn NativeProcess>> {
        let job_id = job.job_id.clone();
        if ignore_downtime {
            info!("[{job_id}] downtime before the next upload will be ignored");
        }
        let input_path = self.input_pipe(&job_id);
        let input = NamedPipe::open(&input_path, PipeDirection::ToNative, &self.policy)
            .with_context(|| format!("connect to {}", input_path.display()))?;
        info!("[{job_id}] connected to {}", input_path.display());

        let listener = Arc::new(FlushListener::new());
        let reader_listener = Arc::clone(&listener);
        let output_path = self.output_pipe(&job_id);
        let policy = self.policy;
        let reader_job = job_id.clone();
        let handle = thread::Builder::new()
            .name(format!("{job_id}-results"))
            .spawn(move || {
                match NamedPipe::open(&output_path, PipeDirection::FromNative, &policy) {
                    Ok(output) => read_results(&reader_job, output, &reader_listener),
                    Err(e) => {
                        error!("[{reader_job}] cannot read native process output: {e}");
                        reader_listener.close();
                        0
                    }
                }
            })
            .context("spawn results reader")?;

        Ok(Box::new(
            LengthEncodedProcess::new(job_id, input, listener).with_results_reader(handle),
        ))
    }
}
