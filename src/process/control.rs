//! Control messages to the native process.
//!
//! A control message is a frame whose fields are all empty except the last,
//! the control field, which holds a one letter command and its arguments:
//!
//! | message             | meaning                                   |
//! |---------------------|-------------------------------------------|
//! | `i` / `i<s> <e>`    | calculate interim results (for a range)   |
//! | `f<id>`             | flush and acknowledge with `id`           |
//! | `t<epoch>`          | advance time to `epoch`                   |
//! | `r<s> <e>`          | reset the buckets in a range              |
//!
//! A flush is followed by a message of blank padding large enough to push it
//! through any buffering on the native side.

use crate::pipeline::params::{InterimResultsParams, TimeRange};
use crate::wire::LengthEncodedWriter;
use std::io::{self, Write};

const FLUSH_PADDING: usize = 8192;

/// Writes control messages on a writer whose header is already written.
pub struct ControlMessageWriter<'a, W: Write> {
    writer: &'a mut LengthEncodedWriter<W>,
}

impl<'a, W: Write> ControlMessageWriter<'a, W> {
    pub fn new(writer: &'a mut LengthEncodedWriter<W>) -> Self {
        Self { writer }
    }

    /// Interim calculation and time advance requested by `params`, in that order.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or no header was written yet.
    pub fn write_calc_interim_message(&mut self, params: &InterimResultsParams) -> io::Result<()> {
        if params.should_calculate_interim() {
            let message = match params.range() {
                Some(TimeRange { start, end }) => format!("i{start} {end}"),
                None => "i".to_string(),
            };
            self.write_message(&message)?;
        }
        if let Some(epoch) = params.advance_time() {
            self.write_message(&format!("t{epoch}"))?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the stream fails or no header was written yet.
    pub fn write_flush_message(&mut self, flush_id: &str) -> io::Result<()> {
        self.write_message(&format!("f{flush_id}"))?;
        self.write_message(&" ".repeat(FLUSH_PADDING))
    }

    /// # Errors
    ///
    /// Returns an error if the stream fails or no header was written yet.
    pub fn write_reset_buckets_message(&mut self, range: TimeRange) -> io::Result<()> {
        self.write_message(&format!("r{} {}", range.start, range.end))
    }

    fn write_message(&mut self, message: &str) -> io::Result<()> {
        let num_fields = self.writer.num_fields().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "control message written before the header",
            )
        })?;
        self.writer.write_num_fields(num_fields)?;
        for _ in 1..num_fields {
            self.writer.write_field("")?;
        }
        self.writer.write_field(message)
    }
}
