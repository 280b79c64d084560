//! Flush acknowledgements from the native process.
//!
//! The native process writes a stream of JSON documents to its output pipe.
//! Among them, `{"flush":"<id>"}` acknowledges the flush with that id. The
//! results reader runs on its own thread and hands acknowledgements to a
//! [`FlushListener`], on which `flush_job` waits.

use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use serde_json::{Deserializer, Value};
use std::collections::HashSet;
use std::io::{BufReader, Read};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct AckState {
    acknowledged: HashSet<String>,
    closed: bool,
}

/// Acknowledged flush ids, with waiting.
#[derive(Debug, Default)]
pub struct FlushListener {
    state: Mutex<AckState>,
    cond: Condvar,
}

impl FlushListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acknowledge(&self, flush_id: &str) {
        self.state.lock().acknowledged.insert(flush_id.to_string());
        self.cond.notify_all();
    }

    /// Wait up to `timeout` for `flush_id`. Returns whether it was acknowledged.
    ///
    /// Returns early with `false` once the listener is closed. A timeout too
    /// large to express as a deadline waits without one. Whatever the outcome,
    /// acknowledgements of `flush_id` and of earlier flushes are discarded.
    #[must_use]
    pub fn wait_for_flush(&self, flush_id: &str, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let acknowledged = loop {
            if state.acknowledged.contains(flush_id) {
                break true;
            }
            if state.closed {
                break false;
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => break false,
                Some(deadline) => {
                    self.cond.wait_until(&mut state, deadline);
                }
                None => self.cond.wait(&mut state),
            }
        };
        state
            .acknowledged
            .retain(|id| !is_same_or_earlier(id, flush_id));
        acknowledged
    }

    /// Wake every waiter; later waits fail immediately.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }

    /// Number of acknowledgements not yet consumed by a wait.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().acknowledged.len()
    }
}

/// Flush ids are increasing integers; other ids only match themselves.
fn is_same_or_earlier(id: &str, waited: &str) -> bool {
    match (id.parse::<u64>(), waited.parse::<u64>()) {
        (Ok(id), Ok(waited)) => id <= waited,
        _ => id == waited,
    }
}

/// Read native process output until it ends, passing flush acknowledgements
/// to `listener`. Returns the number of documents read.
pub fn read_results<R: Read>(job_id: &str, output: R, listener: &FlushListener) -> u64 {
    let mut documents = 0;
    for value in Deserializer::from_reader(BufReader::new(output)).into_iter::<Value>() {
        match value {
            Ok(value) => {
                documents += 1;
                if let Some(id) = value.get("flush").and_then(Value::as_str) {
                    debug!("[{job_id}] flush {id} acknowledged");
                    listener.acknowledge(id);
                }
            }
            Err(e) => {
                error!("[{job_id}] cannot parse native process output: {e}");
                break;
            }
        }
    }
    listener.close();
    documents
}
