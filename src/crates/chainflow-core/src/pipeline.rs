//! Caller-facing pipeline handle: feeding input, draining output.
//!
//! [`create`](crate::create) returns a [`Pipeline`]: the entry-point
//! handles of the topmost workers plus a [`ChainMonitor`], the termination
//! token that multiplexes the pipeline's output stream and its terminal
//! status. The caller feeds payloads with [`Pipeline::feed`] (or per-entry
//! via [`WorkerHandle::cast`]), signals end of input with
//! [`Pipeline::close_input`], and drains with [`Pipeline::out`] until a
//! terminal [`ChainOutput`] arrives.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::worker::{ExitReason, WorkerHandle};

/// One result of polling a pipeline's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChainOutput {
    /// A payload forwarded verbatim from a terminal worker.
    Message(Value),
    /// End of stream: every terminal branch finished normally.
    End,
    /// The pipeline collapsed: some worker exited with this reason.
    Error(String),
}

/// Send a payload to each of the given entry points.
///
/// Delivery is fire-and-forget; entries that are already gone are
/// silently skipped.
pub fn feed(msg: &Value, entries: &[WorkerHandle]) {
    for entry in entries {
        entry.cast(msg.clone());
    }
}

/// Termination token of a pipeline.
///
/// Yields every forwarded payload, then exactly one terminal result.
/// After the terminal result, further [`out`](Self::out) calls keep
/// returning the same terminal value.
#[derive(Debug)]
pub struct ChainMonitor {
    output: mpsc::UnboundedReceiver<Value>,
    exit: watch::Receiver<Option<ExitReason>>,
    terminal: Option<ChainOutput>,
}

impl ChainMonitor {
    pub(crate) fn new(
        output: mpsc::UnboundedReceiver<Value>,
        exit: watch::Receiver<Option<ExitReason>>,
    ) -> Self {
        Self {
            output,
            exit,
            terminal: None,
        }
    }

    /// Wait for the next pipeline output.
    ///
    /// Returns [`ChainOutput::Message`] for each forwarded payload, then
    /// [`ChainOutput::End`] if every terminal branch finished normally or
    /// [`ChainOutput::Error`] with the first abnormal exit reason.
    pub async fn out(&mut self) -> ChainOutput {
        if let Some(terminal) = &self.terminal {
            trace!("pipeline already terminal");
            return terminal.clone();
        }
        match self.output.recv().await {
            Some(payload) => ChainOutput::Message(payload),
            None => {
                let reason = match self.exit.wait_for(|reason| reason.is_some()).await {
                    Ok(reason) => reason.as_ref().cloned().unwrap_or(ExitReason::Normal),
                    Err(_) => {
                        ExitReason::Abnormal("aggregator terminated without an exit report".into())
                    }
                };
                let terminal = match reason {
                    ExitReason::Normal => ChainOutput::End,
                    ExitReason::Abnormal(reason) => ChainOutput::Error(reason),
                };
                self.terminal = Some(terminal.clone());
                terminal
            }
        }
    }

    /// Drain the pipeline: every remaining payload plus the terminal
    /// result.
    ///
    /// Only returns once the pipeline terminates, so input must already
    /// be closed (or a failure under way).
    pub async fn collect(mut self) -> (Vec<Value>, ChainOutput) {
        let mut messages = Vec::new();
        loop {
            match self.out().await {
                ChainOutput::Message(payload) => messages.push(payload),
                terminal => return (messages, terminal),
            }
        }
    }
}

/// A running pipeline: entry points plus the termination token.
#[derive(Debug)]
pub struct Pipeline {
    entries: Vec<WorkerHandle>,
    monitor: ChainMonitor,
}

impl Pipeline {
    pub(crate) fn new(entries: Vec<WorkerHandle>, monitor: ChainMonitor) -> Self {
        Self { entries, monitor }
    }

    /// Entry-point handles of the topmost workers, in topology order.
    pub fn entries(&self) -> &[WorkerHandle] {
        &self.entries
    }

    /// Send a payload to every entry point.
    pub fn feed(&self, msg: Value) {
        feed(&msg, &self.entries);
    }

    /// Signal end of input by dropping the entry handles.
    ///
    /// Once every upstream handle of a worker is gone its mailbox closes,
    /// it finishes, and the closure travels down the graph until the
    /// aggregator has seen every terminal branch finish. Callers that
    /// cloned entry handles keep the input open until those clones are
    /// dropped too.
    pub fn close_input(&mut self) {
        self.entries.clear();
    }

    /// Wait for the next pipeline output. See [`ChainMonitor::out`].
    pub async fn out(&mut self) -> ChainOutput {
        self.monitor.out().await
    }

    /// Close the input and drain everything that is still in flight.
    pub async fn finish(self) -> (Vec<Value>, ChainOutput) {
        let Self { entries, monitor } = self;
        drop(entries);
        monitor.collect().await
    }

    /// Split into the raw `(entry_points, termination_token)` pair.
    pub fn into_parts(self) -> (Vec<WorkerHandle>, ChainMonitor) {
        (self.entries, self.monitor)
    }
}
