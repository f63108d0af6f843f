//! The aggregator: the library-inserted sink at the tail of a pipeline.
//!
//! One aggregator is appended after the user topology. It is the sole
//! downstream of every terminal worker and the sole upstream of the
//! caller. Unlike ordinary workers it *traps*: linked-peer terminations
//! arrive as events in its select loop instead of aborting it, so it can
//! count normal completions and filter abnormal ones.
//!
//! Contract:
//!
//! - application payloads are forwarded to the caller verbatim,
//!   preserving per-upstream FIFO order;
//! - the first abnormal peer exit terminates the aggregator with the
//!   same reason;
//! - the `N`-th normal peer exit (where `N` is the terminal-branch
//!   count) drains anything still queued and terminates normally;
//! - kill requests are ignored; the aggregator's lifetime is fully
//!   determined by link events.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, trace, warn};

use crate::pipeline::ChainMonitor;
use crate::worker::{Control, ExitReason, WorkerChannels, WorkerHandle, WorkerId};

/// Spawn the aggregator for a pipeline with `expected` terminal branches.
///
/// Returns its worker handle (for terminal workers to link against), the
/// caller-side monitor, and the task handle used for teardown when
/// construction fails.
pub(crate) fn spawn(expected: usize) -> (WorkerHandle, ChainMonitor, JoinHandle<()>) {
    let id = WorkerId::new();
    let (handle, channels) = WorkerHandle::new(id);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let monitor = ChainMonitor::new(out_rx, handle.exit_watch());
    let task = tokio::spawn(run(expected, channels, out_tx, id));
    (handle, monitor, task)
}

async fn run(
    expected: usize,
    channels: WorkerChannels,
    out_tx: mpsc::UnboundedSender<Value>,
    id: WorkerId,
) {
    let WorkerChannels {
        mut mailbox,
        mut control,
        exit,
    } = channels;
    let mut links: StreamMap<WorkerId, WatchStream<Option<ExitReason>>> = StreamMap::new();
    let mut finished = 0usize;
    let mut inbox_open = true;

    debug!(aggregator = %id, branches = expected, "aggregator started");
    let reason = loop {
        tokio::select! {
            msg = mailbox.recv(), if inbox_open => match msg {
                Some(payload) => {
                    let _ = out_tx.send(payload);
                }
                None => inbox_open = false,
            },
            Some(request) = control.recv() => match request {
                Control::Link { peer, exit: peer_exit } => {
                    links.insert(peer, WatchStream::new(peer_exit));
                }
                Control::Kill(reason) => {
                    trace!(aggregator = %id, %reason, "kill request ignored");
                }
            },
            Some((peer, event)) = links.next() => match event {
                Some(ExitReason::Abnormal(reason)) => {
                    warn!(aggregator = %id, peer = %peer, %reason, "terminal branch failed");
                    break ExitReason::Abnormal(reason);
                }
                Some(ExitReason::Normal) => {
                    finished += 1;
                    debug!(aggregator = %id, peer = %peer, finished, expected, "terminal branch finished");
                    if finished == expected {
                        break ExitReason::Normal;
                    }
                }
                None => {}
            },
            else => {
                warn!(aggregator = %id, finished, expected, "all chain links lost");
                break ExitReason::Abnormal("all chain links lost".to_string());
            }
        }
    };

    if reason == ExitReason::Normal {
        // A branch may have forwarded its last payloads right before
        // exiting; they are already queued, so flush them ahead of the
        // end-of-stream signal.
        while let Ok(payload) = mailbox.try_recv() {
            let _ = out_tx.send(payload);
        }
    }

    debug!(aggregator = %id, reason = %reason, "aggregator terminated");
    let _ = exit.send(Some(reason));
}
