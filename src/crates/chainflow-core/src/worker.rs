//! Worker runtime: handles, the start-up protocol, and supervision.
//!
//! Every worker is a pair of tokio tasks: the user body and a supervisor.
//! The supervisor owns the worker's control channel and its set of links,
//! watches the body, and publishes the exit reason on a watch channel that
//! every linked peer observes.
//!
//! # Start-up protocol
//!
//! A worker is announced to the builder only after it is linked to every
//! downstream peer:
//!
//! 1. For each successor handle: if the peer already terminated, ack the
//!    builder with the failure sentinel and terminate with reason normal.
//!    Otherwise install a bidirectional link: watch the peer's exit
//!    locally and ask the peer to watch ours.
//! 2. Ack the builder with success.
//! 3. Inject `(next, successors)` at the head of the options bag and run
//!    the user body.
//!
//! # Links
//!
//! A link is a symmetric pair of exit-watch subscriptions. Workers do not
//! trap: when a linked peer exits abnormally, the supervisor aborts the
//! body and re-publishes the same reason, cascading the failure through
//! the graph until it reaches the aggregator (which traps and translates
//! it into a terminal result for the caller). Normal peer exits are
//! ignored; end of input is signalled by mailbox closure instead, so
//! [`WorkerContext::get`] returns `None` once every upstream handle is
//! gone.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{ChainError, Result};
use crate::options::{OptionEntry, OptionValue, Options, NEXT};

/// Future returned by a worker body.
pub type WorkerFuture = BoxFuture<'static, Result<()>>;

/// A worker start function.
///
/// The body receives its [`WorkerContext`], loops over
/// [`get`](WorkerContext::get), optionally forwards, and returns `Ok(())`
/// at end of input or `Err` to exit abnormally.
pub type WorkerFn = Arc<dyn Fn(WorkerContext) -> WorkerFuture + Send + Sync>;

/// Unique identifier of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a worker terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// The body returned `Ok(())`.
    Normal,
    /// The body returned `Err`, panicked, was killed, or a linked peer
    /// failed with this reason.
    Abnormal(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Abnormal(reason) => f.write_str(reason),
        }
    }
}

/// Out-of-band requests to a worker's supervisor.
pub(crate) enum Control {
    /// Install one direction of a link: watch `exit` and cascade its
    /// abnormal reason.
    Link {
        peer: WorkerId,
        exit: watch::Receiver<Option<ExitReason>>,
    },
    /// Abort the body and terminate with the given abnormal reason.
    Kill(String),
}

/// Receiver sides of a worker's channels, owned by its supervisor.
pub(crate) struct WorkerChannels {
    pub(crate) mailbox: mpsc::UnboundedReceiver<Value>,
    pub(crate) control: mpsc::UnboundedReceiver<Control>,
    pub(crate) exit: watch::Sender<Option<ExitReason>>,
}

/// Opaque, cheaply clonable reference to a running worker.
///
/// A handle addresses the worker's mailbox and permits observation of its
/// termination. Dropping every handle that feeds a worker closes its
/// mailbox, which is how end of input propagates through a pipeline.
#[derive(Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    mailbox: mpsc::UnboundedSender<Value>,
    control: mpsc::UnboundedSender<Control>,
    exit: watch::Receiver<Option<ExitReason>>,
}

impl WorkerHandle {
    pub(crate) fn new(id: WorkerId) -> (Self, WorkerChannels) {
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        (
            Self {
                id,
                mailbox: mailbox_tx,
                control: control_tx,
                exit: exit_rx,
            },
            WorkerChannels {
                mailbox: mailbox_rx,
                control: control_rx,
                exit: exit_tx,
            },
        )
    }

    /// The worker's unique id.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Whether the worker has not yet published an exit reason.
    pub fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// Fire-and-forget delivery of a payload to the worker's mailbox.
    ///
    /// Never blocks. Silently dropped if the worker is gone.
    pub fn cast(&self, msg: Value) {
        if self.mailbox.send(msg).is_err() {
            trace!(worker = %self.id, "payload dropped, worker is gone");
        }
    }

    /// Deliver an abnormal exit signal to the worker.
    ///
    /// The worker terminates with `reason`, which then cascades through
    /// its links and surfaces at the pipeline output as
    /// [`ChainOutput::Error`](crate::ChainOutput::Error).
    pub fn kill(&self, reason: impl Into<String>) {
        let _ = self.control.send(Control::Kill(reason.into()));
    }

    /// Wait for the worker to terminate and return its exit reason.
    pub async fn wait(&self) -> ExitReason {
        let mut exit = self.exit.clone();
        let result = match exit.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => reason.as_ref().cloned().unwrap_or(ExitReason::Normal),
            Err(_) => ExitReason::Abnormal("worker terminated without an exit report".to_string()),
        };
        result
    }

    pub(crate) fn exit_watch(&self) -> watch::Receiver<Option<ExitReason>> {
        self.exit.clone()
    }

    pub(crate) fn request_link(&self, peer: WorkerId, exit: watch::Receiver<Option<ExitReason>>) {
        let _ = self.control.send(Control::Link { peer, exit });
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Execution context handed to a worker body.
///
/// Owns the worker's mailbox and its options bag. The bag always starts
/// with the injected `(next, successors)` entry; everything the caller
/// declared follows.
pub struct WorkerContext {
    mailbox: mpsc::UnboundedReceiver<Value>,
    options: Options,
    id: WorkerId,
}

impl WorkerContext {
    /// Receive the next payload, or `None` at end of input.
    ///
    /// End of input means every upstream handle has been dropped: all
    /// upstream workers finished and the caller closed the pipeline
    /// input.
    pub async fn get(&mut self) -> Option<Value> {
        self.mailbox.recv().await
    }

    /// Forward a payload to every worker bound to `next`.
    pub fn send(&self, msg: Value) {
        self.send_to(NEXT, msg);
    }

    /// Forward a payload to every worker bound to `tag`.
    ///
    /// Delivery is asynchronous and unordered across recipients. Values
    /// bound to the tag that are not worker handles are skipped, so a
    /// routing tag may mix optional recipients with plain data.
    pub fn send_to(&self, tag: &str, msg: Value) {
        let mut delivered = 0usize;
        for value in self.options.get_all(tag) {
            match value {
                OptionValue::Worker(peer) => {
                    peer.cast(msg.clone());
                    delivered += 1;
                }
                OptionValue::Workers(peers) => {
                    for peer in peers {
                        peer.cast(msg.clone());
                        delivered += 1;
                    }
                }
                OptionValue::Data(_) => {
                    trace!(worker = %self.id, tag, "skipping non-addressable recipient");
                }
            }
        }
        if delivered == 0 {
            debug!(worker = %self.id, tag, "no addressable recipients for tag");
        }
    }

    /// The worker's options bag, `(next, successors)` first.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The worker's downstream successors.
    pub fn successors(&self) -> Vec<WorkerHandle> {
        self.options.workers(NEXT)
    }

    /// This worker's id.
    pub fn id(&self) -> WorkerId {
        self.id
    }
}

/// Start-up acknowledgement sent back to the builder.
enum StartAck {
    Ready,
    DeadSuccessor(WorkerId),
}

/// Link subscriptions a supervisor selects over.
type LinkSet = StreamMap<WorkerId, WatchStream<Option<ExitReason>>>;

/// Spawn a worker and wait for its start-up acknowledgement.
///
/// Returns the worker's handle once it is linked to every successor, or
/// [`ChainError::Build`] if a successor died first or the starter was
/// lost.
pub(crate) async fn spawn_worker(
    fun: WorkerFn,
    options: Options,
    successors: Vec<WorkerHandle>,
) -> Result<WorkerHandle> {
    let id = WorkerId::new();
    let (handle, channels) = WorkerHandle::new(id);
    let (ack_tx, ack_rx) = oneshot::channel();
    tokio::spawn(starter(fun, options, successors, channels, handle.exit_watch(), ack_tx, id));
    match ack_rx.await {
        Ok(StartAck::Ready) => Ok(handle),
        Ok(StartAck::DeadSuccessor(peer)) => Err(ChainError::build(format!(
            "successor {peer} of worker {id} terminated before start-up"
        ))),
        Err(_) => Err(ChainError::build(format!(
            "worker {id} dropped its start-up acknowledgement"
        ))),
    }
}

async fn starter(
    fun: WorkerFn,
    options: Options,
    successors: Vec<WorkerHandle>,
    channels: WorkerChannels,
    own_exit: watch::Receiver<Option<ExitReason>>,
    ack: oneshot::Sender<StartAck>,
    id: WorkerId,
) {
    let WorkerChannels { mailbox, control, exit } = channels;

    let mut links = LinkSet::new();
    for peer in &successors {
        if !peer.is_alive() {
            debug!(worker = %id, peer = %peer.id(), "successor already terminated, aborting start-up");
            let _ = ack.send(StartAck::DeadSuccessor(peer.id()));
            let _ = exit.send(Some(ExitReason::Normal));
            return;
        }
        links.insert(peer.id(), WatchStream::new(peer.exit_watch()));
        peer.request_link(id, own_exit.clone());
    }
    let _ = ack.send(StartAck::Ready);

    let mut options = options;
    options.push_front(OptionEntry::Pair(
        NEXT.to_string(),
        OptionValue::Workers(successors),
    ));

    debug!(worker = %id, links = links.len(), "worker started");
    let body = tokio::spawn(fun(WorkerContext { mailbox, options, id }));
    let reason = supervise(body, control, links, id).await;
    debug!(worker = %id, reason = %reason, "worker exited");
    let _ = exit.send(Some(reason));
}

/// Supervision loop shared by all non-trapping workers.
///
/// Resolves to the worker's exit reason: the body's own result, a kill
/// request, or the cascaded reason of an abnormally exited linked peer.
async fn supervise(
    mut body: JoinHandle<Result<()>>,
    mut control: mpsc::UnboundedReceiver<Control>,
    mut links: LinkSet,
    id: WorkerId,
) -> ExitReason {
    enum Verdict {
        Completed(std::result::Result<Result<()>, tokio::task::JoinError>),
        Interrupted(String),
    }

    let verdict = loop {
        tokio::select! {
            result = &mut body => break Verdict::Completed(result),
            Some(request) = control.recv() => match request {
                Control::Link { peer, exit } => {
                    links.insert(peer, WatchStream::new(exit));
                }
                Control::Kill(reason) => {
                    warn!(worker = %id, %reason, "kill requested");
                    break Verdict::Interrupted(reason);
                }
            },
            Some((peer, event)) = links.next() => {
                if let Some(ExitReason::Abnormal(reason)) = event {
                    debug!(worker = %id, peer = %peer, %reason, "linked worker failed, cascading");
                    break Verdict::Interrupted(reason);
                }
            },
        }
    };

    match verdict {
        Verdict::Completed(result) => exit_reason(result),
        Verdict::Interrupted(reason) => {
            body.abort();
            let _ = (&mut body).await;
            ExitReason::Abnormal(reason)
        }
    }
}

fn exit_reason(result: std::result::Result<Result<()>, tokio::task::JoinError>) -> ExitReason {
    match result {
        Ok(Ok(())) => ExitReason::Normal,
        Ok(Err(err)) => ExitReason::Abnormal(err.to_string()),
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker body panicked".to_string());
            ExitReason::Abnormal(reason)
        }
        Err(_) => ExitReason::Abnormal("killed".to_string()),
    }
}
