//! Pipeline construction: right-to-left builds and the `create` facade.
//!
//! Construction walks the topology back to front so that when a worker
//! starts, its `next` list is already a set of live handles, which is
//! what makes the link/start-ack protocol safe. Any start-up failure
//! aborts the whole build; teardown drops every handle, so
//! already-started workers terminate in bounded time through input
//! closure.

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::aggregator;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::topology::Topology;
use crate::worker::{spawn_worker, WorkerHandle};

/// Build `topology` against the given successor handles.
///
/// Returns the handles of the topmost workers started for this subtree,
/// which the level above must feed.
pub(crate) fn build(
    topology: Topology,
    successors: Vec<WorkerHandle>,
) -> BoxFuture<'static, Result<Vec<WorkerHandle>>> {
    Box::pin(async move {
        match topology {
            Topology::Element { fun, options } => {
                let handle = spawn_worker(fun, options, successors).await?;
                Ok(vec![handle])
            }
            Topology::Chain(children) => {
                let mut current = successors;
                for child in children.into_iter().rev() {
                    current = build(child, current).await?;
                }
                Ok(current)
            }
            Topology::FanIn(children) => {
                let mut entries = Vec::new();
                for child in children {
                    entries.extend(build(child, successors.clone()).await?);
                }
                Ok(entries)
            }
        }
    })
}

/// Construct and start a pipeline for `topology`.
///
/// Validates the shape, spawns the aggregator sized to the topology's
/// terminal-branch count, then builds the worker graph back to front.
/// On success the returned [`Pipeline`] carries the entry-point handles
/// and the termination token; on failure everything already started is
/// torn down and the error is returned.
pub async fn create(topology: Topology) -> Result<Pipeline> {
    topology.validate()?;
    let branches = topology.terminal_count();
    let (aggregator, monitor, task) = aggregator::spawn(branches);
    debug!(branches, "constructing pipeline");
    match build(topology, vec![aggregator]).await {
        Ok(entries) => {
            debug!(entries = entries.len(), "pipeline constructed");
            Ok(Pipeline::new(entries, monitor))
        }
        Err(err) => {
            warn!(error = %err, "pipeline construction failed, tearing down");
            task.abort();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainError;
    use crate::options::Options;
    use crate::topology::{chain, element, fan_in};
    use crate::worker::{WorkerContext, WorkerFuture};

    fn forward() -> Topology {
        element(
            |mut ctx: WorkerContext| -> WorkerFuture {
                Box::pin(async move {
                    while let Some(msg) = ctx.get().await {
                        ctx.send(msg);
                    }
                    Ok(())
                })
            },
            Options::new(),
        )
    }

    #[tokio::test]
    async fn fan_in_reports_one_entry_per_branch() {
        let pipeline = create(fan_in(vec![forward(), forward(), forward()]))
            .await
            .unwrap();
        assert_eq!(pipeline.entries().len(), 3);
    }

    #[tokio::test]
    async fn chain_reports_the_entries_of_its_first_stage() {
        let pipeline = create(chain(vec![fan_in(vec![forward(), forward()]), forward()]))
            .await
            .unwrap();
        assert_eq!(pipeline.entries().len(), 2);
    }

    #[tokio::test]
    async fn empty_shapes_fail_before_spawning() {
        assert!(matches!(
            create(chain(vec![])).await.unwrap_err(),
            ChainError::Topology(_)
        ));
        assert!(matches!(
            create(fan_in(vec![])).await.unwrap_err(),
            ChainError::Topology(_)
        ));
    }

    #[tokio::test]
    async fn build_fails_against_a_dead_successor() {
        let victim = spawn_worker(
            std::sync::Arc::new(|mut ctx: WorkerContext| -> WorkerFuture {
                Box::pin(async move {
                    while ctx.get().await.is_some() {}
                    Ok(())
                })
            }),
            Options::new(),
            Vec::new(),
        )
        .await
        .unwrap();
        victim.kill("gone");
        victim.wait().await;

        let err = build(forward(), vec![victim]).await.unwrap_err();
        assert!(matches!(err, ChainError::Build(_)));
    }
}
