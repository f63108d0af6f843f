//! End-to-end pipeline scenarios.
//!
//! These tests exercise complete topologies through the public surface:
//! ordering on linear chains, fan-in and fan-out, failure propagation,
//! cancellation, and isolation between pipelines.

use chainflow_core::{
    chain, create, element, fan_in, ChainError, ChainOutput, OptionValue, Options, Topology,
};
use serde_json::{json, Value};

/// A worker that forwards every payload to `next` unchanged.
fn identity() -> Topology {
    element(
        |mut ctx| {
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

/// A worker that forwards every payload twice.
fn doubler() -> Topology {
    element(
        |mut ctx| {
            Box::pin(async move {
                while let Some(msg) = ctx.get().await {
                    ctx.send(msg.clone());
                    ctx.send(msg);
                }
                Ok(())
            })
        },
        Options::new(),
    )
}

/// A worker that fails with reason `boom` on its first payload.
fn crash_on_input() -> Topology {
    element(
        |mut ctx| {
            Box::pin(async move {
                let _ = ctx.get().await;
                Err(ChainError::worker("boom"))
            })
        },
        Options::new(),
    )
}

fn sorted(mut messages: Vec<Value>) -> Vec<Value> {
    messages.sort_by_key(|value| value.to_string());
    messages
}

#[tokio::test]
async fn linear_chain_preserves_order() {
    let mut pipeline = create(chain(vec![identity(), identity()])).await.unwrap();
    pipeline.feed(json!("a"));
    pipeline.feed(json!("b"));
    pipeline.close_input();

    assert_eq!(pipeline.out().await, ChainOutput::Message(json!("a")));
    assert_eq!(pipeline.out().await, ChainOutput::Message(json!("b")));
    assert_eq!(pipeline.out().await, ChainOutput::End);
}

#[tokio::test]
async fn doubler_emits_each_payload_twice() {
    let mut pipeline = create(chain(vec![identity(), doubler()])).await.unwrap();
    pipeline.feed(json!(1));
    pipeline.close_input();

    assert_eq!(pipeline.out().await, ChainOutput::Message(json!(1)));
    assert_eq!(pipeline.out().await, ChainOutput::Message(json!(1)));
    assert_eq!(pipeline.out().await, ChainOutput::End);
}

#[tokio::test]
async fn fan_out_duplicates_into_each_branch() {
    let topology = chain(vec![identity(), fan_in(vec![identity(), identity()])]);
    let pipeline = create(topology).await.unwrap();
    assert_eq!(pipeline.entries().len(), 1);

    pipeline.feed(json!("x"));
    let (messages, terminal) = pipeline.finish().await;
    assert_eq!(terminal, ChainOutput::End);
    assert_eq!(messages, vec![json!("x"), json!("x")]);
}

#[tokio::test]
async fn fan_in_merges_independent_branches() {
    let pipeline = create(fan_in(vec![identity(), identity()])).await.unwrap();
    assert_eq!(pipeline.entries().len(), 2);

    pipeline.entries()[0].cast(json!(1));
    pipeline.entries()[0].cast(json!(2));
    pipeline.entries()[1].cast(json!(3));

    let (messages, terminal) = pipeline.finish().await;
    assert_eq!(terminal, ChainOutput::End);
    assert_eq!(sorted(messages), vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn worker_failure_collapses_the_pipeline() {
    let mut pipeline = create(chain(vec![identity(), crash_on_input()]))
        .await
        .unwrap();
    pipeline.feed(json!("x"));

    assert_eq!(pipeline.out().await, ChainOutput::Error("boom".into()));
    // The terminal result is sticky: no further payloads, same error.
    assert_eq!(pipeline.out().await, ChainOutput::Error("boom".into()));
}

#[tokio::test]
async fn failure_in_one_branch_beats_healthy_branches() {
    let mut pipeline = create(fan_in(vec![identity(), crash_on_input()]))
        .await
        .unwrap();
    pipeline.entries()[1].cast(json!("x"));

    assert_eq!(pipeline.out().await, ChainOutput::Error("boom".into()));
}

#[tokio::test]
async fn empty_shapes_are_construction_errors() {
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
async fn killing_the_entry_worker_cancels_the_pipeline() {
    let mut pipeline = create(chain(vec![identity(), identity()])).await.unwrap();
    pipeline.entries()[0].kill("kill_req");

    assert_eq!(pipeline.out().await, ChainOutput::Error("kill_req".into()));
}

#[tokio::test]
async fn pipelines_are_isolated_from_each_other() {
    let mut left = create(chain(vec![identity()])).await.unwrap();
    let mut right = create(chain(vec![identity()])).await.unwrap();

    left.feed(json!("left"));
    right.feed(json!("right"));
    left.close_input();
    right.close_input();

    assert_eq!(left.out().await, ChainOutput::Message(json!("left")));
    assert_eq!(left.out().await, ChainOutput::End);
    assert_eq!(right.out().await, ChainOutput::Message(json!("right")));
    assert_eq!(right.out().await, ChainOutput::End);
}

#[tokio::test]
async fn a_failed_pipeline_does_not_disturb_another() {
    let mut healthy = create(chain(vec![identity()])).await.unwrap();
    let mut failing = create(chain(vec![crash_on_input()])).await.unwrap();

    failing.feed(json!("x"));
    assert_eq!(failing.out().await, ChainOutput::Error("boom".into()));

    healthy.feed(json!("still here"));
    healthy.close_input();
    assert_eq!(healthy.out().await, ChainOutput::Message(json!("still here")));
    assert_eq!(healthy.out().await, ChainOutput::End);
}

#[tokio::test]
async fn options_pass_through_to_the_body() {
    let labelled = element(
        |mut ctx| {
            Box::pin(async move {
                let label = match ctx.options().first("label") {
                    Some(OptionValue::Data(value)) => value.clone(),
                    _ => json!(null),
                };
                while let Some(msg) = ctx.get().await {
                    ctx.send(json!({ "label": label, "payload": msg }));
                }
                Ok(())
            })
        },
        Options::new().with_data("label", json!("stage-a")),
    );

    let mut pipeline = create(chain(vec![labelled])).await.unwrap();
    pipeline.feed(json!(7));
    pipeline.close_input();

    assert_eq!(
        pipeline.out().await,
        ChainOutput::Message(json!({ "label": "stage-a", "payload": 7 }))
    );
    assert_eq!(pipeline.out().await, ChainOutput::End);
}

#[tokio::test]
async fn routing_tags_reach_extra_recipients() {
    // A side pipeline acting as an audit sink.
    let mut audit = create(chain(vec![identity()])).await.unwrap();
    let audit_entry = audit.entries()[0].clone();

    // The main pipeline tees every payload to the audit tag. The tag
    // also carries a non-addressable value, which must be skipped.
    let tee = element(
        |mut ctx| {
            Box::pin(async move {
                while let Some(msg) = ctx.get().await {
                    ctx.send_to("audit", msg.clone());
                    ctx.send(msg);
                }
                Ok(())
            })
        },
        Options::new()
            .with_worker("audit", audit_entry)
            .with_data("audit", json!("not a worker")),
    );

    let mut main_line = create(chain(vec![tee])).await.unwrap();
    main_line.feed(json!(7));
    main_line.close_input();
    assert_eq!(main_line.out().await, ChainOutput::Message(json!(7)));
    assert_eq!(main_line.out().await, ChainOutput::End);

    audit.close_input();
    assert_eq!(audit.out().await, ChainOutput::Message(json!(7)));
    assert_eq!(audit.out().await, ChainOutput::End);
}

#[tokio::test]
async fn deep_nesting_counts_every_terminal_branch() {
    // chain([ id, fan_in([ id, chain([id, fan_in([id, id])]) ]) ]):
    // three terminal branches in total.
    let topology = chain(vec![
        identity(),
        fan_in(vec![
            identity(),
            chain(vec![identity(), fan_in(vec![identity(), identity()])]),
        ]),
    ]);
    assert_eq!(topology.terminal_count(), 3);

    let pipeline = create(topology).await.unwrap();
    assert_eq!(pipeline.entries().len(), 1);

    pipeline.feed(json!("m"));
    let (messages, terminal) = pipeline.finish().await;
    assert_eq!(terminal, ChainOutput::End);
    assert_eq!(messages, vec![json!("m"), json!("m"), json!("m")]);
}
