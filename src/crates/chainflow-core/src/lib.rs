//! # chainflow-core: process pipelines with supervision
//!
//! A small runtime for building and executing **process pipelines**:
//! directed acyclic graphs of independently running workers that
//! communicate by asynchronous message passing. A topology is described
//! declaratively (a linear [`chain`], a [`fan_in`] of parallel branches,
//! or a single [`element`]) and [`create`] turns it into a running graph
//! of linked tokio tasks.
//!
//! The hard part is the construction and supervision protocol:
//!
//! - a worker starts only after its downstream successor is confirmed
//!   alive (construction is right-to-left);
//! - a start-up failure aborts construction cleanly, without orphans;
//! - an abnormal exit anywhere cascades through the link graph and
//!   surfaces to the caller as a terminal [`ChainOutput::Error`];
//! - a clean completion drains every terminal branch exactly once before
//!   [`ChainOutput::End`].
//!
//! ```text
//!                  ┌────────┐     ┌────────┐
//!   feed ────────▶ │ worker │ ──▶ │ worker │ ──┐
//!                  └────────┘     └────────┘   │   ┌────────────┐
//!                  ┌────────┐                  ├──▶│ aggregator │──▶ out
//!   feed ────────▶ │ worker │ ─────────────────┘   └────────────┘
//!                  └────────┘
//! ```
//!
//! Messages are fire-and-forget `serde_json::Value` payloads: FIFO per
//! sender/receiver pair, unordered across branches, no backpressure.
//!
//! # Quick start
//!
//! ```rust
//! use chainflow_core::{chain, create, element, ChainOutput, Options};
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> chainflow_core::Result<()> {
//!     let forward = || element(
//!         |mut ctx| Box::pin(async move {
//!             while let Some(msg) = ctx.get().await {
//!                 ctx.send(msg);
//!             }
//!             Ok(())
//!         }),
//!         Options::new(),
//!     );
//!
//!     let mut pipeline = create(chain(vec![forward(), forward()])).await?;
//!     pipeline.feed(json!("ping"));
//!     pipeline.close_input();
//!
//!     assert_eq!(pipeline.out().await, ChainOutput::Message(json!("ping")));
//!     assert_eq!(pipeline.out().await, ChainOutput::End);
//!     Ok(())
//! }
//! ```
//!
//! # Module organization
//!
//! - [`topology`]: the declarative DSL ([`element`], [`fan_in`],
//!   [`chain`]) and terminal-branch counting
//! - [`builder`]: right-to-left construction and [`create`]
//! - [`worker`]: handles, the start-up handshake, links and supervision
//! - [`options`]: the ordered options bag handed to every worker body
//! - [`pipeline`]: feeding input and draining output
//! - [`error`]: the [`ChainError`] taxonomy

pub mod builder;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod topology;
pub mod worker;

mod aggregator;

pub use builder::create;
pub use error::{ChainError, Result};
pub use options::{OptionEntry, OptionValue, Options, NEXT};
pub use pipeline::{feed, ChainMonitor, ChainOutput, Pipeline};
pub use topology::{chain, element, fan_in, Topology};
pub use worker::{ExitReason, WorkerContext, WorkerFn, WorkerFuture, WorkerHandle, WorkerId};
