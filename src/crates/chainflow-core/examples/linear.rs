//! Minimal linear pipeline: two forwarding stages and an explicit close.
//!
//! Run with `RUST_LOG=debug cargo run --example linear` to watch the
//! start-up handshake and exits.

use chainflow_core::{chain, create, element, ChainOutput, Options, Result};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let stage = |name: &'static str| {
        element(
            move |mut ctx| {
                Box::pin(async move {
                    while let Some(msg) = ctx.get().await {
                        tracing::info!(stage = name, payload = %msg, "forwarding");
                        ctx.send(msg);
                    }
                    Ok(())
                })
            },
            Options::new(),
        )
    };

    let mut pipeline = create(chain(vec![stage("head"), stage("tail")])).await?;
    for seq in 0..3 {
        pipeline.feed(json!({ "seq": seq }));
    }
    pipeline.close_input();

    loop {
        match pipeline.out().await {
            ChainOutput::Message(msg) => println!("out: {msg}"),
            ChainOutput::End => {
                println!("end of stream");
                break;
            }
            ChainOutput::Error(reason) => {
                eprintln!("pipeline failed: {reason}");
                break;
            }
        }
    }
    Ok(())
}
