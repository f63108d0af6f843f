//! Fan-in of two labelled branches draining into one output stream.

use chainflow_core::{create, element, fan_in, ChainOutput, Options, Result};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let branch = |label: &'static str| {
        element(
            move |mut ctx| {
                Box::pin(async move {
                    while let Some(msg) = ctx.get().await {
                        ctx.send(json!({ "branch": label, "payload": msg }));
                    }
                    Ok(())
                })
            },
            Options::new(),
        )
    };

    let pipeline = create(fan_in(vec![branch("left"), branch("right")])).await?;
    pipeline.entries()[0].cast(json!(1));
    pipeline.entries()[1].cast(json!(2));

    let (messages, terminal) = pipeline.finish().await;
    for msg in &messages {
        println!("out: {msg}");
    }
    assert_eq!(terminal, ChainOutput::End);
    Ok(())
}
