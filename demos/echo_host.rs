//! Echo Host - serves a surface over stdin/stdout.
//!
//! This example demonstrates:
//! - Building a manager with typed handlers
//! - Waiting for the surface's readiness signal
//! - Issuing a correlated request and a fire-and-forget message
//! - Streaming progress from a long-running handler
//!
//! Each line on stdin/stdout is one JSON message. Try it by hand:
//!
//! ```text
//! $ RUST_LOG=debug cargo run --example echo_host
//! {"id":"s1","type":"__ready__"}
//! {"id":"s2","type":"echo","payload":{"message":"hello"},"expectsResponse":true}
//! ```
//!
//! Logs go to stderr so they never interleave with protocol lines.

use std::time::Duration;

use panel_bridge::transport::StreamTransport;
use panel_bridge::{BridgeError, CommunicationManager, RequestContext};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Input structure for the echo handler.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo handler.
#[derive(Serialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let manager = CommunicationManager::builder()
        .message_timeout(Duration::from_secs(10))
        .handle("echo", |data: EchoInput, _ctx| async move {
            Ok::<_, BridgeError>(EchoOutput { echo: data.message })
        })
        .handle_with_progress("count", |to: u32, ctx: RequestContext| async move {
            for n in 1..=to {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ctx.send("count-progress", &n)?;
            }
            Ok::<_, BridgeError>(to)
        })
        .build(StreamTransport::stdio())?;

    manager.initialize().await?;
    tracing::info!("surface connected");

    manager.send("status", &"host ready")?;
    match manager.request("get-theme", ()).await {
        Ok(theme) => tracing::info!(%theme, "surface theme"),
        Err(e) => tracing::warn!(error = %e, "surface did not report a theme"),
    }

    // Serve until the surface closes stdin.
    manager.closed().await;
    Ok(())
}
