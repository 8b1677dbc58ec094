//! Two-node Transit cluster on the in-memory hub.
//!
//! Starts `math` and `client` nodes, then walks through the protocol:
//! - A `math.add` call answered by the remote node
//! - Discovery and INFO exchange
//! - A PING/PONG latency sample
//! - A slow call canceled when its target disconnects
//!
//! Run:
//!   cargo run -p transit-demo-cluster -- --a 20 --b 22
//!   RUST_LOG=transit_engine=debug cargo run -p transit-demo-cluster -- --config cluster.toml

use anyhow::Context;
use clap::Parser;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transit_core::{
    CallContext, Command, JsonSerializer, NodeInfo, Payload, Serializer, ServiceInfo,
};
use transit_engine::{
    ActionError, ActionInvoker, Collaborators, LocalBus, MemoryHub, RegistryHandler, Transit,
    TransitConfig, events,
};

#[derive(Parser, Debug)]
#[command(name = "transit-cluster", about = "In-process Transit cluster walkthrough")]
struct Args {
    /// TOML engine config shared by both nodes.
    #[arg(long, env = "TRANSIT_CONFIG")]
    config: Option<PathBuf>,

    /// First operand for math.add.
    #[arg(long, default_value_t = 1)]
    a: i64,

    /// Second operand for math.add.
    #[arg(long, default_value_t = 2)]
    b: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("transit_demo_cluster=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            TransitConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => TransitConfig::default(),
    };

    let hub = MemoryHub::new();
    let math = start_node(&hub, &config, "math-1", true).await?;
    let client = start_node(&hub, &config, "client-1", false).await?;

    let call = CallContext::new("math.add", json!({ "a": args.a, "b": args.b }))?
        .with_target(math.node_id());
    let sum = client.request(call)?.await??;
    tracing::info!("math.add({}, {}) = {}", args.a, args.b, sum);

    client.discover_nodes().await?;

    let (pong_tx, mut pong_rx) = tokio::sync::mpsc::unbounded_channel();
    client.bus().on(events::NODE_PONG, move |args| {
        let _ = pong_tx.send(args);
    });
    client.send_ping(math.node_id())?;
    let sample = tokio::time::timeout(Duration::from_secs(2), pong_rx.recv())
        .await
        .context("no pong from math node")?
        .context("event bus dropped")?;
    tracing::info!("latency sample: {}", serde_json::Value::Array(sample));

    let slow = CallContext::new("math.slow", json!({}))?.with_target(math.node_id());
    let waiting = client.request(slow)?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
        .bus()
        .emit(events::NODE_DISCONNECTED, vec![json!(math.node_id())]);
    match waiting.await? {
        Ok(result) => tracing::warn!("slow call unexpectedly returned {}", result),
        Err(e) => tracing::info!("slow call: {}", e),
    }

    math.disconnect().await?;
    client.disconnect().await?;
    Ok(())
}

async fn start_node(
    hub: &MemoryHub,
    config: &TransitConfig,
    node_id: &str,
    serves_math: bool,
) -> anyhow::Result<Transit> {
    // Both nodes share one config; identities are per node.
    let config = TransitConfig {
        node_id: Some(node_id.to_string()),
        ..config.clone()
    };
    let mut info = NodeInfo::new(config.resolve_node_id()?).with_hostname("localhost");
    if serves_math {
        info = info.with_service(ServiceInfo::new("math", ["math.add", "math.slow"]));
    }
    let serializer: Arc<dyn Serializer> = Arc::new(JsonSerializer::new());

    let name = node_id.to_string();
    let registry: Arc<dyn RegistryHandler> =
        Arc::new(move |command: Command, message: &Payload| {
            tracing::info!(node = %name, %command, from = %message.get("sender"), "registry");
        });
    let invoker: Arc<dyn ActionInvoker> = Arc::new(math_actions);

    let transit = Transit::new(
        config.clone(),
        Collaborators {
            node: Arc::new(info),
            serializer: serializer.clone(),
            bus: LocalBus::new(),
            registry,
            invoker,
            transport_factory: hub.factory(config.prefix.clone(), serializer),
        },
    );
    anyhow::ensure!(transit.connect().await?, "node {node_id} failed to connect");
    transit.start_heartbeats();
    Ok(transit)
}

fn math_actions(context: CallContext) -> BoxFuture<'static, Result<Value, ActionError>> {
    async move {
        let params = Payload::new(context.params);
        match context.action.as_str() {
            "math.add" => Ok(json!(params.get("a").int64() + params.get("b").int64())),
            "math.slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
            other => Err(ActionError::named(
                "ServiceNotFoundError",
                format!("{other} is not served here"),
            )),
        }
    }
    .boxed()
}
