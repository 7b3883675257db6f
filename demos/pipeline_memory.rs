//! Three-stage pipeline on the in-memory transport.
//!
//! A camera publishes frames, a filter stage forwards them with an extra
//! topic and its metrics attached, and a display prints what arrives. Ids
//! assigned by the camera pass through the filter unchanged.
//!
//! Run with: cargo run --example pipeline_memory

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use filter_mq::{
    // ---
    MemoryHub,
    MetricsRecord,
    Mq,
    MqConfig,
    Payload,
    Receiver,
    ReceiverConfig,
    Result,
    Sender,
    SenderConfig,
    Topics,
    METRICS_TOPIC,
};
use serde_json::json;
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

const WAIT: Option<Duration> = Some(Duration::from_secs(1));
const NOW: Option<Duration> = Some(Duration::ZERO);

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let hub = MemoryHub::new();

    let mut camera =
        Sender::new(SenderConfig::new("camera").output("memory://camera").with_hub(hub.clone()))
            .await?;

    let filter_config = MqConfig::new("edges")
        .source("memory://camera;main")
        .output("memory://filtered")
        .with_extra_metric("stage", json!("edges"))
        .with_hub(hub.clone());
    let mut filter = Mq::new(filter_config).await?;

    let mut display = Receiver::new(
        ReceiverConfig::new("display")
            .source("memory://filtered;*")
            .with_hub(hub.clone()),
    )
    .await?;

    // Prime the pull requests.
    filter.recv(NOW).await?;
    display.recv(None, NOW).await?;

    for frame in 0..10u64 {
        let pixels = vec![frame as u8; 64 * 48 * 3];
        let main = Payload::with_data(serde_json::to_vec(&json!({ "frame": frame }))?, pixels);
        camera.send(Topics::from([("main".to_string(), main)]), None, WAIT).await?;

        let mut topics = filter.recv(WAIT).await?.expect("camera frame");
        let edges = Payload::json(&json!({ "edges": frame * 2 }))?;
        topics.insert("edges".to_string(), edges);
        filter.send(topics, WAIT).await?;

        let env = display.recv(None, WAIT).await?.expect("filtered frame");
        let metrics: Option<MetricsRecord> = env
            .topic(METRICS_TOPIC)
            .map(|p| p.meta_json())
            .transpose()?;

        println!(
            "id={} topics={:?} frames_out={:?}",
            env.id,
            env.topics.keys().collect::<Vec<_>>(),
            metrics.map(|m| m.frame_count),
        );
    }

    filter.close();
    display.close();
    camera.close();
    Ok(())
}
