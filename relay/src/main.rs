//! Relay binary: Kafka bus, Redis correlation store, consumer loop.

use dishpatch_core::bus::BusClient;
use dishpatch_relay::{Config, RedisCorrelationStore, RelayService};
use dishpatch_redpanda::RedpandaBusClient;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store = RedisCorrelationStore::connect(&config.redis_url).await?;
    let bus: Arc<dyn BusClient> = Arc::new(
        RedpandaBusClient::builder()
            .brokers(&config.bootstrap_servers)
            .group_id(&config.group_id)
            .build()?,
    );

    let service = RelayService::new(Arc::new(store));

    tracing::info!(
        topic = %config.orders_topic,
        group_id = %config.group_id,
        "Relay consuming"
    );
    let mut consumer = bus.subscribe(&[&config.orders_topic]).await?;
    service.run(consumer.as_mut()).await;

    Ok(())
}
