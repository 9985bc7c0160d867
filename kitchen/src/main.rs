//! Kitchen service binary: Kafka bus, Postgres stores, scheduler, consumer
//! loop.

use dishpatch_core::bus::BusClient;
use dishpatch_core::scheduler::{postgres::PostgresTimerStore, Scheduler, TimerStore};
use dishpatch_kitchen::store::postgres::PostgresKitchenStore;
use dishpatch_kitchen::{Config, KitchenService};
use dishpatch_redpanda::RedpandaBusClient;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often the scheduler looks for due emissions.
const SCHEDULER_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let pool = PgPool::connect(&config.database_url).await?;
    let store = PostgresKitchenStore::new(pool.clone());
    store.ensure_schema().await?;
    let timers = PostgresTimerStore::new(pool);
    timers.ensure_schema().await?;

    let bus: Arc<dyn BusClient> = Arc::new(
        RedpandaBusClient::builder()
            .brokers(&config.bootstrap_servers)
            .group_id(&config.group_id)
            .build()?,
    );
    let timers: Arc<dyn TimerStore> = Arc::new(timers);

    // First tick recovers emissions left pending by a previous process.
    tokio::spawn(
        Scheduler::new(Arc::clone(&timers), Arc::clone(&bus), SCHEDULER_POLL_INTERVAL).run(),
    );

    let service = KitchenService::new(
        Arc::clone(&bus),
        Arc::new(store),
        timers,
        config.orders_topic.clone(),
    );

    tracing::info!(
        topic = %config.orders_topic,
        group_id = %config.group_id,
        "Kitchen service consuming"
    );
    let mut consumer = bus.subscribe(&[&config.orders_topic]).await?;
    service.run(consumer.as_mut()).await;

    Ok(())
}
