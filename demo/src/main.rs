mod services;

use anyhow::Result as AnyResult;
use chrono::Utc;
use outbox_domain::config::OutboxConfig;
use outbox_domain::event_record::EventStatus;
use outbox_domain::eventing::{HandlerRegistry, OutboxEngine};
use outbox_domain::payload::{OrderCreatedPayload, UserRegisteredPayload};
use outbox_domain::persist::{EventRecordStore, InMemoryEventRecordStore};
use outbox_domain::telemetry;
use services::{FAILING_EMAIL, FAILING_ORDER, NotificationService, OrderProcessingService};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    telemetry::init();

    let config = OutboxConfig::from_env()?;
    let started_at = Utc::now();
    let store = Arc::new(InMemoryEventRecordStore::new());

    let handlers = HandlerRegistry::new()
        .with::<UserRegisteredPayload, _>(Arc::new(NotificationService))?
        .with::<OrderCreatedPayload, _>(Arc::new(OrderProcessingService))?;

    let handle = OutboxEngine::builder()
        .store(store.clone())
        .handlers(handlers)
        .config(config)
        .build()
        .start()?;

    let publisher = handle.publisher();
    publisher
        .publish_event(UserRegisteredPayload {
            username: "alice".into(),
            email: "ok@example.com".into(),
        })
        .await?;
    publisher
        .publish_event(UserRegisteredPayload {
            username: "mallory".into(),
            email: FAILING_EMAIL.into(),
        })
        .await?;
    publisher
        .publish_event(OrderCreatedPayload {
            order_id: "A-1001".into(),
            product_name: "Keyboard".into(),
            amount: 49.5,
        })
        .await?;
    publisher
        .publish_event(OrderCreatedPayload {
            order_id: FAILING_ORDER.into(),
            product_name: "X".into(),
            amount: 10.0,
        })
        .await?;

    // 等到失败事件用尽重试，或收到 Ctrl-C
    let settle = settle_time(&config);
    info!(?settle, "waiting for retries to settle; press Ctrl-C to stop early");
    tokio::select! {
        _ = tokio::time::sleep(settle) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    handle.shutdown();
    handle.join().await;

    for status in [
        EventStatus::Processed,
        EventStatus::Retry,
        EventStatus::Pending,
        EventStatus::Failed,
    ] {
        let records = store.find_by_status(status).await?;
        info!(status = %status, count = records.len(), "final state");
    }
    for record in store
        .find_by_status_and_created_at_after(EventStatus::Failed, started_at)
        .await?
    {
        info!(
            record_id = ?record.id(),
            event_type = %record.event_type(),
            retry_count = record.retry_count(),
            error = record.error_message().unwrap_or_default(),
            "permanently failed"
        );
    }

    Ok(())
}

/// 覆盖全部退避时长与若干扫描周期
fn settle_time(config: &OutboxConfig) -> Duration {
    let backoff: Duration = (0..config.max_retries)
        .map(|n| config.backoff_delay(n))
        .sum();
    backoff + config.retry_interval * (config.max_retries + 1)
}
