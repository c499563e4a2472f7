//! 示例业务处理器
//!
//! 两个处理器都只记录日志；特定输入会模拟失败，用于演示重试与永久失败。
//!
use async_trait::async_trait;
use outbox_domain::eventing::EventHandler;
use outbox_domain::payload::{OrderCreatedPayload, UserRegisteredPayload};
use tracing::info;

pub const FAILING_EMAIL: &str = "fail@example.com";
pub const FAILING_ORDER: &str = "FAIL123";

#[derive(Default)]
pub struct NotificationService;

impl NotificationService {
    fn send_welcome_email(&self, email: &str) {
        info!(email, "sending welcome email");
    }
}

#[async_trait]
impl EventHandler<UserRegisteredPayload> for NotificationService {
    fn handler_name(&self) -> &str {
        "notification"
    }

    async fn handle(&self, payload: &UserRegisteredPayload) -> anyhow::Result<()> {
        info!(email = %payload.email, "processing user registration");
        if payload.email == FAILING_EMAIL {
            anyhow::bail!("Simulated failure for email: {}", payload.email);
        }
        self.send_welcome_email(&payload.email);
        Ok(())
    }
}

#[derive(Default)]
pub struct OrderProcessingService;

#[async_trait]
impl EventHandler<OrderCreatedPayload> for OrderProcessingService {
    fn handler_name(&self) -> &str {
        "order-processing"
    }

    async fn handle(&self, payload: &OrderCreatedPayload) -> anyhow::Result<()> {
        info!(order_id = %payload.order_id, "processing order");
        if payload.order_id == FAILING_ORDER {
            anyhow::bail!("Simulated failure for order: {}", payload.order_id);
        }
        info!(
            order_id = %payload.order_id,
            product = %payload.product_name,
            amount = payload.amount,
            "order processed"
        );
        Ok(())
    }
}
