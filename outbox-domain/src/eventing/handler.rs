//! 事件处理器（EventHandler）与注册表（HandlerRegistry）
//!
//! 业务处理器按负载类型实现 `EventHandler<P>`；注册表以事件类型为键保存类型擦除后的
//! 调用闭包，分发器只按标签查找，不感知具体业务。新增事件类型只需新增一条注册。
//!
use crate::envelope::Envelope;
use crate::error::{OutboxError, OutboxResult};
use crate::payload::{AnyPayload, EventPayload, EventType, PayloadRegistry};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

/// 事件处理器：处理某一类型的负载
///
/// 处理器可能被重复调用（至少一次投递），其副作用需可安全重放。
#[async_trait]
pub trait EventHandler<P>: Send + Sync
where
    P: EventPayload,
{
    /// 处理器名称（用于日志与失败记录）
    fn handler_name(&self) -> &str;

    async fn handle(&self, payload: &P) -> anyhow::Result<()>;
}

type HandlerFn = Arc<dyn Fn(Envelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

fn accepts<P: EventPayload>(payload: &AnyPayload) -> bool {
    payload.downcast_ref::<P>().is_some()
}

#[derive(Clone)]
pub struct RegisteredHandler {
    name: String,
    call: HandlerFn,
    accepts: fn(&AnyPayload) -> bool,
}

impl RegisteredHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 负载是否已是该处理器注册时的类型
    pub fn accepts(&self, payload: &AnyPayload) -> bool {
        (self.accepts)(payload)
    }

    pub async fn invoke(&self, envelope: Envelope) -> anyhow::Result<()> {
        (self.call)(envelope).await
    }
}

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, RegisteredHandler>,
    payloads: PayloadRegistry,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            payloads: PayloadRegistry::builtin(),
        }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同时登记其负载结构；同一事件类型只允许一个处理器
    pub fn register<P, H>(&mut self, handler: Arc<H>) -> OutboxResult<()>
    where
        P: EventPayload,
        H: EventHandler<P> + 'static,
    {
        if self.handlers.contains_key(&P::EVENT_TYPE) {
            return Err(OutboxError::HandlerAlreadyRegistered(P::EVENT_TYPE.to_string()));
        }

        let name = handler.handler_name().to_string();
        let call: HandlerFn = Arc::new(move |envelope: Envelope| {
            let handler = handler.clone();
            async move {
                // 键与闭包同一泛型 P，只有调用方以错误类型发布时才会失败
                let Some(payload) = envelope.payload_as::<P>() else {
                    return Err(anyhow::Error::new(OutboxError::PayloadTypeMismatch {
                        event_type: envelope.event_type().to_string(),
                        expected: type_name::<P>(),
                    }));
                };
                handler.handle(payload).await
            }
            .boxed()
        });

        self.payloads.register::<P>();
        self.handlers.insert(
            P::EVENT_TYPE,
            RegisteredHandler {
                name,
                call,
                accepts: accepts::<P>,
            },
        );
        Ok(())
    }

    /// 链式注册，便于在构建阶段一次性装配
    pub fn with<P, H>(mut self, handler: Arc<H>) -> OutboxResult<Self>
    where
        P: EventPayload,
        H: EventHandler<P> + 'static,
    {
        self.register::<P, H>(handler)?;
        Ok(self)
    }

    pub fn get(&self, event_type: &EventType) -> Option<&RegisteredHandler> {
        self.handlers.get(event_type)
    }

    pub fn payloads(&self) -> &PayloadRegistry {
        &self.payloads
    }

    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_record::RecordId;
    use crate::payload::{OrderCreatedPayload, UserRegisteredPayload};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler<UserRegisteredPayload> for Recorder {
        fn handler_name(&self) -> &str {
            "recorder"
        }

        async fn handle(&self, payload: &UserRegisteredPayload) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(payload.email.clone());
            Ok(())
        }
    }

    fn payload_for(name: &str) -> UserRegisteredPayload {
        UserRegisteredPayload {
            username: name.into(),
            email: format!("{name}@example.com"),
        }
    }

    #[tokio::test]
    async fn dispatches_by_event_type() {
        let recorder = Arc::new(Recorder::default());
        let registry = HandlerRegistry::new()
            .with::<UserRegisteredPayload, _>(recorder.clone())
            .unwrap();

        let handler = registry.get(&EventType::USER_REGISTERED).unwrap();
        assert_eq!(handler.name(), "recorder");
        assert!(handler.accepts(&(Arc::new(payload_for("x")) as AnyPayload)));
        assert!(!handler.accepts(&(Arc::new(serde_json::json!({})) as AnyPayload)));
        handler
            .invoke(Envelope::typed(payload_for("a"), RecordId(1)))
            .await
            .unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a@example.com"]);
        assert!(registry.get(&EventType::ORDER_CREATED).is_none());
        assert_eq!(registry.event_types(), vec![EventType::USER_REGISTERED]);
    }

    #[tokio::test]
    async fn wrong_payload_type_is_reported() {
        let registry = HandlerRegistry::new()
            .with::<UserRegisteredPayload, _>(Arc::new(Recorder::default()))
            .unwrap();

        let order = OrderCreatedPayload {
            order_id: "o-1".into(),
            product_name: "X".into(),
            amount: 1.0,
        };
        let envelope = Envelope::new(Arc::new(order), EventType::USER_REGISTERED, RecordId(1));
        let err = registry
            .get(&EventType::USER_REGISTERED)
            .unwrap()
            .invoke(envelope)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<OutboxError>(),
            Some(OutboxError::PayloadTypeMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register::<UserRegisteredPayload, _>(Arc::new(Recorder::default()))
            .unwrap();
        let err = registry
            .register::<UserRegisteredPayload, _>(Arc::new(Recorder::default()))
            .unwrap_err();
        assert!(matches!(err, OutboxError::HandlerAlreadyRegistered(_)));
    }
}
