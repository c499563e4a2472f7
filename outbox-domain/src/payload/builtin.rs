use super::{EventPayload, EventType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegisteredPayload {
    pub username: String,
    pub email: String,
}

impl EventPayload for UserRegisteredPayload {
    const EVENT_TYPE: EventType = EventType::USER_REGISTERED;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedPayload {
    pub order_id: String,
    pub product_name: String,
    pub amount: f64,
}

impl EventPayload for OrderCreatedPayload {
    const EVENT_TYPE: EventType = EventType::ORDER_CREATED;
}
