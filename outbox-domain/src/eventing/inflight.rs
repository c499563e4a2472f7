//! 在途信封计数（InFlight）
//!
//! 发布器每送入通道一个信封就为其记录计数加一，分发器处理完（无论结果）后减一。
//! 计数非零说明本进程内仍有信封覆盖该记录（排队中或处理器正在运行），
//! PENDING 补偿据此跳过，只重新投递真正丢失了投递触发的记录。
//!
use crate::event_record::RecordId;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InFlight {
    counts: Arc<DashMap<RecordId, usize>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, id: RecordId) {
        *self.counts.entry(id).or_insert(0) += 1;
    }

    /// 未登记的 id 直接忽略
    pub fn leave(&self, id: RecordId) {
        {
            let Some(mut count) = self.counts.get_mut(&id) else {
                return;
            };
            *count = count.saturating_sub(1);
        }
        self.counts.remove_if(&id, |_, count| *count == 0);
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.counts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
