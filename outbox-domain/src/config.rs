//! Outbox 配置（OutboxConfig）
//!
//! 启动时读取一次，此后作为进程内常量在发布器、分发器与重试调度器之间共享：
//! - `max_retries`：失败次数上限，同时作为调度器的查询上界；
//! - `retry_interval`：调度器扫描周期；
//! - `base_delay`：指数退避的基本单位；
//! - 其余为分发并发、通道容量、PENDING 补偿与处理器超时。
//!
use crate::error::{OutboxError, OutboxResult};
use std::time::Duration;

pub const ENV_MAX_RETRIES: &str = "OUTBOX_MAX_RETRIES";
pub const ENV_RETRY_INTERVAL_MS: &str = "OUTBOX_RETRY_INTERVAL_MS";
pub const ENV_BASE_DELAY_SECS: &str = "OUTBOX_BASE_DELAY_SECS";
pub const ENV_DISPATCH_CONCURRENCY: &str = "OUTBOX_DISPATCH_CONCURRENCY";
pub const ENV_CHANNEL_CAPACITY: &str = "OUTBOX_CHANNEL_CAPACITY";
pub const ENV_PENDING_RECOVERY_SECS: &str = "OUTBOX_PENDING_RECOVERY_SECS";
pub const ENV_HANDLER_TIMEOUT_MS: &str = "OUTBOX_HANDLER_TIMEOUT_MS";

/// Outbox 运行配置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutboxConfig {
    /// 进入 FAILED 之前允许的失败次数
    pub max_retries: u32,
    /// 重试调度器的扫描间隔
    pub retry_interval: Duration,
    /// 退避基数：第 n 次重试需等待 `base_delay * 2^n`
    pub base_delay: Duration,
    /// 分发器 worker 的最大并发
    pub dispatch_concurrency: usize,
    /// 分发通道容量
    pub channel_capacity: usize,
    /// PENDING 记录超过该时长未推进时重新投递；`None` 关闭补偿
    pub pending_recovery_after: Option<Duration>,
    /// 单次处理器调用的超时；`None` 不限时
    pub handler_timeout: Option<Duration>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(10),
            base_delay: Duration::from_secs(5),
            dispatch_concurrency: 8,
            channel_capacity: 1024,
            pending_recovery_after: Some(Duration::from_secs(300)),
            handler_timeout: None,
        }
    }
}

impl OutboxConfig {
    /// 从进程环境变量读取，未设置的项保持默认值
    pub fn from_env() -> OutboxResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 以任意键值来源构建配置（便于测试与嵌入其他配置系统）
    pub fn from_lookup<F>(lookup: F) -> OutboxResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = v.trim().parse()?;
        }
        if let Some(v) = lookup(ENV_RETRY_INTERVAL_MS) {
            config.retry_interval = Duration::from_millis(v.trim().parse()?);
        }
        if let Some(v) = lookup(ENV_BASE_DELAY_SECS) {
            config.base_delay = Duration::from_secs(v.trim().parse()?);
        }
        if let Some(v) = lookup(ENV_DISPATCH_CONCURRENCY) {
            config.dispatch_concurrency = v.trim().parse()?;
        }
        if let Some(v) = lookup(ENV_CHANNEL_CAPACITY) {
            config.channel_capacity = v.trim().parse()?;
        }
        if let Some(v) = lookup(ENV_PENDING_RECOVERY_SECS) {
            let secs: u64 = v.trim().parse()?;
            config.pending_recovery_after = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = lookup(ENV_HANDLER_TIMEOUT_MS) {
            let ms: u64 = v.trim().parse()?;
            config.handler_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OutboxResult<()> {
        if self.max_retries == 0 {
            return Err(invalid("max_retries must be at least 1"));
        }
        if self.retry_interval.is_zero() {
            return Err(invalid("retry_interval must be non-zero"));
        }
        if self.dispatch_concurrency == 0 {
            return Err(invalid("dispatch_concurrency must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// 分发器的失败阈值与调度器的查询上界共用这一个值
    pub fn retry_bound(&self) -> u32 {
        self.max_retries
    }

    /// 第 `retry_count` 次失败后的退避时长：`base_delay * 2^retry_count`（饱和）
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

fn invalid(reason: &str) -> OutboxError {
    OutboxError::InvalidConfig {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_behavior() {
        let c = OutboxConfig::default();
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.base_delay, Duration::from_secs(5));
        assert_eq!(c.retry_bound(), c.max_retries);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn backoff_doubles_with_retry_count() {
        let c = OutboxConfig::default();
        assert_eq!(c.backoff_delay(0), Duration::from_secs(5));
        assert_eq!(c.backoff_delay(1), Duration::from_secs(10));
        assert_eq!(c.backoff_delay(2), Duration::from_secs(20));
        assert_eq!(c.backoff_delay(3), Duration::from_secs(40));
        for n in 0..10 {
            assert!(c.backoff_delay(n) < c.backoff_delay(n + 1));
        }
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let c = OutboxConfig::default();
        assert_eq!(c.backoff_delay(40), Duration::from_secs(5).saturating_mul(u32::MAX));
    }

    #[test]
    fn env_overrides_are_applied() {
        let c = OutboxConfig::from_lookup(lookup_from(&[
            (ENV_MAX_RETRIES, "5"),
            (ENV_RETRY_INTERVAL_MS, "250"),
            (ENV_BASE_DELAY_SECS, "1"),
            (ENV_PENDING_RECOVERY_SECS, "0"),
            (ENV_HANDLER_TIMEOUT_MS, "1500"),
        ]))
        .unwrap();

        assert_eq!(c.max_retries, 5);
        assert_eq!(c.retry_interval, Duration::from_millis(250));
        assert_eq!(c.base_delay, Duration::from_secs(1));
        assert_eq!(c.pending_recovery_after, None);
        assert_eq!(c.handler_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(c.dispatch_concurrency, 8);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = OutboxConfig::from_lookup(lookup_from(&[(ENV_MAX_RETRIES, "zero")])).unwrap_err();
        assert!(matches!(err, OutboxError::InvalidConfig { .. }));

        let err = OutboxConfig::from_lookup(lookup_from(&[(ENV_MAX_RETRIES, "0")])).unwrap_err();
        assert!(matches!(err, OutboxError::InvalidConfig { .. }));

        let err =
            OutboxConfig::from_lookup(lookup_from(&[(ENV_DISPATCH_CONCURRENCY, "0")])).unwrap_err();
        assert!(matches!(err, OutboxError::InvalidConfig { .. }));
    }
}
