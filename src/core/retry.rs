//! 远程调用包装：节流 + 退避重试
//!
//! 每次尝试前固定等待 `throttling`（限速，不是退避）；瞬时网络错误按
//! [`BACKOFF_SCHEDULE_SECS`] 等待后重试，最多 `retries` 次。全部失败后
//! 再做最后一次不带保护的尝试，其错误直接返回给调用方。非网络错误第一次
//! 出现就返回，不重试。

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// 按尝试序号索引的退避表（秒），超出长度时重复最后一个值
pub const BACKOFF_SCHEDULE_SECS: [u64; 7] = [0, 1, 3, 5, 10, 30, 60];

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 每次调用前的固定延迟
    pub throttling: Duration,
    /// 受保护的尝试次数
    pub retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            throttling: Duration::from_millis(500),
            retries: 7,
        }
    }
}

/// 第 `attempt` 次尝试前的退避时长
pub fn backoff_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    Duration::from_secs(BACKOFF_SCHEDULE_SECS[idx])
}

impl RetryPolicy {
    pub fn new(throttling_secs: f64, retries: u32) -> Self {
        Self {
            throttling: Duration::from_secs_f64(throttling_secs.max(0.0)),
            retries,
        }
    }

    async fn throttle(&self) {
        if !self.throttling.is_zero() {
            tokio::time::sleep(self.throttling).await;
        }
    }

    /// 执行一次远程调用
    pub async fn call<T, F, Fut>(&self, op: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 0..self.retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            self.throttle().await;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(
                        "{} 失败，准备重试 ({}/{}): {}",
                        op,
                        attempt + 1,
                        self.retries,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        // 最后一次尝试不再拦截任何错误
        debug!("{} 已用完 {} 次重试，最后尝试一次", op, self.retries);
        self.throttle().await;
        operation().await
    }
}
