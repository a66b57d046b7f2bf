//! 重试策略
//!
//! - `BackoffPolicy`：尝试次数 → 等待时长（指数退避 + 抖动）
//! - `RetryPolicy`：尝试上限 + 有序回退组合
//! - `RouteCursor`：回退游标，只归编排器所有
//! - `PacingPolicy`：批次间隔

use crate::models::Route;
use rand::Rng;
use std::time::Duration;

/// 超过该条数的批次视为大批次
pub const WIDE_BATCH_THRESHOLD: usize = 100;

/// 指数退避
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// 第 1 次重试前的基础等待
    pub base: Duration,
    /// 单次等待上限（不含抖动）
    pub cap: Duration,
    /// 随机抖动上限，0 表示不抖动
    pub jitter: Duration,
    /// 大批次的等待倍数
    pub wide_batch_multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(120),
            jitter: Duration::from_secs(1),
            wide_batch_multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// 不带抖动的退避，方便测试
    pub fn fixed(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: Duration::ZERO,
            wide_batch_multiplier: 2,
        }
    }

    /// 第 `attempt` 次失败（从 1 开始）之后的等待时长，不含抖动
    pub fn base_delay(&self, attempt: u32, batch_items: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.cap)
            .min(self.cap);
        if batch_items > WIDE_BATCH_THRESHOLD {
            delay.saturating_mul(self.wide_batch_multiplier)
        } else {
            delay
        }
    }

    /// 实际等待时长 = 基础退避 + [0, jitter) 均匀抖动
    pub fn delay(&self, attempt: u32, batch_items: usize) -> Duration {
        let delay = self.base_delay(attempt, batch_items);
        if self.jitter.is_zero() {
            return delay;
        }
        let jitter_ns = self.jitter.as_nanos().min(u64::MAX as u128) as u64;
        delay + Duration::from_nanos(rand::thread_rng().gen_range(0..jitter_ns))
    }
}

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 每批临时/格式错误的最多尝试次数
    pub max_attempts: u32,
    /// 配额耗尽时依次切换的 (凭据, 模型) 组合
    pub routes: Vec<Route>,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, routes: Vec<Route>) -> Self {
        Self {
            max_attempts,
            routes,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// 回退游标，跨批次保留位置，到末尾回绕
#[derive(Debug, Clone, Default)]
pub struct RouteCursor {
    index: usize,
}

impl RouteCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current<'a>(&self, routes: &'a [Route]) -> Option<&'a Route> {
        if routes.is_empty() {
            return None;
        }
        routes.get(self.index % routes.len())
    }

    pub fn advance(&mut self, routes: &[Route]) {
        if !routes.is_empty() {
            self.index = (self.index + 1) % routes.len();
        }
    }
}

/// 批次间隔
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    pub normal_pause: Duration,
    pub wide_batch_pause: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            normal_pause: Duration::from_secs(2),
            wide_batch_pause: Duration::from_secs(5),
        }
    }
}

impl PacingPolicy {
    pub fn none() -> Self {
        Self {
            normal_pause: Duration::ZERO,
            wide_batch_pause: Duration::ZERO,
        }
    }

    pub fn pause_after(&self, batch_items: usize) -> Duration {
        if batch_items > WIDE_BATCH_THRESHOLD {
            self.wide_batch_pause
        } else {
            self.normal_pause
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(policy.delay(1, 10), Duration::from_secs(2));
        assert_eq!(policy.delay(2, 10), Duration::from_secs(4));
        assert_eq!(policy.delay(3, 10), Duration::from_secs(8));
        assert_eq!(policy.delay(4, 10), Duration::from_secs(10));
        assert_eq!(policy.delay(40, 10), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_wide_batch_doubles() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(2), Duration::from_secs(60));
        assert_eq!(policy.delay(2, 101), Duration::from_secs(8));
        assert_eq!(policy.delay(2, 100), Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = BackoffPolicy {
            jitter: Duration::from_millis(500),
            ..BackoffPolicy::fixed(Duration::from_secs(1), Duration::from_secs(60))
        };
        for _ in 0..50 {
            let d = policy.delay(1, 1);
            assert!(d >= Duration::from_secs(1));
            assert!(d < Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_sub_millisecond_jitter() {
        let policy = BackoffPolicy {
            jitter: Duration::from_micros(500),
            ..Default::default()
        };
        let d = policy.delay(1, 1);
        assert!(d >= Duration::from_secs(2));
        assert!(d < Duration::from_secs(2) + Duration::from_micros(500));

        let tiny = BackoffPolicy {
            jitter: Duration::from_nanos(1),
            ..Default::default()
        };
        assert_eq!(tiny.delay(1, 1), Duration::from_secs(2));
    }

    #[test]
    fn test_cursor_wraps() {
        let routes = vec![Route::new(0, "a"), Route::new(1, "a")];
        let mut cursor = RouteCursor::new();
        assert_eq!(cursor.current(&routes), Some(&routes[0]));
        cursor.advance(&routes);
        assert_eq!(cursor.current(&routes), Some(&routes[1]));
        cursor.advance(&routes);
        assert_eq!(cursor.current(&routes), Some(&routes[0]));
        assert!(cursor.current(&[]).is_none());
    }

    #[test]
    fn test_pacing() {
        let pacing = PacingPolicy::default();
        assert_eq!(pacing.pause_after(50), Duration::from_secs(2));
        assert_eq!(pacing.pause_after(250), Duration::from_secs(5));
    }
}
