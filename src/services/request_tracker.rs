//! 请求统计服务 - 业务能力层
//!
//! 只负责"记录每次调用并汇总"，不关心流程
//!
//! ## 并发约定
//! - `record()`：编排循环调用，持锁只做计数追加
//! - `snapshot()`：显示线程调用，等锁有上限；超时返回 `stale = true` 的降级结果
//! - 快照只在锁内拷贝原始计数，统计计算在锁外完成
//! - 锁由 guard 持有，任何路径（包括 panic）都会释放

use crate::models::{CredentialId, RequestRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 报告中保留的最近请求条数
pub const RECENT_CAPACITY: usize = 100;

/// 原始计数
#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    requests: u64,
    successes: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Option<Duration>,
}

impl Counter {
    fn add(&mut self, record: &RequestRecord) {
        self.requests += 1;
        if record.outcome.is_success() {
            self.successes += 1;
        }
        self.total_latency += record.elapsed;
        self.min_latency = Some(self.min_latency.map_or(record.elapsed, |m| m.min(record.elapsed)));
        self.max_latency = Some(self.max_latency.map_or(record.elapsed, |m| m.max(record.elapsed)));
    }

    fn to_stats(self) -> AggregateStats {
        let failures = self.requests - self.successes;
        let success_rate = if self.requests > 0 {
            self.successes as f64 / self.requests as f64 * 100.0
        } else {
            0.0
        };
        let avg_latency = (self.requests > 0)
            .then(|| self.total_latency / u32::try_from(self.requests).unwrap_or(u32::MAX));
        AggregateStats {
            requests: self.requests,
            successes: self.successes,
            failures,
            success_rate,
            avg_latency,
            min_latency: self.min_latency,
            max_latency: self.max_latency,
        }
    }
}

#[derive(Debug, Clone)]
struct TrackerState {
    next_id: u64,
    overall: Counter,
    per_credential: BTreeMap<CredentialId, Counter>,
    per_model: BTreeMap<String, Counter>,
    recent: VecDeque<RequestRecord>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            next_id: 1,
            overall: Counter::default(),
            per_credential: BTreeMap::new(),
            per_model: BTreeMap::new(),
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// 锁内拷贝出来的原始数据
struct RawSnapshot {
    overall: Counter,
    per_credential: BTreeMap<CredentialId, Counter>,
    per_model: BTreeMap<String, Counter>,
    started_at: DateTime<Utc>,
    elapsed: Duration,
}

/// 一个维度的汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// 百分比
    pub success_rate: f64,
    pub avg_latency: Option<Duration>,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
}

/// 会话统计快照
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    /// 获取锁超时，数据不可用
    pub stale: bool,
    pub taken_at: DateTime<Utc>,
    pub session_started_at: DateTime<Utc>,
    pub session_duration: Duration,
    pub overall: AggregateStats,
    pub per_credential: BTreeMap<CredentialId, AggregateStats>,
    pub per_model: BTreeMap<String, AggregateStats>,
    pub requests_per_minute: f64,
}

impl SessionStats {
    /// 降级结果
    pub fn stale() -> Self {
        let now = Utc::now();
        Self {
            stale: true,
            taken_at: now,
            session_started_at: now,
            session_duration: Duration::ZERO,
            overall: AggregateStats::default(),
            per_credential: BTreeMap::new(),
            per_model: BTreeMap::new(),
            requests_per_minute: 0.0,
        }
    }

    fn from_raw(raw: RawSnapshot) -> Self {
        let secs = raw.elapsed.as_secs_f64();
        let requests_per_minute = if secs > 0.0 {
            raw.overall.requests as f64 / secs * 60.0
        } else {
            0.0
        };
        Self {
            stale: false,
            taken_at: Utc::now(),
            session_started_at: raw.started_at,
            session_duration: raw.elapsed,
            overall: raw.overall.to_stats(),
            per_credential: raw
                .per_credential
                .into_iter()
                .map(|(k, c)| (k, c.to_stats()))
                .collect(),
            per_model: raw
                .per_model
                .into_iter()
                .map(|(k, c)| (k, c.to_stats()))
                .collect(),
            requests_per_minute,
        }
    }
}

/// 请求统计
///
/// 显式实例，通过 `Arc` 传给编排器和显示线程，没有进程级全局状态。
pub struct RequestTracker {
    state: Mutex<TrackerState>,
    lock_timeout: Duration,
}

impl RequestTracker {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::new()),
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// 记录一次调用，返回请求序号（从 1 开始）
    pub async fn record(&self, record: RequestRecord) -> u64 {
        let id = self.store(record.clone()).await;

        let status = if record.outcome.is_success() { "SUCCESS" } else { "FAILED" };
        info!(
            "🔢 Request #{:03}: {} | {} | {} | {:.2}s",
            id,
            status,
            record.model,
            record.credential,
            record.elapsed.as_secs_f64()
        );
        if let Some(err) = &record.error {
            warn!("   └─ Error: {}", err);
        }
        id
    }

    /// 锁内只更新计数
    async fn store(&self, record: RequestRecord) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;

        state.overall.add(&record);
        state
            .per_credential
            .entry(record.credential)
            .or_default()
            .add(&record);
        state
            .per_model
            .entry(record.model.clone())
            .or_default()
            .add(&record);

        if state.recent.len() == RECENT_CAPACITY {
            state.recent.pop_front();
        }

        state.recent.push_back(record);
        id
    }

    /// 统计快照，最多等待 `lock_timeout`
    pub async fn snapshot(&self) -> SessionStats {
        match self.raw_snapshot().await {
            Some(raw) => SessionStats::from_raw(raw),
            None => SessionStats::stale(),
        }
    }

    /// 最近的请求（最新的在最后），拿不到锁返回 None
    pub async fn recent(&self, limit: usize) -> Option<Vec<RequestRecord>> {
        let state = self.try_lock_bounded().await?;
        let skip = state.recent.len().saturating_sub(limit);
        Some(state.recent.iter().skip(skip).cloned().collect())
    }

    /// 清零，之后的计数只覆盖新记录
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = TrackerState::new();
        debug!("请求统计已清零");
    }

    async fn raw_snapshot(&self) -> Option<RawSnapshot> {
        let state = self.try_lock_bounded().await?;
        Some(RawSnapshot {
            overall: state.overall,
            per_credential: state.per_credential.clone(),
            per_model: state.per_model.clone(),
            started_at: state.started_at,
            elapsed: state.started.elapsed(),
        })
    }

    async fn try_lock_bounded(&self) -> Option<tokio::sync::MutexGuard<'_, TrackerState>> {
        match tokio::time::timeout(self.lock_timeout, self.state.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(
                    "⏰ 获取统计锁超时 ({} ms)，返回降级快照",
                    self.lock_timeout.as_millis()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::models::Route;
    use std::sync::Arc;

    fn ok(route: &Route, ms: u64) -> RequestRecord {
        RequestRecord::success(route, Duration::from_millis(ms))
    }

    fn quota(route: &Route, ms: u64) -> RequestRecord {
        RequestRecord::failure(
            route,
            Duration::from_millis(ms),
            &ServiceError::QuotaExceeded("429".to_string()),
        )
    }

    #[tokio::test]
    async fn test_record_keeps_error_and_frees_lock() {
        let tracker = RequestTracker::new(Duration::from_millis(1));
        let route = Route::new(0, "flash");
        tracker.record(quota(&route, 10)).await;

        let recent = tracker.recent(1).await.unwrap();
        assert_eq!(recent[0].error.as_deref(), Some("配额已用尽: 429"));
        assert!(!tracker.snapshot().await.stale);
    }

    #[tokio::test]
    async fn test_aggregates_per_dimension() {
        let tracker = RequestTracker::new(Duration::from_millis(100));
        let a = Route::new(0, "flash");
        let b = Route::new(1, "lite");

        assert_eq!(tracker.record(ok(&a, 100)).await, 1);
        assert_eq!(tracker.record(quota(&a, 300)).await, 2);
        assert_eq!(tracker.record(ok(&b, 200)).await, 3);

        let stats = tracker.snapshot().await;
        assert!(!stats.stale);
        assert_eq!(stats.overall.requests, 3);
        assert_eq!(stats.overall.successes, 2);
        assert_eq!(stats.overall.failures, 1);
        assert_eq!(stats.overall.min_latency, Some(Duration::from_millis(100)));
        assert_eq!(stats.overall.max_latency, Some(Duration::from_millis(300)));
        assert_eq!(stats.overall.avg_latency, Some(Duration::from_millis(200)));

        let flash = &stats.per_model["flash"];
        assert_eq!(flash.requests, 2);
        assert!((flash.success_rate - 50.0).abs() < 1e-9);
        assert_eq!(stats.per_credential[&CredentialId(1)].requests, 1);
    }

    #[tokio::test]
    async fn test_snapshot_returns_stale_when_lock_is_held() {
        let tracker = RequestTracker::new(Duration::from_millis(50));
        let guard = tracker.state.lock().await;

        let start = Instant::now();
        let stats = tracker.snapshot().await;
        let waited = start.elapsed();

        assert!(stats.stale);
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_millis(50) + Duration::from_millis(500));
        assert!(tracker.recent(10).await.is_none());
        drop(guard);

        assert!(!tracker.snapshot().await.stale);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counts_match_records_under_contention() {
        let tracker = Arc::new(RequestTracker::new(Duration::from_millis(20)));
        let mut writers = Vec::new();
        for w in 0..4 {
            let tracker = tracker.clone();
            writers.push(tokio::spawn(async move {
                let route = Route::new(w, "flash");
                for i in 0..250 {
                    tracker.record(ok(&route, i)).await;
                }
            }));
        }

        let reader = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let start = Instant::now();
                    let stats = tracker.snapshot().await;
                    assert!(start.elapsed() < Duration::from_millis(20) + Duration::from_millis(500));
                    if !stats.stale {
                        let sum: u64 = stats.per_credential.values().map(|s| s.requests).sum();
                        assert_eq!(sum, stats.overall.requests);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        for w in writers {
            w.await.unwrap();
        }
        reader.await.unwrap();

        let stats = tracker.snapshot().await;
        assert_eq!(stats.overall.requests, 1000);
        assert_eq!(tracker.recent(usize::MAX).await.unwrap().len(), RECENT_CAPACITY);
    }

    #[tokio::test]
    async fn test_reset_clears_counts() {
        let tracker = RequestTracker::new(Duration::from_millis(100));
        tracker.record(ok(&Route::new(0, "flash"), 10)).await;
        tracker.reset().await;
        let stats = tracker.snapshot().await;
        assert_eq!(stats.overall.requests, 0);
        assert!(stats.per_model.is_empty());
        assert_eq!(stats.overall.avg_latency, None);
    }
}
