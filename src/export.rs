//! 统计导出（边界适配器）
//!
//! 领域类型到可序列化形式的唯一转换点：
//! - `Duration` → 秒（`f64`）
//! - 非有限浮点 → `null`
//! - 时间 → RFC 3339 字符串
//! - 映射 → 有序对象

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::infrastructure::write_atomic;
use crate::models::RequestRecord;
use crate::services::report::{quota_forecast, default_daily_limit, QuotaForecast};
use crate::services::request_tracker::{AggregateStats, RequestTracker, SessionStats};

/// 导出文件中保留的最近请求条数
pub const EXPORTED_RECENT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsDocument {
    pub generated_at: String,
    pub stale: bool,
    pub session: SessionDoc,
    pub overall: AggregateDoc,
    pub per_credential: BTreeMap<String, AggregateDoc>,
    pub per_model: BTreeMap<String, AggregateDoc>,
    pub quota: Vec<QuotaDoc>,
    pub recent: Vec<RecordDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDoc {
    pub started_at: String,
    pub duration_secs: Option<f64>,
    pub requests_per_minute: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDoc {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: Option<f64>,
    pub avg_latency_secs: Option<f64>,
    pub min_latency_secs: Option<f64>,
    pub max_latency_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaDoc {
    pub model: String,
    pub daily_limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub usage_percent: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub hours_to_limit: Option<f64>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDoc {
    pub timestamp: String,
    pub credential: String,
    pub model: String,
    pub elapsed_secs: Option<f64>,
    pub outcome: String,
    pub batch: Option<String>,
    pub error: Option<String>,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn seconds(d: Duration) -> Option<f64> {
    finite(d.as_secs_f64())
}

impl From<&AggregateStats> for AggregateDoc {
    fn from(s: &AggregateStats) -> Self {
        Self {
            requests: s.requests,
            successes: s.successes,
            failures: s.failures,
            success_rate: if s.requests > 0 { finite(s.success_rate) } else { None },
            avg_latency_secs: s.avg_latency.and_then(seconds),
            min_latency_secs: s.min_latency.and_then(seconds),
            max_latency_secs: s.max_latency.and_then(seconds),
        }
    }
}

impl From<&QuotaForecast> for QuotaDoc {
    fn from(q: &QuotaForecast) -> Self {
        Self {
            model: q.model.clone(),
            daily_limit: q.daily_limit,
            used: q.used,
            remaining: q.remaining,
            usage_percent: finite(q.usage_percent),
            hourly_rate: finite(q.hourly_rate),
            hours_to_limit: q.hours_to_limit.and_then(finite),
            status: q.status.as_str().to_string(),
        }
    }
}

impl From<&RequestRecord> for RecordDoc {
    fn from(r: &RequestRecord) -> Self {
        Self {
            timestamp: r.timestamp.to_rfc3339(),
            credential: r.credential.to_string(),
            model: r.model.clone(),
            elapsed_secs: seconds(r.elapsed),
            outcome: r.outcome.as_str().to_string(),
            batch: r.batch.map(|b| b.human_range()),
            error: r.error.clone(),
        }
    }
}

impl StatsDocument {
    pub fn from_parts(
        stats: &SessionStats,
        forecast: &[QuotaForecast],
        recent: &[RequestRecord],
    ) -> Self {
        Self {
            generated_at: stats.taken_at.to_rfc3339(),
            stale: stats.stale,
            session: SessionDoc {
                started_at: stats.session_started_at.to_rfc3339(),
                duration_secs: seconds(stats.session_duration),
                requests_per_minute: finite(stats.requests_per_minute),
            },
            overall: AggregateDoc::from(&stats.overall),
            per_credential: stats
                .per_credential
                .iter()
                .map(|(k, v)| (k.to_string(), AggregateDoc::from(v)))
                .collect(),
            per_model: stats
                .per_model
                .iter()
                .map(|(k, v)| (k.clone(), AggregateDoc::from(v)))
                .collect(),
            quota: forecast.iter().map(QuotaDoc::from).collect(),
            recent: recent.iter().map(RecordDoc::from).collect(),
        }
    }

    /// 从统计实例采集
    pub async fn collect(tracker: &RequestTracker) -> Self {
        let stats = tracker.snapshot().await;
        let forecast = if stats.stale {
            Vec::new()
        } else {
            quota_forecast(&stats, default_daily_limit)
        };
        let recent = tracker.recent(EXPORTED_RECENT).await.unwrap_or_default();
        Self::from_parts(&stats, &forecast, &recent)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 原子写入文件
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(path, json.as_bytes())
    }

    pub fn read_from(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Batch, Route};
    use tempfile::TempDir;

    #[test]
    fn test_non_finite_values_become_null() {
        assert_eq!(finite(f64::NAN), None);
        assert_eq!(finite(f64::INFINITY), None);
        assert_eq!(finite(1.5), Some(1.5));

        let empty = AggregateDoc::from(&AggregateStats::default());
        assert_eq!(empty.success_rate, None);
        assert_eq!(empty.avg_latency_secs, None);
    }

    #[test]
    fn test_record_projection() {
        let route = Route::new(1, "gemini-2.5-flash");
        let record = RequestRecord::success(&route, Duration::from_millis(1250))
            .for_batch(Batch::new(50, 100));
        let doc = RecordDoc::from(&record);
        assert_eq!(doc.credential, "API#2");
        assert_eq!(doc.elapsed_secs, Some(1.25));
        assert_eq!(doc.outcome, "success");
        assert_eq!(doc.batch.as_deref(), Some("51-100"));
    }

    #[tokio::test]
    async fn test_document_survives_file_round_trip() {
        let tracker = RequestTracker::new(Duration::from_millis(100));
        tracker
            .record(RequestRecord::success(&Route::new(0, "m"), Duration::from_millis(10)))
            .await;
        let doc = StatsDocument::collect(&tracker).await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        doc.write_to(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["overall"]["requests"], 1);
        assert!(value["per_credential"]["API#1"].is_object());
        let read = StatsDocument::read_from(&path).unwrap();
        assert_eq!(read.overall.requests, 1);
        assert_eq!(read.recent.len(), 1);
    }
}
