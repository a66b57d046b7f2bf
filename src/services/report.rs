//! 配额预测与文本报告

use phf::phf_map;
use std::fmt::Write;

use crate::export::StatsDocument;
use crate::services::request_tracker::{RequestTracker, SessionStats};
use crate::utils::logging::truncate_text;

/// 各模型每天的请求上限（免费档）
pub static DEFAULT_DAILY_LIMITS: phf::Map<&'static str, u64> = phf_map! {
    "gemini-2.5-pro" => 100,
    "gemini-2.5-flash" => 250,
    "gemini-2.5-flash-lite" => 1000,
    "gemini-2.0-flash" => 200,
    "gemini-2.0-flash-lite" => 200,
};

/// 用量超过该百分比视为警告
pub const WARNING_THRESHOLD: f64 = 80.0;

pub fn default_daily_limit(model: &str) -> Option<u64> {
    DEFAULT_DAILY_LIMITS.get(model).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    Safe,
    Warning,
}

impl QuotaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaStatus::Safe => "safe",
            QuotaStatus::Warning => "warning",
        }
    }
}

/// 单个模型的配额预测
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaForecast {
    pub model: String,
    pub daily_limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub usage_percent: f64,
    /// 按本次会话时长折算的每小时请求数
    pub hourly_rate: f64,
    /// 照当前速率用完配额还需的小时数，速率为 0 时为 None
    pub hours_to_limit: Option<f64>,
    pub status: QuotaStatus,
}

/// 只预测有已知上限的模型
pub fn quota_forecast(
    stats: &SessionStats,
    limits: impl Fn(&str) -> Option<u64>,
) -> Vec<QuotaForecast> {
    let hours = stats.session_duration.as_secs_f64() / 3600.0;
    stats
        .per_model
        .iter()
        .filter_map(|(model, agg)| {
            let limit = limits(model)?;
            let used = agg.requests;
            let remaining = limit.saturating_sub(used);
            let usage_percent = if limit > 0 {
                used as f64 / limit as f64 * 100.0
            } else {
                100.0
            };
            let hourly_rate = if hours > 0.0 { used as f64 / hours } else { 0.0 };
            let hours_to_limit = (hourly_rate > 0.0).then(|| remaining as f64 / hourly_rate);
            let status = if usage_percent > WARNING_THRESHOLD {
                QuotaStatus::Warning
            } else {
                QuotaStatus::Safe
            };
            Some(QuotaForecast {
                model: model.clone(),
                daily_limit: limit,
                used,
                remaining,
                usage_percent,
                hourly_rate,
                hours_to_limit,
                status,
            })
        })
        .collect()
}

impl RequestTracker {
    /// 按给定的每日上限做配额预测；快照拿不到锁时为空
    pub async fn quota_forecast(
        &self,
        limits: impl Fn(&str) -> Option<u64>,
    ) -> Vec<QuotaForecast> {
        let stats = self.snapshot().await;
        if stats.stale {
            return Vec::new();
        }
        quota_forecast(&stats, limits)
    }
}

fn secs(v: Option<f64>) -> String {
    v.map(|s| format!("{:.2}s", s)).unwrap_or_else(|| "-".to_string())
}

fn percent(v: Option<f64>) -> String {
    v.map(|p| format!("{:.1}%", p)).unwrap_or_else(|| "-".to_string())
}

/// 文本报告
pub fn render_report(doc: &StatsDocument) -> String {
    let mut out = String::new();
    let line = "=".repeat(60);

    let _ = writeln!(out, "{}", line);
    let _ = writeln!(out, "📊 API 请求统计报告 ({})", doc.generated_at);
    let _ = writeln!(out, "{}", line);

    if doc.stale {
        let _ = writeln!(out, "⏰ 统计暂不可用（获取锁超时）");
        return out;
    }

    let overall = &doc.overall;
    let _ = writeln!(out, "会话开始: {}", doc.session.started_at);
    let _ = writeln!(out, "会话时长: {}", secs(doc.session.duration_secs));
    let _ = writeln!(out, "总请求数: {}", overall.requests);
    let _ = writeln!(
        out,
        "成功/失败: {}/{} (成功率 {})",
        overall.successes,
        overall.failures,
        percent(overall.success_rate)
    );
    let _ = writeln!(out, "平均耗时: {}", secs(overall.avg_latency_secs));
    let _ = writeln!(
        out,
        "请求速率: {}",
        doc.session
            .requests_per_minute
            .map(|r| format!("{:.2} 次/分钟", r))
            .unwrap_or_else(|| "-".to_string())
    );

    let _ = writeln!(out, "\n🔑 按凭据:");
    for (key, agg) in &doc.per_credential {
        let _ = writeln!(
            out,
            "  {}: {} 次, 成功率 {}, 平均 {}",
            key,
            agg.requests,
            percent(agg.success_rate),
            secs(agg.avg_latency_secs)
        );
    }

    let _ = writeln!(out, "\n🤖 按模型:");
    for (model, agg) in &doc.per_model {
        let _ = writeln!(
            out,
            "  {}: {} 次, 成功率 {}, 平均 {}",
            model,
            agg.requests,
            percent(agg.success_rate),
            secs(agg.avg_latency_secs)
        );
    }

    if !doc.quota.is_empty() {
        let _ = writeln!(out, "\n📈 配额预测:");
        for q in &doc.quota {
            let eta = q
                .hours_to_limit
                .map(|h| format!("{:.1} 小时后用完", h))
                .unwrap_or_else(|| "暂无速率".to_string());
            let icon = if q.status == "warning" { "⚠️" } else { "✅" };
            let _ = writeln!(
                out,
                "  {} {}: {}/{} ({}), 剩余 {}, {}",
                icon,
                q.model,
                q.used,
                q.daily_limit,
                percent(q.usage_percent),
                q.remaining,
                eta
            );
        }
    }

    let _ = writeln!(out, "\n🕑 最近请求:");
    let skip = doc.recent.len().saturating_sub(10);
    for r in doc.recent.iter().skip(skip) {
        let _ = writeln!(
            out,
            "  {} | {} | {} | {} | {}{}",
            r.timestamp,
            r.outcome,
            r.model,
            r.credential,
            secs(r.elapsed_secs),
            r.error
                .as_deref()
                .map(|e| format!(" | {}", truncate_text(e, 60)))
                .unwrap_or_default()
        );
    }
    let _ = writeln!(out, "{}", line);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::models::{RequestRecord, Route};
    use std::time::Duration;

    async fn tracker_with(records: Vec<RequestRecord>) -> RequestTracker {
        let tracker = RequestTracker::new(Duration::from_millis(100));
        for r in records {
            tracker.record(r).await;
        }
        tracker
    }

    #[test]
    fn test_default_limits() {
        assert_eq!(default_daily_limit("gemini-2.5-flash"), Some(250));
        assert_eq!(default_daily_limit("gpt-4o"), None);
    }

    #[tokio::test]
    async fn test_forecast_only_known_models() {
        let flash = Route::new(0, "gemini-2.5-pro");
        let other = Route::new(0, "local-model");
        let mut records = Vec::new();
        for _ in 0..85 {
            records.push(RequestRecord::success(&flash, Duration::from_millis(5)));
        }
        records.push(RequestRecord::success(&other, Duration::from_millis(5)));
        let tracker = tracker_with(records).await;

        let forecast = tracker.quota_forecast(default_daily_limit).await;
        assert_eq!(forecast.len(), 1);
        let pro = &forecast[0];
        assert_eq!(pro.used, 85);
        assert_eq!(pro.remaining, 15);
        assert_eq!(pro.status, QuotaStatus::Warning);
        assert!(pro.hourly_rate > 0.0);
        assert!(pro.hours_to_limit.is_some());
    }

    #[tokio::test]
    async fn test_forecast_uses_given_limits() {
        let route = Route::new(0, "local-model");
        let records = (0..3)
            .map(|_| RequestRecord::success(&route, Duration::from_millis(5)))
            .collect();
        let tracker = tracker_with(records).await;

        let forecast = tracker
            .quota_forecast(|model| (model == "local-model").then_some(10))
            .await;
        assert_eq!(forecast.len(), 1);
        assert_eq!(forecast[0].daily_limit, 10);
        assert_eq!(forecast[0].remaining, 7);
        assert_eq!(forecast[0].status, QuotaStatus::Safe);
    }

    #[tokio::test]
    async fn test_render_report_lists_dimensions() {
        let a = Route::new(0, "gemini-2.5-flash");
        let tracker = tracker_with(vec![
            RequestRecord::success(&a, Duration::from_millis(1500)),
            RequestRecord::failure(
                &a,
                Duration::from_millis(500),
                &ServiceError::QuotaExceeded("429 quota".to_string()),
            ),
        ])
        .await;

        let doc = StatsDocument::collect(&tracker).await;
        let text = render_report(&doc);
        assert!(text.contains("总请求数: 2"));
        assert!(text.contains("API#1"));
        assert!(text.contains("gemini-2.5-flash"));
        assert!(text.contains("429 quota"));
    }

    #[test]
    fn test_render_stale_report() {
        let doc = StatsDocument::from_parts(&SessionStats::stale(), &[], &[]);
        assert!(render_report(&doc).contains("统计暂不可用"));
    }
}
