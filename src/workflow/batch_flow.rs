//! 批次处理流程 - 流程层
//!
//! 核心职责：定义"一批"的完整调用流程
//!
//! 流程顺序：
//! 1. 取游标当前的 (凭据, 模型) 调用服务
//! 2. 校验响应
//! 3. 记录本次尝试
//! 4. 按失败类型决定：
//!    - 配额错误 → 切换到下一个组合，立即重试，不占用重试次数
//!    - 临时/格式错误 → 退避等待后用同一组合重试
//!    - 重试次数用尽，或所有组合都报配额错误 → 放弃本批

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ServiceError;
use crate::infrastructure::{sleep_or_cancel, Sleeper};
use crate::models::{LabelItem, LabelRequest, RequestRecord, Route};
use crate::services::{LabelingService, RequestTracker};
use crate::workflow::batch_ctx::BatchCtx;
use crate::workflow::retry::{RetryPolicy, RouteCursor};
use crate::workflow::validation::{validate, ValidationMode};

/// 放弃原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// 临时/格式错误的重试次数用尽
    RetriesExhausted,
    /// 所有组合都报配额错误
    QuotaExhausted,
    /// 没有可用的组合
    NoRoutes,
}

impl AbandonReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AbandonReason::RetriesExhausted => "retries_exhausted",
            AbandonReason::QuotaExhausted => "quota_exhausted",
            AbandonReason::NoRoutes => "no_routes",
        }
    }
}

/// 一批的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// 拿到了合法结果（可能只是宽松模式下的子集）
    Success {
        items: Vec<LabelItem>,
        route: Route,
        attempts: u32,
    },
    /// 本次运行放弃该批，行保持未完成
    Abandoned {
        reason: AbandonReason,
        attempts: u32,
        last_route: Option<Route>,
        last_error: Option<String>,
    },
    /// 等待期间收到停止信号
    Interrupted { attempts: u32 },
}

impl BatchOutcome {
    /// 实际发出的调用次数
    pub fn attempts(&self) -> u32 {
        match self {
            BatchOutcome::Success { attempts, .. }
            | BatchOutcome::Abandoned { attempts, .. }
            | BatchOutcome::Interrupted { attempts } => *attempts,
        }
    }
}

/// 批次处理流程
///
/// - 编排一批的调用、校验、记录和重试
/// - 不持有断点表，不做持久化
/// - 回退游标由调用方（编排器）独占，跨批次保留
pub struct BatchFlow {
    service: Arc<dyn LabelingService>,
    tracker: Arc<RequestTracker>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    validation: ValidationMode,
}

impl BatchFlow {
    pub fn new(
        service: Arc<dyn LabelingService>,
        tracker: Arc<RequestTracker>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
        validation: ValidationMode,
    ) -> Self {
        Self {
            service,
            tracker,
            sleeper,
            policy,
            validation,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run(
        &self,
        ctx: &BatchCtx,
        request: &LabelRequest,
        cursor: &mut RouteCursor,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let routes = &self.policy.routes;
        let mut calls = 0u32;
        let mut failures = 0u32;
        let mut quota_hits = 0usize;
        let mut last_route: Option<Route> = None;

        loop {
            let Some(route) = cursor.current(routes).cloned() else {
                error!("{} ❌ 没有可用的 (凭据, 模型) 组合", ctx);
                return BatchOutcome::Abandoned {
                    reason: AbandonReason::NoRoutes,
                    attempts: calls,
                    last_route,
                    last_error: None,
                };
            };

            if calls > 0 && cancel.is_cancelled() {
                warn!("{} ⏹️ 收到停止信号，不再重试", ctx);
                return BatchOutcome::Interrupted { attempts: calls };
            }

            calls += 1;
            info!("{} 🤖 第 {} 次调用: {}", ctx, calls, route);

            let started = Instant::now();
            let result = self
                .service
                .label(request, &route)
                .await
                .and_then(|items| validate(request, items, self.validation));
            let elapsed = started.elapsed();

            let record = match &result {
                Ok(_) => RequestRecord::success(&route, elapsed),
                Err(e) => RequestRecord::failure(&route, elapsed, e),
            };
            self.tracker.record(record.for_batch(ctx.batch)).await;
            last_route = Some(route.clone());

            let err = match result {
                Ok(items) => {
                    info!("{} ✓ 获得 {}/{} 条合法结果", ctx, items.len(), request.len());
                    return BatchOutcome::Success {
                        items,
                        route,
                        attempts: calls,
                    };
                }
                Err(e) => e,
            };

            match &err {
                ServiceError::QuotaExceeded(_) => {
                    quota_hits += 1;
                    cursor.advance(routes);
                    if quota_hits >= routes.len() {
                        error!("{} ❌ 所有组合的配额均已用尽，放弃本批", ctx);
                        return BatchOutcome::Abandoned {
                            reason: AbandonReason::QuotaExhausted,
                            attempts: calls,
                            last_route,
                            last_error: Some(err.to_string()),
                        };
                    }
                    warn!(
                        "{} 🔄 {} 配额用尽，切换到 {}",
                        ctx,
                        route,
                        cursor.current(routes).map(|r| r.to_string()).unwrap_or_default()
                    );
                }
                ServiceError::Transient(_) | ServiceError::Malformed(_) => {
                    failures += 1;
                    if failures >= self.policy.max_attempts {
                        error!(
                            "{} ❌ 已重试 {} 次仍失败，放弃本批: {}",
                            ctx, failures, err
                        );
                        return BatchOutcome::Abandoned {
                            reason: AbandonReason::RetriesExhausted,
                            attempts: calls,
                            last_route,
                            last_error: Some(err.to_string()),
                        };
                    }

                    let delay = self.policy.backoff.delay(failures, request.len());
                    warn!(
                        "{} ⚠️ {}，{:.1}s 后重试 ({}/{})",
                        ctx,
                        err,
                        delay.as_secs_f64(),
                        failures,
                        self.policy.max_attempts
                    );
                    if !sleep_or_cancel(self.sleeper.as_ref(), delay, cancel).await {
                        warn!("{} ⏹️ 退避等待被停止信号打断", ctx);
                        return BatchOutcome::Interrupted { attempts: calls };
                    }
                }
            }
        }
    }
}
