//! 标注编排器 - 编排层
//!
//! ## 职责
//!
//! 按顺序处理规划好的批次：
//! 1. 批次边界检查停止信号
//! 2. 只把批内未完成的行组成请求
//! 3. 委托 `BatchFlow` 完成调用、校验、记录和重试
//! 4. 成功则提交到断点文件；提交失败立即中止整个运行
//! 5. 导出统计，批次间按宽度暂停
//!
//! ## 设计特点
//!
//! - 批次之间串行，共享一个限流服务和一个断点文件
//! - 回退游标归编排器独占，跨批次保留
//! - 单批失败只影响该批，持久化失败才中止运行
//! - 内存中的表只在提交成功后更新，与磁盘保持一致

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::PersistenceError;
use crate::export::StatsDocument;
use crate::infrastructure::{sleep_or_cancel, Sleeper, TokioSleeper};
use crate::models::{Batch, InputItem, LabelRequest, Table};
use crate::services::{ArtifactHandle, LabelingService, PersistenceWriter, RequestTracker};
use crate::utils::logging::{log_batch_complete, log_batch_start, print_final_summary};
use crate::workflow::{
    AbandonReason, BatchCtx, BatchFlow, BatchOutcome, PacingPolicy, RetryPolicy, RouteCursor,
    ValidationMode,
};

/// 单批在本次运行中的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatusReport {
    /// 所有待标注行都已提交
    Succeeded,
    /// 只提交了部分行（宽松校验）
    Partial,
    /// 放弃，行保持未完成
    Abandoned,
    /// 被停止信号打断
    Interrupted,
    /// 没有待标注的行
    Skipped,
    /// 提交失败，运行中止
    CommitFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: Batch,
    pub range: String,
    pub status: BatchStatusReport,
    pub rows_sent: usize,
    pub rows_committed: usize,
    pub attempts: u32,
    pub model: Option<String>,
    pub credential: Option<String>,
    pub error: Option<String>,
}

impl BatchReport {
    fn new(batch: Batch, status: BatchStatusReport, rows_sent: usize) -> Self {
        Self {
            batch,
            range: batch.human_range(),
            status,
            rows_sent,
            rows_committed: 0,
            attempts: 0,
            model: None,
            credential: None,
            error: None,
        }
    }
}

/// 运行总结，每次运行结束都会给出
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dataset: String,
    pub artifact: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 本次运行提交的行数
    pub rows_committed: usize,
    /// 运行结束时仍未完成的行数
    pub rows_incomplete: usize,
    pub batches_planned: usize,
    pub batches_succeeded: usize,
    pub batches_partial: usize,
    pub batches_abandoned: usize,
    pub cancelled: bool,
    pub batches: Vec<BatchReport>,
}

impl RunSummary {
    fn new(handle: &ArtifactHandle, planned: usize) -> Self {
        Self {
            dataset: handle.dataset.clone(),
            artifact: handle.path.clone(),
            started_at: Utc::now(),
            finished_at: None,
            rows_committed: 0,
            rows_incomplete: 0,
            batches_planned: planned,
            batches_succeeded: 0,
            batches_partial: 0,
            batches_abandoned: 0,
            cancelled: false,
            batches: Vec::new(),
        }
    }

    fn finish(&mut self, table: &Table) {
        self.rows_incomplete = table.progress().remaining();
        self.finished_at = Some(Utc::now());
    }
}

/// 持久化失败导致运行中止，附带中止前的总结
#[derive(Debug, Error)]
#[error("标注运行中止（已提交 {} 行）: {source}", .summary.rows_committed)]
pub struct RunAborted {
    pub summary: Box<RunSummary>,
    #[source]
    pub source: PersistenceError,
}

/// 编排器的可选部件
pub struct OrchestratorOptions {
    pub sleeper: Arc<dyn Sleeper>,
    pub pacing: PacingPolicy,
    pub validation: ValidationMode,
    pub allowed_labels: Vec<String>,
    /// 提示词模板
    pub instructions: String,
    /// 每批之后导出统计的位置
    pub stats_file: Option<PathBuf>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            pacing: PacingPolicy::default(),
            validation: ValidationMode::Strict,
            allowed_labels: Vec::new(),
            instructions: String::new(),
            stats_file: None,
        }
    }
}

/// 标注编排器
pub struct LabelingOrchestrator {
    flow: BatchFlow,
    writer: PersistenceWriter,
    tracker: Arc<RequestTracker>,
    sleeper: Arc<dyn Sleeper>,
    pacing: PacingPolicy,
    allowed_labels: Vec<String>,
    instructions: String,
    stats_file: Option<PathBuf>,
    cursor: RouteCursor,
}

impl LabelingOrchestrator {
    pub fn new(
        service: Arc<dyn LabelingService>,
        tracker: Arc<RequestTracker>,
        policy: RetryPolicy,
        options: OrchestratorOptions,
    ) -> Self {
        let flow = BatchFlow::new(
            service,
            tracker.clone(),
            options.sleeper.clone(),
            policy,
            options.validation,
        );
        Self {
            flow,
            writer: PersistenceWriter::default(),
            tracker,
            sleeper: options.sleeper,
            pacing: options.pacing,
            allowed_labels: options.allowed_labels,
            instructions: options.instructions,
            stats_file: options.stats_file,
            cursor: RouteCursor::new(),
        }
    }

    pub fn with_writer(mut self, writer: PersistenceWriter) -> Self {
        self.writer = writer;
        self
    }

    /// 处理所有批次
    ///
    /// `table` 始终与磁盘上最后一次成功提交的内容一致。
    pub async fn run(
        &mut self,
        handle: &ArtifactHandle,
        table: &mut Table,
        batches: &[Batch],
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunAborted> {
        let mut summary = RunSummary::new(handle, batches.len());
        let total_batches = batches.len();

        for (i, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("⏹️ 收到停止信号，在第 {}/{} 批之前停止", i + 1, total_batches);
                summary.cancelled = true;
                break;
            }

            let ctx = BatchCtx::new(handle.dataset.clone(), i + 1, total_batches, *batch);
            let request = self.build_request(table, batch);
            if request.is_empty() {
                info!("{} ⏭️ 没有待标注的行，跳过", ctx);
                summary
                    .batches
                    .push(BatchReport::new(*batch, BatchStatusReport::Skipped, 0));
                continue;
            }

            log_batch_start(i + 1, total_batches, batch, request.len());
            let outcome = self.flow.run(&ctx, &request, &mut self.cursor, cancel).await;
            let mut report = BatchReport::new(*batch, BatchStatusReport::Abandoned, request.len());
            report.attempts = outcome.attempts();

            match outcome {
                BatchOutcome::Success { items, route, .. } => {
                    report.model = Some(route.model.clone());
                    report.credential = Some(route.credential.to_string());

                    let mut next = table.clone();
                    let committed = next.apply(&items);
                    if let Err(source) = self.writer.commit(handle, &next).await {
                        error!("{} ❌ 提交失败，中止运行: {}", ctx, source);
                        report.status = BatchStatusReport::CommitFailed;
                        report.error = Some(source.to_string());
                        summary.batches.push(report);
                        summary.finish(table);
                        self.export_stats().await;
                        print_final_summary(&summary);
                        return Err(RunAborted {
                            summary: Box::new(summary),
                            source,
                        });
                    }
                    *table = next;

                    summary.rows_committed += committed;
                    report.rows_committed = committed;
                    if committed == request.len() {
                        summary.batches_succeeded += 1;
                        report.status = BatchStatusReport::Succeeded;
                    } else {
                        summary.batches_partial += 1;
                        report.status = BatchStatusReport::Partial;
                        warn!(
                            "{} ⚠️ 只提交了 {}/{} 行，其余留待下次",
                            ctx,
                            committed,
                            request.len()
                        );
                    }
                    log_batch_complete(i + 1, committed, request.len());
                    let progress = table.progress();
                    info!(
                        "📊 进度: {}/{} ({:.1}%)",
                        progress.completed, progress.total, progress.percent
                    );
                }
                BatchOutcome::Abandoned {
                    reason,
                    last_route,
                    last_error,
                    ..
                } => {
                    summary.batches_abandoned += 1;
                    report.model = last_route.as_ref().map(|r| r.model.clone());
                    report.credential = last_route.as_ref().map(|r| r.credential.to_string());
                    report.error = last_error.or_else(|| Some(reason.as_str().to_string()));
                    if reason == AbandonReason::QuotaExhausted {
                        warn!("{} 所有组合配额用尽，继续下一批", ctx);
                    }
                    warn!("{} ⏭️ 本批放弃，{} 行保持未完成", ctx, request.len());
                }
                BatchOutcome::Interrupted { .. } => {
                    report.status = BatchStatusReport::Interrupted;
                    summary.batches.push(report);
                    summary.cancelled = true;
                    break;
                }
            }
            summary.batches.push(report);

            self.export_stats().await;

            if i + 1 < total_batches {
                let pause = self.pacing.pause_after(batch.len());
                if !pause.is_zero() {
                    info!("⏸️ 批次间暂停 {:.1}s", pause.as_secs_f64());
                }
                // 被打断时由下一轮的边界检查收尾
                sleep_or_cancel(self.sleeper.as_ref(), pause, cancel).await;
            }
        }

        summary.finish(table);
        self.export_stats().await;
        print_final_summary(&summary);
        Ok(summary)
    }

    /// 只取批内未完成的行
    fn build_request(&self, table: &Table, batch: &Batch) -> LabelRequest {
        let items = batch
            .rows(&table.rows)
            .iter()
            .filter(|row| !row.is_complete())
            .map(|row| InputItem {
                id: row.id,
                text: table.text_of(row).to_string(),
            })
            .collect();
        LabelRequest {
            items,
            allowed_labels: self.allowed_labels.clone(),
            instructions: self.instructions.clone(),
        }
    }

    /// 导出失败只记日志
    async fn export_stats(&self) {
        let Some(path) = &self.stats_file else {
            return;
        };
        let doc = StatsDocument::collect(&self.tracker).await;
        let target = path.clone();
        match tokio::task::spawn_blocking(move || doc.write_to(&target)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("⚠️ 统计导出失败 ({}): {}", path.display(), e),
            Err(e) => warn!("⚠️ 统计导出任务异常退出: {}", e),
        }
    }
}
