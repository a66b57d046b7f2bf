//! 控制面 - 编排层
//!
//! 给 CLI/界面层用的唯一入口：
//! - `start()`：恢复断点 → 规划批次 → 在后台任务中运行编排器
//! - `stop()`：发出协作式停止信号
//! - `wait()`：等待后台任务结束，拿到运行总结
//! - `progress()` / `stats()`：只读查询，委托给断点存储和请求统计
//!
//! 本层不含业务判断，只做装配和生命周期管理。

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{Sleeper, TokioSleeper};
use crate::models::Progress;
use crate::orchestrator::labeling_orchestrator::{
    LabelingOrchestrator, OrchestratorOptions, RunAborted, RunSummary,
};
use crate::orchestrator::session_report::write_session_report;
use crate::services::llm_service::load_prompt_template;
use crate::services::{
    plan, CheckpointStore, LabelingService, Plan, PlanOptions, RequestTracker, SessionStats,
};
use crate::utils::logging::log_startup;
use crate::workflow::{PacingPolicy, RetryPolicy, ValidationMode};

/// `start()` 的返回信息
#[derive(Debug, Clone)]
pub struct StartInfo {
    pub artifact: PathBuf,
    pub progress: Progress,
    pub plan: Plan,
}

struct ActiveRun {
    dataset: String,
    cancel: CancellationToken,
    /// `wait()` 取走后为 None，直到等待结束
    task: Option<JoinHandle<Result<RunSummary, RunAborted>>>,
}

impl ActiveRun {
    fn is_running(&self) -> bool {
        self.task.as_ref().map_or(true, |t| !t.is_finished())
    }
}

/// 标注控制器
pub struct LabelingController {
    config: Config,
    store: Arc<CheckpointStore>,
    service: Arc<dyn LabelingService>,
    tracker: Arc<RequestTracker>,
    sleeper: Arc<dyn Sleeper>,
    pacing: PacingPolicy,
    active: Mutex<Option<ActiveRun>>,
}

impl LabelingController {
    pub fn new(config: Config, service: Arc<dyn LabelingService>) -> Self {
        Self {
            store: Arc::new(CheckpointStore::new(&config)),
            tracker: Arc::new(RequestTracker::new(config.stats_lock_timeout())),
            service,
            sleeper: Arc::new(TokioSleeper),
            pacing: PacingPolicy::default(),
            active: Mutex::new(None),
            config,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn tracker(&self) -> Arc<RequestTracker> {
        self.tracker.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 开始标注；同一时刻只允许一个运行
    pub async fn start(
        &self,
        dataset: &str,
        batch_width: NonZeroUsize,
        retry_policy: RetryPolicy,
    ) -> AppResult<StartInfo> {
        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref().filter(|r| r.is_running()) {
            return Err(AppError::AlreadyRunning {
                dataset: run.dataset.clone(),
            });
        }

        let instructions = load_prompt_template(&self.config.prompt_template_path)?;

        let store = self.store.clone();
        let name = dataset.to_string();
        let resolved = tokio::task::spawn_blocking(move || store.resolve(&name)).await??;

        let plan = plan(
            &resolved.table.rows,
            batch_width,
            PlanOptions {
                force_partial: self.config.force_partial,
            },
        );
        if !plan.skipped_partial.is_empty() {
            info!(
                "⏭️ 跳过 {} 个部分完成的批次（设置 FORCE_PARTIAL=true 可强制处理）",
                plan.skipped_partial.len()
            );
        }
        log_startup(&resolved.handle.dataset, plan.batches.len(), batch_width.get());

        let info = StartInfo {
            artifact: resolved.handle.path.clone(),
            progress: resolved.progress,
            plan: plan.clone(),
        };

        let mut orchestrator = LabelingOrchestrator::new(
            self.service.clone(),
            self.tracker.clone(),
            retry_policy,
            OrchestratorOptions {
                sleeper: self.sleeper.clone(),
                pacing: self.pacing.clone(),
                validation: ValidationMode::from_relaxed(self.config.relaxed_validation),
                allowed_labels: self.config.allowed_labels.clone(),
                instructions,
                stats_file: Some(self.config.stats_file.clone()),
            },
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let log_dir = self.config.log_dir.clone();
        let dataset_name = resolved.handle.dataset.clone();
        let handle = resolved.handle;
        let mut table = resolved.table;
        let batches = plan.batches;

        let task = tokio::spawn(async move {
            let result = orchestrator.run(&handle, &mut table, &batches, &token).await;
            let summary = match &result {
                Ok(summary) => summary,
                Err(aborted) => aborted.summary.as_ref(),
            };
            match write_session_report(&log_dir, summary) {
                Ok(path) => info!("📝 会话报告: {}", path.display()),
                Err(e) => warn!("⚠️ 会话报告写入失败: {}", e),
            }
            result
        });

        *active = Some(ActiveRun {
            dataset: dataset_name,
            cancel,
            task: Some(task),
        });
        Ok(info)
    }

    /// 发出停止信号；正在进行的调用会先完成
    pub async fn stop(&self) -> AppResult<()> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(run) if run.is_running() => {
                info!("⏹️ 请求停止数据集 {} 的标注", run.dataset);
                run.cancel.cancel();
                Ok(())
            }
            _ => Err(AppError::NotRunning),
        }
    }

    /// 等待当前运行结束
    pub async fn wait(&self) -> AppResult<RunSummary> {
        let task = self
            .active
            .lock()
            .await
            .as_mut()
            .and_then(|run| run.task.take())
            .ok_or(AppError::NotRunning)?;
        let result = task.await;
        *self.active.lock().await = None;
        Ok(result??)
    }

    pub async fn is_running(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| run.is_running())
    }

    /// 只读进度，没有断点文件时为 None
    pub async fn progress(&self, dataset: &str) -> AppResult<Option<Progress>> {
        let store = self.store.clone();
        let name = dataset.to_string();
        Ok(tokio::task::spawn_blocking(move || store.progress(&name)).await??)
    }

    /// 请求统计快照（等锁有上限）
    pub async fn stats(&self) -> SessionStats {
        self.tracker.snapshot().await
    }
}
