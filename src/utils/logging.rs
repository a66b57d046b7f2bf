/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::models::Batch;
use crate::orchestrator::RunSummary;

/// 初始化日志：控制台 + 按天滚动的日志文件
///
/// 返回的 guard 必须在 main 中持有到程序结束，否则文件日志会丢失
pub fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("创建日志目录失败: {}", log_dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("labeling")
        .filename_suffix("log")
        .build(log_dir)
        .context("创建日志文件失败")?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("初始化日志订阅器失败")?;

    Ok(guard)
}

/// 记录运行启动信息
///
/// # 参数
/// - `dataset`: 数据集名称
/// - `total_batches`: 待处理批次数
/// - `batch_width`: 每批行数
pub fn log_startup(dataset: &str, total_batches: usize, batch_width: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 开始标注 - 数据集 {}", dataset);
    info!("📊 待处理批次: {} (每批 {} 行)", total_batches, batch_width);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号（从 1 开始）
/// - `total_batches`: 批次总数
/// - `batch`: 行区间
/// - `pending`: 本批需要发送的行数
pub fn log_batch_start(batch_num: usize, total_batches: usize, batch: &Batch, pending: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批", batch_num, total_batches);
    info!("📄 本批行: {} (待标注 {} 行)", batch.human_range(), pending);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, committed: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 第 {} 批完成: 提交 {}/{}", batch_num, committed, total);
    info!("{}", "─".repeat(60));
}

/// 打印运行总结
pub fn print_final_summary(summary: &RunSummary) {
    info!("\n{}", "=".repeat(60));
    info!("📊 标注运行统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 本次提交行数: {}", summary.rows_committed);
    info!("⏳ 仍未完成行数: {}", summary.rows_incomplete);
    info!(
        "📦 批次: 计划 {} / 成功 {} / 部分 {} / 放弃 {}",
        summary.batches_planned,
        summary.batches_succeeded,
        summary.batches_partial,
        summary.batches_abandoned
    );
    if summary.cancelled {
        info!("⏹️ 运行被用户停止");
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
