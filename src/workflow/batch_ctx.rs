//! 批次处理上下文
//!
//! 封装"我正在处理哪个数据集的第几批"这一信息

use std::fmt::Display;

use crate::models::Batch;

/// 批次处理上下文
#[derive(Debug, Clone)]
pub struct BatchCtx {
    /// 数据集名称
    pub dataset: String,

    /// 批次序号（从1开始，仅用于日志显示）
    pub batch_index: usize,

    /// 本次运行的批次总数
    pub total_batches: usize,

    /// 行区间
    pub batch: Batch,
}

impl BatchCtx {
    /// 创建新的批次上下文
    pub fn new(dataset: impl Into<String>, batch_index: usize, total_batches: usize, batch: Batch) -> Self {
        Self {
            dataset: dataset.into(),
            batch_index,
            total_batches,
            batch,
        }
    }
}

impl Display for BatchCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} 批次 {}/{} 行 {}]",
            self.dataset,
            self.batch_index,
            self.total_batches,
            self.batch.human_range()
        )
    }
}
