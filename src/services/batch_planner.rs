//! 批次规划 - 业务能力层
//!
//! 把所有行切成固定宽度的连续批次，再按完成状态筛选：
//! - `Complete`：跳过
//! - `Partial`：默认跳过，只有 `force_partial` 才安排
//! - `Empty`：安排
//!
//! 部分完成的批次重新发送要花一整批的调用去补几行，所以默认不安排；
//! 多次运行后可能留下永久的部分批次，用 `force_partial` 显式收尾。

use std::num::NonZeroUsize;

use crate::models::{Batch, BatchStatus, Row};

/// 规划选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub force_partial: bool,
}

/// 规划结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// 按行序排列的待处理批次
    pub batches: Vec<Batch>,
    /// 已完成而跳过的批次数
    pub skipped_complete: usize,
    /// 部分完成而跳过的批次
    pub skipped_partial: Vec<Batch>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// 所有批次（不筛选）
pub fn partition(total: usize, width: NonZeroUsize) -> Vec<Batch> {
    (0..total)
        .step_by(width.get())
        .map(|start| Batch::new(start, (start + width.get()).min(total)))
        .collect()
}

/// 规划待处理批次
pub fn plan(rows: &[Row], width: NonZeroUsize, options: PlanOptions) -> Plan {
    let mut result = Plan::default();

    for batch in partition(rows.len(), width) {
        match batch.status(rows) {
            BatchStatus::Complete => result.skipped_complete += 1,
            BatchStatus::Partial { .. } if !options.force_partial => {
                result.skipped_partial.push(batch)
            }
            BatchStatus::Partial { .. } | BatchStatus::Empty => result.batches.push(batch),
        }
    }

    result
}
