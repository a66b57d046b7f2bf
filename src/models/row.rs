//! 数据行与断点表
//!
//! 一行 = 一个工作单元，身份是它在原始数据集中的位置

use crate::models::label::LabelItem;
use serde::Serialize;

/// 行身份（原始数据集中的位置，从 0 开始）
pub type RowId = usize;

/// 数据集中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 稳定身份
    pub id: RowId,
    /// 原始数据集的各列（与 `Table::columns` 对齐）
    pub fields: Vec<String>,
    /// 分类结果（未标注时为空）
    pub label: Option<String>,
    /// 分类理由（未标注时为空）
    pub justification: Option<String>,
}

impl Row {
    /// 创建一条未标注的行
    pub fn unlabeled(id: RowId, fields: Vec<String>) -> Self {
        Self {
            id,
            fields,
            label: None,
            justification: None,
        }
    }

    /// 两个输出都非空才算完成
    pub fn is_complete(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.label) && filled(&self.justification)
    }
}

/// 进度信息
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub percent: f64,
}

impl Progress {
    pub fn new(total: usize, completed: usize) -> Self {
        let percent = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total,
            completed,
            percent,
        }
    }

    /// 剩余未完成的行数
    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }

    pub fn is_finished(&self) -> bool {
        self.completed == self.total
    }
}

/// 断点表：原始列 + 标注结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// 原始列名（不含 id / label / justification）
    pub columns: Vec<String>,
    /// 输入文本所在列的下标
    pub text_index: usize,
    pub rows: Vec<Row>,
}

impl Table {
    /// 按列名定位文本列，找不到返回 None
    pub fn new(columns: Vec<String>, text_column: &str, rows: Vec<Row>) -> Option<Self> {
        let text_index = columns.iter().position(|c| c == text_column)?;
        Some(Self {
            columns,
            text_index,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 行的输入文本
    pub fn text_of<'a>(&self, row: &'a Row) -> &'a str {
        row.fields
            .get(self.text_index)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn progress(&self) -> Progress {
        let completed = self.rows.iter().filter(|r| r.is_complete()).count();
        Progress::new(self.rows.len(), completed)
    }

    /// 写入标注结果，返回实际更新的行数
    ///
    /// 已完成的行不会被覆盖；未知 id 被忽略。
    pub fn apply(&mut self, items: &[LabelItem]) -> usize {
        let mut updated = 0;
        for item in items {
            let Some(row) = self.rows.get_mut(item.id) else {
                continue;
            };
            if row.id != item.id || row.is_complete() {
                continue;
            }
            row.label = Some(item.label.clone());
            row.justification = Some(item.justification.clone());
            if row.is_complete() {
                updated += 1;
            }
        }
        updated
    }
}
