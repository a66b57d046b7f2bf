//! 批次：连续的半开区间 `[start, end)`

use crate::models::row::{Row, RowId};
use serde::Serialize;
use std::fmt;
use std::ops::Range;

/// 批次状态（由批内各行的完成标志纯函数推导）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// 全部完成
    Complete,
    /// 部分完成
    Partial { completed: usize, total: usize },
    /// 全部未完成
    Empty,
}

/// 一个批次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Batch {
    pub start: RowId,
    pub end: RowId,
}

impl Batch {
    pub fn new(start: RowId, end: RowId) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<RowId> {
        self.start..self.end
    }

    /// 批内的行（越界部分截断）
    pub fn rows<'a>(&self, rows: &'a [Row]) -> &'a [Row] {
        let end = self.end.min(rows.len());
        let start = self.start.min(end);
        &rows[start..end]
    }

    pub fn status(&self, rows: &[Row]) -> BatchStatus {
        let slice = self.rows(rows);
        let completed = slice.iter().filter(|r| r.is_complete()).count();
        match completed {
            0 => BatchStatus::Empty,
            c if c == slice.len() => BatchStatus::Complete,
            c => BatchStatus::Partial {
                completed: c,
                total: slice.len(),
            },
        }
    }

    /// 日志里使用的 1-based 行号区间，例如 `51-100`
    pub fn human_range(&self) -> String {
        format!("{}-{}", self.start + 1, self.end)
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(done: &[bool]) -> Vec<Row> {
        done.iter()
            .enumerate()
            .map(|(i, d)| {
                let mut r = Row::unlabeled(i, vec![String::new()]);
                if *d {
                    r.label = Some("a".to_string());
                    r.justification = Some("b".to_string());
                }
                r
            })
            .collect()
    }

    #[test]
    fn test_status_is_derived_from_rows() {
        let rs = rows(&[true, true, false, false]);
        assert_eq!(Batch::new(0, 2).status(&rs), BatchStatus::Complete);
        assert_eq!(
            Batch::new(1, 3).status(&rs),
            BatchStatus::Partial {
                completed: 1,
                total: 2
            }
        );
        assert_eq!(Batch::new(2, 4).status(&rs), BatchStatus::Empty);
    }

    #[test]
    fn test_display() {
        let b = Batch::new(50, 100);
        assert_eq!(b.to_string(), "[50, 100)");
        assert_eq!(b.human_range(), "51-100");
        assert_eq!(b.len(), 50);
    }
}
