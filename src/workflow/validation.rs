//! 响应校验
//!
//! 服务返回的条目必须与请求一一对应：
//! - 每条的 id 属于请求，且不重复
//! - 分类在允许集合内
//! - 理由非空
//!
//! 严格模式下条数还必须与请求相等，任何不符都按 `Malformed` 处理（可重试）。
//! 宽松模式只保留合法子集，子集为空时仍是 `Malformed`。

use crate::error::ServiceError;
use crate::models::{LabelItem, LabelRequest, RowId};
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    #[default]
    Strict,
    Relaxed,
}

impl ValidationMode {
    pub fn from_relaxed(relaxed: bool) -> Self {
        if relaxed {
            ValidationMode::Relaxed
        } else {
            ValidationMode::Strict
        }
    }
}

/// 校验并返回可提交的条目（保持服务返回的顺序）
pub fn validate(
    request: &LabelRequest,
    items: Vec<LabelItem>,
    mode: ValidationMode,
) -> Result<Vec<LabelItem>, ServiceError> {
    if mode == ValidationMode::Strict && items.len() != request.len() {
        return Err(ServiceError::Malformed(format!(
            "期望 {} 条结果，实际 {} 条",
            request.len(),
            items.len()
        )));
    }

    let expected: HashSet<RowId> = request.items.iter().map(|i| i.id).collect();
    let mut seen = HashSet::with_capacity(items.len());
    let mut valid = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();

    for item in items {
        let problem = if !expected.contains(&item.id) {
            Some(format!("未知 id {}", item.id))
        } else if seen.contains(&item.id) {
            Some(format!("重复 id {}", item.id))
        } else if !request.allowed_labels.iter().any(|l| l == item.label.trim()) {
            Some(format!("id {} 的分类 '{}' 不在允许集合内", item.id, item.label))
        } else if item.justification.trim().is_empty() {
            Some(format!("id {} 缺少理由", item.id))
        } else {
            None
        };

        match problem {
            Some(reason) => {
                if mode == ValidationMode::Strict {
                    return Err(ServiceError::Malformed(reason));
                }
                rejected.push(reason);
            }
            None => {
                seen.insert(item.id);
                valid.push(LabelItem {
                    label: item.label.trim().to_string(),
                    justification: item.justification.trim().to_string(),
                    id: item.id,
                });
            }
        }
    }

    if valid.is_empty() {
        return Err(ServiceError::Malformed(
            rejected
                .first()
                .cloned()
                .unwrap_or_else(|| "响应为空".to_string()),
        ));
    }

    if !rejected.is_empty() {
        warn!(
            "⚠️ 丢弃 {} 条不合法结果，保留 {} 条（首个问题: {}）",
            rejected.len(),
            valid.len(),
            rejected[0]
        );
    }

    Ok(valid)
}
